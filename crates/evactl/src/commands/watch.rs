use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;

use eva_core::{ClientConfig, ItemState, StateLookup};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::commands::util::{self, StateView};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    config: ClientConfig,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let client = util::connect(config).await?;
    let color = util::color_enabled(global);

    let mut connection = client.connection_state();
    tokio::spawn(async move {
        while connection.changed().await.is_ok() {
            let state = *connection.borrow_and_update();
            tracing::info!(%state, "connection state changed");
        }
    });

    // States known before the streams open, to skip with --changes-only.
    let mut current: HashMap<String, Arc<ItemState>> = HashMap::new();
    if args.changes_only {
        for item in &args.items {
            match client.lookup(item) {
                StateLookup::Single(state) => current.extend(state.map(|s| (s.oid.clone(), s))),
                StateLookup::Many(found) => {
                    current.extend(found.into_iter().map(|s| (s.oid.clone(), s)));
                }
            }
        }
    }

    let mut updates = stream::select_all(args.items.iter().map(|item| client.subscribe(item)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut printed = 0usize;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            next = updates.next() => {
                let Some(state) = next else { break };
                if current.get(&state.oid).is_some_and(|s| Arc::ptr_eq(s, &state)) {
                    continue;
                }
                let view = StateView::from(&state);
                let line = output::render_event(&global.output, &view, |v| util::state_line(v, color));
                output::print_output(&line, global.quiet);
                printed += 1;
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
        }
    }

    drop(updates);
    util::disconnect(&client).await;
    Ok(())
}

use std::collections::BTreeMap;
use std::sync::Arc;

use eva_core::{Client, ClientConfig, ItemState, StateLookup};

use crate::cli::{GlobalOpts, StateArgs};
use crate::commands::util::{self, StateView};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    config: ClientConfig,
    args: StateArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let client = util::connect_once(config, true).await?;
    let collected = collect(&client, &args.items);
    util::disconnect(&client).await;
    let states = collected?;

    let color = util::color_enabled(global);
    let views: Vec<StateView<'_>> = states.iter().map(StateView::from).collect();
    let out = output::render_list(
        &global.output,
        &views,
        |v| util::state_row(v, color),
        |v| util::state_line(v, color),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

/// States of every requested OID or mask, sorted by OID.
///
/// An exact OID the server does not know is an error; a mask matching
/// nothing is not.
fn collect(client: &Client, items: &[String]) -> Result<Vec<Arc<ItemState>>, CliError> {
    let mut states = BTreeMap::new();
    for item in items {
        match client.lookup(item) {
            StateLookup::Single(Some(state)) => {
                states.insert(state.oid.clone(), state);
            }
            StateLookup::Single(None) => {
                return Err(CliError::NotFound {
                    pattern: item.clone(),
                });
            }
            StateLookup::Many(found) => {
                states.extend(found.into_iter().map(|s| (s.oid.clone(), s)));
            }
        }
    }
    Ok(states.into_values().collect())
}

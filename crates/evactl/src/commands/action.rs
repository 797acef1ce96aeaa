use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use eva_core::{ActionResult, ClientConfig, CoreError};

use crate::cli::{ActionArgs, ActionCommand, GlobalOpts};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

pub async fn handle(
    config: ClientConfig,
    args: ActionArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        ActionCommand::Wait { uuid, wait } => wait_for(config, uuid, wait, global).await,
        ActionCommand::Watch { uuid } => watch(config, uuid, global).await,
    }
}

async fn wait_for(
    config: ClientConfig,
    uuid: Uuid,
    wait: u64,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let client = util::connect_once(config, false).await?;
    let outcome = tokio::time::timeout(Duration::from_secs(wait), client.wait_action(uuid)).await;
    util::disconnect(&client).await;
    let result = outcome.map_err(|_| CliError::Timeout { seconds: wait })??;

    let out = output::render_single(&global.output, &result, action_detail, status_line);
    output::print_output(&out, global.quiet);
    finished_ok(uuid, &result)
}

async fn watch(config: ClientConfig, uuid: Uuid, global: &GlobalOpts) -> Result<(), CliError> {
    let client = util::connect_once(config, false).await?;
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<ActionResult, CoreError>>();
    client.watch_action(
        uuid,
        Arc::new(move |outcome: Result<&ActionResult, &CoreError>| {
            let _ = tx.send(outcome.cloned().map_err(Clone::clone));
        }),
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last = None;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            next = rx.recv() => {
                let Some(outcome) = next else { break };
                match outcome {
                    Ok(result) => {
                        let line = output::render_event(&global.output, &result, status_line);
                        output::print_output(&line, global.quiet);
                        let finished = result.finished;
                        last = Some(result);
                        if finished {
                            break;
                        }
                    }
                    Err(e) => {
                        util::disconnect(&client).await;
                        return Err(e.into());
                    }
                }
            }
        }
    }

    util::disconnect(&client).await;
    match last {
        Some(ref result) if result.finished => finished_ok(uuid, result),
        _ => Ok(()),
    }
}

fn finished_ok(uuid: Uuid, result: &ActionResult) -> Result<(), CliError> {
    if result.is_success() {
        Ok(())
    } else {
        Err(CliError::ActionFailed {
            uuid,
            status: result.status.clone(),
        })
    }
}

fn status_line(result: &ActionResult) -> String {
    match result.exitcode {
        Some(code) => format!("{} (exit code {code})", result.status),
        None => result.status.clone(),
    }
}

fn action_detail(result: &ActionResult) -> String {
    let mut out = String::new();
    let field = |label: &str, value: Option<String>| {
        value.map(|v| format!("{label:<10} {v}\n")).unwrap_or_default()
    };
    out.push_str(&field("UUID:", result.uuid.map(|u| u.to_string())));
    out.push_str(&field("Item:", result.oid.clone()));
    out.push_str(&field("Status:", Some(result.status.clone())));
    out.push_str(&field("Exit code:", result.exitcode.map(|c| c.to_string())));
    out.push_str(&field("Elapsed:", result.elapsed.map(|e| format!("{e:.3}s"))));
    out.push_str(&field("Node:", result.node.clone()));
    for (label, value) in [("Output:", &result.out), ("Error:", &result.err)] {
        if let Some(value) = value {
            let _ = writeln!(out, "{label:<10} {}", util::display_value(Some(value)));
        }
    }
    out.trim_end().to_owned()
}

use tabled::Tabled;
use tokio::sync::mpsc;

use eva_core::config::log_level_from_name;
use eva_core::{ClientConfig, HandlerEvent, HandlerId, LogRecord, StateUpdates};

use crate::cli::{GlobalOpts, LogArgs};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct LogRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Module")]
    module: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn log_row(record: &LogRecord, color: bool) -> LogRow {
    LogRow {
        time: util::format_time(Some(record.time)),
        level: output::paint_level(record.level, record.level_label(), color),
        module: record.module.clone().unwrap_or_default(),
        message: record.message.clone(),
    }
}

fn log_line(record: &LogRecord, color: bool) -> String {
    format!(
        "{} {} {}: {}",
        util::format_time(Some(record.time)),
        output::paint_level(record.level, record.level_label(), color),
        record.module.as_deref().unwrap_or("-"),
        record.message
    )
}

/// Numeric level from a number or a level name.
fn parse_level(raw: &str) -> Result<u32, CliError> {
    raw.parse()
        .ok()
        .or_else(|| log_level_from_name(raw))
        .ok_or_else(|| CliError::Validation {
            field: "level".into(),
            reason: format!("unknown log level: {raw}"),
        })
}

pub async fn handle(
    mut config: ClientConfig,
    args: LogArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let level = match args.level {
        Some(ref raw) => parse_level(raw)?,
        None => config.log.level,
    };
    if let Some(records) = args.records {
        config.log.records = records;
    }
    config.state_updates = StateUpdates::Disabled;

    let client = if args.follow {
        util::connect(config).await?
    } else {
        util::connect_once(config, false).await?
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<LogRecord>();
    client.on(HandlerId::LogRecord, move |event| {
        if let HandlerEvent::Log(record) = event {
            let _ = tx.send(record.clone());
        }
    });

    let color = util::color_enabled(global);
    let started = client.log_start(Some(level)).await;

    if !args.follow || started.is_err() {
        util::disconnect(&client).await;
        started?;
        let mut records = Vec::new();
        while let Ok(record) = rx.try_recv() {
            records.push(record);
        }
        let out = output::render_list(
            &global.output,
            &records,
            |r| log_row(r, color),
            |r| log_line(r, color),
        );
        output::print_output(&out, global.quiet);
        return Ok(());
    }

    // Polling reloads deliver the whole backlog again.
    let dedupe = !client.config().push_mode;
    let mut last = f64::MIN;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            next = rx.recv() => {
                let Some(record) = next else { break };
                if dedupe && record.time <= last {
                    continue;
                }
                last = last.max(record.time);
                let line = output::render_event(&global.output, &record, |r| log_line(r, color));
                output::print_output(&line, global.quiet);
            }
        }
    }

    util::disconnect(&client).await;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_from_numbers_and_names() {
        assert_eq!(parse_level("30").unwrap(), 30);
        assert_eq!(parse_level("warning").unwrap(), 30);
        assert_eq!(parse_level("ERROR").unwrap(), 40);
        assert!(matches!(parse_level("loud"), Err(CliError::Validation { .. })));
    }

    #[test]
    fn lines_include_module_and_label() {
        let record: LogRecord = serde_json::from_value(serde_json::json!({
            "l": 40, "mod": "eva.core", "msg": "disk full", "t": 0.0
        }))
        .unwrap();
        assert_eq!(
            log_line(&record, false),
            "1970-01-01 00:00:00.000 ERROR eva.core: disk full"
        );
    }
}

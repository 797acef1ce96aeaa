//! Output formatting: table, JSON, YAML, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one line per item.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Item status, colored by meaning: 0 dim, negative red, positive green.
pub fn paint_status(status: Option<i64>, color: bool) -> String {
    let text = status.map_or_else(|| "-".to_owned(), |s| s.to_string());
    if !color {
        return text;
    }
    match status {
        Some(s) if s < 0 => text.red().to_string(),
        Some(0) => text.dimmed().to_string(),
        Some(_) => text.green().to_string(),
        None => text.yellow().to_string(),
    }
}

/// Log level label, colored by severity.
pub fn paint_level(level: u32, label: &str, color: bool) -> String {
    if !color {
        return label.to_owned();
    }
    match level {
        0..=19 => label.dimmed().to_string(),
        20..=29 => label.cyan().to_string(),
        30..=39 => label.yellow().to_string(),
        _ => label.red().bold().to_string(),
    }
}

pub fn paint_oid(oid: &str, color: bool) -> String {
    if color {
        oid.bold().to_string()
    } else {
        oid.to_owned()
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
///
/// - `table`: uses the `Tabled` derive to build a pretty table
/// - `json` / `json-compact`: serializes the original data via serde
/// - `yaml`: serializes via serde_yaml
/// - `plain`: calls `line_fn` on each item to emit one line per item
pub fn render_list<T, R>(
    format: &OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    line_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => data.iter().map(&line_fn).collect::<Vec<_>>().join("\n"),
    }
}

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses a custom `detail_fn` that returns a pre-formatted
/// string, since single-item detail views don't use `Tabled` derive.
pub fn render_single<T>(
    format: &OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    line_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize + ?Sized,
{
    match format {
        OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => line_fn(data),
    }
}

/// Render one item of a stream: a single line in every format.
pub fn render_event<T: serde::Serialize>(
    format: &OutputFormat,
    data: &T,
    line_fn: impl Fn(&T) -> String,
) -> String {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => format!("---\n{}", render_yaml(data)),
        OutputFormat::Table | OutputFormat::Plain => line_fn(data),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> String {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

fn render_yaml<T: serde::Serialize + ?Sized>(data: &T) -> String {
    serde_yaml::to_string(data).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Item {
        oid: String,
        status: i64,
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "OID")]
        oid: String,
    }

    fn items() -> Vec<Item> {
        vec![
            Item {
                oid: "unit:a".into(),
                status: 1,
            },
            Item {
                oid: "unit:b".into(),
                status: 0,
            },
        ]
    }

    fn row(item: &Item) -> Row {
        Row {
            oid: item.oid.clone(),
        }
    }

    #[test]
    fn plain_lists_one_line_per_item() {
        let out = render_list(&OutputFormat::Plain, &items(), row, |i| i.oid.clone());
        assert_eq!(out, "unit:a\nunit:b");
    }

    #[test]
    fn compact_json_is_single_line() {
        let out = render_list(&OutputFormat::JsonCompact, &items(), row, |i| i.oid.clone());
        assert_eq!(out, r#"[{"oid":"unit:a","status":1},{"oid":"unit:b","status":0}]"#);
    }

    #[test]
    fn table_has_headers() {
        let out = render_list(&OutputFormat::Table, &items(), row, |i| i.oid.clone());
        assert!(out.contains("OID"));
        assert!(out.contains("unit:b"));
    }

    #[test]
    fn events_stay_on_one_line_as_json() {
        let out = render_event(&OutputFormat::Json, &items()[0], |i| i.oid.clone());
        assert!(!out.contains('\n'));
    }

    #[test]
    fn status_without_color_is_plain() {
        assert_eq!(paint_status(Some(-1), false), "-1");
        assert_eq!(paint_status(None, false), "-");
    }
}

use eva_core::{ClientConfig, ServerInfo};

use crate::cli::GlobalOpts;
use crate::commands::util;
use crate::error::CliError;
use crate::output;

pub async fn handle(config: ClientConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let client = util::connect_once(config, false).await?;
    let info = client.server_info();
    let user = client.authorized_user();
    let tsdiff = client.tsdiff();
    util::disconnect(&client).await;

    let info = info.ok_or_else(|| CliError::Protocol {
        message: "server did not report its information".into(),
    })?;

    let out = output::render_single(
        &global.output,
        &*info,
        |i| detail(i, user.as_deref(), tsdiff),
        |i| i.system_name.clone().unwrap_or_default(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

fn detail(info: &ServerInfo, user: Option<&str>, tsdiff: Option<f64>) -> String {
    let rows = [
        ("System", info.system_name.clone()),
        ("Product", info.product_name.clone()),
        ("Version", info.version.clone()),
        ("Build", info.build.map(|b| b.to_string())),
        ("Server time", Some(util::format_time(Some(info.time)))),
        ("Uptime", info.uptime.map(|u| format!("{u:.0}s"))),
        ("Clock skew", tsdiff.map(|d| format!("{d:+.3}s"))),
        ("User", user.map(str::to_owned)),
    ];
    rows.into_iter()
        .filter_map(|(label, value)| {
            let label = format!("{label}:");
            value.map(|v| format!("{label:<12} {v}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

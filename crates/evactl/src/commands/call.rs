use eva_core::ClientConfig;

use crate::cli::{CallArgs, GlobalOpts};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

pub async fn handle(
    config: ClientConfig,
    args: CallArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let params = util::parse_params(args.params.as_deref())?;
    let client = util::connect_once(config, false).await?;
    let result = match args.item {
        Some(ref oid) => client.call_item(&args.method, oid, params).await,
        None => client.call(&args.method, params).await,
    };
    util::disconnect(&client).await;
    let value = result?;

    let out = output::render_single(
        &global.output,
        &value,
        |v| serde_json::to_string_pretty(v).unwrap_or_default(),
        |v| util::display_value(Some(v)),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

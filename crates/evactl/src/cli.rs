//! Clap derive structures for the `evactl` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// evactl -- command-line client for EVA ICS HMI servers
#[derive(Debug, Parser)]
#[command(
    name = "evactl",
    version,
    about = "Inspect and follow EVA ICS HMI servers from the command line",
    long_about = "A command-line client for EVA ICS HMI servers.\n\n\
        Dumps and watches item states, issues raw API calls, follows the\n\
        server log and waits for actions to finish.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Server profile to use
    #[arg(long, short = 'p', env = "EVA_PROFILE", global = true)]
    pub profile: Option<String>,

    /// HMI server URL (overrides profile)
    #[arg(long, short = 's', env = "EVA_SERVER", global = true)]
    pub server: Option<String>,

    /// API key
    #[arg(long, env = "EVA_API_KEY", global = true, hide_env = true)]
    pub api_key: Option<String>,

    /// User login (the password is prompted for unless EVA_PASSWORD is set)
    #[arg(long, short = 'u', env = "EVA_USER", global = true)]
    pub user: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "EVA_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "EVA_INSECURE", global = true)]
    pub insecure: bool,

    /// Poll instead of using the WebSocket push channel
    #[arg(long, global = true)]
    pub no_push: bool,

    /// Request timeout in seconds
    #[arg(long, env = "EVA_TIMEOUT", default_value = "30", global = true)]
    pub timeout: u64,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show current item states
    #[command(alias = "st")]
    State(StateArgs),

    /// Follow item state changes
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Issue a raw API call
    Call(CallArgs),

    /// Show or follow the server log
    Log(LogArgs),

    /// Watch server-side actions
    Action(ActionArgs),

    /// Show server information
    Info,

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  STATES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct StateArgs {
    /// Item OIDs or masks (`*` matches any characters)
    #[arg(default_value = "*")]
    pub items: Vec<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Item OIDs or masks (`*` matches any characters)
    #[arg(required = true)]
    pub items: Vec<String>,

    /// Exit after this many updates
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// Only print changes, not the current states
    #[arg(long)]
    pub changes_only: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CALLS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CallArgs {
    /// Method name (e.g. "item.summary")
    pub method: String,

    /// Parameters as a JSON object, or @file to read them from a file
    pub params: Option<String>,

    /// Address the call to an item (sets the `i` parameter)
    #[arg(long, short = 'i')]
    pub item: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  LOG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct LogArgs {
    /// Minimal level: a number or debug, info, warning, error, critical
    #[arg(long, short = 'l')]
    pub level: Option<String>,

    /// Number of backlog records to fetch
    #[arg(long, short = 'n')]
    pub records: Option<u32>,

    /// Keep following new records
    #[arg(long, short = 'f')]
    pub follow: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  ACTIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ActionArgs {
    #[command(subcommand)]
    pub command: ActionCommand,
}

#[derive(Debug, Subcommand)]
pub enum ActionCommand {
    /// Wait until an action finishes and show its result
    Wait {
        /// Action UUID
        uuid: uuid::Uuid,

        /// Give up after this many seconds
        #[arg(long, default_value = "60")]
        wait: u64,
    },

    /// Print every status change of an action until it finishes
    Watch {
        /// Action UUID
        uuid: uuid::Uuid,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current resolved configuration
    Show,

    /// Set a value on the active profile
    Set {
        /// Profile key (e.g., "server", "auth_mode", "masks")
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store the profile's secret (API key, password or token) in the system keyring
    SetSecret {
        /// Profile name
        #[arg(long)]
        profile: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

//! Clap derive structures for the `captive` CLI.
//!
//! Only depends on clap so `build.rs` can include it for man pages.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// captive -- provision captive-portal routers and gate subscriber access
#[derive(Debug, Parser)]
#[command(
    name = "captive",
    version,
    about = "Provision captive-portal routers and gate subscriber access",
    long_about = "Drives a router's REST command bridge to build a hotspot topology\n\
        (bridge, DHCP, NAT, firewall, walled garden, portal) and to grant or\n\
        revoke internet access for paying subscribers.",
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
    /// Router profile to use
    #[arg(long, short = 'p', env = "CAPTIVE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Router URL (overrides profile)
    #[arg(long, short = 'u', env = "CAPTIVE_URL", global = true)]
    pub url: Option<String>,

    /// API username (overrides profile)
    #[arg(long, env = "CAPTIVE_USERNAME", global = true, hide_env = true)]
    pub username: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "CAPTIVE_OUTPUT",
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

    /// Log format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "CAPTIVE_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, env = "CAPTIVE_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Run against an in-memory router and print the commands that would be sent
    #[arg(long, global = true)]
    pub dry_run: bool,
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

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the hotspot topology on a router (idempotent)
    #[command(alias = "prov")]
    Provision(ProvisionArgs),

    /// Reserve an address for a subscriber in the hotspot pool
    Allocate(OwnerArgs),

    /// Allocate if needed, then grant access (first login after payment)
    Admit(OwnerArgs),

    /// Let a client through the gate
    Grant(ClientArgs),

    /// Remove a client from the gate
    Revoke(ClientArgs),

    /// Revoke every listed subscriber across all configured routers
    Sweep(SweepArgs),

    /// List clients currently holding access
    #[command(alias = "cl")]
    Clients,

    /// Upload the captive-portal pages
    Publish(PublishArgs),

    /// Send an unpaid client to the payment page
    PaymentRedirect(PaymentRedirectArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Provisioning ─────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// Register the router for this building after provisioning
    #[arg(long)]
    pub building: Option<String>,

    /// Router display name when registering (defaults to the profile name)
    #[arg(long, requires = "building")]
    pub name: Option<String>,

    /// Publish the portal pages in this directory afterwards
    #[arg(long, value_name = "DIR")]
    pub portal: Option<PathBuf>,
}

// ── Access ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct OwnerArgs {
    /// Subscriber (owner) id
    pub owner: String,
}

#[derive(Debug, Args)]
pub struct ClientArgs {
    /// Client MAC, leased IPv4 address, or subscriber id
    pub client: String,
}

#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Subscriber ids whose subscription lapsed
    #[arg(required = true)]
    pub users: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Directory holding the portal pages
    pub dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct PaymentRedirectArgs {
    /// Client MAC address
    pub mac: String,

    /// Payment page URL
    pub url: String,
}

// ── Config ───────────────────────────────────────────────────────────

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

    /// Set a profile value
    Set {
        /// Profile key (url, username, password_env, insecure, verify_tls, timeout, ca_cert, building, users)
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

    /// Store a password in the system keyring
    SetPassword {
        /// Profile name
        #[arg(long)]
        profile: Option<String>,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

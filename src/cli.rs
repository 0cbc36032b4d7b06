use clap::{Parser, Subcommand};
use std::path::PathBuf;

fn get_version() -> &'static str {
    const BASE_VERSION: &str = env!("CARGO_PKG_VERSION");

    if let Some(tag) = option_env!("GAD_GIT_TAG") {
        return tag;
    }

    let commit = option_env!("GAD_GIT_COMMIT").unwrap_or("unknown");
    let branch = option_env!("GAD_GIT_BRANCH").unwrap_or("unknown");

    // Built once at startup
    let version = format!("v{}-{} ({})", BASE_VERSION, commit, branch);
    Box::leak(version.into_boxed_str())
}

#[derive(Parser)]
#[command(name = "git-auto-deploy")]
#[command(about = "Deploys the newest matching GitHub release's assets into a local directory")]
#[command(version = get_version(), propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (use multiple times for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Reduce output to errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy the newest matching release once (the default)
    Run {
        /// Config file (defaults to config/default.json)
        config: Option<PathBuf>,
    },

    /// Check that a GitHub App private key is accepted by the API
    CheckKey {
        /// PEM file with the app's private key
        #[arg(long)]
        key: PathBuf,
        /// Numeric GitHub App id
        #[arg(long)]
        app_id: u64,
        /// API base URL
        #[arg(long, default_value = git_auto_deploy::config::DEFAULT_API_URL)]
        api_url: String,
    },

    /// Show the current version
    Version,
}

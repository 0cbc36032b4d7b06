mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use git_auto_deploy::auth::check_app_key;
use git_auto_deploy::config::{default_config_path, load_config, DEFAULT_TIMEOUT_SECS};
use git_auto_deploy::github::build_http_client;
use git_auto_deploy::report::{reporters_for, Reporter};
use git_auto_deploy::sync::Disposition;
use git_auto_deploy::{run_with_reporter, HookOutcome};
use std::path::PathBuf;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    match cli.command {
        Some(Commands::Version) => {
            println!("git-auto-deploy v{}", env!("CARGO_PKG_VERSION"));
        }

        Some(Commands::CheckKey {
            key,
            app_id,
            api_url,
        }) => {
            let http = build_http_client(Duration::from_secs(DEFAULT_TIMEOUT_SECS))?;
            let app = check_app_key(&http, &api_url, app_id, &key)
                .await
                .with_context(|| format!("key {} was rejected for app {}", key.display(), app_id))?;
            println!(
                "success: {} (id {})",
                app.slug.as_deref().unwrap_or(&app.name),
                app.id
            );
        }

        Some(Commands::Run { config }) => deploy(config).await?,
        None => deploy(None).await?,
    }

    Ok(())
}

async fn deploy(config_path: Option<PathBuf>) -> Result<()> {
    let config_path = config_path.unwrap_or_else(default_config_path);
    let reporter = reporters_for(&config_path);

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            let e = git_auto_deploy::DeployError::from(e);
            reporter.capture(&e);
            return Err(e.into());
        }
    };

    tracing::info!(
        "Deploying {}/{} into {}",
        config.username,
        config.repository,
        config.destination_dir.display()
    );

    let outcome = run_with_reporter(&config, &reporter).await?;

    let downloaded = outcome
        .assets
        .iter()
        .filter(|a| a.disposition == Disposition::Downloaded)
        .count();
    tracing::info!(
        "Release '{}': {} asset(s) downloaded, {} unchanged",
        outcome.release.name,
        downloaded,
        outcome.assets.len() - downloaded
    );

    match outcome.hook {
        HookOutcome::Failed(code) => tracing::warn!("Post-deploy command failed (exit code {:?})", code),
        HookOutcome::Succeeded => tracing::info!("Post-deploy command finished"),
        HookOutcome::Skipped => {}
    }

    Ok(())
}

fn setup_logging(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.quiet {
        "error"
    } else if cli.verbose == 0 {
        "info"
    } else if cli.verbose == 1 {
        "debug"
    } else {
        "trace"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

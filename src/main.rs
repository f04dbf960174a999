mod cli;
mod logging;

use std::path::PathBuf;
use std::process;

use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use colored::*;
use dotenv::dotenv;
use ff_automate::classify::{classify, SystemMetadata};
use ff_automate::watcher::resolve_final_name;
use ff_automate::{AppConfig, Automation, StopSignal};
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Cli::parse();
    let _guard = logging::init_logger(args.debug());

    let mut config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    match args.command {
        Some(Commands::Run { polling, .. }) => {
            config.polling |= polling;
            run(config)?;
        }
        Some(Commands::Classify { paths }) => classify_paths(&paths),
        Some(Commands::Resolve { names }) => {
            for name in names {
                println!("{} -> {}", name, resolve_final_name(&name).green());
            }
        }
        Some(Commands::PrintConfig) => {
            print!("{}", config.to_toml()?);
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn run(config: AppConfig) -> anyhow::Result<()> {
    info!(
        "Watching {} (polling: {}), backups to {}",
        config.watch_root.display().to_string().cyan(),
        config.polling,
        config.backup_root.display().to_string().cyan()
    );

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            warn!("Interrupt received, shutting down");
            stop.stop();
        })?;
    }

    let snapshot = Automation::new(config).run(stop)?;
    info!(
        "{} image jobs, {} video jobs, {} archived, {} quarantined",
        format!("{}", snapshot.image_jobs).green(),
        format!("{}", snapshot.video_jobs).green(),
        format!("{}", snapshot.archived).cyan(),
        format!("{}", snapshot.quarantined).red(),
    );
    Ok(())
}

fn classify_paths(paths: &[PathBuf]) {
    let reader = SystemMetadata::default();
    for path in paths {
        let classification = classify(path, &reader);
        let profile = &classification.profile;

        let verdict = if profile.is_faceplay {
            "faceplay".yellow()
        } else if profile.is_dispatchable_image() || profile.is_dispatchable_video() {
            "dispatch".green()
        } else {
            "skip".dimmed()
        };
        println!("{} {}", verdict, path.display());

        match serde_json::to_string_pretty(profile) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Could not render profile for {}: {}", path.display(), e),
        }
        if let Some(reason) = classification.metadata_error {
            println!("  {} {}", "metadata unreadable:".red(), reason);
        }
    }
}

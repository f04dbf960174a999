use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "ff-automate")]
#[command(about = "Watch a media drop folder and queue FaceFusion jobs", long_about = None)]
pub struct Cli {
    /// Config file (defaults to ./Config.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Watch, classify and dispatch until interrupted
    Run {
        /// Also run the polling scanner alongside the event watcher
        #[arg(long)]
        polling: bool,
        /// Log at debug level
        #[arg(long)]
        debug: bool,
    },
    /// Classify files and print their profiles
    Classify {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print the final name for sync-client temporary file names
    Resolve {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Print configuration values
    PrintConfig,
}

impl Cli {
    pub fn debug(&self) -> bool {
        matches!(self.command, Some(Commands::Run { debug: true, .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::parse_from(["ff-automate", "run", "--polling", "--debug"]);
        assert!(cli.debug());
        assert!(matches!(
            cli.command,
            Some(Commands::Run {
                polling: true,
                debug: true
            })
        ));
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["ff-automate", "classify", "a.jpg", "--config", "x.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(!cli.debug());
    }

    #[test]
    fn test_resolve_requires_names() {
        assert!(Cli::try_parse_from(["ff-automate", "resolve"]).is_err());
    }
}

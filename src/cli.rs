//! CLI argument parsing for the dispatch-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dispatch-worker", about = "Delivery route planning worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Plan one request offline and print the plan as JSON
    Plan {
        /// Path to a JSON plan request
        #[arg(long)]
        input: PathBuf,
        /// Re-time the plan against live traffic
        #[arg(long)]
        refine: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["dispatch-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_serve_command_parses() {
        let cli = Cli::parse_from(["dispatch-worker", "serve"]);
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn test_cli_plan_command_parses() {
        let cli = Cli::parse_from(["dispatch-worker", "plan", "--input", "day.json", "--refine"]);
        match cli.command {
            Some(Command::Plan { input, refine }) => {
                assert_eq!(input, PathBuf::from("day.json"));
                assert!(refine);
            }
            _ => panic!("expected plan command"),
        }
    }

    #[test]
    fn test_cli_plan_requires_input() {
        assert!(Cli::try_parse_from(["dispatch-worker", "plan"]).is_err());
    }
}

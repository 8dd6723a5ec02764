//! Operational CLI for the supervisor.

pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "cos",
    about = "Chief-of-Staff supervisor: task orchestration with adaptive scheduling",
    version
)]
pub struct Cli {
    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the supervisor daemon in the foreground
    Run,

    /// Show supervisor status: run flags, counters, agents, recent decisions
    Status,

    /// Queue an on-demand task for the next evaluation
    Trigger {
        /// Task type to run (e.g. security, code-quality)
        task_type: String,

        /// Scope the run to one app
        #[arg(long)]
        app: Option<String>,
    },

    /// Pause evaluation (running agents are unaffected)
    Pause {
        /// Reason shown in status output
        #[arg(long)]
        reason: Option<String>,
    },

    /// Resume evaluation
    Resume,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_trigger_parses_app_flag() {
        let cli = Cli::parse_from(["cos", "trigger", "security", "--app", "portal"]);
        match cli.command {
            Commands::Trigger { task_type, app } => {
                assert_eq!(task_type, "security");
                assert_eq!(app.as_deref(), Some("portal"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

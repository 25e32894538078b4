//! Command-line interface for convoscope
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Real-time conversation analysis server
#[derive(Parser, Debug)]
#[command(
    name = "convoscope",
    version,
    about = "Real-time conversation analysis server"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose logging (-v: debug, -vv: trace). RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Log filter implied by `-v` flags, if any.
    pub fn verbosity_filter(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("convoscope=debug,info"),
            _ => Some("trace"),
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP/WebSocket server
    Serve {
        /// Listen address (overrides server.bind)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage users
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },

    /// Print persisted conversations as JSON
    Reports {
        #[command(subcommand)]
        action: ReportsAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

/// User management actions
#[derive(Subcommand, Debug)]
pub enum UsersAction {
    /// Create a user or rename an existing one
    Add {
        /// External user id (as sent in user_info.user_id)
        user_id: String,
        /// Display name
        name: String,
    },
    /// List users
    List,
}

/// Report actions
#[derive(Subcommand, Debug)]
pub enum ReportsAction {
    /// List conversations of a user, newest first
    List {
        /// External user id
        user_id: String,
    },
    /// Show one conversation with its utterances
    Show {
        /// Conversation master id
        master_id: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["convoscope", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { ref bind } => assert!(bind.is_none()),
            _ => panic!("Expected Serve command"),
        }
        assert!(cli.config.is_none());
        assert_eq!(cli.verbose, 0);
        assert_eq!(cli.verbosity_filter(), None);
    }

    #[test]
    fn test_parse_serve_bind() {
        let cli = Cli::try_parse_from(["convoscope", "serve", "--bind", "127.0.0.1:9000"]).unwrap();
        match cli.command {
            Commands::Serve { bind } => assert_eq!(bind.as_deref(), Some("127.0.0.1:9000")),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["convoscope"]).is_err());
    }

    #[test]
    fn test_parse_global_config_after_subcommand() {
        let cli =
            Cli::try_parse_from(["convoscope", "config", "show", "--config", "/tmp/c.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
    }

    #[test]
    fn test_parse_verbose() {
        let cli = Cli::try_parse_from(["convoscope", "-v", "serve"]).unwrap();
        assert_eq!(cli.verbosity_filter(), Some("convoscope=debug,info"));
        let cli = Cli::try_parse_from(["convoscope", "-vv", "serve"]).unwrap();
        assert_eq!(cli.verbosity_filter(), Some("trace"));
    }

    #[test]
    fn test_parse_users_add() {
        let cli = Cli::try_parse_from(["convoscope", "users", "add", "u1", "Ann Lee"]).unwrap();
        match cli.command {
            Commands::Users {
                action: UsersAction::Add { user_id, name },
            } => {
                assert_eq!(user_id, "u1");
                assert_eq!(name, "Ann Lee");
            }
            _ => panic!("Expected Users Add command"),
        }
    }

    #[test]
    fn test_parse_reports() {
        let cli = Cli::try_parse_from(["convoscope", "reports", "list", "u1"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Reports {
                action: ReportsAction::List { ref user_id }
            } if user_id == "u1"
        ));

        let cli = Cli::try_parse_from(["convoscope", "reports", "show", "42"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Reports {
                action: ReportsAction::Show { master_id: 42 }
            }
        ));
        assert!(Cli::try_parse_from(["convoscope", "reports", "show", "abc"]).is_err());
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["convoscope", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }

    #[test]
    fn test_cli_debug_assert() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

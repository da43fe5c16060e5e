//! # Evalsys CLI Module
//!
//! This module implements the CLI interface for Evalsys.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show session counts
//! - `init` - Initialize new database
//! - `state` - Derive a lifecycle state from dates (no database)
//! - `check` - Look up the modification policy (no database)
//! - `create`, `show`, `update`, `delete`, `assign` - Evaluations
//! - `node-add`, `node-update`, `node-move`, `node-link`, `tree`, `groups`, `grant` - Hierarchy
//! - `jobs`, `tick` - Notification jobs
//! - `export`, `import`, `hash` - Snapshots
//! - `compact` - Compact the redb database

mod commands;

use clap::{Parser, Subcommand};
use evalsys_core::EvalsysError;
use evalsys_core::primitives::PERM_VIEW_NODE_DATA;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Evalsys - teaching evaluation server
///
/// Lifecycle states, field modification policy and hierarchical access
/// control for course evaluations.
#[derive(Parser, Debug)]
#[command(name = "evalsys")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the database
    #[arg(short = 'D', long, global = true, default_value = "evalsys.db")]
    pub database: PathBuf,

    /// Storage backend: "redb" (ACID database) or "file" (snapshot file)
    #[arg(short = 'B', long, global = true, default_value = "redb")]
    pub backend: String,

    /// Path to a TOML configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Lifecycle dates shared by several commands (RFC 3339).
#[derive(clap::Args, Debug, Clone, Default)]
pub struct DateArgs {
    /// Start date
    #[arg(long)]
    pub start: Option<String>,

    /// Due date
    #[arg(long)]
    pub due: Option<String>,

    /// Stop date
    #[arg(long)]
    pub stop: Option<String>,

    /// Results view date
    #[arg(long)]
    pub view: Option<String>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to (overrides the config file)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show session status
    Status,

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,

        /// Hierarchy id for the new database
        #[arg(long, default_value = "default")]
        hierarchy: String,
    },

    /// Derive the lifecycle state from dates
    State {
        #[command(flatten)]
        dates: DateArgs,

        /// Instant to evaluate at (default: now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Check whether a field may be modified in a state
    Check {
        /// State name (e.g. Active, Due, GracePeriod)
        #[arg(short, long)]
        state: String,

        /// Field name (e.g. title, dueDate)
        #[arg(short, long)]
        field: String,
    },

    /// Create an evaluation
    Create {
        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        owner: String,

        #[command(flatten)]
        dates: DateArgs,

        /// Reminder interval in days (0 disables reminders)
        #[arg(long, default_value = "0")]
        reminder_days: u32,

        /// Keep results private
        #[arg(long)]
        private: bool,
    },

    /// Show an evaluation and its current state
    Show {
        id: u64,
    },

    /// Update evaluation fields
    Update {
        id: u64,

        #[arg(short, long)]
        title: Option<String>,

        #[command(flatten)]
        dates: DateArgs,

        #[arg(long)]
        reminder_days: Option<u32>,
    },

    /// Delete an evaluation that has not started
    Delete {
        id: u64,
    },

    /// Assign an evaluation to nodes (comma-separated ids)
    Assign {
        id: u64,

        #[arg(short, long)]
        nodes: String,
    },

    /// Add a hierarchy node (without --parent the node becomes the root)
    NodeAdd {
        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        parent: Option<u64>,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Permission token checked at this node
        #[arg(long)]
        token: Option<String>,
    },

    /// Replace a node's title, description and permission token
    NodeUpdate {
        node: u64,

        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        #[arg(long)]
        token: Option<String>,
    },

    /// Move a node under a new parent, dropping its other parents
    NodeMove {
        node: u64,

        #[arg(short, long)]
        parent: u64,
    },

    /// Link a node under an additional parent (or unlink with --remove)
    NodeLink {
        node: u64,

        #[arg(short, long)]
        parent: u64,

        #[arg(long)]
        remove: bool,
    },

    /// Print the hierarchy
    Tree,

    /// List groups under a node, optionally attaching new ones first
    Groups {
        node: u64,

        /// Group ids to attach (comma-separated)
        #[arg(short, long)]
        attach: Option<String>,

        /// Only groups attached directly at the node
        #[arg(long)]
        direct: bool,
    },

    /// Grant (or revoke) a permission at a node
    Grant {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        node: u64,

        /// Permission token (assign_evaluation, view_node_data, control_node,
        /// control_templates, or any custom token)
        #[arg(short, long, default_value = PERM_VIEW_NODE_DATA)]
        permission: String,

        #[arg(long)]
        revoke: bool,
    },

    /// List pending notification jobs
    Jobs,

    /// Drain notification jobs due now
    Tick,

    /// Export the session snapshot
    Export {
        #[arg(short, long)]
        output: PathBuf,

        /// Export format (snapshot, json)
        #[arg(short = 't', long, default_value = "snapshot")]
        format: String,
    },

    /// Import a session snapshot
    Import {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compute BLAKE3 hash of the session snapshot
    Hash,

    /// Compact the redb database file
    Compact,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), EvalsysError> {
    let db = Database::new(cli.database.clone(), &cli.backend)?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port }) => {
            cmd_server(&db, cli.config.as_deref(), host, port).await
        }
        Some(Commands::Status) | None => cmd_status(&db, json_mode),
        Some(Commands::Init { force, hierarchy }) => cmd_init(&db, force, &hierarchy),
        Some(Commands::State { dates, at }) => cmd_state(&dates, at.as_deref(), json_mode),
        Some(Commands::Check { state, field }) => cmd_check(&state, &field, json_mode),
        Some(Commands::Create {
            title,
            owner,
            dates,
            reminder_days,
            private,
        }) => cmd_create(&db, json_mode, &title, &owner, &dates, reminder_days, private),
        Some(Commands::Show { id }) => cmd_show(&db, json_mode, id),
        Some(Commands::Update {
            id,
            title,
            dates,
            reminder_days,
        }) => cmd_update(&db, json_mode, id, title, &dates, reminder_days),
        Some(Commands::Delete { id }) => cmd_delete(&db, id),
        Some(Commands::Assign { id, nodes }) => cmd_assign(&db, json_mode, id, &nodes),
        Some(Commands::NodeAdd {
            title,
            parent,
            description,
            token,
        }) => cmd_node_add(&db, &title, parent, &description, token),
        Some(Commands::NodeUpdate {
            node,
            title,
            description,
            token,
        }) => cmd_node_update(&db, node, &title, &description, token),
        Some(Commands::NodeMove { node, parent }) => cmd_node_move(&db, node, parent),
        Some(Commands::NodeLink {
            node,
            parent,
            remove,
        }) => cmd_node_link(&db, node, parent, remove),
        Some(Commands::Tree) => cmd_tree(&db, json_mode),
        Some(Commands::Groups {
            node,
            attach,
            direct,
        }) => cmd_groups(&db, json_mode, node, attach.as_deref(), direct),
        Some(Commands::Grant {
            user,
            node,
            permission,
            revoke,
        }) => cmd_grant(&db, &user, node, &permission, revoke),
        Some(Commands::Jobs) => cmd_jobs(&db, json_mode),
        Some(Commands::Tick) => cmd_tick(&db, json_mode),
        Some(Commands::Export { output, format }) => cmd_export(&db, &output, &format),
        Some(Commands::Import { input }) => cmd_import(&db, &input),
        Some(Commands::Hash) => cmd_hash(&db, json_mode),
        Some(Commands::Compact) => cmd_compact(&db),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_state_command() {
        let cli = Cli::try_parse_from([
            "evalsys",
            "state",
            "--start",
            "2026-01-12T08:00:00Z",
            "--at",
            "2026-01-13T08:00:00Z",
        ])
        .expect("parse");
        match cli.command {
            Some(Commands::State { dates, at }) => {
                assert_eq!(dates.start.as_deref(), Some("2026-01-12T08:00:00Z"));
                assert!(dates.due.is_none());
                assert_eq!(at.as_deref(), Some("2026-01-13T08:00:00Z"));
            }
            other => unreachable!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn grant_defaults_to_view_permission() {
        let cli = Cli::try_parse_from(["evalsys", "grant", "-u", "dean", "-n", "1"])
            .expect("parse");
        match cli.command {
            Some(Commands::Grant { permission, .. }) => {
                assert_eq!(permission, PERM_VIEW_NODE_DATA);
            }
            other => unreachable!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_node_move() {
        let cli = Cli::try_parse_from(["evalsys", "node-move", "4", "--parent", "2"])
            .expect("parse");
        assert!(matches!(cli.command, Some(Commands::NodeMove { node: 4, parent: 2 })));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["evalsys", "status", "-D", "x.db", "--json-mode"])
            .expect("parse");
        assert_eq!(cli.database, PathBuf::from("x.db"));
        assert!(cli.json_mode);
    }
}

//! # Refpress CLI (`refpress`)
//!
//! Commands for initializing the index, rebuilding it from the git object
//! store, and querying published content.
//!
//! ## Usage
//!
//! ```bash
//! refpress --config ./refpress.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `refpress init` | Create the SQLite index and run schema migrations |
//! | `refpress rebuild` | Rebuild the whole index from the configured ref |
//! | `refpress list` | List pages, newest first, with optional date range |
//! | `refpress page <date> <slug>` | Show one page, optionally at a revision |
//! | `refpress history <date> <slug>` | Show a page's revision history |
//! | `refpress attachment <id>` | Show (or save) an attachment |
//! | `refpress search "<query>"` | Full-text title search |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use refpress::{commands, config};

/// Refpress publishes pages, revisions and attachments from a git object
/// store through a queryable full-text index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `refpress.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "refpress",
    about = "Publishes version-controlled content from a git object store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./refpress.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the index database.
    ///
    /// Creates the SQLite file and all required tables. Idempotent.
    Init,

    /// Rebuild the index from the configured ref.
    ///
    /// Deletes and rewrites every record in one transaction. Readers keep
    /// the previous generation until the rebuild commits.
    Rebuild,

    /// List pages in reverse chronological order.
    List {
        /// 1-based result page number.
        #[arg(long, default_value_t = 1)]
        page: i64,

        /// Results per page.
        #[arg(long, default_value_t = 20)]
        page_length: i64,

        /// Only pages published on or after this date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// Only pages published before this date (YYYY-MM-DD, exclusive).
        #[arg(long)]
        end: Option<String>,
    },

    /// Show one page: metadata plus body.
    Page {
        /// Publication date (YYYY-MM-DD, in the configured timezone).
        date: String,

        /// Page slug.
        slug: String,

        /// Show the page as of this revision (revision id, as printed by
        /// `history`).
        #[arg(long)]
        revision: Option<String>,

        /// Render the body to HTML instead of printing the raw markup.
        #[arg(long)]
        html: bool,
    },

    /// Show a page's revision history, newest commit first.
    History {
        /// Publication date (YYYY-MM-DD, in the configured timezone).
        date: String,

        /// Page slug.
        slug: String,

        /// 1-based result page number.
        #[arg(long, default_value_t = 1)]
        page: i64,

        /// Results per page.
        #[arg(long, default_value_t = 20)]
        page_length: i64,
    },

    /// Show an attachment's metadata by id, optionally saving its bytes.
    Attachment {
        /// Attachment id (its subtree hash, as printed by other commands).
        id: String,

        /// Write the attachment data to this file.
        #[arg(long)]
        save: Option<String>,
    },

    /// Full-text search over page titles.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("refpress=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Rebuild => {
            commands::run_rebuild(&cfg).await?;
        }
        Commands::List {
            page,
            page_length,
            start,
            end,
        } => {
            commands::run_list(&cfg, page, page_length, start.as_deref(), end.as_deref()).await?;
        }
        Commands::Page {
            date,
            slug,
            revision,
            html,
        } => {
            commands::run_page(&cfg, &date, &slug, revision.as_deref(), html).await?;
        }
        Commands::History {
            date,
            slug,
            page,
            page_length,
        } => {
            commands::run_history(&cfg, &date, &slug, page, page_length).await?;
        }
        Commands::Attachment { id, save } => {
            commands::run_attachment(&cfg, &id, save.as_deref()).await?;
        }
        Commands::Search { query, limit } => {
            commands::run_search(&cfg, &query, limit).await?;
        }
    }

    Ok(())
}

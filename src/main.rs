//! # Lumo.AI CLI (`lumo`)
//!
//! The `lumo` binary runs the Lumo.AI assistant backend: one-shot chat turns,
//! file analysis, conversation history, themes, response downloads, and the
//! HTTP API used by the web client.
//!
//! ## Usage
//!
//! ```bash
//! lumo --config ./config/lumo.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lumo init` | Create the SQLite database and run schema migrations |
//! | `lumo chat <message>` | Send one message and print the reply |
//! | `lumo analyze <path>` | Process a file and print the prompt it produces |
//! | `lumo personas` | List available personas |
//! | `lumo history list\|search\|show\|delete\|export` | Manage saved conversations |
//! | `lumo theme list\|show\|set\|toggle\|init\|css` | Manage the UI theme |
//! | `lumo download <input> --format <fmt>` | Render a response as pdf, docx, xlsx, txt or md |
//! | `lumo serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Ask the coding persona about an attached file and keep the exchange
//! lumo chat "What does this script do?" --persona code-master --file ./build.sh --save
//!
//! # Continue a saved conversation
//! lumo chat "And how do I test it?" --conversation 6f1c...
//!
//! # Export a conversation as Markdown
//! lumo history export 6f1c... --format md --output chat.md
//!
//! # Turn a saved answer into a spreadsheet
//! lumo download answer.md --format xlsx
//! ```
//!
//! Set `RUST_LOG=lumo=debug` for diagnostic output on stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lumo::commands::{self, ChatOptions};
use lumo::config;
use lumo::download::DownloadFormat;
use lumo::export::ExportFormat;
use lumo::migrate;
use lumo::server;

/// Lumo.AI - a persona-driven AI chat assistant with file analysis.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lumo.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lumo",
    about = "Lumo.AI - a persona-driven AI chat assistant with file analysis",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lumo.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the conversation, settings and
    /// contact tables. Safe to run repeatedly.
    Init,

    /// Send one message and print the assistant's reply.
    Chat {
        /// The message. Multiple words are joined with spaces.
        #[arg(required = true)]
        message: Vec<String>,

        /// Persona id. Defaults to the saved preference.
        #[arg(long)]
        persona: Option<String>,

        /// Attach a file (repeatable).
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// Continue a saved conversation and append this turn to it.
        #[arg(long)]
        conversation: Option<String>,

        /// Save this turn as a new conversation.
        #[arg(long)]
        save: bool,

        /// Title for `--save`. Generated from the first message otherwise.
        #[arg(long, requires = "save")]
        title: Option<String>,
    },

    /// Process a file the way an upload is processed and print the
    /// resulting chat prompt.
    Analyze {
        path: PathBuf,
    },

    /// List available personas.
    Personas,

    /// Manage saved conversations.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Manage the UI theme.
    Theme {
        #[command(subcommand)]
        action: ThemeAction,
    },

    /// Render a response as a downloadable document.
    ///
    /// Without `--format`, prints the formats suggested for the content.
    Download {
        /// File containing the response, or `-` for stdin.
        input: String,

        /// One of `pdf`, `docx`, `xlsx`, `txt`, `md`.
        #[arg(long)]
        format: Option<DownloadFormat>,

        /// Output path. Defaults to `lumo-ai-response.<ext>`.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Start the HTTP API.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List conversations, most recent first.
    List,
    /// Search titles, tags and message text.
    Search { query: String },
    /// Print a conversation.
    Show { id: String },
    /// Delete a conversation.
    Delete { id: String },
    /// Export a conversation.
    Export {
        id: String,
        /// `json`, `txt` or `md`.
        #[arg(long, default_value = "txt")]
        format: ExportFormat,
        /// Write to a file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ThemeAction {
    /// List themes. The current theme is marked with `*`.
    List {
        #[arg(long, conflicts_with = "light")]
        dark: bool,
        #[arg(long)]
        light: bool,
    },
    /// Show the current theme.
    Show,
    /// Select a theme by id.
    Set { id: String },
    /// Switch between Lumo Light and Lumo Dark.
    Toggle,
    /// Choose the first-run theme unless one is already saved.
    Init {
        #[arg(long)]
        prefer_dark: bool,
    },
    /// Print CSS variables for the current theme, or for `id`.
    Css { id: Option<String> },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lumo=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Rendering a response needs no configuration
    if let Commands::Download {
        input,
        format,
        output,
    } = &cli.command
    {
        commands::run_download(input, *format, output.as_deref())?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Chat {
            message,
            persona,
            files,
            conversation,
            save,
            title,
        } => {
            let opts = ChatOptions {
                persona,
                files,
                conversation,
                save,
                title,
            };
            commands::run_chat(&cfg, &message.join(" "), opts).await?;
        }
        Commands::Analyze { path } => {
            commands::run_analyze(&cfg, &path).await?;
        }
        Commands::Personas => {
            commands::list_personas(&cfg)?;
        }
        Commands::History { action } => match action {
            HistoryAction::List => commands::run_history_list(&cfg).await?,
            HistoryAction::Search { query } => commands::run_history_search(&cfg, &query).await?,
            HistoryAction::Show { id } => commands::run_history_show(&cfg, &id).await?,
            HistoryAction::Delete { id } => commands::run_history_delete(&cfg, &id).await?,
            HistoryAction::Export { id, format, output } => {
                commands::run_history_export(&cfg, &id, format, output.as_deref()).await?
            }
        },
        Commands::Theme { action } => match action {
            ThemeAction::List { dark, light } => {
                let filter = match (dark, light) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                };
                commands::run_theme_list(&cfg, filter).await?
            }
            ThemeAction::Show => commands::run_theme_show(&cfg).await?,
            ThemeAction::Set { id } => commands::run_theme_set(&cfg, &id).await?,
            ThemeAction::Toggle => commands::run_theme_toggle(&cfg).await?,
            ThemeAction::Init { prefer_dark } => {
                commands::run_theme_init(&cfg, prefer_dark).await?
            }
            ThemeAction::Css { id } => commands::run_theme_css(&cfg, id.as_deref()).await?,
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Download { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

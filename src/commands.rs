//! CLI entry points behind the `lumo` subcommands.
//!
//! Each `run_*` function opens what it needs from the configuration, does
//! one thing, and prints to stdout. Errors propagate to `main`.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::chat;
use crate::config::Config;
use crate::conversations::ConversationStore;
use crate::download::{self, DownloadFormat};
use crate::export::{self, ExportFormat};
use crate::files;
use crate::llm::create_provider;
use crate::models::{ChatRequest, ConversationSummary, FileContext, Message};
use crate::personas::PersonaRegistry;
use crate::preferences;
use crate::theme::{self, ThemeService};

/// Options for `lumo chat`.
#[derive(Debug, Default)]
pub struct ChatOptions {
    pub persona: Option<String>,
    pub files: Vec<PathBuf>,
    pub conversation: Option<String>,
    pub save: bool,
    pub title: Option<String>,
}

pub async fn run_chat(config: &Config, message: &str, opts: ChatOptions) -> Result<()> {
    let provider = create_provider(&config.llm)?;
    let store = ConversationStore::open(config).await?;
    let personas = PersonaRegistry::from_config(config);

    let persona_id = match opts.persona {
        Some(p) => p,
        None => preferences::load(store.pool()).await?.persona_id,
    };

    let mut file_context: Vec<FileContext> = Vec::new();
    for path in &opts.files {
        let result =
            files::process_path(path, &config.uploads, provider.as_ref(), &config.vision)
                .await
                .with_context(|| format!("failed to process {}", path.display()))?;
        file_context.push(result.into_context());
    }

    let history = match opts.conversation.as_deref() {
        Some(id) => {
            store
                .get(id)
                .await?
                .with_context(|| format!("conversation not found: {}", id))?
                .messages
        }
        None => Vec::new(),
    };

    let request = ChatRequest {
        message: message.to_string(),
        history: history.clone(),
        file_context: file_context.clone(),
        persona_id: Some(persona_id),
    };
    let outcome = chat::respond(provider.as_ref(), &personas, config, &request).await;
    if !outcome.is_success() {
        if !outcome.body.response.is_empty() {
            println!("{}", outcome.body.response);
        }
        bail!(
            "{}",
            outcome
                .body
                .error
                .unwrap_or_else(|| format!("chat failed with status {}", outcome.status))
        );
    }
    println!("{}", outcome.body.response);

    let mut user = Message::user(message);
    user.file_context = file_context.into_iter().next();
    let turn = [user, Message::assistant(outcome.body.response)];

    if let Some(id) = opts.conversation.as_deref() {
        let mut messages = history;
        messages.extend(turn.iter().cloned());
        store.update(id, &messages).await?;
        eprintln!("Updated conversation {}", id);
    }
    if opts.save {
        let id = store.save(&turn, opts.title.as_deref()).await?;
        eprintln!("Saved conversation {}", id);
    }
    Ok(())
}

/// Processes a local file and prints the prompt that introduces it to chat.
pub async fn run_analyze(config: &Config, path: &Path) -> Result<()> {
    let provider = create_provider(&config.llm)?;
    let result =
        files::process_path(path, &config.uploads, provider.as_ref(), &config.vision).await?;
    println!("{}", files::format_for_chat(&result));
    Ok(())
}

pub fn list_personas(config: &Config) -> Result<()> {
    let registry = PersonaRegistry::from_config(config);
    println!("{:<12} {:<24} {:<8} DESCRIPTION", "ID", "NAME", "SOURCE");
    for p in registry.personas() {
        println!(
            "{:<12} {:<24} {:<8} {}",
            p.id,
            format!("{} {}", p.icon, p.name),
            p.source,
            p.description
        );
    }
    Ok(())
}

// ============ history ============

fn print_summaries(summaries: &[ConversationSummary]) {
    if summaries.is_empty() {
        println!("No conversations.");
        return;
    }
    println!("{:<36}  {:<16}  {:>4}  TITLE", "ID", "UPDATED", "MSGS");
    for s in summaries {
        println!(
            "{:<36}  {:<16}  {:>4}  {}",
            s.id,
            s.updated_at.format("%Y-%m-%d %H:%M"),
            s.message_count,
            s.title
        );
    }
}

pub async fn run_history_list(config: &Config) -> Result<()> {
    let store = ConversationStore::open(config).await?;
    print_summaries(&store.summaries().await?);
    Ok(())
}

pub async fn run_history_search(config: &Config, query: &str) -> Result<()> {
    let store = ConversationStore::open(config).await?;
    print_summaries(&store.search(query).await?);
    Ok(())
}

pub async fn run_history_show(config: &Config, id: &str) -> Result<()> {
    let store = ConversationStore::open(config).await?;
    let conv = store
        .get(id)
        .await?
        .with_context(|| format!("conversation not found: {}", id))?;
    print!("{}", export::export_conversation(&conv, ExportFormat::Text)?);
    Ok(())
}

pub async fn run_history_delete(config: &Config, id: &str) -> Result<()> {
    let store = ConversationStore::open(config).await?;
    if !store.delete(id).await? {
        bail!("conversation not found: {}", id);
    }
    println!("Deleted conversation {}", id);
    Ok(())
}

pub async fn run_history_export(
    config: &Config,
    id: &str,
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<()> {
    let store = ConversationStore::open(config).await?;
    let conv = store
        .get(id)
        .await?
        .with_context(|| format!("conversation not found: {}", id))?;
    let body = export::export_conversation(&conv, format)?;
    match output {
        Some(path) => {
            std::fs::write(path, body)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Exported to {}", path.display());
        }
        None => print!("{}", body),
    }
    Ok(())
}

// ============ theme ============

async fn theme_service(config: &Config) -> Result<ThemeService> {
    let store = ConversationStore::open(config).await?;
    Ok(ThemeService::new(store.pool().clone()))
}

pub async fn run_theme_list(config: &Config, dark: Option<bool>) -> Result<()> {
    let current = theme_service(config).await?.current().await?;
    let themes: Vec<&theme::Theme> = match dark {
        Some(is_dark) => theme::by_type(is_dark),
        None => theme::all().iter().collect(),
    };
    println!("  {:<14} {:<6} {:<14} DESCRIPTION", "ID", "MODE", "NAME");
    for t in themes {
        println!(
            "{} {:<14} {:<6} {:<14} {}",
            if t.id == current.id { "*" } else { " " },
            t.id,
            if t.is_dark { "dark" } else { "light" },
            t.name,
            t.description
        );
    }
    Ok(())
}

pub async fn run_theme_show(config: &Config) -> Result<()> {
    let t = theme_service(config).await?.current().await?;
    println!("{} ({}) - {}", t.name, t.id, t.description);
    Ok(())
}

pub async fn run_theme_set(config: &Config, id: &str) -> Result<()> {
    let t = theme_service(config).await?.set(id).await?;
    println!("Theme set to {} ({})", t.name, t.id);
    Ok(())
}

/// Picks the first-run theme. A saved selection is kept.
pub async fn run_theme_init(config: &Config, prefer_dark: bool) -> Result<()> {
    let t = theme_service(config).await?.initialize(prefer_dark).await?;
    println!("Theme set to {} ({})", t.name, t.id);
    Ok(())
}

pub async fn run_theme_toggle(config: &Config) -> Result<()> {
    let t = theme_service(config).await?.toggle_dark_mode().await?;
    println!("Theme set to {} ({})", t.name, t.id);
    Ok(())
}

pub async fn run_theme_css(config: &Config, id: Option<&str>) -> Result<()> {
    let t = match id {
        Some(id) => theme::find(id)
            .cloned()
            .with_context(|| format!("theme not found: {}", id))?,
        None => theme_service(config).await?.current().await?,
    };
    print!("{}", theme::css_variables(&t));
    Ok(())
}

// ============ download ============

/// Renders a response read from `input` (`-` for stdin). Without a format,
/// prints the suggested formats instead.
pub fn run_download(
    input: &str,
    format: Option<DownloadFormat>,
    output: Option<&Path>,
) -> Result<()> {
    let content = if input == "-" {
        let mut s = String::new();
        std::io::stdin().read_to_string(&mut s)?;
        s
    } else {
        std::fs::read_to_string(input).with_context(|| format!("failed to read {}", input))?
    };
    if content.trim().is_empty() {
        bail!("nothing to download: input is empty");
    }

    let Some(format) = format else {
        println!("Suggested formats: {}", suggest_formats(&content).join(", "));
        return Ok(());
    };

    let rendered = download::render(&content, format, Utc::now())?;
    let path = match output {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(rendered.filename(download::DEFAULT_FILENAME)),
    };
    std::fs::write(&path, &rendered.bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {} ({} bytes)", path.display(), rendered.bytes.len());
    Ok(())
}

/// Suggested formats for the response, as shown next to the download button.
pub fn suggest_formats(content: &str) -> Vec<&'static str> {
    download::detect_content_type(content)
        .iter()
        .map(DownloadFormat::as_str)
        .collect()
}

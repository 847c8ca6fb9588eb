//! Conversation export in JSON, plain text, or Markdown.
//!
//! Timestamps render in UTC (`YYYY-MM-DD HH:MM:SS UTC` for record dates,
//! `HH:MM:SS` for individual messages).

use anyhow::{bail, Result};
use std::str::FromStr;

use crate::models::Conversation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    Json,
    #[default]
    Text,
    Markdown,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Text => "txt",
            ExportFormat::Markdown => "md",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Text => "text/plain; charset=utf-8",
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "txt" | "text" => Ok(ExportFormat::Text),
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            other => bail!("invalid export format: {} (expected json, txt, or md)", other),
        }
    }
}

pub fn export_conversation(conv: &Conversation, format: ExportFormat) -> Result<String> {
    Ok(match format {
        ExportFormat::Json => serde_json::to_string_pretty(conv)?,
        ExportFormat::Text => format_as_text(conv),
        ExportFormat::Markdown => format_as_markdown(conv),
    })
}

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";
const TIME_FORMAT: &str = "%H:%M:%S";

fn format_as_text(conv: &Conversation) -> String {
    let mut out = format!("Conversation: {}\n", conv.title);
    out.push_str(&format!("Created: {}\n", conv.created_at.format(DATE_FORMAT)));
    out.push_str(&format!("Updated: {}\n", conv.updated_at.format(DATE_FORMAT)));
    out.push_str(&format!("Tags: {}\n\n", conv.tags.join(", ")));
    out.push_str(&"=".repeat(50));
    out.push_str("\n\n");

    for msg in &conv.messages {
        out.push_str(&format!(
            "[{}] {}:\n{}\n\n",
            msg.timestamp.format(TIME_FORMAT),
            msg.role.label(),
            msg.content
        ));
    }
    out
}

fn format_as_markdown(conv: &Conversation) -> String {
    let mut out = format!("# {}\n\n", conv.title);
    out.push_str(&format!(
        "**Created:** {}  \n",
        conv.created_at.format(DATE_FORMAT)
    ));
    out.push_str(&format!(
        "**Updated:** {}  \n",
        conv.updated_at.format(DATE_FORMAT)
    ));
    out.push_str(&format!("**Tags:** {}  \n\n", conv.tags.join(", ")));
    out.push_str("---\n\n");

    for msg in &conv.messages {
        let icon = match msg.role {
            crate::models::Role::User => "👤",
            crate::models::Role::Assistant => "🤖",
        };
        out.push_str(&format!(
            "## {} **{}** *({})*\n\n{}\n\n",
            icon,
            msg.role.label(),
            msg.timestamp.format(TIME_FORMAT),
            msg.content
        ));
    }
    out
}

/// File name for a downloaded export: every character outside `[A-Za-z0-9]`
/// becomes `_`.
pub fn download_filename(title: &str, format: ExportFormat) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}.{}", stem, format.extension())
}

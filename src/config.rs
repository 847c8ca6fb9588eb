//! TOML configuration parsing.
//!
//! Only `[db]` and `[server]` are required. Every other section falls back to
//! the defaults below, so a two-section file is a complete configuration:
//!
//! ```toml
//! [db]
//! path = "./data/lumo.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//!
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [personas.inline.reviewer]
//! name = "Reviewer"
//! icon = "🔎"
//! description = "Terse code review"
//! system_prompt = "You are a strict but fair code reviewer."
//! ```
//!
//! The API key itself never lives in the file: `[llm].api_key_env` names the
//! environment variable it is read from.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub conversations: ConversationsConfig,
    #[serde(default)]
    pub personas: PersonasConfig,
    #[serde(default)]
    pub contact: ContactConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

// ============ [llm] ============

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Number of trailing history messages sent with each turn.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            history_window: default_history_window(),
        }
    }
}

impl LlmConfig {
    /// Reads the API key from the configured environment variable.
    /// Empty values count as unset.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.8
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_history_window() -> usize {
    10
}

// ============ [vision] ============

#[derive(Debug, Deserialize, Clone)]
pub struct VisionConfig {
    /// Vision-capable model. Falls back to `[llm].model` when unset.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_vision_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_vision_max_tokens")]
    pub max_tokens: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_vision_temperature(),
            top_p: default_top_p(),
            max_tokens: default_vision_max_tokens(),
        }
    }
}

fn default_vision_temperature() -> f32 {
    0.4
}
fn default_vision_max_tokens() -> u32 {
    1024
}

// ============ [uploads] ============

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Characters of extracted text carried into the chat prompt per file.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_max_context_chars() -> usize {
    2000
}

// ============ [conversations] ============

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationsConfig {
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
}

impl Default for ConversationsConfig {
    fn default() -> Self {
        Self {
            max_conversations: default_max_conversations(),
        }
    }
}

fn default_max_conversations() -> usize {
    100
}

// ============ [personas] ============

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PersonasConfig {
    #[serde(default)]
    pub inline: BTreeMap<String, InlinePersonaConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InlinePersonaConfig {
    pub name: String,
    #[serde(default = "default_persona_icon")]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
}

fn default_persona_icon() -> String {
    "🤖".to_string()
}

// ============ [contact] ============

#[derive(Debug, Deserialize, Clone)]
pub struct ContactConfig {
    #[serde(default = "default_recipient")]
    pub recipient: String,
    /// Relay endpoint receiving submissions as JSON. Without it every
    /// submission falls back to a `mailto:` link.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_contact_timeout_secs")]
    pub timeout_secs: u64,
    /// Mail server tried before the webhook.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            recipient: default_recipient(),
            webhook_url: None,
            timeout_secs: default_contact_timeout_secs(),
            smtp: None,
        }
    }
}

impl ContactConfig {
    /// `CONTACT_EMAIL` overrides the configured recipient.
    pub fn recipient_address(&self) -> String {
        resolve_recipient(&self.recipient, std::env::var("CONTACT_EMAIL").ok())
    }
}

fn resolve_recipient(configured: &str, from_env: Option<String>) -> String {
    from_env
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| configured.to_string())
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// `starttls`, `tls` (implicit TLS) or `none`.
    #[serde(default = "default_smtp_tls")]
    pub tls: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Environment variable holding the SMTP password.
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_smtp_from")]
    pub from: String,
}

fn default_smtp_port() -> u16 {
    587
}
fn default_smtp_tls() -> String {
    "starttls".to_string()
}
fn default_smtp_from() -> String {
    "Lumo.AI Contact Form <noreply@lumo.ai>".to_string()
}

fn default_recipient() -> String {
    "support@lumo.ai".to_string()
}
fn default_contact_timeout_secs() -> u64 {
    15
}

impl Config {
    /// A configuration with every default and the given database path.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            server: ServerConfig {
                bind: "127.0.0.1:7340".to_string(),
            },
            llm: LlmConfig::default(),
            vision: VisionConfig::default(),
            uploads: UploadsConfig::default(),
            conversations: ConversationsConfig::default(),
            personas: PersonasConfig::default(),
            contact: ContactConfig::default(),
        }
    }

    /// Checks ranges and enumerations that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.llm.history_window == 0 {
            anyhow::bail!("llm.history_window must be >= 1");
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
        }
        if !(0.0..=2.0).contains(&self.vision.temperature) {
            anyhow::bail!("vision.temperature must be in [0.0, 2.0]");
        }

        if self.llm.top_p <= 0.0 || self.llm.top_p > 1.0 {
            anyhow::bail!("llm.top_p must be in (0.0, 1.0]");
        }

        if self.llm.max_tokens == 0 || self.vision.max_tokens == 0 {
            anyhow::bail!("max_tokens must be > 0");
        }

        if self.uploads.max_file_bytes == 0 {
            anyhow::bail!("uploads.max_file_bytes must be > 0");
        }

        if self.conversations.max_conversations == 0 {
            anyhow::bail!("conversations.max_conversations must be >= 1");
        }

        match self.llm.provider.as_str() {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown llm provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        for (id, persona) in &self.personas.inline {
            if persona.system_prompt.trim().is_empty() {
                anyhow::bail!("personas.inline.{}.system_prompt must not be empty", id);
            }
        }

        if let Some(smtp) = &self.contact.smtp {
            if smtp.host.trim().is_empty() {
                anyhow::bail!("contact.smtp.host must not be empty");
            }
            match smtp.tls.as_str() {
                "starttls" | "tls" | "none" => {}
                other => anyhow::bail!(
                    "Unknown contact.smtp.tls mode: '{}'. Must be starttls, tls or none.",
                    other
                ),
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let content = format!(
            "[db]\npath = \"/tmp/lumo.sqlite\"\n\n[server]\nbind = \"127.0.0.1:7340\"\n{}",
            extra
        );
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let config = parse("").unwrap();
        assert_eq!(config.llm.history_window, 10);
        assert_eq!(config.llm.max_tokens, 2048);
        assert!((config.llm.temperature - 0.7).abs() < f32::EPSILON);
        assert!((config.vision.temperature - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.vision.max_tokens, 1024);
        assert_eq!(config.uploads.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(config.uploads.max_context_chars, 2000);
        assert_eq!(config.conversations.max_conversations, 100);
        assert!(config.contact.webhook_url.is_none());
    }

    #[test]
    fn inline_personas_parse() {
        let config = parse(
            r#"
[personas.inline.reviewer]
name = "Reviewer"
system_prompt = "Review code."
"#,
        )
        .unwrap();
        let p = &config.personas.inline["reviewer"];
        assert_eq!(p.name, "Reviewer");
        assert_eq!(p.icon, "🤖");
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = parse("[llm]\nprovider = \"gemini\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn rejects_zero_history_window() {
        assert!(parse("[llm]\nhistory_window = 0\n").is_err());
    }

    #[test]
    fn rejects_out_of_range_top_p() {
        assert!(parse("[llm]\ntop_p = 0.0\n").is_err());
        assert!(parse("[llm]\ntop_p = 1.5\n").is_err());
    }

    #[test]
    fn rejects_zero_conversation_cap() {
        assert!(parse("[conversations]\nmax_conversations = 0\n").is_err());
    }

    #[test]
    fn smtp_section_parses_with_defaults() {
        let config = parse(
            r#"
[contact.smtp]
host = "smtp.example.com"
username = "mailer"
password_env = "LUMO_SMTP_PASSWORD"
"#,
        )
        .unwrap();
        let smtp = config.contact.smtp.unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.tls, "starttls");
        assert_eq!(smtp.from, "Lumo.AI Contact Form <noreply@lumo.ai>");
        assert_eq!(smtp.username.as_deref(), Some("mailer"));
    }

    #[test]
    fn rejects_unknown_smtp_tls_mode() {
        let err = parse("[contact.smtp]\nhost = \"mx\"\ntls = \"ssl3\"\n").unwrap_err();
        assert!(err.to_string().contains("contact.smtp.tls"));
        assert!(parse("[contact.smtp]\nhost = \" \"\n").is_err());
    }

    #[test]
    fn contact_email_overrides_recipient() {
        assert_eq!(resolve_recipient("support@lumo.ai", None), "support@lumo.ai");
        assert_eq!(
            resolve_recipient("support@lumo.ai", Some(" ops@lumo.test ".into())),
            "ops@lumo.test"
        );
        assert_eq!(resolve_recipient("support@lumo.ai", Some(String::new())), "support@lumo.ai");
    }

    #[test]
    fn minimal_config_validates() {
        Config::minimal("/tmp/x.sqlite").validate().unwrap();
    }
}

//! Theme catalog, persisted theme selection, and CSS variable rendering.
//!
//! Colours are HSL triples in the `"H S% L%"` form expected by
//! `hsl(var(--primary))` style stylesheets.

use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::preferences::{get_setting, set_setting, THEME_KEY};

pub const DEFAULT_LIGHT: &str = "lumo-light";
pub const DEFAULT_DARK: &str = "lumo-dark";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeColors {
    pub primary: String,
    pub secondary: String,
    pub accent: String,
    pub background: String,
    pub foreground: String,
    pub muted: String,
    pub border: String,
    pub chat_user_bg: String,
    pub chat_ai_bg: String,
}

impl ThemeColors {
    fn from_tokens(t: [&str; 9]) -> Self {
        Self {
            primary: t[0].into(),
            secondary: t[1].into(),
            accent: t[2].into(),
            background: t[3].into(),
            foreground: t[4].into(),
            muted: t[5].into(),
            border: t[6].into(),
            chat_user_bg: t[7].into(),
            chat_ai_bg: t[8].into(),
        }
    }

    /// CSS custom property name paired with each token.
    fn variables(&self) -> [(&'static str, &str); 9] {
        [
            ("--primary", self.primary.as_str()),
            ("--secondary", self.secondary.as_str()),
            ("--accent", self.accent.as_str()),
            ("--background", self.background.as_str()),
            ("--foreground", self.foreground.as_str()),
            ("--muted", self.muted.as_str()),
            ("--border", self.border.as_str()),
            ("--chat-user-bg", self.chat_user_bg.as_str()),
            ("--chat-ai-bg", self.chat_ai_bg.as_str()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub id: String,
    pub name: String,
    pub description: String,
    pub colors: ThemeColors,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradient: Option<String>,
    pub is_dark: bool,
}

fn gradient(from: &str, to: &str) -> Option<String> {
    Some(format!(
        "linear-gradient(135deg, hsl({}), hsl({}))",
        from, to
    ))
}

fn theme(
    id: &str,
    name: &str,
    description: &str,
    colors: [&str; 9],
    gradient: Option<String>,
    is_dark: bool,
) -> Theme {
    Theme {
        id: id.into(),
        name: name.into(),
        description: description.into(),
        colors: ThemeColors::from_tokens(colors),
        gradient,
        is_dark,
    }
}

static CATALOG: Lazy<Vec<Theme>> = Lazy::new(|| {
    vec![
        theme(
            "lumo-light",
            "Lumo Light",
            "The classic Lumo.AI light theme",
            [
                "220 100% 60%", "240 100% 95%", "280 100% 70%", "0 0% 100%", "240 10% 4%",
                "240 5% 96%", "240 6% 90%", "220 100% 60%", "240 5% 96%",
            ],
            None,
            false,
        ),
        theme(
            "lumo-dark",
            "Lumo Dark",
            "The sleek Lumo.AI dark theme",
            [
                "220 100% 60%", "240 20% 15%", "280 100% 70%", "240 20% 6%", "240 5% 90%",
                "240 20% 10%", "240 20% 15%", "220 100% 60%", "240 20% 12%",
            ],
            None,
            true,
        ),
        theme(
            "ocean-breeze",
            "Ocean Breeze",
            "Calming blue and teal tones",
            [
                "200 100% 50%", "180 100% 95%", "160 100% 60%", "0 0% 100%", "200 20% 10%",
                "180 20% 96%", "180 20% 90%", "200 100% 50%", "180 20% 96%",
            ],
            gradient("200 100% 50%", "160 100% 60%"),
            false,
        ),
        theme(
            "sunset-glow",
            "Sunset Glow",
            "Warm orange and pink gradients",
            [
                "20 100% 60%", "40 100% 95%", "340 100% 70%", "0 0% 100%", "20 20% 10%",
                "40 20% 96%", "40 20% 90%", "20 100% 60%", "40 20% 96%",
            ],
            gradient("20 100% 60%", "340 100% 70%"),
            false,
        ),
        theme(
            "forest-night",
            "Forest Night",
            "Deep greens with dark ambiance",
            [
                "120 60% 50%", "120 20% 15%", "80 80% 60%", "120 30% 8%", "120 10% 90%",
                "120 20% 12%", "120 20% 18%", "120 60% 50%", "120 20% 12%",
            ],
            gradient("120 60% 50%", "80 80% 60%"),
            true,
        ),
        theme(
            "royal-purple",
            "Royal Purple",
            "Elegant purple and gold accents",
            [
                "270 80% 60%", "280 100% 95%", "45 100% 70%", "0 0% 100%", "270 20% 10%",
                "280 20% 96%", "280 20% 90%", "270 80% 60%", "280 20% 96%",
            ],
            gradient("270 80% 60%", "45 100% 70%"),
            false,
        ),
        theme(
            "cyberpunk",
            "Cyberpunk",
            "Neon colors with dark futuristic feel",
            [
                "300 100% 70%", "180 100% 15%", "60 100% 70%", "240 30% 5%", "300 20% 90%",
                "240 20% 10%", "300 30% 20%", "300 100% 70%", "240 20% 10%",
            ],
            gradient("300 100% 70%", "60 100% 70%"),
            true,
        ),
        theme(
            "minimal-gray",
            "Minimal Gray",
            "Clean and minimal grayscale design",
            [
                "0 0% 20%", "0 0% 95%", "0 0% 40%", "0 0% 100%", "0 0% 10%", "0 0% 96%",
                "0 0% 90%", "0 0% 20%", "0 0% 96%",
            ],
            None,
            false,
        ),
    ]
});

pub fn all() -> &'static [Theme] {
    &CATALOG
}

pub fn find(id: &str) -> Option<&'static Theme> {
    CATALOG.iter().find(|t| t.id == id)
}

pub fn by_type(is_dark: bool) -> Vec<&'static Theme> {
    CATALOG.iter().filter(|t| t.is_dark == is_dark).collect()
}

fn default_theme() -> Theme {
    find(DEFAULT_LIGHT)
        .cloned()
        .unwrap_or_else(|| CATALOG[0].clone())
}

/// Renders the theme as a `:root` block of CSS custom properties.
pub fn css_variables(theme: &Theme) -> String {
    let c = &theme.colors;
    let mut vars: Vec<(&str, &str)> = c.variables().to_vec();
    vars.extend([
        (
            "--primary-foreground",
            if c.primary.contains("100%") { "0 0% 100%" } else { "0 0% 0%" },
        ),
        (
            "--secondary-foreground",
            if c.secondary.contains("95%") { "240 100% 20%" } else { "240 5% 85%" },
        ),
        ("--accent-foreground", "0 0% 100%"),
        (
            "--muted-foreground",
            if theme.is_dark { "240 5% 65%" } else { "240 4% 46%" },
        ),
        ("--card", c.background.as_str()),
        ("--card-foreground", c.foreground.as_str()),
        ("--input", c.muted.as_str()),
        ("--ring", c.primary.as_str()),
        ("--chat-user-text", "0 0% 100%"),
        ("--chat-ai-text", c.foreground.as_str()),
        ("--chat-input-bg", c.background.as_str()),
        ("--chat-input-border", c.border.as_str()),
    ]);
    if let Some(g) = &theme.gradient {
        vars.push(("--theme-gradient", g.as_str()));
    }

    let mut css = String::from(":root {\n");
    for (name, value) in vars {
        css.push_str(&format!("  {}: {};\n", name, value));
    }
    css.push_str(&format!(
        "  color-scheme: {};\n}}\n",
        if theme.is_dark { "dark" } else { "light" }
    ));
    css
}

/// Per-token overrides for [`create_custom_theme`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeOverrides {
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub accent: Option<String>,
    pub background: Option<String>,
    pub foreground: Option<String>,
    pub muted: Option<String>,
    pub border: Option<String>,
    pub chat_user_bg: Option<String>,
    pub chat_ai_bg: Option<String>,
}

/// Builds an unsaved theme from `base` with `overrides` applied. The gradient
/// is not inherited.
pub fn create_custom_theme(name: &str, base: &Theme, overrides: ThemeOverrides) -> Theme {
    let b = &base.colors;
    let pick = |o: Option<String>, base: &String| o.unwrap_or_else(|| base.clone());
    Theme {
        id: format!("custom-{}", Utc::now().timestamp_millis()),
        name: name.to_string(),
        description: format!("Custom theme based on {}", base.name),
        colors: ThemeColors {
            primary: pick(overrides.primary, &b.primary),
            secondary: pick(overrides.secondary, &b.secondary),
            accent: pick(overrides.accent, &b.accent),
            background: pick(overrides.background, &b.background),
            foreground: pick(overrides.foreground, &b.foreground),
            muted: pick(overrides.muted, &b.muted),
            border: pick(overrides.border, &b.border),
            chat_user_bg: pick(overrides.chat_user_bg, &b.chat_user_bg),
            chat_ai_bg: pick(overrides.chat_ai_bg, &b.chat_ai_bg),
        },
        gradient: None,
        is_dark: base.is_dark,
    }
}

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("theme not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// The selected theme, stored under the `theme` settings key.
#[derive(Clone)]
pub struct ThemeService {
    pool: SqlitePool,
}

impl ThemeService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn saved(&self) -> Result<Option<Theme>, ThemeError> {
        let id = get_setting(&self.pool, THEME_KEY).await?;
        Ok(id.as_deref().and_then(find).cloned())
    }

    /// The saved theme. Unknown or missing ids yield `lumo-light`.
    pub async fn current(&self) -> Result<Theme, ThemeError> {
        Ok(self.saved().await?.unwrap_or_else(default_theme))
    }

    /// Resolves the startup theme and persists it.
    pub async fn initialize(&self, prefers_dark: bool) -> Result<Theme, ThemeError> {
        if let Some(theme) = self.saved().await? {
            return Ok(theme);
        }
        self.set(if prefers_dark { DEFAULT_DARK } else { DEFAULT_LIGHT })
            .await
    }

    pub async fn set(&self, id: &str) -> Result<Theme, ThemeError> {
        let theme = find(id).ok_or_else(|| ThemeError::NotFound(id.to_string()))?;
        set_setting(&self.pool, THEME_KEY, &theme.id).await?;
        tracing::debug!(theme = %theme.id, "theme selected");
        Ok(theme.clone())
    }

    /// Switches to the built-in `lumo-` theme of the opposite darkness.
    pub async fn toggle_dark_mode(&self) -> Result<Theme, ThemeError> {
        let current = self.current().await?;
        match CATALOG
            .iter()
            .find(|t| t.is_dark != current.is_dark && t.id.starts_with("lumo-"))
        {
            Some(next) => self.set(&next.id).await,
            None => Ok(current),
        }
    }
}

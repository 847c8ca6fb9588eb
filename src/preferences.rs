//! User preferences stored in the `settings` key/value table.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::personas::DEFAULT_PERSONA_ID;

pub const PERSONA_KEY: &str = "persona";
pub const LANGUAGE_KEY: &str = "language";
pub const THEME_KEY: &str = "theme";

pub const DEFAULT_LANGUAGE: &str = "en-US";

pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub persona_id: String,
    pub language: String,
    pub theme: String,
}

/// Fields left as `None` are not touched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesUpdate {
    pub persona_id: Option<String>,
    pub language: Option<String>,
    pub theme: Option<String>,
}

pub async fn load(pool: &SqlitePool) -> Result<Preferences> {
    Ok(Preferences {
        persona_id: get_setting(pool, PERSONA_KEY)
            .await?
            .unwrap_or_else(|| DEFAULT_PERSONA_ID.to_string()),
        language: get_setting(pool, LANGUAGE_KEY)
            .await?
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        theme: get_setting(pool, THEME_KEY)
            .await?
            .unwrap_or_else(|| crate::theme::DEFAULT_LIGHT.to_string()),
    })
}

/// Writes the provided fields. Values are stored as given; callers validate
/// persona and theme ids against their registries first.
pub async fn apply(pool: &SqlitePool, update: &PreferencesUpdate) -> Result<Preferences> {
    if let Some(persona) = &update.persona_id {
        set_setting(pool, PERSONA_KEY, persona).await?;
    }
    if let Some(language) = &update.language {
        set_setting(pool, LANGUAGE_KEY, language).await?;
    }
    if let Some(theme) = &update.theme {
        set_setting(pool, THEME_KEY, theme).await?;
    }
    load(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn pool(tmp: &TempDir) -> SqlitePool {
        let config = crate::config::Config::minimal(tmp.path().join("prefs.sqlite"));
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn defaults_when_unset() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let prefs = load(&pool).await.unwrap();
        assert_eq!(prefs.persona_id, "general");
        assert_eq!(prefs.language, "en-US");
        assert_eq!(prefs.theme, "lumo-light");
    }

    #[tokio::test]
    async fn partial_update_keeps_other_fields() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        apply(
            &pool,
            &PreferencesUpdate {
                language: Some("de-DE".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let prefs = apply(
            &pool,
            &PreferencesUpdate {
                persona_id: Some("code-master".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(prefs.language, "de-DE");
        assert_eq!(prefs.persona_id, "code-master");
        assert_eq!(prefs.theme, "lumo-light");
    }

    #[tokio::test]
    async fn set_setting_overwrites() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        set_setting(&pool, "k", "one").await.unwrap();
        set_setting(&pool, "k", "two").await.unwrap();
        assert_eq!(get_setting(&pool, "k").await.unwrap().as_deref(), Some("two"));
        assert_eq!(get_setting(&pool, "missing").await.unwrap(), None);
    }
}

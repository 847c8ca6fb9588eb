//! Conversation history backed by the `conversations` table.
//!
//! Records are kept most-recent-first: every [`save`](ConversationStore::save)
//! inserts at the front and trims the list to `max_conversations`. Updating a
//! record refreshes its messages, tags and `updated_at` but never moves it.
//!
//! Messages and tags are stored as JSON columns; timestamps as Unix
//! milliseconds.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{Conversation, ConversationSummary, Message, Role};

const TITLE_MAX_CHARS: usize = 50;
const PREVIEW_MAX_CHARS: usize = 100;

/// Topic tags and the word patterns that trigger them, in output order.
static TAG_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        (
            "coding",
            r"\b(code|coding|programming|javascript|python|react|typescript)\b",
        ),
        ("writing", r"\b(write|writing|story|creative|poem|article)\b"),
        ("math", r"\b(math|mathematics|calculate|equation|formula)\b"),
        ("help", r"\b(help|question|how to|explain|tutorial)\b"),
        ("business", r"\b(business|marketing|strategy|plan)\b"),
        ("design", r"\b(design|ui|ux|interface|layout)\b"),
    ]
    .into_iter()
    .filter_map(|(tag, pattern)| Regex::new(pattern).ok().map(|re| (tag, re)))
    .collect()
});

pub struct ConversationStore {
    pool: SqlitePool,
    max_conversations: usize,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool, max_conversations: usize) -> Self {
        Self {
            pool,
            max_conversations: max_conversations.max(1),
        }
    }

    /// Connects to the configured database, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool, config.conversations.max_conversations))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Stores a new conversation at the front of the list and returns its id.
    pub async fn save(&self, messages: &[Message], title: Option<&str>) -> Result<String> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => generate_title(messages, now),
        };
        let tags = extract_tags(messages);

        let mut tx = self.pool.begin().await?;
        // The position is computed inside the INSERT so the first statement
        // of the transaction already holds the write lock.
        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, messages_json, tags_json, position, created_at, updated_at)
            SELECT ?, ?, ?, ?, COALESCE(MAX(position), 0) + 1, ?, ? FROM conversations
            "#,
        )
        .bind(&id)
        .bind(&title)
        .bind(serde_json::to_string(messages)?)
        .bind(serde_json::to_string(&tags)?)
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        let pruned = sqlx::query(
            "DELETE FROM conversations WHERE id NOT IN (SELECT id FROM conversations ORDER BY position DESC LIMIT ?)",
        )
        .bind(self.max_conversations as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if pruned > 0 {
            tracing::debug!(pruned, "trimmed conversation history");
        }
        Ok(id)
    }

    /// Replaces a conversation's messages. Returns `false` for unknown ids.
    pub async fn update(&self, id: &str, messages: &[Message]) -> Result<bool> {
        let tags = extract_tags(messages);
        let result = sqlx::query(
            "UPDATE conversations SET messages_json = ?, tags_json = ?, updated_at = ? WHERE id = ?",
        )
        .bind(serde_json::to_string(messages)?)
        .bind(serde_json::to_string(&tags)?)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, title, messages_json, tags_json, created_at, updated_at FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_conversation(&r)).transpose()
    }

    /// Every conversation, most recent first.
    pub async fn all(&self) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT id, title, messages_json, tags_json, created_at, updated_at FROM conversations ORDER BY position DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_conversation).collect()
    }

    pub async fn summaries(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self.all().await?.iter().map(summarize).collect())
    }

    /// Returns `false` when no record had that id.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Case-insensitive substring match over titles, message text and tags.
    pub async fn search(&self, query: &str) -> Result<Vec<ConversationSummary>> {
        let needle = query.to_lowercase();
        Ok(self
            .all()
            .await?
            .iter()
            .filter(|c| {
                c.title.to_lowercase().contains(&needle)
                    || c.messages
                        .iter()
                        .any(|m| m.content.to_lowercase().contains(&needle))
                    || c.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .map(summarize)
            .collect())
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?)
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation> {
    let id: String = row.get("id");
    let messages_json: String = row.get("messages_json");
    let tags_json: String = row.get("tags_json");
    let messages: Vec<Message> = serde_json::from_str(&messages_json)
        .with_context(|| format!("corrupt messages for conversation {}", id))?;
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .with_context(|| format!("corrupt tags for conversation {}", id))?;

    Ok(Conversation {
        id,
        title: row.get("title"),
        messages,
        created_at: millis_to_utc(row.get("created_at")),
        updated_at: millis_to_utc(row.get("updated_at")),
        tags,
    })
}

/// First characters of `text`, with `...` appended when cut.
fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Title from the first user message, or a dated fallback.
pub fn generate_title(messages: &[Message], now: DateTime<Utc>) -> String {
    match messages
        .iter()
        .find(|m| m.role == Role::User && !m.content.trim().is_empty())
    {
        Some(m) => preview(m.content.trim(), TITLE_MAX_CHARS),
        None => format!("Conversation {}", now.format("%Y-%m-%d")),
    }
}

/// Topic tags detected anywhere in the conversation, each at most once.
pub fn extract_tags(messages: &[Message]) -> Vec<String> {
    let content = messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    TAG_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(&content))
        .map(|(tag, _)| tag.to_string())
        .collect()
}

pub fn summarize(conv: &Conversation) -> ConversationSummary {
    ConversationSummary {
        id: conv.id.clone(),
        title: conv.title.clone(),
        message_count: conv.messages.len(),
        last_message: conv
            .messages
            .last()
            .map(|m| preview(&m.content, PREVIEW_MAX_CHARS))
            .unwrap_or_default(),
        created_at: conv.created_at,
        updated_at: conv.updated_at,
        tags: conv.tags.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(tmp: &TempDir, max: usize) -> ConversationStore {
        let mut config = Config::minimal(tmp.path().join("lumo.sqlite"));
        config.conversations.max_conversations = max;
        ConversationStore::open(&config).await.unwrap()
    }

    fn chat(user: &str, reply: &str) -> Vec<Message> {
        vec![Message::user(user), Message::assistant(reply)]
    }

    #[test]
    fn title_truncates_first_user_message() {
        let long = "x".repeat(60);
        let msgs = vec![Message::assistant("hi"), Message::user(long)];
        assert_eq!(generate_title(&msgs, Utc::now()), format!("{}...", "x".repeat(50)));

        let exact = "y".repeat(50);
        assert_eq!(generate_title(&[Message::user(exact.clone())], Utc::now()), exact);
    }

    #[test]
    fn title_falls_back_to_date() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(generate_title(&[], now), "Conversation 2024-03-09");
    }

    #[test]
    fn tags_follow_pattern_order_without_duplicates() {
        let msgs = chat(
            "Can you explain how to write Python code for a UI?",
            "Sure, here's some code.",
        );
        assert_eq!(extract_tags(&msgs), ["coding", "writing", "help", "design"]);
    }

    #[test]
    fn tags_respect_word_boundaries() {
        // "planet" must not count as "plan", "guide" must not count as "ui"
        assert!(extract_tags(&chat("planet guide", "ok")).is_empty());
    }

    #[test]
    fn summary_preview_marks_truncation() {
        let conv = Conversation {
            id: "c".into(),
            title: "t".into(),
            messages: vec![Message::assistant("z".repeat(120))],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tags: vec![],
        };
        let s = summarize(&conv);
        assert_eq!(s.last_message, format!("{}...", "z".repeat(100)));
        assert_eq!(s.message_count, 1);
    }

    #[tokio::test]
    async fn save_get_and_order() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, 100).await;

        let first = store.save(&chat("first question", "a"), None).await.unwrap();
        let second = store
            .save(&chat("second", "b"), Some("Custom title"))
            .await
            .unwrap();
        assert_ne!(first, second);

        let all = store.all().await.unwrap();
        assert_eq!(all[0].id, second);
        assert_eq!(all[0].title, "Custom title");
        assert_eq!(all[1].title, "first question");
        assert_eq!(all[1].tags, ["help"]);

        let got = store.get(&first).await.unwrap().unwrap();
        assert_eq!(got.messages.len(), 2);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_prunes_oldest_beyond_cap() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, 3).await;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(store.save(&chat(&format!("q{}", i), "a"), None).await.unwrap());
        }
        assert_eq!(store.count().await.unwrap(), 3);
        let titles: Vec<_> = store
            .summaries()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, ["q4", "q3", "q2"]);
        assert!(store.get(&ids[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_keeps_position_and_refreshes_tags() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, 100).await;
        let old = store.save(&chat("hello", "hi"), None).await.unwrap();
        let _newer = store.save(&chat("newer", "x"), None).await.unwrap();

        let mut msgs = chat("hello", "hi");
        msgs.push(Message::user("now about marketing"));
        assert!(store.update(&old, &msgs).await.unwrap());
        assert!(!store.update("missing", &msgs).await.unwrap());

        let all = store.all().await.unwrap();
        assert_eq!(all[1].id, old);
        assert_eq!(all[1].messages.len(), 3);
        assert_eq!(all[1].tags, ["business"]);
        assert_eq!(all[1].title, "hello");
    }

    #[tokio::test]
    async fn delete_and_search() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, 100).await;
        let a = store.save(&chat("Rust lifetimes", "borrowing"), None).await.unwrap();
        let _b = store.save(&chat("Dinner ideas", "pasta"), None).await.unwrap();

        let hits = store.search("BORROW").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a);

        assert_eq!(store.search("dinner").await.unwrap().len(), 1);
        assert_eq!(store.search("").await.unwrap().len(), 2);

        assert!(store.delete(&a).await.unwrap());
        assert!(!store.delete(&a).await.unwrap());
        assert!(store.search("borrow").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_all_succeed() {
        let tmp = TempDir::new().unwrap();
        let store = std::sync::Arc::new(store(&tmp, 100).await);

        let handles: Vec<_> = (0..40)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.save(&chat(&format!("q{}", i), "a"), None).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 40);
        let positions: Vec<i64> =
            sqlx::query_scalar("SELECT position FROM conversations ORDER BY position")
                .fetch_all(store.pool())
                .await
                .unwrap();
        assert_eq!(positions, (1..=40).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn corrupt_tags_are_reported() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, 100).await;
        let id = store.save(&chat("hello", "hi"), None).await.unwrap();
        sqlx::query("UPDATE conversations SET tags_json = 'x' WHERE id = ?")
            .bind(&id)
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.get(&id).await.unwrap_err();
        assert!(err.to_string().contains("corrupt tags"), "{}", err);
    }
}

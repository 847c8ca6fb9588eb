//! Support contact form: validation, storage, and delivery.
//!
//! A submission is always recorded in `contact_messages`, then delivered by
//! the first transport that works:
//!
//! 1. `[contact.smtp]`: an HTML + text email with `Reply-To` set to the sender
//! 2. `[contact].webhook_url`: the submission POSTed as JSON
//!
//! When neither is configured, or both fail, the caller gets a `mailto:` link
//! to open instead. `CONTACT_EMAIL` overrides the recipient everywhere.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{ContactConfig, SmtpConfig};
use crate::download::escape_html;

pub const DEFAULT_SUBJECT: &str = "New Contact Form Submission from Lumo.AI";
const MAILTO_SUBJECT: &str = "Contact from Lumo.AI";
const EMAIL_SUBJECT_PREFIX: &str = "[Lumo.AI] ";

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl ContactRequest {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty()
            || self.email.trim().is_empty()
            || self.message.trim().is_empty()
        {
            bail!("Name, email, and message are required");
        }
        if !EMAIL.is_match(self.email.trim()) {
            bail!("Invalid email format");
        }
        Ok(())
    }

    fn subject(&self) -> Option<&str> {
        self.subject
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Plain-text rendering sent to the relay and used as the mailto body.
    pub fn text_body(&self) -> String {
        format!(
            "Name: {}\nEmail: {}\n\nMessage:\n{}",
            self.name.trim(),
            self.email.trim(),
            self.message.trim()
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback_to_mailto: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mailto: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ContactOutcome {
    pub status: u16,
    pub body: ContactResponse,
}

fn encode_component(s: &str) -> String {
    // form encoding writes spaces as '+', which mail clients keep literally
    url::form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// `mailto:` link carrying the submission for the user's own mail client.
pub fn mailto_link(recipient: &str, request: &ContactRequest) -> String {
    format!(
        "mailto:{}?subject={}&body={}",
        recipient,
        encode_component(request.subject().unwrap_or(MAILTO_SUBJECT)),
        encode_component(&request.text_body())
    )
}

async fn record(pool: &SqlitePool, request: &ContactRequest, subject: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO contact_messages (id, name, email, subject, message, delivered, created_at)
         VALUES (?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(&id)
    .bind(request.name.trim())
    .bind(request.email.trim())
    .bind(subject)
    .bind(request.message.trim())
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(id)
}

async fn mark_delivered(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("UPDATE contact_messages SET delivered = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

fn email_text(request: &ContactRequest, subject: &str, sent_at: DateTime<Utc>) -> String {
    format!(
        "New Contact Form Submission\n\nName: {}\nEmail: {}\nSubject: {}\n\nMessage:\n{}\n\nSent from Lumo.AI contact form at {}\n",
        request.name.trim(),
        request.email.trim(),
        subject,
        request.message.trim(),
        sent_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

fn email_html(request: &ContactRequest, subject: &str, sent_at: DateTime<Utc>) -> String {
    let message = escape_html(request.message.trim()).replace('\n', "<br>");
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h2>New Contact Form Submission</h2>
<h3>Contact Details:</h3>
<p><strong>Name:</strong> {}</p>
<p><strong>Email:</strong> {}</p>
<p><strong>Subject:</strong> {}</p>
<h3>Message:</h3>
<div style="background-color: #f8f9fa; padding: 15px; border-left: 4px solid #007bff;">{}</div>
<p style="color: #666; font-size: 12px;">This email was sent from the Lumo.AI contact form.<br>Timestamp: {}</p>
</div>
"#,
        escape_html(request.name.trim()),
        escape_html(request.email.trim()),
        escape_html(subject),
        message,
        sent_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// The notification email: `[Lumo.AI]`-prefixed subject, HTML and text
/// alternatives, replies going to the sender.
pub fn build_email(
    smtp: &SmtpConfig,
    recipient: &str,
    request: &ContactRequest,
    subject: &str,
    sent_at: DateTime<Utc>,
) -> Result<Message> {
    let from: Mailbox = smtp
        .from
        .parse()
        .with_context(|| format!("invalid contact.smtp.from address: {}", smtp.from))?;
    let to: Mailbox = recipient
        .parse()
        .with_context(|| format!("invalid contact recipient: {}", recipient))?;
    let sender = Mailbox::new(
        Some(request.name.trim().to_string()),
        request
            .email
            .trim()
            .parse()
            .context("sender address rejected by mailer")?,
    );

    let message = Message::builder()
        .from(from)
        .reply_to(sender)
        .to(to)
        .subject(format!("{}{}", EMAIL_SUBJECT_PREFIX, subject))
        .multipart(MultiPart::alternative_plain_html(
            email_text(request, subject, sent_at),
            email_html(request, subject, sent_at),
        ))?;
    Ok(message)
}

async fn send_email(timeout_secs: u64, smtp: &SmtpConfig, message: Message) -> Result<()> {
    let builder = match smtp.tls.as_str() {
        "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?,
        "none" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host),
        _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?,
    };
    let mut builder = builder
        .port(smtp.port)
        .timeout(Some(Duration::from_secs(timeout_secs)));
    if let Some(username) = &smtp.username {
        let password = match &smtp.password_env {
            Some(var) => std::env::var(var).with_context(|| format!("{} is not set", var))?,
            None => String::new(),
        };
        builder = builder.credentials(Credentials::new(username.clone(), password));
    }
    builder.build().send(message).await?;
    Ok(())
}

async fn relay(
    config: &ContactConfig,
    recipient: &str,
    url: &str,
    request: &ContactRequest,
    subject: &str,
) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    let resp = client
        .post(url)
        .json(&json!({
            "to": recipient,
            "name": request.name.trim(),
            "email": request.email.trim(),
            "subject": subject,
            "message": request.message.trim(),
            "text": request.text_body(),
        }))
        .send()
        .await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("relay returned {}: {}", status, body);
    }
    Ok(())
}

/// Validates, records, and delivers a contact submission.
pub async fn submit(
    pool: &SqlitePool,
    config: &ContactConfig,
    request: &ContactRequest,
) -> Result<ContactOutcome> {
    if let Err(e) = request.validate() {
        return Ok(ContactOutcome {
            status: 400,
            body: ContactResponse {
                error: Some(e.to_string()),
                ..Default::default()
            },
        });
    }

    let subject = request.subject().unwrap_or(DEFAULT_SUBJECT).to_string();
    let id = record(pool, request, &subject).await?;
    let recipient = config.recipient_address();
    let mailto = mailto_link(&recipient, request);
    let mut attempted = false;

    if let Some(smtp) = &config.smtp {
        attempted = true;
        let sent = match build_email(smtp, &recipient, request, &subject, Utc::now()) {
            Ok(message) => send_email(config.timeout_secs, smtp, message).await,
            Err(e) => Err(e),
        };
        match sent {
            Ok(()) => {
                mark_delivered(pool, &id).await?;
                tracing::info!(id = %id, host = %smtp.host, "contact email sent");
                return Ok(delivered_outcome("Email sent successfully!"));
            }
            Err(e) => tracing::warn!(id = %id, error = %e, "contact email failed"),
        }
    }

    if let Some(url) = config.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
        attempted = true;
        match relay(config, &recipient, url, request, &subject).await {
            Ok(()) => {
                mark_delivered(pool, &id).await?;
                tracing::info!(id = %id, "contact message relayed");
                return Ok(delivered_outcome("Message sent successfully!"));
            }
            Err(e) => tracing::warn!(id = %id, error = %e, "contact relay failed"),
        }
    }

    if !attempted {
        tracing::info!(id = %id, "no contact transport configured, using mailto fallback");
        return Ok(ContactOutcome {
            status: 200,
            body: ContactResponse {
                success: false,
                message: Some("Email service not configured. Using mailto fallback.".into()),
                fallback_to_mailto: true,
                mailto: Some(mailto),
                ..Default::default()
            },
        });
    }

    Ok(ContactOutcome {
        status: 500,
        body: ContactResponse {
            success: false,
            message: Some("Email service temporarily unavailable. Using mailto fallback.".into()),
            error: Some("Failed to send email. Please try again or contact directly.".into()),
            fallback_to_mailto: true,
            mailto: Some(mailto),
        },
    })
}

fn delivered_outcome(message: &str) -> ContactOutcome {
    ContactOutcome {
        status: 200,
        body: ContactResponse {
            success: true,
            message: Some(message.to_string()),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ContactRequest {
        ContactRequest {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            subject: None,
            message: "Hello there & bye".into(),
        }
    }

    async fn pool(tmp: &TempDir) -> SqlitePool {
        let config = crate::config::Config::minimal(tmp.path().join("contact.sqlite"));
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        pool
    }

    async fn delivered(pool: &SqlitePool) -> Vec<i64> {
        sqlx::query_scalar("SELECT delivered FROM contact_messages")
            .fetch_all(pool)
            .await
            .unwrap()
    }

    fn smtp(port: u16) -> SmtpConfig {
        SmtpConfig {
            host: "127.0.0.1".into(),
            port,
            tls: "none".into(),
            username: None,
            password_env: None,
            from: "Lumo.AI Contact Form <noreply@lumo.ai>".into(),
        }
    }

    /// Accepts one SMTP session and returns the DATA section it received.
    async fn fake_smtp_server() -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            write.write_all(b"220 localhost ESMTP\r\n").await.unwrap();

            let mut data = String::new();
            let mut in_data = false;
            while let Ok(Some(line)) = lines.next_line().await {
                if in_data {
                    if line == "." {
                        in_data = false;
                        write.write_all(b"250 queued\r\n").await.unwrap();
                    } else {
                        data.push_str(&line);
                        data.push('\n');
                    }
                    continue;
                }
                let command = line.to_ascii_uppercase();
                let reply: &[u8] = if command.starts_with("DATA") {
                    in_data = true;
                    b"354 end with <CRLF>.<CRLF>\r\n"
                } else if command.starts_with("QUIT") {
                    let _ = write.write_all(b"221 bye\r\n").await;
                    break;
                } else {
                    b"250 localhost\r\n"
                };
                write.write_all(reply).await.unwrap();
            }
            data
        });
        (port, handle)
    }

    /// A port with nothing listening on it.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn email_has_prefix_reply_to_and_both_bodies() {
        let mut r = request();
        r.subject = Some("Pricing question".into());
        r.message = "Line one\n<b>two</b>".into();
        let sent_at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();

        let message = build_email(&smtp(25), "ops@lumo.test", &r, "Pricing question", sent_at).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: [Lumo.AI] Pricing question"), "{}", raw);
        let reply_to = raw.lines().find(|l| l.starts_with("Reply-To:")).unwrap();
        assert!(reply_to.contains("ada@example.com"), "{}", reply_to);
        assert!(raw.contains("To: ops@lumo.test"), "{}", raw);
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));

        let html = email_html(&r, "Pricing question", sent_at);
        assert!(html.contains("Line one<br>&lt;b&gt;two&lt;/b&gt;"));
        assert!(html.contains("Timestamp: 2024-05-01 09:30:00 UTC"));
        let text = email_text(&r, "Pricing question", sent_at);
        assert!(text.contains("Name: Ada\nEmail: ada@example.com\nSubject: Pricing question"));
    }

    #[test]
    fn invalid_from_address_is_an_error() {
        let mut config = smtp(25);
        config.from = "not an address".into();
        let err = build_email(&config, "ops@lumo.test", &request(), DEFAULT_SUBJECT, Utc::now())
            .unwrap_err();
        assert!(err.to_string().contains("contact.smtp.from"));
    }

    #[tokio::test]
    async fn smtp_delivery_marks_delivered() {
        let (port, server) = fake_smtp_server().await;
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let config = ContactConfig {
            smtp: Some(smtp(port)),
            ..Default::default()
        };

        let outcome = submit(&pool, &config, &request()).await.unwrap();
        assert_eq!(outcome.status, 200);
        assert!(outcome.body.success);
        assert_eq!(outcome.body.message.as_deref(), Some("Email sent successfully!"));
        assert_eq!(delivered(&pool).await, [1]);

        let data = server.await.unwrap();
        assert!(data.contains("[Lumo.AI] New Contact Form Submission from Lumo.AI"), "{}", data);
        assert!(data.contains("ada@example.com"));
    }

    #[tokio::test]
    async fn smtp_failure_falls_back_to_relay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/relay"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let config = ContactConfig {
            smtp: Some(smtp(closed_port().await)),
            webhook_url: Some(format!("{}/relay", server.uri())),
            timeout_secs: 5,
            ..Default::default()
        };
        let outcome = submit(&pool, &config, &request()).await.unwrap();
        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.body.message.as_deref(), Some("Message sent successfully!"));
        assert_eq!(delivered(&pool).await, [1]);
    }

    #[tokio::test]
    async fn smtp_failure_without_relay_is_500_with_fallback() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let config = ContactConfig {
            smtp: Some(smtp(closed_port().await)),
            timeout_secs: 5,
            ..Default::default()
        };
        let outcome = submit(&pool, &config, &request()).await.unwrap();
        assert_eq!(outcome.status, 500);
        assert!(outcome.body.fallback_to_mailto);
        assert!(outcome.body.mailto.is_some());
        assert_eq!(delivered(&pool).await, [0]);
    }

    #[test]
    fn validation_messages() {
        let mut r = request();
        r.name = "  ".into();
        assert_eq!(
            r.validate().unwrap_err().to_string(),
            "Name, email, and message are required"
        );
        let mut r = request();
        r.email = "not-an-email".into();
        assert_eq!(r.validate().unwrap_err().to_string(), "Invalid email format");
        assert!(request().validate().is_ok());
    }

    #[test]
    fn mailto_encodes_fields() {
        let link = mailto_link("support@lumo.ai", &request());
        assert_eq!(
            link,
            "mailto:support@lumo.ai?subject=Contact%20from%20Lumo.AI&body=Name%3A%20Ada%0AEmail%3A%20ada%40example.com%0A%0AMessage%3A%0AHello%20there%20%26%20bye"
        );
    }

    #[tokio::test]
    async fn invalid_request_is_400_and_not_stored() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let mut r = request();
        r.message = String::new();
        let outcome = submit(&pool, &ContactConfig::default(), &r).await.unwrap();
        assert_eq!(outcome.status, 400);
        assert!(delivered(&pool).await.is_empty());
    }

    #[tokio::test]
    async fn without_relay_falls_back_to_mailto() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let outcome = submit(&pool, &ContactConfig::default(), &request())
            .await
            .unwrap();
        assert_eq!(outcome.status, 200);
        assert!(!outcome.body.success);
        assert!(outcome.body.fallback_to_mailto);
        assert!(outcome.body.mailto.unwrap().starts_with("mailto:support@lumo.ai?"));
        assert_eq!(delivered(&pool).await, [0]);
    }

    #[tokio::test]
    async fn relay_success_marks_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/relay"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let config = ContactConfig {
            webhook_url: Some(format!("{}/relay", server.uri())),
            ..Default::default()
        };
        let outcome = submit(&pool, &config, &request()).await.unwrap();
        assert_eq!(outcome.status, 200);
        assert!(outcome.body.success);
        assert_eq!(outcome.body.message.as_deref(), Some("Message sent successfully!"));
        assert_eq!(delivered(&pool).await, [1]);
    }

    #[tokio::test]
    async fn relay_failure_is_500_with_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let config = ContactConfig {
            webhook_url: Some(server.uri()),
            ..Default::default()
        };
        let outcome = submit(&pool, &config, &request()).await.unwrap();
        assert_eq!(outcome.status, 500);
        assert!(outcome.body.fallback_to_mailto);
        assert_eq!(
            outcome.body.error.as_deref(),
            Some("Failed to send email. Please try again or contact directly.")
        );
        assert_eq!(delivered(&pool).await, [0]);
    }
}

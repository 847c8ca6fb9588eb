//! HTTP API for the Lumo.AI assistant.
//!
//! Wraps the chat, file, conversation, download, theme, preference and
//! contact services in a JSON API for the web client.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/chat` | One chat turn |
//! | `POST` | `/api/analyze-image` | Describe a base64 image |
//! | `POST` | `/api/files` | Process an upload into chat-ready content |
//! | `GET`  | `/api/personas` | List personas |
//! | `GET`  | `/api/conversations` | List (or `?q=` search) saved conversations |
//! | `POST` | `/api/conversations` | Save a new conversation |
//! | `GET`/`PUT`/`DELETE` | `/api/conversations/{id}` | Read, replace messages, delete |
//! | `GET`  | `/api/conversations/{id}/export` | Export as json, txt or md |
//! | `POST` | `/api/download` | Render a response as pdf, docx, xlsx, txt or md |
//! | `POST` | `/api/download/suggest` | Suggested download formats |
//! | `GET`  | `/api/themes` | Theme catalog (`?dark=true\|false`) |
//! | `GET`/`PUT` | `/api/theme` | Current theme |
//! | `POST` | `/api/theme/toggle` | Toggle dark mode |
//! | `POST` | `/api/theme/initialize` | First-run theme from `{ preferDark }` |
//! | `POST` | `/api/themes/custom` | Derive an unsaved theme from a base |
//! | `GET`  | `/api/theme/css` | CSS variables for the current (or `?id=`) theme |
//! | `GET`/`PUT` | `/api/preferences` | Persona, language and theme preferences |
//! | `POST` | `/api/contact` | Support contact form |
//!
//! # Error Contract
//!
//! Endpoints without a fixed response shape report failures as:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "content must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `payload_too_large` (413),
//! `internal` (500).
//!
//! `/api/chat`, `/api/analyze-image` and `/api/contact` keep the
//! bodies the web client expects and carry the status in the HTTP code.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chat;
use crate::config::Config;
use crate::contact::{self, ContactRequest};
use crate::conversations::ConversationStore;
use crate::download::{self, DownloadFormat};
use crate::export::{self, ExportFormat};
use crate::files::{self, FileError, FileUploadResult};
use crate::llm::{create_provider, ChatProvider};
use crate::models::{ChatRequest, ChatResponse, Conversation, ConversationSummary, Message};
use crate::personas::{Persona, PersonaRegistry};
use crate::preferences::{self, Preferences, PreferencesUpdate};
use crate::theme::{self, Theme, ThemeError, ThemeOverrides, ThemeService};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    provider: Arc<dyn ChatProvider>,
    personas: Arc<PersonaRegistry>,
    store: Arc<ConversationStore>,
    themes: ThemeService,
}

/// Starts the HTTP server with the provider described by `[llm]`.
///
/// A missing API key does not stop the server: chat endpoints answer with
/// "API key is not configured" until one is provided.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let provider: Arc<dyn ChatProvider> = Arc::from(create_provider(&config.llm)?);
    run_server_with_provider(config, provider).await
}

/// Starts the HTTP server with an explicit chat provider.
pub async fn run_server_with_provider(
    config: &Config,
    provider: Arc<dyn ChatProvider>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(config, provider).await?;

    println!("Lumo.AI server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the application router, opening the store and applying migrations.
pub async fn router(config: &Config, provider: Arc<dyn ChatProvider>) -> anyhow::Result<Router> {
    let config = Arc::new(config.clone());
    let store = ConversationStore::open(&config).await?;
    let themes = ThemeService::new(store.pool().clone());
    let personas = PersonaRegistry::from_config(&config);

    if !provider.is_configured() {
        tracing::warn!("chat provider is not configured; chat requests will fail");
    }
    tracing::info!(
        model = provider.model_name(),
        personas = personas.len(),
        "server state ready"
    );

    // Uploads arrive base64-encoded inside JSON: 4/3 of the raw limit plus envelope.
    let body_limit = (config.uploads.max_file_bytes as usize / 3 + 1) * 4 + 64 * 1024;

    let state = AppState {
        config,
        provider,
        personas: Arc::new(personas),
        store: Arc::new(store),
        themes,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Ok(Router::new()
        .route("/health", get(handle_health))
        .route("/api/chat", post(handle_chat))
        .route("/api/analyze-image", post(handle_analyze_image))
        .route("/api/files", post(handle_file_upload))
        .route("/api/personas", get(handle_personas))
        .route(
            "/api/conversations",
            get(handle_list_conversations).post(handle_save_conversation),
        )
        .route(
            "/api/conversations/{id}",
            get(handle_get_conversation)
                .put(handle_update_conversation)
                .delete(handle_delete_conversation),
        )
        .route("/api/conversations/{id}/export", get(handle_export))
        .route("/api/download", post(handle_download))
        .route("/api/download/suggest", post(handle_download_suggest))
        .route("/api/themes", get(handle_list_themes))
        .route("/api/theme", get(handle_current_theme).put(handle_set_theme))
        .route("/api/theme/toggle", post(handle_toggle_theme))
        .route("/api/theme/initialize", post(handle_initialize_theme))
        .route("/api/themes/custom", post(handle_custom_theme))
        .route("/api/theme/css", get(handle_theme_css))
        .route(
            "/api/preferences",
            get(handle_get_preferences).put(handle_update_preferences),
        )
        .route("/api/contact", post(handle_contact))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn too_large(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::PAYLOAD_TOO_LARGE,
        code: "payload_too_large".to_string(),
        message: message.into(),
    }
}

/// Storage and other unexpected failures. The cause is logged, not returned.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal".to_string(),
            message: "internal server error".to_string(),
        }
    }
}

impl From<ThemeError> for AppError {
    fn from(err: ThemeError) -> Self {
        match err {
            ThemeError::NotFound(_) => not_found(err.to_string()),
            ThemeError::Store(e) => e.into(),
        }
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Reduces a requested file name to a safe attachment stem.
fn attachment_stem(requested: Option<&str>) -> String {
    let stem: String = requested
        .unwrap_or(download::DEFAULT_FILENAME)
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.trim_matches(['.', '_']).is_empty() {
        download::DEFAULT_FILENAME.to_string()
    } else {
        stem
    }
}

fn attachment(mime: &str, filename: &str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/chat ============

async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> (StatusCode, Json<ChatResponse>) {
    let outcome = chat::respond(
        state.provider.as_ref(),
        &state.personas,
        &state.config,
        &request,
    )
    .await;
    (status(outcome.status), Json(outcome.body))
}

// ============ POST /api/analyze-image ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeImageRequest {
    #[serde(default)]
    image: String,
    #[serde(default)]
    mime_type: String,
}

async fn handle_analyze_image(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeImageRequest>,
) -> Response {
    let (code, body) = chat::analyze(
        state.provider.as_ref(),
        &state.config,
        &request.image,
        &request.mime_type,
    )
    .await;
    (status(code), Json(body)).into_response()
}

// ============ POST /api/files ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileUploadRequest {
    file_name: String,
    #[serde(default)]
    file_type: String,
    /// Base64 file content.
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileUploadResponse {
    #[serde(flatten)]
    result: FileUploadResult,
    chat_prompt: String,
}

async fn handle_file_upload(
    State(state): State<AppState>,
    Json(request): Json<FileUploadRequest>,
) -> Result<Json<FileUploadResponse>, AppError> {
    if request.file_name.trim().is_empty() {
        return Err(bad_request("fileName must not be empty"));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(request.data.trim())
        .map_err(|e| bad_request(format!("data is not valid base64: {}", e)))?;

    let result = files::process_upload(
        &request.file_name,
        &request.file_type,
        &bytes,
        &state.config.uploads,
        state.provider.as_ref(),
        &state.config.vision,
    )
    .await
    .map_err(|e| match e {
        FileError::TooLarge(_) => too_large(e.to_string()),
        FileError::Unsupported(_) => bad_request(e.to_string()),
        FileError::Io(_) => anyhow::Error::from(e).into(),
    })?;

    let chat_prompt = files::format_for_chat(&result);
    Ok(Json(FileUploadResponse {
        result,
        chat_prompt,
    }))
}

// ============ GET /api/personas ============

#[derive(Serialize)]
struct PersonaListResponse {
    personas: Vec<Persona>,
}

async fn handle_personas(State(state): State<AppState>) -> Json<PersonaListResponse> {
    Json(PersonaListResponse {
        personas: state.personas.personas().to_vec(),
    })
}

// ============ /api/conversations ============

#[derive(Deserialize)]
struct ListQuery {
    q: Option<String>,
}

#[derive(Serialize)]
struct ConversationListResponse {
    conversations: Vec<ConversationSummary>,
}

async fn handle_list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ConversationListResponse>, AppError> {
    let conversations = match query.q.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => state.store.search(q).await?,
        _ => state.store.summaries().await?,
    };
    Ok(Json(ConversationListResponse { conversations }))
}

#[derive(Deserialize)]
struct SaveConversationRequest {
    messages: Vec<Message>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Serialize)]
struct SaveConversationResponse {
    id: String,
}

async fn handle_save_conversation(
    State(state): State<AppState>,
    Json(request): Json<SaveConversationRequest>,
) -> Result<(StatusCode, Json<SaveConversationResponse>), AppError> {
    let id = state
        .store
        .save(&request.messages, request.title.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(SaveConversationResponse { id })))
}

async fn handle_get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, AppError> {
    state
        .store
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("conversation not found: {}", id)))
}

#[derive(Deserialize)]
struct UpdateConversationRequest {
    messages: Vec<Message>,
}

async fn handle_update_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateConversationRequest>,
) -> Result<StatusCode, AppError> {
    if state.store.update(&id, &request.messages).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("conversation not found: {}", id)))
    }
}

async fn handle_delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.store.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("conversation not found: {}", id)))
    }
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

async fn handle_export(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let format = match query.format.as_deref() {
        Some(f) => f
            .parse::<ExportFormat>()
            .map_err(|e| bad_request(e.to_string()))?,
        None => ExportFormat::default(),
    };
    let conv = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| not_found(format!("conversation not found: {}", id)))?;

    let body = export::export_conversation(&conv, format)?;
    Ok(attachment(
        format.mime(),
        &export::download_filename(&conv.title, format),
        body.into_bytes(),
    ))
}

// ============ POST /api/download ============

#[derive(Deserialize)]
struct DownloadRequest {
    content: String,
    format: String,
    #[serde(default)]
    filename: Option<String>,
}

async fn handle_download(Json(request): Json<DownloadRequest>) -> Result<Response, AppError> {
    if request.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }
    let format: DownloadFormat = request
        .format
        .parse()
        .map_err(|e: anyhow::Error| bad_request(e.to_string()))?;

    let rendered = download::render(&request.content, format, Utc::now())?;
    let filename = rendered.filename(&attachment_stem(request.filename.as_deref()));
    Ok(attachment(rendered.mime, &filename, rendered.bytes))
}

#[derive(Deserialize)]
struct SuggestRequest {
    content: String,
}

#[derive(Serialize)]
struct SuggestResponse {
    formats: Vec<DownloadFormat>,
}

async fn handle_download_suggest(Json(request): Json<SuggestRequest>) -> Json<SuggestResponse> {
    Json(SuggestResponse {
        formats: download::detect_content_type(&request.content),
    })
}

// ============ Themes ============

#[derive(Deserialize)]
struct ThemeListQuery {
    dark: Option<bool>,
}

#[derive(Serialize)]
struct ThemeListResponse {
    themes: Vec<Theme>,
}

async fn handle_list_themes(Query(query): Query<ThemeListQuery>) -> Json<ThemeListResponse> {
    let themes = match query.dark {
        Some(is_dark) => theme::by_type(is_dark).into_iter().cloned().collect(),
        None => theme::all().to_vec(),
    };
    Json(ThemeListResponse { themes })
}

async fn handle_current_theme(State(state): State<AppState>) -> Result<Json<Theme>, AppError> {
    Ok(Json(state.themes.current().await?))
}

#[derive(Deserialize)]
struct SetThemeRequest {
    id: String,
}

async fn handle_set_theme(
    State(state): State<AppState>,
    Json(request): Json<SetThemeRequest>,
) -> Result<Json<Theme>, AppError> {
    Ok(Json(state.themes.set(&request.id).await?))
}

async fn handle_toggle_theme(State(state): State<AppState>) -> Result<Json<Theme>, AppError> {
    Ok(Json(state.themes.toggle_dark_mode().await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeThemeRequest {
    #[serde(default)]
    prefer_dark: bool,
}

async fn handle_initialize_theme(
    State(state): State<AppState>,
    Json(request): Json<InitializeThemeRequest>,
) -> Result<Json<Theme>, AppError> {
    Ok(Json(state.themes.initialize(request.prefer_dark).await?))
}

#[derive(Deserialize)]
struct CustomThemeRequest {
    name: String,
    /// Defaults to the current theme.
    base: Option<String>,
    #[serde(default)]
    overrides: ThemeOverrides,
}

#[derive(Serialize)]
struct CustomThemeResponse {
    theme: Theme,
    css: String,
}

async fn handle_custom_theme(
    State(state): State<AppState>,
    Json(request): Json<CustomThemeRequest>,
) -> Result<Json<CustomThemeResponse>, AppError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(bad_request("name is required"));
    }
    let base = match request.base.as_deref() {
        Some(id) => theme::find(id)
            .cloned()
            .ok_or_else(|| not_found(format!("theme not found: {}", id)))?,
        None => state.themes.current().await?,
    };
    let theme = theme::create_custom_theme(name, &base, request.overrides);
    let css = theme::css_variables(&theme);
    Ok(Json(CustomThemeResponse { theme, css }))
}

#[derive(Deserialize)]
struct ThemeCssQuery {
    id: Option<String>,
}

async fn handle_theme_css(
    State(state): State<AppState>,
    Query(query): Query<ThemeCssQuery>,
) -> Result<Response, AppError> {
    let theme = match query.id.as_deref() {
        Some(id) => theme::find(id)
            .cloned()
            .ok_or_else(|| not_found(format!("theme not found: {}", id)))?,
        None => state.themes.current().await?,
    };
    Ok((
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        theme::css_variables(&theme),
    )
        .into_response())
}

// ============ /api/preferences ============

async fn handle_get_preferences(
    State(state): State<AppState>,
) -> Result<Json<Preferences>, AppError> {
    Ok(Json(preferences::load(state.store.pool()).await?))
}

async fn handle_update_preferences(
    State(state): State<AppState>,
    Json(update): Json<PreferencesUpdate>,
) -> Result<Json<Preferences>, AppError> {
    if let Some(id) = update.persona_id.as_deref() {
        if state.personas.find(id).is_none() {
            return Err(bad_request(format!("unknown persona: {}", id)));
        }
    }
    if let Some(id) = update.theme.as_deref() {
        if theme::find(id).is_none() {
            return Err(bad_request(format!("unknown theme: {}", id)));
        }
    }
    if let Some(lang) = update.language.as_deref() {
        if lang.trim().is_empty() {
            return Err(bad_request("language must not be empty"));
        }
    }
    Ok(Json(preferences::apply(state.store.pool(), &update).await?))
}

// ============ POST /api/contact ============

async fn handle_contact(
    State(state): State<AppState>,
    Json(request): Json<ContactRequest>,
) -> Result<Response, AppError> {
    let outcome = contact::submit(state.store.pool(), &state.config.contact, &request).await?;
    Ok((status(outcome.status), Json(outcome.body)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_stem_sanitizes() {
        assert_eq!(attachment_stem(None), "lumo-ai-response");
        assert_eq!(attachment_stem(Some("my report")), "my_report");
        assert_eq!(attachment_stem(Some("a\"b\r\n")), "a_b");
        assert_eq!(attachment_stem(Some("///")), "lumo-ai-response");
    }
}

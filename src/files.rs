//! Upload processing: classify a file, validate it, and turn it into text
//! the assistant can reason about.
//!
//! # Dispatch
//!
//! Classification is ordered; the first match wins:
//!
//! | Kind | Matches | Processing |
//! |------|---------|------------|
//! | Image | `image/*` or `.jpg .jpeg .png .gif .webp` | base64 + vision description |
//! | Pdf | `application/pdf` or `.pdf` | per-page text |
//! | Word | `.doc .docx` or a Word MIME type | paragraph text |
//! | Spreadsheet | `.xls .xlsx .csv` or an Excel MIME type | CSV per sheet |
//! | Text | anything else that passed validation | lossy UTF-8 |
//!
//! Extraction failures never reject the upload. They are rendered into the
//! content so the user can still ask about the file. Document parsing runs
//! on the blocking pool, and a parser panic is reported the same way.

use base64::Engine;
use chrono::Utc;
use serde::Serialize;
use std::path::Path;

use crate::config::{UploadsConfig, VisionConfig};
use crate::extract::{self, Sheet};
use crate::llm::{self, ChatProvider};
use crate::models::FileContext;

/// MIME types (and bare extensions) accepted without further checks.
pub const SUPPORTED_TYPES: &[&str] = &[
    "text/plain",
    "text/markdown",
    "text/csv",
    "application/json",
    "application/javascript",
    "text/html",
    "text/css",
    "text/xml",
    "application/xml",
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-excel",
    ".pdf",
    ".doc",
    ".docx",
    ".xls",
    ".xlsx",
    ".csv",
    ".txt",
    ".md",
    ".json",
    ".js",
    ".ts",
    ".py",
];

const CODE_EXTENSIONS: &[&str] = &[
    ".js", ".jsx", ".ts", ".tsx", ".py", ".java", ".cpp", ".c", ".h", ".cs", ".php", ".rb", ".go",
    ".rs", ".swift", ".kt", ".scala", ".sh", ".bash", ".sql", ".r", ".m", ".pl", ".lua", ".dart",
    ".vue", ".svelte", ".astro",
];
const WORD_EXTENSIONS: &[&str] = &[".doc", ".docx"];
const SPREADSHEET_EXTENSIONS: &[&str] = &[".xls", ".xlsx", ".csv"];
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp"];

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("File size exceeds {0}MB limit")]
    TooLarge(f64),
    #[error("Unsupported file type: {0}")]
    Unsupported(String),
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Pdf,
    Word,
    Spreadsheet,
    Text,
}

fn has_extension(name: &str, extensions: &[&str]) -> bool {
    let lower = name.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

pub fn is_code_file(name: &str) -> bool {
    has_extension(name, CODE_EXTENSIONS)
}

/// Decides how a file is processed from its name and declared MIME type.
pub fn classify(name: &str, mime: &str) -> FileKind {
    let lower = name.to_lowercase();
    if mime.starts_with("image/") || has_extension(&lower, IMAGE_EXTENSIONS) {
        FileKind::Image
    } else if mime == extract::MIME_PDF || lower.ends_with(".pdf") {
        FileKind::Pdf
    } else if has_extension(&lower, WORD_EXTENSIONS)
        || mime.contains("word")
        || mime.contains("officedocument.wordprocessingml")
    {
        FileKind::Word
    } else if has_extension(&lower, SPREADSHEET_EXTENSIONS)
        || mime.contains("excel")
        || mime.contains("spreadsheetml")
    {
        FileKind::Spreadsheet
    } else {
        FileKind::Text
    }
}

/// Best-effort MIME type from a file name, for uploads that declare none.
pub fn guess_mime(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    let ext = lower.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => extract::MIME_PDF,
        "docx" => extract::MIME_DOCX,
        "doc" => "application/msword",
        "xlsx" => extract::MIME_XLSX,
        "xls" => "application/vnd.ms-excel",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "json" => "application/json",
        "js" => "application/javascript",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "xml" => "application/xml",
        _ => "text/plain",
    }
}

/// Rejects uploads over the size limit or of an unrecognised type.
pub fn validate(name: &str, mime: &str, size: u64, max_bytes: u64) -> Result<(), FileError> {
    if size > max_bytes {
        return Err(FileError::TooLarge(max_bytes as f64 / 1024.0 / 1024.0));
    }

    let lower = name.to_lowercase();
    let supported = SUPPORTED_TYPES.contains(&mime)
        || is_code_file(&lower)
        || has_extension(&lower, WORD_EXTENSIONS)
        || has_extension(&lower, SPREADSHEET_EXTENSIONS)
        || has_extension(&lower, IMAGE_EXTENSIONS)
        || lower.ends_with(".pdf");
    if !supported {
        return Err(FileError::Unsupported(if mime.is_empty() {
            name.to_string()
        } else {
            mime.to_string()
        }));
    }
    Ok(())
}

pub fn supported_types() -> &'static [&'static str] {
    SUPPORTED_TYPES
}

pub fn max_file_size() -> u64 {
    UploadsConfig::default().max_file_bytes
}

/// A processed upload, ready to show to the user or attach to a chat.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadResult {
    pub content: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
}

impl FileUploadResult {
    pub fn size_kb(&self) -> u64 {
        size_kb(self.file_size)
    }

    pub fn into_context(self) -> FileContext {
        FileContext {
            file_name: self.file_name,
            file_type: self.file_type,
            content: self.content,
            base64: self.base64,
            uploaded_at: Utc::now(),
        }
    }
}

fn size_kb(bytes: u64) -> u64 {
    (bytes as f64 / 1024.0).round() as u64
}

/// Validates and processes an in-memory upload.
///
/// `mime` may be empty; a type is then guessed from the file name.
pub async fn process_upload(
    name: &str,
    mime: &str,
    bytes: &[u8],
    uploads: &UploadsConfig,
    provider: &dyn ChatProvider,
    vision: &VisionConfig,
) -> Result<FileUploadResult, FileError> {
    let file_type = if mime.trim().is_empty() {
        guess_mime(name).to_string()
    } else {
        mime.trim().to_string()
    };
    let size = bytes.len() as u64;
    validate(name, &file_type, size, uploads.max_file_bytes)?;

    let kind = classify(name, &file_type);
    tracing::debug!(file = name, ?kind, size, "processing upload");

    let mut base64 = None;
    let content = match kind {
        FileKind::Image => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            let content =
                describe_image(name, &file_type, size, &encoded, provider, vision).await;
            base64 = Some(encoded);
            content
        }
        FileKind::Pdf | FileKind::Word | FileKind::Spreadsheet => {
            let (owned_name, owned_type, owned) =
                (name.to_string(), file_type.clone(), bytes.to_vec());
            extract_off_thread(name, kind, move || match kind {
                FileKind::Pdf => pdf_content(&owned_name, size, &owned),
                FileKind::Word => word_content(&owned_name, size, &owned),
                _ => spreadsheet_content(&owned_name, &owned_type, size, &owned),
            })
            .await
        }
        FileKind::Text => String::from_utf8_lossy(bytes).into_owned(),
    };

    Ok(FileUploadResult {
        content,
        file_name: name.to_string(),
        file_type,
        file_size: size,
        base64,
    })
}

/// Reads a local file and processes it like an upload.
pub async fn process_path(
    path: &Path,
    uploads: &UploadsConfig,
    provider: &dyn ChatProvider,
    vision: &VisionConfig,
) -> Result<FileUploadResult, FileError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let meta = tokio::fs::metadata(path).await?;
    if meta.len() > uploads.max_file_bytes {
        return Err(FileError::TooLarge(
            uploads.max_file_bytes as f64 / 1024.0 / 1024.0,
        ));
    }
    let bytes = tokio::fs::read(path).await?;
    process_upload(&name, "", &bytes, uploads, provider, vision).await
}

async fn describe_image(
    name: &str,
    mime: &str,
    size: u64,
    encoded: &str,
    provider: &dyn ChatProvider,
    vision: &VisionConfig,
) -> String {
    match llm::analyze_image(provider, vision, encoded, mime).await {
        Ok(description) => {
            let description = if description.trim().is_empty() {
                "Unable to analyze image content.".to_string()
            } else {
                description
            };
            format!(
                "🖼️ **Image Analysis: {name}**

📊 **File Info:** {kb} KB ({mb:.2} MB) • {mime}

🔍 **What I can see in this image:**
{description}

💡 **You can ask me more specific questions about this image:**
• \"What colors are prominent in this image?\"
• \"Are there any people in this image?\"
• \"What's the setting or location?\"
• \"Can you read any text in the image?\"
• \"What's the mood or atmosphere?\"

**Feel free to ask any questions about what you see in the image!** 📸✨",
                kb = size_kb(size),
                mb = size as f64 / (1024.0 * 1024.0),
            )
        }
        Err(e) => {
            tracing::warn!(file = name, error = %e, "vision analysis unavailable");
            format!(
                "🖼️ **Image Uploaded: {name}** ({kb} KB)

⚠️ **Vision analysis temporarily unavailable.** You can still:
• Describe what you see and ask for analysis
• Ask general questions about image content
• Request help with image-related tasks

**What would you like to know about this image?** 📸",
                kb = size_kb(size),
            )
        }
    }
}

/// Runs a document parser on the blocking pool.
async fn extract_off_thread<F>(name: &str, kind: FileKind, work: F) -> String
where
    F: FnOnce() -> String + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(content) => content,
        Err(e) => {
            tracing::error!(file = name, error = %e, "extraction task aborted");
            extraction_failure(name, kind, "The document could not be parsed.")
        }
    }
}

fn extraction_failure(name: &str, kind: FileKind, detail: impl std::fmt::Display) -> String {
    match kind {
        FileKind::Pdf => format!(
            "[PDF Document: {}]\nError: Failed to extract text. {}",
            name, detail
        ),
        FileKind::Word => format!(
            "[Word Document: {}]\nError: Failed to extract text. {}",
            name, detail
        ),
        _ => format!(
            "[Excel Document: {}]\nError: Failed to extract data. {}",
            name, detail
        ),
    }
}

fn pdf_content(name: &str, size: u64, bytes: &[u8]) -> String {
    match extract::extract_pdf_pages(bytes) {
        Ok(pages) => {
            if pages.iter().all(|p| p.trim().is_empty()) {
                return format!(
                    "📄 **PDF Content: {}**\n\nNo text content could be extracted. The PDF might be scanned or contain only images.",
                    name
                );
            }
            let mut full = String::new();
            for (i, page) in pages.iter().enumerate() {
                full.push_str(&format!("--- Page {} ---\n{}\n\n", i + 1, page.trim()));
            }
            format!("📄 **PDF Content: {}** ({} KB)\n\n{}", name, size_kb(size), full)
        }
        Err(e) => {
            tracing::warn!(file = name, error = %e, "PDF extraction failed");
            extraction_failure(name, FileKind::Pdf, e)
        }
    }
}

fn word_content(name: &str, size: u64, bytes: &[u8]) -> String {
    match extract::extract_text(bytes, extract::MIME_DOCX) {
        Ok(text) if text.trim().is_empty() => format!(
            "📝 **Word Document Content: {}**\n\nNo text content could be extracted from this document.",
            name
        ),
        Ok(text) => format!(
            "📝 **Word Document Content: {}** ({} KB)\n\n{}",
            name,
            size_kb(size),
            text
        ),
        Err(e) => {
            tracing::warn!(file = name, error = %e, "Word extraction failed");
            extraction_failure(name, FileKind::Word, e)
        }
    }
}

fn is_legacy_workbook(lower_name: &str, mime: &str) -> bool {
    lower_name.ends_with(".xls")
        || (mime == "application/vnd.ms-excel" && !lower_name.ends_with(".xlsx"))
}

fn spreadsheet_content(name: &str, mime: &str, size: u64, bytes: &[u8]) -> String {
    let lower = name.to_lowercase();
    // CSV uploads are already in the rendered form: one sheet, verbatim.
    let sheets: Result<Vec<(String, String)>, _> = if lower.ends_with(".csv") {
        let text = String::from_utf8_lossy(bytes).replace("\r\n", "\n");
        Ok(vec![("Sheet1".to_string(), text.trim_end().to_string())])
    } else {
        let workbook = if is_legacy_workbook(&lower, mime) {
            extract::extract_legacy_workbook(bytes)
        } else {
            extract::extract_workbook(bytes)
        };
        workbook.map(|sheets| {
            sheets
                .iter()
                .map(|s: &Sheet| (s.name.clone(), s.to_csv()))
                .collect()
        })
    };

    match sheets {
        Ok(sheets) => {
            let mut full = String::new();
            for (sheet_name, csv) in &sheets {
                full.push_str(&format!("--- Sheet: {} ---\n{}\n\n", sheet_name, csv));
            }
            if full.trim().is_empty() {
                return format!(
                    "📊 **Excel Content: {}**\n\nNo content could be extracted from this spreadsheet.",
                    name
                );
            }
            format!("📊 **Excel Content: {}** ({} KB)\n\n{}", name, size_kb(size), full)
        }
        Err(e) => {
            tracing::warn!(file = name, error = %e, "spreadsheet extraction failed");
            extraction_failure(name, FileKind::Spreadsheet, e)
        }
    }
}

/// Builds the analysis prompt that introduces an upload to the assistant.
pub fn format_for_chat(result: &FileUploadResult) -> String {
    let mut prompt = String::from("I've uploaded a file for analysis:\n\n");
    prompt.push_str("**File Details:**\n");
    prompt.push_str(&format!("- Name: {}\n", result.file_name));
    prompt.push_str(&format!("- Type: {}\n", result.file_type));
    prompt.push_str(&format!("- Size: {} KB\n\n", result.size_kb()));

    if result.file_type.starts_with("image/") {
        prompt.push_str(&format!("{}\n\n", result.content));
    } else if result.content.contains("Error: Failed to extract text")
        || result.content.contains("Error: Failed to extract data")
    {
        prompt.push_str(&format!("{}\n\n", result.content));
        prompt.push_str(
            "Please let me know if you can help with this file or if you need it in a different format.",
        );
    } else {
        prompt.push_str(&format!(
            "**File Content:**\n```\n{}\n```\n\n",
            result.content
        ));
        prompt.push_str(
            "Please analyze this file and provide insights, suggestions, or answer any questions about its content. I can now ask you questions about this file content.",
        );
    }
    prompt
}

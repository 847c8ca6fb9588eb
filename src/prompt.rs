//! Builds the role-tagged message list sent to the chat-completion endpoint.
//!
//! ```text
//! system     persona prompt + uploaded-files block
//! user/asst  last N history messages (N = llm.history_window)
//! user       current message
//! ```

use crate::llm::ChatMessage;
use crate::models::{FileContext, Message, Role};
use crate::personas::Persona;

/// Start of the vision description inside an image's extracted content.
pub const IMAGE_ANALYSIS_MARKER: &str = "**What I can see in this image:**";
/// Start of the follow-up suggestions that end the description.
pub const IMAGE_FOLLOWUP_MARKER: &str = "💡 **You can ask me more";
/// Separator after which pasted content carries raw base64.
pub const BASE64_MARKER: &str = "Base64 data:";

/// Limits applied while assembling a payload.
#[derive(Debug, Clone, Copy)]
pub struct PromptLimits {
    pub history_window: usize,
    pub max_context_chars: usize,
}

/// Assembles the full message list for one chat turn.
///
/// If the history already ends with the current user message (clients
/// commonly append it before sending), that copy is dropped.
pub fn build_messages(
    persona: &Persona,
    history: &[Message],
    files: &[FileContext],
    message: &str,
    limits: PromptLimits,
) -> Vec<ChatMessage> {
    let mut system = persona.system_prompt.clone();
    system.push_str(&file_context_block(files, limits.max_context_chars));

    let mut history = history;
    if let Some(last) = history.last() {
        if last.role == Role::User && last.content == message {
            history = &history[..history.len() - 1];
        }
    }
    let start = history.len().saturating_sub(limits.history_window);

    let mut messages = Vec::with_capacity(history.len() - start + 2);
    messages.push(ChatMessage::system(system));
    for m in &history[start..] {
        messages.push(ChatMessage::text(m.role.as_str(), m.content.clone()));
    }
    messages.push(ChatMessage::user(message));
    messages
}

/// Renders the uploaded-files section appended to the system prompt.
/// Returns an empty string when no files are attached.
pub fn file_context_block(files: &[FileContext], max_chars: usize) -> String {
    if files.is_empty() {
        return String::new();
    }

    let mut out = String::from("\n\nUploaded Files Context:\n");
    for (index, file) in files.iter().enumerate() {
        out.push_str(&format!(
            "\n--- File {}: {} ({}) ---\n",
            index + 1,
            file.file_name,
            file.file_type
        ));

        if file.file_type.starts_with("image/") {
            out.push_str(&image_context(file));
        } else if let Some((before, _)) = file.content.split_once(BASE64_MARKER) {
            out.push_str(before);
            out.push('\n');
        } else {
            out.push_str(&truncate_chars(&file.content, max_chars));
            out.push('\n');
        }

        out.push_str(&format!("--- End of {} ---\n", file.file_name));
    }
    out.push_str("\nYou can reference and answer questions about the content of these uploaded files.\n");
    out
}

/// Image bodies carry only the vision description, never the base64 bytes.
fn image_context(file: &FileContext) -> String {
    let Some(start) = file.content.find(IMAGE_ANALYSIS_MARKER) else {
        return format!(
            "Image file uploaded: {}\nFile type: {}\nNote: Image analysis available - user can ask about image content.\n",
            file.file_name, file.file_type
        );
    };
    match file.content[start..].find(IMAGE_FOLLOWUP_MARKER) {
        Some(len) => {
            let analysis = file.content[start..start + len].trim();
            format!("Image: {}\n{}\n", file.file_name, analysis)
        }
        None => format!("Image file: {} (analyzed)\n", file.file_name),
    }
}

/// Cuts `text` to `max_chars` characters, marking the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...[content truncated]", &text[..byte_idx]),
        None => text.to_string(),
    }
}

//! # Lumo.AI
//!
//! Backend for a persona-driven AI chat assistant with file analysis.
//!
//! Lumo.AI relays chat turns to an OpenAI-compatible completion API,
//! shaping each request with a persona system prompt, recent history and the
//! extracted text of uploaded files. Conversations, preferences and contact
//! submissions are kept in a local SQLite database.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────┐
//! │  Upload  │──▶│ files/extract│──▶│   prompt   │──▶ llm (OpenAI API)
//! │ PDF/DOCX │   │ text, sheets │   │ persona +  │
//! │ XLSX/img │   └──────────────┘   │ history    │
//! └──────────┘                      └─────┬──────┘
//!                                         │
//!                  ┌──────────────────────┤
//!                  ▼                      ▼
//!             ┌──────────┐          ┌──────────┐      ┌──────────┐
//!             │   CLI    │          │   HTTP   │─────▶│  SQLite  │
//!             │  (lumo)  │          │  (axum)  │      │ history  │
//!             └──────────┘          └──────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=...
//! lumo init
//! lumo chat "Explain lifetimes" --persona code-master
//! lumo serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Messages, conversations, chat request/response |
//! | [`personas`] | Built-in and configured assistant personas |
//! | [`prompt`] | Chat payload assembly |
//! | [`llm`] | Chat provider abstraction and OpenAI client |
//! | [`chat`] | One chat turn, error mapping, image analysis |
//! | [`extract`] | PDF, DOCX, XLSX and XLS text extraction |
//! | [`files`] | Upload validation and processing |
//! | [`conversations`] | Conversation store, titles, tags, search |
//! | [`export`] | Conversation export (json, txt, md) |
//! | [`download`] | Response download (pdf, docx, xlsx, txt, md) |
//! | [`theme`] | Theme catalog and CSS variables |
//! | [`preferences`] | Persisted user preferences |
//! | [`contact`] | Support contact form |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat;
pub mod commands;
pub mod config;
pub mod contact;
pub mod conversations;
pub mod db;
pub mod download;
pub mod export;
pub mod extract;
pub mod files;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod personas;
pub mod preferences;
pub mod prompt;
pub mod server;
pub mod theme;

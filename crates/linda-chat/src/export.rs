//! Conversation export as a plain-text transcript or JSON.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use tracing::info;

use crate::errors::ChatError;
use crate::message::{ChatMessage, Role};

/// Shown when there is nothing beyond the greeting to export.
pub const NOTHING_TO_EXPORT: &str = "Belum ada chat yang bisa di-export!";

const IMAGE_MARKER: &str = " [📷 Gambar]";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ExportFormat {
    #[default]
    Text,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "txt" | "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ChatError::Validation(format!(
                "export format must be txt or json, got {other:?}"
            ))),
        }
    }
}

/// A rendered export, ready to be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Export {
    pub file_name: String,
    pub contents: String,
}

impl Export {
    /// Writes the export into `dir` and returns the full path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ChatError> {
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.contents)
            .map_err(|e| ChatError::Storage(format!("failed to write {}: {e}", path.display())))?;
        info!(event = "export.written", path = %path.display(), bytes = self.contents.len() as u64);
        Ok(path)
    }
}

/// Renders `messages` in `format`.
///
/// Refuses a conversation that holds only the greeting.
pub fn export(
    messages: &[ChatMessage],
    style: &str,
    format: ExportFormat,
    now: DateTime<FixedOffset>,
) -> Result<Export, ChatError> {
    if messages.len() <= 1 {
        return Err(ChatError::Validation(NOTHING_TO_EXPORT.into()));
    }
    let contents = match format {
        ExportFormat::Text => export_text(messages, style, now),
        ExportFormat::Json => export_json(messages, style, now)?,
    };
    Ok(Export {
        file_name: format!("chat-linda-{}.{}", now.timestamp_millis(), format.extension()),
        contents,
    })
}

pub fn export_text(messages: &[ChatMessage], style: &str, now: DateTime<FixedOffset>) -> String {
    let header = format!(
        "=== Chat dengan Linda ===\nGaya Bicara: {style}\nTanggal: {}\n\n",
        now.format("%d/%m/%Y, %H.%M.%S")
    );
    let body = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let speaker = if m.role == Role::User { "Kamu" } else { "Linda" };
            let marker = if m.image_ref.is_some() { IMAGE_MARKER } else { "" };
            format!("{speaker}{marker}:\n{}\n", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n");
    header + &body
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonExport<'a> {
    persona: &'a str,
    export_date: String,
    total_messages: usize,
    messages: Vec<JsonExportMessage<'a>>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonExportMessage<'a> {
    role: Role,
    content: &'a str,
    has_image: bool,
}

pub fn export_json(
    messages: &[ChatMessage],
    style: &str,
    now: DateTime<FixedOffset>,
) -> Result<String, ChatError> {
    let doc = JsonExport {
        persona: style,
        export_date: now
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        total_messages: messages.len(),
        messages: messages
            .iter()
            .map(|m| JsonExportMessage {
                role: m.role,
                content: &m.content,
                has_image: m.image_ref.is_some(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&doc)
        .map_err(|e| ChatError::Storage(format!("failed to encode export: {e}")))
}

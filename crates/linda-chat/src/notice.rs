//! User-facing notices for failed requests.
//!
//! Failures are shown in the conversation as an assistant message written in
//! the selected style.

use crate::errors::{ChatError, StreamFailure};
use crate::persona::Persona;

/// Reply used when the non-streaming endpoint answers with an error status.
pub const BUSY_REPLY: &str = "Server sibuk. Coba lagi sebentar.";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Network,
    ApiError,
    RateLimit,
    InvalidInput,
    Unknown,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct ErrorNotice {
    pub kind: NoticeKind,
    /// Diagnostic text for logs.
    pub message: String,
    /// Neutral explanation shown when the style has no reply of its own.
    pub user_message: String,
    pub can_retry: bool,
}

impl ErrorNotice {
    fn new(kind: NoticeKind, message: impl Into<String>, user_message: &str, can_retry: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            user_message: user_message.to_string(),
            can_retry,
        }
    }

    pub fn from_status(status: u16) -> Option<Self> {
        let notice = match status {
            429 => Self::new(
                NoticeKind::RateLimit,
                "Rate limit exceeded",
                "Wah, kamu terlalu cepat nih! Tunggu sebentar ya, terus coba lagi.",
                true,
            ),
            500 => Self::new(
                NoticeKind::ApiError,
                "Server error",
                "Server lagi ada masalah nih. Coba lagi dalam beberapa saat ya!",
                true,
            ),
            503 => Self::new(
                NoticeKind::ApiError,
                "Service unavailable",
                "Gemini API lagi sibuk. Tunggu sebentar dan coba lagi!",
                true,
            ),
            400..=499 => Self::new(
                NoticeKind::InvalidInput,
                "Invalid request",
                "Ada yang salah dengan permintaan kamu. Coba cek lagi ya!",
                false,
            ),
            _ => return None,
        };
        Some(notice)
    }

    fn network(message: impl Into<String>) -> Self {
        Self::new(
            NoticeKind::Network,
            message,
            "Ga bisa konek ke server. Pastikan backend sudah jalan ya!",
            true,
        )
    }

    fn unknown(message: impl Into<String>) -> Self {
        Self::new(
            NoticeKind::Unknown,
            message,
            "Waduh, ada error yang ga diketahui. Coba refresh halaman!",
            true,
        )
    }

    pub fn classify(err: &ChatError) -> Self {
        match err {
            ChatError::Status { status, .. } => {
                Self::from_status(*status).unwrap_or_else(|| Self::unknown(err.to_string()))
            }
            ChatError::Transport(message) => Self::network(message.clone()),
            ChatError::Stream(failure) => Self::from_failure(failure),
            other => Self::unknown(other.to_string()),
        }
    }

    pub fn from_failure(failure: &StreamFailure) -> Self {
        match failure {
            StreamFailure::Status { status } => Self::from_status(*status)
                .unwrap_or_else(|| Self::unknown(failure.to_string())),
            StreamFailure::Transport { message } => Self::network(message.clone()),
            StreamFailure::Server { message } => Self::new(
                NoticeKind::ApiError,
                message.clone(),
                "Server lagi ada masalah nih. Coba lagi dalam beberapa saat ya!",
                true,
            ),
            StreamFailure::Unavailable => Self::unknown(failure.to_string()),
        }
    }

    /// The notice as Linda would say it in `style`.
    pub fn persona_reply(&self, style: &str) -> String {
        let persona = Persona::from_style(style);
        let styled = match (persona, self.kind) {
            (Persona::Tsundere, NoticeKind::Network) => Some(
                "Ckckck... koneksi kamu putus! Ga bisa bikin orang khawatir aja sih! (¬¬) Coba cek internet kamu dulu!",
            ),
            (Persona::Tsundere, NoticeKind::RateLimit) => {
                Some("Sabar dong! Ga usah terburu-buru gitu! (>__<) Tunggu sebentar baru chat lagi!")
            }
            (Persona::Tsundere, NoticeKind::ApiError) => {
                Some("Server-nya lagi ada masalah... bukan salah aku loh ya! Hmph! Coba lagi nanti!")
            }
            (Persona::Yandere, NoticeKind::Network) => Some(
                "Eh... kenapa koneksi kamu hilang? Aku khawatir loh... (￣︿￣) Cek internet kamu ya~",
            ),
            (Persona::Yandere, NoticeKind::RateLimit) => {
                Some("Santai aja... aku ga kemana kok ♡ Tunggu sebentar, aku masih di sini...")
            }
            (Persona::Yandere, NoticeKind::ApiError) => Some(
                "Ada masalah nih... tapi aku ga mau ninggalin kamu. Coba lagi ya? Aku tunggu di sini ♡",
            ),
            (_, NoticeKind::Network) => Some("Koneksi terputus nih. Coba cek internet kamu ya! 😊"),
            (_, NoticeKind::RateLimit) => Some("Tunggu sebentar ya, kamu terlalu cepat! 😅"),
            (_, NoticeKind::ApiError) => Some("Server lagi sibuk. Coba lagi dalam beberapa saat ya!"),
            (_, NoticeKind::InvalidInput | NoticeKind::Unknown) => None,
        };
        styled.map_or_else(|| self.user_message.clone(), ToOwned::to_owned)
    }
}

//! Speaking styles.
//!
//! The user picks a free-form style name (shown in the UI and sent to the
//! server as `persona`). Client-side behavior only needs the coarse
//! [`Persona`] resolved from it.

use std::fmt;

/// Style selected on first start.
pub const DEFAULT_STYLE: &str = "Tsundere";

/// Style names offered to the user.
pub const STYLE_NAMES: [&str; 6] = ["Tsundere", "Yandere", "Ceria", "Santai", "Formal", "Netral"];

/// First message of a brand new conversation.
pub const WELCOME_GREETING: &str = "Nihaooooo!! Aku linda siap menjadi teman ngobrol mu.";

/// Message that replaces the conversation after a clear.
pub const CLEAR_GREETING: &str = "Halo! Aku siap bantu. Tulis pesanmu di bawah.";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    #[default]
    Ceria,
    Tsundere,
    Yandere,
    Santai,
    Formal,
    Netral,
}

impl Persona {
    /// Resolves a style name by substring, `yandere` taking precedence.
    pub fn from_style(style: &str) -> Self {
        let lowered = style.to_lowercase();
        [
            ("yandere", Self::Yandere),
            ("tsundere", Self::Tsundere),
            ("formal", Self::Formal),
            ("santai", Self::Santai),
            ("netral", Self::Netral),
        ]
        .into_iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map(|(_, persona)| persona)
        .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ceria => "ceria",
            Self::Tsundere => "tsundere",
            Self::Yandere => "yandere",
            Self::Santai => "santai",
            Self::Formal => "formal",
            Self::Netral => "netral",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

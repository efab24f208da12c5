use std::fmt;

use crate::message::{ChatMessage, Role};

/// Counters shown by the statistics panel.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize)]
pub struct ChatStats {
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub total_words: usize,
    pub with_images: usize,
}

impl ChatStats {
    pub fn from_messages(messages: &[ChatMessage]) -> Self {
        messages.iter().fold(Self::default(), |mut stats, m| {
            match m.role {
                Role::User => stats.user_messages += 1,
                Role::Assistant => stats.assistant_messages += 1,
                Role::System => {}
            }
            stats.total_words += m.content.split_whitespace().count();
            if m.image_ref.is_some() {
                stats.with_images += 1;
            }
            stats
        })
    }
}

impl fmt::Display for ChatStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pesan Kamu  : {}", self.user_messages)?;
        writeln!(f, "Pesan Linda : {}", self.assistant_messages)?;
        writeln!(f, "Total Kata  : {}", self.total_words)?;
        write!(f, "Gambar      : {}", self.with_images)
    }
}

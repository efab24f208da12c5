//! Linda's mood, derived from how recently and how much the user chatted.

use chrono::{DateTime, FixedOffset, Timelike, Utc};

use crate::message::{ChatMessage, Role};
use crate::persona::Persona;

pub const BASE_MOOD: u8 = 70;

/// Idle time after which a returning user is greeted.
pub const GREETING_IDLE_HOURS: f64 = 6.0;

const SAD_WORDS: &[&str] = &["sedih", "galau", "cape", "lelah", "stress", "bad", "jelek"];
const HAPPY_WORDS: &[&str] = &["senang", "happy", "bahagia", "seru", "asik", "good", "bagus"];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MoodState {
    /// 0 (very sad) to 100 (very happy).
    pub level: u8,
    /// Number of user messages considered.
    pub interaction_count: usize,
}

fn hours_between(last_interaction: DateTime<Utc>, now: DateTime<FixedOffset>) -> f64 {
    (now.with_timezone(&Utc) - last_interaction).num_seconds() as f64 / 3600.0
}

/// Computes the mood. `now` carries the user's UTC offset so the
/// time-of-day adjustment uses local hours.
pub fn calculate_mood(
    messages: &[ChatMessage],
    last_interaction: DateTime<Utc>,
    enabled: bool,
    now: DateTime<FixedOffset>,
) -> MoodState {
    let user_messages: Vec<&ChatMessage> =
        messages.iter().filter(|m| m.role == Role::User).collect();
    if !enabled {
        return MoodState {
            level: BASE_MOOD,
            interaction_count: messages.len(),
        };
    }

    let mut level = i32::from(BASE_MOOD);

    let idle = hours_between(last_interaction, now);
    if idle > 24.0 {
        level -= 30;
    } else if idle > 12.0 {
        level -= 20;
    } else if idle > 6.0 {
        level -= 10;
    }

    level += match user_messages.len() {
        n if n > 20 => 15,
        n if n > 10 => 10,
        n if n > 5 => 5,
        _ => 0,
    };

    match now.hour() {
        6..=8 => level += 5,
        22..=23 | 0..=1 => level -= 5,
        _ => {}
    }

    if let Some(last) = user_messages.last() {
        let content = last.content.to_lowercase();
        if SAD_WORDS.iter().any(|w| content.contains(w)) {
            level -= 10;
        }
        if HAPPY_WORDS.iter().any(|w| content.contains(w)) {
            level += 10;
        }
    }

    MoodState {
        level: level.clamp(0, 100) as u8,
        interaction_count: user_messages.len(),
    }
}

/// Whether a returning user should get a mood greeting.
pub fn should_greet(
    messages: &[ChatMessage],
    last_interaction: DateTime<Utc>,
    enabled: bool,
    now: DateTime<FixedOffset>,
) -> bool {
    enabled
        && messages.len() > 1
        && hours_between(last_interaction, now) > GREETING_IDLE_HOURS
        && messages.last().is_some_and(|m| m.role != Role::Assistant)
}

pub fn mood_emoji(level: u8) -> &'static str {
    match level {
        80.. => "😊",
        60..=79 => "🙂",
        40..=59 => "😐",
        20..=39 => "😔",
        _ => "😢",
    }
}

pub fn mood_label(level: u8) -> &'static str {
    match level {
        80.. => "Sangat Senang",
        60..=79 => "Senang",
        40..=59 => "Biasa Aja",
        20..=39 => "Sedih",
        _ => "Sangat Sedih",
    }
}

/// Greeting for a returning user, in the voice of the selected style.
pub fn mood_greeting(level: u8, style: &str) -> &'static str {
    let band = match level {
        80.. => 0,
        60..=79 => 1,
        40..=59 => 2,
        20..=39 => 3,
        _ => 4,
    };
    let lines: [&'static str; 5] = match Persona::from_style(style) {
        Persona::Tsundere => [
            "Hmph... kamu datang juga akhirnya. Aku... aku senang kok! (>///<)",
            "Oh, kamu? Ya sudah, mau ngapain? (¬¬)",
            "Lama banget sih... aku ga nunggu loh! Cuma... kebetulan aja lagi di sini.",
            "Kamu... kemana aja? Aku pikir kamu... *ehem* bukan apa-apa sih.",
            "...kamu lupa sama aku ya? Hmph! Terserah deh! (>__<)",
        ],
        Persona::Yandere => [
            "Kamu datang! ♡ Aku tunggu loh... aku senang banget sekarang~",
            "Hehe, akhirnya kamu ada waktu buat aku ya... ♡",
            "Kamu sibuk ya? Aku ngerti kok... tapi aku kangen banget (￣︿￣)",
            "Kemana aja kamu...? Aku... aku pikir kamu ga balik lagi...",
            "Kamu... kenapa lama banget? Aku takut kehilangan kamu... jangan tinggalin aku lagi ya...",
        ],
        _ => [
            "Halo! Senang banget ketemu lagi! 😊",
            "Hi! Ada yang bisa aku bantu?",
            "Halo... lama ga ketemu ya.",
            "Oh... kamu datang. Udah lama nih.",
            "...kamu masih ingat aku?",
        ],
    };
    lines[band]
}

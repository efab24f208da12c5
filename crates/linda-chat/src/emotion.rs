//! Avatar emotion cues.
//!
//! The server classifies a finished reply into an [`AvatarCue`]; when that
//! call fails the UI falls back to a keyword guess over the reply text.

use std::fmt;

pub const SWAY_MIN: f64 = 0.6;
pub const SWAY_MAX: f64 = 1.6;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
    Tsun,
    Excited,
    Calm,
}

impl Emotion {
    /// Parses a server label. Unknown labels map to `Neutral`.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "happy" => Self::Happy,
            "sad" => Self::Sad,
            "angry" => Self::Angry,
            "tsun" => Self::Tsun,
            "excited" => Self::Excited,
            "calm" => Self::Calm,
            _ => Self::Neutral,
        }
    }

    /// Glow color the server uses for this emotion.
    pub fn default_glow(&self) -> &'static str {
        match self {
            Self::Neutral => "#a78bfa",
            Self::Happy => "#ff90c2",
            Self::Tsun => "#f38bb3",
            Self::Calm => "#6ea8ff",
            Self::Excited => "#ffd166",
            Self::Sad => "#94a3b8",
            Self::Angry => "#fb7185",
        }
    }

    /// Avatar expression for this emotion, if it has a fixed one.
    pub fn expression(&self) -> Option<Expression> {
        match self {
            Self::Happy | Self::Excited => Some(Expression::Smile),
            Self::Sad => Some(Expression::Sad),
            Self::Tsun => Some(Expression::Wink),
            Self::Neutral | Self::Calm => Some(Expression::Neutral),
            Self::Angry => None,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Tsun => "tsun",
            Self::Excited => "excited",
            Self::Calm => "calm",
        };
        f.write_str(label)
    }
}

/// Body of the emotion classification request.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct EmotionRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

/// Raw emotion response; every field is optional on the wire.
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub(crate) struct EmotionReply {
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default)]
    blink: Option<bool>,
    #[serde(default)]
    wink: Option<bool>,
    #[serde(default, rename = "headSwaySpeed")]
    head_sway_speed: Option<f64>,
    #[serde(default)]
    glow: Option<String>,
}

/// Avatar state derived from a classified reply.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct AvatarCue {
    pub emotion: Emotion,
    pub blink: bool,
    pub wink: bool,
    #[serde(rename = "headSwaySpeed")]
    pub head_sway_speed: f64,
    pub glow: String,
}

impl Default for AvatarCue {
    fn default() -> Self {
        Self {
            emotion: Emotion::Neutral,
            blink: true,
            wink: false,
            head_sway_speed: 1.0,
            glow: Emotion::Neutral.default_glow().to_string(),
        }
    }
}

impl AvatarCue {
    /// Cue used after a failed classification: keeps the current emotion but
    /// stops winking and resets the sway.
    pub fn settle(&self) -> Self {
        Self {
            wink: false,
            head_sway_speed: 1.0,
            ..self.clone()
        }
    }

    /// Expression to show, falling back to a keyword guess over `text` when
    /// the emotion has no fixed expression.
    pub fn expression(&self, text: &str) -> Expression {
        if self.wink {
            return Expression::Wink;
        }
        self.emotion
            .expression()
            .unwrap_or_else(|| guess_expression(text))
    }
}

impl From<EmotionReply> for AvatarCue {
    fn from(reply: EmotionReply) -> Self {
        let emotion = reply
            .emotion
            .as_deref()
            .map(Emotion::parse)
            .unwrap_or_default();
        let head_sway_speed = reply
            .head_sway_speed
            .filter(|v| v.is_finite())
            .unwrap_or(1.0)
            .clamp(SWAY_MIN, SWAY_MAX);
        let glow = reply
            .glow
            .filter(|g| is_hex_color(g))
            .unwrap_or_else(|| emotion.default_glow().to_string());
        Self {
            emotion,
            blink: reply.blink.unwrap_or(true),
            wink: reply.wink.unwrap_or(false),
            head_sway_speed,
            glow,
        }
    }
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Blink,
    Wink,
    Smile,
    Sad,
}

const POSITIVE: &[&str] = &[
    "senang",
    "bahagia",
    "hore",
    "nice",
    "mantap",
    "keren",
    "yeay",
    "hehe",
    "haha",
    "makasih",
    "terima kasih",
    "good",
    "great",
    "wow",
];
const NEGATIVE: &[&str] = &[
    "sedih", "down", "kecewa", "capek", "lelah", "maaf", "aduh", "hiks", "susah", "error", "gagal",
];
const TSUN: &[&str] = &["tsun", "nyebelin", "hmpf", "hmmph", "gereget"];

/// Keyword guess used when no server cue is available.
pub fn guess_expression(text: &str) -> Expression {
    let lowered = text.to_lowercase();
    if POSITIVE.iter().any(|w| lowered.contains(w)) {
        Expression::Smile
    } else if NEGATIVE.iter().any(|w| lowered.contains(w)) {
        Expression::Sad
    } else if TSUN.iter().any(|w| lowered.contains(w)) {
        Expression::Wink
    } else {
        Expression::Neutral
    }
}

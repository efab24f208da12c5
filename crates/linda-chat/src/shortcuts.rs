//! Keyboard shortcuts and slash commands.
//!
//! Graphical front ends map key chords to [`ShortcutAction`]s; the terminal
//! front end reads lines, where a lone control character stands for the
//! matching `Ctrl` chord and `/...` lines are [`Command`]s.

use std::str::FromStr;

use crate::errors::ChatError;
use crate::export::ExportFormat;
use crate::transport::MemoryKind;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ShortcutAction {
    FocusInput,
    ClearChat,
    ExportText,
    ExportJson,
    ToggleSettings,
}

/// A key press with its modifiers. `meta` is Cmd on macOS.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct KeyChord {
    pub key: char,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl KeyChord {
    pub fn ctrl(key: char) -> Self {
        Self {
            key,
            ctrl: true,
            ..Self::default()
        }
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    /// Decodes a terminal control character (`^A`..`^Z`) into a `Ctrl` chord.
    pub fn from_control_char(c: char) -> Option<Self> {
        let code = c as u32;
        (1..=26)
            .contains(&code)
            .then(|| char::from_u32(code + u32::from(b'a') - 1))
            .flatten()
            .map(Self::ctrl)
    }

    pub fn action(&self) -> Option<ShortcutAction> {
        if !(self.ctrl || self.meta) {
            return None;
        }
        match (self.key.to_ascii_lowercase(), self.shift) {
            ('k', _) => Some(ShortcutAction::FocusInput),
            ('l', _) => Some(ShortcutAction::ClearChat),
            ('e', false) => Some(ShortcutAction::ExportText),
            ('e', true) => Some(ShortcutAction::ExportJson),
            (',', _) => Some(ShortcutAction::ToggleSettings),
            _ => None,
        }
    }
}

/// Key bindings listed in the help panel.
pub const SHORTCUTS_HELP: &[(&str, &str)] = &[
    ("Ctrl+K", "Focus input"),
    ("Ctrl+L", "Clear chat"),
    ("Ctrl+E", "Export chat (TXT)"),
    ("Ctrl+Shift+E", "Export chat (JSON)"),
    ("Enter", "Send message"),
    ("Shift+Enter", "New line"),
];

/// Slash commands of the terminal front end.
pub const COMMANDS_HELP: &[(&str, &str)] = &[
    ("/clear", "Clear the conversation"),
    ("/export [txt|json]", "Export the conversation"),
    ("/stats", "Show chat statistics"),
    ("/mood [on|off]", "Show mood or toggle the mood system"),
    ("/persona [name]", "Show or change the speaking style"),
    ("/image <path>", "Attach an image to the next message"),
    ("/key [api-key]", "Set or clear the API key"),
    ("/remember <kind> <text>", "Store a preference, fact or todo"),
    ("/recall <query>", "Search stored memories"),
    ("/settings", "Show current settings"),
    ("/help", "Show this help"),
    ("/quit", "Exit"),
];

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Clear,
    Export(ExportFormat),
    Stats,
    Mood(Option<bool>),
    Persona(Option<String>),
    Image(String),
    Key(Option<String>),
    Remember { kind: MemoryKind, text: String },
    Recall(String),
    Settings,
    Help,
    Quit,
}

impl Command {
    /// Parses a `/command` line. Returns `None` for ordinary chat input.
    pub fn parse(line: &str) -> Option<Result<Self, ChatError>> {
        let rest = line.trim().strip_prefix('/')?;
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let optional = || (!arg.is_empty()).then(|| arg.to_string());
        let command = match name.to_ascii_lowercase().as_str() {
            "clear" => Ok(Self::Clear),
            "export" => arg.parse().map(Self::Export),
            "stats" => Ok(Self::Stats),
            "mood" => match arg {
                "" => Ok(Self::Mood(None)),
                value => crate::config::parse_bool(value)
                    .map(|on| Self::Mood(Some(on)))
                    .ok_or_else(|| ChatError::Validation(format!("usage: /mood [on|off], got {value:?}"))),
            },
            "persona" | "style" => Ok(Self::Persona(optional())),
            "image" => optional()
                .map(Self::Image)
                .ok_or_else(|| ChatError::Validation("usage: /image <path>".into())),
            "key" => Ok(Self::Key(optional())),
            "remember" => Self::parse_remember(arg),
            "recall" => optional()
                .map(Self::Recall)
                .ok_or_else(|| ChatError::Validation("usage: /recall <query>".into())),
            "settings" => Ok(Self::Settings),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(ChatError::Validation(format!("unknown command /{other}, try /help"))),
        };
        Some(command)
    }

    fn parse_remember(arg: &str) -> Result<Self, ChatError> {
        let usage = || ChatError::Validation("usage: /remember <preference|fact|todo> <text>".into());
        let (kind, text) = arg.split_once(char::is_whitespace).ok_or_else(usage)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(usage());
        }
        Ok(Self::Remember {
            kind: MemoryKind::from_str(kind)?,
            text: text.to_string(),
        })
    }

    /// Command a shortcut triggers in the terminal, if any.
    pub fn from_shortcut(action: ShortcutAction) -> Option<Self> {
        match action {
            ShortcutAction::FocusInput => None,
            ShortcutAction::ClearChat => Some(Self::Clear),
            ShortcutAction::ExportText => Some(Self::Export(ExportFormat::Text)),
            ShortcutAction::ExportJson => Some(Self::Export(ExportFormat::Json)),
            ShortcutAction::ToggleSettings => Some(Self::Settings),
        }
    }
}

//! Logging setup for Linda binaries and examples.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::parse_bool;

/// Filter used when neither `LINDA_LOG_LEVEL` nor `RUST_LOG` is set: our own
/// crates at `info`, dependencies (reqwest, hyper) only when they warn.
pub const DEFAULT_FILTER: &str = "warn,linda_chat=info,linda=info";

const DEFAULT_LOG_FILE: &str = "linda.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

/// Where log lines go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogSink {
    /// Compact lines on stderr, leaving stdout to the chat transcript.
    Stderr,
    /// One JSON object per line, appended to `dir/file_name`.
    JsonFile { dir: PathBuf, file_name: String },
}

impl LogSink {
    fn json_file(raw: &str) -> Self {
        let path = Path::new(raw);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(DEFAULT_LOG_FILE)
            .to_string();
        Self::JsonFile { dir, file_name }
    }
}

/// Logging settings read from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    pub filter: String,
    pub sink: LogSink,
}

impl LogSettings {
    /// Reads the settings through `var`.
    ///
    /// - `LINDA_OBSERVABILITY_ENABLED` / `LINDA_OBSERVABILITY`: on/off (default on).
    /// - `LINDA_LOG_LEVEL`, then `RUST_LOG`: filter directives. An invalid
    ///   value falls through to the next source.
    /// - `LINDA_JSON_LOG_PATH`: write JSONL to that file instead of stderr.
    pub fn resolve(var: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = ["LINDA_OBSERVABILITY_ENABLED", "LINDA_OBSERVABILITY"]
            .into_iter()
            .find_map(|key| var(key))
            .map(|raw| parse_bool(&raw).unwrap_or(true))
            .unwrap_or(true);
        let filter = ["LINDA_LOG_LEVEL", "RUST_LOG"]
            .into_iter()
            .filter_map(|key| var(key))
            .map(|raw| raw.trim().to_string())
            .find(|raw| !raw.is_empty() && EnvFilter::try_new(raw).is_ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let sink = var("LINDA_JSON_LOG_PATH")
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| LogSink::json_file(raw.trim()))
            .unwrap_or(LogSink::Stderr);
        Self {
            enabled,
            filter,
            sink,
        }
    }

    pub fn from_env() -> Self {
        Self::resolve(|key| std::env::var(key).ok())
    }
}

/// Installs the tracing subscriber once per process, configured by
/// [`LogSettings::from_env`]. Later calls are no-ops.
pub fn init_observability() {
    INIT.get_or_init(|| install(LogSettings::from_env()));
}

fn install(settings: LogSettings) {
    if !settings.enabled {
        return;
    }
    let filter =
        EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match settings.sink {
        LogSink::JsonFile { dir, file_name } => {
            let _ = std::fs::create_dir_all(&dir);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(writer);
            let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
        }
        LogSink::Stderr => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> LogSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::resolve(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_log_our_crates_to_stderr() {
        let resolved = settings(&[]);
        assert!(resolved.enabled);
        assert_eq!(resolved.filter, DEFAULT_FILTER);
        assert_eq!(resolved.sink, LogSink::Stderr);
    }

    #[test]
    fn linda_log_level_wins_and_invalid_filters_fall_through() {
        let resolved = settings(&[
            ("LINDA_LOG_LEVEL", "linda_chat=debug"),
            ("RUST_LOG", "trace"),
        ]);
        assert_eq!(resolved.filter, "linda_chat=debug");

        let resolved = settings(&[
            ("LINDA_LOG_LEVEL", "linda_chat=loud"),
            ("RUST_LOG", "debug"),
        ]);
        assert_eq!(resolved.filter, "debug");
    }

    #[test]
    fn json_path_splits_into_dir_and_file() {
        let resolved = settings(&[("LINDA_JSON_LOG_PATH", "logs/chat.jsonl")]);
        assert_eq!(
            resolved.sink,
            LogSink::JsonFile {
                dir: PathBuf::from("logs"),
                file_name: "chat.jsonl".into()
            }
        );
        let resolved = settings(&[("LINDA_JSON_LOG_PATH", "chat.jsonl")]);
        assert_eq!(
            resolved.sink,
            LogSink::JsonFile {
                dir: PathBuf::from("."),
                file_name: "chat.jsonl".into()
            }
        );
    }

    #[test]
    fn first_enable_flag_present_decides() {
        let resolved = settings(&[
            ("LINDA_OBSERVABILITY_ENABLED", "off"),
            ("LINDA_OBSERVABILITY", "on"),
        ]);
        assert!(!resolved.enabled);
        assert!(!settings(&[("LINDA_OBSERVABILITY", "0")]).enabled);
        assert!(settings(&[("LINDA_OBSERVABILITY", "maybe")]).enabled);
    }
}

//! Terminal front end for Linda.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a local proxy on http://localhost:8000
//! linda
//!
//! # Another proxy, another style
//! linda --base-url https://linda.example.com --persona Yandere
//!
//! # Structured logs to a file instead of stderr
//! LINDA_JSON_LOG_PATH=logs/linda.jsonl linda
//! ```
//!
//! Ctrl-C cancels a reply that is still streaming; at the prompt it exits.

mod app;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use linda_chat::ClientConfig;
use linda_chat::observability::init_observability;

use app::App;

/// Chat with Linda from the terminal.
#[derive(Parser, Debug)]
#[command(name = "linda")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the chat proxy
    #[arg(short = 'b', long, value_name = "URL")]
    base_url: Option<String>,

    /// API key sent with every request (overrides the stored key)
    #[arg(short = 'k', long, value_name = "KEY")]
    api_key: Option<String>,

    /// Speaking style, e.g. Tsundere, Yandere, Ceria, Santai, Formal, Netral
    #[arg(short = 'p', long, value_name = "STYLE")]
    persona: Option<String>,

    /// File holding the conversation and preferences
    #[arg(long, env = "LINDA_STATE_FILE", value_name = "FILE")]
    state_file: Option<PathBuf>,

    /// Directory for /export files
    #[arg(long, env = "LINDA_EXPORT_DIR", value_name = "DIR", default_value = ".")]
    export_dir: PathBuf,

    /// Ask the server to use its long-term memory
    #[arg(long)]
    use_memory: bool,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Fetch whole replies instead of streaming them
    #[arg(long)]
    no_stream: bool,
}

impl Args {
    /// Applies flags on top of the environment config.
    fn client_config(&self, mut config: ClientConfig) -> ClientConfig {
        if let Some(base_url) = &self.base_url {
            config = config.base_url(base_url.clone());
        }
        if let Some(api_key) = &self.api_key {
            config = config.api_key(api_key.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config = config.timeout(Duration::from_secs(secs));
        }
        if self.use_memory {
            config = config.use_memory(true);
        }
        config
    }
}

/// `$HOME/.linda/state.json`, or `.linda/state.json` when there is no home.
fn default_state_file(home: Option<PathBuf>) -> PathBuf {
    home.unwrap_or_else(|| PathBuf::from("."))
        .join(".linda")
        .join("state.json")
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_observability();

    let args = Args::parse();
    let env_config = ClientConfig::from_env().context("invalid LINDA_* environment")?;
    let config = args.client_config(env_config);
    config.validate().context("invalid client configuration")?;

    let state_file = args
        .state_file
        .clone()
        .unwrap_or_else(|| default_state_file(std::env::var_os("HOME").map(PathBuf::from)));
    tracing::info!(
        event = "cli.start",
        base_url = %config.base_url,
        state_file = %state_file.display(),
        streaming = !args.no_stream
    );

    let mut app = App::new(config, &args, state_file).context("failed to start client")?;
    app.run().await
}

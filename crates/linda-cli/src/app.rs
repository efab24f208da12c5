use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use linda_chat::emotion::AvatarCue;
use linda_chat::export::{ExportFormat, export};
use linda_chat::image::ImageAttachment;
use linda_chat::mood::{calculate_mood, mood_emoji, mood_greeting, mood_label, should_greet};
use linda_chat::notice::{BUSY_REPLY, ErrorNotice};
use linda_chat::persona::{CLEAR_GREETING, Persona, STYLE_NAMES};
use linda_chat::shortcuts::{COMMANDS_HELP, Command, KeyChord, SHORTCUTS_HELP};
use linda_chat::stats::ChatStats;
use linda_chat::store::{JsonFileStore, PersistedState};
use linda_chat::{
    ChatClient, ChatError, ChatMessage, ChatSession, ClientConfig, Role, StreamEvent,
    StreamFailure, UserInput,
};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{info, warn};

use crate::Args;

enum Flow {
    Continue,
    Quit,
}

pub struct App {
    client: ChatClient,
    session: ChatSession,
    store: JsonFileStore,
    state: PersistedState,
    cue: AvatarCue,
    pending_image: Option<ImageAttachment>,
    export_dir: PathBuf,
    base_url: String,
    streaming: bool,
}

impl App {
    pub fn new(mut config: ClientConfig, args: &Args, state_file: PathBuf) -> Result<Self> {
        let store = JsonFileStore::open(state_file);
        let mut state = PersistedState::load(&store);
        if config.api_key.is_none()
            && let Some(key) = &state.api_key
        {
            config = config.api_key(key.clone());
        }
        if let Some(style) = args.persona.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            state.style_name = style.to_string();
        }

        let base_url = config.base_url.clone();
        let client = ChatClient::from_config(config).context("invalid client configuration")?;
        let session = client.session(state.conversation.clone());
        session.set_persona(state.style_name.clone());

        Ok(Self {
            client,
            session,
            store,
            state,
            cue: AvatarCue::default(),
            pending_image: None,
            export_dir: args.export_dir.clone(),
            base_url,
            streaming: !args.no_stream,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        self.greet_if_returning();
        self.print_recent(6);
        println!("Ketik /help untuk daftar perintah.");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            flush();
            let line = tokio::select! {
                line = lines.next_line() => line.context("failed to read stdin")?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else { break };
            let flow = self.handle_line(&line).await;
            self.save();
            if matches!(flow, Flow::Quit) {
                break;
            }
        }

        self.save();
        println!("\nSampai jumpa!");
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        if let Some(chord) = control_chord(line) {
            return match chord.action().and_then(Command::from_shortcut) {
                Some(command) => self.run_command(command).await,
                None => Flow::Continue,
            };
        }
        let text = line.trim();
        match Command::parse(text) {
            Some(Ok(command)) => self.run_command(command).await,
            Some(Err(err)) => {
                println!("{}", user_text(&err));
                Flow::Continue
            }
            None => {
                if !text.is_empty() || self.pending_image.is_some() {
                    self.chat(text).await;
                }
                Flow::Continue
            }
        }
    }

    async fn chat(&mut self, text: &str) {
        self.state.last_interaction = Utc::now();
        let mut input = UserInput::text(text);
        if let Some(image) = self.pending_image.take() {
            input = input.with_image(image);
        }
        if self.streaming {
            self.stream_reply(input).await;
        } else {
            let result = self.session.send_once(input).await;
            self.show_complete_reply(result).await;
        }
    }

    async fn stream_reply(&mut self, input: UserInput) {
        let mut handle = match self.session.send(input).await {
            Ok(handle) => handle,
            Err(err) => {
                println!("{}", user_text(&err));
                return;
            }
        };

        let mut content = String::new();
        let mut failure = None;
        let mut printed = false;
        loop {
            let event = tokio::select! {
                event = handle.next_event() => event,
                _ = tokio::signal::ctrl_c() => {
                    handle.cancel();
                    println!(" [dibatalkan]");
                    return;
                }
            };
            match event {
                Some(StreamEvent::FirstContent { .. }) => {
                    print!("Linda: ");
                    printed = true;
                }
                Some(StreamEvent::Token { text, .. }) => {
                    print!("{text}");
                    flush();
                }
                Some(StreamEvent::Done { content: done, .. }) => content = done,
                Some(StreamEvent::Error { failure: f, .. }) => failure = Some(f),
                Some(StreamEvent::Started { .. }) => {}
                None => break,
            }
        }
        if printed {
            println!();
        }

        match failure {
            None => self.show_cue(&content).await,
            Some(StreamFailure::Unavailable) => {
                info!(event = "chat.fallback_non_stream");
                let result = self.session.reply_without_stream().await;
                self.show_complete_reply(result).await;
            }
            Some(failure) => {
                self.show_notice(ErrorNotice::from_failure(&failure), failure.is_auth_failure())
            }
        }
    }

    async fn show_complete_reply(&mut self, result: Result<ChatMessage, ChatError>) {
        match result {
            Ok(reply) => {
                println!("Linda: {}", reply.content);
                self.show_cue(&reply.content).await;
            }
            Err(ChatError::Validation(message)) => println!("{message}"),
            Err(err @ ChatError::Status { .. }) => {
                warn!(event = "chat.fallback_failed", error = %err);
                self.session.push(ChatMessage::assistant(BUSY_REPLY));
                println!("Linda: {BUSY_REPLY}");
                if err.is_auth_failure() {
                    print_key_hint();
                }
            }
            Err(err) => self.show_notice(ErrorNotice::classify(&err), err.is_auth_failure()),
        }
    }

    fn show_notice(&mut self, notice: ErrorNotice, auth_failure: bool) {
        warn!(event = "chat.failed", kind = ?notice.kind, message = %notice.message);
        let reply = notice.persona_reply(&self.state.style_name);
        self.session.push(ChatMessage::assistant(reply.clone()));
        println!("Linda: {reply}");
        if auth_failure {
            print_key_hint();
        }
    }

    async fn show_cue(&mut self, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        let persona = Persona::from_style(&self.state.style_name);
        self.cue = self
            .client
            .avatar_cue_or_settle(content, Some(persona.as_str()), &self.cue)
            .await;
        println!("  {}", render_cue(&self.cue, content));
    }

    async fn run_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Clear => {
                if let Err(err) = self.session.reset(CLEAR_GREETING).await {
                    println!("(server tidak bisa direset: {})", user_text(&err));
                }
                self.pending_image = None;
                self.cue = AvatarCue::default();
                self.state.last_interaction = Utc::now();
                println!("Linda: {CLEAR_GREETING}");
            }
            Command::Export(format) => self.export(format),
            Command::Stats => {
                let conversation = self.session.conversation();
                println!("{}", ChatStats::from_messages(conversation.messages()));
            }
            Command::Mood(None) => self.print_mood(),
            Command::Mood(Some(enabled)) => {
                self.state.mood_enabled = enabled;
                println!("Mood system {}.", if enabled { "aktif" } else { "mati" });
            }
            Command::Persona(None) => println!(
                "Gaya bicara: {} (pilihan: {})",
                self.state.style_name,
                STYLE_NAMES.join(", ")
            ),
            Command::Persona(Some(style)) => {
                self.session.set_persona(style.clone());
                println!("Gaya bicara sekarang: {style}");
                self.state.style_name = style;
            }
            Command::Image(path) => match ImageAttachment::load(Path::new(&path)) {
                Ok(image) => {
                    println!("Gambar siap dikirim: {}", image.source);
                    self.pending_image = Some(image);
                }
                Err(err) => println!("{}", user_text(&err)),
            },
            Command::Key(key) => self.set_api_key(key).await,
            Command::Remember { kind, text } => match self.client.remember(kind, &text).await {
                Ok(entry) => println!("Diingat ({}): {}", entry.kind.as_str(), entry.text),
                Err(err) => println!("Gagal menyimpan memori: {}", user_text(&err)),
            },
            Command::Recall(query) => match self.client.search_memory(&query, 5).await {
                Ok(found) if found.is_empty() => println!("Tidak ada memori yang cocok."),
                Ok(found) => {
                    for entry in found {
                        println!("- ({}) {}", entry.kind.as_str(), entry.text);
                    }
                }
                Err(err) => println!("Gagal mencari memori: {}", user_text(&err)),
            },
            Command::Settings => self.print_settings(),
            Command::Help => print_help(),
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    async fn set_api_key(&mut self, key: Option<String>) {
        let Some(key) = key else {
            self.client.set_api_key(None);
            self.state.api_key = None;
            println!("API key dihapus.");
            return;
        };
        match self.client.validate_api_key(&key).await {
            Ok(true) => println!("API key valid dan tersimpan."),
            Ok(false) => {
                println!("API key tidak valid.");
                return;
            }
            Err(err) => {
                warn!(event = "config.api_key_unverified", error = %err);
                println!(
                    "Tidak bisa memeriksa API key ({}), tetap disimpan.",
                    user_text(&err)
                );
            }
        }
        self.client.set_api_key(Some(key.clone()));
        self.state.api_key = Some(key);
    }

    fn export(&self, format: ExportFormat) {
        let conversation = self.session.conversation();
        let rendered = export(
            conversation.messages(),
            &self.state.style_name,
            format,
            Local::now().fixed_offset(),
        );
        match rendered.and_then(|export| export.write_to(&self.export_dir)) {
            Ok(path) => println!("Chat diekspor ke {}", path.display()),
            Err(err) => println!("{}", user_text(&err)),
        }
    }

    fn print_mood(&self) {
        if !self.state.mood_enabled {
            println!("Mood system mati. Pakai /mood on untuk menyalakan.");
            return;
        }
        let conversation = self.session.conversation();
        let mood = calculate_mood(
            conversation.messages(),
            self.state.last_interaction,
            true,
            Local::now().fixed_offset(),
        );
        println!(
            "{} {} ({}/100)",
            mood_emoji(mood.level),
            mood_label(mood.level),
            mood.level
        );
    }

    fn print_settings(&self) {
        println!("Server       : {}", self.base_url);
        println!("Gaya bicara  : {}", self.state.style_name);
        println!(
            "Mood system  : {}",
            if self.state.mood_enabled { "aktif" } else { "mati" }
        );
        println!("Memori server: {}", if self.client.use_memory() { "aktif" } else { "mati" });
        println!("Streaming    : {}", if self.streaming { "ya" } else { "tidak" });
        println!("API key      : {}", if self.state.api_key.is_some() { "tersimpan" } else { "-" });
        println!("Data         : {}", self.store.path().display());
    }

    fn greet_if_returning(&self) {
        let now = Local::now().fixed_offset();
        let conversation = self.session.conversation();
        if !should_greet(
            conversation.messages(),
            self.state.last_interaction,
            self.state.mood_enabled,
            now,
        ) {
            return;
        }
        let mood = calculate_mood(
            conversation.messages(),
            self.state.last_interaction,
            self.state.mood_enabled,
            now,
        );
        let greeting = mood_greeting(mood.level, &self.state.style_name);
        self.session.push(ChatMessage::assistant(greeting));
        info!(event = "mood.greeting", level = mood.level);
    }

    fn print_recent(&self, count: usize) {
        let conversation = self.session.conversation();
        let messages = conversation.messages();
        for message in &messages[messages.len().saturating_sub(count)..] {
            if let Some(line) = render_message(message) {
                println!("{line}");
            }
        }
    }

    fn save(&mut self) {
        self.state.conversation = self.session.conversation();
        self.state.save(&self.store);
    }
}

fn flush() {
    let _ = std::io::stdout().flush();
}

fn print_key_hint() {
    println!("API key ditolak. Pakai /key <api-key> untuk menggantinya.");
}

fn print_help() {
    println!("Perintah:");
    for (command, about) in COMMANDS_HELP {
        println!("  {command:<26} {about}");
    }
    println!("Pintasan:");
    for (keys, about) in SHORTCUTS_HELP {
        println!("  {keys:<26} {about}");
    }
    println!("  {:<26} Batalkan balasan yang sedang berjalan", "Ctrl+C");
}

/// A line holding a single control character is a `Ctrl` shortcut.
fn control_chord(line: &str) -> Option<KeyChord> {
    let line = line.trim_end_matches('\r');
    let mut chars = line.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => KeyChord::from_control_char(c),
        _ => None,
    }
}

fn user_text(err: &ChatError) -> String {
    match err {
        ChatError::Validation(message) => message.clone(),
        other => other.to_string(),
    }
}

fn render_message(message: &ChatMessage) -> Option<String> {
    let speaker = match message.role {
        Role::User => "Kamu",
        Role::Assistant => "Linda",
        Role::System => return None,
    };
    let image = if message.image_ref.is_some() { " [gambar]" } else { "" };
    Some(format!("{speaker}{image}: {}", message.content))
}

fn render_cue(cue: &AvatarCue, text: &str) -> String {
    let expression = format!("{:?}", cue.expression(text)).to_lowercase();
    format!("[{} · {} · {}]", cue.emotion, expression, cue.glow)
}

#[cfg(test)]
mod tests {
    use linda_chat::Emotion;

    use super::*;

    #[test]
    fn single_control_characters_are_chords() {
        assert_eq!(control_chord("\u{0c}"), Some(KeyChord::ctrl('l')));
        assert_eq!(control_chord("\u{05}\r"), Some(KeyChord::ctrl('e')));
        assert_eq!(control_chord("l"), None);
        assert_eq!(control_chord("\u{0c}x"), None);
    }

    #[test]
    fn validation_errors_show_their_message_only() {
        let err = ChatError::Validation("File terlalu besar. Maksimal 5MB.".into());
        assert_eq!(user_text(&err), "File terlalu besar. Maksimal 5MB.");
        assert_eq!(
            user_text(&ChatError::Transport("refused".into())),
            "transport error: refused"
        );
    }

    #[test]
    fn messages_render_with_speaker_labels() {
        let user = ChatMessage::user("lihat").with_image_ref("a.png");
        assert_eq!(render_message(&user).as_deref(), Some("Kamu [gambar]: lihat"));
        assert_eq!(
            render_message(&ChatMessage::new(Role::System, "x")),
            None
        );
    }

    #[test]
    fn cue_renders_emotion_expression_and_glow() {
        let cue = AvatarCue {
            emotion: Emotion::Happy,
            ..AvatarCue::default()
        };
        assert_eq!(render_cue(&cue, "yay"), "[happy · smile · #a78bfa]");
    }
}

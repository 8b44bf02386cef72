use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use config::{PathManager, Settings, load_env_file};
use conversation::Role;
use voxtalk_audio::{CaptureBackend, LevelMeter, wav};
use voxtalk_core::{
    AuthClient, ClientError, ClientEvent, ConnectionStatus, Credential, CredentialStore,
    DuplexSession, HttpTransport, PlaybackQueue, TurnOptions, TurnOrchestrator,
};

#[derive(Copy, Clone, ValueEnum, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
enum Transport {
    /// Persistent duplex websocket for voice turns
    Ws,
    /// One streaming HTTP request per turn
    Http,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(long, short)]
    tracing: bool,

    /// Override the backend base URL from settings
    #[arg(long, env = "VOXTALK_SERVER_URL")]
    server: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account on the backend
    Register,
    /// Log in and store the credential
    Login,
    /// Revoke and forget the stored credential
    Logout,
    /// Interactive chat session
    Chat {
        #[arg(long, value_enum, default_value_t = Transport::Ws)]
        transport: Transport,
    },
}

fn setup_tracing(enable: bool) {
    if enable {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Setting default subscriber failed");
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::ERROR)
            .with_writer(|| std::io::sink())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Setting default subscriber failed");
    }
}

fn prompt(label: &str) -> Option<String> {
    print!("{}: ", label);
    let _ = io::stdout().flush();
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim().to_string()),
        Err(_) => None,
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
    }
}

/// Render client events as they arrive. Assistant tokens stream inline;
/// everything else gets its own line.
fn spawn_event_printer(
    mut events: tokio::sync::mpsc::UnboundedReceiver<ClientEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut streaming_reply = false;
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Status(status) => {
                    if !streaming_reply {
                        println!("({})", status);
                    }
                }
                ClientEvent::PartialTranscript(text) => {
                    print!("\r  … {}", text);
                    let _ = io::stdout().flush();
                }
                ClientEvent::Transcript(entry) => {
                    if streaming_reply {
                        println!();
                        streaming_reply = false;
                    }
                    println!("[{}] {}: {}", entry.time_label(), role_label(entry.role), entry.text);
                }
                ClientEvent::AssistantToken(token) => {
                    if !streaming_reply {
                        print!("assistant: ");
                        streaming_reply = true;
                    }
                    print!("{}", token);
                    let _ = io::stdout().flush();
                }
                ClientEvent::TurnComplete => {
                    if streaming_reply {
                        println!();
                        streaming_reply = false;
                    }
                }
                ClientEvent::State(_) => {}
            }
        }
    })
}

async fn run_register(settings: &Settings) {
    let Some(username) = prompt("username") else { return };
    let Some(email) = prompt("email") else { return };
    let Some(password) = prompt("password") else { return };

    match AuthClient::new(&settings.server_url)
        .register(&username, &email, &password)
        .await
    {
        Ok(credential) => {
            if let Err(e) = CredentialStore::save(&credential) {
                eprintln!("Account created, but the credential was not saved: {}", e);
            } else {
                println!("Account created and logged in as {}", username);
            }
        }
        Err(e) => eprintln!("Registration failed: {}", e),
    }
}

async fn run_login(settings: &Settings) {
    let Some(username) = prompt("username") else { return };
    let Some(password) = prompt("password") else { return };

    match AuthClient::new(&settings.server_url).login(&username, &password).await {
        Ok(credential) => {
            if let Err(e) = CredentialStore::save(&credential) {
                eprintln!("Logged in, but the credential was not saved: {}", e);
            } else {
                println!("Logged in as {}", username);
            }
        }
        Err(e) => eprintln!("Login failed: {}", e),
    }
}

async fn run_logout(settings: &Settings) {
    if let Some(credential) = CredentialStore::load() {
        if let Some(refresh_token) = credential.refresh_token {
            AuthClient::new(&settings.server_url).logout(&refresh_token).await;
        }
    }
    match CredentialStore::clear() {
        Ok(()) => println!("Logged out."),
        Err(e) => eprintln!("Failed to remove the stored credential: {}", e),
    }
}

/// One best-effort token refresh. Returns the new credential when the
/// backend accepted the refresh token.
async fn try_refresh(settings: &Settings, credential: &Credential) -> Option<Credential> {
    let refresh_token = credential.refresh_token.clone()?;
    match AuthClient::new(&settings.server_url).refresh(&refresh_token).await {
        Ok(new_credential) => {
            if let Err(e) = CredentialStore::save(&new_credential) {
                eprintln!("Refreshed credential was not saved: {}", e);
            }
            Some(new_credential)
        }
        Err(e) => {
            // The session is over; a stale credential is worse than none
            let _ = CredentialStore::clear();
            eprintln!("Session expired ({}). Run `voxtalk login` again.", e);
            None
        }
    }
}

struct ChatSession {
    settings: Settings,
    credential: Credential,
    orchestrator: TurnOrchestrator,
    queue: Arc<PlaybackQueue>,
    http: HttpTransport,
    duplex: Option<DuplexSession>,
    capture: Box<dyn CaptureBackend>,
    meter: Arc<LevelMeter>,
    opts: TurnOptions,
}

impl ChatSession {
    fn new(
        settings: Settings,
        credential: Credential,
        transport: Transport,
    ) -> Result<(Self, tokio::sync::mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        let queue = Arc::new(PlaybackQueue::new(voxtalk_audio::default_speaker()));
        let (mut orchestrator, events) =
            TurnOrchestrator::new(settings.history_limit, queue.clone());
        orchestrator.set_authenticated(true);

        let http = HttpTransport::new(&settings.server_url, &credential.access_token)?;
        let duplex = match transport {
            Transport::Ws => Some(DuplexSession::connect(
                settings.ws_chat_url(&credential.access_token),
                Duration::from_secs(settings.reconnect_delay_secs),
            )),
            Transport::Http => None,
        };

        let meter = Arc::new(LevelMeter::new());
        let capture =
            voxtalk_audio::default_capture(settings.capture_chunk_ms as u32, meter.clone());

        let opts = TurnOptions {
            voice_id: settings.voice_id.clone(),
            temperature: settings.temperature,
        };

        let session = ChatSession {
            settings,
            credential,
            orchestrator,
            queue,
            http,
            duplex,
            capture,
            meter,
            opts,
        };
        Ok((session, events))
    }

    /// Rebuild token-bound transports after a refresh.
    fn rebind_transports(&mut self) -> Result<(), ClientError> {
        self.http = HttpTransport::new(&self.settings.server_url, &self.credential.access_token)?;
        if self.duplex.is_some() {
            self.duplex = Some(DuplexSession::connect(
                self.settings.ws_chat_url(&self.credential.access_token),
                Duration::from_secs(self.settings.reconnect_delay_secs),
            ));
        }
        Ok(())
    }

    /// The duplex channel stops retrying once the backend rejects its
    /// token. Trade the refresh token for a new pair and rebuild the
    /// session before the next voice turn; `false` means the user has to
    /// log in again.
    async fn recover_duplex_auth(&mut self) -> bool {
        let rejected = self
            .duplex
            .as_ref()
            .map(|s| *s.status().borrow() == ConnectionStatus::Unauthorized)
            .unwrap_or(false);
        if !rejected {
            return true;
        }

        match try_refresh(&self.settings, &self.credential).await {
            Some(new_credential) => {
                self.credential = new_credential;
                self.rebind_transports().is_ok()
            }
            None => {
                self.orchestrator.set_authenticated(false);
                false
            }
        }
    }

    async fn text_turn(&mut self, text: &str) {
        match self.orchestrator.begin_text_turn(text) {
            Ok(true) => {}
            Ok(false) => {
                println!("A turn is already in progress.");
                return;
            }
            Err(e) => {
                eprintln!("{}", e);
                return;
            }
        }

        let mut attempt =
            self.http.process_text(text, self.orchestrator.history(), &self.opts).await;

        if matches!(attempt, Err(ClientError::Unauthenticated)) {
            if let Some(new_credential) = try_refresh(&self.settings, &self.credential).await {
                self.credential = new_credential;
                if self.rebind_transports().is_ok() {
                    attempt = self
                        .http
                        .process_text(text, self.orchestrator.history(), &self.opts)
                        .await;
                }
            }
        }

        match attempt {
            Ok(stream) => self.orchestrator.run_turn(stream).await,
            Err(e) => self.orchestrator.abort_turn(&e),
        }
        self.queue.wait_idle().await;
    }

    async fn voice_turn(&mut self) {
        if !self.recover_duplex_auth().await {
            return;
        }
        match self.orchestrator.begin_capture() {
            Ok(true) => {}
            Ok(false) => {
                println!("A turn is already in progress.");
                return;
            }
            Err(e) => {
                eprintln!("{}", e);
                return;
            }
        }

        let chunk_rx = match self.capture.start_capture() {
            Ok(rx) => rx,
            Err(e) => {
                self.orchestrator.abort_turn(&e);
                return;
            }
        };

        println!("Recording... press Enter to stop.");
        let level_bar = spawn_level_bar(self.meter.clone());

        if let Some(session) = self.duplex.as_mut() {
            // Stragglers from a dropped connection must not end this turn
            session.discard_pending();
        }
        let duplex_handle = self.duplex.as_ref().map(|s| s.handle());
        if let Some(handle) = duplex_handle {
            // Stream chunks live while recording; the forwarder ends when
            // stopping the capture closes the chunk channel.
            handle.send_audio_chunk(
                wav::streaming_header(wav::SAMPLE_RATE, wav::CHANNELS).to_vec(),
            );
            let forwarder = tokio::task::spawn_blocking(move || {
                for chunk in chunk_rx.iter() {
                    handle.send_audio_chunk(chunk);
                }
                handle.finish_speaking();
            });

            wait_for_enter();
            self.capture.stop();
            stop_level_bar(&level_bar);
            let _ = forwarder.await;

            self.orchestrator.capture_finished();
            if let Some(session) = self.duplex.as_mut() {
                let records = session.records_mut();
                self.orchestrator.run_turn(records).await;
            }
        } else {
            // Per-turn upload: buffer the whole utterance, frame it as one
            // WAV file, send it in a single streaming request.
            wait_for_enter();
            self.capture.stop();
            stop_level_bar(&level_bar);
            let chunks: Vec<Vec<u8>> = chunk_rx.iter().collect();

            if chunks.iter().all(|c| c.is_empty()) {
                self.orchestrator.abort_turn(&ClientError::CaptureUnavailable(
                    "no audio captured".to_string(),
                ));
                return;
            }
            let file = wav::assemble_wav(wav::SAMPLE_RATE, wav::CHANNELS, &chunks);
            self.orchestrator.capture_finished();

            let mut attempt = self
                .http
                .process_audio(file.clone(), self.orchestrator.history(), &self.opts)
                .await;
            if matches!(attempt, Err(ClientError::Unauthenticated)) {
                if let Some(new_credential) = try_refresh(&self.settings, &self.credential).await {
                    self.credential = new_credential;
                    if self.rebind_transports().is_ok() {
                        attempt = self
                            .http
                            .process_audio(file, self.orchestrator.history(), &self.opts)
                            .await;
                    }
                }
            }
            match attempt {
                Ok(stream) => self.orchestrator.run_turn(stream).await,
                Err(e) => self.orchestrator.abort_turn(&e),
            }
        }

        self.queue.wait_idle().await;
    }
}

fn wait_for_enter() {
    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
}

/// Repaint a simple input level bar while recording.
fn spawn_level_bar(meter: Arc<LevelMeter>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        const WIDTH: usize = 20;
        loop {
            let filled = ((meter.level() * WIDTH as f32) as usize).min(WIDTH);
            print!("\r  mic [{}{}]", "#".repeat(filled), " ".repeat(WIDTH - filled));
            let _ = io::stdout().flush();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
}

fn stop_level_bar(bar: &tokio::task::JoinHandle<()>) {
    bar.abort();
    print!("\r{}\r", " ".repeat(30));
    let _ = io::stdout().flush();
}

// Slash command parsing and handling
mod commands {
    pub enum Command {
        Quit,
        Help,
        Clear,
        Talk,
        Export(String),
    }

    impl Command {
        pub fn parse(input: &str) -> Result<Self, String> {
            let parts: Vec<&str> = input[1..].split_whitespace().collect();
            if parts.is_empty() {
                return Err("Empty command".to_string());
            }

            match parts[0] {
                "quit" | "exit" => Ok(Command::Quit),
                "help" => Ok(Command::Help),
                "clear" => Ok(Command::Clear),
                "talk" => Ok(Command::Talk),
                "export" => {
                    if parts.len() < 2 {
                        return Err("Usage: /export <file>".to_string());
                    }
                    Ok(Command::Export(parts[1].to_string()))
                }
                _ => Err(format!(
                    "Unknown command: /{}. Type /help for available commands.",
                    parts[0]
                )),
            }
        }
    }

    pub fn print_help() {
        println!("Available commands:");
        println!("  /talk                  - Record a voice message (Enter stops)");
        println!("  /export <file>         - Export the conversation history as JSON");
        println!("  /clear                 - Clear conversation history");
        println!("  /quit, /exit           - Exit the chat");
        println!("  /help                  - Show this help message");
        println!("  Ctrl+D                 - Exit the chat");
    }
}

async fn run_chat(settings: Settings, transport: Transport) {
    let Some(credential) = CredentialStore::load() else {
        println!("No saved credential. Run `voxtalk login` first.");
        return;
    };

    let (mut session, events) = match ChatSession::new(settings, credential, transport) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Failed to start the session: {}", e);
            return;
        }
    };
    let printer = spawn_event_printer(events);

    println!();
    println!("Type a message, or /talk to speak. /help for commands, Ctrl+D to exit.");
    println!();

    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                println!("Goodbye!");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if input.starts_with('/') {
            match commands::Command::parse(input) {
                Ok(commands::Command::Quit) => {
                    println!("Goodbye!");
                    break;
                }
                Ok(commands::Command::Help) => {
                    commands::print_help();
                    println!();
                }
                Ok(commands::Command::Clear) => {
                    session.orchestrator.clear_history();
                    println!("Conversation history cleared.");
                    println!();
                }
                Ok(commands::Command::Talk) => {
                    session.voice_turn().await;
                    println!();
                }
                Ok(commands::Command::Export(path)) => {
                    match std::fs::write(&path, session.orchestrator.history().export_json()) {
                        Ok(()) => println!("History exported to {}", path),
                        Err(e) => eprintln!("Export failed: {}", e),
                    }
                    println!();
                }
                Err(err) => {
                    println!("{}", err);
                    println!();
                }
            }
            continue;
        }

        session.text_turn(input).await;
        println!();
    }

    println!(
        "Conversation had {} messages",
        session.orchestrator.history().len()
    );
    printer.abort();
}

#[tokio::main]
async fn main() {
    load_env_file();
    let args = Args::parse();

    setup_tracing(args.tracing);

    let mut settings = Settings::load();
    // First run: write the template so the user has a file to edit
    if let Some(path) = PathManager::settings_path() {
        if !path.exists() {
            if let Err(e) = settings.save() {
                tracing::warn!("could not write default settings: {}", e);
            }
        }
    }
    if let Some(server) = args.server {
        settings.server_url = server;
    }

    match args.command {
        Command::Register => run_register(&settings).await,
        Command::Login => run_login(&settings).await,
        Command::Logout => run_logout(&settings).await,
        Command::Chat { transport } => run_chat(settings, transport).await,
    }
}

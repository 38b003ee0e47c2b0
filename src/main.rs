//! Docchat CLI entry point.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use docchat::api::ImageUpload;
use docchat::config::Config;
use docchat::outbound::SendOutcome;
use docchat::session::SessionStore;
use docchat::surface::{
    ConversationSession, DocumentChat, DocumentInfo, InboxSurface, OpenOutcome, SessionUpdate,
    SurfaceDeps, SurfaceKind,
};
use docchat::{Error, Message};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docchat")]
#[command(about = "Live document chat between uploaders and readers")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Session token. Falls back to DOCCHAT_TOKEN.
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat with a document's uploader from the viewer
    Chat(DocumentArgs),
    /// Chat with a document's uploader from the detail page
    Detail(DocumentArgs),
    /// Browse every conversation and chat in one
    Inbox,
}

#[derive(clap::Args)]
struct DocumentArgs {
    /// Document id
    #[arg(long)]
    document: String,

    /// Uploader user id
    #[arg(long)]
    uploader: Option<String>,

    /// Uploader display name
    #[arg(long)]
    uploader_name: Option<String>,
}

/// A line typed by the user.
enum Input {
    Text(String),
    Image(PathBuf),
    List,
    Open(usize),
    Close,
    Quit,
}

impl Input {
    fn parse(line: &str) -> Self {
        match line.trim().split_once(' ') {
            Some(("/image", path)) => Input::Image(PathBuf::from(path.trim())),
            Some(("/open", index)) => match index.trim().parse() {
                Ok(index) => Input::Open(index),
                Err(_) => Input::Text(line.to_string()),
            },
            _ => match line.trim() {
                "/list" => Input::List,
                "/close" => Input::Close,
                "/quit" => Input::Quit,
                _ => Input::Text(line.to_string()),
            },
        }
    }
}

enum Host {
    Document(DocumentChat),
    Inbox(InboxSurface),
}

impl Host {
    fn session(&self) -> &ConversationSession {
        match self {
            Host::Document(chat) => chat.session(),
            Host::Inbox(inbox) => inbox.session(),
        }
    }

    async fn next_update(&mut self) -> Option<SessionUpdate> {
        match self {
            Host::Document(chat) => chat.next_update().await,
            Host::Inbox(inbox) => inbox.next_update().await,
        }
    }

    async fn send_text(&mut self, text: &str) -> docchat::Result<SendOutcome> {
        match self {
            Host::Document(chat) => chat.send_text(text).await,
            Host::Inbox(inbox) => inbox.send_text(text).await,
        }
    }

    async fn send_image(&mut self, upload: ImageUpload) -> docchat::Result<SendOutcome> {
        match self {
            Host::Document(chat) => chat.send_image(upload).await,
            Host::Inbox(inbox) => inbox.send_image(upload).await,
        }
    }

    async fn close(&mut self) {
        match self {
            Host::Document(chat) => chat.close_chat().await,
            Host::Inbox(inbox) => inbox.close_chat().await,
        }
    }

    async fn unmount(self) {
        match self {
            Host::Document(chat) => chat.unmount().await,
            Host::Inbox(inbox) => inbox.unmount().await,
        }
    }
}

enum Event {
    Line(Option<String>),
    Update(Option<SessionUpdate>),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("docchat=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docchat=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = if let Some(config_path) = cli.config {
        Config::load_from_path(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else {
        Config::load().with_context(|| "failed to load configuration")?
    };
    tracing::debug!(api = %config.api_base_url, channel = %config.channel_url, "configuration loaded");

    let session = Arc::new(SessionStore::new());
    if let Some(token) = cli.token.or_else(|| std::env::var("DOCCHAT_TOKEN").ok()) {
        session.set_token(token);
    }
    let deps = SurfaceDeps::from_config(&config, session)
        .with_context(|| "failed to set up chat client")?;

    let host = match cli.command {
        Command::Chat(args) => open_document(SurfaceKind::DocumentViewer, deps, args).await,
        Command::Detail(args) => open_document(SurfaceKind::DocumentDetail, deps, args).await,
        Command::Inbox => open_inbox(deps).await,
    };
    let mut host = match host {
        Ok(Some(host)) => host,
        Ok(None) => return Ok(()),
        Err(Error::NotAuthenticated) => {
            eprintln!("Sign in required: pass --token or set DOCCHAT_TOKEN.");
            std::process::exit(2);
        }
        Err(error) => return Err(error).with_context(|| "failed to open chat"),
    };

    render_history(host.session());
    run(&mut host).await?;
    host.unmount().await;
    Ok(())
}

async fn open_document(
    kind: SurfaceKind,
    deps: SurfaceDeps,
    args: DocumentArgs,
) -> docchat::Result<Option<Host>> {
    let document = DocumentInfo {
        uploader_name: args.uploader_name,
        ..DocumentInfo::new(args.document, args.uploader.map(Into::into))
    };
    let mut chat = DocumentChat::new(kind, deps, document);
    match chat.open_chat().await? {
        OpenOutcome::Unavailable => {
            println!("This document has no uploader to chat with.");
            return Ok(None);
        }
        OpenOutcome::Abandoned => return Ok(None),
        OpenOutcome::Opened | OpenOutcome::HistoryFailed => {}
    }
    Ok(Some(Host::Document(chat)))
}

async fn open_inbox(deps: SurfaceDeps) -> docchat::Result<Option<Host>> {
    let mut inbox = InboxSurface::new(deps);
    inbox.load().await?;
    render_summaries(&inbox);
    Ok(Some(Host::Inbox(inbox)))
}

async fn run(host: &mut Host) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let event = tokio::select! {
            line = lines.next_line() => Event::Line(line.context("failed to read standard input")?),
            update = host.next_update() => Event::Update(update),
        };

        match event {
            Event::Line(None) => return Ok(()),
            Event::Line(Some(line)) => match Input::parse(&line) {
                Input::Quit => return Ok(()),
                Input::Close => {
                    host.close().await;
                    println!("* chat closed");
                }
                Input::List => match host {
                    Host::Inbox(inbox) => render_summaries(inbox),
                    Host::Document(_) => println!("! /list is only available in the inbox"),
                },
                Input::Open(index) => match host {
                    Host::Inbox(inbox) => {
                        let Some(summary) = inbox.summaries().get(index).cloned() else {
                            println!("! no conversation #{index}");
                            continue;
                        };
                        match inbox.select(&summary).await {
                            Ok(_) => render_history(inbox.session()),
                            Err(error) => report(&error)?,
                        }
                    }
                    Host::Document(_) => println!("! /open is only available in the inbox"),
                },
                Input::Image(path) => {
                    let result = match ImageUpload::from_path(&path).await {
                        Ok(upload) => host.send_image(upload).await,
                        Err(error) => Err(error),
                    };
                    if let Err(error) = result {
                        report(&error)?;
                    }
                }
                Input::Text(text) => {
                    if let Err(error) = host.send_text(&text).await {
                        report(&error)?;
                    }
                }
            },
            Event::Update(None) => return Ok(()),
            Event::Update(Some(update)) => render_update(&update, host.session()),
        }
    }
}

/// Print an inline error. Only a lost session ends the loop.
fn report(error: &Error) -> anyhow::Result<()> {
    if error.is_not_authenticated() {
        anyhow::bail!("session expired, sign in again");
    }
    println!("! {}", error.user_message());
    Ok(())
}

fn render_summaries(inbox: &InboxSurface) {
    if inbox.summaries().is_empty() {
        println!("No conversations yet.");
        return;
    }
    for (index, summary) in inbox.summaries().iter().enumerate() {
        let marker = if Some(&summary.conversation_key) == inbox.active() {
            '>'
        } else {
            ' '
        };
        println!(
            "{marker} #{index} {} - {}: {}",
            summary.partner_name(),
            summary.document_title().unwrap_or("untitled"),
            summary.preview()
        );
    }
}

fn render_history(session: &ConversationSession) {
    if let Some(partner) = session.partner() {
        println!("* chatting with {}", partner.display_name());
    }
    for message in session.messages() {
        render_message(message, session);
    }
    if let Some(error) = session.error() {
        println!("! {error}");
    }
}

fn render_message(message: &Message, session: &ConversationSession) {
    let mine = session.me().is_some_and(|me| message.is_from(&me.id));
    let name = if mine {
        "you"
    } else {
        message
            .sender
            .as_ref()
            .or(session.partner())
            .map(|sender| sender.display_name())
            .unwrap_or(&*message.sender_id)
    };
    println!(
        "[{}] {name}: {}",
        message.created_at.format("%H:%M"),
        message.body
    );
}

fn render_update(update: &SessionUpdate, session: &ConversationSession) {
    match update {
        SessionUpdate::Appended { message, .. } => render_message(message, session),
        SessionUpdate::Joined { .. } | SessionUpdate::Left => {}
        SessionUpdate::Error(message) => println!("! {message}"),
        SessionUpdate::Undelivered(expired) => {
            for pending in expired {
                println!("! message was not delivered: {}", pending.preview());
            }
        }
        SessionUpdate::JoinRetried { attempt } => println!("* still connecting (retry {attempt})"),
        SessionUpdate::JoinFailed => println!("! could not join the conversation"),
        SessionUpdate::Disconnected => println!("! chat connection lost"),
        SessionUpdate::ForeignMessage { key } => {
            if session.kind() == SurfaceKind::Inbox {
                println!("* new message in {key}");
            }
        }
    }
}

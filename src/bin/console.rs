//! Line-oriented console front-end for a chiko chat session.
//!
//! Reads user input from stdin, prints the transcript and emotion
//! transitions, and drives the session controller. Commands: `/reset`,
//! `/voice on|off`, `/emotion <state>`, `/devices`, `/quit`.

use chiko::playback::{AudioSink, NullSink};
use chiko::session::{SessionController, SessionEvent};
use chiko::speaker::SpeakerSink;
use chiko::{ChikoConfig, EmotionState, ReplyGateway, Role};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chiko=info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("chiko-console failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(ChikoConfig::default_config_path);
    let config = match ChikoConfig::from_file(&config_path) {
        Ok(config) => {
            info!("loaded config from {}", config_path.display());
            config
        }
        Err(e) => {
            info!("using default config ({e})");
            ChikoConfig::default()
        }
    };

    let gateway = Arc::new(ReplyGateway::new(&config.gateway)?);
    let sink: Arc<dyn AudioSink> = match SpeakerSink::new(&config.audio) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!("no speaker output, replies will be silent: {e}");
            Arc::new(NullSink)
        }
    };

    let reset_on_start = config.session.reset_on_start;
    let (controller, handle) = SessionController::new(config, gateway, sink);
    let controller_task = tokio::spawn(controller.run());

    // Clear any backend memory left over from a previous run.
    if reset_on_start {
        handle.reset()?;
    }

    let mut events = handle.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::MessageAppended(message) => match message.role {
                    Role::User => {}
                    Role::Assistant => println!("chiko> {}", message.content),
                    Role::System => println!("[{}]", message.content),
                },
                SessionEvent::EmotionChanged(state) => println!("[emotion: {state}]"),
                SessionEvent::TranscriptCleared => println!("[session reset]"),
            }
        }
    });

    println!(
        "chiko console — type a message, or /reset, /voice on|off, /emotion <state>, /devices, /quit"
    );
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" => break,
            "/reset" => handle.reset()?,
            "/voice on" => handle.set_voice_enabled(true)?,
            "/voice off" => handle.set_voice_enabled(false)?,
            "/devices" => match SpeakerSink::list_output_devices() {
                Ok(names) if names.is_empty() => println!("no output devices found"),
                Ok(names) => {
                    for name in names {
                        println!("  {name}");
                    }
                }
                Err(e) => println!("cannot list output devices: {e}"),
            },
            _ => {
                if let Some(tag) = line.strip_prefix("/emotion ") {
                    match EmotionState::from_tag(tag) {
                        Some(state) => handle.set_emotion(state)?,
                        None => println!("unknown emotion: {tag}"),
                    }
                } else if line.starts_with('/') {
                    println!("unknown command: {line}");
                } else {
                    handle.submit(line)?;
                }
            }
        }
    }

    handle.shutdown()?;
    controller_task.await?;
    printer.abort();
    Ok(())
}

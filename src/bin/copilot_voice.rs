//! Terminal front end for a voice session.
//!
//! Reads commands from stdin (`start`, `stop`, `clear`, `rate <x>`,
//! `volume <x>`, `quit`) and prints the conversation to stdout. Tracing goes
//! to stderr.

use copilot_voice::audio::microphone::CpalMicrophone;
use copilot_voice::capture::BackendTranscriber;
use copilot_voice::{
    CommandPlayback, DialogueSessionController, DisplayEvent, HttpBackendClient, SessionAdapters,
    SessionHandle, Speaker, VadSpeechCapture, VoiceConfig, VoicePreferences,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{broadcast, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

enum Mode {
    Session,
    Devices,
    Health,
    Help,
}

struct Args {
    config: Option<PathBuf>,
    mode: Mode,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut parsed = Args {
        config: None,
        mode: Mode::Session,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--devices" => parsed.mode = Mode::Devices,
            "--health" => parsed.mode = Mode::Health,
            "--help" | "-h" => parsed.mode = Mode::Help,
            other => anyhow::bail!("unknown argument `{other}` (see --help)"),
        }
    }
    Ok(parsed)
}

fn print_usage() {
    println!("usage: copilot-voice [--config PATH] [--devices | --health]");
    println!();
    println!("commands while running:");
    println!("  start         listen for one question");
    println!("  stop          stop listening, cancel a request or interrupt speech");
    println!("  clear         clear the conversation");
    println!("  rate <x>      speech rate, 0.5-2.0");
    println!("  volume <x>    speech volume, 0.0-1.0");
    println!("  quit          exit");
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<VoiceConfig> {
    if let Some(path) = path {
        return Ok(VoiceConfig::from_file(path)?);
    }
    let default_path = VoiceConfig::default_config_path();
    if default_path.exists() {
        info!("loading config from {}", default_path.display());
        Ok(VoiceConfig::from_file(&default_path)?)
    } else {
        Ok(VoiceConfig::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("copilot_voice=info")),
        )
        .init();

    let args = parse_args()?;
    match args.mode {
        Mode::Help => {
            print_usage();
            Ok(())
        }
        Mode::Devices => list_devices(),
        Mode::Health => {
            let config = load_config(args.config.as_ref())?;
            check_health(config).await
        }
        Mode::Session => {
            let config = load_config(args.config.as_ref())?;
            run_session(config).await
        }
    }
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalMicrophone::list_input_devices()? {
        println!("  - {name}");
    }
    Ok(())
}

async fn check_health(config: VoiceConfig) -> anyhow::Result<()> {
    let client = HttpBackendClient::new(config.backend.clone())?;
    match client.health().await {
        Ok(status) => {
            println!("{}: {status}", config.backend.base_url);
            Ok(())
        }
        Err(failure) => anyhow::bail!("{} is unreachable: {failure}", config.backend.base_url),
    }
}

async fn run_session(config: VoiceConfig) -> anyhow::Result<()> {
    println!("Copilot Voice v{}", env!("CARGO_PKG_VERSION"));

    let microphone = Arc::new(CpalMicrophone::new(config.audio.clone()));
    let transcriber = Arc::new(BackendTranscriber::new(&config.backend, &config.capture)?);
    let adapters = SessionAdapters {
        capture: Box::new(VadSpeechCapture::new(
            microphone,
            transcriber,
            config.capture.clone(),
        )),
        playback: Box::new(CommandPlayback::new(&config.playback)),
        backend: Arc::new(HttpBackendClient::new(config.backend.clone())?),
    };

    let (preferences, preferences_rx) = watch::channel(config.voice.clone());
    let (controller, handle) = DialogueSessionController::new(adapters, &config, preferences_rx);
    let display = handle.subscribe();
    let session = tokio::spawn(controller.run());
    let printer = tokio::spawn(print_display_events(display));

    println!("\nType `start` and ask a question. `help` lists commands.\n");
    tokio::select! {
        result = read_commands(&handle, &preferences) => result?,
        _ = tokio::signal::ctrl_c() => info!("received Ctrl+C, shutting down..."),
    }

    let _ = handle.shutdown().await;
    session.await?;
    printer.abort();
    Ok(())
}

async fn read_commands(
    handle: &SessionHandle,
    preferences: &watch::Sender<VoicePreferences>,
) -> anyhow::Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let sent = match command {
            "start" | "s" => handle.start().await,
            "stop" | "x" => handle.stop().await,
            "clear" => handle.clear_log().await,
            "rate" | "volume" => {
                match words.next().and_then(|v| v.parse::<f32>().ok()) {
                    Some(value) => preferences.send_modify(|p| {
                        if command == "rate" {
                            p.rate = value;
                        } else {
                            p.volume = value;
                        }
                    }),
                    None => println!("usage: {command} <number>"),
                }
                Ok(())
            }
            "help" => {
                print_usage();
                Ok(())
            }
            "quit" | "q" | "exit" => break,
            other => {
                println!("unknown command `{other}`");
                Ok(())
            }
        };
        if sent.is_err() {
            // The controller has already shut down.
            break;
        }
    }
    Ok(())
}

async fn print_display_events(mut events: broadcast::Receiver<DisplayEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            DisplayEvent::StateChanged { state } => println!("[{state}]"),
            DisplayEvent::Status { message } => println!("  {message}"),
            DisplayEvent::InterimTranscript { text } => println!("  ... {text}"),
            DisplayEvent::UtteranceAppended { utterance } => {
                let who = match utterance.speaker {
                    Speaker::User => "You",
                    Speaker::Assistant => "Copilot",
                };
                println!("{who}: {}", utterance.text);
            }
            DisplayEvent::LogCleared => println!("  (conversation cleared)"),
            DisplayEvent::UtteranceCompleted { .. } | DisplayEvent::AudioLevel { .. } => {}
        }
    }
}

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use paw_voice::dialog::{ContextManager, composer};
use paw_voice::preferences::{JsonPreferenceStore, PreferenceStore};
use paw_voice::session::{Gate, gate};
use paw_voice::voice::{
    AudioCapture, AudioPlayback, PLAYBACK_SAMPLE_RATE, SynthesisRequest,
    calculate_energy, list_input_devices,
};
use paw_voice::{Config, Daemon, Transcript, logging_registry};

/// Paw - voice assistant for your pets
#[derive(Parser)]
#[command(name = "paw", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run an interactive voice session (default)
    Run {
        /// Recognition confidence given to typed requests
        #[arg(long, default_value = "1.0")]
        confidence: f32,
    },
    /// Parse a request and show the intent and where it would go
    Parse {
        /// What the user said
        text: String,
        /// Recognition confidence
        #[arg(long, default_value = "1.0")]
        confidence: f32,
        /// Screen the request was made on
        #[arg(long)]
        page: Option<String>,
    },
    /// List input devices
    Devices,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Input device name
        #[arg(long)]
        device: Option<String>,
    },
    /// Test speaker output
    TestSpeaker,
    /// Speak text with the configured voice
    Say {
        /// Text to speak
        #[arg(default_value = "Hi! I can help you look after your pets.")]
        text: String,
    },
    /// Show or change the persisted hands-free preference
    HandsFree {
        #[arg(value_enum)]
        action: Toggle,
    },
    /// Show or change the preferred microphone
    Microphone {
        /// Device name; omit to show the current choice
        device: Option<String>,
        /// Go back to the system default
        #[arg(long, conflicts_with = "device")]
        clear: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,paw_voice=info",
        1 => "info,paw_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let command = cli.command.unwrap_or(Command::Run { confidence: 1.0 });

    match command {
        Command::Run { confidence } => {
            let config = Config::load()?;
            tracing::info!(locale = %config.voice.locale, "starting paw voice session");
            Daemon::new(config).run(logging_registry(), confidence).await?;
            Ok(())
        }
        Command::Parse {
            text,
            confidence,
            page,
        } => parse(&text, confidence, page).await,
        Command::Devices => devices(),
        Command::TestMic { duration, device } => test_mic(duration, device.as_deref()).await,
        Command::TestSpeaker => test_speaker().await,
        Command::Say { text } => say(&text).await,
        Command::HandsFree { action } => hands_free(action),
        Command::Microphone { device, clear } => microphone(device, clear),
    }
}

/// Parse one request without running a session
async fn parse(text: &str, confidence: f32, page: Option<String>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let mut context = ContextManager::new(
        config.dialog.max_previous_intents,
        config.dialog.max_recent_entities,
    );
    if let Some(page) = page {
        context.set_current_page(page);
    }

    let daemon = Daemon::new(config);
    let transcript = Transcript::final_result(text, confidence);
    let intent = daemon
        .intent_parser()?
        .parse_intent(&transcript, &context.context())
        .await?;

    println!("{}", serde_json::to_string_pretty(&intent)?);

    let route = match gate(intent) {
        Gate::Dispatch(confirmed) => format!("dispatch {}", confirmed.intent().action()),
        Gate::Confirm(intent) => {
            format!("confirm: {}", composer::compose_confirmation(&intent).text)
        }
        Gate::Clarify(intent) => {
            format!("clarify: {}", composer::compose_clarification(&intent).text)
        }
        Gate::ClearConversation => "clear conversation".to_string(),
    };
    println!("route: {route}");

    Ok(())
}

fn devices() -> anyhow::Result<()> {
    let devices = list_input_devices()?;
    if devices.is_empty() {
        println!("No input devices found");
    }
    for device in devices {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{}{marker}", device.name);
    }
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, device: Option<&str>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::open(device)?;
    capture.start()?;

    println!("Device: {}", capture.device_name());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check that the right device is selected:");
    println!("  paw devices");
    println!("  paw microphone \"<device name>\"");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());

    tokio::task::spawn_blocking(move || {
        AudioPlayback::open()?.play_blocking(samples, &CancellationToken::new())
    })
    .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Speak text through the configured synthesizer
async fn say(text: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let request = SynthesisRequest {
        rate: config.voice.tts_rate,
        pitch: config.voice.tts_pitch,
        ..SynthesisRequest::new(text, config.voice.locale.clone())
    };

    let parts = Daemon::new(config).assemble(logging_registry())?;

    println!("Speaking: \"{text}\"");
    parts
        .synthesizer
        .speak(request, CancellationToken::new())
        .await?;

    Ok(())
}

fn hands_free(action: Toggle) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = JsonPreferenceStore::open(config.preferences_path())?;

    match action {
        Toggle::On => store.set_hands_free_enabled(true)?,
        Toggle::Off => store.set_hands_free_enabled(false)?,
        Toggle::Status => {}
    }

    let enabled = store.hands_free_enabled()?;
    println!("hands-free: {}", if enabled { "on" } else { "off" });
    Ok(())
}

fn microphone(device: Option<String>, clear: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = JsonPreferenceStore::open(config.preferences_path())?;

    if clear {
        store.set_preferred_microphone(None)?;
    } else if let Some(name) = &device {
        let known = list_input_devices()?.iter().any(|d| &d.name == name);
        if !known {
            anyhow::bail!("no input device named \"{name}\" (see `paw devices`)");
        }
        store.set_preferred_microphone(Some(name.as_str()))?;
    }

    match store.preferred_microphone()? {
        Some(name) => println!("microphone: {name}"),
        None => println!("microphone: system default"),
    }
    Ok(())
}

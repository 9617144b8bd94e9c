//! `playback`: open one local audio file and drive it from stdin.
//!
//! Each stdin line is a command (`help` lists them). Engine events are printed
//! as they arrive. The resume position is saved on `quit`, Ctrl-C and end of
//! input.

mod cli;
mod command;

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, select};
use playback_engine::{Engine, EngineConfig, EngineState, PlayerEvent, SinkKind};
use tracing_subscriber::EnvFilter;

use command::Command;

const TICK: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,playback_engine=info")),
        )
        .init();

    if args.list_devices {
        for name in playback_engine::output_device_names()? {
            println!("{name}");
        }
        return Ok(());
    }

    let config = build_config(&args)?;
    let Some(file) = args.file.as_deref() else {
        anyhow::bail!("no file given");
    };

    let mut engine = Engine::with_config(config)?;
    let events = engine.subscribe();
    engine.open(file).with_context(|| format!("open {file}"))?;
    if let Some(status) = engine.duration_time_string(1) {
        println!("{}  [{status}]", engine.filename().unwrap_or_default());
    }
    if args.autoplay {
        engine.play();
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_signal = shutdown.clone();
    let _ = ctrlc::set_handler(move || {
        shutdown_for_signal.store(true, Ordering::Relaxed);
    });

    let lines = spawn_stdin_reader();
    run(&mut engine, &lines, &events, &shutdown);

    engine.close();
    Ok(())
}

fn build_config(args: &cli::Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if args.device.is_some() {
        config.device = args.device.clone();
    }
    if args.null_sink {
        config.sink = SinkKind::Null;
    }
    if let Some(speed) = args.speed {
        config.speed = speed;
    }
    if let Some(volume) = args.volume {
        config.volume = volume;
    }
    if let Some(frames) = args.chunk_frames {
        config.chunk_frames = frames;
    }
    if let Some(frames) = args.refill_max_frames {
        config.refill_max_frames = frames;
    }
    if let Some(secs) = args.buffer_seconds {
        config.buffer_seconds = secs;
    }
    Ok(config)
}

/// Forward stdin lines; the channel disconnects at end of input.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn run(
    engine: &mut Engine,
    lines: &Receiver<String>,
    events: &Receiver<PlayerEvent>,
    shutdown: &AtomicBool,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("interrupted");
            return;
        }
        engine.dispatch_pending();

        select! {
            recv(lines) -> line => {
                let Ok(line) = line else { return };
                if !line.trim().is_empty() {
                    match Command::parse(&line) {
                        Ok(Command::Quit) => return,
                        Ok(cmd) => apply(engine, cmd),
                        Err(e) => eprintln!("{e:#}"),
                    }
                }
            }
            recv(events) -> event => {
                let Ok(event) = event else { return };
                match event {
                    PlayerEvent::DurationChanged(ms) => {
                        println!("duration {}", Engine::time_string(ms, ms, 1));
                    }
                    PlayerEvent::EndOfStream => println!("end of stream"),
                    PlayerEvent::Error(message) => {
                        eprintln!("playback error: {message}");
                        return;
                    }
                }
            }
            default(TICK) => {}
        }
    }
}

fn apply(engine: &mut Engine, cmd: Command) {
    match cmd {
        Command::Play => engine.play(),
        Command::Pause => engine.pause(),
        Command::Toggle => match engine.state() {
            EngineState::Playing => engine.pause_and_rewind(),
            _ => engine.play(),
        },
        Command::Seek(ms) => engine.seek(ms),
        Command::Skip(delta) => engine.seek_relative(delta),
        Command::Fraction(permille) => engine.seek_fraction(permille),
        Command::Speed(speed) => engine.set_speed(speed),
        Command::FastForward(speed) => engine.fast_forward(speed),
        Command::Rewind(speed) => engine.rewind(speed),
        Command::Volume(level) => engine.set_volume(level),
        Command::Mute(muted) => engine.set_mute(muted),
        Command::Select(start, end) => engine.set_selection(start, end),
        Command::Unselect => engine.clear_selection(),
        Command::Timestamp => match engine.timestamp() {
            Some(ts) => println!("{ts}"),
            None => eprintln!("nothing open"),
        },
        Command::Goto(text) => {
            if !engine.goto_timestamp(&text) {
                eprintln!("not a timestamp in this file: {text}");
            }
        }
        Command::Status => print_status(engine),
        Command::Help => println!("{}", command::HELP),
        Command::Quit => {}
    }
}

fn print_status(engine: &Engine) {
    let status = engine.status();
    let pos = engine.current_time_string(1).unwrap_or_else(|| "--".to_string());
    let dur = engine.duration_time_string(1).unwrap_or_else(|| "--".to_string());
    println!(
        "{:?} {pos} / {dur}  speed {:.2}  vol {:.2}{}",
        status.state,
        status.speed,
        status.volume,
        if status.muted { " (muted)" } else { "" }
    );
    if let Some((start, end)) = status.selection {
        let max = status.duration_ms.unwrap_or(end);
        println!(
            "selection {} - {}",
            Engine::time_string(start, max, 1),
            Engine::time_string(end, max, 1)
        );
    }
}

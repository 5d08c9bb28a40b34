//! tapdeck - Stream C64 TAP files to a serial tape-port emulator.
//!
//! Usage:
//!   tapdeck ports                              # List serial ports
//!   tapdeck info game.tap                      # Show TAP header and duration
//!   tapdeck play game.tap --port /dev/ttyUSB0  # Interactive deck
//!
//! Deck keys:
//!   space  play / stop       r  rewind
//!   e      eject             l  load the file again
//!   left   back 10 s         right  forward 10 s
//!   q      quit

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tokio::sync::mpsc as tokio_mpsc;

use tapdeck_core::{
    available_ports, CassetteRecorder, DeckConfig, HardwareLink, LogDiagnostics, RecorderObserver,
    RecorderState, SerialHardwareLink, Tape,
};

const SEEK_STEP: f64 = 10.0;

/// TAP cassette deck
#[derive(Parser, Debug)]
#[command(name = "tapdeck")]
#[command(about = "Stream C64 TAP files to a serial tape-port emulator")]
struct Args {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List available serial ports
    Ports,

    /// Show header and timing information of a TAP file
    Info {
        /// TAP file
        file: PathBuf,
    },

    /// Play a TAP file through the tape-port emulator
    Play {
        /// TAP file
        file: PathBuf,

        /// Serial device name (e.g. /dev/ttyUSB0 or COM3)
        #[arg(short, long)]
        port: String,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured baud rate
        #[arg(long)]
        baud: Option<u32>,

        /// Start position in seconds
        #[arg(long)]
        seek: Option<f64>,

        /// Start playing right away
        #[arg(long)]
        autoplay: bool,
    },
}

/// Deck controls read from the terminal.
#[derive(Debug, Clone, Copy, PartialEq)]
enum DeckKey {
    PlayStop,
    Rewind,
    Eject,
    Reload,
    Seek(f64),
    Quit,
}

/// Translate crossterm key events to deck controls.
fn translate_key(code: KeyCode, modifiers: KeyModifiers) -> Option<DeckKey> {
    // Raw mode swallows SIGINT
    if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
        return Some(DeckKey::Quit);
    }

    match code {
        KeyCode::Char(' ') | KeyCode::Enter => Some(DeckKey::PlayStop),
        KeyCode::Char('r') => Some(DeckKey::Rewind),
        KeyCode::Char('e') => Some(DeckKey::Eject),
        KeyCode::Char('l') => Some(DeckKey::Reload),
        KeyCode::Left => Some(DeckKey::Seek(-SEEK_STEP)),
        KeyCode::Right => Some(DeckKey::Seek(SEEK_STEP)),
        KeyCode::Char('q') | KeyCode::Esc => Some(DeckKey::Quit),
        _ => None,
    }
}

fn format_time(seconds: f64) -> String {
    let tenths = (seconds * 10.0).round() as u64;
    format!("{:02}:{:02}.{}", tenths / 600, (tenths / 10) % 60, tenths % 10)
}

/// Prints state changes and a progress bar to stderr.
struct ProgressObserver;

impl RecorderObserver for ProgressObserver {
    fn state_changed(&mut self, state: RecorderState) {
        let label = match state {
            RecorderState::Ejected => "EJECTED",
            RecorderState::Stopped => "STOPPED",
            RecorderState::Playing => "PLAYING",
            RecorderState::Recording => "RECORDING",
        };
        eprint!("\r\n[{}]\r\n", label);
    }

    fn position_changed(&mut self, position: usize, length: usize) {
        const WIDTH: usize = 40;
        let filled = if length == 0 { 0 } else { position * WIDTH / length };
        let percent = if length == 0 { 0 } else { position * 100 / length };
        eprint!(
            "\r[{}{}] {:3}%",
            "#".repeat(filled),
            "-".repeat(WIDTH - filled),
            percent
        );
        let _ = std::io::stderr().flush();
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        // Terminal is in raw mode while the deck runs
        .format(|buf, record| write!(buf, "[{}] {}\r\n", record.level(), record.args()))
        .init();
}

fn list_ports() -> Result<(), Box<dyn std::error::Error>> {
    let ports = available_ports()?;
    if ports.is_empty() {
        eprintln!("No serial ports found");
    }
    for name in ports {
        println!("{}", name);
    }
    Ok(())
}

fn show_info(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let tape = Tape::from_path(path)?;
    let header = tape.header();

    println!("File:        {}", path.display());
    println!("Size:        {} bytes", tape.size());
    println!(
        "Signature:   {}{}",
        header.signature_str(),
        if header.is_c64_raw() { "" } else { " (not C64-TAPE-RAW)" }
    );
    println!("Version:     {}", header.version);
    println!(
        "Data length: {} bytes declared, {} present",
        header.data_length,
        tape.remaining()
    );
    println!("Duration:    {}", format_time(tape.duration()));
    Ok(())
}

/// Apply one key to the recorder. Returns false on quit.
fn handle_key(recorder: &mut CassetteRecorder<SerialHardwareLink>, key: DeckKey, file: &Path) -> bool {
    match key {
        DeckKey::PlayStop => {
            match recorder.state() {
                RecorderState::Playing => {
                    recorder.stop();
                }
                _ => {
                    recorder.play();
                }
            }
        }
        DeckKey::Rewind => {
            recorder.rewind();
        }
        DeckKey::Eject => {
            recorder.eject();
        }
        DeckKey::Reload => {
            if let Err(e) = recorder.load(file) {
                log::error!("Failed to load {}: {}", file.display(), e);
            }
        }
        DeckKey::Seek(delta) => {
            if recorder.state() != RecorderState::Stopped {
                log::warn!("Stop the tape before seeking");
            } else if let Ok(time) = recorder.time() {
                let target = (time + delta).max(0.0);
                if let Err(e) = recorder.seek(target) {
                    log::error!("Seek failed: {}", e);
                } else {
                    log::info!("Position {}", format_time(target));
                }
            }
        }
        DeckKey::Quit => return false,
    }
    true
}

async fn play(
    file: PathBuf,
    port: String,
    config: Option<PathBuf>,
    baud: Option<u32>,
    seek: Option<f64>,
    autoplay: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &config {
        Some(path) => DeckConfig::from_path(path)?,
        None => DeckConfig::default(),
    };
    if let Some(baud) = baud {
        config.link.baud_rate = baud;
    }

    let diag = Arc::new(LogDiagnostics);
    let link = Arc::new(SerialHardwareLink::new(port, config.link.clone(), diag.clone()));
    if let Err(e) = link.connect() {
        eprintln!("Failed to connect to {}: {}", link.device_name(), e);
        return Err(e.into());
    }

    let mut recorder = CassetteRecorder::new(Arc::clone(&link), config.recorder.clone(), diag);
    recorder.set_observer(Box::new(ProgressObserver));

    if let Err(e) = recorder.load(&file) {
        eprintln!("Failed to load {}: {}", file.display(), e);
        link.disconnect();
        return Err(e.into());
    }
    if let Some(seconds) = seek {
        recorder.seek(seconds)?;
    }
    if autoplay {
        recorder.play();
    }

    // Create channel for key input
    let (key_tx, key_rx) = mpsc::channel::<DeckKey>();

    // Create shutdown signal
    let (shutdown_tx, mut shutdown_rx) = tokio_mpsc::channel::<()>(1);

    // Enable raw mode (gracefully handle non-TTY)
    let raw_mode_enabled = enable_raw_mode().is_ok();
    eprint!("space play/stop  r rewind  e eject  l load  \u{2190}/\u{2192} seek  q quit\r\n");

    // Run the deck in a blocking task: it owns the recorder
    let deck_handle = tokio::task::spawn_blocking(move || {
        'deck: loop {
            recorder.wait_event(Duration::from_millis(50));
            while let Ok(key) = key_rx.try_recv() {
                if !handle_key(&mut recorder, key, &file) {
                    break 'deck;
                }
            }
        }
        recorder.dispose()
    });

    // Spawn terminal input reader
    let input_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(10)) => {
                    // Poll for terminal events
                    if event::poll(Duration::from_millis(0)).unwrap_or(false) {
                        if let Ok(Event::Key(key_event)) = event::read() {
                            if key_event.kind != KeyEventKind::Press {
                                continue;
                            }
                            if let Some(key) = translate_key(key_event.code, key_event.modifiers) {
                                if key_tx.send(key).is_err() {
                                    break; // Deck finished
                                }
                            }
                        }
                    }
                }
            }
        }
    });

    // Wait for the deck to shut down
    let result = deck_handle.await?;

    // Signal input handler to stop
    let _ = shutdown_tx.send(()).await;
    let _ = input_handle.await;

    // Disable raw mode if we enabled it
    if raw_mode_enabled {
        let _ = disable_raw_mode();
    }

    if let Err(e) = result {
        eprintln!("\nShutdown failed: {}", e);
        link.disconnect();
        return Err(e.into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Cmd::Ports => list_ports(),
        Cmd::Info { file } => show_info(&file),
        Cmd::Play {
            file,
            port,
            config,
            baud,
            seek,
            autoplay,
        } => play(file, port, config, baud, seek, autoplay).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_key() {
        assert_eq!(
            translate_key(KeyCode::Char(' '), KeyModifiers::NONE),
            Some(DeckKey::PlayStop)
        );
        assert_eq!(
            translate_key(KeyCode::Char('c'), KeyModifiers::CONTROL),
            Some(DeckKey::Quit)
        );
        assert_eq!(
            translate_key(KeyCode::Left, KeyModifiers::NONE),
            Some(DeckKey::Seek(-SEEK_STEP))
        );
        assert_eq!(translate_key(KeyCode::Char('x'), KeyModifiers::NONE), None);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "00:00.0");
        assert_eq!(format_time(83.25), "01:23.3");
        assert_eq!(format_time(600.0), "10:00.0");
    }
}

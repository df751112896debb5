#![deny(warnings)]
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vpad_client::driver::mock::MockDriver;
use vpad_client::{Bus, Ds4Controller, Gamepad, PadOptions, X360Controller};
use vpad_protocol::{DPad, Ds4Buttons, Ds4SpecialButtons, XusbButtons};

mod script;

#[derive(Parser)]
#[command(name = "vpad", about = "Virtual gamepad tools")]
struct Cli {
    /// Use the in-memory driver and log every report instead of touching a bus.
    #[arg(long, global = true)]
    mock: bool,
    /// Vendor id override, hex (0x045E) or decimal.
    #[arg(long, global = true, value_parser = parse_id)]
    vid: Option<u16>,
    /// Product id override, hex (0x028E) or decimal.
    #[arg(long, global = true, value_parser = parse_id)]
    pid: Option<u16>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Plug in a controller and run a short press/stick/release sequence.
    Demo {
        #[arg(value_enum)]
        kind: PadKind,
    },
    /// Replay a JSON-lines input script.
    Play {
        #[arg(value_enum)]
        kind: PadKind,
        script: PathBuf,
    },
    /// Connect to the bus and report whether it is reachable.
    Check,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PadKind {
    X360,
    Ds4,
}

fn parse_id(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{s:?}: {e}"))
}

/// The bus plus, in mock mode, the driver whose reports get echoed.
struct Session {
    bus: Arc<Bus>,
    mock: Option<Arc<MockDriver>>,
    options: PadOptions,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self> {
        let options = PadOptions { vendor_id: cli.vid, product_id: cli.pid };
        if cli.mock {
            let mock = MockDriver::new();
            return Ok(Self { bus: Bus::new(mock.clone()), mock: Some(mock), options });
        }
        let bus = Bus::open_default().context("opening the emulation bus")?;
        Ok(Self { bus, mock: None, options })
    }

    /// Sends the pad's state and, in mock mode, logs the bytes that went out.
    fn send<G: Gamepad>(&self, pad: &G) -> Result<()> {
        pad.update()?;
        if let Some(mock) = &self.mock {
            if let Some(bytes) = mock.last_report(pad.handle().target()) {
                info!(kind = %pad.kind(), report = %hex::encode(&bytes), "report");
            }
        }
        Ok(())
    }
}

fn step<G: Gamepad>(session: &Session, pad: &G, what: &str, pause: Duration) -> Result<()> {
    info!("{what}");
    session.send(pad)?;
    sleep(pause);
    Ok(())
}

fn demo_x360(session: &Session) -> Result<()> {
    let short = Duration::from_millis(500);
    let long = Duration::from_secs(1);
    let mut pad = X360Controller::with_options(&session.bus, session.options)?;

    pad.press_button(XusbButtons::A);
    step(session, &pad, "pressing A to wake the device", short)?;
    pad.release_button(XusbButtons::A);
    step(session, &pad, "releasing A", short)?;

    pad.press_button(XusbButtons::A);
    pad.press_button(XusbButtons::LEFT_SHOULDER);
    pad.press_button(XusbButtons::DPAD_DOWN);
    pad.press_button(XusbButtons::DPAD_LEFT);
    pad.left_trigger_float(0.5);
    pad.right_trigger_float(0.5);
    pad.left_joystick_float(0.0, 0.2);
    pad.right_joystick_float(-1.0, 1.0);
    step(session, &pad, "pressing buttons and moving sticks", long)?;

    pad.release_button(XusbButtons::A);
    pad.release_button(XusbButtons::DPAD_LEFT);
    pad.right_trigger_float(0.0);
    pad.right_joystick_float(0.0, 0.0);
    step(session, &pad, "releasing some buttons", long)?;

    pad.reset();
    step(session, &pad, "resetting", long)?;
    pad.close();
    Ok(())
}

fn demo_ds4(session: &Session) -> Result<()> {
    let short = Duration::from_millis(500);
    let long = Duration::from_secs(1);
    let mut pad = Ds4Controller::with_options(&session.bus, session.options)?;

    pad.press_button(Ds4Buttons::TRIANGLE);
    step(session, &pad, "pressing triangle to wake the device", short)?;
    pad.release_button(Ds4Buttons::TRIANGLE);
    step(session, &pad, "releasing triangle", short)?;

    pad.press_button(Ds4Buttons::TRIANGLE);
    pad.press_button(Ds4Buttons::CIRCLE);
    pad.press_button(Ds4Buttons::THUMB_RIGHT);
    pad.press_button(Ds4Buttons::TRIGGER_LEFT);
    pad.press_special_button(Ds4SpecialButtons::TOUCHPAD);
    pad.directional_pad(DPad::North);
    pad.left_trigger_float(0.5);
    pad.right_trigger_float(0.5);
    pad.left_joystick_float(0.0, 0.2);
    pad.right_joystick_float(-1.0, 1.0);
    step(session, &pad, "pressing buttons and moving sticks", long)?;

    pad.release_button(Ds4Buttons::TRIANGLE);
    pad.directional_pad(DPad::Neutral);
    pad.right_trigger_float(0.0);
    pad.right_joystick_float(0.0, 0.0);
    step(session, &pad, "releasing some buttons", long)?;

    pad.reset();
    step(session, &pad, "resetting", long)?;
    pad.close();
    Ok(())
}

fn play(session: &Session, kind: PadKind, path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let frames = script::read_frames(BufReader::new(file))?;
    info!(frames = frames.len(), script = %path.display(), "playing");

    enum Pad {
        X360(X360Controller),
        Ds4(Ds4Controller),
    }
    let mut pad = match kind {
        PadKind::X360 => Pad::X360(X360Controller::with_options(&session.bus, session.options)?),
        PadKind::Ds4 => Pad::Ds4(Ds4Controller::with_options(&session.bus, session.options)?),
    };

    for (n, frame) in frames.iter().enumerate() {
        let applied = match &mut pad {
            Pad::X360(p) => frame.apply_x360(p).and_then(|()| session.send(&*p)),
            Pad::Ds4(p) => frame.apply_ds4(p).and_then(|()| session.send(&*p)),
        };
        applied.with_context(|| format!("frame {}", n + 1))?;
        if let Some(hold) = frame.hold() {
            sleep(hold);
        }
    }
    Ok(())
}

fn check(session: &Session) -> Result<()> {
    let conn = session.bus.get_or_create()?;
    info!(bus = ?conn.ptr(), "bus reachable");
    println!("ok");
    session.bus.close();
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let session = Session::open(&cli)?;
    if cli.mock {
        warn!("mock driver: no device will appear on this machine");
    }

    match &cli.cmd {
        Cmd::Demo { kind: PadKind::X360 } => demo_x360(&session)?,
        Cmd::Demo { kind: PadKind::Ds4 } => demo_ds4(&session)?,
        Cmd::Play { kind, script: path } => play(&session, *kind, path)?,
        Cmd::Check => check(&session)?,
    }
    info!("done");
    Ok(())
}

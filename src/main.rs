//! openbleep - live audio passthrough with a triggered bleep
//!
//! Command line front end for the router: list the audio devices, or route
//! one input to one output until Ctrl-C while printing status updates.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, select};

use openbleep::audio::preferred_output;
use openbleep::{BleepConfig, BleepRouter, Key, RouterEvent, Severity};

#[derive(Parser, Debug)]
#[command(name = "openbleep", version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List input and output devices with their ids
    Devices,

    /// Route audio until interrupted
    Run {
        /// Input device id (default: first input)
        #[arg(short, long)]
        input: Option<usize>,

        /// Output device id (default: the virtual cable, if present)
        #[arg(short, long)]
        output: Option<usize>,

        /// Bleep amplitude, 0.0 to 1.0
        #[arg(short, long)]
        amplitude: Option<f32>,

        /// Key that holds the bleep in keybind mode
        #[arg(short, long)]
        key: Option<String>,

        /// Capture the keybind from the next key press
        #[arg(long)]
        capture_key: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    log::info!("Starting openbleep");

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => BleepConfig::load_from(path),
        None => BleepConfig::load(),
    };
    let mut router = BleepRouter::new(config);

    match cli.command {
        Command::Devices => {
            let devices = router.list_audio_devices()?;
            println!("Inputs:");
            for device in &devices.inputs {
                println!("  {}", device);
            }
            println!("Outputs:");
            for device in &devices.outputs {
                println!("  {}", device);
            }
            Ok(())
        }
        Command::Run {
            input,
            output,
            amplitude,
            key,
            capture_key,
        } => {
            let devices = router.list_audio_devices()?;
            let input = input
                .or_else(|| devices.inputs.first().map(|d| d.id))
                .ok_or("no input device available")?;
            let output = output
                .or_else(|| preferred_output(&devices.outputs, &router.config().audio.preferred_output).map(|d| d.id))
                .ok_or("no output device available")?;
            let amplitude = amplitude.unwrap_or(router.config().tone.amplitude);

            if let Some(key) = key {
                router.set_keybind(Key::named(key));
            }
            if capture_key {
                router.begin_keybind_capture()?;
            }

            let (stop_tx, stop_rx) = bounded(1);
            ctrlc::set_handler(move || {
                let _ = stop_tx.try_send(());
            })?;

            router.start_routing(input, output, amplitude)?;
            let events = router.events();
            loop {
                select! {
                    recv(events) -> event => match event {
                        Ok(event) => print_event(&event),
                        Err(_) => break,
                    },
                    recv(stop_rx) -> _ => {
                        println!("\nInterrupted, stopping...");
                        break;
                    }
                }
            }

            router.stop_routing();
            for event in events.try_iter() {
                print_event(&event);
            }
            Ok(())
        }
    }
}

fn print_event(event: &RouterEvent) {
    match event {
        RouterEvent::Status(status) => {
            let tag = match status.severity {
                Severity::Normal => "     ",
                Severity::Success => "  ok ",
                Severity::Warning => "warn ",
                Severity::Error => "ERROR",
            };
            println!("[{}] {}", tag, status.text);
        }
        RouterEvent::KeybindCaptured(name) => println!("Keybind: {}", name),
    }
}

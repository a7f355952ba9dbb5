//! Audio device listing command.

use clap::{Args, Subcommand};
use serde::Serialize;
use streamgraph_io::{AudioDevice, default_output_device, list_devices};

#[derive(Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    command: Option<DevicesCommand>,
}

#[derive(Subcommand)]
enum DevicesCommand {
    /// List all available audio devices
    List {
        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the default output device
    Info,
}

#[derive(Serialize)]
struct DeviceRow<'a> {
    name: &'a str,
    input: bool,
    output: bool,
    sample_rate: u32,
}

impl<'a> From<&'a AudioDevice> for DeviceRow<'a> {
    fn from(device: &'a AudioDevice) -> Self {
        Self {
            name: &device.name,
            input: device.is_input,
            output: device.is_output,
            sample_rate: device.default_sample_rate,
        }
    }
}

pub fn run(args: DevicesArgs) -> anyhow::Result<()> {
    match args.command.unwrap_or(DevicesCommand::List { json: false }) {
        DevicesCommand::List { json } => {
            let devices = list_devices()?;

            if json {
                let rows: Vec<DeviceRow<'_>> = devices.iter().map(DeviceRow::from).collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }

            if devices.is_empty() {
                println!("No audio devices found.");
                return Ok(());
            }

            println!("Available Audio Devices");
            println!("=======================\n");

            let outputs: Vec<_> = devices.iter().filter(|d| d.is_output).collect();
            if !outputs.is_empty() {
                println!("Output Devices:");
                for (idx, device) in outputs.iter().enumerate() {
                    let also_input = if device.is_input { " (also input)" } else { "" };
                    println!("  [{}] {} ({} Hz){}", idx, device.name, device.default_sample_rate, also_input);
                }
                println!();
            }

            let inputs = devices.iter().filter(|d| d.is_input && !d.is_output).count();
            println!("Total: {} output(s), {} input-only", outputs.len(), inputs);
            println!();
            println!("Tip: pick an output by partial name:");
            println!("  streamgraph play --tone 440 --output \"USB\"");
        }

        DevicesCommand::Info => match default_output_device()? {
            Some(device) => {
                println!("Default Output:");
                println!("  Name: {}", device.name);
                println!("  Sample Rate: {} Hz", device.default_sample_rate);
            }
            None => println!("Default Output: None"),
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_row_json() {
        let device = AudioDevice {
            name: "Speakers".to_string(),
            is_input: false,
            is_output: true,
            default_sample_rate: 48000,
        };
        let json = serde_json::to_value(DeviceRow::from(&device)).unwrap();
        assert_eq!(json["name"], "Speakers");
        assert_eq!(json["output"], true);
        assert_eq!(json["sample_rate"], 48000);
    }
}

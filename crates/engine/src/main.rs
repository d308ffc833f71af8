//! wdshim probe
//!
//! Inspects what the emulation engine would see on this host: the USB
//! topology, the flat device-data buffer a client would receive for a
//! device, which device a match table selects, and which parallel-port node
//! serves an I/O base.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use common::{UsbBus, hexdump, setup_logging};
use engine::ShimConfig;
use engine::parport::parport_path;
use engine::usb::{self, RusbBackend, UsbBackend};
use protocol::{MatchEntry, WordSize};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "wdshim-probe")]
#[command(
    author,
    version,
    about = "wdshim probe - Inspect devices as the WinDriver emulation sees them"
)]
#[command(long_about = "
Inspects the host the way the WinDriver emulation engine does, without
running a client program.

EXAMPLES:
    # List USB devices in enumeration order
    wdshim-probe list

    # Show the device-data buffer a 32-bit client gets for a device
    wdshim-probe dump 03fd:0008 --word-size 4

    # Check which device a match table selects
    wdshim-probe match --vid 0x03fd --pid 0x0008

    # Show the node serving I/O base 0x378
    wdshim-probe parport-path 0x378

CONFIGURATION:
    Configuration files are searched in the following order:
    1. Path specified with --config
    2. $WDSHIM_CONFIG
    3. ~/.config/wdshim/shim.toml
    4. /etc/wdshim/shim.toml
    5. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List USB devices and exit
    List,

    /// Print the flat device-data buffer for a device
    Dump {
        /// Device as VID:PID in hex
        #[arg(value_parser = parse_vid_pid)]
        device: (u16, u16),

        /// Client word size in bytes (4 or 8)
        #[arg(long, value_name = "BYTES")]
        word_size: Option<usize>,
    },

    /// Run the device matcher against one match table
    Match {
        #[arg(long, value_parser = parse_number::<u16>)]
        vid: u16,
        #[arg(long, value_parser = parse_number::<u16>)]
        pid: u16,
        #[arg(long, default_value = "0", value_parser = parse_number::<u8>)]
        class: u8,
        #[arg(long, default_value = "0", value_parser = parse_number::<u8>)]
        subclass: u8,
        #[arg(long, default_value = "0", value_parser = parse_number::<u8>)]
        interface_subclass: u8,
        #[arg(long, default_value = "0", value_parser = parse_number::<u8>)]
        interface_protocol: u8,
    },

    /// Print the parallel-port node serving an I/O base
    ParportPath {
        #[arg(value_parser = parse_number::<u64>)]
        base: u64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ShimConfig::default();
        let path = ShimConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        ShimConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ShimConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.shim.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;
    info!("wdshim probe v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        None => {
            print!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
            Ok(())
        }
        Some(Command::List) => list_devices(&enumerate()?),
        Some(Command::Dump { device, word_size }) => {
            let word = match word_size {
                Some(bytes) => WordSize::from_bytes(bytes)?,
                None => config.word_size(),
            };
            dump_device(&enumerate()?, device, word)
        }
        Some(Command::Match {
            vid,
            pid,
            class,
            subclass,
            interface_subclass,
            interface_protocol,
        }) => {
            let entry = MatchEntry {
                vendor_id: vid,
                product_id: pid,
                device_class: class,
                device_subclass: subclass,
                interface_class: 0,
                interface_subclass,
                interface_protocol,
            };
            let buses = enumerate()?;
            match usb::find_match(&buses, &[entry]) {
                Some(at) => {
                    let device = common::device_at(&buses, at)
                        .ok_or_else(|| anyhow!("Matched device vanished from topology"))?;
                    println!("Matched {}", device.label());
                }
                None => println!("No device matched."),
            }
            Ok(())
        }
        Some(Command::ParportPath { base }) => {
            println!(
                "{:#x} -> {}",
                base,
                parport_path(&config.parport.path_prefix, base).display()
            );
            Ok(())
        }
    }
}

fn enumerate() -> Result<Vec<UsbBus>> {
    let mut backend = RusbBackend::new().context("Failed to initialize libusb")?;
    backend.enumerate().context("Failed to enumerate USB devices")
}

fn list_devices(buses: &[UsbBus]) -> Result<()> {
    let count: usize = buses.iter().map(|b| b.devices.len()).sum();
    if count == 0 {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", count);
    for bus in buses {
        for device in &bus.devices {
            let d = &device.descriptor;
            println!(
                "  {:04x}:{:04x} - class {:#04x}/{:#04x}",
                d.vendor_id, d.product_id, d.device_class, d.device_subclass
            );
            println!("      Bus {:03} Device {:03}", device.bus_number, device.address);
            for alt in device.alt_settings() {
                let i = &alt.descriptor;
                println!(
                    "      Interface {} alt {}: class {:#04x}/{:#04x}/{:#04x}, {} endpoint(s)",
                    i.interface_number,
                    i.alternate_setting,
                    i.interface_class,
                    i.interface_subclass,
                    i.interface_protocol,
                    alt.endpoints.len()
                );
            }
            println!();
        }
    }
    Ok(())
}

fn dump_device(buses: &[UsbBus], (vid, pid): (u16, u16), word: WordSize) -> Result<()> {
    let device = buses
        .iter()
        .flat_map(|b| b.devices.iter())
        .find(|d| d.vendor_id() == vid && d.product_id() == pid)
        .ok_or_else(|| anyhow!("No device {:04x}:{:04x} found", vid, pid))?;

    let data = usb::serialize(device, word).context("Failed to serialize device data")?;
    println!(
        "{}: {} bytes for {}-byte words",
        device.label(),
        data.len(),
        word.bytes()
    );
    println!("{}", hexdump(&data));
    Ok(())
}

/// Parse `VID:PID`, each in hex with an optional `0x`
fn parse_vid_pid(s: &str) -> Result<(u16, u16), String> {
    let (vid, pid) = s
        .split_once(':')
        .ok_or_else(|| format!("expected VID:PID, got '{}'", s))?;
    let hex = |part: &str| {
        let digits = part.trim_start_matches("0x").trim_start_matches("0X");
        u16::from_str_radix(digits, 16).map_err(|e| format!("invalid id '{}': {}", part, e))
    };
    Ok((hex(vid)?, hex(pid)?))
}

/// Parse a decimal number, or hex with a `0x` prefix
fn parse_number<T>(s: &str) -> Result<T, String>
where
    T: TryFrom<u64>,
{
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    }
    .map_err(|e| format!("invalid number '{}': {}", s, e))?;
    T::try_from(value).map_err(|_| format!("{} is out of range", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vid_pid() {
        assert_eq!(parse_vid_pid("03fd:0008"), Ok((0x03fd, 0x0008)));
        assert_eq!(parse_vid_pid("0x03FD:0x8"), Ok((0x03fd, 0x0008)));
        assert!(parse_vid_pid("03fd").is_err());
        assert!(parse_vid_pid("03fd:zz").is_err());
        assert!(parse_vid_pid("10000:1").is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number::<u64>("0x378"), Ok(0x378));
        assert_eq!(parse_number::<u64>("888"), Ok(888));
        assert_eq!(parse_number::<u8>("0xff"), Ok(0xff));
        assert!(parse_number::<u8>("256").is_err());
        assert!(parse_number::<u16>("0xgg").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["wdshim-probe", "dump", "03fd:0008", "--word-size", "4"])
            .unwrap();
        match args.command {
            Some(Command::Dump { device, word_size }) => {
                assert_eq!(device, (0x03fd, 0x0008));
                assert_eq!(word_size, Some(4));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let args = Args::try_parse_from(["wdshim-probe", "parport-path", "0x378"]).unwrap();
        assert!(matches!(args.command, Some(Command::ParportPath { base: 0x378 })));
    }
}

use anyhow::{Context, Result};
use ath3k_load::bringup::{self, ModeOutcome, PatchOutcome};
use ath3k_load::device_ids::{DeviceCompat, UsbId, identify_device};
use ath3k_load::firmware::{FirmwareBlob, patch_file_name, syscfg_file_name};
use ath3k_load::protocol::{self, BULK_SIZE};
use ath3k_load::store::DirStore;
use ath3k_load::transport::UsbTransport;
use clap::{Args, Parser, Subcommand};
use log::{debug, info, warn};
use rusb::{Device, GlobalContext};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "ath3k-load", version, about)]
struct Opt {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List connected Atheros Bluetooth devices
    List,

    /// Show the bootloader state and version of a device, and the firmware files it needs
    Info {
        #[command(flatten)]
        spec: DeviceSpec,
    },

    /// Load the RAM patch and system config, then switch the device to normal mode
    Load {
        #[command(flatten)]
        spec: DeviceSpec,

        /// Directory containing AthrBT_*.dfu and ramps_*.dfu files
        #[arg(
            short = 'd',
            long,
            env = "ATH3K_FIRMWARE_DIR",
            default_value = "/lib/firmware/ar3k"
        )]
        firmware_dir: PathBuf,
    },

    /// Ask a loaded device to re-enumerate with its operational USB ID
    SwitchPid {
        #[command(flatten)]
        spec: DeviceSpec,
    },

    /// Summarize a firmware file without touching any device
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Error, Debug)]
enum MatchError {
    #[error("no devices match specification")]
    NoDevices,

    #[error("multiple devices match specification")]
    MultipleDevices,
}

#[derive(Args, Debug)]
struct DeviceSpec {
    /// Vendor ID in hex
    #[arg(short, long, value_parser = parse_hex_id)]
    vid: Option<u16>,

    /// Product ID in hex
    #[arg(short, long, value_parser = parse_hex_id)]
    pid: Option<u16>,

    /// Also match devices with Atheros' vendor ID but an unknown product ID
    #[arg(short, long)]
    force: bool,
}

impl DeviceSpec {
    fn matches(&self, id: UsbId) -> bool {
        if !identify_device(id).is_usable(self.force) {
            return false;
        }

        if let Some(vid) = self.vid {
            if id.vid != vid {
                return false;
            }
        }

        if let Some(pid) = self.pid {
            if id.pid != pid {
                return false;
            }
        }

        true
    }

    fn get_device(&self) -> Result<Device<GlobalContext>> {
        let devices = rusb::devices()?;
        let mut candidates = devices
            .iter()
            .filter(|d| usb_id(d).is_some_and(|id| self.matches(id)));

        match candidates.next() {
            None => Err(MatchError::NoDevices.into()),
            Some(dev) => {
                if candidates.next().is_some() {
                    Err(MatchError::MultipleDevices.into())
                } else {
                    info!(
                        "Using device {:03}:{:03}",
                        dev.bus_number(),
                        dev.address()
                    );
                    Ok(dev)
                }
            }
        }
    }

    fn open(&self) -> Result<UsbTransport<GlobalContext>> {
        let device = self.get_device()?;
        UsbTransport::open(&device).context("failed to open device")
    }
}

fn parse_hex_id(s: &str) -> Result<u16, std::num::ParseIntError> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn usb_id(device: &Device<GlobalContext>) -> Option<UsbId> {
    match device.device_descriptor() {
        Ok(desc) => Some(UsbId::new(desc.vendor_id(), desc.product_id())),
        Err(e) => {
            debug!(
                "Skipping device {:03}:{:03}: {e}",
                device.bus_number(),
                device.address()
            );
            None
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::new()
            .filter_or("ATH3K_LOAD_LOG", "info")
            .write_style("ATH3K_LOAD_LOG_STYLE"),
    )
    .init();

    match Opt::parse().command {
        Command::List => list()?,
        Command::Info { spec } => {
            let mut transport = spec.open()?;

            println!(
                "USB status: {:#06x}",
                protocol::read_device_status(&mut transport)?
            );
            println!("State: {}", protocol::read_state(&mut transport)?);

            let version = protocol::read_version(&mut transport)?;
            println!("Version: {version}");
            println!("Patch file: {}", patch_file_name(&version));
            println!("System config file: {}", syscfg_file_name(&version));
        }
        Command::Load { spec, firmware_dir } => {
            let mut transport = spec.open()?;
            let store = DirStore::new(firmware_dir);

            let status = protocol::read_device_status(&mut transport)
                .context("device did not report its USB status")?;
            info!("USB status before load: {status:#06x}");

            let report = bringup::run(&mut transport, &store)?;

            match report.patch {
                PatchOutcome::AlreadyLoaded => println!("Patch: already loaded"),
                PatchOutcome::Loaded { file, trailer } => println!(
                    "Patch: loaded {} (build {})",
                    store.root().join(file).display(),
                    trailer.build_version
                ),
            }
            println!(
                "System config: loaded {}",
                store.root().join(&report.syscfg_file).display()
            );
            println!(
                "Mode: {}",
                match report.mode {
                    ModeOutcome::AlreadyNormal => "already normal",
                    ModeOutcome::Switched => "switched to normal",
                }
            );
            if let Some(state) = report.final_state {
                println!("State: {state}");
            }

            match protocol::read_device_status(&mut transport) {
                Ok(status) => info!("USB status after load: {status:#06x}"),
                Err(e) => warn!("Couldn't read USB status after load: {e}"),
            }
        }
        Command::SwitchPid { spec } => {
            protocol::switch_vid_pid(&mut spec.open()?)?;
        }
        Command::Inspect { file } => inspect(file)?,
    };

    Ok(())
}

fn list() -> Result<()> {
    for dev in rusb::devices()?.iter() {
        let Some(id) = usb_id(&dev) else { continue };

        let compat = identify_device(id);
        if compat == DeviceCompat::Incompatible {
            continue;
        }

        println!(
            "{:03}:{:03} {} [{}]",
            dev.bus_number(),
            dev.address(),
            id,
            compat
        );
    }

    Ok(())
}

fn inspect(path: PathBuf) -> Result<()> {
    let data = std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let blob = FirmwareBlob::new(&data)?;
    let trailer = blob.trailer();

    println!("File: {}", path.display());
    println!(
        "Size: {} bytes ({} byte header, {} byte payload in {} bulk chunks)",
        blob.as_bytes().len(),
        blob.header().len(),
        blob.payload().len(),
        blob.payload().len().div_ceil(BULK_SIZE)
    );
    println!("Header: {:02x?}", blob.header());
    println!(
        "Trailer: ROM {:#010x}, build {} (only meaningful for patch files)",
        trailer.rom_version, trailer.build_version
    );
    println!("CRC32: {:#010x}", blob.crc32());

    Ok(())
}

use crate::firmware::{
    FirmwareBlob, FirmwareError, PatchTrailer, patch_file_name, syscfg_file_name, validate_patch,
};
use crate::protocol::{self, DeviceState};
use crate::store::{FirmwareStore, StoreError};
use crate::transport::Transport;
use log::{debug, info, warn};
use std::fmt::Display;
use thiserror::Error;

/// Steps of the load sequence that can fail. They run in declaration order and none is revisited.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stage {
    PatchCheck,
    PatchDownload,
    SysCfgFetch,
    SysCfgDownload,
    ModeCheck,
    ModeSet,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Stage::PatchCheck => "patch check",
            Stage::PatchDownload => "patch download",
            Stage::SysCfgFetch => "system config fetch",
            Stage::SysCfgDownload => "system config download",
            Stage::ModeCheck => "mode check",
            Stage::ModeSet => "mode set",
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PatchOutcome {
    /// The device said it already had a patch, so none was sent.
    AlreadyLoaded,
    Loaded { file: String, trailer: PatchTrailer },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModeOutcome {
    AlreadyNormal,
    Switched,
}

/// What a successful [run] did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Report {
    pub patch: PatchOutcome,
    pub syscfg_file: String,
    pub mode: ModeOutcome,
    /// Last state read from the device, if that read succeeded. Informational only.
    pub final_state: Option<DeviceState>,
}

/// Load the RAM patch (unless the device already has one) and the system config, then switch
/// the device to normal mode. `transport` must already have the device's interface claimed.
///
/// Nothing is retried. The first failure ends the run and is reported with the [Stage] it
/// happened in; if that was a download, the device is left mid-download and needs a fresh run.
pub fn run(
    transport: &mut impl Transport,
    store: &impl FirmwareStore,
) -> Result<Report, BringUpError> {
    let patch = load_patch(transport, store)?;
    let syscfg_file = load_syscfg(transport, store)?;
    let (mode, final_state) = enter_normal_mode(transport)?;

    info!("Firmware loaded successfully");
    Ok(Report {
        patch,
        syscfg_file,
        mode,
        final_state,
    })
}

fn load_patch(
    transport: &mut impl Transport,
    store: &impl FirmwareStore,
) -> Result<PatchOutcome, BringUpError> {
    use Stage::*;

    let state = protocol::read_state(transport).at(PatchCheck)?;
    if state.patch_loaded() {
        info!("Patch already loaded (state {state}); skipping");
        return Ok(PatchOutcome::AlreadyLoaded);
    }

    let version = protocol::read_version(transport).at(PatchCheck)?;
    let file = patch_file_name(&version);
    info!("Loading patch {file}");

    let data = store.lookup(&file).at(PatchCheck)?;
    let blob = FirmwareBlob::new(&data).at(PatchCheck)?;
    let trailer = validate_patch(&blob, &version).at(PatchCheck)?;
    debug!(
        "Patch is {} bytes, CRC32 {:#010x}, build {} for ROM {:#010x}",
        blob.as_bytes().len(),
        blob.crc32(),
        trailer.build_version,
        trailer.rom_version
    );

    protocol::download(transport, &blob).at(PatchDownload)?;
    Ok(PatchOutcome::Loaded { file, trailer })
}

/// The system config is always sent, even if the state byte says one is already loaded, and its
/// trailer is not checked.
fn load_syscfg(
    transport: &mut impl Transport,
    store: &impl FirmwareStore,
) -> Result<String, BringUpError> {
    use Stage::*;

    // Loading a patch may have changed the version.
    let version = protocol::read_version(transport).at(SysCfgFetch)?;
    let file = syscfg_file_name(&version);
    info!("Loading system config {file}");

    let data = store.lookup(&file).at(SysCfgFetch)?;
    let blob = FirmwareBlob::new(&data).at(SysCfgFetch)?;
    debug!(
        "System config is {} bytes, CRC32 {:#010x}",
        blob.as_bytes().len(),
        blob.crc32()
    );

    protocol::download(transport, &blob).at(SysCfgDownload)?;
    Ok(file)
}

fn enter_normal_mode(
    transport: &mut impl Transport,
) -> Result<(ModeOutcome, Option<DeviceState>), BringUpError> {
    use Stage::*;

    let state = protocol::read_state(transport).at(ModeCheck)?;
    if state.is_normal_mode() {
        info!("Device already in normal mode");
        return Ok((ModeOutcome::AlreadyNormal, Some(state)));
    }

    protocol::set_normal_mode(transport).at(ModeSet)?;

    let final_state = match protocol::read_state(transport) {
        Ok(state) => {
            info!("Device state after mode switch: {state}");
            Some(state)
        }
        Err(e) => {
            warn!("Couldn't read state after mode switch: {e}");
            None
        }
    };
    Ok((ModeOutcome::Switched, final_state))
}

/// A failed load, with the stage it failed in.
#[derive(Error, Debug)]
#[error("firmware load failed during {stage}")]
pub struct BringUpError {
    pub stage: Stage,
    #[source]
    pub cause: Cause,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Cause {
    #[error("device communication failed")]
    Protocol(#[from] protocol::Error),

    #[error("firmware file unavailable")]
    Store(#[from] StoreError),

    #[error("firmware file rejected")]
    Firmware(#[from] FirmwareError),
}

/// Tag a step's error with the stage it belongs to.
trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, BringUpError>;
}

impl<T, E: Into<Cause>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, BringUpError> {
        self.map_err(|e| BringUpError {
            stage,
            cause: e.into(),
        })
    }
}

use crate::protocol::DeviceVersion;
use byteorder::{ByteOrder, LE};
use thiserror::Error;

/// Size of the header that is sent ahead of the payload in a DNLOAD control request.
pub const FW_HDR_SIZE: usize = 20;

/// Size of the version trailer at the end of a patch file.
pub const TRAILER_SIZE: usize = 8;

/// Smallest file that can carry both a header and a trailer.
pub const MIN_FIRMWARE_SIZE: usize = FW_HDR_SIZE + TRAILER_SIZE;

/// A firmware file (patch or system config) as it is sent to the device. Borrowed from whoever
/// loaded it; never modified.
#[derive(Copy, Clone, Debug)]
pub struct FirmwareBlob<'a> {
    data: &'a [u8],
}

impl<'a> FirmwareBlob<'a> {
    /// Wrap `data`, rejecting anything too short to hold a header and a trailer.
    pub fn new(data: &'a [u8]) -> Result<Self, FirmwareError> {
        if data.len() < MIN_FIRMWARE_SIZE {
            return Err(FirmwareError::TooShort {
                minimum: MIN_FIRMWARE_SIZE,
                actual: data.len(),
            });
        }
        Ok(Self { data })
    }

    /// The first [FW_HDR_SIZE] bytes.
    pub fn header(&self) -> &'a [u8] {
        &self.data[..FW_HDR_SIZE]
    }

    /// Everything after the header, including the trailer.
    pub fn payload(&self) -> &'a [u8] {
        &self.data[FW_HDR_SIZE..]
    }

    /// The whole file, header and trailer included.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Version stamp in the last [TRAILER_SIZE] bytes. Only meaningful for patch files.
    pub fn trailer(&self) -> PatchTrailer {
        let trailer = &self.data[self.data.len() - TRAILER_SIZE..];
        PatchTrailer {
            rom_version: LE::read_u32(&trailer[0..4]),
            build_version: LE::read_u32(&trailer[4..8]),
        }
    }

    /// IEEE CRC32 over the whole file, for diagnostics. The device never sees it.
    pub fn crc32(&self) -> u32 {
        crc32fast::hash(self.data)
    }
}

/// Versions a patch file claims to be built for and at.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PatchTrailer {
    pub rom_version: u32,
    pub build_version: u32,
}

/// Check that `patch` targets the device's ROM and is newer than the build already running on
/// it. Returns the trailer on success so callers can log it.
pub fn validate_patch(
    patch: &FirmwareBlob,
    device: &DeviceVersion,
) -> Result<PatchTrailer, FirmwareError> {
    let trailer = patch.trailer();
    if trailer.rom_version != device.rom_version || trailer.build_version <= device.build_version
    {
        return Err(FirmwareError::IncompatiblePatch {
            patch_rom: trailer.rom_version,
            patch_build: trailer.build_version,
            device_rom: device.rom_version,
            device_build: device.build_version,
        });
    }
    Ok(trailer)
}

/// Name of the RAM patch file for a device, e.g. `AthrBT_0x01020200.dfu`.
pub fn patch_file_name(version: &DeviceVersion) -> String {
    format!("AthrBT_0x{:08x}.dfu", version.rom_version)
}

/// Name of the system config file for a device, which also depends on its reference clock, e.g.
/// `ramps_0x01020200_40.dfu`.
pub fn syscfg_file_name(version: &DeviceVersion) -> String {
    format!(
        "ramps_0x{:08x}_{}.dfu",
        version.rom_version,
        version.clock().clock_value()
    )
}

/// Reasons a firmware file can't be used.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FirmwareError {
    #[error("firmware file is {actual} bytes, expected at least {minimum}")]
    TooShort { minimum: usize, actual: usize },

    #[error(
        "patch is for ROM {patch_rom:#010x} build {patch_build}, \
         but device has ROM {device_rom:#010x} build {device_build}"
    )]
    IncompatiblePatch {
        patch_rom: u32,
        patch_build: u32,
        device_rom: u32,
        device_build: u32,
    },
}

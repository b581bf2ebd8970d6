use crate::firmware::FirmwareBlob;
use crate::transport::{RequestKind, Transport};
use byteorder::{ByteOrder, LE};
use log::{debug, trace};
use num_enum::FromPrimitive;
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on every control transfer. Matches the host's standard request completion timeout.
pub const CONTROL_TIMEOUT: Duration = Duration::from_millis(5000);

/// Upper bound on each bulk chunk.
pub const BULK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Largest chunk the bootloader accepts in one bulk write.
pub const BULK_SIZE: usize = 4096;

/// Size of the record returned by [VendorRequest::GETVERSION]: three u32s, the clock byte and 7
/// reserved bytes, packed.
pub const VERSION_SIZE: usize = 20;

#[repr(u8)]
#[allow(non_camel_case_types)] // Names from the vendor's driver
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VendorRequest {
    /// OUT, carries the firmware header. The payload follows over bulk.
    DNLOAD = 0x01,
    /// IN, 1 byte: [DeviceState].
    GETSTATE = 0x05,
    /// OUT, no data.
    SET_NORMAL_MODE = 0x07,
    /// IN, [VERSION_SIZE] bytes: [DeviceVersion].
    GETVERSION = 0x09,
    /// OUT, no data. Makes the device re-enumerate with its operational USB ID. Not part of the
    /// normal load sequence.
    SWITCH_VID_PID = 0x0a,
}

/// bRequest of the standard GET_STATUS request (USB 2.0 section 9.4.5).
const GET_STATUS: u8 = 0x00;

/// Snapshot of the device's vendor state byte. Goes stale as soon as anything is sent to the
/// device, so read a fresh one instead of holding onto it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceState(pub u8);

impl DeviceState {
    /// A RAM patch has already been loaded.
    pub const PATCH_UPDATE: u8 = 0x80;
    /// A system config has already been loaded.
    pub const SYSCFG_UPDATE: u8 = 0x40;
    pub const MODE_MASK: u8 = 0x3f;
    pub const NORMAL_MODE: u8 = 0x0e;

    pub fn patch_loaded(self) -> bool {
        self.0 & Self::PATCH_UPDATE != 0
    }

    pub fn syscfg_loaded(self) -> bool {
        self.0 & Self::SYSCFG_UPDATE != 0
    }

    pub fn mode(self) -> u8 {
        self.0 & Self::MODE_MASK
    }

    pub fn is_normal_mode(self) -> bool {
        self.mode() == Self::NORMAL_MODE
    }
}

impl Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{:#04x} (mode {:#04x}{}, patch {}, syscfg {})",
            self.0,
            self.mode(),
            if self.is_normal_mode() { " = normal" } else { "" },
            if self.patch_loaded() { "loaded" } else { "absent" },
            if self.syscfg_loaded() { "loaded" } else { "absent" },
        )
    }
}

/// Frequency of the radio's reference crystal, as reported in [DeviceVersion::ref_clock].
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum ClockClass {
    Xtal26M = 0x00,
    Xtal40M = 0x01,
    Xtal19P2 = 0x02,
    #[num_enum(catch_all)]
    Unknown(u8),
}

impl ClockClass {
    /// Number used for the clock in system config file names.
    pub fn clock_value(self) -> u32 {
        match self {
            ClockClass::Xtal26M => 26,
            ClockClass::Xtal40M => 40,
            ClockClass::Xtal19P2 => 19,
            ClockClass::Unknown(_) => 0,
        }
    }
}

/// Version record returned by [VendorRequest::GETVERSION]. On the wire: three little-endian u32s,
/// the clock byte, then 7 reserved bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceVersion {
    pub rom_version: u32,
    pub build_version: u32,
    pub ram_version: u32,
    pub ref_clock: u8,
    pub reserved: [u8; 7],
}

impl DeviceVersion {
    pub fn decode(raw: &[u8; VERSION_SIZE]) -> Self {
        let mut reserved = [0u8; 7];
        reserved.copy_from_slice(&raw[13..VERSION_SIZE]);
        Self {
            rom_version: LE::read_u32(&raw[0..4]),
            build_version: LE::read_u32(&raw[4..8]),
            ram_version: LE::read_u32(&raw[8..12]),
            ref_clock: raw[12],
            reserved,
        }
    }

    pub fn encode(&self) -> [u8; VERSION_SIZE] {
        let mut raw = [0u8; VERSION_SIZE];
        LE::write_u32(&mut raw[0..4], self.rom_version);
        LE::write_u32(&mut raw[4..8], self.build_version);
        LE::write_u32(&mut raw[8..12], self.ram_version);
        raw[12] = self.ref_clock;
        raw[13..VERSION_SIZE].copy_from_slice(&self.reserved);
        raw
    }

    pub fn clock(&self) -> ClockClass {
        ClockClass::from(self.ref_clock)
    }
}

impl Display for DeviceVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ROM {:#010x}, build {}, RAM {:#010x}, clock {:?}",
            self.rom_version,
            self.build_version,
            self.ram_version,
            self.clock()
        )
    }
}

/// Read the vendor state byte.
pub fn read_state(transport: &mut impl Transport) -> Result<DeviceState, Error> {
    let mut buf = [0u8; 1];
    read_control(
        transport,
        RequestKind::Vendor,
        VendorRequest::GETSTATE as u8,
        &mut buf,
        "querying state",
    )?;

    let state = DeviceState(buf[0]);
    trace!("Device state: {state}");
    Ok(state)
}

/// Read the version record.
pub fn read_version(transport: &mut impl Transport) -> Result<DeviceVersion, Error> {
    let mut buf = [0u8; VERSION_SIZE];
    read_control(
        transport,
        RequestKind::Vendor,
        VendorRequest::GETVERSION as u8,
        &mut buf,
        "querying version",
    )?;

    let version = DeviceVersion::decode(&buf);
    debug!("Device version: {version}");
    Ok(version)
}

/// Read the standard USB device status word (self-powered and remote-wakeup bits).
pub fn read_device_status(transport: &mut impl Transport) -> Result<u16, Error> {
    let mut buf = [0u8; 2];
    read_control(
        transport,
        RequestKind::Standard,
        GET_STATUS,
        &mut buf,
        "querying USB status",
    )?;
    Ok(LE::read_u16(&buf))
}

/// Ask the device to leave the bootloader and start the loaded firmware.
pub fn set_normal_mode(transport: &mut impl Transport) -> Result<(), Error> {
    transport
        .control_write(VendorRequest::SET_NORMAL_MODE as u8, 0, 0, &[], CONTROL_TIMEOUT)
        .map_err(|e| Error::DeviceIo {
            source: e,
            action: "setting normal mode",
        })?;
    Ok(())
}

/// Ask the device to re-enumerate under its operational USB ID.
pub fn switch_vid_pid(transport: &mut impl Transport) -> Result<(), Error> {
    transport
        .control_write(VendorRequest::SWITCH_VID_PID as u8, 0, 0, &[], CONTROL_TIMEOUT)
        .map_err(|e| Error::DeviceIo {
            source: e,
            action: "switching USB ID",
        })?;
    Ok(())
}

/// Download (i.e. write) a firmware file to the device. The header goes out in a DNLOAD control
/// request, then the rest of the file is written to the bulk endpoint in chunks of at most
/// [BULK_SIZE] bytes. The first chunk that fails ends the download; nothing after it is sent and
/// the device is left mid-download.
pub fn download(transport: &mut impl Transport, blob: &FirmwareBlob) -> Result<(), Error> {
    let header = blob.header();
    let sent = transport
        .control_write(VendorRequest::DNLOAD as u8, 0, 0, header, CONTROL_TIMEOUT)
        .map_err(|e| Error::DeviceIo {
            source: e,
            action: "sending firmware header",
        })?;
    if sent < header.len() {
        return Err(ProtocolError::TransferTooShort {
            expected: header.len(),
            actual: sent,
        }
        .into());
    }

    let payload = blob.payload();
    let chunk_count = payload.len().div_ceil(BULK_SIZE);
    debug!(
        "Sent {} byte header; writing {} bytes in {chunk_count} chunks",
        header.len(),
        payload.len()
    );

    // Staging buffer for each chunk. Only reused once the previous write has returned.
    let mut staged = Vec::with_capacity(BULK_SIZE);

    // Chunks are numbered from 1 in errors and logs.
    for (chunk_index, chunk) in (1..).zip(payload.chunks(BULK_SIZE)) {
        staged.clear();
        staged.extend_from_slice(chunk);

        let written = transport
            .bulk_write(&staged, BULK_TIMEOUT)
            .map_err(|e| Error::ChunkFailed {
                source: e,
                chunk_index,
                bytes_attempted: staged.len(),
            })?;
        if written != staged.len() {
            return Err(ProtocolError::ShortBulkWrite {
                chunk_index,
                expected: staged.len(),
                actual: written,
            }
            .into());
        }

        trace!("Wrote chunk {chunk_index}/{chunk_count} ({written} bytes)");
    }

    Ok(())
}

/// Run an IN control request that must fill `buf` completely.
fn read_control(
    transport: &mut impl Transport,
    kind: RequestKind,
    request: u8,
    buf: &mut [u8],
    action: &'static str,
) -> Result<(), Error> {
    match transport.control_read(kind, request, 0, 0, buf, CONTROL_TIMEOUT) {
        Err(e) => Err(Error::DeviceIo { source: e, action }),
        Ok(s) if s < buf.len() => Err(ProtocolError::TransferTooShort {
            expected: buf.len(),
            actual: s,
        }
        .into()),
        Ok(_) => Ok(()),
    }
}

/// All errors (protocol and I/O) that can happen while talking to the bootloader.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("bootloader protocol error")]
    ProtocolError(#[from] ProtocolError),

    #[error("USB transaction error while {action}")]
    DeviceIo {
        source: rusb::Error,
        action: &'static str,
    },

    #[error("bulk write of firmware chunk {chunk_index} ({bytes_attempted} bytes) failed")]
    ChunkFailed {
        source: rusb::Error,
        chunk_index: usize,
        bytes_attempted: usize,
    },
}

/// Failure modes that can happen even when all I/O succeeds.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("control transfer moved {actual} bytes, expected {expected}")]
    TransferTooShort { expected: usize, actual: usize },

    #[error("device accepted {actual} of {expected} bytes of firmware chunk {chunk_index}")]
    ShortBulkWrite {
        chunk_index: usize,
        expected: usize,
        actual: usize,
    },
}

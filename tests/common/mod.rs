#![allow(dead_code)] // Not every test file uses every helper

use ath3k_load::firmware::TRAILER_SIZE;
use ath3k_load::protocol::{DeviceVersion, VendorRequest};
use ath3k_load::transport::{RequestKind, Transport};
use byteorder::{ByteOrder, LE};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    ControlRead {
        kind: RequestKind,
        request: u8,
        len: usize,
    },
    ControlWrite {
        request: u8,
        data: Vec<u8>,
    },
    BulkWrite(Vec<u8>),
}

/// Fake bootloader that answers state and version reads from a script and records every
/// operation it is asked to perform.
pub struct MockDevice {
    pub ops: Vec<Op>,
    /// Answers to successive GETSTATE reads. The last one repeats.
    pub states: Vec<u8>,
    /// Answers to successive GETVERSION reads. The last one repeats.
    pub versions: Vec<DeviceVersion>,
    /// 1-based index (counting all operations) of an operation that fails with a USB error.
    pub fail_op: Option<usize>,
    /// 1-based index of an operation that only moves half of its bytes.
    pub short_op: Option<usize>,
    state_reads: usize,
    version_reads: usize,
}

impl MockDevice {
    pub fn new(states: &[u8], versions: &[DeviceVersion]) -> Self {
        Self {
            ops: vec![],
            states: states.to_vec(),
            versions: versions.to_vec(),
            fail_op: None,
            short_op: None,
            state_reads: 0,
            version_reads: 0,
        }
    }

    /// Names of the operations performed so far, in order.
    pub fn script(&self) -> Vec<&'static str> {
        self.ops
            .iter()
            .map(|op| match op {
                Op::ControlRead {
                    kind: RequestKind::Standard,
                    ..
                } => "GET_STATUS",
                Op::ControlRead { request, .. } | Op::ControlWrite { request, .. } => {
                    request_name(*request)
                }
                Op::BulkWrite(_) => "BULK",
            })
            .collect()
    }

    pub fn bulk_writes(&self) -> Vec<&[u8]> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::BulkWrite(data) => Some(data.as_slice()),
                _ => None,
            })
            .collect()
    }

    /// Record `op` and decide how it completes: `Err` for a failure, otherwise how many of `len`
    /// bytes get moved.
    fn complete(&mut self, op: Op, len: usize) -> rusb::Result<usize> {
        self.ops.push(op);
        let n = self.ops.len();
        if self.fail_op == Some(n) {
            Err(rusb::Error::Pipe)
        } else if self.short_op == Some(n) {
            Ok(len / 2)
        } else {
            Ok(len)
        }
    }
}

fn request_name(request: u8) -> &'static str {
    match request {
        r if r == VendorRequest::DNLOAD as u8 => "DNLOAD",
        r if r == VendorRequest::GETSTATE as u8 => "GETSTATE",
        r if r == VendorRequest::SET_NORMAL_MODE as u8 => "SET_NORMAL_MODE",
        r if r == VendorRequest::GETVERSION as u8 => "GETVERSION",
        r if r == VendorRequest::SWITCH_VID_PID as u8 => "SWITCH_VID_PID",
        _ => "UNKNOWN",
    }
}

fn scripted<T: Copy>(answers: &[T], count: &mut usize) -> T {
    let answer = answers[(*count).min(answers.len() - 1)];
    *count += 1;
    answer
}

impl Transport for MockDevice {
    fn control_read(
        &mut self,
        kind: RequestKind,
        request: u8,
        _value: u16,
        _index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        match (kind, request) {
            (RequestKind::Standard, _) => LE::write_u16(&mut buf[..2], 0x0001),
            (_, r) if r == VendorRequest::GETSTATE as u8 => {
                buf[0] = scripted(&self.states, &mut self.state_reads);
            }
            (_, r) if r == VendorRequest::GETVERSION as u8 => {
                let raw = scripted(&self.versions, &mut self.version_reads).encode();
                buf.copy_from_slice(&raw);
            }
            _ => {}
        }

        let len = buf.len();
        self.complete(Op::ControlRead { kind, request, len }, len)
    }

    fn control_write(
        &mut self,
        request: u8,
        _value: u16,
        _index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        let op = Op::ControlWrite {
            request,
            data: data.to_vec(),
        };
        self.complete(op, data.len())
    }

    fn bulk_write(&mut self, data: &[u8], _timeout: Duration) -> rusb::Result<usize> {
        self.complete(Op::BulkWrite(data.to_vec()), data.len())
    }
}

pub fn version(rom_version: u32, build_version: u32, ref_clock: u8) -> DeviceVersion {
    DeviceVersion {
        rom_version,
        build_version,
        ram_version: 0,
        ref_clock,
        reserved: [0; 7],
    }
}

/// A `len` byte firmware file filled with a counting pattern and ending in a version trailer.
pub fn firmware(len: usize, rom_version: u32, build_version: u32) -> Vec<u8> {
    let mut data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let trailer = len - TRAILER_SIZE;
    LE::write_u32(&mut data[trailer..trailer + 4], rom_version);
    LE::write_u32(&mut data[trailer + 4..], build_version);
    data
}

pub fn store(files: &[(&str, Vec<u8>)]) -> HashMap<String, Vec<u8>> {
    files
        .iter()
        .map(|(name, data)| (name.to_string(), data.clone()))
        .collect()
}

use log::{debug, warn};
use rusb::{Device, DeviceHandle, Direction, Recipient, RequestType, UsbContext};
use std::time::Duration;

/// Interface the radio's bootloader exposes its bulk endpoint on.
pub const INTERFACE: u8 = 0;

/// Bulk OUT endpoint that firmware payloads are written to. Every AR3012 bootloader we know of
/// puts it at endpoint number 2.
pub const BULK_OUT_ENDPOINT: u8 = 0x02;

/// Type field of an IN control request. Direction and recipient are fixed by the [Transport]
/// methods: reads are always IN and every request is addressed to the device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestKind {
    Standard,
    Vendor,
}

/// The USB operations the firmware loader needs from its host. Implementors own the device
/// handle; callers get exclusive use by holding `&mut`.
pub trait Transport {
    /// IN control transfer to the device. Returns the number of bytes the device sent, which may
    /// be less than `buf.len()`.
    fn control_read(
        &mut self,
        kind: RequestKind,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    /// OUT vendor control transfer to the device. `data` may be empty.
    fn control_write(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    /// Write one buffer to the bulk OUT endpoint.
    fn bulk_write(&mut self, data: &[u8], timeout: Duration) -> rusb::Result<usize>;
}

/// [Transport] backed by a libusb device handle with [INTERFACE] claimed.
pub struct UsbTransport<T: UsbContext> {
    handle: DeviceHandle<T>,
}

impl<T: UsbContext> UsbTransport<T> {
    /// Open `device`, detach any kernel driver bound to [INTERFACE] and claim it.
    pub fn open(device: &Device<T>) -> rusb::Result<Self> {
        let mut handle = device.open()?;

        // Not supported on every platform; claiming will tell us if it actually mattered.
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {e}");
        }
        handle.claim_interface(INTERFACE)?;

        Ok(Self { handle })
    }
}

impl<T: UsbContext> Drop for UsbTransport<T> {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(INTERFACE) {
            warn!("Failed to release interface {INTERFACE}: {e}");
        }
    }
}

impl<T: UsbContext> Transport for UsbTransport<T> {
    fn control_read(
        &mut self,
        kind: RequestKind,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        let kind = match kind {
            RequestKind::Standard => RequestType::Standard,
            RequestKind::Vendor => RequestType::Vendor,
        };
        let request_type = rusb::request_type(Direction::In, kind, Recipient::Device);
        self.handle
            .read_control(request_type, request, value, index, buf, timeout)
    }

    fn control_write(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        self.handle
            .write_control(request_type, request, value, index, data, timeout)
    }

    fn bulk_write(&mut self, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.write_bulk(BULK_OUT_ENDPOINT, data, timeout)
    }
}

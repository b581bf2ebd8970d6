/// Run the full patch, system config and mode switch sequence on a device in bootloader mode.
pub mod bringup;

/// Check if a device is compatible based on USB IDs.
pub mod device_ids;

/// Firmware file layout, patch validation and file naming.
pub mod firmware;

/// Vendor control and bulk requests understood by the AR3012 bootloader.
pub mod protocol;

/// Look up firmware files by name.
pub mod store;

/// The USB operations the loader needs, and a libusb implementation of them.
pub mod transport;

use std::fmt::Display;

/// Vendor ID of Atheros' own boards. Many OEM modules keep it.
pub const ATHEROS_VID: u16 = 0x0cf3;

const COMPATIBLE_DEVICES: &[UsbId] = &[
    UsbId::new(ATHEROS_VID, 0x3004), // AR3012
    UsbId::new(ATHEROS_VID, 0x311d),
    UsbId::new(ATHEROS_VID, 0x817a),
    UsbId::new(0x04ca, 0x3004), // Lite-On
    UsbId::new(0x04ca, 0x3005),
    UsbId::new(0x13d3, 0x3375), // IMC Networks
    UsbId::new(0x0489, 0xe04e), // Foxconn
    UsbId::new(0x0489, 0xe056),
    UsbId::new(0x0930, 0x0219), // Toshiba
];

/// A USB vendor ID and product ID pair.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl UsbId {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

impl Display for UsbId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// Whether a device is one we know how to load.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DeviceCompat {
    /// Known AR3012-family radio. Usable by default.
    Compatible,
    /// Carries the Atheros vendor ID but an unknown product ID. Usable with "force" flag.
    Untested,
    /// Not an Atheros radio. Treated as if it doesn't exist.
    Incompatible,
}

impl DeviceCompat {
    pub fn is_usable(self, force: bool) -> bool {
        match self {
            DeviceCompat::Compatible => true,
            DeviceCompat::Untested => force,
            DeviceCompat::Incompatible => false,
        }
    }
}

impl Display for DeviceCompat {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DeviceCompat::Compatible => write!(f, "compatible device"),
            DeviceCompat::Untested => write!(f, "UNTESTED device"),
            DeviceCompat::Incompatible => write!(f, "incompatible device"),
        }
    }
}

/// Find a device's compatibility based on its USB ID.
pub fn identify_device(id: UsbId) -> DeviceCompat {
    if COMPATIBLE_DEVICES.contains(&id) {
        DeviceCompat::Compatible
    } else if id.vid == ATHEROS_VID {
        DeviceCompat::Untested
    } else {
        DeviceCompat::Incompatible
    }
}

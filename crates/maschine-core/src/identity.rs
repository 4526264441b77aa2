//! Device identity
//!
//! NI devices are identified by a 16-bit device type id that matches the
//! USB product id, plus an ASCII serial for one physical unit. A missing
//! serial means "any device of this type" and selects a global
//! (per-device-type) connection rather than a per-unit one.

/// Device type id for the Komplete Kontrol mk2 keyboards.
pub const DEVICE_TYPE_KONTROL_MK2: u16 = 0x1610;

/// Device type id for the Maschine mk3.
pub const DEVICE_TYPE_MASCHINE_MK3: u16 = 0x1600;

/// Identity of a physical device or a device class.
///
/// Constructed once at connection-open time and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    /// Device type id (matches the USB PID)
    device_type: u16,
    /// Serial of one physical unit; `None` for a device-class identity
    serial: Option<String>,
}

impl DeviceIdentity {
    /// Identity for one physical unit.
    ///
    /// An empty serial is normalized to a global identity, matching how
    /// the agent treats an empty serial in the handshake.
    pub fn new(device_type: u16, serial: impl Into<String>) -> Self {
        let serial = serial.into();
        Self {
            device_type,
            serial: if serial.is_empty() { None } else { Some(serial) },
        }
    }

    /// Identity for "any device of this type" (discovery/bootstrap).
    pub fn global(device_type: u16) -> Self {
        Self { device_type, serial: None }
    }

    pub fn device_type(&self) -> u16 {
        self.device_type
    }

    /// Serial bytes for the wire; empty slice for a global identity.
    pub fn serial(&self) -> &str {
        self.serial.as_deref().unwrap_or("")
    }

    /// True iff this identity names a device class rather than one unit.
    pub fn is_global(&self) -> bool {
        self.serial.is_none()
    }

    /// Komplete Kontrol devices are claimed exclusively rather than shared.
    pub fn is_kontrol(&self) -> bool {
        self.device_type == DEVICE_TYPE_KONTROL_MK2
    }
}

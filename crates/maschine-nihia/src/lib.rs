//! IPC driver for the NI host integration agent
//!
//! Native Instruments hardware is mediated by a background agent; this
//! crate speaks its reverse-engineered RPC protocol. A session hands out
//! connections: global ones per device type for discovery, per-device ones
//! for events and control. Each connection runs a listener thread that
//! decodes inbound notifications and posts consumer events through a
//! [`maschine_core::HostScheduler`].
//!
//! Transports are platform-specific (mach message ports on macOS, named
//! pipes on Windows) behind the [`transport::TransportFactory`] trait; an
//! in-memory mock backs the tests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use maschine_core::{ChannelScheduler, DeviceIdentity, DEVICE_TYPE_KONTROL_MK2};
//! use maschine_nihia::NihiaSession;
//!
//! # fn main() -> Result<(), maschine_nihia::NihiaError> {
//! let (scheduler, tasks) = ChannelScheduler::new(256);
//! let session = NihiaSession::open(scheduler)?;
//! let device = DeviceIdentity::new(DEVICE_TYPE_KONTROL_MK2, "ABC123");
//! let connection = session.connect(&device, None)?;
//! connection.request_focus();
//! # let _ = tasks;
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod dispatch;
mod registry;
mod session;
pub mod transport;

pub use registry::KnownDeviceRegistry;
pub use session::{NihiaConnection, NihiaError, NihiaSession};

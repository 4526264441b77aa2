//! Shared types for the Maschine/Kontrol host driver
//!
//! This crate provides:
//! - Device identity (device type id + optional serial)
//! - Structured hardware events (buttons, knobs, encoder, pads)
//! - The host scheduler abstraction that keeps consumer callbacks off
//!   protocol threads
//! - Pad-to-note scales and the driver configuration file
//!
//! # Architecture
//!
//! ```text
//! hardware → transport thread → decoded event → HostScheduler → consumer
//! ```
//!
//! Protocol threads never call consumer code directly; every event is
//! marshalled through a [`HostScheduler`] so a slow consumer cannot stall
//! a notification loop.

mod config;
mod events;
mod host;
mod identity;
mod scales;

pub use config::{
    default_driver_config_path, load_driver_config, save_driver_config, DriverConfig,
};
pub use events::{ButtonEvent, NiEventHandler, PadEvent};
pub use host::{ChannelScheduler, HostScheduler, InlineScheduler, TaskReceiver};
pub use identity::{DeviceIdentity, DEVICE_TYPE_KONTROL_MK2, DEVICE_TYPE_MASCHINE_MK3};
pub use scales::{Scales, PAD_COUNT};

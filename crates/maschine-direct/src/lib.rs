//! Direct USB/HID access to Maschine hardware
//!
//! The agent's IPC surface does not expose the Maschine mk3's pads or
//! screens, so this crate talks to the hardware itself: HID reports for
//! buttons, knobs, pads, and LEDs; USB bulk transfers for the two
//! displays. Input decoding runs on a dedicated I/O thread and emits
//! [`ControlEvent`]s over a channel; output reports are queued to the same
//! thread; display frames go through their own sender thread.
//!
//! The displays are optional: if the USB interface cannot be claimed the
//! driver runs without them and [`MaschineDirect::has_display`] reports
//! false.

pub mod buttons;
mod display;
mod input;
mod io_thread;
mod output;

use std::sync::Mutex;

use maschine_core::{DriverConfig, Scales, DEVICE_TYPE_MASCHINE_MK3};

pub use buttons::Button;
pub use display::{rgb565, BgraBitmap, Display, DisplayBitmap, DISPLAY_HEIGHT, DISPLAY_WIDTH};
pub use input::{wrap_delta, ControlEvent, InputDecoder};
pub use io_thread::HidIoThread;
pub use output::{BrightnessProvider, OutputState, TOUCHSTRIP_LED_COUNT};

/// Native Instruments USB vendor id.
pub const VENDOR_ID: u16 = 0x17cc;

#[derive(Debug, thiserror::Error)]
pub enum DirectError {
    #[error("no Maschine hardware connected")]
    DeviceNotFound,

    #[error(transparent)]
    Hid(#[from] hidapi::HidError),
}

/// An opened Maschine mk3.
pub struct MaschineDirect {
    output: Mutex<OutputState>,
    report_tx: flume::Sender<Vec<u8>>,
    events: flume::Receiver<ControlEvent>,
    io: HidIoThread,
    display: Option<Display>,
}

impl MaschineDirect {
    /// Open the first connected Maschine mk3.
    ///
    /// The HID interface is required; the display interface is claimed
    /// opportunistically.
    pub fn open(config: &DriverConfig) -> Result<Self, DirectError> {
        let api = hidapi::HidApi::new()?;
        let present = api.device_list().any(|info| {
            info.vendor_id() == VENDOR_ID && info.product_id() == DEVICE_TYPE_MASCHINE_MK3
        });
        if !present {
            return Err(DirectError::DeviceNotFound);
        }

        let device = api.open(VENDOR_ID, DEVICE_TYPE_MASCHINE_MK3)?;
        log::info!("[Maschine] Opened HID device {:04x}:{:04x}", VENDOR_ID, DEVICE_TYPE_MASCHINE_MK3);

        let scales = Scales::chromatic(config.base_note);
        let decoder = InputDecoder::new(scales.clone(), config.velocity_curve_skew);

        let (event_tx, event_rx) = flume::bounded(256);
        let (report_tx, report_rx) = flume::bounded(64);
        let io = HidIoThread::spawn(device, decoder, event_tx, report_rx);

        let display = Display::open(VENDOR_ID, DEVICE_TYPE_MASCHINE_MK3);

        Ok(Self {
            output: Mutex::new(OutputState::new(scales)),
            report_tx,
            events: event_rx,
            io,
            display,
        })
    }

    /// Decoded input events, in arrival order.
    pub fn events(&self) -> &flume::Receiver<ControlEvent> {
        &self.events
    }

    /// True while the I/O thread is servicing the device.
    pub fn is_alive(&self) -> bool {
        self.io.is_alive()
    }

    /// True iff the display interface was claimed at open time.
    pub fn has_display(&self) -> bool {
        self.display.is_some()
    }

    /// Push a full frame to the screens. No-op without a display.
    pub fn send_display(&self, bitmap: &dyn DisplayBitmap) {
        if let Some(display) = &self.display {
            display.update(bitmap);
        }
    }

    /// Set the color slot for a note and refresh the pad LEDs.
    pub fn set_note_color(&self, note: u8, color: u8) {
        let report = {
            let mut output = self.output.lock().unwrap();
            output.set_note_color(note, color);
            output.pad_report()
        };
        self.queue(report);
    }

    /// Set one touchstrip segment and refresh the strip.
    pub fn set_touchstrip_led(&self, index: usize, color: u8) {
        let report = {
            let mut output = self.output.lock().unwrap();
            output.set_touchstrip_led(index, color);
            output.pad_report()
        };
        self.queue(report);
    }

    /// Resend pad and touchstrip colors from stored state.
    pub fn update_pads_and_touchstrip(&self) {
        let report = self.output.lock().unwrap().pad_report();
        self.queue(report);
    }

    /// Rebuild button brightness from the provider and send it.
    pub fn update_button_illuminations(&self, provider: &dyn BrightnessProvider) {
        let report = self.output.lock().unwrap().button_report(provider);
        self.queue(report);
    }

    /// Swap the pad-to-note mapping used for colors.
    pub fn set_scales(&self, scales: Scales) {
        self.output.lock().unwrap().set_scales(scales);
        self.update_pads_and_touchstrip();
    }

    fn queue(&self, report: Vec<u8>) {
        if self.report_tx.try_send(report).is_err() {
            log::warn!("[Maschine] Output report queue full, dropping report");
        }
    }

    /// Darken the LEDs and stop both worker threads.
    pub fn shutdown(&mut self) {
        self.queue(OutputState::blank_button_report());
        if let Some(display) = &mut self.display {
            display.shutdown();
        }
        // Dropping the I/O thread joins it; queued reports are flushed on
        // the way out.
    }
}

impl Drop for MaschineDirect {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! HID I/O thread
//!
//! Dedicated thread for the device's HID interface. Reads input reports,
//! runs them through the decoder, and sends resulting ControlEvents to the
//! shared channel. Also drains queued output reports and writes them.

use flume::{Receiver, Sender};
use hidapi::HidDevice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::input::{ControlEvent, InputDecoder};

/// HID I/O thread handle
///
/// Owns the thread join handle and a shutdown flag.
/// When dropped, signals the thread to stop and waits for it.
pub struct HidIoThread {
    /// Shutdown signal
    shutdown: Arc<AtomicBool>,
    /// Thread join handle
    handle: Option<thread::JoinHandle<()>>,
    /// Whether the I/O loop is still running (set to false on exit)
    alive: Arc<AtomicBool>,
}

impl HidIoThread {
    /// Spawn the I/O thread for an opened HID device
    ///
    /// - `device`: The hidapi device handle
    /// - `decoder`: Stateful report decoder
    /// - `event_tx`: Channel to send decoded ControlEvents
    /// - `report_rx`: Channel of complete output reports (id byte first)
    pub fn spawn(
        device: HidDevice,
        mut decoder: InputDecoder,
        event_tx: Sender<ControlEvent>,
        report_rx: Receiver<Vec<u8>>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let alive = Arc::new(AtomicBool::new(true));
        let alive_clone = alive.clone();

        let handle = thread::Builder::new()
            .name("maschine-hid-io".into())
            .spawn(move || {
                Self::io_loop(device, &mut decoder, event_tx, report_rx, shutdown_clone);
                alive_clone.store(false, Ordering::Relaxed);
            })
            .expect("Failed to spawn HID I/O thread");

        Self { shutdown, handle: Some(handle), alive }
    }

    /// Check if the I/O loop is still running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn io_loop(
        device: HidDevice,
        decoder: &mut InputDecoder,
        event_tx: Sender<ControlEvent>,
        report_rx: Receiver<Vec<u8>>,
        shutdown: Arc<AtomicBool>,
    ) {
        log::info!("[HID Maschine] I/O thread started");

        let mut input_buf = [0u8; 64];

        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            // Input: non-blocking read with 1ms timeout. The first byte of
            // a read is the report id, the rest the payload.
            match device.read_timeout(&mut input_buf, 1) {
                Ok(n) if n > 0 => {
                    let events = decoder.decode(input_buf[0], &input_buf[1..n]);
                    for event in events {
                        log::debug!("[HID Maschine] {:?}", event);
                        if event_tx.try_send(event).is_err() {
                            log::warn!("[HID Maschine] Event channel full, dropping event");
                        }
                    }
                }
                Ok(_) => {} // Timeout, no data (expected)
                Err(e) => {
                    log::error!("[HID Maschine] Read error: {}", e);
                    break; // Device disconnected
                }
            }

            // Output: write queued reports.
            while let Ok(report) = report_rx.try_recv() {
                if let Err(e) = device.write(&report) {
                    log::error!("[HID Maschine] Write error: {}", e);
                    shutdown.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        // Flush reports queued during shutdown so the final LED-clear
        // still reaches the device.
        while let Ok(report) = report_rx.try_recv() {
            let _ = device.write(&report);
        }

        log::info!("[HID Maschine] I/O thread stopped");
    }
}

impl Drop for HidIoThread {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            log::debug!("[HID Maschine] Waiting for I/O thread to stop...");
            let _ = handle.join();
        }
    }
}

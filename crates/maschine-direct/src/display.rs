//! USB bulk display driver
//!
//! The 960x272 screen is addressed as two 480x272 halves, each written as
//! one bulk packet: a 24-byte command header, RGB565 pixel data, and a
//! 12-byte trailer. Header and trailer bytes were captured from the wire;
//! the marked fields are understood, the rest are reproduced as-is.
//!
//! Frames are staged into persistent packet buffers under a lock and sent
//! from a single background thread. The kick channel holds one slot, so a
//! flood of updates coalesces: the sender always transmits the latest
//! staged frame and intermediate frames are dropped whole, never torn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use rusb::{DeviceHandle, GlobalContext};

/// Full canvas size in pixels.
pub const DISPLAY_WIDTH: usize = 960;
pub const DISPLAY_HEIGHT: usize = 272;

const HALF_WIDTH: usize = DISPLAY_WIDTH / 2;

/// One half: header + 480*272 RGB565 pixels + trailer.
pub const DISPLAY_PACKET_SIZE: usize =
    HEADER_LEFT.len() + HALF_WIDTH * DISPLAY_HEIGHT * 2 + FOOTER.len();

/// USB interface carrying the display endpoint.
const DISPLAY_INTERFACE: u8 = 5;
/// Bulk OUT endpoint the packets are written to.
const DISPLAY_ENDPOINT: u8 = 0x04;

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

const HEADER_LEFT: [u8; 24] = [
    0x84, // Command
    0x00, //
    0x00, // Screen number
    0x60, // ???
    0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, // X position
    0x00, 0x00, // Y position
    0x01, 0xe0, // Width (480)
    0x01, 0x10, // Height (272)
    0x02, // ???
    0x00, 0x00, 0x00, 0x00, 0x00, //
    0xff, 0x00, // Half the image size in pixels
];

const HEADER_RIGHT: [u8; 24] = [
    0x84, 0x00, 0x01, 0x60, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0xe0,
    0x01, 0x10, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x00,
];

const FOOTER: [u8; 12] = [0x02, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00];

/// Pack components into the panel's RGB565 layout.
///
/// The channel order is unusual (blue in the high bits) but matches what
/// the panel expects.
pub fn rgb565(red: u8, green: u8, blue: u8) -> u16 {
    let mut pixel = u16::from(blue & 0xf8) >> 3;
    pixel <<= 6;
    pixel |= u16::from(green & 0xfc) >> 2;
    pixel <<= 5;
    pixel |= u16::from(red & 0xf8) >> 3;
    pixel
}

/// A source image for the displays.
pub trait DisplayBitmap {
    /// Visit every pixel in row-major order across the full canvas,
    /// yielding blue, green, red. Must yield exactly
    /// `DISPLAY_WIDTH * DISPLAY_HEIGHT` pixels.
    fn visit_pixels(&self, visit: &mut dyn FnMut(u8, u8, u8));
}

/// A 32-bit BGRA buffer, the native layout of most rasterizers.
pub struct BgraBitmap<'a>(pub &'a [u8]);

impl DisplayBitmap for BgraBitmap<'_> {
    fn visit_pixels(&self, visit: &mut dyn FnMut(u8, u8, u8)) {
        for pixel in self.0.chunks_exact(4).take(DISPLAY_WIDTH * DISPLAY_HEIGHT) {
            visit(pixel[0], pixel[1], pixel[2]);
        }
    }
}

/// The two persistent packet buffers, header and trailer pre-seeded.
struct FrameBuffers {
    left: Vec<u8>,
    right: Vec<u8>,
}

impl FrameBuffers {
    fn new() -> Self {
        let mut left = vec![0u8; DISPLAY_PACKET_SIZE];
        let mut right = vec![0u8; DISPLAY_PACKET_SIZE];
        left[..HEADER_LEFT.len()].copy_from_slice(&HEADER_LEFT);
        right[..HEADER_RIGHT.len()].copy_from_slice(&HEADER_RIGHT);

        let footer_offset = DISPLAY_PACKET_SIZE - FOOTER.len();
        left[footer_offset..].copy_from_slice(&FOOTER);
        right[footer_offset..].copy_from_slice(&FOOTER);

        Self { left, right }
    }

    /// Encode a full frame into both halves, big-endian byte pair per
    /// pixel, splitting at the canvas midline.
    fn fill(&mut self, bitmap: &dyn DisplayBitmap) {
        let pixel_end = DISPLAY_PACKET_SIZE - FOOTER.len();
        let mut left_index = HEADER_LEFT.len();
        let mut right_index = HEADER_RIGHT.len();
        let mut x = 0;

        bitmap.visit_pixels(&mut |blue, green, red| {
            let pixel = rgb565(red, green, blue);
            if x < HALF_WIDTH {
                if left_index + 1 < pixel_end {
                    self.left[left_index] = (pixel >> 8) as u8;
                    self.left[left_index + 1] = (pixel & 0xff) as u8;
                    left_index += 2;
                }
            } else if right_index + 1 < pixel_end {
                self.right[right_index] = (pixel >> 8) as u8;
                self.right[right_index + 1] = (pixel & 0xff) as u8;
                right_index += 2;
            }
            x = (x + 1) % DISPLAY_WIDTH;
        });
    }
}

/// Sink for finished display packets.
pub(crate) trait PacketSink: Send {
    fn send(&mut self, packet: &[u8]);
}

struct UsbSink {
    handle: DeviceHandle<GlobalContext>,
}

impl PacketSink for UsbSink {
    fn send(&mut self, packet: &[u8]) {
        if let Err(e) = self.handle.write_bulk(DISPLAY_ENDPOINT, packet, WRITE_TIMEOUT) {
            log::warn!("[Display] Bulk write failed: {}", e);
        }
    }
}

/// Handle to the display pipeline.
pub struct Display {
    buffers: Arc<Mutex<FrameBuffers>>,
    kick: flume::Sender<()>,
    shutdown: Arc<AtomicBool>,
    sender: Option<JoinHandle<()>>,
}

impl Display {
    /// Claim the display interface of an already-located device.
    ///
    /// Any failure is logged and reported as "no display"; the rest of the
    /// driver keeps working without screens.
    pub(crate) fn open(vendor_id: u16, product_id: u16) -> Option<Self> {
        let mut handle = match rusb::open_device_with_vid_pid(vendor_id, product_id) {
            Some(handle) => handle,
            None => {
                log::warn!("[Display] USB device {:04x}:{:04x} not found", vendor_id, product_id);
                return None;
            }
        };

        // The OS HID driver may hold the display interface.
        let _ = handle.set_auto_detach_kernel_driver(true);
        if let Err(e) = handle.claim_interface(DISPLAY_INTERFACE) {
            log::warn!("[Display] Could not claim display interface: {}", e);
            return None;
        }

        Some(Self::spawn(Box::new(UsbSink { handle })))
    }

    /// Start the sender thread over an arbitrary sink.
    pub(crate) fn spawn(mut sink: Box<dyn PacketSink>) -> Self {
        let buffers = Arc::new(Mutex::new(FrameBuffers::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        // One slot: pending kicks coalesce instead of queueing.
        let (kick_tx, kick_rx) = flume::bounded::<()>(1);

        let thread_buffers = Arc::clone(&buffers);
        let thread_shutdown = Arc::clone(&shutdown);
        let sender = std::thread::Builder::new()
            .name("maschine-display".into())
            .spawn(move || {
                let mut scratch_left = vec![0u8; DISPLAY_PACKET_SIZE];
                let mut scratch_right = vec![0u8; DISPLAY_PACKET_SIZE];

                while !thread_shutdown.load(Ordering::Relaxed) {
                    if kick_rx.recv_timeout(Duration::from_millis(500)).is_err() {
                        continue;
                    }
                    {
                        let buffers = thread_buffers.lock().unwrap();
                        scratch_left.copy_from_slice(&buffers.left);
                        scratch_right.copy_from_slice(&buffers.right);
                    }
                    sink.send(&scratch_left);
                    sink.send(&scratch_right);
                }
                log::debug!("[Display] Sender thread stopped");
            })
            .ok();

        Self { buffers, kick: kick_tx, shutdown, sender }
    }

    /// Stage a frame and wake the sender. Never blocks on the USB write.
    pub fn update(&self, bitmap: &dyn DisplayBitmap) {
        self.buffers.lock().unwrap().fill(bitmap);
        // A full slot means a send is already pending; it will pick up
        // this frame.
        let _ = self.kick.try_send(());
    }

    /// Stop the sender thread, bounded by its poll timeout.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.sender.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_size_matches_wire_capture() {
        assert_eq!(DISPLAY_PACKET_SIZE, 261156);
    }

    #[test]
    fn test_rgb565_packing() {
        assert_eq!(rgb565(0, 0, 0), 0);
        assert_eq!(rgb565(0xff, 0xff, 0xff), 0xffff);
        // Pure blue occupies the top five bits.
        assert_eq!(rgb565(0, 0, 0xff), 0x1f << 11);
        // Pure red the bottom five.
        assert_eq!(rgb565(0xff, 0, 0), 0x1f);
        // Deterministic: same inputs, same pixel.
        assert_eq!(rgb565(0x12, 0x34, 0x56), rgb565(0x12, 0x34, 0x56));
    }

    /// Solid-color canvas.
    struct Solid(u8, u8, u8);

    impl DisplayBitmap for Solid {
        fn visit_pixels(&self, visit: &mut dyn FnMut(u8, u8, u8)) {
            for _ in 0..DISPLAY_WIDTH * DISPLAY_HEIGHT {
                visit(self.0, self.1, self.2);
            }
        }
    }

    #[test]
    fn test_fill_preserves_framing_and_splits_halves() {
        let mut buffers = FrameBuffers::new();
        buffers.fill(&Solid(0xff, 0, 0)); // solid blue, BGR order

        assert_eq!(&buffers.left[..24], &HEADER_LEFT);
        assert_eq!(&buffers.right[..24], &HEADER_RIGHT);
        assert_eq!(&buffers.left[DISPLAY_PACKET_SIZE - 12..], &FOOTER);
        assert_eq!(&buffers.right[DISPLAY_PACKET_SIZE - 12..], &FOOTER);

        let pixel = rgb565(0, 0, 0xff);
        for buffer in [&buffers.left, &buffers.right] {
            assert_eq!(buffer[24], (pixel >> 8) as u8);
            assert_eq!(buffer[25], (pixel & 0xff) as u8);
            // Last pixel before the footer too.
            assert_eq!(buffer[DISPLAY_PACKET_SIZE - 14], (pixel >> 8) as u8);
            assert_eq!(buffer[DISPLAY_PACKET_SIZE - 13], (pixel & 0xff) as u8);
        }
    }

    #[test]
    fn test_missing_device_degrades_to_no_display() {
        // A vendor/product pair that cannot exist on the bus.
        assert!(Display::open(0xffff, 0xffff).is_none());
    }

    struct Recorder {
        packets: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl PacketSink for Recorder {
        fn send(&mut self, packet: &[u8]) {
            self.packets.lock().unwrap().push(packet.to_vec());
        }
    }

    #[test]
    fn test_update_sends_both_halves() {
        let packets = Arc::new(Mutex::new(Vec::new()));
        let mut display = Display::spawn(Box::new(Recorder { packets: Arc::clone(&packets) }));

        display.update(&Solid(0, 0xff, 0));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if packets.lock().unwrap().len() >= 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        display.shutdown();

        let packets = packets.lock().unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].len(), DISPLAY_PACKET_SIZE);
        assert_eq!(packets[0][2], 0x00); // left screen first
        assert_eq!(packets[1][2], 0x01);
    }
}

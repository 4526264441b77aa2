//! IPC transport abstraction
//!
//! The agent is reached over platform-specific message channels: mach
//! message ports on macOS, named pipes on Windows. Each connection owns a
//! request channel (synchronous round trips) and a notification channel
//! (inbound-only, polled by the listener thread). Platforms without a
//! known transport fail channel construction deterministically.
//!
//! Failures inside an established channel are soft: `transact` returns an
//! empty response and the caller treats that as "request failed".

use std::sync::Arc;
use std::time::Duration;

#[cfg(target_os = "macos")]
mod macos;
pub mod mock;
#[cfg(target_os = "windows")]
mod windows;

/// Well-known bootstrap endpoint published by the agent.
pub const BOOTSTRAP_PORT: &str = "com.native-instruments.NIHostIntegrationAgent";

/// Round-trip timeout for synchronous exchanges.
pub const TRANSACT_TIMEOUT: Duration = Duration::from_secs(1);

/// Attempt budget for the named-pipe "busy" transient.
pub const BUSY_RETRY_ATTEMPTS: u32 = 10;

/// Fixed delay between busy retries.
pub const BUSY_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Error type for transport construction
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no agent transport exists for this platform")]
    UnsupportedPlatform,

    #[error("failed to open channel '{port}': {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("failed to create notification channel '{port}': {reason}")]
    CreateFailed { port: String, reason: String },
}

/// Outbound side of a channel to the agent.
pub trait RequestChannel: Send + Sync {
    /// Fire-and-forget send; failures are logged, never surfaced.
    fn push(&self, message: &[u8]);

    /// Blocking round trip bounded by [`TRANSACT_TIMEOUT`]. Returns an
    /// empty vec on timeout or error; an empty response always means
    /// "request failed", never "pending".
    fn transact(&self, message: &[u8]) -> Vec<u8>;
}

/// Inbound-only notification channel, polled from the listener thread.
pub trait NotificationChannel: Send {
    /// Block for at most `timeout` waiting for one inbound message.
    fn poll(&self, timeout: Duration) -> Option<Vec<u8>>;
}

/// Opens channels by agent-assigned port name.
pub trait TransportFactory: Send + Sync {
    fn open_request(&self, port: &str) -> Result<Arc<dyn RequestChannel>, TransportError>;
    fn open_notifications(&self, port: &str)
        -> Result<Box<dyn NotificationChannel>, TransportError>;
}

/// Select the transport for the host operating system.
pub fn platform_factory() -> Result<Arc<dyn TransportFactory>, TransportError> {
    #[cfg(target_os = "macos")]
    return Ok(Arc::new(macos::MachPortFactory::new()));
    #[cfg(target_os = "windows")]
    return Ok(Arc::new(windows::NamedPipeFactory::new()));
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    Err(TransportError::UnsupportedPlatform)
}

/// One attempt of a round trip that may hit a transient-busy condition.
pub enum TransactOutcome {
    /// Response received
    Done(Vec<u8>),
    /// Transient "channel busy"; worth retrying after a delay
    Busy,
    /// Anything else; fatal to this call only
    Fatal(String),
}

/// Run `attempt` up to `attempts` times, sleeping `delay` between busy
/// retries. Exhaustion and fatal errors are soft failures; the channel
/// stays alive for future calls.
pub fn transact_with_retry(
    attempts: u32,
    delay: Duration,
    mut attempt: impl FnMut() -> TransactOutcome,
) -> Option<Vec<u8>> {
    for remaining in (0..attempts).rev() {
        match attempt() {
            TransactOutcome::Done(response) => return Some(response),
            TransactOutcome::Busy => {
                if remaining == 0 {
                    break;
                }
                std::thread::sleep(delay);
            }
            TransactOutcome::Fatal(reason) => {
                log::warn!("[NIHIA] Channel send failed: {}", reason);
                return None;
            }
        }
    }

    log::warn!("[NIHIA] Channel still busy after {} attempts", attempts);
    None
}

//! Named-pipe transport (Windows)
//!
//! The agent exposes each port as a message-mode named pipe under
//! `\\.\pipe\`. Requests use `TransactNamedPipe`; the busy transient on a
//! shared pipe is retried on a fixed schedule. Notification ports are
//! pipes we create and the agent connects back to; a reader thread drains
//! them into a flume channel for the listener to poll.

use std::ffi::c_void;
use std::ptr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_PIPE_BUSY, GENERIC_READ, GENERIC_WRITE, HANDLE,
    INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, OPEN_EXISTING,
};
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, SetNamedPipeHandleState,
    TransactNamedPipe, PIPE_ACCESS_DUPLEX, PIPE_READMODE_MESSAGE, PIPE_TYPE_MESSAGE,
    PIPE_UNLIMITED_INSTANCES, PIPE_WAIT,
};

use super::{
    transact_with_retry, NotificationChannel, RequestChannel, TransactOutcome, TransportError,
    TransportFactory, BUSY_RETRY_ATTEMPTS, BUSY_RETRY_DELAY,
};

/// Largest message the agent is known to send in one pipe transaction.
const PIPE_BUFFER_SIZE: usize = 4096;

fn pipe_path(port: &str) -> Vec<u16> {
    format!(r"\\.\pipe\{}", port).encode_utf16().chain(std::iter::once(0)).collect()
}

/// Owned pipe handle, closed on drop.
struct PipeHandle(HANDLE);

// HANDLE is a raw pointer; access is serialized by the surrounding Mutex.
unsafe impl Send for PipeHandle {}

impl Drop for PipeHandle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

pub struct NamedPipeFactory;

impl NamedPipeFactory {
    pub fn new() -> Self {
        Self
    }
}

struct NamedPipeRequestChannel {
    port: String,
    handle: Mutex<PipeHandle>,
}

impl NamedPipeRequestChannel {
    fn open(port: &str) -> Result<Self, TransportError> {
        let path = pipe_path(port);
        let handle = unsafe {
            CreateFileW(
                path.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null(),
                OPEN_EXISTING,
                0,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(TransportError::OpenFailed {
                port: port.to_owned(),
                reason: format!("CreateFileW error {}", unsafe { GetLastError() }),
            });
        }

        let mode = PIPE_READMODE_MESSAGE;
        let ok = unsafe {
            SetNamedPipeHandleState(handle, &mode, ptr::null_mut(), ptr::null_mut())
        };
        if ok == 0 {
            let reason = format!("SetNamedPipeHandleState error {}", unsafe { GetLastError() });
            unsafe { CloseHandle(handle) };
            return Err(TransportError::OpenFailed { port: port.to_owned(), reason });
        }

        Ok(Self { port: port.to_owned(), handle: Mutex::new(PipeHandle(handle)) })
    }
}

impl RequestChannel for NamedPipeRequestChannel {
    fn push(&self, message: &[u8]) {
        let handle = self.handle.lock().unwrap();
        let mut written = 0u32;
        let ok = unsafe {
            WriteFile(
                handle.0,
                message.as_ptr(),
                message.len() as u32,
                &mut written,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            log::warn!(
                "[NIHIA] Write to pipe '{}' failed (error {})",
                self.port,
                unsafe { GetLastError() }
            );
        }
    }

    fn transact(&self, message: &[u8]) -> Vec<u8> {
        let handle = self.handle.lock().unwrap();
        let result = transact_with_retry(BUSY_RETRY_ATTEMPTS, BUSY_RETRY_DELAY, || {
            let mut response = vec![0u8; PIPE_BUFFER_SIZE];
            let mut read = 0u32;
            let ok = unsafe {
                TransactNamedPipe(
                    handle.0,
                    message.as_ptr() as *const c_void,
                    message.len() as u32,
                    response.as_mut_ptr() as *mut c_void,
                    response.len() as u32,
                    &mut read,
                    ptr::null_mut(),
                )
            };
            if ok != 0 {
                response.truncate(read as usize);
                return TransactOutcome::Done(response);
            }
            match unsafe { GetLastError() } {
                ERROR_PIPE_BUSY => TransactOutcome::Busy,
                code => {
                    TransactOutcome::Fatal(format!("TransactNamedPipe error {}", code))
                }
            }
        });
        result.unwrap_or_default()
    }
}

struct NamedPipeNotificationChannel {
    receiver: flume::Receiver<Vec<u8>>,
}

impl NamedPipeNotificationChannel {
    /// Create the server pipe and spawn the reader that feeds `poll`.
    fn create(port: &str) -> Result<Self, TransportError> {
        let path = pipe_path(port);
        let handle = unsafe {
            CreateNamedPipeW(
                path.as_ptr(),
                PIPE_ACCESS_DUPLEX,
                PIPE_TYPE_MESSAGE | PIPE_READMODE_MESSAGE | PIPE_WAIT,
                PIPE_UNLIMITED_INSTANCES,
                PIPE_BUFFER_SIZE as u32,
                PIPE_BUFFER_SIZE as u32,
                0,
                ptr::null(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(TransportError::CreateFailed {
                port: port.to_owned(),
                reason: format!("CreateNamedPipeW error {}", unsafe { GetLastError() }),
            });
        }

        let (sender, receiver) = flume::unbounded();
        let pipe = PipeHandle(handle);
        let port_name = port.to_owned();
        std::thread::Builder::new()
            .name(format!("nihia-pipe-{}", port))
            .spawn(move || reader_loop(pipe, port_name, sender))
            .map_err(|e| TransportError::CreateFailed {
                port: port.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(Self { receiver })
    }
}

/// Accept agent connections and forward each message. Exits once the
/// session side drops its receiver.
fn reader_loop(pipe: PipeHandle, port: String, sender: flume::Sender<Vec<u8>>) {
    loop {
        let ok = unsafe { ConnectNamedPipe(pipe.0, ptr::null_mut()) };
        if ok == 0 {
            log::debug!(
                "[NIHIA] ConnectNamedPipe on '{}' failed (error {})",
                port,
                unsafe { GetLastError() }
            );
            return;
        }

        loop {
            let mut buf = vec![0u8; PIPE_BUFFER_SIZE];
            let mut read = 0u32;
            let ok = unsafe {
                ReadFile(pipe.0, buf.as_mut_ptr(), buf.len() as u32, &mut read, ptr::null_mut())
            };
            if ok == 0 {
                break;
            }
            buf.truncate(read as usize);
            if sender.send(buf).is_err() {
                return;
            }
        }

        unsafe { DisconnectNamedPipe(pipe.0) };
    }
}

impl NotificationChannel for NamedPipeNotificationChannel {
    fn poll(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

impl TransportFactory for NamedPipeFactory {
    fn open_request(&self, port: &str) -> Result<Arc<dyn RequestChannel>, TransportError> {
        Ok(Arc::new(NamedPipeRequestChannel::open(port)?))
    }

    fn open_notifications(
        &self,
        port: &str,
    ) -> Result<Box<dyn NotificationChannel>, TransportError> {
        Ok(Box::new(NamedPipeNotificationChannel::create(port)?))
    }
}

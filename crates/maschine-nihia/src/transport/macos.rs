//! Mach message-port transport (macOS)
//!
//! The agent publishes each port as a CFMessagePort. Requests go out over
//! remote ports with a one second send and receive timeout. Notification
//! ports are local ports we register under the agent-assigned name; a
//! dedicated run-loop thread services the port and forwards each inbound
//! message to a flume channel the listener polls.

use std::ffi::c_void;
use std::ptr;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use core_foundation::base::TCFType;
use core_foundation::data::CFData;
use core_foundation::string::CFString;
use core_foundation_sys::base::{kCFAllocatorDefault, CFRelease, CFTypeRef};
use core_foundation_sys::data::{CFDataGetBytePtr, CFDataGetLength, CFDataRef};
use core_foundation_sys::messageport::{
    CFMessagePortContext, CFMessagePortCreateLocal, CFMessagePortCreateRemote,
    CFMessagePortCreateRunLoopSource, CFMessagePortInvalidate, CFMessagePortRef,
    CFMessagePortSendRequest,
};
use core_foundation_sys::runloop::{
    kCFRunLoopDefaultMode, CFRunLoopAddSource, CFRunLoopGetCurrent, CFRunLoopRef, CFRunLoopRun,
    CFRunLoopStop,
};

use super::{
    NotificationChannel, RequestChannel, TransportError, TransportFactory, TRANSACT_TIMEOUT,
};

pub struct MachPortFactory;

impl MachPortFactory {
    pub fn new() -> Self {
        Self
    }
}

/// Owned CFMessagePort reference.
struct PortRef(CFMessagePortRef);

// Raw CF pointer; access is serialized by the surrounding Mutex.
unsafe impl Send for PortRef {}

impl Drop for PortRef {
    fn drop(&mut self) {
        unsafe {
            CFMessagePortInvalidate(self.0);
            CFRelease(self.0 as CFTypeRef);
        }
    }
}

struct MachRequestChannel {
    port_name: String,
    port: Mutex<PortRef>,
}

impl MachRequestChannel {
    fn open(port_name: &str) -> Result<Self, TransportError> {
        let cf_name = CFString::new(port_name);
        let port = unsafe {
            CFMessagePortCreateRemote(kCFAllocatorDefault, cf_name.as_concrete_TypeRef())
        };
        if port.is_null() {
            return Err(TransportError::OpenFailed {
                port: port_name.to_owned(),
                reason: "CFMessagePortCreateRemote returned null".into(),
            });
        }
        Ok(Self { port_name: port_name.to_owned(), port: Mutex::new(PortRef(port)) })
    }
}

impl RequestChannel for MachRequestChannel {
    fn push(&self, message: &[u8]) {
        let port = self.port.lock().unwrap();
        let data = CFData::from_buffer(message);
        let status = unsafe {
            CFMessagePortSendRequest(
                port.0,
                0,
                data.as_concrete_TypeRef(),
                TRANSACT_TIMEOUT.as_secs_f64(),
                0.0,
                ptr::null(),
                ptr::null_mut(),
            )
        };
        if status != 0 {
            log::warn!("[NIHIA] Send to port '{}' failed (status {})", self.port_name, status);
        }
    }

    fn transact(&self, message: &[u8]) -> Vec<u8> {
        let port = self.port.lock().unwrap();
        let data = CFData::from_buffer(message);
        let mut reply: CFDataRef = ptr::null();
        let status = unsafe {
            CFMessagePortSendRequest(
                port.0,
                0,
                data.as_concrete_TypeRef(),
                TRANSACT_TIMEOUT.as_secs_f64(),
                TRANSACT_TIMEOUT.as_secs_f64(),
                kCFRunLoopDefaultMode,
                &mut reply,
            )
        };
        if status != 0 || reply.is_null() {
            log::warn!(
                "[NIHIA] Request on port '{}' failed (status {})",
                self.port_name,
                status
            );
            return Vec::new();
        }

        unsafe {
            let len = CFDataGetLength(reply) as usize;
            let bytes = std::slice::from_raw_parts(CFDataGetBytePtr(reply), len).to_vec();
            CFRelease(reply as CFTypeRef);
            bytes
        }
    }
}

extern "C" fn notification_callback(
    _local: CFMessagePortRef,
    _msgid: i32,
    data: CFDataRef,
    info: *mut c_void,
) -> CFDataRef {
    let sender = unsafe { &*(info as *const flume::Sender<Vec<u8>>) };
    if !data.is_null() {
        let bytes = unsafe {
            let len = CFDataGetLength(data) as usize;
            std::slice::from_raw_parts(CFDataGetBytePtr(data), len).to_vec()
        };
        let _ = sender.send(bytes);
    }
    ptr::null()
}

unsafe extern "C" fn release_sender(info: *const c_void) {
    drop(Box::from_raw(info as *mut flume::Sender<Vec<u8>>));
}

/// CFRunLoopRef owned by the servicing thread; stopped on drop.
struct RunLoopHandle(CFRunLoopRef);

unsafe impl Send for RunLoopHandle {}

struct MachNotificationChannel {
    receiver: flume::Receiver<Vec<u8>>,
    run_loop: RunLoopHandle,
}

impl MachNotificationChannel {
    fn create(port_name: &str) -> Result<Self, TransportError> {
        let (sender, receiver) = flume::unbounded();
        let (ready_tx, ready_rx) = mpsc::channel();
        let name = port_name.to_owned();

        std::thread::Builder::new()
            .name(format!("nihia-port-{}", port_name))
            .spawn(move || run_local_port(name, sender, ready_tx))
            .map_err(|e| TransportError::CreateFailed {
                port: port_name.to_owned(),
                reason: e.to_string(),
            })?;

        match ready_rx.recv() {
            Ok(Ok(run_loop)) => Ok(Self { receiver, run_loop }),
            Ok(Err(reason)) => {
                Err(TransportError::CreateFailed { port: port_name.to_owned(), reason })
            }
            Err(_) => Err(TransportError::CreateFailed {
                port: port_name.to_owned(),
                reason: "run-loop thread exited during setup".into(),
            }),
        }
    }
}

impl Drop for MachNotificationChannel {
    fn drop(&mut self) {
        unsafe { CFRunLoopStop(self.run_loop.0) };
    }
}

fn run_local_port(
    name: String,
    sender: flume::Sender<Vec<u8>>,
    ready: mpsc::Sender<Result<RunLoopHandle, String>>,
) {
    let info = Box::into_raw(Box::new(sender)) as *mut c_void;
    let mut context = CFMessagePortContext {
        version: 0,
        info,
        retain: None,
        release: Some(release_sender),
        copyDescription: None,
    };

    let cf_name = CFString::new(&name);
    let port = unsafe {
        CFMessagePortCreateLocal(
            kCFAllocatorDefault,
            cf_name.as_concrete_TypeRef(),
            Some(notification_callback),
            &mut context,
            ptr::null_mut(),
        )
    };
    if port.is_null() {
        // The context release never ran; reclaim the sender ourselves.
        unsafe { drop(Box::from_raw(info as *mut flume::Sender<Vec<u8>>)) };
        let _ = ready.send(Err("CFMessagePortCreateLocal returned null".into()));
        return;
    }
    let port = PortRef(port);

    unsafe {
        let source = CFMessagePortCreateRunLoopSource(kCFAllocatorDefault, port.0, 0);
        let run_loop = CFRunLoopGetCurrent();
        CFRunLoopAddSource(run_loop, source, kCFRunLoopDefaultMode);
        CFRelease(source as CFTypeRef);

        let _ = ready.send(Ok(RunLoopHandle(run_loop)));
        CFRunLoopRun();
    }
}

impl NotificationChannel for MachNotificationChannel {
    fn poll(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

impl TransportFactory for MachPortFactory {
    fn open_request(&self, port: &str) -> Result<Arc<dyn RequestChannel>, TransportError> {
        Ok(Arc::new(MachRequestChannel::open(port)?))
    }

    fn open_notifications(
        &self,
        port: &str,
    ) -> Result<Box<dyn NotificationChannel>, TransportError> {
        Ok(Box::new(MachNotificationChannel::create(port)?))
    }
}

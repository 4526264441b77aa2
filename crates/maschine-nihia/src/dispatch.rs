//! Notification listener and dispatch
//!
//! Each connection owns one listener thread that polls its notification
//! channel on a one second cadence, decodes each message, and reacts:
//! registry updates and claim recovery happen inline, consumer events are
//! posted to the host scheduler so they never run on this thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use maschine_core::{ButtonEvent, DeviceIdentity, HostScheduler, NiEventHandler};

use crate::codec::{decode_notification, Notification, WHOLE_MSG_ACQUIRE};
use crate::registry::KnownDeviceRegistry;
use crate::transport::{NotificationChannel, RequestChannel};

/// Poll timeout; also bounds how long shutdown can take to observe.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) struct Listener {
    pub identity: DeviceIdentity,
    pub notifications: Box<dyn NotificationChannel>,
    pub request: Arc<dyn RequestChannel>,
    pub registry: KnownDeviceRegistry,
    pub scheduler: Arc<dyn HostScheduler>,
    pub handler: Option<Arc<dyn NiEventHandler>>,
    pub shutdown: Arc<AtomicBool>,
}

impl Listener {
    pub fn run(mut self) {
        log::debug!("[NIHIA] Listener for {:?} started", self.identity);
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Some(raw) = self.notifications.poll(POLL_TIMEOUT) {
                self.dispatch(decode_notification(&raw));
            }
        }
        log::debug!("[NIHIA] Listener for {:?} stopped", self.identity);
    }

    fn dispatch(&mut self, notification: Notification) {
        match notification {
            Notification::DeviceState { on, device_type, serial } => {
                if on {
                    self.registry.add(device_type, &serial);
                } else {
                    self.registry.remove(device_type, &serial);
                }
            }

            Notification::ClaimChanged { have_claim: false } => {
                // Only Kontrol units are claimed through the agent; when
                // another client takes one, claim it right back.
                if self.identity.is_kontrol() {
                    log::info!("[NIHIA] Lost claim on {:?}, re-acquiring", self.identity);
                    self.request.push(&WHOLE_MSG_ACQUIRE);
                } else {
                    log::debug!("[NIHIA] Claim changed on {:?}, not ours to hold", self.identity);
                }
            }
            Notification::ClaimChanged { have_claim: true } => {
                log::debug!("[NIHIA] Claim confirmed on {:?}", self.identity);
            }

            Notification::Button { index, state } => {
                // Press state is encoded in the parity of the counter.
                let event =
                    if state % 2 == 0 { ButtonEvent::Up } else { ButtonEvent::Down };
                self.post(move |handler| handler.on_button(index, event));
            }

            Notification::Knob { index, delta } => {
                self.post(move |handler| handler.on_knob(index, delta));
            }

            Notification::MainEncoder { value } => {
                self.post(move |handler| handler.on_main_encoder(value));
            }

            Notification::OctaveChanged { base } => {
                self.post(move |handler| handler.on_octave_changed(base));
            }

            Notification::Ack
            | Notification::ButtonTimestamp
            | Notification::Touchstrip
            | Notification::FocusChanged => {}

            Notification::Unknown { tag, remaining } => {
                log::debug!(
                    "[NIHIA] Unhandled notification tag {:#010x} ({} bytes)",
                    tag,
                    remaining
                );
            }
        }
    }

    fn post(&self, f: impl FnOnce(&dyn NiEventHandler) + Send + 'static) {
        if let Some(handler) = &self.handler {
            let handler = Arc::clone(handler);
            self.scheduler.schedule(Box::new(move || f(handler.as_ref())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maschine_core::{InlineScheduler, DEVICE_TYPE_KONTROL_MK2, DEVICE_TYPE_MASCHINE_MK3};
    use std::sync::Mutex;

    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl NiEventHandler for Recorder {
        fn on_button(&self, index: u32, event: ButtonEvent) {
            self.events.lock().unwrap().push(format!("button {} {:?}", index, event));
        }
        fn on_knob(&self, index: u32, delta: i32) {
            self.events.lock().unwrap().push(format!("knob {} {}", index, delta));
        }
        fn on_main_encoder(&self, value: i32) {
            self.events.lock().unwrap().push(format!("encoder {}", value));
        }
        fn on_octave_changed(&self, base: i32) {
            self.events.lock().unwrap().push(format!("octave {}", base));
        }
    }

    struct NullChannel;
    impl NotificationChannel for NullChannel {
        fn poll(&self, _timeout: Duration) -> Option<Vec<u8>> {
            None
        }
    }

    struct RecordingRequests {
        pushed: Mutex<Vec<Vec<u8>>>,
    }
    impl RequestChannel for RecordingRequests {
        fn push(&self, message: &[u8]) {
            self.pushed.lock().unwrap().push(message.to_vec());
        }
        fn transact(&self, _message: &[u8]) -> Vec<u8> {
            Vec::new()
        }
    }

    fn listener(
        handler: Option<Arc<dyn NiEventHandler>>,
        request: Arc<RecordingRequests>,
    ) -> Listener {
        Listener {
            identity: DeviceIdentity::new(DEVICE_TYPE_KONTROL_MK2, "T1"),
            notifications: Box::new(NullChannel),
            request,
            registry: KnownDeviceRegistry::new(),
            scheduler: Arc::new(InlineScheduler),
            handler,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn test_button_parity_maps_to_edge() {
        let recorder = Arc::new(Recorder { events: Mutex::new(Vec::new()) });
        let requests = Arc::new(RecordingRequests { pushed: Mutex::new(Vec::new()) });
        let mut l = listener(Some(recorder.clone()), requests);

        l.dispatch(Notification::Button { index: 5, state: 1 });
        l.dispatch(Notification::Button { index: 5, state: 2 });

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.as_slice(), ["button 5 Down", "button 5 Up"]);
    }

    #[test]
    fn test_claim_lost_on_direct_access_device_is_ignored() {
        let requests = Arc::new(RecordingRequests { pushed: Mutex::new(Vec::new()) });
        let mut l = listener(None, requests.clone());
        l.identity = DeviceIdentity::new(DEVICE_TYPE_MASCHINE_MK3, "M1");

        l.dispatch(Notification::ClaimChanged { have_claim: false });
        assert!(requests.pushed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_claim_lost_triggers_reacquire() {
        let requests = Arc::new(RecordingRequests { pushed: Mutex::new(Vec::new()) });
        let mut l = listener(None, requests.clone());

        l.dispatch(Notification::ClaimChanged { have_claim: false });
        assert_eq!(requests.pushed.lock().unwrap().as_slice(), [WHOLE_MSG_ACQUIRE.to_vec()]);

        // Regaining the claim must not re-send.
        l.dispatch(Notification::ClaimChanged { have_claim: true });
        assert_eq!(requests.pushed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_device_state_updates_registry() {
        let requests = Arc::new(RecordingRequests { pushed: Mutex::new(Vec::new()) });
        let mut l = listener(None, requests);

        l.dispatch(Notification::DeviceState {
            on: true,
            device_type: 0x1610,
            serial: "S1".into(),
        });
        assert_eq!(l.registry.single_serial(0x1610), Some("S1".to_owned()));

        l.dispatch(Notification::DeviceState {
            on: false,
            device_type: 0x1610,
            serial: "S1".into(),
        });
        assert_eq!(l.registry.single_serial(0x1610), None);
    }
}

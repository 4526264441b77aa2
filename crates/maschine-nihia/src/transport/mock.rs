//! In-memory transport for testing session logic without an agent.
//!
//! Scripted responses are keyed by the leading four bytes of the request
//! (the message tag read LE). Notifications are injected into per-port
//! flume channels that the listener thread polls like the real thing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{NotificationChannel, RequestChannel, TransportError, TransportFactory};

#[derive(Default)]
struct MockState {
    /// Scripted responses by request tag
    responses: HashMap<u32, Vec<u8>>,
    /// Every message pushed or transacted, in order
    request_log: Vec<Vec<u8>>,
    /// Notification senders by port name
    notification_senders: HashMap<String, flume::Sender<Vec<u8>>>,
    /// Ports that were opened as request channels
    opened_request_ports: Vec<String>,
}

/// Transport factory whose channels never leave the process.
#[derive(Clone, Default)]
pub struct MockTransportFactory {
    state: Arc<Mutex<MockState>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response for every request whose first four bytes match
    /// `tag` (read LE).
    pub fn script_response(&self, tag: u32, response: Vec<u8>) {
        self.state.lock().unwrap().responses.insert(tag, response);
    }

    /// All requests observed so far, across every channel.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().request_log.clone()
    }

    /// Names of ports opened as request channels, in open order.
    pub fn opened_request_ports(&self) -> Vec<String> {
        self.state.lock().unwrap().opened_request_ports.clone()
    }

    /// Deliver a raw notification to the named port's listener.
    pub fn inject_notification(&self, port: &str, raw: Vec<u8>) {
        let sender = self.state.lock().unwrap().notification_senders.get(port).cloned();
        match sender {
            Some(sender) => {
                let _ = sender.send(raw);
            }
            None => panic!("no notification channel open for port '{}'", port),
        }
    }
}

fn leading_tag(message: &[u8]) -> u32 {
    match message.get(..4) {
        Some(bytes) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        None => 0,
    }
}

struct MockRequestChannel {
    state: Arc<Mutex<MockState>>,
}

impl RequestChannel for MockRequestChannel {
    fn push(&self, message: &[u8]) {
        self.state.lock().unwrap().request_log.push(message.to_vec());
    }

    fn transact(&self, message: &[u8]) -> Vec<u8> {
        let mut state = self.state.lock().unwrap();
        state.request_log.push(message.to_vec());
        state.responses.get(&leading_tag(message)).cloned().unwrap_or_default()
    }
}

struct MockNotificationChannel {
    receiver: flume::Receiver<Vec<u8>>,
}

impl NotificationChannel for MockNotificationChannel {
    fn poll(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

impl TransportFactory for MockTransportFactory {
    fn open_request(&self, port: &str) -> Result<Arc<dyn RequestChannel>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.opened_request_ports.push(port.to_owned());
        Ok(Arc::new(MockRequestChannel { state: Arc::clone(&self.state) }))
    }

    fn open_notifications(
        &self,
        port: &str,
    ) -> Result<Box<dyn NotificationChannel>, TransportError> {
        let (sender, receiver) = flume::unbounded();
        self.state.lock().unwrap().notification_senders.insert(port.to_owned(), sender);
        Ok(Box::new(MockNotificationChannel { receiver }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_response_by_tag() {
        let factory = MockTransportFactory::new();
        factory.script_response(0x0344_7500, vec![1, 2, 3]);

        let channel = factory.open_request("boot").unwrap();
        let response = channel.transact(&0x0344_7500u32.to_le_bytes());
        assert_eq!(response, vec![1, 2, 3]);

        // Unscripted tags fail soft with an empty response.
        assert!(channel.transact(&[9, 9, 9, 9]).is_empty());
        assert_eq!(factory.requests().len(), 2);
    }

    #[test]
    fn test_notification_injection() {
        let factory = MockTransportFactory::new();
        let channel = factory.open_notifications("notif").unwrap();

        factory.inject_notification("notif", vec![0xaa]);
        assert_eq!(channel.poll(Duration::from_millis(50)), Some(vec![0xaa]));
        assert_eq!(channel.poll(Duration::from_millis(10)), None);
    }
}

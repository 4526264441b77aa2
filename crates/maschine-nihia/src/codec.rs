//! NIHIA wire codec
//!
//! Binary message formats spoken by the NI host integration agent. The
//! protocol is reverse engineered: every constant below was observed on
//! the wire, and several are opaque; they are reproduced bit-exact, not
//! interpreted. All integers are little-endian; strings are ASCII,
//! length-prefixed and NUL-terminated per message type.
//!
//! # Message framing
//!
//! | Part | Content |
//! |------|---------|
//! | 0-3  | Message tag (u32 LE) |
//! | 4..  | Tag-specific fixed header |
//! | tail | Optional length-prefixed ASCII payload, usually NUL-terminated |
//!
//! A synchronous exchange succeeded iff the first four response bytes,
//! read LE, equal [`SUCCESS`] (the packed ASCII of "true").

use maschine_core::DeviceIdentity;

/// Success constant in the agent's RPC protocol. ASCII for 'true'.
pub const SUCCESS: u32 = 0x7472_7565;

/// Device-state payload value meaning "device is powered on".
pub const DEVICE_ON: u32 = 0x5a48_a720;

/// Software identifier for the Maschine 2 persona ('2MhN').
pub const SOFTWARE_ID_MASCHINE2: u32 = 0x4e68_4d32;

/// Software identifier for the Komplete Kontrol persona ('KKiN').
pub const SOFTWARE_ID_KONTROL: u32 = 0x4e69_4b4b;

/// Unknown constant required in the handshake. Possibly a protocol version.
const HEADER_CONSTANT: u32 = 0x7072_6d79;

/// Handshake tag for a device-class ("global") connection.
const MSG_HANDSHAKE: u32 = 0x0344_7500;

/// Handshake tag for a per-device connection.
const MSG_CONNECT: u32 = 0x0344_4900;

/// Fixed handshake header length (five u32 fields).
const MSG_HANDSHAKE_LEN: usize = 5 * 4;

/// Tag acknowledging the notification port assignment.
const MSG_ACK_NOTIFICATION_PORT: u32 = 0x0340_4300;

/// Fixed ACK header length (four u32 fields).
const MSG_ACK_NOTIFICATION_PORT_LEN: usize = 4 * 4;

/// Tag for the set-LED-colors message.
const MSG_SET_LEDS: u32 = 0x036c_7500;

/// Tag for the keybed keyzone configuration message.
const MSG_CONFIGURE_KEYZONE: u32 = 0x0345_736b;

/// Tag for setting the current project name from the device's view.
const MSG_SET_PROJECT_NAME: u32 = 0x0349_734e;

/// Unknown constants required when setting project names.
const PROJECT_NAME_UNKNOWN1: u32 = 0x7000_1006;
const PROJECT_NAME_UNKNOWN2: u32 = 0xf6b2_4000;

/// Tag for sending display data over IPC ('Dsd'). Reserved: direct-access
/// models push display frames over USB instead.
pub const MSG_DISPLAY: u32 = 0x0364_7344;

/// Whole message requesting the connected-device state.
pub const WHOLE_MSG_GET_DEVICE_STATE: [u8; 4] = [0x43, 0x71, 0x44, 0x03];

/// Whole message claiming exclusive control of a device ('strt').
pub const WHOLE_MSG_ACQUIRE: [u8; 8] = [0x00, 0x43, 0x43, 0x03, 0x74, 0x72, 0x74, 0x73];

/// Whole message requesting display focus ('user').
pub const WHOLE_MSG_REQUEST_FOCUS: [u8; 8] = [0x00, 0x43, 0x43, 0x03, 0x72, 0x65, 0x73, 0x75];

// Inbound notification tags.
pub const NOTIFY_DEVICE_STATE: u32 = 0x0344_4e2b;
pub const NOTIFY_CLIENT: u32 = 0x0356_4e66;
pub const NOTIFY_ACK: u32 = 0x0344_4e00;
pub const NOTIFY_BUTTON: u32 = 0x0373_4e00;
pub const NOTIFY_KNOB: u32 = 0x0365_4e00;
pub const NOTIFY_ENCODER: u32 = 0x0377_4e00;
pub const NOTIFY_TOUCHSTRIP: u32 = 0x0374_4e00;
pub const NOTIFY_CLAIM_CHANGED: u32 = 0x0343_4e00;

// Sub-tags of the client notification.
pub const CLIENT_FOCUS_CHANGED: u32 = 0x4143_4365;
pub const CLIENT_ACQUIRE: u32 = 0x4d43_5565;
pub const CLIENT_OCTAVE_CHANGED: u32 = 0x524b_6579;

// Sub-types of the button notification.
const BUTTON_TIMESTAMP: u32 = 0;
pub const BUTTON_STATE: u32 = 1;
const BUTTON_STATE_MULTI: u32 = 2;

/// Keyzone configuration body: 27 opaque words following the tag.
///
/// Only word 10 is partially understood: its low byte carries the keybed
/// color index. Everything else is reproduced from captures as-is.
const KEYZONE_TEMPLATE: [u32; 27] = [
    0x0000_0000,
    0x0000_0000,
    0x0000_0060,
    0x0000_007f,
    0x0000_0050,
    0x0000_0000,
    0x0000_0070,
    0x0b00_0000,
    0x7f0b_0000,
    0x007f_0b00,
    0x0000_7f00,
    0x7f0b_0000,
    0x007f_0b00,
    0x0000_7f0b,
    0x0000_007f,
    0x007f_0b00,
    0x0000_7f0b,
    0x0000_007f,
    0x0b00_0000,
    0x0000_7f0b,
    0x0000_007f,
    0x0b00_0000,
    0x7f0b_0000,
    0x0000_0000,
    0x0b00_0000,
    0x7f0b_0000,
    0x007f_0b00,
];

/// Which host-software persona a handshake announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftwareId {
    Maschine2,
    KompleteKontrol,
}

impl SoftwareId {
    fn as_u32(self) -> u32 {
        match self {
            SoftwareId::Maschine2 => SOFTWARE_ID_MASCHINE2,
            SoftwareId::KompleteKontrol => SOFTWARE_ID_KONTROL,
        }
    }
}

/// Port names returned by a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortNames {
    pub request: String,
    pub notification: String,
}

/// A decoded inbound notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A device of `device_type` was powered on or off
    DeviceState { on: bool, device_type: u16, serial: String },
    /// Subscription confirmation
    Ack,
    /// Our exclusive claim over the device changed
    ClaimChanged { have_claim: bool },
    /// Display focus moved; carries nothing we act on
    FocusChanged,
    /// The keybed octave shifted
    OctaveChanged { base: i32 },
    /// Button sub-message carrying only timing data; discarded
    ButtonTimestamp,
    /// A subscribed button changed state; press parity is in `state`
    Button { index: u32, state: u32 },
    /// A mode knob moved by `delta` encoder steps
    Knob { index: u32, delta: i32 },
    /// The main encoder reported a new value
    MainEncoder { value: i32 },
    /// Reserved: touchstrip events arrive on a different channel
    Touchstrip,
    /// Anything we cannot parse; logged and ignored, never fatal
    Unknown { tag: u32, remaining: usize },
}

/// Little-endian cursor over a received message.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u32(&mut self) -> Option<u32> {
        let bytes = self.buf.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i32(&mut self) -> Option<i32> {
        self.u32().map(|v| v as i32)
    }

    fn skip_u32(&mut self, count: usize) -> Option<()> {
        for _ in 0..count {
            self.u32()?;
        }
        Some(())
    }

    fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let bytes = self.buf.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(bytes)
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Read an ASCII string whose on-wire length includes the NUL terminator.
fn ascii_with_nul(reader: &mut Reader<'_>, len_with_nul: usize) -> Option<String> {
    if len_with_nul == 0 {
        return None;
    }
    let raw = reader.bytes(len_with_nul)?;
    Some(String::from_utf8_lossy(&raw[..len_with_nul - 1]).into_owned())
}

/// Encode the bootstrap handshake for the given identity.
///
/// The tag selects the global vs per-device variant; the serial section is
/// the NUL-inclusive length followed by the serial bytes and a NUL (just
/// the NUL for a global identity).
pub fn encode_handshake(identity: &DeviceIdentity, software: SoftwareId) -> Vec<u8> {
    let serial = identity.serial().as_bytes();
    let mut out = Vec::with_capacity(MSG_HANDSHAKE_LEN + serial.len() + 1);

    put_u32(&mut out, if serial.is_empty() { MSG_HANDSHAKE } else { MSG_CONNECT });
    put_u32(&mut out, u32::from(identity.device_type()));
    put_u32(&mut out, software.as_u32());
    put_u32(&mut out, HEADER_CONSTANT);
    put_u32(&mut out, serial.len() as u32 + 1);
    out.extend_from_slice(serial);
    out.push(0);

    out
}

/// Decode the handshake response into the two port names.
///
/// An empty response means the agent never replied; a 4-byte response is
/// an error code. Both are fatal to connection bring-up.
pub fn decode_handshake_response(raw: &[u8]) -> Result<PortNames, HandshakeError> {
    if raw.is_empty() {
        return Err(HandshakeError::NoReply);
    }
    if raw.len() == 4 {
        let code = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        return Err(HandshakeError::AgentError(code));
    }

    let mut reader = Reader::new(raw);
    let check = reader.u32().ok_or(HandshakeError::Truncated)?;
    if check != SUCCESS {
        return Err(HandshakeError::AgentError(check));
    }

    let request_len = reader.u32().ok_or(HandshakeError::Truncated)? as usize;
    let request = ascii_with_nul(&mut reader, request_len).ok_or(HandshakeError::Truncated)?;

    let notification_len = reader.u32().ok_or(HandshakeError::Truncated)? as usize;
    let notification =
        ascii_with_nul(&mut reader, notification_len).ok_or(HandshakeError::Truncated)?;

    Ok(PortNames { request, notification })
}

/// Handshake decode failures. All of these are transport-fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("agent did not reply to the handshake")]
    NoReply,

    #[error("agent rejected the handshake (code {0:#010x})")]
    AgentError(u32),

    #[error("handshake response was truncated")]
    Truncated,
}

/// Encode the ACK that confirms our notification port to the agent.
///
/// The length field here excludes the NUL, unlike the handshake; the NUL
/// still follows the name bytes on the wire.
pub fn encode_notification_ack(port_name: &str) -> Vec<u8> {
    let name = port_name.as_bytes();
    let mut out = Vec::with_capacity(MSG_ACK_NOTIFICATION_PORT_LEN + name.len() + 1);

    put_u32(&mut out, MSG_ACK_NOTIFICATION_PORT);
    put_u32(&mut out, SUCCESS);
    put_u32(&mut out, 0); // Padding.
    put_u32(&mut out, name.len() as u32);
    out.extend_from_slice(name);
    out.push(0);

    out
}

/// Encode a set-LEDs request: tag + payload length + one color byte per
/// illuminable element in device-specific order.
pub fn encode_set_leds(colors: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + colors.len());
    put_u32(&mut out, MSG_SET_LEDS);
    put_u32(&mut out, colors.len() as u32);
    out.extend_from_slice(colors);
    out
}

/// Encode the keyzone configuration, splicing the keybed color into the
/// opaque template.
pub fn encode_keyzone_config(key_color: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity((1 + KEYZONE_TEMPLATE.len()) * 4);
    put_u32(&mut out, MSG_CONFIGURE_KEYZONE);
    for (i, word) in KEYZONE_TEMPLATE.iter().enumerate() {
        let word = if i == 10 { word | u32::from(key_color) } else { *word };
        put_u32(&mut out, word);
    }
    out
}

/// Encode the set-project-name request.
pub fn encode_project_name(name: &str) -> Vec<u8> {
    let name = name.as_bytes();
    let mut out = Vec::with_capacity(4 * 4 + name.len() + 1);
    put_u32(&mut out, MSG_SET_PROJECT_NAME);
    put_u32(&mut out, PROJECT_NAME_UNKNOWN1);
    put_u32(&mut out, PROJECT_NAME_UNKNOWN2);
    put_u32(&mut out, name.len() as u32 + 1);
    out.extend_from_slice(name);
    out.push(0);
    out
}

/// True iff the response's first four LE bytes are the success constant.
///
/// Short or empty responses are failures, not errors.
pub fn response_was_success(raw: &[u8]) -> bool {
    match raw.get(..4) {
        Some(bytes) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == SUCCESS,
        None => false,
    }
}

/// Decode one inbound notification by its leading tag.
///
/// Unknown shapes decode to [`Notification::Unknown`]; the protocol is
/// reverse engineered and new message kinds must not crash the driver.
pub fn decode_notification(raw: &[u8]) -> Notification {
    let mut reader = Reader::new(raw);
    let Some(tag) = reader.u32() else {
        return Notification::Unknown { tag: 0, remaining: raw.len() };
    };

    match tag {
        NOTIFY_DEVICE_STATE => decode_device_state(&mut reader)
            .unwrap_or(Notification::Unknown { tag, remaining: reader.remaining() }),

        NOTIFY_ACK => Notification::Ack,

        NOTIFY_CLAIM_CHANGED => match reader.u32() {
            Some(value) => Notification::ClaimChanged { have_claim: value == SUCCESS },
            None => Notification::Unknown { tag, remaining: 0 },
        },

        NOTIFY_CLIENT => decode_client(&mut reader)
            .unwrap_or(Notification::Unknown { tag, remaining: reader.remaining() }),

        NOTIFY_BUTTON => decode_button(&mut reader)
            .unwrap_or(Notification::Unknown { tag, remaining: reader.remaining() }),

        NOTIFY_KNOB => decode_knob(&mut reader)
            .unwrap_or(Notification::Unknown { tag, remaining: reader.remaining() }),

        NOTIFY_ENCODER => decode_encoder(&mut reader)
            .unwrap_or(Notification::Unknown { tag, remaining: reader.remaining() }),

        NOTIFY_TOUCHSTRIP => Notification::Touchstrip,

        _ => Notification::Unknown { tag, remaining: reader.remaining() },
    }
}

fn decode_device_state(reader: &mut Reader<'_>) -> Option<Notification> {
    let state = reader.u32()?;
    let device_type = reader.u32()?;
    let serial_len = reader.u32()? as usize;
    let serial = ascii_with_nul(reader, serial_len)?;

    Some(Notification::DeviceState {
        on: state == DEVICE_ON,
        device_type: device_type as u16,
        serial,
    })
}

fn decode_client(reader: &mut Reader<'_>) -> Option<Notification> {
    match reader.u32()? {
        CLIENT_FOCUS_CHANGED => Some(Notification::FocusChanged),
        CLIENT_ACQUIRE => Some(Notification::ClaimChanged { have_claim: true }),
        CLIENT_OCTAVE_CHANGED => Some(Notification::OctaveChanged { base: reader.i32()? }),
        _ => None,
    }
}

fn decode_button(reader: &mut Reader<'_>) -> Option<Notification> {
    // Two leading words carry timing data we do not use.
    reader.skip_u32(2)?;
    match reader.u32()? {
        BUTTON_TIMESTAMP => Some(Notification::ButtonTimestamp),
        BUTTON_STATE | BUTTON_STATE_MULTI => {
            let index = reader.u32()?;
            let state = reader.u32()?;
            Some(Notification::Button { index, state })
        }
        _ => None,
    }
}

fn decode_knob(reader: &mut Reader<'_>) -> Option<Notification> {
    reader.skip_u32(3)?;
    let index = reader.u32()?;
    let delta = reader.i32()?;
    Some(Notification::Knob { index, delta })
}

fn decode_encoder(reader: &mut Reader<'_>) -> Option<Notification> {
    // Leading word is a timestamp.
    reader.skip_u32(1)?;
    Some(Notification::MainEncoder { value: reader.i32()? })
}

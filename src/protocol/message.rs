//! MalmoEnv command-port messages.
//!
//! Requests are short XML-ish tags sent as a single frame. Replies are either
//! raw frames (observations, strings) or fixed-layout big-endian structs.

use bitflags::bitflags;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Protocol version announced in the greeting.
pub const MALMO_VERSION: &str = "0.37.0";

bitflags! {
    /// Which optional frames accompany a step exchange.
    ///
    /// The raw bits are the `K` in `<StepK>`: 0 sends the turn key and
    /// receives info, 3 does neither.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StepOptions: u8 {
        /// Server does not send the info JSON frame.
        const OMIT_INFO = 0b01;
        /// Neither side sends a turn key frame.
        const OMIT_TURN_KEY = 0b10;
    }
}

impl StepOptions {
    /// Info and turn key both exchanged (`<Step0>`).
    pub const FULL: StepOptions = StepOptions::empty();

    pub fn from_code(code: u8) -> Option<Self> {
        Self::from_bits(code)
    }

    pub fn code(self) -> u8 {
        self.bits()
    }

    pub fn with_turn_key(self) -> bool {
        !self.contains(StepOptions::OMIT_TURN_KEY)
    }

    pub fn with_info(self) -> bool {
        !self.contains(StepOptions::OMIT_INFO)
    }
}

impl Default for StepOptions {
    fn default() -> Self {
        StepOptions::FULL
    }
}

impl serde::Serialize for StepOptions {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> serde::Deserialize<'de> for StepOptions {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        StepOptions::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid step options code {}", code)))
    }
}

/// A request frame sent to a command port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// Sent once right after connecting.
    Hello,
    /// Ask the head node for the mission's integrated server port.
    Find(&'a str),
    /// Relinquish the claim held by a token.
    Close(&'a str),
    /// Reset the remote episode counter for a token.
    Init(&'a str),
    /// Terminate the Minecraft process serving this port.
    Exit(&'a str),
    Status,
    Peek,
    Quit,
    Step { options: StepOptions, action: &'a str },
}

impl Request<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello => "hello",
            Request::Find(_) => "find",
            Request::Close(_) => "close",
            Request::Init(_) => "init",
            Request::Exit(_) => "exit",
            Request::Status => "status",
            Request::Peek => "peek",
            Request::Quit => "quit",
            Request::Step { .. } => "step",
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Request::Hello => format!("<MalmoEnv{}/>", MALMO_VERSION),
            Request::Find(token) => format!("<Find>{}</Find>", token),
            Request::Close(token) => format!("<Close>{}</Close>", token),
            Request::Init(token) => format!("<Init>{}</Init>", token),
            Request::Exit(token) => format!("<Exit>{}</Exit>", token),
            Request::Status => "<Status/>".to_string(),
            Request::Peek => "<Peek/>".to_string(),
            Request::Quit => "<Quit/>".to_string(),
            Request::Step { options, action } => {
                let k = options.code();
                format!("<Step{k}>{action}</Step{k}>")
            }
        }
    }
}

/// Decode a 4-byte big-endian `u32` reply (ok flags, ports).
pub fn decode_u32(request: &'static str, reply: &[u8]) -> Result<u32> {
    if reply.len() != 4 {
        return Err(Error::UnexpectedReply { request, expected: 4, actual: reply.len() });
    }
    let mut cursor = reply;
    cursor.read_u32::<BigEndian>().map_err(|e| Error::Io(e.to_string()))
}

pub fn encode_u32(value: u32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Decode the single signed byte that follows a peek observation.
pub fn decode_peek_done(reply: &[u8]) -> Result<bool> {
    if reply.len() != 1 {
        return Err(Error::UnexpectedReply { request: "peek", expected: 1, actual: reply.len() });
    }
    Ok(reply[0] as i8 == 1)
}

/// The `!dbb` reply to a step: reward, done flag, sent flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReply {
    pub reward: f64,
    pub done: bool,
    /// Whether the server actually applied the command.
    pub sent: bool,
}

impl StepReply {
    pub const SIZE: usize = 10;

    pub fn decode(reply: &[u8]) -> Result<Self> {
        if reply.len() != Self::SIZE {
            return Err(Error::UnexpectedReply {
                request: "step",
                expected: Self::SIZE,
                actual: reply.len(),
            });
        }
        let mut cursor = reply;
        let reward = cursor.read_f64::<BigEndian>().map_err(|e| Error::Io(e.to_string()))?;
        let done = cursor.read_i8().map_err(|e| Error::Io(e.to_string()))?;
        let sent = cursor.read_i8().map_err(|e| Error::Io(e.to_string()))?;
        Ok(Self { reward, done: done == 1, sent: sent != 0 })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        // Writes into a Vec cannot fail.
        let _ = buf.write_f64::<BigEndian>(self.reward);
        let _ = buf.write_i8(self.done as i8);
        let _ = buf.write_i8(self.sent as i8);
        buf
    }
}

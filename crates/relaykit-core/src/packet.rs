//! Packet types and their binary encodings.
//!
//! A packet is identified by the triple (src, dst, seq). Two encodings share
//! one decoder: the light form carries only the identifying triple and is
//! used to test admissibility before a payload crosses a link; the full form
//! adds the label and payload. The forms are not tagged, a decoder tells
//! them apart by the number of bytes left after the two ids.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::counter::{Counter, COUNTER_BYTES, COUNTER_WIDTH};
use crate::error::CoreError;

/// The name of a packet store. ASCII, non-empty.
///
/// Names travel length-prefixed on the wire, so the byte length and the
/// character length must agree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() || !s.is_ascii() {
            return Err(CoreError::InvalidEndpointId(s));
        }
        Ok(EndpointId(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EndpointId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EndpointId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        EndpointId::new(s)
    }
}

impl From<EndpointId> for String {
    fn from(id: EndpointId) -> String {
        id.0
    }
}

impl std::str::FromStr for EndpointId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EndpointId::new(s)
    }
}

/// A stored or in-flight message.
///
/// Immutable once accepted by a store: two packets with the same (src, dst,
/// seq) must be byte-for-byte equal everywhere they appear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub src: EndpointId,
    pub dst: EndpointId,
    pub seq: Counter,
    pub label: u32,
    pub payload: Bytes,
}

impl Packet {
    /// The identifying triple, shared with the light form.
    pub fn light(&self) -> LightPacket {
        LightPacket {
            src: self.src.clone(),
            dst: self.dst.clone(),
            seq: self.seq.clone(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            8 + self.src.as_str().len() + self.dst.as_str().len() + COUNTER_BYTES + 4 + self.payload.len(),
        );
        write_id(&mut out, &self.src);
        write_id(&mut out, &self.dst);
        out.extend_from_slice(&self.seq.to_bytes());
        out.extend_from_slice(&self.label.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        match PacketForm::decode(buf)? {
            PacketForm::Full(p) => Ok(p),
            PacketForm::Light(_) => Err(CoreError::MalformedPacket(
                "expected full packet, got light form".to_string(),
            )),
        }
    }
}

/// The identifying triple alone: enough to decide whether a transfer is
/// worthwhile without moving the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightPacket {
    pub src: EndpointId,
    pub dst: EndpointId,
    pub seq: Counter,
}

impl LightPacket {
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(8 + self.src.as_str().len() + self.dst.as_str().len() + COUNTER_BYTES);
        write_id(&mut out, &self.src);
        write_id(&mut out, &self.dst);
        out.extend_from_slice(&self.seq.to_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        match PacketForm::decode(buf)? {
            PacketForm::Light(p) => Ok(p),
            PacketForm::Full(_) => Err(CoreError::MalformedPacket(
                "expected light packet, got full form".to_string(),
            )),
        }
    }
}

/// Decoded form of a packet buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketForm {
    Light(LightPacket),
    Full(Packet),
}

impl PacketForm {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            PacketForm::Light(p) => p.encode(),
            PacketForm::Full(p) => p.encode(),
        }
    }

    /// Decode either form. After the two ids, exactly a counter's worth of
    /// bytes means light; a counter plus a label (and any payload) means
    /// full; anything else is malformed.
    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        let mut r = Reader::new(buf);
        let src = read_id(&mut r)?;
        let dst = read_id(&mut r)?;
        let remaining = r.remaining();
        if remaining == COUNTER_BYTES {
            let seq = Counter::from_bytes(r.take(COUNTER_BYTES)?, COUNTER_WIDTH);
            Ok(PacketForm::Light(LightPacket { src, dst, seq }))
        } else if remaining >= COUNTER_BYTES + 4 {
            let seq = Counter::from_bytes(r.take(COUNTER_BYTES)?, COUNTER_WIDTH);
            let label = r.u32()?;
            let payload = Bytes::copy_from_slice(r.rest());
            Ok(PacketForm::Full(Packet { src, dst, seq, label, payload }))
        } else {
            Err(CoreError::MalformedPacket(format!(
                "{remaining} bytes after ids, expected {} or at least {}",
                COUNTER_BYTES,
                COUNTER_BYTES + 4
            )))
        }
    }
}

fn write_id(out: &mut Vec<u8>, id: &EndpointId) {
    let bytes = id.as_str().as_bytes();
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_id(r: &mut Reader<'_>) -> Result<EndpointId, CoreError> {
    let len = r.u32()? as usize;
    let bytes = r.take(len)?;
    let s = std::str::from_utf8(bytes)
        .map_err(|_| CoreError::MalformedPacket("endpoint id is not utf-8".to_string()))?;
    EndpointId::new(s)
}

/// Bounds-checked cursor over an input buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CoreError> {
        if self.remaining() < n {
            return Err(CoreError::MalformedPacket(format!(
                "truncated: wanted {n} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, CoreError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}

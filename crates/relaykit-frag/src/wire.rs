//! Fragment payload encodings.
//!
//! Both formats are little-endian, matching the packet codec. They are
//! durable layouts: staged fragments survive restarts, so changes here
//! need a migration story.

use bytes::{BufMut, Bytes, BytesMut};

use relaykit_core::{Counter, CoreError};

/// Payload of a group's first packet: the logical label the payload was
/// sent under and the number of continuation packets that follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstFragment {
    pub label: u32,
    pub count: u32,
}

impl FirstFragment {
    /// `u32 label, u32 count`, 8 bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32_le(self.label);
        buf.put_u32_le(self.count);
        buf.freeze()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        if buf.len() != 8 {
            return Err(CoreError::MalformedFragment(format!(
                "first fragment payload must be 8 bytes, got {}",
                buf.len()
            )));
        }
        Ok(FirstFragment {
            label: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            count: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

/// Payload of a continuation packet: the group id followed by one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestFragment {
    /// Sequence counter of the group's first packet.
    pub group: Counter,
    pub chunk: Bytes,
}

impl RestFragment {
    /// `u32 len, group id hex string, chunk bytes`.
    pub fn encode(&self) -> Bytes {
        let id = self.group.as_str().as_bytes();
        let mut buf = BytesMut::with_capacity(4 + id.len() + self.chunk.len());
        buf.put_u32_le(id.len() as u32);
        buf.put_slice(id);
        buf.put_slice(&self.chunk);
        buf.freeze()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        if buf.len() < 4 {
            return Err(CoreError::MalformedFragment(format!(
                "continuation payload too short: {} bytes",
                buf.len()
            )));
        }
        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let Some(id) = buf.get(4..4 + len) else {
            return Err(CoreError::MalformedFragment(format!(
                "group id claims {} bytes, only {} available",
                len,
                buf.len() - 4
            )));
        };
        let id = std::str::from_utf8(id)
            .map_err(|_| CoreError::MalformedFragment("group id is not ASCII hex".to_string()))?;
        Ok(RestFragment {
            group: Counter::parse(id)?,
            chunk: Bytes::copy_from_slice(&buf[4 + len..]),
        })
    }
}

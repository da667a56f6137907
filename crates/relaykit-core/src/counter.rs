//! Fixed-width hex-string counters.
//!
//! Sequence numbers and watermarks are strings over the alphabet `0-9a-f`,
//! padded to a fixed width. Because `'9' < 'a'` in ASCII, lexicographic
//! comparison of equal-width counters agrees with numeric comparison, which
//! lets the store order and range-scan them as plain TEXT columns.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default counter width in hex digits: 64 bits = 8 bytes = 16 digits.
pub const COUNTER_WIDTH: usize = 16;

/// Number of bytes a default-width counter occupies in binary form.
pub const COUNTER_BYTES: usize = COUNTER_WIDTH / 2;

/// A fixed-width lowercase-hex counter.
///
/// Ordering derives from the inner string; for equal widths this is the
/// numeric order. All arithmetic preserves the width.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Counter(String);

impl Counter {
    /// The all-zero counter: the minimum value, meaning "no watermark yet".
    pub fn zero(width: usize) -> Self {
        Counter("0".repeat(width))
    }

    /// Encode a number, left-padded with zeros to `width`.
    ///
    /// A value too large for `width` keeps its natural hex length rather
    /// than being truncated.
    pub fn from_number(n: u64, width: usize) -> Self {
        let hex = format!("{n:x}");
        if hex.len() >= width {
            Counter(hex)
        } else {
            let mut s = String::with_capacity(width);
            for _ in 0..width - hex.len() {
                s.push('0');
            }
            s.push_str(&hex);
            Counter(s)
        }
    }

    /// A counter seeded from the current time in milliseconds since the
    /// Unix epoch.
    ///
    /// Fresh sequence ranges start here so that counters assigned after a
    /// store loses its state still sort above everything assigned before.
    pub fn from_time(width: usize) -> Self {
        Self::from_number(now_millis(), width)
    }

    /// Parse an untrusted string. Rejects empty input and anything outside
    /// `0-9a-f`.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(CoreError::MalformedCounter(s.to_string()));
        }
        Ok(Counter(s.to_string()))
    }

    /// The successor at the same width.
    ///
    /// # Panics
    ///
    /// Panics when every digit is `f`: the counter space for this width is
    /// exhausted. At the default width that is 2^64 increments from a
    /// millisecond-epoch seed, so this is treated as a programming error
    /// rather than a runtime condition. Never wraps to zero.
    pub fn inc(&self) -> Self {
        let mut digits = self.0.clone().into_bytes();
        for i in (0..digits.len()).rev() {
            match digits[i] {
                b'f' => digits[i] = b'0',
                b'9' => {
                    digits[i] = b'a';
                    return Counter(ascii(digits));
                }
                d => {
                    digits[i] = d + 1;
                    return Counter(ascii(digits));
                }
            }
        }
        panic!("counter overflow at width {}", self.0.len());
    }

    /// `self + n` at the same width.
    ///
    /// # Panics
    ///
    /// Panics when the sum does not fit the width, like [`inc`](Self::inc).
    pub fn add(&self, n: u64) -> Self {
        let mut digits = self.0.clone().into_bytes();
        let mut carry = n as u128;
        for i in (0..digits.len()).rev() {
            if carry == 0 {
                break;
            }
            let sum = hex_val(digits[i]) as u128 + (carry & 0xf);
            digits[i] = hex_digit((sum & 0xf) as u8);
            carry = (carry >> 4) + (sum >> 4);
        }
        if carry != 0 {
            panic!("counter overflow at width {}", self.0.len());
        }
        Counter(ascii(digits))
    }

    /// Signed distance `self - other`, saturating at the `i64` range.
    ///
    /// Only used for progress estimates; both counters must share a width.
    pub fn diff(&self, other: &Counter) -> i64 {
        assert_eq!(self.0.len(), other.0.len(), "counter widths differ");
        match self.0.cmp(&other.0) {
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => distance(&self.0, &other.0),
            std::cmp::Ordering::Less => -distance(&other.0, &self.0),
        }
    }

    /// Pack two hex digits per byte. Odd widths gain a leading zero digit.
    pub fn to_bytes(&self) -> Vec<u8> {
        let decoded = if self.0.len() % 2 == 0 {
            hex::decode(&self.0)
        } else {
            let mut padded = String::with_capacity(self.0.len() + 1);
            padded.push('0');
            padded.push_str(&self.0);
            hex::decode(&padded)
        };
        decoded.expect("counter digits are valid hex")
    }

    /// Inverse of [`to_bytes`](Self::to_bytes): for odd widths the padding
    /// digit is sliced back off.
    pub fn from_bytes(bytes: &[u8], width: usize) -> Self {
        let full = hex::encode(bytes);
        debug_assert!(full.len() == width || full.len() == width + 1);
        if full.len() == width {
            Counter(full)
        } else {
            Counter(full[1..].to_string())
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }

    pub fn width(&self) -> usize {
        self.0.len()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Counter {
    fn default() -> Self {
        Counter::zero(COUNTER_WIDTH)
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Counter {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Counter::parse(&s)
    }
}

impl From<Counter> for String {
    fn from(c: Counter) -> String {
        c.0
    }
}

impl std::str::FromStr for Counter {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Counter::parse(s)
    }
}

fn ascii(digits: Vec<u8>) -> String {
    String::from_utf8(digits).expect("counter digits are ascii")
}

fn hex_val(d: u8) -> u8 {
    match d {
        b'0'..=b'9' => d - b'0',
        _ => d - b'a' + 10,
    }
}

fn hex_digit(v: u8) -> u8 {
    if v < 10 {
        b'0' + v
    } else {
        b'a' + v - 10
    }
}

/// |hi - lo| for equal-width hex strings with hi >= lo.
fn distance(hi: &str, lo: &str) -> i64 {
    // 32 hex digits fill a u128 exactly; wider counters compare their
    // leading digits first and saturate when those already differ.
    if hi.len() > 32 {
        let cut = hi.len() - 32;
        if hi[..cut] != lo[..cut] {
            return i64::MAX;
        }
        return distance(&hi[cut..], &lo[cut..]);
    }
    let a = u128::from_str_radix(hi, 16).unwrap_or(u128::MAX);
    let b = u128::from_str_radix(lo, 16).unwrap_or(0);
    i64::try_from(a - b).unwrap_or(i64::MAX)
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as u64
}

//! Golden byte vectors for the wire encodings.
//!
//! These vectors pin the exact bytes the codecs produce, so a change to
//! an encoding fails loudly and another implementation can check itself
//! against known-good output.

use bytes::Bytes;

use relaykit_core::{Counter, EndpointId, LightPacket, Packet};
use relaykit_frag::{FirstFragment, RestFragment};

/// A pinned packet encoding.
#[derive(Debug, Clone)]
pub struct PacketVector {
    pub name: &'static str,
    pub src: &'static str,
    pub dst: &'static str,
    /// Counter string, default width.
    pub seq: &'static str,
    /// `None` encodes the light form.
    pub label: Option<u32>,
    pub payload: &'static [u8],
    /// Expected encoding, hex.
    pub expected_hex: &'static str,
}

/// A pinned counter: its successor and its packed byte form.
#[derive(Debug, Clone)]
pub struct CounterVector {
    pub name: &'static str,
    pub value: &'static str,
    /// `value.inc()`.
    pub next: &'static str,
    /// Hex of `value.to_bytes()`. For even widths this is the counter
    /// string itself; the vector pins that identity.
    pub bytes_hex: &'static str,
}

/// A pinned fragment header or continuation encoding.
#[derive(Debug, Clone)]
pub struct FragmentVector {
    pub name: &'static str,
    /// `Some((label, count))` encodes a first fragment, `None` a
    /// continuation built from `group` and `chunk`.
    pub first: Option<(u32, u32)>,
    pub group: &'static str,
    pub chunk: &'static [u8],
    pub expected_hex: &'static str,
}

pub fn packet_vectors() -> Vec<PacketVector> {
    vec![
        PacketVector {
            name: "light form",
            src: "ab",
            dst: "c",
            seq: "00000000000000ff",
            label: None,
            payload: b"",
            expected_hex: "020000006162010000006300000000000000ff",
        },
        PacketVector {
            name: "full form with payload",
            src: "ab",
            dst: "c",
            seq: "0000000000001234",
            label: Some(7),
            payload: b"hi",
            expected_hex: "02000000616201000000630000000000001234070000006869",
        },
        PacketVector {
            name: "full form, empty payload, zero seq",
            src: "a",
            dst: "b",
            seq: "0000000000000000",
            label: Some(0),
            payload: b"",
            expected_hex: "01000000610100000062000000000000000000000000",
        },
    ]
}

pub fn counter_vectors() -> Vec<CounterVector> {
    vec![
        CounterVector {
            name: "increment across the digit-to-letter boundary",
            value: "0000000000000009",
            next: "000000000000000a",
            bytes_hex: "0000000000000009",
        },
        CounterVector {
            name: "increment with single carry",
            value: "000000000000000f",
            next: "0000000000000010",
            bytes_hex: "000000000000000f",
        },
        CounterVector {
            name: "increment with double carry",
            value: "00000000000000ff",
            next: "0000000000000100",
            bytes_hex: "00000000000000ff",
        },
        CounterVector {
            name: "all zeros",
            value: "0000000000000000",
            next: "0000000000000001",
            bytes_hex: "0000000000000000",
        },
        CounterVector {
            name: "high bits set",
            value: "00000000deadbeef",
            next: "00000000deadbef0",
            bytes_hex: "00000000deadbeef",
        },
    ]
}

pub fn fragment_vectors() -> Vec<FragmentVector> {
    vec![
        FragmentVector {
            name: "first fragment, small label and count",
            first: Some((7, 3)),
            group: "",
            chunk: b"",
            expected_hex: "0700000003000000",
        },
        FragmentVector {
            name: "first fragment, multi-byte label and count",
            first: Some((256, 65536)),
            group: "",
            chunk: b"",
            expected_hex: "0001000000000100",
        },
        FragmentVector {
            name: "continuation with two chunk bytes",
            first: None,
            group: "00000000000000aa",
            chunk: &[0xde, 0xad],
            expected_hex: "1000000030303030303030303030303030306161dead",
        },
        FragmentVector {
            name: "continuation with empty chunk",
            first: None,
            group: "0000000000000000",
            chunk: b"",
            expected_hex: "1000000030303030303030303030303030303030",
        },
    ]
}

/// Encode one packet vector.
pub fn encode_packet_vector(vector: &PacketVector) -> Vec<u8> {
    let src = EndpointId::new(vector.src).expect("vector src");
    let dst = EndpointId::new(vector.dst).expect("vector dst");
    let seq = Counter::parse(vector.seq).expect("vector seq");
    match vector.label {
        Some(label) => Packet {
            src,
            dst,
            seq,
            label,
            payload: Bytes::from_static(vector.payload),
        }
        .encode(),
        None => LightPacket { src, dst, seq }.encode(),
    }
}

/// Encode one fragment vector.
pub fn encode_fragment_vector(vector: &FragmentVector) -> Vec<u8> {
    match vector.first {
        Some((label, count)) => FirstFragment { label, count }.encode().to_vec(),
        None => RestFragment {
            group: Counter::parse(vector.group).expect("vector group"),
            chunk: Bytes::from_static(vector.chunk),
        }
        .encode()
        .to_vec(),
    }
}

/// Check every vector against its pinned bytes.
///
/// Returns (name, matches, actual hex) per vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    let mut results = Vec::new();
    for v in packet_vectors() {
        let got = hex::encode(encode_packet_vector(&v));
        results.push((v.name.to_string(), got == v.expected_hex, got));
    }
    for v in fragment_vectors() {
        let got = hex::encode(encode_fragment_vector(&v));
        results.push((v.name.to_string(), got == v.expected_hex, got));
    }
    for v in counter_vectors() {
        let value = Counter::parse(v.value).expect("vector counter");
        let got = format!("{}/{}", value.inc(), hex::encode(value.to_bytes()));
        let want = format!("{}/{}", v.next, v.bytes_hex);
        results.push((v.name.to_string(), got == want, got));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaykit_core::PacketForm;

    #[test]
    fn test_all_vectors_match() {
        for (name, matches, got) in verify_all_vectors() {
            assert!(matches, "vector '{name}' produced {got}");
        }
    }

    #[test]
    fn test_packet_vectors_decode_back() {
        for vector in packet_vectors() {
            let bytes = hex::decode(vector.expected_hex).unwrap();
            let form = PacketForm::decode(&bytes).unwrap();
            match (vector.label, form) {
                (Some(label), PacketForm::Full(p)) => {
                    assert_eq!(p.src.as_str(), vector.src);
                    assert_eq!(p.label, label);
                    assert_eq!(p.payload.as_ref(), vector.payload);
                }
                (None, PacketForm::Light(p)) => {
                    assert_eq!(p.src.as_str(), vector.src);
                    assert_eq!(p.seq.as_str(), vector.seq);
                }
                (_, form) => panic!("vector '{}' decoded to the wrong form: {form:?}", vector.name),
            }
        }
    }

    #[test]
    fn test_fragment_vectors_decode_back() {
        for vector in fragment_vectors() {
            let bytes = hex::decode(vector.expected_hex).unwrap();
            match vector.first {
                Some((label, count)) => {
                    let first = FirstFragment::decode(&bytes).unwrap();
                    assert_eq!(first.label, label);
                    assert_eq!(first.count, count);
                }
                None => {
                    let rest = RestFragment::decode(&bytes).unwrap();
                    assert_eq!(rest.group.as_str(), vector.group);
                    assert_eq!(rest.chunk.as_ref(), vector.chunk);
                }
            }
        }
    }
}

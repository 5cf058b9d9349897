//! Miner (actor) addresses.
//!
//! A textual address is a network prefix (`f` mainnet, `t` testnet), a protocol digit
//! and a protocol-specific body:
//!
//! - `0`: decimal actor id
//! - `1`, `2`, `3`: lowercase unpadded base32 of `payload || checksum`
//! - `4`: `<namespace>f<base32 of subaddress || checksum>`
//!
//! The checksum is a 4-byte blake2b over the protocol byte and the payload. Addresses are
//! stored in canonical form, which always uses the mainnet prefix.

use std::fmt;
use std::str::FromStr;

use blake2::{digest::consts::U4, Blake2b, Digest};
use data_encoding::BASE32_NOPAD;
use thiserror::Error;

const CHECKSUM_LEN: usize = 4;
const SECP256K1_LEN: usize = 20;
const ACTOR_LEN: usize = 20;
const BLS_LEN: usize = 48;
const MAX_SUBADDRESS_LEN: usize = 54;
const MAX_ADDRESS_LEN: usize = 2 + 20 + 1 + 104;

type Blake2b32 = Blake2b<U4>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty or too short")]
    TooShort,
    #[error("address is too long")]
    TooLong,
    #[error("unknown network prefix")]
    UnknownNetwork,
    #[error("unknown protocol {0}")]
    UnknownProtocol(char),
    #[error("invalid payload encoding")]
    Encoding,
    #[error("invalid payload length {0}")]
    PayloadLength(usize),
    #[error("checksum mismatch")]
    Checksum,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    Id(u64),
    Secp256k1(Vec<u8>),
    Actor(Vec<u8>),
    Bls(Vec<u8>),
    Delegated { namespace: u64, subaddress: Vec<u8> },
}

impl Address {
    pub fn protocol(&self) -> u8 {
        match self {
            Address::Id(_) => 0,
            Address::Secp256k1(_) => 1,
            Address::Actor(_) => 2,
            Address::Bls(_) => 3,
            Address::Delegated { .. } => 4,
        }
    }

    /// Bytes the checksum is computed over, after the protocol byte.
    fn checksum_payload(&self) -> Vec<u8> {
        match self {
            Address::Id(id) => uvarint(*id),
            Address::Secp256k1(p) | Address::Actor(p) | Address::Bls(p) => p.clone(),
            Address::Delegated {
                namespace,
                subaddress,
            } => {
                let mut buf = uvarint(*namespace);
                buf.extend_from_slice(subaddress);
                buf
            }
        }
    }

    fn checksum(&self) -> [u8; CHECKSUM_LEN] {
        let mut h = Blake2b32::new();
        h.update([self.protocol()]);
        h.update(self.checksum_payload());
        let mut sum = [0u8; CHECKSUM_LEN];
        sum.copy_from_slice(&h.finalize());
        sum
    }
}

fn uvarint(mut v: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
    out
}

fn parse_decimal(s: &str) -> Result<u64, AddressError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::Encoding);
    }
    s.parse().map_err(|_| AddressError::Encoding)
}

fn encode_base32(raw: &[u8]) -> String {
    BASE32_NOPAD.encode(raw).to_ascii_lowercase()
}

fn decode_base32(s: &str) -> Result<Vec<u8>, AddressError> {
    if s.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(AddressError::Encoding);
    }
    BASE32_NOPAD
        .decode(s.to_ascii_uppercase().as_bytes())
        .map_err(|_| AddressError::Encoding)
}

/// Split `payload || checksum` and check its length.
fn split_checksum(raw: &[u8]) -> Result<(&[u8], &[u8]), AddressError> {
    if raw.len() < CHECKSUM_LEN {
        return Err(AddressError::PayloadLength(raw.len()));
    }
    Ok(raw.split_at(raw.len() - CHECKSUM_LEN))
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() < 3 || !s.is_ascii() {
            return Err(AddressError::TooShort);
        }
        if s.len() > MAX_ADDRESS_LEN {
            return Err(AddressError::TooLong);
        }
        match &s[..1] {
            "f" | "t" => {}
            _ => return Err(AddressError::UnknownNetwork),
        }
        let body = &s[2..];

        let (addr, sum) = match s.as_bytes()[1] {
            b'0' => return Ok(Address::Id(parse_decimal(body)?)),
            proto @ (b'1' | b'2' | b'3') => {
                let raw = decode_base32(body)?;
                let (payload, sum) = split_checksum(&raw)?;
                let (addr, want) = match proto {
                    b'1' => (Address::Secp256k1(payload.to_vec()), SECP256K1_LEN),
                    b'2' => (Address::Actor(payload.to_vec()), ACTOR_LEN),
                    _ => (Address::Bls(payload.to_vec()), BLS_LEN),
                };
                if payload.len() != want {
                    return Err(AddressError::PayloadLength(payload.len()));
                }
                (addr, sum.to_vec())
            }
            b'4' => {
                let (ns, rest) = body.split_once('f').ok_or(AddressError::Encoding)?;
                let namespace = parse_decimal(ns)?;
                let raw = decode_base32(rest)?;
                let (sub, sum) = split_checksum(&raw)?;
                if sub.len() > MAX_SUBADDRESS_LEN {
                    return Err(AddressError::PayloadLength(sub.len()));
                }
                let addr = Address::Delegated {
                    namespace,
                    subaddress: sub.to_vec(),
                };
                (addr, sum.to_vec())
            }
            other => return Err(AddressError::UnknownProtocol(other as char)),
        };

        if addr.checksum()[..] != sum[..] {
            return Err(AddressError::Checksum);
        }
        Ok(addr)
    }
}

/// Canonical (mainnet) form.
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Id(id) => write!(f, "f0{id}"),
            Address::Secp256k1(p) | Address::Actor(p) | Address::Bls(p) => {
                let mut raw = p.clone();
                raw.extend_from_slice(&self.checksum());
                write!(f, "f{}{}", self.protocol(), encode_base32(&raw))
            }
            Address::Delegated {
                namespace,
                subaddress,
            } => {
                let mut raw = subaddress.clone();
                raw.extend_from_slice(&self.checksum());
                write!(f, "f4{namespace}f{}", encode_base32(&raw))
            }
        }
    }
}

/// Parse `s` and return its canonical string form.
pub fn normalize(s: &str) -> Result<String, AddressError> {
    Ok(s.parse::<Address>()?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_addresses_canonicalize() {
        assert_eq!(normalize("f01000").unwrap(), "f01000");
        assert_eq!(normalize("t01000").unwrap(), "f01000");
        assert_eq!(normalize("f0007").unwrap(), "f07");
        assert_eq!(normalize("f0+7"), Err(AddressError::Encoding));
        assert_eq!(normalize("f0"), Err(AddressError::TooShort));
    }

    #[test]
    fn key_addresses_round_trip_through_text() {
        for addr in [
            Address::Secp256k1(vec![0x11; SECP256K1_LEN]),
            Address::Actor(vec![0x22; ACTOR_LEN]),
            Address::Bls(vec![0x33; BLS_LEN]),
            Address::Delegated {
                namespace: 10,
                subaddress: vec![0x44; 20],
            },
        ] {
            let text = addr.to_string();
            assert_eq!(text.parse::<Address>().unwrap(), addr, "{text}");
            let testnet = format!("t{}", &text[1..]);
            assert_eq!(normalize(&testnet).unwrap(), text);
        }
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let text = Address::Secp256k1(vec![0x11; SECP256K1_LEN]).to_string();
        let mut bytes = text.into_bytes();
        let last = bytes.len() - 2;
        bytes[last] = if bytes[last] == b'a' { b'b' } else { b'a' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert!(tampered.parse::<Address>().is_err());
    }

    #[test]
    fn wrong_payload_length_is_rejected() {
        // a checksum-valid BLS-sized payload presented as secp256k1
        let bls = Address::Bls(vec![0x33; BLS_LEN]).to_string();
        let as_secp = format!("f1{}", &bls[2..]);
        assert!(matches!(
            as_secp.parse::<Address>(),
            Err(AddressError::PayloadLength(BLS_LEN))
        ));
    }

    #[test]
    fn malformed_inputs() {
        assert_eq!(normalize(""), Err(AddressError::TooShort));
        assert_eq!(normalize("x01000"), Err(AddressError::UnknownNetwork));
        assert_eq!(normalize("f91000"), Err(AddressError::UnknownProtocol('9')));
        assert_eq!(normalize("f1ABCDEFG"), Err(AddressError::Encoding));
        assert_eq!(normalize(&format!("f0{}", "1".repeat(200))), Err(AddressError::TooLong));
    }

    #[test]
    fn uvarint_matches_known_encodings() {
        assert_eq!(uvarint(1), vec![0x01]);
        assert_eq!(uvarint(300), vec![0xac, 0x02]);
    }
}

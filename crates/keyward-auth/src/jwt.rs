//! HS256 JSON web tokens with a per-token secret.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of a freshly generated signing secret.
pub const SECRET_LEN: usize = 32;

const ALG: &str = "HS256";

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: String,
}

/// Signed payload of a token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub name: String,
    pub perm: String,
    #[serde(rename = "ext", default)]
    pub extra: String,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported algorithm {0}")]
    Algorithm(String),
    #[error("signature mismatch")]
    BadSignature,
    #[error("invalid secret: {0}")]
    Secret(String),
    #[error("encode claims: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fresh random key material from the OS.
pub fn random_secret() -> Zeroizing<[u8; SECRET_LEN]> {
    let mut secret = Zeroizing::new([0u8; SECRET_LEN]);
    OsRng.fill_bytes(&mut secret[..]);
    secret
}

fn mac(secret: &[u8], signing_input: &[u8]) -> Result<HmacSha256, TokenError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| TokenError::Secret(e.to_string()))?;
    mac.update(signing_input);
    Ok(mac)
}

pub fn sign(claims: &Claims, secret: &[u8]) -> Result<String, TokenError> {
    let header = Header {
        alg: ALG.to_string(),
        typ: "JWT".to_string(),
    };
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{header}.{payload}");

    let sig = mac(secret, signing_input.as_bytes())?.finalize().into_bytes();
    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(sig)))
}

/// Check the signature with `secret` and return the claims.
pub fn verify(token: &str, secret: &[u8]) -> Result<Claims, TokenError> {
    let (signing_input, sig) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
    let (header, payload) = signing_input.split_once('.').ok_or(TokenError::Malformed)?;

    let header: Header = decode_part(header)?;
    if header.alg != ALG {
        return Err(TokenError::Algorithm(header.alg));
    }

    let provided = URL_SAFE_NO_PAD
        .decode(sig)
        .map_err(|_| TokenError::Malformed)?;
    let expected = mac(secret, signing_input.as_bytes())?.finalize().into_bytes();
    if provided.ct_eq(expected.as_slice()).unwrap_u8() != 1 {
        return Err(TokenError::BadSignature);
    }

    decode_part(payload)
}

/// Read the claims without checking the signature. Only for display.
pub fn decode_claims(token: &str) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => decode_part(payload),
        _ => Err(TokenError::Malformed),
    }
}

fn decode_part<T: DeserializeOwned>(part: &str) -> Result<T, TokenError> {
    let raw = URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&raw).map_err(|_| TokenError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Claims {
        Claims {
            name: "alice".into(),
            perm: "write".into(),
            extra: "node-7".into(),
        }
    }

    #[test]
    fn signed_token_verifies_with_its_secret() {
        let secret = random_secret();
        let token = sign(&claims(), &secret[..]).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(verify(&token, &secret[..]).unwrap(), claims());
    }

    #[test]
    fn other_secret_is_rejected() {
        let token = sign(&claims(), &random_secret()[..]).unwrap();
        assert!(matches!(
            verify(&token, &random_secret()[..]),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let secret = random_secret();
        let token = sign(&claims(), &secret[..]).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"name":"mallory","perm":"admin","ext":""}"#);
        parts[1] = &forged;
        assert!(verify(&parts.join("."), &secret[..]).is_err());
    }

    #[test]
    fn claims_use_short_extra_key() {
        let token = sign(&claims(), &[1u8; SECRET_LEN]).unwrap();
        let payload = token.split('.').nth(1).unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        assert_eq!(json["ext"], "node-7");
        assert_eq!(json["perm"], "write");
    }

    #[test]
    fn decode_claims_skips_signature() {
        let token = sign(&claims(), &[9u8; SECRET_LEN]).unwrap();
        assert_eq!(decode_claims(&token).unwrap().name, "alice");
        assert!(decode_claims("only.two").is_err());
        assert!(decode_claims("a.!!!.c").is_err());
    }

    #[test]
    fn secrets_are_not_reused() {
        assert_ne!(&random_secret()[..], &random_secret()[..]);
    }
}

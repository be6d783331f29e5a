//! JWS signature verification.
//!
//! RSA (PKCS#1 v1.5 and PSS) and ECDSA over P-256/P-384, verified with
//! `ring`. `none` and HMAC algorithms are never accepted: an issuer's public
//! key set cannot authenticate a symmetric signature.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ring::signature::{self, RsaPublicKeyComponents, UnparsedPublicKey};

/// Signature algorithms the engine can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
    ES256,
    ES384,
}

/// JWK key family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Rsa,
    Ec,
}

/// Named elliptic curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    P256,
    P384,
}

impl Algorithm {
    pub const ALL: [Algorithm; 8] = [
        Algorithm::RS256,
        Algorithm::RS384,
        Algorithm::RS512,
        Algorithm::PS256,
        Algorithm::PS384,
        Algorithm::PS512,
        Algorithm::ES256,
        Algorithm::ES384,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RS256 => "RS256",
            Algorithm::RS384 => "RS384",
            Algorithm::RS512 => "RS512",
            Algorithm::PS256 => "PS256",
            Algorithm::PS384 => "PS384",
            Algorithm::PS512 => "PS512",
            Algorithm::ES256 => "ES256",
            Algorithm::ES384 => "ES384",
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Algorithm::ES256 | Algorithm::ES384 => KeyType::Ec,
            _ => KeyType::Rsa,
        }
    }

    /// Curve an EC algorithm is defined over.
    pub fn curve(&self) -> Option<Curve> {
        match self {
            Algorithm::ES256 => Some(Curve::P256),
            Algorithm::ES384 => Some(Curve::P384),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .iter()
            .copied()
            .find(|alg| alg.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl Curve {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "P-256" => Some(Curve::P256),
            "P-384" => Some(Curve::P384),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Curve::P256 => "P-256",
            Curve::P384 => "P-384",
        }
    }

    fn coordinate_len(&self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
        }
    }
}

/// Decoded public key material.
#[derive(Clone, PartialEq, Eq)]
pub enum PublicKey {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    /// Uncompressed SEC1 point, `0x04 || x || y`.
    Ec { curve: Curve, point: Vec<u8> },
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicKey::Rsa { n, .. } => write!(f, "PublicKey::Rsa({} bits)", n.len() * 8),
            PublicKey::Ec { curve, .. } => write!(f, "PublicKey::Ec({})", curve.name()),
        }
    }
}

impl PublicKey {
    /// Build an RSA key from base64url `n` and `e`.
    pub fn rsa_from_jwk(n: &str, e: &str) -> Result<Self, String> {
        let n = base64url_decode(n).map_err(|e| format!("invalid base64url in n: {}", e))?;
        let e = base64url_decode(e).map_err(|e| format!("invalid base64url in e: {}", e))?;
        // ring wants minimal big-endian integers.
        let n = strip_leading_zeros(n);
        let e = strip_leading_zeros(e);
        if n.is_empty() || e.is_empty() {
            return Err("empty RSA component".into());
        }
        Ok(PublicKey::Rsa { n, e })
    }

    /// Build an EC key from a curve name and base64url coordinates.
    pub fn ec_from_jwk(crv: &str, x: &str, y: &str) -> Result<Self, String> {
        let curve = Curve::from_name(crv).ok_or_else(|| format!("unsupported curve: {}", crv))?;
        let x = base64url_decode(x).map_err(|e| format!("invalid base64url in x: {}", e))?;
        let y = base64url_decode(y).map_err(|e| format!("invalid base64url in y: {}", e))?;

        let len = curve.coordinate_len();
        if x.len() != len || y.len() != len {
            return Err(format!("coordinates do not match curve {}", curve.name()));
        }

        let mut point = Vec::with_capacity(1 + 2 * len);
        point.push(0x04);
        point.extend_from_slice(&x);
        point.extend_from_slice(&y);
        Ok(PublicKey::Ec { curve, point })
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            PublicKey::Rsa { .. } => KeyType::Rsa,
            PublicKey::Ec { .. } => KeyType::Ec,
        }
    }

    /// Whether this key can verify signatures made with `alg`.
    pub fn supports(&self, alg: Algorithm) -> bool {
        match self {
            PublicKey::Rsa { .. } => alg.key_type() == KeyType::Rsa,
            PublicKey::Ec { curve, .. } => alg.curve() == Some(*curve),
        }
    }

    /// Verify `sig` over `message`. Any mismatch, including a key that does
    /// not fit `alg`, is reported as `false`.
    pub fn verify(&self, alg: Algorithm, message: &[u8], sig: &[u8]) -> bool {
        if !self.supports(alg) {
            return false;
        }
        match self {
            PublicKey::Rsa { n, e } => verify_rsa(alg, n, e, message, sig),
            PublicKey::Ec { point, .. } => verify_ec(alg, point, message, sig),
        }
    }
}

fn verify_rsa(alg: Algorithm, n: &[u8], e: &[u8], message: &[u8], sig: &[u8]) -> bool {
    let params: &signature::RsaParameters = match alg {
        Algorithm::RS256 => &signature::RSA_PKCS1_2048_8192_SHA256,
        Algorithm::RS384 => &signature::RSA_PKCS1_2048_8192_SHA384,
        Algorithm::RS512 => &signature::RSA_PKCS1_2048_8192_SHA512,
        Algorithm::PS256 => &signature::RSA_PSS_2048_8192_SHA256,
        Algorithm::PS384 => &signature::RSA_PSS_2048_8192_SHA384,
        Algorithm::PS512 => &signature::RSA_PSS_2048_8192_SHA512,
        Algorithm::ES256 | Algorithm::ES384 => return false,
    };

    RsaPublicKeyComponents { n, e }
        .verify(params, message, sig)
        .is_ok()
}

fn verify_ec(alg: Algorithm, point: &[u8], message: &[u8], sig: &[u8]) -> bool {
    let verifier: &signature::EcdsaVerificationAlgorithm = match alg {
        Algorithm::ES256 => &signature::ECDSA_P256_SHA256_FIXED,
        Algorithm::ES384 => &signature::ECDSA_P384_SHA384_FIXED,
        _ => return false,
    };

    UnparsedPublicKey::new(verifier, point)
        .verify(message, sig)
        .is_ok()
}

fn strip_leading_zeros(mut bytes: Vec<u8>) -> Vec<u8> {
    let zeros = bytes.iter().take_while(|&&b| b == 0).count();
    bytes.drain(..zeros);
    bytes
}

/// Decode unpadded base64url, tolerating trailing padding.
pub(crate) fn base64url_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(input.trim_end_matches('='))
}

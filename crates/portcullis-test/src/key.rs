//! TestKey: signing keys that mint real tokens.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ring::rand::SystemRandom;
use ring::signature::{self, EcdsaKeyPair, KeyPair, RsaKeyPair};
use serde_json::{json, Value};

use crate::TestError;

const RSA_K1_PEM: &str = include_str!("../fixtures/rsa_k1.pem");
const RSA_K2_PEM: &str = include_str!("../fixtures/rsa_k2.pem");
const EC_P256_PEM: &str = include_str!("../fixtures/ec_p256.pem");

/// Public modulus of `rsa_k1.pem`.
const RSA_K1_N: &str = "wohm_qeeKop6frzg7swVv78zUVP8lX5Nxn9ppKAWAACt6_p1ppcwDy4R6u0QCTwPdvdS3ILvD6x2EfaTMWwpM1_9t-30Zx9a1MuJW_l1zJPJWX00ULxyM8DwxuaralmceQCidtAOT57TjYXWUQS57E8c2fB_utA5ljoAEQ4jyqFAc38zt3WedNJjtScTl0g0VqnVw2LJ_dVO1dmSEAgfCvXouD_A6JCn6FTT7xah5U0c8kw3itsTeuUrCGDWTYMe8dj8Dv_MLYYb1mHki8OrA2DlKd7WQ6dy341ioVY8ewixffv5gSWImHuVagXF6MVXPvZqwG0L0YrMQZHHATohFw";

/// Public modulus of `rsa_k2.pem`.
const RSA_K2_N: &str = "0wLjIrfjTB4q50RO6OeexHMxLM19VyZyboBjLbBJhWak38310NMFOfE9swMFFbaEcGbRdrAFxT2nBg1a5ZKp3HFN0IWlEqeG7ExITFlSZZJVgkjcocrjAePI_KfEO7VJ2LwAUoQ_SVd9yCRd7m9HeTrplFHSmBGgDWVKNYhpH8WX_Y8zVlQZCh1V8zs_JlSf9aMbnf5473IDykA5jhPEvbVW0O2NggB-IIo2e6NO4PKf6OEK3yK-eHUC6tDU7f6AxNEmogtfTCzFlEDarR5vRdIcBA5h0sSAjRc2ANpqOsgM2fs9UbWTD36QM0SUVnytbiZebS-9XhFbpM8M189VeQ";

#[derive(Clone)]
enum Signer {
    Rsa { pair: Arc<RsaKeyPair>, n: &'static str },
    Ec(Arc<EcdsaKeyPair>),
}

/// A private key plus the header fields stamped on tokens it signs.
#[derive(Clone)]
pub struct TestKey {
    signer: Signer,
    kid: Option<String>,
    typ: Option<String>,
}

impl TestKey {
    /// RSA key `k1` (RS256).
    pub fn rsa_k1() -> Self {
        Self::rsa_fixture(RSA_K1_PEM, RSA_K1_N, "k1")
    }

    /// RSA key `k2` (RS256), used as the rotated-in key.
    pub fn rsa_k2() -> Self {
        Self::rsa_fixture(RSA_K2_PEM, RSA_K2_N, "k2")
    }

    /// The P-256 fixture key (ES256) under `kid`.
    pub fn ec_p256(kid: &str) -> Self {
        let der = pkcs8_der(EC_P256_PEM).expect("bundled EC fixture is valid PEM");
        let pair = EcdsaKeyPair::from_pkcs8(
            &signature::ECDSA_P256_SHA256_FIXED_SIGNING,
            &der,
            &SystemRandom::new(),
        )
        .expect("bundled EC fixture is a P-256 key");
        Self {
            signer: Signer::Ec(Arc::new(pair)),
            kid: Some(kid.to_string()),
            typ: None,
        }
    }

    fn rsa_fixture(pem: &str, n: &'static str, kid: &str) -> Self {
        let der = pkcs8_der(pem).expect("bundled RSA fixture is valid PEM");
        let pair = RsaKeyPair::from_pkcs8(&der).expect("bundled RSA fixture is an RSA key");
        Self {
            signer: Signer::Rsa {
                pair: Arc::new(pair),
                n,
            },
            kid: Some(kid.to_string()),
            typ: None,
        }
    }

    /// Same key, different `kid`.
    pub fn with_kid(&self, kid: &str) -> Self {
        Self {
            kid: Some(kid.to_string()),
            ..self.clone()
        }
    }

    /// Same key, no `kid` in headers or JWK.
    pub fn without_kid(&self) -> Self {
        Self {
            kid: None,
            ..self.clone()
        }
    }

    /// Same key, with a `typ` header.
    pub fn with_typ(&self, typ: &str) -> Self {
        Self {
            typ: Some(typ.to_string()),
            ..self.clone()
        }
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn alg(&self) -> &'static str {
        match self.signer {
            Signer::Rsa { .. } => "RS256",
            Signer::Ec(_) => "ES256",
        }
    }

    /// Public JWK for a JWKS document.
    pub fn jwk(&self) -> Value {
        let mut jwk = match &self.signer {
            Signer::Rsa { n, .. } => json!({
                "kty": "RSA",
                "use": "sig",
                "n": n,
                "e": "AQAB",
            }),
            Signer::Ec(pair) => {
                // Uncompressed point: 0x04 || x || y
                let point = pair.public_key().as_ref();
                json!({
                    "kty": "EC",
                    "use": "sig",
                    "crv": "P-256",
                    "x": URL_SAFE_NO_PAD.encode(&point[1..33]),
                    "y": URL_SAFE_NO_PAD.encode(&point[33..65]),
                })
            }
        };
        if let Some(kid) = &self.kid {
            jwk["kid"] = json!(kid);
        }
        jwk
    }

    /// Raw signature over `message`.
    pub fn sign_bytes(&self, message: &[u8]) -> Vec<u8> {
        let rng = SystemRandom::new();
        match &self.signer {
            Signer::Rsa { pair, .. } => {
                let mut sig = vec![0u8; pair.public().modulus_len()];
                pair.sign(&signature::RSA_PKCS1_SHA256, &rng, message, &mut sig)
                    .expect("RSA signing succeeds");
                sig
            }
            Signer::Ec(pair) => pair
                .sign(&rng, message)
                .expect("ECDSA signing succeeds")
                .as_ref()
                .to_vec(),
        }
    }

    /// Compact JWS over `claims` with this key's header.
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = json!({ "alg": self.alg() });
        if let Some(kid) = &self.kid {
            header["kid"] = json!(kid);
        }
        if let Some(typ) = &self.typ {
            header["typ"] = json!(typ);
        }

        let signing_input = format!(
            "{}.{}",
            Self::encode_segment(&header),
            Self::encode_segment(claims)
        );
        let sig = self.sign_bytes(signing_input.as_bytes());
        format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(sig))
    }

    /// base64url(JSON) segment.
    pub fn encode_segment(value: &Value) -> String {
        URL_SAFE_NO_PAD.encode(value.to_string())
    }
}

/// JWKS document for `keys`.
pub fn jwks(keys: &[TestKey]) -> Value {
    json!({ "keys": keys.iter().map(TestKey::jwk).collect::<Vec<_>>() })
}

fn pkcs8_der(pem: &str) -> Result<Vec<u8>, TestError> {
    let mut reader = pem.as_bytes();
    let key = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .next()
        .ok_or_else(|| TestError::Fixture("no PKCS#8 key in PEM".into()))??;
    Ok(key.secret_pkcs8_der().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsa_public_key_matches_fixture() {
        let key = TestKey::rsa_k1();
        let sig = key.sign_bytes(b"message");

        let n = URL_SAFE_NO_PAD.decode(RSA_K1_N).unwrap();
        let e = [1u8, 0, 1];
        let public = signature::RsaPublicKeyComponents { n: &n[..], e: &e[..] };
        assert!(public
            .verify(&signature::RSA_PKCS1_2048_8192_SHA256, b"message", &sig)
            .is_ok());
    }

    #[test]
    fn ec_fixture_is_stable() {
        assert_eq!(TestKey::ec_p256("a").jwk()["x"], TestKey::ec_p256("b").jwk()["x"]);
    }

    #[test]
    fn token_has_three_segments() {
        let token = TestKey::rsa_k2().with_typ("at+jwt").sign(&json!({ "sub": "u1" }));
        assert_eq!(token.split('.').count(), 3);

        let header = token.split('.').next().unwrap();
        let header: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).unwrap()).unwrap();
        assert_eq!(header, json!({ "alg": "RS256", "kid": "k2", "typ": "at+jwt" }));
    }

    #[test]
    fn without_kid_drops_it_everywhere() {
        let key = TestKey::rsa_k1().without_kid();
        assert!(key.jwk().get("kid").is_none());
        assert!(key.kid().is_none());
    }
}

//! Bearer token validation.
//!
//! Validation order: structure, algorithm, key, signature, then claims.
//! Claims are only looked at once the signature verifies.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crypto::{base64url_decode, Algorithm};
use crate::discovery::issuers_match;
use crate::error::{Error, Result};
use crate::jwks::KeyResolver;

/// Registered claims reported separately from the rest.
const STANDARD_CLAIMS: [&str; 7] = ["iss", "sub", "aud", "exp", "nbf", "iat", "jti"];

/// Kind of token that was validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// OAuth 2.0 access token in JWT form (`typ: at+jwt`).
    Access,
    /// OpenID Connect ID token.
    Id,
    Refresh,
    /// Any other bearer token.
    Bearer,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Id => "id",
            TokenType::Refresh => "refresh",
            TokenType::Bearer => "bearer",
        }
    }

    /// Whether the token may be presented to the userinfo endpoint.
    pub fn is_access(&self) -> bool {
        matches!(self, TokenType::Access | TokenType::Bearer)
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered claims of a validated token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StandardClaims {
    pub iss: String,
    pub sub: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aud: Vec<String>,
    pub exp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub subject_id: String,
    pub token_type: TokenType,
    pub standard_claims: StandardClaims,
    /// Every claim not listed in [`StandardClaims`], unmodified.
    pub extra_claims: Map<String, Value>,
}

/// JWT header (only the fields we need).
#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    typ: Option<String>,
}

struct ParsedToken<'a> {
    header: Header,
    claims: Map<String, Value>,
    signing_input: &'a str,
    signature: Vec<u8>,
}

/// What a token is checked against.
#[derive(Debug, Clone)]
pub(crate) struct ValidationPolicy<'a> {
    pub(crate) issuer: &'a str,
    pub(crate) supported_algs: &'a [Algorithm],
    pub(crate) audience: Option<&'a str>,
    pub(crate) leeway: u64,
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Validate `token` at time `now`.
pub(crate) fn validate(
    token: &str,
    policy: &ValidationPolicy<'_>,
    keys: &dyn KeyResolver,
    now: u64,
) -> Result<ValidationResult> {
    let token = parse(token)?;

    let alg: Algorithm = token
        .header
        .alg
        .parse()
        .map_err(Error::UnsupportedAlgorithm)?;
    if !policy.supported_algs.contains(&alg) {
        return Err(Error::UnsupportedAlgorithm(format!(
            "{} is not advertised by the issuer",
            alg
        )));
    }

    let entry = keys.resolve(token.header.kid.as_deref(), alg)?;
    if !entry
        .key()
        .verify(alg, token.signing_input.as_bytes(), &token.signature)
    {
        return Err(Error::SignatureInvalid);
    }

    let standard_claims = check_claims(&token.claims, policy, now)?;
    let token_type = classify(&token.header, &token.claims);

    let extra_claims = token
        .claims
        .into_iter()
        .filter(|(name, _)| !STANDARD_CLAIMS.contains(&name.as_str()))
        .collect();

    Ok(ValidationResult {
        subject_id: standard_claims.sub.clone(),
        token_type,
        standard_claims,
        extra_claims,
    })
}

fn parse(token: &str) -> Result<ParsedToken<'_>> {
    let token = token.trim();
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::MalformedToken(format!(
            "expected 3 parts, got {}",
            parts.len()
        )));
    }

    let header_bytes = base64url_decode(parts[0])
        .map_err(|e| Error::MalformedToken(format!("invalid header encoding: {}", e)))?;
    let header: Header = serde_json::from_slice(&header_bytes)
        .map_err(|e| Error::MalformedToken(format!("invalid header: {}", e)))?;

    let payload_bytes = base64url_decode(parts[1])
        .map_err(|e| Error::MalformedToken(format!("invalid payload encoding: {}", e)))?;
    let claims: Map<String, Value> = serde_json::from_slice(&payload_bytes)
        .map_err(|e| Error::MalformedToken(format!("invalid claims: {}", e)))?;

    let signature = base64url_decode(parts[2])
        .map_err(|e| Error::MalformedToken(format!("invalid signature encoding: {}", e)))?;
    if signature.is_empty() {
        return Err(Error::MalformedToken("empty signature".into()));
    }

    // The signing input is the first two segments as transmitted.
    let signing_input = &token[..parts[0].len() + 1 + parts[1].len()];

    Ok(ParsedToken {
        header,
        claims,
        signing_input,
        signature,
    })
}

fn check_claims(
    claims: &Map<String, Value>,
    policy: &ValidationPolicy<'_>,
    now: u64,
) -> Result<StandardClaims> {
    let exp = match claims.get("exp") {
        Some(value) => numeric_date("exp", value)?,
        None => return Err(Error::MalformedToken("missing exp claim".into())),
    };
    if now >= exp.saturating_add(policy.leeway) {
        return Err(Error::TokenExpired);
    }

    let nbf = claims
        .get("nbf")
        .map(|value| numeric_date("nbf", value))
        .transpose()?;
    if let Some(nbf) = nbf {
        if now.saturating_add(policy.leeway) < nbf {
            return Err(Error::TokenNotYetValid);
        }
    }

    let iat = claims
        .get("iat")
        .map(|value| numeric_date("iat", value))
        .transpose()?;

    let iss = match claims.get("iss").and_then(Value::as_str) {
        Some(iss) if issuers_match(iss, policy.issuer) => iss.to_string(),
        Some(iss) => {
            return Err(Error::IssuerMismatch(format!(
                "expected '{}', got '{}'",
                policy.issuer, iss
            )))
        }
        None => return Err(Error::IssuerMismatch("missing iss claim".into())),
    };

    let aud = audiences(claims.get("aud"))?;
    if let Some(expected) = policy.audience {
        if !aud.iter().any(|a| a == expected) {
            return Err(Error::AudienceMismatch);
        }
    }

    let sub = match claims.get("sub").and_then(Value::as_str) {
        Some(sub) if !sub.is_empty() => sub.to_string(),
        _ => return Err(Error::MalformedToken("missing sub claim".into())),
    };

    let jti = claims.get("jti").and_then(Value::as_str).map(String::from);

    Ok(StandardClaims {
        iss,
        sub,
        aud,
        exp,
        nbf,
        iat,
        jti,
    })
}

/// A NumericDate; fractional seconds are truncated.
fn numeric_date(name: &str, value: &Value) -> Result<u64> {
    if let Some(secs) = value.as_u64() {
        return Ok(secs);
    }
    match value.as_f64() {
        Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs as u64),
        _ => Err(Error::MalformedToken(format!(
            "{} is not a numeric date",
            name
        ))),
    }
}

/// `aud` may be a single string or an array of strings.
fn audiences(value: Option<&Value>) -> Result<Vec<String>> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::String(aud)) => Ok(vec![aud.clone()]),
        Some(Value::Array(values)) => values
            .iter()
            .map(|v| {
                v.as_str()
                    .map(String::from)
                    .ok_or_else(|| Error::MalformedToken("aud contains a non-string".into()))
            })
            .collect(),
        Some(_) => Err(Error::MalformedToken("aud must be a string or array".into())),
    }
}

fn classify(header: &Header, claims: &Map<String, Value>) -> TokenType {
    if let Some(typ) = header.typ.as_deref() {
        let typ = typ.to_ascii_lowercase();
        if typ == "at+jwt" || typ == "application/at+jwt" {
            return TokenType::Access;
        }
    }

    if claims.contains_key("nonce") || claims.contains_key("at_hash") {
        return TokenType::Id;
    }

    match claims.get("typ").and_then(Value::as_str) {
        Some(typ) if typ.eq_ignore_ascii_case("refresh") => TokenType::Refresh,
        Some(typ) if typ.eq_ignore_ascii_case("id") => TokenType::Id,
        _ => TokenType::Bearer,
    }
}

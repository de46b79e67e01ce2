//! Volcengine HMAC-SHA256 request signing
//!
//! Every visual API call carries `X-Date`, `X-Content-Sha256` and an
//! `Authorization` header derived from a canonical form of the request.
//! The signing key is chained through the short date, region and service.

use chrono::{DateTime, Utc};
use fairytale_common::errors::{AppError, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Headers covered by the signature, in signing order
pub const SIGNED_HEADERS: &str = "host;x-date;x-content-sha256;content-type";

const ALGORITHM: &str = "HMAC-SHA256";

/// Key material and scope for one service
#[derive(Debug, Clone)]
pub struct SigningCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub service: String,
}

/// The request being signed
#[derive(Debug, Clone)]
pub struct RequestToSign<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub query: &'a [(&'a str, &'a str)],
    pub content_type: &'a str,
    pub body: &'a [u8],
}

/// Header values to attach to the outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub x_date: String,
    pub x_content_sha256: String,
    pub authorization: String,
}

fn hmac_sha256(key: &[u8], content: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| AppError::Internal {
        message: format!("HMAC key rejected: {}", e),
    })?;
    mac.update(content.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Key-sorted, form-urlencoded query with `%20` for spaces
pub fn canonical_query(query: &[(&str, &str)]) -> String {
    let mut pairs = query.to_vec();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
        .replace('+', "%20")
}

/// `kDate -> kRegion -> kService -> "request"`
fn signing_key(secret: &str, short_date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(secret.as_bytes(), short_date)?;
    let k_region = hmac_sha256(&k_date, region)?;
    let k_service = hmac_sha256(&k_region, service)?;
    hmac_sha256(&k_service, "request")
}

/// Sign `request` as of `now`
pub fn sign(
    request: &RequestToSign<'_>,
    credentials: &SigningCredentials,
    now: DateTime<Utc>,
) -> Result<SignedHeaders> {
    let x_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let short_date = &x_date[..8];
    let payload_hash = sha256_hex(request.body);

    let canonical_request = [
        request.method.to_string(),
        request.path.to_string(),
        canonical_query(request.query),
        format!("host:{}", request.host),
        format!("x-date:{}", x_date),
        format!("x-content-sha256:{}", payload_hash),
        format!("content-type:{}", request.content_type.trim()),
        String::new(),
        SIGNED_HEADERS.to_string(),
        payload_hash.clone(),
    ]
    .join("\n");

    let credential_scope = format!(
        "{}/{}/{}/request",
        short_date, credentials.region, credentials.service
    );

    let string_to_sign = [
        ALGORITHM,
        &x_date,
        &credential_scope,
        &sha256_hex(canonical_request.as_bytes()),
    ]
    .join("\n");

    let key = signing_key(
        &credentials.secret_access_key,
        short_date,
        &credentials.region,
        &credentials.service,
    )?;
    let signature = hex::encode(hmac_sha256(&key, &string_to_sign)?);

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, credentials.access_key_id, credential_scope, SIGNED_HEADERS, signature
    );

    Ok(SignedHeaders {
        x_date,
        x_content_sha256: payload_hash,
        authorization,
    })
}

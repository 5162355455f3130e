//! AWS Signature Version 4 request signing
//!
//! Produces the `Authorization` header for a JSON-protocol call. The
//! operation target is part of the signed header block, so it must be the
//! same value the request actually carries.

use chrono::{DateTime, Utc};
use ring::hmac;
use sha2::{Digest, Sha256};

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const SCOPE_TERMINATOR: &str = "aws4_request";
pub const SIGNED_HEADERS: &str = "content-type;host;x-amz-date;x-amz-target";
pub const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// Access key pair plus the region it is scoped to
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// Everything about one outbound request that goes into the signature
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    pub method: &'a str,
    pub service: &'a str,
    pub host: &'a str,
    pub canonical_path: &'a str,
    /// Full `X-Amz-Target` value, e.g. `DynamoDB_20120810.PutItem`
    pub target: &'a str,
    pub payload: &'a [u8],
    pub timestamp: DateTime<Utc>,
}

/// `X-Amz-Date` header value
pub fn amz_date(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

fn date_stamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%d").to_string()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

/// Canonical request text (step 1)
pub fn canonical_request(req: &SigningRequest<'_>) -> String {
    let canonical_headers = format!(
        "content-type:{}\nhost:{}\nx-amz-date:{}\nx-amz-target:{}\n",
        CONTENT_TYPE,
        req.host,
        amz_date(&req.timestamp),
        req.target
    );

    format!(
        "{}\n{}\n\n{}\n{}\n{}",
        req.method,
        req.canonical_path,
        canonical_headers,
        SIGNED_HEADERS,
        sha256_hex(req.payload)
    )
}

/// `date/region/service/aws4_request`
pub fn credential_scope(ts: &DateTime<Utc>, region: &str, service: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        date_stamp(ts),
        region,
        service,
        SCOPE_TERMINATOR
    )
}

/// String to sign (step 2)
pub fn string_to_sign(req: &SigningRequest<'_>, region: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date(&req.timestamp),
        credential_scope(&req.timestamp, region, req.service),
        sha256_hex(canonical_request(req).as_bytes())
    )
}

/// Chained HMAC key derivation (step 3)
pub fn signing_key(secret: &str, ts: &DateTime<Utc>, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp(ts).as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes())
}

/// Compute the `Authorization` header value for a request
pub fn sign(req: &SigningRequest<'_>, credentials: &Credentials) -> String {
    let key = signing_key(
        &credentials.secret_access_key,
        &req.timestamp,
        &credentials.region,
        req.service,
    );
    let signature = hex::encode(hmac_sha256(
        &key,
        string_to_sign(req, &credentials.region).as_bytes(),
    ));

    format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        credentials.access_key_id,
        credential_scope(&req.timestamp, &credentials.region, req.service),
        SIGNED_HEADERS,
        signature
    )
}

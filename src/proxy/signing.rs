//! AWS Signature Version 4 request signing
//!
//! Pure function of its inputs: the signing time is passed in, nothing global
//! is read or written. Paths are double-encoded, which is what every service
//! other than S3 expects.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use super::credentials::AwsCredentials;
use crate::util::sha256_hex;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),
    #[error("request URL has no host")]
    MissingHost,
    #[error("invalid signing key")]
    InvalidKey,
}

/// What gets signed
pub struct SigningRequest<'a> {
    pub method: &'a str,
    pub url: &'a str,
    /// Headers sent with the request; all of them are signed
    pub headers: &'a [(String, String)],
    pub body: &'a [u8],
}

/// Intermediate artifacts of one signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    pub amz_date: String,
    pub date: String,
    pub scope: String,
    pub signed_headers: String,
    pub canonical_request: String,
}

impl CanonicalRequest {
    pub fn string_to_sign(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            self.amz_date,
            self.scope,
            sha256_hex(self.canonical_request.as_bytes())
        )
    }
}

/// Region and service scoped signer
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    region: String,
    service: String,
}

impl SigV4Signer {
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
        }
    }

    /// Headers the signature adds before `authorization`
    fn added_headers(credentials: &AwsCredentials, at: DateTime<Utc>) -> Vec<(String, String)> {
        let mut added = vec![(
            "x-amz-date".to_string(),
            at.format("%Y%m%dT%H%M%SZ").to_string(),
        )];
        if let Some(token) = &credentials.session_token {
            added.push(("x-amz-security-token".to_string(), token.clone()));
        }
        added
    }

    /// Build the canonical request over the request headers plus `added`
    pub fn canonicalize(
        &self,
        request: &SigningRequest<'_>,
        added: &[(String, String)],
        at: DateTime<Utc>,
    ) -> Result<CanonicalRequest, SigningError> {
        let url = Url::parse(request.url).map_err(|e| SigningError::InvalidUrl(e.to_string()))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(SigningError::MissingHost),
        };

        let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
        let date = at.format("%Y%m%d").to_string();
        let scope = format!("{}/{}/{}/aws4_request", date, self.region, self.service);

        let mut signed: Vec<(String, String)> = request
            .headers
            .iter()
            .chain(added.iter())
            .map(|(k, v)| (k.to_ascii_lowercase(), normalize_header_value(v)))
            .collect();
        signed.push(("host".to_string(), host));
        let (canonical_headers, signed_headers) = canonical_headers(signed);

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method.to_ascii_uppercase(),
            canonical_uri(url.path()),
            canonical_query(&url),
            canonical_headers,
            signed_headers,
            sha256_hex(request.body),
        );

        Ok(CanonicalRequest {
            amz_date,
            date,
            scope,
            signed_headers,
            canonical_request,
        })
    }

    /// Returns the headers to add: `x-amz-date`, `x-amz-security-token` when
    /// the credential carries one, and `authorization`.
    pub fn sign(
        &self,
        request: &SigningRequest<'_>,
        credentials: &AwsCredentials,
        at: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>, SigningError> {
        let mut added = Self::added_headers(credentials, at);
        let canonical = self.canonicalize(request, &added, at)?;

        let key = signing_key(
            &credentials.secret_access_key,
            &canonical.date,
            &self.region,
            &self.service,
        )?;
        let signature = hex::encode(hmac(&key, canonical.string_to_sign().as_bytes())?);

        added.push((
            "authorization".to_string(),
            format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM,
                credentials.access_key_id,
                canonical.scope,
                canonical.signed_headers,
                signature
            ),
        ));
        Ok(added)
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SigningError::InvalidKey)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `kSigning = HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")`
pub fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, SigningError> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

/// RFC 3986 encoding with the SigV4 unreserved set
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    uri_encode(path, false)
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k, true), uri_encode(&v, true)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Trim and collapse runs of spaces
fn normalize_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sorted `name:value\n` block and the `;`-joined signed header list
fn canonical_headers(mut headers: Vec<(String, String)>) -> (String, String) {
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let mut merged: Vec<(String, String)> = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        match merged.last_mut() {
            Some((last, existing)) if *last == name => {
                existing.push(',');
                existing.push_str(&value);
            }
            _ => merged.push((name, value)),
        }
    }

    let block: String = merged
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();
    let names = merged
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    (block, names)
}

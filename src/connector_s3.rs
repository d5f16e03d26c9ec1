//! Amazon S3 object store.
//!
//! Lists and downloads objects from an S3 bucket using the S3 REST API with
//! AWS Signature V4 authentication. Implements pagination for large buckets,
//! glob-based filtering on object keys, and supports custom endpoints for
//! S3-compatible services (MinIO, LocalStack).
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for AWS signing, with no
//! C library dependencies like `aws-lc-sys`.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! kind = "s3"
//! bucket = "acme-knowledge"
//! prefix = "engineering/"
//! region = "us-east-1"
//! include_globs = ["**/*.pdf", "**/*.docx"]
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! # Credentials
//!
//! `storage.access_key_id` / `storage.secret_access_key` when set, otherwise:
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional (for temporary credentials / IAM roles)
//!
//! # Addressing
//!
//! AWS buckets use virtual-hosted style (`<bucket>.s3.<region>.amazonaws.com`).
//! Custom endpoints use path style (`<endpoint>/<bucket>/<key>`), which is
//! what MinIO and LocalStack expect.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::StorageConfig;
use crate::error::StorageAccessError;
use crate::traits::{relative_key, KeyFilter, ObjectStore};

type HmacSha256 = Hmac<Sha256>;

pub struct S3Store {
    bucket: String,
    region: String,
    endpoint: Endpoint,
    creds: AwsCredentials,
    filter: KeyFilter,
    client: reqwest::Client,
}

#[derive(Debug, Clone, PartialEq)]
struct Endpoint {
    scheme: String,
    host: String,
    /// Prepended to every canonical URI (`/<bucket>` for path-style endpoints).
    path_prefix: String,
}

impl S3Store {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: Endpoint::for_config(config),
            creds: AwsCredentials::resolve(config)?,
            filter: KeyFilter::new(&config.include_globs, &config.exclude_globs)?,
            client: reqwest::Client::new(),
        })
    }

    /// Sign and send a GET for `path` (already URI-encoded, without the
    /// bucket prefix) with the given sorted `(name, value)` query params.
    async fn signed_get(
        &self,
        path: &str,
        query_params: &[(String, String)],
    ) -> Result<reqwest::Response, reqwest::Error> {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut sorted_params = query_params.to_vec();
        sorted_params.sort();
        let canonical_querystring: String = sorted_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(b"");

        let mut headers = vec![
            ("host".to_string(), self.endpoint.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_uri = format!("{}{}", self.endpoint.path_prefix, path);
        let canonical_request = format!(
            "GET\n{}\n{}\n{}\n{}\n{}",
            canonical_uri, canonical_querystring, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", self.endpoint.scheme, self.endpoint.host, canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut req_builder = self
            .client
            .get(&url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);

        if let Some(ref token) = self.creds.session_token {
            req_builder = req_builder.header("x-amz-security-token", token);
        }

        req_builder.send().await
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    /// List all objects under `prefix`, following `NextContinuationToken`
    /// until the listing is complete (`max-keys=1000` per page).
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageAccessError> {
        let location = format!("s3://{}/{}", self.bucket, prefix);
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query_params = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !prefix.is_empty() {
                query_params.push(("prefix".to_string(), prefix.to_string()));
            }
            if let Some(ref token) = continuation_token {
                query_params.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self
                .signed_get("/", &query_params)
                .await
                .map_err(|e| StorageAccessError::new(&location, e))?;

            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| StorageAccessError::new(&location, e))?;
            if !status.is_success() {
                return Err(StorageAccessError::new(
                    &location,
                    format!(
                        "ListObjectsV2 failed (HTTP {}): {}",
                        status,
                        body.chars().take(500).collect::<String>()
                    ),
                ));
            }

            let page = parse_list_objects_response(&body);
            tracing::debug!(
                bucket = self.bucket.as_str(),
                objects = page.keys.len(),
                truncated = page.is_truncated,
                "listed S3 page"
            );
            keys.extend(
                page.keys
                    .into_iter()
                    .filter(|key| self.filter.matches(relative_key(key, prefix))),
            );

            match (page.is_truncated, page.next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageAccessError> {
        let location = format!("s3://{}/{}", self.bucket, key);
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");

        let resp = self
            .signed_get(&format!("/{}", encoded_key), &[])
            .await
            .map_err(|e| StorageAccessError::new(&location, e))?;

        if !resp.status().is_success() {
            return Err(StorageAccessError::new(
                &location,
                format!("GetObject failed (HTTP {})", resp.status()),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StorageAccessError::new(&location, e))?;
        Ok(bytes.to_vec())
    }
}

impl Endpoint {
    fn for_config(config: &StorageConfig) -> Self {
        match config.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => {
                let (scheme, rest) = match endpoint.split_once("://") {
                    Some((scheme, rest)) => (scheme.to_string(), rest),
                    None => ("https".to_string(), endpoint),
                };
                Self {
                    scheme,
                    host: rest.trim_end_matches('/').to_string(),
                    path_prefix: format!("/{}", uri_encode(&config.bucket)),
                }
            }
            None => Self {
                scheme: "https".to_string(),
                host: format!("{}.s3.{}.amazonaws.com", config.bucket, config.region),
                path_prefix: String::new(),
            },
        }
    }
}

// ============ AWS Credentials ============

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn resolve(config: &StorageConfig) -> Result<Self> {
        let from_config = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());

        let access_key_id = match from_config(&config.access_key_id) {
            Some(v) => v,
            None => std::env::var("AWS_ACCESS_KEY_ID")
                .context("AWS_ACCESS_KEY_ID environment variable not set")?,
        };
        let secret_access_key = match from_config(&config.secret_access_key) {
            Some(v) => v,
            None => std::env::var("AWS_SECRET_ACCESS_KEY")
                .context("AWS_SECRET_ACCESS_KEY environment variable not set")?,
        };
        let session_token = std::env::var("AWS_SESSION_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986, keeping only `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ XML Parsing ============

struct ListPage {
    keys: Vec<String>,
    is_truncated: bool,
    next_token: Option<String>,
}

/// Parse a `ListObjectsV2` response. Directory markers are dropped.
fn parse_list_objects_response(xml: &str) -> ListPage {
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut keys = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];

        let key = extract_xml_value(block, "Key").unwrap_or_default();
        if !key.is_empty() && !key.ends_with('/') {
            keys.push(key);
        }

        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }

    ListPage {
        keys,
        is_truncated,
        next_token,
    }
}

/// Text content of the first `<tag>` (simple, non-nested), XML-unescaped.
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let value_start = xml.find(&open)? + open.len();
    let end = xml[value_start..].find(&close)?;
    let raw = &xml[value_start..value_start + end];
    Some(
        quick_xml::escape::unescape(raw)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| raw.to_string()),
    )
}

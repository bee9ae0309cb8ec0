//! Object-storage reachability: a single signed S3 `HEAD /<bucket>`.
//!
//! The request goes over plaintext HTTP/1.1 to the configured endpoint and
//! is bounded by a timeout. Requests are signed with AWS Signature V4
//! (`us-east-1`, service `s3`) unless no access key is configured, in which
//! case they are sent anonymously.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::header::{AUTHORIZATION, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use streamprobe_core::{ConfigError, StorageConfig};

/// Result type alias for storage reachability checks.
pub type StorageResult<T> = Result<T, StorageError>;

/// Why the bucket could not be confirmed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage endpoint: {0}")]
    Endpoint(#[from] ConfigError),

    #[error("connection to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP exchange with {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: hyper::Error,
    },

    #[error("failed to build request: {0}")]
    Request(#[from] http::Error),

    #[error("no response from {endpoint} within {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("bucket {0} does not exist")]
    BucketNotFound(String),

    #[error("access to bucket {bucket} denied (HTTP {status})")]
    AccessDenied { bucket: String, status: u16 },

    #[error("unexpected HTTP {status} for bucket {bucket}")]
    UnexpectedStatus { bucket: String, status: u16 },
}

/// Confirms that a bucket exists and is accessible.
pub trait BucketProbe {
    fn check_bucket(&self, storage: &StorageConfig) -> impl Future<Output = StorageResult<()>>;
}

/// [`BucketProbe`] speaking the S3 protocol to MinIO or any S3-compatible
/// endpoint.
#[derive(Debug, Clone)]
pub struct S3BucketProbe {
    timeout: Duration,
}

impl S3BucketProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn head_bucket(&self, storage: &StorageConfig, host: &str) -> StorageResult<StatusCode> {
        let stream = tokio::net::TcpStream::connect(socket_address(host))
            .await
            .map_err(|source| StorageError::Connect {
                endpoint: host.to_string(),
                source,
            })?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|source| StorageError::Http {
                endpoint: host.to_string(),
                source,
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "storage connection closed with error");
            }
        });

        let req = head_bucket_request(storage, host, Utc::now())?;
        let resp = sender
            .send_request(req)
            .await
            .map_err(|source| StorageError::Http {
                endpoint: host.to_string(),
                source,
            })?;

        Ok(resp.status())
    }
}

impl BucketProbe for S3BucketProbe {
    async fn check_bucket(&self, storage: &StorageConfig) -> StorageResult<()> {
        let host = storage.authority()?;

        let status = tokio::time::timeout(self.timeout, self.head_bucket(storage, host))
            .await
            .map_err(|_| StorageError::Timeout {
                endpoint: host.to_string(),
                timeout: self.timeout,
            })??;

        debug!(%status, bucket = %storage.bucket, endpoint = %host, "bucket probe answered");
        status_to_result(status, &storage.bucket)
    }
}

fn status_to_result(status: StatusCode, bucket: &str) -> StorageResult<()> {
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        404 => Err(StorageError::BucketNotFound(bucket.to_string())),
        code @ (401 | 403) => Err(StorageError::AccessDenied {
            bucket: bucket.to_string(),
            status: code,
        }),
        code => Err(StorageError::UnexpectedStatus {
            bucket: bucket.to_string(),
            status: code,
        }),
    }
}

/// `host` without a port connects on 80, as S3 clients do for plain HTTP.
fn socket_address(host: &str) -> String {
    let has_port = match host.rsplit_once(':') {
        Some((head, port)) => !port.is_empty() && (!head.contains(':') || head.ends_with(']')),
        None => false,
    };
    if has_port {
        host.to_string()
    } else {
        format!("{host}:80")
    }
}

// ── Signature V4 ───────────────────────────────────────────────

const REGION: &str = "us-east-1";
const SERVICE: &str = "s3";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

/// Hex SHA-256 of an empty body.
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Everything except RFC 3986 unreserved characters.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

type HmacSha256 = Hmac<Sha256>;

fn head_bucket_request(
    storage: &StorageConfig,
    host: &str,
    at: DateTime<Utc>,
) -> StorageResult<Request<Empty<Bytes>>> {
    let path = bucket_path(&storage.bucket);
    let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();

    let mut builder = Request::builder()
        .method(Method::HEAD)
        .uri(path.as_str())
        .header(HOST, host)
        .header(USER_AGENT, concat!("streamprobe/", env!("CARGO_PKG_VERSION")))
        .header("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256)
        .header("x-amz-date", amz_date.as_str());

    if storage.has_credentials() {
        builder = builder.header(AUTHORIZATION, authorization(storage, host, &path, at));
    }

    Ok(builder.body(Empty::<Bytes>::new())?)
}

fn bucket_path(bucket: &str) -> String {
    format!("/{}", utf8_percent_encode(bucket, PATH_SEGMENT))
}

/// `Authorization` header value for a bodiless `HEAD` of `path`.
fn authorization(storage: &StorageConfig, host: &str, path: &str, at: DateTime<Utc>) -> String {
    let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
    let date = at.format("%Y%m%d").to_string();
    let scope = format!("{date}/{REGION}/{SERVICE}/aws4_request");

    let canonical_request = format!(
        "HEAD\n{path}\n\nhost:{host}\nx-amz-content-sha256:{EMPTY_PAYLOAD_SHA256}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{EMPTY_PAYLOAD_SHA256}"
    );
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(&storage.secret_key, &date, REGION, SERVICE);
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        storage.access_key
    )
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

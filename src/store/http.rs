//! Blocking HTTP connection for the Riak-style object API
//!
//! | Operation        | Request                                                 |
//! |------------------|---------------------------------------------------------|
//! | liveness         | `GET /ping`                                             |
//! | fetch            | `GET /buckets/{bucket}/keys/{key}`                      |
//! | fetch sibling    | `GET /buckets/{bucket}/keys/{key}?vtag={vtag}`          |
//! | create-if-absent | `PUT /buckets/{bucket}/keys/{key}` + `If-None-Match: *` |
//!
//! A fetch answered with `300 Multiple Choices` lists sibling vtags, which
//! are fetched one by one. A create answered with `412 Precondition Failed`
//! means the key already exists at the destination.

use crate::error::{StoreError, StoreResult};
use crate::journal::Key;
use crate::store::{Connector, StoreConnection, StoreOutcome, StoredObject};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, IF_NONE_MATCH};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, trace};

const VCLOCK_HEADER: &str = "x-riak-vclock";
const META_PREFIX: &str = "x-riak-meta-";
const INDEX_PREFIX: &str = "x-riak-index-";

/// Upper bound on siblings fetched for one key
const MAX_SIBLINGS: usize = 64;

/// Opens [`HttpConnection`]s to one cluster
#[derive(Debug, Clone)]
pub struct HttpConnector {
    base_url: String,
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Connector for HttpConnector {
    fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    fn connect(&self) -> StoreResult<Box<dyn StoreConnection>> {
        Ok(Box::new(HttpConnection::connect(&self.base_url, self.timeout)?))
    }
}

/// One HTTP client bound to one cluster endpoint
pub struct HttpConnection {
    base_url: String,
    client: Client,
}

impl HttpConnection {
    pub fn connect(base_url: &str, timeout: Duration) -> StoreResult<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(1)
            .user_agent(concat!("bucket-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Transport {
                endpoint: base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self { base_url, client })
    }

    fn object_url(&self, bucket: &str, key: &Key) -> String {
        object_url(&self.base_url, bucket, key)
    }

    fn send_error(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout {
                endpoint: self.base_url.clone(),
            }
        } else {
            StoreError::Transport {
                endpoint: self.base_url.clone(),
                reason: e.to_string(),
            }
        }
    }

    fn status_error(&self, status: StatusCode) -> StoreError {
        StoreError::Status {
            endpoint: self.base_url.clone(),
            code: status.as_u16(),
        }
    }

    fn read_object(&self, bucket: &str, key: &Key, response: Response) -> StoreResult<StoredObject> {
        let headers = response.headers().clone();
        let value = response.bytes().map_err(|e| self.send_error(e))?;

        let mut object = StoredObject::new(bucket, key.clone(), value.to_vec());
        object.content_type = header_string(&headers, CONTENT_TYPE.as_str());
        object.vclock = header_string(&headers, VCLOCK_HEADER);
        object.metadata = prefixed_headers(&headers, META_PREFIX);
        object.indexes = prefixed_headers(&headers, INDEX_PREFIX);
        Ok(object)
    }

    /// Sibling vtags from a 300 response, asking again as text if needed
    fn sibling_vtags(&self, url: &str, response: Response) -> StoreResult<Vec<String>> {
        let is_text = header_string(response.headers(), CONTENT_TYPE.as_str())
            .map(|ct| ct.starts_with("text/plain"))
            .unwrap_or(false);

        let body = if is_text {
            response.text().map_err(|e| self.send_error(e))?
        } else {
            let retry = self
                .client
                .get(url)
                .header(ACCEPT, "text/plain")
                .send()
                .map_err(|e| self.send_error(e))?;
            if retry.status() != StatusCode::MULTIPLE_CHOICES {
                return Err(self.status_error(retry.status()));
            }
            retry.text().map_err(|e| self.send_error(e))?
        };

        let vtags = parse_sibling_list(&body);
        if vtags.is_empty() {
            return Err(StoreError::Protocol {
                endpoint: self.base_url.clone(),
                reason: "300 response without sibling vtags".into(),
            });
        }
        Ok(vtags)
    }
}

impl StoreConnection for HttpConnection {
    fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    fn connected(&mut self) -> bool {
        let url = format!("{}/ping", self.base_url);
        match self.client.get(&url).send() {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(endpoint = %self.base_url, error = %e, "Ping failed");
                false
            }
        }
    }

    fn fetch(&mut self, bucket: &str, key: &Key) -> StoreResult<Vec<StoredObject>> {
        let url = self.object_url(bucket, key);
        trace!(url = %url, "GET");

        let response = self.client.get(&url).send().map_err(|e| self.send_error(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            StatusCode::OK => Ok(vec![self.read_object(bucket, key, response)?]),
            StatusCode::MULTIPLE_CHOICES => {
                let vtags = self.sibling_vtags(&url, response)?;
                debug!(key = %key, siblings = vtags.len(), "Fetching siblings");

                let mut siblings = Vec::with_capacity(vtags.len().min(MAX_SIBLINGS));
                for vtag in vtags.iter().take(MAX_SIBLINGS) {
                    let sibling_url = format!("{}?vtag={}", url, urlencoding::encode(vtag));
                    let sibling = self
                        .client
                        .get(&sibling_url)
                        .send()
                        .map_err(|e| self.send_error(e))?;
                    match sibling.status() {
                        StatusCode::OK => siblings.push(self.read_object(bucket, key, sibling)?),
                        // Resolved between the two requests
                        StatusCode::NOT_FOUND => continue,
                        status => return Err(self.status_error(status)),
                    }
                }
                Ok(siblings)
            }
            status => Err(self.status_error(status)),
        }
    }

    fn store_if_absent(&mut self, object: &StoredObject) -> StoreResult<StoreOutcome> {
        let url = self.object_url(&object.bucket, &object.key);
        trace!(url = %url, bytes = object.value.len(), "PUT if-none-match");

        let content_type = object
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut request = self
            .client
            .put(&url)
            .header(IF_NONE_MATCH, "*")
            .header(CONTENT_TYPE, content_type);

        if let Some(vclock) = &object.vclock {
            request = request.header(VCLOCK_HEADER, vclock.as_str());
        }
        for (name, value) in &object.metadata {
            request = request.header(format!("{}{}", META_PREFIX, name), value.as_str());
        }
        for (name, value) in &object.indexes {
            request = request.header(format!("{}{}", INDEX_PREFIX, name), value.as_str());
        }

        let response = request
            .body(object.value.clone())
            .send()
            .map_err(|e| self.send_error(e))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(StoreOutcome::Created),
            StatusCode::PRECONDITION_FAILED => Ok(StoreOutcome::AlreadyExists),
            status => Err(self.status_error(status)),
        }
    }
}

/// URL of one object; bucket and key are percent-encoded
pub fn object_url(base_url: &str, bucket: &str, key: &Key) -> String {
    format!(
        "{}/buckets/{}/keys/{}",
        base_url,
        urlencoding::encode(bucket),
        urlencoding::encode_binary(key.as_bytes())
    )
}

/// Parse the text body of a 300 response: `Siblings:` followed by one vtag
/// per line
pub fn parse_sibling_list(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case("siblings:"))
        .map(str::to_string)
        .collect()
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn prefixed_headers(headers: &HeaderMap, prefix: &str) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let suffix = name.as_str().strip_prefix(prefix)?;
            let value = value.to_str().ok()?;
            Some((suffix.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    #[test]
    fn test_object_url_encodes_bucket_and_key() {
        let key = Key::from(&[b'a', b'/', b' ', 0xff][..]);
        assert_eq!(
            object_url("http://riak:8098", "my bucket", &key),
            "http://riak:8098/buckets/my%20bucket/keys/a%2F%20%FF"
        );
    }

    #[test]
    fn test_parse_sibling_list() {
        let body = "Siblings:\n4Hs7Yc8fBVKmNp6mpmR6pI\n5x6DrTS3SOhs2PJrgpAv2y\n\n";
        assert_eq!(
            parse_sibling_list(body),
            vec!["4Hs7Yc8fBVKmNp6mpmR6pI", "5x6DrTS3SOhs2PJrgpAv2y"]
        );
        assert!(parse_sibling_list("Siblings:\n").is_empty());
    }

    #[test]
    fn test_prefixed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-riak-meta-owner"),
            HeaderValue::from_static("ops"),
        );
        headers.insert(
            HeaderName::from_static("x-riak-index-email_bin"),
            HeaderValue::from_static("a@example.com"),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        assert_eq!(
            prefixed_headers(&headers, META_PREFIX),
            vec![("owner".to_string(), "ops".to_string())]
        );
        assert_eq!(
            prefixed_headers(&headers, INDEX_PREFIX),
            vec![("email_bin".to_string(), "a@example.com".to_string())]
        );
        assert_eq!(
            header_string(&headers, CONTENT_TYPE.as_str()).as_deref(),
            Some("application/json")
        );
    }

    #[test]
    fn test_connector_trims_trailing_slash() {
        let connector = HttpConnector::new("http://riak:8098/", Duration::from_secs(5));
        assert_eq!(connector.base_url(), "http://riak:8098");
        assert_eq!(Connector::endpoint(&connector), "http://riak:8098");
    }
}

//! Collaborators the client is driven through.
//!
//! The client never opens a socket or touches a disk itself. A [`Transport`]
//! posts one payload to a set of urls, a [`Storage`] keeps what should
//! survive a restart (node weights, verified bitcoin targets, validator
//! history). Everything coming back through a transport is untrusted until
//! it has been verified.

use std::collections::HashMap;
use thiserror::Error;

/// Errors a transport reports per url.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Body read failed: {0}")]
    BodyReadFailed(String),
    #[error("timeout after {0}ms")]
    Timeout(u64),
}

/// What came back from one url.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    pub url: String,
    pub data: Result<String, TransportError>,
    /// Time until the response (or the error) arrived.
    pub latency_ms: u64,
}

impl TransportResponse {
    pub fn ok(url: impl Into<String>, data: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            url: url.into(),
            data: Ok(data.into()),
            latency_ms,
        }
    }

    pub fn err(url: impl Into<String>, error: TransportError, latency_ms: u64) -> Self {
        Self {
            url: url.into(),
            data: Err(error),
            latency_ms,
        }
    }
}

/// Sends the same JSON payload to every url and reports per url.
///
/// Implementations may answer in any order and may omit urls; missing
/// answers are treated as transport failures of those nodes.
pub trait Transport {
    fn send(&mut self, urls: &[String], payload: &str, timeout_ms: u64) -> Vec<TransportResponse>;
}

impl<F> Transport for F
where
    F: FnMut(&[String], &str, u64) -> Vec<TransportResponse>,
{
    fn send(&mut self, urls: &[String], payload: &str, timeout_ms: u64) -> Vec<TransportResponse> {
        self(urls, payload, timeout_ms)
    }
}

/// Key-value persistence. A missing key is never an error.
pub trait Storage {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&mut self, key: &str, value: &[u8]);
    fn clear(&mut self);
}

/// Storage that lives as long as the client.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &[u8]) {
        self.entries.insert(key.to_string(), value.to_vec());
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let mut storage = MemoryStorage::new();
        assert!(storage.get("nodelist_1").is_none());
        storage.set("nodelist_1", b"[]");
        storage.set("nodelist_1", b"[1]");
        assert_eq!(storage.get("nodelist_1"), Some(b"[1]".to_vec()));
        assert_eq!(storage.len(), 1);
        storage.clear();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_closure_transport() {
        let mut transport = |urls: &[String], payload: &str, _timeout: u64| -> Vec<TransportResponse> {
            urls.iter()
                .map(|url| TransportResponse::ok(url.clone(), payload.to_uppercase(), 3))
                .collect()
        };
        let responses = transport.send(&["http://a".to_string()], "ping", 100);
        assert_eq!(responses, vec![TransportResponse::ok("http://a", "PING", 3)]);
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::Http {
            status: 502,
            message: "Bad Gateway".into(),
        };
        assert_eq!(err.to_string(), "HTTP error 502: Bad Gateway");
    }
}

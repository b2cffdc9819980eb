//! Client identity used as the rate limiter key.
//!
//! The key comes from a trusted address header set by the edge proxy. When
//! that header is absent each request gets a fresh random key, which means
//! such clients are never throttled. Callers that need to treat those
//! requests differently can check [`ClientKey::is_anonymous`].

use std::fmt;

/// Rate limiter key for one inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// Value of the trusted address header.
    Address(String),
    /// Random per-request key; no trusted header was present.
    Anonymous(String),
}

impl ClientKey {
    /// Derive a key from a header lookup.
    ///
    /// `lookup` receives the configured header name and returns its value
    /// if the request carries it, so this stays independent of any HTTP
    /// framework's header map.
    pub fn resolve<'a, F>(header_name: &str, lookup: F) -> Self
    where
        F: FnOnce(&str) -> Option<&'a str>,
    {
        match lookup(header_name).map(str::trim) {
            Some(addr) if !addr.is_empty() => ClientKey::Address(addr.to_string()),
            _ => {
                let key = uuid::Uuid::new_v4().to_string();
                tracing::debug!(header = header_name, "no client address header, using random key");
                ClientKey::Anonymous(key)
            }
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ClientKey::Address(key) | ClientKey::Anonymous(key) => key,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, ClientKey::Anonymous(_))
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

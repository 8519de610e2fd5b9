//! Request identity: coalescing keys and URI classification.

use super::options::RequestOptions;
use crate::error::ErrorCause;
use std::fmt;
use std::path::PathBuf;

/// Identifies a fetch + produce combination (URI plus options fingerprint).
///
/// This is the coalescing key of the load stage and the memory cache key.
/// The URI is length-prefixed so no URI can be mistaken for another URI
/// with a processing fingerprint: `<len>:<uri>[@<processing>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    /// Builds the key for `uri` processed with `options`.
    pub fn new(uri: &str, options: &RequestOptions) -> Self {
        let uri = uri.trim();
        Self(format!("{}:{}{}", uri.len(), uri, options.fingerprint()))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies the raw-bytes fetch alone (the URI).
///
/// Many differently processed outputs share one download, so this key is
/// kept separate from [`RequestKey`]. It is the coalescing key of the
/// download stage and the persistent cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkKey(String);

impl NetworkKey {
    /// Builds the key for `uri`.
    pub fn new(uri: &str) -> Self {
        Self(uri.trim().to_string())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the raw input of a request comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriKind {
    /// `http://` or `https://`, fetched on the network lane.
    Network,
    /// A local file, loaded directly on the local lane.
    Local(PathBuf),
}

const NETWORK_SCHEMES: [&str; 2] = ["http://", "https://"];
const FILE_SCHEME: &str = "file://";

impl UriKind {
    /// Classifies a URI.
    ///
    /// Blank URIs and schemes without a target are `InputInvalid`; schemes
    /// nothing can service are `Unsupported`.
    pub fn classify(uri: &str) -> Result<Self, ErrorCause> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(ErrorCause::InputInvalid("empty uri".to_string()));
        }

        let lower = uri.to_ascii_lowercase();
        if let Some(scheme) = NETWORK_SCHEMES.iter().find(|s| lower.starts_with(*s)) {
            if uri.len() == scheme.len() {
                return Err(ErrorCause::InputInvalid(format!("missing host in '{}'", uri)));
            }
            return Ok(Self::Network);
        }

        if lower.starts_with(FILE_SCHEME) {
            let path = &uri[FILE_SCHEME.len()..];
            if path.is_empty() {
                return Err(ErrorCause::InputInvalid(format!("missing path in '{}'", uri)));
            }
            return Ok(Self::Local(PathBuf::from(path)));
        }

        if uri.starts_with('/') {
            return Ok(Self::Local(PathBuf::from(uri)));
        }

        Err(ErrorCause::Unsupported(uri.to_string()))
    }

    /// Returns true if no download is needed.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

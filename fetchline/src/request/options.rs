//! Per-request options.

use std::fmt;

/// How deep into the pipeline a request may go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RequestLevel {
    /// Memory cache, persistent cache, then network.
    #[default]
    Net,
    /// Memory cache, persistent cache and local files; never the network.
    Local,
    /// Memory cache only.
    Memory,
}

impl fmt::Display for RequestLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Net => write!(f, "net"),
            Self::Local => write!(f, "local"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for RequestLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "net" | "network" => Ok(Self::Net),
            "local" => Ok(Self::Local),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown request level '{}' (expected net, local or memory)",
                other
            )),
        }
    }
}

/// Options carried by a request through every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Read and populate the memory tier.
    pub memory_cache: bool,
    /// Read and populate the persistent tier.
    pub disk_cache: bool,
    /// Run inline on the caller's task and deliver callbacks inline.
    pub sync: bool,
    /// Deepest source the request may use.
    pub level: RequestLevel,
    /// Opaque processing fingerprint forwarded to the decoder.
    pub processing: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            memory_cache: true,
            disk_cache: true,
            sync: false,
            level: RequestLevel::Net,
            processing: None,
        }
    }
}

impl RequestOptions {
    pub fn with_memory_cache(mut self, enabled: bool) -> Self {
        self.memory_cache = enabled;
        self
    }

    pub fn with_disk_cache(mut self, enabled: bool) -> Self {
        self.disk_cache = enabled;
        self
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_level(mut self, level: RequestLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_processing(mut self, processing: impl Into<String>) -> Self {
        self.processing = Some(processing.into());
        self
    }

    /// Suffix appended to the length-prefixed URI to form the request key.
    ///
    /// Only options that change the produced artifact take part.
    pub fn fingerprint(&self) -> String {
        match &self.processing {
            Some(p) if !p.is_empty() => format!("@{}", p),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = RequestOptions::default();
        assert!(options.memory_cache);
        assert!(options.disk_cache);
        assert!(!options.sync);
        assert_eq!(options.level, RequestLevel::Net);
        assert_eq!(options.fingerprint(), "");
    }

    #[test]
    fn test_fingerprint_ignores_delivery_flags() {
        let a = RequestOptions::default().with_sync(true).with_memory_cache(false);
        assert_eq!(a.fingerprint(), "");

        let b = RequestOptions::default().with_processing("blur=2");
        assert_eq!(b.fingerprint(), "@blur=2");
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("NET".parse::<RequestLevel>().unwrap(), RequestLevel::Net);
        assert_eq!("local".parse::<RequestLevel>().unwrap(), RequestLevel::Local);
        assert_eq!(" memory ".parse::<RequestLevel>().unwrap(), RequestLevel::Memory);
        assert!("disk".parse::<RequestLevel>().is_err());
    }
}

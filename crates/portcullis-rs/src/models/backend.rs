//! Backend registry entries.

use std::sync::atomic::{AtomicBool, Ordering};

/// One interchangeable upstream service instance.
///
/// Identity (`name`, `host`, `port`) and `weight` are fixed at startup; only
/// the `healthy` flag is mutable, and it is an atomic so load balancers can
/// read it lock-free on every selection while the control surface flips it
/// concurrently.
///
/// # Examples
///
/// ```rust
/// use portcullis_rs::models::backend::Backend;
///
/// let backend = Backend::new("api-1", "127.0.0.1", 9101, 3);
/// assert!(backend.is_healthy());
/// assert_eq!(backend.authority(), "127.0.0.1:9101");
/// ```
#[derive(Debug)]
pub struct Backend {
    /// Unique backend name, used by the control surface and diagnostics.
    pub name: String,
    /// Bare host or address, without a scheme.
    pub host: String,
    /// Target port number.
    pub port: u16,
    /// Weight for weighted round-robin (>= 1).
    pub weight: u32,
    healthy: AtomicBool,
}

impl Backend {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            weight,
            healthy: AtomicBool::new(true),
        }
    }

    /// Reads the healthy flag without taking a lock.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    /// Flips the healthy flag and returns the new value.
    pub fn toggle_healthy(&self) -> bool {
        // fetch_xor flips atomically and returns the previous value.
        !self.healthy.fetch_xor(true, Ordering::AcqRel)
    }

    /// `host:port`, the key used by connection counters and upstream URLs.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the upstream URL for a request path and raw query string.
    pub fn url_for(&self, path: &str, query: &str) -> String {
        if query.is_empty() {
            format!("http://{}:{}{}", self.host, self.port, path)
        } else {
            format!("http://{}:{}{}?{}", self.host, self.port, path, query)
        }
    }

    /// Validates backend identity and weight.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Backend name must not be empty".to_string());
        }

        if self.host.is_empty() {
            return Err(format!("Backend {} host must not be empty", self.name));
        }

        if self.host.contains("://") {
            return Err(format!(
                "Backend {} host must not include a scheme: {}",
                self.name, self.host
            ));
        }

        if self.port == 0 {
            return Err(format!(
                "Backend {} port must be between 1 and 65535",
                self.name
            ));
        }

        if self.weight == 0 {
            return Err(format!(
                "Backend {} weight must be greater than 0",
                self.name
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_and_reports_new_value() {
        let backend = Backend::new("a", "127.0.0.1", 9101, 1);
        assert!(backend.is_healthy());
        assert!(!backend.toggle_healthy());
        assert!(!backend.is_healthy());
        assert!(backend.toggle_healthy());
    }

    #[test]
    fn url_for_appends_query_when_present() {
        let backend = Backend::new("a", "10.0.0.5", 8080, 1);
        assert_eq!(backend.url_for("/users", ""), "http://10.0.0.5:8080/users");
        assert_eq!(
            backend.url_for("/users", "page=2"),
            "http://10.0.0.5:8080/users?page=2"
        );
    }

    #[test]
    fn validation_rejects_bad_identity() {
        assert!(Backend::new("", "127.0.0.1", 9101, 1).validate().is_err());
        assert!(Backend::new("a", "http://h", 9101, 1).validate().is_err());
        assert!(Backend::new("a", "127.0.0.1", 0, 1).validate().is_err());
        assert!(Backend::new("a", "127.0.0.1", 9101, 0).validate().is_err());
        assert!(Backend::new("a", "127.0.0.1", 9101, 3).validate().is_ok());
    }
}

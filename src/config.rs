//! Configuration for an `Analytics` instance

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::AnalyticsError;
use crate::http::{HttpRequest, RequestFactory, Transport};
use crate::storage::DEFAULT_MAX_FILE_SIZE;

pub const DEFAULT_API_HOST: &str = "t.journify.io/v1";
pub const DEFAULT_CDN_HOST: &str = "static.journify.io/write_keys";

/// Environment variable overriding the storage root
pub const STORAGE_DIR_ENV: &str = "JOURNIFY_STORAGE_DIR";

/// Callback receiving every internal error
pub type ErrorHandler = Arc<dyn Fn(&AnalyticsError) + Send + Sync>;

/// Settings for one `Analytics` instance
///
/// Built with `Configuration::new(write_key)` and refined with the `with_*`
/// methods:
///
/// ```no_run
/// use std::time::Duration;
/// use journify::Configuration;
///
/// let config = Configuration::new("WRITE_KEY")
///     .with_flush_at(50)
///     .with_flush_interval(Duration::from_secs(10));
/// ```
#[derive(Clone)]
pub struct Configuration {
    pub write_key: String,
    pub api_host: String,
    pub cdn_host: String,
    /// Event count that triggers an upload
    pub flush_at: usize,
    pub flush_interval: Duration,
    /// Size cap of one batch file in bytes
    pub max_file_size: u64,
    /// Parent of the per-write-key storage directory
    pub storage_root: PathBuf,
    /// Skip the settings fetch and start running immediately
    pub offline: bool,
    pub settings_refresh_interval: Duration,
    pub max_concurrent_uploads: usize,
    pub request_timeout: Duration,
    /// Log every processed event at debug level
    pub debug_logging: bool,
    /// SHA-256 string traits before they are stored or sent
    pub hash_traits: bool,
    /// Add the collector destination at startup
    pub auto_add_collector: bool,
    pub error_handler: Option<ErrorHandler>,
    pub request_factory: Option<RequestFactory>,
    /// Replace the default reqwest transport
    pub transport: Option<Arc<dyn Transport>>,
}

fn default_storage_root() -> PathBuf {
    let current_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    match env::var(STORAGE_DIR_ENV) {
        Ok(path) if Path::new(&path).is_absolute() => PathBuf::from(path),
        Ok(path) => current_dir.join(path),
        Err(_) => current_dir.join(".journify"),
    }
}

impl Configuration {
    pub fn new(write_key: impl Into<String>) -> Self {
        Self {
            write_key: write_key.into(),
            api_host: DEFAULT_API_HOST.to_string(),
            cdn_host: DEFAULT_CDN_HOST.to_string(),
            flush_at: 20,
            flush_interval: Duration::from_secs(30),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            storage_root: default_storage_root(),
            offline: false,
            settings_refresh_interval: Duration::from_secs(24 * 60 * 60),
            max_concurrent_uploads: 2,
            request_timeout: Duration::from_secs(60),
            debug_logging: false,
            hash_traits: false,
            auto_add_collector: true,
            error_handler: None,
            request_factory: None,
            transport: None,
        }
    }

    pub fn with_api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = host.into();
        self
    }

    pub fn with_cdn_host(mut self, host: impl Into<String>) -> Self {
        self.cdn_host = host.into();
        self
    }

    pub fn with_flush_at(mut self, count: usize) -> Self {
        self.flush_at = count;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_storage_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.storage_root = root.as_ref().to_path_buf();
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_settings_refresh_interval(mut self, interval: Duration) -> Self {
        self.settings_refresh_interval = interval;
        self
    }

    pub fn with_max_concurrent_uploads(mut self, count: usize) -> Self {
        self.max_concurrent_uploads = count;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    pub fn with_hash_traits(mut self, enabled: bool) -> Self {
        self.hash_traits = enabled;
        self
    }

    pub fn with_auto_add_collector(mut self, enabled: bool) -> Self {
        self.auto_add_collector = enabled;
        self
    }

    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&AnalyticsError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_request_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(HttpRequest) -> HttpRequest + Send + Sync + 'static,
    {
        self.request_factory = Some(Arc::new(factory));
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Directory holding this write key's batches and state
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_root.join(&self.write_key)
    }

    pub fn validate(&self) -> Result<(), AnalyticsError> {
        if self.write_key.trim().is_empty() {
            return Err(AnalyticsError::Configuration("write key is empty".into()));
        }
        if self.write_key.contains(['/', '\\']) || self.write_key == ".." {
            return Err(AnalyticsError::Configuration(
                "write key must be usable as a directory name".into(),
            ));
        }
        if self.api_host.is_empty() || self.cdn_host.is_empty() {
            return Err(AnalyticsError::Configuration("api and cdn hosts are required".into()));
        }
        if self.max_file_size == 0 {
            return Err(AnalyticsError::Configuration("max file size must be positive".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("write_key", &self.write_key)
            .field("api_host", &self.api_host)
            .field("cdn_host", &self.cdn_host)
            .field("flush_at", &self.flush_at)
            .field("flush_interval", &self.flush_interval)
            .field("max_file_size", &self.max_file_size)
            .field("storage_root", &self.storage_root)
            .field("offline", &self.offline)
            .field("settings_refresh_interval", &self.settings_refresh_interval)
            .field("max_concurrent_uploads", &self.max_concurrent_uploads)
            .field("request_timeout", &self.request_timeout)
            .field("debug_logging", &self.debug_logging)
            .field("hash_traits", &self.hash_traits)
            .field("auto_add_collector", &self.auto_add_collector)
            .field("error_handler", &self.error_handler.is_some())
            .field("request_factory", &self.request_factory.is_some())
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Configuration::new("wk");
        assert_eq!(config.api_host, DEFAULT_API_HOST);
        assert_eq!(config.cdn_host, DEFAULT_CDN_HOST);
        assert_eq!(config.flush_at, 20);
        assert_eq!(config.flush_interval, Duration::from_secs(30));
        assert_eq!(config.max_file_size, 475_000);
        assert_eq!(config.max_concurrent_uploads, 2);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert!(config.auto_add_collector);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = Configuration::new("wk")
            .with_flush_at(5)
            .with_storage_root("/tmp/journify-test")
            .with_offline(true);

        assert_eq!(config.flush_at, 5);
        assert!(config.offline);
        assert_eq!(config.storage_dir(), PathBuf::from("/tmp/journify-test/wk"));
    }

    #[test]
    fn test_validation() {
        assert!(Configuration::new("").validate().is_err());
        assert!(Configuration::new("a/b").validate().is_err());
        assert!(Configuration::new("wk").with_max_file_size(0).validate().is_err());
    }
}

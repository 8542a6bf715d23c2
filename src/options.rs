//! Client configuration: polling mode and construction-time options.
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::cache::ConfigCache;
use crate::error::Error;
use crate::fetcher::ConfigTransport;
use crate::hooks::Hooks;
use crate::user::User;

/// Policy governing when the pipeline fetches a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollingMode {
    /// A background loop fetches on a fixed interval for the lifetime of the
    /// client.
    AutoPoll {
        /// Interval between background fetches.
        poll_interval: Duration,
        /// Upper bound on how long [`wait_for_ready`](crate::Client::wait_for_ready)
        /// blocks before giving up on the first poll. Measured as a wall-clock
        /// deadline from client construction, not per call.
        max_init_wait: Duration,
    },
    /// Reads return the cache if it is younger than the TTL; an expired cache
    /// triggers a synchronous fetch-and-cache before returning.
    LazyLoad {
        /// Time-to-live of a cached snapshot.
        cache_ttl: Duration,
    },
    /// The client never fetches implicitly; only explicit refresh calls do.
    Manual,
}

impl PollingMode {
    /// Default value for [`PollingMode::AutoPoll::poll_interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
    /// Default value for [`PollingMode::AutoPoll::max_init_wait`].
    pub const DEFAULT_MAX_INIT_WAIT: Duration = Duration::from_secs(5);
    /// Default value for [`PollingMode::LazyLoad::cache_ttl`].
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

    /// Auto polling with default interval and init wait.
    pub fn auto_poll() -> PollingMode {
        PollingMode::AutoPoll {
            poll_interval: PollingMode::DEFAULT_POLL_INTERVAL,
            max_init_wait: PollingMode::DEFAULT_MAX_INIT_WAIT,
        }
    }

    /// Lazy loading with the default TTL.
    pub fn lazy_load() -> PollingMode {
        PollingMode::LazyLoad {
            cache_ttl: PollingMode::DEFAULT_CACHE_TTL,
        }
    }
}

/// Options for constructing a [`Client`](crate::Client).
///
/// # Examples
/// ```no_run
/// # use std::time::Duration;
/// # use flagcast::{ClientOptions, PollingMode};
/// let options = ClientOptions::new("my-sdk-key")
///     .polling_mode(PollingMode::LazyLoad { cache_ttl: Duration::from_secs(30) })
///     .http_timeout(Duration::from_secs(10));
/// ```
pub struct ClientOptions {
    pub(crate) sdk_key: String,
    pub(crate) base_url: Option<String>,
    pub(crate) polling_mode: PollingMode,
    pub(crate) http_timeout: Duration,
    pub(crate) offline: bool,
    pub(crate) cache: Option<Arc<dyn ConfigCache>>,
    pub(crate) transport: Option<Arc<dyn ConfigTransport>>,
    pub(crate) default_user: Option<User>,
    pub(crate) hooks: Arc<Hooks>,
}

impl ClientOptions {
    /// Default HTTP timeout.
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create options for the given SDK key with auto polling and no external
    /// cache.
    pub fn new(sdk_key: impl Into<String>) -> ClientOptions {
        ClientOptions {
            sdk_key: sdk_key.into(),
            base_url: None,
            polling_mode: PollingMode::auto_poll(),
            http_timeout: ClientOptions::DEFAULT_HTTP_TIMEOUT,
            offline: false,
            cache: None,
            transport: None,
            default_user: None,
            hooks: Arc::new(Hooks::new()),
        }
    }

    /// Override the base URL for configuration fetches. Clients should use the
    /// default in most cases; a custom URL suppresses `should`-mode redirects.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Select the polling mode.
    pub fn polling_mode(mut self, mode: PollingMode) -> Self {
        self.polling_mode = mode;
        self
    }

    /// Per-request HTTP timeout.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Start the client in offline mode: fetches are suppressed until
    /// [`set_online`](crate::Client::set_online) is called.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Attach an external key/value cache that snapshots are synchronized
    /// with.
    pub fn cache(mut self, cache: Arc<dyn ConfigCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the bundled HTTP transport. Mostly useful for tests and exotic
    /// environments.
    pub fn transport(mut self, transport: Arc<dyn ConfigTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// User evaluated against when a call site passes no user of its own.
    pub fn default_user(mut self, user: User) -> Self {
        self.default_user = Some(user);
        self
    }

    /// Event subscriptions active from the very start of the client's life.
    /// Subscribing here (rather than on the constructed client) guarantees the
    /// ready event cannot be missed.
    pub fn hooks(mut self, hooks: Arc<Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Validate the options. Misconfiguration errors only ever surface here,
    /// at construction time; nothing at runtime throws.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.sdk_key.trim().is_empty() {
            return Err(Error::InvalidOptions("SDK key must not be empty".to_owned()));
        }
        if self.http_timeout.is_zero() {
            return Err(Error::InvalidOptions(
                "HTTP timeout must be positive".to_owned(),
            ));
        }
        match self.polling_mode {
            PollingMode::AutoPoll { poll_interval, .. } if poll_interval.is_zero() => {
                return Err(Error::InvalidOptions(
                    "poll interval must be positive".to_owned(),
                ));
            }
            PollingMode::LazyLoad { cache_ttl } if cache_ttl.is_zero() => {
                return Err(Error::InvalidOptions(
                    "cache TTL must be positive".to_owned(),
                ));
            }
            _ => {}
        }
        if let Some(base_url) = &self.base_url {
            if Url::parse(base_url).is_err() {
                return Err(Error::InvalidOptions(format!(
                    "invalid base URL: {base_url}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn parsed_base_url(&self) -> Option<Url> {
        self.base_url.as_deref().and_then(|u| Url::parse(u).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sdk_key_is_rejected() {
        assert!(matches!(
            ClientOptions::new("  ").validate(),
            Err(Error::InvalidOptions(_))
        ));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let options = ClientOptions::new("key").polling_mode(PollingMode::AutoPoll {
            poll_interval: Duration::ZERO,
            max_init_wait: Duration::from_secs(5),
        });
        assert!(matches!(
            options.validate(),
            Err(Error::InvalidOptions(_))
        ));
    }

    #[test]
    fn zero_cache_ttl_is_rejected() {
        let options = ClientOptions::new("key")
            .polling_mode(PollingMode::LazyLoad { cache_ttl: Duration::ZERO });
        assert!(matches!(
            options.validate(),
            Err(Error::InvalidOptions(_))
        ));
    }

    #[test]
    fn sensible_options_pass() {
        assert!(ClientOptions::new("key")
            .base_url("https://proxy.example.com")
            .validate()
            .is_ok());
    }
}

//! Conditional HTTP fetching of the configuration document.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderValue, ETAG, IF_NONE_MATCH, USER_AGENT};
use url::Url;

use crate::error::FetchError;
use crate::model::RedirectMode;
use crate::snapshot::ConfigSnapshot;

/// Default base URL for configuration fetches.
pub const DEFAULT_BASE_URL: &str = "https://cdn.flagcast.dev";

/// Path of the config document, relative to the base URL.
const CONFIG_ENDPOINT: &str = "configuration-files/{sdk_key}/config-v1.json";

/// Redirect hops followed per fetch before reporting a redirect loop.
const MAX_REDIRECTS: usize = 3;

/// One conditional GET for the config document.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Full document URL.
    pub url: Url,
    /// ETag of the last known snapshot, sent as `If-None-Match`.
    pub etag: Option<String>,
    /// Value for the `User-Agent` header identifying this SDK build.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// The transport's view of an HTTP response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// HTTP reason phrase, if the transport exposes one.
    pub reason: String,
    /// `ETag` response header.
    pub etag: Option<String>,
    /// Response body.
    pub body: String,
}

/// Transport-level failure, distinguishing timeouts from everything else.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The request did not complete within [`FetchRequest::timeout`].
    #[error("request timed out")]
    Timeout,
    /// Connection, DNS or TLS failure.
    #[error("{0}")]
    Failed(String),
}

/// Pluggable fetch transport.
///
/// The bundled default is [`HttpTransport`]; tests plug in fakes. A transport
/// must support conditional GET (`If-None-Match`) and report timeouts
/// distinctly from generic failures.
#[async_trait]
pub trait ConfigTransport: Send + Sync {
    /// Perform one HTTP GET.
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError>;

    /// Discard connection state after a timeout or protocol error. In-flight
    /// requests keep their existing connection; only new requests see the
    /// fresh state. Default is a no-op.
    fn recycle(&self) {}
}

/// The bundled [`ConfigTransport`] on top of `reqwest`.
///
/// The client holds a connection pool internally, so it is reused between
/// requests. [`recycle`](ConfigTransport::recycle) swaps in a new client;
/// clones of the old one held by in-flight requests stay valid until those
/// requests finish.
pub struct HttpTransport {
    client: Mutex<reqwest::Client>,
}

impl HttpTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new() -> HttpTransport {
        HttpTransport {
            client: Mutex::new(reqwest::Client::new()),
        }
    }

    fn client(&self) -> reqwest::Client {
        self.client.lock().expect("transport lock poisoned").clone()
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        HttpTransport::new()
    }
}

#[async_trait]
impl ConfigTransport for HttpTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        let mut builder = self
            .client()
            .get(request.url)
            .timeout(request.timeout)
            .header(USER_AGENT, request.user_agent);
        if let Some(etag) = &request.etag {
            if let Ok(value) = HeaderValue::from_str(etag) {
                builder = builder.header(IF_NONE_MATCH, value);
            }
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Failed(err.without_url().to_string())
            }
        })?;

        let status = response.status();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Failed(err.without_url().to_string()))?;

        Ok(FetchResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_owned(),
            etag,
            body,
        })
    }

    fn recycle(&self) {
        *self.client.lock().expect("transport lock poisoned") = reqwest::Client::new();
    }
}

/// Outcome of one [`ConfigFetcher::fetch`] call.
#[derive(Debug)]
pub enum FetchResult {
    /// HTTP 200 with a parsable body: a new snapshot.
    Fetched(ConfigSnapshot),
    /// HTTP 304: the last known snapshot is still current.
    NotModified,
    /// Classified failure.
    Failed {
        /// The classified error.
        error: FetchError,
        /// Whether retrying later may succeed.
        transient: bool,
    },
}

/// Performs conditional fetches of the config document and classifies their
/// outcomes, following base-URL redirects declared in config preferences.
pub struct ConfigFetcher {
    transport: Arc<dyn ConfigTransport>,
    sdk_key: String,
    user_agent: String,
    timeout: Duration,
    /// Current base URL. A followed redirect updates it, so subsequent fetches
    /// go directly to the preferred host.
    base_url: RwLock<Url>,
    /// Whether the caller supplied a custom base URL. Only `Force` redirects
    /// override it.
    custom_base_url: bool,
    /// A 403/404 response means the SDK key is not valid. We latch that state
    /// so we don't keep issuing requests to the server.
    invalid_sdk_key: AtomicBool,
}

impl ConfigFetcher {
    /// Create a fetcher for `sdk_key`. `base_url = None` uses
    /// [`DEFAULT_BASE_URL`]; supplying one pins the fetcher to it unless a
    /// `Force` redirect says otherwise.
    pub fn new(
        transport: Arc<dyn ConfigTransport>,
        sdk_key: impl Into<String>,
        base_url: Option<Url>,
        timeout: Duration,
    ) -> ConfigFetcher {
        let custom_base_url = base_url.is_some();
        let base_url = base_url.unwrap_or_else(|| {
            Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid")
        });
        ConfigFetcher {
            transport,
            sdk_key: sdk_key.into(),
            user_agent: format!("flagcast-rust/{}", env!("CARGO_PKG_VERSION")),
            timeout,
            base_url: RwLock::new(base_url),
            custom_base_url,
            invalid_sdk_key: AtomicBool::new(false),
        }
    }

    /// Perform one conditional fetch against the current base URL, following
    /// declared redirects up to [`MAX_REDIRECTS`] hops.
    ///
    /// `last` supplies the ETag for the conditional request and decides
    /// whether a 304 is legal.
    pub async fn fetch(&self, last: &ConfigSnapshot) -> FetchResult {
        if self.invalid_sdk_key.load(Ordering::Acquire) {
            return FetchResult::Failed {
                error: FetchError::InvalidSdkKey { status: 403 },
                transient: false,
            };
        }

        let mut url = self.base_url.read().expect("base url lock poisoned").clone();

        for _ in 0..MAX_REDIRECTS {
            let result = self.fetch_once(&url, last).await;

            let FetchResult::Fetched(snapshot) = &result else {
                return result;
            };

            let Some(preferences) = snapshot
                .config
                .as_ref()
                .and_then(|config| config.preferences.clone())
            else {
                self.store_base_url(url);
                return result;
            };

            let Some(preferred) = preferences
                .base_url
                .as_deref()
                .and_then(|u| Url::parse(u).ok())
            else {
                self.store_base_url(url);
                return result;
            };

            if preferred == url {
                self.store_base_url(url);
                return result;
            }

            if self.custom_base_url && preferences.redirect != RedirectMode::Force {
                if preferences.redirect == RedirectMode::Should {
                    log::warn!(target: "flagcast",
                        "your data-governance settings ask clients to use {preferred}, but a custom base URL overrides it; make sure the two are consistent");
                }
                self.store_base_url(url);
                return result;
            }

            match preferences.redirect {
                RedirectMode::No => {
                    self.store_base_url(url);
                    return result;
                }
                RedirectMode::Should => {
                    log::warn!(target: "flagcast",
                        "redirecting to {preferred}; update the client options to fetch from it directly");
                }
                RedirectMode::Force => {}
            }

            url = preferred;
        }

        log::error!(target: "flagcast", "redirect loop while fetching configuration; please contact support");
        FetchResult::Failed {
            error: FetchError::RedirectLoop,
            transient: false,
        }
    }

    fn store_base_url(&self, url: Url) {
        *self.base_url.write().expect("base url lock poisoned") = url;
    }

    fn config_url(&self, base: &Url) -> Url {
        let path = CONFIG_ENDPOINT.replace("{sdk_key}", &self.sdk_key);
        // Joining a relative path onto a valid base URL cannot fail.
        base.join(&path).expect("config endpoint path is valid")
    }

    async fn fetch_once(&self, base: &Url, last: &ConfigSnapshot) -> FetchResult {
        let request = FetchRequest {
            url: self.config_url(base),
            etag: (!last.etag.is_empty()).then(|| last.etag.clone()),
            user_agent: self.user_agent.clone(),
            timeout: self.timeout,
        };

        log::debug!(target: "flagcast", url:display = request.url; "fetching configuration");

        let response = match self.transport.fetch(request).await {
            Ok(response) => response,
            Err(TransportError::Timeout) => {
                // Drop the connection pool; the next attempt resolves and
                // connects from scratch.
                self.transport.recycle();
                return FetchResult::Failed {
                    error: FetchError::Timeout,
                    transient: true,
                };
            }
            Err(TransportError::Failed(reason)) => {
                self.transport.recycle();
                return FetchResult::Failed {
                    error: FetchError::Transport(reason),
                    transient: true,
                };
            }
        };

        match response.status {
            200 => {
                let etag = response.etag.unwrap_or_default();
                match ConfigSnapshot::from_body(response.body, etag, Utc::now()) {
                    Ok(snapshot) => {
                        log::debug!(target: "flagcast", "successfully fetched configuration");
                        FetchResult::Fetched(snapshot)
                    }
                    Err(err) => FetchResult::Failed {
                        error: FetchError::InvalidResponseBody {
                            reason: err.to_string(),
                        },
                        transient: false,
                    },
                }
            }
            304 => {
                if last.is_empty() {
                    // The server answered a conditional response to an
                    // unconditional request. Fail loudly instead of serving
                    // nothing.
                    FetchResult::Failed {
                        error: FetchError::NotModifiedWithoutCache,
                        transient: false,
                    }
                } else {
                    FetchResult::NotModified
                }
            }
            status @ (403 | 404) => {
                log::warn!(target: "flagcast",
                    "server returned {status}; double-check your SDK key; no further requests will be sent");
                self.invalid_sdk_key.store(true, Ordering::Release);
                FetchResult::Failed {
                    error: FetchError::InvalidSdkKey { status },
                    transient: false,
                }
            }
            status => FetchResult::Failed {
                error: FetchError::UnexpectedResponse {
                    status,
                    reason: response.reason,
                },
                transient: true,
            },
        }
    }
}

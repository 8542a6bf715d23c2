//! `flagcast` is a feature-flag and remote-configuration client.
//!
//! The client keeps a locally cached snapshot of a remotely hosted
//! configuration document and evaluates targeting rules, segments and
//! percentage rollouts against it, entirely on the client side. Delivery is
//! pull-based: a conditional HTTP fetch protocol (ETag/304) combined with a
//! configurable polling policy — background auto-polling, lazy TTL-based
//! loading, or fully manual refreshes.
//!
//! Evaluation never blocks on the network and never fails: every getter takes
//! a caller-supplied default that is served whenever the flag (or the whole
//! configuration) is unavailable, with the reason reported through [`Hooks`].
//!
//! # Getting started
//! ```no_run
//! use flagcast::{Client, ClientOptions, User};
//!
//! # async fn demo() -> flagcast::Result<()> {
//! let client = Client::new(ClientOptions::new("my-sdk-key"))?;
//! client.wait_for_ready().await;
//!
//! let user = User::new("user-42").with("Email", "jane@example.com");
//! let enabled = client.get_bool_value("new-dashboard", Some(user), false).await;
//! # Ok(())
//! # }
//! ```
//!
//! Synchronous applications use [`BlockingClient`] instead; it drives the same
//! pipeline from a dedicated background thread.
//!
//! # Logging
//! The crate logs through the [`log`] facade under the `flagcast` target.
//! Hook a logger implementation (e.g. `env_logger`) to see fetch and
//! evaluation diagnostics.

mod cache;
mod client;
mod error;
mod eval;
mod fetcher;
mod hooks;
pub mod model;
mod options;
mod service;
mod snapshot;
mod user;

pub use cache::{CacheError, ConfigCache, InMemoryConfigCache};
pub use client::{BlockingClient, Client};
pub use error::{Error, FetchError, Result};
pub use eval::{EvaluationDetails, EvaluationError};
pub use fetcher::{
    ConfigTransport, FetchRequest, FetchResponse, HttpTransport, TransportError, DEFAULT_BASE_URL,
};
pub use hooks::Hooks;
pub use options::{ClientOptions, PollingMode};
pub use service::ClientStatus;
pub use snapshot::{ConfigSnapshot, SnapshotParseError, Timestamp};
pub use user::{User, UserValue, IDENTIFIER_ATTRIBUTE};

//! The public client: typed flag getters over the delivery pipeline.
use std::future::Future;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::eval::{evaluate, value_type_name, Evaluation, EvaluationDetails, EvaluationError};
use crate::fetcher::{ConfigFetcher, HttpTransport};
use crate::hooks::Hooks;
use crate::model::SettingValue;
use crate::options::ClientOptions;
use crate::service::{ClientStatus, ConfigService};
use crate::snapshot::Timestamp;
use crate::user::User;

/// The feature-flag client.
///
/// Owns the delivery pipeline (fetching, caching, polling) and evaluates flags
/// against the latest cached snapshot. Background work runs on a dedicated
/// runtime thread, so the client works the same whether or not the host
/// application uses an async runtime of its own.
///
/// Evaluation getters never fail: on any problem they log, notify the error
/// hook and return the caller-supplied default.
///
/// # Examples
/// ```no_run
/// # use flagcast::{Client, ClientOptions, User};
/// # async fn demo() -> flagcast::Result<()> {
/// let client = Client::new(ClientOptions::new("my-sdk-key"))?;
/// client.wait_for_ready().await;
///
/// let user = User::new("user-42").with("Email", "jane@example.com");
/// if client.get_bool_value("new-dashboard", Some(user), false).await {
///     // ...
/// }
/// # Ok(())
/// # }
/// ```
pub struct Client {
    service: ConfigService,
    hooks: Arc<Hooks>,
    default_user: Option<User>,
    runtime: BackgroundRuntime,
}

impl Client {
    /// Construct a client. This is the only place configuration problems
    /// surface as errors; everything after construction degrades gracefully.
    pub fn new(options: ClientOptions) -> Result<Client> {
        options.validate()?;

        let transport = options
            .transport
            .clone()
            .unwrap_or_else(|| Arc::new(HttpTransport::new()));
        let fetcher = ConfigFetcher::new(
            transport,
            options.sdk_key.clone(),
            options.parsed_base_url(),
            options.http_timeout,
        );
        let hooks = options.hooks.clone();
        let service = ConfigService::new(
            fetcher,
            options.cache.clone(),
            hooks.clone(),
            options.polling_mode.clone(),
            &options.sdk_key,
            options.offline,
        );

        let runtime = BackgroundRuntime::spawn()?;
        service.start(runtime.handle());

        Ok(Client {
            service,
            hooks,
            default_user: options.default_user,
            runtime,
        })
    }

    /// Evaluate a boolean flag. Returns `default` when the flag is missing,
    /// of another type, or no configuration is available.
    pub async fn get_bool_value(&self, key: &str, user: Option<User>, default: bool) -> bool {
        self.get_typed(key, user, default, "bool", SettingValue::as_bool)
            .await
    }

    /// Evaluate a string setting.
    pub async fn get_string_value(
        &self,
        key: &str,
        user: Option<User>,
        default: String,
    ) -> String {
        self.get_typed(key, user, default, "string", |value| {
            value.as_str().map(ToOwned::to_owned)
        })
        .await
    }

    /// Evaluate a whole-number setting.
    pub async fn get_int_value(&self, key: &str, user: Option<User>, default: i64) -> i64 {
        self.get_typed(key, user, default, "int", SettingValue::as_int)
            .await
    }

    /// Evaluate a decimal setting. Whole-number values coerce.
    pub async fn get_float_value(&self, key: &str, user: Option<User>, default: f64) -> f64 {
        self.get_typed(key, user, default, "double", SettingValue::as_float)
            .await
    }

    /// Evaluate a flag and return the full details: served value, variation
    /// id, the matched rule/percentage option and any error.
    pub async fn get_value_details(&self, key: &str, user: Option<User>) -> EvaluationDetails {
        let user = user.or_else(|| self.default_user.clone());
        let (result, fetch_time) = self.evaluate_raw(key, user.as_ref()).await;
        self.finish(key, user, result, fetch_time)
    }

    /// Fetch-and-cache now, regardless of polling mode.
    pub async fn refresh(&self) -> Result<()> {
        self.service.refresh().await
    }

    /// Block until the polling mode's readiness condition holds. Returns
    /// `true` if a configuration is available at that point.
    pub async fn wait_for_ready(&self) -> bool {
        self.service.wait_for_ready().await
    }

    /// Re-allow fetching after [`Client::set_offline`].
    pub fn set_online(&self) {
        self.service.set_online();
    }

    /// Suppress all fetching. Evaluation keeps serving the cached snapshot.
    pub fn set_offline(&self) {
        self.service.set_offline();
    }

    /// Current connection state.
    pub fn status(&self) -> ClientStatus {
        self.service.status()
    }

    /// The locally cached configuration snapshot, without triggering a fetch.
    pub fn snapshot(&self) -> Arc<crate::snapshot::ConfigSnapshot> {
        self.service.snapshot()
    }

    /// Event subscriptions.
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    async fn get_typed<T>(
        &self,
        key: &str,
        user: Option<User>,
        default: T,
        requested: &'static str,
        convert: fn(&SettingValue) -> Option<T>,
    ) -> T {
        let user = user.or_else(|| self.default_user.clone());
        let (mut result, fetch_time) = self.evaluate_raw(key, user.as_ref()).await;
        if let Ok(evaluation) = &result {
            if convert(&evaluation.value).is_none() {
                result = Err(EvaluationError::TypeMismatch {
                    key: key.to_owned(),
                    requested,
                    actual: value_type_name(&evaluation.value),
                });
            }
        }
        let details = self.finish(key, user, result, fetch_time);
        details
            .value
            .as_ref()
            .and_then(convert)
            .unwrap_or(default)
    }

    async fn evaluate_raw(
        &self,
        key: &str,
        user: Option<&User>,
    ) -> (
        std::result::Result<Evaluation, EvaluationError>,
        Option<Timestamp>,
    ) {
        let snapshot = self.service.get_config().await;
        match &snapshot.config {
            None => (Err(EvaluationError::ConfigMissing), None),
            Some(config) => (
                evaluate(config, key, user),
                Some(snapshot.fetched_at),
            ),
        }
    }

    /// Turn a raw evaluation outcome into details and emit the evaluation
    /// hooks.
    fn finish(
        &self,
        key: &str,
        user: Option<User>,
        result: std::result::Result<Evaluation, EvaluationError>,
        fetch_time: Option<Timestamp>,
    ) -> EvaluationDetails {
        let details = match result {
            Ok(evaluation) => EvaluationDetails {
                key: key.to_owned(),
                value: Some(evaluation.value),
                variation_id: evaluation.variation_id,
                is_default_value: false,
                matched_targeting_rule: evaluation.matched_targeting_rule,
                matched_percentage_option: evaluation.matched_percentage_option,
                error: None,
                fetch_time,
                user,
            },
            Err(error) => {
                self.hooks
                    .emit_error(&format!("error evaluating `{key}`: {error}"));
                EvaluationDetails {
                    fetch_time,
                    ..EvaluationDetails::from_error(key, user.as_ref(), error)
                }
            }
        };
        self.hooks.emit_flag_evaluated(&details);
        details
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Field order does the rest: the service is disposed before the
        // runtime thread is stopped and joined.
        self.service.dispose();
    }
}

/// Synchronous facade over [`Client`] for applications without an async
/// runtime.
///
/// Every call drives the wrapped future on the caller's thread while the
/// client's background runtime keeps timers and polling alive. Do not use it
/// from inside an async context; use [`Client`] there instead.
pub struct BlockingClient {
    inner: Client,
}

impl BlockingClient {
    /// Construct a blocking client. See [`Client::new`].
    pub fn new(options: ClientOptions) -> Result<BlockingClient> {
        Client::new(options).map(|inner| BlockingClient { inner })
    }

    /// See [`Client::get_bool_value`].
    pub fn get_bool_value(&self, key: &str, user: Option<User>, default: bool) -> bool {
        self.block_on(self.inner.get_bool_value(key, user, default))
    }

    /// See [`Client::get_string_value`].
    pub fn get_string_value(&self, key: &str, user: Option<User>, default: String) -> String {
        self.block_on(self.inner.get_string_value(key, user, default))
    }

    /// See [`Client::get_int_value`].
    pub fn get_int_value(&self, key: &str, user: Option<User>, default: i64) -> i64 {
        self.block_on(self.inner.get_int_value(key, user, default))
    }

    /// See [`Client::get_float_value`].
    pub fn get_float_value(&self, key: &str, user: Option<User>, default: f64) -> f64 {
        self.block_on(self.inner.get_float_value(key, user, default))
    }

    /// See [`Client::get_value_details`].
    pub fn get_value_details(&self, key: &str, user: Option<User>) -> EvaluationDetails {
        self.block_on(self.inner.get_value_details(key, user))
    }

    /// See [`Client::refresh`].
    pub fn refresh(&self) -> Result<()> {
        self.block_on(self.inner.refresh())
    }

    /// See [`Client::wait_for_ready`].
    pub fn wait_for_ready(&self) -> bool {
        self.block_on(self.inner.wait_for_ready())
    }

    /// See [`Client::set_online`].
    pub fn set_online(&self) {
        self.inner.set_online();
    }

    /// See [`Client::set_offline`].
    pub fn set_offline(&self) {
        self.inner.set_offline();
    }

    /// The wrapped async client.
    pub fn as_async(&self) -> &Client {
        &self.inner
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.inner.runtime.handle().block_on(future)
    }
}

/// A dedicated thread driving a current-thread tokio runtime.
///
/// The thread parks on a shutdown channel inside `Runtime::block_on`, which
/// keeps timers running and spawned tasks polled. The stored [`Handle`] lets
/// the rest of the crate spawn background work and lets [`BlockingClient`]
/// drive futures from synchronous code.
///
/// [`Handle`]: tokio::runtime::Handle
struct BackgroundRuntime {
    handle: tokio::runtime::Handle,
    stop: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl BackgroundRuntime {
    fn spawn() -> Result<BackgroundRuntime> {
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("flagcast-runtime".to_owned())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = handle_tx.send(Err(err));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                // Park until shutdown. Dropping the runtime afterwards cancels
                // whatever background tasks are still alive.
                let _ = runtime.block_on(stop_rx);
            })?;

        let handle = handle_rx
            .recv()
            .map_err(|_| {
                Error::Io(Arc::new(std::io::Error::other(
                    "background runtime thread exited before reporting a handle",
                )))
            })??;

        Ok(BackgroundRuntime {
            handle,
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    fn handle(&self) -> &tokio::runtime::Handle {
        &self.handle
    }
}

impl Drop for BackgroundRuntime {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::fetcher::tests::ScriptedTransport;
    use crate::options::PollingMode;

    const BODY: &str = r#"{
      "settings": {
        "enabled": {"settingType": "boolean", "value": true, "variationId": "v_on"},
        "greeting": {"settingType": "string", "value": "hello"},
        "limit": {"settingType": "int", "value": 42},
        "ratio": {"settingType": "double", "value": 0.25}
      }
    }"#;

    fn manual_client(transport: Arc<ScriptedTransport>) -> Client {
        Client::new(
            ClientOptions::new("test-key")
                .polling_mode(PollingMode::Manual)
                .transport(transport),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn missing_configuration_serves_defaults() {
        let transport = ScriptedTransport::new(vec![Ok(ScriptedTransport::ok(200, BODY, None))]);
        let client = manual_client(transport);

        assert!(!client.get_bool_value("enabled", None, false).await);
        let details = client.get_value_details("enabled", None).await;
        assert!(details.is_default_value);
        assert_eq!(details.error, Some(EvaluationError::ConfigMissing));
    }

    #[tokio::test]
    async fn typed_getters_serve_refreshed_values() {
        let transport = ScriptedTransport::new(vec![Ok(ScriptedTransport::ok(200, BODY, None))]);
        let client = manual_client(transport);
        client.refresh().await.unwrap();

        assert!(client.get_bool_value("enabled", None, false).await);
        assert_eq!(
            client
                .get_string_value("greeting", None, String::new())
                .await,
            "hello"
        );
        assert_eq!(client.get_int_value("limit", None, 0).await, 42);
        assert_eq!(client.get_float_value("ratio", None, 0.0).await, 0.25);
        // An int-typed setting coerces for the float getter.
        assert_eq!(client.get_float_value("limit", None, 0.0).await, 42.0);
    }

    #[tokio::test]
    async fn type_mismatch_serves_default_and_reports() {
        let transport = ScriptedTransport::new(vec![Ok(ScriptedTransport::ok(200, BODY, None))]);
        let client = manual_client(transport);
        client.refresh().await.unwrap();

        let errors = Arc::new(AtomicUsize::new(0));
        {
            let errors = errors.clone();
            client.hooks().on_error(move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            });
        }

        // "greeting" is a string; asking for a bool falls back to the default.
        assert!(client.get_bool_value("greeting", None, true).await);
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        // Unknown keys behave the same way.
        assert_eq!(client.get_int_value("nope", None, 7).await, 7);
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn flag_evaluated_hook_receives_details() {
        let transport = ScriptedTransport::new(vec![Ok(ScriptedTransport::ok(200, BODY, None))]);
        let client = manual_client(transport);
        client.refresh().await.unwrap();

        let evaluations = Arc::new(AtomicUsize::new(0));
        {
            let evaluations = evaluations.clone();
            client.hooks().on_flag_evaluated(move |details| {
                assert_eq!(details.key, "enabled");
                assert_eq!(details.value, Some(SettingValue::Bool(true)));
                assert_eq!(details.variation_id.as_deref(), Some("v_on"));
                assert!(details.fetch_time.is_some());
                evaluations.fetch_add(1, Ordering::SeqCst);
            });
        }

        client.get_bool_value("enabled", None, false).await;
        assert_eq!(evaluations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_user_applies_when_no_user_is_passed() {
        const TARGETED: &str = r#"{
          "settings": {
            "flag": {
              "settingType": "boolean",
              "value": false,
              "targetingRules": [
                {"conditions": [{"userCondition":
                    {"attribute": "Email", "comparator": "textEndsWithAnyOf", "value": ["@example.com"]}}],
                 "servedValue": {"value": true}}
              ]
            }
          }
        }"#;
        let transport =
            ScriptedTransport::new(vec![Ok(ScriptedTransport::ok(200, TARGETED, None))]);
        let client = Client::new(
            ClientOptions::new("test-key")
                .polling_mode(PollingMode::Manual)
                .transport(transport)
                .default_user(User::new("u").with("Email", "jane@example.com")),
        )
        .unwrap();
        client.refresh().await.unwrap();

        assert!(client.get_bool_value("flag", None, false).await);
        // An explicit user overrides the default user.
        let other = User::new("u").with("Email", "jane@other.org");
        assert!(!client.get_bool_value("flag", Some(other), false).await);
    }

    #[tokio::test]
    async fn construction_time_hooks_see_the_ready_event() {
        let transport = ScriptedTransport::new(vec![Ok(ScriptedTransport::ok(200, BODY, None))]);
        let hooks = Arc::new(Hooks::new());
        let ready = Arc::new(AtomicUsize::new(0));
        {
            let ready = ready.clone();
            hooks.on_client_ready(move || {
                ready.fetch_add(1, Ordering::SeqCst);
            });
        }

        let client = Client::new(
            ClientOptions::new("test-key")
                .polling_mode(PollingMode::Manual)
                .transport(transport)
                .hooks(hooks),
        )
        .unwrap();

        client.wait_for_ready().await;
        assert_eq!(ready.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blocking_client_works_without_an_async_runtime() {
        let transport = ScriptedTransport::new(vec![Ok(ScriptedTransport::ok(200, BODY, None))]);
        let client = BlockingClient::new(
            ClientOptions::new("test-key")
                .polling_mode(PollingMode::Manual)
                .transport(transport),
        )
        .unwrap();

        client.refresh().unwrap();
        assert!(client.get_bool_value("enabled", None, false));
        assert_eq!(client.get_int_value("limit", None, 0), 42);
    }

    #[test]
    fn construction_rejects_invalid_options() {
        assert!(matches!(
            Client::new(ClientOptions::new("")),
            Err(Error::InvalidOptions(_))
        ));
    }
}

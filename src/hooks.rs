//! Event-notification boundary. Surrounding code subscribes callbacks; the
//! delivery pipeline and the evaluator emit into them.
use std::sync::Mutex;

use crate::eval::EvaluationDetails;
use crate::model::Config;

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Subscription lists for client lifecycle events.
///
/// Callbacks run synchronously on the thread/task that produced the event;
/// keep them short. Emission is strictly ordered after the cache write that
/// produced the event.
#[derive(Default)]
pub struct Hooks {
    on_client_ready: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
    on_config_fetched: Mutex<Vec<Callback<bool>>>,
    on_config_changed: Mutex<Vec<Callback<Config>>>,
    on_flag_evaluated: Mutex<Vec<Callback<EvaluationDetails>>>,
    on_error: Mutex<Vec<Box<dyn Fn(&str) + Send + Sync>>>,
}

impl Hooks {
    /// Create an empty hook set.
    pub fn new() -> Hooks {
        Hooks::default()
    }

    /// Run `callback` once the client finished initialization (per the polling
    /// mode's readiness policy).
    pub fn on_client_ready(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_client_ready.lock().unwrap().push(Box::new(callback));
    }

    /// Run `callback` after every fetch attempt; the argument tells whether
    /// the fetch succeeded.
    pub fn on_config_fetched(&self, callback: impl Fn(&bool) + Send + Sync + 'static) {
        self.on_config_fetched
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    /// Run `callback` when a fetch produced semantically different
    /// configuration content.
    pub fn on_config_changed(&self, callback: impl Fn(&Config) + Send + Sync + 'static) {
        self.on_config_changed
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    /// Run `callback` after every flag evaluation.
    pub fn on_flag_evaluated(
        &self,
        callback: impl Fn(&EvaluationDetails) + Send + Sync + 'static,
    ) {
        self.on_flag_evaluated
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    /// Run `callback` on classified pipeline errors.
    pub fn on_error(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.on_error.lock().unwrap().push(Box::new(callback));
    }

    pub(crate) fn emit_client_ready(&self) {
        for callback in self.on_client_ready.lock().unwrap().iter() {
            callback();
        }
    }

    pub(crate) fn emit_config_fetched(&self, success: bool) {
        for callback in self.on_config_fetched.lock().unwrap().iter() {
            callback(&success);
        }
    }

    pub(crate) fn emit_config_changed(&self, config: &Config) {
        for callback in self.on_config_changed.lock().unwrap().iter() {
            callback(config);
        }
    }

    pub(crate) fn emit_flag_evaluated(&self, details: &EvaluationDetails) {
        for callback in self.on_flag_evaluated.lock().unwrap().iter() {
            callback(details);
        }
    }

    pub(crate) fn emit_error(&self, message: &str) {
        log::error!(target: "flagcast", "{message}");
        for callback in self.on_error.lock().unwrap().iter() {
            callback(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn subscribed_callbacks_fire() {
        let hooks = Hooks::new();
        let fetched = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        {
            let fetched = fetched.clone();
            hooks.on_config_fetched(move |_| {
                fetched.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let errors = errors.clone();
            hooks.on_error(move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            });
        }

        hooks.emit_config_fetched(true);
        hooks.emit_config_fetched(false);
        hooks.emit_error("boom");

        assert_eq!(fetched.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }
}

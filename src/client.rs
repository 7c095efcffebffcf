use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use gamehud_batcher::{Metric, Sender};

use crate::{
    event::{Event, Severity},
    hook::LogHook,
    identity::Identity,
    internal_metrics::InternalMetrics,
    queue::EventQueue,
    DIAG_PREFIX,
};

pub(crate) struct HookConfig {
    pub send_log_info: bool,
    pub send_log_warnings: bool,
    pub send_log_errors: bool,
    pub send_log_exceptions: bool,
    pub send_dev_logs: bool,
    pub dev_host: bool,
}

/**
A handle to the SDK.

Clones share the same queue and dispatcher; hand one to each
instrumentation site instead of reaching for a global. Every method is
cheap and synchronous, and recording never waits on the network.
*/
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    sender: Sender<EventQueue>,
    metrics: Arc<InternalMetrics>,
    identity: Identity,
    level: Mutex<String>,
    hooks: HookConfig,
    enabled: bool,
}

impl Client {
    pub(crate) fn new(
        sender: Sender<EventQueue>,
        metrics: Arc<InternalMetrics>,
        identity: Identity,
        hooks: HookConfig,
        enabled: bool,
    ) -> Self {
        Client {
            inner: Arc::new(Inner {
                sender,
                metrics,
                identity,
                level: Mutex::new(String::new()),
                hooks,
                enabled,
            }),
        }
    }

    /**
    Record a custom gameplay event.
    */
    pub fn event(&self, name: impl Into<String>) {
        self.record(Event::new(name, self.level()));
    }

    /**
    Record a custom gameplay event with properties.
    */
    pub fn event_with(
        &self,
        name: impl Into<String>,
        properties: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) {
        self.record(Event::new(name, self.level()).with_properties(properties));
    }

    /**
    The log-interceptor entry point.

    Hosts wire their engine's log callback here (or install
    [`Client::log_hook`] as a `log` logger). Messages are filtered by the
    per-severity opt-ins, and anything starting with [`DIAG_PREFIX`] is the
    SDK talking about itself and is dropped so its own diagnostics can't
    feed back into the queue.
    */
    pub fn on_log(&self, message: &str, stack_trace: Option<&str>, severity: Severity) {
        let send = match severity {
            Severity::Info => self.inner.hooks.send_log_info,
            Severity::Warning => self.inner.hooks.send_log_warnings,
            Severity::Error => self.inner.hooks.send_log_errors,
            Severity::Exception => self.inner.hooks.send_log_exceptions,
        };

        if !send || message.starts_with(DIAG_PREFIX) {
            self.inner.metrics.event_suppressed.increment();

            return;
        }

        let mut event = Event::new(message, self.level()).with_severity(severity);

        if let Some(stack_trace) = stack_trace {
            event = event.with_stack_trace(stack_trace);
        }

        self.record(event);
    }

    /**
    Record an already-built [`Event`].
    */
    pub fn record(&self, event: Event) {
        if self.inner.hooks.dev_host && !self.inner.hooks.send_dev_logs {
            self.inner.metrics.event_suppressed.increment();

            return;
        }

        self.inner.sender.send(event);
    }

    /**
    A `log::Log` implementation forwarding the host's log records into
    [`Client::on_log`].
    */
    pub fn log_hook(&self) -> LogHook {
        LogHook::new(self.clone())
    }

    /**
    Set the context stamped onto subsequently recorded events, typically
    the scene or level name.

    Changing level also asks the dispatcher to flush, so events from the
    previous scene go out promptly.
    */
    pub fn set_level(&self, level: impl Into<String>) {
        *self.inner.level.lock().unwrap() = level.into();

        self.inner.sender.request_flush();
    }

    pub fn level(&self) -> String {
        self.inner.level.lock().unwrap().clone()
    }

    /**
    Suspend the flush cycle's effect. Events keep accumulating; nothing is
    sent until [`Client::resume`].
    */
    pub fn pause(&self) {
        self.inner.sender.set_paused(true);
    }

    pub fn resume(&self) {
        self.inner.sender.set_paused(false);
    }

    /**
    Ask the dispatcher to run a flush cycle now instead of waiting for the
    next tick.
    */
    pub fn flush_now(&self) {
        self.inner.sender.request_flush();
    }

    /**
    Flush pending events and wait up to `timeout` for the attempt to
    complete. Call this at shutdown; delivery of anything recorded after
    an abrupt exit is not guaranteed.
    */
    pub fn blocking_flush(&self, timeout: Duration) -> bool {
        gamehud_batcher::tokio::blocking_flush(&self.inner.sender, timeout)
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /**
    The number of events waiting for acknowledgement.
    */
    pub fn pending(&self) -> usize {
        self.inner.sender.len()
    }

    /**
    Whether the client was configured with credentials and is actually
    sending. A misconfigured client records nothing and sends nothing, but
    every method stays safe to call.
    */
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /**
    Sample the SDK's own activity counters.
    */
    pub fn sample_metrics(&self) -> impl Iterator<Item = Metric> + 'static {
        self.inner
            .sender
            .sample_metrics()
            .chain(self.inner.metrics.sample())
    }
}

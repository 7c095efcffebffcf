use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::{
    client::{Client, HookConfig},
    device::DeviceInfo,
    dispatch::{Dispatcher, Registration},
    event::DedupPolicy,
    identity::{FilePrefs, Identity, Prefs},
    internal_metrics::InternalMetrics,
    queue::EventQueue,
    transport::Transport,
};

/**
Start configuring the SDK.
*/
pub fn setup() -> Setup {
    Setup::new()
}

/**
A builder for a [`Client`].

The defaults mirror a production game: warnings, errors, and exceptions
are forwarded from the log interceptor, plain info logs are not, and the
dispatcher flushes every 30 seconds. Call [`Setup::spawn`] with a
transport to finish.
*/
pub struct Setup {
    api_key: Option<String>,
    game_id: Option<u64>,
    version: Option<String>,
    send_log_info: bool,
    send_log_warnings: bool,
    send_log_errors: bool,
    send_log_exceptions: bool,
    send_dev_logs: bool,
    dev_host: bool,
    send_event_delay: Duration,
    dedup: DedupPolicy,
    registration: Registration,
    max_queue_len: usize,
    device_info: Option<DeviceInfo>,
    prefs: Option<Box<dyn Prefs + Send>>,
}

const DEFAULT_SEND_EVENT_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_MAX_QUEUE_LEN: usize = 10_000;
const DEFAULT_PREFS_PATH: &str = "gamehud_prefs.json";

impl Default for Setup {
    fn default() -> Self {
        Self::new()
    }
}

impl Setup {
    pub fn new() -> Self {
        Setup {
            api_key: None,
            game_id: None,
            version: None,
            send_log_info: false,
            send_log_warnings: true,
            send_log_errors: true,
            send_log_exceptions: true,
            send_dev_logs: true,
            dev_host: cfg!(debug_assertions),
            send_event_delay: DEFAULT_SEND_EVENT_DELAY,
            dedup: DedupPolicy::default(),
            registration: Registration::default(),
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            device_info: None,
            prefs: None,
        }
    }

    /**
    The credential received when registering the game with the backend.
    Without it the client comes up disabled and never sends anything.
    */
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /**
    The numeric game id. Only the legacy [`Registration::Handshake`]
    protocol needs it.
    */
    pub fn game_id(mut self, game_id: u64) -> Self {
        self.game_id = Some(game_id);
        self
    }

    /**
    The game's version string, attached to every submission.
    */
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /**
    Forward plain info logs from the interceptor. Off by default.
    */
    pub fn send_log_info(mut self, send: bool) -> Self {
        self.send_log_info = send;
        self
    }

    pub fn send_log_warnings(mut self, send: bool) -> Self {
        self.send_log_warnings = send;
        self
    }

    pub fn send_log_errors(mut self, send: bool) -> Self {
        self.send_log_errors = send;
        self
    }

    pub fn send_log_exceptions(mut self, send: bool) -> Self {
        self.send_log_exceptions = send;
        self
    }

    /**
    Whether to record anything at all while running in a development
    host. On by default, like the original editor behavior.
    */
    pub fn send_dev_logs(mut self, send: bool) -> Self {
        self.send_dev_logs = send;
        self
    }

    /**
    Override development-host detection, which defaults to debug builds.
    */
    pub fn dev_host(mut self, dev_host: bool) -> Self {
        self.dev_host = dev_host;
        self
    }

    /**
    The time between flush cycles.
    */
    pub fn send_event_delay(mut self, delay: Duration) -> Self {
        self.send_event_delay = delay;
        self
    }

    /**
    The key deciding which recorded events fold together.
    */
    pub fn dedup(mut self, policy: DedupPolicy) -> Self {
        self.dedup = policy;
        self
    }

    /**
    The startup registration protocol. [`Registration::Handshake`] also
    requires [`Setup::game_id`].
    */
    pub fn registration(mut self, registration: Registration) -> Self {
        self.registration = registration;
        self
    }

    /**
    The most events held while the backend is unreachable. Hitting the
    cap clears the queue rather than growing without bound.
    */
    pub fn max_queue_len(mut self, max_queue_len: usize) -> Self {
        self.max_queue_len = max_queue_len;
        self
    }

    /**
    Device telemetry to submit at registration, replacing
    [`DeviceInfo::detect`].
    */
    pub fn device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = Some(device_info);
        self
    }

    /**
    A custom persistent store for the device identifier.
    */
    pub fn prefs(mut self, prefs: impl Prefs + Send + 'static) -> Self {
        self.prefs = Some(Box::new(prefs));
        self
    }

    /**
    Keep identifiers in a JSON file at `path` instead of the default
    `gamehud_prefs.json` next to the working directory.
    */
    pub fn prefs_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.prefs = Some(Box::new(FilePrefs::new(path)));
        self
    }

    /**
    Complete the builder, spawning the dispatcher onto a `tokio` runtime
    (the ambient one when called from a runtime thread, otherwise a
    dedicated background thread).

    A missing api key (or a missing game id in handshake mode) logs one
    diagnostic and returns a disabled client: its hooks stay safe to call
    but nothing is queued or sent.
    */
    pub fn spawn(self, transport: impl Transport + Send + Sync + 'static) -> Client {
        let metrics = Arc::new(InternalMetrics::default());

        let mut prefs = self
            .prefs
            .unwrap_or_else(|| Box::new(FilePrefs::new(DEFAULT_PREFS_PATH)));
        let identity = Identity::load(prefs.as_mut());

        let queue = EventQueue::new(self.dedup).with_metrics(metrics.clone());
        let (sender, receiver) = gamehud_batcher::channel(queue, self.max_queue_len);

        let api_key = self.api_key.filter(|api_key| !api_key.is_empty());

        let enabled = match (&api_key, self.registration, self.game_id) {
            (None, ..) => {
                log::error!(
                    "GAMEhud not configured. Set the api key received when registering your game; nothing will be sent."
                );

                false
            }
            (Some(_), Registration::Handshake, None) => {
                log::error!(
                    "GAMEhud not configured. The handshake protocol also needs the numeric game id; nothing will be sent."
                );

                false
            }
            _ => true,
        };

        if enabled {
            let dispatcher = Arc::new(Dispatcher::new(
                Box::new(transport),
                prefs,
                identity.clone(),
                api_key.unwrap_or_default(),
                self.game_id,
                self.version,
                self.device_info.unwrap_or_else(DeviceInfo::detect),
                self.registration,
                metrics.clone(),
            ));

            gamehud_batcher::tokio::spawn(receiver.interval(self.send_event_delay), {
                move |batch| {
                    let dispatcher = dispatcher.clone();

                    async move { dispatcher.on_batch(batch).await }
                }
            });
        }

        Client::new(
            sender,
            metrics,
            identity,
            HookConfig {
                send_log_info: self.send_log_info,
                send_log_warnings: self.send_log_warnings,
                send_log_errors: self.send_log_errors,
                send_log_exceptions: self.send_log_exceptions,
                send_dev_logs: self.send_dev_logs,
                dev_host: self.dev_host,
            },
            enabled,
        )
    }
}

/*!
Report gameplay events and device telemetry to a GAMEhud backend.

Instrumentation calls record named events into an in-memory queue. A
background dispatcher periodically snapshots the queue, submits the batch
over the configured transport, and removes entries once the backend
acknowledges them. An unreachable backend costs nothing but memory;
pending events just wait for a later cycle.

# Getting started

Add `gamehud` and the hyper-based transport to your `Cargo.toml`:

```toml
[dependencies.gamehud]
version = "0.1.0"

[dependencies.gamehud_http]
version = "0.1.0"
```

Then spawn a [`Client`] at startup and hand clones of it to your
instrumentation sites:

```no_run
fn main() {
    let hud = gamehud::setup()
        .api_key("your-api-key")
        .version("1.0.0")
        .spawn(
            gamehud_http::transport("https://www.mygamehud.com/api/v2")
                .build()
                .unwrap(),
        );

    hud.set_level("Level1");
    hud.event("game started");
    hud.event_with("Player died", [("Rank", "01 - Ensign"), ("Score", "100")]);

    // Your game goes here

    hud.blocking_flush(std::time::Duration::from_secs(5));
}
```

# Deduplication

Repeated occurrences of the same logical event don't grow the queue; they
bump the existing entry's occurrence count and refresh its payload. Which
events count as "the same" is the [`DedupPolicy`].

# Delivery

Batches are delivered at least once: entries only leave the queue when the
backend acknowledges the exact batch that contained them. Failed or
unreachable submissions leave the queue untouched and the next cycle
retries; there is no backoff beyond the fixed interval. A bounded
best-effort flush runs at shutdown via [`Client::blocking_flush`], and
events recorded right before an abrupt exit may be lost.

# Log interception

Wire your engine's log callback to [`Client::on_log`], or install
[`Client::log_hook`] as a `log` logger. Forwarding is opt-in per severity.
The SDK logs its own diagnostics through `log` with messages starting with
[`DIAG_PREFIX`], and the interceptor drops those so they can never feed
back into the queue.

# Identity

Every submission carries a device identifier (generated once, persisted
through a [`Prefs`] store) and a session identifier (fresh every run). A
store that can't persist degrades to a fresh device identifier per run
rather than failing.
*/

mod client;
mod dispatch;
mod encode;
mod internal_metrics;

pub mod device;
pub mod event;
pub mod hook;
pub mod identity;
pub mod queue;
pub mod setup;
pub mod transport;

pub use self::{
    client::Client,
    device::DeviceInfo,
    dispatch::Registration,
    event::{DedupPolicy, Event, Severity},
    hook::LogHook,
    identity::{FilePrefs, Identity, MemoryPrefs, Prefs},
    queue::EventQueue,
    setup::{setup, Setup},
    transport::{SubmitOutcome, Submission, Transport},
};

pub use gamehud_batcher::Metric;

/**
The prefix on every diagnostic line the SDK logs about itself.

The log interceptor suppresses messages starting with this prefix so the
SDK's own output can't loop back into the event queue.
*/
pub const DIAG_PREFIX: &str = "GAMEhud";

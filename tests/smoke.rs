use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};

use gamehud::{
    transport::endpoint, Client, Event, MemoryPrefs, SubmitOutcome, Submission, Transport,
};

#[derive(Clone)]
struct RecordingTransport {
    inner: Arc<Inner>,
    reachable: bool,
}

#[derive(Default)]
struct Inner {
    // Filled in after spawning so the transport can record an event while
    // a batch is in flight
    client: Mutex<Option<Client>>,
    submissions: Mutex<Vec<Submission>>,
}

impl RecordingTransport {
    fn new() -> Self {
        RecordingTransport {
            inner: Arc::new(Inner::default()),
            reachable: true,
        }
    }

    fn unreachable() -> Self {
        RecordingTransport {
            inner: Arc::new(Inner::default()),
            reachable: false,
        }
    }

    fn attach(&self, client: &Client) {
        *self.inner.client.lock().unwrap() = Some(client.clone());
    }

    fn submissions(&self) -> Vec<Submission> {
        self.inner.submissions.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn submit(
        &self,
        submission: Submission,
    ) -> Pin<Box<dyn Future<Output = SubmitOutcome> + Send + '_>> {
        let first_events_batch = {
            let mut submissions = self.inner.submissions.lock().unwrap();

            let first = !submissions
                .iter()
                .any(|submission| submission.endpoint == endpoint::EVENTS);

            let is_events = submission.endpoint == endpoint::EVENTS;

            submissions.push(submission);

            first && is_events
        };

        // An instrumentation call lands while the batch is on the wire; it
        // must survive the acknowledgement of the in-flight batch
        if first_events_batch {
            if let Some(ref client) = *self.inner.client.lock().unwrap() {
                client.record(Event::new("recorded mid-flight", "Level1"));
            }
        }

        let outcome = if self.reachable {
            SubmitOutcome::Acknowledged("0".to_owned())
        } else {
            SubmitOutcome::Unreachable
        };

        Box::pin(async move { outcome })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn acknowledged_batches_drain_and_midflight_events_survive() {
    let transport = RecordingTransport::new();

    let hud = gamehud::setup()
        .api_key("key-1")
        .version("1.0")
        // Only flush when asked to
        .send_event_delay(Duration::from_secs(3600))
        .prefs(MemoryPrefs::new())
        .spawn(transport.clone());

    transport.attach(&hud);

    hud.record(Event::new("a", "Level1"));
    hud.record(Event::new("b", "Level1"));
    hud.record(Event::new("c", "Level1"));

    assert_eq!(3, hud.pending());

    assert!(hud.blocking_flush(Duration::from_secs(10)));

    // The three snapshotted events are gone; the one recorded while the
    // batch was in flight is not
    assert_eq!(1, hud.pending());

    let submissions = transport.submissions();

    assert_eq!(
        vec![endpoint::DEVICES, endpoint::EVENTS],
        submissions
            .iter()
            .map(|submission| submission.endpoint)
            .collect::<Vec<_>>()
    );

    // Identity fields ride along on the device registration too
    assert_eq!(
        Some(&hud.identity().device_id),
        submissions[0].fields.get("gh_device_identifier")
    );

    let events: serde_json::Value =
        serde_json::from_str(submissions[1].fields.get("events").unwrap()).unwrap();
    let events = events.as_array().unwrap();

    assert_eq!(3, events.len());
    assert_eq!("a", events[0]["name"]);
    assert_eq!("Level1", events[0]["level"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_backends_leave_the_queue_intact() {
    let transport = RecordingTransport::unreachable();

    let hud = gamehud::setup()
        .api_key("key-1")
        .send_event_delay(Duration::from_secs(3600))
        .prefs(MemoryPrefs::new())
        .spawn(transport.clone());

    hud.record(Event::new("a", "Level1"));
    hud.record(Event::new("b", "Level1"));

    // The flush attempt happens and fails; nothing is lost, nothing panics
    assert!(hud.blocking_flush(Duration::from_secs(10)));

    assert_eq!(2, hud.pending());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_events_flush_as_one_entry() {
    let transport = RecordingTransport::new();

    let hud = gamehud::setup()
        .api_key("key-1")
        .send_event_delay(Duration::from_secs(3600))
        .prefs(MemoryPrefs::new())
        .spawn(transport.clone());

    hud.record(
        Event::new("Player died", "Level1")
            .with_properties([("Rank", "01 - Ensign"), ("Score", "0")]),
    );
    hud.record(
        Event::new("Player died", "Level1")
            .with_properties([("Rank", "01 - Ensign"), ("Score", "100")]),
    );

    assert_eq!(1, hud.pending());

    assert!(hud.blocking_flush(Duration::from_secs(10)));

    let submissions = transport.submissions();
    let events: serde_json::Value =
        serde_json::from_str(submissions[1].fields.get("events").unwrap()).unwrap();
    let events = events.as_array().unwrap();

    assert_eq!(1, events.len());
    assert_eq!(2, events[0]["occurrences"]);
    assert_eq!("100", events[0]["properties"]["Score"]);
}

#[test]
fn misconfigured_clients_stay_quiet() {
    let transport = RecordingTransport::new();

    let hud = gamehud::setup()
        .prefs(MemoryPrefs::new())
        .spawn(transport.clone());

    assert!(!hud.is_enabled());

    // Hooks stay safe to call; nothing is queued or sent
    hud.event("dropped");

    assert_eq!(0, hud.pending());
    assert!(transport.submissions().is_empty());
}

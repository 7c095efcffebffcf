use std::sync::Arc;

use crate::{
    event::{DedupPolicy, Event},
    internal_metrics::InternalMetrics,
};

/**
The ordered collection of pending events.

Recording is merge-or-append: an event whose dedup key matches an existing
entry folds into it instead of growing the queue, so the queue never holds
two entries describing the same logical event. Entries leave the queue only
through [`EventQueue::remove_acked`], once the batch that contained them was
acknowledged by the backend.
*/
pub struct EventQueue {
    policy: DedupPolicy,
    metrics: Option<Arc<InternalMetrics>>,
    entries: Vec<Entry>,
    next_seq: u64,
}

struct Entry {
    // Identity assigned at append; never reused
    seq: u64,
    // Bumped on every merge so in-flight acks can't remove occurrences
    // they didn't deliver
    revision: u64,
    event: Event,
}

/**
A token identifying the entries captured by [`EventQueue::snapshot`].
*/
pub struct BatchAck(Vec<(u64, u64)>);

impl EventQueue {
    pub fn new(policy: DedupPolicy) -> Self {
        EventQueue {
            policy,
            metrics: None,
            entries: Vec::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn with_metrics(mut self, metrics: Arc<InternalMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    /**
    Merge-or-append `event`.

    Always succeeds; the queue grows by at most one entry. A merge keeps
    the entry's original position, so insertion order is the flush order.
    */
    pub fn record(&mut self, event: Event) {
        if let Some(ref metrics) = self.metrics {
            metrics.event_recorded.increment();
        }

        let policy = self.policy;

        for entry in &mut self.entries {
            if policy.is_duplicate(&entry.event, &event) {
                entry.event.merge(event);
                entry.revision += 1;

                if let Some(ref metrics) = self.metrics {
                    metrics.event_merged.increment();
                }

                return;
            }
        }

        self.entries.push(Entry {
            seq: self.next_seq,
            revision: 0,
            event,
        });
        self.next_seq += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /**
    A point-in-time copy of the pending events, in insertion order, plus
    the token to remove exactly those entries later.
    */
    pub fn snapshot(&self) -> (Vec<Event>, BatchAck) {
        let events = self.entries.iter().map(|entry| entry.event.clone()).collect();
        let ack = BatchAck(
            self.entries
                .iter()
                .map(|entry| (entry.seq, entry.revision))
                .collect(),
        );

        (events, ack)
    }

    /**
    Remove the entries identified by `ack`.

    Matching is by entry identity, not value: entries recorded after the
    snapshot survive, and so does any entry that merged a new occurrence
    while the batch was in flight, since that occurrence was never
    delivered.
    */
    pub fn remove_acked(&mut self, ack: BatchAck) {
        self.entries
            .retain(|entry| !ack.0.contains(&(entry.seq, entry.revision)));
    }
}

impl gamehud_batcher::Queue for EventQueue {
    type Item = Event;
    type Batch = Vec<Event>;
    type Ack = BatchAck;

    fn push(&mut self, item: Event) {
        self.record(item);
    }

    fn remaining(&self) -> usize {
        self.len()
    }

    fn clear(&mut self) {
        self.clear();
    }

    fn snapshot(&self) -> (Vec<Event>, BatchAck) {
        self.snapshot()
    }

    fn remove_acked(&mut self, ack: BatchAck) {
        self.remove_acked(ack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::event::Severity;

    #[test]
    fn identical_keys_fold_into_one_entry() {
        let mut queue = EventQueue::new(DedupPolicy::default());

        for _ in 0..5 {
            queue.record(Event::new("shot fired", "Level1"));
        }

        assert_eq!(1, queue.len());

        let (events, _) = queue.snapshot();

        assert_eq!(5, events[0].occurrences);
    }

    #[test]
    fn distinct_keys_append() {
        let mut queue = EventQueue::new(DedupPolicy::default());

        queue.record(Event::new("shot fired", "Level1"));
        queue.record(Event::new("shot fired", "Level2"));
        queue.record(Event::new("enemy spawned", "Level1"));
        queue.record(
            Event::new("shot fired", "Level1").with_severity(Severity::Warning),
        );

        assert_eq!(4, queue.len());
    }

    #[test]
    fn newest_properties_win_on_merge() {
        let mut queue = EventQueue::new(DedupPolicy::default());

        queue.record(
            Event::new("Player died", "Level1")
                .with_properties([("Rank", "01 - Ensign"), ("Score", "0")]),
        );
        queue.record(
            Event::new("Player died", "Level1")
                .with_properties([("Rank", "01 - Ensign"), ("Score", "100")]),
        );

        assert_eq!(1, queue.len());

        let (events, _) = queue.snapshot();

        assert_eq!(2, events[0].occurrences);
        assert_eq!(Some("100"), events[0].properties.get("Score").map(|v| &**v));
    }

    #[test]
    fn acked_removal_spares_later_appends() {
        let mut queue = EventQueue::new(DedupPolicy::default());

        queue.record(Event::new("a", "Level1"));
        queue.record(Event::new("b", "Level1"));
        queue.record(Event::new("c", "Level1"));

        let (batch, ack) = queue.snapshot();
        assert_eq!(3, batch.len());

        // Recorded mid-flight; not part of the acknowledged batch
        queue.record(Event::new("d", "Level1"));

        queue.remove_acked(ack);

        assert_eq!(1, queue.len());

        let (events, _) = queue.snapshot();

        assert_eq!("d", events[0].name);
    }

    #[test]
    fn acked_removal_spares_entries_merged_mid_flight() {
        let mut queue = EventQueue::new(DedupPolicy::default());

        queue.record(Event::new("a", "Level1"));

        let (_, ack) = queue.snapshot();

        // The same logical event happens again while the batch is in
        // flight; its occurrence was not delivered, so the entry stays
        queue.record(Event::new("a", "Level1"));

        queue.remove_acked(ack);

        assert_eq!(1, queue.len());

        let (events, _) = queue.snapshot();

        assert_eq!(2, events[0].occurrences);
    }

    #[test]
    fn merges_preserve_insertion_order() {
        let mut queue = EventQueue::new(DedupPolicy::default());

        queue.record(Event::new("a", "Level1"));
        queue.record(Event::new("b", "Level1"));
        queue.record(Event::new("a", "Level1"));

        let (events, _) = queue.snapshot();

        assert_eq!(
            vec!["a", "b"],
            events.iter().map(|event| &*event.name).collect::<Vec<_>>()
        );
    }

    #[test]
    fn legacy_policy_keys_on_stack_traces() {
        let mut queue = EventQueue::new(DedupPolicy::NameSeverityStackTrace);

        queue.record(
            Event::new("boom", "Level1")
                .with_severity(Severity::Error)
                .with_stack_trace("trace-1"),
        );
        queue.record(
            Event::new("boom", "Level2")
                .with_severity(Severity::Error)
                .with_stack_trace("trace-1"),
        );
        queue.record(
            Event::new("boom", "Level1")
                .with_severity(Severity::Error)
                .with_stack_trace("trace-2"),
        );

        // The first two merge despite different levels; the third has a
        // different trace and stays separate
        assert_eq!(2, queue.len());
    }
}

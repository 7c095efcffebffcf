use crate::internal_metrics::InternalMetrics;
use std::{
    any::Any,
    future::{self, Future},
    mem,
    panic::{self, AssertUnwindSafe, UnwindSafe},
    pin::{pin, Pin},
    sync::{Arc, Mutex, OnceLock},
    task,
    task::{Context, Poll},
    thread,
    time::Duration,
};

mod internal_metrics;

pub use internal_metrics::Metric;

type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/**
A queue of pending items that supports point-in-time snapshots and
acknowledged removal.

Items pushed while a snapshot is in flight are not part of that snapshot
and survive its removal. How duplicate items are folded together is up to
the implementation of [`Queue::push`].
*/
pub trait Queue {
    type Item;

    /**
    The payload handed to the batch processor.
    */
    type Batch;

    /**
    A token identifying the snapshotted entries, used to remove exactly
    those entries once the batch is acknowledged.
    */
    type Ack;

    fn push(&mut self, item: Self::Item);

    fn remaining(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn clear(&mut self);

    fn snapshot(&self) -> (Self::Batch, Self::Ack);

    fn remove_acked(&mut self, ack: Self::Ack);
}

/**
Create a channel over `queue` holding at most `max_capacity` items.

The [`Sender`] records items into the shared queue; the [`Receiver`] drives
the periodic flush cycle. If the queue fills up (the destination has been
unavailable for a long time) it is cleared rather than growing without bound.
*/
pub fn channel<Q: Queue>(queue: Q, max_capacity: usize) -> (Sender<Q>, Receiver<Q>) {
    let shared = Arc::new(Shared {
        metrics: Default::default(),
        state: Mutex::new(State {
            queue,
            watchers: Watchers::new(),
            waker: None,
            is_open: true,
            is_paused: false,
            is_flushing: false,
            flush_requested: false,
        }),
    });

    (
        Sender {
            max_capacity,
            shared: shared.clone(),
        },
        Receiver {
            interval: DEFAULT_INTERVAL,
            shared,
        },
    )
}

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

pub struct Sender<Q> {
    max_capacity: usize,
    shared: Arc<Shared<Q>>,
}

impl<Q> Drop for Sender<Q> {
    fn drop(&mut self) {
        self.shared.state.lock().unwrap().is_open = false;
        self.shared.wake();
    }
}

impl<Q: Queue> Sender<Q> {
    pub fn send(&self, item: Q::Item) {
        let mut state = self.shared.state.lock().unwrap();

        // If the channel is closed then return without recording the item
        if !state.is_open {
            return;
        }

        // If the queue is full then drop it; this prevents OOMing
        // when the destination is unavailable for a long stretch
        if state.queue.remaining() >= self.max_capacity {
            state.queue.clear();
            self.shared.metrics.queue_overflow.increment();
        }

        state.queue.push(item);
    }

    /**
    The number of items currently pending.
    */
    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().queue.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /**
    Suspend or resume the effect of the flush cycle.

    While paused the receiver keeps ticking but skips flushing, so pending
    items accumulate. An explicit [`Sender::request_flush`] and the final
    flush on close both override the pause.
    */
    pub fn set_paused(&self, paused: bool) {
        self.shared.state.lock().unwrap().is_paused = paused;
    }

    /**
    Ask the receiver to run a flush cycle now instead of waiting for the
    next tick.
    */
    pub fn request_flush(&self) {
        self.shared.state.lock().unwrap().flush_requested = true;
        self.shared.wake();
    }

    /**
    Register `watcher` to be called after the next flush cycle completes,
    whether or not it delivered anything.
    */
    pub fn on_next_flush(&self, watcher: impl FnOnce() + Send + 'static) {
        let watcher = Box::new(watcher);

        let mut state = self.shared.state.lock().unwrap();

        // If there's nothing in flight and nothing pending then there's
        // nothing to wait for; call the watcher without scheduling it
        if !state.is_flushing && (state.queue.is_empty() || !state.is_open) {
            // Drop the lock before signalling the watcher
            drop(state);

            watcher();
        } else {
            state.watchers.push(watcher);
        }
    }

    pub fn sample_metrics(&self) -> impl Iterator<Item = Metric> + 'static {
        self.shared.sample_metrics()
    }
}

pub struct Receiver<Q> {
    interval: Duration,
    shared: Arc<Shared<Q>>,
}

impl<Q> Drop for Receiver<Q> {
    fn drop(&mut self) {
        self.shared.state.lock().unwrap().is_open = false;
    }
}

/**
An error processing a batch.

The queue entries for the batch remain pending and will be retried on a
later cycle; there is no immediate retry.
*/
pub struct BatchError {
    _priv: (),
}

impl BatchError {
    pub fn retry() -> Self {
        BatchError { _priv: () }
    }
}

impl<Q: Queue> Receiver<Q> {
    /**
    The time between flush cycles.
    */
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /**
    Register a callback invoked when the channel needs the driver to wake
    early, because a flush was requested or the channel closed.
    */
    pub fn set_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        self.shared.state.lock().unwrap().waker = Some(Arc::new(waker));
    }

    /**
    Drive the flush cycle on the calling thread.

    This is a synchronous version of [`Receiver::exec`] for hosts without
    an async runtime. The interval sleep is not interruptible here, so
    requested flushes take effect on the next tick.
    */
    pub fn blocking_exec(
        self,
        mut on_batch: impl FnMut(Q::Batch) -> Result<(), BatchError>,
    ) -> Result<(), Error> {
        static WAKER: OnceLock<Arc<NeverWake>> = OnceLock::new();

        // A waker that does nothing; the tasks it runs are fully
        // synchronous so there's never any notifications to issue
        struct NeverWake;

        impl task::Wake for NeverWake {
            fn wake(self: Arc<Self>) {}
        }

        // The future is polled to completion here, so we can pin
        // it directly on the stack
        let mut fut = pin!(self.exec(
            |delay| future::ready(thread::sleep(delay)),
            move |batch| future::ready(on_batch(batch)),
        ));

        // Get a context for our synchronous task
        let waker = WAKER.get_or_init(|| Arc::new(NeverWake)).clone().into();
        let mut cx = task::Context::from_waker(&waker);

        // Drive the task to completion; it should complete in one go,
        // but may eagerly return as soon as it hits an await point, so
        // just to be sure we continuously poll it
        loop {
            match fut.as_mut().poll(&mut cx) {
                task::Poll::Ready(r) => return r,
                task::Poll::Pending => continue,
            }
        }
    }

    /**
    Drive the flush cycle.

    Each iteration waits for the configured interval (`wait` should also
    return early when the waker registered through [`Receiver::set_waker`]
    fires), snapshots the queue, and hands the batch to `on_batch`. When
    `on_batch` resolves to `Ok` the snapshotted entries are removed; on
    [`BatchError`] the queue is left untouched and the next tick retries
    naturally. Returns after one final best-effort cycle once the sender
    is dropped.
    */
    pub async fn exec<
        FBatch: Future<Output = Result<(), BatchError>>,
        FWait: Future<Output = ()>,
    >(
        self,
        mut wait: impl FnMut(Duration) -> FWait,
        mut on_batch: impl FnMut(Q::Batch) -> FBatch,
    ) -> Result<(), Error> {
        enum Tick<B, A> {
            Skip,
            Empty { watchers: Watchers, is_open: bool },
            Flush {
                batch: B,
                ack: A,
                watchers: Watchers,
                is_open: bool,
            },
        }

        loop {
            let wait_for_tick = {
                let state = self.shared.state.lock().unwrap();

                state.is_open && !state.flush_requested
            };

            if wait_for_tick {
                wait(self.interval).await;
            }

            // Snapshot under the lock; the queue itself stays in place so
            // senders keep recording into it while the batch is in flight
            let tick = {
                let mut state = self.shared.state.lock().unwrap();

                let is_open = state.is_open;
                let forced = mem::take(&mut state.flush_requested);

                if state.is_paused && !forced && is_open {
                    Tick::Skip
                } else if state.queue.is_empty() {
                    state.is_flushing = false;

                    Tick::Empty {
                        watchers: mem::take(&mut state.watchers),
                        is_open,
                    }
                } else {
                    state.is_flushing = true;

                    let (batch, ack) = state.queue.snapshot();

                    Tick::Flush {
                        batch,
                        ack,
                        watchers: mem::take(&mut state.watchers),
                        is_open,
                    }
                }
            };

            match tick {
                Tick::Skip => (),
                Tick::Empty { watchers, is_open } => {
                    watchers.notify();

                    // The channel is closed and drained; exit the loop and
                    // drop the receiver
                    if !is_open {
                        return Ok(());
                    }
                }
                Tick::Flush {
                    batch,
                    ack,
                    watchers,
                    is_open,
                } => {
                    // Run the batch outside of the lock, taking care not to panic
                    let delivered =
                        match panic::catch_unwind(AssertUnwindSafe(|| on_batch(batch))) {
                            Ok(fut) => match CatchUnwind(AssertUnwindSafe(fut)).await {
                                Ok(Ok(())) => {
                                    self.shared.metrics.queue_batch_processed.increment();

                                    true
                                }
                                Ok(Err(BatchError { .. })) => {
                                    self.shared.metrics.queue_batch_failed.increment();

                                    false
                                }
                                Err(_) => {
                                    self.shared.metrics.queue_batch_panicked.increment();

                                    false
                                }
                            },
                            Err(_) => {
                                self.shared.metrics.queue_batch_panicked.increment();

                                false
                            }
                        };

                    {
                        let mut state = self.shared.state.lock().unwrap();

                        // Only acknowledged entries leave the queue; anything
                        // recorded or merged since the snapshot survives
                        if delivered {
                            state.queue.remove_acked(ack);
                        }

                        state.is_flushing = false;
                    }

                    watchers.notify();

                    // The channel closed while this batch was pending; it got
                    // its one best-effort attempt, so exit
                    if !is_open {
                        return Ok(());
                    }
                }
            }
        }
    }

    pub fn sample_metrics(&self) -> impl Iterator<Item = Metric> + 'static {
        self.shared.sample_metrics()
    }
}

struct CatchUnwind<F>(F);

impl<F: Future + UnwindSafe> Future for CatchUnwind<F> {
    type Output = Result<F::Output, Box<dyn Any + Send>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: `CatchUnwind` uses structural pinning
        let f = unsafe { Pin::map_unchecked_mut(self, |x| &mut x.0) };

        panic::catch_unwind(AssertUnwindSafe(|| f.poll(cx)))?.map(Ok)
    }
}

struct Shared<Q> {
    metrics: InternalMetrics,
    state: Mutex<State<Q>>,
}

impl<Q> Shared<Q> {
    fn wake(&self) {
        let waker = self.state.lock().unwrap().waker.clone();

        if let Some(waker) = waker {
            waker();
        }
    }
}

impl<Q: Queue> Shared<Q> {
    fn sample_metrics(&self) -> impl Iterator<Item = Metric> + 'static {
        let queue_length = { self.state.lock().unwrap().queue.remaining() };

        self.metrics.sample().chain(Some(Metric {
            name: "queue_length",
            value: queue_length,
        }))
    }
}

struct State<Q> {
    queue: Q,
    watchers: Watchers,
    waker: Option<Arc<dyn Fn() + Send + Sync>>,
    is_open: bool,
    is_paused: bool,
    is_flushing: bool,
    flush_requested: bool,
}

struct Watchers(Vec<Watcher>);

type Watcher = Box<dyn FnOnce() + Send>;

impl Default for Watchers {
    fn default() -> Self {
        Watchers::new()
    }
}

impl Watchers {
    fn new() -> Self {
        Watchers(Vec::new())
    }

    fn push(&mut self, watcher: Watcher) {
        self.0.push(watcher);
    }

    fn notify(self) {
        for watcher in self.0 {
            let _ = panic::catch_unwind(AssertUnwindSafe(watcher));
        }
    }
}

pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct TestQueue(Vec<u32>);

    impl Queue for TestQueue {
        type Item = u32;
        type Batch = Vec<u32>;
        type Ack = usize;

        fn push(&mut self, item: u32) {
            self.0.push(item);
        }

        fn remaining(&self) -> usize {
            self.0.len()
        }

        fn clear(&mut self) {
            self.0.clear();
        }

        fn snapshot(&self) -> (Vec<u32>, usize) {
            (self.0.clone(), self.0.len())
        }

        fn remove_acked(&mut self, ack: usize) {
            self.0.drain(..ack);
        }
    }

    #[test]
    fn delivered_batches_are_removed() {
        let (sender, receiver) = channel(TestQueue::default(), 100);

        sender.send(1);
        sender.send(2);
        drop(sender);

        let mut delivered = Vec::new();

        receiver
            .interval(Duration::from_millis(1))
            .blocking_exec(|batch| {
                delivered.extend(batch);

                Ok(())
            })
            .unwrap();

        assert_eq!(vec![1, 2], delivered);
    }

    #[test]
    fn failed_batches_get_a_single_attempt_on_close() {
        let (sender, receiver) = channel(TestQueue::default(), 100);

        sender.send(1);
        drop(sender);

        let mut attempts = 0;

        receiver
            .interval(Duration::from_millis(1))
            .blocking_exec(|_| {
                attempts += 1;

                Err(BatchError::retry())
            })
            .unwrap();

        assert_eq!(1, attempts);
    }

    #[test]
    fn full_queues_are_cleared() {
        let (sender, _receiver) = channel(TestQueue::default(), 2);

        sender.send(1);
        sender.send(2);
        sender.send(3);

        assert_eq!(1, sender.len());

        let overflow = sender
            .sample_metrics()
            .find(|metric| metric.name == "queue_overflow")
            .unwrap();

        assert_eq!(1, overflow.value);
    }

    #[test]
    fn on_next_flush_fires_immediately_when_idle() {
        let (sender, _receiver) = channel(TestQueue::default(), 100);

        let notified = Arc::new(AtomicBool::new(false));

        sender.on_next_flush({
            let notified = notified.clone();

            move || notified.store(true, Ordering::Relaxed)
        });

        assert!(notified.load(Ordering::Relaxed));
    }

    #[test]
    fn paused_channels_skip_flushing() {
        let (sender, receiver) = channel(TestQueue::default(), 100);

        sender.set_paused(true);
        sender.send(1);

        let attempts = Arc::new(AtomicUsize::new(0));

        let handle = thread::spawn({
            let attempts = attempts.clone();

            move || {
                receiver
                    .interval(Duration::from_millis(1))
                    .blocking_exec(move |_| {
                        attempts.fetch_add(1, Ordering::Relaxed);

                        Ok(())
                    })
            }
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(0, attempts.load(Ordering::Relaxed));

        sender.set_paused(false);
        drop(sender);

        handle.join().unwrap().unwrap();

        assert!(attempts.load(Ordering::Relaxed) >= 1);
    }
}

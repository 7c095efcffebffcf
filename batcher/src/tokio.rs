/*!
Run channels in a `tokio` runtime.
*/

use std::{
    cmp,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{BatchError, Queue, Receiver, Sender};

/**
Spawn a worker to run the [`Receiver`] on a `tokio` runtime.

If the current thread is a `tokio` thread, then the worker will be spawned onto its runtime. If the current thread is not a `tokio` thread, then a single-threaded `tokio` runtime will be set up in a dedicated thread to run it.

The interval sleep is wired to the channel's waker, so [`Sender::request_flush`] and closing the channel wake the worker immediately instead of waiting out the tick.
*/
pub fn spawn<
    Q: Queue + Send + 'static,
    F: Future<Output = Result<(), BatchError>> + Send + 'static,
>(
    receiver: Receiver<Q>,
    on_batch: impl FnMut(Q::Batch) -> F + Send + 'static,
) where
    Q::Batch: Send + 'static,
    Q::Ack: Send + 'static,
{
    let wake = Arc::new(tokio::sync::Notify::new());

    receiver.set_waker({
        let wake = wake.clone();

        move || wake.notify_one()
    });

    let receive = async move {
        receiver
            .exec(
                move |delay| {
                    let wake = wake.clone();

                    async move {
                        // Wake on the earlier of the tick and a notification;
                        // a notification issued before this call is not lost,
                        // it's held as a permit by the `Notify`
                        let _ = tokio::time::timeout(delay, wake.notified()).await;
                    }
                },
                on_batch,
            )
            .await
    };

    match tokio::runtime::Handle::try_current() {
        // If we're on a `tokio` thread then spawn on it
        Ok(handle) => {
            handle.spawn(receive);
        }
        // If we're not on a `tokio` thread then spawn a
        // background thread and run the work there
        Err(_) => {
            std::thread::spawn(move || {
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap()
                    .block_on(receive)
                    .unwrap();
            });
        }
    }
}

/**
Wait for a channel potentially running on a `tokio` thread to attempt delivery of all items active at the point this call was made.

If the current thread is a `tokio` thread then this call will be executed using [`tokio::task::block_in_place`] to avoid starving other work.

Returns `true` when the flush completed within `timeout`.
*/
pub fn blocking_flush<Q: Queue>(sender: &Sender<Q>, timeout: Duration) -> bool {
    tokio::task::block_in_place(|| {
        let (notifier, mut notified) = tokio::sync::oneshot::channel();

        sender.on_next_flush(move || {
            let _ = notifier.send(());
        });

        // If there's nothing to flush then return immediately
        if notified.try_recv().is_ok() {
            return true;
        }

        // Don't wait out the interval; have the worker flush now
        sender.request_flush();

        match tokio::runtime::Handle::try_current() {
            // If we're on a `tokio` thread then await the receiver
            Ok(handle) => handle.block_on(async {
                match tokio::time::timeout(timeout, notified).await {
                    // The notifier was triggered
                    Ok(Ok(())) => true,
                    // Unexpected hangup; this should mean the channel was closed
                    Ok(Err(_)) => true,
                    // The timeout was reached instead
                    Err(_) => false,
                }
            }),
            // If we're not on a `tokio` thread then wait for
            // a notification
            Err(_) => {
                let now = Instant::now();
                let mut wait = Duration::from_micros(1);
                let max_wait_step = cmp::max(timeout / 3, Duration::from_micros(1));

                while now.elapsed() < timeout {
                    if notified.try_recv().is_ok() {
                        return true;
                    }

                    // Apply some exponential backoff to avoid spinning
                    // Chances are if data isn't flushed immediately that
                    // it'll be waiting on some network IO and could
                    // be a while
                    std::thread::sleep(wait);
                    wait += cmp::min(wait * 2, max_wait_step);
                }

                false
            }
        }
    })
}

use std::sync::atomic::{AtomicUsize, Ordering};

use gamehud_batcher::Metric;

macro_rules! metrics {
    (
        $container:ident {
            $(
                $(#[$meta:meta])*
                $metric:ident: Counter,
            )*
        }
    ) => {
        #[derive(Default)]
        pub(crate) struct $container {
            $(
                $(#[$meta])*
                pub(crate) $metric: Counter,
            )*
        }

        impl $container {
            pub(crate) fn sample(&self) -> impl Iterator<Item = Metric> + 'static {
                let $container { $($metric),* } = self;

                [$(
                    Metric {
                        name: stringify!($metric),
                        value: $metric.sample(),
                    },
                )*]
                .into_iter()
            }
        }
    };
}

#[derive(Default)]
pub(crate) struct Counter(AtomicUsize);

impl Counter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sample(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

metrics!(
    InternalMetrics {
        /**
        An event was recorded through a hook.
        */
        event_recorded: Counter,
        /**
        A recorded event folded into an existing queue entry.
        */
        event_merged: Counter,
        /**
        A hook call was dropped by a suppression rule before reaching the queue.
        */
        event_suppressed: Counter,
        /**
        An event could not be encoded and was dropped from its batch.
        */
        event_encode_failed: Counter,
        /**
        A batch was submitted and acknowledged.
        */
        batch_sent: Counter,
        /**
        A batch was submitted but the backend refused it.
        */
        batch_rejected: Counter,
        /**
        A submission found the backend unreachable.
        */
        transport_unreachable: Counter,
        /**
        A registration step failed and will be retried where the protocol allows.
        */
        registration_failed: Counter,
    }
);

use std::sync::atomic::{AtomicUsize, Ordering};

/**
A sampled counter describing the channel's own activity.
*/
#[derive(Debug, Clone, Copy)]
pub struct Metric {
    pub name: &'static str,
    pub value: usize,
}

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
            pub(crate) fn sample(&self) -> impl Iterator<Item = crate::Metric> + 'static {
                let $container { $($metric),* } = self;

                [$(
                    crate::Metric {
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
        The queue hit its maximum capacity and was cleared.
        */
        queue_overflow: Counter,
        /**
        A batch was submitted and acknowledged; its entries were removed.
        */
        queue_batch_processed: Counter,
        /**
        A batch submission failed; its entries remain queued for a later cycle.
        */
        queue_batch_failed: Counter,
        /**
        Batch processing panicked; the panic was contained.
        */
        queue_batch_panicked: Counter,
    }
);

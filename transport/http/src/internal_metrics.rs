use std::sync::atomic::{AtomicUsize, Ordering};

use gamehud::Metric;

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
        A connection to the backend was established successfully.
        */
        transport_conn_established: Counter,
        /**
        A connection to the backend could not be established.
        */
        transport_conn_failed: Counter,
        /**
        A TLS handshake with the backend was made successfully.
        */
        transport_conn_tls_handshake: Counter,
        /**
        A TLS handshake with the backend could not be made.
        */
        transport_conn_tls_failed: Counter,
        /**
        A request was sent successfully.
        */
        transport_request_sent: Counter,
        /**
        A request could not be sent.
        */
        transport_request_failed: Counter,
        /**
        A request was sent and responded with a successful status code.
        */
        request_acknowledged: Counter,
        /**
        A request was sent but responded with a failed status code.
        */
        request_rejected: Counter,
    }
);

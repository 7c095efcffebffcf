use crate::{client::Client, event::Severity};

/**
Forwards a host's `log` records into [`Client::on_log`].

Install it with `log::set_boxed_logger` (or compose it into an existing
logger). The usual interception rules apply: records are filtered by the
per-severity opt-ins, and the SDK's own diagnostics are recognized by
their prefix and dropped.
*/
pub struct LogHook {
    client: Client,
}

impl LogHook {
    pub(crate) fn new(client: Client) -> Self {
        LogHook { client }
    }
}

impl log::Log for LogHook {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let severity = match record.level() {
            log::Level::Error => Severity::Error,
            log::Level::Warn => Severity::Warning,
            log::Level::Info | log::Level::Debug | log::Level::Trace => Severity::Info,
        };

        self.client
            .on_log(&record.args().to_string(), None, severity);
    }

    fn flush(&self) {}
}

use std::{collections::BTreeMap, future::Future, pin::Pin};

/**
Endpoint names a [`Transport`] may be asked to submit to.
*/
pub mod endpoint {
    pub const DEVICES: &str = "devices";
    pub const EVENTS: &str = "events";

    // Legacy handshake protocol
    pub const MACHINES: &str = "machines";
    pub const GAME_SESSIONS: &str = "game_sessions";
    pub const GAME_EVENTS: &str = "game_events";
}

/**
One request's worth of data: an endpoint name and flat string fields.

Structured payloads (the event batch) travel as a JSON document inside a
single field, so transports never need to understand event semantics.
*/
#[derive(Debug, Clone)]
pub struct Submission {
    pub endpoint: &'static str,
    pub fields: BTreeMap<String, String>,
}

/**
The result of attempting a submission.
*/
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /**
    The backend accepted the submission. Carries the response body; the
    legacy handshake parses resource identifiers out of it.
    */
    Acknowledged(String),
    /**
    The backend was reached but refused the submission.
    */
    Rejected(String),
    /**
    The backend could not be reached at all. Not an error in itself;
    pending events are retried on a later cycle.
    */
    Unreachable,
}

/**
The network collaborator.

`gamehud_http` ships a hyper-based implementation; tests script their own.
Implementations report every failure through [`SubmitOutcome`] rather than
panicking or returning errors, so a broken network can never take the host
application down.
*/
pub trait Transport {
    fn submit(
        &self,
        submission: Submission,
    ) -> Pin<Box<dyn Future<Output = SubmitOutcome> + Send + '_>>;
}

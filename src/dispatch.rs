use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use gamehud_batcher::BatchError;

use crate::{
    device::DeviceInfo,
    encode,
    event::Event,
    identity::{Identity, Prefs, MACHINE_ID_KEY},
    internal_metrics::InternalMetrics,
    transport::{SubmitOutcome, Submission, Transport},
};

/**
Which startup registration protocol the dispatcher speaks.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Registration {
    /**
    Submit device telemetry once per run, fire-and-forget. Event delivery
    never waits on the outcome.
    */
    #[default]
    DeviceInfo,
    /**
    The legacy two-phase handshake: register a "machine", then a
    "game session", each returning a numeric id in the response body.
    Event delivery is gated on the session id; until the handshake
    completes, batches stay queued and the handshake is retried each
    cycle. The machine id is persisted and reused across runs.
    */
    Handshake,
}

#[derive(Clone, Copy)]
enum RegState {
    Pending,
    Machine { machine_id: i64 },
    Ready { session_id: Option<i64> },
}

/**
Owns one delivery attempt per flush cycle: registration gating, encoding,
submission, and the ack/reject/unreachable bookkeeping.

Failures never escape a cycle; they surface as one diagnostic and a
[`BatchError`] that leaves the queue for the next tick.
*/
pub(crate) struct Dispatcher {
    transport: Box<dyn Transport + Send + Sync>,
    prefs: Mutex<Box<dyn Prefs + Send>>,
    identity: Identity,
    api_key: String,
    game_id: Option<u64>,
    version: Option<String>,
    device_info: DeviceInfo,
    registration: Registration,
    reg_state: Mutex<RegState>,
    unreachable: AtomicBool,
    metrics: Arc<InternalMetrics>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport: Box<dyn Transport + Send + Sync>,
        prefs: Box<dyn Prefs + Send>,
        identity: Identity,
        api_key: String,
        game_id: Option<u64>,
        version: Option<String>,
        device_info: DeviceInfo,
        registration: Registration,
        metrics: Arc<InternalMetrics>,
    ) -> Self {
        Dispatcher {
            transport,
            prefs: Mutex::new(prefs),
            identity,
            api_key,
            game_id,
            version,
            device_info,
            registration,
            reg_state: Mutex::new(RegState::Pending),
            unreachable: AtomicBool::new(false),
            metrics,
        }
    }

    pub(crate) async fn on_batch(&self, batch: Vec<Event>) -> Result<(), BatchError> {
        let session_id = self.ensure_registered().await?;

        let submission = match self.registration {
            Registration::DeviceInfo => encode::events(
                &batch,
                &self.identity,
                &self.api_key,
                self.version.as_deref(),
                &self.metrics,
            ),
            Registration::Handshake => encode::legacy_events(
                &batch,
                self.game_id.unwrap_or_default(),
                &self.api_key,
                session_id.unwrap_or_default(),
                &self.metrics,
            ),
        };

        match self.transport.submit(submission).await {
            SubmitOutcome::Acknowledged(_) => {
                self.reachable();
                self.metrics.batch_sent.increment();

                Ok(())
            }
            SubmitOutcome::Rejected(body) => {
                self.metrics.batch_rejected.increment();

                log::error!("GAMEhud event submission was rejected: {body}");

                Err(BatchError::retry())
            }
            SubmitOutcome::Unreachable => {
                self.note_unreachable();

                Err(BatchError::retry())
            }
        }
    }

    async fn ensure_registered(&self) -> Result<Option<i64>, BatchError> {
        if let RegState::Ready { session_id } = *self.reg_state.lock().unwrap() {
            return Ok(session_id);
        }

        match self.registration {
            Registration::DeviceInfo => {
                // One best-effort attempt per run; the outcome is not
                // allowed to gate event delivery
                let submission = encode::device(
                    &self.device_info,
                    &self.identity,
                    &self.api_key,
                    self.version.as_deref(),
                );

                match self.transport.submit(submission).await {
                    SubmitOutcome::Acknowledged(_) => {
                        self.reachable();

                        log::debug!("GAMEhud device registered");
                    }
                    SubmitOutcome::Rejected(body) => {
                        self.metrics.registration_failed.increment();

                        log::warn!("GAMEhud device registration was rejected: {body}");
                    }
                    SubmitOutcome::Unreachable => {
                        self.metrics.registration_failed.increment();
                        self.note_unreachable();
                    }
                }

                *self.reg_state.lock().unwrap() = RegState::Ready { session_id: None };

                Ok(None)
            }
            Registration::Handshake => {
                let machine_id = self.ensure_machine().await?;
                let session_id = self.register_session(machine_id).await?;

                *self.reg_state.lock().unwrap() = RegState::Ready {
                    session_id: Some(session_id),
                };

                log::debug!("GAMEhud session registered: {session_id}");

                Ok(Some(session_id))
            }
        }
    }

    async fn ensure_machine(&self) -> Result<i64, BatchError> {
        if let RegState::Machine { machine_id } = *self.reg_state.lock().unwrap() {
            return Ok(machine_id);
        }

        // A machine registered by an earlier run is reused
        if let Some(machine_id) = self.prefs.lock().unwrap().get_int(MACHINE_ID_KEY) {
            *self.reg_state.lock().unwrap() = RegState::Machine { machine_id };

            return Ok(machine_id);
        }

        let submission = encode::legacy_machine(
            &self.device_info,
            self.game_id.unwrap_or_default(),
            &self.api_key,
        );

        let body = self.acknowledged(submission).await?;
        let machine_id = self.parse_handle("machine", &body)?;

        self.prefs.lock().unwrap().set_int(MACHINE_ID_KEY, machine_id);
        *self.reg_state.lock().unwrap() = RegState::Machine { machine_id };

        log::debug!("GAMEhud machine registered: {machine_id}");

        Ok(machine_id)
    }

    async fn register_session(&self, machine_id: i64) -> Result<i64, BatchError> {
        let submission = encode::legacy_game_session(
            machine_id,
            self.version.as_deref(),
            self.game_id.unwrap_or_default(),
            &self.api_key,
        );

        let body = self.acknowledged(submission).await?;

        self.parse_handle("session", &body)
    }

    async fn acknowledged(&self, submission: Submission) -> Result<String, BatchError> {
        match self.transport.submit(submission).await {
            SubmitOutcome::Acknowledged(body) => {
                self.reachable();

                Ok(body)
            }
            SubmitOutcome::Rejected(body) => {
                self.metrics.registration_failed.increment();

                log::error!("GAMEhud registration was rejected: {body}");

                Err(BatchError::retry())
            }
            SubmitOutcome::Unreachable => {
                self.metrics.registration_failed.increment();
                self.note_unreachable();

                Err(BatchError::retry())
            }
        }
    }

    fn parse_handle(&self, what: &str, body: &str) -> Result<i64, BatchError> {
        match body.trim().parse() {
            Ok(id) => Ok(id),
            Err(_) => {
                self.metrics.registration_failed.increment();

                log::error!("GAMEhud could not parse a {what} id out of {body:?}");

                Err(BatchError::retry())
            }
        }
    }

    fn reachable(&self) {
        self.unreachable.store(false, Ordering::Relaxed);
    }

    fn note_unreachable(&self) {
        self.metrics.transport_unreachable.increment();

        // Log once per transition into the unreachable state, not per tick
        if !self.unreachable.swap(true, Ordering::Relaxed) {
            log::warn!("GAMEhud backend is unreachable; queued events will be retried");
        }
    }
}

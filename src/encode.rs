use std::collections::BTreeMap;

use chrono::Utc;

use crate::{
    device::DeviceInfo,
    event::Event,
    identity::Identity,
    internal_metrics::InternalMetrics,
    transport::{endpoint, Submission},
};

pub(crate) fn events(
    batch: &[Event],
    identity: &Identity,
    api_key: &str,
    version: Option<&str>,
    metrics: &InternalMetrics,
) -> Submission {
    let mut fields = BTreeMap::new();

    identity_fields(&mut fields, identity, api_key, version);
    fields.insert("events".to_owned(), events_json(batch, metrics));

    Submission {
        endpoint: endpoint::EVENTS,
        fields,
    }
}

pub(crate) fn device(
    info: &DeviceInfo,
    identity: &Identity,
    api_key: &str,
    version: Option<&str>,
) -> Submission {
    let mut fields: BTreeMap<_, _> = info.fields(|key| key.to_owned()).into_iter().collect();

    identity_fields(&mut fields, identity, api_key, version);

    Submission {
        endpoint: endpoint::DEVICES,
        fields,
    }
}

pub(crate) fn legacy_events(
    batch: &[Event],
    game_id: u64,
    api_key: &str,
    session_id: i64,
    metrics: &InternalMetrics,
) -> Submission {
    let mut fields = BTreeMap::new();

    legacy_fields(&mut fields, game_id, api_key);
    fields.insert("game_session_id".to_owned(), session_id.to_string());
    fields.insert("game_events".to_owned(), events_json(batch, metrics));

    Submission {
        endpoint: endpoint::GAME_EVENTS,
        fields,
    }
}

pub(crate) fn legacy_machine(info: &DeviceInfo, game_id: u64, api_key: &str) -> Submission {
    let mut fields: BTreeMap<_, _> = info
        .fields(|key| format!("machine[{key}]"))
        .into_iter()
        .collect();

    legacy_fields(&mut fields, game_id, api_key);

    Submission {
        endpoint: endpoint::MACHINES,
        fields,
    }
}

pub(crate) fn legacy_game_session(
    machine_id: i64,
    version: Option<&str>,
    game_id: u64,
    api_key: &str,
) -> Submission {
    let mut fields = BTreeMap::new();

    legacy_fields(&mut fields, game_id, api_key);
    fields.insert("game_session[machine_id]".to_owned(), machine_id.to_string());

    if let Some(version) = version {
        fields.insert("game_session[version]".to_owned(), version.to_owned());
    }

    Submission {
        endpoint: endpoint::GAME_SESSIONS,
        fields,
    }
}

// Identity fields ride along on every request in the default protocol
fn identity_fields(
    fields: &mut BTreeMap<String, String>,
    identity: &Identity,
    api_key: &str,
    version: Option<&str>,
) {
    fields.insert("gh_api_key".to_owned(), api_key.to_owned());
    fields.insert(
        "gh_device_identifier".to_owned(),
        identity.device_id.clone(),
    );
    fields.insert(
        "gh_session_identifier".to_owned(),
        identity.session_id.clone(),
    );
    fields.insert("gh_submitted_at".to_owned(), Utc::now().to_rfc3339());

    if let Some(version) = version {
        fields.insert("version".to_owned(), version.to_owned());
    }
}

fn legacy_fields(fields: &mut BTreeMap<String, String>, game_id: u64, api_key: &str) {
    fields.insert("game_id".to_owned(), game_id.to_string());
    fields.insert("game_api_key".to_owned(), api_key.to_owned());
}

/**
The whole batch as one JSON array.

An event that fails to encode is dropped from the submission on its own
rather than holding the batch hostage; it leaves the queue when the rest
of its batch is acknowledged.
*/
fn events_json(batch: &[Event], metrics: &InternalMetrics) -> String {
    let mut encoded = Vec::with_capacity(batch.len());

    for event in batch {
        match serde_json::to_value(event) {
            Ok(value) => encoded.push(value),
            Err(err) => {
                metrics.event_encode_failed.increment();

                log::warn!("GAMEhud dropped an event that failed to encode: {err}");
            }
        }
    }

    serde_json::Value::Array(encoded).to_string()
}

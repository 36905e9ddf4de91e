//! Platform-specific payload formatters
//!
//! Each destination platform gets the same event data in the shape it
//! expects. Formatting is pure; any failure falls back to the generic
//! shape rather than losing the delivery.

use serde_json::{json, Value};
use tracing::warn;

use crate::types::{ChainEvent, WebhookFormat};

/// Formats an event for the given platform, falling back to the generic
/// shape if the platform formatter cannot produce a payload.
pub fn format_payload(event: &ChainEvent, format: WebhookFormat) -> Value {
    let result = match format {
        WebhookFormat::Generic => Ok(generic(event)),
        WebhookFormat::Zapier => zapier(event),
        WebhookFormat::Make => make(event),
        WebhookFormat::N8n => n8n(event),
    };

    match result {
        Ok(payload) => payload,
        Err(reason) => {
            warn!("Formatter {format:?} failed ({reason}), falling back to generic");
            generic(event)
        }
    }
}

/// Canonical payload shape. All other formats are derived from the same
/// fields.
pub fn generic(event: &ChainEvent) -> Value {
    json!({
        "contractAddress": event.contract_address,
        "eventName": event.event_name,
        "blockNumber": event.block_number,
        "transactionHash": event.transaction_hash,
        "logIndex": event.log_index,
        "args": Value::Object(event.args.clone()),
        "timestamp": event.timestamp.to_rfc3339(),
    })
}

/// Zapier prefers flat payloads; each argument becomes a top-level
/// `arg_<name>` field alongside the event metadata.
fn zapier(event: &ChainEvent) -> Result<Value, String> {
    let mut map = serde_json::Map::new();
    map.insert("contract_address".into(), json!(event.contract_address));
    map.insert("event_name".into(), json!(event.event_name));
    map.insert("block_number".into(), json!(event.block_number));
    map.insert("transaction_hash".into(), json!(event.transaction_hash));
    map.insert("log_index".into(), json!(event.log_index));
    map.insert("timestamp".into(), json!(event.timestamp.to_rfc3339()));

    for (name, value) in &event.args {
        let flattened = match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => value.clone(),
            other => json!(serde_json::to_string(other).map_err(|e| e.to_string())?),
        };
        map.insert(format!("arg_{name}"), flattened);
    }

    Ok(Value::Object(map))
}

/// Make (Integromat) keeps nesting but wraps everything under `event`.
fn make(event: &ChainEvent) -> Result<Value, String> {
    Ok(json!({
        "event": {
            "contractAddress": event.contract_address,
            "name": event.event_name,
            "blockNumber": event.block_number,
            "transactionHash": event.transaction_hash,
            "logIndex": event.log_index,
            "arguments": Value::Object(event.args.clone()),
        },
        "timestamp": event.timestamp.to_rfc3339(),
    }))
}

/// n8n webhook nodes expose the body under `json`.
fn n8n(event: &ChainEvent) -> Result<Value, String> {
    Ok(json!({ "json": generic(event) }))
}

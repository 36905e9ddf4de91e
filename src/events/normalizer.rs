//! Log normalization
//!
//! Turns raw logs plus a human-friendly event signature string into a
//! canonical [`ChainEvent`]. Signatures may carry parameter names
//! ("Transfer(address from,address to,uint256 value)"); the selector hash
//! uses only the canonical types. Decoded arguments are keyed both by
//! positional index ("0", "1", ...) and, where the signature names the
//! parameter, by that name, so filters may address either.

use alloy::primitives::{keccak256, B256, I256, U256};
use alloy::rpc::types::Log;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::error::{ListenerError, Result};
use crate::types::ChainEvent;

/// Placeholder name when the signature is too mangled to parse.
const UNKNOWN_EVENT: &str = "UnknownEvent";

/// One parsed signature parameter.
#[derive(Debug, Clone)]
struct EventParam {
    name: Option<String>,
    sol_type: String,
}

/// Parsed event signature: name, params, and topic0 selector.
#[derive(Debug, Clone)]
pub struct EventSignature {
    pub name: String,
    pub selector: B256,
    params: Vec<EventParam>,
}

impl EventSignature {
    /// Parses "EventName(type1 name1,type2,...)" and computes the selector
    /// from the canonical form without parameter names.
    pub fn parse(signature: &str) -> Result<Self> {
        let invalid = |reason: &str| ListenerError::InvalidSignature {
            signature: signature.to_string(),
            reason: reason.to_string(),
        };

        let params_start = signature.find('(').ok_or_else(|| invalid("missing '('"))?;
        let params_end = signature.rfind(')').ok_or_else(|| invalid("missing ')'"))?;
        if params_start >= params_end {
            return Err(invalid("malformed parentheses"));
        }

        let raw_name = signature[..params_start].trim();
        let name = event_name_from_signature(signature);

        let params_str = &signature[params_start + 1..params_end];
        let params: Vec<EventParam> = if params_str.trim().is_empty() {
            vec![]
        } else {
            params_str
                .split(',')
                .map(|param| {
                    let mut parts = param.trim().split_whitespace();
                    let sol_type = parts.next().unwrap_or("").to_string();
                    let name = parts.next().map(str::to_string);
                    EventParam { name, sol_type }
                })
                .collect()
        };

        if params.iter().any(|p| p.sol_type.is_empty()) {
            return Err(invalid("empty parameter type"));
        }

        // The selector hashes the signature as written; a degraded display
        // name never changes which logs are matched.
        let canonical = format!(
            "{}({})",
            raw_name,
            params
                .iter()
                .map(|p| p.sol_type.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
        let selector = keccak256(canonical.as_bytes());
        debug!("Signature '{signature}' canonicalized to '{canonical}' ({selector})");

        Ok(Self {
            name,
            selector,
            params,
        })
    }
}

/// Event name from the signature's leading identifier. A missing or
/// malformed name degrades to a placeholder instead of failing the event.
fn event_name_from_signature(signature: &str) -> String {
    let name = signature.split('(').next().unwrap_or("").trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        UNKNOWN_EVENT.to_string()
    } else {
        name.to_string()
    }
}

/// Normalizes one raw log into a [`ChainEvent`].
pub fn normalize_log(log: &Log, signature: &EventSignature) -> Result<ChainEvent> {
    let args = decode_args(log, signature);

    Ok(ChainEvent {
        contract_address: format!("0x{}", hex::encode(log.address())),
        event_name: signature.name.clone(),
        block_number: log.block_number.unwrap_or_default(),
        transaction_hash: format!("{:?}", log.transaction_hash.unwrap_or_default()),
        log_index: log.log_index.unwrap_or_default(),
        args,
        timestamp: Utc::now(),
    })
}

/// Decodes arguments from topics and data. Indexed value-type parameters sit
/// in topics 1..n, everything else in 32-byte data words. The decoding is
/// positional and heuristic; values that cannot be interpreted fall back to
/// their raw hex form instead of failing the event.
fn decode_args(log: &Log, signature: &EventSignature) -> Map<String, Value> {
    let topics: Vec<String> = log
        .topics()
        .iter()
        .map(|t| format!("0x{}", hex::encode(t.as_slice())))
        .collect();
    let data = &log.data().data;

    let mut args = Map::new();
    let mut topic_index = 1;
    let mut data_offset = 0;

    for (i, param) in signature.params.iter().enumerate() {
        let is_indexed = topic_index < topics.len() && topic_decodable(&param.sol_type);

        let value = if is_indexed {
            let topic = &topics[topic_index];
            topic_index += 1;
            decode_word(topic, &param.sol_type)
        } else if data_offset < data.len() {
            let end = (data_offset + 32).min(data.len());
            let word = format!("0x{}", hex::encode(&data[data_offset..end]));
            data_offset = end;
            decode_word(&word, &param.sol_type)
        } else {
            Value::Null
        };

        args.insert(i.to_string(), value.clone());
        if let Some(name) = &param.name {
            args.insert(name.clone(), value);
        }
    }

    args
}

fn topic_decodable(sol_type: &str) -> bool {
    sol_type == "address"
        || sol_type == "bool"
        || sol_type.starts_with("uint")
        || sol_type.starts_with("int")
}

/// Decodes a single 32-byte word given as "0x..." hex.
fn decode_word(word: &str, sol_type: &str) -> Value {
    let hex_body = word.strip_prefix("0x").unwrap_or(word);

    match sol_type {
        "address" if hex_body.len() >= 40 => {
            json!(format!("0x{}", &hex_body[hex_body.len() - 40..]).to_lowercase())
        }
        "bool" => json!(hex_body.ends_with('1')),
        t if t.starts_with("uint") => match U256::from_str_radix(hex_body, 16) {
            Ok(val) => json!(val.to_string()),
            Err(_) => json!(word),
        },
        t if t.starts_with("int") => match hex::decode(hex_body) {
            Ok(bytes) if bytes.len() == 32 => {
                let bytes: [u8; 32] = bytes.try_into().unwrap_or([0u8; 32]);
                json!(I256::from_be_bytes(bytes).to_string())
            }
            _ => json!(word),
        },
        _ => json!(word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256, Bytes, LogData};

    fn make_log(topics: Vec<B256>, data: Vec<u8>) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
                data: LogData::new_unchecked(topics, Bytes::from(data)),
            },
            block_hash: None,
            block_number: Some(18_500_000),
            block_timestamp: None,
            transaction_hash: Some(b256!(
                "1111111111111111111111111111111111111111111111111111111111111111"
            )),
            transaction_index: Some(0),
            log_index: Some(3),
            removed: false,
        }
    }

    #[test]
    fn parses_canonical_transfer_signature() {
        let sig = EventSignature::parse("Transfer(address,address,uint256)").unwrap();
        assert_eq!(sig.name, "Transfer");
        // keccak256("Transfer(address,address,uint256)")
        assert_eq!(
            format!("{:?}", sig.selector),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn named_parameters_do_not_change_selector() {
        let plain = EventSignature::parse("Transfer(address,address,uint256)").unwrap();
        let named =
            EventSignature::parse("Transfer(address from,address to,uint256 value)").unwrap();
        assert_eq!(plain.selector, named.selector);
    }

    #[test]
    fn parses_empty_parameter_list() {
        let sig = EventSignature::parse("Ping()").unwrap();
        assert_eq!(sig.name, "Ping");
        assert!(sig.params.is_empty());
    }

    #[test]
    fn rejects_malformed_signatures() {
        assert!(EventSignature::parse("Transfer").is_err());
        assert!(EventSignature::parse("Transfer)address(").is_err());
        assert!(EventSignature::parse("Transfer(address,)").is_err());
    }

    #[test]
    fn malformed_names_parse_with_placeholder() {
        let anonymous = EventSignature::parse("(address,address)").unwrap();
        assert_eq!(anonymous.name, "UnknownEvent");

        let spaced = EventSignature::parse("Bad Name(address)").unwrap();
        assert_eq!(spaced.name, "UnknownEvent");
        // The selector still reflects the signature as written.
        assert_eq!(spaced.selector, keccak256("Bad Name(address)".as_bytes()));
    }

    #[test]
    fn event_name_falls_back_to_placeholder() {
        assert_eq!(event_name_from_signature("Transfer(address)"), "Transfer");
        assert_eq!(event_name_from_signature("(address)"), "UnknownEvent");
        assert_eq!(event_name_from_signature(""), "UnknownEvent");
    }

    #[test]
    fn normalizes_indexed_transfer_log() {
        let sig =
            EventSignature::parse("Transfer(address from,address to,uint256 value)").unwrap();
        let topics = vec![
            sig.selector,
            b256!("000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            b256!("000000000000000000000000bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
        ];
        let mut value_word = [0u8; 32];
        value_word[31] = 100;
        let log = make_log(topics, value_word.to_vec());

        let event = normalize_log(&log, &sig).unwrap();
        assert_eq!(event.event_name, "Transfer");
        assert_eq!(
            event.contract_address,
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
        );
        assert_eq!(event.block_number, 18_500_000);
        assert_eq!(event.log_index, 3);

        // Keyed positionally and by name
        assert_eq!(
            event.args.get("0"),
            Some(&json!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"))
        );
        assert_eq!(event.args.get("from"), event.args.get("0"));
        assert_eq!(event.args.get("to"), event.args.get("1"));
        assert_eq!(event.args.get("value"), Some(&json!("100")));
        assert_eq!(event.args.get("2"), Some(&json!("100")));
    }

    #[test]
    fn unnamed_parameters_are_only_positional() {
        let sig = EventSignature::parse("Transfer(address,address,uint256)").unwrap();
        let topics = vec![
            sig.selector,
            b256!("000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
        ];
        let log = make_log(topics, vec![0u8; 64]);

        let event = normalize_log(&log, &sig).unwrap();
        assert!(event.args.contains_key("0"));
        assert!(!event.args.contains_key("from"));
    }

    #[test]
    fn missing_data_decodes_to_null() {
        let sig = EventSignature::parse("Thing(bytes32 blob)").unwrap();
        let log = make_log(vec![sig.selector], vec![]);
        let event = normalize_log(&log, &sig).unwrap();
        assert_eq!(event.args.get("blob"), Some(&Value::Null));
    }
}

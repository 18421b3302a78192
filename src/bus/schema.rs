// =============================================================================
// Channel names and per-channel schema validation (§4.1, §6)
// =============================================================================

use serde_json::Value;

use crate::error::BusError;

pub const BROKER_REGISTRATION: &str = "BROKER_REGISTRATION";
pub const PROFIT_REPORT: &str = "PROFIT_REPORT";
pub const PERFORMANCE_AGGREGATE: &str = "PERFORMANCE_AGGREGATE";

pub fn ticker_updates_channel(symbol: &str) -> String {
    format!("TICKER_UPDATES_{}", symbol.to_ascii_uppercase())
}

pub fn performance_channel(symbol: &str) -> String {
    format!("PERFORMANCE_{}", symbol.to_ascii_uppercase())
}

fn require_fields(channel: &str, value: &Value, fields: &[&str]) -> Result<(), BusError> {
    let Some(obj) = value.as_object() else {
        return Err(BusError::SchemaViolation {
            channel: channel.to_string(),
            reason: "payload is not a JSON object".to_string(),
        });
    };
    for field in fields {
        if !obj.contains_key(*field) {
            return Err(BusError::SchemaViolation {
                channel: channel.to_string(),
                reason: format!("missing required field '{field}'"),
            });
        }
    }
    Ok(())
}

/// Resolves the schema for `channel` by prefix and checks `value` against
/// it. Called on every publish; the adapter never lets a malformed payload
/// reach the wire (§4.1).
pub fn validate_payload(channel: &str, value: &Value) -> Result<(), BusError> {
    if channel == BROKER_REGISTRATION {
        return require_fields(channel, value, &["action", "ticker"]);
    }
    if channel == PROFIT_REPORT {
        return require_fields(channel, value, &["symbol", "total", "unrealized", "realized", "timestamp"]);
    }
    if channel == PERFORMANCE_AGGREGATE {
        return require_fields(channel, value, &["total", "unrealized", "realized", "timestamp"]);
    }
    if let Some(_symbol) = channel.strip_prefix("TICKER_UPDATES_") {
        return require_fields(channel, value, &["type", "timestamp"]);
    }
    if let Some(_symbol) = channel.strip_prefix("PERFORMANCE_") {
        return require_fields(channel, value, &["total", "unrealized", "realized", "timestamp"]);
    }

    Err(BusError::SchemaViolation {
        channel: channel.to_string(),
        reason: "unrecognized channel".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registration_payload_requires_action_and_ticker() {
        let ok = json!({"action": "subscribe", "ticker": "AAPL"});
        assert!(validate_payload(BROKER_REGISTRATION, &ok).is_ok());

        let missing = json!({"action": "subscribe"});
        assert!(validate_payload(BROKER_REGISTRATION, &missing).is_err());
    }

    #[test]
    fn ticker_updates_channel_resolves_by_prefix() {
        let payload = json!({"type": "price", "timestamp": "2026-01-01T00:00:00Z", "price": "100.00", "symbol": "AAPL"});
        assert!(validate_payload(&ticker_updates_channel("aapl"), &payload).is_ok());
    }

    #[test]
    fn unrecognized_channel_is_rejected() {
        let payload = json!({});
        assert!(validate_payload("SOME_OTHER_CHANNEL", &payload).is_err());
    }
}

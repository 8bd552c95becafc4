// =============================================================================
// Deriv Wire Protocol — outbound frame builders and typed inbound events
// =============================================================================
//
// One JSON request yields one or many responses correlated by the server's
// `echo_req` echo. Responses to request-reply calls carry
// `echo_req.passthrough.req_id`; streamed messages are identified by
// `msg_type` plus the identifying echo fields (e.g. `ticks_history` +
// `granularity` for candle payloads).
// =============================================================================

use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::market_data::Candle;

/// Typed event emitted by the broker session toward the engine worker.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// Session connected and authorized; carries the account balance.
    Authorized { balance: f64 },
    Balance { balance: f64 },
    Candles {
        symbol: String,
        granularity: u32,
        candles: Vec<Candle>,
    },
    Tick {
        symbol: String,
        epoch: i64,
        quote: f64,
        subscription_id: Option<String>,
    },
    ContractUpdate(ContractSnapshot),
    ContractsFor {
        symbol: String,
        multipliers: Vec<f64>,
    },
    BuyAck {
        contract_id: i64,
        buy_price: f64,
        symbol: String,
        contract_type: String,
        multiplier: Option<f64>,
    },
    SellAck { contract_id: i64 },
    ApiError { code: String, message: String },
    /// Socket dropped; the session is about to reconnect.
    Disconnected,
}

/// Snapshot of one `proposal_open_contract` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractSnapshot {
    pub contract_id: i64,
    pub symbol: String,
    pub contract_type: String,
    pub profit: f64,
    pub buy_price: f64,
    pub entry_tick: Option<f64>,
    pub purchase_time: Option<i64>,
    pub date_expiry: Option<i64>,
    pub is_sold: bool,
    pub multiplier: Option<f64>,
}

// -----------------------------------------------------------------------------
// Outbound frames
// -----------------------------------------------------------------------------

pub fn authorize(token: &str) -> Value {
    json!({ "authorize": token })
}

pub fn subscribe_balance() -> Value {
    json!({ "balance": 1, "subscribe": 1 })
}

pub fn subscribe_open_contracts() -> Value {
    json!({ "proposal_open_contract": 1, "subscribe": 1 })
}

pub fn subscribe_ticks(symbol: &str) -> Value {
    json!({ "ticks": symbol, "subscribe": 1 })
}

pub fn forget(subscription_id: &str) -> Value {
    json!({ "forget": subscription_id })
}

pub fn ticks_history(symbol: &str, granularity: u32, count: u32) -> Value {
    json!({
        "ticks_history": symbol,
        "adjust_start_time": 1,
        "count": count,
        "end": "latest",
        "granularity": granularity,
        "style": "candles",
    })
}

pub fn contracts_for(symbol: &str) -> Value {
    json!({ "contracts_for": symbol })
}

pub fn sell(contract_id: i64) -> Value {
    json!({ "sell": contract_id, "price": 0 })
}

pub fn ping() -> Value {
    json!({ "ping": 1 })
}

// -----------------------------------------------------------------------------
// Inbound parsing
// -----------------------------------------------------------------------------

/// Correlation token found on a response, when present.
pub fn req_id_of(data: &Value) -> Option<u64> {
    data.get("echo_req")?
        .get("passthrough")?
        .get("req_id")?
        .as_u64()
}

/// Parse one inbound frame into a typed event.
///
/// Returns `Ok(None)` for frames the engine does not consume (pong, forget
/// acks, subscription echoes without payload).
pub fn parse_event(data: &Value) -> Result<Option<BrokerEvent>> {
    // Errors short-circuit regardless of msg_type.
    if let Some(err) = data.get("error") {
        return Ok(Some(BrokerEvent::ApiError {
            code: err
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown broker error")
                .to_string(),
        }));
    }

    let Some(msg_type) = data.get("msg_type").and_then(Value::as_str) else {
        return Ok(None);
    };

    match msg_type {
        "authorize" => {
            let balance = data["authorize"]["balance"].as_f64().unwrap_or(0.0);
            Ok(Some(BrokerEvent::Authorized { balance }))
        }
        "balance" => {
            let balance = data["balance"]["balance"]
                .as_f64()
                .context("balance payload missing balance")?;
            Ok(Some(BrokerEvent::Balance { balance }))
        }
        "candles" => {
            let echo = &data["echo_req"];
            let symbol = echo["ticks_history"]
                .as_str()
                .context("candles echo missing ticks_history")?
                .to_string();
            let granularity = echo["granularity"]
                .as_u64()
                .context("candles echo missing granularity")? as u32;
            let raw = data["candles"]
                .as_array()
                .context("candles payload is not an array")?;

            let mut candles = Vec::with_capacity(raw.len());
            for entry in raw {
                candles.push(parse_candle(entry)?);
            }

            Ok(Some(BrokerEvent::Candles {
                symbol,
                granularity,
                candles,
            }))
        }
        "tick" => {
            let tick = &data["tick"];
            let symbol = tick["symbol"]
                .as_str()
                .context("tick missing symbol")?
                .to_string();
            let epoch = tick["epoch"].as_i64().context("tick missing epoch")?;
            let quote = field_f64(&tick["quote"]).context("tick missing quote")?;
            let subscription_id = data["subscription"]["id"].as_str().map(str::to_string);
            Ok(Some(BrokerEvent::Tick {
                symbol,
                epoch,
                quote,
                subscription_id,
            }))
        }
        "proposal_open_contract" => {
            let poc = &data["proposal_open_contract"];
            // Keep-alive frames without a contract id are not updates.
            let Some(contract_id) = poc["contract_id"].as_i64() else {
                return Ok(None);
            };
            Ok(Some(BrokerEvent::ContractUpdate(ContractSnapshot {
                contract_id,
                symbol: poc["underlying"].as_str().unwrap_or_default().to_string(),
                contract_type: poc["contract_type"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                profit: field_f64(&poc["profit"]).unwrap_or(0.0),
                buy_price: field_f64(&poc["buy_price"]).unwrap_or(0.0),
                entry_tick: field_f64(&poc["entry_tick"]),
                purchase_time: poc["purchase_time"].as_i64(),
                date_expiry: poc["date_expiry"].as_i64(),
                is_sold: truthy(&poc["is_sold"]),
                multiplier: field_f64(&poc["multiplier"]),
            })))
        }
        "contracts_for" => {
            let symbol = data["echo_req"]["contracts_for"]
                .as_str()
                .context("contracts_for echo missing symbol")?
                .to_string();
            let available = data["contracts_for"]["available"]
                .as_array()
                .cloned()
                .unwrap_or_default();

            let multipliers = available
                .iter()
                .find(|c| c["contract_type"].as_str() == Some("MULTUP"))
                .and_then(|c| c["multiplier_range"].as_array())
                .map(|arr| arr.iter().filter_map(field_f64_ref).collect())
                .unwrap_or_default();

            Ok(Some(BrokerEvent::ContractsFor {
                symbol,
                multipliers,
            }))
        }
        "buy" => {
            let buy = &data["buy"];
            let contract_id = buy["contract_id"].as_i64().context("buy ack missing id")?;
            let buy_price = field_f64(&buy["buy_price"]).unwrap_or(0.0);
            let params = &data["echo_req"]["parameters"];
            Ok(Some(BrokerEvent::BuyAck {
                contract_id,
                buy_price,
                symbol: params["symbol"].as_str().unwrap_or_default().to_string(),
                contract_type: params["contract_type"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                multiplier: field_f64(&params["multiplier"]),
            }))
        }
        "sell" => {
            let Some(contract_id) = data["sell"]["contract_id"].as_i64() else {
                return Ok(None);
            };
            Ok(Some(BrokerEvent::SellAck { contract_id }))
        }
        _ => Ok(None),
    }
}

/// Extract the candle array from a `ticks_history` response payload. Used by
/// request-reply callers that bypass event dispatch.
pub fn candles_payload(data: &Value) -> Result<Vec<Candle>> {
    let raw = data["candles"]
        .as_array()
        .context("response has no candles array")?;
    raw.iter().map(parse_candle).collect()
}

/// Parse one candle object. Deriv sends numbers, occasionally strings.
fn parse_candle(entry: &Value) -> Result<Candle> {
    Ok(Candle {
        epoch: entry["epoch"].as_i64().context("candle missing epoch")?,
        open: field_f64(&entry["open"]).context("candle missing open")?,
        high: field_f64(&entry["high"]).context("candle missing high")?,
        low: field_f64(&entry["low"]).context("candle missing low")?,
        close: field_f64(&entry["close"]).context("candle missing close")?,
    })
}

/// A JSON value that may be a number or a numeric string.
fn field_f64(val: &Value) -> Option<f64> {
    match val {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn field_f64_ref(val: &Value) -> Option<f64> {
    field_f64(val)
}

/// Deriv booleans arrive as 0/1 integers or true/false.
fn truthy(val: &Value) -> bool {
    val.as_bool().unwrap_or_else(|| val.as_i64().unwrap_or(0) != 0)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_event() {
        let data = json!({ "msg_type": "authorize", "authorize": { "balance": 1234.5 } });
        let ev = parse_event(&data).unwrap().unwrap();
        assert_eq!(ev, BrokerEvent::Authorized { balance: 1234.5 });
    }

    #[test]
    fn error_takes_priority() {
        let data = json!({
            "msg_type": "authorize",
            "error": { "code": "AuthorizationRequired", "message": "Please log in." }
        });
        let ev = parse_event(&data).unwrap().unwrap();
        assert_eq!(
            ev,
            BrokerEvent::ApiError {
                code: "AuthorizationRequired".into(),
                message: "Please log in.".into()
            }
        );
    }

    #[test]
    fn candles_event_with_string_numbers() {
        let data = json!({
            "msg_type": "candles",
            "echo_req": { "ticks_history": "R_100", "granularity": 60 },
            "candles": [
                { "epoch": 1_700_000_000, "open": "100.1", "high": 100.5, "low": "99.8", "close": 100.2 },
                { "epoch": 1_700_000_060, "open": 100.2, "high": "100.9", "low": 100.0, "close": "100.7" }
            ]
        });
        let ev = parse_event(&data).unwrap().unwrap();
        match ev {
            BrokerEvent::Candles {
                symbol,
                granularity,
                candles,
            } => {
                assert_eq!(symbol, "R_100");
                assert_eq!(granularity, 60);
                assert_eq!(candles.len(), 2);
                assert!((candles[0].open - 100.1).abs() < 1e-9);
                assert!((candles[1].close - 100.7).abs() < 1e-9);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn tick_event_with_subscription() {
        let data = json!({
            "msg_type": "tick",
            "tick": { "symbol": "R_50", "epoch": 1_700_000_000, "quote": 245.67 },
            "subscription": { "id": "abc-123" }
        });
        let ev = parse_event(&data).unwrap().unwrap();
        assert_eq!(
            ev,
            BrokerEvent::Tick {
                symbol: "R_50".into(),
                epoch: 1_700_000_000,
                quote: 245.67,
                subscription_id: Some("abc-123".into()),
            }
        );
    }

    #[test]
    fn contract_update_event() {
        let data = json!({
            "msg_type": "proposal_open_contract",
            "proposal_open_contract": {
                "contract_id": 987654,
                "underlying": "R_100",
                "contract_type": "MULTUP",
                "profit": -1.25,
                "buy_price": 10.0,
                "entry_tick": 5001.2,
                "purchase_time": 1_700_000_000,
                "date_expiry": 1_700_086_400,
                "is_sold": 0,
                "multiplier": 50
            }
        });
        let ev = parse_event(&data).unwrap().unwrap();
        match ev {
            BrokerEvent::ContractUpdate(poc) => {
                assert_eq!(poc.contract_id, 987654);
                assert_eq!(poc.symbol, "R_100");
                assert!(!poc.is_sold);
                assert_eq!(poc.multiplier, Some(50.0));
                assert_eq!(poc.entry_tick, Some(5001.2));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn contract_keepalive_without_id_is_skipped() {
        let data = json!({
            "msg_type": "proposal_open_contract",
            "proposal_open_contract": {}
        });
        assert!(parse_event(&data).unwrap().is_none());
    }

    #[test]
    fn contracts_for_extracts_multup_range() {
        let data = json!({
            "msg_type": "contracts_for",
            "echo_req": { "contracts_for": "R_100" },
            "contracts_for": {
                "available": [
                    { "contract_type": "CALL" },
                    { "contract_type": "MULTUP", "multiplier_range": [10, 20, 50, "100"] }
                ]
            }
        });
        let ev = parse_event(&data).unwrap().unwrap();
        assert_eq!(
            ev,
            BrokerEvent::ContractsFor {
                symbol: "R_100".into(),
                multipliers: vec![10.0, 20.0, 50.0, 100.0],
            }
        );
    }

    #[test]
    fn buy_ack_carries_echoed_parameters() {
        let data = json!({
            "msg_type": "buy",
            "buy": { "contract_id": 42, "buy_price": 10.5 },
            "echo_req": {
                "parameters": { "symbol": "R_100", "contract_type": "CALL" }
            }
        });
        let ev = parse_event(&data).unwrap().unwrap();
        assert_eq!(
            ev,
            BrokerEvent::BuyAck {
                contract_id: 42,
                buy_price: 10.5,
                symbol: "R_100".into(),
                contract_type: "CALL".into(),
                multiplier: None,
            }
        );
    }

    #[test]
    fn req_id_extraction() {
        let data = json!({
            "msg_type": "candles",
            "echo_req": { "passthrough": { "req_id": 17 } }
        });
        assert_eq!(req_id_of(&data), Some(17));
        assert_eq!(req_id_of(&json!({ "msg_type": "tick" })), None);
    }

    #[test]
    fn unknown_msg_type_is_skipped() {
        let data = json!({ "msg_type": "ping" });
        assert!(parse_event(&data).unwrap().is_none());
    }

    #[test]
    fn outbound_frames_shape() {
        assert_eq!(authorize("tok")["authorize"], "tok");
        assert_eq!(subscribe_ticks("R_100")["ticks"], "R_100");
        assert_eq!(subscribe_ticks("R_100")["subscribe"], 1);
        let h = ticks_history("R_100", 900, 200);
        assert_eq!(h["granularity"], 900);
        assert_eq!(h["count"], 200);
        assert_eq!(h["style"], "candles");
        assert_eq!(sell(42)["sell"], 42);
        assert_eq!(forget("abc")["forget"], "abc");
    }
}

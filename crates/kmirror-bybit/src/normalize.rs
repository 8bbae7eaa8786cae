use serde_json::Value;

use kmirror_models::Candle;

/// Pull the candle row array out of a venue response body.
///
/// The v5 surface nests rows under `result.list`; the legacy endpoints use
/// `result` or `data` directly, and some return a bare top-level array.
pub fn extract_rows(payload: &Value) -> Vec<Value> {
    let result = payload
        .get("result")
        .filter(|v| !v.is_null())
        .or_else(|| payload.get("data").filter(|v| !v.is_null()))
        .unwrap_or(payload);

    if let Some(list) = result.get("list").and_then(Value::as_array) {
        return list.clone();
    }
    if let Some(arr) = result.as_array() {
        return arr.clone();
    }
    Vec::new()
}

/// Decode one venue row into a `Candle`.
///
/// Accepts both the documented list shape
/// `[startTime, open, high, low, close, volume, turnover?]` and the
/// map shapes seen across the legacy endpoints. The source row is kept
/// verbatim in `raw`. Unparseable numeric fields become 0.0; a row without
/// a recoverable start time yields `None`.
pub fn normalize_kline_row(row: &Value) -> Option<Candle> {
    match row {
        Value::Array(fields) => {
            let open_time = fields.first().and_then(lenient_i64)?;
            Some(Candle {
                open_time,
                open: fields.get(1).and_then(lenient_f64).unwrap_or(0.0),
                high: fields.get(2).and_then(lenient_f64).unwrap_or(0.0),
                low: fields.get(3).and_then(lenient_f64).unwrap_or(0.0),
                close: fields.get(4).and_then(lenient_f64).unwrap_or(0.0),
                volume: fields.get(5).and_then(lenient_f64).unwrap_or(0.0),
                turnover: fields.get(6).and_then(lenient_f64).unwrap_or(0.0),
                raw: row.clone(),
            })
        }
        Value::Object(map) => {
            let open_time = ["startTime", "start_at", "start", "t", "open_time"]
                .iter()
                .find_map(|key| map.get(*key).and_then(lenient_i64))?;
            let field = |keys: &[&str]| -> f64 {
                keys.iter()
                    .find_map(|key| map.get(*key).and_then(lenient_f64))
                    .unwrap_or(0.0)
            };
            Some(Candle {
                open_time,
                open: field(&["openPrice", "open", "o"]),
                high: field(&["highPrice", "high", "h"]),
                low: field(&["lowPrice", "low", "l"]),
                close: field(&["closePrice", "close", "c"]),
                volume: field(&["volume", "v"]),
                turnover: field(&["turnover"]),
                raw: row.clone(),
            })
        }
        _ => None,
    }
}

/// Sort ascending by open_time and drop duplicate timestamps, keeping the
/// first occurrence.
pub fn sort_dedup(candles: &mut Vec<Candle>) {
    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);
}

/// The venue sends numbers both as JSON numbers and as strings.
fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(|f| f as i64)),
        _ => None,
    }
}

fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.is_empty() => s.parse::<f64>().ok(),
        _ => None,
    }
}

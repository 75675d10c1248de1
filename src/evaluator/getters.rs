//! Conversion strategies from a stored flag value to a requested type.

/// 2^63 as f64, the first float that no longer fits an i64.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

pub fn get_bool(v: &serde_json::Value) -> Option<bool> {
    v.as_bool()
}

pub fn get_string(v: &serde_json::Value) -> Option<String> {
    v.as_str().map(str::to_string)
}

/// Any JSON value is a valid structured value.
pub fn get_object(v: &serde_json::Value) -> Option<serde_json::Value> {
    Some(v.clone())
}

/// JSON does not distinguish integer from float numbers, so any number widens.
pub fn get_float(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Accepts integers in range and floats without a fractional part.
pub fn get_int(v: &serde_json::Value) -> Option<i64> {
    let n = match v {
        serde_json::Value::Number(n) => n,
        _ => return None,
    };
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    if n.is_u64() {
        // positive integer past i64::MAX
        return None;
    }
    let f = n.as_f64()?;
    if f.fract() != 0.0 || f < -I64_BOUND || f >= I64_BOUND {
        return None;
    }
    Some(f as i64)
}

pub fn type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(n) if n.is_f64() => "float",
        serde_json::Value::Number(_) => "integer",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

use serde_json::{Map, Value};

use crate::paths::AirsignPaths;

// Every audit line carries these keys; fields that do not apply to an event are null.
const REQUIRED_KEYS: [&str; 9] = [
    "ts",
    "event",
    "network",
    "txid",
    "inputs",
    "outputs",
    "fee_sats",
    "result",
    "error_code",
];

// Never written to the log, whatever the caller passes in.
const FORBIDDEN_KEYS: [&str; 5] = ["mnemonic", "seed", "private_key", "passphrase", "tx_hex"];

pub fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn normalize_entry(v: Value) -> Value {
    let mut obj = match v {
        Value::Object(m) => m,
        other @ (Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Array(_)) => {
            let mut m = Map::new();
            m.insert("raw".to_owned(), other);
            m
        }
    };

    for k in FORBIDDEN_KEYS {
        obj.remove(k);
    }
    if !obj.contains_key("ts") {
        obj.insert("ts".to_owned(), Value::String(utc_now_iso()));
    }
    for k in REQUIRED_KEYS {
        obj.entry(k).or_insert(Value::Null);
    }
    Value::Object(obj)
}

/// Append one normalized event to `<data_dir>/audit.jsonl`.
pub fn append(paths: &AirsignPaths, entry: Value) -> eyre::Result<()> {
    let line = serde_json::to_string(&normalize_entry(entry))?;
    crate::fsutil::append_line_restrictive(&paths.audit_log(), &line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fills_required_keys_and_strips_secrets() {
        let v = normalize_entry(json!({
            "event": "sign",
            "txid": "ab",
            "mnemonic": "abandon abandon",
            "private_key": "00",
        }));
        for k in REQUIRED_KEYS {
            assert!(v.get(k).is_some(), "missing {k}");
        }
        assert!(v.get("mnemonic").is_none());
        assert!(v.get("private_key").is_none());
        assert_eq!(v.get("event"), Some(&json!("sign")));
        assert_eq!(v.get("fee_sats"), Some(&Value::Null));
    }

    #[test]
    fn non_objects_are_wrapped() {
        let v = normalize_entry(json!("hello"));
        assert_eq!(v.get("raw"), Some(&json!("hello")));
    }

    #[test]
    fn append_writes_jsonl() -> eyre::Result<()> {
        let tmp = tempfile::tempdir()?;
        let paths = AirsignPaths::from_dirs(tmp.path().join("cfg"), tmp.path().join("data"));
        append(&paths, json!({"event": "sign", "result": "ok"}))?;
        append(&paths, json!({"event": "broadcast", "result": "ok"}))?;
        let s = std::fs::read_to_string(paths.audit_log())?;
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines.first().copied().unwrap_or_default())?;
        assert_eq!(first.get("event"), Some(&json!("sign")));
        Ok(())
    }
}

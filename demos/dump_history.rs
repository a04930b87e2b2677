// Dump persisted history blobs as JSON (decodes the versioned wincode values).
//
// Usage: cargo run --example dump_history -- [DB_PATH] [TARGET_ID]
//   DB_PATH    default: ./data/dashboard.db
//   TARGET_ID  default: every target

use std::collections::BTreeMap;
use std::env;

use telemetry_sync::history_store::{DEFAULT_CAPACITY, LAST_SAMPLE_KEY, decode_sample, decode_series};
use telemetry_sync::kv_store::SqliteKvStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let path = args.get(1).map(String::as_str).unwrap_or("./data/dashboard.db");
    let prefix = args.get(2).map(|id| format!("{id}_"));

    let store = SqliteKvStore::connect(path, 1).await?;
    let entries = store.entries(prefix.as_deref()).await?;

    let mut out = BTreeMap::new();
    for (key, bytes) in entries {
        let value = if key.ends_with(LAST_SAMPLE_KEY) {
            decode_sample(&bytes).map(|s| serde_json::to_value(s).unwrap_or_default())
        } else {
            decode_series(&bytes, DEFAULT_CAPACITY).map(|s| serde_json::json!(s.to_vec()))
        };
        let value = value.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }));
        out.insert(key, value);
    }

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

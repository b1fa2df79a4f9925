use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub mod typed;

pub use typed::LoaderConfig;

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

impl LoadedConfig {
    /// Deserialize the merged document into the typed loader config,
    /// applying section defaults for anything absent.
    pub fn typed(&self) -> Result<LoaderConfig> {
        serde_json::from_value(self.config_json.clone())
            .context("config does not match the loader schema")
    }
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_yaml(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn later_layers_override_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_yaml(
            &dir,
            "base.yaml",
            "orchestrator:\n  max_concurrency: 50\n  retry_failed: true\n",
        );
        let env = write_yaml(&dir, "env.yaml", "orchestrator:\n  max_concurrency: 8\n");

        let loaded = load_layered_yaml(&[&base, &env]).unwrap();
        let typed = loaded.typed().unwrap();
        assert_eq!(typed.orchestrator.max_concurrency, 8);
        assert!(typed.orchestrator.retry_failed);
    }

    #[test]
    fn config_hash_is_stable_across_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_yaml(&dir, "a.yaml", "x: 1\ny: 2\n");
        let b = write_yaml(&dir, "b.yaml", "y: 2\nx: 1\n");

        let ha = load_layered_yaml(&[&a]).unwrap().config_hash;
        let hb = load_layered_yaml(&[&b]).unwrap().config_hash;
        assert_eq!(ha, hb);
    }

    #[test]
    fn empty_document_yields_all_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_yaml(&dir, "empty.yaml", "{}\n");
        let typed = load_layered_yaml(&[&p]).unwrap().typed().unwrap();
        assert_eq!(typed.orchestrator.max_concurrency, 50);
        assert_eq!(typed.validation.zero_price_threshold_pct, 10);
        assert_eq!(typed.late_eod_max_days, 5);
    }
}

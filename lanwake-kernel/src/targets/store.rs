//! Registry file I/O and load-time sanitization.
//!
//! The file is treated as untrusted input: it may have been hand-edited or
//! written by an older release using a flat `{name: {...}}` mapping. Loading
//! always runs it through [`normalize_state`], and whatever comes out is what
//! the rest of the registry sees.

use super::model::{RegistryFile, Target};
use super::validate::{normalize_mac, normalize_name, validate_ip};
use crate::error::WolResult;
use crate::persist::replace_file;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const OWNED_KEYS: [&str; 5] = ["name", "ip", "mac", "created_at", "updated_at"];

/// Sanitizes a raw registry document.
///
/// Returns the clean, name-ordered target list and whether it differs from
/// the input (in which case the caller re-persists it). Pure: `now` is only
/// used to fill in missing timestamps.
pub fn normalize_state(raw: &Value, now: &str) -> (Vec<Target>, bool) {
    let mut normalized = Vec::new();
    let mut changed;

    match raw {
        Value::Object(doc) if matches!(doc.get("targets"), Some(Value::Array(_))) => {
            let items = doc["targets"].as_array().map(Vec::as_slice).unwrap_or_default();
            changed = doc.len() != 1;
            for item in items {
                match normalize_entry(item, now) {
                    Some(target) => {
                        if serde_json::to_value(&target).ok().as_ref() != Some(item) {
                            changed = true;
                        }
                        normalized.push(target);
                    }
                    None => changed = true,
                }
            }
        }
        Value::Object(legacy) => {
            changed = true;
            for (name, item) in legacy {
                let Value::Object(fields) = item else { continue };
                let mut candidate = fields.clone();
                candidate
                    .entry("name")
                    .or_insert_with(|| Value::String(name.clone()));
                if let Some(target) = normalize_entry(&Value::Object(candidate), now) {
                    normalized.push(target);
                }
            }
        }
        Value::Array(items) => {
            changed = true;
            normalized.extend(items.iter().filter_map(|item| normalize_entry(item, now)));
        }
        _ => changed = true,
    }

    let count = normalized.len();
    let unique: BTreeMap<String, Target> = normalized
        .iter()
        .cloned()
        .map(|t| (t.name.clone(), t))
        .collect();
    let ordered: Vec<Target> = unique.into_values().collect();
    if ordered.len() != count || ordered.iter().zip(&normalized).any(|(a, b)| a != b) {
        changed = true;
    }
    (ordered, changed)
}

/// Cleans one stored record; `None` drops it.
fn normalize_entry(item: &Value, now: &str) -> Option<Target> {
    let Value::Object(fields) = item else { return None };
    let name = normalize_name(fields.get("name")?.as_str()?).ok()?;
    let ip = validate_ip(fields.get("ip")?.as_str()?).ok()?;
    let mac = fields
        .get("mac")
        .and_then(Value::as_str)
        .and_then(|m| normalize_mac(m).ok().flatten());
    let stamp = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| now.to_string())
    };
    let extra: Map<String, Value> = fields
        .iter()
        .filter(|(k, _)| !OWNED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Some(Target {
        name,
        ip,
        mac,
        created_at: stamp("created_at"),
        updated_at: stamp("updated_at"),
        extra,
    })
}

/// Builds the target seeded into a fresh registry from `PC_LABEL`/`PC_IP`/`PC_MAC`.
/// An unusable MAC is dropped; an unusable name or IP yields no seed at all.
pub fn seed_target(label: &str, ip: &str, mac: Option<&str>, now: &str) -> Option<Target> {
    let name = normalize_name(label).ok()?;
    let ip = validate_ip(ip).ok()?;
    let mac = mac.and_then(|m| normalize_mac(m).ok().flatten());
    Some(Target {
        name,
        ip,
        mac,
        created_at: now.to_string(),
        updated_at: now.to_string(),
        extra: Map::new(),
    })
}

/// Loads the registry, creating or repairing the file as needed.
pub fn load(path: &Path, seed: &[Target], now: &str) -> WolResult<Vec<Target>> {
    if !path.exists() {
        debug!(path = %path.display(), seeded = seed.len(), "creating registry file");
        save(path, seed)?;
        return Ok(seed.to_vec());
    }

    let text = fs::read_to_string(path)?;
    if text.trim().is_empty() {
        save(path, &[])?;
        return Ok(Vec::new());
    }
    let raw: Value = match serde_json::from_str(&text) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "registry file is not valid JSON, resetting");
            save(path, &[])?;
            return Ok(Vec::new());
        }
    };

    let (targets, changed) = normalize_state(&raw, now);
    if changed {
        debug!(path = %path.display(), "registry file sanitized, rewriting");
        save(path, &targets)?;
    }
    Ok(targets)
}

/// Persists `targets` (pretty JSON + trailing newline) via atomic replace.
pub fn save(path: &Path, targets: &[Target]) -> WolResult<()> {
    let mut serialized = serde_json::to_string_pretty(&RegistryFile { targets })?;
    serialized.push('\n');
    replace_file(path, &serialized)?;
    Ok(())
}

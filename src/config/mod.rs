// ============================================================
// Configuration Merge
// ============================================================
// Three sources feed one configuration record:
//
//   dict   — defaults supplied by the experiment (optional)
//   yaml   — a file named by the YAML_FILE flag (optional)
//   flags  — KEY=VALUE pairs from the command line
//
// Later sources win: flags > yaml > dict.
//
// The YAML file goes through a checked merge (a value may not
// change type, except sequences which are coerced). Flags go
// through a plain overwrite.

pub mod flags;

pub use flags::{check_dict_keys, check_str, Flags};

use std::{collections::BTreeMap, fs, path::Path};

use serde_yaml::{Number, Value};

use crate::error::ConfigError;

/// A configuration record keyed by option name. `Value::Null` is
/// the "unset" marker.
pub type ConfigMap = BTreeMap<String, Value>;

/// Flag naming the YAML file to merge.
pub const YAML_FILE_KEY: &str = "YAML_FILE";

/// Merge flags, the YAML file they name, and the dict into one record.
pub fn load_config(flags: ConfigMap, dict: Option<ConfigMap>) -> Result<ConfigMap, ConfigError> {
    let yaml_file = flags.get(YAML_FILE_KEY).and_then(Value::as_str);
    tracing::info!("{}", describe_sources(dict.is_some(), yaml_file));

    let mut merged = dict.unwrap_or_default();
    if let Some(yaml_file) = yaml_file {
        let yaml = read_config_file(Path::new(yaml_file))?;
        merge_a_into_b(&yaml, &mut merged)?;
    }

    merge_a_into_b_simple(flags, &mut merged);
    Ok(merged)
}

/// The log line naming what `load_config` is about to merge.
fn describe_sources(has_dict: bool, yaml_file: Option<&str>) -> String {
    match (has_dict, yaml_file) {
        (true, Some(yaml)) => format!("Using input flags, config dictionary and yaml file '{yaml}'."),
        (false, Some(yaml)) => format!("Config dictionary not specified. Using input flags and yaml file '{yaml}'."),
        (true, None) => "Yaml file not specified. Using only input flags and config dictionary.".to_string(),
        (false, None) => "Neither config dictionary nor yaml file specified. Using only input flags.".to_string(),
    }
}

/// Read a YAML (or JSON, which is valid YAML) mapping from disk.
pub fn read_config_file(path: &Path) -> Result<ConfigMap, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Ok(ConfigMap::new());
    }
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse one `KEY=VALUE` flag. The value is read as a YAML scalar,
/// so `3` is a number, `true` a bool and `~` the unset marker.
pub fn parse_flag(flag: &str) -> Result<(String, Value), ConfigError> {
    let (key, raw) = flag.split_once('=').ok_or_else(|| ConfigError::MalformedFlag {
        flag: flag.to_string(),
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::MalformedFlag { flag: flag.to_string() });
    }
    let value = serde_yaml::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Parse a list of `KEY=VALUE` flags into a record.
pub fn parse_flags<S: AsRef<str>>(flags: &[S]) -> Result<ConfigMap, ConfigError> {
    flags.iter().map(|f| parse_flag(f.as_ref())).collect()
}

/// Overwrite entries of `b` with `a`, no checking.
pub fn merge_a_into_b_simple(a: ConfigMap, b: &mut ConfigMap) {
    for (k, v) in a {
        b.insert(k, v);
    }
}

/// Merge `a` into `b`, refusing to change the type of an existing
/// entry. Nested mappings merge recursively; sequences are coerced
/// to the element kind of the existing sequence. Keys absent from
/// `b` are added.
pub fn merge_a_into_b(a: &ConfigMap, b: &mut ConfigMap) -> Result<(), ConfigError> {
    for (k, v) in a {
        merge_entry(k, k, v, b)?;
    }
    Ok(())
}

/// Merge `v` into `b[key]`. `key_path` is the dotted path from the
/// top of the record, used only in diagnostics.
fn merge_entry(key: &str, key_path: &str, v: &Value, b: &mut ConfigMap) -> Result<(), ConfigError> {
    let merged = match b.get_mut(key) {
        None | Some(Value::Null) => v.clone(),
        Some(Value::Mapping(old)) => {
            let Value::Mapping(new) = v else {
                return Err(mismatch(key_path, &Value::Mapping(old.clone()), v));
            };
            for (sub_key, sub_value) in new {
                let Some(sub_key) = sub_key.as_str() else {
                    continue;
                };
                let mut nested: ConfigMap = old
                    .iter()
                    .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v.clone())))
                    .collect();
                let path = format!("{key_path}.{sub_key}");
                if let Err(e) = merge_entry(sub_key, &path, sub_value, &mut nested) {
                    tracing::error!("Error under config key: {}", key_path);
                    return Err(e);
                }
                if let Some(updated) = nested.remove(sub_key) {
                    old.insert(Value::String(sub_key.to_string()), updated);
                }
            }
            return Ok(());
        }
        Some(Value::Sequence(old)) => Value::Sequence(coerce_sequence(key_path, old, v)?),
        Some(old) if kind(old) == kind(v) => v.clone(),
        Some(old) => return Err(mismatch(key_path, old, v)),
    };
    b.insert(key.to_string(), merged);
    Ok(())
}

fn coerce_sequence(key: &str, old: &[Value], v: &Value) -> Result<Vec<Value>, ConfigError> {
    let items = match v {
        Value::Sequence(items) => items.clone(),
        Value::Mapping(_) => return Err(mismatch(key, &Value::Sequence(old.to_vec()), v)),
        scalar => vec![scalar.clone()],
    };
    let Some(template) = old.first() else {
        return Ok(items);
    };
    items
        .into_iter()
        .map(|item| coerce_scalar(key, template, item))
        .collect()
}

fn coerce_scalar(key: &str, template: &Value, item: Value) -> Result<Value, ConfigError> {
    match (template, &item) {
        (Value::Number(t), Value::Number(n)) => {
            if t.is_f64() {
                Ok(Value::Number(Number::from(n.as_f64().unwrap_or_default())))
            } else if let Some(i) = n.as_i64() {
                Ok(Value::Number(Number::from(i)))
            } else {
                Ok(Value::Number(Number::from(n.as_f64().unwrap_or_default() as i64)))
            }
        }
        (Value::Number(t), Value::String(s)) => {
            let parsed = if t.is_f64() {
                s.parse::<f64>().ok().map(Number::from)
            } else {
                s.parse::<i64>().ok().map(Number::from)
            };
            parsed.map(Value::Number).ok_or_else(|| mismatch(key, template, &item))
        }
        (Value::String(_), Value::Number(n)) => Ok(Value::String(n.to_string())),
        (t, i) if kind(t) == kind(i) => Ok(item),
        _ => Err(mismatch(key, template, &item)),
    }
}

fn mismatch(key: &str, old: &Value, new: &Value) -> ConfigError {
    ConfigError::TypeMismatch {
        key:      key.to_string(),
        expected: kind(old),
        found:    kind(new),
    }
}

/// Name of a value's variant, used in type-mismatch diagnostics.
pub fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged",
    }
}

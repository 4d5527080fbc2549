// ============================================================
// Required / Optional Keys and the Typed Flags View
// ============================================================

use std::path::PathBuf;

use serde_yaml::{Number, Value};

use super::ConfigMap;
use crate::error::ConfigError;

/// Keys without which a run cannot start.
pub const CRUCIAL_KEYS: [&str; 2] = ["MODEL_DIRECTORY", "SAVE_DIRECTORY"];

/// Keys filled with the unset marker when absent.
pub const OPTIONAL_KEYS: [&str; 5] = ["RESTORE_SLIM_FILE", "RESTORE_META", "RESTORE_SLIM", "SEED", "GPU"];

/// Fill in optional keys with `Null` and the numeric defaults.
/// A missing crucial key is an error.
pub fn check_dict_keys(mut config: ConfigMap) -> Result<ConfigMap, ConfigError> {
    for key in CRUCIAL_KEYS {
        if !config.contains_key(key) {
            tracing::error!("You must define {}. Now exiting...", key);
            return Err(ConfigError::MissingKey { key: key.to_string() });
        }
    }
    for key in OPTIONAL_KEYS {
        if !config.contains_key(key) {
            tracing::warn!("{} in flags, yaml or config dictionary was not found.", key);
            config.insert(key.to_string(), Value::Null);
        }
    }
    config
        .entry("RUN_NUM".to_string())
        .or_insert_with(|| Value::Number(Number::from(0)));
    config
        .entry("NUM_EPOCHS".to_string())
        .or_insert_with(|| Value::Number(Number::from(1)));
    Ok(config)
}

/// Render a config value as a string. Floats render as integers,
/// so `RUN_NUM: 2.0` names directory `Model2`.
pub fn check_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_f64() => (n.as_f64().unwrap_or_default() as i64).to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "None".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn is_one(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

fn is_set(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null))
}

/// Typed view over a checked configuration record.
#[derive(Debug, Clone)]
pub struct Flags {
    pub model_directory:   String,
    pub save_directory:    PathBuf,
    pub run_num:           String,
    pub num_epochs:        usize,
    pub model_restore:     String,
    pub file_epoch:        Option<String>,
    pub restore_meta:      bool,
    pub restore_slim:      bool,
    pub restore_slim_file: Option<PathBuf>,
    pub seed:              Option<u64>,
    pub gpu:               Option<i64>,
    /// Set by directory setup.
    pub restore_directory: PathBuf,
    /// Set by directory setup.
    pub logging_directory: PathBuf,
    raw: ConfigMap,
}

impl Flags {
    /// Check the record and build the typed view.
    pub fn from_config(config: ConfigMap) -> Result<Self, ConfigError> {
        let raw = check_dict_keys(config)?;

        let run_num = check_str(&raw["RUN_NUM"]);
        let model_restore = if is_set(raw.get("MODEL_RESTORE")) {
            check_str(&raw["MODEL_RESTORE"])
        } else {
            run_num.clone()
        };
        let num_epochs = raw["NUM_EPOCHS"]
            .as_u64()
            .or_else(|| raw["NUM_EPOCHS"].as_f64().map(|f| f as u64))
            .ok_or_else(|| invalid("NUM_EPOCHS", "expected a non-negative integer"))?
            as usize;
        let seed = match &raw["SEED"] {
            Value::Null => None,
            v => Some(v.as_u64().ok_or_else(|| invalid("SEED", "expected a non-negative integer"))?),
        };

        Ok(Self {
            model_directory:   check_str(&raw["MODEL_DIRECTORY"]),
            save_directory:    PathBuf::from(check_str(&raw["SAVE_DIRECTORY"])),
            run_num,
            num_epochs,
            model_restore,
            file_epoch:        raw.get("FILE_EPOCH").filter(|v| !v.is_null()).map(check_str),
            restore_meta:      is_one(raw.get("RESTORE_META")),
            restore_slim:      is_one(raw.get("RESTORE_SLIM")),
            restore_slim_file: raw
                .get("RESTORE_SLIM_FILE")
                .filter(|v| !v.is_null())
                .map(|v| PathBuf::from(check_str(v))),
            seed,
            gpu:               raw["GPU"].as_i64(),
            restore_directory: PathBuf::new(),
            logging_directory: PathBuf::new(),
            raw,
        })
    }

    /// Derive the restore and logging directories:
    /// `SAVE_DIRECTORY/MODEL_DIRECTORY/Model<N>/`.
    pub fn resolve_directories(&mut self) {
        let base = self.save_directory.join(&self.model_directory);
        self.restore_directory = base.join(format!("Model{}", self.model_restore));
        self.logging_directory = base.join(format!("Model{}", self.run_num));
        self.raw.insert(
            "RESTORE_DIRECTORY".into(),
            Value::String(self.restore_directory.display().to_string()),
        );
        self.raw.insert(
            "LOGGING_DIRECTORY".into(),
            Value::String(self.logging_directory.display().to_string()),
        );
    }

    /// The full merged record, including experiment-specific keys.
    pub fn raw(&self) -> &ConfigMap {
        &self.raw
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key).filter(|v| !v.is_null())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(Value::as_u64).map(|n| n as usize)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key:    key.to_string(),
        reason: reason.to_string(),
    }
}

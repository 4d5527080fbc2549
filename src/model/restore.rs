// ============================================================
// Restore Policies
// ============================================================
// A run starts from exactly one of:
//
//   Meta     — a full checkpoint of an earlier run; every variable
//              it holds is imported, declared or not
//   Slim     — a checkpoint trained elsewhere; only variables whose
//              names match (after dropping a "model/" scope) are
//              loaded, and shapes must agree
//   Scratch  — the freshly initialized variables

use std::{collections::HashMap, path::{Path, PathBuf}};

use burn::prelude::*;

use crate::config::Flags;
use crate::error::RestoreError;
use crate::infra::checkpoint::{get_variables_in_checkpoint_file, load_checkpoint, meta_path, name_in_checkpoint};
use crate::ml::VarStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSource {
    Meta(PathBuf),
    Slim(PathBuf),
    Scratch,
}

impl RestoreSource {
    /// Pick the policy from the flags. `RESTORE_META` wins over
    /// `RESTORE_SLIM`.
    pub fn from_flags(flags: &Flags) -> Result<Self, RestoreError> {
        if flags.restore_meta {
            let epoch = flags
                .file_epoch
                .as_deref()
                .ok_or(RestoreError::MissingKey { key: "FILE_EPOCH" })?;
            return Ok(RestoreSource::Meta(meta_path(&flags.restore_directory, epoch)));
        }
        if flags.restore_slim {
            let file = flags
                .restore_slim_file
                .clone()
                .ok_or(RestoreError::MissingKey { key: "RESTORE_SLIM_FILE" })?;
            return Ok(RestoreSource::Slim(file));
        }
        Ok(RestoreSource::Scratch)
    }
}

/// Import every variable of the checkpoint at `path`. Returns how
/// many variables were restored.
pub fn restore_meta<B: Backend>(vars: &mut VarStore<B>, path: &Path) -> Result<usize, RestoreError> {
    let (meta, values) = load_checkpoint::<B>(path, vars.device())?;

    for info in &meta.variables {
        if let Some(existing) = vars.info(&info.name) {
            if existing.shape != info.shape {
                return Err(RestoreError::ShapeMismatch {
                    name:       info.name.clone(),
                    model:      existing.shape.clone(),
                    checkpoint: info.shape.clone(),
                });
            }
        }
    }

    let count = meta.variables.len();
    for (info, value) in meta.variables.into_iter().zip(values) {
        vars.import(info, value)?;
    }
    tracing::info!("Model restored from {}", path.display());
    Ok(count)
}

/// Load the model variables that also appear in the checkpoint at
/// `path`. No match at all is an error; nothing is loaded then.
pub fn restore_slim<B: Backend>(vars: &mut VarStore<B>, path: &Path) -> Result<usize, RestoreError> {
    let in_checkpoint = get_variables_in_checkpoint_file(path)?;

    let mut matches = Vec::new();
    for info in vars.infos() {
        let key = name_in_checkpoint(&info.name);
        if let Some(shape) = in_checkpoint.get(key) {
            if *shape != info.shape {
                return Err(RestoreError::ShapeMismatch {
                    name:       info.name.clone(),
                    model:      info.shape.clone(),
                    checkpoint: shape.clone(),
                });
            }
            matches.push((info.name.clone(), key.to_string()));
        }
    }
    if matches.is_empty() {
        tracing::error!("Check the slim checkpoint filename. No model variables matched the checkpoint variables.");
        return Err(RestoreError::NoMatchingVariables { path: path.to_path_buf() });
    }

    let (meta, values) = load_checkpoint::<B>(path, vars.device())?;
    let mut by_name: HashMap<String, Tensor<B, 1>> = meta
        .variables
        .into_iter()
        .map(|info| info.name)
        .zip(values)
        .collect();

    let count = matches.len();
    for (model_name, checkpoint_name) in matches {
        if let Some(value) = by_name.remove(&checkpoint_name) {
            tracing::debug!("Restoring {} from {}", model_name, checkpoint_name);
            vars.assign(&model_name, value)?;
        }
    }
    tracing::info!("Model restored from {} ({} variables)", path.display(), count);
    Ok(count)
}

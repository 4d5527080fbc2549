// ============================================================
// Checkpoint Manager
// ============================================================
// Saves and restores the variables of a VarStore.
//
// What gets saved per checkpoint section N:
//   1. part_N.ckpt       — variable values, Burn's BinBytesRecorder
//                          (full precision), one flat tensor per
//                          variable in creation order
//   2. part_N.ckpt.meta  — JSON: variable names, shapes, trainable
//                          flags and collections, the layer log and
//                          the merged configuration
//
// The meta file is what makes a checkpoint self-describing: a
// restore can import variables the current network never
// declared, and a slim restore can pick a subset by name.
//
// File naming convention:
//   Model<RUN_NUM>/
//     part_1.ckpt
//     part_1.ckpt.meta
//     ...
//
// Reference: Burn Book §5 (Records and Checkpointing)

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use burn::{
    prelude::*,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
};
use serde::{Deserialize, Serialize};

use crate::config::ConfigMap;
use crate::error::CheckpointError;
use crate::ml::{VarInfo, VarStore};

const CHECKPOINT_EXTENSION: &str = "ckpt";
const META_SUFFIX: &str = ".meta";
const MODEL_SCOPE: &str = "model/";
const SNAPPY_SIGNATURE: &str = "corrupted compressed block contents";

type CheckpointRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// Output shape of one built layer, as recorded in the meta file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub scope: String,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub section:   String,
    pub step:      u64,
    pub variables: Vec<VarInfo>,
    #[serde(default)]
    pub layers:    Vec<LayerRecord>,
    #[serde(default)]
    pub flags:     ConfigMap,
}

impl CheckpointMeta {
    pub fn variable_shapes(&self) -> BTreeMap<String, Vec<usize>> {
        self.variables
            .iter()
            .map(|v| (v.name.clone(), v.shape.clone()))
            .collect()
    }
}

/// Convert a builder's `(scope, shape)` log into meta records.
pub fn layer_records(shapes: &[(String, Vec<usize>)]) -> Vec<LayerRecord> {
    shapes
        .iter()
        .map(|(scope, shape)| LayerRecord { scope: scope.clone(), shape: shape.clone() })
        .collect()
}

/// Everything a checkpoint stores besides the values.
#[derive(Debug, Clone, Default)]
pub struct CheckpointContext {
    pub step:   u64,
    pub layers: Vec<LayerRecord>,
    pub flags:  ConfigMap,
}

/// `<dir>/part_<section>.ckpt`
pub fn checkpoint_path(dir: &Path, section: &str) -> PathBuf {
    dir.join(format!("part_{section}.{CHECKPOINT_EXTENSION}"))
}

/// `<dir>/part_<section>.ckpt.meta`
pub fn meta_path(dir: &Path, section: &str) -> PathBuf {
    dir.join(format!("part_{section}.{CHECKPOINT_EXTENSION}{META_SUFFIX}"))
}

/// The values file for either a `.ckpt` or a `.ckpt.meta` path.
fn values_path_of(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text.strip_suffix(META_SUFFIX) {
        Some(stripped) => PathBuf::from(stripped),
        None => path.to_path_buf(),
    }
}

/// The meta file for either a `.ckpt` or a `.ckpt.meta` path.
fn meta_path_of(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if text.ends_with(META_SUFFIX) {
        path.to_path_buf()
    } else {
        PathBuf::from(format!("{text}{META_SUFFIX}"))
    }
}

/// A variable's name as stored by a model built under the
/// `model/` scope, with that prefix removed.
pub fn name_in_checkpoint(name: &str) -> &str {
    name.strip_prefix(MODEL_SCOPE).unwrap_or(name)
}

/// Writes checkpoints into one directory.
pub struct Saver {
    dir: PathBuf,
}

impl Saver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save every variable of `vars` as section `section`.
    /// Returns the path of the values file.
    pub fn save<B: Backend>(
        &self,
        vars:    &VarStore<B>,
        section: &str,
        context: &CheckpointContext,
    ) -> Result<PathBuf, CheckpointError> {
        fs::create_dir_all(&self.dir).map_err(|source| CheckpointError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = checkpoint_path(&self.dir, section);
        let bytes = Recorder::<B>::record(&CheckpointRecorder::default(), vars.values(), ())
            .map_err(|e| CheckpointError::Record { path: path.clone(), message: e.to_string() })?;
        fs::write(&path, bytes).map_err(|source| CheckpointError::Io { path: path.clone(), source })?;

        let meta = CheckpointMeta {
            section:   section.to_string(),
            step:      context.step,
            variables: vars.infos().to_vec(),
            layers:    context.layers.clone(),
            flags:     context.flags.clone(),
        };
        let meta_file = meta_path(&self.dir, section);
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|source| CheckpointError::Meta { path: meta_file.clone(), source })?;
        fs::write(&meta_file, json)
            .map_err(|source| CheckpointError::Io { path: meta_file.clone(), source })?;

        tracing::debug!("Saved checkpoint '{}' ({} variables)", path.display(), vars.len());
        Ok(path)
    }
}

/// Read the JSON meta file that belongs to `path`
/// (`.ckpt` or `.ckpt.meta`).
pub fn read_meta(path: &Path) -> Result<CheckpointMeta, CheckpointError> {
    let meta_file = meta_path_of(path);
    let json = fs::read_to_string(&meta_file)
        .map_err(|source| CheckpointError::Io { path: meta_file.clone(), source })?;
    serde_json::from_str(&json).map_err(|source| CheckpointError::Meta { path: meta_file, source })
}

/// Load a checkpoint: its meta and one flat tensor per variable,
/// in the meta's order.
pub fn load_checkpoint<B: Backend>(
    path:   &Path,
    device: &B::Device,
) -> Result<(CheckpointMeta, Vec<Tensor<B, 1>>), CheckpointError> {
    let meta = read_meta(path)?;
    let values_file = values_path_of(path);
    let bytes = fs::read(&values_file)
        .map_err(|source| CheckpointError::Io { path: values_file.clone(), source })?;
    let values: Vec<Tensor<B, 1>> = Recorder::<B>::load(&CheckpointRecorder::default(), bytes, device)
        .map_err(|e| CheckpointError::Record { path: values_file.clone(), message: e.to_string() })?;

    let consistent = values.len() == meta.variables.len()
        && values
            .iter()
            .zip(&meta.variables)
            .all(|(value, info)| value.dims()[0] == info.numel());
    if !consistent {
        return Err(CheckpointError::Inconsistent {
            path:   values_file,
            listed: meta.variables.len(),
            stored: values.len(),
        });
    }
    Ok((meta, values))
}

/// Variable name → shape for the checkpoint at `path`. Failures are
/// logged (with a hint for snappy-compressed files) and returned.
pub fn get_variables_in_checkpoint_file(path: &Path) -> Result<BTreeMap<String, Vec<usize>>, CheckpointError> {
    match read_meta(path) {
        Ok(meta) => Ok(meta.variable_shapes()),
        Err(e) => {
            tracing::error!("{}", e);
            if e.to_string().contains(SNAPPY_SIGNATURE) {
                tracing::error!(
                    "It's likely that your checkpoint file has been compressed with SNAPPY."
                );
            }
            Err(e)
        }
    }
}

// ============================================================
// InspectUseCase
// ============================================================
// Lists what a checkpoint holds without building a model: every
// variable with its shape, the layer log and the configuration the
// run was started with. Useful before a slim restore, to see which
// names a new network has to match.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::infra::{checkpoint::read_meta, get_variables_in_checkpoint_file, name_in_checkpoint, CheckpointMeta};

pub struct InspectUseCase {
    checkpoint: PathBuf,
}

/// One variable as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableLine {
    pub name:       String,
    /// The name a slim restore matches against.
    pub slim_name:  String,
    pub shape:      Vec<usize>,
}

impl InspectUseCase {
    pub fn new(checkpoint: impl Into<PathBuf>) -> Self {
        Self { checkpoint: checkpoint.into() }
    }

    pub fn variables(&self) -> Result<Vec<VariableLine>> {
        let shapes = get_variables_in_checkpoint_file(&self.checkpoint)
            .with_context(|| format!("Cannot list variables of '{}'", self.checkpoint.display()))?;
        Ok(shapes
            .into_iter()
            .map(|(name, shape)| VariableLine {
                slim_name: name_in_checkpoint(&name).to_string(),
                name,
                shape,
            })
            .collect())
    }

    pub fn meta(&self) -> Result<CheckpointMeta> {
        read_meta(&self.checkpoint)
            .with_context(|| format!("Cannot read checkpoint meta of '{}'", self.checkpoint.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{CheckpointContext, LayerRecord, Saver};
    use crate::ml::{Collection, Init, VarStore};
    use burn::backend::NdArray;

    #[test]
    fn lists_variables_and_layers() {
        let dir = tempfile::tempdir().unwrap();
        let mut vars = VarStore::<NdArray>::new(&Default::default());
        vars.get_or_init::<1>("model/fc_1/bias", [4], true, Collection::Constant, Init::Constant(0.0))
            .unwrap();
        let context = CheckpointContext {
            step:   12,
            layers: vec![LayerRecord { scope: "fc_1".into(), shape: vec![2, 4] }],
            ..Default::default()
        };
        let path = Saver::new(dir.path()).save(&vars, "3", &context).unwrap();

        let inspect = InspectUseCase::new(&path);
        let lines = inspect.variables().unwrap();
        assert_eq!(lines, vec![VariableLine {
            name:      "model/fc_1/bias".into(),
            slim_name: "fc_1/bias".into(),
            shape:     vec![4],
        }]);

        let meta = inspect.meta().unwrap();
        assert_eq!(meta.step, 12);
        assert_eq!(meta.section, "3");
        assert_eq!(meta.layers, context.layers);
    }

    #[test]
    fn missing_checkpoint_fails_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let err = InspectUseCase::new(dir.path().join("part_1.ckpt")).variables().unwrap_err();
        assert!(err.to_string().contains("Cannot list variables"));
    }
}

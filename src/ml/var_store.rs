// ============================================================
// Variable Store
// ============================================================
// Every learnable (or frozen) tensor of a network lives here
// under a scoped name such as "conv_1/weights".
//
// Because burn runs eagerly, the network is rebuilt on every
// forward pass. The store is what makes that cheap and stable:
//
//   first build   → get_or_init creates the variable
//   later builds  → get_or_init returns the same variable
//
// Values are stored flat as 1-D Params and reshaped on use, so a
// single Vec<Param> can hold variables of any rank. That Vec is a
// burn Module, which lets optimizers and recorders treat the
// whole store as one unit.

use std::collections::HashMap;

use burn::{
    module::Param,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, Distribution},
};
use serde::{Deserialize, Serialize};

use crate::error::LayerError;

/// Which bookkeeping group a variable belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Collection {
    /// Layer weights; these count towards the weight-decay loss.
    Weights,
    /// Biases, scales and other constant-initialized variables.
    Constant,
}

/// How a new variable is filled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    Constant(f64),
    /// He-normal: N(0, 2 / fan_in).
    HeNormal { fan_in: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarInfo {
    pub name:       String,
    pub shape:      Vec<usize>,
    pub trainable:  bool,
    pub collection: Collection,
}

impl VarInfo {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// The flat parameter list the optimizer steps over.
#[derive(Module, Debug)]
pub struct Parameters<B: Backend> {
    pub tensors: Vec<Param<Tensor<B, 1>>>,
}

#[derive(Debug)]
pub struct VarStore<B: Backend> {
    device: B::Device,
    infos:  Vec<VarInfo>,
    index:  HashMap<String, usize>,
    params: Parameters<B>,
}

impl<B: Backend> VarStore<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            device: device.clone(),
            infos:  Vec::new(),
            index:  HashMap::new(),
            params: Parameters { tensors: Vec::new() },
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Return the variable `name`, creating it on first use.
    /// A later request with a different shape is an error.
    pub fn get_or_init<const D: usize>(
        &mut self,
        name:       &str,
        shape:      [usize; D],
        trainable:  bool,
        collection: Collection,
        init:       Init,
    ) -> Result<Tensor<B, D>, LayerError> {
        if let Some(&i) = self.index.get(name) {
            let existing = &self.infos[i].shape;
            if existing.as_slice() != shape.as_slice() {
                return Err(LayerError::ShapeConflict {
                    name:      name.to_string(),
                    existing:  existing.clone(),
                    requested: shape.to_vec(),
                });
            }
            return Ok(self.params.tensors[i].val().reshape(shape));
        }

        let numel: usize = shape.iter().product();
        let values = match init {
            Init::Constant(value) => Tensor::<B, 1>::full([numel], value, &self.device),
            Init::HeNormal { fan_in } => {
                let std = (2.0 / fan_in.max(1) as f64).sqrt();
                Tensor::<B, 1>::random([numel], Distribution::Normal(0.0, std), &self.device)
            }
        };
        tracing::debug!("Created variable {} {:?}", name, shape);
        self.push(
            VarInfo { name: name.to_string(), shape: shape.to_vec(), trainable, collection },
            values,
        );
        Ok(self.params.tensors[self.infos.len() - 1].val().reshape(shape))
    }

    /// Fetch an existing variable with its declared rank.
    pub fn get<const D: usize>(&self, name: &str) -> Result<Tensor<B, D>, LayerError> {
        let i = self.position(name)?;
        let info = &self.infos[i];
        if info.shape.len() != D {
            return Err(LayerError::RankMismatch {
                name:     name.to_string(),
                expected: D,
                found:    info.shape.len(),
            });
        }
        let mut shape = [0usize; D];
        shape.copy_from_slice(&info.shape);
        Ok(self.params.tensors[i].val().reshape(shape))
    }

    /// The flattened value of `name`.
    pub fn value(&self, name: &str) -> Option<Tensor<B, 1>> {
        self.index.get(name).map(|&i| self.params.tensors[i].val())
    }

    /// Overwrite the value of an existing variable, keeping its
    /// metadata. `values` must hold exactly `numel` elements.
    pub fn assign(&mut self, name: &str, values: Tensor<B, 1>) -> Result<(), LayerError> {
        let i = self.position(name)?;
        let info = &self.infos[i];
        let [found] = values.dims();
        if found != info.numel() {
            return Err(LayerError::ShapeConflict {
                name:      name.to_string(),
                existing:  info.shape.clone(),
                requested: vec![found],
            });
        }
        self.params.tensors[i] = make_param(values, info.trainable);
        Ok(())
    }

    /// Add a variable the network never declared, or overwrite one
    /// that exists.
    pub fn import(&mut self, info: VarInfo, values: Tensor<B, 1>) -> Result<(), LayerError> {
        if self.index.contains_key(&info.name) {
            return self.assign(&info.name, values);
        }
        self.push(info, values);
        Ok(())
    }

    fn push(&mut self, info: VarInfo, values: Tensor<B, 1>) {
        self.index.insert(info.name.clone(), self.infos.len());
        self.params.tensors.push(make_param(values, info.trainable));
        self.infos.push(info);
    }

    fn position(&self, name: &str) -> Result<usize, LayerError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| LayerError::UnknownVariable { name: name.to_string() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn info(&self, name: &str) -> Option<&VarInfo> {
        self.index.get(name).map(|&i| &self.infos[i])
    }

    /// Variables in creation order.
    pub fn infos(&self) -> &[VarInfo] {
        &self.infos
    }

    pub fn trainable_infos(&self) -> impl Iterator<Item = &VarInfo> {
        self.infos.iter().filter(|info| info.trainable)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Flat values in creation order, for checkpointing.
    pub fn values(&self) -> Vec<Tensor<B, 1>> {
        self.params.tensors.iter().map(|p| p.val()).collect()
    }

    pub fn parameters(&self) -> &Parameters<B> {
        &self.params
    }

    /// Σ ½‖w‖² over the Weights collection.
    pub fn weight_decay_loss(&self) -> Tensor<B, 1> {
        self.infos
            .iter()
            .zip(&self.params.tensors)
            .filter(|(info, _)| info.collection == Collection::Weights)
            .map(|(_, p)| p.val().powf_scalar(2.0).sum().mul_scalar(0.5))
            .fold(Tensor::zeros([1], &self.device), |acc, norm| acc + norm)
    }
}

impl<B: AutodiffBackend> VarStore<B> {
    /// Apply one optimizer step using the gradients of a loss.
    pub fn step<O>(&mut self, optim: &mut O, lr: f64, grads: B::Gradients)
    where
        O: Optimizer<Parameters<B>, B>,
    {
        let params = Parameters { tensors: std::mem::take(&mut self.params.tensors) };
        let grads = GradientsParams::from_grads(grads, &params);
        self.params = optim.step(lr, params, grads);
    }
}

fn make_param<B: Backend>(values: Tensor<B, 1>, trainable: bool) -> Param<Tensor<B, 1>> {
    Param::from_tensor(values).set_require_grad(trainable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn get_or_init_reuses_existing_variables() {
        let device = Default::default();
        let mut store = VarStore::<B>::new(&device);

        let first: Tensor<B, 2> = store
            .get_or_init("fc_1/weights", [4, 3], true, Collection::Weights, Init::HeNormal { fan_in: 4 })
            .unwrap();
        let again: Tensor<B, 2> = store
            .get_or_init("fc_1/weights", [4, 3], true, Collection::Weights, Init::Constant(0.0))
            .unwrap();

        assert_eq!(store.len(), 1);
        first.into_data().assert_eq(&again.into_data(), true);
    }

    #[test]
    fn shape_change_is_rejected() {
        let device = Default::default();
        let mut store = VarStore::<B>::new(&device);
        store
            .get_or_init::<1>("b", [3], true, Collection::Constant, Init::Constant(0.0))
            .unwrap();
        let err = store
            .get_or_init::<1>("b", [4], true, Collection::Constant, Init::Constant(0.0))
            .unwrap_err();
        assert!(matches!(err, LayerError::ShapeConflict { .. }));
    }

    #[test]
    fn weight_decay_counts_only_weights() {
        let device = Default::default();
        let mut store = VarStore::<B>::new(&device);
        store
            .get_or_init::<1>("w", [4], true, Collection::Weights, Init::Constant(1.0))
            .unwrap();
        store
            .get_or_init::<1>("bias", [4], true, Collection::Constant, Init::Constant(5.0))
            .unwrap();

        // ½ · (1² · 4)
        let loss: f32 = store.weight_decay_loss().into_scalar();
        assert!((loss - 2.0).abs() < 1e-6);
    }

    #[test]
    fn get_checks_rank_and_name() {
        let device = Default::default();
        let mut store = VarStore::<B>::new(&device);
        store
            .get_or_init::<2>("w", [2, 2], false, Collection::Weights, Init::Constant(1.0))
            .unwrap();

        assert!(store.get::<2>("w").is_ok());
        assert!(matches!(store.get::<1>("w"), Err(LayerError::RankMismatch { .. })));
        assert!(matches!(store.get::<1>("nope"), Err(LayerError::UnknownVariable { .. })));
        assert_eq!(store.trainable_infos().count(), 0);
    }

    #[test]
    fn import_adds_and_overwrites() {
        let device = Default::default();
        let mut store = VarStore::<B>::new(&device);
        let info = VarInfo {
            name:       "extra".into(),
            shape:      vec![2],
            trainable:  true,
            collection: Collection::Constant,
        };
        store.import(info.clone(), Tensor::from_floats([1.0, 2.0], &device)).unwrap();
        store.import(info, Tensor::from_floats([3.0, 4.0], &device)).unwrap();

        assert_eq!(store.len(), 1);
        let values: Vec<f32> = store.value("extra").unwrap().into_data().to_vec().unwrap();
        assert_eq!(values, vec![3.0, 4.0]);
    }
}

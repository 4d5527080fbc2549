// ============================================================
// ML Layer (Burn)
// ============================================================
// Network construction on top of burn's tensor ops.
//
//   var_store.rs  — named variables, get-or-create semantics,
//                   weight-decay loss, optimizer step
//   layers.rs     — the Layers builder: conv / deconv / pool /
//                   fc / residual / noisy-AND
//   specs.rs      — layer hyperparameters as burn Configs
//   norm.rs       — training-time batch normalization
//   activation.rs — activation functions selectable by value
//
// Reference: Burn Book §3 (Building Blocks)
//            He et al. (2016) Identity Mappings in Deep Residual Networks
//            Kraus et al. (2016) Classifying and segmenting microscopy
//            images with deep multiple instance learning

pub mod activation;
pub mod layers;
pub mod norm;
pub mod specs;
pub mod var_store;

pub use activation::Activation;
pub use layers::{same_padding, Features, LayerKind, Layers, ResidualShortcut};
pub use norm::{batch_norm, NormKind, BN_EPSILON};
pub use specs::{ConvNetSpec, ConvSpec, FcSpec, Padding, ResSpec};
pub use var_store::{Collection, Init, Parameters, VarInfo, VarStore};

//! AO Blur Core Library
//!
//! Depth-guided separable bilateral filter that merges a noisy low-sample
//! ambient-occlusion buffer with a high-sample one, plus a gradient-based
//! trainer that fits the filter's five parameters against reference frames.
//!
//! The forward pass is generic over [`AoFloat`]. Running it over [`Dual`]
//! numbers yields exact parameter gradients, which is all the trainer needs.

pub mod autodiff;
pub mod blend;
pub mod checkpoint;
pub mod error;
pub mod filter;
pub mod float_trait;
pub mod frame;
pub mod kernel;
pub mod loss;
pub mod optim;
pub mod params;
pub mod reduce;
pub mod separable;
pub mod trainer;
pub mod window;

// Re-export commonly used types at the crate root
pub use autodiff::Dual;
pub use checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpoint, JsonFileCheckpoint};
pub use error::{AoError, AoResult};
pub use filter::{bilateral_forward, forward_dual, BilateralFilter, FilterConfig};
pub use float_trait::AoFloat;
pub use frame::{ConfidenceMode, Frame, FrameStack, LossTarget, TargetConfig};
pub use loss::{AoLoss, LossFunction, StructuralSimilarity, WeightedSquaredError};
pub use optim::{OptimizerConfig, OptimizerKind};
pub use params::{FilterParams, ParamId, ParameterVector, NUM_PARAMS};
pub use trainer::{FitReport, FrameSource, SourceFitReport, TrainConfig, Trainer};

//! Temporal graph feature engine

pub mod handle;
pub mod rings;
pub mod snapshot;
pub mod temporal;

pub use handle::GraphHandle;
pub use rings::{LabelPropagationDetector, Ring, RingAnnotation, RingDetector};
pub use snapshot::{GraphSnapshot, PageRankParams};
pub use temporal::{decay_weight, GraphFeatures, GraphState, TemporalGraph};

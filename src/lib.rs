pub mod artifacts;
pub mod error;
pub mod loss;
pub mod metric;
pub mod model;

#[cfg(feature = "dataset")]
pub mod dataset;

#[cfg(feature = "training")]
pub mod training;

pub use artifacts::ArtifactDir;
pub use error::{UNetError, UNetResult};
pub use loss::{JaccardLoss, JaccardLossConfig, LOSS_SMOOTH, jaccard_distance};
pub use metric::{IOU_THRESHOLD, METRIC_SMOOTH, iou};
pub use model::{Encoding, OutputActivation, SkipConnections, UNet, UNetConfig, UNetPlan};

#[cfg(feature = "dataset")]
pub use dataset::{SegmentationBatch, SegmentationBatcher, SegmentationConfig, SegmentationItem};

#[cfg(feature = "training")]
pub use training::{IoUInput, IoUMetric, SegmentationOutput};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

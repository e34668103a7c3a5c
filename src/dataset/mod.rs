mod segmentation;

pub use segmentation::{SegmentationBatch, SegmentationBatcher, SegmentationConfig, SegmentationItem};

//! Input pipeline for image segmentation training.
//!
//! Samples live as `<root>/<name>/images/<file>` plus `<root>/<name>/gt_mask/<file>`.
//! [`datasets::DataIndex`] splits the names into training and validation by hash, and
//! [`datasets::SegmentationLoader`] streams decoded, resized, batched image/mask pairs.

pub mod datasets;

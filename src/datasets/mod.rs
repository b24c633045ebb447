pub mod errors;
pub mod loader;
pub mod pairs;
pub mod shuffle;
pub mod split;
pub mod transform;

pub use errors::{DatasetError, DatasetResult};
pub use loader::{build_train_val_loaders, Batch, Batches, LoaderConfig, SegmentationLoader};
pub use pairs::{resolve_pair, resolve_pairs, SamplePair};
pub use shuffle::ShuffleBuffer;
pub use split::{split, which_partition, DataIndex, Entry, Partition, DEFAULT_SEED};
pub use transform::{Normalization, Sample, TransformOptions};

//! Batched, parallel, prefetching iteration over image/mask pairs.

use std::{
    ops::Index,
    path::Path,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver, Sender};
use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;

use super::{
    errors::{DatasetError, DatasetResult},
    pairs::{resolve_pairs, SamplePair},
    shuffle::ShuffleBuffer,
    split::{DataIndex, Entry, Partition, DEFAULT_SEED},
    transform::{load_sample, Sample, TransformOptions, MASK_CHANNELS},
};

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    /// Side of the square input image after resizing.
    pub img_size: u32,
    /// Side of the square mask after resizing.
    pub label_size: u32,
    pub batch_size: usize,
    /// Shuffle samples through a bounded buffer before decoding.
    pub shuffle: bool,
    pub seed: u64,
    /// Decode threads per pass.
    pub num_workers: usize,
    /// Shuffle buffer holds `shuffle_buffer_factor * batch_size` samples.
    pub shuffle_buffer_factor: usize,
    /// Finished batches queued ahead of the consumer.
    pub prefetch_batches: usize,
    /// Drop the trailing partial batch.
    pub drop_last: bool,
    pub transform: TransformOptions,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            img_size: 256,
            label_size: 256,
            batch_size: 16,
            shuffle: true,
            seed: DEFAULT_SEED,
            num_workers: 8,
            shuffle_buffer_factor: 100,
            prefetch_batches: 10,
            drop_last: false,
            transform: TransformOptions::default(),
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> DatasetResult<()> {
        let checks = [
            (self.img_size == 0, "img_size must be > 0"),
            (self.label_size == 0, "label_size must be > 0"),
            (self.batch_size == 0, "batch_size must be > 0"),
            (self.num_workers == 0, "num_workers must be > 0"),
        ];
        if let Some((_, msg)) = checks.iter().find(|(failed, _)| *failed) {
            return Err(DatasetError::InvalidConfig(msg.to_string()));
        }
        if self.shuffle_buffer_len().is_none() {
            return Err(DatasetError::InvalidConfig(format!(
                "shuffle_buffer_factor {} * batch_size {} overflows",
                self.shuffle_buffer_factor, self.batch_size
            )));
        }
        Ok(())
    }

    pub fn shuffle_buffer_len(&self) -> Option<usize> {
        self.shuffle_buffer_factor.checked_mul(self.batch_size)
    }

    pub fn image_shape(&self) -> [usize; 3] {
        let side = self.img_size as usize;
        [side, side, self.transform.image_channels()]
    }

    pub fn mask_shape(&self) -> [usize; 3] {
        let side = self.label_size as usize;
        [side, side, MASK_CHANNELS]
    }
}

/// Row-major NHWC buffers for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub images: Vec<f32>,
    pub masks: Vec<f32>,
    image_shape: [usize; 4],
    mask_shape: [usize; 4],
}

impl Batch {
    fn stack(samples: Vec<Sample>, cfg: &LoaderConfig) -> Self {
        let n = samples.len();
        let [h, w, c] = cfg.image_shape();
        let [mh, mw, mc] = cfg.mask_shape();
        let mut images = Vec::with_capacity(n * h * w * c);
        let mut masks = Vec::with_capacity(n * mh * mw * mc);
        for sample in samples {
            images.extend_from_slice(&sample.image);
            masks.extend_from_slice(&sample.mask);
        }
        Self {
            images,
            masks,
            image_shape: [n, h, w, c],
            mask_shape: [n, mh, mw, mc],
        }
    }

    pub fn len(&self) -> usize {
        self.image_shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn image_shape(&self) -> [usize; 4] {
        self.image_shape
    }

    pub fn mask_shape(&self) -> [usize; 4] {
        self.mask_shape
    }

    pub fn image(&self, i: usize) -> &[f32] {
        let [_, h, w, c] = self.image_shape;
        let stride = h * w * c;
        &self.images[i * stride..(i + 1) * stride]
    }

    pub fn mask(&self, i: usize) -> &[f32] {
        let [_, h, w, c] = self.mask_shape;
        let stride = h * w * c;
        &self.masks[i * stride..(i + 1) * stride]
    }
}

/// Resolved pairs plus the settings to stream them.
///
/// Each call to [`SegmentationLoader::batches`] builds a fresh single-pass pipeline.
#[derive(Debug, Clone)]
pub struct SegmentationLoader {
    pairs: Arc<[SamplePair]>,
    cfg: LoaderConfig,
}

impl SegmentationLoader {
    pub fn new<P: AsRef<Path>>(
        data_dir: P,
        entries: &[Entry],
        cfg: LoaderConfig,
    ) -> DatasetResult<Self> {
        cfg.validate()?;
        let pairs = resolve_pairs(data_dir, entries)?;
        Self::from_pairs(pairs, cfg)
    }

    pub fn from_pairs(pairs: Vec<SamplePair>, cfg: LoaderConfig) -> DatasetResult<Self> {
        cfg.validate()?;
        let loader = Self {
            pairs: pairs.into(),
            cfg,
        };
        log::info!(
            "loader ready: {} samples, {} batches of {}",
            loader.len(),
            loader.num_batches(),
            loader.cfg.batch_size
        );
        Ok(loader)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.cfg
    }

    pub fn num_batches(&self) -> usize {
        let (n, bs) = (self.len(), self.cfg.batch_size);
        if self.cfg.drop_last {
            n / bs
        } else {
            n.div_ceil(bs)
        }
    }

    /// Decode one pair without going through the pipeline.
    pub fn sample(&self, index: usize) -> DatasetResult<Sample> {
        let pair = self.pairs.get(index).ok_or(DatasetError::IndexOutOfRange {
            index,
            len: self.len(),
        })?;
        load_sample(
            pair,
            self.cfg.img_size,
            self.cfg.label_size,
            &self.cfg.transform,
        )
    }

    pub fn batches(&self) -> DatasetResult<Batches> {
        self.batches_for_epoch(0)
    }

    /// Like [`SegmentationLoader::batches`], with the shuffle seed offset by `epoch`.
    pub fn batches_for_epoch(&self, epoch: u64) -> DatasetResult<Batches> {
        let n = self.len();
        let order: Box<dyn Iterator<Item = usize> + Send> = if self.cfg.shuffle {
            let capacity = self.cfg.shuffle_buffer_len().unwrap_or(usize::MAX).min(n);
            let rng = StdRng::seed_from_u64(self.cfg.seed.wrapping_add(epoch));
            Box::new(ShuffleBuffer::new(0..n, capacity, rng))
        } else {
            Box::new(0..n)
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.cfg.num_workers)
            .thread_name(|i| format!("seg-decode-{i}"))
            .build()?;
        let (tx, rx) = bounded(self.cfg.prefetch_batches);

        log::debug!(
            "starting pass epoch={epoch} samples={n} shuffle={} workers={} prefetch={}",
            self.cfg.shuffle,
            self.cfg.num_workers,
            self.cfg.prefetch_batches
        );
        let producer = Producer {
            pairs: Arc::clone(&self.pairs),
            cfg: self.cfg.clone(),
            order,
            pool,
            tx,
        };
        let handle = thread::Builder::new()
            .name("seg-input-producer".to_string())
            .spawn(move || producer.run())
            .map_err(DatasetError::Spawn)?;

        Ok(Batches {
            rx: Some(rx),
            producer: Some(handle),
            remaining: self.num_batches(),
            done: false,
        })
    }
}

impl Index<usize> for SegmentationLoader {
    type Output = SamplePair;
    fn index(&self, index: usize) -> &Self::Output {
        &self.pairs[index]
    }
}

struct Producer {
    pairs: Arc<[SamplePair]>,
    cfg: LoaderConfig,
    order: Box<dyn Iterator<Item = usize> + Send>,
    pool: rayon::ThreadPool,
    tx: Sender<DatasetResult<Batch>>,
}

impl Producer {
    fn run(mut self) {
        let batch_size = self.cfg.batch_size;
        loop {
            let chunk: Vec<usize> = self.order.by_ref().take(batch_size).collect();
            if chunk.is_empty() || (self.cfg.drop_last && chunk.len() < batch_size) {
                return;
            }

            let (pairs, cfg) = (&self.pairs, &self.cfg);
            let loaded: DatasetResult<Vec<Sample>> = self.pool.install(|| {
                chunk
                    .par_iter()
                    .map(|&i| {
                        load_sample(&pairs[i], cfg.img_size, cfg.label_size, &cfg.transform)
                    })
                    .collect()
            });
            let batch = loaded.map(|samples| Batch::stack(samples, cfg));

            let failed = batch.is_err();
            if self.tx.send(batch).is_err() || failed {
                return;
            }
        }
    }
}

/// One lazy, finite pass over a loader.
///
/// Yields the first error and then stops. Dropping it early stops the producer.
pub struct Batches {
    rx: Option<Receiver<DatasetResult<Batch>>>,
    producer: Option<JoinHandle<()>>,
    remaining: usize,
    done: bool,
}

impl Batches {
    fn finish(&mut self) {
        self.done = true;
        self.rx = None;
        if let Some(handle) = self.producer.take() {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
    }
}

impl Iterator for Batches {
    type Item = DatasetResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let received = self.rx.as_ref()?.recv();
        match received {
            Ok(Ok(batch)) => {
                self.remaining = self.remaining.saturating_sub(1);
                Some(Ok(batch))
            }
            Ok(Err(e)) => {
                self.finish();
                Some(Err(e))
            }
            Err(_) => {
                self.finish();
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            (0, Some(0))
        } else {
            (0, Some(self.remaining))
        }
    }
}

impl Drop for Batches {
    fn drop(&mut self) {
        self.rx = None;
        if let Some(handle) = self.producer.take() {
            join_logging_panic(handle);
        }
    }
}

/// Join without re-raising; returns whether the thread panicked.
fn join_logging_panic(handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => false,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("non-string panic payload");
            log::error!("loader producer panicked: {msg}");
            true
        }
    }
}

/// Index `data_dir` and build a training loader with `cfg` and a validation loader that
/// keeps the sizes but never shuffles or drops samples.
pub fn build_train_val_loaders<P: AsRef<Path>>(
    data_dir: P,
    validation_percentage: f64,
    cfg: LoaderConfig,
) -> DatasetResult<(SegmentationLoader, SegmentationLoader)> {
    let data_dir = data_dir.as_ref();
    let index = DataIndex::from_dir(data_dir, validation_percentage, cfg.seed)?;
    let val_cfg = LoaderConfig {
        shuffle: false,
        drop_last: false,
        ..cfg.clone()
    };
    let train = SegmentationLoader::new(data_dir, index.get(Partition::Training), cfg)?;
    let val = SegmentationLoader::new(data_dir, index.get(Partition::Validation), val_cfg)?;
    Ok((train, val))
}

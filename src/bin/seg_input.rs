//! Inspect a segmentation dataset split and time one pass of the input pipeline.

use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use segmentation_input::datasets::{
    DataIndex, LoaderConfig, Normalization, Partition, SegmentationLoader, TransformOptions,
    DEFAULT_SEED,
};

#[derive(Parser)]
#[command(name = "seg-input")]
#[command(about = "Hash-split and stream image/mask segmentation datasets", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the training/validation split of a data directory
    Split {
        data_dir: PathBuf,

        #[arg(long, default_value_t = 20.0)]
        validation_percentage: f64,

        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        /// Also print every entry name, in shuffled order
        #[arg(long)]
        list: bool,
    },

    /// Decode one full pass over a partition and report batch shapes
    Scan {
        data_dir: PathBuf,

        #[arg(long, default_value = "training")]
        partition: Partition,

        #[arg(long, default_value_t = 20.0)]
        validation_percentage: f64,

        #[arg(long, default_value_t = 256)]
        img_size: u32,

        #[arg(long, default_value_t = 256)]
        label_size: u32,

        #[arg(long, default_value_t = 16)]
        batch_size: usize,

        #[arg(long, default_value_t = 8)]
        workers: usize,

        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        #[arg(long)]
        no_shuffle: bool,

        #[arg(long)]
        drop_last: bool,

        /// Scale values to [-1, 1] instead of [0, 1]
        #[arg(long)]
        signed: bool,

        /// Convert input images to a single luma channel
        #[arg(long)]
        grayscale: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Commands::Split {
            data_dir,
            validation_percentage,
            seed,
            list,
        } => {
            let index = DataIndex::from_dir(&data_dir, validation_percentage, seed)
                .with_context(|| format!("indexing {}", data_dir.display()))?;
            for partition in Partition::ALL {
                println!("{partition}: {}", index.size(partition));
                if list {
                    for entry in index.get(partition) {
                        println!("  {}", entry.image);
                    }
                }
            }
        }
        Commands::Scan {
            data_dir,
            partition,
            validation_percentage,
            img_size,
            label_size,
            batch_size,
            workers,
            seed,
            no_shuffle,
            drop_last,
            signed,
            grayscale,
        } => {
            let norm = if signed {
                Normalization::MinusOneOne
            } else {
                Normalization::ZeroOne
            };
            let cfg = LoaderConfig {
                img_size,
                label_size,
                batch_size,
                shuffle: !no_shuffle,
                seed,
                num_workers: workers,
                drop_last,
                transform: TransformOptions {
                    image_normalization: norm,
                    mask_normalization: norm,
                    grayscale_image: grayscale,
                },
                ..Default::default()
            };

            let index = DataIndex::from_dir(&data_dir, validation_percentage, seed)
                .with_context(|| format!("indexing {}", data_dir.display()))?;
            let loader = SegmentationLoader::new(&data_dir, index.get(partition), cfg)
                .with_context(|| format!("resolving {partition} pairs"))?;

            let pb = indicatif::ProgressBar::new(loader.num_batches() as u64);
            let start = Instant::now();
            let (mut batches, mut samples) = (0usize, 0usize);
            let mut shapes = None;
            for batch in loader.batches()? {
                let batch = batch.context("decoding batch")?;
                batches += 1;
                samples += batch.len();
                shapes.get_or_insert((batch.image_shape(), batch.mask_shape()));
                pb.inc(1);
            }
            pb.finish_and_clear();

            println!(
                "{partition}: {samples} samples in {batches} batches ({:?})",
                start.elapsed()
            );
            if let Some((image, mask)) = shapes {
                println!("first batch: images {image:?} masks {mask:?}");
            }
        }
    }
    Ok(())
}

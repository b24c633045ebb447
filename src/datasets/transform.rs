//! Per-sample decoding: read, decode, nearest-neighbor resize, scale to floats.

use std::{fs, path::Path};

use image::{DynamicImage, ImageBuffer, Pixel};

use super::{
    errors::{DatasetError, DatasetResult},
    pairs::SamplePair,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    /// `x / 255`, in `[0, 1]`.
    #[default]
    ZeroOne,
    /// `x / 255 * 2 - 1`, in `[-1, 1]`.
    MinusOneOne,
}

impl Normalization {
    pub fn apply(&self, value: u8) -> f32 {
        let unit = f32::from(value) / 255.0;
        match self {
            Normalization::ZeroOne => unit,
            Normalization::MinusOneOne => unit * 2.0 - 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransformOptions {
    pub image_normalization: Normalization,
    pub mask_normalization: Normalization,
    /// Collapse the input image to one luma channel.
    pub grayscale_image: bool,
}

impl TransformOptions {
    pub fn image_channels(&self) -> usize {
        if self.grayscale_image {
            1
        } else {
            3
        }
    }
}

pub const MASK_CHANNELS: usize = 1;

/// One decoded pair, both in HWC layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub image: Vec<f32>,
    pub mask: Vec<f32>,
}

pub fn load_sample(
    pair: &SamplePair,
    img_size: u32,
    label_size: u32,
    opts: &TransformOptions,
) -> DatasetResult<Sample> {
    Ok(Sample {
        image: load_image(&pair.image, img_size, opts)?,
        mask: load_mask(&pair.mask, label_size, opts)?,
    })
}

pub fn load_image<P: AsRef<Path>>(
    path: P,
    size: u32,
    opts: &TransformOptions,
) -> DatasetResult<Vec<f32>> {
    let decoded = decode(path.as_ref())?;
    let norm = opts.image_normalization;
    if opts.grayscale_image {
        Ok(to_floats(&resize_nearest(&decoded.to_luma8(), size), norm))
    } else {
        Ok(to_floats(&resize_nearest(&decoded.to_rgb8(), size), norm))
    }
}

pub fn load_mask<P: AsRef<Path>>(
    path: P,
    size: u32,
    opts: &TransformOptions,
) -> DatasetResult<Vec<f32>> {
    let decoded = decode(path.as_ref())?;
    Ok(to_floats(
        &resize_nearest(&decoded.to_luma8(), size),
        opts.mask_normalization,
    ))
}

fn decode(path: &Path) -> DatasetResult<DynamicImage> {
    let bytes = fs::read(path).map_err(|e| DatasetError::io(path, e))?;
    image::load_from_memory(&bytes).map_err(|source| DatasetError::Image {
        path: path.to_path_buf(),
        source,
    })
}

/// Square nearest-neighbor resize; never blends, so label values survive.
///
/// Corner aligned: output pixel `d` copies source pixel `floor(d * in / out)`, the top-left
/// pixel of the source block it covers.
pub fn resize_nearest<P>(img: &ImageBuffer<P, Vec<u8>>, size: u32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let (width, height) = img.dimensions();
    ImageBuffer::from_fn(size, size, |x, y| {
        *img.get_pixel(source_index(x, width, size), source_index(y, height, size))
    })
}

fn source_index(dst: u32, src_len: u32, dst_len: u32) -> u32 {
    let src = u64::from(dst) * u64::from(src_len) / u64::from(dst_len);
    (src as u32).min(src_len.saturating_sub(1))
}

fn to_floats<P>(img: &ImageBuffer<P, Vec<u8>>, norm: Normalization) -> Vec<f32>
where
    P: Pixel<Subpixel = u8>,
{
    img.as_raw().iter().map(|&v| norm.apply(v)).collect()
}

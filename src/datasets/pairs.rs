use std::{
    fs,
    path::{Path, PathBuf},
};

use super::{
    errors::{DatasetError, DatasetResult},
    split::Entry,
};

pub const IMAGES_DIR: &str = "images";
pub const MASKS_DIR: &str = "gt_mask";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePair {
    pub image: PathBuf,
    pub mask: PathBuf,
}

/// Resolve `<data_dir>/<entry>/images/<file>` and `<data_dir>/<entry>/gt_mask/<file>`.
pub fn resolve_pair<P: AsRef<Path>>(data_dir: P, entry: &Entry) -> DatasetResult<SamplePair> {
    let sample_dir = data_dir.as_ref().join(&entry.image);
    Ok(SamplePair {
        image: sole_file(&sample_dir.join(IMAGES_DIR))?,
        mask: sole_file(&sample_dir.join(MASKS_DIR))?,
    })
}

pub fn resolve_pairs<P: AsRef<Path>>(
    data_dir: P,
    entries: &[Entry],
) -> DatasetResult<Vec<SamplePair>> {
    let data_dir = data_dir.as_ref();
    entries.iter().map(|e| resolve_pair(data_dir, e)).collect()
}

/// First visible regular file of `dir` in name order.
fn sole_file(dir: &Path) -> DatasetResult<PathBuf> {
    let listing = fs::read_dir(dir).map_err(|e| DatasetError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in listing {
        let entry = entry.map_err(|e| DatasetError::io(dir, e))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| DatasetError::io(entry.path(), e))?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    match files.len() {
        0 => Err(DatasetError::EmptyDir {
            path: dir.to_path_buf(),
        }),
        1 => Ok(files.swap_remove(0)),
        n => {
            log::warn!(
                "{} holds {n} files, using {}",
                dir.display(),
                files[0].display()
            );
            Ok(files.swap_remove(0))
        }
    }
}

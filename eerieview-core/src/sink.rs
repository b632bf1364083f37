//! Atomic product output.
//!
//! Products are written next to their final location and renamed into place,
//! so an interrupted run never leaves a half-written file under the final
//! name. The directory store keeps a `.tmp` staging directory while writing;
//! a stale one from a crashed run is removed before reuse.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::dataset::Dataset;
use crate::errors::{EerieError, EerieResult};

/// Serialized form of a directory-store chunk.
#[derive(Serialize)]
struct ChunkFile<'a> {
    variable: &'a str,
    array: &'a crate::dataset::DataArray,
}

/// Write a product as a single file, atomically.
pub fn write_product(dataset: &Dataset, path: &Path) -> EerieResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut staging = NamedTempFile::new_in(&parent)?;
    serde_json::to_writer(&mut staging, dataset)?;
    staging.flush()?;
    staging
        .persist(path)
        .map_err(|e| EerieError::Io(e.error))?;
    info!("wrote product to {}", path.display());
    Ok(())
}

/// Write a product as a directory store with one file per variable chunk,
/// replacing any existing store atomically.
pub fn write_chunk_store(dataset: &Dataset, path: &Path) -> EerieResult<()> {
    let staging = staging_dir(path);
    if staging.exists() {
        info!("removing stale staging store {}", staging.display());
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let coords_file = fs::File::create(staging.join("coords.json"))?;
    serde_json::to_writer(coords_file, &dataset.coords)?;
    let attrs_file = fs::File::create(staging.join("attrs.json"))?;
    serde_json::to_writer(attrs_file, &dataset.attrs)?;
    for (name, var) in &dataset.vars {
        let chunk = ChunkFile {
            variable: name,
            array: var,
        };
        let file = fs::File::create(staging.join(format!("{name}.json")))?;
        serde_json::to_writer(file, &chunk)?;
    }

    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    fs::rename(&staging, path)?;
    info!("wrote chunk store to {}", path.display());
    Ok(())
}

fn staging_dir(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

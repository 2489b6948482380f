//! Binary Data Library
//!
//! Random-access store of per-nuclide reaction and decay data, keyed by KZA.
//! The on-disk layout is fixed and little-endian:
//!
//! ```text
//! u64  offset of index trailer
//! i32  parent count N
//! i32  group count G
//! (i32 kza=-1, i64 offset)   group-boundary block pointer (0 = absent)
//! (i32 kza=0,  i64 offset)   group-weight block pointer   (0 = absent)
//! [optional f32 blocks]
//! N nuclide records:
//!     i32 kza, i32 n_paths, f32 half_life_s, f32 e[3],
//!     n_paths * { i32 daughter_kza, i32 emitted_len, bytes, f32 xs[G+1] }
//! trailer:
//!     u8 lib_type, i32 N, i32 G,
//!     N * { i32 kza, i32 n_paths, i64 offset,
//!           n_paths * { i32 daughter_kza, i32 emitted_len, bytes, i64 offset } }
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::LibraryError;

use super::index::{read_f32, read_i32, read_i64, read_u64, LibraryIndex};
use super::{Kza, NuclideData, NuclideRef, ReactionPath};

/// Open handle to a binary data library.
///
/// Immutable after open apart from the record memo; lookups that miss return
/// `Ok(None)` and the caller decides (a chain treats the branch as stable).
pub struct DataLibrary {
    path: PathBuf,
    reader: BufReader<File>,
    index: LibraryIndex,
    group_bounds: Option<Vec<f32>>,
    group_weights: Option<Vec<f32>>,
    memo: HashMap<Kza, NuclideRef>,
}

impl std::fmt::Debug for DataLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLibrary")
            .field("path", &self.path)
            .field("n_parents", &self.index.n_parents())
            .field("n_groups", &self.index.n_groups)
            .finish()
    }
}

impl DataLibrary {
    /// Open a library file and load its index trailer.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LibraryError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LibraryError::NotFound(path.clone())
            } else {
                LibraryError::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;
        let mut reader = BufReader::new(file);
        let ctx = |path: &PathBuf| {
            let path = path.clone();
            move |source: io::Error| LibraryError::Io { path, source }
        };

        let trailer_offset = read_u64(&mut reader).map_err(ctx(&path))?;
        let _n_parents = read_i32(&mut reader).map_err(ctx(&path))?;
        let n_groups = read_i32(&mut reader).map_err(ctx(&path))?;
        if n_groups < 0 {
            return Err(LibraryError::BadIndex {
                path,
                detail: format!("negative group count {n_groups}"),
            });
        }
        let n_groups = n_groups as usize;

        let bounds_ptr = read_block_pointer(&mut reader, &path, -1)?;
        let weights_ptr = read_block_pointer(&mut reader, &path, 0)?;

        let group_bounds = match bounds_ptr {
            0 => None,
            off => Some(read_f32_block(&mut reader, off, n_groups + 1).map_err(ctx(&path))?),
        };
        let group_weights = match weights_ptr {
            0 => None,
            off => Some(read_f32_block(&mut reader, off, n_groups).map_err(ctx(&path))?),
        };

        reader
            .seek(SeekFrom::Start(trailer_offset))
            .map_err(ctx(&path))?;
        let index = LibraryIndex::parse(&mut reader, &path)?;
        if index.n_groups != n_groups {
            return Err(LibraryError::BadIndex {
                path,
                detail: format!(
                    "header has {} groups, trailer has {}",
                    n_groups, index.n_groups
                ),
            });
        }

        debug!(
            parents = index.n_parents(),
            groups = n_groups,
            "opened data library"
        );

        Ok(DataLibrary {
            path,
            reader,
            index,
            group_bounds,
            group_weights,
            memo: HashMap::new(),
        })
    }

    /// Number of neutron groups in this library
    pub fn n_groups(&self) -> usize {
        self.index.n_groups
    }

    /// Library type byte from the trailer
    pub fn lib_type(&self) -> u8 {
        self.index.lib_type
    }

    /// Group boundaries block, if the library carries one
    pub fn group_bounds(&self) -> Option<&[f32]> {
        self.group_bounds.as_deref()
    }

    /// Group weights block, if the library carries one
    pub fn group_weights(&self) -> Option<&[f32]> {
        self.group_weights.as_deref()
    }

    /// All parent kzas in index (base-ZA) order
    pub fn kzas(&self) -> Vec<Kza> {
        self.index.kzas().collect()
    }

    /// Read the full record for one nuclide, or `None` when the library has
    /// no data for it.
    pub fn read(&mut self, kza: Kza) -> Result<Option<NuclideRef>, LibraryError> {
        if let Some(data) = self.memo.get(&kza) {
            return Ok(Some(Arc::clone(data)));
        }
        let entry = match self.index.search(kza) {
            Some(e) => e.clone(),
            None => return Ok(None),
        };

        self.reader
            .seek(SeekFrom::Start(entry.offset))
            .map_err(|source| LibraryError::Io {
                path: self.path.clone(),
                source,
            })?;
        let data = self.read_record_at(entry.offset)?;
        let data = Arc::new(data);
        self.memo.insert(kza, Arc::clone(&data));
        Ok(Some(data))
    }

    fn read_record_at(&mut self, offset: u64) -> Result<NuclideData, LibraryError> {
        let n_groups = self.index.n_groups;
        let path = self.path.clone();
        let truncated = |offset| LibraryError::TruncatedRecord {
            path: path.clone(),
            offset,
        };
        let reader = &mut self.reader;

        let kza = read_i32(reader).map_err(|_| truncated(offset))?;
        let n_paths = read_i32(reader).map_err(|_| truncated(offset))?;
        let half_life = read_f32(reader).map_err(|_| truncated(offset))?;
        let mut energies = [0.0f64; 3];
        for e in &mut energies {
            *e = f64::from(read_f32(reader).map_err(|_| truncated(offset))?);
        }

        if kza < 0 || n_paths < 0 {
            return Err(LibraryError::BadIndex {
                path: path.clone(),
                detail: format!("negative field in record at offset {offset}"),
            });
        }

        let mut paths = Vec::with_capacity(n_paths as usize);
        for _ in 0..n_paths {
            let daughter = read_i32(reader).map_err(|_| truncated(offset))?;
            let emitted_len = read_i32(reader).map_err(|_| truncated(offset))?;
            if daughter < 0 || emitted_len < 0 {
                return Err(LibraryError::BadIndex {
                    path: path.clone(),
                    detail: format!("negative field in path record at offset {offset}"),
                });
            }
            let mut tag = vec![0u8; emitted_len as usize];
            reader.read_exact(&mut tag).map_err(|_| truncated(offset))?;
            let emitted = String::from_utf8_lossy(&tag).into_owned();

            let mut xs = Vec::with_capacity(n_groups + 1);
            for _ in 0..=n_groups {
                xs.push(f64::from(read_f32(reader).map_err(|_| truncated(offset))?));
            }
            paths.push(ReactionPath {
                daughter: Kza(daughter as u32),
                emitted,
                xs,
            });
        }

        Ok(NuclideData::assemble(
            Kza(kza as u32),
            f64::from(half_life),
            energies,
            paths,
            n_groups,
        ))
    }
}

fn read_block_pointer(
    reader: &mut BufReader<File>,
    path: &Path,
    expect_sentinel: i32,
) -> Result<u64, LibraryError> {
    let ctx = |source: io::Error| LibraryError::Io {
        path: path.to_path_buf(),
        source,
    };
    let sentinel = read_i32(reader).map_err(ctx)?;
    let offset = read_i64(reader).map_err(ctx)?;
    if sentinel != expect_sentinel || offset < 0 {
        return Err(LibraryError::BadIndex {
            path: path.to_path_buf(),
            detail: format!("bad block pointer (sentinel {sentinel}, offset {offset})"),
        });
    }
    Ok(offset as u64)
}

fn read_f32_block(reader: &mut BufReader<File>, offset: u64, len: usize) -> io::Result<Vec<f32>> {
    let saved = reader.stream_position()?;
    reader.seek(SeekFrom::Start(offset))?;
    let mut block = Vec::with_capacity(len);
    for _ in 0..len {
        block.push(read_f32(reader)?);
    }
    reader.seek(SeekFrom::Start(saved))?;
    Ok(block)
}

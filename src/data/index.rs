//! Library Index
//!
//! The binary library ends in an index trailer: one entry per parent nuclide
//! with its record offset, each followed by per-path lookup entries. The
//! index is sorted by base ZA (the order the merge emits records), so a
//! lookup binary-searches on base ZA and then scans the neighbourhood of the
//! hit to resolve the isomeric state.

use std::io::{self, Read};
use std::path::Path;

use crate::error::LibraryError;

use super::Kza;

/// One parent entry in the trailer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub kza: Kza,
    pub n_paths: u32,
    pub offset: u64,
}

/// In-memory image of the index trailer
#[derive(Debug, Clone)]
pub struct LibraryIndex {
    pub lib_type: u8,
    pub n_groups: usize,
    entries: Vec<IndexEntry>,
}

impl LibraryIndex {
    /// Parse the trailer from a reader positioned at its first byte.
    pub fn parse<R: Read>(reader: &mut R, path: &Path) -> Result<Self, LibraryError> {
        let ctx = |source: io::Error| LibraryError::Io {
            path: path.to_path_buf(),
            source,
        };

        let lib_type = read_u8(reader).map_err(ctx)?;
        let n_parents = read_i32(reader).map_err(ctx)?;
        let n_groups = read_i32(reader).map_err(ctx)?;
        if n_parents < 0 || n_groups < 0 {
            return Err(LibraryError::BadIndex {
                path: path.to_path_buf(),
                detail: format!("negative counts ({n_parents} parents, {n_groups} groups)"),
            });
        }

        let mut entries = Vec::with_capacity(n_parents as usize);
        for _ in 0..n_parents {
            let kza = read_i32(reader).map_err(ctx)?;
            let n_paths = read_i32(reader).map_err(ctx)?;
            let offset = read_i64(reader).map_err(ctx)?;
            if kza < 0 || n_paths < 0 || offset < 0 {
                return Err(LibraryError::BadIndex {
                    path: path.to_path_buf(),
                    detail: format!("negative field in entry for kza {kza}"),
                });
            }

            // per-path lookup entries: skipped, the record itself is re-read
            for _ in 0..n_paths {
                let _daughter = read_i32(reader).map_err(ctx)?;
                let emitted_len = read_i32(reader).map_err(ctx)?;
                if emitted_len < 0 {
                    return Err(LibraryError::BadIndex {
                        path: path.to_path_buf(),
                        detail: "negative emitted length in lookup entry".into(),
                    });
                }
                let mut tag = vec![0u8; emitted_len as usize];
                reader.read_exact(&mut tag).map_err(ctx)?;
                let _offset = read_i64(reader).map_err(ctx)?;
            }

            entries.push(IndexEntry {
                kza: Kza(kza as u32),
                n_paths: n_paths as u32,
                offset: offset as u64,
            });
        }

        Ok(LibraryIndex {
            lib_type,
            n_groups: n_groups as usize,
            entries,
        })
    }

    pub fn n_parents(&self) -> usize {
        self.entries.len()
    }

    /// All parent kzas in index order
    pub fn kzas(&self) -> impl Iterator<Item = Kza> + '_ {
        self.entries.iter().map(|e| e.kza)
    }

    /// Find the record offset for a kza.
    ///
    /// Binary search on base ZA, then a neighbourhood scan for the exact
    /// isomeric state, since isomers of a base ZA are adjacent but their
    /// internal order is not guaranteed.
    pub fn search(&self, kza: Kza) -> Option<&IndexEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let target_za = kza.base_za();
        let hit = self
            .entries
            .binary_search_by(|e| e.kza.base_za().cmp(&target_za))
            .ok()?;

        if self.entries[hit].kza == kza {
            return Some(&self.entries[hit]);
        }
        // scan the neighbourhood of the base-ZA hit
        let mut lo = hit;
        while lo > 0 && self.entries[lo - 1].kza.base_za() == target_za {
            lo -= 1;
        }
        self.entries[lo..]
            .iter()
            .take_while(|e| e.kza.base_za() == target_za)
            .find(|e| e.kza == kza)
    }
}

pub(crate) fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub(crate) fn read_i64<R: Read>(reader: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_f32<R: Read>(reader: &mut R) -> io::Result<f32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(kzas: &[u32]) -> LibraryIndex {
        LibraryIndex {
            lib_type: b'1',
            n_groups: 1,
            entries: kzas
                .iter()
                .enumerate()
                .map(|(i, &k)| IndexEntry {
                    kza: Kza(k),
                    n_paths: 0,
                    offset: i as u64 * 100,
                })
                .collect(),
        }
    }

    #[test]
    fn test_search_exact() {
        let idx = index_with(&[10020, 260560, 270600, 280600]);
        assert_eq!(idx.search(Kza(270600)).map(|e| e.offset), Some(200));
        assert_eq!(idx.search(Kza(270610)), None);
        assert_eq!(idx.search(Kza(10010)), None);
    }

    #[test]
    fn test_search_resolves_isomer_neighbourhood() {
        // isomers of ag-110 adjacent but ground state not first
        let idx = index_with(&[260560, 471101, 471100, 521270]);
        assert_eq!(idx.search(Kza(471100)).map(|e| e.offset), Some(200));
        assert_eq!(idx.search(Kza(471101)).map(|e| e.offset), Some(100));
        assert_eq!(idx.search(Kza(471102)), None);
    }

    #[test]
    fn test_search_empty() {
        let idx = index_with(&[]);
        assert_eq!(idx.search(Kza(260560)), None);
    }
}

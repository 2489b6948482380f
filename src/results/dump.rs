//! Binary Result Dump
//!
//! Durable handoff between the solve and postprocess phases. Layout, exact
//! and little-endian:
//!
//! ```text
//! i32  n_results                 (cooling times + 1)
//! per root:
//!     { i32 kza, f32 N[n_results] }*
//!     i32 -1                     (record delimiter)
//! ```
//!
//! The file is opened once at problem start, appended to as each root
//! solves, then flushed and rewound for the read-back pass. The handle
//! closes on drop whatever path the solve takes.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::data::Kza;
use crate::error::DumpError;

use super::ResultList;

const DELIMITER: i32 = -1;

/// Binary dump file in its append phase
#[derive(Debug)]
pub struct BinaryDump {
    path: PathBuf,
    file: File,
    n_results: usize,
}

impl BinaryDump {
    /// Create (truncate) the dump and write its header.
    pub fn create<P: AsRef<Path>>(path: P, n_results: usize) -> Result<Self, DumpError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| DumpError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(&(n_results as i32).to_le_bytes())
            .map_err(|source| DumpError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(BinaryDump {
            path,
            file,
            n_results,
        })
    }

    /// Open an existing dump for reuse (`-r`): reads the header only.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self, DumpError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| DumpError::Io {
                path: path.clone(),
                source,
            })?;
        let mut buf = [0u8; 4];
        file.read_exact(&mut buf).map_err(|_| DumpError::Corrupt {
            path: path.clone(),
            detail: "short header".into(),
        })?;
        let n_results = i32::from_le_bytes(buf);
        if n_results <= 0 {
            return Err(DumpError::Corrupt {
                path,
                detail: format!("bad result count {n_results}"),
            });
        }
        Ok(BinaryDump {
            path,
            file,
            n_results: n_results as usize,
        })
    }

    pub fn n_results(&self) -> usize {
        self.n_results
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one root's record.
    pub fn write_root(&mut self, results: &ResultList) -> Result<(), DumpError> {
        debug_assert_eq!(results.n_results(), self.n_results);
        let mut buf = Vec::with_capacity((4 + 4 * self.n_results) * results.len() + 4);
        for (kza, values) in results.iter() {
            buf.extend_from_slice(&(kza.0 as i32).to_le_bytes());
            for &v in values {
                buf.extend_from_slice(&(v as f32).to_le_bytes());
            }
        }
        buf.extend_from_slice(&DELIMITER.to_le_bytes());
        self.file.write_all(&buf).map_err(|source| DumpError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Flush, rewind past the header and hand the file over for reading.
    pub fn rewind_for_read(mut self) -> Result<DumpReader, DumpError> {
        let io_err = |path: &PathBuf| {
            let path = path.clone();
            move |source: io::Error| DumpError::Io { path, source }
        };
        self.file.flush().map_err(io_err(&self.path))?;
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(io_err(&self.path))?;

        let mut reader = BufReader::new(self.file);
        let mut buf = [0u8; 4];
        reader
            .read_exact(&mut buf)
            .map_err(|_| DumpError::Corrupt {
                path: self.path.clone(),
                detail: "short header".into(),
            })?;
        let n_results = i32::from_le_bytes(buf);
        if n_results as usize != self.n_results {
            return Err(DumpError::Corrupt {
                path: self.path.clone(),
                detail: format!(
                    "header changed between write and read ({} vs {})",
                    n_results, self.n_results
                ),
            });
        }
        debug!(path = %self.path.display(), n_results, "rewound binary dump");
        Ok(DumpReader {
            path: self.path,
            reader,
            n_results: self.n_results,
        })
    }
}

/// Binary dump file in its read-back phase
#[derive(Debug)]
pub struct DumpReader {
    path: PathBuf,
    reader: BufReader<File>,
    n_results: usize,
}

impl DumpReader {
    pub fn n_results(&self) -> usize {
        self.n_results
    }

    /// Read the next root record; `None` at end of file.
    pub fn read_root(&mut self) -> Result<Option<ResultList>, DumpError> {
        let mut list = ResultList::new(self.n_results);
        loop {
            let mut buf = [0u8; 4];
            match self.reader.read_exact(&mut buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && list.is_empty() => {
                    return Ok(None)
                }
                Err(_) => {
                    return Err(DumpError::Corrupt {
                        path: self.path.clone(),
                        detail: "record truncated before delimiter".into(),
                    })
                }
            }
            let kza = i32::from_le_bytes(buf);
            if kza == DELIMITER {
                return Ok(Some(list));
            }
            if kza <= 0 {
                return Err(DumpError::Corrupt {
                    path: self.path.clone(),
                    detail: format!("bad kza {kza} in record"),
                });
            }

            let mut values = Vec::with_capacity(self.n_results);
            for _ in 0..self.n_results {
                let mut vbuf = [0u8; 4];
                self.reader
                    .read_exact(&mut vbuf)
                    .map_err(|_| DumpError::Corrupt {
                        path: self.path.clone(),
                        detail: "values truncated".into(),
                    })?;
                values.push(f64::from(f32::from_le_bytes(vbuf)));
            }
            list.tally(Kza(kza as u32), &values, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dump_round_trip() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("run.dmp");

        let mut dump = BinaryDump::create(&path, 3).expect("create");
        let mut root1 = ResultList::new(3);
        root1.tally(Kza(270600), &[1.0, 0.5, 0.25], 1.0);
        root1.tally(Kza(280600), &[0.0, 0.5, 0.75], 1.0);
        dump.write_root(&root1).expect("write root 1");

        let root2 = ResultList::new(3);
        dump.write_root(&root2).expect("write empty root");

        let mut reader = dump.rewind_for_read().expect("rewind");
        let back1 = reader.read_root().expect("read").expect("first record");
        assert_eq!(back1.len(), 2);
        // values survive modulo the f32 cast
        assert_eq!(back1.get(Kza(270600)), Some([1.0, 0.5, 0.25].as_slice()));

        let back2 = reader.read_root().expect("read").expect("second record");
        assert!(back2.is_empty());
        assert!(reader.read_root().expect("read").is_none());
    }

    #[test]
    fn test_f32_cast_in_dump() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("run.dmp");

        let mut dump = BinaryDump::create(&path, 1).expect("create");
        let mut root = ResultList::new(1);
        let exact = 0.123456789012345_f64;
        root.tally(Kza(100), &[exact], 1.0);
        dump.write_root(&root).expect("write");

        let mut reader = dump.rewind_for_read().expect("rewind");
        let back = reader.read_root().expect("read").expect("record");
        let got = back.get(Kza(100)).expect("entry")[0];
        assert_eq!(got, f64::from(exact as f32));
    }

    #[test]
    fn test_reuse_existing() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("run.dmp");
        {
            let mut dump = BinaryDump::create(&path, 2).expect("create");
            let mut root = ResultList::new(2);
            root.tally(Kza(100), &[1.0, 2.0], 1.0);
            dump.write_root(&root).expect("write");
        }

        let dump = BinaryDump::open_existing(&path).expect("open");
        assert_eq!(dump.n_results(), 2);
        let mut reader = dump.rewind_for_read().expect("rewind");
        let back = reader.read_root().expect("read").expect("record");
        assert_eq!(back.get(Kza(100)), Some([1.0, 2.0].as_slice()));
    }

    #[test]
    fn test_missing_dump_is_fatal() {
        let err = BinaryDump::open_existing("/nonexistent/run.dmp").unwrap_err();
        assert!(matches!(err, DumpError::Io { .. }));
    }
}

//! Engine Error Types
//!
//! Every layer reports through its own error enum; the top-level [`Error`]
//! unifies them and maps each fatal kind to a distinct process exit code.
//! Local recoveries (a data-library miss, a Bateman-to-Laplace fallback)
//! never surface here - they are handled where they occur.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Data-library errors (open, parse, merge)
#[derive(Error, Debug)]
pub enum LibraryError {
    /// I/O error with file context
    #[error("library I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Library file not found
    #[error("library file not found: {0}")]
    NotFound(PathBuf),

    /// Record ended before its declared length
    #[error("truncated record in {path} at offset {offset}")]
    TruncatedRecord { path: PathBuf, offset: u64 },

    /// Transmutation and decay sources disagree on the group structure
    #[error("inconsistent group count: transmutation has {trans}, decay has {decay}")]
    GroupMismatch { trans: usize, decay: usize },

    /// Index trailer is malformed
    #[error("malformed index trailer in {path}: {detail}")]
    BadIndex { path: PathBuf, detail: String },
}

/// Schedule/preprocess errors, all detected before any solve begins
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// An item references a schedule that does not exist
    #[error("schedule '{0}' references unknown sub-schedule '{1}'")]
    DanglingSchedule(String, String),

    /// An item references a pulse history that does not exist
    #[error("schedule '{0}' references unknown pulse history '{1}'")]
    DanglingHistory(String, String),

    /// A pulse references a flux definition that does not exist
    #[error("schedule '{0}' references unknown flux '{1}'")]
    UnknownFlux(String, String),

    /// Sub-schedule references form a cycle
    #[error("schedule reference cycle through '{0}'")]
    Cycle(String),

    /// The named top schedule is missing
    #[error("top schedule '{0}' not defined")]
    MissingTop(String),
}

/// Numerical failures that abort the whole problem
#[derive(Error, Debug)]
pub enum NumericalError {
    /// A concentration went negative beyond round-off tolerance
    #[error("negative concentration {value:.6e} for rank {rank} (round-off pathology)")]
    NegativeConcentration { rank: usize, value: f64 },

    /// A transfer-matrix element overflowed or went non-finite
    #[error("non-finite transfer matrix element at ({row},{col})")]
    NonFiniteElement { row: usize, col: usize },

    /// Bateman denominator underflowed and Laplace inversion could not rescue it
    #[error("unresolvable rate degeneracy in chain span [{col},{row}]")]
    Degenerate { row: usize, col: usize },
}

/// Binary dump I/O failures
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("dump I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Header or record structure does not match the expected layout
    #[error("corrupt dump file {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },
}

/// Problem-description errors (input file, cross-checks)
#[derive(Error, Debug)]
pub enum ProblemError {
    #[error("cannot read problem file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("problem file parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown nuclide name '{0}'")]
    BadNuclide(String),

    #[error("interval '{interval}' references unknown mixture '{mixture}'")]
    UnknownMixture { interval: String, mixture: String },

    #[error("flux '{name}' supplies {got} spectra for {want} intervals")]
    FluxShape { name: String, got: usize, want: usize },

    #[error("flux '{name}' spectrum has {got} groups, library has {want}")]
    FluxGroups { name: String, got: usize, want: usize },

    #[error("bad time unit '{0}' (expected one of s m h d w y)")]
    BadTimeUnit(String),

    #[error("{0}")]
    Invalid(String),
}

/// Top-level error for the solve pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Problem(#[from] ProblemError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Numerical(#[from] NumericalError),

    #[error(transparent)]
    Dump(#[from] DumpError),

    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),
}

impl Error {
    /// Process exit code for this error kind.
    ///
    /// 2 = bad input, 3 = library, 4 = numerical, 5 = dump I/O.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Problem(_) | Error::Schedule(_) | Error::Config(_) => 2,
            Error::Library(_) => 3,
            Error::Numerical(_) => 4,
            Error::Dump(_) => 5,
        }
    }
}

/// Result alias for engine operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_distinct() {
        let cases = [
            Error::Problem(ProblemError::BadNuclide("zz-999".into())).exit_code(),
            Error::Library(LibraryError::NotFound(PathBuf::from("x"))).exit_code(),
            Error::Numerical(NumericalError::NegativeConcentration {
                rank: 0,
                value: -1.0,
            })
            .exit_code(),
            Error::Dump(DumpError::Corrupt {
                path: PathBuf::from("x"),
                detail: "short header".into(),
            })
            .exit_code(),
        ];
        let mut sorted = cases.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), cases.len());
        assert!(cases.iter().all(|&c| c != 0));
    }

    #[test]
    fn test_schedule_errors_are_bad_input() {
        let err = Error::Schedule(ScheduleError::DanglingSchedule("top".into(), "sub".into()));
        assert_eq!(err.exit_code(), 2);
    }
}

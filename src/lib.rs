//! # Activara Activation Chain Engine
//!
//! Computes the time-dependent nuclide inventory of materials exposed to a
//! neutron flux through arbitrary irradiation/cooling schedules. For each
//! root nuclide and spatial interval the engine builds a transmutation/
//! decay tree, truncates it adaptively against a relative-production
//! reference, folds group-wise cross-sections with multi-group fluxes into
//! scalar rates through a fixed-size LRU cache, assembles lower-triangular
//! transfer matrices (Bateman closed form with Laplace-inversion fallback
//! for degenerate rates), and propagates the result through a hierarchical
//! schedule of pulse histories.
//!
//! ## Pipeline
//!
//! ```text
//! Problem file (TOML)
//!     ↓
//! [problem]    cross-check, name resolution     → ProblemSetup
//!     ↓
//! [data]       indexed binary library           → NuclideData by KZA
//!     ↓
//! [chain]      depth-first build + truncation   → Chain (arena of ranks)
//!     ↕                 reference production via
//! [rate]       flux folding + LRU rate cache    → scalar P/d/L/l rates
//!     ↓
//! [matrix]     Bateman / Laplace triangular fills, incremental reuse
//!     ↓
//! [schedule]   pulse histories, sub-schedules, cooling times
//!     ↓
//! [results]    per-(root, interval) tallies     → binary dump
//!     ↓
//! [solver]     orchestration + summary table
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use activara::{Config, ProblemFile, Solver};
//!
//! let config = Config::load()?;
//! let problem = ProblemFile::read("reactor_wall.toml")?;
//!
//! let mut solver = {
//!     let library = activara::data::DataLibrary::open(&problem.library.path)?;
//!     let setup = problem.preprocess(library.n_groups())?;
//!     Solver::with_library(config, setup, library)
//! };
//! let report = solver.solve(None)?;
//! for root in &report.roots {
//!     println!("{}: {} output nuclides", root.kza, root.aggregate.len());
//! }
//! ```
//!
//! The solve is single-threaded: every chain, matrix and cache is
//! exclusively owned by one solve pass, and chains are solved in
//! deterministic root-kza order.

pub mod chain;
pub mod config;
pub mod data;
pub mod error;
pub mod matrix;
pub mod problem;
pub mod rate;
pub mod results;
pub mod schedule;
pub mod solver;
pub mod trace;

pub use chain::{BuildOutcome, Chain, TruncParams};
pub use config::Config;
pub use data::{DataLibrary, Kza, NuclideData};
pub use error::Error;
pub use matrix::{Mode, TransferMatrix};
pub use problem::{ProblemFile, ProblemSetup};
pub use rate::{RateCache, ReferenceFluxMode, VolFlux};
pub use results::{BinaryDump, ResultList, Weighting};
pub use schedule::{CompiledSchedule, ScheduleSet};
pub use solver::{SolveReport, Solver};
pub use trace::ChainTrace;

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

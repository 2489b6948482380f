//! Shared helpers for the integration tests: build small binary libraries
//! and run full problems end to end.

use std::path::{Path, PathBuf};

use activara::config::Config;
use activara::data::{
    merge_libraries, DataLibrary, DecayBranch, DecayParent, DecaySource, Kza, TransParent,
    TransReaction, TransmutationSource,
};
use activara::solver::{SolveReport, Solver};
use activara::ProblemFile;

/// Incremental builder for a tiny merged library
pub struct LibBuilder {
    n_groups: usize,
    trans: Vec<TransParent>,
    decay: Vec<DecayParent>,
}

impl LibBuilder {
    pub fn new(n_groups: usize) -> Self {
        LibBuilder {
            n_groups,
            trans: Vec::new(),
            decay: Vec::new(),
        }
    }

    /// Add a transmutation parent with `(daughter, emitted, xs in barns)`
    /// reactions.
    pub fn trans(mut self, parent: &str, reactions: &[(&str, &str, &[f32])]) -> Self {
        self.trans.push(TransParent {
            kza: kza(parent),
            reactions: reactions
                .iter()
                .map(|(daughter, emitted, xs)| TransReaction {
                    daughter: kza(daughter),
                    emitted: (*emitted).to_string(),
                    xs: xs.to_vec(),
                })
                .collect(),
        });
        self
    }

    /// Add a decay parent with a half-life and `(daughter, ratio)` branches.
    pub fn decay(mut self, parent: &str, half_life: f32, branches: &[(&str, f32)]) -> Self {
        self.decay.push(DecayParent {
            kza: kza(parent),
            half_life,
            energies: [0.0; 3],
            n_ion_paths: 0,
            branches: branches
                .iter()
                .map(|(daughter, ratio)| DecayBranch {
                    daughter: kza(daughter),
                    ratio: *ratio,
                })
                .collect(),
        });
        self
    }

    /// A stable nuclide with no reactions (decay entry with no branches).
    pub fn stable(self, nuclide: &str) -> Self {
        self.decay(nuclide, 0.0, &[])
    }

    pub fn write(mut self, dir: &Path) -> PathBuf {
        self.trans.sort_by_key(|p| p.kza);
        self.decay.sort_by_key(|p| p.kza);
        let trans = TransmutationSource {
            n_groups: self.n_groups,
            group_bounds: None,
            group_weights: None,
            parents: self.trans,
        };
        let decay = DecaySource {
            n_groups: None,
            parents: self.decay,
        };
        let path = dir.join("test.lib");
        merge_libraries(&trans, &decay, &path, b'1').expect("merge library");
        path
    }
}

pub fn kza(name: &str) -> Kza {
    Kza::parse(name).unwrap_or_else(|| panic!("bad nuclide name {name}"))
}

/// Solve a problem described by TOML text (with the library already on
/// disk) and return the report.
pub fn solve(toml_text: &str) -> SolveReport {
    let problem: ProblemFile = toml::from_str(toml_text).expect("parse problem");
    let library = DataLibrary::open(&problem.library.path).expect("open library");
    let setup = problem.preprocess(library.n_groups()).expect("preprocess");
    let mut solver = Solver::with_library(Config::default(), setup, library);
    solver.solve(None).expect("solve")
}

/// Aggregate concentration vector for an output nuclide under a root.
pub fn concentrations<'r>(report: &'r SolveReport, root: &str, nuclide: &str) -> &'r [f64] {
    let root_kza = kza(root);
    let record = report
        .roots
        .iter()
        .find(|r| r.kza == root_kza)
        .unwrap_or_else(|| panic!("root {root} missing from report"));
    record
        .aggregate
        .get(kza(nuclide))
        .unwrap_or_else(|| panic!("{nuclide} missing under root {root}"))
}

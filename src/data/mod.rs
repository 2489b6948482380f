//! Nuclear Data Model
//!
//! Nuclide identity ([`Kza`]), per-nuclide reaction/decay records
//! ([`NuclideData`], [`ReactionPath`]) and the indexed binary library that
//! stores them ([`DataLibrary`]).
//!
//! ## Data flow
//!
//! ```text
//! TransmutationSource + DecaySource   (post-parse ASCII shapes)
//!     ↓ merge
//! Binary library (indexed, random access by KZA)
//!     ↓ read
//! NuclideData (per chain node, shared via Arc)
//! ```

pub mod index;
pub mod library;
pub mod merge;

pub use library::DataLibrary;
pub use merge::{merge_libraries, DecayBranch, DecayParent, DecaySource, MergeStats,
                TransParent, TransReaction, TransmutationSource};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Barns to cm^2
pub const BARNS_TO_CM2: f64 = 1e-24;

/// Element symbols indexed by Z-1, hydrogen through lawrencium.
pub const SYMBOLS: [&str; 103] = [
    "h", "he", "li", "be", "b", "c", "n", "o", "f", "ne", "na", "mg", "al", "si", "p", "s", "cl",
    "ar", "k", "ca", "sc", "ti", "v", "cr", "mn", "fe", "co", "ni", "cu", "zn", "ga", "ge", "as",
    "se", "br", "kr", "rb", "sr", "y", "zr", "nb", "mo", "tc", "ru", "rh", "pd", "ag", "cd", "in",
    "sn", "sb", "te", "i", "xe", "cs", "ba", "la", "ce", "pr", "nd", "pm", "sm", "eu", "gd", "tb",
    "dy", "ho", "er", "tm", "yb", "lu", "hf", "ta", "w", "re", "os", "ir", "pt", "au", "hg", "tl",
    "pb", "bi", "po", "at", "rn", "fr", "ra", "ac", "th", "pa", "u", "np", "pu", "am", "cm", "bk",
    "cf", "es", "fm", "md", "no", "lr",
];

/// Nuclide identifier: `(Z*1000 + A)*10 + M` where M is the isomeric state.
///
/// Primary key for all nuclide data. Sort order is numeric, which groups
/// isomers of the same base ZA together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kza(pub u32);

impl Kza {
    /// Build from atomic number, mass number and isomeric state
    pub fn new(z: u32, a: u32, m: u32) -> Self {
        Kza((z * 1000 + a) * 10 + m)
    }

    /// Atomic number
    pub fn z(self) -> u32 {
        self.0 / 10000
    }

    /// Mass number
    pub fn a(self) -> u32 {
        (self.0 / 10) % 1000
    }

    /// Isomeric state (0 = ground)
    pub fn isomer(self) -> u32 {
        self.0 % 10
    }

    /// Base ZA number (kza without the isomer digit); the library index is
    /// sorted on this
    pub fn base_za(self) -> u32 {
        self.0 / 10
    }

    /// Parse a nuclide name of the form `fe-56`, `co-60m` or `ag-110m2`
    pub fn parse(name: &str) -> Option<Self> {
        // compiled once per call site is fine; problem files are small
        let re = regex::Regex::new(r"^([a-z]+)-(\d+)(?:m(\d?))?$").ok()?;
        let lowered = name.trim().to_lowercase();
        let caps = re.captures(&lowered)?;
        let sym = caps.get(1)?.as_str();
        let z = SYMBOLS.iter().position(|&s| s == sym)? as u32 + 1;
        let a: u32 = caps.get(2)?.as_str().parse().ok()?;
        let m: u32 = match caps.get(3) {
            Some(g) if g.as_str().is_empty() => 1,
            Some(g) => g.as_str().parse().ok()?,
            None => 0,
        };
        Some(Kza::new(z, a, m))
    }
}

impl fmt::Display for Kza {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let z = self.z() as usize;
        let sym = if z >= 1 && z <= SYMBOLS.len() {
            SYMBOLS[z - 1]
        } else {
            "??"
        };
        match self.isomer() {
            0 => write!(f, "{}-{}", sym, self.a()),
            1 => write!(f, "{}-{}m", sym, self.a()),
            m => write!(f, "{}-{}m{}", sym, self.a(), m),
        }
    }
}

impl From<u32> for Kza {
    fn from(raw: u32) -> Self {
        Kza(raw)
    }
}

/// One reaction path out of a nuclide: transmutation cross-sections in the
/// group slots and the decay branch rate in the extra slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionPath {
    /// Daughter (forward mode) or parent (reverse mode) nuclide
    pub daughter: Kza,
    /// Emitted-particle tag; `"x"` marks an inclusive/aggregate channel,
    /// `*D`/`*X` synthetic decay channels
    pub emitted: String,
    /// Length `n_groups + 1`: group cross-sections in cm^2, then the decay
    /// branch rate in 1/s at index `n_groups`
    pub xs: Vec<f64>,
}

impl ReactionPath {
    /// Decay branch rate carried in the extra slot
    pub fn decay_rate(&self, n_groups: usize) -> f64 {
        self.xs[n_groups]
    }

    /// Whether this path carries any decay rate
    pub fn is_decay(&self, n_groups: usize) -> bool {
        self.xs[n_groups] > 0.0
    }
}

/// Full nuclear data record for one nuclide.
///
/// Immutable after library read; chain nodes share it via `Arc`. The path
/// list is ordered decay-first so the first [`NuclideData::n_decay`] indices
/// are stable when transmutation paths are stripped from a chain node.
#[derive(Debug, Clone, PartialEq)]
pub struct NuclideData {
    pub kza: Kza,
    /// Half-life in seconds, 0 for stable
    pub half_life: f64,
    /// Decay constant ln2/half_life, 0 for stable
    pub lambda: f64,
    /// Average decay energies (alpha, beta, gamma), MeV per decay
    pub energies: [f64; 3],
    /// Reaction paths, decay paths first
    pub paths: Vec<ReactionPath>,
    /// Number of decay paths at the head of `paths`
    pub n_decay: usize,
    /// Total destruction vector, length `n_groups + 1`: sum of non-"x"
    /// transmutation cross-sections per group, decay constant in the last slot
    pub destruction: Vec<f64>,
}

impl NuclideData {
    /// Assemble a record from raw library fields.
    ///
    /// Sorts decay paths to the front (stable within each class), scales
    /// cross-sections from barns to cm^2, and computes the total destruction
    /// vector. Exactly three decay energies are copied.
    pub fn assemble(
        kza: Kza,
        half_life: f64,
        energies: [f64; 3],
        mut paths: Vec<ReactionPath>,
        n_groups: usize,
    ) -> Self {
        for path in &mut paths {
            for xs in path.xs.iter_mut().take(n_groups) {
                *xs *= BARNS_TO_CM2;
            }
        }
        paths.sort_by_key(|p| !p.is_decay(n_groups));
        let n_decay = paths.iter().take_while(|p| p.is_decay(n_groups)).count();

        let lambda = if half_life > 0.0 {
            std::f64::consts::LN_2 / half_life
        } else {
            0.0
        };

        let mut destruction = vec![0.0; n_groups + 1];
        for path in &paths {
            if path.emitted != "x" {
                for (dst, src) in destruction.iter_mut().zip(path.xs.iter().take(n_groups)) {
                    *dst += *src;
                }
            }
        }
        destruction[n_groups] = lambda;

        NuclideData {
            kza,
            half_life,
            lambda,
            energies,
            paths,
            n_decay,
            destruction,
        }
    }

    /// Record with an explicitly supplied total-destruction vector (cm^2
    /// group slots), as reverse-mode libraries provide it as a distinguished
    /// path instead of a channel sum.
    pub fn with_total_destruction(mut self, mut total: Vec<f64>) -> Self {
        let n_groups = self.destruction.len() - 1;
        for xs in total.iter_mut().take(n_groups) {
            *xs *= BARNS_TO_CM2;
        }
        total.resize(n_groups + 1, 0.0);
        total[n_groups] = self.lambda;
        self.destruction = total;
        self
    }

    /// Number of group slots
    pub fn n_groups(&self) -> usize {
        self.destruction.len() - 1
    }

    /// Cache channel count for this nuclide: one per path plus the total
    /// destruction channel
    pub fn n_channels(&self) -> usize {
        self.paths.len() + 1
    }

    /// Total decay heat in MeV per decay
    pub fn total_energy(&self) -> f64 {
        self.energies.iter().sum()
    }
}

/// Shared handle to a nuclide record
pub type NuclideRef = Arc<NuclideData>;

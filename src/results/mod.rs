//! Result Accumulation
//!
//! Sparse per-nuclide result vectors, one slot per cooling time plus the
//! shutdown value at index 0. One list accumulates per (root, interval)
//! during the solve; the per-root aggregate (weighted across intervals) is
//! what lands in the binary dump.

pub mod dump;

pub use dump::{BinaryDump, DumpReader};

use std::collections::BTreeMap;

use crate::chain::Chain;
use crate::config::NumericsConfig;
use crate::data::Kza;
use crate::error::NumericalError;
use crate::schedule::{CompiledSchedule, ScheduleCalc};

/// How interval results weigh into the per-root aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// Weight by the root's density in the interval's mixture
    #[default]
    Density,
    /// Weight by interval volume
    Volume,
    /// Weight by density times volume
    VolumeIntegrated,
}

impl Weighting {
    pub fn scale(self, density: f64, volume: f64) -> f64 {
        match self {
            Weighting::Density => density,
            Weighting::Volume => volume,
            Weighting::VolumeIntegrated => density * volume,
        }
    }
}

/// Sparse kza-keyed result vectors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultList {
    n_results: usize,
    entries: BTreeMap<u32, Vec<f64>>,
}

impl ResultList {
    pub fn new(n_results: usize) -> Self {
        ResultList {
            n_results,
            entries: BTreeMap::new(),
        }
    }

    pub fn n_results(&self) -> usize {
        self.n_results
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Add `values * scale` into the nuclide's slot vector.
    pub fn tally(&mut self, kza: Kza, values: &[f64], scale: f64) {
        let slot = self
            .entries
            .entry(kza.0)
            .or_insert_with(|| vec![0.0; self.n_results]);
        for (dst, src) in slot.iter_mut().zip(values) {
            *dst += src * scale;
        }
    }

    /// Tally every rank of a just-solved chain from `set_rank` to the leaf.
    pub fn tally_chain(
        &mut self,
        chain: &Chain,
        calc: &ScheduleCalc,
        schedule: &CompiledSchedule,
        set_rank: usize,
        numerics: &NumericsConfig,
    ) -> Result<(), NumericalError> {
        let view = chain.view();
        for rank in set_rank..chain.len() {
            let kza = chain.kza_at(rank).expect("rank within chain");
            let values = calc.results(&view, rank, schedule, numerics)?;
            self.tally(kza, &values, 1.0);
        }
        Ok(())
    }

    /// Fold another list into this one with a weight.
    pub fn merge_scaled(&mut self, other: &ResultList, scale: f64) {
        for (&kza, values) in &other.entries {
            self.tally(Kza(kza), values, scale);
        }
    }

    /// Iterate entries in ascending kza order.
    pub fn iter(&self) -> impl Iterator<Item = (Kza, &[f64])> + '_ {
        self.entries.iter().map(|(&k, v)| (Kza(k), v.as_slice()))
    }

    pub fn get(&self, kza: Kza) -> Option<&[f64]> {
        self.entries.get(&kza.0).map(Vec::as_slice)
    }
}

//! Flux Spectra and Rate Folding
//!
//! A [`VolFlux`] pairs one multi-group flux spectrum with its own
//! [`RateCache`]; the flux fold `sum_g sigma_g * phi_g` turns a group-wise
//! cross-section into the scalar rate the matrix kernels consume. The
//! per-root reference flux used by chain truncation is built here as well.

pub mod cache;

pub use cache::RateCache;

use crate::data::Kza;

/// Cache addressing for one rate vector: which base nuclide owns it, which
/// channel it is, and how many channels that base nuclide has in total.
///
/// Channel 0 is the total destruction rate of the base nuclide; channel
/// `1 + p` is its production path `p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheKey {
    pub base: Kza,
    pub channel: usize,
    pub channels_total: usize,
}

impl CacheKey {
    pub fn destruction(base: Kza, channels_total: usize) -> Self {
        CacheKey {
            base,
            channel: 0,
            channels_total,
        }
    }

    pub fn production(base: Kza, path: usize, channels_total: usize) -> Self {
        CacheKey {
            base,
            channel: 1 + path,
            channels_total,
        }
    }
}

/// One flux spectrum with its dedicated rate cache
#[derive(Debug)]
pub struct VolFlux {
    flux: Vec<f64>,
    cache: RateCache,
}

impl VolFlux {
    pub fn new(flux: Vec<f64>, cache_capacity: usize) -> Self {
        VolFlux {
            flux,
            cache: RateCache::new(cache_capacity),
        }
    }

    pub fn n_groups(&self) -> usize {
        self.flux.len()
    }

    pub fn groups(&self) -> &[f64] {
        &self.flux
    }

    /// Fold a cross-section vector with this flux, consulting the cache when
    /// a key is provided. `None` cross-sections fold to zero (no data).
    pub fn fold(&mut self, xs: Option<&[f64]>, key: Option<CacheKey>) -> f64 {
        let Some(xs) = xs else { return 0.0 };

        if let Some(key) = key {
            if let Some(rate) = self.cache.read(key.base.0, key.channel) {
                return rate;
            }
            let rate = fold_raw(xs, &self.flux);
            self.cache
                .set(key.base.0, key.channels_total, key.channel, rate);
            rate
        } else {
            fold_raw(xs, &self.flux)
        }
    }
}

/// Plain inner product over the group slots
pub fn fold_raw(xs: &[f64], flux: &[f64]) -> f64 {
    xs.iter().zip(flux.iter()).map(|(s, f)| s * f).sum()
}

/// How the per-root reference flux condenses the containing intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceFluxMode {
    /// Group-wise maximum over the containing intervals
    #[default]
    Max,
    /// Volume-weighted average over the containing intervals
    VolumeAvg,
}

/// Build one reference spectrum from `(volume, spectrum)` pairs of the
/// intervals containing a root.
pub fn reference_spectrum(
    mode: ReferenceFluxMode,
    contributions: &[(f64, &[f64])],
    n_groups: usize,
) -> Vec<f64> {
    let mut reference = vec![0.0; n_groups];
    match mode {
        ReferenceFluxMode::Max => {
            for (_, spectrum) in contributions {
                for (r, &phi) in reference.iter_mut().zip(spectrum.iter()) {
                    if phi > *r {
                        *r = phi;
                    }
                }
            }
        }
        ReferenceFluxMode::VolumeAvg => {
            let total: f64 = contributions.iter().map(|(v, _)| v).sum();
            if total > 0.0 {
                for (volume, spectrum) in contributions {
                    for (r, &phi) in reference.iter_mut().zip(spectrum.iter()) {
                        *r += volume * phi / total;
                    }
                }
            }
        }
    }
    reference
}

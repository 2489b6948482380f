//! Problem Description
//!
//! The TOML problem file names everything one calculation needs: the data
//! library, flux definitions, mixtures, intervals, the schedule tree with
//! its pulse histories, cooling times and truncation parameters. Geometry,
//! zone and material-library expansion belong to a separate front end;
//! this file format covers the solver core.
//!
//! ```toml
//! [library]
//! path = "fendl2.lib"
//!
//! [[flux]]
//! name = "fw"
//! values = [[1.0e14, 3.0e13]]
//!
//! [[mixture]]
//! name = "steel"
//! components = [{ nuclide = "fe-56", density = 8.0e22 }]
//!
//! [[interval]]
//! name = "i1"
//! volume = 1.0
//! mixture = "steel"
//!
//! [schedule]
//! top = "operation"
//! histories = [{ name = "steady", count = 1 }]
//! schedules = [{ name = "operation", items = [
//!     { duration = 3.15e7, flux = "fw", history = "steady" },
//! ] }]
//!
//! [cooling]
//! times = ["1 h", "30 d", "1 y"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::chain::TruncParams;
use crate::data::Kza;
use crate::error::ProblemError;
use crate::matrix::Mode;
use crate::rate::ReferenceFluxMode;
use crate::results::Weighting;
use crate::schedule::{CompiledSchedule, ScheduleSet};

/// Default binary dump file name
pub const DEFAULT_DUMP: &str = "activara.dmp";

/// Raw problem file as deserialized
#[derive(Debug, Clone, Deserialize)]
pub struct ProblemFile {
    pub library: LibrarySpec,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub truncation: TruncParams,
    #[serde(default)]
    pub reference_flux: ReferenceFluxMode,
    #[serde(default)]
    pub weighting: Weighting,
    #[serde(default)]
    pub dump_file: Option<PathBuf>,
    #[serde(default)]
    pub flux: Vec<FluxDef>,
    pub mixture: Vec<MixtureDef>,
    pub interval: Vec<IntervalDef>,
    pub schedule: ScheduleSet,
    pub cooling: CoolingDef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibrarySpec {
    pub path: PathBuf,
}

/// One flux definition: a spectrum per interval, inline or from a file of
/// whitespace-separated group values in interval order.
#[derive(Debug, Clone, Deserialize)]
pub struct FluxDef {
    pub name: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub values: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct MixtureDef {
    pub name: String,
    pub components: Vec<ComponentDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComponentDef {
    pub nuclide: String,
    /// Atom density (atoms/cm^3) of the nuclide in the mixture
    pub density: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntervalDef {
    pub name: String,
    #[serde(default = "default_volume")]
    pub volume: f64,
    pub mixture: String,
}

fn default_volume() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoolingDef {
    pub times: Vec<TimeSpec>,
}

/// A time as plain seconds or a `"value unit"` string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimeSpec {
    Seconds(f64),
    WithUnit(String),
}

/// Convert a time in the given units to seconds. Units compound the way
/// the scheduling front end always has: a year is 52 weeks.
pub fn convert_time(value: f64, units: char) -> Option<f64> {
    let factor = match units {
        's' => 1.0,
        'm' => 60.0,
        'h' => 3600.0,
        'd' => 86400.0,
        'w' => 7.0 * 86400.0,
        'y' => 52.0 * 7.0 * 86400.0,
        'c' => 100.0 * 52.0 * 7.0 * 86400.0,
        _ => return None,
    };
    Some(value * factor)
}

impl TimeSpec {
    pub fn to_seconds(&self) -> Result<f64, ProblemError> {
        match self {
            TimeSpec::Seconds(s) => Ok(*s),
            TimeSpec::WithUnit(spec) => {
                let mut parts = spec.split_whitespace();
                let value: f64 = parts
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| ProblemError::BadTimeUnit(spec.clone()))?;
                let unit = parts
                    .next()
                    .and_then(|u| u.chars().next())
                    .unwrap_or('s');
                convert_time(value, unit).ok_or_else(|| ProblemError::BadTimeUnit(spec.clone()))
            }
        }
    }
}

/// One spatial interval ready to solve: a volume and one spectrum per flux
/// definition
#[derive(Debug, Clone)]
pub struct Interval {
    pub name: String,
    pub volume: f64,
    pub spectra: Vec<Vec<f64>>,
}

/// Where a root appears: interval index and its density there
#[derive(Debug, Clone, Copy)]
pub struct RootRef {
    pub interval: usize,
    pub density: f64,
}

/// One root nuclide with its mixture cross-references
#[derive(Debug, Clone)]
pub struct RootSpec {
    pub kza: Kza,
    /// Maximum relative concentration over the mixtures containing it
    pub max_rel_conc: f64,
    pub refs: Vec<RootRef>,
}

/// Cross-checked, name-resolved problem ready for the solver
#[derive(Debug)]
pub struct ProblemSetup {
    pub library_path: PathBuf,
    pub mode: Mode,
    pub truncation: TruncParams,
    pub reference_flux: ReferenceFluxMode,
    pub weighting: Weighting,
    pub dump_path: PathBuf,
    pub flux_names: Vec<String>,
    pub intervals: Vec<Interval>,
    pub roots: Vec<RootSpec>,
    pub schedule: CompiledSchedule,
}

impl ProblemFile {
    /// Read and parse a problem file.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ProblemError> {
        let text = fs::read_to_string(path.as_ref()).map_err(|source| ProblemError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Cross-check and resolve everything into a [`ProblemSetup`].
    /// `n_groups` comes from the opened data library.
    pub fn preprocess(&self, n_groups: usize) -> Result<ProblemSetup, crate::error::Error> {
        let flux_names: Vec<String> = self.flux.iter().map(|f| f.name.clone()).collect();

        // cooling times first, then the schedule against the flux names
        let mut cooling_times = Vec::with_capacity(self.cooling.times.len());
        for time in &self.cooling.times {
            cooling_times.push(time.to_seconds()?);
        }
        let schedule = self.schedule.compile(&flux_names, cooling_times)?;

        // flux spectra, one row per interval per definition
        let mut per_flux_rows = Vec::with_capacity(self.flux.len());
        for def in &self.flux {
            let rows = def.load_rows(self.interval.len(), n_groups)?;
            per_flux_rows.push(rows);
        }

        let mut intervals = Vec::with_capacity(self.interval.len());
        for (i, def) in self.interval.iter().enumerate() {
            if !self.mixture.iter().any(|m| m.name == def.mixture) {
                return Err(ProblemError::UnknownMixture {
                    interval: def.name.clone(),
                    mixture: def.mixture.clone(),
                }
                .into());
            }
            let spectra = per_flux_rows.iter().map(|rows| rows[i].clone()).collect();
            intervals.push(Interval {
                name: def.name.clone(),
                volume: def.volume,
                spectra,
            });
        }

        let roots = self.resolve_roots()?;
        info!(
            roots = roots.len(),
            intervals = intervals.len(),
            fluxes = flux_names.len(),
            "preprocessed problem"
        );

        Ok(ProblemSetup {
            library_path: self.library.path.clone(),
            mode: self.mode,
            truncation: self.truncation,
            reference_flux: self.reference_flux,
            weighting: self.weighting,
            dump_path: self
                .dump_file
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DUMP)),
            flux_names,
            intervals,
            roots,
            schedule,
        })
    }

    /// Derive the root list: every mixture component becomes a root with
    /// cross-references into the intervals loaded with that mixture.
    fn resolve_roots(&self) -> Result<Vec<RootSpec>, ProblemError> {
        let mut roots: Vec<RootSpec> = Vec::new();
        for mixture in &self.mixture {
            let total_density: f64 = mixture.components.iter().map(|c| c.density).sum();
            let containing: Vec<usize> = self
                .interval
                .iter()
                .enumerate()
                .filter(|(_, i)| i.mixture == mixture.name)
                .map(|(idx, _)| idx)
                .collect();

            for component in &mixture.components {
                let kza = Kza::parse(&component.nuclide)
                    .ok_or_else(|| ProblemError::BadNuclide(component.nuclide.clone()))?;
                let rel_conc = if total_density > 0.0 {
                    component.density / total_density
                } else {
                    0.0
                };

                let root = match roots.iter_mut().find(|r| r.kza == kza) {
                    Some(root) => root,
                    None => {
                        roots.push(RootSpec {
                            kza,
                            max_rel_conc: 0.0,
                            refs: Vec::new(),
                        });
                        roots.last_mut().expect("just pushed")
                    }
                };
                root.max_rel_conc = root.max_rel_conc.max(rel_conc);
                for &interval in &containing {
                    root.refs.push(RootRef {
                        interval,
                        density: component.density,
                    });
                }
            }
        }
        // roots solve in ascending kza order
        roots.sort_by_key(|r| r.kza);
        Ok(roots)
    }
}

impl FluxDef {
    fn load_rows(
        &self,
        n_intervals: usize,
        n_groups: usize,
    ) -> Result<Vec<Vec<f64>>, ProblemError> {
        let mut rows: Vec<Vec<f64>> = match (&self.values, &self.file) {
            (Some(values), _) => values.clone(),
            (None, Some(path)) => {
                let text = fs::read_to_string(path).map_err(|source| ProblemError::Io {
                    path: path.clone(),
                    source,
                })?;
                let numbers: Vec<f64> = text
                    .split_whitespace()
                    .map(str::parse)
                    .collect::<Result<_, _>>()
                    .map_err(|e| {
                        ProblemError::Invalid(format!(
                            "flux '{}': bad number in {}: {e}",
                            self.name,
                            path.display()
                        ))
                    })?;
                numbers.chunks(n_groups).map(<[f64]>::to_vec).collect()
            }
            (None, None) => {
                return Err(ProblemError::Invalid(format!(
                    "flux '{}' needs either inline values or a file",
                    self.name
                )))
            }
        };

        if rows.len() != n_intervals {
            return Err(ProblemError::FluxShape {
                name: self.name.clone(),
                got: rows.len(),
                want: n_intervals,
            });
        }
        for row in &mut rows {
            if row.len() != n_groups {
                return Err(ProblemError::FluxGroups {
                    name: self.name.clone(),
                    got: row.len(),
                    want: n_groups,
                });
            }
            for phi in row.iter_mut() {
                *phi *= self.scale;
            }
        }
        Ok(rows)
    }
}

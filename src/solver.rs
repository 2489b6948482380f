//! Solve Orchestration
//!
//! The top of the solution phase: roots are solved in ascending kza order;
//! for each root a reference flux is condensed from the containing
//! intervals, a chain is grown and truncated against it, and every solved
//! chain is tallied into per-interval result lists. After a root's
//! sub-tree is exhausted its weighted aggregate is appended to the binary
//! dump, which postprocessing later rewinds and reads back.

use std::io::Write;

use tracing::{debug, info};

use crate::chain::{BuildOutcome, Chain};
use crate::config::Config;
use crate::data::{DataLibrary, Kza};
use crate::error::{Error, Result};
use crate::problem::ProblemSetup;
use crate::rate::{reference_spectrum, VolFlux};
use crate::results::{BinaryDump, DumpReader, ResultList};
use crate::schedule::{ReferenceSolver, ScheduleCalc};
use crate::trace::ChainTrace;

/// Results of one root's solve
#[derive(Debug)]
pub struct RootResults {
    pub kza: Kza,
    /// Per containing interval, in problem order
    pub per_interval: Vec<(usize, ResultList)>,
    /// Weighted aggregate across the intervals (what the dump carries)
    pub aggregate: ResultList,
}

/// Full solve-phase output
#[derive(Debug)]
pub struct SolveReport {
    pub roots: Vec<RootResults>,
    pub chains_solved: u64,
    /// The dump in append state, ready to rewind for postprocessing
    pub dump: BinaryDump,
}

/// Per-(root, interval) solve context: the interval's flux spectra with
/// their rate caches, a schedule matrix mirror, and the tally list
struct IntervalContext {
    interval: usize,
    density: f64,
    fluxes: Vec<VolFlux>,
    calc: ScheduleCalc,
    results: ResultList,
}

/// The solve phase driver
pub struct Solver {
    config: Config,
    setup: ProblemSetup,
    library: DataLibrary,
}

impl Solver {
    /// Open the problem's data library and build a solver.
    pub fn open(config: Config, setup: ProblemSetup) -> Result<Self> {
        let library = DataLibrary::open(&setup.library_path)?;
        Ok(Solver {
            config,
            setup,
            library,
        })
    }

    /// Build a solver around an already-open library (the group count must
    /// match whatever the setup was validated against).
    pub fn with_library(config: Config, setup: ProblemSetup, library: DataLibrary) -> Self {
        Solver {
            config,
            setup,
            library,
        }
    }

    pub fn setup(&self) -> &ProblemSetup {
        &self.setup
    }

    /// Solve every root over every containing interval.
    pub fn solve(&mut self, mut chain_trace: Option<&mut ChainTrace>) -> Result<SolveReport> {
        let schedule = &self.setup.schedule;
        let n_results = schedule.n_results();
        let cache_capacity = self.config.cache.capacity;
        let numerics = self.config.numerics.clone();

        let mut dump = BinaryDump::create(&self.setup.dump_path, n_results)?;
        let mut report_roots = Vec::with_capacity(self.setup.roots.len());
        let mut chains_solved = 0u64;

        for root in &self.setup.roots {
            info!(root = %root.kza, "solving root");

            // reference spectra: one per flux definition, condensed over
            // the intervals containing this root
            let mut reference_fluxes = Vec::with_capacity(self.setup.flux_names.len());
            for flux_num in 0..self.setup.flux_names.len() {
                let contributions: Vec<(f64, &[f64])> = root
                    .refs
                    .iter()
                    .map(|r| {
                        let interval = &self.setup.intervals[r.interval];
                        (interval.volume, interval.spectra[flux_num].as_slice())
                    })
                    .collect();
                let spectrum = reference_spectrum(
                    self.setup.reference_flux,
                    &contributions,
                    self.library.n_groups(),
                );
                reference_fluxes.push(VolFlux::new(spectrum, cache_capacity));
            }
            let mut reference =
                ReferenceSolver::new(schedule, numerics.clone(), reference_fluxes);

            // one context per distinct containing interval
            let mut contexts: Vec<IntervalContext> = Vec::new();
            for r in &root.refs {
                match contexts.iter_mut().find(|c| c.interval == r.interval) {
                    Some(ctx) => ctx.density += r.density,
                    None => contexts.push(IntervalContext {
                        interval: r.interval,
                        density: r.density,
                        fluxes: self.setup.intervals[r.interval]
                            .spectra
                            .iter()
                            .map(|s| VolFlux::new(s.clone(), cache_capacity))
                            .collect(),
                        calc: ScheduleCalc::new(schedule),
                        results: ResultList::new(n_results),
                    }),
                }
            }

            let mut chain = Chain::new(
                root.kza,
                &self.setup.truncation,
                root.max_rel_conc,
                self.setup.mode,
                self.setup.flux_names.len(),
                self.config.chain.initial_capacity,
            );

            loop {
                let outcome =
                    chain.build(&mut self.library, &mut reference, chain_trace.as_deref_mut())?;
                match outcome {
                    BuildOutcome::Solve { set_rank } => {
                        debug!(
                            root = %root.kza,
                            length = chain.len(),
                            set_rank,
                            "solving chain"
                        );
                        chain.prepare_solve();
                        for ctx in &mut contexts {
                            chain.collapse(&mut ctx.fluxes);
                            let view = chain.view();
                            ctx.calc.solve(&view, schedule, &numerics)?;
                            ctx.results.tally_chain(
                                &chain,
                                &ctx.calc,
                                schedule,
                                set_rank,
                                &numerics,
                            )?;
                        }
                        chains_solved += 1;
                        if let Some(tracer) = chain_trace.as_deref_mut() {
                            tracer.count_chain();
                        }
                    }
                    BuildOutcome::Finished => break,
                }
            }

            // aggregate across intervals and persist the root record
            let mut aggregate = ResultList::new(n_results);
            for ctx in &contexts {
                let volume = self.setup.intervals[ctx.interval].volume;
                let scale = self.setup.weighting.scale(ctx.density, volume);
                aggregate.merge_scaled(&ctx.results, scale);
            }
            dump.write_root(&aggregate)?;

            if let Some(tracer) = chain_trace.as_deref_mut() {
                tracer.end_root(root.kza);
            }
            report_roots.push(RootResults {
                kza: root.kza,
                per_interval: contexts
                    .into_iter()
                    .map(|c| (c.interval, c.results))
                    .collect(),
                aggregate,
            });
        }

        info!(
            roots = report_roots.len(),
            chains = chains_solved,
            "solved problem"
        );
        Ok(SolveReport {
            roots: report_roots,
            chains_solved,
            dump,
        })
    }
}

/// Stream the dump back and write a concentration table per root record.
/// Root identities come from the problem's root order, which is what the
/// solve phase appended in.
pub fn write_summary<W: Write>(
    out: &mut W,
    reader: &mut DumpReader,
    roots: &[Kza],
    cooling_times: &[f64],
) -> Result<()> {
    let to_io = |source: std::io::Error| {
        Error::Dump(crate::error::DumpError::Io {
            path: std::path::PathBuf::from("<summary>"),
            source,
        })
    };

    writeln!(out, "response: nuclide concentrations [atoms/cm3]").map_err(to_io)?;
    let mut root_num = 0usize;
    while let Some(record) = reader.read_root()? {
        let label = roots
            .get(root_num)
            .map_or_else(|| format!("record {}", root_num + 1), ToString::to_string);
        writeln!(out, "\ntarget: {label}").map_err(to_io)?;

        write!(out, "{:<12}{:>14}", "nuclide", "shutdown").map_err(to_io)?;
        for t in cooling_times {
            write!(out, "{t:>14.4e}").map_err(to_io)?;
        }
        writeln!(out).map_err(to_io)?;

        let mut totals = vec![0.0; reader.n_results()];
        for (kza, values) in record.iter() {
            write!(out, "{:<12}", kza.to_string()).map_err(to_io)?;
            for (total, &v) in totals.iter_mut().zip(values) {
                write!(out, "{v:>14.6e}").map_err(to_io)?;
                *total += v;
            }
            writeln!(out).map_err(to_io)?;
        }
        write!(out, "{:<12}", "total").map_err(to_io)?;
        for total in &totals {
            write!(out, "{total:>14.6e}").map_err(to_io)?;
        }
        writeln!(out).map_err(to_io)?;
        root_num += 1;
    }
    Ok(())
}

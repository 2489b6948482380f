//! Schedule Evaluation
//!
//! Bottom-up composition of the schedule tree into one transfer operator
//! per chain solve. A [`ScheduleCalc`] mirrors the compiled schedule and
//! keeps every node's matrices alive between successive chain solves, so a
//! refill only recomputes the rows at or above the chain's `new_rank` (the
//! incremental reuse contract of the matrix engine). Pulse histories build
//! `(T*D)^(n-1)` by repeated squaring over a fixed slot sequence, which
//! keeps the reuse contract intact for every intermediate product.

use crate::chain::Chain;
use crate::config::NumericsConfig;
use crate::error::NumericalError;
use crate::matrix::{
    fill_decay, fill_transmutation, multiply, ChainView, Mode, TransferMatrix,
};
use crate::rate::VolFlux;

use super::{CompiledSchedule, Item};

/// Per-item matrix storage
#[derive(Debug, Default)]
struct ItemCalc {
    /// `T(tau)` for pulse items
    pulse_t: TransferMatrix,
    /// `D(dwell)` for histories, `D(delay)` for sub-schedules
    dwell: TransferMatrix,
    /// `T * D` base of the history power
    td: TransferMatrix,
    /// Repeated-squaring intermediates
    pow: Vec<TransferMatrix>,
    /// Final item matrix
    matrix: TransferMatrix,
}

/// Per-cooling-time storage
#[derive(Debug, Default)]
struct CoolingCalc {
    decay: TransferMatrix,
    out: TransferMatrix,
}

/// Matrix mirror of a compiled schedule for one solve context (one interval
/// family, or the reference calculation).
#[derive(Debug, Default)]
pub struct ScheduleCalc {
    items: Vec<Vec<ItemCalc>>,
    /// Left-compose partial products per plan
    partials: Vec<Vec<TransferMatrix>>,
    totals: Vec<TransferMatrix>,
    cooling: Vec<CoolingCalc>,
}

impl ScheduleCalc {
    pub fn new(schedule: &CompiledSchedule) -> Self {
        ScheduleCalc {
            items: schedule
                .plans
                .iter()
                .map(|p| p.items.iter().map(|_| ItemCalc::default()).collect())
                .collect(),
            partials: schedule
                .plans
                .iter()
                .map(|p| {
                    (0..p.items.len().saturating_sub(1))
                        .map(|_| TransferMatrix::new())
                        .collect()
                })
                .collect(),
            totals: schedule.plans.iter().map(|_| TransferMatrix::new()).collect(),
            cooling: schedule
                .cooling_times
                .iter()
                .map(|_| CoolingCalc::default())
                .collect(),
        }
    }

    /// Evaluate the whole schedule for the current chain state.
    pub fn solve(
        &mut self,
        view: &ChainView<'_>,
        schedule: &CompiledSchedule,
        numerics: &NumericsConfig,
    ) -> Result<(), NumericalError> {
        for &plan_idx in &schedule.eval_order {
            let plan = &schedule.plans[plan_idx];

            // item matrices first; sub-schedule totals are already final
            // because the evaluation order puts children before parents
            for (item_idx, item) in plan.items.iter().enumerate() {
                let calc = &mut self.items[plan_idx][item_idx];
                match *item {
                    Item::Pulse {
                        duration,
                        flux,
                        count,
                        dwell,
                    } => {
                        fill_transmutation(&mut calc.pulse_t, view, duration, flux, numerics)?;
                        if count > 1 {
                            fill_decay(&mut calc.dwell, view, dwell, numerics)?;
                            multiply(&mut calc.td, &calc.pulse_t, &calc.dwell, view)?;
                            let pow_idx = power_into(&mut calc.pow, &calc.td, count - 1, view)?;
                            let base = match pow_idx {
                                Some(idx) => &calc.pow[idx],
                                None => &calc.td,
                            };
                            multiply(&mut calc.matrix, base, &calc.pulse_t, view)?;
                        } else {
                            calc.matrix.clone_from(&calc.pulse_t);
                        }
                    }
                    Item::Sub { plan: sub, delay } => {
                        fill_decay(&mut calc.dwell, view, delay, numerics)?;
                        multiply(&mut calc.matrix, &calc.dwell, &self.totals[sub], view)?;
                    }
                }
            }

            // compose the plan total right-to-left: M = M_k * ... * M_1
            let items = &self.items[plan_idx];
            let partials = &mut self.partials[plan_idx];
            let total = &mut self.totals[plan_idx];
            match items.len() {
                0 => *total = TransferMatrix::identity(view.length),
                1 => total.clone_from(&items[0].matrix),
                n => {
                    multiply(&mut partials[0], &items[1].matrix, &items[0].matrix, view)?;
                    for i in 1..n - 1 {
                        let (done, rest) = partials.split_at_mut(i);
                        multiply(&mut rest[0], &items[i + 1].matrix, &done[i - 1], view)?;
                    }
                    total.clone_from(&partials[n - 2]);
                }
            }
        }

        // cooling times apply plain decay to the top-schedule operator
        let top = &self.totals[schedule.top];
        for (calc, &t_cool) in self.cooling.iter_mut().zip(&schedule.cooling_times) {
            fill_decay(&mut calc.decay, view, t_cool, numerics)?;
            multiply(&mut calc.out, &calc.decay, top, view)?;
        }
        Ok(())
    }

    /// Concentration results for one chain rank: shutdown first, then one
    /// value per cooling time. The initial condition is a unit
    /// concentration at the root.
    pub fn results(
        &self,
        view: &ChainView<'_>,
        rank: usize,
        schedule: &CompiledSchedule,
        numerics: &NumericsConfig,
    ) -> Result<Vec<f64>, NumericalError> {
        let idx = match view.mode {
            Mode::Forward => rank,
            Mode::Reverse => view.length - 1 - rank,
        };
        // forward reads the rank's concentration from a unit root; reverse
        // reads the target's concentration from a unit rank-parent
        let (row, col) = match view.mode {
            Mode::Forward => (idx, 0),
            Mode::Reverse => (view.length - 1, idx),
        };

        let mut out = Vec::with_capacity(self.cooling.len() + 1);
        out.push(self.totals[schedule.top].get(row, col));
        for calc in &self.cooling {
            out.push(calc.out.get(row, col));
        }

        for value in &mut out {
            if *value < 0.0 {
                if *value > -numerics.negative_clamp {
                    *value = 0.0;
                } else {
                    return Err(NumericalError::NegativeConcentration {
                        rank,
                        value: *value,
                    });
                }
            }
        }
        Ok(out)
    }
}

/// Raise `td` to the `e`-th power by repeated squaring over a fixed slot
/// sequence. Returns the slot holding the result, or `None` when the
/// result is `td` itself (`e == 1`).
fn power_into(
    pow: &mut Vec<TransferMatrix>,
    td: &TransferMatrix,
    e: u32,
    view: &ChainView<'_>,
) -> Result<Option<usize>, NumericalError> {
    debug_assert!(e >= 1);
    if e == 1 {
        return Ok(None);
    }
    let bits = 32 - e.leading_zeros();
    let needed = 2 * (bits as usize - 1);
    if pow.len() < needed {
        pow.resize_with(needed, TransferMatrix::new);
    }

    let mut cur: Option<usize> = None;
    let mut slot = 0;
    for bit in (0..bits - 1).rev() {
        {
            let (head, tail) = pow.split_at_mut(slot);
            let acc: &TransferMatrix = match cur {
                None => td,
                Some(idx) => &head[idx],
            };
            multiply(&mut tail[0], acc, acc, view)?;
        }
        cur = Some(slot);
        slot += 1;

        if (e >> bit) & 1 == 1 {
            let (head, tail) = pow.split_at_mut(slot);
            let acc = &head[slot - 1];
            multiply(&mut tail[0], acc, td, view)?;
            cur = Some(slot);
            slot += 1;
        }
    }
    Ok(cur)
}

/// Reference-calculation solver: the per-root reference flux spectra, and a
/// dedicated matrix mirror whose contents persist across the chains of one
/// root.
#[derive(Debug)]
pub struct ReferenceSolver<'p> {
    schedule: &'p CompiledSchedule,
    numerics: NumericsConfig,
    fluxes: Vec<VolFlux>,
    calc: ScheduleCalc,
}

impl<'p> ReferenceSolver<'p> {
    pub fn new(
        schedule: &'p CompiledSchedule,
        numerics: NumericsConfig,
        fluxes: Vec<VolFlux>,
    ) -> Self {
        let calc = ScheduleCalc::new(schedule);
        ReferenceSolver {
            schedule,
            numerics,
            fluxes,
            calc,
        }
    }

    /// Relative production of the chain's newest nuclide at shutdown and
    /// each cooling time, solved against the reference flux. The chain's
    /// leaf destruction rates are suppressed for the duration (production
    /// is measured, not equilibrium).
    pub fn relative_production(&mut self, chain: &mut Chain) -> Result<Vec<f64>, NumericalError> {
        chain.begin_reference();
        chain.collapse(&mut self.fluxes);
        let leaf = chain.leaf_rank();
        let view = chain.view();
        self.calc.solve(&view, self.schedule, &self.numerics)?;
        let rel = self.calc.results(&view, leaf, self.schedule, &self.numerics);
        chain.end_reference();
        rel
    }
}

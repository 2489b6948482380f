//! Irradiation Schedules
//!
//! A schedule is an ordered sequence of items: leaf pulses (duration, pulse
//! history, flux) and named sub-schedules with a trailing dwell. The top
//! schedule carries the cooling-time list. Name resolution, shape checks
//! and cycle detection all happen in [`ScheduleSet::compile`], before any
//! solve begins; the engine only ever sees the compiled form.
//!
//! ```text
//! top ----- pulse (2h, history "burst", flux "fw")
//!       \-- sub "maintenance" (dwell 1d)
//!                \-- pulse (10s, history "single", flux "fw")
//! cooling times: 1h, 1d, 1y
//! ```

pub mod calc;

pub use calc::{ReferenceSolver, ScheduleCalc};

use serde::Deserialize;

use crate::error::ScheduleError;

/// A repeating pulse pattern: `count` pulses separated by `dwell` seconds.
/// The trailing dwell belongs to the containing schedule, not the history.
#[derive(Debug, Clone, Deserialize)]
pub struct PulseHistory {
    pub name: String,
    pub count: u32,
    #[serde(default)]
    pub dwell: f64,
}

/// Unresolved schedule item as the problem file states it
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScheduleItemDef {
    Pulse {
        /// Pulse duration in seconds
        duration: f64,
        flux: String,
        history: String,
    },
    Sub {
        schedule: String,
        /// Decay dwell applied after the sub-schedule, seconds
        #[serde(default)]
        delay: f64,
    },
}

/// Unresolved schedule
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleDef {
    pub name: String,
    #[serde(default)]
    pub items: Vec<ScheduleItemDef>,
}

/// The full schedule description attached to a problem
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSet {
    pub top: String,
    #[serde(default)]
    pub histories: Vec<PulseHistory>,
    #[serde(default)]
    pub schedules: Vec<ScheduleDef>,
}

/// Resolved item: names replaced by indices, histories inlined
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Item {
    Pulse {
        duration: f64,
        flux: usize,
        count: u32,
        dwell: f64,
    },
    Sub {
        plan: usize,
        delay: f64,
    },
}

/// Resolved schedule
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: String,
    pub items: Vec<Item>,
}

/// Compiled schedule tree ready for evaluation
#[derive(Debug, Clone)]
pub struct CompiledSchedule {
    pub plans: Vec<Plan>,
    pub top: usize,
    /// Post-order over the reachable plans: children before their parents
    pub eval_order: Vec<usize>,
    /// Cooling times in seconds, applied after the top schedule
    pub cooling_times: Vec<f64>,
    pub n_fluxes: usize,
}

impl CompiledSchedule {
    /// Result slots per nuclide: shutdown plus one per cooling time
    pub fn n_results(&self) -> usize {
        self.cooling_times.len() + 1
    }
}

impl ScheduleSet {
    /// Resolve names, inline histories, verify the reference graph is a
    /// dag and produce the evaluation order.
    pub fn compile(
        &self,
        flux_names: &[String],
        cooling_times: Vec<f64>,
    ) -> Result<CompiledSchedule, ScheduleError> {
        let plan_index = |name: &str| self.schedules.iter().position(|s| s.name == name);

        let mut plans = Vec::with_capacity(self.schedules.len());
        for def in &self.schedules {
            let mut items = Vec::with_capacity(def.items.len());
            for item in &def.items {
                match item {
                    ScheduleItemDef::Pulse {
                        duration,
                        flux,
                        history,
                    } => {
                        let flux = flux_names.iter().position(|n| n == flux).ok_or_else(|| {
                            ScheduleError::UnknownFlux(def.name.clone(), flux.clone())
                        })?;
                        let hist = self
                            .histories
                            .iter()
                            .find(|h| &h.name == history)
                            .ok_or_else(|| {
                                ScheduleError::DanglingHistory(def.name.clone(), history.clone())
                            })?;
                        items.push(Item::Pulse {
                            duration: *duration,
                            flux,
                            count: hist.count.max(1),
                            dwell: hist.dwell,
                        });
                    }
                    ScheduleItemDef::Sub { schedule, delay } => {
                        let plan = plan_index(schedule).ok_or_else(|| {
                            ScheduleError::DanglingSchedule(def.name.clone(), schedule.clone())
                        })?;
                        items.push(Item::Sub {
                            plan,
                            delay: *delay,
                        });
                    }
                }
            }
            plans.push(Plan {
                name: def.name.clone(),
                items,
            });
        }

        let top =
            plan_index(&self.top).ok_or_else(|| ScheduleError::MissingTop(self.top.clone()))?;

        let mut eval_order = Vec::new();
        let mut marks = vec![Mark::White; plans.len()];
        post_order(&plans, top, &mut marks, &mut eval_order)?;

        Ok(CompiledSchedule {
            plans,
            top,
            eval_order,
            cooling_times,
            n_fluxes: flux_names.len(),
        })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    White,
    Gray,
    Black,
}

fn post_order(
    plans: &[Plan],
    at: usize,
    marks: &mut Vec<Mark>,
    order: &mut Vec<usize>,
) -> Result<(), ScheduleError> {
    match marks[at] {
        Mark::Black => return Ok(()),
        Mark::Gray => return Err(ScheduleError::Cycle(plans[at].name.clone())),
        Mark::White => {}
    }
    marks[at] = Mark::Gray;
    for item in &plans[at].items {
        if let Item::Sub { plan, .. } = item {
            post_order(plans, *plan, marks, order)?;
        }
    }
    marks[at] = Mark::Black;
    order.push(at);
    Ok(())
}

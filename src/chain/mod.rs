//! Activation Chains
//!
//! A chain is the contiguous arena of nuclide nodes from the root down to
//! the current leaf, together with the per-rank rate slots the matrix
//! engine collapses against each flux. The builder walks the root's
//! reaction tree depth-first: every new node runs a reference-production
//! calculation whose result drives the truncation state machine, and the
//! chain is solved whenever a branch truncates.
//!
//! Rank storage grows geometrically: the slot arrays start at the
//! configured initial capacity, double when the chain outgrows them and
//! halve when utilisation drops below a quarter.

pub mod node;

pub use node::{ChainNode, NodeState};

use tracing::{debug, trace};

use crate::data::{DataLibrary, Kza, NuclideRef};
use crate::error::Error;
use crate::matrix::{ChainView, Mode};
use crate::rate::{CacheKey, VolFlux};
use crate::schedule::ReferenceSolver;
use crate::trace::ChainTrace;

use node::trunc;

/// Truncation thresholds for one problem
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
pub struct TruncParams {
    /// Relative-production threshold below which a branch truncates
    pub trunc_limit: f64,
    /// `ignore_limit = trunc_limit * ignore_ratio`
    pub ignore_ratio: f64,
    /// Roots whose maximum relative concentration falls below this are
    /// impurities and use the looser limit (0 disables)
    pub impurity_fraction: f64,
    pub impurity_trunc_limit: f64,
}

impl Default for TruncParams {
    fn default() -> Self {
        TruncParams {
            trunc_limit: 1.0,
            ignore_ratio: 1e-2,
            impurity_fraction: 0.0,
            impurity_trunc_limit: 1.0,
        }
    }
}

/// What the builder handed back control for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// A branch truncated: solve the chain and tally ranks from `set_rank`
    Solve { set_rank: usize },
    /// The root's sub-tree is exhausted
    Finished,
}

/// Production-side rate reference: the parent's reaction path feeding a rank
#[derive(Debug, Clone)]
struct PathRef {
    /// Parent nuclide data; the path index selects the feeding channel
    data: NuclideRef,
    path: usize,
}

/// Per-rank rate slots (production and destruction, cross-section and decay
/// sides, plus their cache addressing)
#[derive(Debug, Clone, Default)]
struct RateSlots {
    production: Option<PathRef>,
    destruction: Option<NuclideRef>,
}

/// One activation chain rooted at a single nuclide
#[derive(Debug)]
pub struct Chain {
    nodes: Vec<ChainNode>,
    slots: Vec<RateSlots>,
    loop_rank: Vec<i32>,
    capacity: usize,
    initial_capacity: usize,
    mode: Mode,
    n_fluxes: usize,

    new_rank: usize,
    set_rank: usize,
    solving_ref: bool,

    trunc_limit: f64,
    ignore_limit: f64,

    // collapsed scalar rates, solution-index space
    lambda: Vec<f64>,
    branch: Vec<f64>,
    prod: Vec<f64>,
    dest: Vec<f64>,
}

impl Chain {
    /// Start a chain at a root nuclide. `max_rel_conc` is the root's
    /// maximum relative concentration over its mixtures; below the
    /// configured impurity fraction the looser truncation limit applies.
    pub fn new(
        root: Kza,
        params: &TruncParams,
        max_rel_conc: f64,
        mode: Mode,
        n_fluxes: usize,
        initial_capacity: usize,
    ) -> Self {
        let initial_capacity = initial_capacity.max(1);
        let (mut trunc_limit, mut ignore_limit) = (
            params.trunc_limit,
            params.trunc_limit * params.ignore_ratio,
        );
        if max_rel_conc < params.impurity_fraction && mode == Mode::Forward {
            trunc_limit = params.impurity_trunc_limit;
            ignore_limit = params.impurity_trunc_limit * params.ignore_ratio;
            debug!(root = %root, max_rel_conc, "treating root as impurity");
        }

        Chain {
            nodes: vec![ChainNode::root(root)],
            slots: vec![RateSlots::default(); initial_capacity],
            loop_rank: vec![-1; initial_capacity],
            capacity: initial_capacity,
            initial_capacity,
            mode,
            n_fluxes,
            new_rank: 0,
            set_rank: 0,
            solving_ref: false,
            trunc_limit,
            ignore_limit,
            lambda: Vec::new(),
            branch: Vec::new(),
            prod: Vec::new(),
            dest: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root_kza(&self) -> Kza {
        self.nodes[0].kza
    }

    pub fn leaf_rank(&self) -> usize {
        self.nodes.len() - 1
    }

    /// KZA at a rank, or `None` past the end of the chain
    pub fn kza_at(&self, rank: usize) -> Option<Kza> {
        self.nodes.get(rank).map(|n| n.kza)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Advance the build state machine until a chain needs solving or the
    /// root is exhausted.
    pub fn build(
        &mut self,
        library: &mut DataLibrary,
        reference: &mut ReferenceSolver<'_>,
        mut chain_trace: Option<&mut ChainTrace>,
    ) -> Result<BuildOutcome, Error> {
        loop {
            let rank = self.leaf_rank();
            if !self.nodes[rank].loaded {
                self.init_node(rank, library, reference, chain_trace.as_deref_mut())?;
            }

            let parent_solved = rank > 0 && self.nodes[rank - 1].state == NodeState::Solved;
            let (state, demote_parent) = self.nodes[rank].advance(parent_solved);
            if demote_parent {
                self.nodes[rank - 1].state = NodeState::Truncate;
            }

            match state {
                NodeState::Continue | NodeState::TruncateStable => self.add_next(rank),
                NodeState::Solved => {
                    // the retracting rank's rows must be recomputed by the
                    // next fill; reverse mode refills everything
                    self.new_rank = match self.mode {
                        Mode::Forward => self.len() - 1,
                        Mode::Reverse => 0,
                    };
                    self.retract(rank);
                }
                NodeState::Ignore => {
                    // an ignored root has nothing to retract into
                    if rank == 0 {
                        return Ok(BuildOutcome::Finished);
                    }
                    self.retract(rank);
                }
                NodeState::Solve => {
                    return Ok(BuildOutcome::Solve {
                        set_rank: self.set_rank,
                    })
                }
                NodeState::FinishedRoot => return Ok(BuildOutcome::Finished),
                NodeState::Truncate => unreachable!("action pass produced {state:?}"),
            }
        }
    }

    /// Load a freshly appended node and run its truncation classification.
    fn init_node(
        &mut self,
        rank: usize,
        library: &mut DataLibrary,
        reference: &mut ReferenceSolver<'_>,
        chain_trace: Option<&mut ChainTrace>,
    ) -> Result<(), Error> {
        let kza = self.nodes[rank].kza;
        trace!(kza = %kza, rank, "processing new node");

        let data = library.read(kza)?;
        {
            let node = &mut self.nodes[rank];
            node.loaded = true;
            node.n_active = data.as_ref().map_or(0, |d| d.paths.len());
            node.data = data;
            if node.state == NodeState::TruncateStable {
                // a truncated-stable lineage strips on load
                node.state = node.strip_non_decay();
            }
        }

        self.resize_rates();
        self.copy_rates(rank);

        // a node with nothing to follow truncates without a reference
        // calculation
        let mut rel = Vec::new();
        if self.nodes[rank].classify(0) != NodeState::Truncate {
            rel = reference.relative_production(self)?;
            let bits = self.trunc_bits(&rel);
            let state = self.nodes[rank].classify(bits);
            trace!(kza = %kza, rank, bits, ?state, "set truncation state");
        }

        if let Some(tracer) = chain_trace {
            let via = self.emitted_into(rank).map(str::to_owned);
            let parent_id = if rank > 0 {
                self.nodes[rank - 1].trace_id
            } else {
                0
            };
            let node = &mut self.nodes[rank];
            node.trace_id = tracer.account(
                node.kza,
                via.as_deref(),
                rank,
                node.state,
                &rel,
                parent_id,
            );
        }
        Ok(())
    }

    /// The emitted tag of the parent path that produced `rank`
    fn emitted_into(&self, rank: usize) -> Option<&str> {
        let node = self.nodes.get(rank)?;
        let parent = self.nodes.get(rank.checked_sub(1)?)?;
        let path = node.via_path?;
        Some(&parent.data.as_ref()?.paths[path].emitted)
    }

    /// Encode a reference-production vector into truncation bits
    fn trunc_bits(&self, rel: &[f64]) -> u8 {
        let mut bits = 0;
        if rel.is_empty() {
            return bits;
        }
        if rel[0] < self.trunc_limit {
            bits |= trunc::TRUNC_EOS;
        }
        if rel[0] < self.ignore_limit {
            bits |= trunc::IGNORE_EOS;
        }
        for &r in &rel[1..] {
            if r < self.trunc_limit {
                bits |= trunc::TRUNC_COOL;
            }
            if r < self.ignore_limit {
                bits |= trunc::IGNORE_COOL;
            }
        }
        bits
    }

    /// Append the next unexplored child of `rank` and update `set_rank`.
    fn add_next(&mut self, rank: usize) {
        let (child_kza, path) = {
            let node = &self.nodes[rank];
            let data = node
                .data
                .as_ref()
                .expect("add_next on a node without data");
            debug_assert!(node.path_num < node.n_active);
            (data.paths[node.path_num].daughter, node.path_num)
        };

        let inherited = self.nodes[rank].state;
        self.nodes[rank].path_num += 1;
        self.nodes
            .push(ChainNode::child(child_kza, path, rank + 1, inherited));

        if self.nodes[rank].path_num == self.nodes[rank].n_active {
            // last child: this node solves with it, as does any contiguous
            // run of solved ancestors above
            self.nodes[rank].state = NodeState::Solved;
            let mut first = rank;
            while first > 0 && self.nodes[first - 1].state == NodeState::Solved {
                first -= 1;
            }
            self.set_rank = first;
        } else {
            self.set_rank = rank + 1;
        }
    }

    /// Drop the leaf and release its rate slots.
    fn retract(&mut self, rank: usize) {
        self.slots[rank] = RateSlots::default();
        self.loop_rank[rank] = rank as i32;
        self.nodes.pop();
        self.resize_rates();
    }

    /// Point the rate slots of `rank` at its nuclide data and record the
    /// loop rank.
    fn copy_rates(&mut self, rank: usize) {
        let node = &self.nodes[rank];
        let destruction = node.data.clone();
        let production = match (rank, node.via_path) {
            (0, _) | (_, None) => None,
            (_, Some(path)) => self.nodes[rank - 1]
                .data
                .clone()
                .map(|data| PathRef { data, path }),
        };
        self.slots[rank] = RateSlots {
            production,
            destruction,
        };

        // nearest earlier occurrence of the same nuclide
        let mut found = -1;
        for earlier in (0..rank).rev() {
            if self.nodes[earlier].kza == self.nodes[rank].kza {
                found = earlier as i32;
                break;
            }
        }
        self.loop_rank[rank] = found;

        // loop ranks must be monotone: a node inside a pre-existing loop
        // inherits the ancestor's loop rank
        if rank > 0 && self.loop_rank[rank] < self.loop_rank[rank - 1] && self.loop_rank[rank - 1] > -1
        {
            self.loop_rank[rank] = self.loop_rank[rank - 1];
        }
    }

    /// Grow or shrink the rank storage to match the chain length.
    fn resize_rates(&mut self) {
        let len = self.nodes.len();
        if len > self.capacity {
            self.capacity *= 2;
        } else if self.capacity > self.initial_capacity && len < self.capacity / 4 {
            self.capacity /= 2;
        } else {
            return;
        }
        self.slots.resize(self.capacity, RateSlots::default());
        self.slots.truncate(self.capacity);
        self.loop_rank.resize(self.capacity, -1);
        self.loop_rank.truncate(self.capacity);
    }

    /// Enter reference-calculation mode: the leaf keeps its production but
    /// loses its destruction so the reference measures production alone.
    pub(crate) fn begin_reference(&mut self) {
        self.solving_ref = true;
        self.setup_scalar_rates();
    }

    pub(crate) fn end_reference(&mut self) {
        self.solving_ref = false;
    }

    /// Prepare the decay-side scalar rates for a real solve.
    pub fn prepare_solve(&mut self) {
        self.solving_ref = false;
        self.setup_scalar_rates();
    }

    /// Fill the decay-side scalar rate arrays from the rate slots.
    fn setup_scalar_rates(&mut self) {
        let len = self.len();
        self.lambda.clear();
        self.lambda.resize(len, 0.0);
        self.branch.clear();
        self.branch.resize(len, 0.0);
        self.prod.clear();
        self.prod.resize(self.n_fluxes * len, 0.0);
        self.dest.clear();
        self.dest.resize(self.n_fluxes * len, 0.0);

        for rank in 0..len {
            let idx = self.idx_of(rank);
            let slot = &self.slots[rank];
            self.branch[idx] = slot
                .production
                .as_ref()
                .map_or(0.0, |p| p.data.paths[p.path].decay_rate(p.data.n_groups()));
            self.lambda[idx] = slot.destruction.as_ref().map_or(0.0, |d| d.lambda);
        }

        if self.solving_ref && len > 0 {
            self.lambda[len - 1] = 0.0;
        }
    }

    /// Collapse the group-wise rates against one flux set, one spectrum per
    /// flux definition, consulting each spectrum's rate cache.
    pub fn collapse(&mut self, fluxes: &mut [VolFlux]) {
        let len = self.len();
        debug_assert_eq!(fluxes.len(), self.n_fluxes);

        for (flux_num, flux) in fluxes.iter_mut().enumerate() {
            for rank in 0..len {
                let idx = self.idx_of(rank);
                let slot = &self.slots[rank];

                let folded_prod = match &slot.production {
                    Some(p) => {
                        let groups = p.data.n_groups();
                        flux.fold(
                            Some(&p.data.paths[p.path].xs[..groups]),
                            Some(CacheKey::production(p.data.kza, p.path, p.data.n_channels())),
                        )
                    }
                    None => 0.0,
                };
                self.prod[flux_num * len + idx] = folded_prod + self.branch[idx];

                let folded_dest = match &slot.destruction {
                    Some(d) => {
                        let groups = d.n_groups();
                        flux.fold(
                            Some(&d.destruction[..groups]),
                            Some(CacheKey::destruction(d.kza, d.n_channels())),
                        )
                    }
                    None => 0.0,
                };
                self.dest[flux_num * len + idx] = folded_dest + self.lambda[idx];
            }

            if self.solving_ref && len > 0 {
                self.dest[flux_num * len + len - 1] = 0.0;
            }
        }
    }

    fn idx_of(&self, rank: usize) -> usize {
        match self.mode {
            Mode::Forward => rank,
            Mode::Reverse => self.len() - 1 - rank,
        }
    }

    /// Borrowed view for the matrix engine. During forward reference
    /// calculations only the newest nuclide and the previous leaf changed,
    /// so just those rows refill.
    pub fn view(&self) -> ChainView<'_> {
        let len = self.len();
        let new_rank = if self.solving_ref && self.mode == Mode::Forward {
            len.saturating_sub(2)
        } else {
            self.new_rank.min(len)
        };
        ChainView {
            length: len,
            new_rank,
            mode: self.mode,
            n_fluxes: self.n_fluxes,
            lambda: &self.lambda[..len],
            branch: &self.branch[..len],
            prod: &self.prod[..self.n_fluxes * len],
            dest: &self.dest[..self.n_fluxes * len],
            loop_rank: &self.loop_rank[..len],
        }
    }
}

//! Chain Nodes and the Truncation State Machine
//!
//! A [`ChainNode`] is one nuclide occurrence at a rank of the current chain.
//! Its [`NodeState`] drives the builder: the classification pass turns the
//! reference-production bits into a truncation decision, the action pass
//! tells the builder whether to extend, solve or retract.

use crate::data::NuclideRef;
use crate::data::Kza;

/// Truncation test bits derived from the reference-production vector.
///
/// All four set means the branch contributes nothing anywhere; end-of-
/// shutdown truncation alone still follows radioactive progeny.
pub mod trunc {
    pub const TRUNC_EOS: u8 = 8;
    pub const TRUNC_COOL: u8 = 4;
    pub const IGNORE_EOS: u8 = 2;
    pub const IGNORE_COOL: u8 = 1;

    pub const IGNORE_ALL: u8 = 15;
    pub const TRUNCATE: u8 = 12;
    pub const TRUNCATE_STABLE: u8 = 8;
}

/// Builder state of one chain node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Keep extending through every reaction path
    Continue,
    /// Keep extending through decay paths only
    TruncateStable,
    /// Stop here; the chain must be solved
    Truncate,
    /// Solve the chain now (produced from Truncate by the action pass)
    Solve,
    /// Solved and ready to retract
    Solved,
    /// Retract without solving
    Ignore,
    /// The root's sub-tree is exhausted
    FinishedRoot,
}

/// One nuclide occurrence in the chain arena
#[derive(Debug)]
pub struct ChainNode {
    pub kza: Kza,
    /// Nuclear data, `None` until loaded or when the library has no record
    pub data: Option<NuclideRef>,
    /// Set once the library was consulted; a miss leaves `data` empty
    pub loaded: bool,
    /// Parent path index that produced this node (root has none)
    pub via_path: Option<usize>,
    /// Children explored so far
    pub path_num: usize,
    /// Paths still considered; stripping reduces this to the decay prefix
    pub n_active: usize,
    pub state: NodeState,
    pub rank: usize,
    /// Identifier assigned by the chain tree trace
    pub trace_id: u64,
}

impl ChainNode {
    pub fn root(kza: Kza) -> Self {
        ChainNode {
            kza,
            data: None,
            loaded: false,
            via_path: None,
            path_num: 0,
            n_active: 0,
            state: NodeState::Continue,
            rank: 0,
            trace_id: 0,
        }
    }

    /// Child node created by `add_next`; inherits the parent's state so a
    /// truncated-stable lineage keeps stripping on load.
    pub fn child(kza: Kza, via_path: usize, rank: usize, inherited: NodeState) -> Self {
        ChainNode {
            kza,
            data: None,
            loaded: false,
            via_path: Some(via_path),
            path_num: 0,
            n_active: 0,
            state: inherited,
            rank,
            trace_id: 0,
        }
    }

    /// Strip pure-transmutation paths: only the decay prefix stays active.
    /// Returns the adjusted truncation state.
    pub fn strip_non_decay(&mut self) -> NodeState {
        self.n_active = self.data.as_ref().map_or(0, |d| d.n_decay);
        if self.n_active == 0 {
            NodeState::Truncate
        } else {
            NodeState::TruncateStable
        }
    }

    /// Classification pass: combine the truncation bits with the current
    /// state. Called once per new node after the reference calculation
    /// (with `bits = 0` for the data-load shortcut).
    pub fn classify(&mut self, bits: u8) -> NodeState {
        match self.state {
            NodeState::Continue => {
                if bits == trunc::IGNORE_ALL {
                    self.state = NodeState::Ignore;
                } else if bits >= trunc::TRUNCATE_STABLE {
                    self.state = self.strip_non_decay();
                } else if self.n_active == 0 || bits >= trunc::TRUNCATE {
                    self.state = NodeState::Truncate;
                }
            }
            NodeState::TruncateStable => {
                // stripping already ran during data load for an inherited
                // truncate-stable node; radioactive branches keep going
                if bits == trunc::IGNORE_ALL {
                    self.state = NodeState::Ignore;
                } else if self.n_active == 0 || bits > trunc::TRUNCATE {
                    self.state = NodeState::Truncate;
                }
            }
            _ => {}
        }
        self.state
    }

    /// Action pass: advance the state and tell the builder what to do.
    /// `parent_solved` reports whether the parent sits in `Solved`; the
    /// return's second half asks the builder to demote that parent back to
    /// `Truncate` (an ignored last child must not lose its parent's chain).
    pub fn advance(&mut self, parent_solved: bool) -> (NodeState, bool) {
        let mut demote_parent = false;
        match self.state {
            NodeState::Ignore => {
                demote_parent = parent_solved;
            }
            NodeState::Truncate => {
                self.state = NodeState::Solve;
            }
            NodeState::Solve => {
                self.state = if self.rank == 0 {
                    NodeState::FinishedRoot
                } else {
                    NodeState::Solved
                };
            }
            NodeState::Solved => {
                if self.rank == 0 {
                    self.state = NodeState::FinishedRoot;
                }
            }
            _ => {}
        }
        (self.state, demote_parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{NuclideData, ReactionPath};
    use std::sync::Arc;

    fn node_with_paths(decay: usize, transmute: usize) -> ChainNode {
        let mut paths = Vec::new();
        for i in 0..decay {
            paths.push(ReactionPath {
                daughter: Kza(280600 + i as u32),
                emitted: "*D".into(),
                xs: vec![0.0, 1e-9],
            });
        }
        for i in 0..transmute {
            paths.push(ReactionPath {
                daughter: Kza(260570 + i as u32),
                emitted: "g".into(),
                xs: vec![1.0, 0.0],
            });
        }
        let data = Arc::new(NuclideData::assemble(
            Kza(270600),
            if decay > 0 { 1e8 } else { 0.0 },
            [0.0; 3],
            paths,
            1,
        ));
        let mut node = ChainNode::root(Kza(270600));
        node.n_active = data.paths.len();
        node.data = Some(data);
        node.loaded = true;
        node
    }

    #[test]
    fn test_classify_continue_below_thresholds() {
        let mut node = node_with_paths(1, 1);
        assert_eq!(node.classify(0), NodeState::Continue);
    }

    #[test]
    fn test_classify_ignore() {
        let mut node = node_with_paths(1, 1);
        assert_eq!(node.classify(trunc::IGNORE_ALL), NodeState::Ignore);
    }

    #[test]
    fn test_classify_strips_to_truncate_stable() {
        let mut node = node_with_paths(1, 2);
        assert_eq!(node.classify(trunc::TRUNCATE_STABLE), NodeState::TruncateStable);
        assert_eq!(node.n_active, 1);
    }

    #[test]
    fn test_classify_stable_dead_end() {
        let mut node = node_with_paths(0, 2);
        // trunc-EOS bits on a node with no decay paths: nothing to follow
        assert_eq!(node.classify(trunc::TRUNCATE), NodeState::Truncate);
    }

    #[test]
    fn test_classify_no_paths_truncates() {
        let mut node = node_with_paths(0, 0);
        assert_eq!(node.classify(0), NodeState::Truncate);
    }

    #[test]
    fn test_truncate_stable_lineage_worse_bits_truncate() {
        let mut node = node_with_paths(1, 0);
        node.state = NodeState::TruncateStable;
        assert_eq!(
            node.classify(trunc::TRUNCATE | trunc::IGNORE_COOL),
            NodeState::Truncate
        );
    }

    #[test]
    fn test_action_pass_truncate_to_finished() {
        let mut node = node_with_paths(0, 0);
        node.state = NodeState::Truncate;
        assert_eq!(node.advance(false).0, NodeState::Solve);
        // root rank: solving the root finishes it
        assert_eq!(node.advance(false).0, NodeState::FinishedRoot);
    }

    #[test]
    fn test_action_pass_solve_to_solved_at_depth() {
        let mut node = node_with_paths(0, 0);
        node.rank = 2;
        node.state = NodeState::Solve;
        assert_eq!(node.advance(false).0, NodeState::Solved);
    }

    #[test]
    fn test_ignore_demotes_solved_parent() {
        let mut node = node_with_paths(1, 1);
        node.rank = 3;
        node.state = NodeState::Ignore;
        let (state, demote) = node.advance(true);
        assert_eq!(state, NodeState::Ignore);
        assert!(demote);
    }
}

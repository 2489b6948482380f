//! Chain Tree Trace
//!
//! Optional diagnostic record of the chain-building process: one JSON line
//! per classified node, carrying its identity, the reaction that produced
//! it, its truncation state and the reference-production vector that drove
//! the decision. Line-per-record JSON keeps the file greppable and easy to
//! post-process.
//!
//! ```json
//! {"node":3,"parent":2,"kza":270600,"name":"co-60","via":"n,g","rank":2,
//!  "state":"truncate","rel_prod":[0.02,0.011,0.005]}
//! ```
//!
//! Trace writing never fails the solve; a broken trace file logs one
//! warning and the run continues.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::chain::NodeState;
use crate::data::Kza;

#[derive(Serialize)]
struct TraceLine<'a> {
    node: u64,
    parent: u64,
    kza: u32,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    via: Option<&'a str>,
    rank: usize,
    state: &'static str,
    rel_prod: &'a [f64],
}

fn state_name(state: NodeState) -> &'static str {
    match state {
        NodeState::Continue => "continue",
        NodeState::TruncateStable => "truncate_stable",
        NodeState::Truncate => "truncate",
        NodeState::Solve => "solve",
        NodeState::Solved => "solved",
        NodeState::Ignore => "ignore",
        NodeState::FinishedRoot => "finished_root",
    }
}

/// Writer for the chain tree trace plus run counters
#[derive(Debug)]
pub struct ChainTrace {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    node_ctr: u64,
    chain_ctr: u64,
    max_root_rank: usize,
    max_problem_rank: usize,
}

impl ChainTrace {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = BufWriter::new(File::create(&path)?);
        Ok(ChainTrace {
            path,
            writer: Some(writer),
            node_ctr: 0,
            chain_ctr: 0,
            max_root_rank: 0,
            max_problem_rank: 0,
        })
    }

    /// Record one classified node; returns its trace identifier.
    pub fn account(
        &mut self,
        kza: Kza,
        via: Option<&str>,
        rank: usize,
        state: NodeState,
        rel_prod: &[f64],
        parent: u64,
    ) -> u64 {
        self.node_ctr += 1;
        self.max_root_rank = self.max_root_rank.max(rank);
        self.max_problem_rank = self.max_problem_rank.max(rank);

        let line = TraceLine {
            node: self.node_ctr,
            parent,
            kza: kza.0,
            name: kza.to_string(),
            via,
            rank,
            state: state_name(state),
            rel_prod,
        };
        if let Some(writer) = self.writer.as_mut() {
            let write = serde_json::to_string(&line)
                .map_err(io::Error::other)
                .and_then(|json| writeln!(writer, "{json}"));
            if let Err(err) = write {
                warn!(path = %self.path.display(), %err, "chain trace write failed; disabling trace");
                self.writer = None;
            }
        }
        self.node_ctr
    }

    /// Count a solved chain.
    pub fn count_chain(&mut self) {
        self.chain_ctr += 1;
    }

    /// Reset the per-root rank high-water mark, logging it first.
    pub fn end_root(&mut self, root: Kza) {
        info!(
            root = %root,
            max_rank = self.max_root_rank,
            "finished root"
        );
        self.max_root_rank = 0;
    }

    /// Log final counters and flush the trace file.
    pub fn finish(mut self) {
        info!(
            nodes = self.node_ctr,
            chains = self.chain_ctr,
            max_rank = self.max_problem_rank,
            "chain tree trace complete"
        );
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.flush() {
                warn!(path = %self.path.display(), %err, "chain trace flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use tempfile::TempDir;

    #[test]
    fn test_trace_lines_are_json() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("tree.json");
        let mut trace = ChainTrace::create(&path).expect("create");

        let root_id = trace.account(Kza(260560), None, 0, NodeState::Continue, &[1.0, 1.0], 0);
        let child_id = trace.account(
            Kza(260570),
            Some("g"),
            1,
            NodeState::Truncate,
            &[0.1, 0.05],
            root_id,
        );
        assert_eq!((root_id, child_id), (1, 2));
        trace.count_chain();
        trace.finish();

        let file = std::fs::File::open(&path).expect("open");
        let lines: Vec<serde_json::Value> = std::io::BufReader::new(file)
            .lines()
            .map(|l| serde_json::from_str(&l.expect("line")).expect("json"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["name"], "fe-56");
        assert_eq!(lines[0].get("via"), None);
        assert_eq!(lines[1]["via"], "g");
        assert_eq!(lines[1]["parent"], 1);
        assert_eq!(lines[1]["state"], "truncate");
    }
}

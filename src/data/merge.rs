//! Library Merge Pipeline
//!
//! Folds a transmutation source and a decay source (post-parse shapes; the
//! format-specific ASCII readers live outside the engine) into one indexed
//! binary library. Parents are walked in kza order with a two-pointer merge:
//! a parent present in both sources gets a merged record, a parent present
//! in only one gets a pure-transmutation or pure-decay record.
//!
//! Channel merge rules:
//! - same daughter through a non-"x" channel: cross-sections summed, emitted
//!   tags concatenated with commas
//! - decay branches contribute `ratio * ln2 / half_life` into the extra slot
//! - decay-only channels get the synthetic tag `*D`, or `*X` for the
//!   trailing ion-emission pathways
//! - channels whose rate is identically zero are dropped

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::error::LibraryError;

use super::Kza;

/// Post-parse transmutation source
#[derive(Debug, Clone)]
pub struct TransmutationSource {
    pub n_groups: usize,
    /// Group boundaries, `n_groups + 1` values, highest energy first
    pub group_bounds: Option<Vec<f32>>,
    /// Group weighting function used to collapse the library
    pub group_weights: Option<Vec<f32>>,
    /// Parents sorted by kza
    pub parents: Vec<TransParent>,
}

#[derive(Debug, Clone)]
pub struct TransParent {
    pub kza: Kza,
    pub reactions: Vec<TransReaction>,
}

#[derive(Debug, Clone)]
pub struct TransReaction {
    pub daughter: Kza,
    /// Raw emitted-particle field; truncated at the first blank on merge
    pub emitted: String,
    /// Group cross-sections in barns
    pub xs: Vec<f32>,
}

/// Post-parse decay source
#[derive(Debug, Clone)]
pub struct DecaySource {
    /// Group count when the decay source carries one (must then match the
    /// transmutation source)
    pub n_groups: Option<usize>,
    /// Parents sorted by kza
    pub parents: Vec<DecayParent>,
}

#[derive(Debug, Clone)]
pub struct DecayParent {
    pub kza: Kza,
    /// Half-life in seconds
    pub half_life: f32,
    /// Average decay energies (alpha, beta, gamma)
    pub energies: [f32; 3],
    /// Number of trailing branches that are ion-emission pathways (tagged
    /// `*X` instead of `*D`)
    pub n_ion_paths: usize,
    pub branches: Vec<DecayBranch>,
}

#[derive(Debug, Clone)]
pub struct DecayBranch {
    pub daughter: Kza,
    pub ratio: f32,
}

/// Summary of a finished merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub n_parents: usize,
    pub n_groups: usize,
    pub n_merged: usize,
    pub n_trans_only: usize,
    pub n_decay_only: usize,
}

/// A merged channel under construction
struct MergedChannel {
    daughter: Kza,
    emitted: String,
    xs: Vec<f32>,
}

/// Index line collected while records stream out
struct IndexRecord {
    kza: u32,
    offset: u64,
    paths: Vec<(u32, String, u64)>,
}

/// Merge two sources into a binary library at `out`.
pub fn merge_libraries(
    trans: &TransmutationSource,
    decay: &DecaySource,
    out: &Path,
    lib_type: u8,
) -> Result<MergeStats, LibraryError> {
    if let Some(decay_groups) = decay.n_groups {
        if decay_groups != trans.n_groups {
            return Err(LibraryError::GroupMismatch {
                trans: trans.n_groups,
                decay: decay_groups,
            });
        }
    }

    let io_err = |source: io::Error| LibraryError::Io {
        path: out.to_path_buf(),
        source,
    };
    let file = File::create(out).map_err(io_err)?;
    let mut writer = CountingWriter::new(BufWriter::new(file));
    let n_groups = trans.n_groups;

    // header placeholders for the trailer offset and parent count
    writer.write_u64(0).map_err(io_err)?;
    writer.write_i32(0).map_err(io_err)?;
    writer.write_i32(n_groups as i32).map_err(io_err)?;

    // group structure block pointers, then the blocks themselves
    let pointer_pos = writer.position();
    writer.write_i32(-1).map_err(io_err)?;
    writer.write_i64(0).map_err(io_err)?;
    writer.write_i32(0).map_err(io_err)?;
    writer.write_i64(0).map_err(io_err)?;

    let bounds_offset = match &trans.group_bounds {
        Some(bounds) => {
            let off = writer.position();
            for &b in bounds {
                writer.write_f32(b).map_err(io_err)?;
            }
            off
        }
        None => 0,
    };
    let weights_offset = match &trans.group_weights {
        Some(weights) => {
            let off = writer.position();
            for &w in weights {
                writer.write_f32(w).map_err(io_err)?;
            }
            off
        }
        None => 0,
    };

    // two-pointer walk over the kza-sorted sources
    let mut index = Vec::new();
    let mut stats = MergeStats {
        n_parents: 0,
        n_groups,
        n_merged: 0,
        n_trans_only: 0,
        n_decay_only: 0,
    };
    let mut ti = 0;
    let mut di = 0;
    while ti < trans.parents.len() || di < decay.parents.len() {
        let t_kza = trans.parents.get(ti).map(|p| p.kza);
        let d_kza = decay.parents.get(di).map(|p| p.kza);

        let take_trans = match (t_kza, d_kza) {
            (Some(t), Some(d)) => t <= d,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let take_decay = match (t_kza, d_kza) {
            (Some(t), Some(d)) => d <= t,
            (None, Some(_)) => true,
            (_, None) => false,
        };

        let mut channels = if take_trans {
            trans_channels(&trans.parents[ti], n_groups)
        } else {
            Vec::new()
        };
        let (kza, half_life, energies) = if take_decay {
            let parent = &decay.parents[di];
            decay_channels(parent, n_groups, &mut channels);
            (parent.kza, parent.half_life, parent.energies)
        } else {
            (trans.parents[ti].kza, 0.0, [0.0; 3])
        };

        match (take_trans, take_decay) {
            (true, true) => stats.n_merged += 1,
            (true, false) => stats.n_trans_only += 1,
            (false, true) => stats.n_decay_only += 1,
            (false, false) => unreachable!("loop condition"),
        }
        ti += usize::from(take_trans);
        di += usize::from(take_decay);

        debug!(kza = kza.0, channels = channels.len(), "writing merged entry");
        let record = write_record(&mut writer, kza, half_life, energies, &channels, n_groups)
            .map_err(io_err)?;
        index.push(record);
        stats.n_parents += 1;
    }

    // append the trailer and fix up the header
    let trailer_offset = writer.position();
    writer.write_u8(lib_type).map_err(io_err)?;
    writer.write_i32(stats.n_parents as i32).map_err(io_err)?;
    writer.write_i32(n_groups as i32).map_err(io_err)?;
    for record in &index {
        writer.write_i32(record.kza as i32).map_err(io_err)?;
        writer.write_i32(record.paths.len() as i32).map_err(io_err)?;
        writer.write_i64(record.offset as i64).map_err(io_err)?;
        for (daughter, emitted, offset) in &record.paths {
            writer.write_i32(*daughter as i32).map_err(io_err)?;
            writer.write_i32(emitted.len() as i32).map_err(io_err)?;
            writer.write_bytes(emitted.as_bytes()).map_err(io_err)?;
            writer.write_i64(*offset as i64).map_err(io_err)?;
        }
    }

    let mut file = writer.into_inner().map_err(io_err)?;
    file.seek(SeekFrom::Start(0)).map_err(io_err)?;
    file.write_all(&trailer_offset.to_le_bytes()).map_err(io_err)?;
    file.write_all(&(stats.n_parents as i32).to_le_bytes())
        .map_err(io_err)?;
    file.seek(SeekFrom::Start(pointer_pos)).map_err(io_err)?;
    file.write_all(&(-1i32).to_le_bytes()).map_err(io_err)?;
    file.write_all(&(bounds_offset as i64).to_le_bytes())
        .map_err(io_err)?;
    file.write_all(&0i32.to_le_bytes()).map_err(io_err)?;
    file.write_all(&(weights_offset as i64).to_le_bytes())
        .map_err(io_err)?;
    file.flush().map_err(io_err)?;

    info!(
        parents = stats.n_parents,
        merged = stats.n_merged,
        "finished converting to binary"
    );
    Ok(stats)
}

/// Fold one parent's transmutation reactions into merged channels.
fn trans_channels(parent: &TransParent, n_groups: usize) -> Vec<MergedChannel> {
    let mut channels: Vec<MergedChannel> = Vec::new();
    for rxn in &parent.reactions {
        if rxn.xs.iter().take(n_groups).sum::<f32>() <= 0.0 {
            continue;
        }
        // emitted field is blank-padded in the sources
        let emitted = rxn
            .emitted
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string();

        let existing = channels
            .iter_mut()
            .find(|c| c.daughter == rxn.daughter && emitted != "x");
        match existing {
            Some(channel) => {
                for (dst, src) in channel.xs.iter_mut().zip(rxn.xs.iter().take(n_groups)) {
                    *dst += *src;
                }
                channel.emitted.push(',');
                channel.emitted.push_str(&emitted);
            }
            None => {
                let mut xs = vec![0.0f32; n_groups + 1];
                xs[..n_groups.min(rxn.xs.len())]
                    .copy_from_slice(&rxn.xs[..n_groups.min(rxn.xs.len())]);
                channels.push(MergedChannel {
                    daughter: rxn.daughter,
                    emitted,
                    xs,
                });
            }
        }
    }
    channels
}

/// Fold one parent's decay branches into the channel list.
fn decay_channels(parent: &DecayParent, n_groups: usize, channels: &mut Vec<MergedChannel>) {
    let n_branches = parent.branches.len();
    for (branch_num, branch) in parent.branches.iter().enumerate() {
        if branch.ratio <= 0.0 {
            continue;
        }
        let rate = branch.ratio * std::f32::consts::LN_2 / parent.half_life;
        let ion = n_branches - branch_num <= parent.n_ion_paths;
        let tag = if ion { "*X" } else { "*D" };

        match channels.iter_mut().find(|c| c.daughter == branch.daughter) {
            Some(channel) => {
                channel.xs[n_groups] += rate;
                channel.emitted.push(',');
                channel.emitted.push_str(tag);
            }
            None => {
                let mut xs = vec![0.0f32; n_groups + 1];
                xs[n_groups] = rate;
                channels.push(MergedChannel {
                    daughter: branch.daughter,
                    emitted: tag.to_string(),
                    xs,
                });
            }
        }
    }
}

fn write_record(
    writer: &mut CountingWriter<BufWriter<File>>,
    kza: Kza,
    half_life: f32,
    energies: [f32; 3],
    channels: &[MergedChannel],
    n_groups: usize,
) -> io::Result<IndexRecord> {
    let offset = writer.position();
    writer.write_i32(kza.0 as i32)?;
    writer.write_i32(channels.len() as i32)?;
    writer.write_f32(half_life)?;
    for e in energies {
        writer.write_f32(e)?;
    }

    let mut paths = Vec::with_capacity(channels.len());
    for channel in channels {
        let path_offset = writer.position();
        writer.write_i32(channel.daughter.0 as i32)?;
        writer.write_i32(channel.emitted.len() as i32)?;
        writer.write_bytes(channel.emitted.as_bytes())?;
        debug_assert_eq!(channel.xs.len(), n_groups + 1);
        for &xs in &channel.xs {
            writer.write_f32(xs)?;
        }
        paths.push((channel.daughter.0, channel.emitted.clone(), path_offset));
    }

    Ok(IndexRecord {
        kza: kza.0,
        offset,
        paths,
    })
}

/// Byte-counting little-endian writer
struct CountingWriter<W: Write> {
    inner: W,
    written: u64,
}

impl CountingWriter<BufWriter<File>> {
    fn new(inner: BufWriter<File>) -> Self {
        CountingWriter { inner, written: 0 }
    }

    fn position(&self) -> u64 {
        self.written
    }

    fn into_inner(self) -> io::Result<File> {
        self.inner.into_inner().map_err(io::IntoInnerError::into_error)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn write_u8(&mut self, v: u8) -> io::Result<()> {
        self.write_bytes(&[v])
    }

    fn write_i32(&mut self, v: i32) -> io::Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    fn write_u64(&mut self, v: u64) -> io::Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    fn write_i64(&mut self, v: i64) -> io::Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    fn write_f32(&mut self, v: f32) -> io::Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }
}

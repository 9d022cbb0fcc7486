//! Reference name/length table with sparse checkpoint index.
//!
//! Reference names are stored as consecutive null-terminated strings in the
//! `ref_names` block, lengths as consecutive i32 in `ref_lengths`. Random
//! access into the name table goes through a checkpoint index: one file
//! offset recorded every [`CHECKPOINT_STRIDE`] names. A lookup seeks to the
//! nearest checkpoint at or below the wanted index, skips forward, and
//! caches every name it passes. Lookups always restore the caller's file
//! cursor; concurrent lookups on one reader handle are therefore not safe,
//! and each decoding thread owns its own handle.

use std::io::{Read, Seek};

use crate::binio::BinaryReader;
use crate::error::{ArchiveError, Result};
use crate::header::{ArchiveHeader, BlockType};

/// One checkpoint per this many references.
pub const CHECKPOINT_STRIDE: usize = 64;

/// Placeholder name for lookups performed without a reader.
pub const UNKNOWN_NAME: &[u8] = b"unknown";

pub struct RefRegistry {
    count: usize,
    lengths: Vec<i32>,
    /// Monotonically increasing file offsets, one per 64 names.
    checkpoints: Vec<u64>,
    cache: Vec<Option<Vec<u8>>>,
}

impl RefRegistry {
    /// Build the registry: lengths are loaded eagerly (they are fixed
    /// width), names lazily behind the checkpoint scan.
    pub fn open<R: Read + Seek>(
        header: &ArchiveHeader,
        reader: &mut BinaryReader<R>,
    ) -> Result<RefRegistry> {
        let count = header.db_seqs_used() as usize;

        let lengths = match header.block_index_by_type(BlockType::RefLengths) {
            Some(i) => {
                let (start, _) = header.location_of_block(i);
                let saved = reader.tell()?;
                reader.seek(start)?;
                let mut lengths = Vec::with_capacity(count);
                for _ in 0..count {
                    lengths.push(reader.read_i32()?);
                }
                reader.seek(saved)?;
                lengths
            }
            None => vec![0; count],
        };

        let checkpoints = match header.block_index_by_type(BlockType::RefNames) {
            Some(i) => {
                let (start, size) = header.location_of_block(i);
                let saved = reader.tell()?;
                let cps = Self::scan_checkpoints(reader, start, start + size, count)?;
                reader.seek(saved)?;
                cps
            }
            None => Vec::new(),
        };

        Ok(RefRegistry {
            count,
            lengths,
            checkpoints,
            cache: vec![None; count],
        })
    }

    /// Single skip-scan over the names block recording every 64th name's
    /// offset. Names are not materialized here.
    fn scan_checkpoints<R: Read + Seek>(
        reader: &mut BinaryReader<R>,
        start: u64,
        end: u64,
        count: usize,
    ) -> Result<Vec<u64>> {
        reader.seek(start)?;
        let mut checkpoints = Vec::with_capacity(count / CHECKPOINT_STRIDE + 1);
        let mut pos = start;
        for i in 0..count {
            if i % CHECKPOINT_STRIDE == 0 {
                checkpoints.push(pos);
            }
            if pos >= end {
                return Err(ArchiveError::format(format!(
                    "reference names block ends after {i} of {count} names"
                )));
            }
            let name = reader.read_null_terminated()?;
            pos += name.len() as u64 + 1;
        }
        Ok(checkpoints)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn length_of(&self, index: usize) -> i32 {
        self.lengths.get(index).copied().unwrap_or(0)
    }

    /// Cached name, if a prior lookup already passed over it.
    pub fn cached_name(&self, index: usize) -> Option<&[u8]> {
        self.cache.get(index).and_then(|n| n.as_deref())
    }

    /// Resolve name `index`, seeking through the checkpoint index and
    /// caching every name decoded along the way. The reader's cursor is
    /// restored before returning.
    pub fn lookup_name<R: Read + Seek>(
        &mut self,
        index: usize,
        reader: &mut BinaryReader<R>,
    ) -> Result<&[u8]> {
        if index >= self.count {
            return Err(ArchiveError::format(format!(
                "reference index {index} out of range ({} used)",
                self.count
            )));
        }
        if self.cache[index].is_none() {
            let checkpoint = index / CHECKPOINT_STRIDE;
            let base = checkpoint * CHECKPOINT_STRIDE;
            let offset = *self.checkpoints.get(checkpoint).ok_or_else(|| {
                ArchiveError::format("no reference names block in archive")
            })?;

            let saved = reader.tell()?;
            reader.seek(offset)?;
            for i in base..=index {
                if self.cache[i].is_none() {
                    self.cache[i] = Some(reader.read_null_terminated()?);
                } else {
                    // Already cached: still have to walk past it.
                    reader.read_null_terminated()?;
                }
            }
            reader.seek(saved)?;
        }
        Ok(self.cache[index].as_deref().unwrap())
    }

    /// Resolve through an optional reader; without one, uncached names
    /// resolve to the explicit "unknown" placeholder.
    pub fn name_or_unknown<R: Read + Seek>(
        &mut self,
        index: usize,
        reader: Option<&mut BinaryReader<R>>,
    ) -> Vec<u8> {
        if let Some(name) = self.cache.get(index).and_then(|n| n.clone()) {
            return name;
        }
        match reader {
            Some(r) => self
                .lookup_name(index, r)
                .map(|n| n.to_vec())
                .unwrap_or_else(|_| UNKNOWN_NAME.to_vec()),
            None => UNKNOWN_NAME.to_vec(),
        }
    }
}

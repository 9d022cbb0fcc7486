//! Append-only container mutation.
//!
//! All mutation is append-or-truncate-from-tail: block bodies are never
//! overwritten in place. Mutations update the in-memory block table and
//! the file's data region immediately, but the header on disk only changes
//! when the caller commits with [`ArchiveModifier::save_header`] — the
//! visible partial-failure window the format requires. The modifier
//! assumes exclusive single-writer access for the whole mutation; callers
//! serialize externally.

use std::fs::{File, OpenOptions};
use std::io::SeekFrom;
use std::io::{Seek, Write};
use std::path::Path;

use indexmap::IndexMap;
use log::{debug, warn};

use crate::classification::{self, ClassData};
use crate::error::{ArchiveError, Result};
use crate::header::{AlignMode, ArchiveHeader, BlockType};

pub struct ArchiveModifier {
    header: ArchiveHeader,
    file: File,
    dirty: bool,
}

impl ArchiveModifier {
    /// Open an existing archive for mutation.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ArchiveModifier> {
        let header = ArchiveHeader::open(path.as_ref())?;
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        Ok(ArchiveModifier {
            header,
            file,
            dirty: false,
        })
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// Commit the in-memory header to disk. Every mutation below stages
    /// table changes; nothing is visible to readers until this succeeds.
    pub fn save_header(&mut self) -> Result<()> {
        self.header.save()?;
        self.dirty = false;
        Ok(())
    }

    /// Zero out every block matching `predicate`, truncate the file to the
    /// earliest freed offset, and stage the header update. Matching blocks
    /// are expected to form the tail of the file; anything after the first
    /// match is cut off with it.
    pub fn remove_all_data<F>(&mut self, predicate: F) -> Result<usize>
    where
        F: Fn(BlockType) -> bool,
    {
        let mut earliest: Option<u64> = None;
        let mut removed = 0;
        for index in 0..crate::header::MAX_BLOCKS {
            let t = self.header.block_type(index);
            if t != BlockType::Empty && predicate(t) {
                let start = self.header.block_start(index);
                earliest = Some(earliest.map_or(start, |e: u64| e.min(start)));
                self.header.clear_block(index);
                removed += 1;
            }
        }
        if let Some(offset) = earliest {
            debug!("removing {removed} blocks, truncating to {offset}");
            self.file.set_len(offset)?;
            self.dirty = true;
        }
        Ok(removed)
    }

    /// Replace the block of type `t` with `bytes`. Only a trailing block
    /// may be replaced: if a block of this type exists anywhere but the
    /// last occupied slot the call fails with a state error and the table
    /// is left untouched. Without an existing block this is an append.
    pub fn replace_block(&mut self, t: BlockType, bytes: &[u8]) -> Result<()> {
        if let Some(index) = self.header.block_index_by_type(t) {
            match self.header.last_occupied_block_index() {
                Some(last) if last == index => {}
                _ => {
                    return Err(ArchiveError::state(format!(
                        "block of type {t:?} at slot {index} is not the last occupied slot"
                    )));
                }
            }
            let start = self.header.block_start(index);
            self.header.clear_block(index);
            self.file.set_len(start)?;
        }
        self.append_block(t, bytes)
    }

    /// Append one block: claim the first available slot, write the bytes
    /// at end-of-file, and stage the (type, size) entry.
    pub fn append_block(&mut self, t: BlockType, bytes: &[u8]) -> Result<()> {
        let index = self.header.first_available_block_index().ok_or_else(|| {
            ArchiveError::state("block table is full")
        })?;
        self.file.seek(SeekFrom::Start(self.header.end_of_blocks()))?;
        self.file.write_all(bytes)?;
        self.header.set_block(index, t, bytes.len() as u64);
        self.dirty = true;
        Ok(())
    }

    /// Append several blocks, staging one header update for all of them.
    pub fn append_blocks(&mut self, blocks: &[(BlockType, &[u8])]) -> Result<()> {
        for &(t, bytes) in blocks {
            self.append_block(t, bytes)?;
        }
        Ok(())
    }

    /// Build and append the key/dump block pair for one classification.
    pub fn write_classification_index(
        &mut self,
        name: &[u8],
        classes: &IndexMap<i32, ClassData>,
    ) -> Result<()> {
        let (key, dump) = classification::build_index(name, classes);
        self.append_blocks(&[
            (BlockType::ClassificationKey, &key),
            (BlockType::ClassificationDump, &dump),
        ])
    }

    /// Build and append a reference annotations block.
    pub fn write_annotations(&mut self, name: &[u8], class_per_reference: &[i32]) -> Result<()> {
        let bytes = classification::build_annotations(name, class_per_reference);
        self.append_block(BlockType::RefAnnotations, &bytes)
    }
}

impl Drop for ArchiveModifier {
    fn drop(&mut self) {
        if self.dirty {
            warn!(
                "archive {:?} dropped with uncommitted block-table changes",
                self.header.path()
            );
        }
    }
}

/// Creates a brand-new archive through the same header/block-table model
/// the modifier uses. Blocks are appended in call order; `finish` writes
/// the header and closes the file.
pub struct ArchiveWriter {
    header: ArchiveHeader,
    file: File,
}

impl ArchiveWriter {
    pub fn create<P: AsRef<Path>>(path: P, mode: AlignMode) -> Result<ArchiveWriter> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        let header = ArchiveHeader::new(path.as_ref().to_path_buf(), mode);
        // Reserve the fixed header region before the first block body.
        let mut writer = crate::binio::BinaryWriter::new(&file);
        header.save_to(&mut writer)?;
        Ok(ArchiveWriter { header, file })
    }

    pub fn header_mut(&mut self) -> &mut ArchiveHeader {
        &mut self.header
    }

    pub fn append_block(&mut self, t: BlockType, bytes: &[u8]) -> Result<()> {
        let index = self.header.first_available_block_index().ok_or_else(|| {
            ArchiveError::state("block table is full")
        })?;
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(bytes)?;
        self.header.set_block(index, t, bytes.len() as u64);
        Ok(())
    }

    /// Commit the header and return it with the file closed.
    pub fn finish(mut self) -> Result<ArchiveHeader> {
        let mut writer = crate::binio::BinaryWriter::new(&self.file);
        self.header.save_to(&mut writer)?;
        self.file.flush()?;
        Ok(self.header.clone())
    }
}

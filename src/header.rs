//! Container header and block table.
//!
//! One archive file is a fixed header, a 256-slot table of (size, type)
//! block descriptors, and the concatenated block bodies in table order.
//! Block offsets are never stored: the offset of block `i` is the header
//! size plus the sizes of all earlier slots. The table enforces the
//! singleton and ordering invariants at load time so downstream decoders
//! can trust it.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::binio::{BinaryReader, BinaryWriter};
use crate::error::{ArchiveError, Result};

/// Fixed 64-bit magic number identifying an archive file.
pub const MAGIC_NUMBER: u64 = 0x3C15_4C64_C9CF_A6EB;

/// Highest container version this engine understands.
pub const MAX_VERSION: u64 = 1;

/// Number of slots in the block table.
pub const MAX_BLOCKS: usize = 256;

/// Typed block tag. At most one block of each singleton type may exist,
/// and `RefLengths` may never precede `RefNames`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Empty,
    Alignments,
    RefNames,
    RefLengths,
    RefAnnotations,
    ClassificationKey,
    ClassificationDump,
    AuxData,
    MatePair,
}

impl BlockType {
    pub fn from_rank(rank: u8) -> Result<BlockType> {
        Ok(match rank {
            0 => BlockType::Empty,
            1 => BlockType::Alignments,
            2 => BlockType::RefNames,
            3 => BlockType::RefLengths,
            4 => BlockType::RefAnnotations,
            5 => BlockType::ClassificationKey,
            6 => BlockType::ClassificationDump,
            7 => BlockType::AuxData,
            8 => BlockType::MatePair,
            r => {
                return Err(ArchiveError::format(format!(
                    "unknown block type rank {r}"
                )))
            }
        })
    }

    pub fn rank(self) -> u8 {
        match self {
            BlockType::Empty => 0,
            BlockType::Alignments => 1,
            BlockType::RefNames => 2,
            BlockType::RefLengths => 3,
            BlockType::RefAnnotations => 4,
            BlockType::ClassificationKey => 5,
            BlockType::ClassificationDump => 6,
            BlockType::AuxData => 7,
            BlockType::MatePair => 8,
        }
    }

    pub fn is_singleton(self) -> bool {
        matches!(
            self,
            BlockType::Alignments | BlockType::RefNames | BlockType::RefLengths
        )
    }
}

/// Alignment mode of the archive's producer, decoded from its integer rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignMode {
    BlastP,
    BlastX,
    BlastN,
}

impl AlignMode {
    pub fn from_rank(rank: i32) -> Result<AlignMode> {
        Ok(match rank {
            2 => AlignMode::BlastP,
            3 => AlignMode::BlastX,
            4 => AlignMode::BlastN,
            r => {
                return Err(ArchiveError::format(format!(
                    "alignment mode rank {r} out of range"
                )))
            }
        })
    }

    pub fn rank(self) -> i32 {
        match self {
            AlignMode::BlastP => 2,
            AlignMode::BlastX => 3,
            AlignMode::BlastN => 4,
        }
    }

    /// Query sequences are DNA translated on the fly in this mode.
    pub fn is_translated(self) -> bool {
        self == AlignMode::BlastX
    }

    pub fn is_protein(self) -> bool {
        self == AlignMode::BlastP
    }
}

/// Layout strategy selected once at header-load time. Version 0 archives
/// predate the query flag word (sequences are always unambiguous); version
/// 1 carries the 16-bit flag word on every query record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V0,
    V1,
}

impl FormatVersion {
    pub fn from_raw(version: u64) -> Result<FormatVersion> {
        match version {
            0 => Ok(FormatVersion::V0),
            1 => Ok(FormatVersion::V1),
            v => Err(ArchiveError::format(format!(
                "archive version {v} is newer than supported ({MAX_VERSION})"
            ))),
        }
    }

    /// Whether query records carry the 16-bit flag word.
    pub fn has_query_flags(self) -> bool {
        self == FormatVersion::V1
    }
}

/// Decoded fixed header plus the 256-slot block table.
#[derive(Debug, Clone)]
pub struct ArchiveHeader {
    path: PathBuf,

    version: u64,
    aligner_build: u64,
    db_seqs: u64,
    db_seqs_used: u64,
    db_letters: u64,
    flags: u64,
    query_records: u64,

    gap_open: i32,
    gap_extend: i32,
    reward: i32,
    penalty: i32,
    reserved1: i32,
    reserved2: i32,
    reserved3: i32,

    k: f64,
    lambda: f64,
    reserved4: f64,
    reserved5: f64,

    score_matrix: [u8; 16],

    block_sizes: [u64; MAX_BLOCKS],
    block_types: [BlockType; MAX_BLOCKS],

    // Derived at load time, never stored.
    header_size: u64,
    ln_k: f64,
    mode: AlignMode,
    layout: FormatVersion,
}

impl ArchiveHeader {
    /// Open `path` and decode its header, validating the magic number,
    /// version, and block-table invariants.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ArchiveHeader> {
        let file = File::open(path.as_ref())?;
        let mut reader = BinaryReader::new(BufReader::new(file));
        let mut header = Self::load_from(&mut reader)?;
        header.path = path.as_ref().to_path_buf();
        Ok(header)
    }

    /// Decode a header from an arbitrary seekable source positioned at the
    /// start of the file.
    pub fn load_from<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<ArchiveHeader> {
        reader.seek(0)?;
        let magic = reader.read_u64()?;
        if magic != MAGIC_NUMBER {
            return Err(ArchiveError::format(format!(
                "bad magic number {magic:#018x}"
            )));
        }
        let version = reader.read_u64()?;
        let layout = FormatVersion::from_raw(version)?;

        let aligner_build = reader.read_u64()?;
        let db_seqs = reader.read_u64()?;
        let db_seqs_used = reader.read_u64()?;
        let db_letters = reader.read_u64()?;
        let flags = reader.read_u64()?;
        let query_records = reader.read_u64()?;

        let mode_rank = reader.read_i32()?;
        let mode = AlignMode::from_rank(mode_rank)?;
        let gap_open = reader.read_i32()?;
        let gap_extend = reader.read_i32()?;
        let reward = reader.read_i32()?;
        let penalty = reader.read_i32()?;
        let reserved1 = reader.read_i32()?;
        let reserved2 = reader.read_i32()?;
        let reserved3 = reader.read_i32()?;

        let k = reader.read_f64()?;
        let lambda = reader.read_f64()?;
        let reserved4 = reader.read_f64()?;
        let reserved5 = reader.read_f64()?;

        let mut score_matrix = [0u8; 16];
        reader.read_exact_into(&mut score_matrix)?;

        let mut block_sizes = [0u64; MAX_BLOCKS];
        for size in block_sizes.iter_mut() {
            *size = reader.read_u64()?;
        }

        let mut block_types = [BlockType::Empty; MAX_BLOCKS];
        let mut first_ref_names: Option<usize> = None;
        let mut first_ref_lengths: Option<usize> = None;
        let mut seen_singleton = [false; 4];
        for (i, slot) in block_types.iter_mut().enumerate() {
            let t = BlockType::from_rank(reader.read_u8()?)?;
            if t.is_singleton() {
                let s = t.rank() as usize;
                if seen_singleton[s] {
                    return Err(ArchiveError::format(format!(
                        "duplicate {t:?} block at slot {i}"
                    )));
                }
                seen_singleton[s] = true;
            }
            match t {
                BlockType::RefNames => first_ref_names = Some(i),
                BlockType::RefLengths => first_ref_lengths = Some(i),
                _ => {}
            }
            *slot = t;
        }
        if let (Some(lengths), names) = (first_ref_lengths, first_ref_names) {
            match names {
                Some(names) if names < lengths => {}
                _ => {
                    return Err(ArchiveError::format(
                        "reference lengths block precedes reference names block",
                    ))
                }
            }
        }

        // Anchor for all block-offset arithmetic.
        let header_size = reader.tell()?;

        // A zero-sized first block means the producer never finished
        // writing the file.
        if block_types[0] != BlockType::Empty && block_sizes[0] == 0 {
            return Err(ArchiveError::format(
                "first block has zero size: file was not completely written",
            ));
        }

        Ok(ArchiveHeader {
            path: PathBuf::new(),
            version,
            aligner_build,
            db_seqs,
            db_seqs_used,
            db_letters,
            flags,
            query_records,
            gap_open,
            gap_extend,
            reward,
            penalty,
            reserved1,
            reserved2,
            reserved3,
            k,
            lambda,
            reserved4,
            reserved5,
            score_matrix,
            block_sizes,
            block_types,
            header_size,
            ln_k: k.ln(),
            mode,
            layout,
        })
    }

    /// Fresh in-memory header for a new archive. All block slots start
    /// empty; the caller appends blocks and then persists with `save`.
    pub fn new(path: PathBuf, mode: AlignMode) -> ArchiveHeader {
        ArchiveHeader {
            path,
            version: MAX_VERSION,
            aligner_build: 0,
            db_seqs: 0,
            db_seqs_used: 0,
            db_letters: 0,
            flags: 0,
            query_records: 0,
            gap_open: 11,
            gap_extend: 1,
            reward: 2,
            penalty: -3,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
            k: 0.041,
            lambda: 0.267,
            reserved4: 0.0,
            reserved5: 0.0,
            score_matrix: *b"BLOSUM62\0\0\0\0\0\0\0\0",
            block_sizes: [0; MAX_BLOCKS],
            block_types: [BlockType::Empty; MAX_BLOCKS],
            header_size: Self::FIXED_HEADER_SIZE,
            ln_k: 0.041f64.ln(),
            mode,
            layout: FormatVersion::V1,
        }
    }

    // 8 u64 + 8 i32 + 4 f64 + 16 matrix bytes + 256 u64 sizes + 256 type bytes
    const FIXED_HEADER_SIZE: u64 = 64 + 32 + 32 + 16 + 2048 + 256;

    /// Rewrite the entire fixed header in place. Block bodies are not
    /// touched; this is the commit point of every mutation.
    pub fn save(&self) -> Result<()> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let mut writer = BinaryWriter::new(file);
        self.save_to(&mut writer)?;
        writer.flush()
    }

    pub fn save_to<W: Write + Seek>(&self, writer: &mut BinaryWriter<W>) -> Result<()> {
        writer.seek(0)?;
        writer.write_u64(MAGIC_NUMBER)?;
        writer.write_u64(self.version)?;
        writer.write_u64(self.aligner_build)?;
        writer.write_u64(self.db_seqs)?;
        writer.write_u64(self.db_seqs_used)?;
        writer.write_u64(self.db_letters)?;
        writer.write_u64(self.flags)?;
        writer.write_u64(self.query_records)?;
        writer.write_i32(self.mode.rank())?;
        writer.write_i32(self.gap_open)?;
        writer.write_i32(self.gap_extend)?;
        writer.write_i32(self.reward)?;
        writer.write_i32(self.penalty)?;
        writer.write_i32(self.reserved1)?;
        writer.write_i32(self.reserved2)?;
        writer.write_i32(self.reserved3)?;
        writer.write_f64(self.k)?;
        writer.write_f64(self.lambda)?;
        writer.write_f64(self.reserved4)?;
        writer.write_f64(self.reserved5)?;
        writer.write_bytes(&self.score_matrix)?;
        for &size in &self.block_sizes {
            writer.write_u64(size)?;
        }
        for &t in &self.block_types {
            writer.write_u8(t.rank())?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn layout(&self) -> FormatVersion {
        self.layout
    }

    pub fn mode(&self) -> AlignMode {
        self.mode
    }

    pub fn aligner_build(&self) -> u64 {
        self.aligner_build
    }

    pub fn db_seqs(&self) -> u64 {
        self.db_seqs
    }

    pub fn db_seqs_used(&self) -> u64 {
        self.db_seqs_used
    }

    pub fn db_letters(&self) -> u64 {
        self.db_letters
    }

    pub fn query_records(&self) -> u64 {
        self.query_records
    }

    pub fn gap_open(&self) -> i32 {
        self.gap_open
    }

    pub fn gap_extend(&self) -> i32 {
        self.gap_extend
    }

    pub fn score_matrix_name(&self) -> &[u8] {
        let end = self
            .score_matrix
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.score_matrix.len());
        &self.score_matrix[..end]
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn ln_k(&self) -> f64 {
        self.ln_k
    }

    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    pub fn set_db_stats(&mut self, db_seqs: u64, db_seqs_used: u64, db_letters: u64) {
        self.db_seqs = db_seqs;
        self.db_seqs_used = db_seqs_used;
        self.db_letters = db_letters;
    }

    pub fn set_query_records(&mut self, n: u64) {
        self.query_records = n;
    }

    pub fn set_score_params(&mut self, k: f64, lambda: f64) {
        self.k = k;
        self.lambda = lambda;
        self.ln_k = k.ln();
    }

    pub fn block_type(&self, index: usize) -> BlockType {
        self.block_types[index]
    }

    pub fn block_size(&self, index: usize) -> u64 {
        self.block_sizes[index]
    }

    /// File offset of block `index`: header size plus all earlier sizes.
    /// O(index) per call; the table holds at most 256 slots.
    pub fn block_start(&self, index: usize) -> u64 {
        self.header_size + self.block_sizes[..index].iter().sum::<u64>()
    }

    /// Offset and size of block `index`.
    pub fn location_of_block(&self, index: usize) -> (u64, u64) {
        (self.block_start(index), self.block_sizes[index])
    }

    /// First empty slot not followed by any occupied slot, so appending at
    /// it always extends the file monotonically. `None` when the table is
    /// full.
    pub fn first_available_block_index(&self) -> Option<usize> {
        let last_occupied = self
            .block_types
            .iter()
            .rposition(|&t| t != BlockType::Empty);
        match last_occupied {
            Some(i) if i + 1 >= MAX_BLOCKS => None,
            Some(i) => Some(i + 1),
            None => Some(0),
        }
    }

    /// Index of the last occupied slot.
    pub fn last_occupied_block_index(&self) -> Option<usize> {
        self.block_types.iter().rposition(|&t| t != BlockType::Empty)
    }

    /// First slot holding a block of `t`.
    pub fn block_index_by_type(&self, t: BlockType) -> Option<usize> {
        self.block_types.iter().position(|&bt| bt == t)
    }

    /// Indices of every slot holding a block of `t`, in table order.
    pub fn block_indices_by_type(&self, t: BlockType) -> Vec<usize> {
        self.block_types
            .iter()
            .enumerate()
            .filter(|(_, &bt)| bt == t)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn block_size_by_type(&self, t: BlockType) -> Option<u64> {
        self.block_index_by_type(t).map(|i| self.block_sizes[i])
    }

    /// Offset of the alignments block body.
    pub fn alignments_start(&self) -> Option<u64> {
        self.block_index_by_type(BlockType::Alignments)
            .map(|i| self.block_start(i))
    }

    /// Record `(type, size)` in slot `index`.
    pub fn set_block(&mut self, index: usize, t: BlockType, size: u64) {
        self.block_types[index] = t;
        self.block_sizes[index] = size;
    }

    /// Mark slot `index` deleted. The bytes stay on disk until the
    /// trailing region is truncated.
    pub fn clear_block(&mut self, index: usize) {
        self.block_types[index] = BlockType::Empty;
        self.block_sizes[index] = 0;
    }

    /// End of the last occupied block, i.e. the archive's logical length.
    pub fn end_of_blocks(&self) -> u64 {
        self.header_size + self.block_sizes.iter().sum::<u64>()
    }

    /// Bit score for a raw alignment score under the archive's
    /// Karlin-Altschul parameters.
    pub fn bit_score(&self, raw_score: i64) -> f64 {
        (self.lambda * raw_score as f64 - self.ln_k) / std::f64::consts::LN_2
    }

    /// Expected number of chance alignments scoring at least `raw_score`.
    pub fn expected_value(&self, raw_score: i64, query_length: u64) -> f64 {
        self.db_letters as f64 * query_length as f64 * 2f64.powf(-self.bit_score(raw_score))
    }
}

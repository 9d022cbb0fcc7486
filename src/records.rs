//! Query and match record decoding.
//!
//! The alignments block is a series of 32-bit size-prefixed buffers, each
//! holding one query record followed by its match records. Records have no
//! fixed size: sequences are bit-packed, match coordinates are packed at a
//! width chosen per record by a flag byte, and edit transcripts are
//! run-length encoded. A short read inside a record is fatal for the whole
//! stream; position tracking cannot recover from it.

use std::io::{Read, Seek};

use crate::binio::BinaryReader;
use crate::bits;
use crate::buffer::{InputBuffer, OutputBuffer};
use crate::error::{ArchiveError, Result};
use crate::header::{AlignMode, ArchiveHeader, FormatVersion};
use crate::ref_registry::{RefRegistry, UNKNOWN_NAME};
use crate::sequence;
use crate::transcript::{self, CombinedOp, EditOp};

/// Query flag bit: the packed sequence contains ambiguous bases and is
/// stored at 3 bits per symbol instead of 2.
pub const QUERY_FLAG_AMBIGUOUS: u16 = 0x0001;

/// Match flag bit: the alignment lies on the reverse strand.
const MATCH_FLAG_REVERSE: u8 = 0x40;

/// One decoded query: name, source sequence, and its translated reading
/// frames. Owned by the decoding call that produced it and immutable once
/// parsed.
#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub name: Vec<u8>,
    pub flags: u16,
    /// Source letters: DNA for blastn/blastx, amino acids for blastp.
    pub source: Vec<u8>,
    /// Alignment contexts indexed by frame: one for blastp, source plus
    /// reverse complement for blastn, six translations for blastx.
    pub contexts: Vec<Vec<u8>>,
    /// File offset of this record's size prefix in the alignments block.
    pub location: u64,
}

impl QueryRecord {
    /// Decode one query record from the front of a record buffer.
    pub fn decode(
        buf: &mut InputBuffer,
        mode: AlignMode,
        layout: FormatVersion,
    ) -> Result<QueryRecord> {
        let total_length = buf.read_i32_le()?;
        if total_length < 0 {
            return Err(ArchiveError::format(format!(
                "negative query length {total_length}"
            )));
        }
        let length = total_length as usize;
        let name = buf.read_null_terminated_slice()?.to_vec();
        let flags = if layout.has_query_flags() {
            buf.read_u16_be()?
        } else {
            0
        };

        let width = sequence_bit_width(mode, flags);
        let packed = buf.read_fixed_slice(bits::packed_byte_len(length, width))?;
        let source = sequence::unpack_sequence(packed, length, width)?;

        let contexts = match mode {
            AlignMode::BlastP => vec![source.clone()],
            AlignMode::BlastN => {
                vec![source.clone(), sequence::reverse_complement(&source)]
            }
            AlignMode::BlastX => sequence::six_frame_translate(&source).into(),
        };

        Ok(QueryRecord {
            name,
            flags,
            source,
            contexts,
            location: 0,
        })
    }

    pub fn query_length(&self) -> usize {
        self.source.len()
    }
}

/// Bits per packed symbol for a query sequence.
pub fn sequence_bit_width(mode: AlignMode, flags: u16) -> u32 {
    if mode.is_protein() {
        5
    } else if flags & QUERY_FLAG_AMBIGUOUS != 0 {
        3
    } else {
        2
    }
}

/// One decoded match plus the statistics derived from its transcript.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub subject_id: u32,
    pub raw_score: u32,
    /// Query start in source coordinates (DNA bases for nucleotide and
    /// translated modes, residues for protein).
    pub query_begin: u32,
    pub subject_begin: u32,
    /// Frame index 0..5: forward offsets 0-2, reverse offsets 3-5.
    pub frame: u8,
    /// Query start within the frame's alignment context.
    pub translated_query_begin: u32,
    /// Query end in source coordinates, frame-shift corrected. Exclusive
    /// on the forward strand, mirrored on the reverse strand.
    pub query_end: i64,
    pub subject_end: u32,
    pub ops: Vec<CombinedOp>,

    // Derived from the gathered transcript.
    pub len: u32,
    pub identities: u32,
    pub mismatches: u32,
    pub gap_openings: u32,
    pub gaps: u32,
    pub frame_shift_adjust: i32,

    pub subject_name: Vec<u8>,
    pub subject_length: i32,
}

impl MatchRecord {
    /// Decode one match record from a record buffer. `refs` resolves the
    /// subject name and length; passing `None` is an explicit request for
    /// the "unknown" placeholder, never a silent fallback.
    pub fn decode<R: Read + Seek>(
        buf: &mut InputBuffer,
        query: &QueryRecord,
        header: &ArchiveHeader,
        refs: Option<(&mut RefRegistry, &mut BinaryReader<R>)>,
    ) -> Result<MatchRecord> {
        let subject_id = buf.read_i32_le()?;
        if subject_id < 0 {
            return Err(ArchiveError::format(format!(
                "negative subject id {subject_id}"
            )));
        }
        let subject_id = subject_id as u32;

        let flag = buf.read_u8()?;
        let raw_score = buf.read_packed(flag & 3)?;
        let query_begin = buf.read_packed((flag >> 2) & 3)?;
        let subject_begin = buf.read_packed((flag >> 4) & 3)?;
        let reverse = flag & MATCH_FLAG_REVERSE != 0;

        let ops = transcript::decode_gathered(buf)?;
        let stats = TranscriptStats::accumulate(&ops);

        let query_length = query.query_length() as i64;
        let qb = i64::from(query_begin);
        if qb > query_length || (reverse && qb == query_length) {
            return Err(ArchiveError::format(format!(
                "query begin {query_begin} outside query of {query_length} letters"
            )));
        }

        let (frame, translated_query_begin, query_end) = match header.mode() {
            AlignMode::BlastP => (0u8, query_begin, qb + stats.query_cols),
            AlignMode::BlastN => {
                if reverse {
                    let tqb = (query_length - qb - 1) as u32;
                    (3, tqb, qb - stats.query_cols)
                } else {
                    (0, query_begin, qb + stats.query_cols)
                }
            }
            AlignMode::BlastX => {
                let advance = 3 * stats.query_cols + i64::from(stats.frame_shift_adjust);
                if reverse {
                    let mirrored = query_length - 1 - qb;
                    let frame = 3 + (mirrored % 3) as u8;
                    let tqb = ((mirrored - mirrored % 3) / 3) as u32;
                    (frame, tqb, qb - advance)
                } else {
                    let frame = (qb % 3) as u8;
                    let tqb = ((qb - i64::from(frame)) / 3) as u32;
                    (frame, tqb, qb + advance)
                }
            }
        };

        let (subject_name, subject_length) = match refs {
            Some((registry, reader)) => {
                let name = registry.lookup_name(subject_id as usize, reader)?.to_vec();
                (name, registry.length_of(subject_id as usize))
            }
            None => (UNKNOWN_NAME.to_vec(), 0),
        };

        Ok(MatchRecord {
            subject_id,
            raw_score,
            query_begin,
            subject_begin,
            frame,
            translated_query_begin,
            query_end,
            subject_end: subject_begin + stats.subject_cols as u32,
            ops,
            len: stats.len,
            identities: stats.identities,
            mismatches: stats.mismatches,
            gap_openings: stats.gap_openings,
            gaps: stats.gaps,
            frame_shift_adjust: stats.frame_shift_adjust,
            subject_name,
            subject_length,
        })
    }

    /// Integer percent identity over alignment columns.
    pub fn percent_identity(&self) -> u32 {
        if self.len == 0 {
            0
        } else {
            self.identities * 100 / self.len
        }
    }

    /// Fraction of the subject sequence covered by this alignment.
    pub fn reference_coverage(&self) -> f64 {
        if self.subject_length <= 0 {
            0.0
        } else {
            f64::from(self.subject_end - self.subject_begin) / f64::from(self.subject_length)
        }
    }

    /// Conventional signed frame: 0..2 map to +1..+3, 3..5 to -1..-3.
    pub fn blast_frame(&self) -> i32 {
        let f = i32::from(self.frame);
        if f <= 2 {
            f + 1
        } else {
            2 - f
        }
    }

    pub fn is_reverse(&self) -> bool {
        self.frame >= 3
    }

    /// Alignment columns that consume query positions.
    pub fn query_span_cols(&self) -> u32 {
        self.len - self.deletion_cols()
    }

    fn deletion_cols(&self) -> u32 {
        self.ops
            .iter()
            .filter(|o| o.op == EditOp::Deletion)
            .map(|o| o.count)
            .sum()
    }

    pub fn bit_score(&self, header: &ArchiveHeader) -> f64 {
        header.bit_score(i64::from(self.raw_score))
    }

    pub fn expected_value(&self, header: &ArchiveHeader, query_length: usize) -> f64 {
        header.expected_value(i64::from(self.raw_score), query_length as u64)
    }
}

/// Second pass over the gathered transcript.
struct TranscriptStats {
    len: u32,
    identities: u32,
    mismatches: u32,
    gap_openings: u32,
    gaps: u32,
    frame_shift_adjust: i32,
    query_cols: i64,
    subject_cols: i64,
}

impl TranscriptStats {
    fn accumulate(ops: &[CombinedOp]) -> TranscriptStats {
        let mut s = TranscriptStats {
            len: 0,
            identities: 0,
            mismatches: 0,
            gap_openings: 0,
            gaps: 0,
            frame_shift_adjust: 0,
            query_cols: 0,
            subject_cols: 0,
        };
        let mut prev: Option<EditOp> = None;
        for op in ops {
            match op.op {
                EditOp::Match => {
                    s.identities += op.count;
                    s.len += op.count;
                    s.query_cols += i64::from(op.count);
                    s.subject_cols += i64::from(op.count);
                }
                EditOp::Insertion => {
                    s.len += op.count;
                    s.gaps += op.count;
                    s.query_cols += i64::from(op.count);
                    if prev != Some(EditOp::Insertion) {
                        s.gap_openings += 1;
                    }
                }
                EditOp::Deletion => {
                    s.len += op.count;
                    s.gaps += op.count;
                    s.subject_cols += i64::from(op.count);
                    if prev != Some(EditOp::Deletion) {
                        s.gap_openings += 1;
                    }
                }
                EditOp::Substitution => {
                    s.len += 1;
                    s.query_cols += 1;
                    s.subject_cols += 1;
                    if op.is_reverse_shift() {
                        s.frame_shift_adjust -= 4;
                    } else if op.is_forward_shift() {
                        s.frame_shift_adjust -= 2;
                    } else {
                        s.mismatches += 1;
                    }
                }
            }
            prev = Some(op.op);
        }
        s
    }
}

/// Encode one query record (write-side mirror of [`QueryRecord::decode`]).
pub fn encode_query_record(
    out: &mut OutputBuffer,
    name: &[u8],
    source: &[u8],
    mode: AlignMode,
) -> Result<()> {
    let flags = if !mode.is_protein() && source.contains(&b'N') {
        QUERY_FLAG_AMBIGUOUS
    } else {
        0
    };
    out.append_i32_le(source.len() as i32);
    out.append_string(name);
    out.append_u16_be(flags);
    let width = sequence_bit_width(mode, flags);
    out.append_bytes(&sequence::pack_sequence(source, width)?);
    Ok(())
}

/// Encode one match record (write-side mirror of [`MatchRecord::decode`]).
pub fn encode_match_record(
    out: &mut OutputBuffer,
    subject_id: u32,
    raw_score: u32,
    query_begin: u32,
    subject_begin: u32,
    reverse: bool,
    ops: &[CombinedOp],
) {
    let (sw, qw, bw) = (
        packed_width(raw_score),
        packed_width(query_begin),
        packed_width(subject_begin),
    );
    let mut flag = sw | (qw << 2) | (bw << 4);
    if reverse {
        flag |= MATCH_FLAG_REVERSE;
    }
    out.append_i32_le(subject_id as i32);
    out.append_byte(flag);
    append_packed(out, raw_score, sw);
    append_packed(out, query_begin, qw);
    append_packed(out, subject_begin, bw);
    transcript::encode_ops(ops, out);
}

fn packed_width(v: u32) -> u8 {
    if v <= 0xFF {
        0
    } else if v <= 0xFFFF {
        1
    } else {
        2
    }
}

fn append_packed(out: &mut OutputBuffer, v: u32, width: u8) {
    match width {
        0 => out.append_byte(v as u8),
        1 => out.append_bytes(&(v as u16).to_le_bytes()),
        _ => out.append_u32_le(v),
    }
}

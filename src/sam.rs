//! Rendering decoded matches as SAM text lines.
//!
//! One line per match: CIGAR and MD are rebuilt from the gathered
//! transcript, and the aligned query substring is cut from the matching
//! frame context. When a match carries a nonzero frame-shift adjustment
//! the substring cannot be cut contiguously; it is recomputed base by base
//! by walking the transcript over the DNA source, re-translating codons
//! while honoring the one- and two-base nudges the shift sentinels encode.

use std::fmt::Write as _;

use crate::error::{ArchiveError, Result};
use crate::header::{AlignMode, ArchiveHeader};
use crate::records::{MatchRecord, QueryRecord};
use crate::sequence;
use crate::transcript::{CombinedOp, EditOp};

/// SAM flag bit for reverse-strand alignments.
const FLAG_REVERSE: u16 = 0x10;

/// Header preamble for a rendered SAM stream.
pub fn sam_header_lines(header: &ArchiveHeader) -> String {
    format!(
        "@HD\tVN:1.5\tSO:unsorted\n@PG\tID:alnarc\tPN:alnarc\tDS:mode={}\n",
        match header.mode() {
            AlignMode::BlastP => "blastp",
            AlignMode::BlastX => "blastx",
            AlignMode::BlastN => "blastn",
        }
    )
}

/// Render one match as a SAM line (no trailing newline).
pub fn render_match(
    header: &ArchiveHeader,
    query: &QueryRecord,
    m: &MatchRecord,
) -> Result<String> {
    let cigar = cigar_string(&m.ops);
    let seq = aligned_query(header.mode(), query, m)?;
    let md = md_string(header.mode(), &m.ops);

    let flag = if m.is_reverse() { FLAG_REVERSE } else { 0 };
    let evalue = m.expected_value(header, query.query_length());

    let mut line = String::with_capacity(128 + seq.len());
    write!(
        line,
        "{}\t{}\t{}\t{}\t255\t{}\t*\t0\t0\t{}\t*",
        String::from_utf8_lossy(&query.name),
        flag,
        String::from_utf8_lossy(&m.subject_name),
        m.subject_begin + 1,
        cigar,
        String::from_utf8_lossy(&seq),
    )
    .expect("write to string");
    write!(
        line,
        "\tAS:i:{}\tNM:i:{}\tZL:i:{}\tZR:i:{}\tZE:f:{:.1e}\tZI:i:{}\tZF:i:{}\tZS:i:{}\tMD:Z:{}",
        m.bit_score(header).round() as i64,
        m.mismatches + m.gaps,
        m.subject_length,
        m.raw_score,
        evalue,
        m.percent_identity(),
        m.blast_frame(),
        m.query_begin + 1,
        md,
    )
    .expect("write to string");
    Ok(line)
}

/// CIGAR from the gathered transcript: substitution renders as M, and
/// adjacent same-letter runs coalesce.
pub fn cigar_string(ops: &[CombinedOp]) -> String {
    let mut runs: Vec<(u8, u32)> = Vec::new();
    for op in ops {
        let letter = match op.op {
            EditOp::Match | EditOp::Substitution => b'M',
            EditOp::Insertion => b'I',
            EditOp::Deletion => b'D',
        };
        match runs.last_mut() {
            Some((l, count)) if *l == letter => *count += op.count,
            _ => runs.push((letter, op.count)),
        }
    }
    let mut out = String::new();
    for (letter, count) in runs {
        write!(out, "{}{}", count, char::from(letter)).expect("write to string");
    }
    out
}

/// MD string: run lengths of matches, mismatch letters, `^`-prefixed
/// deletion runs. A number always precedes each token, so a mismatch right
/// after a deletion run gets an explicit `0`. Frame-shift sentinel columns
/// carry no subject letter and extend the current match run.
pub fn md_string(mode: AlignMode, ops: &[CombinedOp]) -> String {
    let mut out = String::new();
    let mut run = 0u32;
    for op in ops {
        match op.op {
            EditOp::Match => run += op.count,
            EditOp::Insertion => {}
            EditOp::Deletion => {
                write!(out, "{run}^").expect("write to string");
                run = 0;
                let letter = subject_letter(mode, op.letter);
                for _ in 0..op.count {
                    out.push(char::from(letter));
                }
            }
            EditOp::Substitution => {
                if op.is_frame_shift() {
                    run += 1;
                } else {
                    let letter = subject_letter(mode, op.letter);
                    write!(out, "{run}{}", char::from(letter)).expect("write to string");
                    run = 0;
                }
            }
        }
    }
    write!(out, "{run}").expect("write to string");
    out
}

fn subject_letter(mode: AlignMode, code: u8) -> u8 {
    match mode {
        AlignMode::BlastN => sequence::nucleotide_letter(code, true),
        _ => sequence::amino_acid_letter(code),
    }
}

/// Alignment context the match was made against.
fn context_of<'a>(mode: AlignMode, query: &'a QueryRecord, frame: u8) -> Result<&'a [u8]> {
    let index = match mode {
        AlignMode::BlastP => 0,
        AlignMode::BlastN => {
            if frame == 0 {
                0
            } else {
                1
            }
        }
        AlignMode::BlastX => frame as usize,
    };
    query.contexts.get(index).map(|c| c.as_slice()).ok_or_else(|| {
        ArchiveError::format(format!("query has no context for frame {frame}"))
    })
}

/// Aligned query substring for the SAM SEQ field. Matches, substitutions
/// and insertions all consume consecutive context positions, so without a
/// frame shift this is a contiguous cut.
fn aligned_query(mode: AlignMode, query: &QueryRecord, m: &MatchRecord) -> Result<Vec<u8>> {
    if m.frame_shift_adjust != 0 {
        return realign_shifted_query(query, m);
    }
    let context = context_of(mode, query, m.frame)?;
    let start = m.translated_query_begin as usize;
    let end = start + m.query_span_cols() as usize;
    if end > context.len() {
        return Err(ArchiveError::format(format!(
            "aligned query [{start}..{end}) exceeds context of {} symbols",
            context.len()
        )));
    }
    Ok(context[start..end].to_vec())
}

/// Base-by-base recomputation for frame-shifted translated alignments.
/// Walks the transcript over the DNA source, translating one codon per
/// query-consuming column; a reverse-shift column advances the cursor one
/// base backwards instead of three forwards, a forward-shift column one
/// base forwards.
fn realign_shifted_query(query: &QueryRecord, m: &MatchRecord) -> Result<Vec<u8>> {
    let dna = &query.source;
    let reverse = m.is_reverse();
    let mut pos = i64::from(m.query_begin);
    let mut out = Vec::with_capacity(m.query_span_cols() as usize);

    let emit = |pos: i64| {
        if reverse {
            if pos >= 0 && (pos as usize) < dna.len() {
                sequence::translate_codon_reverse(dna, pos as usize)
            } else {
                sequence::UNKNOWN_AMINO_ACID
            }
        } else if pos >= 0 {
            sequence::translate_codon(dna, pos as usize)
        } else {
            sequence::UNKNOWN_AMINO_ACID
        }
    };

    for op in &m.ops {
        match op.op {
            EditOp::Match | EditOp::Insertion => {
                for _ in 0..op.count {
                    out.push(emit(pos));
                    pos += if reverse { -3 } else { 3 };
                }
            }
            EditOp::Deletion => {}
            EditOp::Substitution => {
                out.push(emit(pos));
                let advance = if op.is_reverse_shift() {
                    -1
                } else if op.is_forward_shift() {
                    1
                } else {
                    3
                };
                pos += if reverse { -advance } else { advance };
            }
        }
    }
    Ok(out)
}

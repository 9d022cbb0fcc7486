//! Sequence alphabets, packed-sequence decoding, and codon translation.
//!
//! The amino-acid alphabet layout is load-bearing: the last two symbols
//! (`/` and `\`) are the frame-shift sentinels that edit transcripts smuggle
//! through substitution operations. Do not reorder or extend this alphabet.

use crate::bits;
use crate::error::{ArchiveError, Result};

/// 27-symbol amino-acid alphabet, 5 bits per symbol when packed.
pub const AMINO_ACID_ALPHABET: &[u8] = b"ARNDCQEGHILKMFPSTWYVBJZX*/\\";

/// 4-symbol nucleotide alphabet, 2 bits per symbol when packed.
pub const NUCLEOTIDE_ALPHABET: &[u8] = b"ACGT";

/// 5-symbol nucleotide alphabet with ambiguity, 3 bits per symbol.
pub const NUCLEOTIDE_ALPHABET_AMBIG: &[u8] = b"ACGTN";

/// Symbol emitted for codons that cannot be translated.
pub const UNKNOWN_AMINO_ACID: u8 = b'X';

/// Code of the "reverse frame shift" sentinel: second-to-last alphabet slot.
pub const REVERSE_SHIFT_CODE: u8 = (AMINO_ACID_ALPHABET.len() - 2) as u8;

/// Code of the "forward frame shift" sentinel: last alphabet slot.
pub const FORWARD_SHIFT_CODE: u8 = (AMINO_ACID_ALPHABET.len() - 1) as u8;

/// Letter form of the reverse frame-shift sentinel.
pub const REVERSE_SHIFT_LETTER: u8 = b'/';

/// Letter form of the forward frame-shift sentinel.
pub const FORWARD_SHIFT_LETTER: u8 = b'\\';

/// Decode a packed-alphabet code to its letter; out-of-range codes map to
/// the alphabet's unknown symbol rather than failing, matching the packed
/// widths (5 bits address 32 slots but only 27 are assigned).
pub fn amino_acid_letter(code: u8) -> u8 {
    AMINO_ACID_ALPHABET
        .get(code as usize)
        .copied()
        .unwrap_or(UNKNOWN_AMINO_ACID)
}

pub fn nucleotide_letter(code: u8, ambiguous: bool) -> u8 {
    let alphabet = if ambiguous {
        NUCLEOTIDE_ALPHABET_AMBIG
    } else {
        NUCLEOTIDE_ALPHABET
    };
    alphabet.get(code as usize).copied().unwrap_or(b'N')
}

/// Code of a letter within the given alphabet, for the write side.
pub fn code_of(alphabet: &[u8], letter: u8) -> Result<u8> {
    alphabet
        .iter()
        .position(|&a| a == letter)
        .map(|p| p as u8)
        .ok_or_else(|| {
            ArchiveError::format(format!(
                "letter {:?} not in alphabet",
                char::from(letter)
            ))
        })
}

/// Unpack a bit-packed sequence of `count` symbols to letters.
///
/// `width` selects the alphabet: 5 bits for protein, 3 for nucleotide with
/// ambiguity codes, 2 for plain nucleotide.
pub fn unpack_sequence(packed: &[u8], count: usize, width: u32) -> Result<Vec<u8>> {
    let codes = bits::unpack_symbols(packed, count, width).ok_or_else(|| {
        ArchiveError::format(format!(
            "packed sequence too short for {count} symbols at {width} bits"
        ))
    })?;
    let letters = codes
        .iter()
        .map(|&c| match width {
            5 => amino_acid_letter(c),
            3 => nucleotide_letter(c, true),
            _ => nucleotide_letter(c, false),
        })
        .collect();
    Ok(letters)
}

/// Pack a letter sequence at the given width. Mirror of [`unpack_sequence`].
pub fn pack_sequence(letters: &[u8], width: u32) -> Result<Vec<u8>> {
    let alphabet: &[u8] = match width {
        5 => AMINO_ACID_ALPHABET,
        3 => NUCLEOTIDE_ALPHABET_AMBIG,
        _ => NUCLEOTIDE_ALPHABET,
    };
    let mut codes = Vec::with_capacity(letters.len());
    for &l in letters {
        codes.push(code_of(alphabet, l)?);
    }
    Ok(bits::pack_symbols(&codes, width))
}

pub fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        _ => b'N',
    }
}

pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

// Standard genetic code indexed by base ranks in TCAG order.
const GENETIC_CODE: &[u8; 64] =
    b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

fn base_rank(base: u8) -> Option<usize> {
    match base {
        b'T' => Some(0),
        b'C' => Some(1),
        b'A' => Some(2),
        b'G' => Some(3),
        _ => None,
    }
}

/// Translate the codon starting at `pos` on the forward strand. Codons
/// containing ambiguous bases, or truncated by the end of the sequence,
/// translate to the unknown symbol.
pub fn translate_codon(seq: &[u8], pos: usize) -> u8 {
    if pos + 3 > seq.len() {
        return UNKNOWN_AMINO_ACID;
    }
    match (
        base_rank(seq[pos]),
        base_rank(seq[pos + 1]),
        base_rank(seq[pos + 2]),
    ) {
        (Some(a), Some(b), Some(c)) => GENETIC_CODE[a * 16 + b * 4 + c],
        _ => UNKNOWN_AMINO_ACID,
    }
}

/// Translate the reverse-complement codon ending at `pos` (reading the
/// minus strand leftwards from `pos`).
pub fn translate_codon_reverse(seq: &[u8], pos: usize) -> u8 {
    if pos + 1 < 3 || pos >= seq.len() {
        return UNKNOWN_AMINO_ACID;
    }
    let (a, b, c) = (
        complement(seq[pos]),
        complement(seq[pos - 1]),
        complement(seq[pos - 2]),
    );
    match (base_rank(a), base_rank(b), base_rank(c)) {
        (Some(x), Some(y), Some(z)) => GENETIC_CODE[x * 16 + y * 4 + z],
        _ => UNKNOWN_AMINO_ACID,
    }
}

/// Produce the six translated reading frames of `dna`: three forward frame
/// offsets, then three frames of the reverse complement. Frame `f` has
/// length `(len - offset) / 3` for its offset.
pub fn six_frame_translate(dna: &[u8]) -> [Vec<u8>; 6] {
    let mut frames: [Vec<u8>; 6] = Default::default();
    let rc = reverse_complement(dna);
    for offset in 0..3 {
        frames[offset] = translate_frame(dna, offset);
        frames[3 + offset] = translate_frame(&rc, offset);
    }
    frames
}

fn translate_frame(seq: &[u8], offset: usize) -> Vec<u8> {
    if seq.len() < offset {
        return Vec::new();
    }
    let codons = (seq.len() - offset) / 3;
    let mut out = Vec::with_capacity(codons);
    for i in 0..codons {
        out.push(translate_codon(seq, offset + 3 * i));
    }
    out
}

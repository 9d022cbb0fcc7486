//! Packed edit-transcript decoding and gathering.
//!
//! A transcript is a byte sequence of packed operations: op code in the top
//! two bits, count-or-letter in the low six, terminated by a zero byte (a
//! zero-count match). Adjacent match and insertion operations gather into a
//! single combined operation with summed count; deletion operations gather
//! only while they carry the same subject letter, so re-expanding combined
//! operations reproduces the original runs exactly. Substitutions stay
//! singleton: their letter may be an ordinary mismatch or one of the two
//! reserved frame-shift sentinels.

use crate::buffer::{InputBuffer, OutputBuffer};
use crate::error::{ArchiveError, Result};
use crate::sequence::{FORWARD_SHIFT_CODE, REVERSE_SHIFT_CODE};

/// Largest run a single packed operation can carry.
pub const MAX_RUN: u32 = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    Match,
    Insertion,
    Deletion,
    Substitution,
}

impl EditOp {
    fn from_rank(rank: u8) -> EditOp {
        match rank {
            0 => EditOp::Match,
            1 => EditOp::Insertion,
            2 => EditOp::Deletion,
            _ => EditOp::Substitution,
        }
    }

    fn rank(self) -> u8 {
        match self {
            EditOp::Match => 0,
            EditOp::Insertion => 1,
            EditOp::Deletion => 2,
            EditOp::Substitution => 3,
        }
    }
}

/// A maximal run of identical operations. `letter` is the packed alphabet
/// code for deletions and substitutions, zero otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinedOp {
    pub op: EditOp,
    pub count: u32,
    pub letter: u8,
}

impl CombinedOp {
    pub fn is_reverse_shift(&self) -> bool {
        self.op == EditOp::Substitution && self.letter == REVERSE_SHIFT_CODE
    }

    pub fn is_forward_shift(&self) -> bool {
        self.op == EditOp::Substitution && self.letter == FORWARD_SHIFT_CODE
    }

    pub fn is_frame_shift(&self) -> bool {
        self.is_reverse_shift() || self.is_forward_shift()
    }
}

/// Decode packed operations from `buf` until the terminator, gathering runs
/// as they arrive.
pub fn decode_gathered(buf: &mut InputBuffer) -> Result<Vec<CombinedOp>> {
    let mut ops: Vec<CombinedOp> = Vec::new();
    loop {
        let packed = buf.read_u8()?;
        if packed == 0 {
            return Ok(ops);
        }
        let op = EditOp::from_rank(packed >> 6);
        let low = packed & 0x3F;
        let (count, letter) = match op {
            EditOp::Match | EditOp::Insertion => (u32::from(low), 0),
            EditOp::Deletion | EditOp::Substitution => (1, low),
        };
        if count == 0 {
            return Err(ArchiveError::format("zero-count run inside transcript"));
        }
        match ops.last_mut() {
            Some(last)
                if last.op == op
                    && op != EditOp::Substitution
                    && last.letter == letter =>
            {
                last.count += count;
            }
            _ => ops.push(CombinedOp { op, count, letter }),
        }
    }
}

/// Re-expand combined operations into packed bytes, terminator included.
/// Inverse of [`decode_gathered`] up to run re-splitting.
pub fn encode_ops(ops: &[CombinedOp], out: &mut OutputBuffer) {
    for op in ops {
        match op.op {
            EditOp::Match | EditOp::Insertion => {
                let mut remaining = op.count;
                while remaining > 0 {
                    let chunk = remaining.min(MAX_RUN);
                    out.append_byte((op.op.rank() << 6) | chunk as u8);
                    remaining -= chunk;
                }
            }
            EditOp::Deletion | EditOp::Substitution => {
                for _ in 0..op.count {
                    out.append_byte((op.op.rank() << 6) | (op.letter & 0x3F));
                }
            }
        }
    }
    out.append_byte(0);
}

// Library exports for alnarc
pub mod binio;
pub mod bits;
pub mod buffer;
pub mod classification;
pub mod dominance_filter;
pub mod error;
pub mod header;
pub mod modify;
pub mod records;
pub mod ref_registry;
pub mod sam;
pub mod sequence;
pub mod stream;
pub mod transcript;

pub use error::{ArchiveError, Result};
pub use header::{AlignMode, ArchiveHeader, BlockType};
pub use modify::{ArchiveModifier, ArchiveWriter};
pub use records::{MatchRecord, QueryRecord};
pub use stream::{stream_alignments, stream_sam, QueryAlignments, StreamConfig};

//! Streaming decode pipeline.
//!
//! One producer thread owns the file readers and all decoding state: a
//! scratch record buffer reused every iteration, the reference registry,
//! and a second reader handle for checkpoint lookups. Decoded results
//! flow to consumers through a bounded channel, which is the pipeline's
//! only backpressure mechanism. End-of-stream is the channel
//! disconnecting — the producer drops its sender when the alignments
//! block is exhausted — so there is no sentinel value to compare against.
//! A decode error is sent as the final item before disconnect; consumers
//! never block forever.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, warn};

use crate::binio::BinaryReader;
use crate::buffer::InputBuffer;
use crate::dominance_filter::{filter_matches, DominanceConfig};
use crate::error::{ArchiveError, Result};
use crate::header::{ArchiveHeader, BlockType};
use crate::records::{MatchRecord, QueryRecord};
use crate::ref_registry::RefRegistry;
use crate::sam;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Bounded channel capacity; the producer blocks when consumers lag.
    pub channel_capacity: usize,
    /// Stop decoding a query's matches after this many.
    pub max_matches_per_query: usize,
    /// Apply the long-read containment/dominance filter.
    pub long_reads: bool,
    pub dominance: DominanceConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            channel_capacity: 256,
            max_matches_per_query: usize::MAX,
            long_reads: false,
            dominance: DominanceConfig::default(),
        }
    }
}

/// One query and its surviving matches.
#[derive(Debug)]
pub struct QueryAlignments {
    pub query: QueryRecord,
    pub matches: Vec<MatchRecord>,
}

/// Consumer handle over decoded records. Dropping it early cancels the
/// producer: its next send fails and it releases its file handles.
pub struct AlignmentStream {
    header: ArchiveHeader,
    receiver: Option<Receiver<Result<QueryAlignments>>>,
    handle: Option<JoinHandle<()>>,
}

impl AlignmentStream {
    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }
}

impl Iterator for AlignmentStream {
    type Item = Result<QueryAlignments>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.as_ref().and_then(|r| r.recv().ok())
    }
}

impl Drop for AlignmentStream {
    fn drop(&mut self) {
        // Disconnect first so a blocked producer wakes up and exits.
        self.receiver.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Decode every query/match pair in the archive.
pub fn stream_alignments<P: AsRef<Path>>(
    path: P,
    config: StreamConfig,
) -> Result<AlignmentStream> {
    let (header, receiver, handle) =
        spawn_producer(path.as_ref(), config, |_, batch| Ok(batch))?;
    Ok(AlignmentStream {
        header,
        receiver: Some(receiver),
        handle: Some(handle),
    })
}

/// Consumer handle over rendered SAM text: one item per query, carrying
/// the query name and its alignment lines.
pub struct SamStream {
    preamble: String,
    receiver: Option<Receiver<Result<(String, Vec<String>)>>>,
    handle: Option<JoinHandle<()>>,
}

impl SamStream {
    /// `@HD`/`@PG` lines for the whole document.
    pub fn preamble(&self) -> &str {
        &self.preamble
    }
}

impl Iterator for SamStream {
    type Item = Result<(String, Vec<String>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.as_ref().and_then(|r| r.recv().ok())
    }
}

impl Drop for SamStream {
    fn drop(&mut self) {
        self.receiver.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Decode and render the whole archive as SAM.
pub fn stream_sam<P: AsRef<Path>>(path: P, config: StreamConfig) -> Result<SamStream> {
    let (header, receiver, handle) = spawn_producer(path.as_ref(), config, |header, batch| {
        let name = String::from_utf8_lossy(&batch.query.name).into_owned();
        let mut lines = Vec::with_capacity(batch.matches.len());
        for m in &batch.matches {
            lines.push(sam::render_match(header, &batch.query, m)?);
        }
        Ok((name, lines))
    })?;
    Ok(SamStream {
        preamble: sam::sam_header_lines(&header),
        receiver: Some(receiver),
        handle: Some(handle),
    })
}

fn spawn_producer<T, F>(
    path: &Path,
    config: StreamConfig,
    map: F,
) -> Result<(ArchiveHeader, Receiver<Result<T>>, JoinHandle<()>)>
where
    T: Send + 'static,
    F: Fn(&ArchiveHeader, QueryAlignments) -> Result<T> + Send + 'static,
{
    let header = ArchiveHeader::open(path)?;
    if header.block_index_by_type(BlockType::Alignments).is_none() {
        return Err(ArchiveError::format("archive has no alignments block"));
    }

    let (sender, receiver) = bounded(config.channel_capacity.max(1));
    let thread_header = header.clone();
    let thread_path = path.to_path_buf();
    let handle = std::thread::spawn(move || {
        if let Err(e) = run_producer(&thread_path, &thread_header, &config, &map, &sender) {
            warn!("alignment producer terminated: {e}");
            // Push the error as the final item; consumers must not block
            // forever on a dead producer.
            let _ = sender.send(Err(e));
        }
    });

    Ok((header, receiver, handle))
}

fn run_producer<T, F>(
    path: &Path,
    header: &ArchiveHeader,
    config: &StreamConfig,
    map: &F,
    sender: &Sender<Result<T>>,
) -> Result<()>
where
    F: Fn(&ArchiveHeader, QueryAlignments) -> Result<T>,
{
    // Two handles against the same file: sequential record decoding must
    // not share a cursor with checkpoint name lookups.
    let mut reader = BinaryReader::new(BufReader::new(File::open(path)?));
    let mut names_reader = BinaryReader::new(BufReader::new(File::open(path)?));
    let mut registry = RefRegistry::open(header, &mut names_reader)?;
    let has_names = header.block_index_by_type(BlockType::RefNames).is_some();

    let index = header
        .block_index_by_type(BlockType::Alignments)
        .expect("checked before spawn");
    let (start, size) = header.location_of_block(index);
    let end = start + size;
    reader.seek(start)?;

    let mut scratch = InputBuffer::new();
    let mut decoded = 0u64;
    while decoded < header.query_records() {
        let location = reader.tell()?;
        if location >= end {
            break;
        }
        let buffer_size = reader.read_u32()? as usize;
        if buffer_size == 0 {
            return Err(ArchiveError::format(format!(
                "zero-length query record buffer at offset {location}"
            )));
        }
        reader.read_exact_into(scratch.fill_from(buffer_size))?;

        let mut query = QueryRecord::decode(&mut scratch, header.mode(), header.layout())?;
        query.location = location;

        let mut matches = Vec::new();
        while scratch.remaining() > 0 && matches.len() < config.max_matches_per_query {
            let refs = if has_names {
                Some((&mut registry, &mut names_reader))
            } else {
                None
            };
            matches.push(MatchRecord::decode(&mut scratch, &query, header, refs)?);
        }

        if config.long_reads {
            matches = filter_matches(matches, query.query_length(), &config.dominance);
        }

        let item = map(header, QueryAlignments { query, matches })?;
        if sender.send(Ok(item)).is_err() {
            // Consumer side closed: equivalent to end-of-file.
            debug!("consumer disconnected after {decoded} queries");
            return Ok(());
        }
        decoded += 1;
    }
    debug!("decoded {decoded} query records");
    Ok(())
}

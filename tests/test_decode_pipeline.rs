/// End-to-end decode: synthetic archives streamed back through the
/// producer/consumer pipeline
use anyhow::Result;
use pretty_assertions::assert_eq;
use std::path::Path;
use tempfile::tempdir;

use alnarc::buffer::OutputBuffer;
use alnarc::dominance_filter::DominanceConfig;
use alnarc::header::{AlignMode, BlockType};
use alnarc::modify::ArchiveWriter;
use alnarc::records::{encode_match_record, encode_query_record};
use alnarc::stream::{stream_alignments, stream_sam, StreamConfig};
use alnarc::transcript::{CombinedOp, EditOp};
use alnarc::ArchiveError;

struct QueryFixture<'a> {
    name: &'a [u8],
    seq: &'a [u8],
    matches: Vec<MatchFixture>,
}

struct MatchFixture {
    subject_id: u32,
    score: u32,
    query_begin: u32,
    subject_begin: u32,
    ops: Vec<CombinedOp>,
}

fn m(op: EditOp, count: u32, letter: u8) -> CombinedOp {
    CombinedOp { op, count, letter }
}

/// Assemble a complete archive: alignments block of size-prefixed query
/// buffers plus reference name/length blocks.
fn build_archive(
    path: &Path,
    mode: AlignMode,
    refs: &[(&[u8], i32)],
    queries: &[QueryFixture],
) -> Result<()> {
    let mut alignments = OutputBuffer::new();
    for q in queries {
        let mut payload = OutputBuffer::new();
        encode_query_record(&mut payload, q.name, q.seq, mode)?;
        for mt in &q.matches {
            encode_match_record(
                &mut payload,
                mt.subject_id,
                mt.score,
                mt.query_begin,
                mt.subject_begin,
                false,
                &mt.ops,
            );
        }
        alignments.append_u32_le(payload.len() as u32);
        alignments.append_bytes(payload.as_slice());
    }

    let mut names = OutputBuffer::new();
    let mut lengths = OutputBuffer::new();
    for (name, len) in refs {
        names.append_string(name);
        lengths.append_i32_le(*len);
    }

    let mut writer = ArchiveWriter::create(path, mode)?;
    writer
        .header_mut()
        .set_db_stats(refs.len() as u64, refs.len() as u64, 1_000_000);
    writer.header_mut().set_query_records(queries.len() as u64);
    writer.append_block(BlockType::Alignments, alignments.as_slice())?;
    writer.append_block(BlockType::RefNames, names.as_slice())?;
    writer.append_block(BlockType::RefLengths, lengths.as_slice())?;
    writer.finish()?;
    Ok(())
}

#[test]
fn blastx_match_statistics() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("one.aln");
    build_archive(
        &path,
        AlignMode::BlastX,
        &[(b"subj1", 300)],
        &[QueryFixture {
            name: b"read1",
            seq: b"ACGACGACG",
            matches: vec![MatchFixture {
                subject_id: 0,
                score: 57,
                query_begin: 0,
                subject_begin: 10,
                ops: vec![
                    m(EditOp::Match, 3, 0),
                    m(EditOp::Insertion, 1, 0),
                    m(EditOp::Match, 2, 0),
                ],
            }],
        }],
    )?;

    let batches: Vec<_> = stream_alignments(&path, StreamConfig::default())?
        .collect::<alnarc::Result<Vec<_>>>()?;
    assert_eq!(batches.len(), 1);

    let batch = &batches[0];
    assert_eq!(batch.query.name, b"read1");
    assert_eq!(batch.query.source, b"ACGACGACG");
    assert_eq!(batch.query.contexts.len(), 6);
    assert_eq!(batch.matches.len(), 1);

    let mt = &batch.matches[0];
    assert_eq!(mt.identities, 5);
    assert_eq!(mt.gap_openings, 1);
    assert_eq!(mt.len, 6);
    assert_eq!(mt.percent_identity(), 83);
    assert_eq!(mt.subject_name, b"subj1");
    assert_eq!(mt.subject_length, 300);
    Ok(())
}

#[test]
fn match_cap_limits_decoding() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("cap.aln");
    let matches = (0..5)
        .map(|i| MatchFixture {
            subject_id: 0,
            score: 100 + i,
            query_begin: 0,
            subject_begin: 0,
            ops: vec![m(EditOp::Match, 3, 0)],
        })
        .collect();
    build_archive(
        &path,
        AlignMode::BlastP,
        &[(b"subj1", 10)],
        &[QueryFixture {
            name: b"q",
            seq: b"MKWYRNDT",
            matches,
        }],
    )?;

    let config = StreamConfig {
        max_matches_per_query: 2,
        ..StreamConfig::default()
    };
    let batches: Vec<_> = stream_alignments(&path, config)?.collect::<alnarc::Result<Vec<_>>>()?;
    assert_eq!(batches[0].matches.len(), 2);
    Ok(())
}

#[test]
fn long_read_filter_drops_dominated_matches() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("long.aln");
    // 120-residue protein query; the second match is contained in the
    // first and scores below the ratio, the third sits elsewhere.
    let seq: Vec<u8> = b"MKWYRNDTHQEG".repeat(10);
    build_archive(
        &path,
        AlignMode::BlastP,
        &[(b"subjA", 100), (b"subjB", 80), (b"subjC", 20)],
        &[QueryFixture {
            name: b"longread",
            seq: &seq[..],
            matches: vec![
                MatchFixture {
                    subject_id: 0,
                    score: 1000,
                    query_begin: 0,
                    subject_begin: 0,
                    ops: vec![m(EditOp::Match, 100, 0)],
                },
                MatchFixture {
                    subject_id: 1,
                    score: 900,
                    query_begin: 10,
                    subject_begin: 0,
                    ops: vec![m(EditOp::Match, 80, 0)],
                },
                MatchFixture {
                    subject_id: 2,
                    score: 400,
                    query_begin: 100,
                    subject_begin: 0,
                    ops: vec![m(EditOp::Match, 20, 0)],
                },
            ],
        }],
    )?;

    let config = StreamConfig {
        long_reads: true,
        dominance: DominanceConfig::default(),
        ..StreamConfig::default()
    };
    let batches: Vec<_> = stream_alignments(&path, config)?.collect::<alnarc::Result<Vec<_>>>()?;
    let scores: Vec<u32> = batches[0].matches.iter().map(|m| m.raw_score).collect();
    assert_eq!(scores, vec![1000, 400]);
    Ok(())
}

#[test]
fn sam_rendering_matches_transcript() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("sam.aln");
    // 21 bases -> 7 residues in frame 0; alignment uses 6 of them
    build_archive(
        &path,
        AlignMode::BlastX,
        &[(b"subj1", 200)],
        &[QueryFixture {
            name: b"read1",
            seq: b"ACGACGACGACGACGACGACG",
            matches: vec![MatchFixture {
                subject_id: 0,
                score: 80,
                query_begin: 0,
                subject_begin: 4,
                ops: vec![
                    m(EditOp::Match, 3, 0),
                    m(EditOp::Substitution, 1, 1), // mismatch against R
                    m(EditOp::Match, 2, 0),
                ],
            }],
        }],
    )?;

    let mut stream = stream_sam(&path, StreamConfig::default())?;
    assert!(stream.preamble().starts_with("@HD"));

    let (name, lines) = stream.next().unwrap()?;
    assert_eq!(name, "read1");
    assert_eq!(lines.len(), 1);

    let fields: Vec<&str> = lines[0].split('\t').collect();
    assert_eq!(fields[0], "read1");
    assert_eq!(fields[1], "0");
    assert_eq!(fields[2], "subj1");
    assert_eq!(fields[3], "5"); // 1-based subject begin
    assert_eq!(fields[5], "6M");
    assert_eq!(fields[9], "TTTTTT"); // frame-0 translation of the query
    assert!(fields.iter().any(|f| f.starts_with("ZI:i:83")));
    assert!(fields.iter().any(|f| f.starts_with("ZF:i:1")));
    assert!(fields.iter().any(|f| *f == "MD:Z:3R2"));
    assert!(stream.next().is_none());
    Ok(())
}

#[test]
fn blastn_forward_coordinates_and_seq() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir()?;
    let path = dir.path().join("nucl.aln");

    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bases = [b'A', b'C', b'G', b'T'];
    let seq: Vec<u8> = (0..300).map(|_| bases[rng.gen_range(0..4)]).collect();

    build_archive(
        &path,
        AlignMode::BlastN,
        &[(b"contig1", 60)],
        &[QueryFixture {
            name: b"nread",
            seq: &seq[..],
            matches: vec![MatchFixture {
                subject_id: 0,
                score: 120,
                query_begin: 20,
                subject_begin: 7,
                ops: vec![m(EditOp::Match, 50, 0)],
            }],
        }],
    )?;

    let mut stream = stream_alignments(&path, StreamConfig::default())?;
    let header = stream.header().clone();
    let batch = stream.next().unwrap()?;
    let mt = &batch.matches[0];
    assert_eq!(mt.translated_query_begin, 20);
    assert_eq!(mt.query_end, 70);
    assert_eq!(mt.percent_identity(), 100);
    assert_eq!(mt.blast_frame(), 1);

    let line = alnarc::sam::render_match(&header, &batch.query, mt)?;
    let fields: Vec<&str> = line.split('\t').collect();
    assert_eq!(fields[5], "50M");
    assert_eq!(fields[9].as_bytes(), &seq[20..70]);
    Ok(())
}

#[test]
fn decode_error_reaches_consumer_then_stream_ends() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("broken.aln");

    // A query buffer whose payload is too short to hold a match record
    let mut alignments = OutputBuffer::new();
    let mut payload = OutputBuffer::new();
    encode_query_record(&mut payload, b"q", b"MK", AlignMode::BlastP)?;
    payload.append_byte(0x07); // half a subject id
    payload.append_byte(0x00);
    alignments.append_u32_le(payload.len() as u32);
    alignments.append_bytes(payload.as_slice());

    let mut writer = ArchiveWriter::create(&path, AlignMode::BlastP)?;
    writer.header_mut().set_query_records(1);
    writer.append_block(BlockType::Alignments, alignments.as_slice())?;
    writer.finish()?;

    let mut stream = stream_alignments(&path, StreamConfig::default())?;
    match stream.next() {
        Some(Err(ArchiveError::Io(_))) => {}
        other => panic!("expected Io error item, got {other:?}"),
    }
    assert!(stream.next().is_none(), "stream must end after the error");
    Ok(())
}

#[test]
fn dropping_the_stream_cancels_the_producer() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("many.aln");
    let queries: Vec<QueryFixture> = (0..500)
        .map(|_| QueryFixture {
            name: b"q",
            seq: b"MKWYRNDT",
            matches: vec![MatchFixture {
                subject_id: 0,
                score: 10,
                query_begin: 0,
                subject_begin: 0,
                ops: vec![m(EditOp::Match, 3, 0)],
            }],
        })
        .collect();
    build_archive(&path, AlignMode::BlastP, &[(b"s", 10)], &queries)?;

    let config = StreamConfig {
        channel_capacity: 2,
        ..StreamConfig::default()
    };
    let mut stream = stream_alignments(&path, config)?;
    stream.next().unwrap()?;
    // Dropping joins the producer; a hang here means cancellation broke
    drop(stream);
    Ok(())
}

/// Container mutation: append, replace, remove, truncate, classification
/// index attachment
use anyhow::Result;
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tempfile::tempdir;

use alnarc::binio::BinaryReader;
use alnarc::classification::{self, ClassData, ClassificationBlock};
use alnarc::header::{AlignMode, ArchiveHeader, BlockType, MAX_BLOCKS};
use alnarc::modify::{ArchiveModifier, ArchiveWriter};
use alnarc::ArchiveError;

fn base_archive(path: &Path) -> Result<()> {
    let mut writer = ArchiveWriter::create(path, AlignMode::BlastX)?;
    writer.header_mut().set_db_stats(2, 2, 10_000);
    writer.append_block(BlockType::Alignments, &[1u8; 128])?;
    writer.append_block(BlockType::RefNames, b"subj1\0subj2\0")?;
    writer.append_block(BlockType::RefLengths, &[0u8; 8])?;
    writer.finish()?;
    Ok(())
}

fn table_snapshot(header: &ArchiveHeader) -> Vec<(BlockType, u64)> {
    (0..MAX_BLOCKS)
        .map(|i| (header.block_type(i), header.block_size(i)))
        .collect()
}

#[test]
fn append_blocks_extend_the_file_monotonically() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("a.aln");
    base_archive(&path)?;
    let before = std::fs::metadata(&path)?.len();

    let mut modifier = ArchiveModifier::open(&path)?;
    modifier.append_blocks(&[
        (BlockType::AuxData, b"aux payload".as_slice()),
        (BlockType::MatePair, &[7u8; 16]),
    ])?;
    modifier.save_header()?;
    drop(modifier);

    let header = ArchiveHeader::open(&path)?;
    assert_eq!(header.block_type(3), BlockType::AuxData);
    assert_eq!(header.block_size(3), 11);
    assert_eq!(header.block_type(4), BlockType::MatePair);
    assert_eq!(std::fs::metadata(&path)?.len(), before + 11 + 16);
    assert_eq!(header.end_of_blocks(), std::fs::metadata(&path)?.len());
    Ok(())
}

#[test]
fn replace_trailing_block_in_place() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("b.aln");
    base_archive(&path)?;

    let mut modifier = ArchiveModifier::open(&path)?;
    modifier.replace_block(BlockType::RefLengths, &[9u8; 24])?;
    modifier.save_header()?;
    drop(modifier);

    let header = ArchiveHeader::open(&path)?;
    assert_eq!(header.block_type(2), BlockType::RefLengths);
    assert_eq!(header.block_size(2), 24);
    assert_eq!(header.end_of_blocks(), std::fs::metadata(&path)?.len());
    Ok(())
}

#[test]
fn replace_non_trailing_block_is_a_state_error() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("c.aln");
    base_archive(&path)?;
    let file_before = std::fs::read(&path)?;

    let mut modifier = ArchiveModifier::open(&path)?;
    let before = table_snapshot(modifier.header());
    match modifier.replace_block(BlockType::RefNames, b"new names\0") {
        Err(ArchiveError::State(_)) => {}
        other => panic!("expected State error, got {other:?}"),
    }
    assert_eq!(table_snapshot(modifier.header()), before);
    drop(modifier);

    // Nothing may have touched the file either
    assert_eq!(std::fs::read(&path)?, file_before);
    Ok(())
}

#[test]
fn remove_trailing_blocks_truncates() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("d.aln");
    base_archive(&path)?;

    let mut modifier = ArchiveModifier::open(&path)?;
    modifier.append_blocks(&[
        (BlockType::ClassificationKey, &[1u8; 40]),
        (BlockType::ClassificationDump, &[2u8; 80]),
    ])?;
    modifier.save_header()?;
    let with_classification = std::fs::metadata(&path)?.len();

    let removed = modifier.remove_all_data(|t| {
        matches!(
            t,
            BlockType::ClassificationKey | BlockType::ClassificationDump
        )
    })?;
    modifier.save_header()?;
    drop(modifier);

    assert_eq!(removed, 2);
    assert_eq!(
        std::fs::metadata(&path)?.len(),
        with_classification - 40 - 80
    );
    let header = ArchiveHeader::open(&path)?;
    assert_eq!(header.block_type(3), BlockType::Empty);
    assert_eq!(header.block_type(4), BlockType::Empty);
    Ok(())
}

#[test]
fn classification_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("e.aln");
    base_archive(&path)?;

    let mut classes = IndexMap::new();
    classes.insert(
        2,
        ClassData {
            weighted_sum: 3,
            locations: vec![2448, 2600, 2790],
        },
    );
    let mut modifier = ArchiveModifier::open(&path)?;
    modifier.write_classification_index(b"Taxonomy", &classes)?;
    modifier.save_header()?;
    drop(modifier);

    let header = ArchiveHeader::open(&path)?;
    let mut reader = BinaryReader::new(BufReader::new(File::open(&path)?));
    let block = ClassificationBlock::load(&header, &mut reader, b"Taxonomy")?;
    assert_eq!(block.name(), b"Taxonomy");
    assert_eq!(block.len(), 1);
    assert_eq!(block.sum(2), Some(3));
    assert_eq!(block.weighted_sum(2), Some(3));
    assert_eq!(
        block.read_locations(&mut reader, 2)?,
        vec![2448, 2600, 2790]
    );
    assert_eq!(block.sum(99), None);
    Ok(())
}

#[test]
fn two_classifications_coexist() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("f.aln");
    base_archive(&path)?;

    let mut modifier = ArchiveModifier::open(&path)?;
    let mut taxonomy = IndexMap::new();
    taxonomy.insert(
        7,
        ClassData {
            weighted_sum: 10,
            locations: vec![100, 200],
        },
    );
    let mut function = IndexMap::new();
    function.insert(
        1,
        ClassData {
            weighted_sum: 1,
            locations: vec![300],
        },
    );
    modifier.write_classification_index(b"Taxonomy", &taxonomy)?;
    modifier.write_classification_index(b"Function", &function)?;
    modifier.save_header()?;
    drop(modifier);

    let header = ArchiveHeader::open(&path)?;
    let mut reader = BinaryReader::new(BufReader::new(File::open(&path)?));

    let tax = ClassificationBlock::load(&header, &mut reader, b"Taxonomy")?;
    // Weighted sum 10 over 2 reads stores negated; sum falls back to the
    // list length
    assert_eq!(tax.sum(7), Some(2));
    assert_eq!(tax.weighted_sum(7), Some(10));

    let fun = ClassificationBlock::load(&header, &mut reader, b"Function")?;
    assert_eq!(fun.sum(1), Some(1));
    assert_eq!(fun.read_locations(&mut reader, 1)?, vec![300]);
    Ok(())
}

#[test]
fn annotations_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("g.aln");
    base_archive(&path)?;

    let mut modifier = ArchiveModifier::open(&path)?;
    modifier.write_annotations(b"Taxonomy", &[42, -1])?;
    modifier.save_header()?;
    drop(modifier);

    let header = ArchiveHeader::open(&path)?;
    let index = header
        .block_index_by_type(BlockType::RefAnnotations)
        .expect("annotations block present");
    let mut reader = BinaryReader::new(BufReader::new(File::open(&path)?));
    let (name, values) = classification::read_annotations(&header, &mut reader, index)?;
    assert_eq!(name, b"Taxonomy");
    assert_eq!(values, vec![42, -1]);
    Ok(())
}

#[test]
fn uncommitted_mutation_is_invisible_to_readers() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("h.aln");
    base_archive(&path)?;

    let mut modifier = ArchiveModifier::open(&path)?;
    modifier.append_block(BlockType::AuxData, &[5u8; 32])?;
    // No save_header: the bytes are on disk but the table is not
    let header = ArchiveHeader::open(&path)?;
    assert_eq!(header.block_index_by_type(BlockType::AuxData), None);

    modifier.save_header()?;
    let header = ArchiveHeader::open(&path)?;
    assert!(header.block_index_by_type(BlockType::AuxData).is_some());
    Ok(())
}

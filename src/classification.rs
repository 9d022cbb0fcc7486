//! Classification key/dump block pairs.
//!
//! A classifier attaches per-category read lists to an archive as a pair
//! of blocks: a key block mapping each class id to its weighted sum, sum,
//! list length, and an offset into the companion dump block; and the dump
//! block itself, holding the concatenated 64-bit read locations. Dump
//! offsets are relative to the start of the dump block, never absolute
//! file offsets. Both blocks open with the classification's name, which is
//! how key and dump are paired back up at read time.

use std::io::{Read, Seek};

use indexmap::IndexMap;

use crate::binio::BinaryReader;
use crate::buffer::OutputBuffer;
use crate::error::{ArchiveError, Result};
use crate::header::{ArchiveHeader, BlockType};

/// Per-class input to the index builder. Locations are the file offsets of
/// the member reads' query records, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ClassData {
    pub weighted_sum: i32,
    pub locations: Vec<u64>,
}

/// Build the (key, dump) block pair for one classification.
///
/// A class whose weighted sum equals its read count stores the count
/// directly; otherwise the weighted sum is stored negated so readers can
/// tell the two encodings apart.
pub fn build_index(name: &[u8], classes: &IndexMap<i32, ClassData>) -> (Vec<u8>, Vec<u8>) {
    let mut dump = OutputBuffer::new();
    dump.append_string(name);

    let mut key = OutputBuffer::new();
    key.append_string(name);
    key.append_i32_le(classes.len() as i32);
    for (&class_id, data) in classes {
        let count = data.locations.len() as i32;
        let stored = if data.weighted_sum == count {
            count
        } else {
            -data.weighted_sum
        };
        key.append_i32_le(class_id);
        key.append_i32_le(stored);
        key.append_i32_le(count);
        key.append_i64_le(dump.len() as i64);
        for &location in &data.locations {
            dump.append_u64_le(location);
        }
    }
    (key.into_vec(), dump.into_vec())
}

#[derive(Debug, Clone, Copy)]
struct KeyEntry {
    stored: i32,
    list_length: i32,
    dump_offset: i64,
}

/// A loaded classification: parsed key block plus the location of its dump
/// block for on-demand read-location retrieval.
pub struct ClassificationBlock {
    name: Vec<u8>,
    entries: IndexMap<i32, KeyEntry>,
    dump_start: u64,
}

impl ClassificationBlock {
    /// Load the classification named `wanted` by scanning the archive's
    /// key blocks and pairing the matching dump block by name.
    pub fn load<R: Read + Seek>(
        header: &ArchiveHeader,
        reader: &mut BinaryReader<R>,
        wanted: &[u8],
    ) -> Result<ClassificationBlock> {
        let key_index = Self::find_named_block(header, reader, BlockType::ClassificationKey, wanted)?
            .ok_or_else(|| {
                ArchiveError::format(format!(
                    "no classification key block named {:?}",
                    String::from_utf8_lossy(wanted)
                ))
            })?;
        let dump_index =
            Self::find_named_block(header, reader, BlockType::ClassificationDump, wanted)?
                .ok_or_else(|| {
                    ArchiveError::format(format!(
                        "classification {:?} has a key block but no dump block",
                        String::from_utf8_lossy(wanted)
                    ))
                })?;

        let (key_start, _) = header.location_of_block(key_index);
        let (dump_start, _) = header.location_of_block(dump_index);

        let saved = reader.tell()?;
        reader.seek(key_start)?;
        let name = reader.read_null_terminated()?;
        let count = reader.read_i32()?;
        if count < 0 {
            return Err(ArchiveError::format(format!(
                "negative class count {count}"
            )));
        }
        let mut entries = IndexMap::with_capacity(count as usize);
        for _ in 0..count {
            let class_id = reader.read_i32()?;
            let stored = reader.read_i32()?;
            let list_length = reader.read_i32()?;
            let dump_offset = reader.read_i64()?;
            entries.insert(
                class_id,
                KeyEntry {
                    stored,
                    list_length,
                    dump_offset,
                },
            );
        }
        reader.seek(saved)?;

        Ok(ClassificationBlock {
            name,
            entries,
            dump_start,
        })
    }

    fn find_named_block<R: Read + Seek>(
        header: &ArchiveHeader,
        reader: &mut BinaryReader<R>,
        t: BlockType,
        wanted: &[u8],
    ) -> Result<Option<usize>> {
        let saved = reader.tell()?;
        let mut found = None;
        for index in header.block_indices_by_type(t) {
            let (start, _) = header.location_of_block(index);
            reader.seek(start)?;
            if reader.read_null_terminated()? == wanted {
                found = Some(index);
                break;
            }
        }
        reader.seek(saved)?;
        Ok(found)
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Class ids in key-block order.
    pub fn class_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of reads assigned to `class_id`.
    pub fn sum(&self, class_id: i32) -> Option<i32> {
        self.entries.get(&class_id).map(|e| {
            if e.stored >= 0 {
                e.stored
            } else {
                e.list_length
            }
        })
    }

    /// Weighted read count for `class_id`.
    pub fn weighted_sum(&self, class_id: i32) -> Option<i32> {
        self.entries.get(&class_id).map(|e| e.stored.abs())
    }

    pub fn list_length(&self, class_id: i32) -> Option<i32> {
        self.entries.get(&class_id).map(|e| e.list_length)
    }

    /// Read the stored 64-bit read locations for `class_id`, in their
    /// original insertion order. Restores the reader's cursor.
    pub fn read_locations<R: Read + Seek>(
        &self,
        reader: &mut BinaryReader<R>,
        class_id: i32,
    ) -> Result<Vec<u64>> {
        let entry = self.entries.get(&class_id).ok_or_else(|| {
            ArchiveError::format(format!("class {class_id} not present"))
        })?;
        let saved = reader.tell()?;
        reader.seek(self.dump_start + entry.dump_offset as u64)?;
        let mut locations = Vec::with_capacity(entry.list_length as usize);
        for _ in 0..entry.list_length {
            locations.push(reader.read_u64()?);
        }
        reader.seek(saved)?;
        Ok(locations)
    }
}

/// Serialize a `ref_annotations` block: the classification's name followed
/// by one class id per reference.
pub fn build_annotations(name: &[u8], class_per_reference: &[i32]) -> Vec<u8> {
    let mut out = OutputBuffer::new();
    out.append_string(name);
    for &class_id in class_per_reference {
        out.append_i32_le(class_id);
    }
    out.into_vec()
}

/// Read the `ref_annotations` block at table slot `index`. Returns the
/// classification name and one class id per reference. Restores the
/// reader's cursor.
pub fn read_annotations<R: Read + Seek>(
    header: &ArchiveHeader,
    reader: &mut BinaryReader<R>,
    index: usize,
) -> Result<(Vec<u8>, Vec<i32>)> {
    if header.block_type(index) != BlockType::RefAnnotations {
        return Err(ArchiveError::format(format!(
            "block {index} is not a reference annotations block"
        )));
    }
    let (start, size) = header.location_of_block(index);
    let saved = reader.tell()?;
    reader.seek(start)?;
    let name = reader.read_null_terminated()?;
    let consumed = name.len() as u64 + 1;
    if consumed > size {
        return Err(ArchiveError::format(
            "annotations name overruns its block",
        ));
    }
    let remaining = size - consumed;
    let mut values = Vec::with_capacity((remaining / 4) as usize);
    for _ in 0..remaining / 4 {
        values.push(reader.read_i32()?);
    }
    reader.seek(saved)?;
    Ok((name, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_and_dump_layout() {
        let mut classes = IndexMap::new();
        classes.insert(
            2,
            ClassData {
                weighted_sum: 3,
                locations: vec![10, 20, 30],
            },
        );
        classes.insert(
            5,
            ClassData {
                weighted_sum: 9, // differs from count, stored negated
                locations: vec![40],
            },
        );
        let (key, dump) = build_index(b"Taxonomy", &classes);

        // name NUL + count + 2 entries of (i32,i32,i32,i64)
        assert_eq!(key.len(), 9 + 4 + 2 * 20);
        // name NUL + 4 locations
        assert_eq!(dump.len(), 9 + 4 * 8);

        // First entry's dump offset points just past the dump-block name
        let offset = i64::from_le_bytes(key[9 + 4 + 12..9 + 4 + 20].try_into().unwrap());
        assert_eq!(offset, 9);
        // Second entry's stored value is the negated weighted sum
        let stored = i32::from_le_bytes(key[9 + 4 + 20 + 4..9 + 4 + 20 + 8].try_into().unwrap());
        assert_eq!(stored, -9);
    }
}

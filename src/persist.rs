//! On-disk index format
//!
//! ```text
//! header   IndexHeader (16 bytes: "SVID", version, reserved, dimension, count)
//! vectors  count * dimension f32, row-major, unit-norm
//! records  count * { frame_id u64, timestamp_sec f64, path_len u32, path utf-8 }
//! ```
//!
//! All integers and floats are little-endian. Saves go through a temp file
//! in the destination directory and are renamed into place.
//!
//! This is a superset of the plain "dimension, count, vectors, records"
//! layout: the header adds a magic and version prefix, and each record
//! carries its frame id so frames dropped at build time leave no gaps.

use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::{IndexError, Result};
use crate::index::FrameIndex;
use crate::metadata::MetadataStore;
use crate::search::l2_norm;
use crate::storage::VectorStorage;
use crate::types::{Frame, IndexHeader};

/// Allowed drift of a stored vector's norm from 1.0
const NORM_TOLERANCE: f32 = 1e-3;
const RECORD_FIXED_SIZE: usize = 8 + 8 + 4;

impl FrameIndex {
    /// Write the index to `path`, replacing any existing file atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let count = u32::try_from(self.count()).map_err(|_| {
            IndexError::InvalidBatch(format!("{} frames exceed the format limit", self.count()))
        })?;
        let dimension = u32::try_from(self.dimension()).map_err(|_| {
            IndexError::InvalidConfig(format!(
                "dimension {} exceeds the format limit",
                self.dimension()
            ))
        })?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let tmp = NamedTempFile::new_in(dir)?;

        {
            let mut writer = BufWriter::with_capacity(1_048_576, tmp.as_file());
            writer.write_all(&IndexHeader::new(dimension, count).to_bytes())?;
            for value in self.vectors.as_slice() {
                writer.write_all(&value.to_le_bytes())?;
            }
            for frame in self.metadata.iter() {
                let path_bytes = frame.source_path.as_bytes();
                let path_len = u32::try_from(path_bytes.len()).map_err(|_| {
                    IndexError::InvalidBatch(format!(
                        "source path of frame {} is too long",
                        frame.id
                    ))
                })?;
                writer.write_all(&frame.id.to_le_bytes())?;
                writer.write_all(&frame.timestamp_sec.to_le_bytes())?;
                writer.write_all(&path_len.to_le_bytes())?;
                writer.write_all(path_bytes)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| IndexError::Io(e.error))?;

        info!(path = %path.display(), frames = count, dimension, "saved index");
        Ok(())
    }

    /// Read an index written by [`save`](Self::save).
    ///
    /// Any inconsistency between the header and the data is reported as
    /// `CorruptIndex`; nothing is partially recovered.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let index = if len == 0 {
            decode(&[])?
        } else {
            // SAFETY: the map is read-only and dropped before returning;
            // everything is copied out of it.
            let mmap = unsafe { Mmap::map(&file)? };
            decode(&mmap)?
        };

        info!(
            path = %path.display(),
            frames = index.count(),
            dimension = index.dimension(),
            "loaded index"
        );
        Ok(index)
    }

    /// Load and require a specific vector dimension.
    pub fn load_with_dimension(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let index = Self::load(path)?;
        if index.dimension() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                got: index.dimension(),
            });
        }
        Ok(index)
    }
}

fn corrupt(msg: impl Into<String>) -> IndexError {
    IndexError::CorruptIndex(msg.into())
}

fn decode(bytes: &[u8]) -> Result<FrameIndex> {
    let header = IndexHeader::from_bytes(bytes)
        .ok_or_else(|| corrupt(format!("file is {} bytes, shorter than the header", bytes.len())))?;
    if header.magic != IndexHeader::MAGIC {
        return Err(corrupt("bad magic bytes"));
    }
    if header.version != IndexHeader::VERSION {
        return Err(corrupt(format!("unsupported format version {}", header.version)));
    }
    if header.dimension == 0 {
        return Err(corrupt("dimension is zero"));
    }

    let dimension = header.dimension as usize;
    let count = header.count as usize;
    let floats = count
        .checked_mul(dimension)
        .ok_or_else(|| corrupt("vector block size overflows"))?;
    let vectors_end = floats
        .checked_mul(4)
        .and_then(|n| n.checked_add(IndexHeader::SIZE))
        .ok_or_else(|| corrupt("vector block size overflows"))?;
    if vectors_end > bytes.len() {
        return Err(corrupt(format!(
            "header declares {} vectors of dimension {} but the file holds only {} bytes",
            count,
            dimension,
            bytes.len()
        )));
    }

    let data: Vec<f32> = bytes[IndexHeader::SIZE..vectors_end]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    for (i, vector) in data.chunks_exact(dimension).enumerate() {
        let norm = l2_norm(vector);
        if !norm.is_finite() || (norm - 1.0).abs() > NORM_TOLERANCE {
            return Err(corrupt(format!("vector {} has norm {}, expected 1", i, norm)));
        }
    }

    let frames = decode_records(&bytes[vectors_end..], count)?;
    let vectors = VectorStorage::from_normalized(dimension, data)?;
    FrameIndex::from_parts(vectors, MetadataStore::from_frames(frames))
}

fn decode_records(mut bytes: &[u8], count: usize) -> Result<Vec<Frame>> {
    let mut frames: Vec<Frame> = Vec::with_capacity(count.min(1 << 20));
    for i in 0..count {
        if bytes.len() < RECORD_FIXED_SIZE {
            return Err(corrupt(format!(
                "metadata holds {} records, header declares {}",
                i, count
            )));
        }
        let (fixed, rest) = bytes.split_at(RECORD_FIXED_SIZE);
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&fixed[0..8]);
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&fixed[8..16]);
        let path_len = u32::from_le_bytes([fixed[16], fixed[17], fixed[18], fixed[19]]) as usize;

        if rest.len() < path_len {
            return Err(corrupt(format!("record {} is truncated", i)));
        }
        let (path_bytes, rest) = rest.split_at(path_len);
        let source_path = std::str::from_utf8(path_bytes)
            .map_err(|_| corrupt(format!("record {} has a non-UTF-8 path", i)))?;

        let id = u64::from_le_bytes(id_bytes);
        let timestamp_sec = f64::from_le_bytes(ts_bytes);
        if !timestamp_sec.is_finite() || timestamp_sec < 0.0 {
            return Err(corrupt(format!("record {} has timestamp {}", i, timestamp_sec)));
        }
        if let Some(prev) = frames.last() {
            if id <= prev.id {
                return Err(corrupt(format!("record {} breaks frame id order", i)));
            }
        }

        frames.push(Frame::new(id, timestamp_sec, source_path));
        bytes = rest;
    }

    if !bytes.is_empty() {
        return Err(corrupt(format!(
            "{} trailing bytes after {} metadata records",
            bytes.len(),
            count
        )));
    }
    Ok(frames)
}

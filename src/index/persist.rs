//! On-disk format for [`VectorIndex`]
//!
//! ```text
//! magic    "MCIX"
//! version  u32
//! flags    u32        bit 0: payload is zstd-compressed
//! checksum [u8; 32]   BLAKE3 of the uncompressed payload
//! length   u64        uncompressed payload length
//! payload
//!   meta_len  u32, metadata as JSON
//!   count     u64
//!   dimension u32
//!   entries   count x (corpus u8, local_position u64)
//!   vectors   count x dimension x f32
//! ```
//!
//! All integers and floats are little-endian. Floats are stored bit-exact.

use super::{IndexError, IndexMetadata, VectorIndex};
use crate::corpus::{CorpusId, EntryRef};
use std::fs;
use std::io::Write;
use std::path::Path;

pub const INDEX_MAGIC: &[u8; 4] = b"MCIX";
pub const FORMAT_VERSION: u32 = 1;

const FLAG_ZSTD: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 32 + 8;

impl VectorIndex {
    /// Serialize the index, optionally compressing the payload
    pub fn to_bytes(&self, compress: bool) -> Result<Vec<u8>, IndexError> {
        let payload = self.encode_payload()?;
        let checksum = blake3::hash(&payload);
        let payload_len = payload.len() as u64;

        let (flags, body) = if compress {
            (FLAG_ZSTD, zstd::encode_all(payload.as_slice(), 3)?)
        } else {
            (0, payload)
        };

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(INDEX_MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(checksum.as_bytes());
        out.extend_from_slice(&payload_len.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Deserialize an index produced by [`VectorIndex::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        let mut header = ByteReader::new(bytes);

        if header.take(4)? != INDEX_MAGIC {
            return Err(IndexError::Corrupt("bad magic".to_string()));
        }
        let version = header.u32()?;
        if version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported format version {}",
                version
            )));
        }
        let flags = header.u32()?;
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(header.take(32)?);
        let payload_len = header.u64()? as usize;
        let body = header.rest();

        let payload = if flags & FLAG_ZSTD != 0 {
            zstd::decode_all(body)
                .map_err(|e| IndexError::Corrupt(format!("decompression failed: {}", e)))?
        } else {
            body.to_vec()
        };

        if payload.len() != payload_len {
            return Err(IndexError::Corrupt(format!(
                "payload is {} bytes, header says {}",
                payload.len(),
                payload_len
            )));
        }
        if blake3::hash(&payload) != blake3::Hash::from(checksum) {
            return Err(IndexError::Corrupt("checksum mismatch".to_string()));
        }

        Self::decode_payload(&payload)
    }

    /// Write the index to `path` atomically (temp file, then rename)
    pub fn save(&self, path: &Path, compress: bool) -> Result<(), IndexError> {
        let bytes = self.to_bytes(compress)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("mcix.tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, path)?;

        tracing::info!(
            "Saved index: {} vectors ({}D) to {} ({} bytes{})",
            self.len(),
            self.dimension,
            path.display(),
            bytes.len(),
            if compress { ", zstd" } else { "" }
        );
        Ok(())
    }

    /// Load an index saved with [`VectorIndex::save`]
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        if !path.exists() {
            return Err(IndexError::NotFound(path.display().to_string()));
        }

        let bytes = fs::read(path)?;
        let index = Self::from_bytes(&bytes)?;

        tracing::info!(
            "Loaded index: {} vectors ({}D, model {}) from {}",
            index.len(),
            index.dimension,
            index.metadata.model,
            path.display()
        );
        Ok(index)
    }

    fn encode_payload(&self) -> Result<Vec<u8>, IndexError> {
        let meta = serde_json::to_vec(&self.metadata)
            .map_err(|e| IndexError::Serialization(e.to_string()))?;

        let mut out =
            Vec::with_capacity(4 + meta.len() + 12 + self.entries.len() * 9 + self.data.len() * 4);
        out.extend_from_slice(&(meta.len() as u32).to_le_bytes());
        out.extend_from_slice(&meta);
        out.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.dimension as u32).to_le_bytes());

        for entry in &self.entries {
            out.push(entry.corpus.as_u8());
            out.extend_from_slice(&(entry.local_position as u64).to_le_bytes());
        }
        for value in &self.data {
            out.extend_from_slice(&value.to_le_bytes());
        }
        Ok(out)
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, IndexError> {
        let mut reader = ByteReader::new(payload);

        let meta_len = reader.u32()? as usize;
        let metadata: IndexMetadata = serde_json::from_slice(reader.take(meta_len)?)
            .map_err(|e| IndexError::Serialization(e.to_string()))?;

        let count = reader.u64()? as usize;
        let dimension = reader.u32()? as usize;

        let needed = dimension
            .checked_mul(4)
            .and_then(|row| row.checked_add(9))
            .and_then(|row| row.checked_mul(count));
        match needed {
            Some(n) if n == reader.remaining() => {}
            _ => {
                return Err(IndexError::Corrupt(format!(
                    "header declares {} vectors of dimension {} but {} payload bytes remain",
                    count,
                    dimension,
                    reader.remaining()
                )))
            }
        }

        let mut items = Vec::with_capacity(count);
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let tag = reader.u8()?;
            let corpus = CorpusId::from_u8(tag)
                .ok_or_else(|| IndexError::Corrupt(format!("unknown corpus tag {}", tag)))?;
            let local_position = reader.u64()? as usize;
            entries.push(EntryRef::new(corpus, local_position));
        }

        for entry in entries {
            let raw = reader.take(dimension * 4)?;
            let vector: Vec<f32> = raw
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            items.push((entry, vector));
        }

        VectorIndex::build(items, metadata)
    }
}

/// Bounds-checked little-endian cursor over a byte slice
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], IndexError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                IndexError::Corrupt(format!(
                    "truncated: wanted {} bytes at offset {}, have {}",
                    n,
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, IndexError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, IndexError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, IndexError> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(arr))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }
}

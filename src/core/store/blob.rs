//! 指纹序列二进制文件
//!
//! ```text
//! 0   magic    b"VFPS"
//! 4   version  u32
//! 8   dim      u32
//! 12  reserved u32
//! 16  frames   u64
//! 24  reserved u64
//! 32  N × D 个 f64，按 (帧, 块) 行优先，小端
//! ```

use super::catalog::VideoId;
use super::write_atomic;
use crate::core::error::{FingerprintError, Result};
use crate::core::fingerprint::{FeatureVector, FingerprintSequence};
use memmap2::Mmap;
use std::fs::File;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

pub const BLOB_MAGIC: &[u8; 4] = b"VFPS";
pub const BLOB_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 32;
const VALUE_LEN: usize = std::mem::size_of::<f64>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub dim: usize,
    pub frames: usize,
}

impl BlobHeader {
    fn file_len(&self) -> usize {
        HEADER_LEN + self.frames * self.dim * VALUE_LEN
    }

    /// 头部里的帧数来自磁盘，可能是任意值，溢出时返回 None
    fn checked_file_len(dim: usize, frames: u64) -> Option<usize> {
        usize::try_from(frames)
            .ok()?
            .checked_mul(dim)?
            .checked_mul(VALUE_LEN)?
            .checked_add(HEADER_LEN)
    }

    fn parse(bytes: &[u8], path: &Path) -> Result<BlobHeader> {
        let corrupt = |reason: &str| {
            FingerprintError::CorruptLibrary(format!("{}: {}", path.display(), reason))
        };

        if bytes.len() < HEADER_LEN || &bytes[0..4] != BLOB_MAGIC {
            return Err(corrupt("not a fingerprint file"));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != BLOB_VERSION {
            return Err(corrupt(&format!("unsupported version {}", version)));
        }
        let dim = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let mut raw_frames = [0u8; 8];
        raw_frames.copy_from_slice(&bytes[16..24]);
        let frames = u64::from_le_bytes(raw_frames);

        let expected = Self::checked_file_len(dim, frames);
        if dim == 0 || expected != Some(bytes.len()) {
            return Err(corrupt(&format!(
                "size {} does not match {} frames × {} values",
                bytes.len(),
                frames,
                dim
            )));
        }
        Ok(BlobHeader {
            dim,
            frames: frames as usize,
        })
    }
}

pub fn encode(sequence: &FingerprintSequence) -> Vec<u8> {
    let header = BlobHeader {
        dim: sequence.dim(),
        frames: sequence.len(),
    };
    let mut bytes = Vec::with_capacity(header.file_len());
    bytes.extend_from_slice(BLOB_MAGIC);
    bytes.extend_from_slice(&BLOB_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(header.dim as u32).to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&(header.frames as u64).to_le_bytes());
    bytes.extend_from_slice(&0u64.to_le_bytes());
    for value in sequence.as_flat() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// 写入临时文件并 rename，读者不会看到写了一半的文件
pub fn write_blob(path: &Path, sequence: &FingerprintSequence) -> Result<()> {
    write_atomic(path, &encode(sequence))
}

/// 映射文件并校验头部
pub fn map_blob(path: &Path) -> Result<(Arc<Mmap>, BlobHeader)> {
    let file = File::open(path).map_err(|e| {
        FingerprintError::CorruptLibrary(format!("{}: {}", path.display(), e))
    })?;
    // 已发布的指纹文件不会再被原地修改
    let map = unsafe { Mmap::map(&file) }.map_err(|e| {
        FingerprintError::CorruptLibrary(format!("{}: mmap failed: {}", path.display(), e))
    })?;
    let header = BlobHeader::parse(&map, path)?;
    Ok((Arc::new(map), header))
}

/// 只读取头部，用于校验
pub fn read_header(path: &Path) -> Result<BlobHeader> {
    map_blob(path).map(|(_, header)| header)
}

/// 指纹序列的只读句柄，多个句柄共享同一块映射
#[derive(Clone)]
pub struct SequenceHandle {
    id: VideoId,
    map: Arc<Mmap>,
    header: BlobHeader,
}

impl std::fmt::Debug for SequenceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceHandle")
            .field("id", &self.id)
            .field("frames", &self.header.frames)
            .field("dim", &self.header.dim)
            .finish()
    }
}

impl SequenceHandle {
    pub(crate) fn new(id: VideoId, map: Arc<Mmap>, header: BlobHeader) -> Self {
        Self { id, map, header }
    }

    pub fn id(&self) -> &VideoId {
        &self.id
    }

    /// 帧数 N
    pub fn len(&self) -> usize {
        self.header.frames
    }

    pub fn is_empty(&self) -> bool {
        self.header.frames == 0
    }

    pub fn dim(&self) -> usize {
        self.header.dim
    }

    #[inline]
    fn frame_bytes(&self, range: Range<usize>) -> &[u8] {
        let row = self.header.dim * VALUE_LEN;
        &self.map[HEADER_LEN + range.start * row..HEADER_LEN + range.end * row]
    }

    fn check_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > self.len() {
            return Err(FingerprintError::dims(
                format!("range within 0..{}", self.len()),
                format!("{:?}", range),
            ));
        }
        Ok(())
    }

    pub fn vector(&self, index: usize) -> Result<FeatureVector> {
        self.check_range(&(index..index + 1))?;
        Ok(FeatureVector::new(decode_values(self.frame_bytes(index..index + 1)).collect()))
    }

    /// 读取一段连续帧，只触及这段映射
    pub fn read(&self, range: Range<usize>) -> Result<FingerprintSequence> {
        self.check_range(&range)?;
        let values = decode_values(self.frame_bytes(range)).collect();
        FingerprintSequence::from_flat(self.header.dim, values)
    }

    pub fn read_all(&self) -> Result<FingerprintSequence> {
        self.read(0..self.len())
    }

    /// 从 offset 开始、长度为 |query| 的窗口与查询的均方差
    pub fn score_at(&self, offset: usize, query: &FingerprintSequence) -> Result<f64> {
        if query.dim() != self.header.dim {
            return Err(FingerprintError::dims(self.header.dim, query.dim()));
        }
        if query.is_empty() {
            return Err(FingerprintError::EmptyQuery);
        }
        let end = offset.saturating_add(query.len());
        self.check_range(&(offset..end))?;
        Ok(self.window_score(offset, query))
    }

    /// `score_at` 的无检查版本，供扫描循环使用
    ///
    /// 调用方保证 `offset + query.len() <= self.len()` 且维度一致。
    pub(crate) fn window_score(&self, offset: usize, query: &FingerprintSequence) -> f64 {
        debug_assert_eq!(query.dim(), self.header.dim);
        debug_assert!(offset + query.len() <= self.len());

        let window = self.frame_bytes(offset..offset + query.len());
        let sum: f64 = decode_values(window)
            .zip(query.as_flat())
            .map(|(stored, &q)| {
                let d = q - stored;
                d * d
            })
            .sum();
        sum / query.as_flat().len() as f64
    }
}

#[inline]
fn decode_values(bytes: &[u8]) -> impl Iterator<Item = f64> + '_ {
    bytes.chunks_exact(VALUE_LEN).map(|chunk| {
        let mut raw = [0u8; VALUE_LEN];
        raw.copy_from_slice(chunk);
        f64::from_le_bytes(raw)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sequence(frames: usize, dim: usize) -> FingerprintSequence {
        let values = (0..frames * dim).map(|i| (i as f64 * 0.37).sin() * 3.0).collect();
        FingerprintSequence::from_flat(dim, values).unwrap()
    }

    fn handle_for(path: &Path) -> SequenceHandle {
        let (map, header) = map_blob(path).unwrap();
        SequenceHandle::new(Uuid::new_v4(), map, header)
    }

    #[test]
    fn test_write_then_read_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.fps");
        let original = sequence(100, 8);
        write_blob(&path, &original).unwrap();

        let handle = handle_for(&path);
        assert_eq!(handle.len(), 100);
        assert_eq!(handle.dim(), 8);
        assert_eq!(handle.read_all().unwrap(), original);
        assert_eq!(handle.read(40..60).unwrap(), original.slice(40..60).unwrap());
        assert_eq!(handle.vector(7).unwrap().as_slice(), original.frame(7));
    }

    #[test]
    fn test_out_of_range_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.fps");
        write_blob(&path, &sequence(10, 8)).unwrap();
        let handle = handle_for(&path);

        assert!(handle.read(5..11).is_err());
        assert!(handle.vector(10).is_err());
        assert!(handle.read(10..10).unwrap().is_empty());
    }

    #[test]
    fn test_window_score() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.fps");
        let stored = sequence(50, 8);
        write_blob(&path, &stored).unwrap();
        let handle = handle_for(&path);

        let query = stored.slice(20..30).unwrap();
        assert_eq!(handle.window_score(20, &query), 0.0);

        let shifted: Vec<f64> = query.as_flat().iter().map(|v| v + 0.5).collect();
        let shifted = FingerprintSequence::from_flat(8, shifted).unwrap();
        assert!((handle.window_score(20, &shifted) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_checked_score_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.fps");
        let stored = sequence(50, 8);
        write_blob(&path, &stored).unwrap();
        let handle = handle_for(&path);

        let query = stored.slice(45..50).unwrap();
        assert_eq!(handle.score_at(45, &query).unwrap(), 0.0);
        assert!(matches!(
            handle.score_at(46, &query),
            Err(FingerprintError::DimensionMismatch { .. })
        ));
        assert!(handle.score_at(usize::MAX, &query).is_err());
        assert!(handle.score_at(0, &sequence(5, 4)).is_err());
        assert!(matches!(
            handle.score_at(0, &FingerprintSequence::new(8)),
            Err(FingerprintError::EmptyQuery)
        ));
    }

    #[test]
    fn test_huge_frame_count_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        for frames in [u64::MAX, u64::MAX / 8 + 1, (u64::MAX - 31) / 64] {
            let path = dir.path().join(format!("{}.fps", frames));
            let mut bytes = encode(&sequence(0, 8));
            bytes[16..24].copy_from_slice(&frames.to_le_bytes());
            std::fs::write(&path, &bytes).unwrap();

            assert!(matches!(
                map_blob(&path),
                Err(FingerprintError::CorruptLibrary(_))
            ));
        }
    }

    #[test]
    fn test_truncated_blob_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.fps");
        let mut bytes = encode(&sequence(10, 8));
        bytes.truncate(bytes.len() - 3);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            map_blob(&path),
            Err(FingerprintError::CorruptLibrary(_))
        ));
    }

    #[test]
    fn test_missing_blob_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_header(&dir.path().join("nope.fps")),
            Err(FingerprintError::CorruptLibrary(_))
        ));
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode(&sequence(3, 8));
        assert_eq!(&bytes[0..4], b"VFPS");
        assert_eq!(bytes.len(), HEADER_LEN + 3 * 8 * 8);
        assert_eq!(u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), 8);
    }
}

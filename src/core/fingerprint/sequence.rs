use crate::core::error::{FingerprintError, Result};
use std::ops::Range;

/// 单帧特征：每个网格块一个值，按行优先排列
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// 一个视频的逐帧特征序列，所有向量维度相同，按 (帧, 块) 行优先平铺存储
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintSequence {
    dim: usize,
    data: Vec<f64>,
}

impl FingerprintSequence {
    pub fn new(dim: usize) -> Self {
        Self::with_capacity(dim, 0)
    }

    pub fn with_capacity(dim: usize, frames: usize) -> Self {
        Self {
            dim,
            data: Vec::with_capacity(dim * frames),
        }
    }

    /// 从平铺数据构造，长度必须是 dim 的整数倍
    pub fn from_flat(dim: usize, data: Vec<f64>) -> Result<Self> {
        if dim == 0 || data.len() % dim != 0 {
            return Err(FingerprintError::dims(
                format!("a multiple of {}", dim),
                format!("{} values", data.len()),
            ));
        }
        Ok(Self { dim, data })
    }

    pub fn from_vectors<I>(dim: usize, vectors: I) -> Result<Self>
    where
        I: IntoIterator<Item = FeatureVector>,
    {
        let mut sequence = Self::new(dim);
        for vector in vectors {
            sequence.push(&vector)?;
        }
        Ok(sequence)
    }

    pub fn push(&mut self, vector: &FeatureVector) -> Result<()> {
        if vector.len() != self.dim {
            return Err(FingerprintError::dims(self.dim, vector.len()));
        }
        self.data.extend_from_slice(vector.as_slice());
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// 帧数
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn frame(&self, index: usize) -> &[f64] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn frames(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.data.chunks_exact(self.dim.max(1))
    }

    pub fn as_flat(&self) -> &[f64] {
        &self.data
    }

    /// 复制一段连续帧
    pub fn slice(&self, range: Range<usize>) -> Result<FingerprintSequence> {
        if range.start > range.end || range.end > self.len() {
            return Err(FingerprintError::dims(
                format!("range within 0..{}", self.len()),
                format!("{:?}", range),
            ));
        }
        Ok(Self {
            dim: self.dim,
            data: self.data[range.start * self.dim..range.end * self.dim].to_vec(),
        })
    }

    /// 按采样率换算的时长（秒）
    pub fn duration_secs(&self, sample_rate: f64) -> f64 {
        self.len() as f64 / sample_rate
    }
}

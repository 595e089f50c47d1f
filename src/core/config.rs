//! 指纹与检索配置
//!
//! 采样率、标准分辨率、网格划分决定了特征向量的维度和含义，修改任意一项都会让
//! 已有的指纹库失效。指纹库在目录中记录自己的 [`FingerprintParams`]，
//! 用不同参数打开时会返回 `ParamsMismatch`。

use crate::core::error::{FingerprintError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// 指纹参数（全局固定）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintParams {
    /// 每秒采样帧数
    pub sample_rate: f64,
    /// 标准化宽度
    pub width: u32,
    /// 标准化高度
    pub height: u32,
    /// 网格行数
    pub rows: u32,
    /// 网格列数
    pub cols: u32,
}

impl Default for FingerprintParams {
    fn default() -> Self {
        Self {
            sample_rate: 10.0,
            width: 320,
            height: 240,
            rows: 2,
            cols: 4,
        }
    }
}

impl FingerprintParams {
    /// 特征维度 = 行 × 列
    pub fn dim(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    pub fn block_size(&self) -> (u32, u32) {
        (self.width / self.cols.max(1), self.height / self.rows.max(1))
    }

    /// 帧序号 -> 秒
    pub fn timestamp_of(&self, index: usize) -> f64 {
        index as f64 / self.sample_rate
    }

    pub fn validate(&self) -> Result<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(FingerprintError::InvalidConfig(format!(
                "sample_rate must be a positive number, got {}",
                self.sample_rate
            )));
        }
        if self.rows == 0 || self.cols == 0 {
            return Err(FingerprintError::InvalidConfig(format!(
                "grid must be non-empty, got {}x{}",
                self.rows, self.cols
            )));
        }
        if self.width % self.cols != 0 || self.height % self.rows != 0 {
            return Err(FingerprintError::InvalidConfig(format!(
                "{}x{} is not divisible by a {}x{} grid",
                self.width, self.height, self.rows, self.cols
            )));
        }
        let (block_w, block_h) = self.block_size();
        if block_w < 2 || block_h < 2 {
            return Err(FingerprintError::InvalidConfig(format!(
                "blocks of {}x{} px are too small",
                block_w, block_h
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FingerprintParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}fps {}x{} grid {}x{}",
            self.sample_rate, self.width, self.height, self.rows, self.cols
        )
    }
}

/// 检索时遇到损坏条目的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptPolicy {
    /// 整次检索失败
    #[default]
    Fail,
    /// 记录警告并跳过，跳过的 id 会出现在结果里
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// 最佳得分 <= threshold 才算命中
    pub threshold: f64,
    /// 得分 <= early_stop 时立即停止扫描
    pub early_stop: f64,
    pub corrupt_policy: CorruptPolicy,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            early_stop: 0.01,
            corrupt_policy: CorruptPolicy::Fail,
        }
    }
}

impl SearchParams {
    pub fn with_thresholds(threshold: f64, early_stop: f64) -> Self {
        Self {
            threshold,
            early_stop,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("threshold", self.threshold), ("early_stop", self.early_stop)] {
            if value.is_nan() || value < 0.0 {
                return Err(FingerprintError::InvalidConfig(format!(
                    "{} must be >= 0, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// 指纹库目录（catalog.json + fingerprints/）
    pub library_dir: PathBuf,
    pub fingerprint: FingerprintParams,
    pub search: SearchParams,
    /// 每批并行提取的帧数
    pub extract_batch: usize,
    /// 检索线程数
    pub scan_threads: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            library_dir: PathBuf::from("./data/video_db"),
            fingerprint: FingerprintParams::default(),
            search: SearchParams::default(),
            extract_batch: 64,
            scan_threads: num_cpus::get(),
        }
    }
}

impl MatcherConfig {
    pub fn with_library_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: MatcherConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.fingerprint.validate()?;
        self.search.validate()?;
        if self.extract_batch == 0 {
            return Err(FingerprintError::InvalidConfig(
                "extract_batch must be > 0".to_string(),
            ));
        }
        if self.scan_threads == 0 {
            return Err(FingerprintError::InvalidConfig(
                "scan_threads must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

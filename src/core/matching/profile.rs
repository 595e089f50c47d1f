//! 单个视频上每个起点的得分曲线，用于诊断和画图

use crate::core::error::{FingerprintError, Result};
use crate::core::fingerprint::FingerprintSequence;
use crate::core::store::SequenceHandle;
use rayon::prelude::*;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreProfile {
    /// scores[i] 为起点 i 的窗口得分
    pub scores: Vec<f64>,
}

impl ScoreProfile {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// 最低分及其起点，并列取最早的
    pub fn best(&self) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (offset, &score) in self.scores.iter().enumerate() {
            if best.map_or(!score.is_nan(), |(_, current)| score < current) {
                best = Some((offset, score));
            }
        }
        best
    }

    /// 得分 <= threshold 的所有起点
    pub fn below(&self, threshold: f64) -> Vec<usize> {
        self.scores
            .iter()
            .enumerate()
            .filter(|(_, &score)| score <= threshold)
            .map(|(offset, _)| offset)
            .collect()
    }
}

/// 不提前停止，计算所有起点的得分
pub fn score_profile(query: &FingerprintSequence, handle: &SequenceHandle) -> Result<ScoreProfile> {
    if query.is_empty() {
        return Err(FingerprintError::EmptyQuery);
    }
    if query.dim() != handle.dim() {
        return Err(FingerprintError::dims(handle.dim(), query.dim()));
    }
    if handle.len() < query.len() {
        return Ok(ScoreProfile { scores: Vec::new() });
    }

    let scores = (0..=handle.len() - query.len())
        .into_par_iter()
        .map(|offset| handle.window_score(offset, query))
        .collect();
    Ok(ScoreProfile { scores })
}

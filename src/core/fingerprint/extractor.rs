//! 网格梯度方向质心特征
//!
//! 1. 整帧用 3×3 Sobel 算子求 Gx、Gy（边界按 101 方式镜像：-1 -> 1）
//! 2. 每个像素 r = sqrt(Gx² + Gy²)，θ = atan2(Gy, Gx)
//! 3. 每个网格块取 Σ(r·θ) / Σr，Σr 为 0 的块记为 0
//!
//! 这里是对角度的直接加权平均而不是圆周平均，θ 在 ±π 附近不连续。
//! 现有阈值是按这个行为调出来的，不要改成圆周平均。

use super::sequence::FeatureVector;
use crate::core::config::FingerprintParams;
use crate::core::error::{FingerprintError, Result};
use crate::core::video::GrayFrame;
use rayon::prelude::*;

pub struct FeatureExtractor {
    params: FingerprintParams,
}

impl FeatureExtractor {
    pub fn new(params: FingerprintParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &FingerprintParams {
        &self.params
    }

    pub fn dim(&self) -> usize {
        self.params.dim()
    }

    /// 单帧 -> 特征向量
    pub fn extract(&self, frame: &GrayFrame) -> Result<FeatureVector> {
        let p = &self.params;
        if frame.width != p.width || frame.height != p.height || frame.data.len() != frame.pixel_count() {
            return Err(FingerprintError::dims(
                format!("{}x{}", p.width, p.height),
                format!("{}x{}", frame.width, frame.height),
            ));
        }

        let w = p.width as usize;
        let h = p.height as usize;
        let cols = p.cols as usize;
        let (block_w, block_h) = p.block_size();
        let (block_w, block_h) = (block_w as usize, block_h as usize);

        let left: Vec<usize> = (0..w).map(|x| reflect_101(x as isize - 1, w)).collect();
        let right: Vec<usize> = (0..w).map(|x| reflect_101(x as isize + 1, w)).collect();

        let mut weighted = vec![0.0f64; p.dim()];
        let mut magnitude = vec![0.0f64; p.dim()];
        let px = |x: usize, y: usize| frame.data[y * w + x] as i32;

        for y in 0..h {
            let up = reflect_101(y as isize - 1, h);
            let down = reflect_101(y as isize + 1, h);
            let block_row = (y / block_h) * cols;

            for x in 0..w {
                let (l, r) = (left[x], right[x]);

                let gx = (px(r, up) + 2 * px(r, y) + px(r, down))
                    - (px(l, up) + 2 * px(l, y) + px(l, down));
                let gy = (px(l, down) + 2 * px(x, down) + px(r, down))
                    - (px(l, up) + 2 * px(x, up) + px(r, up));

                if gx == 0 && gy == 0 {
                    continue;
                }

                let (gx, gy) = (gx as f64, gy as f64);
                let r_mag = (gx * gx + gy * gy).sqrt();
                let theta = gy.atan2(gx);

                let block = block_row + x / block_w;
                weighted[block] += r_mag * theta;
                magnitude[block] += r_mag;
            }
        }

        let values = weighted
            .iter()
            .zip(magnitude.iter())
            .map(|(&num, &den)| if den == 0.0 { 0.0 } else { num / den })
            .collect();

        Ok(FeatureVector::new(values))
    }

    /// 并行提取一批帧，输出顺序与输入一致
    pub fn extract_batch(&self, frames: &[GrayFrame]) -> Result<Vec<FeatureVector>> {
        frames.par_iter().map(|f| self.extract(f)).collect()
    }
}

/// 边界镜像，不重复边缘像素：-1 -> 1, n -> n - 2
#[inline]
fn reflect_101(i: isize, n: usize) -> usize {
    let n = n as isize;
    if n == 1 {
        return 0;
    }
    let reflected = if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    };
    reflected as usize
}

//! 视频片段检索入口
//!
//! 入库：抽帧 → 特征提取 → 写入指纹库；
//! 检索：抽帧 → 特征提取 → 在指纹库中滑窗匹配。
//!
//! ```ignore
//! let matcher = VideoMatcher::open(MatcherConfig::with_library_dir("./data/video_db"))?;
//! let record = matcher.ingest(&FfmpegSource::new("movie.mp4"), None)?;
//! let report = matcher.search_default(&FfmpegSource::new("clip.mp4"))?;
//! ```

use crate::api::models::library::LibraryStatus;
use crate::core::config::{MatcherConfig, SearchParams};
use crate::core::error::{FingerprintError, Result};
use crate::core::fingerprint::{FeatureExtractor, FingerprintSequence};
use crate::core::matching::{MatchEngine, SearchReport};
use crate::core::store::{FingerprintStore, LibraryIssue, VideoId, VideoRecord};
use crate::core::video::{FrameSampler, GrayFrame, VideoSource};
use crate::core::visualize;
use image::RgbImage;
use log::{debug, error, info};
use std::time::Instant;

const UNTITLED: &str = "untitled";

pub struct VideoMatcher {
    config: MatcherConfig,
    sampler: FrameSampler,
    extractor: FeatureExtractor,
    store: FingerprintStore,
    engine: MatchEngine,
}

impl VideoMatcher {
    /// 校验配置并打开（或新建）指纹库
    pub fn open(config: MatcherConfig) -> Result<Self> {
        config.validate()?;
        let params = config.fingerprint;
        let store = FingerprintStore::new(&config.library_dir, params)?;
        let engine = MatchEngine::new(config.scan_threads)?;

        info!(
            "🎬 VideoMatcher: opened {} ({} videos, {}, {} scan threads)",
            store.root().display(),
            store.len(),
            params,
            engine.threads()
        );

        Ok(Self {
            sampler: FrameSampler::new(params),
            extractor: FeatureExtractor::new(params),
            store,
            engine,
            config,
        })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// 抽帧并提取整段指纹序列，不写入指纹库
    pub fn fingerprint(&self, source: &dyn VideoSource) -> Result<FingerprintSequence> {
        let started = Instant::now();
        let batch_size = self.config.extract_batch;
        let mut sequence = FingerprintSequence::new(self.extractor.dim());
        let mut batch = Vec::with_capacity(batch_size);

        let mut frames = self.sampler.sample(source)?;
        for frame in frames.by_ref() {
            batch.push(frame?);
            if batch.len() == batch_size {
                self.extract_into(&mut sequence, &batch)?;
                batch.clear();
            }
        }
        self.extract_into(&mut sequence, &batch)?;

        debug!(
            "Fingerprinted {} frames ({} skipped) in {:?}",
            frames.emitted(),
            frames.skipped(),
            started.elapsed()
        );
        Ok(sequence)
    }

    fn extract_into(&self, sequence: &mut FingerprintSequence, batch: &[GrayFrame]) -> Result<()> {
        for vector in self.extractor.extract_batch(batch)? {
            sequence.push(&vector)?;
        }
        Ok(())
    }

    /// 入库一个视频；任何一步失败都不会留下记录
    pub fn ingest(&self, source: &dyn VideoSource, name: Option<&str>) -> Result<VideoRecord> {
        let name = name
            .map(str::to_string)
            .or_else(|| source.display_name())
            .unwrap_or_else(|| UNTITLED.to_string());
        info!("📥 Ingesting '{}'...", name);

        let sequence = self.fingerprint(source).map_err(|e| {
            error!("❌ Ingest '{}' failed: {}", name, e);
            e
        })?;
        info!("🎞️ Sampled {} frames from '{}'", sequence.len(), name);

        let duration = sequence.duration_secs(self.config.fingerprint.sample_rate);
        self.store
            .append_record(&name, &sequence, duration, source.location())
            .map_err(|e| {
                error!("❌ Saving '{}' failed: {}", name, e);
                e
            })
    }

    /// 用查询视频在指纹库中检索
    pub fn search(&self, source: &dyn VideoSource, threshold: f64, early_stop: f64) -> Result<SearchReport> {
        let params = SearchParams {
            threshold,
            early_stop,
            corrupt_policy: self.config.search.corrupt_policy,
        };
        self.search_with(source, &params)
    }

    /// 使用配置中的阈值检索
    pub fn search_default(&self, source: &dyn VideoSource) -> Result<SearchReport> {
        let params = self.config.search;
        self.search_with(source, &params)
    }

    fn search_with(&self, source: &dyn VideoSource, params: &SearchParams) -> Result<SearchReport> {
        params.validate()?;

        let query = match self.fingerprint(source) {
            Ok(query) => query,
            Err(FingerprintError::EmptySequence) => {
                error!("❌ Search failed: query video has no frames");
                return Err(FingerprintError::EmptyQuery);
            }
            Err(e) => {
                error!("❌ Search failed while reading query: {}", e);
                return Err(e);
            }
        };

        let report = self.engine.search(&query, &self.store, params).map_err(|e| {
            error!("❌ Search failed: {}", e);
            e
        })?;

        match report.outcome.matched() {
            Some(hit) => info!(
                "🎯 Matched '{}' at {:.1}s (score {:.4}) in {:?}",
                hit.video_name, hit.timestamp_secs, hit.score, report.elapsed
            ),
            None => info!("🤷 No match among {} videos in {:?}", report.videos, report.elapsed),
        }
        Ok(report)
    }

    pub fn list_library(&self) -> Vec<VideoRecord> {
        self.store.list()
    }

    pub fn remove_video(&self, id: &VideoId) -> Result<VideoRecord> {
        self.store.remove(id).map_err(|e| {
            error!("❌ Remove {} failed: {}", id, e);
            e
        })
    }

    pub fn status(&self) -> LibraryStatus {
        LibraryStatus::from_records(&self.store.list())
    }

    /// 检查每条记录的指纹文件是否完好
    pub fn verify_library(&self) -> Vec<LibraryIssue> {
        self.store.verify()
    }

    /// 把库中某帧的指纹画到对应画面上
    pub fn inspect_frame(&self, id: &VideoId, index: usize, frame: &GrayFrame) -> Result<RgbImage> {
        let params = &self.config.fingerprint;
        let vector = self.store.open(id)?.vector(index)?;
        let frame = frame.resize_to(params.width, params.height)?;
        visualize::render_overlay(&frame, &vector, params)
    }
}

impl Drop for VideoMatcher {
    fn drop(&mut self) {
        info!("🗑️ VideoMatcher: released");
    }
}

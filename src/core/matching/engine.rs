//! 滑动窗口检索
//!
//! 对库中每个视频，在每个合法起点 0..=N-K 上计算窗口与查询的均方差，取全局最小值。
//! 一旦出现 <= early_stop 的得分就停止扫描并返回当前最优：这只是“足够好”的结果，
//! 不保证是全局最小。
//!
//! 各视频的扫描互相独立，在线程池里并行执行，再按 catalog 顺序归并，
//! 结果与顺序扫描一致（包括提前停止和并列时取先遇到的一个）。

use crate::core::config::{CorruptPolicy, SearchParams};
use crate::core::error::{FingerprintError, Result};
use crate::core::fingerprint::FingerprintSequence;
use crate::core::store::{SequenceLibrary, VideoId, VideoRecord};
use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// 每扫描这么多个起点检查一次是否已被更靠前的视频提前停止
const ABANDON_CHECK_INTERVAL: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub video_id: VideoId,
    pub video_name: String,
    /// 窗口起点（采样帧序号）
    pub offset: usize,
    /// offset / 采样率
    pub timestamp_secs: f64,
    /// 0 表示完全一致
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Match(MatchResult),
    /// 没有得分 <= threshold 的窗口；best 为扫描到的最低分
    NoMatch { best: Option<f64> },
    /// 库里没有视频，和 NoMatch 同样对待
    EmptyLibrary,
}

impl SearchOutcome {
    pub fn matched(&self) -> Option<&MatchResult> {
        match self {
            SearchOutcome::Match(result) => Some(result),
            _ => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, SearchOutcome::Match(_))
    }
}

/// 被跳过的损坏条目
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedVideo {
    pub id: VideoId,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct SearchReport {
    pub outcome: SearchOutcome,
    /// 快照中的视频数
    pub videos: usize,
    pub early_stopped: bool,
    pub skipped: Vec<SkippedVideo>,
    pub elapsed: Duration,
}

enum VideoScan {
    /// 更靠前的视频已提前停止，本视频结果不会被用到
    Abandoned,
    /// 快照之后被删除
    Vanished,
    Corrupt(String),
    Scanned {
        best: Option<(usize, f64)>,
        stopped: bool,
    },
}

pub struct MatchEngine {
    pool: ThreadPool,
}

impl MatchEngine {
    pub fn new(scan_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(scan_threads.max(1))
            .thread_name(|i| format!("clip-scan-{}", i))
            .build()
            .map_err(|e| FingerprintError::InvalidConfig(format!("scan pool: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn search<L>(
        &self,
        query: &FingerprintSequence,
        library: &L,
        params: &SearchParams,
    ) -> Result<SearchReport>
    where
        L: SequenceLibrary + ?Sized,
    {
        let started = Instant::now();
        if query.is_empty() {
            return Err(FingerprintError::EmptyQuery);
        }
        let dim = library.params().dim();
        if query.dim() != dim {
            return Err(FingerprintError::dims(dim, query.dim()));
        }

        let records = library.snapshot();
        if records.is_empty() {
            info!("📭 Search skipped: library is empty");
            return Ok(SearchReport {
                outcome: SearchOutcome::EmptyLibrary,
                videos: 0,
                early_stopped: false,
                skipped: Vec::new(),
                elapsed: started.elapsed(),
            });
        }

        info!("🔍 Searching {} videos with a {}-frame query...", records.len(), query.len());

        let stop_at = AtomicUsize::new(usize::MAX);
        let scans: Vec<VideoScan> = self.pool.install(|| {
            records
                .par_iter()
                .enumerate()
                .map(|(index, record)| {
                    scan_video(index, record, query, library, params.early_stop, &stop_at)
                })
                .collect()
        });

        let mut best: Option<(usize, usize, f64)> = None;
        let mut early_stopped = false;
        let mut skipped = Vec::new();

        for (index, scan) in scans.into_iter().enumerate() {
            let record = &records[index];
            match scan {
                VideoScan::Abandoned => {}
                VideoScan::Vanished => {
                    debug!("Video {} was removed during search", record.id);
                }
                VideoScan::Corrupt(reason) => match params.corrupt_policy {
                    CorruptPolicy::Fail => {
                        return Err(FingerprintError::CorruptLibrary(format!(
                            "'{}' ({}): {}",
                            record.name, record.id, reason
                        )));
                    }
                    CorruptPolicy::Skip => {
                        warn!("⚠️ Skipping corrupt video '{}' ({}): {}", record.name, record.id, reason);
                        skipped.push(SkippedVideo {
                            id: record.id,
                            reason,
                        });
                    }
                },
                VideoScan::Scanned { best: video_best, stopped } => {
                    if let Some((offset, score)) = video_best {
                        if best.map_or(true, |(_, _, current)| score < current) {
                            best = Some((index, offset, score));
                        }
                    }
                    if stopped {
                        early_stopped = true;
                        break;
                    }
                }
            }
        }

        let sample_rate = library.params().sample_rate;
        let outcome = match best {
            Some((index, offset, score)) if score <= params.threshold => {
                let record = &records[index];
                SearchOutcome::Match(MatchResult {
                    video_id: record.id,
                    video_name: record.name.clone(),
                    offset,
                    timestamp_secs: offset as f64 / sample_rate,
                    score,
                })
            }
            Some((_, _, score)) => SearchOutcome::NoMatch { best: Some(score) },
            None => SearchOutcome::NoMatch { best: None },
        };

        let elapsed = started.elapsed();
        info!(
            "Search finished in {:.2}s (early stop: {}, skipped: {})",
            elapsed.as_secs_f64(),
            early_stopped,
            skipped.len()
        );

        Ok(SearchReport {
            outcome,
            videos: records.len(),
            early_stopped,
            skipped,
            elapsed,
        })
    }
}

fn scan_video<L>(
    index: usize,
    record: &VideoRecord,
    query: &FingerprintSequence,
    library: &L,
    early_stop: f64,
    stop_at: &AtomicUsize,
) -> VideoScan
where
    L: SequenceLibrary + ?Sized,
{
    if index > stop_at.load(Ordering::Acquire) {
        return VideoScan::Abandoned;
    }

    let handle = match library.open(&record.id) {
        Ok(handle) => handle,
        Err(FingerprintError::NotFound(_)) => return VideoScan::Vanished,
        Err(e) => return VideoScan::Corrupt(e.to_string()),
    };
    if handle.dim() != query.dim() {
        return VideoScan::Corrupt(format!("dimension {} != {}", handle.dim(), query.dim()));
    }

    let k = query.len();
    let n = handle.len();
    if n < k {
        debug!("'{}' has {} frames, shorter than the query", record.name, n);
        return VideoScan::Scanned {
            best: None,
            stopped: false,
        };
    }

    let mut best: Option<(usize, f64)> = None;
    for offset in 0..=n - k {
        if offset % ABANDON_CHECK_INTERVAL == 0 && offset > 0 && index > stop_at.load(Ordering::Acquire) {
            return VideoScan::Abandoned;
        }

        let score = handle.window_score(offset, query);
        if best.map_or(true, |(_, current)| score < current) {
            best = Some((offset, score));
            if score <= early_stop {
                stop_at.fetch_min(index, Ordering::AcqRel);
                debug!("Early stop in '{}' at offset {} (score {:.5})", record.name, offset, score);
                return VideoScan::Scanned { best, stopped: true };
            }
        }
    }

    VideoScan::Scanned { best, stopped: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FingerprintParams;
    use crate::core::store::{FingerprintStore, SequenceHandle};
    use std::fs;

    fn wave(frames: usize, phase: f64) -> FingerprintSequence {
        let values = (0..frames * 8)
            .map(|i| ((i as f64) * 0.173 + phase).sin() * 2.5)
            .collect();
        FingerprintSequence::from_flat(8, values).unwrap()
    }

    fn constant(frames: usize, value: f64) -> FingerprintSequence {
        FingerprintSequence::from_flat(8, vec![value; frames * 8]).unwrap()
    }

    fn store() -> (tempfile::TempDir, FingerprintStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::new(dir.path(), FingerprintParams::default()).unwrap();
        (dir, store)
    }

    fn engine() -> MatchEngine {
        MatchEngine::new(4).unwrap()
    }

    #[test]
    fn test_self_match_at_correct_offset() {
        let (_dir, store) = store();
        let other = wave(80, 1.3);
        let target = wave(100, 0.0);
        store.append("other", &other, 8.0).unwrap();
        let id = store.append("target", &target, 10.0).unwrap();

        let query = target.slice(40..60).unwrap();
        let report = engine()
            .search(&query, &store, &SearchParams::with_thresholds(0.4, 0.0))
            .unwrap();

        let result = report.outcome.matched().unwrap();
        assert_eq!(result.video_id, id);
        assert_eq!(result.video_name, "target");
        assert_eq!(result.offset, 40);
        assert!((result.timestamp_secs - 4.0).abs() < 1e-9);
        assert!(result.score <= 1e-12);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let (_dir, store) = store();
        store.append("zeros", &constant(10, 0.0), 1.0).unwrap();

        // 每个分量差 0.5，得分恰好 0.25
        let query = constant(4, 0.5);
        let engine = engine();

        let at = engine
            .search(&query, &store, &SearchParams::with_thresholds(0.25, 0.0))
            .unwrap();
        assert!(at.outcome.is_match());
        assert_eq!(at.outcome.matched().unwrap().score, 0.25);

        let below = engine
            .search(&query, &store, &SearchParams::with_thresholds(0.2499, 0.0))
            .unwrap();
        assert_eq!(below.outcome, SearchOutcome::NoMatch { best: Some(0.25) });
    }

    #[test]
    fn test_early_stop_returns_good_enough_result() {
        let (_dir, store) = store();
        // 第一个视频的 offset 0 得分 0.01，第二个视频完全一致
        store.append("close", &constant(5, 0.1), 0.5).unwrap();
        store.append("exact", &constant(5, 0.0), 0.5).unwrap();

        let query = constant(3, 0.0);
        let report = engine()
            .search(&query, &store, &SearchParams::with_thresholds(0.4, 0.02))
            .unwrap();

        assert!(report.early_stopped);
        let result = report.outcome.matched().unwrap();
        assert!(result.score <= 0.02);
        assert_eq!(result.video_name, "close");
        assert_eq!(result.offset, 0);
    }

    #[test]
    fn test_without_early_stop_finds_global_minimum() {
        let (_dir, store) = store();
        store.append("close", &constant(5, 0.1), 0.5).unwrap();
        store.append("exact", &constant(5, 0.0), 0.5).unwrap();

        let query = constant(3, 0.0);
        let report = engine()
            .search(&query, &store, &SearchParams::with_thresholds(0.4, 0.0))
            .unwrap();
        let result = report.outcome.matched().unwrap();
        assert_eq!(result.video_name, "exact");
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_ties_keep_first_in_catalog_order() {
        let (_dir, store) = store();
        store.append("first", &constant(6, 1.0), 0.6).unwrap();
        store.append("second", &constant(6, 1.0), 0.6).unwrap();

        let query = constant(2, 0.9);
        for _ in 0..5 {
            let report = engine()
                .search(&query, &store, &SearchParams::with_thresholds(0.4, 0.0))
                .unwrap();
            let result = report.outcome.matched().unwrap();
            assert_eq!(result.video_name, "first");
            assert_eq!(result.offset, 0);
        }
    }

    #[test]
    fn test_short_videos_yield_no_candidates() {
        let (_dir, store) = store();
        store.append("short", &wave(5, 0.0), 0.5).unwrap();

        let report = engine()
            .search(&wave(10, 0.0), &store, &SearchParams::default())
            .unwrap();
        assert_eq!(report.outcome, SearchOutcome::NoMatch { best: None });
    }

    #[test]
    fn test_empty_library_is_not_an_error() {
        let (_dir, store) = store();
        let report = engine()
            .search(&wave(10, 0.0), &store, &SearchParams::default())
            .unwrap();
        assert_eq!(report.outcome, SearchOutcome::EmptyLibrary);
        assert_eq!(report.videos, 0);
    }

    #[test]
    fn test_empty_query_rejected() {
        let (_dir, store) = store();
        let result = engine().search(&FingerprintSequence::new(8), &store, &SearchParams::default());
        assert!(matches!(result, Err(FingerprintError::EmptyQuery)));
    }

    #[test]
    fn test_query_dimension_checked() {
        let (_dir, store) = store();
        store.append("a", &wave(10, 0.0), 1.0).unwrap();
        let query = FingerprintSequence::from_flat(4, vec![0.0; 8]).unwrap();
        let result = engine().search(&query, &store, &SearchParams::default());
        assert!(matches!(result, Err(FingerprintError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_corrupt_entry_policy() {
        let (dir, store) = store();
        let broken = store.append("broken", &wave(20, 0.0), 2.0).unwrap();
        let target = wave(30, 0.7);
        store.append("fine", &target, 3.0).unwrap();

        let blob = store.get(&broken).unwrap().blob;
        fs::remove_file(dir.path().join("fingerprints").join(blob)).unwrap();

        let query = target.slice(5..15).unwrap();
        let failed = engine().search(&query, &store, &SearchParams::default());
        assert!(matches!(failed, Err(FingerprintError::CorruptLibrary(_))));

        let lenient = SearchParams {
            corrupt_policy: CorruptPolicy::Skip,
            ..SearchParams::default()
        };
        let report = engine().search(&query, &store, &lenient).unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].id, broken);
        assert_eq!(report.outcome.matched().unwrap().video_name, "fine");
    }

    /// 取完快照后立刻删除一个视频，模拟检索期间的并发删除
    struct RemoveAfterSnapshot<'a> {
        store: &'a FingerprintStore,
        victim: VideoId,
    }

    impl SequenceLibrary for RemoveAfterSnapshot<'_> {
        fn params(&self) -> &FingerprintParams {
            self.store.params()
        }

        fn snapshot(&self) -> Vec<VideoRecord> {
            let records = self.store.list();
            self.store.remove(&self.victim).unwrap();
            records
        }

        fn open(&self, id: &VideoId) -> Result<SequenceHandle> {
            self.store.open(id)
        }
    }

    #[test]
    fn test_video_removed_during_search_is_skipped() {
        let (_dir, store) = store();
        let gone = store.append("gone", &wave(40, 0.0), 4.0).unwrap();
        let target = wave(50, 2.1);
        store.append("kept", &target, 5.0).unwrap();

        let library = RemoveAfterSnapshot {
            store: &store,
            victim: gone,
        };
        // 默认策略遇到损坏条目会失败，这里必须成功
        let query = target.slice(20..30).unwrap();
        let report = engine()
            .search(&query, &library, &SearchParams::default())
            .unwrap();

        assert_eq!(report.videos, 2);
        assert!(report.skipped.is_empty());
        let result = report.outcome.matched().unwrap();
        assert_eq!(result.video_name, "kept");
        assert_eq!(result.offset, 20);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_append_while_searching_never_sees_partial_blobs() {
        let (_dir, store) = store();
        let first = wave(40, 0.0);
        store.append("v0", &first, 4.0).unwrap();
        let query = first.slice(5..15).unwrap();
        let engine = engine();
        let done = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 1..16 {
                    let sequence = wave(40 + i, i as f64 * 0.45);
                    store.append(&format!("v{}", i), &sequence, 4.0).unwrap();
                }
                done.store(true, Ordering::Release);
            });

            let mut searches = 0;
            while !done.load(Ordering::Acquire) || searches == 0 {
                let report = engine
                    .search(&query, &store, &SearchParams::with_thresholds(0.4, 0.0))
                    .unwrap();
                assert!(report.skipped.is_empty());
                assert_eq!(report.outcome.matched().unwrap().video_name, "v0");
                searches += 1;
            }
        });

        assert_eq!(store.len(), 16);
        assert!(store.verify().is_empty());
    }

    #[test]
    fn test_parallel_matches_single_thread() {
        let (_dir, store) = store();
        for i in 0..6 {
            store.append(&format!("v{}", i), &wave(60 + i * 7, i as f64 * 0.9), 6.0).unwrap();
        }
        let query = wave(60 + 3 * 7, 3.0 * 0.9).slice(11..31).unwrap();
        let single = MatchEngine::new(1).unwrap();
        let parallel = MatchEngine::new(4).unwrap();

        let exhaustive = SearchParams::with_thresholds(0.4, 0.0);
        let a = single.search(&query, &store, &exhaustive).unwrap();
        let b = parallel.search(&query, &store, &exhaustive).unwrap();
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(a.outcome.matched().unwrap().video_name, "v3");
        assert_eq!(a.outcome.matched().unwrap().offset, 11);

        let loose = SearchParams::with_thresholds(0.4, 0.3);
        let a = single.search(&query, &store, &loose).unwrap();
        let b = parallel.search(&query, &store, &loose).unwrap();
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(a.early_stopped, b.early_stopped);
    }
}

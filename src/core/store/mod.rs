//! 指纹库持久化
//!
//! 目录结构：
//! - `catalog.json`：参数集与视频元数据（入库顺序）
//! - `fingerprints/<id>.fps`：每个视频一个指纹文件，发布后不再修改

pub mod blob;
pub mod catalog;
pub mod library;

pub use blob::SequenceHandle;
pub use catalog::{Catalog, VideoId, VideoRecord};
pub use library::{FingerprintStore, LibraryIssue, RecoveryReport};

use crate::core::config::FingerprintParams;
use crate::core::error::Result;
use log::warn;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// 检索引擎看到的指纹库
pub trait SequenceLibrary: Sync {
    fn params(&self) -> &FingerprintParams;

    /// 当前视频列表的快照，按入库顺序
    fn snapshot(&self) -> Vec<VideoRecord>;

    fn open(&self, id: &VideoId) -> Result<SequenceHandle>;
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// 先写 `<path>.tmp` 并落盘，再 rename 覆盖目标
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });

    if let Err(e) = written.and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    sync_parent(path);
    Ok(())
}

/// rename 之后同步所在目录，掉电后目录项也按写入顺序落盘。
/// 此时新内容已经可见，同步失败只记录警告。
fn sync_parent(path: &Path) {
    #[cfg(unix)]
    {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
            warn!("⚠️ Failed to sync directory {}: {}", parent.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

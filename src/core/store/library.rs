use super::blob::{self, SequenceHandle};
use super::catalog::{Catalog, VideoId, VideoRecord};
use super::SequenceLibrary;
use crate::core::config::FingerprintParams;
use crate::core::error::{FingerprintError, Result};
use crate::core::fingerprint::FingerprintSequence;
use log::{debug, info, warn};
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

const CATALOG_FILE: &str = "catalog.json";
const FINGERPRINT_DIR: &str = "fingerprints";
const BLOB_EXT: &str = "fps";

/// 打开指纹库时的清理结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// 删除的 *.tmp 文件
    pub stale_tmp: usize,
    /// 删除的无主指纹文件（写完 blob 但目录未发布）
    pub orphans: usize,
}

/// `verify` 发现的问题
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryIssue {
    pub id: VideoId,
    pub name: String,
    pub reason: String,
}

/// 指纹库：catalog 是唯一的可变共享状态，写操作互斥，读操作取快照后释放锁。
/// 已发布的指纹文件只读映射，映射按 id 缓存并由所有句柄共享。
pub struct FingerprintStore {
    root: PathBuf,
    params: FingerprintParams,
    catalog: RwLock<Catalog>,
    arena: RwLock<HashMap<VideoId, (Arc<Mmap>, blob::BlobHeader)>>,
}

impl FingerprintStore {
    /// 打开（或新建）指纹库目录
    pub fn new(root: impl Into<PathBuf>, params: FingerprintParams) -> Result<Self> {
        params.validate()?;
        let root = root.into();
        fs::create_dir_all(root.join(FINGERPRINT_DIR))?;

        let catalog_path = root.join(CATALOG_FILE);
        let catalog = match Catalog::load(&catalog_path)? {
            Some(catalog) => {
                if catalog.params() != &params {
                    return Err(FingerprintError::ParamsMismatch {
                        library: catalog.params().to_string(),
                        requested: params.to_string(),
                    });
                }
                catalog
            }
            None => {
                let catalog = Catalog::new(params);
                catalog.save(&catalog_path)?;
                catalog
            }
        };

        let store = Self {
            root,
            params,
            catalog: RwLock::new(catalog),
            arena: RwLock::new(HashMap::new()),
        };

        let report = store.recover()?;
        if report != RecoveryReport::default() {
            warn!(
                "⚠️ Library recovery: removed {} stale temp file(s), {} orphan fingerprint(s)",
                report.stale_tmp, report.orphans
            );
        }
        info!(
            "📚 Fingerprint library opened at {} with {} videos ({})",
            store.root.display(),
            store.len(),
            store.params
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn params(&self) -> &FingerprintParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.read_catalog().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_catalog().is_empty()
    }

    /// 写入一个新序列，返回分配的 id
    pub fn append(&self, name: &str, sequence: &FingerprintSequence, duration_secs: f64) -> Result<VideoId> {
        self.append_record(name, sequence, duration_secs, None).map(|r| r.id)
    }

    /// 先完整写入指纹文件，再发布到 catalog
    pub fn append_record(
        &self,
        name: &str,
        sequence: &FingerprintSequence,
        duration_secs: f64,
        source: Option<String>,
    ) -> Result<VideoRecord> {
        if sequence.dim() != self.params.dim() {
            return Err(FingerprintError::dims(self.params.dim(), sequence.dim()));
        }
        if sequence.is_empty() {
            return Err(FingerprintError::EmptySequence);
        }

        let id = Uuid::new_v4();
        let blob_name = format!("{}.{}", id, BLOB_EXT);
        let blob_path = self.blob_dir().join(&blob_name);
        blob::write_blob(&blob_path, sequence)?;
        debug!("Wrote {} fingerprints to {}", sequence.len(), blob_path.display());

        let record = VideoRecord {
            id,
            name: name.to_string(),
            frames: sequence.len(),
            duration_secs,
            blob: blob_name,
            source,
        };

        let mut catalog = self.write_catalog();
        catalog.push(record.clone());
        if let Err(e) = catalog.save(&self.catalog_path()) {
            catalog.remove(&id);
            drop(catalog);
            let _ = fs::remove_file(&blob_path);
            return Err(e);
        }

        info!("✅ Saved '{}' ({} frames) as {}", record.name, record.frames, id);
        Ok(record)
    }

    /// 返回可随机读取的只读句柄
    pub fn open(&self, id: &VideoId) -> Result<SequenceHandle> {
        // 持有 catalog 读锁直到映射完成，避免与 remove 交错
        let catalog = self.read_catalog();
        let record = catalog
            .get(id)
            .ok_or_else(|| FingerprintError::NotFound(id.to_string()))?;

        if let Some((map, header)) = self.read_arena().get(id) {
            return Ok(SequenceHandle::new(*id, map.clone(), *header));
        }

        let path = self.blob_path(record)?;
        let (map, header) = blob::map_blob(&path)?;
        if header.dim != self.params.dim() || header.frames != record.frames {
            return Err(FingerprintError::CorruptLibrary(format!(
                "{}: expected {} frames × {}, found {} × {}",
                path.display(),
                record.frames,
                self.params.dim(),
                header.frames,
                header.dim
            )));
        }

        self.write_arena().insert(*id, (map.clone(), header));
        Ok(SequenceHandle::new(*id, map, header))
    }

    /// 按入库顺序列出所有视频
    pub fn list(&self) -> Vec<VideoRecord> {
        self.read_catalog().videos().to_vec()
    }

    pub fn get(&self, id: &VideoId) -> Result<VideoRecord> {
        self.read_catalog()
            .get(id)
            .cloned()
            .ok_or_else(|| FingerprintError::NotFound(id.to_string()))
    }

    /// 删除视频。已持有句柄的读者继续读旧映射，之后的 open 返回 NotFound。
    pub fn remove(&self, id: &VideoId) -> Result<VideoRecord> {
        let mut catalog = self.write_catalog();
        let (index, record) = catalog
            .remove(id)
            .ok_or_else(|| FingerprintError::NotFound(id.to_string()))?;

        if let Err(e) = catalog.save(&self.catalog_path()) {
            catalog.restore(index, record);
            return Err(e);
        }
        self.write_arena().remove(id);
        drop(catalog);

        match self.blob_path(&record) {
            Ok(path) => match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("⚠️ Failed to delete {}: {}", path.display(), e),
            },
            Err(e) => warn!("⚠️ Skipping blob cleanup for {}: {}", id, e),
        }

        info!("🗑️ Removed '{}' ({})", record.name, id);
        Ok(record)
    }

    /// 检查每条记录的指纹文件是否存在且与记录一致
    pub fn verify(&self) -> Vec<LibraryIssue> {
        self.list()
            .into_iter()
            .filter_map(|record| {
                let checked = self.blob_path(&record).and_then(|path| blob::read_header(&path));
                let reason = match checked {
                    Ok(header) if header.dim != self.params.dim() => {
                        format!("dimension {} != {}", header.dim, self.params.dim())
                    }
                    Ok(header) if header.frames != record.frames => {
                        format!("{} frames on disk, catalog says {}", header.frames, record.frames)
                    }
                    Ok(_) => return None,
                    Err(e) => e.to_string(),
                };
                Some(LibraryIssue {
                    id: record.id,
                    name: record.name,
                    reason,
                })
            })
            .collect()
    }

    /// 清理中断写入留下的临时文件和无主指纹文件
    fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let catalog = self.write_catalog();

        let catalog_tmp = super::tmp_path(&self.catalog_path());
        if catalog_tmp.exists() {
            fs::remove_file(&catalog_tmp)?;
            report.stale_tmp += 1;
        }

        for entry in fs::read_dir(self.blob_dir())? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if file_name.ends_with(".tmp") {
                fs::remove_file(&path)?;
                report.stale_tmp += 1;
            } else if path.extension().and_then(|e| e.to_str()) == Some(BLOB_EXT)
                && !catalog.contains_blob(file_name)
            {
                warn!("⚠️ Removing orphan fingerprint {}", file_name);
                fs::remove_file(&path)?;
                report.orphans += 1;
            }
        }
        Ok(report)
    }

    fn catalog_path(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    fn blob_dir(&self) -> PathBuf {
        self.root.join(FINGERPRINT_DIR)
    }

    /// catalog 里的文件名只能是 fingerprints/ 下的普通文件名
    fn blob_path(&self, record: &VideoRecord) -> Result<PathBuf> {
        let plain = Path::new(&record.blob).file_name().and_then(|n| n.to_str());
        if plain != Some(record.blob.as_str()) {
            return Err(FingerprintError::CorruptLibrary(format!(
                "invalid blob reference '{}' for {}",
                record.blob, record.id
            )));
        }
        Ok(self.blob_dir().join(&record.blob))
    }

    fn read_catalog(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_catalog(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_arena(&self) -> RwLockReadGuard<'_, HashMap<VideoId, (Arc<Mmap>, blob::BlobHeader)>> {
        self.arena.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_arena(&self) -> RwLockWriteGuard<'_, HashMap<VideoId, (Arc<Mmap>, blob::BlobHeader)>> {
        self.arena.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl SequenceLibrary for FingerprintStore {
    fn params(&self) -> &FingerprintParams {
        &self.params
    }

    fn snapshot(&self) -> Vec<VideoRecord> {
        self.list()
    }

    fn open(&self, id: &VideoId) -> Result<SequenceHandle> {
        FingerprintStore::open(self, id)
    }
}

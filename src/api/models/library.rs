use crate::core::store::VideoRecord;
use serde::{Deserialize, Serialize};

/// 指纹库概况
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryStatus {
    pub total_videos: usize,
    pub videos: Vec<VideoSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub id: String,
    pub name: String,
    /// 采样后的帧数
    pub frames: usize,
    /// 秒
    pub duration: f64,
}

impl From<&VideoRecord> for VideoSummary {
    fn from(record: &VideoRecord) -> Self {
        Self {
            id: record.id.to_string(),
            name: record.name.clone(),
            frames: record.frames,
            duration: record.duration_secs,
        }
    }
}

impl LibraryStatus {
    pub fn from_records(records: &[VideoRecord]) -> Self {
        Self {
            total_videos: records.len(),
            videos: records.iter().map(VideoSummary::from).collect(),
        }
    }
}

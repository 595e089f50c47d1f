use thiserror::Error;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("无法打开视频源: {0}")]
    SourceUnreadable(String),
    #[error("视频源没有可采样的帧")]
    EmptySequence,
    #[error("维度不匹配: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },
    #[error("视频不存在: {0}")]
    NotFound(String),
    #[error("指纹库损坏: {0}")]
    CorruptLibrary(String),
    #[error("查询序列为空")]
    EmptyQuery,
    #[error("指纹参数不一致: library built with {library}, requested {requested}")]
    ParamsMismatch { library: String, requested: String },
    #[error("配置无效: {0}")]
    InvalidConfig(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FingerprintError>;

impl FingerprintError {
    pub(crate) fn dims(expected: impl ToString, actual: impl ToString) -> Self {
        FingerprintError::DimensionMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

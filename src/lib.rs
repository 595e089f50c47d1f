pub mod api;
pub mod core;

pub use crate::api::{LibraryStatus, VideoMatcher};
pub use crate::core::{FingerprintError, MatcherConfig};

/// 安装日志后端。Android 上输出到 logcat；其他平台由宿主程序自行安装 `log` 实现。
pub fn init_logging() {
    #[cfg(target_os = "android")]
    {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Debug)
                .with_tag("clip_finder"),
        );
    }
}

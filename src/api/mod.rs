pub mod matcher;
pub mod models;

pub use matcher::VideoMatcher;
pub use models::library::{LibraryStatus, VideoSummary};

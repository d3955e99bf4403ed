pub mod counter;
pub mod featured;
pub mod list_category;
pub mod post_event;
pub mod post_summary;

pub use counter::{CounterKind, FlushBatch};
pub use featured::{FeaturedFlag, FeaturedNotification};
pub use list_category::ListCategory;
pub use post_event::PostEvent;
pub use post_summary::{PostDetail, PostSummary};

pub mod constants;
pub mod entities;

pub use entities::{
    CounterKind, FeaturedFlag, FeaturedNotification, FlushBatch, ListCategory, PostDetail,
    PostEvent, PostSummary,
};

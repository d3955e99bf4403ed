pub mod kv_store;
pub mod notifier;
pub mod post_store;

pub use kv_store::{DecayOutcome, KeyValueStore, ListRemoval, TailAppend};
pub use notifier::FeaturedNotifier;
pub use post_store::PostStore;

pub mod channel_notifier;

pub use channel_notifier::{ChannelNotifier, spawn_logging_consumer};

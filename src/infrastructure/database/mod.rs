pub mod connection_pool;
pub mod sqlite_post_store;

pub use connection_pool::ConnectionPool;
pub use sqlite_post_store::{NewPost, SqlitePostStore};

pub mod cache;
pub mod database;
pub mod event;
pub mod jobs;

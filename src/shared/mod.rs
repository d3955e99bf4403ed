pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod logging;
pub mod retry;
pub mod task_pool;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::AppConfig;
pub use error::{AppError, Result};
pub use retry::RetryPolicy;
pub use task_pool::TaskPool;

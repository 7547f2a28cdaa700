// Internal support: error type and pooled scratch objects

pub mod error;
pub mod pool;

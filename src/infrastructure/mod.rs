pub mod broker;
pub mod companion;
pub mod core;
pub mod mock;
pub mod redis_source;

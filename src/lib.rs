pub mod config;
pub mod error;
pub mod http;
pub mod ids;
pub mod lifecycle;
pub mod objectstore;
pub mod queue;
pub mod resultstore;
pub mod worker;

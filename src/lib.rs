pub mod autorecord;
pub mod config;
pub mod encoder;
pub mod error;
pub mod metrics;
pub mod recorder;
pub mod result;
pub mod retention;
pub mod scheduler;
pub mod segment;
pub mod service;
pub mod shutdown;
pub mod source;

pub use service::Recorder;

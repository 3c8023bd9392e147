pub mod cleanup;
pub mod recorder;
pub mod request;
pub mod schedule;

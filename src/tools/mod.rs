//! Test-bench servers for exercising the relay end to end.

pub mod producer;
pub mod receiver;

pub use producer::{BurstGenerator, BurstProfile, SampleSource, run_producer};
pub use receiver::{ReceiverReport, run_receiver};

//! Active node health checking.

pub mod prober;

pub use prober::{probe_once, spawn_health_checker};

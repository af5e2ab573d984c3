//! # medir
//!
//! Load-driving performance meter for model inference services.
//!
//! medir (Spanish: "to measure") sustains a target number of in-flight
//! inference requests against a remote model, measures end-to-end and
//! component-wise latency from both the client and server perspective,
//! and can sweep concurrency upward to find the highest level a service
//! sustains under a latency bound.
//!
//! ## How it measures
//!
//! - **Workers** keep requests in flight: one blocking thread per
//!   concurrency slot, or a single pipelining worker in async mode.
//! - A **pause gate** raises and lowers the effective concurrency
//!   without ever destroying a worker.
//! - The **concurrency manager** takes repeated fixed-duration windows
//!   until throughput and latency are stable, then reports the sample.
//! - The **summarizer** reconciles client wall-clock timestamps with
//!   server counter deltas into one [`PerfStatus`] record per window.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//!
//! use medir::client::{factory_for, Protocol};
//! use medir::{ConcurrencyManager, PerfConfig};
//!
//! let factory = factory_for(Protocol::Http, "localhost:8000", "resnet50", -1).unwrap();
//! let config = PerfConfig {
//!     measurement_window_ms: 5000,
//!     ..PerfConfig::default()
//! };
//! let early_exit = Arc::new(AtomicBool::new(false));
//! let mut manager = ConcurrencyManager::new(config, factory, early_exit);
//! let summary = manager.step(4).unwrap();
//! println!("{} infer/sec", summary.client_infer_per_sec);
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;
pub mod manager;
pub mod pause;
pub mod report;
pub mod summary;
pub mod timestamp;
pub mod worker;

// Re-exports for convenience
pub use error::{MedirError, Result};
pub use manager::{ConcurrencyManager, PerfConfig};
pub use summary::PerfStatus;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Shipyard pipeline library
//!
//! Queue-driven build and deploy pipeline: stage workers hand jobs to each other over
//! per-stage queues and report progress as domain events, which the reconciler folds
//! into the deployment record.

pub mod app;
pub mod bus;
pub mod cluster;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod notify;
pub mod queue;
pub mod reconcile;
pub mod retry;
pub mod server;
pub mod storage;
pub mod store;
pub mod trigger;
pub mod utils;
pub mod workers;

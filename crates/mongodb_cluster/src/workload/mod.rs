//! The Kubernetes objects running the replica set members.

pub mod merge;
pub mod service;
pub mod statefulset;

pub use service::ensure_service;
pub use statefulset::{desired_statefulset, ensure_statefulset, UpdateStrategyType};

//! Background Tasks Module
//!
//! # Tasks
//! - Janitor: shrinks the cache to its low watermark on request and sweeps
//!   expired entries at the configured interval

mod janitor;

pub(crate) use janitor::Janitor;

#[cfg(test)]
pub(crate) use janitor::{shrink, sweep};

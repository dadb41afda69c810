//! Camera-based pulse rate estimation
//!
//! Frames flow from a capture source through a lock-free ring into a single
//! processor thread, which locates a skin region, turns its mean colour into
//! a one-dimensional signal and estimates the pulse from it.

pub mod config;
pub mod session;
pub mod signal;
pub mod video;
pub mod vision;

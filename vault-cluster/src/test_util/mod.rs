//! Test utilities for exercising lifecycle calls without a real control plane
//!
//! This module provides an in-memory control plane whose operations advance
//! one step per status query, with knobs for failures, transient errors and
//! hanging requests.

pub mod control_plane;

pub use control_plane::{CallCounts, FakeControlPlane};

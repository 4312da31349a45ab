//! Core of a cooperative toy kernel: a region-backed memory singleton and a
//! cooperative process manager, hosted on the local OS.
//!
//! The kernel manages a single byte region handed to [`memory::init`] at
//! startup. Process control blocks and per-process stacks are carved out of
//! that region, and execution is multiplexed across processes by swapping
//! stack pointers whenever a process yields.
//!
//! Startup order is [`memory::init`], then [`proc::init`] (which adopts the
//! caller as the bootstrap process), then [`proc::create`]; see the examples
//! for complete drivers.

#[macro_use]
mod log;

pub mod memory;
pub mod proc;

pub use self::log::{LogLevel, set_min_level};

//! Utilities for building predictable, low-latency, allocation-conscious audio pipelines.
//!
//! This crate provides lightweight primitives for real-time processing, shared by the
//! sending and receiving ends of an audio stream:
//!
//! - [`queue`]: wait-free single-producer/single-consumer queues for moving samples and
//!   per-block metadata between the network and audio threads.
//! - [`time`]: fixed-point NTP-style time tags.
//! - [`dll`]: a delay-locked loop estimating the effective sample rate of an audio device.
//! - [`resampler`]: a variable-ratio, linearly-interpolating resampler.
//! - [`snapshot`]: copy-on-write publication of shared collections, which the audio
//!   thread can refresh without ever blocking.
//!
//! None of the real-time operations here allocate, lock, or block, only their setup
//! functions do.

pub mod dll;
pub mod queue;
pub mod resampler;
pub mod snapshot;
pub mod time;

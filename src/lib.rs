//! Spectrum Monitor Library
//!
//! Real-time microphone analysis: fixed-size frames are captured from an
//! input device, transformed into a magnitude spectrum, converted to dB,
//! noise gated and peak held, then handed to a consumer through a
//! latest-value slot.

pub mod audio;
pub mod config;
pub mod pipeline;
pub mod scheduler;
pub mod state;

pub use config::{ConfigError, MonitorConfig};
pub use pipeline::{Pipeline, PublishedFrame};
pub use scheduler::{FrameScheduler, SchedulerStats};
pub use state::LatestSlot;

//! Audio output for the loom pipeline
//!
//! A cpal output stream pulls fixed-size periods from the real-time
//! [`Scheduler`](crate::engine::Scheduler). The scheduler is moved into the
//! audio callback and owned there exclusively; the control side talks to it
//! through a lock-free command queue held by [`Playback`].
//!
//! ```ignore
//! use loom_core::audio::{start_playback, AudioSettings, PlaybackCommand};
//!
//! let settings = AudioSettings::default();
//! let scheduler = Scheduler::with_session(runner, settings.spec(), false)?;
//! let mut playback = start_playback(&settings, scheduler);
//! if !playback.is_active() {
//!     // offline paths keep working
//! }
//! playback.send(PlaybackCommand::Reset);
//! ```

mod config;
mod cpal_backend;
mod device;
mod error;

pub use config::{AudioSettings, DeviceId, DEFAULT_ARENA_BYTES, MAX_PERIOD, MIN_PERIOD};
pub use cpal_backend::{
    command_channel, start_playback, Playback, PlaybackCommand, COMMAND_QUEUE_CAPACITY,
};
pub use device::{
    find_device_by_id, get_available_output_devices, get_default_device, get_output_devices,
    AudioDevice, OutputDevice,
};
pub use error::{AudioError, AudioResult};

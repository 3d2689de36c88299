//! Audio engine - bus mixing, graph passes, real-time scheduling
//!
//! This module contains the pieces between the node graph and the device:
//! - BusGraph: per-pass bus buffers with one-hop redirects
//! - GraphPass: runs the graph with its flags bag, arena and pass counter
//! - Scheduler: keeps the device fed when passes overrun their deadline
//! - gc: deferred deallocation of frames dropped on the audio thread

mod arena;
mod bus;
mod error;
pub mod gc;
mod pass;
mod scheduler;

pub use arena::*;
pub use bus::*;
pub use error::*;
pub use gc::{share_frame, SharedFrame};
pub use pass::*;
pub use scheduler::*;

//! Frame schema for the livewire persistent-connection protocol.
//!
//! Every frame is a JSON object tagged by its `type` field. Control frames
//! (`auth`, `ping`, `pong`, `connected`, `error`) have fixed shapes; any
//! other kind is an application [`Envelope`] forwarded opaquely.

pub mod constants;
pub mod frame;

// Re-export primary types for convenience.
pub use constants::{is_normal_closure, is_reserved_kind};
pub use frame::{AuthFrame, Envelope, Frame, FrameError, Probe, ServerError, SessionInfo};

//! Voice core of the website chat widget: a duplex streaming session with
//! local barge-in detection and gap-free playback of agent speech.

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod history;
pub mod protocol;
pub mod signaling;
pub mod state_machine;
pub mod tracking;
pub mod transcript;
pub mod transport;
pub mod ui_bridge;

pub use config::Config;
pub use controller::{Collaborators, ControlCommand, EndReason, VoiceController};
pub use error::{Result, VoiceError};
pub use state_machine::VoiceState;

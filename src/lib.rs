//! VR Audio Router
//!
//! Keeps a user's per-application audio routing and VoiceMeeter's bus
//! routing in sync with whether a VR session is running.

pub mod api;
pub mod config;
pub mod engine;
pub mod mode;
pub mod paths;
pub mod presence;
pub mod presets;
pub mod reconciler;
pub mod sessions;
pub mod store;
pub mod voicemeeter;

#[cfg(test)]
pub mod testing;

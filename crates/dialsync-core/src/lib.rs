//! Dialsync Core - Tuning and synchronized playback engine
//!
//! This crate provides the core of the prop radio: stations laid out across
//! a tuning dial, wall-clock synchronized playback so every unit plays the
//! same moment of a station, and the heartbeat link to the co-processor that
//! drives the dial and buttons.

pub mod audio;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod engine;
pub mod input;
pub mod link;
pub mod mixer;
pub mod output;
pub mod playlist;
pub mod session;
pub mod settings;
pub mod station;
pub mod tuning;

#[cfg( test )]
mod testing;

pub use audio::{ AudioEngine, AudioError, Effect };
pub use catalog::{ CatalogError, CatalogLoader };
pub use clock::{ Clock, ManualClock, SystemClock };
pub use config::{ ConfigError, RadioConfig };
pub use controller::{ ExitKind, Radio, TickOutcome };
pub use engine::{ EngineConfig, TuningEngine };
pub use input::{ InputEvent, InputSource };
pub use link::{ LinkError, LinkMonitor, Message, PowerState, SerialTransport, Transport };
pub use mixer::{ Mixer, SoundFiles };
pub use session::{ PlaybackState, StationSession, SyncParams };
pub use settings::{ JsonSettingsStore, SavedSettings, SettingsStore };
pub use station::{ Band, StationDescriptor, Track };
pub use tuning::{ DialGeometry, Zone };

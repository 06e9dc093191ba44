//! Audio engine interface
//!
//! The tuning engine drives audio through this trait: one music channel
//! for the tuned station, one static channel, and fire-and-forget effects.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;


/// Errors reported by an audio backend.
#[derive( Debug, Error )]
pub enum AudioError {
    #[error( "Failed to open file: {0}" )]
    FileOpen( String ),

    #[error( "Seek error: {0}" )]
    Seek( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Audio output error: {0}" )]
    Output( String ),
}


/// Short sound cues.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub enum Effect {
    PowerOn,
    PowerOff,
    BandChange,
    Error,
}


/// Playback backend used by the tuning engine.
pub trait AudioEngine {
    /// Loads `path` on the music channel and plays it from `offset`,
    /// replacing whatever was playing.
    fn play_track( &mut self, path: &Path, offset: Duration ) -> Result<(), AudioError>;

    /// Pauses the music channel.
    fn pause( &mut self );

    /// Stops the music channel.
    fn stop( &mut self );

    /// Sets music channel gain (0.0 to 1.0).
    fn set_music_volume( &mut self, volume: f32 );

    /// Returns true once after the music channel reaches the end of a track.
    fn take_track_ended( &mut self ) -> bool;

    /// Starts or stops static. Static keeps playing until disabled.
    fn set_static( &mut self, playing: bool );

    /// Sets static channel gain.
    fn set_static_volume( &mut self, volume: f32 );

    /// Plays a sound cue at the given gain.
    fn play_effect( &mut self, effect: Effect, volume: f32 );

    /// Housekeeping, called once per loop tick.
    fn service( &mut self ) {}
}

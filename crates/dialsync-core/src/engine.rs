//! Tuning and playback engine
//!
//! Owns band and station selection, turns dial angles into stations, and
//! drives the audio backend. Commands for the co-processor are queued in an
//! outbox that the controller drains after each operation.
//!
//! Every operation is total: bad indices and missing stations are logged
//! and leave the engine as it was.

use std::rc::Rc;
use std::time::Duration;

use crate::audio::{ AudioEngine, Effect };
use crate::clock::Clock;
use crate::link::{ DeviceCommand, Message, PowerCommand };
use crate::session::{ PlaybackState, StationSession, SyncParams };
use crate::settings::SavedSettings;
use crate::station::Band;
use crate::tuning::{ DialGeometry, Zone };


/// Volume levels and ratios.
#[derive( Debug, Clone, Copy, PartialEq )]
pub struct VolumeLevels {
    pub default: f32,
    pub step: f32,
    pub min: f32,
    /// Static gain relative to music
    pub static_ratio: f32,
    pub static_min: f32,
    pub effects: f32,
    /// Band change cue relative to music
    pub band_change: f32,
}


impl Default for VolumeLevels {
    fn default() -> Self {
        Self {
            default: 0.05,
            step: 0.008,
            min: 0.008,
            static_ratio: 0.06,
            static_min: 0.008,
            effects: 0.6,
            band_change: 0.5,
        }
    }
}


/// Everything the engine needs besides its collaborators.
#[derive( Debug, Clone, Copy, PartialEq )]
pub struct EngineConfig {
    pub geometry: DialGeometry,
    pub sync: SyncParams,
    pub volume: VolumeLevels,
    /// Sweep the needle across the dial on band changes
    pub sweep_enabled: bool,
    pub gauge_pixels: u8,
}


impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            geometry: DialGeometry::default(),
            sync: SyncParams::default(),
            volume: VolumeLevels::default(),
            sweep_enabled: false,
            gauge_pixels: 7,
        }
    }
}


pub struct TuningEngine<A: AudioEngine> {
    audio: A,
    clock: Rc<dyn Clock>,
    bands: Vec<Band>,
    config: EngineConfig,

    band: Option<usize>,
    sessions: Vec<StationSession>,
    active: Option<usize>,

    motor_angle: f64,
    locked: bool,
    last_angle: Option<f64>,

    volume: f32,
    /// Attenuation while seeking, 1.0 when locked
    gain: f32,

    outbox: Vec<Message>,
}


impl<A: AudioEngine> TuningEngine<A> {
    pub fn new( bands: Vec<Band>, audio: A, clock: Rc<dyn Clock>, config: EngineConfig ) -> Self {
        let motor_angle = config.geometry.min_angle;
        Self {
            audio,
            clock,
            bands,
            volume: config.volume.default,
            config,
            band: None,
            sessions: Vec::new(),
            active: None,
            motor_angle,
            locked: false,
            last_angle: None,
            gain: 1.0,
            outbox: Vec::new(),
        }
    }


    pub fn audio( &self ) -> &A {
        &self.audio
    }


    pub fn audio_mut( &mut self ) -> &mut A {
        &mut self.audio
    }


    pub fn bands( &self ) -> &[Band] {
        &self.bands
    }


    pub fn band_index( &self ) -> Option<usize> {
        self.band
    }


    pub fn active_station( &self ) -> Option<usize> {
        self.active
    }


    /// Session of station `index` in the current band.
    pub fn session( &self, index: usize ) -> Option<&StationSession> {
        self.sessions.get( index )
    }


    pub fn motor_angle( &self ) -> f64 {
        self.motor_angle
    }


    pub fn is_locked( &self ) -> bool {
        self.locked
    }


    pub fn volume( &self ) -> f32 {
        self.volume
    }


    /// Takes the queued co-processor commands.
    pub fn drain_outbox( &mut self ) -> Vec<Message> {
        std::mem::take( &mut self.outbox )
    }


    fn now( &self ) -> Duration {
        self.clock.now()
    }


    fn station_count( &self ) -> usize {
        self.sessions.len()
    }


    // ---- Tuning ----

    /// Records the latest dial angle. The next [`TuningEngine::retune`]
    /// acts on it.
    pub fn set_motor_angle( &mut self, angle: f64 ) {
        if !angle.is_finite() {
            tracing::warn!( "Ignoring non-finite dial angle" );
            return;
        }
        self.motor_angle = angle;
    }


    /// Runs the tuning control law if the dial moved or the context changed
    /// since the last pass.
    pub fn retune( &mut self ) {
        if self.band.is_none() || self.last_angle == Some( self.motor_angle ) {
            return;
        }
        self.last_angle = Some( self.motor_angle );

        let reading = self.config.geometry.read( self.motor_angle, self.station_count() );

        match reading.zone {
            Zone::Locked => {
                if self.locked {
                    return;
                }
                if self.active != Some( reading.nearest ) {
                    self.select_station( reading.nearest, false );
                }
                self.gain = 1.0;
                self.apply_music_volume();
                self.audio.set_static( false );
                self.locked = true;
                tracing::info!(
                    "Locked to station {} at {:.1} (needle {:.1})",
                    reading.nearest,
                    reading.target_angle,
                    self.motor_angle
                );
            }
            Zone::Seeking => {
                self.locked = false;
                if self.active != Some( reading.nearest ) {
                    self.select_station( reading.nearest, false );
                }
                self.gain = self.config.geometry.seek_gain( reading.distance, 0.0 );
                self.apply_music_volume();
                self.audio.set_static( true );
            }
            Zone::NoSignal => {
                if let Some( index ) = self.active.take() {
                    tracing::debug!( "Lost station {}", index );
                    self.sessions[ index ].stop( &mut self.audio );
                }
                self.locked = false;
                self.gain = 1.0;
                self.audio.set_static( true );
            }
        }
    }


    /// Switches to band `index`, giving every station a fresh session.
    ///
    /// @returns false if the band does not exist or has too few stations
    pub fn select_band( &mut self, index: usize ) -> bool {
        self.switch_band( index, self.motor_angle )
    }


    fn switch_band( &mut self, index: usize, settle_angle: f64 ) -> bool {
        let Some( band ) = self.bands.get( index ) else {
            tracing::warn!( "Invalid band {} of {}", index, self.bands.len() );
            return false;
        };
        if !band.is_selectable() {
            tracing::warn!( "Band {} has {} station(s), not enough to tune", band.name(), band.station_count() );
            return false;
        }

        let now = self.now();
        let separation = band.tuning_separation( self.config.geometry.range() );
        let sessions = band
            .stations()
            .iter()
            .map( |s| StationSession::new( s.clone(), self.config.sync, now ) )
            .collect();
        tracing::info!(
            "Band {} ({}): {} stations, {:.1} degrees apart",
            index,
            band.name(),
            band.station_count(),
            separation
        );

        if let Some( active ) = self.active.take() {
            self.sessions[ active ].stop( &mut self.audio );
        }
        self.sessions = sessions;
        self.band = Some( index );
        self.locked = false;
        self.last_angle = None;

        self.audio.play_effect( Effect::BandChange, self.volume * self.config.volume.band_change );
        let pixel = self.gauge_pixel( index );
        self.outbox.push( Message::Device( DeviceCommand::Gauge { pixel, brightness: 1.0 } ) );
        self.outbox.push( Message::Device( if self.config.sweep_enabled {
            DeviceCommand::Sweep { angle: settle_angle }
        } else {
            DeviceCommand::NoSweep { angle: settle_angle }
        }));
        true
    }


    /// Gauge LED for a band: the first band lights the last pixel.
    fn gauge_pixel( &self, band: usize ) -> u8 {
        let pixels = f64::from( self.config.gauge_pixels );
        if self.bands.len() < 2 {
            return self.config.gauge_pixels;
        }
        let last = ( self.bands.len() - 1 ) as f64;
        ( pixels - band as f64 * pixels / last ).round().clamp( 0.0, pixels ) as u8
    }


    /// Tunes to station `index` of the current band.
    ///
    /// A manual selection also moves the needle to the station. A
    /// non-manual selection of the station already playing does nothing.
    pub fn select_station( &mut self, index: usize, manual: bool ) -> bool {
        if self.band.is_none() || index >= self.station_count() {
            tracing::warn!( "Invalid station {} of {}", index, self.station_count() );
            return false;
        }

        if manual {
            let angle = self.config.geometry.station_angle( index, self.station_count() );
            self.motor_angle = angle;
            self.locked = false;
            // Relock on the next pass even if the needle did not move
            self.last_angle = None;
            self.outbox.push( Message::Motor { angle } );
        } else if self.active == Some( index ) && self.sessions[ index ].state() == PlaybackState::Playing {
            return true;
        }

        if let Some( previous ) = self.active {
            if previous != index {
                self.sessions[ previous ].stop( &mut self.audio );
            }
        }

        tracing::info!(
            "Tuning to station {} ({}) at {:.1}",
            index,
            self.sessions[ index ].descriptor().label(),
            self.motor_angle
        );
        self.active = Some( index );
        let now = self.now();
        self.sessions[ index ].live_playback( &mut self.audio, now );
        self.release_if_stopped();
        self.apply_music_volume();
        true
    }


    /// Forgets the tuned station once it has nothing left to play.
    fn release_if_stopped( &mut self ) {
        if let Some( index ) = self.active {
            if self.sessions[ index ].state() == PlaybackState::Stopped {
                tracing::warn!( "Station {} has nothing playable, releasing it", index );
                self.active = None;
            }
        }
    }


    /// Station after the one nearest the needle. Past the end of the band
    /// it moves to the first station of the next band.
    pub fn next_station( &mut self ) {
        let Some( band ) = self.band else { return };
        let next = self.config.geometry.nearest_station( self.motor_angle, self.station_count() ) + 1;

        if next < self.station_count() {
            self.select_station( next, true );
            return;
        }

        match self.neighbour_band( band, true ) {
            Some( neighbour ) => {
                if self.switch_band( neighbour, self.motor_angle ) {
                    self.select_station( 0, true );
                }
            }
            None => {
                tracing::info!( "At the end of the station list" );
                self.error_cue();
                self.select_station( self.station_count() - 1, true );
            }
        }
    }


    /// Station before the one nearest the needle. Past the start of the
    /// band it moves to the last station of the previous band.
    pub fn prev_station( &mut self ) {
        let Some( band ) = self.band else { return };
        let nearest = self.config.geometry.nearest_station( self.motor_angle, self.station_count() );

        if nearest > 0 {
            self.select_station( nearest - 1, true );
            return;
        }

        match self.neighbour_band( band, false ) {
            Some( neighbour ) => {
                if self.switch_band( neighbour, self.motor_angle ) {
                    let last = self.station_count() - 1;
                    self.select_station( last, true );
                }
            }
            None => {
                tracing::info!( "At the beginning of the station list" );
                self.error_cue();
                self.select_station( 0, true );
            }
        }
    }


    pub fn next_band( &mut self ) {
        let Some( band ) = self.band else { return };
        match self.neighbour_band( band, true ) {
            Some( next ) => {
                self.select_band( next );
            }
            None => {
                tracing::info!( "At the end of the band list" );
                self.error_cue();
            }
        }
    }


    pub fn prev_band( &mut self ) {
        let Some( band ) = self.band else { return };
        match self.neighbour_band( band, false ) {
            Some( prev ) => {
                self.select_band( prev );
            }
            None => {
                tracing::info!( "At the beginning of the band list" );
                self.error_cue();
            }
        }
    }


    /// Closest selectable band after (or before) `band`.
    fn neighbour_band( &self, band: usize, forward: bool ) -> Option<usize> {
        if forward {
            ( band + 1..self.bands.len() ).find( |&i| self.bands[ i ].is_selectable() )
        } else {
            ( 0..band ).rev().find( |&i| self.bands[ i ].is_selectable() )
        }
    }


    fn error_cue( &mut self ) {
        self.audio.play_effect( Effect::Error, self.config.volume.effects );
    }


    // ---- Volume ----

    /// Sets the master volume, clamped to `[min, 1]`.
    pub fn set_volume( &mut self, level: f32 ) {
        if !level.is_finite() {
            return;
        }
        let rounded = ( level * 1000.0 ).round() / 1000.0;
        self.volume = rounded.clamp( self.config.volume.min, 1.0 );
        self.apply_music_volume();

        let static_volume = if self.volume > 0.0 {
            ( self.volume * self.config.volume.static_ratio ).max( self.config.volume.static_min )
        } else {
            0.0
        };
        self.audio.set_static_volume( static_volume );
        tracing::debug!( "Volume {:.3}, static {:.3}", self.volume, static_volume );
    }


    pub fn volume_up( &mut self ) {
        self.set_volume( self.volume + self.config.volume.step );
    }


    pub fn volume_down( &mut self ) {
        self.set_volume( self.volume - self.config.volume.step );
    }


    fn apply_music_volume( &mut self ) {
        let level = ( self.volume * self.gain ).clamp( self.config.volume.min, 1.0 );
        self.audio.set_music_volume( level );
    }


    // ---- Song controls ----

    fn with_active<F>( &mut self, what: &str, f: F )
    where
        F: FnOnce( &mut StationSession, &mut A, Duration ),
    {
        let now = self.now();
        match self.active {
            Some( index ) => f( &mut self.sessions[ index ], &mut self.audio, now ),
            None => tracing::debug!( "No station tuned, ignoring {}", what ),
        }
        self.release_if_stopped();
    }


    pub fn next_song( &mut self ) {
        self.with_active( "next song", |s, a, now| s.next_song( a, now ) );
    }


    pub fn prev_song( &mut self ) {
        self.with_active( "previous song", |s, a, now| s.prev_song( a, now ) );
    }


    pub fn fast_forward( &mut self ) {
        self.with_active( "fast forward", |s, a, now| s.fast_forward( a, now ) );
    }


    pub fn rewind( &mut self ) {
        self.with_active( "rewind", |s, a, now| s.rewind( a, now ) );
    }


    /// Reshuffles the tuned station and restarts it on the shared schedule.
    pub fn randomize_station( &mut self ) {
        self.with_active( "randomize", |s, a, now| {
            s.randomize( now );
            s.live_playback( a, now );
        });
    }


    /// Restores the tuned station's canonical order and restarts it.
    pub fn order_station( &mut self ) {
        self.with_active( "order", |s, a, now| {
            s.order();
            s.live_playback( a, now );
        });
    }


    /// Pauses or resumes the tuned station. Static is silenced while
    /// paused.
    pub fn play_pause( &mut self ) {
        let locked = self.locked;
        self.with_active( "play/pause", |s, a, now| {
            s.play_pause( a, now );
            match s.state() {
                PlaybackState::Playing => a.set_static( !locked ),
                _ => a.set_static( false ),
            }
        });
        self.apply_music_volume();
    }


    /// Hands an end-of-track report from the backend to the tuned station.
    pub fn poll_track_end( &mut self ) {
        if !self.audio.take_track_ended() {
            return;
        }
        self.with_active( "track end", |s, a, now| s.track_ended( a, now ) );
    }


    /// Backend housekeeping, once per tick.
    pub fn service( &mut self ) {
        self.audio.service();
    }


    // ---- Power ----

    /// Stops all audio and tells the co-processor we are going to sleep.
    pub fn enter_standby( &mut self ) {
        tracing::info!( "Going into standby" );
        self.outbox.push( Message::Power( PowerCommand::Standby ) );

        if let Some( index ) = self.active.take() {
            self.sessions[ index ].stop( &mut self.audio );
        }
        self.locked = false;
        self.last_angle = None;
        self.gain = 1.0;

        self.audio.play_effect( Effect::PowerOff, self.config.volume.effects );
        self.audio.set_static( false );
    }


    /// Restores volume, band and station from `saved` and starts playing.
    pub fn resume( &mut self, saved: &SavedSettings ) {
        tracing::info!(
            "Resuming: volume {:.3}, band {}, station {}",
            saved.volume,
            saved.band,
            saved.station
        );
        self.audio.play_effect( Effect::PowerOn, self.config.volume.effects );
        self.set_volume( saved.volume );

        let band = if self.bands.get( saved.band ).is_some_and( Band::is_selectable ) {
            saved.band
        } else {
            match self.bands.iter().position( Band::is_selectable ) {
                Some( first ) => {
                    tracing::warn!( "Saved band {} is unavailable, using band {}", saved.band, first );
                    first
                }
                None => {
                    tracing::error!( "No band has enough stations to tune" );
                    return;
                }
            }
        };

        let count = self.bands[ band ].station_count();
        let station = saved.station.min( count - 1 );
        let angle = self.config.geometry.station_angle( station, count );

        if self.switch_band( band, angle ) {
            self.motor_angle = angle;
            self.select_station( station, false );
        }
    }


    /// Settings to persist.
    pub fn snapshot( &self ) -> SavedSettings {
        let station = self.active.unwrap_or_else( || {
            self.config.geometry.nearest_station( self.motor_angle, self.station_count() )
        });
        SavedSettings {
            volume: self.volume,
            band: self.band.unwrap_or( 0 ),
            station,
        }
    }
}


#[cfg( test )]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{ self, AudioCall, RecordingAudio };


    const EPOCH: u64 = 1_577_836_800;


    fn at( secs: u64 ) -> Duration {
        Duration::from_secs( EPOCH + secs )
    }


    fn engine_with( counts: &[usize], clock: &ManualClock ) -> TuningEngine<RecordingAudio> {
        TuningEngine::new(
            testing::bands( counts ),
            RecordingAudio::default(),
            Rc::new( clock.clone() ),
            EngineConfig::default(),
        )
    }


    fn angle_of( engine: &TuningEngine<RecordingAudio>, index: usize ) -> f64 {
        engine.config.geometry.station_angle( index, engine.station_count() )
    }


    fn tune( engine: &mut TuningEngine<RecordingAudio>, angle: f64 ) {
        engine.set_motor_angle( angle );
        engine.retune();
    }


    #[test]
    fn test_invalid_band_leaves_state_unchanged() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 5, 1 ], &clock );
        assert!( engine.select_band( 0 ) );
        engine.drain_outbox();

        assert!( !engine.select_band( 7 ) );
        assert!( !engine.select_band( 1 ) );
        assert_eq!( engine.band_index(), Some( 0 ) );
        assert!( engine.drain_outbox().is_empty() );
    }


    #[test]
    fn test_band_select_sends_gauge_and_settle_angle() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 5, 5, 5 ], &clock );
        engine.set_motor_angle( 50.0 );
        engine.select_band( 1 );

        assert_eq!( engine.drain_outbox(), vec![
            Message::Device( DeviceCommand::Gauge { pixel: 4, brightness: 1.0 } ),
            Message::Device( DeviceCommand::NoSweep { angle: 50.0 } ),
        ]);
        assert!( engine.audio().effects().contains( &Effect::BandChange ) );
    }


    #[test]
    fn test_gauge_spans_pixels() {
        let clock = ManualClock::new( at( 0 ) );
        let engine = engine_with( &[ 3, 3, 3 ], &clock );
        assert_eq!( engine.gauge_pixel( 0 ), 7 );
        assert_eq!( engine.gauge_pixel( 2 ), 0 );
    }


    #[test]
    fn test_locking_on_station_target_plays_live_position() {
        // min 14, max 168, end zone 14, five stations: 28, 59.5, 91, 122.5, 154
        let clock = ManualClock::new( at( 510 * 2 + 75 ) );
        let mut engine = engine_with( &[ 5 ], &clock );
        engine.select_band( 0 );

        let reading = engine.config.geometry.read( 90.0, 5 );
        assert_eq!( reading.nearest, 2 );
        assert_eq!( angle_of( &engine, 2 ), 91.0 );

        tune( &mut engine, 91.0 );
        assert!( engine.is_locked() );
        assert_eq!( engine.active_station(), Some( 2 ) );
        assert_eq!( engine.audio().last_static(), Some( false ) );

        // Station 2 is offset by 14s: elapsed 1081s, 61s into the 510s loop
        let expected = ( PathBuf::from( "/radio/band0/station2/1.ogg" ), Duration::from_secs( 1 ) );
        assert_eq!( engine.audio().loads(), vec![ expected ] );
    }


    #[test]
    fn test_lock_boundary_is_closed() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 5 ], &clock );
        engine.select_band( 0 );

        tune( &mut engine, 91.0 + 2.0 );
        assert!( engine.is_locked() );
        assert_eq!( engine.audio().last_static(), Some( false ) );
    }


    #[test]
    fn test_seeking_attenuates_and_plays_static() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 5 ], &clock );
        engine.select_band( 0 );
        engine.set_volume( 0.5 );

        tune( &mut engine, 91.0 + 4.0 );
        assert!( !engine.is_locked() );
        assert_eq!( engine.active_station(), Some( 2 ) );
        assert_eq!( engine.audio().last_static(), Some( true ) );
        assert_eq!( engine.audio().last_music_volume(), Some( 0.125 ) );
    }


    #[test]
    fn test_near_threshold_is_no_signal_even_when_locked() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 5 ], &clock );
        engine.select_band( 0 );
        tune( &mut engine, 91.0 );
        assert!( engine.is_locked() );

        tune( &mut engine, 91.0 + 8.0 );
        assert!( !engine.is_locked() );
        assert_eq!( engine.active_station(), None );
        assert_eq!( engine.audio().calls.last(), Some( &AudioCall::Static( true ) ) );
        assert!( engine.audio().calls.contains( &AudioCall::Stop ) );
    }


    #[test]
    fn test_unchanged_angle_is_not_reprocessed() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 5 ], &clock );
        engine.select_band( 0 );
        tune( &mut engine, 91.0 );
        engine.audio_mut().clear();

        engine.retune();
        engine.retune();
        assert!( engine.audio().calls.is_empty() );
    }


    #[test]
    fn test_select_station_is_idempotent() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 5 ], &clock );
        engine.select_band( 0 );

        assert!( engine.select_station( 3, false ) );
        assert!( engine.select_station( 3, false ) );
        assert_eq!( engine.audio().loads().len(), 1 );
    }


    #[test]
    fn test_invalid_station_rejected() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 5 ], &clock );
        assert!( !engine.select_station( 0, false ) );

        engine.select_band( 0 );
        engine.select_station( 1, false );
        assert!( !engine.select_station( 5, true ) );
        assert_eq!( engine.active_station(), Some( 1 ) );
    }


    #[test]
    fn test_manual_select_moves_needle() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 5 ], &clock );
        engine.select_band( 0 );
        engine.drain_outbox();

        engine.select_station( 4, true );
        assert_eq!( engine.motor_angle(), 154.0 );
        assert!( !engine.is_locked() );
        assert_eq!( engine.drain_outbox(), vec![ Message::Motor { angle: 154.0 } ] );
    }


    #[test]
    fn test_next_station_rolls_into_next_band() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 3, 4 ], &clock );
        engine.select_band( 0 );
        engine.select_station( 2, true );

        engine.next_station();
        assert_eq!( engine.band_index(), Some( 1 ) );
        assert_eq!( engine.active_station(), Some( 0 ) );

        engine.prev_station();
        assert_eq!( engine.band_index(), Some( 0 ) );
        assert_eq!( engine.active_station(), Some( 2 ) );
    }


    #[test]
    fn test_station_list_ends_clamp_with_error_cue() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 3 ], &clock );
        engine.select_band( 0 );
        engine.select_station( 0, true );

        engine.prev_station();
        assert_eq!( engine.active_station(), Some( 0 ) );
        assert_eq!( engine.band_index(), Some( 0 ) );
        assert!( engine.audio().effects().contains( &Effect::Error ) );
    }


    #[test]
    fn test_clamped_station_relocks_without_static() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 5 ], &clock );
        engine.select_band( 0 );
        tune( &mut engine, 154.0 );
        assert!( engine.is_locked() );

        engine.next_station();
        assert_eq!( engine.motor_angle(), 154.0 );
        engine.retune();
        assert!( engine.is_locked() );

        engine.play_pause();
        engine.play_pause();
        assert_eq!( engine.session( 4 ).map( |s| s.state() ), Some( PlaybackState::Playing ) );
        assert_eq!( engine.audio().last_static(), Some( false ) );
    }


    #[test]
    fn test_unplayable_station_is_released() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 5 ], &clock );
        engine.select_band( 0 );
        engine.audio_mut().broken = ( 0..6 )
            .map( |t| PathBuf::from( format!( "/radio/band0/station2/{}.ogg", t ) ) )
            .collect();

        tune( &mut engine, 91.0 );
        assert_eq!( engine.active_station(), None );
        assert_eq!( engine.session( 2 ).map( |s| s.state() ), Some( PlaybackState::Stopped ) );

        engine.audio_mut().clear();
        engine.next_song();
        assert!( engine.audio().loads().is_empty() );
    }


    #[test]
    fn test_band_list_ends_clamp_with_error_cue() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 3, 3 ], &clock );
        engine.select_band( 1 );
        engine.next_band();
        assert_eq!( engine.band_index(), Some( 1 ) );
        assert_eq!( engine.audio().effects().last(), Some( &Effect::Error ) );

        engine.prev_band();
        assert_eq!( engine.band_index(), Some( 0 ) );
    }


    #[test]
    fn test_volume_clamped_and_rounded() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 3 ], &clock );
        engine.set_volume( 0.12345 );
        assert_eq!( engine.volume(), 0.123 );
        engine.set_volume( 3.0 );
        assert_eq!( engine.volume(), 1.0 );
        engine.set_volume( 0.0 );
        assert_eq!( engine.volume(), 0.008 );
        assert_eq!( engine.audio().calls.last(), Some( &AudioCall::StaticVolume( 0.008 ) ) );
    }


    #[test]
    fn test_resume_applies_saved_settings() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 3, 4 ], &clock );
        engine.resume( &SavedSettings { volume: 0.3, station: 2, band: 1 } );

        assert_eq!( engine.volume(), 0.3 );
        assert_eq!( engine.band_index(), Some( 1 ) );
        assert_eq!( engine.active_station(), Some( 2 ) );
        assert_eq!( engine.motor_angle(), angle_of( &engine, 2 ) );
        assert_eq!( engine.audio().effects()[ 0 ], Effect::PowerOn );
        assert_eq!( engine.snapshot(), SavedSettings { volume: 0.3, station: 2, band: 1 } );

        // The needle is already on the station, so the first pass only locks
        let target = angle_of( &engine, 2 );
        tune( &mut engine, target );
        assert!( engine.is_locked() );
        assert_eq!( engine.audio().loads().len(), 1 );
    }


    #[test]
    fn test_resume_falls_back_to_first_band() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 3, 4 ], &clock );
        engine.resume( &SavedSettings { volume: 0.2, station: 9, band: 5 } );
        assert_eq!( engine.band_index(), Some( 0 ) );
        assert_eq!( engine.active_station(), Some( 2 ) );
    }


    #[test]
    fn test_standby_stops_everything() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 5 ], &clock );
        engine.select_band( 0 );
        tune( &mut engine, 91.0 );
        engine.drain_outbox();

        engine.enter_standby();
        assert_eq!( engine.active_station(), None );
        assert!( engine.audio().calls.contains( &AudioCall::Stop ) );
        assert_eq!( engine.audio().last_static(), Some( false ) );
        assert_eq!( engine.drain_outbox(), vec![ Message::Power( PowerCommand::Standby ) ] );
    }


    #[test]
    fn test_two_engines_agree() {
        let clock_a = ManualClock::new( at( 100 ) );
        let clock_b = ManualClock::new( at( 5000 ) );
        let mut a = engine_with( &[ 5 ], &clock_a );
        let mut b = engine_with( &[ 5 ], &clock_b );
        a.select_band( 0 );
        b.select_band( 0 );

        clock_a.set( at( 98_765 ) );
        clock_b.set( at( 98_765 ) );
        a.select_station( 0, false );
        b.select_station( 0, false );
        assert_eq!( a.audio().loads(), b.audio().loads() );
    }


    #[test]
    fn test_track_end_advances() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 3 ], &clock );
        engine.select_band( 0 );
        engine.select_station( 0, false );

        clock.advance( Duration::from_secs( 60 ) );
        engine.audio_mut().track_ended = true;
        engine.poll_track_end();
        assert_eq!(
            engine.audio().loads().last(),
            Some( &( PathBuf::from( "/radio/band0/station0/1.ogg" ), Duration::ZERO ) )
        );
    }


    #[test]
    fn test_play_pause_silences_static() {
        let clock = ManualClock::new( at( 0 ) );
        let mut engine = engine_with( &[ 5 ], &clock );
        engine.select_band( 0 );
        tune( &mut engine, 88.0 );
        assert_eq!( engine.audio().last_static(), Some( true ) );

        engine.play_pause();
        assert_eq!( engine.session( 2 ).map( |s| s.state() ), Some( PlaybackState::Paused ) );
        assert_eq!( engine.audio().last_static(), Some( false ) );
    }
}

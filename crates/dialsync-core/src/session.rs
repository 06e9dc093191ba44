//! Synchronized station playback
//!
//! A station behaves as if it has been broadcasting since a shared epoch.
//! The session never advances a position counter: every load re-derives the
//! playing track and offset from `now - reference_time`, so independent
//! units with the same catalog agree without talking to each other.

use std::sync::Arc;
use std::time::Duration;

use crate::audio::{ AudioEngine, AudioError };
use crate::playlist::{ bucket_seed, WorkingPlaylist };
use crate::station::{ StationDescriptor, Track };


/// Current playback state of a session.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}


/// Shared timing parameters for every session.
#[derive( Debug, Clone, Copy, PartialEq )]
pub struct SyncParams {
    /// Shared time origin, as a duration since the UNIX epoch
    pub epoch: Duration,
    /// Step for fast forward and rewind
    pub seek_increment: Duration,
    /// Width of the shuffle seed bucket
    pub shuffle_bucket: Duration,
}


impl Default for SyncParams {
    fn default() -> Self {
        Self {
            epoch: Duration::from_secs( 1_577_836_800 ),
            seek_increment: Duration::from_secs( 5 ),
            shuffle_bucket: Duration::from_secs( 600 ),
        }
    }
}


/// Position within a station's broadcast.
#[derive( Debug, Clone, PartialEq )]
pub struct LivePosition {
    pub track: Track,
    pub offset: Duration,
}


/// Playback session of one station.
#[derive( Debug, Clone )]
pub struct StationSession {
    descriptor: Arc<StationDescriptor>,
    playlist: WorkingPlaylist,
    reference_time: Duration,
    state: PlaybackState,
    params: SyncParams,
}


impl StationSession {
    /// Creates a session anchored at `epoch + station offset`. Unordered
    /// stations start from the shuffle of the current time bucket.
    pub fn new( descriptor: Arc<StationDescriptor>, params: SyncParams, now: Duration ) -> Self {
        let mut playlist = WorkingPlaylist::new( descriptor.tracks() );
        if !descriptor.ordered() {
            playlist.shuffle( bucket_seed( now, params.shuffle_bucket ) );
        }

        Self {
            reference_time: anchor_time( &params, &descriptor ),
            descriptor,
            playlist,
            state: PlaybackState::Stopped,
            params,
        }
    }


    pub fn descriptor( &self ) -> &Arc<StationDescriptor> {
        &self.descriptor
    }


    pub fn state( &self ) -> PlaybackState {
        self.state
    }


    pub fn reference_time( &self ) -> Duration {
        self.reference_time
    }


    fn anchor( &self ) -> Duration {
        anchor_time( &self.params, &self.descriptor )
    }


    /// Walks the working list to the track playing at `now` and re-anchors
    /// the reference time on it.
    pub fn live_position( &mut self, now: Duration ) -> Option<LivePosition> {
        if self.playlist.is_empty() {
            return None;
        }
        let elapsed = now.saturating_sub( self.reference_time );
        let offset = self.playlist.locate( elapsed );
        let track = self.playlist.head()?.clone();

        // Keep the floor: never anchor before the epoch
        self.reference_time = now.saturating_sub( offset ).max( self.params.epoch );

        Some( LivePosition { track, offset } )
    }


    /// Loads the live track at its computed offset. A failed seek or load
    /// is retried from the start of the track.
    pub fn live_playback( &mut self, audio: &mut dyn AudioEngine, now: Duration ) {
        let Some( live ) = self.live_position( now ) else {
            self.state = PlaybackState::Stopped;
            return;
        };

        tracing::info!(
            "Playing {:?} from {:.2}s of {:.2}s ({})",
            live.track.path,
            live.offset.as_secs_f64(),
            live.track.duration.as_secs_f64(),
            self.descriptor.label()
        );

        self.start( audio, &live, now );
    }


    fn start( &mut self, audio: &mut dyn AudioEngine, live: &LivePosition, now: Duration ) {
        let mut result = audio.play_track( &live.track.path, live.offset );
        if let Err( e ) = &result {
            if !live.offset.is_zero() {
                tracing::warn!( "Load at {:?} failed ({}), starting track from the top", live.offset, e );
                self.reference_time = now;
                result = audio.play_track( &live.track.path, Duration::ZERO );
            }
        }

        match result {
            Ok(()) => self.state = PlaybackState::Playing,
            Err( e ) => self.skip_unplayable( audio, &live.track, e, now ),
        }
    }


    /// Moves past tracks that will not load, starting each from the top.
    /// Stops once every track has been tried.
    fn skip_unplayable( &mut self, audio: &mut dyn AudioEngine, failed: &Track, error: AudioError, now: Duration ) {
        tracing::warn!( "Skipping {:?}: {}", failed.path, error );

        for _ in 1..self.playlist.len() {
            self.playlist.rotate_forward();
            self.reference_time = now;
            let Some( track ) = self.playlist.head().cloned() else { break };

            match audio.play_track( &track.path, Duration::ZERO ) {
                Ok(()) => {
                    self.state = PlaybackState::Playing;
                    return;
                }
                Err( e ) => tracing::warn!( "Skipping {:?}: {}", track.path, e ),
            }
        }

        tracing::error!( "No playable track on {}", self.descriptor.label() );
        self.state = PlaybackState::Stopped;
    }


    /// Skips to the next track and starts it from the top. This unit
    /// leaves the shared schedule until the station is re-anchored.
    pub fn next_song( &mut self, audio: &mut dyn AudioEngine, now: Duration ) {
        self.playlist.rotate_forward();
        self.reference_time = now;
        self.live_playback( audio, now );
    }


    /// Steps back one track and starts it from the top.
    pub fn prev_song( &mut self, audio: &mut dyn AudioEngine, now: Duration ) {
        self.playlist.rotate_back();
        self.reference_time = now;
        self.live_playback( audio, now );
    }


    /// Called when the backend reports the head track finished.
    pub fn track_ended( &mut self, audio: &mut dyn AudioEngine, now: Duration ) {
        if self.state == PlaybackState::Playing {
            tracing::info!( "Track ended on {}, playing next", self.descriptor.label() );
            self.next_song( audio, now );
        }
    }


    /// Jumps forward by the seek increment, never anchoring before the epoch.
    pub fn fast_forward( &mut self, audio: &mut dyn AudioEngine, now: Duration ) {
        self.reference_time = self.reference_time
            .saturating_sub( self.params.seek_increment )
            .max( self.params.epoch );
        tracing::info!( "Fast forward {:?}", self.params.seek_increment );
        self.live_playback( audio, now );
    }


    /// Jumps back by the seek increment, never past the start of the head track.
    pub fn rewind( &mut self, audio: &mut dyn AudioEngine, now: Duration ) {
        self.reference_time = self.reference_time
            .saturating_add( self.params.seek_increment )
            .min( now )
            .max( self.params.epoch );
        tracing::info!( "Rewind {:?}", self.params.seek_increment );
        self.live_playback( audio, now );
    }


    /// Reshuffles with the current time bucket's seed and re-anchors on the
    /// shared schedule. Does not restart audio.
    pub fn randomize( &mut self, now: Duration ) {
        self.playlist.restore( self.descriptor.tracks() );
        self.playlist.shuffle( bucket_seed( now, self.params.shuffle_bucket ) );
        self.reference_time = self.anchor();
        tracing::info!( "Randomized song order on {}", self.descriptor.label() );
    }


    /// Restores canonical order and re-anchors on the shared schedule.
    pub fn order( &mut self ) {
        self.playlist.restore( self.descriptor.tracks() );
        self.reference_time = self.anchor();
        tracing::info!( "Restored song order on {}", self.descriptor.label() );
    }


    /// Pauses audio. The broadcast keeps running.
    pub fn pause( &mut self, audio: &mut dyn AudioEngine ) {
        if self.state == PlaybackState::Playing {
            audio.pause();
            self.state = PlaybackState::Paused;
            tracing::info!( "Paused {}", self.descriptor.label() );
        }
    }


    /// Toggles between playing and paused. Resuming rejoins the live
    /// broadcast rather than the point where it was paused.
    pub fn play_pause( &mut self, audio: &mut dyn AudioEngine, now: Duration ) {
        match self.state {
            PlaybackState::Playing => self.pause( audio ),
            PlaybackState::Paused | PlaybackState::Stopped => self.live_playback( audio, now ),
        }
    }


    /// Stops audio for this session.
    pub fn stop( &mut self, audio: &mut dyn AudioEngine ) {
        if self.state != PlaybackState::Stopped {
            audio.stop();
        }
        self.state = PlaybackState::Stopped;
    }
}


/// `epoch + offset`, or the bare epoch when the offset cannot be represented.
fn anchor_time( params: &SyncParams, descriptor: &StationDescriptor ) -> Duration {
    params.epoch.checked_add( descriptor.offset() ).unwrap_or_else( || {
        tracing::warn!( "Offset of {} is out of range, ignoring it", descriptor.label() );
        params.epoch
    } )
}


#[cfg( test )]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::testing::{ AudioCall, RecordingAudio };


    const EPOCH: u64 = 1_000_000;


    fn params() -> SyncParams {
        SyncParams {
            epoch: Duration::from_secs( EPOCH ),
            seek_increment: Duration::from_secs( 5 ),
            shuffle_bucket: Duration::from_secs( 600 ),
        }
    }


    fn station( ordered: bool, offset: u64 ) -> Arc<StationDescriptor> {
        let tracks = ( 0..6 )
            .map( |i| Track::new( format!( "/radio/am/news/{}.ogg", i ), Duration::from_secs( 60 + i * 10 ) ) )
            .collect();
        Arc::new( StationDescriptor::new( "News", "/radio/am/news", ordered, tracks, Duration::from_secs( offset ) ).unwrap() )
    }


    fn at( secs: u64 ) -> Duration {
        Duration::from_secs( EPOCH + secs )
    }


    fn load( track: usize, offset: u64 ) -> ( PathBuf, Duration ) {
        ( PathBuf::from( format!( "/radio/am/news/{}.ogg", track ) ), Duration::from_secs( offset ) )
    }


    #[test]
    fn test_position_is_elapsed_mod_total() {
        // Tracks 60..110s, total 510s
        let mut session = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        let live = session.live_position( at( 510 * 3 + 75 ) ).unwrap();
        assert_eq!( live.track.path.to_str(), Some( "/radio/am/news/1.ogg" ) );
        assert_eq!( live.offset, Duration::from_secs( 15 ) );
    }


    #[test]
    fn test_station_offset_shifts_schedule() {
        let mut plain = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        let mut shifted = StationSession::new( station( true, 30 ), params(), at( 0 ) );
        let a = plain.live_position( at( 100 ) ).unwrap();
        let b = shifted.live_position( at( 130 ) ).unwrap();
        assert_eq!( a, b );
    }


    #[test]
    fn test_repeated_loads_stay_on_schedule() {
        let mut session = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        session.live_position( at( 200 ) );
        let later = session.live_position( at( 1000 ) ).unwrap();

        let mut fresh = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        assert_eq!( fresh.live_position( at( 1000 ) ).unwrap(), later );
    }


    #[test]
    fn test_two_units_agree_on_unordered_station() {
        let mut a = StationSession::new( station( false, 0 ), params(), at( 10 ) );
        let mut b = StationSession::new( station( false, 0 ), params(), at( 20 ) );
        assert_eq!( a.live_position( at( 4321 ) ), b.live_position( at( 4321 ) ) );
    }


    #[test]
    fn test_live_playback_loads_head_at_offset() {
        let mut audio = RecordingAudio::default();
        let mut session = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        session.live_playback( &mut audio, at( 65 ) );
        assert_eq!( session.state(), PlaybackState::Playing );
        assert_eq!( audio.loads(), vec![ load( 1, 5 ) ] );
    }


    #[test]
    fn test_failed_seek_retries_from_start() {
        let mut audio = RecordingAudio::default();
        audio.fail_nonzero_offsets = true;
        let mut session = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        session.live_playback( &mut audio, at( 30 ) );
        assert_eq!( session.state(), PlaybackState::Playing );
        assert_eq!( audio.loads().last(), Some( &load( 0, 0 ) ) );
        assert_eq!( session.reference_time(), at( 30 ) );
    }


    #[test]
    fn test_unplayable_track_is_skipped() {
        let mut audio = RecordingAudio::default();
        audio.broken.push( load( 1, 0 ).0 );
        let mut session = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        session.live_playback( &mut audio, at( 65 ) );

        assert_eq!( session.state(), PlaybackState::Playing );
        assert_eq!( audio.loads(), vec![ load( 1, 5 ), load( 1, 0 ), load( 2, 0 ) ] );
        assert_eq!( session.reference_time(), at( 65 ) );
    }


    #[test]
    fn test_station_with_no_playable_track_stops() {
        let mut audio = RecordingAudio::default();
        audio.broken = ( 0..6 ).map( |i| load( i, 0 ).0 ).collect();
        let mut session = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        session.live_playback( &mut audio, at( 0 ) );

        assert_eq!( session.state(), PlaybackState::Stopped );
        assert_eq!( audio.loads().len(), 6 );
    }


    #[test]
    fn test_out_of_range_offset_anchors_at_epoch() {
        let mut session = StationSession::new( station( true, u64::MAX ), params(), at( 0 ) );
        assert_eq!( session.reference_time(), at( 0 ) );

        session.randomize( at( 10 ) );
        session.order();
        let live = session.live_position( at( 75 ) ).unwrap();
        assert_eq!( live.track.path.to_str(), Some( "/radio/am/news/1.ogg" ) );
        assert_eq!( live.offset, Duration::from_secs( 15 ) );
    }


    #[test]
    fn test_next_song_restarts_at_zero() {
        let mut audio = RecordingAudio::default();
        let mut session = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        session.live_playback( &mut audio, at( 30 ) );
        session.next_song( &mut audio, at( 31 ) );
        assert_eq!( audio.loads().last(), Some( &load( 1, 0 ) ) );
        session.prev_song( &mut audio, at( 32 ) );
        assert_eq!( audio.loads().last(), Some( &load( 0, 0 ) ) );
    }


    #[test]
    fn test_fast_forward_and_rewind() {
        let mut audio = RecordingAudio::default();
        let mut session = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        session.live_playback( &mut audio, at( 100 ) );
        assert_eq!( audio.loads().last(), Some( &load( 1, 40 ) ) );
        session.fast_forward( &mut audio, at( 100 ) );
        assert_eq!( audio.loads().last(), Some( &load( 1, 45 ) ) );
        session.rewind( &mut audio, at( 100 ) );
        assert_eq!( audio.loads().last(), Some( &load( 1, 40 ) ) );
    }


    #[test]
    fn test_fast_forward_floored_at_epoch() {
        let mut audio = RecordingAudio::default();
        let mut session = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        session.fast_forward( &mut audio, at( 2 ) );
        assert_eq!( session.reference_time(), at( 0 ) );
        assert_eq!( audio.loads().last().unwrap().1, Duration::from_secs( 2 ) );
    }


    #[test]
    fn test_rewind_never_goes_negative() {
        let mut audio = RecordingAudio::default();
        let mut session = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        session.live_playback( &mut audio, at( 2 ) );
        session.rewind( &mut audio, at( 2 ) );
        assert_eq!( audio.loads().last().unwrap().1, Duration::ZERO );
    }


    #[test]
    fn test_play_pause_rejoins_live() {
        let mut audio = RecordingAudio::default();
        let mut session = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        session.live_playback( &mut audio, at( 10 ) );
        session.play_pause( &mut audio, at( 11 ) );
        assert_eq!( session.state(), PlaybackState::Paused );
        assert!( audio.calls.contains( &AudioCall::Pause ) );

        session.play_pause( &mut audio, at( 40 ) );
        assert_eq!( session.state(), PlaybackState::Playing );
        assert_eq!( audio.loads().last().unwrap().1, Duration::from_secs( 40 ) );
    }


    #[test]
    fn test_order_restores_canonical_schedule() {
        let mut session = StationSession::new( station( false, 0 ), params(), at( 0 ) );
        session.order();
        let mut ordered = StationSession::new( station( true, 0 ), params(), at( 0 ) );
        assert_eq!( session.live_position( at( 777 ) ), ordered.live_position( at( 777 ) ) );
    }
}

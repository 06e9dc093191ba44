//! Working track list of a tuned station
//!
//! A rotating copy of a station's tracks. The head is always the track that
//! is (or would be) playing; rotation walks the broadcast forward or back
//! without touching the station descriptor.

use std::collections::VecDeque;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::station::Track;


/// Rotating track list.
#[derive( Debug, Clone, PartialEq )]
pub struct WorkingPlaylist {
    tracks: VecDeque<Track>,
}


impl WorkingPlaylist {
    /// Creates a working copy in the given order.
    pub fn new( tracks: &[Track] ) -> Self {
        Self { tracks: tracks.iter().cloned().collect() }
    }


    /// The track at the head of the list.
    pub fn head( &self ) -> Option<&Track> {
        self.tracks.front()
    }


    /// Gets the number of tracks.
    pub fn len( &self ) -> usize {
        self.tracks.len()
    }


    /// Returns true if the list is empty.
    pub fn is_empty( &self ) -> bool {
        self.tracks.is_empty()
    }


    /// Combined duration of all tracks.
    pub fn total_duration( &self ) -> Duration {
        self.tracks
            .iter()
            .fold( Duration::ZERO, |sum, t| sum.saturating_add( t.duration ) )
    }


    /// Moves the head to the next track; the old head goes to the back.
    pub fn rotate_forward( &mut self ) {
        if !self.tracks.is_empty() {
            self.tracks.rotate_left( 1 );
        }
    }


    /// Moves the last track to the head.
    pub fn rotate_back( &mut self ) {
        if !self.tracks.is_empty() {
            self.tracks.rotate_right( 1 );
        }
    }


    /// Walks the list to whichever track is playing `elapsed` after the
    /// start of the current head, looping the whole list as needed.
    ///
    /// @param elapsed - Time since the head track started
    ///
    /// @returns Offset into the new head track, always below its duration
    pub fn locate( &mut self, elapsed: Duration ) -> Duration {
        let total = self.total_duration().as_nanos();
        if total == 0 {
            return Duration::ZERO;
        }

        let mut position = elapsed.as_nanos() % total;

        // Bounded by one pass; zero-length tracks are stepped over
        for _ in 0..self.tracks.len() {
            let head = match self.tracks.front() {
                Some( t ) => t.duration.as_nanos(),
                None => break,
            };
            if position < head {
                break;
            }
            position -= head;
            self.tracks.rotate_left( 1 );
        }

        let head = self.tracks.front().map( |t| t.duration.as_nanos() ).unwrap_or( 0 );
        if position >= head {
            return Duration::ZERO;
        }

        Duration::from_nanos( position as u64 )
    }


    /// Shuffles the list with a deterministic seed, so lists with the same
    /// tracks shuffled with the same seed end up in the same order.
    pub fn shuffle( &mut self, seed: u64 ) {
        let mut rng = StdRng::seed_from_u64( seed );
        self.tracks.make_contiguous().shuffle( &mut rng );
    }


    /// Restores the given canonical order.
    pub fn restore( &mut self, canonical: &[Track] ) {
        self.tracks = canonical.iter().cloned().collect();
    }
}


/// Shuffle seed shared by every unit within the same time bucket.
///
/// @param now - Wall-clock time since the UNIX epoch
/// @param bucket - Bucket width; zero is treated as one second
pub fn bucket_seed( now: Duration, bucket: Duration ) -> u64 {
    let width = bucket.as_secs_f64().max( 1.0 );
    ( now.as_secs_f64() / width ).round() as u64
}


#[cfg( test )]
mod tests {
    use super::*;


    fn tracks( secs: &[u64] ) -> Vec<Track> {
        secs.iter()
            .enumerate()
            .map( |( i, s )| Track::new( format!( "{}.ogg", i ), Duration::from_secs( *s ) ) )
            .collect()
    }


    fn head_name( list: &WorkingPlaylist ) -> String {
        list.head().unwrap().path.display().to_string()
    }


    #[test]
    fn test_locate_within_first_track() {
        let mut list = WorkingPlaylist::new( &tracks( &[ 100, 50, 30 ] ) );
        assert_eq!( list.locate( Duration::from_secs( 42 ) ), Duration::from_secs( 42 ) );
        assert_eq!( head_name( &list ), "0.ogg" );
    }


    #[test]
    fn test_locate_skips_tracks() {
        let mut list = WorkingPlaylist::new( &tracks( &[ 100, 50, 30 ] ) );
        assert_eq!( list.locate( Duration::from_secs( 160 ) ), Duration::from_secs( 10 ) );
        assert_eq!( head_name( &list ), "2.ogg" );
    }


    #[test]
    fn test_locate_loops_whole_list() {
        let mut list = WorkingPlaylist::new( &tracks( &[ 100, 50, 30 ] ) );
        assert_eq!( list.locate( Duration::from_secs( 180 * 7 + 120 ) ), Duration::from_secs( 20 ) );
        assert_eq!( head_name( &list ), "1.ogg" );
    }


    #[test]
    fn test_locate_exact_boundary_starts_next_track() {
        let mut list = WorkingPlaylist::new( &tracks( &[ 100, 50, 30 ] ) );
        assert_eq!( list.locate( Duration::from_secs( 100 ) ), Duration::ZERO );
        assert_eq!( head_name( &list ), "1.ogg" );
    }


    #[test]
    fn test_locate_offset_always_below_track_duration() {
        let durations = [ 7, 0, 13, 1, 29 ];
        for millis in ( 0..200_000 ).step_by( 997 ) {
            let mut list = WorkingPlaylist::new( &tracks( &durations ) );
            let offset = list.locate( Duration::from_millis( millis ) );
            assert!( offset < list.head().unwrap().duration, "elapsed {}ms", millis );
        }
    }


    #[test]
    fn test_rotate_back_and_forward() {
        let mut list = WorkingPlaylist::new( &tracks( &[ 1, 2, 3 ] ) );
        list.rotate_back();
        assert_eq!( head_name( &list ), "2.ogg" );
        list.rotate_forward();
        list.rotate_forward();
        assert_eq!( head_name( &list ), "1.ogg" );
    }


    #[test]
    fn test_same_seed_same_order() {
        let source = tracks( &[ 1, 2, 3, 4, 5, 6, 7, 8, 9, 10 ] );
        let mut a = WorkingPlaylist::new( &source );
        let mut b = WorkingPlaylist::new( &source );
        a.shuffle( 2_960_000 );
        b.shuffle( 2_960_000 );
        assert_eq!( a, b );

        a.restore( &source );
        assert_eq!( a, WorkingPlaylist::new( &source ) );
    }


    #[test]
    fn test_bucket_seed_rounds_to_bucket() {
        let bucket = Duration::from_secs( 600 );
        assert_eq!( bucket_seed( Duration::from_secs( 6_000 ), bucket ), 10 );
        assert_eq!( bucket_seed( Duration::from_secs( 6_290 ), bucket ), 10 );
        assert_eq!( bucket_seed( Duration::from_secs( 6_310 ), bucket ), 11 );
    }
}

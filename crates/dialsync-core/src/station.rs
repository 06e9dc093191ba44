//! Station and band descriptors
//!
//! Descriptors are produced once by the catalog and never mutated. Playback
//! state lives in [`crate::session::StationSession`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;


/// Errors raised while validating a station descriptor.
#[derive( Debug, Error, PartialEq )]
pub enum StationError {
    #[error( "Station '{0}' has no tracks" )]
    Empty( String ),

    #[error( "Station '{0}' has a total duration of zero" )]
    ZeroLength( String ),

    #[error( "Station '{0}' is too long to schedule" )]
    TooLong( String ),
}


/// One audio file with its known duration.
#[derive( Debug, Clone, PartialEq )]
pub struct Track {
    pub path: PathBuf,
    pub duration: Duration,
}


impl Track {
    pub fn new( path: impl Into<PathBuf>, duration: Duration ) -> Self {
        Self { path: path.into(), duration }
    }
}


/// Immutable description of one simulated broadcast.
#[derive( Debug, Clone, PartialEq )]
pub struct StationDescriptor {
    label: String,
    folder: PathBuf,
    ordered: bool,
    tracks: Vec<Track>,
    total: Duration,
    offset: Duration,
}


impl StationDescriptor {
    /// Builds a descriptor, rejecting stations that could never be tuned.
    ///
    /// @param label - Display name
    /// @param folder - Station folder, used as the cache key
    /// @param ordered - False if the working list is shuffled
    /// @param tracks - Canonical track order
    /// @param offset - Phase offset from the synchronization epoch
    pub fn new(
        label: impl Into<String>,
        folder: impl Into<PathBuf>,
        ordered: bool,
        tracks: Vec<Track>,
        offset: Duration,
    ) -> Result<Self, StationError> {
        let label = label.into();
        if tracks.is_empty() {
            return Err( StationError::Empty( label ) );
        }

        let total = tracks
            .iter()
            .try_fold( Duration::ZERO, |sum, t| sum.checked_add( t.duration ) );
        let Some( total ) = total else {
            return Err( StationError::TooLong( label ) );
        };
        if total.is_zero() {
            return Err( StationError::ZeroLength( label ) );
        }

        Ok( Self {
            label,
            folder: folder.into(),
            ordered,
            tracks,
            total,
            offset,
        })
    }


    pub fn label( &self ) -> &str {
        &self.label
    }


    pub fn folder( &self ) -> &PathBuf {
        &self.folder
    }


    /// True if tracks play in canonical order.
    pub fn ordered( &self ) -> bool {
        self.ordered
    }


    /// Tracks in canonical order.
    pub fn tracks( &self ) -> &[Track] {
        &self.tracks
    }


    /// Combined length of the whole playlist.
    pub fn total_duration( &self ) -> Duration {
        self.total
    }


    pub fn offset( &self ) -> Duration {
        self.offset
    }
}


/// A group of stations sharing one sweep of the dial.
#[derive( Debug, Clone )]
pub struct Band {
    index: usize,
    name: String,
    stations: Vec<Arc<StationDescriptor>>,
}


impl Band {
    pub fn new( index: usize, name: impl Into<String>, stations: Vec<StationDescriptor> ) -> Self {
        Self {
            index,
            name: name.into(),
            stations: stations.into_iter().map( Arc::new ).collect(),
        }
    }


    pub fn index( &self ) -> usize {
        self.index
    }


    pub fn name( &self ) -> &str {
        &self.name
    }


    pub fn stations( &self ) -> &[Arc<StationDescriptor>] {
        &self.stations
    }


    pub fn station_count( &self ) -> usize {
        self.stations.len()
    }


    /// A band needs at least two stations to spread across the dial.
    pub fn is_selectable( &self ) -> bool {
        self.stations.len() > 1
    }


    /// Angular distance per station over a dial of `dial_range` degrees.
    pub fn tuning_separation( &self, dial_range: f64 ) -> f64 {
        if self.stations.is_empty() {
            return dial_range;
        }
        dial_range / self.stations.len() as f64
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_descriptor_sums_durations() {
        let station = StationDescriptor::new(
            "Swing",
            "/radio/am/swing",
            true,
            vec![
                Track::new( "a.ogg", Duration::from_secs( 120 ) ),
                Track::new( "b.ogg", Duration::from_secs( 80 ) ),
            ],
            Duration::ZERO,
        ).unwrap();
        assert_eq!( station.total_duration(), Duration::from_secs( 200 ) );
    }


    #[test]
    fn test_empty_station_rejected() {
        let result = StationDescriptor::new( "Dead air", "/x", true, vec![], Duration::ZERO );
        assert_eq!( result, Err( StationError::Empty( "Dead air".into() ) ) );
    }


    #[test]
    fn test_zero_length_station_rejected() {
        let result = StationDescriptor::new(
            "Silence",
            "/x",
            true,
            vec![ Track::new( "a.ogg", Duration::ZERO ) ],
            Duration::ZERO,
        );
        assert!( matches!( result, Err( StationError::ZeroLength( _ ) ) ) );
    }


    #[test]
    fn test_overflowing_station_rejected() {
        let result = StationDescriptor::new(
            "Forever",
            "/x",
            true,
            vec![
                Track::new( "a.ogg", Duration::MAX ),
                Track::new( "b.ogg", Duration::from_secs( 1 ) ),
            ],
            Duration::ZERO,
        );
        assert_eq!( result, Err( StationError::TooLong( "Forever".into() ) ) );
    }


    #[test]
    fn test_band_separation_and_selectable() {
        let one = StationDescriptor::new(
            "One",
            "/x",
            true,
            vec![ Track::new( "a.ogg", Duration::from_secs( 1 ) ) ],
            Duration::ZERO,
        ).unwrap();
        let band = Band::new( 0, "AM", vec![ one.clone() ] );
        assert!( !band.is_selectable() );

        let band = Band::new( 0, "AM", vec![ one.clone(), one.clone(), one.clone(), one.clone(), one ] );
        assert!( band.is_selectable() );
        assert!( ( band.tuning_separation( 154.0 ) - 30.8 ).abs() < 1e-9 );
    }
}

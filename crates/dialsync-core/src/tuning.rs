//! Dial geometry
//!
//! Maps needle angles to station indices and back, and classifies how close
//! the needle is to a station. Distances are in degrees and compared against
//! two fixed thresholds.


/// Where the needle sits relative to the nearest station.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Zone {
    /// Close enough to play in the clear.
    Locked,
    /// Station fades in under static.
    Seeking,
    /// Static only.
    NoSignal,
}


/// Result of one re-tuning measurement.
#[derive( Debug, Clone, Copy, PartialEq )]
pub struct Reading {
    pub nearest: usize,
    pub target_angle: f64,
    pub distance: f64,
    pub zone: Zone,
}


/// Angular layout of the dial.
#[derive( Debug, Clone, Copy, PartialEq )]
pub struct DialGeometry {
    pub min_angle: f64,
    pub max_angle: f64,
    /// Dead zone at each end of the dial where no station sits
    pub end_zone: f64,
    /// Distance at or below which a station locks
    pub lock_on: f64,
    /// Distance at or above which nothing is heard but static
    pub near: f64,
}


impl Default for DialGeometry {
    fn default() -> Self {
        Self {
            min_angle: 14.0,
            max_angle: 168.0,
            end_zone: 14.0,
            lock_on: 2.0,
            near: 8.0,
        }
    }
}


/// Linear interpolation, clamped to the output range.
fn map_range( x: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64 ) -> f64 {
    let mapped = ( x - in_min ) * ( out_max - out_min ) / ( in_max - in_min ) + out_min;
    let ( lo, hi ) = if out_min <= out_max { ( out_min, out_max ) } else { ( out_max, out_min ) };
    mapped.clamp( lo, hi )
}


impl DialGeometry {
    /// Full travel of the needle in degrees.
    pub fn range( &self ) -> f64 {
        self.max_angle - self.min_angle
    }


    fn first_station( &self ) -> f64 {
        self.min_angle + self.end_zone
    }


    fn last_station( &self ) -> f64 {
        self.max_angle - self.end_zone
    }


    /// Canonical angle of station `index` out of `count`.
    ///
    /// A single station sits at the start of the usable range.
    pub fn station_angle( &self, index: usize, count: usize ) -> f64 {
        if count < 2 {
            return self.first_station();
        }
        map_range(
            index as f64,
            0.0,
            ( count - 1 ) as f64,
            self.first_station(),
            self.last_station(),
        )
    }


    /// Index of the station closest to `angle`, clamped to `0..count`.
    pub fn nearest_station( &self, angle: f64, count: usize ) -> usize {
        if count < 2 {
            return 0;
        }
        let position = map_range(
            angle,
            self.first_station(),
            self.last_station(),
            0.0,
            ( count - 1 ) as f64,
        );
        ( position.round() as usize ).min( count - 1 )
    }


    /// Classifies an angular distance. Both boundaries are closed toward
    /// the stricter zone: `lock_on` locks and `near` is no signal.
    pub fn classify( &self, distance: f64 ) -> Zone {
        if distance <= self.lock_on {
            Zone::Locked
        } else if distance < self.near {
            Zone::Seeking
        } else {
            Zone::NoSignal
        }
    }


    /// Measures the needle against a band of `count` stations.
    pub fn read( &self, angle: f64, count: usize ) -> Reading {
        let nearest = self.nearest_station( angle, count );
        let target_angle = self.station_angle( nearest, count );
        let distance = ( target_angle - angle ).abs();
        Reading {
            nearest,
            target_angle,
            distance,
            zone: self.classify( distance ),
        }
    }


    /// Gain applied to station audio while seeking: inversely
    /// proportional to distance, clamped to `[min_gain, 1]`.
    pub fn seek_gain( &self, distance: f64, min_gain: f32 ) -> f32 {
        if distance <= 0.0 {
            return 1.0;
        }
        ( ( 1.0 / distance ) as f32 ).clamp( min_gain.min( 1.0 ), 1.0 )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_station_angles_span_usable_range() {
        let dial = DialGeometry::default();
        assert_eq!( dial.station_angle( 0, 5 ), 28.0 );
        assert_eq!( dial.station_angle( 4, 5 ), 154.0 );
        assert_eq!( dial.station_angle( 2, 5 ), 91.0 );
    }


    #[test]
    fn test_round_trip_every_station() {
        let dial = DialGeometry::default();
        for count in 2..40 {
            for k in 0..count {
                let angle = dial.station_angle( k, count );
                assert_eq!( dial.nearest_station( angle, count ), k, "k={} n={}", k, count );
            }
        }
    }


    #[test]
    fn test_nearest_clamps_outside_range() {
        let dial = DialGeometry::default();
        assert_eq!( dial.nearest_station( 0.0, 5 ), 0 );
        assert_eq!( dial.nearest_station( 180.0, 5 ), 4 );
    }


    #[test]
    fn test_scenario_angle_ninety() {
        let dial = DialGeometry::default();
        let reading = dial.read( 90.0, 5 );
        assert_eq!( reading.nearest, 2 );
        assert_eq!( reading.target_angle, dial.station_angle( 2, 5 ) );
        assert_eq!( reading.distance, 1.0 );
        assert_eq!( reading.zone, Zone::Locked );
    }


    #[test]
    fn test_zone_boundaries() {
        let dial = DialGeometry::default();
        assert_eq!( dial.classify( 0.0 ), Zone::Locked );
        assert_eq!( dial.classify( 2.0 ), Zone::Locked );
        assert_eq!( dial.classify( 2.0001 ), Zone::Seeking );
        assert_eq!( dial.classify( 7.999 ), Zone::Seeking );
        assert_eq!( dial.classify( 8.0 ), Zone::NoSignal );
        assert_eq!( dial.classify( 40.0 ), Zone::NoSignal );
    }


    #[test]
    fn test_seek_gain_clamped() {
        let dial = DialGeometry::default();
        assert_eq!( dial.seek_gain( 4.0, 0.008 ), 0.25 );
        assert_eq!( dial.seek_gain( 0.5, 0.008 ), 1.0 );
        assert_eq!( dial.seek_gain( 1000.0, 0.008 ), 0.008 );
    }
}

//! Wall-clock access
//!
//! Every synchronized position is derived from wall-clock time, so the clock
//! is injected rather than read ad hoc. Times are `Duration`s since the
//! UNIX epoch.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{ Duration, SystemTime, UNIX_EPOCH };


/// Source of wall-clock time.
pub trait Clock {
    /// Returns the current time as a duration since the UNIX epoch.
    fn now( &self ) -> Duration;
}


/// The system real-time clock.
#[derive( Debug, Clone, Copy, Default )]
pub struct SystemClock;


impl Clock for SystemClock {
    fn now( &self ) -> Duration {
        // A clock set before 1970 reads as the epoch itself
        SystemTime::now()
            .duration_since( UNIX_EPOCH )
            .unwrap_or_default()
    }
}


/// A manually driven clock. Clones share the same time.
#[derive( Debug, Clone, Default )]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}


impl ManualClock {
    /// Creates a clock reading `start`.
    pub fn new( start: Duration ) -> Self {
        Self { now: Rc::new( Cell::new( start ) ) }
    }


    /// Sets the current time.
    pub fn set( &self, now: Duration ) {
        self.now.set( now );
    }


    /// Moves the clock forward.
    pub fn advance( &self, by: Duration ) {
        self.now.set( self.now.get() + by );
    }
}


impl Clock for ManualClock {
    fn now( &self ) -> Duration {
        self.now.get()
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new( Duration::from_secs( 10 ) );
        let other = clock.clone();
        clock.advance( Duration::from_secs( 5 ) );
        assert_eq!( other.now(), Duration::from_secs( 15 ) );
    }


    #[test]
    fn test_system_clock_is_after_epoch() {
        assert!( SystemClock.now() > Duration::from_secs( 1_500_000_000 ) );
    }
}

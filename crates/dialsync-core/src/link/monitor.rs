//! Heartbeat supervision and power state
//!
//! Pure state machine: it is told when heartbeats arrive and what time it
//! is, and reports the transitions the controller must act on.

use std::time::Duration;


/// Where the radio is in its power lifecycle.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum PowerState {
    /// No live peer. Audio is idle and dial input is ignored.
    WaitingForPeer,
    Active,
    Standby,
}


/// A change the controller must act on.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Transition {
    /// First heartbeat after waiting; resume from saved settings.
    PeerFound,
    /// Heartbeats stopped; stop audio and wait.
    PeerLost { from: PowerState },
    EnterStandby,
    Resume,
}


#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct LinkTiming {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}


impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs( 2 ),
            heartbeat_timeout: Duration::from_secs( 30 ),
        }
    }
}


pub struct LinkMonitor {
    state: PowerState,
    timing: LinkTiming,
    peer_name: String,
    last_received: Option<Duration>,
    last_sent: Option<Duration>,
}


impl LinkMonitor {
    pub fn new( timing: LinkTiming, peer_name: impl Into<String> ) -> Self {
        Self {
            state: PowerState::WaitingForPeer,
            timing,
            peer_name: peer_name.into(),
            last_received: None,
            last_sent: None,
        }
    }


    pub fn state( &self ) -> PowerState {
        self.state
    }


    /// Records a heartbeat from `sender`.
    ///
    /// Heartbeats from anyone but the configured peer are ignored.
    ///
    /// @returns `PeerFound` if this heartbeat ends a wait
    pub fn heartbeat_received( &mut self, sender: &str, now: Duration ) -> Option<Transition> {
        if sender != self.peer_name {
            tracing::debug!( "Ignoring heartbeat from {}", sender );
            return None;
        }

        self.last_received = Some( now );

        if self.state == PowerState::WaitingForPeer {
            tracing::info!( "Peer {} is alive", self.peer_name );
            self.state = PowerState::Active;
            return Some( Transition::PeerFound );
        }

        None
    }


    /// True if our own heartbeat should go out now. Marks it as sent.
    pub fn heartbeat_due( &mut self, now: Duration ) -> bool {
        let due = match self.last_sent {
            Some( sent ) => now.saturating_sub( sent ) >= self.timing.heartbeat_interval,
            None => true,
        };

        if due {
            self.last_sent = Some( now );
        }
        due
    }


    /// Drops back to waiting once the peer has been silent for longer than
    /// the timeout.
    pub fn check_timeout( &mut self, now: Duration ) -> Option<Transition> {
        if self.state == PowerState::WaitingForPeer {
            return None;
        }

        let silent = match self.last_received {
            Some( at ) => now.saturating_sub( at ),
            None => Duration::MAX,
        };

        if silent <= self.timing.heartbeat_timeout {
            return None;
        }

        let from = self.state;
        tracing::warn!( "No heartbeat from {} for {:?}, waiting for it to return", self.peer_name, silent );
        self.state = PowerState::WaitingForPeer;
        self.last_received = None;
        Some( Transition::PeerLost { from } )
    }


    /// Active to Standby. Ignored in any other state.
    pub fn request_standby( &mut self ) -> Option<Transition> {
        if self.state != PowerState::Active {
            return None;
        }
        self.state = PowerState::Standby;
        Some( Transition::EnterStandby )
    }


    /// Standby to Active. Ignored in any other state.
    pub fn request_resume( &mut self ) -> Option<Transition> {
        if self.state != PowerState::Standby {
            return None;
        }
        self.state = PowerState::Active;
        Some( Transition::Resume )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn secs( s: u64 ) -> Duration {
        Duration::from_secs( s )
    }


    fn monitor() -> LinkMonitor {
        LinkMonitor::new( LinkTiming::default(), "Pico" )
    }


    #[test]
    fn test_first_peer_heartbeat_activates() {
        let mut m = monitor();
        assert_eq!( m.state(), PowerState::WaitingForPeer );
        assert_eq!( m.heartbeat_received( "Zero", secs( 1 ) ), None );
        assert_eq!( m.state(), PowerState::WaitingForPeer );

        assert_eq!( m.heartbeat_received( "Pico", secs( 2 ) ), Some( Transition::PeerFound ) );
        assert_eq!( m.state(), PowerState::Active );
        assert_eq!( m.heartbeat_received( "Pico", secs( 4 ) ), None );
    }


    #[test]
    fn test_timeout_is_strictly_longer_than_limit() {
        let mut m = monitor();
        m.heartbeat_received( "Pico", secs( 100 ) );

        assert_eq!( m.check_timeout( secs( 130 ) ), None );
        assert_eq!(
            m.check_timeout( secs( 131 ) ),
            Some( Transition::PeerLost { from: PowerState::Active } )
        );
        assert_eq!( m.state(), PowerState::WaitingForPeer );
        assert_eq!( m.check_timeout( secs( 500 ) ), None );
    }


    #[test]
    fn test_standby_times_out_too() {
        let mut m = monitor();
        m.heartbeat_received( "Pico", secs( 0 ) );
        assert_eq!( m.request_standby(), Some( Transition::EnterStandby ) );
        assert_eq!(
            m.check_timeout( secs( 31 ) ),
            Some( Transition::PeerLost { from: PowerState::Standby } )
        );

        assert_eq!( m.heartbeat_received( "Pico", secs( 40 ) ), Some( Transition::PeerFound ) );
        assert_eq!( m.state(), PowerState::Active );
    }


    #[test]
    fn test_power_requests_only_from_matching_state() {
        let mut m = monitor();
        assert_eq!( m.request_standby(), None );
        assert_eq!( m.request_resume(), None );

        m.heartbeat_received( "Pico", secs( 0 ) );
        assert_eq!( m.request_resume(), None );
        assert_eq!( m.request_standby(), Some( Transition::EnterStandby ) );
        assert_eq!( m.request_standby(), None );
        assert_eq!( m.request_resume(), Some( Transition::Resume ) );
        assert_eq!( m.state(), PowerState::Active );
    }


    #[test]
    fn test_heartbeat_cadence() {
        let mut m = monitor();
        assert!( m.heartbeat_due( secs( 10 ) ) );
        assert!( !m.heartbeat_due( secs( 11 ) ) );
        assert!( m.heartbeat_due( secs( 12 ) ) );
        assert!( !m.heartbeat_due( Duration::from_millis( 13_999 ) ) );
        assert!( m.heartbeat_due( secs( 14 ) ) );
    }
}

//! Main loop controller
//!
//! [`Radio`] owns the tuning engine, the link and the persisted settings,
//! and advances all of them by one [`Radio::tick`] at a time. Nothing here
//! blocks: the binary decides how often to tick.

use std::rc::Rc;

use crate::audio::AudioEngine;
use crate::clock::Clock;
use crate::engine::TuningEngine;
use crate::input::{ InputEvent, InputSource };
use crate::link::{ ButtonAction, LinkError, LinkMonitor, Message, PowerCommand, PowerState, Transition, Transport };
use crate::settings::{ load_or_default, SettingsStore };


/// Why the loop should stop.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum ExitKind {
    /// Peer asked the radio to quit, leaving the host running
    SoftExit,
    /// Peer asked for the whole unit to power off
    Shutdown,
    /// Local quit key
    Quit,
}


impl ExitKind {
    /// Process exit code for the supervisor.
    pub fn code( self ) -> i32 {
        match self {
            ExitKind::SoftExit | ExitKind::Quit => 0,
            ExitKind::Shutdown => 3,
        }
    }
}


#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum TickOutcome {
    Continue,
    Exit( ExitKind ),
}


/// The radio: engine, link and settings driven by one cooperative loop.
pub struct Radio<A: AudioEngine> {
    engine: TuningEngine<A>,
    transport: Box<dyn Transport>,
    store: Box<dyn SettingsStore>,
    inputs: Vec<Box<dyn InputSource>>,
    monitor: LinkMonitor,
    clock: Rc<dyn Clock>,
    local_name: String,
}


impl<A: AudioEngine> Radio<A> {
    /// @param local_name - Name sent in our heartbeats
    pub fn new(
        engine: TuningEngine<A>,
        transport: Box<dyn Transport>,
        store: Box<dyn SettingsStore>,
        monitor: LinkMonitor,
        clock: Rc<dyn Clock>,
        local_name: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            transport,
            store,
            inputs: Vec::new(),
            monitor,
            clock,
            local_name: local_name.into(),
        }
    }


    /// Adds a source of local control events.
    pub fn add_input( &mut self, input: Box<dyn InputSource> ) {
        self.inputs.push( input );
    }


    pub fn engine( &self ) -> &TuningEngine<A> {
        &self.engine
    }


    pub fn state( &self ) -> PowerState {
        self.monitor.state()
    }


    pub fn is_link_up( &self ) -> bool {
        self.transport.is_up()
    }


    /// Runs one iteration of the loop.
    pub fn tick( &mut self ) -> TickOutcome {
        if let Some( exit ) = self.poll_link() {
            return TickOutcome::Exit( exit );
        }

        if let Some( exit ) = self.poll_inputs() {
            return TickOutcome::Exit( exit );
        }

        if self.monitor.state() == PowerState::Active {
            self.engine.retune();
        }
        self.engine.service();
        self.engine.poll_track_end();

        let now = self.clock.now();
        if let Some( Transition::PeerLost { from } ) = self.monitor.check_timeout( now ) {
            if from == PowerState::Active {
                self.engine.enter_standby();
                self.persist();
            }
        }

        self.flush();

        if self.monitor.heartbeat_due( now ) {
            self.send( &Message::Heartbeat { sender: self.local_name.clone() } );
        }

        TickOutcome::Continue
    }


    /// Handles at most one inbound message.
    fn poll_link( &mut self ) -> Option<ExitKind> {
        match self.transport.poll() {
            Ok( Some( message ) ) => self.dispatch( message ),
            Ok( None ) => None,
            Err( e @ LinkError::Disconnected( _ ) ) => {
                tracing::error!( "{}", e );
                None
            }
            Err( e ) => {
                tracing::warn!( "Dropped inbound message: {}", e );
                None
            }
        }
    }


    fn dispatch( &mut self, message: Message ) -> Option<ExitKind> {
        tracing::debug!( "Received {}", message );

        let active = self.monitor.state() == PowerState::Active;
        match message {
            Message::Heartbeat { sender } => {
                let now = self.clock.now();
                if let Some( Transition::PeerFound ) = self.monitor.heartbeat_received( &sender, now ) {
                    self.resume_from_store();
                }
            }
            Message::Power( command ) => return self.power( command ),
            Message::Motor { angle } if active => self.engine.set_motor_angle( angle ),
            Message::Button { action, id } if active => self.button( action, id ),
            Message::Volume { level } if active => self.engine.set_volume( level ),
            Message::Info { text } => tracing::info!( "Peer: {}", text ),
            Message::Device( command ) => tracing::debug!( "Ignoring device command {:?}", command ),
            other => tracing::debug!( "Ignoring {} while {:?}", other.kind(), self.monitor.state() ),
        }
        None
    }


    fn power( &mut self, command: PowerCommand ) -> Option<ExitKind> {
        match command {
            PowerCommand::Standby => self.standby(),
            PowerCommand::Resume => {
                if self.monitor.state() == PowerState::Active {
                    self.send( &Message::Power( PowerCommand::AlreadyOn ) );
                } else {
                    self.resume();
                }
            }
            PowerCommand::SoftExit => {
                tracing::info!( "Soft exit requested" );
                self.standby();
                return Some( ExitKind::SoftExit );
            }
            PowerCommand::Shutdown => {
                tracing::info!( "Shutdown requested" );
                self.standby();
                return Some( ExitKind::Shutdown );
            }
            PowerCommand::AlreadyOn => tracing::debug!( "Peer reports it is already on" ),
        }
        None
    }


    /// Front panel buttons.
    fn button( &mut self, action: ButtonAction, id: u8 ) {
        tracing::debug!( "Button {} {:?}", id, action );

        let engine = &mut self.engine;
        match ( action, id ) {
            ( ButtonAction::Press, 0 ) => engine.rewind(),
            ( ButtonAction::Press, 1 ) => engine.prev_band(),
            ( ButtonAction::Press, 2 ) => engine.play_pause(),
            ( ButtonAction::Press, 3 ) => engine.next_band(),
            ( ButtonAction::Press, 4 ) => engine.fast_forward(),
            ( ButtonAction::Hold, 0 ) => engine.prev_song(),
            ( ButtonAction::Hold, 1 ) => engine.prev_station(),
            ( ButtonAction::Hold, 2 ) => engine.randomize_station(),
            ( ButtonAction::Hold, 3 ) => engine.next_station(),
            ( ButtonAction::Hold, 4 ) => engine.next_song(),
            _ => tracing::warn!( "Unknown button {}", id ),
        }
    }


    fn poll_inputs( &mut self ) -> Option<ExitKind> {
        let mut events = Vec::new();
        for input in &mut self.inputs {
            while let Some( event ) = input.poll() {
                events.push( event );
            }
        }

        for event in events {
            if let Some( exit ) = self.local( event ) {
                return Some( exit );
            }
        }
        None
    }


    fn local( &mut self, event: InputEvent ) -> Option<ExitKind> {
        if event == InputEvent::Quit {
            return Some( ExitKind::Quit );
        }

        let state = self.monitor.state();
        if event == InputEvent::TogglePower {
            match state {
                PowerState::Active => self.standby(),
                PowerState::Standby => self.resume(),
                PowerState::WaitingForPeer => tracing::warn!( "No peer, ignoring power toggle" ),
            }
            return None;
        }

        if state != PowerState::Active {
            tracing::debug!( "Ignoring {:?} while {:?}", event, state );
            return None;
        }

        match event {
            InputEvent::Button { action, id } => self.button( action, id ),
            InputEvent::Volume( level ) => self.engine.set_volume( level ),
            InputEvent::VolumeUp => self.engine.volume_up(),
            InputEvent::VolumeDown => self.engine.volume_down(),
            InputEvent::NudgeDial( degrees ) => {
                let angle = self.engine.motor_angle() + degrees;
                self.engine.set_motor_angle( angle );
                // Keep the needle with the dial
                self.send( &Message::Motor { angle: self.engine.motor_angle() } );
            }
            InputEvent::TogglePower | InputEvent::Quit => {}
        }
        None
    }


    fn standby( &mut self ) {
        if self.monitor.request_standby().is_some() {
            self.engine.enter_standby();
            self.persist();
        } else {
            tracing::debug!( "Standby ignored while {:?}", self.monitor.state() );
        }
    }


    fn resume( &mut self ) {
        if self.monitor.request_resume().is_some() {
            self.resume_from_store();
        } else {
            tracing::debug!( "Resume ignored while {:?}", self.monitor.state() );
        }
    }


    fn resume_from_store( &mut self ) {
        let saved = load_or_default( self.store.as_ref() );
        self.engine.resume( &saved );
    }


    /// Writes the current volume, band and station.
    fn persist( &mut self ) {
        // Nothing worth saving before the first resume
        if self.engine.band_index().is_none() {
            return;
        }

        let snapshot = self.engine.snapshot();
        match self.store.save( &snapshot ) {
            Ok(()) => tracing::debug!( "Saved {:?}", snapshot ),
            Err( e ) => tracing::error!( "Failed to save settings: {}", e ),
        }
    }


    fn flush( &mut self ) {
        for message in self.engine.drain_outbox() {
            self.send( &message );
        }
    }


    fn send( &mut self, message: &Message ) {
        tracing::debug!( "Sending {}", message );
        if let Err( e ) = self.transport.send( message ) {
            tracing::warn!( "Failed to send {}: {}", message.kind(), e );
        }
    }


    /// Stops audio, saves settings and tells the peer we are going away.
    pub fn shutdown( &mut self ) {
        tracing::info!( "Shutting down" );
        if self.monitor.state() == PowerState::Active {
            self.standby();
        } else {
            self.persist();
        }
        self.flush();

        self.send( &Message::Info { text: format!( "{} Shutdown", self.local_name ) } );
        if self.monitor.state() != PowerState::Standby {
            self.send( &Message::Power( PowerCommand::Standby ) );
        }
    }
}


#[cfg( test )]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::EngineConfig;
    use crate::link::{ DeviceCommand, LinkTiming };
    use crate::settings::SavedSettings;
    use crate::testing::{ self, MemorySettingsStore, MemoryTransport, RecordingAudio, ScriptedInput };


    const EPOCH: u64 = 1_577_836_800;


    struct Rig {
        radio: Radio<RecordingAudio>,
        clock: ManualClock,
        link: MemoryTransport,
        store: MemorySettingsStore,
        keys: ScriptedInput,
    }


    impl Rig {
        fn new( saved: Option<SavedSettings> ) -> Self {
            let clock = ManualClock::new( Duration::from_secs( EPOCH + 10_000 ) );
            let link = MemoryTransport::default();
            let store = MemorySettingsStore::default();
            *store.saved.borrow_mut() = saved;
            let keys = ScriptedInput::default();

            let engine = TuningEngine::new(
                testing::bands( &[ 3, 5 ] ),
                RecordingAudio::default(),
                Rc::new( clock.clone() ),
                EngineConfig::default(),
            );
            let mut radio = Radio::new(
                engine,
                Box::new( link.clone() ),
                Box::new( store.clone() ),
                LinkMonitor::new( LinkTiming::default(), "Pico" ),
                Rc::new( clock.clone() ),
                "Zero",
            );
            radio.add_input( Box::new( keys.clone() ) );

            Self { radio, clock, link, store, keys }
        }


        /// Delivers a peer heartbeat and runs one tick.
        fn heartbeat( &mut self ) -> TickOutcome {
            self.link.push_line( "H,Pico,,,," );
            self.radio.tick()
        }


        fn wake( saved: SavedSettings ) -> Self {
            let mut rig = Self::new( Some( saved ) );
            rig.heartbeat();
            assert_eq!( rig.radio.state(), PowerState::Active );
            rig.link.take_sent();
            rig
        }


        fn advance( &mut self, secs: u64 ) {
            self.clock.advance( Duration::from_secs( secs ) );
        }
    }


    fn saved( volume: f32, band: usize, station: usize ) -> SavedSettings {
        SavedSettings { volume, band, station }
    }


    #[test]
    fn test_first_heartbeat_restores_saved_settings() {
        let mut rig = Rig::new( Some( saved( 0.3, 1, 2 ) ) );
        assert_eq!( rig.radio.state(), PowerState::WaitingForPeer );

        assert_eq!( rig.heartbeat(), TickOutcome::Continue );
        assert_eq!( rig.radio.state(), PowerState::Active );

        let engine = rig.radio.engine();
        assert_eq!( engine.volume(), 0.3 );
        assert_eq!( engine.band_index(), Some( 1 ) );
        assert_eq!( engine.active_station(), Some( 2 ) );
        assert_eq!( engine.audio().loads().len(), 1 );

        let sent = rig.link.take_sent();
        assert!( sent.contains( &Message::Device( DeviceCommand::NoSweep { angle: 91.0 } ) ) );
        assert!( sent.contains( &Message::Heartbeat { sender: "Zero".into() } ) );
    }


    #[test]
    fn test_other_heartbeats_do_not_wake() {
        let mut rig = Rig::new( None );
        rig.link.push_line( "H,Stranger,,,," );
        rig.radio.tick();
        assert_eq!( rig.radio.state(), PowerState::WaitingForPeer );
        assert_eq!( rig.radio.engine().band_index(), None );
    }


    #[test]
    fn test_heartbeat_timeout_then_recovery() {
        let mut rig = Rig::wake( saved( 0.3, 1, 2 ) );

        rig.advance( 30 );
        rig.radio.tick();
        assert_eq!( rig.radio.state(), PowerState::Active );

        rig.advance( 1 );
        rig.radio.tick();
        assert_eq!( rig.radio.state(), PowerState::WaitingForPeer );
        assert_eq!( rig.radio.engine().active_station(), None );
        assert_eq!( rig.radio.engine().audio().last_static(), Some( false ) );
        assert!( rig.link.take_sent().contains( &Message::Power( PowerCommand::Standby ) ) );
        assert_eq!( *rig.store.saved.borrow(), Some( saved( 0.3, 1, 2 ) ) );

        // Heartbeats keep going out while we wait
        rig.advance( 2 );
        rig.radio.tick();
        assert_eq!( rig.link.take_sent(), vec![ Message::Heartbeat { sender: "Zero".into() } ] );

        rig.advance( 60 );
        rig.heartbeat();
        assert_eq!( rig.radio.state(), PowerState::Active );
        assert_eq!( rig.radio.engine().band_index(), Some( 1 ) );
        assert_eq!( rig.radio.engine().active_station(), Some( 2 ) );
    }


    #[test]
    fn test_standby_and_resume_requests() {
        let mut rig = Rig::wake( saved( 0.2, 0, 1 ) );

        rig.link.push_line( "P,0,,,," );
        rig.radio.tick();
        assert_eq!( rig.radio.state(), PowerState::Standby );
        assert_eq!( rig.radio.engine().active_station(), None );
        assert_eq!( *rig.store.saved.borrow(), Some( saved( 0.2, 0, 1 ) ) );

        // Heartbeats still supervise the peer in standby
        rig.heartbeat();
        assert_eq!( rig.radio.state(), PowerState::Standby );

        rig.link.push_line( "P,1,,,," );
        rig.radio.tick();
        assert_eq!( rig.radio.state(), PowerState::Active );
        assert_eq!( rig.radio.engine().active_station(), Some( 1 ) );
    }


    #[test]
    fn test_resume_while_active_replies_on() {
        let mut rig = Rig::wake( saved( 0.2, 0, 1 ) );
        rig.link.push_line( "P,1,,,," );
        rig.radio.tick();
        assert!( rig.link.take_sent().contains( &Message::Power( PowerCommand::AlreadyOn ) ) );
        assert_eq!( rig.radio.state(), PowerState::Active );
    }


    #[test]
    fn test_exit_requests() {
        let mut rig = Rig::wake( saved( 0.2, 0, 1 ) );
        rig.link.push_line( "P,3,,,," );
        assert_eq!( rig.radio.tick(), TickOutcome::Exit( ExitKind::Shutdown ) );
        assert_eq!( rig.radio.state(), PowerState::Standby );
        assert!( rig.store.saved.borrow().is_some() );
        assert_eq!( ExitKind::Shutdown.code(), 3 );

        let mut rig = Rig::wake( saved( 0.2, 0, 1 ) );
        rig.link.push_line( "P,2,,,," );
        assert_eq!( rig.radio.tick(), TickOutcome::Exit( ExitKind::SoftExit ) );
        assert_eq!( ExitKind::SoftExit.code(), 0 );
    }


    #[test]
    fn test_buttons_ignored_until_active() {
        let mut rig = Rig::new( Some( saved( 0.2, 0, 1 ) ) );
        rig.link.push_line( "B,1,3,,," );
        rig.radio.tick();
        assert_eq!( rig.radio.engine().band_index(), None );

        rig.heartbeat();
        rig.link.push_line( "B,1,3,,," );
        rig.radio.tick();
        assert_eq!( rig.radio.engine().band_index(), Some( 1 ) );
    }


    #[test]
    fn test_motor_message_retunes() {
        let mut rig = Rig::wake( saved( 0.2, 1, 0 ) );
        assert_eq!( rig.radio.engine().active_station(), Some( 0 ) );

        rig.link.push_line( "M,122.5,,,," );
        rig.radio.tick();
        assert_eq!( rig.radio.engine().active_station(), Some( 3 ) );
        assert!( rig.radio.engine().is_locked() );
    }


    #[test]
    fn test_volume_message() {
        let mut rig = Rig::wake( saved( 0.2, 0, 1 ) );
        rig.link.push_line( "V,0.5,,,," );
        rig.radio.tick();
        assert_eq!( rig.radio.engine().volume(), 0.5 );
    }


    #[test]
    fn test_malformed_lines_are_dropped() {
        let mut rig = Rig::wake( saved( 0.2, 0, 1 ) );
        rig.link.push_line( "Z,nonsense,,,," );
        rig.link.push_line( "B,1,9,,," );
        assert_eq!( rig.radio.tick(), TickOutcome::Continue );
        assert_eq!( rig.radio.tick(), TickOutcome::Continue );
        assert_eq!( rig.radio.state(), PowerState::Active );
    }


    #[test]
    fn test_local_controls() {
        let mut rig = Rig::wake( saved( 0.2, 1, 1 ) );

        rig.keys.push( InputEvent::NudgeDial( 1.0 ) );
        rig.radio.tick();
        assert_eq!( rig.radio.engine().motor_angle(), 60.5 );
        assert!( rig.link.take_sent().contains( &Message::Motor { angle: 60.5 } ) );

        rig.keys.push( InputEvent::TogglePower );
        rig.radio.tick();
        assert_eq!( rig.radio.state(), PowerState::Standby );

        rig.keys.push( InputEvent::TogglePower );
        rig.radio.tick();
        assert_eq!( rig.radio.state(), PowerState::Active );

        rig.keys.push( InputEvent::Quit );
        assert_eq!( rig.radio.tick(), TickOutcome::Exit( ExitKind::Quit ) );
    }


    #[test]
    fn test_shutdown_notifies_peer() {
        let mut rig = Rig::wake( saved( 0.2, 0, 1 ) );
        rig.radio.shutdown();

        let sent = rig.link.take_sent();
        assert!( sent.contains( &Message::Power( PowerCommand::Standby ) ) );
        assert!( sent.contains( &Message::Info { text: "Zero Shutdown".into() } ) );
        assert!( rig.store.saved.borrow().is_some() );
    }
}

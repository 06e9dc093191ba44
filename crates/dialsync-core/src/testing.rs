//! Test doubles shared by the unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{ Path, PathBuf };
use std::rc::Rc;
use std::time::Duration;

use crate::audio::{ AudioEngine, AudioError, Effect };
use crate::input::{ InputEvent, InputSource };
use crate::link::{ LinkError, Message, Transport };
use crate::settings::{ SavedSettings, SettingsError, SettingsStore };
use crate::station::{ Band, StationDescriptor, Track };


#[derive( Debug, Clone, PartialEq )]
pub enum AudioCall {
    Play( PathBuf, Duration ),
    Pause,
    Stop,
    MusicVolume( f32 ),
    Static( bool ),
    StaticVolume( f32 ),
    Effect( Effect, f32 ),
}


/// Records every call. Loads always succeed unless told otherwise.
#[derive( Debug, Default )]
pub struct RecordingAudio {
    pub calls: Vec<AudioCall>,
    pub fail_nonzero_offsets: bool,
    /// Tracks that never load at any offset.
    pub broken: Vec<PathBuf>,
    pub track_ended: bool,
}


impl RecordingAudio {
    /// Every load attempt, failed ones included.
    pub fn loads( &self ) -> Vec<( PathBuf, Duration )> {
        self.calls
            .iter()
            .filter_map( |c| match c {
                AudioCall::Play( path, offset ) => Some(( path.clone(), *offset )),
                _ => None,
            } )
            .collect()
    }


    pub fn effects( &self ) -> Vec<Effect> {
        self.calls
            .iter()
            .filter_map( |c| match c {
                AudioCall::Effect( effect, _ ) => Some( *effect ),
                _ => None,
            } )
            .collect()
    }


    pub fn last_static( &self ) -> Option<bool> {
        self.calls.iter().rev().find_map( |c| match c {
            AudioCall::Static( on ) => Some( *on ),
            _ => None,
        } )
    }


    pub fn last_music_volume( &self ) -> Option<f32> {
        self.calls.iter().rev().find_map( |c| match c {
            AudioCall::MusicVolume( v ) => Some( *v ),
            _ => None,
        } )
    }


    pub fn clear( &mut self ) {
        self.calls.clear();
    }
}


impl AudioEngine for RecordingAudio {
    fn play_track( &mut self, path: &Path, offset: Duration ) -> Result<(), AudioError> {
        self.calls.push( AudioCall::Play( path.to_path_buf(), offset ) );
        if self.fail_nonzero_offsets && !offset.is_zero() {
            return Err( AudioError::Seek( "offset out of range".into() ) );
        }
        if self.broken.iter().any( |p| p == path ) {
            return Err( AudioError::Decode( "unreadable".into() ) );
        }
        Ok(())
    }


    fn pause( &mut self ) {
        self.calls.push( AudioCall::Pause );
    }


    fn stop( &mut self ) {
        self.calls.push( AudioCall::Stop );
    }


    fn set_music_volume( &mut self, volume: f32 ) {
        self.calls.push( AudioCall::MusicVolume( volume ) );
    }


    fn take_track_ended( &mut self ) -> bool {
        std::mem::take( &mut self.track_ended )
    }


    fn set_static( &mut self, playing: bool ) {
        self.calls.push( AudioCall::Static( playing ) );
    }


    fn set_static_volume( &mut self, volume: f32 ) {
        self.calls.push( AudioCall::StaticVolume( volume ) );
    }


    fn play_effect( &mut self, effect: Effect, volume: f32 ) {
        self.calls.push( AudioCall::Effect( effect, volume ) );
    }
}


/// Shared handles so a test can keep feeding a transport owned by the radio.
#[derive( Clone, Default )]
pub struct MemoryTransport {
    pub inbox: Rc<RefCell<VecDeque<Result<Message, LinkError>>>>,
    pub sent: Rc<RefCell<Vec<Message>>>,
}


impl MemoryTransport {
    pub fn push( &self, message: Message ) {
        self.inbox.borrow_mut().push_back( Ok( message ) );
    }


    pub fn push_line( &self, line: &str ) {
        self.inbox.borrow_mut().push_back( Message::parse( line ) );
    }


    pub fn take_sent( &self ) -> Vec<Message> {
        std::mem::take( &mut *self.sent.borrow_mut() )
    }
}


impl Transport for MemoryTransport {
    fn poll( &mut self ) -> Result<Option<Message>, LinkError> {
        match self.inbox.borrow_mut().pop_front() {
            Some( Ok( message ) ) => Ok( Some( message ) ),
            Some( Err( e ) ) => Err( e ),
            None => Ok( None ),
        }
    }


    fn send( &mut self, message: &Message ) -> Result<(), LinkError> {
        self.sent.borrow_mut().push( message.clone() );
        Ok(())
    }


    fn is_up( &self ) -> bool {
        true
    }
}


#[derive( Clone, Default )]
pub struct MemorySettingsStore {
    pub saved: Rc<RefCell<Option<SavedSettings>>>,
}


impl SettingsStore for MemorySettingsStore {
    fn load( &self ) -> Result<SavedSettings, SettingsError> {
        Ok( self.saved.borrow().unwrap_or_default() )
    }


    fn save( &mut self, settings: &SavedSettings ) -> Result<(), SettingsError> {
        *self.saved.borrow_mut() = Some( *settings );
        Ok(())
    }
}


#[derive( Clone, Default )]
pub struct ScriptedInput {
    pub events: Rc<RefCell<VecDeque<InputEvent>>>,
}


impl ScriptedInput {
    pub fn push( &self, event: InputEvent ) {
        self.events.borrow_mut().push_back( event );
    }
}


impl InputSource for ScriptedInput {
    fn poll( &mut self ) -> Option<InputEvent> {
        self.events.borrow_mut().pop_front()
    }
}


/// `count` ordered stations of six tracks each, 60s to 110s long.
pub fn band( index: usize, count: usize ) -> Band {
    let stations = ( 0..count )
        .map( |s| {
            let folder = format!( "/radio/band{}/station{}", index, s );
            let tracks = ( 0..6u64 )
                .map( |t| Track::new( format!( "{}/{}.ogg", folder, t ), Duration::from_secs( 60 + t * 10 ) ) )
                .collect();
            StationDescriptor::new( format!( "Station {}", s ), &folder, true, tracks, Duration::from_secs( s as u64 * 7 ) )
        } )
        .filter_map( Result::ok )
        .collect();
    Band::new( index, format!( "band{}", index ), stations )
}


pub fn bands( counts: &[usize] ) -> Vec<Band> {
    counts
        .iter()
        .enumerate()
        .map( |( i, &n )| band( i, n ) )
        .collect()
}

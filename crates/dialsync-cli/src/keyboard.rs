//! Local keyboard controls.
//!
//! Mirrors the faceplate so the radio can be driven from a terminal when the
//! co-processor's buttons are out of reach.

use std::io;
use std::time::Duration;

use crossterm::event::{ self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers };
use crossterm::terminal::{ disable_raw_mode, enable_raw_mode };

use dialsync_core::link::ButtonAction;
use dialsync_core::{ InputEvent, InputSource };


/// Degrees per arrow key press.
const NUDGE_DEGREES: f64 = 1.0;


/// Keyboard input in raw mode. Restores the terminal when dropped.
pub struct Keyboard;


impl Keyboard {
    pub fn new() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok( Self )
    }
}


impl Drop for Keyboard {
    fn drop( &mut self ) {
        if let Err( e ) = disable_raw_mode() {
            tracing::warn!( "Failed to restore terminal: {}", e );
        }
    }
}


impl InputSource for Keyboard {
    fn poll( &mut self ) -> Option<InputEvent> {
        loop {
            match event::poll( Duration::ZERO ) {
                Ok( true ) => {}
                Ok( false ) => return None,
                Err( e ) => {
                    tracing::warn!( "Keyboard poll failed: {}", e );
                    return None;
                }
            }

            match event::read() {
                Ok( Event::Key( key ) ) if key.kind == KeyEventKind::Press => {
                    if let Some( event ) = map_key( key ) {
                        return Some( event );
                    }
                }
                Ok( _ ) => {}
                Err( e ) => {
                    tracing::warn!( "Keyboard read failed: {}", e );
                    return None;
                }
            }
        }
    }
}


/// Translates a key into a control event.
fn map_key( key: KeyEvent ) -> Option<InputEvent> {
    if key.modifiers.contains( KeyModifiers::CONTROL ) && key.code == KeyCode::Char( 'c' ) {
        return Some( InputEvent::Quit );
    }

    let button = |action, id| Some( InputEvent::Button { action, id } );
    match key.code {
        KeyCode::Char( c @ '1'..='5' ) => button( ButtonAction::Press, c as u8 - b'1' ),
        KeyCode::F( n @ 1..=5 ) => button( ButtonAction::Hold, n - 1 ),
        KeyCode::Char( '+' ) | KeyCode::Char( '=' ) => Some( InputEvent::VolumeUp ),
        KeyCode::Char( '-' ) => Some( InputEvent::VolumeDown ),
        KeyCode::Char( 's' ) => Some( InputEvent::TogglePower ),
        KeyCode::Left => Some( InputEvent::NudgeDial( -NUDGE_DEGREES ) ),
        KeyCode::Right => Some( InputEvent::NudgeDial( NUDGE_DEGREES ) ),
        KeyCode::Esc | KeyCode::Char( 'q' ) => Some( InputEvent::Quit ),
        _ => None,
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn key( code: KeyCode ) -> KeyEvent {
        KeyEvent::new( code, KeyModifiers::NONE )
    }


    #[test]
    fn test_buttons() {
        assert_eq!(
            map_key( key( KeyCode::Char( '1' ) ) ),
            Some( InputEvent::Button { action: ButtonAction::Press, id: 0 } )
        );
        assert_eq!(
            map_key( key( KeyCode::F( 5 ) ) ),
            Some( InputEvent::Button { action: ButtonAction::Hold, id: 4 } )
        );
        assert_eq!( map_key( key( KeyCode::Char( '6' ) ) ), None );
        assert_eq!( map_key( key( KeyCode::F( 6 ) ) ), None );
    }


    #[test]
    fn test_controls() {
        assert_eq!( map_key( key( KeyCode::Char( '+' ) ) ), Some( InputEvent::VolumeUp ) );
        assert_eq!( map_key( key( KeyCode::Left ) ), Some( InputEvent::NudgeDial( -1.0 ) ) );
        assert_eq!( map_key( key( KeyCode::Char( 's' ) ) ), Some( InputEvent::TogglePower ) );
        assert_eq!( map_key( key( KeyCode::Esc ) ), Some( InputEvent::Quit ) );
        assert_eq!(
            map_key( KeyEvent::new( KeyCode::Char( 'c' ), KeyModifiers::CONTROL ) ),
            Some( InputEvent::Quit )
        );
    }
}

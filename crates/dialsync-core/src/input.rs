//! Local controls
//!
//! Events from controls wired to the main board itself, as opposed to those
//! forwarded by the co-processor over the link.

use crate::link::ButtonAction;


/// A local control event.
#[derive( Debug, Clone, Copy, PartialEq )]
pub enum InputEvent {
    /// Same meaning as a `B` message from the co-processor
    Button { action: ButtonAction, id: u8 },
    Volume( f32 ),
    VolumeUp,
    VolumeDown,
    /// Moves the dial by this many degrees
    NudgeDial( f64 ),
    /// Standby if active, resume if in standby
    TogglePower,
    Quit,
}


/// Non-blocking source of local control events.
pub trait InputSource {
    /// Returns the next pending event, if any.
    fn poll( &mut self ) -> Option<InputEvent>;
}

//! Board-to-board link
//!
//! Line-framed messages to and from the co-processor, the transport that
//! carries them, and the heartbeat/standby state machine.

pub mod message;
pub mod monitor;
pub mod transport;

use thiserror::Error;

pub use message::{ ButtonAction, DeviceCommand, FrameDecoder, Message, PowerCommand };
pub use monitor::{ LinkMonitor, LinkTiming, PowerState, Transition };
pub use transport::{ ReconnectPolicy, SerialTransport, Transport };


/// Errors surfaced by the link.
#[derive( Debug, Error )]
pub enum LinkError {
    #[error( "Malformed message: {0}" )]
    Malformed( String ),

    #[error( "Line exceeded {0} bytes and was dropped" )]
    Overflow( usize ),

    #[error( "Link disconnected: {0}" )]
    Disconnected( String ),

    #[error( "Link is down" )]
    Down,

    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),
}

//! Link wire format
//!
//! Every message is one line of five comma-separated fields:
//! `type,d1,d2,d3,d4,\n`. Unused fields are empty.

use std::fmt;
use std::str::FromStr;

use super::LinkError;


/// Power request carried by `P` messages.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum PowerCommand {
    Standby,
    Resume,
    SoftExit,
    Shutdown,
    /// Reply to a resume request while already running
    AlreadyOn,
}


impl PowerCommand {
    fn code( self ) -> &'static str {
        match self {
            PowerCommand::Standby => "0",
            PowerCommand::Resume => "1",
            PowerCommand::SoftExit => "2",
            PowerCommand::Shutdown => "3",
            PowerCommand::AlreadyOn => "On",
        }
    }
}


impl FromStr for PowerCommand {
    type Err = LinkError;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s {
            // Older firmware sends booleans
            "0" | "False" => Ok( PowerCommand::Standby ),
            "1" | "True" => Ok( PowerCommand::Resume ),
            "2" => Ok( PowerCommand::SoftExit ),
            "3" => Ok( PowerCommand::Shutdown ),
            "On" => Ok( PowerCommand::AlreadyOn ),
            other => Err( LinkError::Malformed( format!( "unknown power code '{}'", other ) ) ),
        }
    }
}


/// How a button was operated.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum ButtonAction {
    Press,
    Hold,
}


/// Commands for the co-processor's gauge, LEDs and needle.
#[derive( Debug, Clone, PartialEq )]
pub enum DeviceCommand {
    /// Sweep the needle across the dial, then settle at `angle`
    Sweep { angle: f64 },
    /// Move straight to `angle`
    NoSweep { angle: f64 },
    Gauge { pixel: u8, brightness: f32 },
    Aux { pixel: u8, brightness: f32 },
}


/// One link message.
#[derive( Debug, Clone, PartialEq )]
pub enum Message {
    Motor { angle: f64 },
    Power( PowerCommand ),
    Heartbeat { sender: String },
    Button { action: ButtonAction, id: u8 },
    Volume { level: f32 },
    Device( DeviceCommand ),
    Info { text: String },
}


/// Highest button id on the faceplate.
pub const MAX_BUTTON_ID: u8 = 4;


fn number<T: FromStr>( field: &str, what: &str ) -> Result<T, LinkError> {
    field.trim()
        .parse()
        .map_err( |_| LinkError::Malformed( format!( "invalid {}: '{}'", what, field ) ) )
}


fn required<'a>( fields: &[&'a str], index: usize, what: &str ) -> Result<&'a str, LinkError> {
    fields.get( index )
        .copied()
        .filter( |f| !f.is_empty() )
        .ok_or_else( || LinkError::Malformed( format!( "missing {}", what ) ) )
}


/// Fields may not contain separators.
fn sanitize( text: &str ) -> String {
    text.replace( &[ ',', '\n', '\r' ][ .. ], " " )
}


impl Message {
    /// Parses one line, with or without its terminator.
    pub fn parse( line: &str ) -> Result<Self, LinkError> {
        let line = line.trim_end_matches( &[ '\n', '\r' ][ .. ] );
        let fields: Vec<&str> = line.split( ',' ).collect();
        let kind = fields.first().copied().unwrap_or( "" );

        match kind {
            "M" => Ok( Message::Motor {
                angle: number( required( &fields, 1, "angle" )?, "angle" )?,
            }),
            "P" => Ok( Message::Power( required( &fields, 1, "power code" )?.parse()? ) ),
            "H" => Ok( Message::Heartbeat {
                sender: required( &fields, 1, "heartbeat sender" )?.to_string(),
            }),
            "B" => {
                let action = match required( &fields, 1, "button action" )? {
                    "1" => ButtonAction::Press,
                    "2" => ButtonAction::Hold,
                    other => return Err( LinkError::Malformed( format!( "unknown button action '{}'", other ) ) ),
                };
                let id: u8 = number( required( &fields, 2, "button id" )?, "button id" )?;
                if id > MAX_BUTTON_ID {
                    return Err( LinkError::Malformed( format!( "button id {} out of range", id ) ) );
                }
                Ok( Message::Button { action, id } )
            }
            "V" => {
                let level: f32 = number( required( &fields, 1, "volume" )?, "volume" )?;
                if !level.is_finite() {
                    return Err( LinkError::Malformed( "volume is not finite".into() ) );
                }
                Ok( Message::Volume { level } )
            }
            "C" => Self::parse_device( &fields ),
            "I" => {
                let text = fields.iter()
                    .skip( 1 )
                    .filter( |f| !f.is_empty() )
                    .copied()
                    .collect::<Vec<_>>()
                    .join( "," );
                Ok( Message::Info { text } )
            }
            "" => Err( LinkError::Malformed( "empty line".into() ) ),
            other => Err( LinkError::Malformed( format!( "unknown message type '{}'", other ) ) ),
        }
    }


    fn parse_device( fields: &[&str] ) -> Result<Self, LinkError> {
        let command = match required( fields, 1, "device command" )? {
            "Sweep" => DeviceCommand::Sweep {
                angle: number( required( fields, 2, "sweep angle" )?, "sweep angle" )?,
            },
            "NoSweep" => DeviceCommand::NoSweep {
                angle: number( required( fields, 2, "angle" )?, "angle" )?,
            },
            "Gauge" => DeviceCommand::Gauge {
                pixel: number( required( fields, 2, "pixel" )?, "pixel" )?,
                brightness: number( required( fields, 3, "brightness" )?, "brightness" )?,
            },
            "Aux" => DeviceCommand::Aux {
                pixel: number( required( fields, 2, "pixel" )?, "pixel" )?,
                brightness: number( required( fields, 3, "brightness" )?, "brightness" )?,
            },
            other => return Err( LinkError::Malformed( format!( "unknown device command '{}'", other ) ) ),
        };
        Ok( Message::Device( command ) )
    }


    /// Short tag for logging.
    pub fn kind( &self ) -> char {
        match self {
            Message::Motor { .. } => 'M',
            Message::Power( _ ) => 'P',
            Message::Heartbeat { .. } => 'H',
            Message::Button { .. } => 'B',
            Message::Volume { .. } => 'V',
            Message::Device( _ ) => 'C',
            Message::Info { .. } => 'I',
        }
    }


    /// Encodes the message as one terminated line.
    pub fn encode( &self ) -> String {
        let fields: [String; 4] = match self {
            Message::Motor { angle } => [ angle.to_string(), String::new(), String::new(), String::new() ],
            Message::Power( command ) => [ command.code().to_string(), String::new(), String::new(), String::new() ],
            Message::Heartbeat { sender } => [ sanitize( sender ), String::new(), String::new(), String::new() ],
            Message::Button { action, id } => {
                let action = match action {
                    ButtonAction::Press => "1",
                    ButtonAction::Hold => "2",
                };
                [ action.to_string(), id.to_string(), String::new(), String::new() ]
            }
            Message::Volume { level } => [ level.to_string(), String::new(), String::new(), String::new() ],
            Message::Device( command ) => match command {
                DeviceCommand::Sweep { angle } => [ "Sweep".into(), angle.to_string(), String::new(), String::new() ],
                DeviceCommand::NoSweep { angle } => [ "NoSweep".into(), angle.to_string(), String::new(), String::new() ],
                DeviceCommand::Gauge { pixel, brightness } => {
                    [ "Gauge".into(), pixel.to_string(), brightness.to_string(), String::new() ]
                }
                DeviceCommand::Aux { pixel, brightness } => {
                    [ "Aux".into(), pixel.to_string(), brightness.to_string(), String::new() ]
                }
            },
            Message::Info { text } => [ sanitize( text ), String::new(), String::new(), String::new() ],
        };

        format!( "{},{},{},{},{},\n", self.kind(), fields[ 0 ], fields[ 1 ], fields[ 2 ], fields[ 3 ] )
    }
}


impl fmt::Display for Message {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( self.encode().trim_end() )
    }
}


/// Splits a byte stream into parsed messages.
///
/// Partial lines stay buffered until their terminator arrives.
#[derive( Debug )]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_line_len: usize,
    overflowed: bool,
}


impl FrameDecoder {
    pub fn new( max_line_len: usize ) -> Self {
        Self {
            buffer: Vec::with_capacity( max_line_len ),
            max_line_len,
            overflowed: false,
        }
    }


    /// Consumes `bytes` and returns every complete line's result, in order.
    /// An over-long line is dropped and reported once.
    pub fn push( &mut self, bytes: &[u8] ) -> Vec<Result<Message, LinkError>> {
        let mut out = Vec::new();

        for &byte in bytes {
            if byte == b'\n' {
                if self.overflowed {
                    self.overflowed = false;
                } else if let Some( result ) = self.finish_line() {
                    out.push( result );
                }
                self.buffer.clear();
                continue;
            }

            if self.overflowed {
                continue;
            }

            if self.buffer.len() >= self.max_line_len {
                self.buffer.clear();
                self.overflowed = true;
                out.push( Err( LinkError::Overflow( self.max_line_len ) ) );
                continue;
            }

            self.buffer.push( byte );
        }

        out
    }


    fn finish_line( &self ) -> Option<Result<Message, LinkError>> {
        let line = match std::str::from_utf8( &self.buffer ) {
            Ok( line ) => line.trim_end_matches( '\r' ),
            Err( _ ) => return Some( Err( LinkError::Malformed( "line is not UTF-8".into() ) ) ),
        };

        // Blank lines are keep-alive noise
        if line.trim().is_empty() {
            return None;
        }

        Some( Message::parse( line ) )
    }


    /// True while a partial line is buffered.
    pub fn has_partial( &self ) -> bool {
        !self.buffer.is_empty()
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_motor() {
        assert_eq!( Message::parse( "M,92.5,,,,\n" ).unwrap(), Message::Motor { angle: 92.5 } );
    }


    #[test]
    fn test_parse_power_codes() {
        assert_eq!( Message::parse( "P,1,,,," ).unwrap(), Message::Power( PowerCommand::Resume ) );
        assert_eq!( Message::parse( "P,3,,,," ).unwrap(), Message::Power( PowerCommand::Shutdown ) );
        assert_eq!( Message::parse( "P,False,,,," ).unwrap(), Message::Power( PowerCommand::Standby ) );
        assert!( Message::parse( "P,9,,,," ).is_err() );
    }


    #[test]
    fn test_parse_heartbeat() {
        assert_eq!(
            Message::parse( "H,Pico,,,," ).unwrap(),
            Message::Heartbeat { sender: "Pico".into() }
        );
    }


    #[test]
    fn test_parse_button() {
        assert_eq!(
            Message::parse( "B,1,2,,," ).unwrap(),
            Message::Button { action: ButtonAction::Press, id: 2 }
        );
        assert_eq!(
            Message::parse( "B,2,4,,," ).unwrap(),
            Message::Button { action: ButtonAction::Hold, id: 4 }
        );
        assert!( Message::parse( "B,1,5,,," ).is_err() );
        assert!( Message::parse( "B,3,0,,," ).is_err() );
    }


    #[test]
    fn test_parse_device_commands() {
        assert_eq!(
            Message::parse( "C,Sweep,92,,," ).unwrap(),
            Message::Device( DeviceCommand::Sweep { angle: 92.0 } )
        );
        assert_eq!(
            Message::parse( "C,Gauge,3,1,," ).unwrap(),
            Message::Device( DeviceCommand::Gauge { pixel: 3, brightness: 1.0 } )
        );
    }


    #[test]
    fn test_parse_info_keeps_text() {
        assert_eq!(
            Message::parse( "I,Motor calibrated,,,," ).unwrap(),
            Message::Info { text: "Motor calibrated".into() }
        );
    }


    #[test]
    fn test_parse_rejects_garbage() {
        assert!( matches!( Message::parse( "M,abc,,,," ), Err( LinkError::Malformed( _ ) ) ) );
        assert!( matches!( Message::parse( "M,,,,," ), Err( LinkError::Malformed( _ ) ) ) );
        assert!( matches!( Message::parse( "Z,1,,,," ), Err( LinkError::Malformed( _ ) ) ) );
    }


    #[test]
    fn test_encode_has_five_fields() {
        assert_eq!( Message::Motor { angle: 92.5 }.encode(), "M,92.5,,,,\n" );
        assert_eq!( Message::Power( PowerCommand::Standby ).encode(), "P,0,,,,\n" );
        assert_eq!( Message::Heartbeat { sender: "Zero".into() }.encode(), "H,Zero,,,,\n" );
        assert_eq!(
            Message::Device( DeviceCommand::Gauge { pixel: 7, brightness: 1.0 } ).encode(),
            "C,Gauge,7,1,,\n"
        );
        assert_eq!( Message::Info { text: "a,b".into() }.encode(), "I,a b,,,,\n" );
    }


    #[test]
    fn test_decoder_holds_partial_lines() {
        let mut decoder = FrameDecoder::new( 64 );
        assert!( decoder.push( b"H,Pi" ).is_empty() );
        assert!( decoder.has_partial() );

        let out = decoder.push( b"co,,,,\r\nM,40" );
        assert_eq!( out.len(), 1 );
        assert_eq!( out[ 0 ].as_ref().unwrap(), &Message::Heartbeat { sender: "Pico".into() } );

        let out = decoder.push( b",,,,\n" );
        assert_eq!( out[ 0 ].as_ref().unwrap(), &Message::Motor { angle: 40.0 } );
        assert!( !decoder.has_partial() );
    }


    #[test]
    fn test_decoder_reports_overflow_once() {
        let mut decoder = FrameDecoder::new( 12 );
        let out = decoder.push( b"I,this line is far too long,,,,\nV,0.5,,,,\n" );
        assert_eq!( out.len(), 2 );
        assert!( matches!( out[ 0 ], Err( LinkError::Overflow( 12 ) ) ) );
        assert_eq!( out[ 1 ].as_ref().unwrap(), &Message::Volume { level: 0.5 } );
    }


    #[test]
    fn test_decoder_skips_blank_lines() {
        let mut decoder = FrameDecoder::new( 64 );
        assert!( decoder.push( b"\n\r\n" ).is_empty() );
    }
}

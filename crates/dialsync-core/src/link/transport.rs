//! Byte transport to the co-processor
//!
//! The serial device is read on a background thread that frames bytes into
//! messages and hands them over a channel, so polling never blocks the
//! control loop. Reconnection is scheduled here; the rest of the system only
//! sees whether the link is up.

use std::fs::OpenOptions;
use std::io::{ ErrorKind, Read, Write };
use std::path::PathBuf;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::mpsc::{ self, Receiver, TryRecvError };
use std::sync::Arc;
use std::thread::{ self, JoinHandle };
use std::time::{ Duration, Instant };

use super::message::{ FrameDecoder, Message };
use super::LinkError;


/// A non-blocking, line-framed message channel.
pub trait Transport {
    /// Returns the next complete message, if one has arrived. Each fault is
    /// reported once; later polls return `Ok(None)` until the link recovers.
    fn poll( &mut self ) -> Result<Option<Message>, LinkError>;

    /// Sends one message.
    fn send( &mut self, message: &Message ) -> Result<(), LinkError>;

    /// True while the transport believes the link is usable.
    fn is_up( &self ) -> bool;
}


/// Exponential backoff between reconnection attempts.
#[derive( Debug, Clone )]
pub struct ReconnectPolicy {
    initial: Duration,
    max: Duration,
    delay: Duration,
    next_attempt: Option<Instant>,
}


impl ReconnectPolicy {
    pub fn new( initial: Duration, max: Duration ) -> Self {
        Self {
            initial,
            max: max.max( initial ),
            delay: initial,
            next_attempt: None,
        }
    }


    /// Records a failed attempt and schedules the next one.
    pub fn failed( &mut self, now: Instant ) {
        self.next_attempt = Some( now + self.delay );
        self.delay = ( self.delay * 2 ).min( self.max );
    }


    /// True if an attempt may be made at `now`.
    pub fn due( &self, now: Instant ) -> bool {
        self.next_attempt.map_or( true, |at| now >= at )
    }


    /// Clears the backoff after a successful connection.
    pub fn reset( &mut self ) {
        self.delay = self.initial;
        self.next_attempt = None;
    }


    /// Delay that will follow the next failure.
    pub fn current_delay( &self ) -> Duration {
        self.delay
    }
}


/// Background reader for one connection.
struct Reader {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}


/// Transport over a serial character device.
pub struct SerialTransport {
    device: Option<PathBuf>,
    max_line_len: usize,
    writer: Option<Box<dyn Write + Send>>,
    inbox: Option<Receiver<Result<Message, LinkError>>>,
    reader: Option<Reader>,
    reconnect: ReconnectPolicy,
}


impl SerialTransport {
    /// Opens `device`. A failure here is not fatal: the transport starts
    /// down and keeps retrying from [`Transport::poll`].
    pub fn open( device: PathBuf, max_line_len: usize, reconnect: ReconnectPolicy ) -> Self {
        let mut transport = Self {
            device: Some( device ),
            max_line_len,
            writer: None,
            inbox: None,
            reader: None,
            reconnect,
        };
        transport.try_connect();
        transport
    }


    /// Wraps an already-open byte stream. No reconnection is attempted.
    pub fn from_streams<R, W>( reader: R, writer: W, max_line_len: usize ) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let mut transport = Self {
            device: None,
            max_line_len,
            writer: None,
            inbox: None,
            reader: None,
            reconnect: ReconnectPolicy::new( Duration::from_secs( 1 ), Duration::from_secs( 1 ) ),
        };
        transport.attach( reader, Box::new( writer ) );
        transport
    }


    fn try_connect( &mut self ) {
        let Some( device ) = self.device.clone() else {
            return;
        };

        // Never run two readers on one device. A reader blocked on a hung
        // tty only exits once its read returns.
        if let Some( reader ) = self.reader.take() {
            if !reader.thread.is_finished() {
                tracing::debug!( "Previous link reader still running, delaying reconnect" );
                self.reader = Some( reader );
                self.reconnect.failed( Instant::now() );
                return;
            }
            if reader.thread.join().is_err() {
                tracing::warn!( "Link reader panicked" );
            }
        }

        let opened = OpenOptions::new()
            .read( true )
            .write( true )
            .open( &device )
            .and_then( |file| Ok(( file.try_clone()?, file )) );

        match opened {
            Ok(( reader, writer )) => {
                tracing::info!( "Link opened on {}", device.display() );
                self.reconnect.reset();
                self.attach( reader, Box::new( writer ) );
            }
            Err( e ) => {
                self.reconnect.failed( Instant::now() );
                tracing::warn!(
                    "Could not open {}: {} (retrying in {:?})",
                    device.display(),
                    e,
                    self.reconnect.current_delay()
                );
            }
        }
    }


    fn attach<R: Read + Send + 'static>( &mut self, reader: R, writer: Box<dyn Write + Send> ) {
        let ( tx, rx ) = mpsc::channel();
        let max_line_len = self.max_line_len;
        let stop = Arc::new( AtomicBool::new( false ) );

        let thread = {
            let stop = stop.clone();
            thread::spawn( move || Self::read_loop( reader, tx, max_line_len, &stop ) )
        };

        self.writer = Some( writer );
        self.inbox = Some( rx );
        self.reader = Some( Reader { stop, thread } );
    }


    /// Reads until the stream fails, the link is marked down, or the
    /// transport is dropped.
    fn read_loop<R: Read>(
        mut reader: R,
        tx: mpsc::Sender<Result<Message, LinkError>>,
        max_line_len: usize,
        stop: &AtomicBool,
    ) {
        let mut decoder = FrameDecoder::new( max_line_len );
        let mut buf = [0u8; 256];

        while !stop.load( Ordering::Relaxed ) {
            match reader.read( &mut buf ) {
                Ok( 0 ) => {
                    let _ = tx.send( Err( LinkError::Disconnected( "end of stream".into() ) ) );
                    break;
                }
                Ok( n ) => {
                    for result in decoder.push( &buf[ ..n ] ) {
                        if tx.send( result ).is_err() {
                            return;
                        }
                    }
                }
                Err( e ) if e.kind() == ErrorKind::Interrupted => continue,
                Err( e ) if matches!( e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut ) => {
                    thread::sleep( Duration::from_millis( 5 ) );
                }
                Err( e ) => {
                    let _ = tx.send( Err( LinkError::Disconnected( e.to_string() ) ) );
                    break;
                }
            }
        }

        tracing::debug!( "Link reader: exiting" );
    }


    fn stop_reader( &self ) {
        if let Some( reader ) = &self.reader {
            reader.stop.store( true, Ordering::Relaxed );
        }
    }


    fn mark_down( &mut self ) {
        self.stop_reader();
        self.writer = None;
        self.inbox = None;
        if self.device.is_some() {
            self.reconnect.failed( Instant::now() );
        }
    }
}


impl Transport for SerialTransport {
    fn poll( &mut self ) -> Result<Option<Message>, LinkError> {
        if self.inbox.is_none() {
            if self.device.is_some() && self.reconnect.due( Instant::now() ) {
                self.try_connect();
            }
            return Ok( None );
        }

        let received = match &self.inbox {
            Some( inbox ) => inbox.try_recv(),
            None => return Ok( None ),
        };

        match received {
            Ok( Ok( message ) ) => Ok( Some( message ) ),
            Ok( Err( e @ LinkError::Disconnected( _ ) ) ) => {
                self.mark_down();
                Err( e )
            }
            Ok( Err( e ) ) => Err( e ),
            Err( TryRecvError::Empty ) => Ok( None ),
            Err( TryRecvError::Disconnected ) => {
                self.mark_down();
                Err( LinkError::Disconnected( "reader stopped".into() ) )
            }
        }
    }


    fn send( &mut self, message: &Message ) -> Result<(), LinkError> {
        let Some( writer ) = self.writer.as_mut() else {
            return Err( LinkError::Down );
        };

        let written = writer
            .write_all( message.encode().as_bytes() )
            .and_then( |_| writer.flush() );

        if let Err( e ) = written {
            self.mark_down();
            return Err( LinkError::Io( e ) );
        }

        Ok(())
    }


    fn is_up( &self ) -> bool {
        self.inbox.is_some()
    }
}


impl Drop for SerialTransport {
    fn drop( &mut self ) {
        self.stop_reader();
    }
}


#[cfg( test )]
mod tests {
    use std::io::Cursor;
    use std::sync::{ Arc, Mutex };

    use super::*;


    #[derive( Clone, Default )]
    struct SharedSink( Arc<Mutex<Vec<u8>>> );


    impl Write for SharedSink {
        fn write( &mut self, buf: &[u8] ) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice( buf );
            Ok( buf.len() )
        }


        fn flush( &mut self ) -> std::io::Result<()> {
            Ok(())
        }
    }


    fn poll_until<F: Fn( &Result<Option<Message>, LinkError> ) -> bool>(
        transport: &mut SerialTransport,
        done: F,
    ) -> Result<Option<Message>, LinkError> {
        for _ in 0..500 {
            let result = transport.poll();
            if done( &result ) {
                return result;
            }
            thread::sleep( Duration::from_millis( 2 ) );
        }
        panic!( "transport never produced the expected result" );
    }


    #[test]
    fn test_reads_messages_then_reports_disconnect_once() {
        let reader = Cursor::new( b"H,Pico,,,,\nM,40,,,,\n".to_vec() );
        let mut transport = SerialTransport::from_streams( reader, SharedSink::default(), 64 );

        let first = poll_until( &mut transport, |r| matches!( r, Ok( Some( _ ) ) ) );
        assert_eq!( first.unwrap(), Some( Message::Heartbeat { sender: "Pico".into() } ) );
        let second = poll_until( &mut transport, |r| matches!( r, Ok( Some( _ ) ) ) );
        assert_eq!( second.unwrap(), Some( Message::Motor { angle: 40.0 } ) );

        let fault = poll_until( &mut transport, |r| r.is_err() );
        assert!( matches!( fault, Err( LinkError::Disconnected( _ ) ) ) );
        assert!( !transport.is_up() );
        assert!( matches!( transport.poll(), Ok( None ) ) );
    }


    /// Never has data, like an idle tty opened non-blocking.
    struct IdleReader;


    impl Read for IdleReader {
        fn read( &mut self, _: &mut [u8] ) -> std::io::Result<usize> {
            Err( ErrorKind::WouldBlock.into() )
        }
    }


    struct BrokenSink;


    impl Write for BrokenSink {
        fn write( &mut self, _: &[u8] ) -> std::io::Result<usize> {
            Err( ErrorKind::BrokenPipe.into() )
        }


        fn flush( &mut self ) -> std::io::Result<()> {
            Ok(())
        }
    }


    #[test]
    fn test_failed_send_stops_reader() {
        let mut transport = SerialTransport::from_streams( IdleReader, BrokenSink, 64 );
        assert!( transport.is_up() );

        let result = transport.send( &Message::Heartbeat { sender: "Zero".into() } );
        assert!( matches!( result, Err( LinkError::Io( _ ) ) ) );
        assert!( !transport.is_up() );

        let reader = transport.reader.take().unwrap();
        for _ in 0..500 {
            if reader.thread.is_finished() {
                break;
            }
            thread::sleep( Duration::from_millis( 2 ) );
        }
        assert!( reader.thread.is_finished() );
    }


    #[test]
    fn test_send_writes_encoded_line() {
        let sink = SharedSink::default();
        let mut transport = SerialTransport::from_streams( Cursor::new( Vec::new() ), sink.clone(), 64 );
        transport.send( &Message::Heartbeat { sender: "Zero".into() } ).unwrap();
        assert_eq!( sink.0.lock().unwrap().as_slice(), b"H,Zero,,,,\n" );
    }


    #[test]
    fn test_missing_device_starts_down() {
        let mut transport = SerialTransport::open(
            PathBuf::from( "/nonexistent/ttyACM9" ),
            64,
            ReconnectPolicy::new( Duration::from_secs( 60 ), Duration::from_secs( 60 ) ),
        );
        assert!( !transport.is_up() );
        assert!( matches!( transport.poll(), Ok( None ) ) );
        assert!( matches!( transport.send( &Message::Power( super::super::PowerCommand::Standby ) ), Err( LinkError::Down ) ) );
    }


    #[test]
    fn test_backoff_doubles_to_max() {
        let start = Instant::now();
        let mut policy = ReconnectPolicy::new( Duration::from_millis( 500 ), Duration::from_secs( 2 ) );
        assert!( policy.due( start ) );

        policy.failed( start );
        assert!( !policy.due( start ) );
        assert!( policy.due( start + Duration::from_millis( 500 ) ) );
        assert_eq!( policy.current_delay(), Duration::from_secs( 1 ) );

        policy.failed( start );
        policy.failed( start );
        assert_eq!( policy.current_delay(), Duration::from_secs( 2 ) );

        policy.reset();
        assert!( policy.due( start ) );
        assert_eq!( policy.current_delay(), Duration::from_millis( 500 ) );
    }
}

//! Audio output via cpal
//!
//! One output stream for the whole radio. Each voice feeds its own
//! [`ChannelBuffer`]; the stream callback sums the channels at their own
//! gains.

use std::collections::VecDeque;
use std::sync::atomic::{ AtomicBool, AtomicU32, Ordering };
use std::sync::{ Arc, Mutex, MutexGuard, PoisonError };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use thiserror::Error;


/// Errors that can occur with audio output.
#[derive( Debug, Error )]
pub enum OutputError {
    #[error( "No output device available" )]
    NoDevice,

    #[error( "Failed to get default stream config: {0}" )]
    StreamConfig( String ),

    #[error( "Failed to build output stream: {0}" )]
    BuildStream( String ),

    #[error( "Failed to play stream: {0}" )]
    PlayStream( String ),
}


/// Samples queued for one mixer channel, already in the output's rate and
/// channel layout.
///
/// Shared between a decode thread (producer) and the stream callback.
pub struct ChannelBuffer {
    buffer: Mutex<VecDeque<f32>>,
    capacity: usize,
    paused: AtomicBool,
    /// Gain stored as f32 bits
    volume: AtomicU32,
}


impl ChannelBuffer {
    pub fn new( capacity: usize ) -> Self {
        Self {
            buffer: Mutex::new( VecDeque::with_capacity( capacity ) ),
            capacity,
            paused: AtomicBool::new( false ),
            volume: AtomicU32::new( 1.0_f32.to_bits() ),
        }
    }


    // The callback must keep running even if a producer panicked
    fn lock( &self ) -> MutexGuard<'_, VecDeque<f32>> {
        self.buffer.lock().unwrap_or_else( PoisonError::into_inner )
    }


    /// Pushes samples. Returns how many fit.
    pub fn push( &self, samples: &[f32] ) -> usize {
        let mut buf = self.lock();
        let available = self.capacity.saturating_sub( buf.len() );
        let to_push = samples.len().min( available );
        buf.extend( samples[ ..to_push ].iter().copied() );
        to_push
    }


    /// Adds this channel's queued samples, scaled by its gain, onto
    /// `output`. A paused channel contributes nothing and keeps its queue.
    ///
    /// @returns number of samples consumed
    pub fn mix_into( &self, output: &mut [f32] ) -> usize {
        if self.is_paused() {
            return 0;
        }

        let volume = self.volume();
        let mut buf = self.lock();
        let count = output.len().min( buf.len() );
        for ( out, sample ) in output.iter_mut().zip( buf.drain( ..count ) ) {
            *out += sample * volume;
        }
        count
    }


    pub fn len( &self ) -> usize {
        self.lock().len()
    }


    pub fn is_empty( &self ) -> bool {
        self.lock().is_empty()
    }


    pub fn clear( &self ) {
        self.lock().clear();
    }


    pub fn set_paused( &self, paused: bool ) {
        self.paused.store( paused, Ordering::Relaxed );
    }


    pub fn is_paused( &self ) -> bool {
        self.paused.load( Ordering::Relaxed )
    }


    pub fn set_volume( &self, volume: f32 ) {
        self.volume.store( volume.to_bits(), Ordering::Relaxed );
    }


    pub fn volume( &self ) -> f32 {
        f32::from_bits( self.volume.load( Ordering::Relaxed ) )
    }
}


/// Converts interleaved samples between channel layouts.
///
/// Mono is duplicated to every output channel, stereo to mono is averaged,
/// anything else keeps the leading channels and repeats the last one.
pub fn remix( samples: &[f32], source_channels: usize, output_channels: usize ) -> Vec<f32> {
    if source_channels == output_channels || source_channels == 0 || output_channels == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / source_channels;
    let mut out = Vec::with_capacity( frames * output_channels );

    for frame in samples.chunks_exact( source_channels ) {
        if output_channels == 1 {
            out.push( frame.iter().sum::<f32>() / source_channels as f32 );
            continue;
        }
        for ch in 0..output_channels {
            out.push( frame[ ch.min( source_channels - 1 ) ] );
        }
    }
    out
}


/// Audio output handler.
///
/// Not Send: cpal streams must stay on the thread that built them.
pub struct AudioOutput {
    stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
}


impl AudioOutput {
    /// Opens the default output device at its default configuration, with
    /// `voices` mixer channels.
    ///
    /// Each channel buffers about half a second of audio.
    pub fn open( voices: usize ) -> Result<( Self, Vec<Arc<ChannelBuffer>> ), OutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or( OutputError::NoDevice )?;

        tracing::info!( "Using output device: {:?}", device.name() );

        let config = device
            .default_output_config()
            .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
            .config();

        tracing::info!(
            "Audio output config: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let capacity = config.sample_rate.0 as usize * config.channels as usize / 2;
        let channels: Vec<Arc<ChannelBuffer>> = ( 0..voices )
            .map( |_| Arc::new( ChannelBuffer::new( capacity ) ) )
            .collect();
        let callback_channels = channels.clone();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    data.fill( 0.0 );
                    for channel in &callback_channels {
                        channel.mix_into( data );
                    }
                    for sample in data.iter_mut() {
                        *sample = sample.clamp( -1.0, 1.0 );
                    }
                },
                |err| {
                    tracing::error!( "Audio output error: {}", err );
                },
                None,
            )
            .map_err( |e| OutputError::BuildStream( e.to_string() ) )?;

        stream
            .play()
            .map_err( |e| OutputError::PlayStream( e.to_string() ) )?;

        Ok((
            Self {
                stream,
                sample_rate: config.sample_rate.0,
                channels: config.channels,
            },
            channels,
        ))
    }


    /// Suspends the device stream.
    pub fn pause( &self ) -> Result<(), OutputError> {
        self.stream
            .pause()
            .map_err( |e| OutputError::PlayStream( e.to_string() ) )
    }


    /// Gets the actual sample rate.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    /// Gets the actual number of channels.
    pub fn channels( &self ) -> u16 {
        self.channels
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_push_respects_capacity() {
        let channel = ChannelBuffer::new( 4 );
        assert_eq!( channel.push( &[ 0.1; 6 ] ), 4 );
        assert_eq!( channel.len(), 4 );
        assert_eq!( channel.push( &[ 0.1 ] ), 0 );
    }


    #[test]
    fn test_channels_sum_at_their_gain() {
        let music = ChannelBuffer::new( 16 );
        let noise = ChannelBuffer::new( 16 );
        music.push( &[ 0.5, 0.5, 0.5 ] );
        noise.push( &[ 1.0, 1.0 ] );
        noise.set_volume( 0.25 );

        let mut out = [ 0.0; 4 ];
        music.mix_into( &mut out );
        noise.mix_into( &mut out );
        assert_eq!( out, [ 0.75, 0.75, 0.5, 0.0 ] );
        assert!( music.is_empty() );
    }


    #[test]
    fn test_paused_channel_keeps_samples() {
        let channel = ChannelBuffer::new( 8 );
        channel.push( &[ 0.2, 0.2 ] );
        channel.set_paused( true );

        let mut out = [ 0.0; 2 ];
        assert_eq!( channel.mix_into( &mut out ), 0 );
        assert_eq!( out, [ 0.0, 0.0 ] );
        assert_eq!( channel.len(), 2 );
    }


    #[test]
    fn test_remix_layouts() {
        assert_eq!( remix( &[ 0.1, 0.2 ], 1, 2 ), vec![ 0.1, 0.1, 0.2, 0.2 ] );
        assert_eq!( remix( &[ 0.25, 0.75, 0.5, 1.0 ], 2, 1 ), vec![ 0.5, 0.75 ] );
        assert_eq!( remix( &[ 1.0, 2.0 ], 2, 4 ), vec![ 1.0, 2.0, 2.0, 2.0 ] );
        assert_eq!( remix( &[ 1.0, 2.0, 3.0 ], 3, 2 ), vec![ 1.0, 2.0 ] );
    }
}

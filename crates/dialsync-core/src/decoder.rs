//! Audio decoding via Symphonia
//!
//! Decodes station tracks, static clips and sound cues into interleaved f32
//! samples, and measures track durations for the catalog.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{ Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_NULL };
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{ FormatOptions, FormatReader, Packet, SeekMode, SeekTo };
use symphonia::core::io::{ MediaSourceStream, MediaSourceStreamOptions };
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use thiserror::Error;


/// Errors that can occur during decoding.
#[derive( Debug, Error )]
pub enum DecoderError {
    #[error( "Failed to open file: {0}" )]
    FileOpen( #[from] std::io::Error ),

    #[error( "Unsupported format" )]
    UnsupportedFormat,

    #[error( "No audio tracks found" )]
    NoAudioTrack,

    #[error( "Decoder creation failed: {0}" )]
    DecoderCreation( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Seek error: {0}" )]
    Seek( String ),
}


/// Audio decoder wrapper around Symphonia.
pub struct Decoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    n_frames: Option<u64>,
}


impl Decoder {
    /// Opens an audio file for decoding.
    pub fn open( path: &Path ) -> Result<Self, DecoderError> {
        let file = File::open( path )?;
        let mss = MediaSourceStream::new( Box::new( file ), MediaSourceStreamOptions { buffer_len: 64 * 1024 } );

        let mut hint = Hint::new();
        if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
            hint.with_extension( ext );
        }

        let probed = symphonia::default::get_probe()
            .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
            .map_err( |_| DecoderError::UnsupportedFormat )?;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
            .ok_or( DecoderError::NoAudioTrack )?;

        let track_id = track.id;
        let codec_params = &track.codec_params;
        let sample_rate = codec_params.sample_rate.unwrap_or( 44100 );
        let channels = codec_params.channels.map( |c| c.count() ).unwrap_or( 2 );
        let n_frames = codec_params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make( codec_params, &DecoderOptions::default() )
            .map_err( |e| DecoderError::DecoderCreation( e.to_string() ) )?;

        tracing::debug!(
            "Opened {}: {} Hz, {} channels",
            path.display(),
            sample_rate,
            channels
        );

        Ok( Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            sample_buf: None,
            n_frames,
        })
    }


    /// Returns the sample rate of the audio.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    /// Returns the number of channels.
    pub fn channels( &self ) -> usize {
        self.channels
    }


    /// Returns the duration from the container header, if it has one.
    pub fn duration( &self ) -> Option<Duration> {
        self.n_frames.map( |frames| frames_to_duration( frames, self.sample_rate ) )
    }


    /// Next packet of our track, or None at end of stream.
    fn next_packet( &mut self ) -> Result<Option<Packet>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok( packet ) => packet,
                Err( SymphoniaError::IoError( ref e ) ) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok( None );
                }
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            if packet.track_id() == self.track_id {
                return Ok( Some( packet ) );
            }
        }
    }


    /// Decodes the next packet and returns interleaved f32 samples.
    ///
    /// Returns None when EOF is reached.
    pub fn decode_next( &mut self ) -> Result<Option<Vec<f32>>, DecoderError> {
        loop {
            let Some( packet ) = self.next_packet()? else {
                return Ok( None );
            };

            let decoded = match self.decoder.decode( &packet ) {
                Ok( decoded ) => decoded,
                // Recoverable, skip the packet
                Err( SymphoniaError::DecodeError( _ ) ) => continue,
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            let spec = *decoded.spec();
            let num_frames = decoded.frames();

            if self.sample_buf.as_ref().is_some_and( |b| b.capacity() < num_frames ) {
                self.sample_buf = None;
            }
            let sample_buf = self.sample_buf
                .get_or_insert_with( || SampleBuffer::new( num_frames as u64, spec ) );
            sample_buf.copy_interleaved_ref( decoded );

            return Ok( Some( sample_buf.samples().to_vec() ) );
        }
    }


    /// Seeks to `position` from the start of the track.
    pub fn seek( &mut self, position: Duration ) -> Result<(), DecoderError> {
        let seek_to = SeekTo::Time {
            time: Time::from( position.as_secs_f64() ),
            track_id: Some( self.track_id ),
        };

        self.format_reader
            .seek( SeekMode::Accurate, seek_to )
            .map_err( |e| DecoderError::Seek( e.to_string() ) )?;

        self.decoder.reset();
        Ok(())
    }


    /// Counts frames by walking every packet. Used when the header has
    /// no frame count.
    fn count_frames( &mut self ) -> Result<u64, DecoderError> {
        let mut frames = 0u64;
        while let Some( packet ) = self.next_packet()? {
            frames += packet.dur();
        }
        Ok( frames )
    }
}


fn frames_to_duration( frames: u64, sample_rate: u32 ) -> Duration {
    Duration::from_secs_f64( frames as f64 / f64::from( sample_rate.max( 1 ) ) )
}


/// Measures the playing time of an audio file.
pub fn probe_duration( path: &Path ) -> Result<Duration, DecoderError> {
    let mut decoder = Decoder::open( path )?;
    if let Some( duration ) = decoder.duration() {
        return Ok( duration );
    }

    tracing::debug!( "No frame count in {}, scanning packets", path.display() );
    let frames = decoder.count_frames()?;
    Ok( frames_to_duration( frames, decoder.sample_rate ) )
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_frames_to_duration() {
        assert_eq!( frames_to_duration( 44_100 * 3, 44_100 ), Duration::from_secs( 3 ) );
        assert_eq!( frames_to_duration( 24_000, 48_000 ), Duration::from_millis( 500 ) );
    }


    #[test]
    fn test_missing_file_is_an_open_error() {
        let result = Decoder::open( Path::new( "/nonexistent/track.ogg" ) );
        assert!( matches!( result, Err( DecoderError::FileOpen( _ ) ) ) );
    }


    #[test]
    fn test_garbage_file_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "noise.ogg" );
        std::fs::write( &path, b"definitely not an ogg stream" ).unwrap();
        assert!( matches!( probe_duration( &path ), Err( DecoderError::UnsupportedFormat ) ) );
    }
}

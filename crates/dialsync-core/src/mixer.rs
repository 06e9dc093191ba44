//! Concrete audio engine
//!
//! Three voices share one output stream: the tuned station, static noise
//! and sound cues. Each voice decodes on its own thread into its channel
//! buffer, resampling to the device rate when needed.

use std::collections::HashMap;
use std::path::{ Path, PathBuf };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::seq::SliceRandom;
use rubato::{ FastFixedOut, PolynomialDegree, Resampler };

use crate::audio::{ AudioEngine, AudioError, Effect };
use crate::catalog::list_audio_files;
use crate::decoder::Decoder;
use crate::output::{ remix, AudioOutput, ChannelBuffer };


/// Converts planar samples back to interleaved format.
/// [[L0, L1, ...], [R0, R1, ...]] → [L0, R0, L1, R1, ...]
fn interleave( channels: &[Vec<f32>] ) -> Vec<f32> {
    if channels.is_empty() || channels[ 0 ].is_empty() {
        return Vec::new();
    }
    let frames = channels[ 0 ].len();
    let mut out = Vec::with_capacity( frames * channels.len() );
    for f in 0..frames {
        for ch in channels {
            out.push( ch[ f ] );
        }
    }
    out
}


/// Rate and layout every voice is converted to.
#[derive( Debug, Clone, Copy )]
struct OutputFormat {
    sample_rate: u32,
    channels: usize,
}


/// One file playing into one channel buffer.
struct Voice {
    stop_flag: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    bus: Arc<ChannelBuffer>,
    thread: Option<thread::JoinHandle<()>>,
}


impl Voice {
    /// Opens `path`, seeks to `offset` and starts decoding. Open and seek
    /// failures are reported here, before anything is queued.
    fn start( path: &Path, offset: Duration, bus: Arc<ChannelBuffer>, format: OutputFormat ) -> Result<Self, AudioError> {
        let mut decoder = Decoder::open( path )
            .map_err( |e| AudioError::FileOpen( format!( "{}: {}", path.display(), e ) ) )?;

        if !offset.is_zero() {
            if decoder.duration().is_some_and( |d| offset >= d ) {
                return Err( AudioError::Seek( format!( "{:?} is past the end of {}", offset, path.display() ) ) );
            }
            decoder.seek( offset ).map_err( |e| AudioError::Seek( e.to_string() ) )?;
        }

        let resampler = if decoder.sample_rate() != format.sample_rate {
            tracing::debug!( "Resampling: {} Hz → {} Hz", decoder.sample_rate(), format.sample_rate );
            let resampler = FastFixedOut::<f32>::new(
                f64::from( format.sample_rate ) / f64::from( decoder.sample_rate() ),
                2.0,
                PolynomialDegree::Cubic,
                1024,
                decoder.channels(),
            ).map_err( |e| AudioError::Output( format!( "Failed to create resampler: {}", e ) ) )?;
            Some( resampler )
        } else {
            None
        };

        bus.clear();
        bus.set_paused( false );

        let stop_flag = Arc::new( AtomicBool::new( false ) );
        let ended = Arc::new( AtomicBool::new( false ) );
        let thread = {
            let stop_flag = Arc::clone( &stop_flag );
            let ended = Arc::clone( &ended );
            let bus = Arc::clone( &bus );
            thread::spawn( move || {
                Self::decode_loop( decoder, bus, stop_flag, ended, resampler, format );
            })
        };

        Ok( Self {
            stop_flag,
            ended,
            bus,
            thread: Some( thread ),
        })
    }


    /// Pushes all of `samples`, waiting for room. Gives up if stopped.
    fn push_all( bus: &ChannelBuffer, samples: &[f32], stop_flag: &AtomicBool ) {
        let mut offset = 0;
        while offset < samples.len() && !stop_flag.load( Ordering::Relaxed ) {
            let pushed = bus.push( &samples[ offset.. ] );
            offset += pushed;
            if pushed == 0 {
                thread::sleep( Duration::from_millis( 5 ) );
            }
        }
    }


    fn decode_loop(
        mut decoder: Decoder,
        bus: Arc<ChannelBuffer>,
        stop_flag: Arc<AtomicBool>,
        ended: Arc<AtomicBool>,
        mut resampler: Option<FastFixedOut<f32>>,
        format: OutputFormat,
    ) {
        let output_channels = format.channels;
        let channels = decoder.channels().max( 1 );
        let mut resample_input: Vec<Vec<f32>> = ( 0..channels ).map( |_| Vec::new() ).collect();
        // Keep about 50ms queued
        let target_buffer = ( format.sample_rate as usize * output_channels ) / 20;

        loop {
            if stop_flag.load( Ordering::Relaxed ) {
                tracing::debug!( "Decode loop: stop signal received" );
                break;
            }

            if bus.is_paused() || bus.len() > target_buffer {
                thread::sleep( Duration::from_millis( 5 ) );
                continue;
            }

            match decoder.decode_next() {
                Ok( Some( samples ) ) => {
                    let samples = match resampler.as_mut() {
                        Some( resampler ) => {
                            for frame in samples.chunks( channels ) {
                                for ( ch, sample ) in frame.iter().enumerate() {
                                    resample_input[ ch ].push( *sample );
                                }
                            }

                            let mut resampled = Vec::new();
                            while resample_input[ 0 ].len() >= resampler.input_frames_next() {
                                let needed = resampler.input_frames_next();
                                let chunk: Vec<Vec<f32>> = resample_input
                                    .iter_mut()
                                    .map( |ch| ch.drain( ..needed ).collect() )
                                    .collect();

                                match resampler.process( &chunk, None ) {
                                    Ok( out ) => resampled.extend( interleave( &out ) ),
                                    Err( e ) => {
                                        tracing::error!( "Resample error: {}", e );
                                        break;
                                    }
                                }
                            }
                            resampled
                        }
                        None => samples,
                    };

                    Self::push_all( &bus, &remix( &samples, channels, output_channels ), &stop_flag );
                }
                Ok( None ) => {
                    if let Some( resampler ) = resampler.as_mut() {
                        if !resample_input[ 0 ].is_empty() {
                            match resampler.process_partial( Some( resample_input.as_slice() ), None ) {
                                Ok( out ) => {
                                    let tail = remix( &interleave( &out ), channels, output_channels );
                                    Self::push_all( &bus, &tail, &stop_flag );
                                }
                                Err( e ) => tracing::error!( "Final resample error: {}", e ),
                            }
                        }
                    }

                    // Let the queue drain before reporting the end
                    while !bus.is_empty() && !stop_flag.load( Ordering::Relaxed ) {
                        thread::sleep( Duration::from_millis( 10 ) );
                    }
                    if !stop_flag.load( Ordering::Relaxed ) {
                        ended.store( true, Ordering::Relaxed );
                    }
                    break;
                }
                Err( e ) => {
                    tracing::error!( "Decode error: {}", e );
                    ended.store( true, Ordering::Relaxed );
                    break;
                }
            }
        }

        tracing::debug!( "Decode loop: exiting" );
    }


    fn has_ended( &self ) -> bool {
        self.ended.load( Ordering::Relaxed )
    }


    fn stop( &mut self ) {
        self.stop_flag.store( true, Ordering::Relaxed );
        if let Some( thread ) = self.thread.take() {
            let _ = thread.join();
        }
        self.bus.clear();
    }
}


impl Drop for Voice {
    fn drop( &mut self ) {
        self.stop();
    }
}


/// Sound files used by the mixer besides station tracks.
#[derive( Debug, Clone, Default )]
pub struct SoundFiles {
    /// Folder of static clips, one picked at random each time
    pub static_dir: PathBuf,
    pub effects: HashMap<Effect, PathBuf>,
}


/// Audio engine backed by the default output device.
pub struct Mixer {
    #[allow( dead_code )] // Kept alive: dropping it stops the stream
    output: AudioOutput,
    format: OutputFormat,
    music_bus: Arc<ChannelBuffer>,
    static_bus: Arc<ChannelBuffer>,
    effect_bus: Arc<ChannelBuffer>,
    music: Option<Voice>,
    noise: Option<Voice>,
    cue: Option<Voice>,
    static_clips: Vec<PathBuf>,
    static_wanted: bool,
    effects: HashMap<Effect, PathBuf>,
}


impl Mixer {
    /// Opens the output device. Failing to do so is fatal for the radio.
    pub fn open( sounds: SoundFiles ) -> Result<Self, AudioError> {
        let ( output, buses ) = AudioOutput::open( 3 )
            .map_err( |e| AudioError::Output( e.to_string() ) )?;
        let [ music_bus, static_bus, effect_bus ]: [Arc<ChannelBuffer>; 3] = buses
            .try_into()
            .map_err( |_| AudioError::Output( "mixer channel setup failed".into() ) )?;

        let static_clips = match list_audio_files( &sounds.static_dir ) {
            Ok( clips ) => clips,
            Err( e ) => {
                tracing::warn!( "No static sounds in {}: {}", sounds.static_dir.display(), e );
                Vec::new()
            }
        };
        tracing::info!( "Loaded {} static clips", static_clips.len() );

        let format = OutputFormat {
            sample_rate: output.sample_rate(),
            channels: usize::from( output.channels() ),
        };

        Ok( Self {
            output,
            format,
            music_bus,
            static_bus,
            effect_bus,
            music: None,
            noise: None,
            cue: None,
            static_clips,
            static_wanted: false,
            effects: sounds.effects,
        })
    }


    fn start_static( &mut self ) {
        let Some( clip ) = self.static_clips.choose( &mut rand::thread_rng() ).cloned() else {
            return;
        };
        match Voice::start( &clip, Duration::ZERO, Arc::clone( &self.static_bus ), self.format ) {
            Ok( voice ) => self.noise = Some( voice ),
            Err( e ) => {
                tracing::warn!( "Static clip failed: {}", e );
                self.static_clips.retain( |c| c != &clip );
            }
        }
    }
}


impl AudioEngine for Mixer {
    fn play_track( &mut self, path: &Path, offset: Duration ) -> Result<(), AudioError> {
        self.music = None;
        let voice = Voice::start( path, offset, Arc::clone( &self.music_bus ), self.format )?;
        self.music = Some( voice );
        Ok(())
    }


    fn pause( &mut self ) {
        self.music_bus.set_paused( true );
    }


    fn stop( &mut self ) {
        self.music = None;
    }


    fn set_music_volume( &mut self, volume: f32 ) {
        self.music_bus.set_volume( volume );
    }


    fn take_track_ended( &mut self ) -> bool {
        if self.music.as_ref().is_some_and( Voice::has_ended ) {
            self.music = None;
            return true;
        }
        false
    }


    fn set_static( &mut self, playing: bool ) {
        self.static_wanted = playing;
        if !playing {
            self.noise = None;
        } else if self.noise.is_none() {
            self.start_static();
        }
    }


    fn set_static_volume( &mut self, volume: f32 ) {
        self.static_bus.set_volume( volume );
    }


    fn play_effect( &mut self, effect: Effect, volume: f32 ) {
        let Some( path ) = self.effects.get( &effect ).cloned() else {
            tracing::debug!( "No sound for {:?}", effect );
            return;
        };

        self.cue = None;
        self.effect_bus.set_volume( volume );
        match Voice::start( &path, Duration::ZERO, Arc::clone( &self.effect_bus ), self.format ) {
            Ok( voice ) => self.cue = Some( voice ),
            Err( e ) => tracing::warn!( "Sound cue {:?} failed: {}", effect, e ),
        }
    }


    /// Loops static by picking a fresh clip when the last one ends.
    fn service( &mut self ) {
        if self.cue.as_ref().is_some_and( Voice::has_ended ) {
            self.cue = None;
        }
        if self.static_wanted && self.noise.as_ref().map_or( true, Voice::has_ended ) {
            self.noise = None;
            self.start_static();
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_interleave() {
        let planar = vec![ vec![ 1.0, 2.0 ], vec![ 3.0, 4.0 ] ];
        assert_eq!( interleave( &planar ), vec![ 1.0, 3.0, 2.0, 4.0 ] );
        assert!( interleave( &[] ).is_empty() );
    }


    #[test]
    fn test_voice_rejects_missing_file() {
        let bus = Arc::new( ChannelBuffer::new( 64 ) );
        let format = OutputFormat { sample_rate: 48_000, channels: 2 };
        let result = Voice::start( Path::new( "/nonexistent/a.ogg" ), Duration::ZERO, bus, format );
        assert!( matches!( result, Err( AudioError::FileOpen( _ ) ) ) );
    }
}

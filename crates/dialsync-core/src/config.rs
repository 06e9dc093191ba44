//! Radio configuration
//!
//! Loaded from a TOML file. Every field has a default, so a partial file
//! only overrides what it names.

use std::path::{ Path, PathBuf };
use std::time::Duration;

use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::audio::Effect;
use crate::engine::{ EngineConfig, VolumeLevels };
use crate::link::{ LinkTiming, ReconnectPolicy };
use crate::mixer::SoundFiles;
use crate::session::SyncParams;
use crate::settings::JsonSettingsStore;
use crate::tuning::DialGeometry;


#[derive( Debug, Error )]
pub enum ConfigError {
    #[error( "IO error on {path}: {source}" )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error( "Invalid config file: {0}" )]
    Parse( #[from] toml::de::Error ),

    #[error( "Could not write config: {0}" )]
    Serialize( #[from] toml::ser::Error ),

    #[error( "Invalid config: {0}" )]
    Invalid( String ),
}


#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct RadioConfig {
    /// Loop iterations per second
    pub tick_rate: u32,
    pub paths: PathsConfig,
    pub motor: MotorConfig,
    pub tuning: TuningConfig,
    pub volume: VolumeConfig,
    pub playback: PlaybackConfig,
    pub link: LinkConfig,
}


#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct PathsConfig {
    /// Root of the band/station folder tree
    pub stations_root: PathBuf,
    /// Folder of static noise clips
    pub static_sounds: PathBuf,
    pub settings_file: PathBuf,
    pub effect_on: PathBuf,
    pub effect_off: PathBuf,
    pub effect_band_change: PathBuf,
    pub effect_error: PathBuf,
}


#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct MotorConfig {
    pub min_angle: f64,
    pub max_angle: f64,
}


#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct TuningConfig {
    pub end_zone: f64,
    pub lock_on: f64,
    pub near: f64,
    pub sweep_enabled: bool,
    pub gauge_pixels: u8,
}


#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct VolumeConfig {
    pub default: f32,
    pub step: f32,
    pub min: f32,
    pub static_ratio: f32,
    pub static_min: f32,
    pub effects: f32,
    pub band_change: f32,
}


#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct PlaybackConfig {
    /// Shared synchronization epoch. Changing it desynchronizes this unit.
    pub epoch_unix_secs: u64,
    pub seek_increment_secs: u64,
    pub shuffle_bucket_secs: u64,
}


#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct LinkConfig {
    pub device: PathBuf,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// How long to wait for the peer at startup before giving up
    pub startup_timeout_secs: u64,
    /// Name sent in our heartbeats
    pub local_name: String,
    /// Name expected in the peer's heartbeats
    pub peer_name: String,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub max_line_len: usize,
}


impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            tick_rate: 200,
            paths: PathsConfig::default(),
            motor: MotorConfig::default(),
            tuning: TuningConfig::default(),
            volume: VolumeConfig::default(),
            playback: PlaybackConfig::default(),
            link: LinkConfig::default(),
        }
    }
}


impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            stations_root: PathBuf::from( "radio" ),
            static_sounds: PathBuf::from( "sounds/static" ),
            settings_file: default_settings_file(),
            effect_on: PathBuf::from( "sounds/effects/on.ogg" ),
            effect_off: PathBuf::from( "sounds/effects/off.ogg" ),
            effect_band_change: PathBuf::from( "sounds/effects/band.ogg" ),
            effect_error: PathBuf::from( "sounds/effects/error.ogg" ),
        }
    }
}


fn default_settings_file() -> PathBuf {
    JsonSettingsStore::default_path().unwrap_or_else( || PathBuf::from( "saved.json" ) )
}


impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            min_angle: 14.0,
            max_angle: 168.0,
        }
    }
}


impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            end_zone: 14.0,
            lock_on: 2.0,
            near: 8.0,
            sweep_enabled: false,
            gauge_pixels: 7,
        }
    }
}


impl Default for VolumeConfig {
    fn default() -> Self {
        let levels = VolumeLevels::default();
        Self {
            default: levels.default,
            step: levels.step,
            min: levels.min,
            static_ratio: levels.static_ratio,
            static_min: levels.static_min,
            effects: levels.effects,
            band_change: levels.band_change,
        }
    }
}


impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            // 2020-01-01T00:00:00Z
            epoch_unix_secs: 1_577_836_800,
            seek_increment_secs: 5,
            shuffle_bucket_secs: 600,
        }
    }
}


impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from( "/dev/ttyACM1" ),
            heartbeat_interval_ms: 2000,
            heartbeat_timeout_ms: 30_000,
            startup_timeout_secs: 300,
            local_name: "Zero".to_string(),
            peer_name: "Pico".to_string(),
            reconnect_initial_ms: 500,
            reconnect_max_ms: 8000,
            max_line_len: 256,
        }
    }
}


impl RadioConfig {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "dialsync" ).join( "config.toml" ) )
    }


    /// Loads the config at `path`, writing a default one if it is missing.
    pub fn load( path: &Path ) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.save( path )?;
            tracing::info!( "Wrote default config to {}", path.display() );
            return Ok( config );
        }

        let content = std::fs::read_to_string( path ).map_err( |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str( &content )?;
        config.validate()?;
        Ok( config )
    }


    pub fn save( &self, path: &Path ) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io { path: path.to_path_buf(), source };

        if let Some( parent ) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all( parent ).map_err( io )?;
            }
        }
        let content = toml::to_string_pretty( self )?;
        std::fs::write( path, content ).map_err( io )?;
        Ok(())
    }


    /// Rejects settings the engine cannot work with.
    pub fn validate( &self ) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err( ConfigError::Invalid( msg ) );
        let range = self.motor.max_angle - self.motor.min_angle;

        if !( range > 0.0 ) {
            return invalid( format!(
                "min_angle {} must be below max_angle {}",
                self.motor.min_angle, self.motor.max_angle
            ));
        }
        if !( self.tuning.end_zone >= 0.0 && 2.0 * self.tuning.end_zone < range ) {
            return invalid( format!( "end_zone {} leaves no room on a {} degree dial", self.tuning.end_zone, range ) );
        }
        if !( self.tuning.lock_on > 0.0 && self.tuning.lock_on < self.tuning.near ) {
            return invalid( format!(
                "lock_on {} must be positive and below near {}",
                self.tuning.lock_on, self.tuning.near
            ));
        }
        if self.tick_rate == 0 {
            return invalid( "tick_rate must be positive".into() );
        }
        if self.link.heartbeat_interval_ms >= self.link.heartbeat_timeout_ms {
            return invalid( format!(
                "heartbeat_interval_ms {} must be below heartbeat_timeout_ms {}",
                self.link.heartbeat_interval_ms, self.link.heartbeat_timeout_ms
            ));
        }
        if self.link.max_line_len == 0 {
            return invalid( "max_line_len must be positive".into() );
        }
        Ok(())
    }


    pub fn geometry( &self ) -> DialGeometry {
        DialGeometry {
            min_angle: self.motor.min_angle,
            max_angle: self.motor.max_angle,
            end_zone: self.tuning.end_zone,
            lock_on: self.tuning.lock_on,
            near: self.tuning.near,
        }
    }


    pub fn sync_params( &self ) -> SyncParams {
        SyncParams {
            epoch: Duration::from_secs( self.playback.epoch_unix_secs ),
            seek_increment: Duration::from_secs( self.playback.seek_increment_secs ),
            shuffle_bucket: Duration::from_secs( self.playback.shuffle_bucket_secs ),
        }
    }


    pub fn engine_config( &self ) -> EngineConfig {
        let v = &self.volume;
        EngineConfig {
            geometry: self.geometry(),
            sync: self.sync_params(),
            volume: VolumeLevels {
                default: v.default,
                step: v.step,
                min: v.min,
                static_ratio: v.static_ratio,
                static_min: v.static_min,
                effects: v.effects,
                band_change: v.band_change,
            },
            sweep_enabled: self.tuning.sweep_enabled,
            gauge_pixels: self.tuning.gauge_pixels,
        }
    }


    pub fn link_timing( &self ) -> LinkTiming {
        LinkTiming {
            heartbeat_interval: Duration::from_millis( self.link.heartbeat_interval_ms ),
            heartbeat_timeout: Duration::from_millis( self.link.heartbeat_timeout_ms ),
        }
    }


    pub fn reconnect_policy( &self ) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis( self.link.reconnect_initial_ms ),
            Duration::from_millis( self.link.reconnect_max_ms ),
        )
    }


    pub fn sound_files( &self ) -> SoundFiles {
        let p = &self.paths;
        SoundFiles {
            static_dir: p.static_sounds.clone(),
            effects: [
                ( Effect::PowerOn, p.effect_on.clone() ),
                ( Effect::PowerOff, p.effect_off.clone() ),
                ( Effect::BandChange, p.effect_band_change.clone() ),
                ( Effect::Error, p.effect_error.clone() ),
            ]
            .into_iter()
            .collect(),
        }
    }


    /// Time between loop iterations.
    pub fn tick_interval( &self ) -> Duration {
        Duration::from_secs( 1 ) / self.tick_rate.max( 1 )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_defaults_are_valid() {
        let config = RadioConfig::default();
        config.validate().unwrap();
        assert_eq!( config.geometry(), DialGeometry::default() );
        assert_eq!( config.sync_params(), SyncParams::default() );
        assert_eq!( config.link_timing(), LinkTiming::default() );
        assert_eq!( config.tick_interval(), Duration::from_millis( 5 ) );
        assert_eq!( config.sound_files().effects.len(), 4 );
    }


    #[test]
    fn test_missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "dialsync" ).join( "config.toml" );
        let config = RadioConfig::load( &path ).unwrap();
        assert!( path.exists() );
        assert_eq!( RadioConfig::load( &path ).unwrap(), config );
    }


    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "config.toml" );
        std::fs::write( &path, "tick_rate = 100\n\n[tuning]\nnear = 10.0\n\n[link]\ndevice = \"/dev/ttyUSB0\"\n" ).unwrap();

        let config = RadioConfig::load( &path ).unwrap();
        assert_eq!( config.tick_rate, 100 );
        assert_eq!( config.tuning.near, 10.0 );
        assert_eq!( config.tuning.lock_on, 2.0 );
        assert_eq!( config.link.device, PathBuf::from( "/dev/ttyUSB0" ) );
        assert_eq!( config.link.peer_name, "Pico" );
    }


    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut config = RadioConfig::default();
        config.tuning.lock_on = 9.0;
        assert!( matches!( config.validate(), Err( ConfigError::Invalid( _ ) ) ) );

        let mut config = RadioConfig::default();
        config.tuning.end_zone = 80.0;
        assert!( config.validate().is_err() );

        let mut config = RadioConfig::default();
        config.link.heartbeat_timeout_ms = 1000;
        assert!( config.validate().is_err() );
    }


    #[test]
    fn test_garbage_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "config.toml" );
        std::fs::write( &path, "tick_rate = \"fast\"" ).unwrap();
        assert!( matches!( RadioConfig::load( &path ), Err( ConfigError::Parse( _ ) ) ) );
    }
}

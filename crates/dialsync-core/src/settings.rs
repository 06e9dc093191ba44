//! Persisted radio settings
//!
//! Volume, band and station survive standby and restarts so the radio comes
//! back where it was left.

use std::fs;
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };
use thiserror::Error;


#[derive( Debug, Error )]
pub enum SettingsError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Invalid settings file: {0}" )]
    Parse( #[from] serde_json::Error ),
}


/// What is restored on resume.
#[derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct SavedSettings {
    pub volume: f32,
    pub band: usize,
    pub station: usize,
}


impl Default for SavedSettings {
    fn default() -> Self {
        Self {
            volume: 0.05,
            band: 0,
            station: 0,
        }
    }
}


/// Where settings are kept.
pub trait SettingsStore {
    /// Loads saved settings. Returns defaults if nothing was saved yet.
    fn load( &self ) -> Result<SavedSettings, SettingsError>;

    fn save( &mut self, settings: &SavedSettings ) -> Result<(), SettingsError>;
}


/// Settings kept as a small JSON file.
pub struct JsonSettingsStore {
    path: PathBuf,
}


impl JsonSettingsStore {
    pub fn new( path: impl Into<PathBuf> ) -> Self {
        Self { path: path.into() }
    }


    /// Default location under the user's local data directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map( |p| p.join( "dialsync" ).join( "saved.json" ) )
    }


    pub fn path( &self ) -> &Path {
        &self.path
    }
}


impl SettingsStore for JsonSettingsStore {
    fn load( &self ) -> Result<SavedSettings, SettingsError> {
        if !self.path.exists() {
            return Ok( SavedSettings::default() );
        }

        let contents = fs::read_to_string( &self.path )?;
        Ok( serde_json::from_str( &contents )? )
    }


    fn save( &mut self, settings: &SavedSettings ) -> Result<(), SettingsError> {
        if let Some( parent ) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all( parent )?;
            }
        }

        let json = serde_json::to_string_pretty( settings )?;
        fs::write( &self.path, json )?;
        tracing::debug!( "Saved settings to {}", self.path.display() );
        Ok(())
    }
}


/// Loads settings, falling back to defaults on any error.
pub fn load_or_default( store: &dyn SettingsStore ) -> SavedSettings {
    match store.load() {
        Ok( settings ) => settings,
        Err( e ) => {
            tracing::warn!( "Failed to load settings, using defaults: {}", e );
            SavedSettings::default()
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsStore::new( dir.path().join( "saved.json" ) );
        assert_eq!( store.load().unwrap(), SavedSettings::default() );
    }


    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonSettingsStore::new( dir.path().join( "nested" ).join( "saved.json" ) );
        let saved = SavedSettings { volume: 0.3, band: 1, station: 2 };
        store.save( &saved ).unwrap();
        assert_eq!( store.load().unwrap(), saved );
    }


    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "saved.json" );
        fs::write( &path, r#"{ "band": 3 }"# ).unwrap();
        let loaded = JsonSettingsStore::new( &path ).load().unwrap();
        assert_eq!( loaded.band, 3 );
        assert_eq!( loaded.station, 0 );
        assert_eq!( loaded.volume, 0.05 );
    }


    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "saved.json" );
        fs::write( &path, "not json" ).unwrap();
        let store = JsonSettingsStore::new( &path );
        assert!( matches!( store.load(), Err( SettingsError::Parse( _ ) ) ) );
        assert_eq!( load_or_default( &store ), SavedSettings::default() );
    }
}

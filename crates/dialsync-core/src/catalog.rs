//! Station catalog
//!
//! Scans `<root>/<band>/<station>/*.ogg` into bands of immutable station
//! descriptors. Track durations are cached in each station's `station.json`
//! so probing only happens when a folder changes.

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::decoder::{ probe_duration, DecoderError };
use crate::station::{ Band, StationDescriptor, StationError, Track };


/// Supported audio file extensions.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "ogg", "mp3", "flac", "wav", "m4a", "aac", "opus", "aiff",
];


/// Per-station metadata file.
pub const STATION_FILE: &str = "station.json";


/// Errors that can occur while loading the catalog.
#[derive( Debug, Error )]
pub enum CatalogError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Path not found: {0}" )]
    NotFound( PathBuf ),

    #[error( "Invalid {STATION_FILE} in {path}: {source}" )]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error( transparent )]
    Station( #[from] StationError ),
}


/// Contents of `station.json`.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
pub struct StationFile {
    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub label: Option<String>,

    #[serde( default = "default_ordered" )]
    pub ordered: bool,

    #[serde( default )]
    pub offset_secs: f64,

    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub cache: Option<TrackCache>,
}


impl Default for StationFile {
    fn default() -> Self {
        Self {
            label: None,
            ordered: default_ordered(),
            offset_secs: 0.0,
            cache: None,
        }
    }
}


fn default_ordered() -> bool {
    true
}


/// Cached track list, keyed by the folder it was built from.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
pub struct TrackCache {
    pub path: PathBuf,
    pub tracks: Vec<CachedTrack>,
}


#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
pub struct CachedTrack {
    pub file: String,
    pub duration_secs: f64,
}


impl TrackCache {
    /// Tracks from this cache, or None if it no longer describes `folder`.
    fn tracks_for( &self, folder: &Path ) -> Option<Vec<Track>> {
        if self.path != folder || self.tracks.is_empty() {
            return None;
        }

        self.tracks
            .iter()
            .map( |t| {
                let path = folder.join( &t.file );
                let duration = Duration::try_from_secs_f64( t.duration_secs ).ok()?;
                path.is_file().then( || Track::new( path, duration ) )
            })
            .collect()
    }
}


/// Measures a file's duration.
pub type DurationProbe = fn( &Path ) -> Result<Duration, DecoderError>;


/// Checks if a file has a supported audio extension.
pub fn is_audio_file( path: &Path ) -> bool {
    path.extension()
        .and_then( |e| e.to_str() )
        .map( |e| SUPPORTED_EXTENSIONS.contains( &e.to_lowercase().as_str() ) )
        .unwrap_or( false )
}


/// Audio files directly inside `dir`, sorted by name.
pub fn list_audio_files( dir: &Path ) -> Result<Vec<PathBuf>, CatalogError> {
    let mut files: Vec<PathBuf> = read_dir( dir )?
        .filter( |p| p.is_file() && is_audio_file( p ) )
        .collect();
    files.sort();
    Ok( files )
}


fn sorted_subdirs( dir: &Path ) -> Result<Vec<PathBuf>, CatalogError> {
    let mut dirs: Vec<PathBuf> = read_dir( dir )?.filter( |p| p.is_dir() ).collect();
    dirs.sort();
    Ok( dirs )
}


fn read_dir( dir: &Path ) -> Result<impl Iterator<Item = PathBuf>, CatalogError> {
    match fs::read_dir( dir ) {
        Ok( entries ) => Ok( entries.flatten().map( |e| e.path() ) ),
        Err( e ) if e.kind() == std::io::ErrorKind::NotFound => Err( CatalogError::NotFound( dir.to_path_buf() ) ),
        Err( e ) => Err( CatalogError::Io( e ) ),
    }
}


fn folder_name( path: &Path ) -> String {
    path.file_name()
        .map( |n| n.to_string_lossy().into_owned() )
        .unwrap_or_default()
}


/// Builds bands from a station folder tree.
pub struct CatalogLoader {
    root: PathBuf,
    force_rebuild: bool,
    probe: DurationProbe,
}


impl CatalogLoader {
    pub fn new( root: impl Into<PathBuf> ) -> Self {
        Self {
            root: root.into(),
            force_rebuild: false,
            probe: probe_duration,
        }
    }


    /// Ignores every cached track list and probes all files again.
    pub fn force_rebuild( mut self, force: bool ) -> Self {
        self.force_rebuild = force;
        self
    }


    /// Replaces the duration probe.
    pub fn with_probe( mut self, probe: DurationProbe ) -> Self {
        self.probe = probe;
        self
    }


    /// Scans the root. Stations that fail to load are skipped, as are bands
    /// left without stations.
    pub fn scan( &self ) -> Result<Vec<Band>, CatalogError> {
        tracing::info!( "Scanning stations in {}", self.root.display() );
        let mut bands = Vec::new();

        for band_dir in sorted_subdirs( &self.root )? {
            let mut stations = Vec::new();
            for station_dir in sorted_subdirs( &band_dir )? {
                match self.load_station( &station_dir ) {
                    Ok( station ) => {
                        tracing::debug!( "Loaded {} from {}", station.label(), station.folder().display() );
                        stations.push( station );
                    }
                    Err( e ) => tracing::warn!( "Skipping station {}: {}", station_dir.display(), e ),
                }
            }

            let name = folder_name( &band_dir );
            if stations.is_empty() {
                tracing::warn!( "Skipping band {}: no usable stations", name );
                continue;
            }

            tracing::info!( "Band {}: {} stations", name, stations.len() );
            bands.push( Band::new( bands.len(), name, stations ) );
        }

        tracing::info!( "Found {} bands", bands.len() );
        Ok( bands )
    }


    /// Loads one station folder, rebuilding its cache if needed.
    pub fn load_station( &self, folder: &Path ) -> Result<StationDescriptor, CatalogError> {
        let meta_path = folder.join( STATION_FILE );
        let mut meta = match self.read_station_file( &meta_path ) {
            Ok( meta ) => meta,
            Err( e ) => {
                tracing::warn!( "{}, rebuilding", e );
                StationFile::default()
            }
        };

        let cached = if self.force_rebuild {
            None
        } else {
            meta.cache.as_ref().and_then( |c| c.tracks_for( folder ) )
        };

        let tracks = match cached {
            Some( tracks ) => tracks,
            None => {
                let tracks = self.probe_tracks( folder )?;
                meta.cache = Some( TrackCache {
                    path: folder.to_path_buf(),
                    tracks: tracks
                        .iter()
                        .map( |t| CachedTrack {
                            file: folder_name( &t.path ),
                            duration_secs: t.duration.as_secs_f64(),
                        })
                        .collect(),
                });
                if let Err( e ) = write_station_file( &meta_path, &meta ) {
                    tracing::warn!( "Could not write {}: {}", meta_path.display(), e );
                }
                tracks
            }
        };

        let offset = Duration::try_from_secs_f64( meta.offset_secs ).unwrap_or_else( |_| {
            tracing::warn!( "Ignoring offset {} in {}", meta.offset_secs, meta_path.display() );
            Duration::ZERO
        });

        let label = meta.label.clone().unwrap_or_else( || folder_name( folder ) );
        Ok( StationDescriptor::new( label, folder, meta.ordered, tracks, offset )? )
    }


    fn read_station_file( &self, path: &Path ) -> Result<StationFile, CatalogError> {
        if !path.exists() {
            return Ok( StationFile::default() );
        }
        let content = fs::read_to_string( path )?;
        serde_json::from_str( &content ).map_err( |source| CatalogError::Metadata {
            path: path.to_path_buf(),
            source,
        })
    }


    fn probe_tracks( &self, folder: &Path ) -> Result<Vec<Track>, CatalogError> {
        tracing::info!( "Building track list for {}", folder.display() );
        let mut tracks = Vec::new();

        for file in list_audio_files( folder )? {
            match ( self.probe )( &file ) {
                Ok( duration ) => tracks.push( Track::new( file, duration ) ),
                Err( e ) => tracing::warn!( "Skipping {}: {}", file.display(), e ),
            }
        }
        Ok( tracks )
    }
}


fn write_station_file( path: &Path, meta: &StationFile ) -> Result<(), CatalogError> {
    let json = serde_json::to_string_pretty( meta ).map_err( |source| CatalogError::Metadata {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write( path, json )?;
    Ok(())
}


#[cfg( test )]
mod tests {
    use super::*;


    fn thirty_seconds( _: &Path ) -> Result<Duration, DecoderError> {
        Ok( Duration::from_secs( 30 ) )
    }


    fn never_called( path: &Path ) -> Result<Duration, DecoderError> {
        panic!( "unexpected probe of {}", path.display() )
    }


    fn touch( path: &Path ) {
        fs::create_dir_all( path.parent().unwrap() ).unwrap();
        fs::write( path, b"" ).unwrap();
    }


    fn read_meta( folder: &Path ) -> StationFile {
        serde_json::from_str( &fs::read_to_string( folder.join( STATION_FILE ) ).unwrap() ).unwrap()
    }


    #[test]
    fn test_scan_builds_sorted_bands_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch( &root.join( "fm/b_jazz/2.ogg" ) );
        touch( &root.join( "fm/b_jazz/1.ogg" ) );
        touch( &root.join( "fm/a_news/1.mp3" ) );
        touch( &root.join( "fm/a_news/notes.txt" ) );
        touch( &root.join( "am/talk/1.ogg" ) );
        fs::create_dir_all( root.join( "empty/nothing" ) ).unwrap();

        let bands = CatalogLoader::new( root ).with_probe( thirty_seconds ).scan().unwrap();
        assert_eq!( bands.len(), 2 );
        assert_eq!( bands[ 0 ].name(), "am" );
        assert_eq!( bands[ 1 ].name(), "fm" );
        assert_eq!( bands[ 1 ].index(), 1 );

        let jazz = &bands[ 1 ].stations()[ 1 ];
        assert_eq!( jazz.label(), "b_jazz" );
        assert_eq!( jazz.tracks()[ 0 ].path, root.join( "fm/b_jazz/1.ogg" ) );
        assert_eq!( jazz.total_duration(), Duration::from_secs( 60 ) );

        let cache = read_meta( &root.join( "fm/b_jazz" ) ).cache.unwrap();
        assert_eq!( cache.path, root.join( "fm/b_jazz" ) );
        assert_eq!( cache.tracks.len(), 2 );
    }


    #[test]
    fn test_valid_cache_skips_probing() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join( "fm/swing" );
        touch( &folder.join( "a.ogg" ) );
        touch( &folder.join( "b.ogg" ) );
        let meta = StationFile {
            label: Some( "Swing Time".into() ),
            ordered: false,
            offset_secs: 42.0,
            cache: Some( TrackCache {
                path: folder.clone(),
                tracks: vec![
                    CachedTrack { file: "b.ogg".into(), duration_secs: 100.0 },
                    CachedTrack { file: "a.ogg".into(), duration_secs: 50.5 },
                ],
            }),
        };
        write_station_file( &folder.join( STATION_FILE ), &meta ).unwrap();

        let station = CatalogLoader::new( dir.path() )
            .with_probe( never_called )
            .load_station( &folder )
            .unwrap();
        assert_eq!( station.label(), "Swing Time" );
        assert!( !station.ordered() );
        assert_eq!( station.offset(), Duration::from_secs( 42 ) );
        assert_eq!( station.tracks()[ 0 ].path, folder.join( "b.ogg" ) );
        assert_eq!( station.total_duration(), Duration::from_millis( 150_500 ) );
    }


    #[test]
    fn test_moved_folder_invalidates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join( "fm/swing" );
        touch( &folder.join( "a.ogg" ) );
        let meta = StationFile {
            cache: Some( TrackCache {
                path: PathBuf::from( "/old/place/swing" ),
                tracks: vec![ CachedTrack { file: "a.ogg".into(), duration_secs: 999.0 } ],
            }),
            ..StationFile::default()
        };
        write_station_file( &folder.join( STATION_FILE ), &meta ).unwrap();

        let station = CatalogLoader::new( dir.path() )
            .with_probe( thirty_seconds )
            .load_station( &folder )
            .unwrap();
        assert_eq!( station.total_duration(), Duration::from_secs( 30 ) );
        assert_eq!( read_meta( &folder ).cache.unwrap().path, folder );
    }


    #[test]
    fn test_missing_track_invalidates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join( "swing" );
        touch( &folder.join( "a.ogg" ) );
        let meta = StationFile {
            cache: Some( TrackCache {
                path: folder.clone(),
                tracks: vec![
                    CachedTrack { file: "a.ogg".into(), duration_secs: 10.0 },
                    CachedTrack { file: "gone.ogg".into(), duration_secs: 10.0 },
                ],
            }),
            ..StationFile::default()
        };
        write_station_file( &folder.join( STATION_FILE ), &meta ).unwrap();

        let station = CatalogLoader::new( dir.path() )
            .with_probe( thirty_seconds )
            .load_station( &folder )
            .unwrap();
        assert_eq!( station.tracks().len(), 1 );
        assert_eq!( station.total_duration(), Duration::from_secs( 30 ) );
    }


    #[test]
    fn test_out_of_range_cached_duration_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join( "swing" );
        touch( &folder.join( "a.ogg" ) );
        let meta = StationFile {
            cache: Some( TrackCache {
                path: folder.clone(),
                tracks: vec![ CachedTrack { file: "a.ogg".into(), duration_secs: 1e30 } ],
            }),
            ..StationFile::default()
        };
        write_station_file( &folder.join( STATION_FILE ), &meta ).unwrap();

        let station = CatalogLoader::new( dir.path() )
            .with_probe( thirty_seconds )
            .load_station( &folder )
            .unwrap();
        assert_eq!( station.total_duration(), Duration::from_secs( 30 ) );
        assert_eq!( read_meta( &folder ).cache.unwrap().tracks[ 0 ].duration_secs, 30.0 );
    }


    #[test]
    fn test_out_of_range_offset_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join( "swing" );
        touch( &folder.join( "a.ogg" ) );
        for offset_secs in [ 1e30, -5.0 ] {
            let meta = StationFile { offset_secs, ..StationFile::default() };
            write_station_file( &folder.join( STATION_FILE ), &meta ).unwrap();

            let station = CatalogLoader::new( dir.path() )
                .with_probe( thirty_seconds )
                .load_station( &folder )
                .unwrap();
            assert_eq!( station.offset(), Duration::ZERO );
        }
    }


    #[test]
    fn test_overflowing_cached_durations_skip_station() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join( "fm/endless" );
        touch( &folder.join( "a.ogg" ) );
        touch( &folder.join( "b.ogg" ) );
        let huge = Duration::MAX.as_secs_f64() * 0.75;
        let meta = StationFile {
            cache: Some( TrackCache {
                path: folder.clone(),
                tracks: vec![
                    CachedTrack { file: "a.ogg".into(), duration_secs: huge },
                    CachedTrack { file: "b.ogg".into(), duration_secs: huge },
                ],
            }),
            ..StationFile::default()
        };
        write_station_file( &folder.join( STATION_FILE ), &meta ).unwrap();

        let result = CatalogLoader::new( dir.path() ).with_probe( never_called ).load_station( &folder );
        assert!( matches!( result, Err( CatalogError::Station( StationError::TooLong( _ ) ) ) ) );
    }


    #[test]
    fn test_force_rebuild_ignores_cache() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join( "swing" );
        touch( &folder.join( "a.ogg" ) );
        let meta = StationFile {
            cache: Some( TrackCache {
                path: folder.clone(),
                tracks: vec![ CachedTrack { file: "a.ogg".into(), duration_secs: 10.0 } ],
            }),
            ..StationFile::default()
        };
        write_station_file( &folder.join( STATION_FILE ), &meta ).unwrap();

        let station = CatalogLoader::new( dir.path() )
            .with_probe( thirty_seconds )
            .force_rebuild( true )
            .load_station( &folder )
            .unwrap();
        assert_eq!( station.total_duration(), Duration::from_secs( 30 ) );
    }


    #[test]
    fn test_corrupt_metadata_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join( "swing" );
        touch( &folder.join( "a.ogg" ) );
        fs::write( folder.join( STATION_FILE ), "{ not json" ).unwrap();

        let station = CatalogLoader::new( dir.path() )
            .with_probe( thirty_seconds )
            .load_station( &folder )
            .unwrap();
        assert_eq!( station.label(), "swing" );
        assert!( read_meta( &folder ).cache.is_some() );
    }


    #[test]
    fn test_station_without_audio_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join( "silent" );
        touch( &folder.join( "readme.txt" ) );

        let result = CatalogLoader::new( dir.path() ).with_probe( thirty_seconds ).load_station( &folder );
        assert!( matches!( result, Err( CatalogError::Station( StationError::Empty( _ ) ) ) ) );
    }


    #[test]
    fn test_missing_root() {
        let result = CatalogLoader::new( "/nonexistent/radio" ).scan();
        assert!( matches!( result, Err( CatalogError::NotFound( _ ) ) ) );
    }
}

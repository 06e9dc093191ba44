//! Command-line argument parsing for Dialsync.

use std::path::PathBuf;

use clap::Parser;


/// Dialsync - Main-board controller for the prop radio.
#[derive( Parser, Debug )]
#[command( name = "dialsync" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Config file. Created with defaults if it does not exist.
    #[arg( short, long )]
    pub config: Option<PathBuf>,

    /// Probe every track again instead of trusting station caches.
    #[arg( long )]
    pub rebuild_cache: bool,

    /// Accept controls from this terminal's keyboard.
    #[arg( short, long )]
    pub keyboard: bool,

    /// Log filter, e.g. `debug` or `dialsync_core=trace`. Overrides RUST_LOG.
    #[arg( long )]
    pub log_level: Option<String>,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from([ "dialsync", "--config", "/etc/radio.toml", "--rebuild-cache", "-k" ]);
        assert_eq!( args.config, Some( PathBuf::from( "/etc/radio.toml" ) ) );
        assert!( args.rebuild_cache );
        assert!( args.keyboard );
        assert_eq!( args.log_level, None );
    }
}

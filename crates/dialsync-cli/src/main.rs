//! Dialsync CLI - Main-board controller daemon

mod cli;
mod keyboard;

use std::rc::Rc;
use std::thread;
use std::time::{ Duration, Instant };

use anyhow::{ bail, Context, Result };
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Args;
use keyboard::Keyboard;

use dialsync_core::{
    CatalogLoader, Clock, JsonSettingsStore, LinkMonitor, Mixer, PowerState, Radio, RadioConfig,
    SerialTransport, SystemClock, TickOutcome, TuningEngine,
};


/// Installs the log subscriber. `--log-level` wins over RUST_LOG.
fn init_logging( level: Option<&str> ) {
    let filter = match level {
        Some( level ) => EnvFilter::new( level ),
        None => EnvFilter::try_from_default_env().unwrap_or_else( |_| EnvFilter::new( "info" ) ),
    };

    tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_writer( std::io::stderr )
        .init();
}


/// Builds the radio and runs it until it is told to stop.
///
/// @returns process exit code
fn run( args: &Args ) -> Result<i32> {
    let config_path = match &args.config {
        Some( path ) => path.clone(),
        None => RadioConfig::default_path().context( "No config directory on this system" )?,
    };
    let config = RadioConfig::load( &config_path )
        .with_context( || format!( "Loading {}", config_path.display() ) )?;

    let bands = CatalogLoader::new( &config.paths.stations_root )
        .force_rebuild( args.rebuild_cache )
        .scan()
        .with_context( || format!( "Scanning {}", config.paths.stations_root.display() ) )?;
    if bands.is_empty() {
        bail!( "No stations found under {}", config.paths.stations_root.display() );
    }

    let mixer = Mixer::open( config.sound_files() ).context( "Opening audio output" )?;

    let clock: Rc<dyn Clock> = Rc::new( SystemClock );
    let engine = TuningEngine::new( bands, mixer, clock.clone(), config.engine_config() );
    let transport = SerialTransport::open(
        config.link.device.clone(),
        config.link.max_line_len,
        config.reconnect_policy(),
    );
    let mut radio = Radio::new(
        engine,
        Box::new( transport ),
        Box::new( JsonSettingsStore::new( &config.paths.settings_file ) ),
        LinkMonitor::new( config.link_timing(), &config.link.peer_name ),
        clock,
        &config.link.local_name,
    );

    if args.keyboard {
        radio.add_input( Box::new( Keyboard::new().context( "Enabling keyboard input" )? ) );
    }

    let tick = config.tick_interval();
    let startup_timeout = Duration::from_secs( config.link.startup_timeout_secs );
    let mut startup_deadline = Some( Instant::now() + startup_timeout );
    tracing::info!( "Waiting up to {:?} for {}", startup_timeout, config.link.peer_name );

    let mut link_up = radio.is_link_up();
    let exit = loop {
        if let TickOutcome::Exit( kind ) = radio.tick() {
            break kind;
        }

        if radio.is_link_up() != link_up {
            link_up = !link_up;
            if link_up {
                tracing::info!( "Serial link to {} is up", config.link.peer_name );
            } else {
                tracing::warn!( "Serial link to {} is down", config.link.peer_name );
            }
        }

        if let Some( deadline ) = startup_deadline {
            if radio.state() != PowerState::WaitingForPeer {
                tracing::info!( "Radio is up" );
                startup_deadline = None;
            } else if Instant::now() >= deadline {
                radio.shutdown();
                bail!( "No heartbeat from {} within {:?}", config.link.peer_name, startup_timeout );
            }
        }

        thread::sleep( tick );
    };

    tracing::info!( "Exiting: {:?}", exit );
    radio.shutdown();
    Ok( exit.code() )
}


fn main() -> Result<()> {
    let args = Args::parse();
    init_logging( args.log_level.as_deref() );

    let code = run( &args )?;
    if code != 0 {
        std::process::exit( code );
    }
    Ok(())
}

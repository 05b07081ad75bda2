use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use favvocoaster::backends::dry_run::DryRunClient;
use favvocoaster::backends::{create_music_client, MusicServiceClient};
use favvocoaster::cli::Args;
use favvocoaster::config::{self, Config, ConfigError, ConfigSource, MusicService};
use favvocoaster::http_log::HTTP_LOG_TARGET;
use favvocoaster::rules::ScrapeRulesEngine;
use favvocoaster::shutdown::spawn_interrupt_listener;
use favvocoaster::status::render_status;
use favvocoaster::watcher::LikedSongsWatcher;
use log::{error, info, warn};

fn init_logging(debug: bool, http_log: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let mut clog = colog::default_builder();
    clog.filter(None, level);
    if http_log {
        clog.filter(Some(HTTP_LOG_TARGET), log::LevelFilter::Debug);
    }
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        error!("panic in thread '{}': {}", thread_name, panic_info);
    }));
}

fn run(args: Args, loaded: Result<(Config, ConfigSource), ConfigError>) -> Result<ExitCode> {
    let (mut config, source) = loaded.context("configuration error")?;
    source.log();
    args.apply_to(&mut config);

    info!("FavvoCoaster starting up...");
    info!("Using service: {}", config.service.as_str());

    let client = create_music_client(&config, args.http_log).map_err(|err| {
        if config.service == MusicService::Spotify {
            warn!(
                "Make sure your Spotify app is configured with the redirect URI {} and a token is available",
                config.spotify.redirect_uri
            );
        }
        anyhow::Error::new(err)
            .context(format!("failed to authenticate with {}", config.service.as_str()))
    })?;
    let user_id = client
        .user_id()
        .with_context(|| format!("failed to authenticate with {}", config.service.as_str()))?;
    info!("Authenticated as: {user_id}");

    if args.status {
        let playback = client.get_current_playback();
        print!(
            "{}",
            render_status(
                client.service_name(),
                &user_id,
                playback.as_ref(),
                &config.scraping
            )
        );
        return Ok(ExitCode::SUCCESS);
    }

    let rules_engine = ScrapeRulesEngine::new(&config.scraping);
    info!("Active rules: {:?}", rules_engine.list_rules());

    let client: Box<dyn MusicServiceClient> = if args.dry_run {
        info!("DRY RUN MODE - no changes will be made");
        Box::new(DryRunClient::new(client))
    } else {
        client
    };
    if args.no_cache {
        info!("Cache disabled by --no-cache flag");
    }

    let require_active_playback = config.scraping.require_active_playback;
    let mut watcher = LikedSongsWatcher::new(client, rules_engine, config.scraping);

    if let Err(err) = spawn_interrupt_listener(watcher.stop_handle()) {
        warn!("Could not install interrupt handler: {err}");
    }

    if args.once {
        if require_active_playback && !watcher.client().is_playing() {
            info!("No active playback, skipping poll");
            return Ok(ExitCode::SUCCESS);
        }
        info!("Running single check...");
        let queued = watcher.run_single_check()?;
        if queued.is_empty() {
            info!("No tracks queued");
        } else {
            info!("Queued {} track(s)", queued.len());
        }
    } else {
        watcher.start()?;
    }

    info!("Goodbye!");
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let loaded = config::load_config(args.config.as_deref());
    let debug = args.debug || loaded.as_ref().is_ok_and(|(config, _)| config.debug);
    init_logging(debug, args.http_log);

    match run(args, loaded) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

//! `anchorloc` – replay a recorded frame against the remote localizer.
//!
//! ```text
//! anchorloc server <capture.json> [--map <id>]... [--repeat <n>]
//! anchorloc geo    <capture.json> [--map <id>]... [--repeat <n>]
//! anchorloc config [init]
//! ```
//!
//! The capture sidecar (see [`capture_file`]) names the encoded image, the
//! camera calibration and device pose at capture time, and the maps placed
//! in the scene.  Each repetition feeds the frame to a [`Localizer`] and
//! prints the outcome; `localize_interval_ms` spaces the repetitions.
//! Ctrl-C stops after the attempt in flight.

mod args;
mod capture_file;
mod scene;

use std::sync::Arc;

use anchorloc_capture::{ReplayProvider, SharedProvider};
use anchorloc_runtime::{
    Backend, LocalizerConfig, Localizer, MapSpaceRegistry, RestLocalizer, config, init_tracing,
};
use anchorloc_types::{EventPayload, LocalizeOutcome, StatsSnapshot};
use colored::Colorize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;

use args::{Command, Flavor, LocalizeArgs};
use capture_file::{CaptureFile, CaptureFileError};

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Capture(#[from] CaptureFileError),
    #[error("capture holds no maps and none were given with --map")]
    NoMaps,
}

fn main() {
    // Tracing first: the OTLP exporter must exist before the runtime starts.
    let _guard = init_tracing("anchorloc");

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&argv) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            print_usage();
            std::process::exit(2);
        }
    };

    let cfg = load_config();

    match command {
        Command::Help => print_usage(),
        Command::ShowConfig => {
            println!(
                "  Config path: {}",
                config::config_path().display().to_string().bold()
            );
            println!("{cfg:#?}");
        }
        Command::InitConfig => match config::save(&cfg) {
            Ok(()) => println!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                config::config_path().display().to_string().bold()
            ),
            Err(e) => {
                eprintln!("{}: {e}", "Error saving config".red());
                std::process::exit(1);
            }
        },
        Command::Localize(args) => {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("{}: {e}", "failed to start runtime".red());
                    std::process::exit(1);
                }
            };

            let (stop_tx, stop_rx) = watch::channel(false);
            if let Err(e) = ctrlc::set_handler(move || {
                println!();
                println!("{}", "⚠  Ctrl-C received – stopping after the current attempt".yellow());
                let _ = stop_tx.send(true);
            }) {
                warn!(error = %e, "failed to install Ctrl-C handler");
            }

            match runtime.block_on(run_localize(args, cfg, stop_rx)) {
                Ok(stats) => {
                    println!(
                        "\n  {} attempts, {} successes",
                        stats.attempts.to_string().bold(),
                        stats.successes.to_string().bold()
                    );
                    if stats.successes == 0 {
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    eprintln!("{}: {e}", "error".red().bold());
                    std::process::exit(1);
                }
            }
        }
    }
}

fn load_config() -> LocalizerConfig {
    match config::load() {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            let mut cfg = LocalizerConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            eprintln!("{}: {e}", "Config error".red());
            eprintln!("  Using default configuration.");
            let mut cfg = LocalizerConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

async fn run_localize(
    args: LocalizeArgs,
    cfg: LocalizerConfig,
    mut stop: watch::Receiver<bool>,
) -> Result<StatsSnapshot, CliError> {
    let capture = CaptureFile::load(&args.capture)?;
    let image = capture.read_image(&args.capture)?;

    let registry = Arc::new(MapSpaceRegistry::new());
    let maps = scene::register_maps(&capture, &registry, cfg.filter)?;
    let map_ids = if args.maps.is_empty() {
        capture.map_ids()
    } else {
        args.maps.clone()
    };
    if map_ids.is_empty() {
        return Err(CliError::NoMaps);
    }

    let client = Arc::new(RestLocalizer::from_config(&cfg.server));
    let backend = match args.flavor {
        Flavor::Server => Backend::server(client),
        Flavor::Geo => Backend::geo(client),
    };
    let feeder = SharedProvider::new(ReplayProvider::new());
    let localizer = Localizer::builder(feeder.clone(), Arc::clone(&registry))
        .name(args.flavor.name())
        .backend(backend)
        .config(&cfg)
        .build();
    localizer.events().register(|event| {
        if let EventPayload::MapChanged(map_id) = &event.payload {
            println!("  {} now localized against map {}", "→".cyan(), map_id.to_string().bold());
        }
    });

    println!(
        "  Localizing {} against {} map(s) via {} …",
        args.capture.display().to_string().bold(),
        map_ids.len(),
        cfg.server.base_url.dimmed()
    );

    for round in 1..=args.repeat {
        if *stop.borrow() {
            break;
        }
        feeder.lock().submit_encoded(capture.info, image.clone());
        let result = match args.flavor {
            Flavor::Server => localizer.localize_server(&map_ids).await,
            Flavor::Geo => localizer.localize_geo_pose(&map_ids).await,
        };
        print_outcome(round, &result);

        if round < args.repeat {
            tokio::select! {
                _ = tokio::time::sleep(cfg.localize_interval()) => {}
                _ = stop.changed() => {}
            }
        }
    }

    for map in &maps {
        if map.localized() > 0 {
            println!("  map {}: localized {} time(s)", map.id(), map.localized());
        }
    }
    Ok(localizer.stats())
}

fn print_outcome(
    round: u32,
    result: &Result<LocalizeOutcome, anchorloc_types::LocalizeError>,
) {
    match result {
        Ok(LocalizeOutcome::Localized(pose)) => {
            let t = pose.pose.translation;
            println!(
                "  [{round}] {} map {} in {:.3}s  position ({:.3}, {:.3}, {:.3})",
                "✓".green().bold(),
                pose.map_id.to_string().bold(),
                pose.elapsed.as_secs_f64(),
                t.x,
                t.y,
                t.z
            );
        }
        Ok(LocalizeOutcome::Failed(reason)) => {
            println!("  [{round}] {} {reason}", "✗".yellow().bold());
        }
        Err(e) => {
            println!("  [{round}] {} {e}", "✗".red().bold());
        }
    }
}

fn print_usage() {
    println!();
    println!("{}", "  anchorloc – visual relocalization".bold().cyan());
    println!();
    println!("  {}", "USAGE".bold());
    println!("    anchorloc server <capture.json> [--map <id>]... [--repeat <n>]");
    println!("    anchorloc geo    <capture.json> [--map <id>]... [--repeat <n>]");
    println!("    anchorloc config [init]");
    println!();
    println!("  {}", "ENVIRONMENT".bold());
    println!("    ANCHORLOC_SERVER_URL, ANCHORLOC_TOKEN, ANCHORLOC_INTERVAL_MS,");
    println!("    ANCHORLOC_USE_FILTERING, ANCHORLOC_LOG_FORMAT=json, RUST_LOG");
    println!();
}

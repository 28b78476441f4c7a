use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use heraldd::center;
use heraldd::config::Config;
use tracing::{error, info};

/// An authoritative DNS name server.
#[derive(Debug, Parser)]
#[command(version = env!("HERALD_BUILD_VERSION"), about)]
struct Args {
    /// The configuration file to run from.
    #[arg(short, long, default_value = "herald.toml")]
    config: Utf8PathBuf,

    /// Check the configuration and exit.
    #[arg(long)]
    check_config: bool,
}

/// How long executors get to finish in-flight work on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    let args = Args::parse();

    // Construct the configuration.
    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Herald couldn't be configured: {error}");
            return ExitCode::FAILURE;
        }
    };
    if args.check_config {
        return ExitCode::SUCCESS;
    }

    // Activate the configured logging setup.
    let logger = match heraldd::log::Logger::launch(&config.logging) {
        Ok(logger) => logger,
        Err(error) => {
            eprintln!("Herald couldn't set up logging: {error}");
            return ExitCode::FAILURE;
        }
    };

    // Prepare the center.
    let center = match center::Center::new(config) {
        Ok(center) => center,
        Err(error) => {
            eprintln!("Herald couldn't start: {error}");
            return ExitCode::FAILURE;
        }
    };
    *center
        .config_path
        .lock()
        .expect("config path lock is never poisoned") = Some(args.config.clone());

    // Set up an async runtime.
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("Couldn't start Tokio: {error}");
            return ExitCode::FAILURE;
        }
    };

    // Enter the runtime.
    runtime.block_on(async {
        // Create the configured zones; each spawns its own executor.
        for zone_config in center.config().zones.clone() {
            if let Err(err) = center::add_zone(&center, zone_config.clone()) {
                error!("could not add zone '{}': {err}", zone_config.name);
                return ExitCode::FAILURE;
            }
        }

        // Spawn the DNS front-end and the control channel.
        let dns = tokio::spawn(heraldd::server::serve(center.clone()));
        let ctl = tokio::spawn(heraldd::control::serve(center.clone(), Some(logger)));

        let mut shutdown = center.shutdown.subscribe();
        let result = tokio::select! {
            // Watch for CTRL-C (SIGINT) and SIGTERM.
            res = tokio::signal::ctrl_c() => {
                match res {
                    Ok(()) => ExitCode::SUCCESS,
                    Err(error) => {
                        error!("listening for CTRL-C (SIGINT) failed: {error}");
                        ExitCode::FAILURE
                    }
                }
            }
            _ = sigterm() => ExitCode::SUCCESS,

            // The control channel's 'stop' command.
            _ = shutdown.changed() => ExitCode::SUCCESS,

            // The listeners failing outright is fatal.
            res = dns => {
                match res {
                    Ok(Ok(())) => ExitCode::SUCCESS,
                    Ok(Err(err)) => {
                        error!("the DNS front-end failed: {err}");
                        ExitCode::FAILURE
                    }
                    Err(_) => ExitCode::FAILURE,
                }
            }
            res = ctl => {
                match res {
                    Ok(Ok(())) => ExitCode::SUCCESS,
                    Ok(Err(err)) => {
                        error!("the control channel failed: {err}");
                        ExitCode::FAILURE
                    }
                    Err(_) => ExitCode::FAILURE,
                }
            }
        };

        // Drain: executors get a grace period for in-flight events, then
        // the process goes down regardless.
        info!("shutting down");
        center.initiate_shutdown();
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        result
    })
}

async fn sigterm() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut signal) => {
            signal.recv().await;
        }
        Err(_) => std::future::pending().await,
    }
}

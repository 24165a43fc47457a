mod gpx_replay;

use std::{fs::OpenOptions, path::{Path, PathBuf}, sync::Arc};

use activity_tracker_lib::session::ExerciseMode;
use activity_tracker_session::{
    clock::format_elapsed,
    config::TrackerConfig,
    location::ChannelLocationSource,
    store::{HttpSessionStore, SessionStore, StaticTokenProvider},
    RestorationOutcome, RestorationService, RestorationSnapshot, SessionController, StartRequest, StopOutcome,
    TrackerStatus,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use gpx_replay::GpxReplay;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

const TOKEN_ENV: &str = "ACTIVITY_TRACKER_TOKEN";

#[derive(Parser)]
#[command(name = "tracker")]
#[command(about = "Drive activity sessions against a tracker backend", long_about = None)]
struct Cli {
    /// TOML config file. Defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the in-progress activity, if any
    Status,
    /// List all activities
    History,
    /// List gym locations
    Gyms,
    /// Run a GPX track as a live running session.
    /// Resumes the in-progress running activity if there is one
    Replay {
        gpx_file: PathBuf,
        /// Playback speed multiplier
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },
    /// Check in to a gym at the position of the first point of a GPX file
    Checkin { gym_location_id: String, gpx_file: PathBuf },
    /// Finish the in-progress activity. Needs a position, taken from the first point of a GPX file
    Finish { gpx_file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let config = TrackerConfig::load(cli.config.as_deref())?;
    let token = std::env::var(TOKEN_ENV).with_context(|| format!("{TOKEN_ENV} is not set"))?;
    let store: Arc<dyn SessionStore> = Arc::new(HttpSessionStore::new(
        &config.api_base_url,
        Arc::new(StaticTokenProvider::new(token)),
        config.request_timeout(),
    )?);

    tracing::info!(api = %config.api_base_url, "tracker starting");

    match cli.command {
        Commands::Status => {
            match RestorationService::new(store.clone()).find_in_progress().await? {
                Some(snapshot) => println!(
                    "{}\t{}\tstarted {}\t{:.2} km",
                    snapshot.activity_id, snapshot.mode, snapshot.started_at, snapshot.distance_km
                ),
                None => println!("No activity in progress"),
            }
        }
        Commands::History => {
            for activity in store.my_activities().await? {
                let status = activity.status.map(String::from).unwrap_or_else(|| "-".into());
                let kind = activity.exercise_type.unwrap_or_else(|| "-".into());
                let distance = activity.distance_km.map(|km| format!("{km:.2} km")).unwrap_or_default();
                println!("{}\t{}\t{}\t{}", activity.id, kind, status, distance);
            }
        }
        Commands::Gyms => {
            for gym in store.gym_locations().await? {
                println!("{}\t{}", gym.id, gym.name);
            }
        }
        Commands::Replay { gpx_file, speed } => {
            let replay = GpxReplay::open(&gpx_file)?;
            let location = ChannelLocationSource::new();
            location.set_position(replay.first_sample());

            let mut controller = SessionController::new(store.clone(), Arc::new(location.clone()), &config);
            let status_printer = tokio::spawn(print_status(controller.subscribe()));

            let in_progress = RestorationService::new(store.clone()).find_in_progress().await?;
            match replay_plan(in_progress)? {
                ReplayPlan::Resume(snapshot) => {
                    tracing::info!(activity_id = %snapshot.activity_id, "resuming");
                    controller.restore(snapshot)?;
                }
                ReplayPlan::StartNew => {
                    controller.start(StartRequest::Running).await?;
                }
            }

            let (done_tx, done_rx) = watch::channel(false);
            let feeder = tokio::spawn(replay.feed(location, speed));
            tokio::spawn(async move {
                tokio::select! {
                    _ = feeder => {},
                    _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
                }
                let _ = done_tx.send(true);
            });

            // run_once is never cancelled mid-flush; the flag is checked between wakeups.
            while !*done_rx.borrow() {
                controller.run_once().await;
            }

            report_stop(controller.stop().await?);
            drop(controller);
            let _ = status_printer.await;
        }
        Commands::Checkin { gym_location_id, gpx_file } => {
            let location = position_from(&gpx_file)?;
            let mut controller = SessionController::new(store.clone(), Arc::new(location), &config);
            let status = controller.start(StartRequest::Gym { gym_location_id }).await?;
            print_line(&status);
        }
        Commands::Finish { gpx_file } => {
            let location = position_from(&gpx_file)?;
            let mut controller = SessionController::new(store.clone(), Arc::new(location), &config);
            match RestorationService::new(store.clone()).run(&mut controller).await? {
                RestorationOutcome::Restored(_) => report_stop(controller.stop().await?),
                RestorationOutcome::NothingToRestore => println!("No activity in progress"),
            }
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq)]
enum ReplayPlan {
    Resume(RestorationSnapshot),
    StartNew,
}

/// A replay only makes sense for a running session. An in-progress gym
/// visit is left alone rather than fed GPS and checked out at the end.
fn replay_plan(in_progress: Option<RestorationSnapshot>) -> anyhow::Result<ReplayPlan> {
    match in_progress {
        Some(snapshot) if snapshot.mode == ExerciseMode::Gym => anyhow::bail!(
            "gym activity {} is in progress, finish it before replaying a track",
            snapshot.activity_id
        ),
        Some(snapshot) => Ok(ReplayPlan::Resume(snapshot)),
        None => Ok(ReplayPlan::StartNew),
    }
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file).boxed())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{}=debug,activity_tracker_session=debug", env!("CARGO_CRATE_NAME")).into())
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

fn position_from(gpx_file: &Path) -> anyhow::Result<ChannelLocationSource> {
    let replay = GpxReplay::open(gpx_file)?;
    let location = ChannelLocationSource::new();
    location.set_position(replay.first_sample());
    Ok(location)
}

async fn print_status(mut status: watch::Receiver<TrackerStatus>) {
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        print_line(&current);
    }
}

fn print_line(status: &TrackerStatus) {
    let id = status.activity_id.as_ref().map(|id| id.to_string()).unwrap_or_else(|| "-".into());
    let pace = status
        .pace_min_per_km()
        .map(|pace| format!("{pace:.1} min/km"))
        .unwrap_or_else(|| "-".into());
    let error = status.last_error.as_ref().map(|err| format!("\t! {err}")).unwrap_or_default();
    println!(
        "{:?}\t{}\t{}\t{:.2} km\t{}\t{} buffered{}",
        status.phase,
        id,
        format_elapsed(status.elapsed),
        status.distance_km,
        pace,
        status.buffered,
        error
    );
}

fn report_stop(outcome: StopOutcome) {
    match outcome {
        StopOutcome::Finished(record) => println!(
            "Finished {}: {:.2} km, {:.1} min",
            record.id,
            record.distance_km.unwrap_or(0.0),
            record.duration_min.unwrap_or(0.0)
        ),
        StopOutcome::AlreadyIdle => println!("Nothing to finish"),
    }
}

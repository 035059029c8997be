use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use canonical_error::{CanonicalError, internal_error, invalid_argument_error,
                      not_found_error};
use chrono::{DateTime, Local, Utc};
use clap::Parser;
use log::{error, info, warn};
use tracing_appender::non_blocking::NonBlockingBuilder;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry, EnvFilter};

use skyobs::catalog::{ColumnMapping, import_rdb};
use skyobs::clouds::{CloudSource, MaskFileCloudSource};
use skyobs::config::ObservatoryConfig;
use skyobs::environment::{Environment, RefreshStatus};
use skyobs::night::{Twilight, night_date, night_hours};
use skyobs::observability::{ObservabilityPolicy, ObservabilityVerdict, WindSafety,
                            evaluate};
use skyobs::site::SiteModel;
use skyobs::sky_grid::{GridSpec, VisibilityGrid, sweep_visibility_grid};
use skyobs::target::Target;
use skyobs::weather::{ReportFileWeatherSource, WeatherSource};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Observatory configuration file.
    #[arg(long, default_value = "observatory.toml")]
    config: PathBuf,

    /// Site to evaluate, as named in the configuration file.
    #[arg(long)]
    site: String,

    /// Target catalogue in tab-separated rdb format.
    #[arg(long)]
    catalog: PathBuf,

    /// Observing program tag attached to the imported targets.
    #[arg(long)]
    program: Option<String>,

    #[arg(long, default_value = "code")]
    name_column: String,

    #[arg(long, default_value = "alphacat")]
    ra_column: String,

    #[arg(long, default_value = "deltacat")]
    dec_column: String,

    /// Catalogue column with per-target maximum airmass, if any.
    #[arg(long)]
    airmass_column: Option<String>,

    /// Catalogue column with per-target minimum Moon angle, if any.
    #[arg(long)]
    moon_column: Option<String>,

    /// Evaluation time, RFC 3339. Defaults to now. Ignored with --watch.
    #[arg(long, value_parser = parse_time)]
    time: Option<SystemTime>,

    /// Read the canned weather report instead of the live one.
    #[arg(long, default_value_t = false)]
    debug_weather: bool,

    /// Also print a map of the visibility grid.
    #[arg(long, default_value_t = false)]
    grid: bool,

    /// Also report, per target, when during the night it is above the
    /// airmass and Moon limits.
    #[arg(long, default_value_t = false)]
    night: bool,

    /// Number of evenly spaced times at which --night evaluates.
    #[arg(long, default_value = "9")]
    night_samples: usize,

    /// Refresh and re-evaluate every so many seconds until control-c.
    #[arg(long, value_parser = parse_duration)]
    watch: Option<Duration>,

    /// Directory for a daily rolling log file. Logs go to stderr only if
    /// absent.
    #[arg(long)]
    log_dir: Option<String>,

    #[arg(long, default_value = "observability_status.log")]
    log_file: String,
}

fn parse_duration(arg: &str)
                  -> Result<std::time::Duration, std::num::ParseFloatError> {
    let seconds = arg.parse()?;
    Ok(std::time::Duration::from_secs_f64(seconds))
}

fn parse_time(arg: &str) -> Result<SystemTime, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(arg)?.with_timezone(&Utc).into())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Set up logging.
    let (file_layer, file_guard) = match &args.log_dir {
        Some(log_dir) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, &args.log_file);
            let (non_blocking_file, guard) = NonBlockingBuilder::default()
                .lossy(false)
                .finish(file_appender);
            (Some(fmt::layer().with_ansi(false).with_writer(non_blocking_file)),
             Some(guard))
        },
        None => (None, None),
    };
    // The status table goes to stdout, so logs go to stderr.
    let (non_blocking_stderr, stderr_guard) = NonBlockingBuilder::default()
        .lossy(false)
        .finish(std::io::stderr());
    registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking_stderr))
        .with(file_layer)
        .init();

    if let Err(e) = run(args).await {
        error!("{:?}", e);
        // Flush the log writers; exit() skips destructors.
        drop(file_guard);
        drop(stderr_guard);
        std::process::exit(1);
    }
}

// Everything one refresh-and-evaluate cycle needs, shareable with the
// blocking refresh task.
struct Station {
    site_model: SiteModel,
    environment: Environment,
    weather_source: Option<ReportFileWeatherSource>,
    cloud_source: Option<MaskFileCloudSource>,
    targets: Vec<Target>,
    policy: ObservabilityPolicy,
}

async fn run(args: Args) -> Result<(), CanonicalError> {
    let config = ObservatoryConfig::load(&args.config)?;
    let settings = config.site(&args.site)?;
    info!("Site {}: lat {:.4} lon {:.4} elevation {}m, limits {:?}",
          settings.site.name, settings.site.latitude, settings.site.longitude,
          settings.site.elevation, settings.limits);

    let catalog_file = File::open(&args.catalog).map_err(|e| not_found_error(
        format!("Cannot open catalogue {:?}: {:?}", args.catalog, e).as_str()))?;
    let columns = ColumnMapping{name: args.name_column.clone(),
                                ra: args.ra_column.clone(),
                                dec: args.dec_column.clone(),
                                max_airmass: args.airmass_column.clone(),
                                min_moon_angle: args.moon_column.clone()};
    let import = import_rdb(BufReader::new(catalog_file), args.program.as_deref(),
                            &columns)?;
    for (line, e) in &import.rejected {
        warn!("Skipped {:?} line {}: {}", args.catalog, line, e.message);
    }

    let time = args.time.unwrap_or_else(SystemTime::now);
    let mut environment = Environment::new(settings.site.clone(), time);
    environment.set_preferred_speed_station(
        settings.weather.as_ref().and_then(|w| w.preferred_speed_station));
    let station = Arc::new(Station{
        site_model: SiteModel::new(settings.site.clone(), settings.limits.clone())?,
        environment,
        weather_source: settings.weather_source(args.debug_weather),
        cloud_source: settings.cloud_source(),
        targets: import.targets,
        policy: config.policy(),
    });

    let Some(period) = args.watch else {
        refresh(&station, time);
        report(&station, &time, &args)?;
        return Ok(());
    };

    if period.is_zero() {
        return Err(invalid_argument_error("--watch period must be positive"));
    }
    if args.time.is_some() {
        warn!("--time is ignored with --watch");
    }
    let got_signal = Arc::new(AtomicBool::new(false));
    let got_signal2 = got_signal.clone();
    ctrlc::set_handler(move || {
        info!("Got control-c");
        got_signal2.store(true, AtomicOrdering::Relaxed);
    }).map_err(|e| internal_error(
        format!("Cannot install control-c handler: {:?}", e).as_str()))?;

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    while !got_signal.load(AtomicOrdering::Relaxed) {
        interval.tick().await;
        let now = SystemTime::now();
        let station2 = station.clone();
        let span = tracing::info_span!("refresh", site = %station.site_model.site().name);
        // Weather and cloud reads can block for a network round trip.
        tokio::task::spawn_blocking(move || span.in_scope(|| refresh(&station2, now))).await
            .map_err(|e| internal_error(format!("Refresh task failed: {:?}", e).as_str()))?;
        report(&station, &now, &args)?;
    }
    info!("Exiting");
    Ok(())
}

fn refresh(station: &Station, time: SystemTime) {
    let env = &station.environment;
    env.refresh_positions(time);
    let weather_status = match &station.weather_source {
        Some(source) => env.refresh_weather(source as &dyn WeatherSource),
        None => RefreshStatus::Disabled,
    };
    let cloud_status = env.refresh_clouds(
        station.cloud_source.as_ref().map(|c| c as &dyn CloudSource));
    info!("Weather refresh: {:?}; clouds refresh: {:?}", weather_status, cloud_status);
}

fn report(station: &Station, time: &SystemTime, args: &Args) -> Result<(), CanonicalError> {
    let snapshot = station.environment.snapshot();
    let local_time: DateTime<Local> = (*time).into();
    println!("{} at {}", station.site_model.site().name, local_time.format("%Y-%m-%d %H:%M:%S %Z"));
    println!("Sun alt {:.1}  Moon alt {:.1} az {:.1}  Weather {:?}",
             snapshot.sun.horizon.altitude, snapshot.moon.horizon.altitude,
             snapshot.moon.horizon.azimuth, snapshot.weather.wind);
    println!("{:<20} {:>6} {:>6} {:>7} {:>6} {:>8}  status",
             "target", "alt", "az", "airmass", "moon", "wind");
    for target in &station.targets {
        let verdict = evaluate(target, &snapshot, &station.site_model, time,
                               &station.policy);
        println!("{:<20} {:>6.1} {:>6.1} {:>7} {:>6.1} {:>8}  {}",
                 target.name, verdict.horizon.altitude, verdict.horizon.azimuth,
                 verdict.airmass.map_or("-".to_string(), |a| format!("{:.2}", a)),
                 verdict.moon_separation, format!("{:?}", verdict.wind_safety),
                 status(&verdict));
    }

    if args.grid {
        let limits = station.site_model.limits();
        let grid = sweep_visibility_grid(&snapshot, &station.site_model, time,
                                         limits.max_airmass, limits.min_moon_angle,
                                         &GridSpec::default(), &station.policy)?;
        print_grid(&grid);
    }
    if args.night {
        print_night(station, time, args.night_samples)?;
    }
    Ok(())
}

fn status(verdict: &ObservabilityVerdict) -> String {
    if verdict.observable {
        return "observable".to_string();
    }
    let mut reasons = Vec::new();
    if verdict.horizon.altitude <= 0.0 {
        reasons.push("below horizon");
    } else if !verdict.within_airmass {
        reasons.push("airmass");
    }
    if !verdict.within_moon_separation {
        reasons.push("moon");
    }
    match verdict.wind_safety {
        WindSafety::Unsafe => reasons.push("wind"),
        WindSafety::Unknown => reasons.push("wind unknown"),
        WindSafety::Safe => (),
    }
    if verdict.cloud_free == Some(false) {
        reasons.push("clouds");
    }
    reasons.join(", ")
}

// One character per cell, north declinations on top:
// '.' not visible, 'm' too close to the Moon, 'w' wind, 'c' cloud,
// 'o' observable, '?' visible but wind unknown.
fn print_grid(grid: &VisibilityGrid) {
    let (rows, cols) = grid.dimensions();
    println!("Visibility grid {}x{}: {} cells visible, {} observable, wind {}",
             rows, cols, grid.visible_count(), grid.observable_count(),
             match grid.wind_severity {
                 Some(severity) => format!("{:?}", severity),
                 None => "unknown".to_string(),
             });
    for row in (0..rows).rev() {
        let mut line = String::with_capacity(cols);
        let mut dec = 0.0;
        for col in 0..cols {
            let Some(cell) = grid.cell(row, col) else { continue };
            dec = cell.coord.dec;
            line.push(if !cell.visible {
                '.'
            } else if cell.moon_separation.is_none() {
                'm'
            } else if cell.wind_unsafe {
                'w'
            } else if cell.cloud_free == Some(false) {
                'c'
            } else if !grid.wind_checked {
                '?'
            } else {
                'o'
            });
        }
        println!("{:>+6.1} {}", dec, line);
    }
}

fn print_night(station: &Station, time: &SystemTime, samples: usize)
               -> Result<(), CanonicalError> {
    let site = station.site_model.site();
    let date = night_date(site, time);
    let hours = night_hours(site, date, Twilight::Astronomical, samples)?;
    // Sun and Moon at each sample time.
    let snapshots: Vec<_> = hours.iter()
        .map(|t| station.environment.snapshot_at(*t)).collect();

    let header: Vec<String> = hours.iter().map(|t| {
        let local: DateTime<Local> = (*t).into();
        local.format("%H:%M").to_string()
    }).collect();
    println!("Night of {} (astronomical): {}", date, header.join(" "));
    // Geometry only; the current weather says nothing about later hours.
    let unlimited = ObservabilityPolicy{weather_staleness: Duration::MAX};
    for target in &station.targets {
        let marks: Vec<&str> = hours.iter().zip(&snapshots).map(|(t, snapshot)| {
            let verdict = evaluate(target, snapshot, &station.site_model, t, &unlimited);
            if verdict.within_airmass && verdict.within_moon_separation {
                "  +  "
            } else {
                "  -  "
            }
        }).collect();
        println!("{:<20} {}", target.name, marks.join(" "));
    }
    Ok(())
}

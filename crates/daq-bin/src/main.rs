//! CLI entry point for the swept test system.
//!
//! Runs wavelength sweeps on a Santec TSL laser while a Red Pitaya records
//! the detector signal, and writes each mapped spectrum to CSV.
//!
//! # Usage
//!
//! Single sweep:
//! ```bash
//! sts sweep --start 1520 --stop 1570 --speed 50
//! ```
//!
//! Repeat until Ctrl-C, five seconds apart:
//! ```bash
//! sts loop --pause-ms 5000
//! ```
//!
//! Without hardware:
//! ```bash
//! sts --mock sweep
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod config;
mod export;
mod instruments;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Settings;
use daq_driver_santec::SweepParameters;
use daq_sweep::{CancelHandle, LoopOptions, RunnerStatus, SweepOutcome, SweepRunner};
use instruments::Instruments;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sts")]
#[command(about = "Swept test system: TSL wavelength sweeps recorded with a Red Pitaya", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults to config/sts.toml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use simulated instruments regardless of the configuration
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the configured sweep parameters.
#[derive(Args, Debug, Clone, Default)]
struct SweepArgs {
    /// Start wavelength (nm)
    #[arg(long)]
    start: Option<f64>,

    /// Stop wavelength (nm)
    #[arg(long)]
    stop: Option<f64>,

    /// Sweep speed (nm/s)
    #[arg(long)]
    speed: Option<f64>,

    /// Output power (mW)
    #[arg(long)]
    power: Option<f64>,

    /// Put both instruments in their known sweep defaults first
    #[arg(long)]
    init: bool,
}

impl SweepArgs {
    fn apply(&self, base: SweepParameters) -> SweepParameters {
        SweepParameters {
            start_wavelength: self.start.unwrap_or(base.start_wavelength),
            stop_wavelength: self.stop.unwrap_or(base.stop_wavelength),
            speed: self.speed.unwrap_or(base.speed),
            power: self.power.unwrap_or(base.power),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sweep and write the spectrum to CSV
    Sweep {
        #[command(flatten)]
        sweep: SweepArgs,

        /// Output file (default: timestamped file in the output directory)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Repeat sweeps until Ctrl-C or until --count sweeps have run
    Loop {
        #[command(flatten)]
        sweep: SweepArgs,

        /// Number of sweeps (default: unlimited)
        #[arg(long)]
        count: Option<u32>,

        /// Pause before each sweep (ms)
        #[arg(long, default_value_t = 1000)]
        pause_ms: u64,
    },

    /// Tune the laser to a fixed wavelength
    SetWavelength {
        /// Wavelength (nm)
        wavelength: f64,
    },

    /// Query and print instrument state
    Status,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .init();

    if let Commands::Config = cli.command {
        print!("{}", toml::to_string_pretty(&settings)?);
        return Ok(());
    }

    let instruments = Instruments::connect(&settings, cli.mock).await?;

    match cli.command {
        Commands::Sweep { sweep, output } => {
            prepare(&instruments, &sweep).await?;
            run_single(&instruments, &settings, sweep.apply(settings.sweep), output).await?;
        }
        Commands::Loop {
            sweep,
            count,
            pause_ms,
        } => {
            prepare(&instruments, &sweep).await?;
            let options = LoopOptions {
                pause: Duration::from_millis(pause_ms),
                count,
            };
            run_loop(&instruments, &settings, sweep.apply(settings.sweep), options).await?;
        }
        Commands::SetWavelength { wavelength } => {
            instruments.laser.set_wavelength(wavelength).await?;
            info!("Laser tuned to {} nm", wavelength);
        }
        Commands::Status => print_status(&instruments).await?,
        Commands::Config => {}
    }

    Ok(())
}

async fn prepare(instruments: &Instruments, args: &SweepArgs) -> Result<()> {
    if args.init {
        instruments
            .acquisition
            .initialize()
            .await
            .context("Failed to initialize Red Pitaya")?;
        instruments
            .laser
            .initialize()
            .await
            .context("Failed to initialize laser")?;
    }
    Ok(())
}

/// Cancel `cancel` when Ctrl-C arrives.
fn cancel_on_ctrl_c(cancel: CancelHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping sweep");
            cancel.cancel();
        }
    })
}

async fn run_single(
    instruments: &Instruments,
    settings: &Settings,
    params: SweepParameters,
    output: Option<PathBuf>,
) -> Result<()> {
    let engine = instruments.engine(settings);
    let cancel = CancelHandle::new();
    let watcher = cancel_on_ctrl_c(cancel.clone());

    let result = engine.sweep(&params, &settings.acquisition, &cancel).await;
    watcher.abort();

    let outcome = result.context("Sweep failed")?;
    save_outcome(&outcome, settings, output.as_deref())
}

async fn run_loop(
    instruments: &Instruments,
    settings: &Settings,
    params: SweepParameters,
    options: LoopOptions,
) -> Result<()> {
    let runner = SweepRunner::new(instruments.engine(settings));
    let mut status = runner.subscribe();
    let mut outcomes = runner.outcomes();
    runner.start_loop(params, settings.acquisition.clone(), options)?;

    let done = runner.wait();
    tokio::pin!(done);

    let mut saved = 0;
    let mut interrupted = false;

    let final_status = loop {
        tokio::select! {
            final_status = &mut done => break final_status,
            Some(outcome) = outcomes.recv() => {
                saved += 1;
                save_numbered(&outcome, settings, saved)?;
            }
            Ok(()) = status.changed() => {
                if let RunnerStatus::Running(n) = *status.borrow_and_update() {
                    info!("Sweep {} started", n);
                }
            }
            Ok(()) = signal::ctrl_c(), if !interrupted => {
                warn!("Interrupted, stopping sweep loop");
                interrupted = true;
                runner.cancel();
            }
        }
    };

    // Outcomes queued while the task was finishing
    while let Ok(outcome) = outcomes.try_recv() {
        saved += 1;
        save_numbered(&outcome, settings, saved)?;
    }
    info!("Saved {} spectra", saved);

    match final_status {
        RunnerStatus::Failed(message) if !interrupted => {
            anyhow::bail!("Sweep loop failed: {}", message)
        }
        _ => Ok(()),
    }
}

/// Save a looped sweep under a sequence-numbered timestamped name.
fn save_numbered(outcome: &SweepOutcome, settings: &Settings, sequence: u32) -> Result<()> {
    let path = export::timestamped_path(
        &settings.output.directory,
        chrono::Local::now(),
        Some(sequence),
    );
    save_outcome(outcome, settings, Some(&path))
}

fn save_outcome(outcome: &SweepOutcome, settings: &Settings, output: Option<&Path>) -> Result<()> {
    info!(
        samples = outcome.sample_count,
        points = outcome.spectrum.len(),
        acquisition_time = outcome.acquisition_time,
        "Sweep {:.3}-{:.3} nm complete",
        outcome.params.start_wavelength,
        outcome.params.stop_wavelength
    );
    if outcome.spectrum.is_empty() {
        warn!("No samples fell inside the sweep window");
    }

    let path = output.map(Path::to_path_buf).unwrap_or_else(|| {
        export::timestamped_path(&settings.output.directory, chrono::Local::now(), None)
    });
    export::write_spectrum(&path, &outcome.spectrum, settings.acquisition.units)
}

async fn print_status(instruments: &Instruments) -> Result<()> {
    let laser = &instruments.laser;
    println!("Laser:         {}", laser.identify().await?);
    println!("  sweep:       {}", laser.sweep_status().await?);
    println!("  wavelength:  {:.4} nm", laser.wavelength().await?);
    println!(
        "  range:       {:.4} - {:.4} nm at {} nm/s",
        laser.start_wavelength().await?,
        laser.stop_wavelength().await?,
        laser.sweep_speed().await?
    );

    let acquisition = &instruments.acquisition;
    println!(
        "Red Pitaya:    write pointer {} of {}",
        acquisition.write_pointer().await?,
        acquisition.buffer_size()
    );
    println!("  trigger:     {:?}", acquisition.trigger_status().await?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sweep_args_override_only_given_fields() {
        let cli = Cli::parse_from(["sts", "--mock", "sweep", "--speed", "50", "-o", "out.csv"]);
        assert!(cli.mock);
        match cli.command {
            Commands::Sweep { sweep, output } => {
                let params = sweep.apply(SweepParameters::default());
                assert_eq!(params.speed, 50.0);
                assert_eq!(params.start_wavelength, 1500.0);
                assert_eq!(params.stop_wavelength, 1600.0);
                assert_eq!(output, Some(PathBuf::from("out.csv")));
            }
            _ => panic!("expected sweep subcommand"),
        }
    }

    #[test]
    fn test_loop_defaults() {
        let cli = Cli::parse_from(["sts", "loop"]);
        match cli.command {
            Commands::Loop {
                count, pause_ms, ..
            } => {
                assert_eq!(count, None);
                assert_eq!(pause_ms, 1000);
            }
            _ => panic!("expected loop subcommand"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_sweep_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.engine.poll_interval_ms = 10;
        settings.output.directory = dir.path().to_path_buf();

        let instruments = Instruments::connect(&settings, true).await.unwrap();
        let params = SweepParameters {
            speed: 200.0,
            ..Default::default()
        };
        let output = dir.path().join("single.csv");
        run_single(&instruments, &settings, params, Some(output.clone()))
            .await
            .unwrap();

        let mut reader = csv::Reader::from_path(&output).unwrap();
        assert!(reader.records().count() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_loop_without_pause_saves_every_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.engine.poll_interval_ms = 10;
        settings.output.directory = dir.path().to_path_buf();

        let instruments = Instruments::connect(&settings, true).await.unwrap();
        let params = SweepParameters {
            speed: 200.0,
            ..Default::default()
        };
        run_loop(
            &instruments,
            &settings,
            params,
            LoopOptions {
                pause: Duration::ZERO,
                count: Some(3),
            },
        )
        .await
        .unwrap();

        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_loop_saves_each_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.engine.poll_interval_ms = 10;
        settings.output.directory = dir.path().to_path_buf();

        let instruments = Instruments::connect(&settings, true).await.unwrap();
        let params = SweepParameters {
            speed: 200.0,
            ..Default::default()
        };
        run_loop(
            &instruments,
            &settings,
            params,
            LoopOptions {
                pause: Duration::from_secs(2),
                count: Some(2),
            },
        )
        .await
        .unwrap();

        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 2);
    }
}

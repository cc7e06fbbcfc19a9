use anyhow::Result;
use clap::{CommandFactory, Parser};
use framepace::app::{RelayReport, SimulationReport, Stall, run_relay, simulate};
use framepace::cli::{Cli, Commands, ConfigAction, Overrides};
use framepace::config::Config;
use framepace::tools::producer::{BurstGenerator, BurstProfile, SampleSource, run_producer};
use framepace::tools::receiver::run_receiver;
use owo_colors::OwoColorize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);
    tracing::debug!(version = %framepace::version_string(), "framepace starting");

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref(), &Overrides::default())?;
            handle_run(config).await?;
        }
        Some(Commands::Run { overrides }) => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            handle_run(config).await?;
        }
        Some(Commands::Produce {
            listen,
            wav,
            seed,
            burst_min,
            burst_max,
            overrides,
        }) => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            let format = config.frame_format()?;
            let source = match wav {
                Some(path) => SampleSource::wav(&path)?,
                None => SampleSource::tone(format.sample_rate),
            };
            let profile = BurstProfile {
                min_frames: burst_min,
                max_frames: burst_max,
                ..BurstProfile::default()
            };
            run_producer(
                &listen,
                format.frame_size(),
                profile,
                source,
                seed,
                shutdown_on_ctrl_c(),
            )
            .await?;
        }
        Some(Commands::Receive {
            listen,
            duration,
            json,
            overrides,
        }) => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            let format = config.frame_format()?;
            let report = run_receiver(
                &listen,
                format.frame_size(),
                format.interval(),
                duration,
                shutdown_on_ctrl_c(),
            )
            .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.render());
            }
        }
        Some(Commands::Simulate {
            cycles,
            stall_ms,
            seed,
            json,
            overrides,
        }) => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            handle_simulate(&config, cycles, stall_ms, seed, json)?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "framepace",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the flags.
fn init_tracing(quiet: bool, verbose: u8) {
    let default_level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

/// Load configuration from file or use defaults.
///
/// Priority order (later wins):
/// 1. Built-in defaults
/// 2. Config file (--config, or ~/.config/framepace/config.toml if present)
/// 3. Environment variables
/// 4. Command-line overrides
fn load_config(custom_path: Option<&Path>, overrides: &Overrides) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path()?)?
    };

    let mut config = config.with_env_overrides()?;
    if let Some(source) = &overrides.source {
        config.transport.source_addr = source.clone();
    }
    if let Some(sink) = &overrides.sink {
        config.transport.sink_addr = sink.clone();
    }
    if let Some(rate) = overrides.sample_rate {
        config.audio.sample_rate = rate;
    }
    if let Some(ms) = overrides.frame_ms {
        config.audio.frame_duration_ms = ms;
    }
    if let Some(kind) = overrides.transport {
        config.transport.kind = kind;
    }
    config.validate()?;
    Ok(config)
}

/// Watch channel that flips to `true` on the first Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received, shutting down"),
            Err(e) => tracing::error!("failed to listen for Ctrl-C: {}", e),
        }
        tx.send_replace(true);
    });
    rx
}

async fn handle_run(config: Config) -> Result<()> {
    let report = run_relay(&config, shutdown_on_ctrl_c()).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &RelayReport) {
    let stats = &report.scheduler;
    println!("{}", "Relay summary".bold());
    println!("  {}       {}", "Frames sent:".dimmed(), stats.frames_sent);
    println!("  {}    {}", "Silence frames:".dimmed(), stats.silence_sent);
    if stats.send_failures > 0 {
        println!(
            "  {}     {}",
            "Send failures:".dimmed(),
            stats.send_failures.to_string().yellow()
        );
    }
    if stats.evicted > 0 {
        println!(
            "  {}    {}",
            "Frames evicted:".dimmed(),
            stats.evicted.to_string().yellow()
        );
    }
    if report.malformed > 0 {
        println!(
            "  {}  {}",
            "Malformed input:".dimmed(),
            report.malformed.to_string().yellow()
        );
    }
    println!("  {}  {}", "Drift recoveries:".dimmed(), stats.drift_recoveries);
}

fn handle_simulate(
    config: &Config,
    cycles: usize,
    stall_ms: Option<u64>,
    seed: u64,
    json: bool,
) -> Result<()> {
    let format = config.frame_format()?;
    let mut generator = BurstGenerator::new(
        format.frame_size(),
        BurstProfile::default(),
        SampleSource::tone(format.sample_rate),
        seed,
    );
    let fragments: Vec<Vec<u8>> = (0..cycles).map(|_| generator.next_burst().0).collect();
    let stall = stall_ms.map(|ms| Stall {
        at_cycle: cycles / 2,
        duration: Duration::from_millis(ms),
    });

    let report = simulate(config, fragments, cycles, stall)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_simulation(&report);
    }
    Ok(())
}

fn print_simulation(report: &SimulationReport) {
    println!(
        "{} {} cycles, {}-byte frames",
        "Simulated".bold(),
        report.cycles,
        report.frame_size
    );
    println!("  {}    {}", "Frames emitted:".dimmed(), report.frames_emitted);
    println!("  {}       {}", "Frames sent:".dimmed(), report.scheduler.frames_sent);
    println!("  {}        {}", "Underflows:".dimmed(), report.underflows);
    println!("  {}   {}", "Queue overflows:".dimmed(), report.queue_overflows);
    println!("  {}  {}", "Drift recoveries:".dimmed(), report.drift_recoveries);
    if let Some(timing) = &report.timing {
        println!(
            "  {}      {:.2}ms (jitter {:.2}ms, accuracy {:.1}%)",
            "Avg interval:".dimmed(),
            timing.mean_ms,
            timing.jitter_ms,
            timing.accuracy_percent
        );
    }
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = match custom_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };

    match action {
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides()?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }
    Ok(())
}

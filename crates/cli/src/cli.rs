//! CLI wiring for tiletune.

use crate::report::{print_summary, write_source, TuningReport};
use crate::session::{SessionOptions, TuneSession};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tiletune_autotune::DEFAULT_SEED;
use tiletune_backend_gpu::GpuContext;
use tiletune_kernels::{generate, CandidateSet, KernelCandidate, Precision, Tolerance};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tiletune", about = "Empirical autotuner for tiled GPU matmul kernels")]
pub struct Cli {
    /// Adapter index as listed by `tiletune devices`.
    #[arg(long, default_value_t = 0, global = true)]
    pub device: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrecisionArg {
    #[value(alias = "f32")]
    Single,
    #[value(alias = "f64")]
    Double,
}

impl From<PrecisionArg> for Precision {
    fn from(value: PrecisionArg) -> Precision {
        match value {
            PrecisionArg::Single => Precision::Single,
            PrecisionArg::Double => Precision::Double,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search tile width and unrolling for a WIDTH x WIDTH product and export the winner.
    Tune {
        width: NonZeroUsize,
        #[arg(long, value_enum, default_value = "double")]
        precision: PrecisionArg,
        #[arg(long, default_value = "5")]
        trials: NonZeroUsize,
        #[arg(long, default_value_t = 1)]
        warmup: usize,
        #[arg(
            long,
            value_delimiter = ',',
            default_values_t = [8u32, 16, 24, 32],
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        tile_widths: Vec<u32>,
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
        #[arg(long, default_value = "matmul.wgsl")]
        output: PathBuf,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Run one candidate against the CPU reference product.
    Validate {
        width: NonZeroUsize,
        #[arg(long, value_enum, default_value = "double")]
        precision: PrecisionArg,
        #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..))]
        tile_width: u32,
        #[arg(long, default_value_t = false)]
        unroll: bool,
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },
    /// Emit kernel source for one candidate without touching a device.
    Generate {
        #[arg(long, value_enum, default_value = "double")]
        precision: PrecisionArg,
        #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..))]
        tile_width: u32,
        #[arg(long, default_value_t = false)]
        unroll: bool,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List GPU adapters and their capabilities.
    Devices,
}

pub fn run_cli(cli: Cli) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let Cli { device, command } = cli;

    match command {
        Command::Tune {
            width,
            precision,
            trials,
            warmup,
            tile_widths,
            seed,
            output,
            report,
        } => {
            let options = SessionOptions {
                device,
                warmup_runs: warmup,
                trials: trials.get(),
                seed,
            };
            let candidates = CandidateSet::new(tile_widths)?;
            let session = TuneSession::new(options)?;
            let result = session.tune(width.get(), precision.into(), &candidates)?;

            print_summary(&result);
            write_source(&output, &result.source)?;
            info!(path = %output.display(), candidate = %result.best.candidate, "kernel source written");

            if let Some(path) = report {
                let log = TuningReport::new(session.device_info().clone(), result);
                log.save_to_file(&path)?;
                info!(path = %path.display(), "tuning log written");
            }

            session.shutdown()?;
        }
        Command::Validate {
            width,
            precision,
            tile_width,
            unroll,
            seed,
        } => {
            let options = SessionOptions {
                device,
                seed,
                ..SessionOptions::default()
            };
            let precision = Precision::from(precision);
            let session = TuneSession::new(options)?;
            let outcome = session.validate(width.get(), precision, tile_width, unroll)?;
            println!(
                "{}: relative_error={:.3e} tolerance={:.0e}",
                outcome.candidate,
                outcome.relative_error,
                Tolerance::for_precision(precision).max_rel_error
            );
            session.shutdown()?;
        }
        Command::Generate {
            precision,
            tile_width,
            unroll,
            output,
        } => {
            let candidate = KernelCandidate::new(precision.into(), tile_width, unroll)?;
            let source = generate(&candidate)?;
            match output {
                Some(path) => {
                    write_source(&path, &source)?;
                    info!(path = %path.display(), candidate = %candidate, "kernel source written");
                }
                None => print!("{}", source.as_str()),
            }
        }
        Command::Devices => {
            let devices = GpuContext::list_devices();
            if devices.is_empty() {
                println!("no GPU adapters found");
            }
            for info in devices {
                println!(
                    "[{}] {} backend={} type={} f64={} timestamps={}",
                    info.index,
                    info.name,
                    info.backend,
                    info.device_type,
                    info.supports_f64,
                    info.supports_timestamps
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("tiletune").chain(args.iter().copied()))
    }

    #[test]
    fn tune_defaults() {
        let cli = parse(&["tune", "256"]).unwrap();
        assert_eq!(cli.device, 0);
        match cli.command {
            Command::Tune {
                width,
                precision,
                trials,
                warmup,
                tile_widths,
                seed,
                output,
                report,
            } => {
                assert_eq!(width.get(), 256);
                assert_eq!(precision, PrecisionArg::Double);
                assert_eq!(trials.get(), 5);
                assert_eq!(warmup, 1);
                assert_eq!(tile_widths, vec![8, 16, 24, 32]);
                assert_eq!(seed, DEFAULT_SEED);
                assert_eq!(output, PathBuf::from("matmul.wgsl"));
                assert!(report.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn tune_accepts_overrides() {
        let cli = parse(&[
            "tune",
            "64",
            "--precision",
            "f32",
            "--trials",
            "3",
            "--tile-widths",
            "8,16",
            "--device",
            "1",
            "--report",
            "log.json",
        ])
        .unwrap();
        assert_eq!(cli.device, 1);
        match cli.command {
            Command::Tune {
                precision,
                trials,
                tile_widths,
                report,
                ..
            } => {
                assert_eq!(Precision::from(precision), Precision::Single);
                assert_eq!(trials.get(), 3);
                assert_eq!(tile_widths, vec![8, 16]);
                assert_eq!(report, Some(PathBuf::from("log.json")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn zero_width_and_trials_are_rejected() {
        assert!(parse(&["tune", "0"]).is_err());
        assert!(parse(&["tune", "64", "--trials", "0"]).is_err());
        assert!(parse(&["tune", "64", "--tile-widths", "8,0"]).is_err());
        assert!(parse(&["validate", "0"]).is_err());
        assert!(parse(&["tune", "-3"]).is_err());
    }

    #[test]
    fn generate_needs_no_width() {
        let cli = parse(&["generate", "--tile-width", "16", "--unroll"]).unwrap();
        match cli.command {
            Command::Generate {
                precision,
                tile_width,
                unroll,
                output,
            } => {
                assert_eq!(precision, PrecisionArg::Double);
                assert_eq!(tile_width, 16);
                assert!(unroll);
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

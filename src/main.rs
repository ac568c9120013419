//! syrk-perf CLI - SYRK device vs reference timing
//!
//! # Commands
//!
//! - `run` - Time a single case
//! - `batch` - Time every case of a JSON case file
//! - `check` - Print the resource verdict for a case without running it
//!
//! Cases run against the simulated device; its memory and capabilities are
//! set with the `--global-mem-mib`, `--max-alloc-mib` and `--no-double`
//! flags.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use syrk_perf::device::sim::{SimConfig, SimDevice};
use syrk_perf::error::{HarnessError, Result};
use syrk_perf::resources::{self, MemoryLimits, ResourceVerdict};
use syrk_perf::{
    CaseFile, DeviceBackend, Harness, HarnessConfig, HostSyrk, Order, Outcome, ProblemDescriptor,
    Transpose, Uplo, Variant, Verdict,
};

/// syrk-perf - time a SYRK kernel on a device against a host reference
#[derive(Parser)]
#[command(name = "syrk-perf")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Time a single case
    ///
    /// Examples:
    ///   syrk-perf run --variant s -n 512 -k 512
    ///   syrk-perf run --variant z -n 256 -k 64 --order row --trans
    Run {
        #[command(flatten)]
        case: CaseArgs,

        #[command(flatten)]
        device: DeviceArgs,

        /// JSON harness configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Timed runs per path (overrides the configuration)
        #[arg(short, long)]
        repetitions: Option<usize>,

        /// Allow row-major reference runs
        #[arg(long)]
        row_major: bool,
    },
    /// Time every case of a JSON case file
    Batch {
        /// Case file (`{"config": {...}, "cases": [...]}`)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        device: DeviceArgs,

        /// Write the batch summary as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the resource verdict for a case
    Check {
        #[command(flatten)]
        case: CaseArgs,

        #[command(flatten)]
        device: DeviceArgs,
    },
}

#[derive(Args)]
struct CaseArgs {
    /// Numeric variant: s, d, c, z (or real32, real64, complex32, complex64)
    #[arg(long, default_value = "s")]
    variant: String,

    /// Order of C
    #[arg(short = 'n', long)]
    n: usize,

    /// Reduction dimension
    #[arg(short = 'k', long)]
    k: usize,

    /// Storage order: col or row
    #[arg(long, default_value = "col")]
    order: String,

    /// Update the lower triangle instead of the upper one
    #[arg(long)]
    lower: bool,

    /// Use op(A) = A^T
    #[arg(long)]
    trans: bool,

    /// Leading dimension of A (tight if omitted)
    #[arg(long)]
    lda: Option<usize>,

    /// Leading dimension of C (tight if omitted)
    #[arg(long)]
    ldc: Option<usize>,

    /// Offset of A in elements
    #[arg(long, default_value = "0")]
    off_a: usize,

    /// Offset of C in elements
    #[arg(long, default_value = "0")]
    off_c: usize,

    /// Alpha multiplier
    #[arg(long, default_value = "1.0")]
    alpha: f64,

    /// Beta multiplier
    #[arg(long, default_value = "1.0")]
    beta: f64,
}

impl CaseArgs {
    fn to_problem(&self) -> Result<ProblemDescriptor> {
        let variant = Variant::parse(&self.variant).ok_or_else(|| {
            HarnessError::InvalidConfiguration(format!("unknown variant '{}'", self.variant))
        })?;
        let order = match self.order.to_ascii_lowercase().as_str() {
            "col" | "column" | "column_major" => Order::ColumnMajor,
            "row" | "row_major" => Order::RowMajor,
            other => {
                return Err(HarnessError::InvalidConfiguration(format!(
                    "unknown order '{}'",
                    other
                )))
            },
        };
        let uplo = if self.lower { Uplo::Lower } else { Uplo::Upper };
        let trans = if self.trans {
            Transpose::Trans
        } else {
            Transpose::NoTrans
        };

        let mut problem = ProblemDescriptor::new(variant, self.n, self.k)
            .with_order(order)
            .with_trans(trans)
            .with_uplo(uplo)
            .with_offsets(self.off_a, self.off_c)
            .with_scalars(self.alpha, self.beta);
        let lda = self.lda.unwrap_or(problem.lda);
        let ldc = self.ldc.unwrap_or(problem.ldc);
        problem = problem.with_leading_dims(lda, ldc);
        problem.validate()?;
        Ok(problem)
    }
}

#[derive(Args)]
struct DeviceArgs {
    /// Simulated global memory in MiB
    #[arg(long, default_value = "1024")]
    global_mem_mib: u64,

    /// Simulated maximum allocation in MiB
    #[arg(long, default_value = "256")]
    max_alloc_mib: u64,

    /// Simulate a device without native fp64
    #[arg(long)]
    no_double: bool,

    /// Device whose memory gates the resource check (overrides the configuration)
    #[arg(long)]
    device_index: Option<usize>,
}

impl DeviceArgs {
    fn sim_config(&self) -> SimConfig {
        const MIB: u64 = 1024 * 1024;
        SimConfig::default()
            .with_memory(
                self.global_mem_mib.saturating_mul(MIB),
                self.max_alloc_mib.saturating_mul(MIB),
            )
            .with_double_precision(!self.no_double)
    }

    fn build(&self) -> SimDevice {
        SimDevice::new(self.sim_config())
    }

    fn apply(&self, config: HarnessConfig) -> HarnessConfig {
        match self.device_index {
            Some(index) => config.with_device_index(index),
            None => config,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            case,
            device,
            config,
            repetitions,
            row_major,
        } => {
            let problem = case.to_problem()?;
            let mut config = match config {
                Some(path) => HarnessConfig::from_json_file(path)?,
                None => HarnessConfig::default(),
            };
            if let Some(repetitions) = repetitions {
                config = config.with_repetitions(repetitions);
            }
            if row_major {
                config = config.with_row_major(true);
            }
            let config = device.apply(config);
            let device = device.build();
            let baseline = HostSyrk::linked();
            let harness = Harness::new(&device, baseline.as_ref(), config)?;
            let outcome = harness.run(&problem);
            print_outcome(&problem, &outcome);
            if outcome.verdict() == Verdict::Fatal {
                std::process::exit(1);
            }
        },
        Commands::Batch {
            file,
            device,
            output,
        } => {
            let cases = CaseFile::from_json_file(file)?;
            let config = device.apply(cases.config);
            let device = device.build();
            let baseline = HostSyrk::linked();
            let harness = Harness::new(&device, baseline.as_ref(), config)?;
            let summary = harness.run_batch(&cases.cases);

            println!(
                "{} cases: {} ok, {} regressions, {} skipped, {} fatal",
                summary.records.len(),
                summary.count(Verdict::Ok),
                summary.count(Verdict::Regression),
                summary.count(Verdict::Skipped),
                summary.count(Verdict::Fatal)
            );
            for record in summary.regressions() {
                let slowdown = record
                    .report
                    .as_ref()
                    .and_then(|r| r.slowdown())
                    .unwrap_or(f64::NAN);
                println!("  slower: {} ({:.2}x)", record.problem, slowdown);
            }
            if let Some(path) = output {
                std::fs::write(path, summary.to_json()?)?;
            }
            if summary.has_fatal() {
                std::process::exit(1);
            }
        },
        Commands::Check { case, device } => {
            let problem = case.to_problem()?;
            let config = device.apply(HarnessConfig::default());
            let device = device.build();
            let limits = MemoryLimits::query(&device, config.device_index);
            match resources::check(limits, &problem) {
                ResourceVerdict::Run => println!("{}: run", problem),
                ResourceVerdict::Skip { required, ceiling } => println!(
                    "{}: skip ({} bytes required, ceiling {} bytes)",
                    problem, required, ceiling
                ),
            }
            if problem.variant.requires_double() && !device.supports_double_precision() {
                println!("{}: skip (no native double precision)", problem);
            }
        },
    }

    Ok(())
}

fn print_outcome(problem: &ProblemDescriptor, outcome: &Outcome) {
    match outcome {
        Outcome::RanFasterOrEqual(report) | Outcome::RanSlower(report) => {
            println!("{}", problem);
            println!(
                "  device:    {:>12.3} ms  {:>8.2} GFLOP/s",
                report.device_time.as_secs_f64() * 1e3,
                report.device_gflops()
            );
            match report.reference.elapsed() {
                Some(t) => println!(
                    "  reference: {:>12.3} ms  {:>8.2} GFLOP/s",
                    t.as_secs_f64() * 1e3,
                    report.reference_gflops().unwrap_or_default()
                ),
                None => println!("  reference: {:?}", report.reference),
            }
            println!("  verdict:   {:?}", outcome.verdict());
        },
        Outcome::SkippedInsufficientResources { required, ceiling } => {
            println!(
                "{}: skipped, {} bytes required, ceiling {} bytes",
                problem, required, ceiling
            );
        },
        Outcome::SkippedUnsupportedPrecision => {
            println!("{}: skipped, no native double precision", problem);
        },
        Outcome::Fatal(err) => {
            eprintln!("{}: fatal: {}", problem, err);
        },
    }
}

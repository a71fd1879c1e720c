use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use kcompat_core::emit::render_header;
use kcompat_core::flags::stock_table;
use kcompat_core::probe::{stock_probe, ProbeInput};
use kcompat_core::registry::stock_catalog;
use kcompat_core::resolver::{resolve, FeatureConfig, Overrides};
use kcompat_core::surface::Surface;
use kcompat_core::version::{KernelVersion, Variant};
use kcompat_core::host;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kcompat")]
#[command(about = "Kernel compatibility probe and compat-header generator for filesystem modules")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TargetArgs {
    /// Target kernel release, e.g. 3.10.0-957.el7.x86_64. Defaults to the
    /// running kernel.
    #[arg(short, long)]
    kernel: Option<String>,

    /// Target distribution marker, e.g. rhel-6.4. Defaults to the running
    /// distribution when detectable.
    #[arg(short = 'd', long)]
    variant: Option<String>,

    /// Override one flag: FLAG=present or FLAG=absent. Repeatable; an
    /// override wins over pins and defaults.
    #[arg(short = 's', long = "set", value_name = "FLAG=VALUE")]
    set: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Introspect the running machine and print what was found
    Probe,

    /// Resolve the capability table for a target kernel
    Resolve {
        #[command(flatten)]
        target: TargetArgs,

        /// Emit the resolution report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Emit the compat header for a target kernel
    Emit {
        #[command(flatten)]
        target: TargetArgs,

        /// Write the header here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kcompat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Probe => probe_host(),
        Commands::Resolve { target, json } => {
            let config = resolve_target(&target)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config.report())?);
            } else {
                print_report(&config);
            }
            Ok(())
        }
        Commands::Emit { target, output } => {
            let config = resolve_target(&target)?;
            let catalog = stock_catalog()?;
            let surface = Surface::bind(&catalog, config)?;
            let header = render_header(&surface);
            match output {
                Some(path) => {
                    std::fs::write(&path, header)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!(path = %path.display(), "compat header written");
                }
                None => print!("{header}"),
            }
            Ok(())
        }
    }
}

fn probe_host() -> Result<()> {
    let input = host::detect();
    match input.kernel {
        Some(kernel) => println!("kernel:  {kernel}"),
        None => println!("kernel:  not detected"),
    }
    match input.variant {
        Some(variant) => println!("variant: {variant}"),
        None => println!("variant: not detected"),
    }
    Ok(())
}

/// Build the probe inputs for a target. Explicit arguments are parsed
/// strictly; anything not given falls back to host introspection, which
/// degrades to absent inputs rather than failing.
fn resolve_target(target: &TargetArgs) -> Result<FeatureConfig> {
    let detected = if target.kernel.is_none() || target.variant.is_none() {
        host::detect()
    } else {
        ProbeInput::default()
    };

    let kernel = match &target.kernel {
        Some(raw) => Some(
            KernelVersion::parse(raw)
                .with_context(|| format!("unrecognized kernel release '{raw}'"))?,
        ),
        None => detected.kernel,
    };
    let variant = match &target.variant {
        Some(raw) => match Variant::parse(raw) {
            Some(v) => Some(v),
            None => bail!("unrecognized variant marker '{raw}', expected name-major.minor"),
        },
        None => detected.variant,
    };

    let input = ProbeInput { kernel, variant };
    let table = stock_table()?;

    let mut overrides = Overrides::default();
    for entry in &target.set {
        let (cap, value) = Overrides::parse_entry(&table, entry)?;
        overrides.set(cap, value);
    }

    let pins = stock_probe().probe(&table, &input)?;
    let config = resolve(&table, &input, &pins, &overrides)?;
    Ok(config)
}

fn print_report(config: &FeatureConfig) {
    match config.kernel() {
        Some(kernel) => println!("target kernel: {kernel}"),
        None => println!("target kernel: unknown"),
    }
    if let Some(variant) = config.variant() {
        println!("distribution:  {variant}");
    }
    println!();

    let width = config
        .iter()
        .map(|(cap, _, _)| cap.name().len())
        .max()
        .unwrap_or(0);
    for (cap, value, provenance) in config.iter() {
        println!("{:width$}  {:7}  ({:?})", cap.name(), value.to_string(), provenance);
    }
}

use actorforge_core::specializer::MAIN_METHOD;
use actorforge_core::{
    specialize, CliOverrides, CodegenMode, ConstantPolicy, Container, ExecError, Interpreter,
    ModelDescription, SpecializeError, SpecializerConfig, Watchdog,
};
use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const EXIT_SPECIALIZATION: u8 = 1;
const EXIT_RUNTIME: u8 = 2;
const EXIT_WATCHDOG: u8 = 3;

/// ActorForge - ahead-of-time specializer for actor dataflow models
#[derive(Parser, Debug, Clone)]
#[command(name = "actorforge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Model description (JSON, or YAML by extension)
    #[arg(value_name = "MODEL")]
    model: PathBuf,

    /// Configuration file (JSON, or YAML by extension)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Code generation mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Harness iteration cap
    #[arg(short = 'n', long, value_name = "N")]
    iterations: Option<u64>,

    /// Verbose per-site logging
    #[arg(long)]
    debug: bool,

    /// Abort after this many seconds
    #[arg(long, value_name = "SECONDS")]
    watchdog: Option<u64>,

    /// Prefix for generated class names
    #[arg(long, value_name = "NAME")]
    package: Option<String>,

    /// Treatment of unresolvable identifiers in parameter expressions
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Skip the loop unroller
    #[arg(long)]
    no_unroll: bool,

    /// Write the generated IR to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Do not print the generated IR
    #[arg(short, long)]
    quiet: bool,

    /// Execute the generated harness
    #[arg(long)]
    run: bool,

    /// Execute the harness and print its execution trace as JSON
    #[arg(long)]
    trace: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Deep,
    Shallow,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Conservative,
    Permissive,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // RUST_LOG takes precedence over the configured level
    let level = if config.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    run(&cli, config)
}

/// Load configuration from file (if specified) and apply CLI overrides
fn load_config(cli: &Cli) -> anyhow::Result<SpecializerConfig> {
    let mut config = match &cli.config {
        Some(path) => SpecializerConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => SpecializerConfig::default(),
    };

    let overrides = CliOverrides {
        target_package: cli.package.clone(),
        mode: cli.mode.map(|mode| match mode {
            ModeArg::Deep => CodegenMode::Deep,
            ModeArg::Shallow => CodegenMode::Shallow,
        }),
        iterations: cli.iterations,
        debug: cli.debug.then_some(true),
        watchdog_seconds: cli.watchdog,
        constant_policy: cli.policy.map(|policy| match policy {
            PolicyArg::Conservative => ConstantPolicy::Conservative,
            PolicyArg::Permissive => ConstantPolicy::Permissive,
        }),
        unroll_loops: cli.no_unroll.then_some(false),
    };
    config.merge(&overrides);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

fn run(cli: &Cli, config: SpecializerConfig) -> anyhow::Result<ExitCode> {
    let watchdog = config.watchdog_seconds.map(Watchdog::from_seconds);
    let watchdog_expired = || watchdog.as_ref().map(Watchdog::expired).unwrap_or(false);

    let model = ModelDescription::from_file(&cli.model)
        .and_then(ModelDescription::into_model)
        .with_context(|| format!("Failed to load model {}", cli.model.display()))?;
    info!("Loaded model `{}`", model.component(model.top()).name);

    let mut container = Container::new(config);
    if let Some(watchdog) = &watchdog {
        container = container.with_cancel_flag(watchdog.flag());
    }

    let specialized = match specialize(&model, &container) {
        Ok(specialized) => specialized,
        Err(SpecializeError::Cancelled) => return Ok(watchdog_exit(&watchdog)),
        Err(err) => {
            debug!("Specialization failed: {:?}", err);
            return Ok(ExitCode::from(EXIT_SPECIALIZATION));
        }
    };
    info!(
        "Generated {} classes; entry point {}",
        specialized.scene.application_classes().len(),
        specialized.main_class
    );

    let listing = specialized.print();
    match &cli.output {
        Some(path) => std::fs::write(path, &listing)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None if !cli.quiet => print!("{}", listing),
        None => {}
    }

    if !(cli.run || cli.trace) {
        return Ok(ExitCode::SUCCESS);
    }

    let mut interpreter = Interpreter::new(&specialized.scene);
    if let Some(watchdog) = &watchdog {
        interpreter = interpreter.with_cancel_flag(watchdog.flag());
    }
    match interpreter.run_static(&specialized.main_class, MAIN_METHOD, Vec::new()) {
        Ok(_) => {}
        Err(ExecError::Cancelled) => return Ok(watchdog_exit(&watchdog)),
        Err(_) if watchdog_expired() => return Ok(watchdog_exit(&watchdog)),
        Err(err) => {
            eprintln!("runtime error: {}", err);
            return Ok(ExitCode::from(EXIT_RUNTIME));
        }
    }

    let trace = interpreter.into_trace();
    info!("Harness finished after {} steps", trace.steps);
    if cli.trace {
        println!("{}", serde_json::to_string_pretty(&trace)?);
    }
    Ok(ExitCode::SUCCESS)
}

fn watchdog_exit(watchdog: &Option<Watchdog>) -> ExitCode {
    let timeout = watchdog
        .as_ref()
        .map(|w| format!("{:?}", w.timeout()))
        .unwrap_or_default();
    eprintln!("error: watchdog expired after {}", timeout);
    ExitCode::from(EXIT_WATCHDOG)
}

/*!
 * attempt CLI - run shell commands under retry, backoff and fallback policies
 */

use std::path::PathBuf;
use std::sync::Arc;

use attempt::{
    cli_style::{
        self, attempt_log_table, delay_schedule_table, outcome_table, print_error, print_info,
        print_success, section_header, Icons, Theme,
    },
    command::{CommandOutput, ShellCommand},
    config::{EngineConfig, LogLevel},
    error::{AttemptError, Result, EXIT_FAILURE, EXIT_SUCCESS},
    logging, Attempt, AttemptBuilder, Engine, Outcome, UnitRef,
};
use attempt_core_backoff::{Backoff, DelayCalculator, DelayPlan};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "attempt")]
#[command(version, about = "Run commands with retries, backoff and fallbacks", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long = "log-level", value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print the attempt log after a run
    #[arg(long = "show-log", global = true)]
    show_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Default)]
struct RetryArgs {
    /// Retries after the first attempt
    #[arg(short = 'r', long = "retry", value_name = "N")]
    retry: Option<u32>,

    /// Base delay between attempts in milliseconds
    #[arg(short = 'd', long = "delay", value_name = "MS")]
    delay: Option<u64>,

    /// Backoff strategy (fixed, linear, exponential, fibonacci, decorrelated_jitter, or a configured name)
    #[arg(short = 'b', long = "backoff", value_name = "NAME")]
    backoff: Option<String>,

    /// Jitter factor in [0, 1]
    #[arg(short = 'j', long = "jitter", value_name = "FACTOR")]
    jitter: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command, retrying it and falling back to alternatives on failure
    Run {
        #[command(flatten)]
        retry: RetryArgs,

        /// Shell line to run when the command keeps failing (repeatable, tried in order)
        #[arg(short = 'f', long = "fallback", value_name = "CMD")]
        fallbacks: Vec<String>,

        /// Exit codes that are never retried
        #[arg(long = "never-retry-code", value_name = "CODE")]
        never_retry_codes: Vec<i32>,

        /// Program and arguments
        #[arg(trailing_var_arg = true, required = true, value_name = "PROGRAM")]
        argv: Vec<String>,
    },

    /// Run several commands; the first success wins
    Race {
        /// Shell line to race (repeatable)
        #[arg(long = "cmd", value_name = "CMD", required = true)]
        commands: Vec<String>,

        #[command(flatten)]
        retry: RetryArgs,
    },

    /// Run several commands and report every outcome
    All {
        /// Shell line to run (repeatable)
        #[arg(long = "cmd", value_name = "CMD", required = true)]
        commands: Vec<String>,

        /// Stop at the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Run up to N commands at once
        #[arg(long, value_name = "N", default_value = "1")]
        parallel: usize,

        #[command(flatten)]
        retry: RetryArgs,
    },

    /// Print the delay schedule a backoff strategy produces
    Delays {
        /// Strategy name (built-in or configured)
        #[arg(short = 's', long = "strategy", default_value = "exponential")]
        strategy: String,

        /// Number of retries to show
        #[arg(short = 'n', long = "attempts", default_value = "5")]
        attempts: u32,

        /// Jitter factor in [0, 1]
        #[arg(short = 'j', long = "jitter", default_value = "0")]
        jitter: f64,
    },

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            print_error(&e.to_string(), hint_for(&e));
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn hint_for(error: &AttemptError) -> Option<&'static str> {
    match error {
        AttemptError::Config(_) => Some("Check the configuration file with `attempt config show`"),
        AttemptError::Resolution(_) => Some("Check the command and fallback names"),
        _ => None,
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let config = EngineConfig::load_or_default(cli.config.as_deref())?;

    let mut log_config = config.logging.clone();
    if let Some(level) = cli.log_level {
        log_config.level = level.into();
    }
    log_config.level = match cli.verbose {
        0 => log_config.level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };
    if let Err(e) = logging::init_logging(&log_config) {
        cli_style::print_warning(&format!("Failed to initialize logging: {}", e));
    }

    match cli.command {
        Commands::Delays {
            strategy,
            attempts,
            jitter,
        } => handle_delays(&config, &strategy, attempts, jitter).map(|()| EXIT_SUCCESS),
        Commands::Config(command) => handle_config(command, cli.config).map(|()| EXIT_SUCCESS),
        command => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let engine = Engine::new(config.to_policy()?);
            runtime.block_on(handle_command(engine, command, cli.show_log))
        }
    }
}

async fn handle_command(engine: Engine, command: Commands, show_log: bool) -> Result<i32> {
    match command {
        Commands::Run {
            retry,
            fallbacks,
            never_retry_codes,
            argv,
        } => {
            let program = ShellCommand::from_argv(&argv).ok_or_else(|| {
                AttemptError::Resolution("no program given to run".to_string())
            })?;
            handle_run(&engine, program, &retry, &fallbacks, &never_retry_codes, show_log).await
        }
        Commands::Race { commands, retry } => handle_race(&engine, &commands, &retry, show_log).await,
        Commands::All {
            commands,
            fail_fast,
            parallel,
            retry,
        } => handle_all(&engine, &commands, fail_fast, parallel, &retry).await,
        Commands::Delays { .. } | Commands::Config(_) => Ok(EXIT_SUCCESS),
    }
}

/// Engine defaults first, then whatever the flags override
fn configure(
    builder: AttemptBuilder<CommandOutput, ()>,
    args: &RetryArgs,
) -> AttemptBuilder<CommandOutput, ()> {
    let mut builder = builder.with_defaults();
    if let Some(retry) = args.retry {
        builder = builder.retry(retry);
    }
    if let Some(delay) = args.delay {
        builder = builder.delay(delay);
    }
    if let Some(backoff) = &args.backoff {
        builder = builder.backoff(backoff);
    }
    if let Some(jitter) = args.jitter {
        builder = builder.with_jitter(jitter);
    }
    builder
}

fn command_attempt(
    engine: &Engine,
    command: ShellCommand,
    args: &RetryArgs,
) -> AttemptBuilder<CommandOutput, ()> {
    let label = command.to_string();
    let unit = UnitRef::attemptable(Arc::new(command)).labeled(label);
    configure(engine.attempt_unit(unit), args)
}

async fn handle_run(
    engine: &Engine,
    program: ShellCommand,
    args: &RetryArgs,
    fallbacks: &[String],
    never_retry_codes: &[i32],
    show_log: bool,
) -> Result<i32> {
    print_info(&format!("Running {}", Theme::primary(&program)));

    let mut builder = command_attempt(engine, program, args);
    for line in fallbacks {
        let fallback = ShellCommand::shell(line.clone());
        builder = builder.fallback_unit(UnitRef::attemptable(Arc::new(fallback)).labeled(line.clone()));
    }
    for code in never_retry_codes {
        builder = builder.never_retry_matching(attempt::ErrorMatcher::exit_code(*code));
    }

    let outcome = builder.build()?.run().await?;
    report(&outcome, show_log);
    Ok(exit_code(&outcome))
}

async fn handle_race(
    engine: &Engine,
    commands: &[String],
    args: &RetryArgs,
    show_log: bool,
) -> Result<i32> {
    let mut race = engine.race();
    for line in commands {
        race = race.add_attempt(build_line(engine, line, args)?);
    }

    let outcome = race.run().await;
    report(&outcome, show_log);
    Ok(exit_code(&outcome))
}

async fn handle_all(
    engine: &Engine,
    commands: &[String],
    fail_fast: bool,
    parallel: usize,
    args: &RetryArgs,
) -> Result<i32> {
    let mut concurrent = engine.concurrent().parallel(parallel.max(1));
    if fail_fast {
        concurrent = concurrent.fail_fast();
    }
    for line in commands {
        concurrent = concurrent.add_attempt(build_line(engine, line, args)?);
    }

    let outcomes = concurrent.run().await;

    section_header("Results");
    let mut table = cli_style::create_table();
    table.set_header(vec!["Command", "Status", "Attempts", "Error"]);
    for (line, outcome) in commands.iter().zip(&outcomes) {
        let status = if outcome.succeeded() {
            format!("{} ok", Icons::SUCCESS)
        } else {
            format!("{} failed", Icons::ERROR)
        };
        table.add_row(vec![
            line.clone(),
            status,
            outcome.attempts().to_string(),
            outcome.error().map(|e| e.to_string()).unwrap_or_default(),
        ]);
    }
    for line in commands.iter().skip(outcomes.len()) {
        table.add_row(vec![line.clone(), format!("{} not run", Icons::SKIPPED), "0".into(), String::new()]);
    }
    eprintln!("{}", table);

    let all_ok = outcomes.len() == commands.len() && outcomes.iter().all(Outcome::succeeded);
    Ok(if all_ok { EXIT_SUCCESS } else { EXIT_FAILURE })
}

fn build_line(engine: &Engine, line: &str, args: &RetryArgs) -> Result<Attempt<CommandOutput>> {
    command_attempt(engine, ShellCommand::shell(line), args).build()
}

fn report(outcome: &Outcome<CommandOutput>, show_log: bool) {
    if let Some(output) = outcome.value() {
        print!("{}", output.stdout);
    }

    if show_log {
        section_header("Attempt log");
        eprintln!("{}", attempt_log_table(outcome.log()));
    }

    if outcome.succeeded() {
        print_success(&format!(
            "Succeeded after {} attempt(s) via {}",
            outcome.attempts(),
            outcome
                .resolved_by()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string())
        ));
    } else {
        eprintln!("{}", outcome_table(&outcome.summary()));
    }
}

fn exit_code<T>(outcome: &Outcome<T>) -> i32 {
    if outcome.succeeded() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

fn handle_delays(config: &EngineConfig, strategy: &str, attempts: u32, jitter: f64) -> Result<()> {
    let backoff = match config.backoff_strategies.get(strategy) {
        Some(backoff) => backoff.clone(),
        None => strategy.parse::<Backoff>()?,
    };
    backoff.validate()?;

    let plan = DelayPlan::default()
        .with_delay(attempt_core_backoff::Delay::Fixed(config.defaults.delay_ms))
        .with_backoff(&backoff)
        .with_jitter(jitter);
    let mut calculator = DelayCalculator::new(&plan);
    let delays: Vec<u64> = (1..=attempts)
        .map(|attempt| calculator.calculate(attempt, None))
        .collect();

    section_header(&format!("{} backoff", backoff.name()));
    eprintln!("{}", delay_schedule_table(backoff.name(), &delays));
    Ok(())
}

fn handle_config(command: ConfigCommands, path: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommands::Init { force } => {
            let path = path.or_else(EngineConfig::default_path).ok_or_else(|| {
                AttemptError::Config("could not determine a configuration directory".to_string())
            })?;
            if path.exists() && !force {
                return Err(AttemptError::Config(format!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                )));
            }
            EngineConfig::default().to_file(&path)?;
            print_success(&format!("Wrote {}", path.display()));
            Ok(())
        }
        ConfigCommands::Show => {
            let config = EngineConfig::load_or_default(path.as_deref())?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

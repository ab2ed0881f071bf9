mod app;
mod check;
mod driver;
mod effect;
mod fanout;
mod git;
mod headless;
mod hooks;
mod model;
mod msg;
mod plugin;
mod registry;
mod view;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing_subscriber::EnvFilter;

use app::App;
use check::{CheckOptions, CheckRun, Checker};
use driver::Driver;
use git::{GitCli, GitGateway};
use headless::{BatchReport, BatchRunner};
use hooks::{Hooks, TmuxHooks};
use model::config::{AppConfig, CheckMode};
use model::state::ToolState;
use msg::Msg;
use plugin::PluginManager;
use plugin::operation::Operation;
use registry::{CatalogSource, FileCatalog};

#[derive(Parser)]
#[command(name = "muxpack", version, about = "Install, update and clean tmux plugins")]
struct Cli {
    /// Use this config file instead of the per-user one.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive plugin manager (default).
    Tui,
    /// Install every declared plugin that is missing.
    Install,
    /// Update the named plugins, or every installed plugin.
    Update { names: Vec<String> },
    /// Remove plugin directories that are no longer declared.
    Clean,
    /// Remove the named plugins' directories.
    Uninstall {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Look for plugins that are behind their remote.
    Check {
        /// Override `updates.check_mode`.
        #[arg(long, value_enum)]
        mode: Option<CheckMode>,
        /// Ignore `updates.check_interval_hours`.
        #[arg(long)]
        force: bool,
    },
    /// Print declared plugins with their status, and orphaned directories.
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("muxpack error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load(cli.config.as_deref())?;
    // Keep the guard alive so buffered log lines are flushed on exit.
    let _guard = init_logging(&config)?;

    tracing::info!("muxpack starting");

    let git: Arc<dyn GitGateway> = Arc::new(GitCli::default());
    let hooks: Arc<dyn Hooks> = Arc::new(TmuxHooks::new(config.tmux_conf()));

    match cli.command.unwrap_or(Command::Tui) {
        Command::Tui => {
            run_tui(config, git, hooks)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Install => run_batch_command(&config, git, hooks, Operation::Install, &[]),
        Command::Update { names } => run_batch_command(&config, git, hooks, Operation::Update, &names),
        Command::Clean => run_batch_command(&config, git, hooks, Operation::Clean, &[]),
        Command::Uninstall { names } => {
            run_batch_command(&config, git, hooks, Operation::Uninstall, &names)
        }
        Command::Check { mode, force } => run_check(&config, git, hooks, mode, force),
        Command::List => run_list(&config, git),
    }
}

fn init_logging(config: &AppConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    // Logs go to a file, never stdout.
    let log_dir = directories::ProjectDirs::from("", "", "muxpack")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("muxpack"));
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "muxpack.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_env("MUXPACK_LOG")
        .or_else(|_| EnvFilter::try_new(&config.general.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("muxpack=info"));
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_env_filter(filter)
        .init();
    Ok(guard)
}

fn catalog() -> Arc<dyn CatalogSource> {
    let catalog = FileCatalog::default_location()
        .unwrap_or_else(|| FileCatalog::new(std::env::temp_dir().join("muxpack-registry.toml")));
    Arc::new(catalog)
}

fn batch_runner(config: &AppConfig, git: Arc<dyn GitGateway>, hooks: Arc<dyn Hooks>) -> BatchRunner {
    let (tx, rx) = mpsc::channel();
    let driver = Driver::new(
        tx,
        git,
        hooks.clone(),
        catalog(),
        config.timeouts(),
        config.check_concurrency(),
    );
    BatchRunner::new(driver, rx, hooks, config.operation_concurrency())
}

fn scan(config: &AppConfig, git: &dyn GitGateway) -> PluginManager {
    PluginManager::scan(config.plugin_dir(), config.plugin_specs(), git)
}

fn print_report(report: &BatchReport) -> ExitCode {
    if report.results.is_empty() {
        println!("nothing to {}", report.operation);
        return ExitCode::SUCCESS;
    }
    for result in report.successes() {
        println!("{}: {}", result.name, result.message);
        for commit in &result.commits {
            println!("    {} {}", commit.hash, commit.subject);
        }
    }
    for result in report.failures() {
        eprintln!("{}: {} failed: {}", result.name, report.operation, result.message);
    }
    if report.any_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run_batch_command(
    config: &AppConfig,
    git: Arc<dyn GitGateway>,
    hooks: Arc<dyn Hooks>,
    operation: Operation,
    names: &[String],
) -> Result<ExitCode> {
    let mut manager = scan(config, git.as_ref());
    let runner = batch_runner(config, git, hooks);
    let report = runner.run_named(operation, names, &mut manager)?;
    Ok(print_report(&report))
}

fn run_check(
    config: &AppConfig,
    git: Arc<dyn GitGateway>,
    hooks: Arc<dyn Hooks>,
    mode: Option<CheckMode>,
    force: bool,
) -> Result<ExitCode> {
    let state_path = ToolState::default_path();
    let mut state = state_path.as_deref().map(ToolState::load).unwrap_or_default();
    let mut manager = scan(config, git.as_ref());
    let runner = batch_runner(config, git.clone(), hooks.clone());

    let checker = Checker {
        git: git.as_ref(),
        hooks: hooks.as_ref(),
        runner: &runner,
        timeout: config.timeouts().status_check,
        max_concurrent: config.check_concurrency(),
    };
    let options = CheckOptions {
        mode: mode.unwrap_or(config.updates.check_mode),
        force,
        interval: Duration::from_secs(config.updates.check_interval_hours * 3_600),
    };
    let run = checker.run(&mut manager, options, &mut state, SystemTime::now())?;

    if !matches!(run, CheckRun::Skipped)
        && let Some(path) = &state_path
        && let Err(err) = state.save(path)
    {
        tracing::warn!("could not persist check time: {err:#}");
    }

    match run {
        CheckRun::Skipped => Ok(ExitCode::SUCCESS),
        CheckRun::Reported(report) => {
            for (name, err) in &report.failed {
                eprintln!("{name}: check failed: {err}");
            }
            if report.outdated.is_empty() {
                println!("all {} installed plugin(s) are up to date", report.checked - report.failed.len());
            } else if options.mode != CheckMode::Prompt {
                println!("outdated: {}", report.outdated.join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }
        CheckRun::Updated(report, batch) => {
            for (name, err) in &report.failed {
                eprintln!("{name}: check failed: {err}");
            }
            Ok(print_report(&batch))
        }
    }
}

fn run_list(config: &AppConfig, git: Arc<dyn GitGateway>) -> Result<ExitCode> {
    let mut manager = scan(config, git.as_ref());
    check::probe_inventory(
        &mut manager,
        git.as_ref(),
        config.timeouts().status_check,
        config.check_concurrency(),
    );

    for plugin in &manager.plugins {
        println!("{:<32} {}", plugin.spec.name, plugin.status.label());
    }
    if !manager.orphans.is_empty() {
        println!();
        println!("not declared:");
        for orphan in &manager.orphans {
            println!("  {}", orphan.path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_tui(config: AppConfig, git: Arc<dyn GitGateway>, hooks: Arc<dyn Hooks>) -> Result<()> {
    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, config, git, hooks);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    config: AppConfig,
    git: Arc<dyn GitGateway>,
    hooks: Arc<dyn Hooks>,
) -> Result<()> {
    let (tx, rx) = mpsc::channel::<Msg>();
    let driver = Driver::new(
        tx.clone(),
        git.clone(),
        hooks,
        catalog(),
        config.timeouts(),
        config.check_concurrency(),
    );
    let mut app = App::new(config, git);
    driver.spawn_all(app.startup());

    // Input thread: terminal events become messages.
    let tx_input = tx.clone();
    thread::spawn(move || {
        loop {
            if let Ok(event) = event::read() {
                let msg = match event {
                    Event::Key(k) => Msg::Key(k),
                    Event::Resize(w, h) => Msg::Resize(w, h),
                    _ => continue,
                };
                if tx_input.send(msg).is_err() {
                    break;
                }
            }
        }
    });

    // Tick thread drives spinners while work is outstanding.
    let tx_tick = tx;
    thread::spawn(move || {
        loop {
            thread::sleep(Duration::from_millis(120));
            if tx_tick.send(Msg::Tick).is_err() {
                break;
            }
        }
    });

    terminal.draw(|f| app.view(f))?;

    // ── Main event loop ──
    loop {
        // Batch-drain all pending messages
        let first = rx.recv()?;
        driver.spawn_all(app.update(first));

        while let Ok(msg) = rx.try_recv() {
            driver.spawn_all(app.update(msg));
        }

        if app.should_quit {
            tracing::info!("muxpack exiting");
            break;
        }

        terminal.draw(|f| app.view(f))?;
    }

    Ok(())
}

//! Plugin updater CLI.
//!
//! Reads desired plugins from `.updater.toml`, compares them with the
//! installed state (`.updater/installed.json`) and installs, upgrades or
//! removes plugin and tool artifacts under the install root.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use updater::core::task::Task;
use updater::exit_codes;
use updater::logging;
use updater::session::{PlanMode, Session};

#[derive(Parser)]
#[command(name = "updater", version, about = "Install and update code-quality plugins")]
struct Cli {
    /// Project root; relative config paths are resolved against it.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (default `<root>/.updater.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the planned tasks without executing them.
    Plan {
        /// Re-resolve from catalogs instead of the lock file.
        #[arg(long)]
        update: bool,
        /// Reinstall and re-verify everything.
        #[arg(long)]
        force_reinstall: bool,
    },
    /// Install the locked versions (or resolve from catalogs when unlocked).
    Install {
        #[arg(long)]
        dry_run: bool,
    },
    /// Re-resolve from catalogs and apply the changes.
    Update {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force_reinstall: bool,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::for_error(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let session = Session::load(&cli.root, cli.config.as_deref())?;
    match cli.command {
        Command::Plan {
            update,
            force_reinstall,
        } => {
            let mode = if update {
                PlanMode::Update { force_reinstall }
            } else {
                PlanMode::Install { force_reinstall }
            };
            print_plan(&session.plan(mode)?);
            Ok(())
        }
        Command::Install { dry_run } => apply(
            &session,
            PlanMode::Install {
                force_reinstall: false,
            },
            dry_run,
        ),
        Command::Update {
            dry_run,
            force_reinstall,
        } => apply(&session, PlanMode::Update { force_reinstall }, dry_run),
    }
}

fn apply(session: &Session, mode: PlanMode, dry_run: bool) -> Result<()> {
    let tasks = session.plan(mode)?;
    if dry_run {
        print_plan(&tasks);
        return Ok(());
    }
    let outcome = session.apply(&tasks, &mut |task| {
        if !task.is_keep() {
            println!("{}", task.progress_description());
        }
    })?;
    println!("{} plugin(s) installed", outcome.installed.len());
    Ok(())
}

fn print_plan(tasks: &[Task]) {
    let changes: Vec<&Task> = tasks.iter().filter(|task| !task.is_keep()).collect();
    if changes.is_empty() {
        println!("Nothing to do");
        return;
    }
    for task in changes {
        println!("{}", task.purpose_description());
    }
}

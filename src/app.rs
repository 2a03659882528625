use chrono::Local;
use clap::Parser;
use std::env;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

use crate::cli::{Cli, CliCommand, TargetArgs};
use crate::config::{
    find_config_file, resolve_template, ConfigSource, LoadedConfig, CONFIG_FILE_NAME,
    DEFAULT_CONFIG,
};
use crate::error::Error;
use crate::git::GitRepo;
use crate::history::commit_or_latest;
use crate::log_view::{render_check_failures, render_log, unfinished_steps};
use crate::logger;
use crate::step_runner::{run_step, RunContext, Services};
use crate::store::StatusStore;
use crate::tui;
use crate::watch::{quit, watch, Quit};

const LOG_IGNORE_ENTRY: &str = ".logs/";
const FOLLOW_INTERVAL: Duration = Duration::from_secs(1);
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

fn home_dir() -> Result<PathBuf, Quit> {
    env::var("HOME").map(PathBuf::from).map_err(|_| {
        let message = "Missing HOME environment variable";
        eprintln!("{}", message);
        quit(message, 1)
    })
}

fn current_dir() -> Result<PathBuf, Quit> {
    env::current_dir().map_err(|err| {
        eprintln!("Failed to read current directory: {}", err);
        quit("current_dir", 1)
    })
}

/// Report a precondition failure to the user and turn it into exit code 1.
fn fail(err: Error) -> Quit {
    eprintln!("{}", err);
    quit(&err.to_string(), 1)
}

fn bootstrap_config_error(cwd: &Path) -> String {
    format!(
        "No {} found in {} or any parent directory.\n\n\
To create one here, run:\n\
  vigil init",
        CONFIG_FILE_NAME,
        cwd.display()
    )
}

pub(crate) fn resolve_config_source(cli: &Cli) -> Result<ConfigSource, Quit> {
    if let Some(path) = &cli.config {
        if !path.is_file() {
            eprintln!("Missing config file: {}", path.display());
            return Err(quit(&format!("missing_config:{}", path.display()), 1));
        }
        return Ok(ConfigSource::File(path.clone()));
    }

    let cwd = current_dir()?;
    if let Some(name) = &cli.template {
        let home = home_dir()?;
        let path = resolve_template(&home, name).map_err(fail)?;
        return Ok(ConfigSource::Template {
            name: name.clone(),
            path,
            workdir: cwd,
        });
    }

    match find_config_file(&cwd) {
        Some(path) => Ok(ConfigSource::File(path)),
        None => {
            eprintln!("{}", bootstrap_config_error(&cwd));
            Err(quit("missing_config", 1))
        }
    }
}

fn load(source: &ConfigSource) -> Result<LoadedConfig, Quit> {
    let loaded = source.load().map_err(fail)?;
    loaded.emit_warnings();
    Ok(loaded)
}

fn install_interrupt_handler() -> Arc<AtomicBool> {
    let interrupt_flag = Arc::new(AtomicBool::new(false));
    if let Err(err) = ctrlc::set_handler({
        let interrupt_flag = Arc::clone(&interrupt_flag);
        move || {
            interrupt_flag.store(true, Ordering::SeqCst);
        }
    }) {
        eprintln!("Failed to set interrupt handler: {}", err);
    }
    interrupt_flag
}

fn check_interrupted(interrupt: &AtomicBool) -> Result<(), Quit> {
    if interrupt.load(Ordering::SeqCst) {
        return Err(quit("interrupted", 130));
    }
    Ok(())
}

fn ensure_gitignore_entry(dir: &Path) -> std::io::Result<bool> {
    let path = dir.join(".gitignore");
    if !path.is_file() {
        return Ok(false);
    }
    let content = fs::read_to_string(&path)?;
    let present = content
        .lines()
        .map(str::trim)
        .any(|line| line == LOG_IGNORE_ENTRY || line == ".logs");
    if present {
        return Ok(false);
    }
    let mut file = OpenOptions::new().append(true).open(&path)?;
    if !content.is_empty() && !content.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{}", LOG_IGNORE_ENTRY)?;
    Ok(true)
}

fn run_init(cli: &Cli) -> Result<(), Quit> {
    let cwd = current_dir()?;
    let target = match &cli.config {
        Some(path) => path.clone(),
        None => {
            if let Some(existing) = find_config_file(&cwd) {
                println!("Config already exists: {}", existing.display());
                return Ok(());
            }
            cwd.join(CONFIG_FILE_NAME)
        }
    };
    if target.exists() {
        println!("Config already exists: {}", target.display());
        return Ok(());
    }

    fs::write(&target, DEFAULT_CONFIG).map_err(|err| {
        fail(Error::io("Failed to write config", &target, err))
    })?;
    println!("Wrote {}", target.display());

    let dir = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(cwd.as_path());
    match ensure_gitignore_entry(dir) {
        Ok(true) => println!("Added {} to {}", LOG_IGNORE_ENTRY, dir.join(".gitignore").display()),
        Ok(false) => {}
        Err(err) => eprintln!("Failed to update .gitignore: {}", err),
    }
    Ok(())
}

fn run_steps(cli: &Cli, target: &TargetArgs) -> Result<(), Quit> {
    let source = resolve_config_source(cli)?;
    let loaded = load(&source)?;
    let steps = loaded.select_steps(target.step.as_deref()).map_err(fail)?;
    let repo = GitRepo::new(loaded.repo_dir());
    let commit = commit_or_latest(&repo, target.hash.as_deref()).map_err(fail)?;
    let services = Services {
        history: &repo,
        store: &repo,
        provisioner: &repo,
    };
    let ctx = RunContext::from_config(&loaded, cli.quiet);
    let interrupt = install_interrupt_handler();

    let names: Vec<&str> = steps.iter().map(|step| step.name.as_str()).collect();
    // `run` always runs: earlier results for the selected steps are discarded.
    repo.clear(&commit.hash, &names).map_err(fail)?;
    info!(hash = %commit.hash, steps = ?names, "running steps");

    for step in &steps {
        check_interrupted(&interrupt)?;
        let result = run_step(step, &commit, services, &ctx).map_err(fail)?;
        if result.failed() && loaded.config.fail_fast {
            error!(step = %step.name, "fail fast enabled, stopping");
            break;
        }
    }

    let statuses = repo.get(&commit.hash).map_err(fail)?;
    if statuses.all_succeeded(names.iter().copied()) {
        info!(hash = %commit.hash, "all steps succeeded");
        Ok(())
    } else {
        let unfinished = unfinished_steps(&statuses, &names);
        eprint!("{}", render_check_failures(&unfinished));
        Err(quit(&format!("steps_failed:{}", commit.hash), 1))
    }
}

fn run_check(cli: &Cli, target: &TargetArgs) -> Result<(), Quit> {
    let source = resolve_config_source(cli)?;
    let loaded = load(&source)?;
    let steps = loaded.select_steps(target.step.as_deref()).map_err(fail)?;
    let repo = GitRepo::new(loaded.repo_dir());
    let commit = commit_or_latest(&repo, target.hash.as_deref()).map_err(fail)?;
    info!(hash = %commit.hash, "checking statuses");

    let names: Vec<&str> = steps.iter().map(|step| step.name.as_str()).collect();
    let statuses = repo.get(&commit.hash).map_err(fail)?;
    let unfinished = unfinished_steps(&statuses, &names);
    if unfinished.is_empty() {
        println!("{} {} succeeded for {}", statuses, names.join(", "), commit.hash);
        return Ok(());
    }
    print!("{}", render_check_failures(&unfinished));
    Err(quit(&format!("check_failed:{}", commit.hash), 1))
}

fn run_log(cli: &Cli, follow: bool) -> Result<(), Quit> {
    let source = resolve_config_source(cli)?;
    let interrupt = if follow {
        Some(install_interrupt_handler())
    } else {
        None
    };

    loop {
        let loaded = load(&source)?;
        let repo = GitRepo::new(loaded.repo_dir());
        let entries = repo
            .log_entries(loaded.config.history_window)
            .map_err(fail)?;
        let screen = render_log(&entries, &loaded.step_names(), Local::now());

        let Some(interrupt) = &interrupt else {
            print!("{}", screen);
            return Ok(());
        };
        print!("{}{}", CLEAR_SCREEN, screen);
        let _ = std::io::stdout().flush();
        thread::sleep(FOLLOW_INTERVAL);
        check_interrupted(interrupt)?;
    }
}

fn run_watch(cli: &Cli) -> Result<(), Quit> {
    let source = resolve_config_source(cli)?;
    load(&source)?;
    let interrupt = install_interrupt_handler();
    watch(&source, cli.quiet, &interrupt)
}

fn run_tui(cli: &Cli) -> Result<(), Quit> {
    let source = resolve_config_source(cli)?;
    let loaded = load(&source)?;
    let output = loaded.log_dir().join("watch.log");
    tui::run(&source, &output).map_err(|err| {
        eprintln!("Dashboard failed: {}", err);
        quit(&format!("tui:{err}"), 1)
    })
}

pub(crate) fn run_with_cli(cli: Cli) -> Result<(), Quit> {
    // The dashboard owns the terminal; keep tracing to warnings and above.
    let quiet = cli.quiet || matches!(cli.command, CliCommand::Tui);
    logger::init(cli.debug, quiet);

    match &cli.command {
        CliCommand::Init => run_init(&cli),
        CliCommand::Run(target) => run_steps(&cli, target),
        CliCommand::Check(target) => run_check(&cli, target),
        CliCommand::Watch => run_watch(&cli),
        CliCommand::Log { follow } => run_log(&cli, *follow),
        CliCommand::Tui => run_tui(&cli),
    }
}

pub(crate) fn run_with_args(args: Vec<OsString>) -> Result<(), Quit> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            // clap's `Error::print()` uses termcolor and can bypass Rust's test output
            // capturing. Rendering it ourselves keeps CLI errors capture-friendly.
            eprintln!("{err}");
            return Err(Quit {
                code: err.exit_code(),
                reason: "cli_parse".to_string(),
            });
        }
    };
    run_with_cli(cli)
}

pub(crate) fn main_with_args(args: Vec<OsString>) -> ExitCode {
    match run_with_args(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(quit) => quit.exit_code(),
    }
}

pub(crate) fn main() -> ExitCode {
    main_with_args(env::args_os().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn gitignore_gets_log_dir_once() {
        let dir = TempDir::new().expect("temp dir");
        assert!(!ensure_gitignore_entry(dir.path()).expect("no gitignore"));

        let path = dir.path().join(".gitignore");
        fs::write(&path, "target").expect("write gitignore");
        assert!(ensure_gitignore_entry(dir.path()).expect("append"));
        assert!(!ensure_gitignore_entry(dir.path()).expect("already present"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "target\n.logs/\n");
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let cli = Cli::try_parse_from(["vigil", "--config", "/nonexistent/vigil.yml", "check"])
            .expect("parse");
        let quit = resolve_config_source(&cli).expect_err("missing config");
        assert_eq!(quit.code, 1);
    }

    #[test]
    fn help_exits_zero() {
        let quit = run_with_args(vec![OsString::from("vigil"), OsString::from("--help")])
            .expect_err("help short-circuits");
        assert_eq!(quit.code, 0);
    }
}

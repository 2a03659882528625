use std::process::ExitCode;

mod app;
mod cli;
mod commit;
mod config;
mod error;
mod git;
mod history;
mod lock;
mod log_view;
mod logger;
mod shell;
mod staleness;
mod status;
mod step_runner;
mod store;
mod tui;
mod watch;
mod workspace;


fn main() -> ExitCode {
    app::main()
}

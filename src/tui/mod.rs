//! Terminal dashboard: recent commits with live step status, plus a
//! supervised background `vigil watch`.

mod app;
mod daemon;
mod ui;

use crossterm::event::{self, Event, KeyEventKind};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::ConfigSource;

use app::App;
use daemon::WatchDaemon;

const REFRESH_INTERVAL: Duration = Duration::from_millis(300);
const INPUT_POLL: Duration = Duration::from_millis(100);

/// Run the dashboard until the user quits. `watch_output` receives the
/// background watcher's stdout and stderr.
pub(crate) fn run(source: &ConfigSource, watch_output: &Path) -> io::Result<()> {
    let mut daemon = WatchDaemon::for_config(source, watch_output.to_path_buf())?;
    daemon.start()?;

    let mut terminal = ratatui::init();
    let result = run_app(&mut terminal, source, &mut daemon);
    ratatui::restore();
    daemon.stop();
    result
}

fn run_app(
    terminal: &mut ratatui::DefaultTerminal,
    source: &ConfigSource,
    daemon: &mut WatchDaemon,
) -> io::Result<()> {
    let mut app = App::new(source.clone());
    let mut last_refresh = Instant::now();
    app.refresh_data();
    app.watch_running = daemon.is_running();

    loop {
        terminal.draw(|f| ui::render(f, &app))?;

        if event::poll(INPUT_POLL)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    app.handle_key(key);
                }
                _ => {}
            }
        }

        if app.restart_requested {
            app.restart_requested = false;
            if let Err(err) = daemon.restart() {
                app.error = Some(format!("failed to restart watch: {err}"));
            }
        }

        if last_refresh.elapsed() >= REFRESH_INTERVAL {
            app.refresh_data();
            app.watch_running = daemon.is_running();
            last_refresh = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

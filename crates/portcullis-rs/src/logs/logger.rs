//! Logger configuration and structured output formatting.

use chrono::Local;
use env_logger::Builder;
use std::env;
use std::io::Write;

/// Configure and initialize the application's logging system.
///
/// Structured single-line output:
///
/// ```text
/// Aug 01 25 02:30:45 PM | [INFO ] | portcullis_rs::middleware::logger | GET /users -> 200 in 3ms
/// ```
///
/// The level is coloured unless `NO_COLOR` is set, which structured log
/// collectors usually want. `RUST_LOG` controls filtering as usual; the
/// default level is Info.
///
/// Call once at startup, before the first log line.
pub fn configure_logger() {
    let no_color = env::var("NO_COLOR").is_ok();

    Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(move |buf, record| {
            let level = record.level();
            let level_display = if no_color {
                format!("[{:5}]", level)
            } else {
                let color = match level {
                    log::Level::Error => "\x1b[31m", // red
                    log::Level::Warn => "\x1b[33m",  // yellow
                    log::Level::Info => "\x1b[32m",  // green
                    log::Level::Debug => "\x1b[34m", // blue
                    log::Level::Trace => "\x1b[35m", // magenta
                };
                format!("{}[{:5}]\x1b[0m", color, level)
            };

            writeln!(
                buf,
                "{} | {} | {} | {}",
                Local::now().format("%b %d %y %I:%M:%S %p"),
                level_display,
                record.target(),
                record.args(),
            )
        })
        .init();
}

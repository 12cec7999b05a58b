//! Logger setup built on `fern`: a concise colored console format and a
//! detailed file format, with sensitive values redacted from both.

use std::path::Path;

/// Simplifies file paths by extracting relevant parts from cargo
/// registry paths.
fn simplify_file_path(file_path: &str) -> String {
    if file_path.contains("flowspeed") {
        if let Some(pos) = file_path.rfind("/src/") {
            return file_path[(pos + 1)..].to_string();
        }
    }

    if let Some((_, suffix)) = file_path.split_once(".cargo/registry/src/") {
        if let Some(first_slash) = suffix.find('/') {
            suffix[(first_slash + 1)..].to_string()
        } else {
            suffix.to_string()
        }
    } else {
        file_path.to_string()
    }
}

/// Formats log messages for console output with a simplified format.
pub fn console_log_formatter(
    out: fern::FormatCallback,
    message: &std::fmt::Arguments,
    record: &log::Record,
) {
    let level = record.level();
    let level_color = match level {
        log::Level::Error => "\x1B[31m",
        log::Level::Warn => "\x1B[33m",
        log::Level::Info => "\x1B[32m",
        log::Level::Debug => "\x1B[0m",
        log::Level::Trace => "\x1B[35m",
    };
    let reset = "\x1B[0m";

    out.finish(format_args!(
        "{}{}[{}] {}:{} {}{}",
        level_color,
        chrono::Local::now().format("%H:%M:%S.%3f "),
        get_level(level),
        simplify_file_path(record.file().unwrap_or("")),
        record.line().unwrap_or(0),
        replace_sensitive_info(message.to_string().as_str()),
        reset,
    ))
}

/// Formats log messages for file output with full date and location.
pub fn file_log_formatter(
    out: fern::FormatCallback,
    message: &std::fmt::Arguments,
    record: &log::Record,
) {
    out.finish(format_args!(
        "{}[{}] {}:{} {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S.%3f"),
        get_level(record.level()),
        simplify_file_path(record.file().unwrap_or("")),
        record.line().unwrap_or(0),
        replace_sensitive_info(message.to_string().as_str()),
    ))
}

/// Replaces values of sensitive `key=value` pairs (api keys, tokens,
/// passwords) with `***` before they reach any sink.
fn replace_sensitive_info(message: &str) -> String {
    let sensitive_keywords = [
        "api_key", "key", "password", "passwd", "secret", "token", "api",
    ];
    let mut sanitized_message = message.to_string();

    for keyword in sensitive_keywords {
        if let Some(start) = sanitized_message.find(keyword) {
            if let Some(equals_pos) = sanitized_message[start..].find('=') {
                let value_start = start + equals_pos + 1;
                let value_end = sanitized_message[value_start..]
                    .find('&')
                    .map(|pos| value_start + pos)
                    .unwrap_or(sanitized_message.len());
                sanitized_message.replace_range(value_start..value_end, "***");
            }
        }
    }

    sanitized_message
}

/// Sets up the logger with console output and an optional log file.
///
/// # Errors
/// * Returns `fern::InitError` if the file cannot be created or a
///   logger was already installed.
pub fn setup_logger(log_file: Option<&Path>) -> Result<(), fern::InitError> {
    let mut dispatcher = fern::Dispatch::new().level(log::LevelFilter::Debug).chain(
        fern::Dispatch::new()
            .level(log::LevelFilter::Debug)
            .format(console_log_formatter)
            .chain(std::io::stdout()),
    );

    if let Some(path) = log_file {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        dispatcher = dispatcher.chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Info)
                .format(file_log_formatter)
                .chain(fern::log_file(path)?),
        );
    }

    dispatcher.apply()?;
    Ok(())
}

fn get_level(level: log::Level) -> String {
    match level {
        log::Level::Error => "E",
        log::Level::Warn => "W",
        log::Level::Info => "I",
        log::Level::Debug => "D",
        log::Level::Trace => "T",
    }
    .to_string()
}

/// Set up a console-only logger for tests. Repeated calls are no-ops.
#[cfg(test)]
pub fn setup_test_logger() {
    let _ = fern::Dispatch::new()
        .level(log::LevelFilter::Debug)
        .format(console_log_formatter)
        .chain(std::io::stdout())
        .apply();
}

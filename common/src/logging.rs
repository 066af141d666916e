// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::str::FromStr;

use anyhow::Context;
use slog::Drain;

/// How log records should be rendered.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// Unstructured, one line per record, meant for a terminal.
    #[default]
    Human,
    /// Bunyan-style json, one object per record.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("invalid log format: {s}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

fn build_drain<W>(
    writer: W,
    log_format: LogFormat,
) -> slog::Fuse<slog_async::Async>
where
    W: io::Write + Send + 'static,
{
    match log_format {
        LogFormat::Human => {
            let decorator = slog_term::PlainDecorator::new(writer);
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            slog_async::Async::new(drain)
                .chan_size(0x2000)
                .build()
                .fuse()
        }
        LogFormat::Json => {
            let drain = slog_bunyan::default(writer).fuse();
            slog_async::Async::new(drain)
                .chan_size(0x2000)
                .build()
                .fuse()
        }
    }
}

/// Build the root logger for a program.
///
/// Records are written to `log_file` if one is named, and to stderr
/// otherwise.  Standard output is left alone, since the tools built on this
/// crate report their results there.
///
/// The returned logger is backed by an async drain.  Pending records are
/// flushed when the last clone of the logger is dropped.
pub fn init(
    name: &str,
    log_file: &Option<String>,
    log_format: LogFormat,
) -> anyhow::Result<slog::Logger> {
    let drain = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            build_drain(file, log_format)
        }
        None => build_drain(io::stderr(), log_format),
    };

    Ok(slog::Logger::root(drain, slog::o!("unit" => name.to_string())))
}

/// A logger that drops everything, for callers that don't care.
pub fn discard() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

#[cfg(test)]
mod tests {
    use super::LogFormat;

    #[test]
    fn test_parse_format() {
        assert_eq!("human".parse::<LogFormat>(), Ok(LogFormat::Human));
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_to_file() {
        let path = std::env::temp_dir()
            .join(format!("common-logging-{}.log", std::process::id()));
        let name = path.to_string_lossy().to_string();

        let log = super::init("test", &Some(name.clone()), LogFormat::Json)
            .unwrap();
        slog::info!(log, "hello"; "port" => 144);
        drop(log);

        let contents = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(contents.contains("\"msg\":\"hello\""));
        assert!(contents.contains("\"port\":144"));
    }
}

use crate::config::{LogEntry, LogsConfig};
use crate::errors::ConfigError;
use std::fs::OpenOptions;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::fmt::{format, layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter, EnvFilter, Layer};

const KMSG: &str = "/dev/kmsg";

macro_rules! parse_filter {
    ($layers:expr, $layer:expr, $filter:expr) => {{
        if let Some(f) = $filter {
            $layers.push($layer.with_filter(f).boxed());
        } else {
            $layers.push($layer.boxed());
        }
    }};
}

macro_rules! parse_layer {
    ($layers:expr, $writer:expr, $format:expr, $filter:expr) => {{
        let s_format = match $format {
            Some(f) => f.as_str(),
            None => "full",
        };

        match s_format.trim().to_ascii_lowercase().as_str() {
            "compact" => {
                let layer = layer()
                    .with_writer($writer)
                    .with_ansi(false)
                    .event_format(format().with_target(false).without_time().compact());
                parse_filter!($layers, layer, $filter);
            }
            "pretty" => {
                let layer = layer()
                    .with_writer($writer)
                    .event_format(format().with_target(true).pretty());
                parse_filter!($layers, layer, $filter);
            }
            "json" => {
                let layer = layer().with_writer($writer).event_format(
                    format()
                        .with_target(true)
                        .json()
                        .flatten_event(true),
                );
                parse_filter!($layers, layer, $filter);
            }
            _ => {
                let layer = layer()
                    .with_writer($writer)
                    .with_ansi(false)
                    .event_format(format().with_target(false));
                parse_filter!($layers, layer, $filter);
            }
        }
    }};
}

/// Holds the non-blocking writer guards. Dropping it flushes every channel,
/// which must happen before the process image is replaced.
pub struct LoaderLogs {
    _guards: Vec<WorkerGuard>,
}

impl LoaderLogs {
    fn parse_log_entry(entry: &LogEntry) -> Result<(NonBlocking, WorkerGuard), anyhow::Error> {
        match entry.target.as_str() {
            "stderr" => {
                let r = tracing_appender::non_blocking(std::io::stderr());
                Ok(r)
            }
            "stdout" => {
                let r = tracing_appender::non_blocking(std::io::stdout());
                Ok(r)
            }
            "kmsg" => {
                // init has not started logd yet, the kernel log is all we get
                match OpenOptions::new().write(true).open(KMSG) {
                    Ok(kmsg) => Ok(tracing_appender::non_blocking(kmsg)),
                    Err(e) => {
                        eprintln!("netbpfload: cannot open {}: {}, logging to stderr", KMSG, e);
                        Ok(tracing_appender::non_blocking(std::io::stderr()))
                    }
                }
            }
            "file" => {
                let directory = match &entry.directory {
                    Some(d) => d.as_str(),
                    None => {
                        return Err(ConfigError::MissingAttribute("directory".to_string()).into())
                    }
                };

                let prefix = match &entry.prefix {
                    Some(p) => p.as_str(),
                    None => return Err(ConfigError::MissingAttribute("prefix".to_string()).into()),
                };

                let s_rotation = match &entry.rotation {
                    Some(p) => p.as_str(),
                    None => "never",
                };

                let rotation = match s_rotation.trim().to_ascii_lowercase().as_str() {
                    "hourly" => rolling::Rotation::HOURLY,
                    "daily" => rolling::Rotation::DAILY,
                    "never" => rolling::Rotation::NEVER,
                    _ => {
                        return Err(ConfigError::InvalidAttribute {
                            attribute: "Invalid log rotation",
                            value: s_rotation.to_string(),
                        }
                        .into());
                    }
                };

                let max_files = entry.max_files.unwrap_or(5);

                let appender = rolling::RollingFileAppender::builder()
                    .rotation(rotation)
                    .filename_prefix(prefix)
                    .max_log_files(max_files)
                    .build(directory)?;
                let r = tracing_appender::non_blocking(appender);

                Ok(r)
            }
            _ => Err(ConfigError::InvalidAttribute {
                attribute: "Invalid log target",
                value: entry.target.to_string(),
            }
            .into()),
        }
    }

    pub fn new(logs_conf: &LogsConfig) -> Result<LoaderLogs, anyhow::Error> {
        let mut layers = Vec::new();
        let mut guards = Vec::new();

        if logs_conf.default.enable {
            let (w, guard) = LoaderLogs::parse_log_entry(&logs_conf.default)?;
            guards.push(guard);

            // with a dedicated error channel, errors go only there
            let split_errors = logs_conf.errors.as_ref().is_some_and(|e| e.enable);
            let f = filter::filter_fn(move |metadata| {
                !(split_errors && metadata.target() == "error")
            });
            parse_layer!(layers, w, &logs_conf.default.format, Some(f));
        }

        if let Some(ref e) = logs_conf.errors {
            if e.enable {
                let (w, guard) = LoaderLogs::parse_log_entry(e)?;
                guards.push(guard);

                let f = filter::filter_fn(|metadata| metadata.target() == "error");
                parse_layer!(layers, w, &e.format, Some(f));
            }
        }

        let env_filter = EnvFilter::builder()
            .with_default_directive(filter::LevelFilter::INFO.into())
            .from_env_lossy();

        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter)
            .try_init()?;

        Ok(LoaderLogs { _guards: guards })
    }

    pub fn flush(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(target: &str) -> LogEntry {
        LogEntry {
            enable: true,
            target: target.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn unknown_target_is_rejected() {
        let r = LoaderLogs::parse_log_entry(&entry("syslog"));
        assert!(r.is_err());
    }

    #[test]
    fn file_target_requires_directory_and_prefix() {
        assert!(LoaderLogs::parse_log_entry(&entry("file")).is_err());

        let mut e = entry("file");
        e.directory = Some(std::env::temp_dir().display().to_string());
        assert!(LoaderLogs::parse_log_entry(&e).is_err());

        e.prefix = Some("netbpfload".to_string());
        e.rotation = Some("weekly".to_string());
        assert!(LoaderLogs::parse_log_entry(&e).is_err());
    }

    #[test]
    fn stderr_target() {
        assert!(LoaderLogs::parse_log_entry(&entry("stderr")).is_ok());
    }

    #[test]
    fn kmsg_target_always_has_a_writer() {
        // falls back to stderr where /dev/kmsg is not writable
        assert!(LoaderLogs::parse_log_entry(&entry("kmsg")).is_ok());
    }
}

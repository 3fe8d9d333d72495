extern crate serde_derive;

mod apex;
mod bootstrap;
mod config;
mod elf;
mod handoff;
mod loader;
mod logs;
mod pindir;
mod probe;
mod props;
mod sysctl;
#[cfg(test)]
mod testutil;

use anyhow::Context;
use bootstrap::{Bootstrap, Completion, DevicePlatform};
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use config::LoaderConfig;
use elf::EbpfObjectLoader;
use logs::LoaderLogs;
use netbpfload::errors::LoaderError;
use netbpfload::{bpf, errors};
use probe::Capabilities;
use props::AndroidProperties;
use std::process::ExitCode;
use tracing::{debug, error};

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum Stage {
    /// Re-entry from the platform loader: mark programs as loaded
    Done,
}

#[derive(Parser)]
#[command(name = "netbpfload")]
#[command(about = "Network BPF loader", long_about = None)]
struct Cli {
    /// Directory holding netbpfload.json5
    #[arg(long, value_name = "DIR")]
    config_dir: Option<String>,
    #[arg(value_enum)]
    stage: Option<Stage>,
}

/// Exit status for a command line clap rejected. Never 2, which init reads
/// as a critical load failure.
fn usage_status(e: &clap::Error) -> u8 {
    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

fn exit_status(e: &anyhow::Error) -> u8 {
    error!(target: "error", "{:#}", e);
    e.downcast_ref::<LoaderError>()
        .map_or(1, LoaderError::exit_code)
}

/// Bumps the memlock rlimit for kernels without memcg based accounting of
/// bpf memory.
fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    // SAFETY: rlim is a valid rlimit for the duration of the call
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {}", ret);
    }
}

fn load(config: &LoaderConfig) -> Result<Completion, anyhow::Error> {
    bump_memlock_rlimit();

    let caps = Capabilities::probe(&AndroidProperties, &config.device);
    let platform = DevicePlatform::new(&config.loader.bpffs_root);
    let loader = EbpfObjectLoader::new(&config.loader.bpffs_root);
    let locations = config.loader.locations();

    let completion = Bootstrap::new(&caps, &platform, &loader, &locations, &config.loader).run()?;
    Ok(completion)
}

fn setup(config_dir: Option<&str>) -> Result<(LoaderConfig, LoaderLogs), anyhow::Error> {
    let config = config::load_config(config_dir).context("invalid configuration")?;
    let logs = LoaderLogs::new(&config.logs).context("cannot set up logging")?;
    Ok((config, logs))
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(usage_status(&e));
        }
    };

    let setup = setup(cli.config_dir.as_deref());

    if cli.stage == Some(Stage::Done) {
        // the property must be set even without config or logs
        if let Err(e) = &setup {
            eprintln!("netbpfload: {:#}", e);
        }
        let status = match bootstrap::finalize(&AndroidProperties) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                if setup.is_err() {
                    eprintln!("netbpfload: {}", e);
                }
                ExitCode::from(exit_status(&anyhow::Error::from(e)))
            }
        };
        drop(setup);
        return status;
    }

    let (config, logs) = match setup {
        Ok(s) => s,
        Err(e) => {
            eprintln!("netbpfload: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match load(&config) {
        Ok(Completion::Finished) => ExitCode::SUCCESS,
        Ok(Completion::HandOff(program)) => {
            let hand_off = handoff::from_config(&config.loader.hand_off);
            logs.flush();
            match hand_off.exec(&program) {
                Ok(never) => match never {},
                Err(e) => {
                    // the log writers are gone by now
                    let e = LoaderError::from(e);
                    eprintln!("netbpfload: FATAL: {}", e);
                    ExitCode::from(e.exit_code())
                }
            }
        }
        Err(e) => ExitCode::from(exit_status(&e)),
    }
}

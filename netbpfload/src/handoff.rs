use crate::errors::HandOffError;
use nix::unistd::execve;
use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::process::{self, Command};
use tracing::info;

/// Replaces the running loader with another program. Never returns on
/// success.
pub(crate) trait HandOff {
    fn exec(&self, program: &Path) -> Result<Infallible, HandOffError>;
}

/// `execve(program, [program], environ)`.
pub(crate) struct ExecHandOff;

/// Runs `program` as a child and exits with its exit code, for hosts where
/// the process image must not be replaced.
pub(crate) struct SpawnHandOff;

fn c_string(bytes: &[u8], program: &Path) -> Result<CString, HandOffError> {
    CString::new(bytes).map_err(|_| HandOffError::Nul(program.to_path_buf()))
}

fn environ(program: &Path) -> Result<Vec<CString>, HandOffError> {
    std::env::vars_os()
        .map(|(k, v)| {
            let mut kv = k.as_bytes().to_vec();
            kv.push(b'=');
            kv.extend_from_slice(v.as_bytes());
            c_string(&kv, program)
        })
        .collect()
}

impl HandOff for ExecHandOff {
    fn exec(&self, program: &Path) -> Result<Infallible, HandOffError> {
        let path = c_string(program.as_os_str().as_bytes(), program)?;
        let argv = [path.clone()];
        let env = environ(program)?;

        execve(&path, &argv, &env).map_err(|errno| HandOffError::Exec {
            path: program.to_path_buf(),
            errno,
        })
    }
}

impl HandOff for SpawnHandOff {
    fn exec(&self, program: &Path) -> Result<Infallible, HandOffError> {
        let status = Command::new(program)
            .status()
            .map_err(|source| HandOffError::Spawn {
                path: program.to_path_buf(),
                source,
            })?;
        info!("{} exited with {}", program.display(), status);
        process::exit(status.code().unwrap_or(1))
    }
}

/// Picks the hand-off named in the configuration; anything but `spawn`
/// replaces the process.
pub(crate) fn from_config(name: &str) -> Box<dyn HandOff> {
    match name {
        "spawn" => Box::new(SpawnHandOff),
        _ => Box::new(ExecHandOff),
    }
}

use crate::errors::SysctlError;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::error;

/// Writes `value` to a `/proc/sys` file in a single write. The value
/// carries its own trailing newline, matching `echo "1" > /proc/sys/...`.
pub(crate) fn write_proc_sys_file(path: &Path, value: &str) -> Result<(), SysctlError> {
    // std opens with O_CLOEXEC
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|source| SysctlError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let written = file
        .write(value.as_bytes())
        .map_err(|source| SysctlError::Write {
            path: path.to_path_buf(),
            value: value.to_string(),
            source,
        })?;

    if written != value.len() {
        return Err(SysctlError::ShortWrite {
            path: path.to_path_buf(),
            value: value.to_string(),
            len: value.len(),
            written,
        });
    }
    Ok(())
}

/// Same as [`write_proc_sys_file`], logging failures to the error channel.
pub(crate) fn write_proc_sys_file_logged(path: &Path, value: &str) -> Result<(), SysctlError> {
    write_proc_sys_file(path, value).inspect_err(|e| {
        error!(target: "error", "{} [{}]", e, e.errno());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestDir;
    use nix::errno::Errno;
    use std::fs;

    #[test]
    fn writes_value_with_newline() {
        let dir = TestDir::new("sysctl-write");
        let p = dir.write("bpf_jit_enable", "0\n");

        write_proc_sys_file(&p, "1\n").unwrap();
        assert_eq!(fs::read_to_string(&p).unwrap(), "1\n");
    }

    #[test]
    fn missing_node_preserves_errno() {
        let dir = TestDir::new("sysctl-missing");
        let err = write_proc_sys_file(&dir.path().join("unprivileged_bpf_disabled"), "0\n")
            .unwrap_err();

        assert!(matches!(err, SysctlError::Open { .. }));
        assert_eq!(err.errno(), Errno::ENOENT);
    }

    #[test]
    fn directory_is_not_writable() {
        let dir = TestDir::new("sysctl-dir");
        let err = write_proc_sys_file(dir.path(), "1\n").unwrap_err();
        assert_eq!(err.errno(), Errno::EISDIR);
    }
}

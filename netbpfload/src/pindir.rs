use crate::errors::PinDirError;
use nix::errno::Errno;
use nix::sys::stat::{umask, Mode};
use nix::unistd::mkdir;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Clears the umask for its lifetime.
struct UmaskGuard(Mode);

impl UmaskGuard {
    fn clear() -> UmaskGuard {
        UmaskGuard(umask(Mode::empty()))
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        umask(self.0);
    }
}

/// Creates the pin subdirectories under the bpf filesystem root.
pub(crate) struct PinDirs {
    root: PathBuf,
}

impl PinDirs {
    pub fn new<P: AsRef<Path>>(root: P) -> PinDirs {
        PinDirs {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self, prefix: &str) -> PathBuf {
        self.root.join(prefix)
    }

    /// Creates `<root>/<prefix>` as `S_ISVTX | 0777`. An existing directory
    /// is left as is. An empty prefix needs no directory.
    pub fn ensure(&self, prefix: &str) -> Result<(), PinDirError> {
        if prefix.is_empty() {
            return Ok(());
        }

        let path = self.path(prefix);
        let mode = Mode::S_ISVTX | Mode::S_IRWXU | Mode::S_IRWXG | Mode::S_IRWXO;

        let _umask = UmaskGuard::clear();
        match mkdir(&path, mode) {
            Ok(()) => {
                debug!("Created directory: {}", path.display());
                Ok(())
            }
            Err(Errno::EEXIST) => Ok(()),
            Err(errno) => {
                let e = PinDirError { path, errno };
                error!(target: "error", "{}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestDir;
    use serial_test::serial;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    #[serial(umask)]
    fn creates_sticky_world_writable_dir() {
        let root = TestDir::new("pindir-create");
        let dirs = PinDirs::new(root.path());

        dirs.ensure("tethering/").unwrap();
        let mode = fs::metadata(root.path().join("tethering")).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o1777);
    }

    #[test]
    #[serial(umask)]
    fn ensure_is_idempotent() {
        let root = TestDir::new("pindir-idempotent");
        let dirs = PinDirs::new(root.path());

        dirs.ensure("net_shared/").unwrap();
        let p = root.path().join("net_shared");
        fs::set_permissions(&p, fs::Permissions::from_mode(0o750)).unwrap();
        fs::write(p.join("map_x"), "").unwrap();

        dirs.ensure("net_shared/").unwrap();
        let mode = fs::metadata(&p).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o750);
        assert!(p.join("map_x").exists());
    }

    #[test]
    #[serial(umask)]
    fn empty_prefix_is_noop() {
        let dirs = PinDirs::new("/nonexistent/netbpfload");
        assert!(dirs.ensure("").is_ok());
    }

    #[test]
    #[serial(umask)]
    fn missing_root_fails_and_restores_umask() {
        let root = TestDir::new("pindir-missing");
        let dirs = PinDirs::new(root.path().join("absent"));

        let before = umask(Mode::from_bits_truncate(0o022));
        let err = dirs.ensure("loader").unwrap_err();
        let after = umask(before);

        assert_eq!(err.errno, Errno::ENOENT);
        assert_eq!(err.path, root.path().join("absent").join("loader"));
        assert_eq!(after, Mode::from_bits_truncate(0o022));
    }
}

use netbpfload_common::KernelVersion;
use nix::errno::Errno;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError<'a> {
    #[error("Invalid attribute: {attribute:?}, value: {value:?}")]
    InvalidAttribute { attribute: &'a str, value: String },
    #[error("Missing attribute: {0}")]
    MissingAttribute(String),
}

#[derive(Error, Debug)]
pub enum SysctlError {
    #[error("open('{path}', O_WRONLY | O_CLOEXEC) -> {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("write('{path}', {value:?}) -> {source}")]
    Write {
        path: PathBuf,
        value: String,
        source: io::Error,
    },
    #[error("write('{path}', {value:?}, {len}) -> short write [{written}]")]
    ShortWrite {
        path: PathBuf,
        value: String,
        len: usize,
        written: usize,
    },
}

impl SysctlError {
    pub fn errno(&self) -> Errno {
        match self {
            SysctlError::Open { source, .. } | SysctlError::Write { source, .. } => {
                Errno::from_raw(source.raw_os_error().unwrap_or(libc::EIO))
            }
            SysctlError::ShortWrite { .. } => Errno::EINVAL,
        }
    }
}

#[derive(Error, Debug)]
#[error("Failed to create directory: {path}, ret: {errno}")]
pub struct PinDirError {
    pub path: PathBuf,
    pub errno: Errno,
}

#[derive(Error, Debug)]
pub enum BpfError {
    #[error("bpf({cmd}) -> {errno}")]
    Syscall { cmd: &'static str, errno: Errno },
    #[error("buffer of {len} bytes does not match map {what} size {size}")]
    BufferSize {
        what: &'static str,
        len: usize,
        size: u32,
    },
    #[error("invalid pin path: {0}")]
    Path(String),
    #[error("read back {actual:?}, expected {expected:?}")]
    Readback { actual: Vec<u8>, expected: Vec<u8> },
    #[error("invalid map access mode {0:#x}")]
    AccessMode(u32),
    #[error("{call} -> {errno}")]
    Os { call: &'static str, errno: Errno },
    #[error("map info of {0} bytes lacks key and value sizes")]
    InfoTooShort(u32),
    #[error("map {what} size is {actual}, expected {expected}")]
    SizeMismatch {
        what: &'static str,
        actual: u32,
        expected: u32,
    },
}

impl BpfError {
    pub fn errno(&self) -> Errno {
        match self {
            BpfError::Syscall { errno, .. } | BpfError::Os { errno, .. } => *errno,
            BpfError::BufferSize { .. } | BpfError::Path(_) | BpfError::AccessMode(_) => {
                Errno::EINVAL
            }
            BpfError::Readback { .. } => Errno::EIO,
            BpfError::InfoTooShort(_) => Errno::EOPNOTSUPP,
            BpfError::SizeMismatch { .. } => Errno::EBADFD,
        }
    }
}

#[derive(Error, Debug)]
pub enum ObjectError {
    #[error("cannot read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid ELF object: {0}")]
    Elf(#[from] object::read::Error),
    #[error(transparent)]
    Ebpf(#[from] aya::BpfError),
    #[error("program {name}: {source}")]
    Program {
        name: String,
        source: aya::programs::ProgramError,
    },
    #[error("program {name}: unsupported program type")]
    UnsupportedProgram { name: String },
    #[error("pin {path}: {source}")]
    Pin {
        path: PathBuf,
        source: aya::pin::PinError,
    },
    #[error("pinned program {0} is not usable")]
    Unusable(PathBuf),
}

#[derive(Error, Debug)]
pub enum PropertyError {
    #[cfg(target_os = "android")]
    #[error("property {name}: value contains NUL")]
    Nul { name: String },
    #[error("__system_property_set({name}, {value}) -> {ret}")]
    Set { name: String, value: String, ret: i32 },
    #[error("{cmd} failed: {source}")]
    Command { cmd: &'static str, source: io::Error },
    #[error("{cmd} exited with {status}")]
    Status { cmd: &'static str, status: String },
}

#[derive(Error, Debug)]
pub enum HandOffError {
    #[error("execve('{path}'): {errno}")]
    Exec { path: PathBuf, errno: Errno },
    #[error("spawn('{path}'): {source}")]
    Spawn { path: PathBuf, source: io::Error },
    #[error("invalid argument for {0}: contains NUL")]
    Nul(PathBuf),
}

/// Every fatal bootstrap condition. Only this type decides exit codes.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Unable to find platform's bpfloader & netbpfload init scripts.")]
    MissingInitScripts,
    #[error("Platform has *both* bpfloader & netbpfload init scripts.")]
    DuplicateInitScripts,
    #[error("access({path}, F_OK) -> {errno}")]
    Access { path: PathBuf, errno: Errno },
    #[error("Impossible - not reachable on Android <T (api level {0}).")]
    BelowT(u32),
    #[error("Android {release} requires kernel {required}.")]
    KernelTooOld {
        release: &'static str,
        required: KernelVersion,
    },
    #[error("Android V requires X86 kernel to be 64-bit.")]
    X86Kernel32Bit,
    #[error("Unsupported kernel version ({0:07x}).")]
    UnsupportedKernel(KernelVersion),
    #[error("64-bit userspace required on 6.2+ kernels.")]
    Userspace32Bit,
    #[error("Failed to determine the build type: got {0}, want 'eng', 'user', or 'userdebug'")]
    UnknownBuildType(String),
    #[error(transparent)]
    Sysctl(#[from] SysctlError),
    #[error(transparent)]
    PinDir(#[from] PinDirError),
    #[error("critical failure loading BPF programs from {dir}: {source}")]
    CriticalLoad { dir: String, source: ObjectError },
    #[error("Critical kernel bug - failure to write into index 1 of 2 element bpf map array: {0}")]
    SelfTest(#[from] BpfError),
    #[error(transparent)]
    HandOff(#[from] HandOffError),
    #[error("Failed to set {name} property to {value}: {source}")]
    Property {
        name: &'static str,
        value: &'static str,
        source: PropertyError,
    },
}

impl LoaderError {
    pub fn exit_code(&self) -> u8 {
        match self {
            LoaderError::CriticalLoad { .. } => 2,
            LoaderError::Property { .. } => 125,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(LoaderError::MissingInitScripts.exit_code(), 1);
        assert_eq!(LoaderError::Userspace32Bit.exit_code(), 1);
        let critical = LoaderError::CriticalLoad {
            dir: "/apex/com.android.tethering/etc/bpf/".to_string(),
            source: ObjectError::Unusable(PathBuf::from("/sys/fs/bpf/tethering/prog_x")),
        };
        assert_eq!(critical.exit_code(), 2);
        let prop = LoaderError::Property {
            name: "bpf.progs_loaded",
            value: "1",
            source: PropertyError::Set {
                name: "bpf.progs_loaded".to_string(),
                value: "1".to_string(),
                ret: -1,
            },
        };
        assert_eq!(prop.exit_code(), 125);
    }

    #[test]
    fn sysctl_errno_is_preserved() {
        let e = SysctlError::Open {
            path: PathBuf::from("/proc/sys/net/core/bpf_jit_enable"),
            source: io::Error::from_raw_os_error(libc::ENOENT),
        };
        assert_eq!(e.errno(), Errno::ENOENT);
        let e = SysctlError::ShortWrite {
            path: PathBuf::from("/proc/sys/net/core/bpf_jit_enable"),
            value: "1\n".to_string(),
            len: 2,
            written: 1,
        };
        assert_eq!(e.errno(), Errno::EINVAL);
    }

    #[test]
    fn bpf_errno_is_preserved() {
        let e = BpfError::Syscall {
            cmd: "BPF_OBJ_GET",
            errno: Errno::EACCES,
        };
        assert_eq!(e.errno(), Errno::EACCES);
        assert_eq!(BpfError::AccessMode(1).errno(), Errno::EINVAL);
        assert_eq!(BpfError::InfoTooShort(12).errno(), Errno::EOPNOTSUPP);
        let e = BpfError::SizeMismatch {
            what: "value",
            actual: 8,
            expected: 4,
        };
        assert_eq!(e.errno(), Errno::EBADFD);
        assert_eq!(e.to_string(), "map value size is 8, expected 4");
    }

    #[test]
    fn unsupported_kernel_message_is_hex() {
        let e = LoaderError::UnsupportedKernel(KernelVersion::new(5, 10, 100));
        assert_eq!(e.to_string(), "Unsupported kernel version (50a0064).");
    }
}

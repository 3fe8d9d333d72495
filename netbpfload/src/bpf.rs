use crate::errors::BpfError;
use netbpfload_common::KernelVersion;
use nix::errno::Errno;
use std::ffi::CString;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

const BPF_MAP_CREATE: libc::c_int = 0;
const BPF_MAP_LOOKUP_ELEM: libc::c_int = 1;
const BPF_MAP_UPDATE_ELEM: libc::c_int = 2;
const BPF_MAP_DELETE_ELEM: libc::c_int = 3;
const BPF_MAP_GET_NEXT_KEY: libc::c_int = 4;
const BPF_OBJ_GET: libc::c_int = 7;
const BPF_OBJ_GET_INFO_BY_FD: libc::c_int = 15;

pub const BPF_MAP_TYPE_ARRAY: u32 = 2;

pub const BPF_ANY: u64 = 0;
pub const BPF_F_RDONLY: u32 = 1 << 3;
pub const BPF_F_WRONLY: u32 = 1 << 4;

const PF_KEY_V2: libc::c_int = 2;

#[repr(C)]
#[derive(Default)]
struct MapCreateAttr {
    map_type: u32,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
    map_flags: u32,
}

#[repr(C)]
#[derive(Default)]
struct MapElemAttr {
    map_fd: u32,
    key: u64,
    value: u64,
    flags: u64,
}

#[repr(C)]
#[derive(Default)]
struct ObjAttr {
    pathname: u64,
    bpf_fd: u32,
    file_flags: u32,
}

#[repr(C)]
#[derive(Default)]
struct ObjInfoAttr {
    bpf_fd: u32,
    info_len: u32,
    info: u64,
}

/// Leading fields of `struct bpf_map_info`, enough for the size checks.
#[repr(C)]
#[derive(Debug, Default)]
struct MapInfo {
    map_type: u32,
    id: u32,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
    map_flags: u32,
}

impl MapInfo {
    /// Bytes the kernel must fill for `key_size` and `value_size`.
    const SIZES_END: u32 = 16;

    fn check_sizes(&self, key_size: u32, value_size: u32) -> Result<(), BpfError> {
        for (what, actual, expected) in [
            ("key", self.key_size, key_size),
            ("value", self.value_size, value_size),
        ] {
            if actual != expected {
                return Err(BpfError::SizeMismatch {
                    what,
                    actual,
                    expected,
                });
            }
        }
        Ok(())
    }
}

fn check_info_len(info_len: u32) -> Result<(), BpfError> {
    if info_len < MapInfo::SIZES_END {
        return Err(BpfError::InfoTooShort(info_len));
    }
    Ok(())
}

/// How a pinned map is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAccess {
    ReadWrite,
    ReadOnly,
    WriteOnly,
    /// Read-write, plus a non-blocking exclusive `flock` on the descriptor.
    ExclusiveReadWrite,
}

impl MapAccess {
    /// Decodes the raw mode: 0, `BPF_F_RDONLY`, `BPF_F_WRONLY`, or both
    /// flags for exclusive read-write.
    pub fn from_mode(mode: u32) -> Result<MapAccess, BpfError> {
        match mode {
            0 => Ok(MapAccess::ReadWrite),
            BPF_F_RDONLY => Ok(MapAccess::ReadOnly),
            BPF_F_WRONLY => Ok(MapAccess::WriteOnly),
            m if m == BPF_F_RDONLY | BPF_F_WRONLY => Ok(MapAccess::ExclusiveReadWrite),
            _ => Err(BpfError::AccessMode(mode)),
        }
    }

    fn file_flags(&self) -> u32 {
        match self {
            MapAccess::ReadWrite | MapAccess::ExclusiveReadWrite => 0,
            MapAccess::ReadOnly => BPF_F_RDONLY,
            MapAccess::WriteOnly => BPF_F_WRONLY,
        }
    }
}

fn ptr_to_u64<T>(p: *const T) -> u64 {
    p as usize as u64
}

/// `bpf(2)`. Unused attr bytes must be zero, which holds since every attr
/// struct is fully initialized and the kernel zero-extends the rest.
fn sys_bpf<T>(cmd: libc::c_int, name: &'static str, attr: &mut T) -> Result<libc::c_long, BpfError> {
    // SAFETY: attr is a live repr(C) prefix of union bpf_attr
    let ret = unsafe {
        libc::syscall(
            libc::SYS_bpf,
            cmd,
            attr as *mut T as *mut libc::c_void,
            mem::size_of::<T>() as libc::c_uint,
        )
    };
    if ret < 0 {
        return Err(BpfError::Syscall {
            cmd: name,
            errno: Errno::last(),
        });
    }
    Ok(ret)
}

fn sys_bpf_fd<T>(cmd: libc::c_int, name: &'static str, attr: &mut T) -> Result<OwnedFd, BpfError> {
    let fd = sys_bpf(cmd, name, attr)?;
    // SAFETY: the kernel just handed us this descriptor
    Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

fn c_path(path: &Path) -> Result<CString, BpfError> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| BpfError::Path(path.display().to_string()))
}

fn obj_get(path: &Path, file_flags: u32) -> Result<OwnedFd, BpfError> {
    let c = c_path(path)?;
    let mut attr = ObjAttr {
        pathname: ptr_to_u64(c.as_ptr()),
        file_flags,
        ..Default::default()
    };
    sys_bpf_fd(BPF_OBJ_GET, "BPF_OBJ_GET", &mut attr)
}

/// A BPF map file descriptor with known key and value sizes.
#[derive(Debug)]
pub struct BpfMap {
    fd: OwnedFd,
    key_size: u32,
    value_size: u32,
}

impl BpfMap {
    pub fn create(
        map_type: u32,
        key_size: u32,
        value_size: u32,
        max_entries: u32,
        map_flags: u32,
    ) -> Result<BpfMap, BpfError> {
        let mut attr = MapCreateAttr {
            map_type,
            key_size,
            value_size,
            max_entries,
            map_flags,
        };
        let fd = sys_bpf_fd(BPF_MAP_CREATE, "BPF_MAP_CREATE", &mut attr)?;
        Ok(BpfMap {
            fd,
            key_size,
            value_size,
        })
    }

    /// Opens a pinned map. From 4.14 on, the kernel's key and value sizes
    /// must match the expected ones.
    pub fn from_pin<P: AsRef<Path>>(
        path: P,
        access: MapAccess,
        key_size: u32,
        value_size: u32,
        kernel: KernelVersion,
    ) -> Result<BpfMap, BpfError> {
        let fd = obj_get(path.as_ref(), access.file_flags())?;

        if access == MapAccess::ExclusiveReadWrite {
            // SAFETY: fd is an open descriptor owned by this function
            let ret = unsafe { libc::flock(fd.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if ret != 0 {
                return Err(BpfError::Os {
                    call: "flock(LOCK_EX | LOCK_NB)",
                    errno: Errno::last(),
                });
            }
        }

        let map = BpfMap {
            fd,
            key_size,
            value_size,
        };
        if kernel.is_at_least(4, 14, 0) {
            map.info()?.check_sizes(key_size, value_size)?;
        }
        Ok(map)
    }

    fn info(&self) -> Result<MapInfo, BpfError> {
        let mut info = MapInfo::default();
        let mut attr = ObjInfoAttr {
            bpf_fd: self.fd.as_raw_fd() as u32,
            info_len: mem::size_of::<MapInfo>() as u32,
            info: ptr_to_u64(&mut info as *mut MapInfo as *const MapInfo),
        };
        sys_bpf(BPF_OBJ_GET_INFO_BY_FD, "BPF_OBJ_GET_INFO_BY_FD", &mut attr)?;
        check_info_len(attr.info_len)?;
        Ok(info)
    }

    fn check_len(&self, what: &'static str, buf: &[u8], size: u32) -> Result<(), BpfError> {
        if buf.len() != size as usize {
            return Err(BpfError::BufferSize {
                what,
                len: buf.len(),
                size,
            });
        }
        Ok(())
    }

    fn elem_attr(&self, key: &[u8], value: u64, flags: u64) -> MapElemAttr {
        MapElemAttr {
            map_fd: self.fd.as_raw_fd() as u32,
            key: ptr_to_u64(key.as_ptr()),
            value,
            flags,
        }
    }

    pub fn write(&self, key: &[u8], value: &[u8], flags: u64) -> Result<(), BpfError> {
        self.check_len("key", key, self.key_size)?;
        self.check_len("value", value, self.value_size)?;
        let mut attr = self.elem_attr(key, ptr_to_u64(value.as_ptr()), flags);
        sys_bpf(BPF_MAP_UPDATE_ELEM, "BPF_MAP_UPDATE_ELEM", &mut attr)?;
        Ok(())
    }

    /// `Ok(false)` when the key has no element.
    pub fn find(&self, key: &[u8], value: &mut [u8]) -> Result<bool, BpfError> {
        self.check_len("key", key, self.key_size)?;
        self.check_len("value", value, self.value_size)?;
        let mut attr = self.elem_attr(key, ptr_to_u64(value.as_mut_ptr() as *const u8), 0);
        not_found_is_false(sys_bpf(BPF_MAP_LOOKUP_ELEM, "BPF_MAP_LOOKUP_ELEM", &mut attr))
    }

    /// `Ok(false)` when the key has no element.
    pub fn delete(&self, key: &[u8]) -> Result<bool, BpfError> {
        self.check_len("key", key, self.key_size)?;
        let mut attr = self.elem_attr(key, 0, 0);
        not_found_is_false(sys_bpf(BPF_MAP_DELETE_ELEM, "BPF_MAP_DELETE_ELEM", &mut attr))
    }

    /// Stores the key following `key` (the first key for `None`) in `next`.
    /// `Ok(false)` past the last key.
    pub fn next_key(&self, key: Option<&[u8]>, next: &mut [u8]) -> Result<bool, BpfError> {
        if let Some(key) = key {
            self.check_len("key", key, self.key_size)?;
        }
        self.check_len("key", next, self.key_size)?;
        let mut attr = MapElemAttr {
            map_fd: self.fd.as_raw_fd() as u32,
            key: key.map_or(0, |k| ptr_to_u64(k.as_ptr())),
            value: ptr_to_u64(next.as_mut_ptr() as *const u8),
            flags: 0,
        };
        not_found_is_false(sys_bpf(BPF_MAP_GET_NEXT_KEY, "BPF_MAP_GET_NEXT_KEY", &mut attr))
    }

    /// `Ok(false)` for an empty map.
    pub fn first_key(&self, key: &mut [u8]) -> Result<bool, BpfError> {
        self.next_key(None, key)
    }
}

fn not_found_is_false(r: Result<libc::c_long, BpfError>) -> Result<bool, BpfError> {
    match r {
        Ok(_) => Ok(true),
        Err(BpfError::Syscall {
            errno: Errno::ENOENT,
            ..
        }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Writes index 1 of a fresh 2-element array map and reads it back. Fails
/// only when the bpf subsystem itself is broken.
pub fn self_test() -> Result<(), BpfError> {
    let key = 1u32.to_ne_bytes();
    let value = 123u32.to_ne_bytes();

    let map = BpfMap::create(BPF_MAP_TYPE_ARRAY, 4, 4, 2, 0)?;
    map.write(&key, &value, BPF_ANY)?;

    let mut read = [0u8; 4];
    if !map.find(&key, &mut read)? || read != value {
        return Err(BpfError::Readback {
            actual: read.to_vec(),
            expected: value.to_vec(),
        });
    }
    Ok(())
}

/// A pinned program that can be opened read-only is usable.
pub fn usable_program(path: &Path) -> bool {
    obj_get(path, BPF_F_RDONLY).is_ok()
}

/// Waits for an RCU grace period: closing a `PF_KEY` socket does a
/// `synchronize_rcu()` in the kernel.
pub fn synchronize_kernel_rcu() -> Result<(), BpfError> {
    // SAFETY: socket(2) takes no pointers
    let fd = unsafe { libc::socket(libc::AF_KEY, libc::SOCK_RAW | libc::SOCK_CLOEXEC, PF_KEY_V2) };
    if fd < 0 {
        return Err(BpfError::Os {
            call: "socket(AF_KEY, SOCK_RAW | SOCK_CLOEXEC, PF_KEY_V2)",
            errno: Errno::last(),
        });
    }
    // SAFETY: fd was opened above and is closed exactly once
    if unsafe { libc::close(fd) } != 0 {
        return Err(BpfError::Os {
            call: "close(AF_KEY socket)",
            errno: Errno::last(),
        });
    }
    Ok(())
}

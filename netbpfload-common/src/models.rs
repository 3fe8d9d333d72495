use crate::{API_T, API_U, API_V};
use core::fmt;

pub trait LoaderVar {
    fn from_str(_: &mut str) -> Self;
    fn is_undefined(&self) -> bool {
        false
    }
}

/// A source directory of `.o` objects and the pin subdirectory its
/// artifacts land in, relative to the bpf filesystem root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location<'a> {
    pub dir: &'a str,
    pub prefix: &'a str,
}

/// Ordered: later objects may reuse maps pinned by earlier locations.
pub const LOCATIONS: [Location<'static>; 5] = [
    // tether offload, network_stack only
    Location {
        dir: "/apex/com.android.tethering/etc/bpf/",
        prefix: "tethering/",
    },
    // shared with netd & system server, netutils_wrapper has program access
    Location {
        dir: "/apex/com.android.tethering/etc/bpf/netd_shared/",
        prefix: "netd_shared/",
    },
    // shared with netd (read only) & system server
    Location {
        dir: "/apex/com.android.tethering/etc/bpf/netd_readonly/",
        prefix: "netd_readonly/",
    },
    // shared with system server
    Location {
        dir: "/apex/com.android.tethering/etc/bpf/net_shared/",
        prefix: "net_shared/",
    },
    // network_stack only
    Location {
        dir: "/apex/com.android.tethering/etc/bpf/net_private/",
        prefix: "net_private/",
    },
];

pub const BPFLOADER_MAINLINE_VERSION: u32 = 42;
pub const DEFAULT_BPFLOADER_MIN_VER: u32 = 0;
pub const DEFAULT_BPFLOADER_MAX_VER: u32 = 0x10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BpfLoaderVersion(u32);

impl BpfLoaderVersion {
    pub fn for_api_level(api_level: u32) -> BpfLoaderVersion {
        let mut ver = BPFLOADER_MAINLINE_VERSION;
        if api_level >= API_T {
            ver += 1;
        }
        if api_level >= API_U {
            ver += 1;
        }
        if api_level >= API_V {
            ver += 1;
        }
        BpfLoaderVersion(ver)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// `min` inclusive, `max` exclusive, as declared by an object's
    /// `bpfloader_min_ver` / `bpfloader_max_ver` sections.
    pub fn in_range(&self, min: u32, max: u32) -> bool {
        self.0 >= min && self.0 < max
    }
}

impl fmt::Display for BpfLoaderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildType {
    Unknown,
    Eng,
    User,
    UserDebug,
}

impl LoaderVar for BuildType {
    /// `ro.build.type` must match exactly; case or padding makes it unknown.
    fn from_str(s: &mut str) -> Self {
        match &*s {
            "eng" => BuildType::Eng,
            "user" => BuildType::User,
            "userdebug" => BuildType::UserDebug,
            _ => BuildType::Unknown,
        }
    }

    fn is_undefined(&self) -> bool {
        matches!(self, BuildType::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Undefined,
    Arm,
    Aarch64,
    X86,
    X86_64,
    RiscV64,
}

impl Arch {
    pub fn is_x86(&self) -> bool {
        matches!(self, Arch::X86 | Arch::X86_64)
    }

    pub fn describe(&self, userspace_32bit: bool, kernel_64bit: bool) -> &'static str {
        match (userspace_32bit, kernel_64bit) {
            (false, _) => match self {
                Arch::Aarch64 => "64-on-aarch64",
                Arch::X86_64 => "64-on-x86-64",
                Arch::RiscV64 => "64-on-riscv64",
                _ => "64-on-unknown",
            },
            (true, true) => match self {
                Arch::Arm => "32-on-aarch64",
                Arch::X86 => "32-on-x86-64",
                _ => "32-on-unknown",
            },
            (true, false) => match self {
                Arch::Arm => "32-on-arm32",
                Arch::X86 => "32-on-x86-32",
                _ => "32-on-unknown",
            },
        }
    }
}

impl LoaderVar for Arch {
    fn from_str(s: &mut str) -> Self {
        s.make_ascii_lowercase();
        match s.trim() {
            "arm" => Arch::Arm,
            "aarch64" => Arch::Aarch64,
            "x86" => Arch::X86,
            "x86_64" => Arch::X86_64,
            "riscv64" => Arch::RiscV64,
            _ => Arch::Undefined,
        }
    }

    fn is_undefined(&self) -> bool {
        matches!(self, Arch::Undefined)
    }
}

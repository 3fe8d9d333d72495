#![no_std]

pub mod kernel;
pub mod models;
pub mod utils;

pub use kernel::KernelVersion;
pub use models::{Arch, BpfLoaderVersion, BuildType, Location, LoaderVar, LOCATIONS};

pub const API_T: u32 = 33;
pub const API_U: u32 = 34;
pub const API_V: u32 = 35;

pub const BPFFS_ROOT: &str = "/sys/fs/bpf";
pub const LOADER_PIN_SUBDIR: &str = "loader";

pub const PLATFORM_BPFLOADER_RC: &str = "/system/etc/init/bpfloader.rc";
pub const PLATFORM_NETBPFLOAD_RC: &str = "/system/etc/init/netbpfload.rc";
pub const PLATFORM_BPFLOADER: &str = "/system/bin/bpfloader";
pub const GSI_BOOTED_MARKER: &str = "/metadata/gsi/dsu/booted";
pub const TETHERING_APEX_MOUNT_POINT: &str = "/apex/com.android.tethering";

pub const SYSCTL_UNPRIVILEGED_BPF_DISABLED: &str = "/proc/sys/kernel/unprivileged_bpf_disabled";
pub const SYSCTL_BPF_JIT_ENABLE: &str = "/proc/sys/net/core/bpf_jit_enable";
pub const SYSCTL_BPF_JIT_KALLSYMS: &str = "/proc/sys/net/core/bpf_jit_kallsyms";

pub const PROP_BUILD_TYPE: &str = "ro.build.type";
pub const PROP_SDK_VERSION: &str = "ro.build.version.sdk";
pub const PROP_PROGS_LOADED: &str = "bpf.progs_loaded";

use crate::apex::log_tethering_apex_version;
use crate::bpf;
use crate::config::LoaderSettings;
use crate::errors::{BpfError, LoaderError, PinDirError, SysctlError};
use crate::loader::{load_all_elf_objects, ObjectLoader};
use crate::pindir::PinDirs;
use crate::probe::Capabilities;
use crate::props::SystemProperties;
use crate::sysctl::write_proc_sys_file_logged;
use netbpfload_common::{
    BpfLoaderVersion, KernelVersion, LoaderVar, Location, LOADER_PIN_SUBDIR,
    PLATFORM_BPFLOADER_RC, PLATFORM_NETBPFLOAD_RC, PROP_PROGS_LOADED,
    SYSCTL_BPF_JIT_ENABLE, SYSCTL_BPF_JIT_KALLSYMS, SYSCTL_UNPRIVILEGED_BPF_DISABLED,
};
use nix::errno::Errno;
use nix::unistd::{access, AccessFlags};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// Side effects of the bootstrap, kept behind a trait so the sequencing can
/// be exercised without a kernel.
pub(crate) trait Platform {
    fn exists(&self, path: &Path) -> Result<bool, LoaderError>;
    fn write_proc_sys(&self, path: &Path, value: &str) -> Result<(), SysctlError>;
    fn create_pin_dir(&self, prefix: &str) -> Result<(), PinDirError>;
    fn self_test(&self) -> Result<(), BpfError>;
    fn sleep(&self, duration: Duration);
}

pub(crate) struct DevicePlatform {
    pin_dirs: PinDirs,
}

impl DevicePlatform {
    pub fn new<P: AsRef<Path>>(bpffs_root: P) -> DevicePlatform {
        DevicePlatform {
            pin_dirs: PinDirs::new(bpffs_root),
        }
    }
}

impl Platform for DevicePlatform {
    fn exists(&self, path: &Path) -> Result<bool, LoaderError> {
        match access(path, AccessFlags::F_OK) {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT) => Ok(false),
            Err(errno) => Err(LoaderError::Access {
                path: path.to_path_buf(),
                errno,
            }),
        }
    }

    fn write_proc_sys(&self, path: &Path, value: &str) -> Result<(), SysctlError> {
        write_proc_sys_file_logged(path, value)
    }

    fn create_pin_dir(&self, prefix: &str) -> Result<(), PinDirError> {
        self.pin_dirs.ensure(prefix)
    }

    fn self_test(&self) -> Result<(), BpfError> {
        bpf::self_test()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration)
    }
}

/// How a successful bootstrap ends.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Completion {
    /// Nothing left to do, exit 0.
    Finished,
    /// The platform loader takes over from here.
    HandOff(PathBuf),
}

pub(crate) struct Bootstrap<'a, P: Platform, L: ObjectLoader> {
    caps: &'a Capabilities,
    platform: &'a P,
    loader: &'a L,
    locations: &'a [Location<'a>],
    settings: &'a LoaderSettings,
}

impl<'a, P: Platform, L: ObjectLoader> Bootstrap<'a, P, L> {
    pub fn new(
        caps: &'a Capabilities,
        platform: &'a P,
        loader: &'a L,
        locations: &'a [Location<'a>],
        settings: &'a LoaderSettings,
    ) -> Bootstrap<'a, P, L> {
        Bootstrap {
            caps,
            platform,
            loader,
            locations,
            settings,
        }
    }

    pub fn run(&self) -> Result<Completion, LoaderError> {
        self.check_init_scripts()?;
        log_tethering_apex_version();
        self.check_versions()?;
        self.check_bitness()?;
        self.check_build_type()?;
        self.configure_sysctls()?;
        self.create_pin_dirs()?;

        let version = BpfLoaderVersion::for_api_level(self.caps.api_level);
        info!("BpfLoader version {}", version);

        self.load_locations(version)?;

        self.platform.self_test()?;

        if self.caps.is_at_least_v() {
            info!("done, transferring control to platform bpfloader.");
            return Ok(Completion::HandOff(PathBuf::from(
                &self.settings.platform_loader,
            )));
        }

        info!("mainline done!");
        Ok(Completion::Finished)
    }

    fn check_init_scripts(&self) -> Result<(), LoaderError> {
        let has_bpfloader_rc = self.platform.exists(Path::new(PLATFORM_BPFLOADER_RC))?;
        let has_netbpfload_rc = self.platform.exists(Path::new(PLATFORM_NETBPFLOAD_RC))?;

        info!(
            "NetBpfLoad api:{} kver:{:07x} ({}) rc:{}{}",
            self.caps.api_level,
            self.caps.kernel,
            self.caps.describe_arch(),
            u8::from(has_bpfloader_rc),
            u8::from(has_netbpfload_rc)
        );

        match (has_bpfloader_rc, has_netbpfload_rc) {
            (false, false) => Err(LoaderError::MissingInitScripts),
            (true, true) => Err(LoaderError::DuplicateInitScripts),
            _ => Ok(()),
        }
    }

    fn check_versions(&self) -> Result<(), LoaderError> {
        let caps = self.caps;
        let kernel = caps.kernel;

        if !caps.is_at_least_t() {
            return Err(LoaderError::BelowT(caps.api_level));
        }

        let floors = [
            (caps.is_at_least_t(), "T", KernelVersion::new(4, 9, 0)),
            (caps.is_at_least_u(), "U", KernelVersion::new(4, 14, 0)),
            (caps.is_at_least_v(), "V", KernelVersion::new(4, 19, 0)),
        ];
        for (applies, release, required) in floors {
            if applies && kernel < required {
                return Err(LoaderError::KernelTooOld { release, required });
            }
        }

        if !caps.is_at_least_v() {
            return Ok(());
        }

        if caps.arch.is_x86() && !caps.kernel_64bit {
            return Err(LoaderError::X86Kernel32Bit);
        }

        let mut bad = false;
        if !kernel.is_lts() {
            warn!("Android V only supports LTS kernels.");
            bad = true;
        }
        if let Some(min) = kernel.v_min_point_release() {
            if kernel < min {
                warn!(
                    "Android V requires {}.{} kernel to be {}+.",
                    min.major(),
                    min.minor(),
                    min
                );
                bad = true;
            }
        }

        if bad {
            if !caps.gsi {
                return Err(LoaderError::UnsupportedKernel(kernel));
            }
            warn!(
                "Unsupported kernel version ({:07x}), continuing on GSI.",
                kernel
            );
            self.platform.sleep(self.settings.gsi_warning_delay());
        }
        Ok(())
    }

    fn check_bitness(&self) -> Result<(), LoaderError> {
        if self.caps.userspace_32bit && self.caps.kernel.is_at_least(6, 2, 0) {
            return Err(LoaderError::Userspace32Bit);
        }
        Ok(())
    }

    fn check_build_type(&self) -> Result<(), LoaderError> {
        if self.caps.build_type.is_undefined() {
            return Err(LoaderError::UnknownBuildType(
                self.caps.build_type_raw.clone(),
            ));
        }
        Ok(())
    }

    fn configure_sysctls(&self) -> Result<(), LoaderError> {
        if self.caps.is_at_least_v() {
            // known to fail on older kernels, where it already defaults to 0
            if let Err(e) = self
                .platform
                .write_proc_sys(Path::new(SYSCTL_UNPRIVILEGED_BPF_DISABLED), "0\n")
            {
                if self.caps.kernel >= self.settings.unprivileged_bpf_threshold() {
                    return Err(e.into());
                }
                warn!("Ignoring unprivileged_bpf_disabled failure on {}", self.caps.kernel);
            }
        }

        if self.caps.is_at_least_u() {
            self.platform
                .write_proc_sys(Path::new(SYSCTL_BPF_JIT_ENABLE), "1\n")?;
            self.platform
                .write_proc_sys(Path::new(SYSCTL_BPF_JIT_KALLSYMS), "1\n")?;
        }
        Ok(())
    }

    fn create_pin_dirs(&self) -> Result<(), LoaderError> {
        for location in self.locations {
            self.platform.create_pin_dir(location.prefix)?;
        }
        // no source directory feeds it, but it anchors the loader's own pins
        self.platform.create_pin_dir(LOADER_PIN_SUBDIR)?;
        Ok(())
    }

    fn load_locations(&self, version: BpfLoaderVersion) -> Result<(), LoaderError> {
        for location in self.locations {
            if let Err(source) = load_all_elf_objects(self.loader, version, location) {
                error!(
                    target: "error",
                    "=== CRITICAL FAILURE LOADING BPF PROGRAMS FROM {} ===",
                    location.dir
                );
                error!(
                    target: "error",
                    "If this triggers reliably, you're probably missing kernel options or patches."
                );
                error!(
                    target: "error",
                    "If this triggers randomly, you might be hitting some memory allocation problems or startup script race."
                );
                error!(target: "error", "--- DO NOT EXPECT SYSTEM TO BOOT SUCCESSFULLY ---");
                self.platform.sleep(self.settings.critical_failure_delay());
                return Err(LoaderError::CriticalLoad {
                    dir: location.dir.to_string(),
                    source,
                });
            }
        }
        Ok(())
    }
}

/// `netbpfload done`: the platform loader re-enters to mark programs loaded.
pub(crate) fn finalize<S: SystemProperties>(props: &S) -> Result<(), LoaderError> {
    props
        .set(PROP_PROGS_LOADED, "1")
        .map_err(|source| LoaderError::Property {
            name: PROP_PROGS_LOADED,
            value: "1",
            source,
        })?;
    info!("success.");
    Ok(())
}

use crate::config::DeviceOverrides;
use crate::props::SystemProperties;
use netbpfload_common::{
    Arch, BuildType, KernelVersion, LoaderVar, API_T, API_U, API_V, GSI_BOOTED_MARKER,
    PROP_BUILD_TYPE, PROP_SDK_VERSION,
};
use std::path::Path;
use sysinfo::System;
use tracing::{debug, warn};

/// Device facts gathered once at startup. Read only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Capabilities {
    pub api_level: u32,
    pub kernel: KernelVersion,
    pub arch: Arch,
    pub kernel_64bit: bool,
    pub userspace_32bit: bool,
    pub build_type: BuildType,
    /// Raw property value, kept for diagnostics.
    pub build_type_raw: String,
    pub gsi: bool,
}

impl Capabilities {
    pub fn probe<P: SystemProperties>(props: &P, overrides: &DeviceOverrides) -> Capabilities {
        let api_level = overrides
            .api_level
            .or_else(|| props.get(PROP_SDK_VERSION).and_then(|v| v.trim().parse().ok()))
            .unwrap_or(0);

        let build_type_raw = overrides
            .build_type
            .clone()
            .or_else(|| props.get(PROP_BUILD_TYPE))
            .unwrap_or_default();

        let kernel = KernelVersion::parse(&System::kernel_version().unwrap_or_default());
        let userspace_32bit = is_userspace_32bit();

        let caps = Capabilities {
            api_level,
            kernel,
            arch: Arch::from_str(std::env::consts::ARCH.to_string().as_mut_str()),
            kernel_64bit: is_kernel_64bit(userspace_32bit),
            userspace_32bit,
            build_type: BuildType::from_str(build_type_raw.clone().as_mut_str()),
            build_type_raw,
            gsi: Path::new(GSI_BOOTED_MARKER).exists(),
        };
        if caps.arch.is_undefined() {
            warn!("Unsupported architecture: {}", std::env::consts::ARCH);
        }
        debug!("probed {:?}", caps);
        caps
    }

    pub fn is_at_least_t(&self) -> bool {
        self.api_level >= API_T
    }

    pub fn is_at_least_u(&self) -> bool {
        self.api_level >= API_U
    }

    pub fn is_at_least_v(&self) -> bool {
        self.api_level >= API_V
    }

    pub fn describe_arch(&self) -> &'static str {
        self.arch.describe(self.userspace_32bit, self.kernel_64bit)
    }
}

const PER_LINUX: libc::c_ulong = 0x0000;
const PER_MASK: libc::c_ulong = 0x00ff;

fn is_userspace_32bit() -> bool {
    cfg!(target_pointer_width = "32")
}

/// A 64-bit userspace implies a 64-bit kernel. Otherwise switch to the
/// native personality so `uname` reports the kernel's machine, then look
/// for "64" in it (x86_64 and aarch64 match, armv8l does not).
fn is_kernel_64bit(userspace_32bit: bool) -> bool {
    if !userspace_32bit {
        return true;
    }

    // SAFETY: personality(0xffffffff) only queries the current persona
    let p = unsafe { libc::personality(0xffffffff) };
    if p == -1 {
        return false;
    }

    let native = (p as libc::c_ulong & !PER_MASK) | PER_LINUX;
    // SAFETY: switching to PER_LINUX only changes what uname reports
    let q = unsafe { libc::personality(native) };
    if q != p {
        return false;
    }

    let machine = nix::sys::utsname::uname()
        .map(|u| u.machine().to_string_lossy().into_owned())
        .unwrap_or_default();

    // SAFETY: restores the persona read above
    unsafe { libc::personality(p as libc::c_ulong) };

    machine.contains("64")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PropertyError;
    use std::collections::HashMap;

    struct FakeProps(HashMap<&'static str, &'static str>);

    impl SystemProperties for FakeProps {
        fn get(&self, name: &str) -> Option<String> {
            self.0.get(name).map(|v| v.to_string())
        }

        fn set(&self, _name: &str, _value: &str) -> Result<(), PropertyError> {
            Ok(())
        }
    }

    #[test]
    fn probe_reads_properties() {
        let props = FakeProps(HashMap::from([
            (PROP_SDK_VERSION, "34"),
            (PROP_BUILD_TYPE, "userdebug"),
        ]));
        let caps = Capabilities::probe(&props, &DeviceOverrides::default());

        assert_eq!(caps.api_level, 34);
        assert!(caps.is_at_least_t());
        assert!(caps.is_at_least_u());
        assert!(!caps.is_at_least_v());
        assert_eq!(caps.build_type, BuildType::UserDebug);
        assert_eq!(caps.userspace_32bit, cfg!(target_pointer_width = "32"));
        if !caps.userspace_32bit {
            assert!(caps.kernel_64bit);
        }
    }

    #[test]
    fn overrides_win_over_properties() {
        let props = FakeProps(HashMap::from([
            (PROP_SDK_VERSION, "33"),
            (PROP_BUILD_TYPE, "user"),
        ]));
        let overrides = DeviceOverrides {
            api_level: Some(35),
            build_type: Some("eng".to_string()),
        };
        let caps = Capabilities::probe(&props, &overrides);

        assert_eq!(caps.api_level, 35);
        assert!(caps.is_at_least_v());
        assert_eq!(caps.build_type, BuildType::Eng);
    }

    #[test]
    fn missing_properties_are_unknown() {
        let caps = Capabilities::probe(&FakeProps(HashMap::new()), &DeviceOverrides::default());
        assert_eq!(caps.api_level, 0);
        assert!(!caps.is_at_least_t());
        assert!(caps.build_type.is_undefined());
        assert_eq!(caps.build_type_raw, "");
    }
}

use crate::errors::PropertyError;
#[cfg(not(target_os = "android"))]
use std::process::Command;

pub(crate) trait SystemProperties {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str) -> Result<(), PropertyError>;
}

/// Android system properties: bionic on device, `getprop`/`setprop` elsewhere.
pub(crate) struct AndroidProperties;

#[cfg(target_os = "android")]
impl SystemProperties for AndroidProperties {
    fn get(&self, name: &str) -> Option<String> {
        let c_name = std::ffi::CString::new(name).ok()?;
        let mut buf = [0u8; libc::PROP_VALUE_MAX as usize];
        // SAFETY: buf holds PROP_VALUE_MAX bytes, the most bionic writes
        let len = unsafe {
            libc::__system_property_get(c_name.as_ptr(), buf.as_mut_ptr() as *mut libc::c_char)
        };
        if len <= 0 {
            return None;
        }
        netbpfload_common::utils::str_from_buf_nul(&buf)
            .ok()
            .map(str::to_string)
    }

    fn set(&self, name: &str, value: &str) -> Result<(), PropertyError> {
        let nul = || PropertyError::Nul {
            name: name.to_string(),
        };
        let c_name = std::ffi::CString::new(name).map_err(|_| nul())?;
        let c_value = std::ffi::CString::new(value).map_err(|_| nul())?;
        // SAFETY: both arguments are valid NUL terminated strings
        let ret = unsafe { libc::__system_property_set(c_name.as_ptr(), c_value.as_ptr()) };
        if ret != 0 {
            return Err(PropertyError::Set {
                name: name.to_string(),
                value: value.to_string(),
                ret,
            });
        }
        Ok(())
    }
}

#[cfg(not(target_os = "android"))]
impl SystemProperties for AndroidProperties {
    fn get(&self, name: &str) -> Option<String> {
        let out = Command::new("getprop").arg(name).output().ok()?;
        if !out.status.success() {
            return None;
        }
        let value = String::from_utf8(out.stdout).ok()?.trim().to_string();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    fn set(&self, name: &str, value: &str) -> Result<(), PropertyError> {
        let status = Command::new("setprop")
            .arg(name)
            .arg(value)
            .status()
            .map_err(|source| PropertyError::Command {
                cmd: "setprop",
                source,
            })?;
        if !status.success() {
            return Err(PropertyError::Status {
                cmd: "setprop",
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "android"))]
    #[test]
    fn nul_value_is_a_command_error_off_device() {
        // std rejects the argument before setprop is looked up
        let err = AndroidProperties.set("bpf.progs_loaded", "1\0").unwrap_err();
        assert!(matches!(err, PropertyError::Command { cmd: "setprop", .. }));
    }
}

use netbpfload_common::TETHERING_APEX_MOUNT_POINT;
use std::fs;
use tracing::{debug, info};

const PROC_MOUNTS: &str = "/proc/mounts";

/// Versions of the tethering APEX mounted as `<mount point>@<version>` from
/// the same block device as the active mount point.
pub(crate) fn tethering_apex_versions(mounts: &str) -> Vec<String> {
    let entries: Vec<(&str, &str)> = mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some((fields.next()?, fields.next()?))
        })
        .collect();

    let Some(device) = entries
        .iter()
        .find(|(_, mount_point)| *mount_point == TETHERING_APEX_MOUNT_POINT)
        .map(|(device, _)| *device)
    else {
        return Vec::new();
    };

    entries
        .iter()
        .filter(|(d, _)| *d == device)
        .filter_map(|(_, mount_point)| {
            mount_point
                .strip_prefix(TETHERING_APEX_MOUNT_POINT)?
                .strip_prefix('@')
        })
        .map(str::to_string)
        .collect()
}

/// Logs the tethering APEX version. Informational only.
pub(crate) fn log_tethering_apex_version() {
    let mounts = match fs::read_to_string(PROC_MOUNTS) {
        Ok(mounts) => mounts,
        Err(e) => {
            debug!("Cannot read {}: {}", PROC_MOUNTS, e);
            return;
        }
    };

    let versions = tethering_apex_versions(&mounts);
    if versions.is_empty() {
        debug!("Tethering APEX version not found");
    }
    for version in versions {
        info!("Loading BPF from Tethering APEX version {}", version);
    }
}

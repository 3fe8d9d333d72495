use config::{Config, File, FileFormat};
use netbpfload_common::{
    KernelVersion, Location, BPFFS_ROOT, LOCATIONS, PLATFORM_BPFLOADER,
};
use std::env;
use std::time::Duration;

pub(crate) const DEFAULT_CONFIG_DIR: &str = "/apex/com.android.tethering/etc/netbpfload/";
pub(crate) const CONFIG_FILE: &str = "netbpfload.json5";

#[derive(Debug, Default, Clone, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct LogEntry {
    pub enable: bool,
    pub target: String,
    pub directory: Option<String>,
    pub prefix: Option<String>,
    pub rotation: Option<String>,
    pub max_files: Option<usize>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Clone, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct LogsConfig {
    pub default: LogEntry,
    pub errors: Option<LogEntry>,
}

#[derive(Debug, Clone, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct LocationEntry {
    pub dir: String,
    pub prefix: String,
}

#[derive(Debug, Clone, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct LoaderSettings {
    pub bpffs_root: String,
    pub platform_loader: String,
    pub hand_off: String,
    pub unprivileged_bpf_required_from: String,
    pub critical_failure_delay_secs: u64,
    pub gsi_warning_delay_secs: u64,
    pub locations: Option<Vec<LocationEntry>>,
}

impl Default for LoaderSettings {
    fn default() -> LoaderSettings {
        LoaderSettings {
            bpffs_root: BPFFS_ROOT.to_string(),
            platform_loader: PLATFORM_BPFLOADER.to_string(),
            hand_off: "exec".to_string(),
            unprivileged_bpf_required_from: "5.13.0".to_string(),
            critical_failure_delay_secs: 20,
            gsi_warning_delay_secs: 60,
            locations: None,
        }
    }
}

impl LoaderSettings {
    /// Kernel from which a failed `unprivileged_bpf_disabled` write is fatal.
    pub fn unprivileged_bpf_threshold(&self) -> KernelVersion {
        KernelVersion::parse(&self.unprivileged_bpf_required_from)
    }

    pub fn critical_failure_delay(&self) -> Duration {
        Duration::from_secs(self.critical_failure_delay_secs)
    }

    pub fn gsi_warning_delay(&self) -> Duration {
        Duration::from_secs(self.gsi_warning_delay_secs)
    }

    pub fn locations(&self) -> Vec<Location<'_>> {
        match &self.locations {
            Some(entries) => entries
                .iter()
                .map(|e| Location {
                    dir: e.dir.as_str(),
                    prefix: e.prefix.as_str(),
                })
                .collect(),
            None => LOCATIONS.to_vec(),
        }
    }
}

#[derive(Debug, Default, Clone, serde_derive::Deserialize, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct DeviceOverrides {
    pub api_level: Option<u32>,
    pub build_type: Option<String>,
}

#[derive(Debug, Default, Clone, serde_derive::Deserialize, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct LoaderConfig {
    pub logs: LogsConfig,
    pub loader: LoaderSettings,
    pub device: DeviceOverrides,
}

fn config_dir(dir: Option<&str>) -> String {
    let mut config_dir = match dir {
        Some(d) => d.to_string(),
        None => env::var("CONFIG_DIR").unwrap_or_else(|_| DEFAULT_CONFIG_DIR.into()),
    };
    if !config_dir.ends_with('/') {
        config_dir.push('/');
    }
    config_dir
}

/// Loads `netbpfload.json5` from `dir`, `$CONFIG_DIR` or the APEX. The file
/// is optional; every key has a default.
pub(crate) fn load_config(dir: Option<&str>) -> Result<LoaderConfig, anyhow::Error> {
    let defaults = LoaderSettings::default();

    let config = Config::builder()
        .set_default("logs.default.enable", true)?
        .set_default("logs.default.target", "kmsg")?
        .set_default("loader.bpffs_root", defaults.bpffs_root)?
        .set_default("loader.platform_loader", defaults.platform_loader)?
        .set_default("loader.hand_off", defaults.hand_off)?
        .set_default(
            "loader.unprivileged_bpf_required_from",
            defaults.unprivileged_bpf_required_from,
        )?
        .set_default(
            "loader.critical_failure_delay_secs",
            defaults.critical_failure_delay_secs,
        )?
        .set_default("loader.gsi_warning_delay_secs", defaults.gsi_warning_delay_secs)?
        .add_source(
            File::new(
                &format!("{}{}", config_dir(dir), CONFIG_FILE),
                FileFormat::Json5,
            )
            .required(false),
        )
        .build()?;

    let conf: LoaderConfig = config.try_deserialize()?;

    Ok(conf)
}

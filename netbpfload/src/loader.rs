use crate::errors::ObjectError;
use netbpfload_common::utils::is_object_file;
use netbpfload_common::{BpfLoaderVersion, Location};
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Outcome of loading one `.o`. `critical` is known even when loading fails.
#[derive(Debug)]
pub(crate) struct ObjectLoad {
    pub critical: bool,
    pub result: Result<(), ObjectError>,
}

/// Creates the maps and programs of one ELF object and pins them under the
/// location's prefix.
pub(crate) trait ObjectLoader {
    fn load_prog(
        &self,
        path: &Path,
        version: BpfLoaderVersion,
        location: &Location<'_>,
    ) -> ObjectLoad;
}

/// `.o` files directly inside `dir`, sorted. A directory that cannot be
/// read has no objects.
pub(crate) fn object_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Skipping {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut objects: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| is_object_file(e.file_name().as_bytes()))
        .map(|e| e.path())
        .collect();
    objects.sort();
    objects
}

/// Loads every object of a location. All objects are attempted; the last
/// critical failure is returned once the directory is exhausted.
pub(crate) fn load_all_elf_objects<L: ObjectLoader>(
    loader: &L,
    version: BpfLoaderVersion,
    location: &Location<'_>,
) -> Result<(), ObjectError> {
    let mut critical_failure = None;

    for path in object_files(Path::new(location.dir)) {
        let load = loader.load_prog(&path, version, location);
        match load.result {
            Ok(()) => debug!("Loaded object: {}", path.display()),
            Err(e) => {
                error!(
                    target: "error",
                    "Failed to load object: {}, critical: {}, ret: {}",
                    path.display(),
                    load.critical,
                    e
                );
                if load.critical {
                    critical_failure = Some(e);
                }
            }
        }
    }

    match critical_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

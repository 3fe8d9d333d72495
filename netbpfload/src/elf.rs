use crate::bpf::usable_program;
use crate::errors::ObjectError;
use crate::loader::{ObjectLoad, ObjectLoader};
use aya::programs::Program;
use aya::BpfLoader;
use netbpfload_common::models::{DEFAULT_BPFLOADER_MAX_VER, DEFAULT_BPFLOADER_MIN_VER};
use netbpfload_common::utils::{object_name, read_u32_le, str_from_buf_nul};
use netbpfload_common::{BpfLoaderVersion, Location};
use object::{Object, ObjectSection};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Loader metadata carried in dedicated ELF sections.
#[derive(Debug, PartialEq)]
pub(crate) struct ObjectInfo {
    pub critical: bool,
    pub min_ver: u32,
    pub max_ver: u32,
    pub license: String,
}

impl ObjectInfo {
    pub fn parse(data: &[u8]) -> Result<ObjectInfo, object::read::Error> {
        let obj = object::read::File::parse(data)?;

        let section_u32 = |name: &str, default: u32| {
            obj.section_by_name(name)
                .and_then(|s| s.data().ok())
                .and_then(read_u32_le)
                .unwrap_or(default)
        };

        let license = match obj.section_by_name("license") {
            Some(section) => str_from_buf_nul(section.data()?)
                .unwrap_or_default()
                .to_string(),
            None => String::new(),
        };

        Ok(ObjectInfo {
            critical: obj.section_by_name("critical").is_some(),
            min_ver: section_u32("bpfloader_min_ver", DEFAULT_BPFLOADER_MIN_VER),
            max_ver: section_u32("bpfloader_max_ver", DEFAULT_BPFLOADER_MAX_VER),
            license,
        })
    }
}

/// Loads objects with aya and pins them under the bpf filesystem.
pub(crate) struct EbpfObjectLoader {
    bpffs_root: PathBuf,
}

impl EbpfObjectLoader {
    pub fn new<P: AsRef<Path>>(bpffs_root: P) -> EbpfObjectLoader {
        EbpfObjectLoader {
            bpffs_root: bpffs_root.as_ref().to_path_buf(),
        }
    }

    fn load_object(
        &self,
        path: &Path,
        data: &[u8],
        info: &ObjectInfo,
        location: &Location<'_>,
    ) -> Result<(), ObjectError> {
        let pin_dir = self.bpffs_root.join(location.prefix);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let obj = object_name(&file_name);

        debug!(
            "Loading {} (license: {}, critical: {})",
            path.display(),
            info.license,
            info.critical
        );

        let mut bpf = BpfLoader::new()
            .map_pin_path(&pin_dir)
            .allow_unsupported_maps()
            .load(data)?;

        for (name, program) in bpf.programs_mut() {
            let pin_path = pin_dir.join(format!("prog_{}_{}", obj, name));
            if pin_path.exists() && usable_program(&pin_path) {
                debug!("Reusing pinned program: {}", pin_path.display());
                continue;
            }

            load_program(name, program)?;
            program.pin(&pin_path).map_err(|source| ObjectError::Pin {
                path: pin_path.clone(),
                source,
            })?;

            if !usable_program(&pin_path) {
                return Err(ObjectError::Unusable(pin_path));
            }
            debug!("Pinned program: {}", pin_path.display());
        }

        Ok(())
    }
}

fn load_program(name: &str, program: &mut Program) -> Result<(), ObjectError> {
    let r = match program {
        Program::SchedClassifier(p) => p.load(),
        Program::Xdp(p) => p.load(),
        Program::SocketFilter(p) => p.load(),
        Program::CgroupSkb(p) => p.load(),
        Program::CgroupSock(p) => p.load(),
        Program::CgroupSockAddr(p) => p.load(),
        Program::TracePoint(p) => p.load(),
        Program::KProbe(p) => p.load(),
        _ => {
            return Err(ObjectError::UnsupportedProgram {
                name: name.to_string(),
            })
        }
    };
    r.map_err(|source| ObjectError::Program {
        name: name.to_string(),
        source,
    })
}

impl ObjectLoader for EbpfObjectLoader {
    fn load_prog(
        &self,
        path: &Path,
        version: BpfLoaderVersion,
        location: &Location<'_>,
    ) -> ObjectLoad {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(source) => {
                return ObjectLoad {
                    critical: false,
                    result: Err(ObjectError::Io {
                        path: path.to_path_buf(),
                        source,
                    }),
                }
            }
        };

        let info = match ObjectInfo::parse(&data) {
            Ok(info) => info,
            Err(e) => {
                return ObjectLoad {
                    critical: false,
                    result: Err(e.into()),
                }
            }
        };

        if !version.in_range(info.min_ver, info.max_ver) {
            info!(
                "BpfLoader version {} ignoring ELF object {} with version range [0x{:05x}, 0x{:05x})",
                version,
                path.display(),
                info.min_ver,
                info.max_ver
            );
            return ObjectLoad {
                critical: info.critical,
                result: Ok(()),
            };
        }

        ObjectLoad {
            critical: info.critical,
            result: self.load_object(path, &data, &info, location),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestDir;
    use object::write::Object as ElfWriter;
    use object::{Architecture, BinaryFormat, Endianness, SectionKind};

    /// A relocatable ELF carrying only the given sections.
    fn elf_with(sections: &[(&str, &[u8])]) -> Vec<u8> {
        let mut obj = ElfWriter::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        for (name, data) in sections {
            let id = obj.add_section(Vec::new(), name.as_bytes().to_vec(), SectionKind::Data);
            obj.append_section_data(id, data, 4);
        }
        obj.write().unwrap()
    }

    fn write_object(dir: &TestDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, data).unwrap();
        path
    }

    fn location(prefix: &str) -> Location<'_> {
        Location {
            dir: "/nonexistent/",
            prefix,
        }
    }

    #[test]
    fn unreadable_object_is_not_critical() {
        let loader = EbpfObjectLoader::new("/nonexistent/bpffs");
        let load = loader.load_prog(
            Path::new("/nonexistent/netbpfload/offload.o"),
            BpfLoaderVersion::for_api_level(35),
            &location("tethering/"),
        );
        assert!(!load.critical);
        assert!(matches!(load.result, Err(ObjectError::Io { .. })));
    }

    #[test]
    fn non_elf_object_is_rejected() {
        let dir = TestDir::new("elf-garbage");
        let path = dir.write("garbage.o", "not an elf file");

        let loader = EbpfObjectLoader::new(dir.path());
        let load = loader.load_prog(
            &path,
            BpfLoaderVersion::for_api_level(33),
            &location("net_shared/"),
        );
        assert!(!load.critical);
        assert!(matches!(load.result, Err(ObjectError::Elf(_))));
    }

    #[test]
    fn empty_input_is_not_an_object() {
        assert!(ObjectInfo::parse(&[]).is_err());
    }

    #[test]
    fn metadata_sections_are_read() {
        let data = elf_with(&[
            ("critical", b"offload\0"),
            ("bpfloader_min_ver", &46u32.to_le_bytes()),
            ("bpfloader_max_ver", &0x10000u32.to_le_bytes()),
            ("license", b"Apache 2.0\0"),
        ]);
        let info = ObjectInfo::parse(&data).unwrap();
        assert_eq!(
            info,
            ObjectInfo {
                critical: true,
                min_ver: 46,
                max_ver: 0x10000,
                license: "Apache 2.0".to_string(),
            }
        );
    }

    #[test]
    fn missing_sections_take_defaults() {
        let data = elf_with(&[("maps", &[0u8; 4])]);
        let info = ObjectInfo::parse(&data).unwrap();
        assert!(!info.critical);
        assert_eq!(info.min_ver, DEFAULT_BPFLOADER_MIN_VER);
        assert_eq!(info.min_ver, 0);
        assert_eq!(info.max_ver, DEFAULT_BPFLOADER_MAX_VER);
        assert_eq!(info.max_ver, 0x10000);
        assert_eq!(info.license, "");
    }

    #[test]
    fn short_version_section_takes_default() {
        let data = elf_with(&[("bpfloader_min_ver", &[46u8, 0])]);
        assert_eq!(ObjectInfo::parse(&data).unwrap().min_ver, DEFAULT_BPFLOADER_MIN_VER);
    }

    #[test]
    fn object_newer_than_loader_is_skipped() {
        let dir = TestDir::new("elf-min-ver");
        let path = write_object(
            &dir,
            "future.o",
            &elf_with(&[
                ("critical", b"future\0"),
                ("bpfloader_min_ver", &46u32.to_le_bytes()),
            ]),
        );

        // api 35 runs loader version 45, below the object's floor of 46
        let loader = EbpfObjectLoader::new(dir.path());
        let load = loader.load_prog(
            &path,
            BpfLoaderVersion::for_api_level(35),
            &location("tethering/"),
        );
        assert!(load.critical);
        assert!(load.result.is_ok());
        assert!(!dir.path().join("tethering").exists());
    }

    #[test]
    fn max_version_is_exclusive() {
        let dir = TestDir::new("elf-max-ver");
        let path = write_object(
            &dir,
            "legacy.o",
            &elf_with(&[("bpfloader_max_ver", &45u32.to_le_bytes())]),
        );

        let loader = EbpfObjectLoader::new(dir.path());
        let load = loader.load_prog(
            &path,
            BpfLoaderVersion::for_api_level(35),
            &location("net_shared/"),
        );
        assert!(!load.critical);
        assert!(load.result.is_ok());
        assert!(!dir.path().join("net_shared").exists());
    }
}

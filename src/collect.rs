//! Per-Architecture Assembly Collector
//!
//! The resolved assembly list is flat. This module partitions it by target
//! architecture and allocates the record arenas all later phases work on.
//! Satellite assemblies carry no architecture and are replicated into every
//! architecture bucket once the primary partition is complete.

/// Collector Errors
///
/// This is the exhaustive list of possible errors raised by the collector.
/// All of them are configuration or content errors and abort packaging.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The assembly at the specified path has no architecture metadata.
    #[error("assembly {0:?} has no architecture metadata")]
    MissingArchitecture(std::path::PathBuf),
    /// The architecture metadata of the assembly is not a known Android ABI
    /// nor a runtime identifier.
    #[error("assembly {0:?} has unknown architecture {1:?}")]
    UnknownArchitecture(std::path::PathBuf, String),
    /// The satellite assembly at the specified path has no culture metadata.
    #[error("satellite assembly {0:?} has no culture metadata")]
    MissingCulture(std::path::PathBuf),
    /// The culture metadata of a satellite does not match the directory the
    /// satellite is located in.
    #[error("satellite assembly {0:?} is not located in a directory for culture {1:?}")]
    CultureMismatch(std::path::PathBuf, String),
    /// The assembly path has no valid UTF-8 file name.
    #[error("assembly {0:?} has no valid file name")]
    InvalidName(std::path::PathBuf),
    /// The assembly file could not be inspected.
    #[error("cannot access assembly {0:?}: {1}")]
    MissingFile(std::path::PathBuf, std::io::Error),
    /// The architectures do not carry the same set of assemblies. The
    /// logical name is missing from the first architecture listed.
    #[error("assembly {1:?} is missing for architecture {0}")]
    Inconsistent(crate::platform::android::Arch, String),
}

/// Collected Assemblies
///
/// Result of the collector: one record arena per architecture, ordered by
/// architecture.
#[derive(Clone, Debug, Default)]
pub struct Collection {
    pub archs: Vec<crate::assembly::ArchAssemblies>,
}

impl Collection {
    /// Get the arena of the given architecture, if it was collected.
    pub fn arch(
        &self,
        arch: crate::platform::android::Arch,
    ) -> Option<&crate::assembly::ArchAssemblies> {
        self.archs.iter().find(|v| v.arch == arch)
    }
}

// Check whether an item is a satellite assembly
//
// Satellites are identified by their culture metadata. Items without any
// metadata that are named like resource assemblies are treated as
// satellites as well, so a missing culture is reported instead of a missing
// architecture. Architecture metadata always marks a regular assembly.
fn is_satellite(item: &crate::assembly::ResolvedAssembly) -> bool {
    if item.culture.is_some() {
        return true;
    }

    item.abi.is_none()
        && item.path.file_name()
            .and_then(|v| v.to_str())
            .map_or(false, |v| v.to_ascii_lowercase().ends_with(".resources.dll"))
}

fn file_name(
    item: &crate::assembly::ResolvedAssembly,
) -> Result<String, Error> {
    item.path.file_name()
        .and_then(|v| v.to_str())
        .map(|v| v.to_string())
        .ok_or_else(|| Error::InvalidName(item.path.clone()))
}

fn file_size(path: &std::path::Path) -> Result<u64, Error> {
    std::fs::metadata(path)
        .map(|v| v.len())
        .map_err(|v| Error::MissingFile(path.to_path_buf(), v))
}

// Compute the logical name of a satellite
//
// Satellites are named `<culture>/<file>`. The culture is taken from the
// metadata, but must match the name of the directory the file lives in.
fn satellite_name(
    item: &crate::assembly::ResolvedAssembly,
) -> Result<String, Error> {
    let culture = item.culture.as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::MissingCulture(item.path.clone()))?;
    let dir = item.path.parent()
        .and_then(|v| v.file_name())
        .and_then(|v| v.to_str());

    if dir != Some(culture) {
        return Err(Error::CultureMismatch(item.path.clone(), culture.to_string()));
    }

    Ok(format!("{}/{}", culture, file_name(item)?))
}

// Append a record unless its name is already taken in this arena.
fn insert(
    arena: &mut crate::assembly::ArchAssemblies,
    name: String,
    item: &crate::assembly::ResolvedAssembly,
    size: u64,
) {
    if arena.position(&name).is_some() {
        log::debug!(
            "{}: duplicate assembly {:?} from {:?} ignored",
            arena.arch, name, item.path,
        );
    } else {
        arena.push(name, item, size);
    }
}

// Verify all architectures carry the same assemblies
//
// The first architecture serves as template. Every other architecture must
// have exactly the same set of logical names.
fn validate(archs: &[crate::assembly::ArchAssemblies]) -> Result<(), Error> {
    let Some(template) = archs.first() else {
        return Ok(());
    };

    for arena in archs.iter().skip(1) {
        for name in template.names.iter() {
            if arena.position(name).is_none() {
                return Err(Error::Inconsistent(arena.arch, name.clone()));
            }
        }
        for name in arena.names.iter() {
            if template.position(name).is_none() {
                return Err(Error::Inconsistent(template.arch, name.clone()));
            }
        }
    }

    Ok(())
}

/// Collect assemblies per architecture
///
/// Partition `list` by architecture and allocate one record arena per
/// architecture seen. If `supported` is non-empty, items for other
/// architectures are ignored. Satellites are appended to every arena after
/// all architecture-specific items, in list order. Duplicate logical names
/// within one architecture are ignored after their first occurrence.
///
/// Afterwards, all arenas are verified to hold the same set of logical
/// names, since the runtime expects every architecture to be complete.
pub fn collect(
    list: &crate::assembly::AssemblyList,
    supported: &[crate::platform::android::Arch],
) -> Result<Collection, Error> {
    let mut buckets: std::collections::BTreeMap<
        crate::platform::android::Arch,
        crate::assembly::ArchAssemblies,
    > = std::collections::BTreeMap::new();
    let mut satellites = Vec::new();

    for item in list.assemblies.iter() {
        if is_satellite(item) {
            let name = satellite_name(item)?;
            let size = file_size(&item.path)?;
            satellites.push((name, item, size));
            continue;
        }

        let abi = item.abi.as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::MissingArchitecture(item.path.clone()))?;
        let arch = abi.parse::<crate::platform::android::Arch>()
            .map_err(|_| Error::UnknownArchitecture(item.path.clone(), abi.to_string()))?;

        if !supported.is_empty() && !supported.contains(&arch) {
            log::debug!("{}: unsupported architecture, {:?} ignored", arch, item.path);
            continue;
        }

        let name = file_name(item)?;
        let size = file_size(&item.path)?;
        let arena = buckets.entry(arch)
            .or_insert_with(|| crate::assembly::ArchAssemblies::new(arch));

        insert(arena, name, item, size);
    }

    // Replicate satellites into every architecture, regardless of when in
    // the list the architecture was first seen.
    for arena in buckets.values_mut() {
        for (name, item, size) in satellites.iter() {
            insert(arena, name.clone(), item, *size);
        }
    }

    let archs: Vec<_> = buckets.into_values().collect();
    validate(&archs)?;

    for arena in archs.iter() {
        log::debug!("{}: collected {} assemblies", arena.arch, arena.len());
    }

    Ok(Collection { archs: archs })
}

//! Compression Planner
//!
//! The planner assigns every compressible assembly a descriptor index within
//! its architecture. Those indices are baked into compressed payloads as well
//! as into the generated native index, so every phase of a build must see the
//! exact same assignment.
//!
//! Plans are kept in a build-scoped registry keyed by project identity. The
//! registry has two states: a `PlanRegistry` is exclusively owned and can be
//! written to, while a `SealedPlanRegistry` is immutable and can be shared
//! freely between worker threads. Sealing the registry is the barrier between
//! planning and all phases consuming plans.

/// Planner Errors
///
/// This is the exhaustive list of possible errors raised by the planner and
/// the plan registry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A plan was requested that was never registered in this build. This
    /// always indicates a phase-ordering bug.
    #[error("no compression plan registered for {0:?}")]
    PlanNotFound(String),
    /// The assembly is too large to be described by the 32-bit native
    /// structures.
    #[error("{0}: assembly {1:?} exceeds the maximum size of 4 GiB")]
    AssemblyTooLarge(crate::platform::android::Arch, String),
    /// The architecture has more planned assemblies than descriptor indices
    /// can address.
    #[error("{0}: too many compressed assemblies")]
    TooManyAssemblies(crate::platform::android::Arch),
}

/// Plan Entry
///
/// Planning result for one assembly of one architecture.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlanEntry {
    /// Index of the assembly in the compressed-assembly descriptor table.
    pub descriptor_index: u32,
    /// Size of the assembly before compression.
    pub uncompressed_size: u32,
    /// Architecture the assembly belongs to.
    pub arch: crate::platform::android::Arch,
    /// File name of the assembly without its culture directory.
    pub base_name: String,
}

/// Per-Architecture Plan
///
/// Plan entries of one architecture in descriptor order. The entry with
/// descriptor index `i` is at position `i`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ArchPlan {
    entries: Vec<(String, PlanEntry)>,
    lookup: std::collections::BTreeMap<String, u32>,
}

impl ArchPlan {
    /// Number of planned assemblies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no assembly was planned.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the plan entry of an assembly by its logical name.
    pub fn get(&self, name: &str) -> Option<&PlanEntry> {
        self.lookup.get(name).map(|v| &self.entries[*v as usize].1)
    }

    /// Iterate logical names and entries in descriptor order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PlanEntry)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Compression Plan
///
/// Plans of all architectures of one project.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CompressionPlan {
    archs: std::collections::BTreeMap<crate::platform::android::Arch, ArchPlan>,
}

impl CompressionPlan {
    /// Get the plan of an architecture
    ///
    /// Architectures without any compressible assembly have an empty plan.
    pub fn arch(&self, arch: crate::platform::android::Arch) -> &ArchPlan {
        static EMPTY: std::sync::OnceLock<ArchPlan> = std::sync::OnceLock::new();

        self.archs.get(&arch)
            .unwrap_or_else(|| EMPTY.get_or_init(ArchPlan::default))
    }

    /// Look up a plan entry by its per-architecture key
    ///
    /// `key` must have the format produced by `plan_key()`.
    pub fn get_by_key(&self, key: &str) -> Option<&PlanEntry> {
        let (abi, name) = key.split_once('/')?;
        let arch = crate::platform::android::Arch::from_abi(abi)?;

        self.archs.get(&arch)?.get(name)
    }
}

/// Per-architecture key
///
/// Combine architecture and logical name into the key used for plan entries
/// and compressed file names. The key is `<abi>/<logical-name>`, and it can
/// be split back into its components at the first `/`.
pub fn plan_key(arch: crate::platform::android::Arch, name: &str) -> String {
    format!("{}/{}", arch.abi(), name)
}

/// Registry key of a project
///
/// Derive the registry key of a project from its path. The path is made
/// absolute, if possible, so different spellings of the same project share
/// one plan.
pub fn registry_key(project: &std::path::Path) -> String {
    let path = std::fs::canonicalize(project)
        .unwrap_or_else(|_| project.to_path_buf());

    format!("osiris-bundle:compressed-assemblies:{}", path.display())
}

/// Writable Plan Registry
///
/// Build-scoped registry of compression plans. Plans can only be added or
/// removed while the registry is exclusively owned. Use `seal()` to turn it
/// into a shareable, read-only registry.
#[derive(Debug, Default)]
pub struct PlanRegistry {
    plans: std::collections::BTreeMap<String, CompressionPlan>,
}

/// Sealed Plan Registry
///
/// Read-only view of all plans of a build. It is cheap to clone and can be
/// shared across threads without any locking.
#[derive(Clone, Debug)]
pub struct SealedPlanRegistry {
    plans: std::sync::Arc<std::collections::BTreeMap<String, CompressionPlan>>,
}

impl PlanRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plan
    ///
    /// Store `plan` under `key`. A plan previously registered under the same
    /// key is replaced and returned.
    pub fn register(
        &mut self,
        key: String,
        plan: CompressionPlan,
    ) -> Option<CompressionPlan> {
        self.plans.insert(key, plan)
    }

    /// Unregister a plan
    ///
    /// Remove the plan registered under `key` and transfer its ownership to
    /// the caller.
    pub fn unregister(&mut self, key: &str) -> Result<CompressionPlan, Error> {
        self.plans.remove(key)
            .ok_or_else(|| Error::PlanNotFound(key.to_string()))
    }

    /// Look up a plan while still planning.
    pub fn get(&self, key: &str) -> Result<&CompressionPlan, Error> {
        self.plans.get(key)
            .ok_or_else(|| Error::PlanNotFound(key.to_string()))
    }

    /// Finish planning
    ///
    /// Turn the registry into its read-only, shareable state.
    pub fn seal(self) -> SealedPlanRegistry {
        SealedPlanRegistry {
            plans: std::sync::Arc::new(self.plans),
        }
    }
}

impl SealedPlanRegistry {
    /// Look up a plan
    ///
    /// Return the plan registered under `key`. A missing plan is a fatal
    /// error, as plans are always registered before the registry is sealed.
    pub fn get(&self, key: &str) -> Result<&CompressionPlan, Error> {
        self.plans.get(key)
            .ok_or_else(|| Error::PlanNotFound(key.to_string()))
    }

    /// Reopen the registry
    ///
    /// Turn the registry back into its writable state, for instance to hand
    /// plans over to another build phase. If other copies of the sealed
    /// registry are still alive, the plans are cloned.
    pub fn unseal(self) -> PlanRegistry {
        PlanRegistry {
            plans: std::sync::Arc::try_unwrap(self.plans)
                .unwrap_or_else(|v| (*v).clone()),
        }
    }
}

/// Plan compression
///
/// Assign descriptor indices to all assemblies of `collection` that are not
/// opted out of compression, in first-seen order per architecture, starting
/// at zero. If `enabled` is false, no assembly is planned at all. Duplicate
/// logical names are skipped after their first occurrence.
pub fn plan(
    collection: &crate::collect::Collection,
    enabled: bool,
) -> Result<CompressionPlan, Error> {
    let mut plan = CompressionPlan::default();

    for arena in collection.archs.iter() {
        let mut arch_plan = ArchPlan::default();

        for record in arena.records() {
            if !enabled || record.skip_compression {
                continue;
            }

            if arch_plan.lookup.contains_key(record.name) {
                log::debug!(
                    "{}: duplicate assembly {:?} not planned again",
                    arena.arch, record.name,
                );
                continue;
            }

            let descriptor_index = u32::try_from(arch_plan.entries.len())
                .map_err(|_| Error::TooManyAssemblies(arena.arch))?;
            let uncompressed_size = u32::try_from(record.size)
                .map_err(|_| Error::AssemblyTooLarge(arena.arch, record.name.to_string()))?;
            let base_name = record.name.rsplit('/').next()
                .unwrap_or(record.name)
                .to_string();

            arch_plan.lookup.insert(record.name.to_string(), descriptor_index);
            arch_plan.entries.push((
                record.name.to_string(),
                PlanEntry {
                    descriptor_index: descriptor_index,
                    uncompressed_size: uncompressed_size,
                    arch: arena.arch,
                    base_name: base_name,
                },
            ));
        }

        log::debug!("{}: planned {} compressed assemblies", arena.arch, arch_plan.len());
        plan.archs.insert(arena.arch, arch_plan);
    }

    Ok(plan)
}

/// Plan and register
///
/// Run `plan()` and register the result under the registry key of
/// `project`. Returns the key used.
pub fn plan_into(
    registry: &mut PlanRegistry,
    project: &std::path::Path,
    collection: &crate::collect::Collection,
    enabled: bool,
) -> Result<String, Error> {
    let key = registry_key(project);
    let plan = plan(collection, enabled)?;

    if registry.register(key.clone(), plan).is_some() {
        log::debug!("compression plan {:?} replaced", key);
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{ArchAssemblies, ResolvedAssembly};
    use crate::collect::Collection;
    use crate::platform::android::Arch;

    fn arena(arch: Arch, names: &[(&str, u64, bool)]) -> ArchAssemblies {
        let mut a = ArchAssemblies::new(arch);
        for (name, size, skip) in names {
            let item = ResolvedAssembly {
                path: std::path::PathBuf::from(format!("/obj/{}", name)),
                abi: Some(arch.abi().to_string()),
                culture: None,
                skip_compression: *skip,
                debug_symbols: None,
                config: None,
            };
            a.push(name.to_string(), &item, *size);
        }
        a
    }

    // Verify descriptor assignment
    //
    // Indices are assigned per architecture in first-seen order, skipping
    // opted-out assemblies, and start at zero for every architecture.
    #[test]
    fn plan_assigns_indices() {
        let c = Collection {
            archs: vec![
                arena(Arch::Arm64, &[("A.dll", 10, false), ("B.dll", 20, true), ("es/C.dll", 30, false)]),
                arena(Arch::X86_64, &[("C.dll", 5, false)]),
            ],
        };

        let p = plan(&c, true).unwrap();

        let arm64 = p.arch(Arch::Arm64);
        assert_eq!(arm64.len(), 2);
        assert_eq!(arm64.get("A.dll").unwrap().descriptor_index, 0);
        assert!(arm64.get("B.dll").is_none());
        let c = arm64.get("es/C.dll").unwrap();
        assert_eq!(c.descriptor_index, 1);
        assert_eq!(c.uncompressed_size, 30);
        assert_eq!(c.base_name, "C.dll");

        assert_eq!(p.arch(Arch::X86_64).get("C.dll").unwrap().descriptor_index, 0);
        assert!(p.arch(Arch::X86).is_empty());
        assert_eq!(p.get_by_key(&plan_key(Arch::Arm64, "es/C.dll")).unwrap().descriptor_index, 1);
    }

    // Verify disabled compression plans nothing.
    #[test]
    fn plan_disabled() {
        let c = Collection { archs: vec![arena(Arch::X86, &[("A.dll", 10, false)])] };

        assert!(plan(&c, false).unwrap().arch(Arch::X86).is_empty());
    }

    // Verify registry state transitions
    //
    // Plans are visible after sealing, unknown keys are fatal, and plans can
    // be handed over by unsealing and unregistering.
    #[test]
    fn registry_lifecycle() {
        let c = Collection { archs: vec![arena(Arch::X86, &[("A.dll", 10, false)])] };
        let mut r = PlanRegistry::new();

        let key = plan_into(&mut r, std::path::Path::new("/nonexistent/App.csproj"), &c, true).unwrap();
        assert!(key.ends_with("/nonexistent/App.csproj"));

        let sealed = r.seal();
        let shared = sealed.clone();
        std::thread::spawn(move || {
            assert_eq!(shared.get(&key).unwrap().arch(Arch::X86).len(), 1);
        }).join().unwrap();

        assert!(matches!(sealed.get("other"), Err(Error::PlanNotFound(_))));

        let key = registry_key(std::path::Path::new("/nonexistent/App.csproj"));
        let mut r = sealed.unseal();
        let p = r.unregister(&key).unwrap();
        assert_eq!(p.arch(Arch::X86).get("A.dll").unwrap().descriptor_index, 0);
        assert!(r.unregister(&key).is_err());
    }

    // Verify oversized assemblies are refused.
    #[test]
    fn plan_too_large() {
        let c = Collection { archs: vec![arena(Arch::X86, &[("A.dll", u32::MAX as u64 + 1, false)])] };

        assert!(matches!(plan(&c, true), Err(Error::AssemblyTooLarge(..))));
    }
}

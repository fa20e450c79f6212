//! Packaging Strategy Selector
//!
//! Decides how the records of an architecture are physically packaged. There
//! are exactly two strategies:
//!
//! * **Discrete**: every assembly is wrapped into its own container, named
//!   such that it cannot clash with real native libraries.
//! * **Consolidated**: all assemblies of an architecture are concatenated
//!   into a single blob following a page-sized container stub.
//!
//! Fast-path assemblies are resolved by the runtime through a different
//! mechanism and never end up in a packaging unit.

/// Packaging Mode
///
/// Physical packaging strategy, selected once per build.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackagingMode {
    /// One container per assembly.
    Discrete,
    /// One blob per architecture.
    #[default]
    Consolidated,
}

impl PackagingMode {
    /// Numeric tag of the mode, as stored in the native index.
    pub fn tag(&self) -> u32 {
        match self {
            PackagingMode::Discrete => 0,
            PackagingMode::Consolidated => 1,
        }
    }
}

/// Packaging Unit
///
/// One physical output file and the records it contains, in storage order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackagingUnit {
    /// Architecture of all contained records.
    pub arch: crate::platform::android::Arch,
    /// Path of the container file.
    pub path: std::path::PathBuf,
    /// Records stored in the unit, by arena index. Exactly one record in
    /// discrete mode.
    pub records: Vec<crate::assembly::RecordIndex>,
    /// Padded stub size, in consolidated mode only.
    pub stub_size: Option<u64>,
}

/// Container name of a discrete assembly
///
/// Regular assemblies are named `lib_<name>.so`, satellites
/// `lib-<culture>_<name>.so`, where `<name>` is the file name without the
/// culture directory.
pub fn discrete_name(name: &str) -> String {
    match name.split_once('/') {
        Some((culture, file)) => format!("lib-{}_{}.so", culture, file),
        None => format!("lib_{}.so", name),
    }
}

/// Container name of a configuration sidecar
///
/// Configuration keeps the full assembly name, e.g. `lib_App.dll.config.so`.
pub fn config_name(name: &str) -> String {
    discrete_name(&format!("{}.config", name))
}

/// Container name of a debug symbol sidecar
///
/// Debug symbols replace the assembly extension, e.g. `lib_App.pdb.so`.
pub fn debug_symbols_name(name: &str) -> String {
    discrete_name(&format!("{}.pdb", crate::assembly::name_without_extension(name)))
}

/// File name of the consolidated blob of an architecture.
pub fn blob_name(arch: crate::platform::android::Arch) -> String {
    format!("libassemblies.{}.blob.so", arch.abi())
}

/// Select packaging units
///
/// Produce the packaging units of one architecture below `dir`. Records
/// named in `fast_path` are excluded. In discrete mode, every remaining
/// record becomes its own unit. In consolidated mode, a single unit holds all
/// remaining records in arena order, so satellites follow the primary
/// assemblies. An architecture without remaining records yields no unit.
pub fn select(
    mode: PackagingMode,
    arena: &crate::assembly::ArchAssemblies,
    fast_path: &[String],
    dir: &std::path::Path,
) -> Vec<PackagingUnit> {
    let dir = dir.join(arena.arch.abi());
    let records: Vec<_> = arena.records()
        .filter(|v| !fast_path.iter().any(|f| f == v.name))
        .map(|v| v.index)
        .collect();

    match mode {
        PackagingMode::Discrete => {
            records.into_iter().map(|v| PackagingUnit {
                arch: arena.arch,
                path: dir.join(discrete_name(&arena.names[v])),
                records: vec![v],
                stub_size: None,
            }).collect()
        },
        PackagingMode::Consolidated => {
            if records.is_empty() {
                return Vec::new();
            }

            vec![PackagingUnit {
                arch: arena.arch,
                path: dir.join(blob_name(arena.arch)),
                records: records,
                stub_size: Some(crate::blob::STUB_SIZE),
            }]
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{ArchAssemblies, ResolvedAssembly};
    use crate::platform::android::Arch;

    fn arena() -> ArchAssemblies {
        let mut a = ArchAssemblies::new(Arch::X86_64);
        for name in ["App.dll", "Mono.Android.dll", "es/App.resources.dll"] {
            let item = ResolvedAssembly {
                path: std::path::PathBuf::from(format!("/obj/{}", name)),
                abi: None,
                culture: None,
                skip_compression: false,
                debug_symbols: None,
                config: None,
            };
            a.push(name.to_string(), &item, 1);
        }
        a
    }

    // Verify name mangling
    #[test]
    fn names() {
        assert_eq!(discrete_name("App.dll"), "lib_App.dll.so");
        assert_eq!(discrete_name("pt-BR/App.resources.dll"), "lib-pt-BR_App.resources.dll.so");
        assert_eq!(config_name("App.dll"), "lib_App.dll.config.so");
        assert_eq!(debug_symbols_name("App.dll"), "lib_App.pdb.so");
        assert_eq!(debug_symbols_name("es/App.resources.dll"), "lib-es_App.resources.pdb.so");
        assert_eq!(blob_name(Arch::Arm), "libassemblies.armeabi-v7a.blob.so");
    }

    // Verify discrete selection
    //
    // Every non-fast-path record gets its own unit, in arena order.
    #[test]
    fn select_discrete() {
        let a = arena();
        let fast = vec!["Mono.Android.dll".to_string()];
        let units = select(PackagingMode::Discrete, &a, &fast, std::path::Path::new("/out"));

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].records, vec![0]);
        assert_eq!(units[0].path, std::path::Path::new("/out/x86_64/lib_App.dll.so"));
        assert_eq!(units[1].records, vec![2]);
        assert_eq!(units[1].path, std::path::Path::new("/out/x86_64/lib-es_App.resources.dll.so"));
        assert!(units.iter().all(|v| v.stub_size.is_none()));
    }

    // Verify consolidated selection
    //
    // A single unit holds all non-fast-path records, and an architecture
    // consisting only of fast-path assemblies produces no blob.
    #[test]
    fn select_consolidated() {
        let a = arena();
        let units = select(PackagingMode::Consolidated, &a, &[], std::path::Path::new("/out"));

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].records, vec![0, 1, 2]);
        assert_eq!(units[0].stub_size, Some(4096));
        assert_eq!(units[0].path, std::path::Path::new("/out/x86_64/libassemblies.x86_64.blob.so"));

        let fast: Vec<String> = a.names.clone();
        assert!(select(PackagingMode::Consolidated, &a, &fast, std::path::Path::new("/out")).is_empty());
    }
}

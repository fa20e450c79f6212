//! Package Assemblies
//!
//! This module implements the `package` operation, which runs the complete
//! packaging pipeline: collect assemblies per architecture, plan and perform
//! compression, package assemblies into native containers, and generate the
//! native index of every architecture.
//!
//! Collection and planning happen once for the whole build. Sealing the plan
//! registry marks the end of planning, after which all architectures are
//! processed in parallel. Architectures share nothing but the sealed
//! registry, and each one writes its own set of output files.

/// Packaging Errors
///
/// This is the exhaustive list of possible errors raised by the package
/// operation. Errors of individual architectures carry the architecture.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Collecting assemblies failed.
    #[error(transparent)]
    Collect(#[from] crate::collect::Error),
    /// Planning compression, or looking up the plan, failed.
    #[error(transparent)]
    Plan(#[from] crate::plan::Error),
    /// Reading the prebuilt stub failed.
    #[error("cannot read blob stub {0:?}: {1}")]
    Stub(std::path::PathBuf, std::io::Error),
    /// The prebuilt stub is not a native binary of the architecture it is
    /// used for.
    #[error("{1}: blob stub {0:?} is not a native binary of this architecture")]
    StubMachine(std::path::PathBuf, crate::platform::android::Arch),
    /// Compressing assemblies of an architecture failed.
    #[error("{0}: {1}")]
    Compress(crate::platform::android::Arch, crate::compress::Error),
    /// Wrapping assemblies or sidecars of an architecture failed.
    #[error("{0}: {1}")]
    Wrap(crate::platform::android::Arch, crate::dso::Error),
    /// Assembling the blob of an architecture failed.
    #[error("{0}: {1}")]
    Blob(crate::platform::android::Arch, crate::blob::Error),
    /// Generating the native index of an architecture failed.
    #[error("{0}: {1}")]
    Index(crate::platform::android::Arch, crate::index::Error),
    /// Writing the native index of an architecture failed.
    #[error("{0}: {1}")]
    Update(crate::platform::android::Arch, crate::update::Error),
    /// The build was cancelled before the architecture was scheduled.
    #[error("{0}: packaging cancelled")]
    Cancelled(crate::platform::android::Arch),
}

/// Package Options
///
/// All inputs of the package operation besides the assembly list.
#[derive(Clone, Debug)]
pub struct Options {
    /// Resolved packaging configuration.
    pub packaging: crate::manifest::ViewPackaging,
    /// Path identifying the project. Used as the key of the compression
    /// plan.
    pub project: std::path::PathBuf,
    /// Display name of the application, used in reports.
    pub application: Option<String>,
}

/// Architecture Report
///
/// Outcome of packaging one architecture.
#[derive(Clone, Debug)]
pub struct ArchReport {
    pub arch: crate::platform::android::Arch,
    /// Native containers produced for the architecture, including sidecars.
    pub containers: Vec<std::path::PathBuf>,
    /// Number of containers that had to be rewritten.
    pub containers_rewritten: usize,
    /// Number of assemblies stored compressed.
    pub compressed: usize,
    /// Path of the generated native index.
    pub index: std::path::PathBuf,
    /// Whether the native index had to be rewritten.
    pub index_rewritten: bool,
}

/// Package Report
///
/// Outcome of the package operation. The plan registry is handed back, so
/// later phases of the same build can use the same descriptor indices.
#[derive(Debug)]
pub struct Report {
    pub application: Option<String>,
    pub archs: Vec<ArchReport>,
    pub registry: crate::plan::SealedPlanRegistry,
    pub registry_key: String,
}

// Read or generate the blob stub of an architecture
//
// A prebuilt stub must be a native binary of the machine of `arch`, since
// the package manager refuses libraries of foreign machines.
fn stub(
    options: &Options,
    arch: crate::platform::android::Arch,
) -> Result<Vec<u8>, Error> {
    let Some(path) = options.packaging.stub_path_for(arch) else {
        return crate::dso::stub(arch, &crate::select::blob_name(arch))
            .map_err(|v| Error::Wrap(arch, v));
    };

    let data = std::fs::read(&path)
        .map_err(|v| Error::Stub(path.clone(), v))?;

    if crate::dso::architecture(&data) != Some(arch.object_architecture()) {
        return Err(Error::StubMachine(path, arch));
    }

    Ok(data)
}

// Wrap discrete packaging units
//
// Every unit holds exactly one record. Sidecars are wrapped next to their
// assembly: configuration always, debug symbols only if requested.
fn wrap_units(
    options: &Options,
    arena: &crate::assembly::ArchAssemblies,
    units: &[crate::select::PackagingUnit],
    stored: &[&std::path::Path],
    report: &mut ArchReport,
) -> Result<(), Error> {
    let arch = arena.arch;

    for unit in units.iter() {
        let mut files = Vec::new();

        for &index in unit.records.iter() {
            let record = arena.record(index);

            files.push((
                stored[index].to_path_buf(),
                unit.path.clone(),
            ));

            if let Some(config) = record.config.filter(|v| v.exists()) {
                let name = crate::select::config_name(record.name);
                files.push((config.to_path_buf(), unit.path.with_file_name(name)));
            }

            if options.packaging.include_debug_symbols {
                if let Some(pdb) = record.debug_symbols.filter(|v| v.exists()) {
                    let name = crate::select::debug_symbols_name(record.name);
                    files.push((pdb.to_path_buf(), unit.path.with_file_name(name)));
                }
            }
        }

        for (input, output) in files {
            let name = output.file_name()
                .and_then(|v| v.to_str())
                .unwrap_or_default()
                .to_string();
            let update = crate::dso::wrap_file(arch, &input, &name, &output)
                .map_err(|v| Error::Wrap(arch, v))?;

            if update.rewritten() {
                report.containers_rewritten += 1;
            }
            report.containers.push(output);
        }
    }

    Ok(())
}

// Package a single architecture
//
// Runs all per-architecture phases in order. Only reads shared state.
fn package_arch(
    options: &Options,
    arena: &crate::assembly::ArchAssemblies,
    registry: &crate::plan::SealedPlanRegistry,
    registry_key: &str,
) -> Result<ArchReport, Error> {
    let arch = arena.arch;
    let packaging = &options.packaging;
    let plan = registry.get(registry_key)?.arch(arch);

    let compressed = if packaging.compression {
        crate::compress::compress_arch(arena, plan, &packaging.compressed_dir())
            .map_err(|v| Error::Compress(arch, v))?
    } else {
        vec![None; arena.len()]
    };

    let stored: Vec<&std::path::Path> = arena.sources.iter()
        .zip(compressed.iter())
        .map(|(source, c)| c.as_ref().map_or(source.as_path(), |v| v.path.as_path()))
        .collect();

    let units = crate::select::select(
        packaging.mode,
        arena,
        &packaging.fast_path,
        &packaging.containers_dir(),
    );

    let mut report = ArchReport {
        arch: arch,
        containers: Vec::new(),
        containers_rewritten: 0,
        compressed: compressed.iter().filter(|v| v.is_some()).count(),
        index: packaging.index_dir().join(crate::index::file_name(arch)),
        index_rewritten: false,
    };

    let offsets = match packaging.mode {
        crate::select::PackagingMode::Discrete => {
            wrap_units(options, arena, &units, &stored, &mut report)?;
            vec![0; arena.len()]
        },
        crate::select::PackagingMode::Consolidated => {
            let mut offsets = vec![0; arena.len()];

            if let Some(unit) = units.first() {
                let stub = stub(options, arch)?;
                let blob = crate::blob::assemble(unit, &stub, &stored)
                    .map_err(|v| Error::Blob(arch, v))?;

                if blob.update.rewritten() {
                    report.containers_rewritten += 1;
                }
                report.containers.push(unit.path.clone());
                offsets = blob.offsets;
            }

            offsets
        },
    };

    let text = crate::index::generate(&crate::index::Input {
        arena: arena,
        plan: plan,
        compressed: &compressed,
        offsets: &offsets,
        fast_path: &packaging.fast_path,
        mode: packaging.mode,
    }).map_err(|v| Error::Index(arch, v))?;

    report.index_rewritten = crate::update::update_file(&report.index, text.as_bytes())
        .map_err(|v| Error::Update(arch, v))?
        .rewritten();

    log::info!(
        "{}: {} assemblies, {} compressed, {} containers ({} rewritten), index {}",
        arch,
        arena.len(),
        report.compressed,
        report.containers.len(),
        report.containers_rewritten,
        if report.index_rewritten { "rewritten" } else { "unchanged" },
    );

    Ok(report)
}

/// Package assemblies
///
/// Run the packaging pipeline on `list`. Architectures are processed in
/// parallel once planning is complete. If `cancel` is set, architectures not
/// yet started are skipped, while running ones complete.
///
/// All architectures are processed even if some fail. Every failure is
/// logged, and the first one, in architecture order, is returned.
pub fn package(
    options: &Options,
    list: &crate::assembly::AssemblyList,
    cancel: &std::sync::atomic::AtomicBool,
) -> Result<Report, Error> {
    use rayon::prelude::*;

    if let Some(name) = &options.application {
        log::info!("packaging assemblies of {}", name);
    }

    let collection = crate::collect::collect(list, &options.packaging.supported_abis)?;

    let mut registry = crate::plan::PlanRegistry::new();
    let registry_key = crate::plan::plan_into(
        &mut registry,
        &options.project,
        &collection,
        options.packaging.compression,
    )?;
    let registry = registry.seal();

    let results: Vec<Result<ArchReport, Error>> = collection.archs
        .par_iter()
        .map(|arena| {
            if cancel.load(std::sync::atomic::Ordering::Relaxed) {
                return Err(Error::Cancelled(arena.arch));
            }
            package_arch(options, arena, &registry, &registry_key)
        })
        .collect();

    let mut archs = Vec::with_capacity(results.len());
    let mut first = None;

    for result in results {
        match result {
            Ok(v) => archs.push(v),
            Err(e) => {
                log::error!("{}", e);
                first.get_or_insert(e);
            },
        }
    }

    if let Some(e) = first {
        return Err(e);
    }

    Ok(Report {
        application: options.application.clone(),
        archs: archs,
        registry: registry,
        registry_key: registry_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{AssemblyList, ResolvedAssembly};
    use crate::platform::android::Arch;
    use crate::select::PackagingMode;

    fn options(dir: &std::path::Path, mode: PackagingMode) -> Options {
        let m = crate::manifest::Manifest::parse_str("version = 1").unwrap();
        let mut packaging = m.view_packaging(dir);
        packaging.mode = mode;
        packaging.output_path = dir.join("out");

        Options {
            packaging: packaging,
            project: dir.join("App.csproj"),
            application: Some("App".to_string()),
        }
    }

    fn list(dir: &std::path::Path) -> AssemblyList {
        let app = dir.join("obj/x86/App.dll");
        std::fs::create_dir_all(app.parent().unwrap()).unwrap();
        std::fs::write(&app, vec![0u8; 4000]).unwrap();
        std::fs::write(dir.join("obj/x86/App.dll.config"), "<configuration/>").unwrap();

        AssemblyList {
            assemblies: vec![ResolvedAssembly {
                path: app.clone(),
                abi: Some("x86".to_string()),
                culture: None,
                skip_compression: false,
                debug_symbols: Some(dir.join("obj/x86/App.pdb")),
                config: Some(dir.join("obj/x86/App.dll.config")),
            }],
        }
    }

    // Verify discrete packaging
    //
    // The assembly is compressed and wrapped, its configuration is wrapped
    // as a sidecar, and the plan stays available after packaging.
    #[test]
    fn package_discrete() {
        let dir = tempfile::tempdir().unwrap();
        let o = options(dir.path(), PackagingMode::Discrete);
        let cancel = std::sync::atomic::AtomicBool::new(false);

        let r = package(&o, &list(dir.path()), &cancel).unwrap();

        assert_eq!(r.archs.len(), 1);
        let a = &r.archs[0];
        assert_eq!(a.arch, Arch::X86);
        assert_eq!(a.compressed, 1);
        assert_eq!(a.containers.len(), 2);
        assert!(a.containers[0].ends_with("x86/lib_App.dll.so"));
        assert!(a.containers[1].ends_with("x86/lib_App.dll.config.so"));
        assert!(a.index_rewritten);

        let data = std::fs::read(&a.containers[0]).unwrap();
        let payload = crate::dso::payload(&data).unwrap();
        assert_eq!(crate::compress::decompress(payload).unwrap(), (0, vec![0u8; 4000]));

        let plan = r.registry.get(&r.registry_key).unwrap();
        assert_eq!(plan.arch(Arch::X86).get("App.dll").unwrap().descriptor_index, 0);
    }

    // Verify unchanged inputs are not rewritten
    #[test]
    fn package_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let o = options(dir.path(), PackagingMode::Consolidated);
        let l = list(dir.path());
        let cancel = std::sync::atomic::AtomicBool::new(false);

        let first = package(&o, &l, &cancel).unwrap();
        let second = package(&o, &l, &cancel).unwrap();

        assert!(first.archs[0].index_rewritten);
        assert_eq!(first.archs[0].containers_rewritten, 1);
        assert!(!second.archs[0].index_rewritten);
        assert_eq!(second.archs[0].containers_rewritten, 0);
        assert_eq!(
            std::fs::read(&first.archs[0].index).unwrap(),
            std::fs::read(&second.archs[0].index).unwrap(),
        );
    }

    // Verify prebuilt stubs must match the architecture
    //
    // A stub of a foreign machine is refused before any blob is written,
    // while a per-ABI stub path picks the matching stub and places it at the
    // start of the blob.
    #[test]
    fn package_stub_machine() {
        let dir = tempfile::tempdir().unwrap();
        let l = list(dir.path());
        let cancel = std::sync::atomic::AtomicBool::new(false);

        for arch in [Arch::Arm64, Arch::X86] {
            let path = dir.path().join("stubs").join(arch.abi()).join("libstub.so");
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, crate::dso::stub(arch, "libstub.so").unwrap()).unwrap();
        }

        let mut o = options(dir.path(), PackagingMode::Consolidated);
        o.packaging.stub_path = Some(dir.path().join("stubs/arm64-v8a/libstub.so"));
        match package(&o, &l, &cancel) {
            Err(Error::StubMachine(path, arch)) => {
                assert_eq!(arch, Arch::X86);
                assert!(path.ends_with("arm64-v8a/libstub.so"));
            },
            _ => panic!("foreign stub accepted"),
        }
        assert!(!dir.path().join("out/lib").exists());

        o.packaging.stub_path = Some(dir.path().join("stubs/{abi}/libstub.so"));
        let r = package(&o, &l, &cancel).unwrap();
        assert_eq!(r.application.as_deref(), Some("App"));

        let stub = std::fs::read(dir.path().join("stubs/x86/libstub.so")).unwrap();
        let blob = std::fs::read(&r.archs[0].containers[0]).unwrap();
        assert_eq!(&blob[..stub.len()], &stub[..]);
        assert_eq!(crate::dso::architecture(&blob), Some(object::Architecture::I386));
    }

    // Verify cancellation skips architectures
    #[test]
    fn package_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let o = options(dir.path(), PackagingMode::Consolidated);
        let cancel = std::sync::atomic::AtomicBool::new(true);

        assert!(matches!(
            package(&o, &list(dir.path()), &cancel),
            Err(Error::Cancelled(Arch::X86)),
        ));
        assert!(!dir.path().join("out").exists());
    }
}

//! Native Index Generator
//!
//! The runtime locates assemblies through tables compiled into the native
//! support library of an application. This module computes those tables for
//! one architecture and renders them as LLVM IR, ready to be compiled by the
//! native toolchain.
//!
//! A module consists of:
//!
//! * `xa_assemblies_config`: counts and the packaging mode.
//! * `xa_assembly_names`: the logical name of every record, in arena order.
//! * `xa_fast_path_assemblies`: one entry per fast-path name, in exactly the
//!   order of the fast-path list, so the runtime can address them by constant
//!   index. Names not packaged for the architecture get an entry without the
//!   `PRESENT` flag.
//! * `xa_assemblies`: one entry per remaining record, in arena order.
//! * `xa_assembly_index`: the hashed lookup table into `xa_assemblies`.
//! * `xa_compressed_assemblies`: one descriptor per planned assembly, each
//!   with a zero-initialized buffer to decompress into.
//!
//! Hashed lookup layout: every record contributes two keys, its logical name
//! with and without the `.dll` extension (one key if it has no extension).
//! Keys are hashed with xxHash3-64 on 64-bit architectures and xxHash32 with
//! seed 0 on 32-bit ones. The table is sorted by hash, then by name index,
//! then by key kind. The runtime binary-searches the hash and compares the
//! key against the name for every entry with an equal hash, so hash
//! collisions are harmless. Identical keys are refused.
//!
//! Rendering is deterministic. The same input always produces byte-identical
//! text.

/// Entry flag: the assembly is packaged for this architecture.
pub const FLAG_PRESENT: u32 = 1 << 0;
/// Entry flag: the stored data is a compressed payload.
pub const FLAG_COMPRESSED: u32 = 1 << 1;
/// Entry flag: the entry carries configuration text.
pub const FLAG_HAS_CONFIG: u32 = 1 << 2;

/// Index entry flag: the key is the logical name without `.dll`.
pub const KEY_WITHOUT_EXTENSION: u32 = 1 << 0;

/// Placeholder for absent indices.
pub const NO_INDEX: u32 = u32::MAX;

/// Index Generator Errors
///
/// This is the exhaustive list of possible errors raised by the index
/// generator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two records produce the same lookup key.
    #[error("{0}: assembly key {1:?} is not unique")]
    DuplicateKey(crate::platform::android::Arch, String),
    /// An assembly is too large for the 32-bit native structures.
    #[error("{0}: assembly {1:?} exceeds the maximum size of 4 GiB")]
    AssemblyTooLarge(crate::platform::android::Arch, String),
    /// Reading a configuration sidecar failed.
    #[error("cannot read configuration {0:?}: {1}")]
    ReadConfig(std::path::PathBuf, std::io::Error),
}

/// Generator Input
///
/// The fully resolved state of one architecture: its record arena plus the
/// columns produced by earlier phases.
#[derive(Clone, Copy, Debug)]
pub struct Input<'a> {
    pub arena: &'a crate::assembly::ArchAssemblies,
    pub plan: &'a crate::plan::ArchPlan,
    /// Compression column, one entry per record.
    pub compressed: &'a [Option<crate::compress::Compressed>],
    /// Offset column, one entry per record. All zero in discrete mode.
    pub offsets: &'a [u32],
    pub fast_path: &'a [String],
    pub mode: crate::select::PackagingMode,
}

/// Assembly Entry
///
/// Runtime description of one assembly.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Entry {
    pub descriptor_index: u32,
    pub name_index: u32,
    pub offset: u32,
    pub size: u32,
    pub compressed_size: u32,
    pub flags: u32,
    /// Index into `NativeIndex::configs`.
    pub config: Option<usize>,
}

/// Hashed Lookup Entry
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexEntry {
    pub hash: u64,
    pub name_index: u32,
    /// Index into `NativeIndex::entries`.
    pub entry_index: u32,
    pub flags: u32,
}

/// Native Index Module
///
/// All tables of one architecture. Use the `Display` implementation to
/// render the module as LLVM IR.
#[derive(Clone, Debug)]
pub struct NativeIndex {
    pub arch: crate::platform::android::Arch,
    pub mode: crate::select::PackagingMode,
    /// Logical names, in arena order.
    pub names: Vec<String>,
    /// Fast-path entries, in fast-path list order.
    pub fast_path: Vec<Entry>,
    /// Entries reachable through the hashed lookup table.
    pub entries: Vec<Entry>,
    /// Hashed lookup table, sorted.
    pub index: Vec<IndexEntry>,
    /// Configuration texts referenced by entries.
    pub configs: Vec<String>,
    /// Uncompressed size of every planned assembly, by descriptor index.
    pub descriptors: Vec<u32>,
}

/// Hash a lookup key
///
/// Hash `key` with the function the runtime of `arch` uses. On 32-bit
/// architectures, the result fits into 32 bits.
pub fn hash(arch: crate::platform::android::Arch, key: &str) -> u64 {
    if arch.is_64bit() {
        xxhash_rust::xxh3::xxh3_64(key.as_bytes())
    } else {
        xxhash_rust::xxh32::xxh32(key.as_bytes(), 0) as u64
    }
}

/// File name of the generated module of an architecture.
pub fn file_name(arch: crate::platform::android::Arch) -> String {
    format!("assemblies.{}.ll", arch.abi())
}

// Read configuration text
//
// A sidecar that is referenced but does not exist is ignored, any other
// failure to read it is fatal.
fn read_config(path: &std::path::Path) -> Result<Option<String>, Error> {
    match std::fs::read_to_string(path) {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("configuration {:?} does not exist, ignored", path);
            Ok(None)
        },
        Err(e) => Err(Error::ReadConfig(path.to_path_buf(), e)),
    }
}

// Build the entry of a record
fn entry(
    input: &Input<'_>,
    index: crate::assembly::RecordIndex,
    configs: &mut Vec<String>,
) -> Result<Entry, Error> {
    let record = input.arena.record(index);
    let size = u32::try_from(record.size)
        .map_err(|_| Error::AssemblyTooLarge(input.arena.arch, record.name.to_string()))?;

    let mut flags = FLAG_PRESENT;
    let mut compressed_size = 0;
    if let Some(v) = &input.compressed[index] {
        flags |= FLAG_COMPRESSED;
        compressed_size = v.size;
    }

    let mut config = None;
    if let Some(path) = record.config {
        if let Some(text) = read_config(path)? {
            flags |= FLAG_HAS_CONFIG;
            config = Some(configs.len());
            configs.push(text);
        }
    }

    Ok(Entry {
        descriptor_index: input.plan.get(record.name)
            .map_or(NO_INDEX, |v| v.descriptor_index),
        name_index: index as u32,
        offset: input.offsets[index],
        size: size,
        compressed_size: compressed_size,
        flags: flags,
        config: config,
    })
}

/// Build the native index
///
/// Compute all tables of the architecture described by `input`. Every
/// record ends up in exactly one of the fast-path array and the hashed
/// table.
pub fn build(input: &Input<'_>) -> Result<NativeIndex, Error> {
    let arena = input.arena;
    let mut configs = Vec::new();

    let mut fast_path = Vec::with_capacity(input.fast_path.len());
    for name in input.fast_path.iter() {
        match arena.position(name) {
            Some(index) => fast_path.push(entry(input, index, &mut configs)?),
            None => fast_path.push(Entry {
                descriptor_index: NO_INDEX,
                name_index: NO_INDEX,
                ..Default::default()
            }),
        }
    }

    let mut entries = Vec::new();
    let mut index = Vec::new();
    let mut keys = std::collections::BTreeSet::new();

    for record in arena.records() {
        if input.fast_path.iter().any(|v| v == record.name) {
            continue;
        }

        let entry_index = entries.len() as u32;
        entries.push(entry(input, record.index, &mut configs)?);

        let stripped = crate::assembly::name_without_extension(record.name);
        let mut record_keys = vec![(record.name, 0)];
        if stripped != record.name {
            record_keys.push((stripped, KEY_WITHOUT_EXTENSION));
        }

        for (key, flags) in record_keys {
            if !keys.insert(key) {
                return Err(Error::DuplicateKey(arena.arch, key.to_string()));
            }

            index.push(IndexEntry {
                hash: hash(arena.arch, key),
                name_index: record.index as u32,
                entry_index: entry_index,
                flags: flags,
            });
        }
    }

    index.sort_by_key(|v| (v.hash, v.name_index, v.flags));

    Ok(NativeIndex {
        arch: arena.arch,
        mode: input.mode,
        names: arena.names.clone(),
        fast_path: fast_path,
        entries: entries,
        index: index,
        configs: configs,
        descriptors: input.plan.iter().map(|(_, v)| v.uncompressed_size).collect(),
    })
}

/// Generate the native index
///
/// Build the tables of one architecture and render them as LLVM IR.
pub fn generate(input: &Input<'_>) -> Result<String, Error> {
    Ok(build(input)?.to_string())
}

// Escape a string for an LLVM IR `c"..."` constant. Printable ASCII other
// than `"` and `\` is kept, everything else is hex-escaped.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());

    for b in s.bytes() {
        if (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\{:02X}", b));
        }
    }

    out
}

// Render a string for a trailing comment. Control characters would end the
// comment, so they are replaced.
fn comment(s: &str) -> String {
    s.chars().map(|v| if v.is_control() { '?' } else { v }).collect()
}

impl NativeIndex {
    fn hash_type(&self) -> &'static str {
        if self.arch.is_64bit() { "i64" } else { "i32" }
    }

    fn hash_value(&self, hash: u64) -> i64 {
        if self.arch.is_64bit() {
            hash as i64
        } else {
            hash as u32 as i32 as i64
        }
    }

    fn name(&self, index: u32) -> &str {
        self.names.get(index as usize).map_or("", |v| v.as_str())
    }

    fn write_entry(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        entry: &Entry,
        last: bool,
    ) -> std::fmt::Result {
        let config = match entry.config {
            Some(v) => format!("ptr @.config.{}", v),
            None => "ptr null".to_string(),
        };

        writeln!(f, "\t; {}", comment(self.name(entry.name_index)))?;
        writeln!(f, "\t%struct.AssemblyEntry {{")?;
        writeln!(f, "\t\ti32 {}, ; descriptor_index", entry.descriptor_index as i32)?;
        writeln!(f, "\t\ti32 {}, ; name_index", entry.name_index as i32)?;
        writeln!(f, "\t\ti32 {}, ; data_offset", entry.offset as i32)?;
        writeln!(f, "\t\ti32 {}, ; data_size", entry.size as i32)?;
        writeln!(f, "\t\ti32 {}, ; compressed_data_size", entry.compressed_size as i32)?;
        writeln!(f, "\t\ti32 {}, ; flags", entry.flags as i32)?;
        writeln!(f, "\t\t{} ; config", config)?;
        writeln!(f, "\t}}{}", if last { "" } else { "," })
    }

    fn write_entries(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        symbol: &str,
        entries: &[Entry],
    ) -> std::fmt::Result {
        let align = self.arch.pointer_size();

        if entries.is_empty() {
            return writeln!(
                f,
                "@{} = dso_local local_unnamed_addr constant [0 x %struct.AssemblyEntry] zeroinitializer, align {}",
                symbol, align,
            );
        }

        writeln!(
            f,
            "@{} = dso_local local_unnamed_addr constant [{} x %struct.AssemblyEntry] [",
            symbol, entries.len(),
        )?;
        for (i, entry) in entries.iter().enumerate() {
            self.write_entry(f, entry, i + 1 == entries.len())?;
        }
        writeln!(f, "], align {}", align)
    }

    fn write_types(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "%struct.AssembliesConfig = type {{")?;
        writeln!(f, "\ti32, ; packaging_mode")?;
        writeln!(f, "\ti32, ; assembly_count")?;
        writeln!(f, "\ti32, ; fast_path_count")?;
        writeln!(f, "\ti32, ; entry_count")?;
        writeln!(f, "\ti32, ; index_count")?;
        writeln!(f, "\ti32 ; compressed_count")?;
        writeln!(f, "}}")?;
        writeln!(f)?;
        writeln!(f, "%struct.AssemblyEntry = type {{")?;
        writeln!(f, "\ti32, ; descriptor_index")?;
        writeln!(f, "\ti32, ; name_index")?;
        writeln!(f, "\ti32, ; data_offset")?;
        writeln!(f, "\ti32, ; data_size")?;
        writeln!(f, "\ti32, ; compressed_data_size")?;
        writeln!(f, "\ti32, ; flags")?;
        writeln!(f, "\tptr ; config")?;
        writeln!(f, "}}")?;
        writeln!(f)?;
        writeln!(f, "%struct.AssemblyIndexEntry = type {{")?;
        writeln!(f, "\t{}, ; name_hash", self.hash_type())?;
        writeln!(f, "\ti32, ; name_index")?;
        writeln!(f, "\ti32, ; entry_index")?;
        writeln!(f, "\ti32 ; flags")?;
        writeln!(f, "}}")?;
        writeln!(f)?;
        writeln!(f, "%struct.CompressedAssemblyDescriptor = type {{")?;
        writeln!(f, "\ti32, ; uncompressed_file_size")?;
        writeln!(f, "\ti8, ; loaded")?;
        writeln!(f, "\tptr ; data")?;
        writeln!(f, "}}")?;
        writeln!(f)?;
        writeln!(f, "%struct.CompressedAssemblies = type {{")?;
        writeln!(f, "\ti32, ; count")?;
        writeln!(f, "\tptr ; descriptors")?;
        writeln!(f, "}}")
    }

    fn write_config(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "@xa_assemblies_config = dso_local local_unnamed_addr constant %struct.AssembliesConfig {{")?;
        writeln!(f, "\ti32 {}, ; packaging_mode", self.mode.tag())?;
        writeln!(f, "\ti32 {}, ; assembly_count", self.names.len())?;
        writeln!(f, "\ti32 {}, ; fast_path_count", self.fast_path.len())?;
        writeln!(f, "\ti32 {}, ; entry_count", self.entries.len())?;
        writeln!(f, "\ti32 {}, ; index_count", self.index.len())?;
        writeln!(f, "\ti32 {} ; compressed_count", self.descriptors.len())?;
        writeln!(f, "}}, align 4")
    }

    fn write_names(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let align = self.arch.pointer_size();

        if self.names.is_empty() {
            return writeln!(
                f,
                "@xa_assembly_names = dso_local local_unnamed_addr constant [0 x ptr] zeroinitializer, align {}",
                align,
            );
        }

        writeln!(
            f,
            "@xa_assembly_names = dso_local local_unnamed_addr constant [{} x ptr] [",
            self.names.len(),
        )?;
        for (i, name) in self.names.iter().enumerate() {
            let sep = if i + 1 == self.names.len() { "" } else { "," };
            writeln!(f, "\tptr @.str.{}{} ; {}", i, sep, comment(name))?;
        }
        writeln!(f, "], align {}", align)
    }

    fn write_index(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let align = if self.arch.is_64bit() { 8 } else { 4 };

        if self.index.is_empty() {
            return writeln!(
                f,
                "@xa_assembly_index = dso_local local_unnamed_addr constant [0 x %struct.AssemblyIndexEntry] zeroinitializer, align {}",
                align,
            );
        }

        writeln!(
            f,
            "@xa_assembly_index = dso_local local_unnamed_addr constant [{} x %struct.AssemblyIndexEntry] [",
            self.index.len(),
        )?;
        for (i, entry) in self.index.iter().enumerate() {
            let name = self.name(entry.name_index);
            let key = if entry.flags & KEY_WITHOUT_EXTENSION != 0 {
                crate::assembly::name_without_extension(name)
            } else {
                name
            };
            let width = if self.arch.is_64bit() { 16 } else { 8 };

            writeln!(f, "\t; 0x{:0width$x} => {}", entry.hash, comment(key), width = width)?;
            writeln!(
                f,
                "\t%struct.AssemblyIndexEntry {{ {} {}, i32 {}, i32 {}, i32 {} }}{}",
                self.hash_type(),
                self.hash_value(entry.hash),
                entry.name_index,
                entry.entry_index,
                entry.flags,
                if i + 1 == self.index.len() { "" } else { "," },
            )?;
        }
        writeln!(f, "], align {}", align)
    }

    fn write_compressed(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let align = self.arch.pointer_size();

        if self.descriptors.is_empty() {
            writeln!(
                f,
                "@compressed_assembly_descriptors = internal global [0 x %struct.CompressedAssemblyDescriptor] zeroinitializer, align {}",
                align,
            )?;
        } else {
            writeln!(
                f,
                "@compressed_assembly_descriptors = internal global [{} x %struct.CompressedAssemblyDescriptor] [",
                self.descriptors.len(),
            )?;
            for (i, size) in self.descriptors.iter().enumerate() {
                let sep = if i + 1 == self.descriptors.len() { "" } else { "," };
                writeln!(f, "\t%struct.CompressedAssemblyDescriptor {{")?;
                writeln!(f, "\t\ti32 {}, ; uncompressed_file_size", *size as i32)?;
                writeln!(f, "\t\ti8 0, ; loaded")?;
                writeln!(f, "\t\tptr @__compressedAssemblyData_{} ; data", i)?;
                writeln!(f, "\t}}{}", sep)?;
            }
            writeln!(f, "], align {}", align)?;
        }

        writeln!(f)?;
        writeln!(f, "@xa_compressed_assemblies = dso_local local_unnamed_addr global %struct.CompressedAssemblies {{")?;
        writeln!(f, "\ti32 {}, ; count", self.descriptors.len())?;
        writeln!(f, "\tptr @compressed_assembly_descriptors ; descriptors")?;
        writeln!(f, "}}, align {}", align)?;

        for (i, size) in self.descriptors.iter().enumerate() {
            writeln!(f)?;
            writeln!(
                f,
                "@__compressedAssemblyData_{} = internal global [{} x i8] zeroinitializer, align 16",
                i, size,
            )?;
        }

        Ok(())
    }

    fn write_strings(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, name) in self.names.iter().enumerate() {
            writeln!(
                f,
                "@.str.{} = private unnamed_addr constant [{} x i8] c\"{}\\00\", align 1",
                i, name.len() + 1, escape(name),
            )?;
        }

        for (i, config) in self.configs.iter().enumerate() {
            writeln!(
                f,
                "@.config.{} = private unnamed_addr constant [{} x i8] c\"{}\\00\", align 1",
                i, config.len() + 1, escape(config),
            )?;
        }

        Ok(())
    }
}

impl std::fmt::Display for NativeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let module = file_name(self.arch);

        writeln!(f, "; ModuleID = '{}'", module)?;
        writeln!(f, "source_filename = \"{}\"", module)?;
        writeln!(f, "target datalayout = \"{}\"", self.arch.llvm_data_layout())?;
        writeln!(f, "target triple = \"{}\"", self.arch.llvm_triple())?;
        writeln!(f)?;
        self.write_types(f)?;
        writeln!(f)?;
        self.write_config(f)?;
        writeln!(f)?;
        self.write_names(f)?;
        writeln!(f)?;
        self.write_entries(f, "xa_fast_path_assemblies", &self.fast_path)?;
        writeln!(f)?;
        self.write_entries(f, "xa_assemblies", &self.entries)?;
        writeln!(f)?;
        self.write_index(f)?;
        writeln!(f)?;
        self.write_compressed(f)?;
        writeln!(f)?;
        writeln!(f, "; Strings")?;
        self.write_strings(f)?;
        writeln!(f)?;
        writeln!(f, "!llvm.module.flags = !{{!0, !1}}")?;
        writeln!(f, "!llvm.ident = !{{!2}}")?;
        writeln!(f, "!0 = !{{i32 1, !\"wchar_size\", i32 4}}")?;
        writeln!(f, "!1 = !{{i32 7, !\"PIC Level\", i32 2}}")?;
        writeln!(f, "!2 = !{{!\"osiris-bundle {}\"}}", env!("CARGO_PKG_VERSION"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{ArchAssemblies, ResolvedAssembly};
    use crate::collect::Collection;
    use crate::compress::Compressed;
    use crate::platform::android::Arch;
    use crate::select::PackagingMode;

    fn arena(arch: Arch, names: &[&str]) -> ArchAssemblies {
        let mut a = ArchAssemblies::new(arch);
        for (i, name) in names.iter().enumerate() {
            let item = ResolvedAssembly {
                path: std::path::PathBuf::from(format!("/obj/{}", name)),
                abi: None,
                culture: None,
                skip_compression: false,
                debug_symbols: None,
                config: None,
            };
            a.push(name.to_string(), &item, 100 * (i as u64 + 1));
        }
        a
    }

    // Verify fast-path and hashed tables are exclusive
    //
    // Every record must be reachable through exactly one of the fast-path
    // array and the hashed table, and the fast-path array must follow the
    // fast-path list exactly, including names not packaged.
    #[test]
    fn build_exclusive() {
        let a = arena(Arch::Arm64, &["App.dll", "Mono.Android.dll", "es/App.resources.dll"]);
        let plan = crate::plan::ArchPlan::default();
        let compressed = vec![None; 3];
        let offsets = vec![0; 3];
        let fast = vec!["Missing.dll".to_string(), "Mono.Android.dll".to_string()];

        let index = build(&Input {
            arena: &a,
            plan: &plan,
            compressed: &compressed,
            offsets: &offsets,
            fast_path: &fast,
            mode: PackagingMode::Discrete,
        }).unwrap();

        assert_eq!(index.fast_path.len(), 2);
        assert_eq!(index.fast_path[0].flags & FLAG_PRESENT, 0);
        assert_eq!(index.fast_path[0].name_index, NO_INDEX);
        assert_eq!(index.fast_path[1].name_index, 1);
        assert_eq!(index.fast_path[1].size, 200);

        for name_index in 0..3u32 {
            let in_fast = index.fast_path.iter().any(|v| v.name_index == name_index);
            let in_hashed = index.entries.iter().any(|v| v.name_index == name_index);
            assert!(in_fast != in_hashed);
        }

        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.index.len(), 4);
        assert!(index.index.windows(2).all(|v| v[0].hash <= v[1].hash));
        assert!(index.index.iter().any(|v| v.hash == hash(Arch::Arm64, "es/App.resources")));
        assert!(index.index.iter().any(|v| v.hash == hash(Arch::Arm64, "App.dll")));
    }

    // Verify entry contents
    //
    // Offsets, compressed sizes, descriptor indices, and configuration text
    // must be taken from the respective columns.
    #[test]
    fn build_entries() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("App.dll.config");
        std::fs::write(&config, "<configuration/>\n").unwrap();

        let mut a = arena(Arch::X86, &["App.dll", "Lib.dll"]);
        a.configs[0] = Some(config);
        a.configs[1] = Some(dir.path().join("Lib.dll.config"));
        let collection = Collection { archs: vec![a] };
        let plan = crate::plan::plan(&collection, true).unwrap();
        let a = &collection.archs[0];
        let compressed = vec![
            Some(Compressed { path: dir.path().join("lz4"), size: 50 }),
            None,
        ];
        let offsets = vec![4096, 4146];

        let index = build(&Input {
            arena: a,
            plan: plan.arch(Arch::X86),
            compressed: &compressed,
            offsets: &offsets,
            fast_path: &[],
            mode: PackagingMode::Consolidated,
        }).unwrap();

        let app = &index.entries[0];
        assert_eq!(app.descriptor_index, 0);
        assert_eq!(app.offset, 4096);
        assert_eq!(app.size, 100);
        assert_eq!(app.compressed_size, 50);
        assert_eq!(app.flags, FLAG_PRESENT | FLAG_COMPRESSED | FLAG_HAS_CONFIG);
        assert_eq!(index.configs[app.config.unwrap()], "<configuration/>\n");

        let lib = &index.entries[1];
        assert_eq!(lib.descriptor_index, 1);
        assert_eq!(lib.offset, 4146);
        assert_eq!(lib.compressed_size, 0);
        assert_eq!(lib.flags, FLAG_PRESENT);
        assert!(lib.config.is_none());

        assert_eq!(index.descriptors, vec![100, 200]);
        assert!(index.index.iter().all(|v| v.hash <= u32::MAX as u64));
    }

    // Verify identical keys are refused
    //
    // `App` and `App.dll` both produce the key `App`.
    #[test]
    fn build_duplicate_key() {
        let a = arena(Arch::X86_64, &["App", "App.dll"]);
        let plan = crate::plan::ArchPlan::default();

        let r = build(&Input {
            arena: &a,
            plan: &plan,
            compressed: &[None, None],
            offsets: &[0, 0],
            fast_path: &[],
            mode: PackagingMode::Discrete,
        });

        assert!(matches!(r, Err(Error::DuplicateKey(Arch::X86_64, _))));
    }

    // Verify rendering
    //
    // The module must be deterministic, target the architecture, and escape
    // strings properly.
    #[test]
    fn generate_text() {
        let a = arena(Arch::Arm, &["App.dll", "de/\"Q\".dll"]);
        let plan = crate::plan::ArchPlan::default();
        let input = Input {
            arena: &a,
            plan: &plan,
            compressed: &[None, None],
            offsets: &[0, 0],
            fast_path: &[],
            mode: PackagingMode::Discrete,
        };

        let text = generate(&input).unwrap();

        assert_eq!(text, generate(&input).unwrap());
        assert!(text.contains("target triple = \"armv7-unknown-linux-android21\""));
        assert!(text.contains("[2 x ptr]"));
        assert!(text.contains("[4 x %struct.AssemblyIndexEntry]"));
        assert!(text.contains("c\"App.dll\\00\""));
        assert!(text.contains("c\"de/\\22Q\\22.dll\\00\""));
        assert!(text.contains("[0 x %struct.AssemblyEntry] zeroinitializer"));
        assert!(text.contains("[0 x %struct.CompressedAssemblyDescriptor] zeroinitializer"));
        assert!(text.contains("\ti32, ; name_hash"));
    }

    // Verify hash selection per architecture width
    #[test]
    fn hash_width() {
        assert_eq!(hash(Arch::Arm64, "App.dll"), xxhash_rust::xxh3::xxh3_64(b"App.dll"));
        assert_eq!(hash(Arch::X86, "App.dll"), xxhash_rust::xxh32::xxh32(b"App.dll", 0) as u64);
    }
}

//! Assembly Records
//!
//! This module defines the resolved assembly list handed over by upstream
//! build stages, as well as the per-architecture record arena every
//! packaging phase operates on.
//!
//! Records are allocated exactly once per architecture by the collector and
//! are never mutated afterwards. Later phases refer to records by their index
//! into the arena and keep their own results in separate columns (for
//! instance, the compressor returns one `Option<Compressed>` per record).
//! This way, no phase ever holds a mutable alias to data another phase reads.

/// Assembly List Errors
///
/// This is the exhaustive list of possible errors raised when loading the
/// resolved assembly list.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading the assembly list at the specified path failed.
    #[error("cannot read assembly list {0:?}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    /// The assembly list is not valid JSON or does not match the schema.
    #[error("invalid assembly list: {0}")]
    Parse(serde_json::Error),
}

/// Resolved Assembly
///
/// One item of the resolved assembly list, as produced by the upstream
/// assembly resolution. Only the path is mandatory on the wire. Whether the
/// other metadata is required depends on the kind of assembly and is checked
/// by the collector.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedAssembly {
    /// Path to the assembly on the file-system.
    pub path: std::path::PathBuf,
    /// Android ABI or runtime identifier of the assembly. Satellite
    /// assemblies do not carry one.
    pub abi: Option<String>,
    /// Culture of a satellite assembly, e.g. `es` or `pt-BR`.
    pub culture: Option<String>,
    /// Exclude this assembly from compression.
    #[serde(default)]
    pub skip_compression: bool,
    /// Path to the debug symbols of the assembly, if any.
    pub debug_symbols: Option<std::path::PathBuf>,
    /// Path to the `.config` sidecar of the assembly, if any.
    pub config: Option<std::path::PathBuf>,
}

/// Resolved Assembly List
///
/// The root object of the assembly list document.
#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AssemblyList {
    #[serde(default)]
    pub assemblies: Vec<ResolvedAssembly>,
}

impl AssemblyList {
    /// Parse assembly list from string
    ///
    /// Parse the given string as a JSON assembly list.
    pub fn parse_str(content: &str) -> Result<Self, Error> {
        serde_json::from_str(content).map_err(Error::Parse)
    }

    /// Parse assembly list from file-system
    ///
    /// Read the specified file completely into memory and parse it as a JSON
    /// assembly list.
    pub fn parse_path(path: &std::path::Path) -> Result<Self, Error> {
        std::fs::read_to_string(path)
            .map_err(|v| Error::Read(path.to_path_buf(), v))
            .and_then(|v| Self::parse_str(&v))
    }
}

/// Index of a record in its architecture's arena.
pub type RecordIndex = usize;

/// Per-Architecture Record Arena
///
/// All assembly records of one architecture, stored as a struct of arrays.
/// Every column has the same length, and the record at index `i` is made up
/// of the `i`-th element of every column. Logical names are unique within
/// one arena.
#[derive(Clone, Debug)]
pub struct ArchAssemblies {
    /// Architecture all records belong to.
    pub arch: crate::platform::android::Arch,
    /// Logical name, e.g. `App.dll` or `es/App.resources.dll`.
    pub names: Vec<String>,
    /// Absolute path to the assembly.
    pub sources: Vec<std::path::PathBuf>,
    /// Uncompressed length of the assembly in bytes.
    pub sizes: Vec<u64>,
    /// Culture of satellite assemblies, `None` for regular ones.
    pub cultures: Vec<Option<String>>,
    /// Whether the record was opted out of compression.
    pub skip_compression: Vec<bool>,
    /// Debug symbol sidecar, if any.
    pub debug_symbols: Vec<Option<std::path::PathBuf>>,
    /// Configuration sidecar, if any.
    pub configs: Vec<Option<std::path::PathBuf>>,
    lookup: std::collections::BTreeMap<String, RecordIndex>,
}

/// Borrowed view of one record of an `ArchAssemblies` arena.
#[derive(Clone, Copy, Debug)]
pub struct Record<'a> {
    pub index: RecordIndex,
    pub name: &'a str,
    pub source: &'a std::path::Path,
    pub size: u64,
    pub culture: Option<&'a str>,
    pub skip_compression: bool,
    pub debug_symbols: Option<&'a std::path::Path>,
    pub config: Option<&'a std::path::Path>,
}

impl ArchAssemblies {
    /// Create an empty arena for the given architecture.
    pub fn new(arch: crate::platform::android::Arch) -> Self {
        Self {
            arch: arch,
            names: Vec::new(),
            sources: Vec::new(),
            sizes: Vec::new(),
            cultures: Vec::new(),
            skip_compression: Vec::new(),
            debug_symbols: Vec::new(),
            configs: Vec::new(),
            lookup: std::collections::BTreeMap::new(),
        }
    }

    /// Number of records in the arena.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the arena has no records.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Find a record by its logical name.
    pub fn position(&self, name: &str) -> Option<RecordIndex> {
        self.lookup.get(name).copied()
    }

    /// Get a borrowed view of the record at the given index.
    pub fn record(&self, index: RecordIndex) -> Record<'_> {
        Record {
            index: index,
            name: &self.names[index],
            source: &self.sources[index],
            size: self.sizes[index],
            culture: self.cultures[index].as_deref(),
            skip_compression: self.skip_compression[index],
            debug_symbols: self.debug_symbols[index].as_deref(),
            config: self.configs[index].as_deref(),
        }
    }

    /// Iterate over all records in allocation order.
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> + '_ {
        (0..self.len()).map(move |v| self.record(v))
    }

    // Append a record. The caller guarantees uniqueness of `name`.
    pub(crate) fn push(
        &mut self,
        name: String,
        item: &ResolvedAssembly,
        size: u64,
    ) -> RecordIndex {
        let index = self.names.len();

        self.lookup.insert(name.clone(), index);
        self.names.push(name);
        self.sources.push(item.path.clone());
        self.sizes.push(size);
        self.cultures.push(item.culture.clone());
        self.skip_compression.push(item.skip_compression);
        self.debug_symbols.push(item.debug_symbols.clone());
        self.configs.push(item.config.clone());

        index
    }
}

/// Strip the assembly extension
///
/// Return the logical name without its trailing `.dll`, if present. The
/// runtime looks up assemblies by either form.
pub fn name_without_extension(name: &str) -> &str {
    match name.len().checked_sub(4) {
        Some(n) if name.is_char_boundary(n) && name[n..].eq_ignore_ascii_case(".dll") => &name[..n],
        _ => name,
    }
}

//! Bundle Manifest
//!
//! This is a rust implementation of the Osiris Bundle Manifest Format.
//! Applications use this manifest to configure how their managed assemblies
//! are packaged for Android.

/// Manifest Errors
///
/// This is the exhaustive list of possible errors raised when loading a
/// manifest.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading the manifest at the specified path failed.
    #[error("cannot read manifest {0:?}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    /// The manifest is not valid TOML or does not match the schema.
    #[error("invalid manifest: {0}")]
    Parse(String),
    /// The manifest version is not supported.
    #[error("unsupported manifest version {0}")]
    Version(u32),
    /// The value of the specified key is invalid.
    #[error("invalid value for manifest key '{0}'")]
    InvalidKey(&'static str),
}

/// Raw Manifest Application Table
///
/// Sub-type of `Raw` representing the `Application` table. This contains all
/// configuration regarding the application itself.
#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawApplication {
    /// Identifier of the application. Used to register and identify the
    /// application. Must not change over the life of the application. Only
    /// alphanumeric and `-`, `_` allowed. Non-ASCII allowed but might break
    /// external tools.
    pub id: Option<String>,
    /// Human-readable name of the application.
    pub name: Option<String>,
    /// Path to the application root relative from the manifest.
    pub path: Option<String>,
}

/// Raw Manifest Packaging Table
///
/// Sub-type of `Raw` representing the `Packaging` table. This contains all
/// configuration of the assembly packaging.
#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawPackaging {
    /// Physical packaging strategy.
    pub mode: Option<crate::select::PackagingMode>,
    /// Android ABIs to package for. Assemblies of other ABIs are ignored.
    /// If empty or missing, every ABI found in the assembly list is used.
    pub supported_abis: Option<Vec<String>>,
    /// Logical names of assemblies resolved through the fast-path array.
    pub fast_path: Option<Vec<String>>,
    /// Whether to compress assemblies.
    pub compression: Option<bool>,
    /// Whether to ship debug symbols. This disables compression.
    pub include_debug_symbols: Option<bool>,
    /// Path to a prebuilt blob stub relative from the manifest. Any `{abi}`
    /// in the path is replaced by the Android ABI being packaged, since the
    /// stub must match the machine of its architecture.
    pub stub_path: Option<String>,
    /// Path to the output root relative from the manifest.
    pub output_path: Option<String>,
}

/// Raw Manifest Content
///
/// This type contains the raw manifest content as parsed by `toml` and
/// converted into rust types via `serde`.
///
/// Note that content of the type is not verified other than for syntactic
/// correctness required by the given types. Semantic correctness needs to
/// be verified by the caller.
#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Raw {
    /// Version of the manifest format. Only version `1` is currently
    /// supported.
    pub version: u32,

    /// Application table specifying properties of the application itself.
    pub application: Option<RawApplication>,
    /// Packaging table specifying how assemblies are packaged.
    pub packaging: Option<RawPackaging>,
}

/// Manifest Abstraction
///
/// This type represents a valid and verified manifest. The manifest content
/// can be directly accessed via the `raw` field. The data is verified for
/// semantic correctness (unlike the `Raw` type).
pub struct Manifest {
    /// Raw manifest content as parsed by the TOML module.
    pub raw: Raw,
}

/// Packaging View
///
/// Resolved packaging configuration with all defaults applied and all paths
/// made relative to the working directory.
#[derive(Clone, Debug)]
pub struct ViewPackaging {
    pub mode: crate::select::PackagingMode,
    pub supported_abis: Vec<crate::platform::android::Arch>,
    pub fast_path: Vec<String>,
    /// Effective compression setting, false if debug symbols are included.
    pub compression: bool,
    pub include_debug_symbols: bool,
    pub stub_path: Option<std::path::PathBuf>,
    pub output_path: std::path::PathBuf,
}

impl ViewPackaging {
    /// Prebuilt blob stub of an architecture, with `{abi}` substituted.
    pub fn stub_path_for(
        &self,
        arch: crate::platform::android::Arch,
    ) -> Option<std::path::PathBuf> {
        self.stub_path.as_ref().map(|v| match v.to_str() {
            Some(s) => std::path::PathBuf::from(s.replace("{abi}", arch.abi())),
            None => v.clone(),
        })
    }

    /// Directory of compressed assemblies.
    pub fn compressed_dir(&self) -> std::path::PathBuf {
        self.output_path.join("lz4")
    }

    /// Directory of native containers, with one sub-directory per ABI.
    pub fn containers_dir(&self) -> std::path::PathBuf {
        self.output_path.join("lib")
    }

    /// Directory of generated native index sources.
    pub fn index_dir(&self) -> std::path::PathBuf {
        self.output_path.join("index")
    }
}

impl Raw {
    fn parse_toml(table: toml::Table) -> Result<Self, Error> {
        <Self as serde::Deserialize>::deserialize(table)
            .map_err(|v| Error::Parse(v.to_string()))
    }

    fn parse_str(content: &str) -> Result<Self, Error> {
        content.parse::<toml::Table>()
            .map_err(|v| Error::Parse(v.to_string()))
            .and_then(|v| Self::parse_toml(v))
    }
}

impl Manifest {
    // Check whether a string is a valid identifier
    //
    // This verifies that the given string consists of only alphanumeric
    // characters plus `-`, `_`. Empty identifiers are rejected.
    //
    // Any unicode alpha/numeric character is allowed.
    fn is_identifier(s: &str) -> bool {
        !s.is_empty() && s.chars().all(
            |v| v.is_alphanumeric() || v == '-' || v == '_'
        )
    }

    // Check whether a string contains no quotes or escapes
    //
    // This verifies that a string does not contain quotes or backslashes, nor
    // any control characters.
    fn is_quotable(s: &str) -> bool {
        s.chars().all(
            |v| !v.is_control()
                && v != '\\'
                && v != '\''
                && v != '"'
        )
    }

    // Check whether a string is usable as a path
    //
    // Paths must not be empty and must not contain control characters.
    fn is_path(s: &str) -> bool {
        !s.is_empty() && s.chars().all(|v| !v.is_control())
    }

    /// Parse manifest from raw
    ///
    /// Take a raw representation of the manifest and perform post-parsing
    /// validation, ensuring the final manifest will not contain invalid
    /// entries.
    fn parse_raw(raw: Raw) -> Result<Self, Error> {
        // We only support version '1'. Any other version number is explicitly
        // defined to be incompatible, so fail parsing.
        //
        // Note that we do support unknown-fields. Hence, it is valid to add
        // more fields to version '1' without breaking backwards compatibility.
        // However, they will be silently ignored by older implementations.
        if raw.version != 1 {
            return Err(Error::Version(raw.version));
        }

        if let Some(application) = &raw.application {
            if let Some(v) = &application.id {
                if !Self::is_identifier(v) {
                    return Err(Error::InvalidKey("application.id"));
                }
            }

            if let Some(v) = &application.name {
                if !Self::is_quotable(v) {
                    return Err(Error::InvalidKey("application.name"));
                }
            }
        }

        if let Some(packaging) = &raw.packaging {
            // ABIs must be known, so typos do not silently drop assemblies.
            for abi in packaging.supported_abis.iter().flatten() {
                if crate::platform::android::Arch::from_abi(abi).is_none() {
                    return Err(Error::InvalidKey("packaging.supported-abis"));
                }
            }

            // Fast-path slots are addressed by position, so every name must
            // be unique and non-empty.
            if let Some(fast_path) = &packaging.fast_path {
                for (i, name) in fast_path.iter().enumerate() {
                    if name.is_empty() || fast_path[..i].contains(name) {
                        return Err(Error::InvalidKey("packaging.fast-path"));
                    }
                }
            }

            if let Some(v) = &packaging.stub_path {
                if !Self::is_path(v) {
                    return Err(Error::InvalidKey("packaging.stub-path"));
                }
            }

            if let Some(v) = &packaging.output_path {
                if !Self::is_path(v) {
                    return Err(Error::InvalidKey("packaging.output-path"));
                }
            }
        }

        Ok(
            Self {
                raw: raw,
            }
        )
    }

    /// Parse manifest from string
    ///
    /// Parse the given string as a literal manifest in TOML representation.
    /// Content is verified and invalid manifests are refused.
    pub fn parse_str(content: &str) -> Result<Self, Error> {
        Raw::parse_str(content)
            .and_then(|v| Self::parse_raw(v))
    }

    /// Parse manifest from file-system
    ///
    /// Open the specified file and parse it as a manifest. The content is
    /// verified and invalid manifests are refused. The file is completely
    /// parsed into memory and then closed again before the function returns.
    pub fn parse_path(path: &std::path::Path) -> Result<Self, Error> {
        std::fs::read_to_string(path)
            .map_err(|v| Error::Read(path.to_path_buf(), v))
            .and_then(|v| Self::parse_str(&v))
    }

    /// Display name of the application
    ///
    /// Return the human-readable name of the application, falling back to
    /// its identifier if no name is set.
    pub fn application_name(&self) -> Option<&str> {
        let a = self.raw.application.as_ref()?;

        a.name.as_deref()
            .filter(|v| !v.is_empty())
            .or(a.id.as_deref())
    }

    /// Resolve the packaging configuration
    ///
    /// Return the packaging configuration with defaults applied. Relative
    /// paths are resolved against `base`, which should be the directory of
    /// the manifest.
    pub fn view_packaging(&self, base: &std::path::Path) -> ViewPackaging {
        let p = self.raw.packaging.as_ref();

        let include_debug_symbols = p
            .and_then(|v| v.include_debug_symbols)
            .unwrap_or(false);
        let compression = p
            .and_then(|v| v.compression)
            .unwrap_or(true);

        ViewPackaging {
            mode: p.and_then(|v| v.mode).unwrap_or_default(),
            supported_abis: p
                .and_then(|v| v.supported_abis.as_ref())
                .map(|v| {
                    v.iter()
                        .filter_map(|abi| crate::platform::android::Arch::from_abi(abi))
                        .collect()
                })
                .unwrap_or_default(),
            fast_path: p
                .and_then(|v| v.fast_path.clone())
                .unwrap_or_default(),
            compression: compression && !include_debug_symbols,
            include_debug_symbols: include_debug_symbols,
            stub_path: p
                .and_then(|v| v.stub_path.as_ref())
                .map(|v| base.join(v)),
            output_path: base.join(
                p.and_then(|v| v.output_path.as_deref())
                    .unwrap_or("./target/osiris-bundle")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::android::Arch;
    use crate::select::PackagingMode;

    // Verify basic parsing of `Raw`
    //
    // Parse a minimal raw manifest into `Raw` to have a base-level test for
    // the parsing capabilities. Not complex content verification is done.
    #[test]
    fn raw_parse_minimal() {
        let s = "version = 1";

        Raw::parse_str(s).unwrap();
    }

    // Verify unknown versions in `Raw`
    //
    // Parse a high version number and verify that the raw content parser
    // does not care for its value other than syntactic correctness.
    #[test]
    fn raw_parse_unknown_version() {
        let s = "version = 12345678";

        Raw::parse_str(s).unwrap();
    }

    // Verify parsing of unknown manifest versions
    //
    // Parse an unknown manifest version and verify that the manifest correctly
    // refuses it as invalid.
    #[test]
    fn manifest_parse_unknown_version() {
        let s = "version = 2";

        assert!(matches!(Manifest::parse_str(s), Err(Error::Version(2))));
    }

    // Verify packaging defaults
    //
    // A minimal manifest yields consolidated, compressed packaging for every
    // ABI, with outputs below the default output path.
    #[test]
    fn manifest_packaging_defaults() {
        let m = Manifest::parse_str("version = 1").unwrap();
        let v = m.view_packaging(std::path::Path::new("/app"));

        assert_eq!(v.mode, PackagingMode::Consolidated);
        assert!(v.supported_abis.is_empty());
        assert!(v.fast_path.is_empty());
        assert!(v.compression);
        assert!(!v.include_debug_symbols);
        assert!(v.stub_path.is_none());
        assert_eq!(v.output_path, std::path::Path::new("/app/./target/osiris-bundle"));
        assert_eq!(v.index_dir(), std::path::Path::new("/app/./target/osiris-bundle/index"));
    }

    // Verify simple parsing of the packaging table
    //
    // Parse all keys and verify that debug symbols disable compression.
    #[test]
    fn manifest_parse_packaging() {
        let s = "
            version = 1
            [application]
            id = \"test\"
            [packaging]
            mode = \"discrete\"
            supported-abis = [\"arm64-v8a\", \"x86_64\"]
            fast-path = [\"Mono.Android.dll\", \"System.Private.CoreLib.dll\"]
            include-debug-symbols = true
            stub-path = \"stub.so\"
            output-path = \"out\"
        ";

        let m = Manifest::parse_str(s).unwrap();
        let v = m.view_packaging(std::path::Path::new("/app"));

        assert_eq!(v.mode, PackagingMode::Discrete);
        assert_eq!(v.supported_abis, vec![Arch::Arm64, Arch::X86_64]);
        assert_eq!(v.fast_path.len(), 2);
        assert!(!v.compression);
        assert!(v.include_debug_symbols);
        assert_eq!(v.stub_path.as_deref().unwrap(), std::path::Path::new("/app/stub.so"));
        assert_eq!(v.compressed_dir(), std::path::Path::new("/app/out/lz4"));
        assert_eq!(m.application_name(), Some("test"));
    }

    // Verify per-architecture stub paths
    //
    // A `{abi}` placeholder selects the stub of the architecture being
    // packaged, while paths without placeholder are used for every
    // architecture.
    #[test]
    fn manifest_stub_path() {
        let m = Manifest::parse_str("
            version = 1
            [packaging]
            stub-path = \"stubs/{abi}/libstub.so\"
        ").unwrap();
        let v = m.view_packaging(std::path::Path::new("/app"));

        assert_eq!(
            v.stub_path_for(Arch::Arm64).unwrap(),
            std::path::Path::new("/app/stubs/arm64-v8a/libstub.so"),
        );
        assert_eq!(
            v.stub_path_for(Arch::X86_64).unwrap(),
            std::path::Path::new("/app/stubs/x86_64/libstub.so"),
        );

        let m = Manifest::parse_str("version = 1").unwrap();
        assert!(m.view_packaging(std::path::Path::new("/app")).stub_path_for(Arch::X86).is_none());
        assert_eq!(m.application_name(), None);
    }

    // Verify packaging validation
    //
    // Unknown ABIs, duplicate fast-path names, and unknown modes must be
    // refused.
    #[test]
    fn manifest_parse_packaging_invalid() {
        let s = "
            version = 1
            [packaging]
            supported-abis = [\"mips\"]
        ";
        assert!(matches!(
            Manifest::parse_str(s),
            Err(Error::InvalidKey("packaging.supported-abis")),
        ));

        let s = "
            version = 1
            [packaging]
            fast-path = [\"A.dll\", \"A.dll\"]
        ";
        assert!(matches!(
            Manifest::parse_str(s),
            Err(Error::InvalidKey("packaging.fast-path")),
        ));

        let s = "
            version = 1
            [packaging]
            mode = \"single\"
        ";
        assert!(matches!(Manifest::parse_str(s), Err(Error::Parse(_))));
    }

    // Verify parsing of manifest application names and ids
    //
    // Application names and IDs use restrictive character sets. Verify the
    // validators and ensure invalid characters are refused.
    #[test]
    fn manifest_parse_application() {
        let s = "
            version = 1
            [application]
            id = \"_foobar0\"
            name = \"Foo Bar\"
        ";

        let m = Manifest::parse_str(s).unwrap();
        assert_eq!(m.application_name(), Some("Foo Bar"));
        let a = m.raw.application.unwrap();
        assert_eq!(a.id.unwrap(), "_foobar0");
        assert_eq!(a.name.unwrap(), "Foo Bar");

        let s = "
            version = 1
            [application]
            name = \"Foo\\\"Bar\"
        ";
        assert!(Manifest::parse_str(s).is_err());

        let s = "
            version = 1
            [application]
            id = \"\"
        ";
        assert!(Manifest::parse_str(s).is_err());
    }
}

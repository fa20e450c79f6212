//! Android Platform Integration
//!
//! This module documents how managed assemblies are shipped inside an Android
//! application package, and provides the architecture definitions the rest of
//! the bundler is parameterized over.
//!
//! Android installs native code from the `lib/<abi>/` directory of a package.
//! The package manager only accepts files shaped like shared libraries in this
//! directory, and it only extracts (or maps in place) files whose names follow
//! the `lib*.so` pattern. Managed assemblies are not native code, but placing
//! them next to the native libraries lets the runtime map them directly from
//! the package, page-aligned and uncompressed by the archive layer. Hence,
//! every assembly, and every blob of assemblies, is disguised as a shared
//! library before it is handed to the archive writer.
//!
//! Each application is built for one or more ABIs. Assemblies are mostly
//! architecture-specific after trimming and ahead-of-time compilation, so the
//! bundler treats each ABI as an independent packaging pass. The exception
//! are satellite assemblies, which only carry localized resources and are
//! replicated into every ABI.
//!
//! The resulting layout of the native library directory is:
//!
//! ```text
//! lib/
//! ├── arm64-v8a/
//! │   ├── libassemblies.arm64-v8a.blob.so     (consolidated mode)
//! │   ├── lib_App.dll.so                      (discrete mode)
//! │   ├── lib-es_App.resources.dll.so         (discrete mode, satellite)
//! │   └── ...
//! └── x86_64/
//!     └── ...
//! ```
//!
//! Next to the containers, the bundler generates one LLVM IR source per ABI.
//! It is compiled and linked into the application's native support library,
//! where the runtime finds the assembly index without parsing any archive.

/// Android Target Architecture
///
/// Enumeration of all Android ABIs that can carry managed assemblies. The
/// ordering of the variants is stable and used to order per-architecture
/// output deterministically.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Arch {
    Arm,
    Arm64,
    X86,
    X86_64,
}

impl Arch {
    /// All supported architectures in their canonical order.
    pub const ALL: [Arch; 4] = [Arch::Arm, Arch::Arm64, Arch::X86, Arch::X86_64];

    /// Get Android ABI name
    ///
    /// Return the ABI name as used for the `lib/<abi>/` directory of an
    /// application package. This is guaranteed to be parsable by
    /// `from_abi()`.
    pub fn abi(&self) -> &'static str {
        match self {
            Arch::Arm => "armeabi-v7a",
            Arch::Arm64 => "arm64-v8a",
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
        }
    }

    /// Get runtime identifier
    ///
    /// Return the .NET runtime identifier matching this architecture.
    pub fn rid(&self) -> &'static str {
        match self {
            Arch::Arm => "android-arm",
            Arch::Arm64 => "android-arm64",
            Arch::X86 => "android-x86",
            Arch::X86_64 => "android-x64",
        }
    }

    /// Parse an Android ABI name
    ///
    /// Map an ABI name to its architecture. Matching is case-insensitive.
    pub fn from_abi(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| s.eq_ignore_ascii_case(v.abi()))
    }

    /// Parse a runtime identifier
    ///
    /// Map a .NET runtime identifier to its architecture. Matching is
    /// case-insensitive.
    pub fn from_rid(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| s.eq_ignore_ascii_case(v.rid()))
    }

    /// Whether this is a 64-bit architecture.
    pub fn is_64bit(&self) -> bool {
        match self {
            Arch::Arm64 | Arch::X86_64 => true,
            Arch::Arm | Arch::X86 => false,
        }
    }

    /// Size of a native pointer in bytes.
    pub fn pointer_size(&self) -> u64 {
        if self.is_64bit() {
            8
        } else {
            4
        }
    }

    /// Get LLVM target triple
    ///
    /// Return the target triple written into generated LLVM IR. The API level
    /// is the lowest one the runtime supports.
    pub fn llvm_triple(&self) -> &'static str {
        match self {
            Arch::Arm => "armv7-unknown-linux-android21",
            Arch::Arm64 => "aarch64-unknown-linux-android21",
            Arch::X86 => "i686-unknown-linux-android21",
            Arch::X86_64 => "x86_64-unknown-linux-android21",
        }
    }

    /// Get LLVM data layout
    ///
    /// Return the data layout string matching `llvm_triple()`.
    pub fn llvm_data_layout(&self) -> &'static str {
        match self {
            Arch::Arm => "e-m:e-p:32:32-Fi8-i64:64-v128:64:128-a:0:32-n32-S64",
            Arch::Arm64 => "e-m:e-i8:8:32-i16:16:32-i64:64-i128:128-n32:64-S128",
            Arch::X86 => "e-m:e-p:32:32-p270:32:32-p271:32:32-p272:64:64-f64:32:64-f80:32-n8:16:32-S128",
            Arch::X86_64 => "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-f80:128-n8:16:32:64-S128",
        }
    }

    /// ELF machine identifier for native containers of this architecture.
    pub fn elf_machine(&self) -> u16 {
        match self {
            Arch::Arm => object::elf::EM_ARM,
            Arch::Arm64 => object::elf::EM_AARCH64,
            Arch::X86 => object::elf::EM_386,
            Arch::X86_64 => object::elf::EM_X86_64,
        }
    }

    /// Architecture as reported by the `object` crate when reading native
    /// binaries of this architecture.
    pub fn object_architecture(&self) -> object::Architecture {
        match self {
            Arch::Arm => object::Architecture::Arm,
            Arch::Arm64 => object::Architecture::Aarch64,
            Arch::X86 => object::Architecture::I386,
            Arch::X86_64 => object::Architecture::X86_64,
        }
    }

    /// ELF header flags required by the Android loader.
    pub fn elf_flags(&self) -> u32 {
        match self {
            Arch::Arm => object::elf::EF_ARM_EABI_VER5,
            _ => 0,
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.abi())
    }
}

// Parse architectures from strings
//
// Both Android ABI names and .NET runtime identifiers are accepted, since
// upstream tooling uses either, depending on which stage produced an item.
impl std::str::FromStr for Arch {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_abi(s).or_else(|| Self::from_rid(s)).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify architecture parsing
    //
    // ABI names and runtime identifiers must both resolve, case-insensitive,
    // and unknown names must be refused.
    #[test]
    fn arch_parse() {
        assert_eq!("arm64-v8a".parse::<Arch>(), Ok(Arch::Arm64));
        assert_eq!("ARMEABI-V7A".parse::<Arch>(), Ok(Arch::Arm));
        assert_eq!("android-x64".parse::<Arch>(), Ok(Arch::X86_64));
        assert_eq!("android-x86".parse::<Arch>(), Ok(Arch::X86));
        assert!("mips".parse::<Arch>().is_err());

        for arch in Arch::ALL {
            assert_eq!(Arch::from_abi(arch.abi()), Some(arch));
            assert_eq!(Arch::from_rid(arch.rid()), Some(arch));
        }
    }

    // Verify pointer widths
    //
    // The hash width of the assembly index depends on this, so make sure the
    // 32-bit ABIs are not accidentally treated as 64-bit.
    #[test]
    fn arch_width() {
        assert!(Arch::Arm64.is_64bit());
        assert!(Arch::X86_64.is_64bit());
        assert!(!Arch::Arm.is_64bit());
        assert_eq!(Arch::X86.pointer_size(), 4);
    }
}

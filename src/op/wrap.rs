//! Wrap Files
//!
//! This module implements the `wrap` operation, which wraps a single file
//! into a native container. It is used for files that are produced outside
//! of the packaging pipeline but still have to be shipped in the native
//! library directory.

/// Wrap Errors
///
/// This is the exhaustive list of possible errors raised by the wrap
/// operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No container name was given, and none can be derived from the input.
    #[error("cannot derive a container name from {0:?}")]
    InvalidName(std::path::PathBuf),
    /// Wrapping the file failed.
    #[error(transparent)]
    Wrap(#[from] crate::dso::Error),
}

/// Wrap a file
///
/// Wrap `input` into a container for `arch` and write it to `output`. The
/// container is named `name`, or, if not given, after the input file with
/// the mangling used for discrete assemblies.
///
/// Returns the container name and whether the output had to be rewritten.
pub fn wrap(
    arch: crate::platform::android::Arch,
    input: &std::path::Path,
    name: Option<&str>,
    output: &std::path::Path,
) -> Result<(String, crate::update::Update), Error> {
    let name = match name {
        Some(v) => v.to_string(),
        None => input.file_name()
            .and_then(|v| v.to_str())
            .map(crate::select::discrete_name)
            .ok_or_else(|| Error::InvalidName(input.to_path_buf()))?,
    };

    let update = crate::dso::wrap_file(arch, input, &name, output)?;

    log::debug!("{}: wrapped {:?} as {:?} into {:?}", arch, input, name, output);

    Ok((name, update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::android::Arch;

    // Verify name derivation and idempotence
    //
    // Without explicit name, the discrete mangling is used. Wrapping twice
    // must leave the output untouched the second time.
    #[test]
    fn wrap_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("App.pdb");
        let output = dir.path().join("lib").join("lib_App.pdb.so");
        std::fs::write(&input, b"pdb").unwrap();

        let (name, update) = wrap(Arch::Arm64, &input, None, &output).unwrap();
        assert_eq!(name, "lib_App.pdb.so");
        assert!(update.rewritten());

        let (_, update) = wrap(Arch::Arm64, &input, None, &output).unwrap();
        assert!(!update.rewritten());

        let data = std::fs::read(&output).unwrap();
        assert_eq!(crate::dso::payload(&data).unwrap(), b"pdb");
    }

    // Verify missing inputs are reported.
    #[test]
    fn wrap_missing() {
        let dir = tempfile::tempdir().unwrap();
        let r = wrap(Arch::X86, &dir.path().join("nope"), Some("lib_nope.so"), &dir.path().join("out"));

        assert!(matches!(r, Err(Error::Wrap(crate::dso::Error::Read(..)))));
    }
}

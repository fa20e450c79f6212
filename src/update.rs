//! Change-Detected File Updates
//!
//! Generated files are consumed by incremental build steps that key their
//! decisions off file modification times. Rewriting a file with identical
//! content would trigger needless recompilation and relinking of everything
//! downstream. The helpers in this module therefore only ever touch a file if
//! its content actually changes, and report back whether they did.

/// Update Errors
///
/// This is the exhaustive list of possible errors raised by the update
/// helpers. See each error for details.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Creation of the directory at the specified path failed.
    #[error("cannot create directory {0:?}: {1}")]
    DirectoryCreation(std::path::PathBuf, std::io::Error),
    /// Updating the file at the specified path failed with the given error.
    #[error("cannot update {0:?}: {1}")]
    FileUpdate(std::path::PathBuf, std::io::Error),
}

/// Update Outcome
///
/// Reports whether `update_file()` had to rewrite the file, or whether the
/// file already had the requested content.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Update {
    /// File content already matched, the file was left untouched.
    Unchanged,
    /// File was created or its content was replaced.
    Rewritten,
}

impl Update {
    /// Whether the file was written to.
    pub fn rewritten(&self) -> bool {
        matches!(self, Update::Rewritten)
    }
}

/// Ensure directory exists
///
/// Make sure the directory at the given path exists. Create the directory and
/// its parent directories if necessary.
///
/// This is a convenience helper around `std::fs::create_dir_all()`, but
/// returning the local error `Error::DirectoryCreation` on failure.
pub fn ensure_dir(path: &std::path::Path) -> Result<(), Error> {
    std::fs::create_dir_all(path)
        .map_err(|v| Error::DirectoryCreation(path.to_path_buf(), v))
}

/// Update a file if required
///
/// This writes the given content to the specified file, but only if the file
/// content does not already match the new content. This avoids modifying a
/// file unless necessary. Thus, the file timestamp is only modified if the
/// content really changed. The parent directory is created if missing.
///
/// Note that this reads in the entire file content. Thus, use it only on
/// trusted content.
pub fn update_file(
    path: &std::path::Path,
    content: &[u8],
) -> Result<Update, Error> {
    let e = |v| Error::FileUpdate(path.to_path_buf(), v);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }

    // Open the file read+write and create it if it does not exist, yet.
    let mut f = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(e)?;

    // Read the entire file content into memory.
    let mut old = Vec::new();
    <std::fs::File as std::io::Read>::read_to_end(&mut f, &mut old)
        .map_err(e)?;

    if old == content {
        log::debug!("{:?} is up to date", path);
        return Ok(Update::Unchanged);
    }

    // The file has to be updated, so rewind the position, truncate the file
    // and write the new contents.
    <std::fs::File as std::io::Seek>::rewind(&mut f).map_err(e)?;
    f.set_len(0).map_err(e)?;
    <std::fs::File as std::io::Write>::write_all(&mut f, content)
        .map_err(e)?;

    // Sync the file now to ensure errors are caught properly.
    f.sync_all().map_err(e)?;

    log::debug!("{:?} rewritten ({} bytes)", path, content.len());
    Ok(Update::Rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify change detection
    //
    // Writing the same content twice must only rewrite the file the first
    // time, and changed content must be picked up, including shrinking.
    #[test]
    fn update_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("file.ll");

        assert_eq!(update_file(&path, b"foobar").unwrap(), Update::Rewritten);
        assert_eq!(update_file(&path, b"foobar").unwrap(), Update::Unchanged);
        assert_eq!(update_file(&path, b"foo").unwrap(), Update::Rewritten);
        assert_eq!(std::fs::read(&path).unwrap(), b"foo");
    }

    // Verify empty content
    //
    // A freshly created empty file already matches empty content, which is
    // reported as unchanged since nothing had to be written.
    #[test]
    fn update_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");

        assert_eq!(update_file(&path, b"").unwrap(), Update::Unchanged);
        assert!(path.exists());
    }
}

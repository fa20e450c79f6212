//! Blob Assembler
//!
//! In consolidated mode, all assemblies of an architecture are stored in a
//! single blob. The blob starts with a container stub padded to exactly one
//! page, so the first assembly begins on a page boundary. Assemblies follow
//! back to back, without any padding between them.

/// Padded size of the blob stub, one page on every Android device.
pub const STUB_SIZE: u64 = 4096;

/// Blob Errors
///
/// This is the exhaustive list of possible errors raised by the blob
/// assembler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The stub is larger than a page. This is a configuration bug.
    #[error("blob stub of {0} bytes exceeds the maximum of 4096 bytes")]
    StubTooLarge(usize),
    /// Reading stored assembly data failed.
    #[error("cannot read {0:?}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    /// The blob exceeds the 32-bit offsets of the native index.
    #[error("blob {0:?} exceeds the maximum size of 4 GiB")]
    BlobTooLarge(std::path::PathBuf),
    /// Writing the blob failed.
    #[error(transparent)]
    Update(#[from] crate::update::Error),
}

/// Assembled Blob
///
/// Placement of all records of a blob.
#[derive(Clone, Debug)]
pub struct Blob {
    /// Offset of each record within the blob, indexed by arena index.
    /// Records not contained in the blob have offset 0.
    pub offsets: Vec<u32>,
    /// Total size of the blob.
    pub size: u64,
    /// Whether the blob file had to be rewritten.
    pub update: crate::update::Update,
}

/// Assemble a blob
///
/// Write the blob of `unit` to its path. `stub` is padded to `STUB_SIZE`,
/// followed by the data of every record of the unit, in unit order. The data
/// of record `i` is read from `stored[i]`, which is either the compressed
/// payload or the original assembly.
///
/// Returns the offset column of the arena, i.e., `stored.len()` offsets.
pub fn assemble(
    unit: &crate::select::PackagingUnit,
    stub: &[u8],
    stored: &[&std::path::Path],
) -> Result<Blob, Error> {
    if stub.len() as u64 > STUB_SIZE {
        return Err(Error::StubTooLarge(stub.len()));
    }

    let mut data = Vec::with_capacity(STUB_SIZE as usize);
    data.extend_from_slice(stub);
    data.resize(STUB_SIZE as usize, 0);

    let mut offsets = vec![0u32; stored.len()];

    for &index in unit.records.iter() {
        let path = stored[index];
        let offset = u32::try_from(data.len())
            .map_err(|_| Error::BlobTooLarge(unit.path.clone()))?;

        let mut f = std::fs::File::open(path)
            .map_err(|v| Error::Read(path.to_path_buf(), v))?;
        <std::fs::File as std::io::Read>::read_to_end(&mut f, &mut data)
            .map_err(|v| Error::Read(path.to_path_buf(), v))?;

        offsets[index] = offset;
    }

    if u32::try_from(data.len()).is_err() {
        return Err(Error::BlobTooLarge(unit.path.clone()));
    }

    let update = crate::update::update_file(&unit.path, &data)?;

    log::debug!(
        "{}: blob {:?} holds {} assemblies in {} bytes",
        unit.arch, unit.path, unit.records.len(), data.len(),
    );

    Ok(Blob {
        offsets: offsets,
        size: data.len() as u64,
        update: update,
    })
}

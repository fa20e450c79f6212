//! Assembly Compressor
//!
//! Compresses assemblies ahead of time with an LZ4 block codec, so the
//! runtime can decompress them into the buffers reserved by the native index.
//!
//! A compressed payload is a 12-byte little-endian header followed by a raw
//! LZ4 block:
//!
//! ```text
//! +--------+------------------+---------------------+-----------+
//! | magic  | descriptor index | uncompressed length | LZ4 block |
//! | u32 LE | u32 LE           | u32 LE              | ...       |
//! +--------+------------------+---------------------+-----------+
//! ```
//!
//! The magic is `XALZ` in file order. Compression is purely a size
//! optimization. Whenever it does not pay off, the assembly is stored as-is.

/// Magic number at the start of compressed payloads.
pub const MAGIC: u32 = 0x5A4C4158;

/// Length of the header of compressed payloads.
pub const HEADER_LEN: usize = 12;

/// Compressor Errors
///
/// This is the exhaustive list of possible errors raised by the compressor.
/// Codec failures are not part of it, since they merely cause a fallback to
/// uncompressed storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading the assembly at the specified path failed.
    #[error("cannot read assembly {0:?}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    /// An assembly that should be compressed has no plan entry.
    #[error("{0}: assembly {1:?} was not planned for compression")]
    NotPlanned(crate::platform::android::Arch, String),
    /// Writing the compressed assembly failed.
    #[error(transparent)]
    Update(#[from] crate::update::Error),
}

/// Compressed Assembly
///
/// Result of compressing a single assembly.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Compressed {
    /// Path to the compressed payload, including its header.
    pub path: std::path::PathBuf,
    /// Length of the compressed payload, including its header.
    pub size: u32,
}

/// Compressed file path
///
/// Return the path a compressed assembly is written to. The path relative
/// to `dir` is exactly the per-architecture plan key, so `key_from_path()`
/// recovers the key.
pub fn compressed_path(
    dir: &std::path::Path,
    arch: crate::platform::android::Arch,
    name: &str,
) -> std::path::PathBuf {
    dir.join(crate::plan::plan_key(arch, name))
}

/// Recover the plan key of a compressed file
///
/// Inverse of `compressed_path()`. Returns `None` if `path` is not located
/// in `dir`.
pub fn key_from_path(
    dir: &std::path::Path,
    path: &std::path::Path,
) -> Option<String> {
    let rel = path.strip_prefix(dir).ok()?;
    let parts: Vec<&str> = rel.components()
        .map(|v| v.as_os_str().to_str())
        .collect::<Option<_>>()?;

    Some(parts.join("/"))
}

/// Compress a payload
///
/// Compress `data` and prepend the payload header. Returns `None` if the
/// result is not smaller than the input, or if the data cannot be described
/// by the header. The compressed block is decompressed again and compared to
/// the input before it is accepted.
pub fn compress(descriptor_index: u32, data: &[u8]) -> Option<Vec<u8>> {
    let len = u32::try_from(data.len()).ok()?;
    let block = lz4_flex::block::compress(data);

    if HEADER_LEN + block.len() >= data.len() {
        return None;
    }

    match lz4_flex::block::decompress(&block, data.len()) {
        Ok(v) if v == data => {},
        _ => return None,
    }

    let mut out = Vec::with_capacity(HEADER_LEN + block.len());
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&descriptor_index.to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&block);

    Some(out)
}

/// Decompress a payload
///
/// Parse the header of a compressed payload and decompress it. Returns the
/// descriptor index and the uncompressed data, or `None` if `data` is not a
/// valid compressed payload.
pub fn decompress(data: &[u8]) -> Option<(u32, Vec<u8>)> {
    if data.len() < HEADER_LEN {
        return None;
    }

    let word = |v: usize| {
        u32::from_le_bytes([data[v], data[v + 1], data[v + 2], data[v + 3]])
    };

    if word(0) != MAGIC {
        return None;
    }

    let out = lz4_flex::block::decompress(&data[HEADER_LEN..], word(8) as usize).ok()?;

    Some((word(4), out))
}

/// Compress all assemblies of an architecture
///
/// Compress every record of `arena` that has an entry in `plan` and is not
/// opted out, writing the payloads below `dir` through the change-detection
/// writer. Returns one entry per record. Records that are stored
/// uncompressed, either because they were not planned or because compression
/// did not pay off, get `None`.
pub fn compress_arch(
    arena: &crate::assembly::ArchAssemblies,
    plan: &crate::plan::ArchPlan,
    dir: &std::path::Path,
) -> Result<Vec<Option<Compressed>>, Error> {
    let mut column = Vec::with_capacity(arena.len());
    let mut fallbacks = 0usize;

    for record in arena.records() {
        if record.skip_compression || plan.is_empty() {
            column.push(None);
            continue;
        }

        let entry = plan.get(record.name)
            .ok_or_else(|| Error::NotPlanned(arena.arch, record.name.to_string()))?;
        let data = std::fs::read(record.source)
            .map_err(|v| Error::Read(record.source.to_path_buf(), v))?;

        let Some(payload) = compress(entry.descriptor_index, &data) else {
            log::debug!(
                "{}: compression of {:?} does not pay off, storing uncompressed",
                arena.arch, record.name,
            );
            fallbacks += 1;
            column.push(None);
            continue;
        };

        let path = compressed_path(dir, arena.arch, record.name);
        crate::update::update_file(&path, &payload)?;

        column.push(Some(Compressed {
            path: path,
            // Header and block are smaller than the input, which fits u32.
            size: payload.len() as u32,
        }));
    }

    if fallbacks > 0 {
        log::debug!("{}: {} assemblies stored uncompressed", arena.arch, fallbacks);
    }

    Ok(column)
}

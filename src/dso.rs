//! Native Container Wrapper
//!
//! Android only ships files shaped like shared libraries in the native
//! library directory of a package. This module produces minimal, yet
//! structurally valid, ELF shared objects that carry an arbitrary payload
//! verbatim in a dedicated section.
//!
//! The container consists of the ELF header, a `PT_LOAD` segment covering
//! the dynamic linking tables, a `PT_DYNAMIC` segment, and the `payload`
//! section, which is not part of any segment. The payload starts at a file
//! offset aligned to 16 KiB, so runtimes can map it directly on devices with
//! either 4 KiB or 16 KiB pages.
//!
//! Output is a pure function of architecture, name, and payload. No
//! timestamps, paths, or other ambient data end up in a container.

/// Name of the section carrying the payload.
pub const PAYLOAD_SECTION: &str = "payload";

/// Alignment of the payload inside a container, as well as the alignment of
/// the loadable segment.
pub const PAYLOAD_ALIGN: usize = 0x4000;

/// Wrapper Errors
///
/// This is the exhaustive list of possible errors raised by the container
/// wrapper.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading the input file at the specified path failed.
    #[error("cannot read {0:?}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    /// The payload does not fit into a container of the architecture.
    #[error("payload of {0} bytes is too large for a {1} container")]
    PayloadTooLarge(usize, crate::platform::android::Arch),
    /// The ELF writer refused the container layout.
    #[error("cannot write container: {0}")]
    Elf(object::write::Error),
    /// Writing the container to its output path failed.
    #[error(transparent)]
    Update(#[from] crate::update::Error),
}

// Build a container
//
// Lay out and write the ELF shared object for `payload`, aligning the
// payload section to `align` bytes. The layout is fully determined by the
// input, and the writer is driven in two passes: all file ranges are
// reserved first, then written in the same order.
fn build(
    arch: crate::platform::android::Arch,
    name: &str,
    payload: &[u8],
    align: usize,
) -> Result<Vec<u8>, Error> {
    let is_64 = arch.is_64bit();

    if !is_64 && payload.len() as u64 > u32::MAX as u64 - align as u64 {
        return Err(Error::PayloadTooLarge(payload.len(), arch));
    }

    let mut data = Vec::new();
    let mut w = object::write::elf::Writer::new(
        object::Endianness::Little,
        is_64,
        &mut data,
    );

    w.reserve_file_header();
    w.reserve_program_headers(2);

    w.reserve_null_section_index();
    w.reserve_dynsym_section_index();
    w.reserve_dynstr_section_index();
    w.reserve_hash_section_index();
    w.reserve_dynamic_section_index();
    let payload_name = w.add_section_name(PAYLOAD_SECTION.as_bytes());
    w.reserve_section_index();
    w.reserve_shstrtab_section_index();

    w.reserve_null_dynamic_symbol_index();
    let soname = w.add_dynamic_string(name.as_bytes());

    let dynsym_offset = w.reserve_dynsym();
    let dynstr_offset = w.reserve_dynstr();
    let hash_offset = w.reserve_hash(1, 1);
    let dynamic_offset = w.reserve_dynamic(7);
    let load_end = w.reserved_len();
    let dynamic_size = load_end - dynamic_offset;

    // The payload is placed after everything the loader maps, and before the
    // section headers, which are only needed by tooling.
    let payload_offset = (load_end + align - 1) / align * align;
    w.reserve_until(payload_offset);
    w.reserve(payload.len(), 1);

    w.reserve_shstrtab();
    w.reserve_section_headers();

    w.write_file_header(&object::write::elf::FileHeader {
        os_abi: object::elf::ELFOSABI_NONE,
        abi_version: 0,
        e_type: object::elf::ET_DYN,
        e_machine: arch.elf_machine(),
        e_entry: 0,
        e_flags: arch.elf_flags(),
    }).map_err(Error::Elf)?;

    w.write_align_program_headers();
    w.write_program_header(&object::write::elf::ProgramHeader {
        p_type: object::elf::PT_LOAD,
        p_flags: object::elf::PF_R | object::elf::PF_W,
        p_offset: 0,
        p_vaddr: 0,
        p_paddr: 0,
        p_filesz: load_end as u64,
        p_memsz: load_end as u64,
        p_align: PAYLOAD_ALIGN as u64,
    });
    w.write_program_header(&object::write::elf::ProgramHeader {
        p_type: object::elf::PT_DYNAMIC,
        p_flags: object::elf::PF_R | object::elf::PF_W,
        p_offset: dynamic_offset as u64,
        p_vaddr: dynamic_offset as u64,
        p_paddr: dynamic_offset as u64,
        p_filesz: dynamic_size as u64,
        p_memsz: dynamic_size as u64,
        p_align: arch.pointer_size(),
    });

    w.write_null_dynamic_symbol();
    w.write_dynstr();
    w.write_hash(1, 1, |_| None);

    let syment = if is_64 { 24 } else { 16 };
    let strsz = w.dynstr_len() as u64;
    w.write_align_dynamic();
    w.write_dynamic(object::elf::DT_HASH, hash_offset as u64);
    w.write_dynamic(object::elf::DT_STRTAB, dynstr_offset as u64);
    w.write_dynamic(object::elf::DT_SYMTAB, dynsym_offset as u64);
    w.write_dynamic(object::elf::DT_STRSZ, strsz);
    w.write_dynamic(object::elf::DT_SYMENT, syment);
    w.write_dynamic_string(object::elf::DT_SONAME, soname);
    w.write_dynamic(object::elf::DT_NULL, 0);

    w.pad_until(payload_offset);
    w.write(payload);

    w.write_shstrtab();

    w.write_null_section_header();
    w.write_dynsym_section_header(dynsym_offset as u64, 1);
    w.write_dynstr_section_header(dynstr_offset as u64);
    w.write_hash_section_header(hash_offset as u64);
    w.write_dynamic_section_header(dynamic_offset as u64);
    w.write_section_header(&object::write::elf::SectionHeader {
        name: Some(payload_name),
        sh_type: object::elf::SHT_PROGBITS,
        sh_flags: 0,
        sh_addr: 0,
        sh_offset: payload_offset as u64,
        sh_size: payload.len() as u64,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: align as u64,
        sh_entsize: 0,
    });
    w.write_shstrtab_section_header();

    Ok(data)
}

/// Wrap a payload
///
/// Produce a shared-object container with `name` as its `DT_SONAME` and
/// `payload` as the verbatim content of its `payload` section. Identical
/// input always yields byte-identical output.
pub fn wrap(
    arch: crate::platform::android::Arch,
    name: &str,
    payload: &[u8],
) -> Result<Vec<u8>, Error> {
    build(arch, name, payload, PAYLOAD_ALIGN)
}

/// Build a blob stub
///
/// Produce the container prefix of a consolidated blob. This is a container
/// with an empty payload, so the whole stub fits into a single page. The
/// blob assembler pads it and appends the assembly data.
pub fn stub(
    arch: crate::platform::android::Arch,
    name: &str,
) -> Result<Vec<u8>, Error> {
    build(arch, name, &[], 1)
}

/// Wrap a file
///
/// Read the file at `input`, wrap it via `wrap()`, and write the container
/// to `output` through the change-detection writer.
pub fn wrap_file(
    arch: crate::platform::android::Arch,
    input: &std::path::Path,
    name: &str,
    output: &std::path::Path,
) -> Result<crate::update::Update, Error> {
    let payload = std::fs::read(input)
        .map_err(|v| Error::Read(input.to_path_buf(), v))?;
    let data = wrap(arch, name, &payload)?;

    Ok(crate::update::update_file(output, &data)?)
}

/// Machine architecture of a native binary, or `None` if `data` cannot be
/// parsed as one.
pub fn architecture(data: &[u8]) -> Option<object::Architecture> {
    use object::Object;

    object::File::parse(data).ok().map(|v| v.architecture())
}

/// Extract the payload
///
/// Parse `data` as a container and return the content of its payload
/// section. Returns `None` if `data` is not an ELF file or has no payload.
pub fn payload(data: &[u8]) -> Option<&[u8]> {
    use object::{Object, ObjectSection};

    let file = object::File::parse(data).ok()?;
    let section = file.section_by_name(PAYLOAD_SECTION)?;
    section.data().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::android::Arch;
    use object::{Object, ObjectSection};

    // Verify container shape
    //
    // Wrap a payload for every architecture and verify the result parses as
    // a shared object of the right machine, with the payload at an aligned
    // offset and preserved verbatim.
    #[test]
    fn wrap_shape() {
        let payload: Vec<u8> = (0..5000u32).map(|v| v as u8).collect();

        for arch in Arch::ALL {
            let data = wrap(arch, "lib_App.dll.so", &payload).unwrap();
            let file = object::File::parse(&*data).unwrap();

            assert_eq!(file.kind(), object::ObjectKind::Dynamic);
            assert_eq!(file.is_64(), arch.is_64bit());
            assert!(file.is_little_endian());

            let section = file.section_by_name(PAYLOAD_SECTION).unwrap();
            let (offset, size) = section.file_range().unwrap();
            assert_eq!(offset % PAYLOAD_ALIGN as u64, 0);
            assert_eq!(size, payload.len() as u64);
            assert_eq!(section.data().unwrap(), &payload[..]);
            assert_eq!(super::payload(&data).unwrap(), &payload[..]);
        }
    }

    // Verify wrapping is idempotent
    //
    // The same input must produce byte-identical containers, while a
    // different name must be reflected in the output.
    #[test]
    fn wrap_idempotent() {
        let a = wrap(Arch::Arm64, "lib_App.dll.so", b"foobar").unwrap();
        let b = wrap(Arch::Arm64, "lib_App.dll.so", b"foobar").unwrap();
        let c = wrap(Arch::Arm64, "lib_Lib.dll.so", b"foobar").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    // Verify empty payloads
    #[test]
    fn wrap_empty() {
        let data = wrap(Arch::X86, "lib_Empty.dll.so", &[]).unwrap();

        assert_eq!(super::payload(&data).unwrap(), &[] as &[u8]);
    }

    // Verify stub size
    //
    // The blob stub must stay well within a single page on every
    // architecture, even with long names.
    #[test]
    fn stub_fits_page() {
        for arch in Arch::ALL {
            let name = format!("libassemblies.{}.blob.so", arch.abi());
            let data = stub(arch, &name).unwrap();

            assert!(data.len() <= 4096);
            assert_eq!(architecture(&data), Some(arch.object_architecture()));
        }
    }

    // Verify the payload accessor refuses non-containers.
    #[test]
    fn payload_invalid() {
        assert!(super::payload(b"XALZ").is_none());
    }
}

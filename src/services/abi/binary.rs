//! ABI decoding straight from binary file headers.
//!
//! Understands ELF, PE/COFF (images, objects and import libraries), thin and fat
//! Mach-O, and `ar` archives containing any of those. Only the bytes the headers
//! need are looked at; nothing Qt-specific happens here.

use crate::models::abi::push_unique;
use crate::models::{Abi, Architecture, BinaryFormat, Os, OsFlavor};
use camino::Utf8Path;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

const ELF_MAGIC: &[u8] = b"\x7fELF";
const AR_MAGIC: &[u8] = b"!<arch>\n";
const AR_HEADER_LEN: usize = 60;

const MACHO_FAT_MAGIC: u32 = 0xcafe_babe;
const MACHO_FAT_MAGIC_64: u32 = 0xcafe_babf;
const MACHO_MAGIC_32: u32 = 0xfeed_face;
const MACHO_MAGIC_64: u32 = 0xfeed_facf;
const MACHO_CPU_ABI64: u32 = 0x0100_0000;

/// Bytes read from the start of a file or archive member. Enough for every
/// header decoded here, including a PE header behind a typical DOS stub.
const HEADER_READ_LEN: u64 = 4096;

/// Fat headers with more slices than this are assumed to be Java class files,
/// which share the magic.
const MAX_FAT_ARCHS: u32 = 30;

#[derive(Clone, Copy)]
enum Endian {
    Little,
    Big,
}

fn read_u16(data: &[u8], offset: usize, endian: Endian) -> Option<u16> {
    let bytes: [u8; 2] = data.get(offset..offset + 2)?.try_into().ok()?;
    Some(match endian {
        Endian::Little => u16::from_le_bytes(bytes),
        Endian::Big => u16::from_be_bytes(bytes),
    })
}

fn read_u32(data: &[u8], offset: usize, endian: Endian) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
    Some(match endian {
        Endian::Little => u32::from_le_bytes(bytes),
        Endian::Big => u32::from_be_bytes(bytes),
    })
}

/// Decode every ABI the file format encodes. Unrecognized data yields an empty list.
pub fn abis_of_bytes(data: &[u8]) -> Vec<Abi> {
    if data.starts_with(ELF_MAGIC) {
        return elf_abi(data).into_iter().collect();
    }
    if data.starts_with(AR_MAGIC) {
        return ar_abis(data);
    }
    if data.starts_with(b"MZ") {
        return pe_abi(data).into_iter().collect();
    }
    if let Some(abis) = macho_abis(data) {
        return abis;
    }
    coff_object_abi(data).into_iter().collect()
}

/// Decode a file on disk. Only the header is read; archives are walked member
/// by member with seeks, so large static libraries are never loaded whole.
pub fn abis_of_file(path: &Utf8Path) -> io::Result<Vec<Abi>> {
    let mut file = File::open(path)?;
    let head = read_prefix(&mut file, HEADER_READ_LEN)?;
    if head.starts_with(AR_MAGIC) {
        return walk_archive(&mut file);
    }
    Ok(abis_of_bytes(&head))
}

fn read_prefix<R: Read>(reader: &mut R, limit: u64) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    reader.by_ref().take(limit).read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn elf_abi(data: &[u8]) -> Option<Abi> {
    let word_width = match *data.get(4)? {
        1 => 32,
        2 => 64,
        _ => return None,
    };
    let endian = match *data.get(5)? {
        2 => Endian::Big,
        _ => Endian::Little,
    };
    let (os, os_flavor) = match *data.get(7)? {
        0 | 3 => (Os::Linux, OsFlavor::Generic),
        2 => (Os::Bsd, OsFlavor::NetBsd),
        6 => (Os::Unix, OsFlavor::Solaris),
        9 => (Os::Bsd, OsFlavor::FreeBsd),
        12 => (Os::Bsd, OsFlavor::OpenBsd),
        _ => (Os::Unix, OsFlavor::Generic),
    };

    let architecture = match read_u16(data, 18, endian)? {
        3 | 62 => Architecture::X86,
        8 | 10 => Architecture::Mips,
        20 | 21 => Architecture::PowerPc,
        40 | 183 => Architecture::Arm,
        42 => Architecture::Sh,
        50 => Architecture::Itanium,
        83 => Architecture::Avr,
        94 => Architecture::Xtensa,
        243 => Architecture::RiscV,
        258 => Architecture::LoongArch,
        _ => Architecture::Unknown,
    };

    Some(Abi::new(architecture, os, os_flavor, BinaryFormat::Elf, word_width))
}

fn coff_architecture(machine: u16) -> Option<(Architecture, u8)> {
    match machine {
        0x014c => Some((Architecture::X86, 32)),
        0x8664 => Some((Architecture::X86, 64)),
        0x01c0 | 0x01c2 | 0x01c4 => Some((Architecture::Arm, 32)),
        0xaa64 => Some((Architecture::Arm, 64)),
        0x0200 => Some((Architecture::Itanium, 64)),
        _ => None,
    }
}

/// Flavor implied by the linker version stamped into a PE optional header.
fn flavor_from_linker(major: u8, minor: u8) -> OsFlavor {
    match major {
        2 | 3 => OsFlavor::WindowsMSys,
        8 => OsFlavor::WindowsMsvc2005,
        9 => OsFlavor::WindowsMsvc2008,
        10 => OsFlavor::WindowsMsvc2010,
        11 => OsFlavor::WindowsMsvc2012,
        12 => OsFlavor::WindowsMsvc2013,
        14 if minor >= 30 => OsFlavor::WindowsMsvc2022,
        14 if minor >= 20 => OsFlavor::WindowsMsvc2019,
        14 if minor >= 10 => OsFlavor::WindowsMsvc2017,
        14 => OsFlavor::WindowsMsvc2015,
        _ => OsFlavor::Unknown,
    }
}

fn pe_abi(data: &[u8]) -> Option<Abi> {
    let pe_offset = read_u32(data, 0x3c, Endian::Little)? as usize;
    if data.get(pe_offset..pe_offset + 4)? != b"PE\0\0" {
        return None;
    }
    let coff = pe_offset + 4;
    let (architecture, machine_width) = coff_architecture(read_u16(data, coff, Endian::Little)?)?;

    let optional = coff + 20;
    let word_width = match read_u16(data, optional, Endian::Little) {
        Some(0x10b) => 32,
        Some(0x20b) => 64,
        _ => machine_width,
    };
    let linker_major = *data.get(optional + 2)?;
    let linker_minor = *data.get(optional + 3)?;

    Some(Abi::new(
        architecture,
        Os::Windows,
        flavor_from_linker(linker_major, linker_minor),
        BinaryFormat::Pe,
        word_width,
    ))
}

/// Bare COFF object or short import-library member, as found inside `.lib` archives.
fn coff_object_abi(data: &[u8]) -> Option<Abi> {
    let machine = if read_u16(data, 0, Endian::Little)? == 0
        && read_u16(data, 2, Endian::Little)? == 0xffff
    {
        read_u16(data, 6, Endian::Little)?
    } else {
        read_u16(data, 0, Endian::Little)?
    };
    let (architecture, word_width) = coff_architecture(machine)?;
    Some(Abi::new(
        architecture,
        Os::Windows,
        OsFlavor::Unknown,
        BinaryFormat::Pe,
        word_width,
    ))
}

fn macho_cpu(cpu_type: u32) -> (Architecture, u8) {
    let word_width = if cpu_type & MACHO_CPU_ABI64 != 0 { 64 } else { 32 };
    let architecture = match cpu_type & !MACHO_CPU_ABI64 {
        7 => Architecture::X86,
        12 => Architecture::Arm,
        18 => Architecture::PowerPc,
        _ => Architecture::Unknown,
    };
    (architecture, word_width)
}

fn darwin(cpu_type: u32) -> Abi {
    let (architecture, word_width) = macho_cpu(cpu_type);
    Abi::new(architecture, Os::Darwin, OsFlavor::Generic, BinaryFormat::MachO, word_width)
}

/// `None` if the data is not Mach-O at all.
fn macho_abis(data: &[u8]) -> Option<Vec<Abi>> {
    let magic = read_u32(data, 0, Endian::Big)?;

    if magic == MACHO_FAT_MAGIC || magic == MACHO_FAT_MAGIC_64 {
        let count = read_u32(data, 4, Endian::Big)?;
        if count == 0 || count > MAX_FAT_ARCHS {
            return None;
        }
        let entry_len = if magic == MACHO_FAT_MAGIC_64 { 32 } else { 20 };
        let mut abis = Vec::new();
        for index in 0..count as usize {
            let entry = 8 + index * entry_len;
            let cpu_type = read_u32(data, entry, Endian::Big)?;
            push_unique(&mut abis, darwin(cpu_type));
        }
        return Some(abis);
    }

    let endian = match magic {
        MACHO_MAGIC_32 | MACHO_MAGIC_64 => Endian::Big,
        m if m.swap_bytes() == MACHO_MAGIC_32 || m.swap_bytes() == MACHO_MAGIC_64 => Endian::Little,
        _ => return None,
    };
    let cpu_type = read_u32(data, 4, endian)?;
    Some(vec![darwin(cpu_type)])
}

fn ar_abis(data: &[u8]) -> Vec<Abi> {
    // In-memory reads cannot fail
    walk_archive(&mut Cursor::new(data)).unwrap_or_default()
}

struct MemberHeader {
    name: String,
    size: u64,
}

impl MemberHeader {
    fn parse(header: &[u8; AR_HEADER_LEN]) -> Option<Self> {
        let name = String::from_utf8_lossy(&header[0..16]).trim_end().to_string();
        let size = std::str::from_utf8(&header[48..58])
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()?;
        Some(Self { name, size })
    }

    fn is_symbol_table(&self) -> bool {
        matches!(self.name.as_str(), "/" | "//" | "/SYM64/") || self.name.starts_with("__.SYMDEF")
    }

    /// BSD long names are stored in front of the member data.
    fn name_prefix_len(&self) -> u64 {
        self.name
            .strip_prefix("#1/")
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(0)
    }
}

/// Walk archive members and return the ABIs of the first object that decodes.
/// Seeks from the start of `reader`, which must hold an `ar` archive.
fn walk_archive<R: Read + Seek>(reader: &mut R) -> io::Result<Vec<Abi>> {
    let mut offset = AR_MAGIC.len() as u64;
    let mut raw = [0u8; AR_HEADER_LEN];

    loop {
        reader.seek(SeekFrom::Start(offset))?;
        match reader.read_exact(&mut raw) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        let Some(member) = MemberHeader::parse(&raw) else {
            return Ok(Vec::new());
        };

        let body_start = offset + AR_HEADER_LEN as u64;
        if !member.is_symbol_table() {
            let skip = member.name_prefix_len().min(member.size);
            reader.seek(SeekFrom::Start(body_start + skip))?;
            let body = read_prefix(reader, (member.size - skip).min(HEADER_READ_LEN))?;
            let abis = member_abis(&body);
            if !abis.is_empty() {
                return Ok(abis);
            }
        }

        offset = body_start + member.size + (member.size & 1);
    }
}

fn member_abis(body: &[u8]) -> Vec<Abi> {
    if body.starts_with(ELF_MAGIC) {
        return elf_abi(body).into_iter().collect();
    }
    if let Some(abis) = macho_abis(body) {
        return abis;
    }
    coff_object_abi(body).into_iter().collect()
}

use crate::models::{Abi, Os, OsFlavor};
use camino::Utf8Path;
use regex::Regex;
use std::fs::File;
use std::io::{self, Read};
use std::sync::LazyLock;

/// Read size for one scan step.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Bytes kept from the previous chunk so a banner split across two reads is still found.
pub const CARRY_OVER: usize = 4 * 1024;

/// Longest banner accepted, terminator excluded.
pub const MAX_BANNER_LEN: usize = 4096;

const BANNER_START: &[u8] = b"Qt ";
const BANNER_MARKER: &[u8] = b" build; by ";

static BANNER_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^Qt ([\d\.a-zA-Z]*) \(([\w_-]+) (shared|static) (?:\(dynamic\) )?(debug|release) build; by (.*)\)$",
    )
    .expect("Invalid build banner regex")
});

/// Fields of a build banner such as
/// `Qt 6.5.0 (x86_64-little_endian-lp64 shared (dynamic) release build; by GCC 11.2.0)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BuildBanner {
    pub version: String,
    pub arch: String,
    /// `little` or `big`, without the `_endian` suffix.
    pub endian: String,
    /// Data model, e.g. `lp64`, `llp64`, `ilp32`.
    pub pointer: String,
    /// Only set for non-default qreal builds (`float`).
    pub qreal: String,
    /// Remaining dash-separated ABI flags, joined with `-`.
    pub extra: String,
    pub linkage: String,
    pub build_type: String,
    pub compiler: String,
}

impl BuildBanner {
    /// Parse a banner with the fixed grammar. Returns `None` for anything else.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = BANNER_GRAMMAR.captures(text)?;

        let mut parts = caps[2].split('-');
        let arch = parts.next().unwrap_or_default().to_string();
        let endian = parts.next().unwrap_or_default();
        let endian = endian.strip_suffix("_endian").unwrap_or(endian).to_string();
        let pointer = parts.next().unwrap_or_default().to_string();

        let mut qreal = String::new();
        let mut extra = Vec::new();
        for part in parts {
            match part.strip_prefix("qreal_") {
                Some(kind) if qreal.is_empty() => qreal = kind.to_string(),
                _ => extra.push(part),
            }
        }

        Some(Self {
            version: caps[1].to_string(),
            arch,
            endian,
            pointer,
            qreal,
            extra: extra.join("-"),
            linkage: caps[3].to_string(),
            build_type: caps[4].to_string(),
            compiler: caps[5].to_string(),
        })
    }

    /// Compiler flavor implied by the banner for a Windows target, if any.
    pub fn windows_flavor(&self) -> Option<OsFlavor> {
        const MSVC_RELEASES: &[(&str, OsFlavor)] = &[
            ("MSVC 2005", OsFlavor::WindowsMsvc2005),
            ("MSVC 2008", OsFlavor::WindowsMsvc2008),
            ("MSVC 2010", OsFlavor::WindowsMsvc2010),
            ("MSVC 2012", OsFlavor::WindowsMsvc2012),
            ("MSVC 2015", OsFlavor::WindowsMsvc2015),
            ("MSVC 2017", OsFlavor::WindowsMsvc2017),
            ("MSVC 2019", OsFlavor::WindowsMsvc2019),
            ("MSVC 2022", OsFlavor::WindowsMsvc2022),
        ];

        if self.compiler.starts_with("GCC ") {
            return Some(OsFlavor::WindowsMSys);
        }
        MSVC_RELEASES
            .iter()
            .find(|(prefix, _)| self.compiler.starts_with(prefix))
            .map(|(_, flavor)| *flavor)
    }

    /// Fill in the flavor of `abi` when the binary format alone could not tell it.
    pub fn refine(&self, abi: &mut Abi) {
        if abi.os != Os::Windows || abi.os_flavor != OsFlavor::Unknown {
            return;
        }
        if let Some(flavor) = self.windows_flavor() {
            abi.os_flavor = flavor;
        }
    }
}

/// Look for the first parsable banner in `buffer`.
fn find_in(buffer: &[u8]) -> Option<BuildBanner> {
    let mut offset = 0;
    while let Some(pos) = find_subslice(&buffer[offset..], BANNER_START) {
        let start = offset + pos;
        let window_end = (start + MAX_BANNER_LEN + 1).min(buffer.len());

        if let Some(len) = buffer[start..window_end].iter().position(|&b| b == 0) {
            let candidate = &buffer[start..start + len];
            if find_subslice(candidate, BANNER_MARKER).is_some() {
                if let Some(banner) = std::str::from_utf8(candidate).ok().and_then(BuildBanner::parse) {
                    return Some(banner);
                }
            }
        }
        offset = start + 1;
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Scan a reader for a build banner, chunk by chunk.
pub fn scan_reader<R: Read>(mut reader: R) -> io::Result<Option<BuildBanner>> {
    let mut buffer: Vec<u8> = Vec::with_capacity(CHUNK_SIZE + CARRY_OVER);
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        let read = read_full(&mut reader, &mut chunk)?;
        if read == 0 {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk[..read]);

        if let Some(banner) = find_in(&buffer) {
            return Ok(Some(banner));
        }

        let keep = buffer.len().min(CARRY_OVER);
        buffer.drain(..buffer.len() - keep);
    }
}

/// Fill `chunk` as far as the reader allows.
fn read_full<R: Read>(reader: &mut R, chunk: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < chunk.len() {
        match reader.read(&mut chunk[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

pub fn scan_file(path: &Utf8Path) -> io::Result<Option<BuildBanner>> {
    let file = File::open(path)?;
    scan_reader(io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Architecture, BinaryFormat};
    use std::io::Cursor;

    const GCC_BANNER: &str =
        "Qt 5.7.1 (x86_64-little_endian-lp64 shared (dynamic) release build; by GCC 6.2.1 20160830)";

    fn windows_unknown() -> Abi {
        Abi::new(Architecture::X86, Os::Windows, OsFlavor::Unknown, BinaryFormat::Pe, 64)
    }

    #[test]
    fn test_parse_gcc_banner() {
        let banner = BuildBanner::parse(GCC_BANNER).unwrap();
        assert_eq!(banner.version, "5.7.1");
        assert_eq!(banner.arch, "x86_64");
        assert_eq!(banner.endian, "little");
        assert_eq!(banner.pointer, "lp64");
        assert_eq!(banner.qreal, "");
        assert_eq!(banner.extra, "");
        assert_eq!(banner.linkage, "shared");
        assert_eq!(banner.build_type, "release");
        assert_eq!(banner.compiler, "GCC 6.2.1 20160830");

        let mut abi = windows_unknown();
        banner.refine(&mut abi);
        assert_eq!(abi.os_flavor, OsFlavor::WindowsMSys);
    }

    #[test]
    fn test_parse_qreal_and_extra_flags() {
        let banner = BuildBanner::parse(
            "Qt 5.15.2 (arm-little_endian-ilp32-qreal_float-eabi-hardfloat static debug build; by GCC 8.3.0)",
        )
        .unwrap();
        assert_eq!(banner.qreal, "float");
        assert_eq!(banner.extra, "eabi-hardfloat");
        assert_eq!(banner.linkage, "static");
        assert_eq!(banner.build_type, "debug");
    }

    #[test]
    fn test_msvc_refinement() {
        let banner = BuildBanner::parse(
            "Qt 6.5.0 (x86_64-little_endian-llp64 shared (dynamic) release build; by MSVC 2019)",
        )
        .unwrap();
        let mut abi = windows_unknown();
        banner.refine(&mut abi);
        assert_eq!(abi.os_flavor, OsFlavor::WindowsMsvc2019);
    }

    #[test]
    fn test_refine_leaves_resolved_flavor_alone() {
        let banner = BuildBanner::parse(GCC_BANNER).unwrap();
        let mut abi = windows_unknown();
        abi.os_flavor = OsFlavor::WindowsMsvc2022;
        banner.refine(&mut abi);
        assert_eq!(abi.os_flavor, OsFlavor::WindowsMsvc2022);

        let mut linux = Abi::new(Architecture::X86, Os::Linux, OsFlavor::Unknown, BinaryFormat::Elf, 64);
        banner.refine(&mut linux);
        assert_eq!(linux.os_flavor, OsFlavor::Unknown);
    }

    #[test]
    fn test_non_banner_text_rejected() {
        assert!(BuildBanner::parse("Qt is great").is_none());
        assert!(BuildBanner::parse("Qt 6.5.0 (x86_64 shared release build; by GCC 11").is_none());
    }

    #[test]
    fn test_scan_finds_embedded_banner() {
        let mut data = vec![0xAAu8; 5000];
        data.extend_from_slice(b"Qt \0Qt version\0");
        data.extend_from_slice(GCC_BANNER.as_bytes());
        data.push(0);
        data.extend_from_slice(&[0x55u8; 100]);

        let banner = scan_reader(Cursor::new(data)).unwrap().unwrap();
        assert_eq!(banner.compiler, "GCC 6.2.1 20160830");
    }

    #[test]
    fn test_scan_across_chunk_boundary() {
        let mut data = vec![0u8; CHUNK_SIZE - 20];
        data.extend_from_slice(GCC_BANNER.as_bytes());
        data.push(0);

        let banner = scan_reader(Cursor::new(data)).unwrap();
        assert_eq!(banner.map(|b| b.version), Some("5.7.1".to_string()));
    }

    #[test]
    fn test_scan_without_banner() {
        let data = b"Qt 6 build; by nobody".to_vec();
        assert!(scan_reader(Cursor::new(data)).unwrap().is_none());
    }

    #[test]
    fn test_overlong_candidate_ignored() {
        let mut data = b"Qt 1.0 (".to_vec();
        data.extend(std::iter::repeat_n(b'x', MAX_BANNER_LEN + 10));
        data.extend_from_slice(b" shared release build; by GCC)\0");
        assert!(scan_reader(Cursor::new(data)).unwrap().is_none());
    }
}

//! Binary ABI description used to match Qt installations against toolchains.
//!
//! An [`Abi`] is the tuple (architecture, OS, OS flavor, binary format, word width).
//! Its canonical string form is `arch-os-flavor-format-NNbit`, e.g.
//! `x86-linux-generic-elf-64bit`, which is also how ABIs are persisted.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Architecture {
    Arm,
    X86,
    Itanium,
    Mips,
    PowerPc,
    Sh,
    Avr,
    Xtensa,
    Asmjs,
    RiscV,
    LoongArch,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Os {
    Bsd,
    Linux,
    Darwin,
    Unix,
    Windows,
    Vx,
    Qnx,
    BareMetal,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OsFlavor {
    FreeBsd,
    NetBsd,
    OpenBsd,
    Android,
    Solaris,
    WindowsMsvc2005,
    WindowsMsvc2008,
    WindowsMsvc2010,
    WindowsMsvc2012,
    WindowsMsvc2013,
    WindowsMsvc2015,
    WindowsMsvc2017,
    WindowsMsvc2019,
    WindowsMsvc2022,
    WindowsMSys,
    Generic,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BinaryFormat {
    Elf,
    MachO,
    Pe,
    Emscripten,
    Unknown,
}

const ARCHITECTURE_NAMES: &[(Architecture, &str)] = &[
    (Architecture::Arm, "arm"),
    (Architecture::X86, "x86"),
    (Architecture::Itanium, "itanium"),
    (Architecture::Mips, "mips"),
    (Architecture::PowerPc, "ppc"),
    (Architecture::Sh, "sh"),
    (Architecture::Avr, "avr"),
    (Architecture::Xtensa, "xtensa"),
    (Architecture::Asmjs, "asmjs"),
    (Architecture::RiscV, "riscv"),
    (Architecture::LoongArch, "loongarch"),
    (Architecture::Unknown, "unknown"),
];

const OS_NAMES: &[(Os, &str)] = &[
    (Os::Bsd, "bsd"),
    (Os::Linux, "linux"),
    (Os::Darwin, "darwin"),
    (Os::Unix, "unix"),
    (Os::Windows, "windows"),
    (Os::Vx, "vxworks"),
    (Os::Qnx, "qnx"),
    (Os::BareMetal, "baremetal"),
    (Os::Unknown, "unknown"),
];

const FLAVOR_NAMES: &[(OsFlavor, &str)] = &[
    (OsFlavor::FreeBsd, "freebsd"),
    (OsFlavor::NetBsd, "netbsd"),
    (OsFlavor::OpenBsd, "openbsd"),
    (OsFlavor::Android, "android"),
    (OsFlavor::Solaris, "solaris"),
    (OsFlavor::WindowsMsvc2005, "msvc2005"),
    (OsFlavor::WindowsMsvc2008, "msvc2008"),
    (OsFlavor::WindowsMsvc2010, "msvc2010"),
    (OsFlavor::WindowsMsvc2012, "msvc2012"),
    (OsFlavor::WindowsMsvc2013, "msvc2013"),
    (OsFlavor::WindowsMsvc2015, "msvc2015"),
    (OsFlavor::WindowsMsvc2017, "msvc2017"),
    (OsFlavor::WindowsMsvc2019, "msvc2019"),
    (OsFlavor::WindowsMsvc2022, "msvc2022"),
    (OsFlavor::WindowsMSys, "msys"),
    (OsFlavor::Generic, "generic"),
    (OsFlavor::Unknown, "unknown"),
];

const FORMAT_NAMES: &[(BinaryFormat, &str)] = &[
    (BinaryFormat::Elf, "elf"),
    (BinaryFormat::MachO, "mach_o"),
    (BinaryFormat::Pe, "pe"),
    (BinaryFormat::Emscripten, "emscripten"),
    (BinaryFormat::Unknown, "unknown"),
];

fn name_of<T: PartialEq + Copy>(table: &[(T, &'static str)], value: T) -> &'static str {
    table
        .iter()
        .find(|(v, _)| *v == value)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}

fn value_of<T: Copy>(table: &[(T, &'static str)], name: &str) -> Option<T> {
    table.iter().find(|(_, n)| *n == name).map(|(v, _)| *v)
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(name_of(ARCHITECTURE_NAMES, *self))
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(name_of(OS_NAMES, *self))
    }
}

impl fmt::Display for OsFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(name_of(FLAVOR_NAMES, *self))
    }
}

impl fmt::Display for BinaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(name_of(FORMAT_NAMES, *self))
    }
}

impl OsFlavor {
    pub fn is_msvc(self) -> bool {
        matches!(
            self,
            OsFlavor::WindowsMsvc2005
                | OsFlavor::WindowsMsvc2008
                | OsFlavor::WindowsMsvc2010
                | OsFlavor::WindowsMsvc2012
                | OsFlavor::WindowsMsvc2013
                | OsFlavor::WindowsMsvc2015
                | OsFlavor::WindowsMsvc2017
                | OsFlavor::WindowsMsvc2019
                | OsFlavor::WindowsMsvc2022
        )
    }

    /// MSVC 2015 and later share one binary-compatible runtime.
    fn is_ucrt_msvc(self) -> bool {
        matches!(
            self,
            OsFlavor::WindowsMsvc2015
                | OsFlavor::WindowsMsvc2017
                | OsFlavor::WindowsMsvc2019
                | OsFlavor::WindowsMsvc2022
        )
    }

    /// Map an MSVC compiler version (`major`, `minor` as reported by `cl.exe`,
    /// e.g. 19.29) to the Visual Studio release flavor.
    pub fn from_msvc_compiler_version(major: u32, minor: u32) -> OsFlavor {
        match major {
            19 if minor >= 30 => OsFlavor::WindowsMsvc2022,
            19 if minor >= 20 => OsFlavor::WindowsMsvc2019,
            19 if minor >= 10 => OsFlavor::WindowsMsvc2017,
            19 => OsFlavor::WindowsMsvc2015,
            18 => OsFlavor::WindowsMsvc2013,
            17 => OsFlavor::WindowsMsvc2012,
            16 => OsFlavor::WindowsMsvc2010,
            15 => OsFlavor::WindowsMsvc2008,
            14 => OsFlavor::WindowsMsvc2005,
            _ => OsFlavor::Unknown,
        }
    }
}

impl Os {
    /// Default binary format used by executables on this OS.
    pub fn default_binary_format(self) -> BinaryFormat {
        match self {
            Os::Linux | Os::Bsd | Os::Unix | Os::Qnx | Os::Vx | Os::BareMetal => BinaryFormat::Elf,
            Os::Darwin => BinaryFormat::MachO,
            Os::Windows => BinaryFormat::Pe,
            Os::Unknown => BinaryFormat::Unknown,
        }
    }
}

/// Target binary compatibility class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Abi {
    pub architecture: Architecture,
    pub os: Os,
    pub os_flavor: OsFlavor,
    pub binary_format: BinaryFormat,
    /// Pointer width in bits; 0 when unknown.
    pub word_width: u8,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbiParseError {
    #[error("ABI string '{0}' does not have five dash-separated fields")]
    WrongFieldCount(String),

    #[error("Unknown ABI field '{field}' in '{input}'")]
    UnknownField { field: String, input: String },
}

impl Abi {
    pub const fn new(
        architecture: Architecture,
        os: Os,
        os_flavor: OsFlavor,
        binary_format: BinaryFormat,
        word_width: u8,
    ) -> Self {
        Self {
            architecture,
            os,
            os_flavor,
            binary_format,
            word_width,
        }
    }

    pub const fn unknown() -> Self {
        Self::new(
            Architecture::Unknown,
            Os::Unknown,
            OsFlavor::Unknown,
            BinaryFormat::Unknown,
            0,
        )
    }

    pub fn is_valid(&self) -> bool {
        self.architecture != Architecture::Unknown
            && self.os != Os::Unknown
            && self.binary_format != BinaryFormat::Unknown
            && self.word_width != 0
    }

    /// Whether binaries built for `other` can be used together with binaries of `self`.
    ///
    /// Unknown fields on `other` act as wildcards. Generic Linux matches any Linux
    /// flavor, Android only matches Android on the same architecture, and all
    /// MSVC releases from 2015 on are interchangeable.
    pub fn is_compatible_with(&self, other: &Abi) -> bool {
        let arch_matches = self.architecture == other.architecture
            || other.architecture == Architecture::Unknown;
        let format_matches = self.binary_format == other.binary_format
            || other.binary_format == BinaryFormat::Unknown;
        let width_matches = (self.word_width == other.word_width && self.word_width != 0)
            || other.word_width == 0;

        let mut compatible = arch_matches
            && (self.os == other.os || other.os == Os::Unknown)
            && (self.os_flavor == other.os_flavor || other.os_flavor == OsFlavor::Unknown)
            && format_matches
            && width_matches;

        if !compatible
            && arch_matches
            && self.os == other.os
            && self.os == Os::Linux
            && (self.os_flavor == OsFlavor::Generic || other.os_flavor == OsFlavor::Generic)
            && format_matches
            && width_matches
        {
            compatible = true;
        }

        if compatible
            && (self.os_flavor == OsFlavor::Android || other.os_flavor == OsFlavor::Android)
        {
            compatible = self.architecture == other.architecture
                && self.os_flavor == other.os_flavor;
        }

        if !compatible
            && self.os_flavor.is_ucrt_msvc()
            && other.os_flavor.is_ucrt_msvc()
            && self.architecture == other.architecture
            && self.word_width == other.word_width
        {
            compatible = true;
        }

        compatible
    }
}

impl Default for Abi {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}bit",
            self.architecture, self.os, self.os_flavor, self.binary_format, self.word_width
        )
    }
}

impl FromStr for Abi {
    type Err = AbiParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split('-').collect();
        if fields.len() != 5 {
            return Err(AbiParseError::WrongFieldCount(s.to_string()));
        }

        let unknown = |field: &str| AbiParseError::UnknownField {
            field: field.to_string(),
            input: s.to_string(),
        };

        let architecture = value_of(ARCHITECTURE_NAMES, fields[0]).ok_or_else(|| unknown(fields[0]))?;
        let os = value_of(OS_NAMES, fields[1]).ok_or_else(|| unknown(fields[1]))?;
        let os_flavor = value_of(FLAVOR_NAMES, fields[2]).ok_or_else(|| unknown(fields[2]))?;
        let binary_format = value_of(FORMAT_NAMES, fields[3]).ok_or_else(|| unknown(fields[3]))?;
        let word_width = fields[4]
            .strip_suffix("bit")
            .and_then(|w| w.parse::<u8>().ok())
            .ok_or_else(|| unknown(fields[4]))?;

        Ok(Abi::new(architecture, os, os_flavor, binary_format, word_width))
    }
}

impl Serialize for Abi {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Abi {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Push `abi` unless an equal entry is already present.
pub fn push_unique(abis: &mut Vec<Abi>, abi: Abi) {
    if !abis.contains(&abi) {
        abis.push(abi);
    }
}

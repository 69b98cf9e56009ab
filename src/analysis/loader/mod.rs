//! Binary Loader Module
//!
//! Parses PE/ELF/Mach-O executables using goblin and extracts what the
//! `i*` commands and the `@@@` iterators walk over:
//! - Entry point, architecture and word size
//! - Sections
//! - Symbols and imports
//! - Printable strings

use anyhow::{anyhow, Result};
use std::fs;
use std::path::Path;

/// Information about a section in the binary
#[derive(Debug, Clone)]
pub struct SectionInfo {
    pub name: String,
    pub virtual_address: u64,
    pub virtual_size: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub is_executable: bool,
    pub is_readable: bool,
    pub is_writable: bool,
}

/// A named address exported or defined by the binary
#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

/// An imported function, addressed through its import slot when known
#[derive(Debug, Clone)]
pub struct ImportInfo {
    pub name: String,
    pub address: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StringInfo {
    pub text: String,
    pub address: u64,
    pub size: u64,
}

/// Parsed binary information
#[derive(Debug, Default)]
pub struct BinInfo {
    pub path: String,
    pub data: Vec<u8>,
    /// Architecture name as used by `asm.arch`
    pub arch: String,
    pub bits: u32,
    pub entry_point: u64,
    pub image_base: u64,
    pub sections: Vec<SectionInfo>,
    pub symbols: Vec<SymbolInfo>,
    pub imports: Vec<ImportInfo>,
    pub strings: Vec<StringInfo>,
    /// Binary format (PE, ELF, Mach-O)
    pub format: String,
}

/// Shortest run of printable bytes reported as a string
pub const MIN_STRING_LEN: usize = 4;

impl BinInfo {
    /// Load and parse a binary file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let data = fs::read(&path)?;
        Self::from_bytes(data, path_str)
    }

    /// Parse binary from bytes
    pub fn from_bytes(data: Vec<u8>, path: String) -> Result<Self> {
        if data.len() < 4 {
            return Err(anyhow!("File too small"));
        }

        let mut info = if data[0..2] == [0x4D, 0x5A] {
            Self::parse_pe(data, path)?
        } else if data[0..4] == [0x7F, b'E', b'L', b'F'] {
            Self::parse_elf(data, path)?
        } else {
            let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            if matches!(magic, 0xFEEDFACE | 0xFEEDFACF | 0xCEFAEDFE | 0xCFFAEDFE) {
                Self::parse_macho(data, path)?
            } else {
                return Err(anyhow!("Unknown binary format"));
            }
        };
        info.strings = info.scan_strings();
        log::info!(
            "Loaded {} {} ({} sections, {} symbols, {} imports)",
            info.format,
            info.path,
            info.sections.len(),
            info.symbols.len(),
            info.imports.len()
        );
        Ok(info)
    }

    /// Parse PE (Windows executable)
    fn parse_pe(data: Vec<u8>, path: String) -> Result<Self> {
        let pe = goblin::pe::PE::parse(&data)?;
        let image_base = pe.image_base as u64;

        let sections = pe
            .sections
            .iter()
            .map(|section| {
                let characteristics = section.characteristics;
                SectionInfo {
                    name: String::from_utf8_lossy(&section.name)
                        .trim_end_matches('\0')
                        .to_string(),
                    virtual_address: image_base + section.virtual_address as u64,
                    virtual_size: section.virtual_size as u64,
                    file_offset: section.pointer_to_raw_data as u64,
                    file_size: section.size_of_raw_data as u64,
                    is_executable: (characteristics & 0x20000000) != 0,
                    is_readable: (characteristics & 0x40000000) != 0,
                    is_writable: (characteristics & 0x80000000) != 0,
                }
            })
            .collect();

        let symbols = pe
            .exports
            .iter()
            .filter_map(|export| {
                export.name.map(|name| SymbolInfo {
                    name: name.to_string(),
                    address: image_base + export.rva as u64,
                    size: 0,
                })
            })
            .collect();

        let imports = pe
            .imports
            .iter()
            .map(|import| ImportInfo {
                name: import.name.to_string(),
                address: Some(image_base + import.rva as u64),
            })
            .collect();

        let bits = if pe.is_64 { 64 } else { 32 };
        let entry_point = image_base + pe.entry as u64;
        Ok(Self {
            path,
            arch: "x86".to_string(),
            bits,
            entry_point,
            image_base,
            sections,
            symbols,
            imports,
            format: "PE".to_string(),
            strings: Vec::new(),
            data,
        })
    }

    /// Parse ELF (Linux executable)
    fn parse_elf(data: Vec<u8>, path: String) -> Result<Self> {
        use goblin::elf::{header, program_header, section_header, sym};

        let elf = goblin::elf::Elf::parse(&data)?;
        let bits = if elf.is_64 { 64 } else { 32 };
        let arch = match elf.header.e_machine {
            header::EM_X86_64 | header::EM_386 => "x86",
            header::EM_ARM | header::EM_AARCH64 => "arm",
            header::EM_MIPS => "mips",
            header::EM_RISCV => "riscv",
            _ => "x86",
        };

        let image_base = elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == program_header::PT_LOAD)
            .map(|ph| ph.p_vaddr)
            .min()
            .unwrap_or(0);

        let sections = elf
            .section_headers
            .iter()
            .filter(|sh| sh.sh_addr != 0)
            .map(|sh| {
                let flags = sh.sh_flags;
                SectionInfo {
                    name: elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string(),
                    virtual_address: sh.sh_addr,
                    virtual_size: sh.sh_size,
                    file_offset: sh.sh_offset,
                    file_size: if sh.sh_type == section_header::SHT_NOBITS {
                        0
                    } else {
                        sh.sh_size
                    },
                    is_executable: (flags & section_header::SHF_EXECINSTR as u64) != 0,
                    is_readable: (flags & section_header::SHF_ALLOC as u64) != 0,
                    is_writable: (flags & section_header::SHF_WRITE as u64) != 0,
                }
            })
            .collect();

        let mut symbols: Vec<SymbolInfo> = Vec::new();
        let tables = [(&elf.syms, &elf.strtab), (&elf.dynsyms, &elf.dynstrtab)];
        for (syms, strtab) in tables {
            for s in syms.iter() {
                let kind = s.st_type();
                if s.st_value == 0 || !(kind == sym::STT_FUNC || kind == sym::STT_OBJECT) {
                    continue;
                }
                let name = strtab.get_at(s.st_name).unwrap_or("");
                if name.is_empty() || symbols.iter().any(|x| x.name == name) {
                    continue;
                }
                symbols.push(SymbolInfo {
                    name: name.to_string(),
                    address: s.st_value,
                    size: s.st_size,
                });
            }
        }

        let mut imports: Vec<ImportInfo> = Vec::new();
        for reloc in elf.pltrelocs.iter() {
            let name = elf
                .dynsyms
                .get(reloc.r_sym)
                .and_then(|s| elf.dynstrtab.get_at(s.st_name))
                .unwrap_or("");
            if !name.is_empty() {
                imports.push(ImportInfo {
                    name: name.to_string(),
                    address: Some(reloc.r_offset),
                });
            }
        }
        for s in elf.dynsyms.iter() {
            if s.st_shndx != section_header::SHN_UNDEF as usize || s.st_type() != sym::STT_FUNC {
                continue;
            }
            let name = elf.dynstrtab.get_at(s.st_name).unwrap_or("");
            if !name.is_empty() && !imports.iter().any(|i| i.name == name) {
                imports.push(ImportInfo {
                    name: name.to_string(),
                    address: None,
                });
            }
        }

        Ok(Self {
            path,
            arch: arch.to_string(),
            bits,
            entry_point: elf.entry,
            image_base,
            sections,
            symbols,
            imports,
            format: "ELF".to_string(),
            strings: Vec::new(),
            data,
        })
    }

    /// Parse Mach-O (macOS executable)
    fn parse_macho(data: Vec<u8>, path: String) -> Result<Self> {
        let mach = goblin::mach::Mach::parse(&data)?;
        let macho = match mach {
            goblin::mach::Mach::Binary(macho) => macho,
            goblin::mach::Mach::Fat(_) => {
                return Err(anyhow!("Fat Mach-O binaries not yet supported"))
            }
        };

        let sections = macho
            .segments
            .iter()
            .map(|segment| SectionInfo {
                name: segment.name().unwrap_or("").to_string(),
                virtual_address: segment.vmaddr,
                virtual_size: segment.vmsize,
                file_offset: segment.fileoff,
                file_size: segment.filesize,
                is_executable: (segment.initprot & 0x4) != 0,
                is_readable: (segment.initprot & 0x1) != 0,
                is_writable: (segment.initprot & 0x2) != 0,
            })
            .collect();

        let symbols = macho
            .exports()
            .map(|exports| {
                exports
                    .into_iter()
                    .map(|export| SymbolInfo {
                        name: export.name,
                        address: export.offset,
                        size: export.size as u64,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let imports = macho
            .imports()
            .map(|imports| {
                imports
                    .into_iter()
                    .map(|import| ImportInfo {
                        name: import.name.to_string(),
                        address: Some(import.address),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            path,
            arch: "x86".to_string(),
            bits: if macho.is_64 { 64 } else { 32 },
            entry_point: macho.entry,
            image_base: 0,
            sections,
            symbols,
            imports,
            format: "Mach-O".to_string(),
            strings: Vec::new(),
            data,
        })
    }

    /// Translate a file offset to its virtual address
    pub fn paddr_to_vaddr(&self, paddr: u64) -> u64 {
        self.sections
            .iter()
            .find(|s| paddr >= s.file_offset && paddr < s.file_offset + s.file_size)
            .map(|s| s.virtual_address + (paddr - s.file_offset))
            .unwrap_or(paddr)
    }

    /// Strings of the loaded data sections, or of the whole file when
    /// there are none
    fn scan_strings(&self) -> Vec<StringInfo> {
        let len = self.data.len() as u64;
        let ranges: Vec<(usize, usize)> = self
            .sections
            .iter()
            .filter(|s| s.is_readable && !s.is_executable && s.virtual_address != 0)
            .filter(|s| s.file_size > 0 && s.file_offset < len)
            .map(|s| {
                let end = s.file_offset.saturating_add(s.file_size).min(len);
                (s.file_offset as usize, end as usize)
            })
            .collect();
        let ranges = if ranges.is_empty() {
            vec![(0, self.data.len())]
        } else {
            ranges
        };

        let mut strings = Vec::new();
        for (from, to) in ranges {
            let mut start = None;
            for i in from..=to {
                let printable = i < to && (self.data[i] == b' ' || self.data[i].is_ascii_graphic());
                match (printable, start) {
                    (true, None) => start = Some(i),
                    (false, Some(s)) => {
                        if i - s >= MIN_STRING_LEN {
                            strings.push(StringInfo {
                                text: String::from_utf8_lossy(&self.data[s..i]).to_string(),
                                address: self.paddr_to_vaddr(s as u64),
                                size: (i - s) as u64,
                            });
                        }
                        start = None;
                    }
                    _ => {}
                }
            }
        }
        strings
    }

    /// Get executable sections only
    pub fn executable_sections(&self) -> Vec<&SectionInfo> {
        self.sections.iter().filter(|s| s.is_executable).collect()
    }

    /// Get summary string
    pub fn summary(&self) -> String {
        format!(
            "{}-bit {} binary\n\
             Entry: 0x{:x}\n\
             Image Base: 0x{:x}\n\
             Sections: {}\n\
             Symbols: {}",
            self.bits,
            self.format,
            self.entry_point,
            self.image_base,
            self.sections.len(),
            self.symbols.len()
        )
    }
}

/// Flag-safe form of a name: anything outside `[A-Za-z0-9_.]` becomes `_`
pub fn flag_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_self() {
        // Parse the test executable itself
        let exe_path = std::env::current_exe().unwrap();
        let result = BinInfo::from_file(&exe_path);

        if let Ok(binary) = result {
            println!("{}", binary.summary());
            assert!(binary.entry_point != 0);
            assert!(!binary.sections.is_empty());
            assert!(!binary.strings.is_empty());
        } else {
            println!("Could not parse self: {:?}", result);
        }
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(BinInfo::from_bytes(b"hello world".to_vec(), "raw".into()).is_err());
    }

    #[test]
    fn test_flag_name() {
        assert_eq!(flag_name("hello world!"), "hello_world_");
    }
}

//! Files and binary info: `o`, `oC`, `is`, `ii`, `iS`, `iz`

use super::{desc, num_arg};
use crate::analysis::loader::flag_name;
use crate::analysis::BinInfo;
use crate::cmd::registry::Registry;
use crate::cmd::{args, CmdError, CmdResult};
use crate::core::{Core, MemoryProtection};

pub fn register(registry: &mut Registry) {
    registry.add(
        desc("o", "[file [addr]]", "list descriptors or open a file")
            .detail("executables are mapped by section and flagged"),
        cmd_open,
    );
    registry.add(desc("o-", "fd", "close a descriptor"), cmd_close);
    registry.add(
        desc("oC", "len", "copy len bytes at the offset into a new buffer mapped there"),
        cmd_open_copy,
    );
    registry.add(desc("is", "", "symbols"), cmd_symbols);
    registry.add(desc("ii", "", "imports"), cmd_imports);
    registry.add(desc("iS", "", "sections"), cmd_sections);
    registry.add(desc("iz", "", "strings"), cmd_strings);
}

fn cmd_open(core: &mut Core, input: &str) -> CmdResult {
    let words = args::split(input);
    let Some(path) = words.first() else {
        let current = core.io.current_fd();
        let lines: Vec<String> = core
            .io
            .descs()
            .map(|d| {
                let mark = if Some(d.fd) == current { '*' } else { '-' };
                format!("{} {} {} {} {:#x}", mark, d.fd, d.protection.as_str(), d.uri, d.data.len())
            })
            .collect();
        for line in lines {
            core.cons.println(&line);
        }
        return Ok(0);
    };
    let at = match words.get(1) {
        Some(w) => core.num(w)?,
        None => 0,
    };
    let data = std::fs::read(path)
        .map_err(|e| CmdError::Resource(format!("Cannot open '{}': {}", path, e)))?;
    match BinInfo::from_bytes(data.clone(), path.clone()) {
        Ok(info) => load_binary(core, info),
        Err(e) => {
            log::info!("{}: {}, mapping raw bytes", path, e);
            let fd = core.io.open(path, data, at, MemoryProtection::R);
            core.cons.println(&format!("{}", fd));
            core.seek(at);
        }
    }
    Ok(0)
}

/// Map an executable by section and create its flags
fn load_binary(core: &mut Core, info: BinInfo) {
    let fd = core
        .io
        .open_unmapped(&info.path, info.data.clone(), MemoryProtection::RX);
    let mut mapped = false;
    for section in info
        .sections
        .iter()
        .filter(|s| s.file_size > 0 && s.virtual_address != 0)
    {
        mapped |= core
            .io
            .map(fd, section.virtual_address, section.file_size, section.file_offset)
            .is_ok();
    }
    if !mapped {
        let _ = core.io.map(fd, info.image_base, info.data.len() as u64, 0);
    }

    core.flags.space_push("symbols");
    core.flags.set("entry0", info.entry_point, 1);
    for sym in &info.symbols {
        core.flags.set(&format!("sym.{}", flag_name(&sym.name)), sym.address, sym.size.max(1));
    }
    for import in &info.imports {
        if let Some(addr) = import.address {
            core.flags.set(&format!("sym.imp.{}", flag_name(&import.name)), addr, 1);
        }
    }
    core.flags.space_set("sections");
    for section in &info.sections {
        core.flags.set(
            &format!("section.{}", flag_name(&section.name)),
            section.virtual_address,
            section.virtual_size,
        );
    }
    core.flags.space_set("strings");
    for string in &info.strings {
        let name: String = flag_name(&string.text).chars().take(24).collect();
        core.flags.set(&format!("str.{}", name), string.address, string.size);
    }
    core.flags.space_pop();

    let _ = core.config.set("asm.arch", &info.arch);
    let _ = core.config.set_i("asm.bits", info.bits as u64);
    core.cons.println(&format!("{}", fd));
    core.seek(info.entry_point);
    log::info!("opened {} as fd {}", info.path, fd);
    core.bin = Some(info);
}

fn cmd_close(core: &mut Core, input: &str) -> CmdResult {
    let fd = num_arg(core, input)?
        .or_else(|| core.io.current_fd().map(u64::from))
        .ok_or_else(|| CmdError::Invalid("no descriptor to close".into()))?;
    let fd = u32::try_from(fd).map_err(|_| CmdError::Invalid(format!("bad fd {}", fd)))?;
    core.io.close(fd)?;
    Ok(0)
}

fn cmd_open_copy(core: &mut Core, input: &str) -> CmdResult {
    let len = num_arg(core, input)?.unwrap_or(core.blocksize);
    let data = core.io.read_at(core.offset, len as usize);
    let fd = core
        .io
        .open(&format!("malloc://{}", len), data, core.offset, MemoryProtection::RW);
    core.cons.println(&format!("{}", fd));
    Ok(0)
}

fn loaded(core: &Core) -> Result<&BinInfo, CmdError> {
    core.bin
        .as_ref()
        .ok_or_else(|| CmdError::Handler("No binary loaded".into()))
}

fn print_lines(core: &mut Core, lines: Vec<String>) -> CmdResult {
    for line in lines {
        core.cons.println(&line);
    }
    Ok(0)
}

fn cmd_symbols(core: &mut Core, _input: &str) -> CmdResult {
    let lines = loaded(core)?
        .symbols
        .iter()
        .map(|s| format!("{:#x} {} {}", s.address, s.size, s.name))
        .collect();
    print_lines(core, lines)
}

fn cmd_imports(core: &mut Core, _input: &str) -> CmdResult {
    let lines = loaded(core)?
        .imports
        .iter()
        .map(|i| match i.address {
            Some(addr) => format!("{:#x} {}", addr, i.name),
            None => format!("---------- {}", i.name),
        })
        .collect();
    print_lines(core, lines)
}

fn cmd_sections(core: &mut Core, _input: &str) -> CmdResult {
    let lines = loaded(core)?
        .sections
        .iter()
        .map(|s| {
            let perms = format!(
                "{}{}{}",
                if s.is_readable { 'r' } else { '-' },
                if s.is_writable { 'w' } else { '-' },
                if s.is_executable { 'x' } else { '-' }
            );
            format!("{:#x} {:#x} {} {}", s.virtual_address, s.virtual_size, perms, s.name)
        })
        .collect();
    print_lines(core, lines)
}

fn cmd_strings(core: &mut Core, _input: &str) -> CmdResult {
    let lines = loaded(core)?
        .strings
        .iter()
        .map(|s| format!("{:#x} {} {}", s.address, s.size, s.text))
        .collect();
    print_lines(core, lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_raw_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"raw bytes here").unwrap();
        let mut core = Core::default();
        let path = file.path().display().to_string();
        assert_eq!(core.cmd(&format!("o {} 0x2000", path)), 0);
        assert_eq!(core.offset, 0x2000);
        assert_eq!(core.io.read_at(0x2000, 3), b"raw".to_vec());
        assert!(core.cmd("is") < 0);
    }

    #[test]
    fn test_copy_block() {
        let mut core = Core::default();
        core.io.open("malloc://4", vec![1, 2, 3, 4], 0x10, MemoryProtection::R);
        core.seek(0x11);
        core.cmd("oC 2");
        core.io.write_at(0x11, &[9]).unwrap();
        assert_eq!(core.io.read_at(0x10, 4), vec![1, 9, 3, 4]);
    }
}

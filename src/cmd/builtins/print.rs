//! Printing and searching: `px`, `p8`, `/`

use super::{desc, num_arg};
use crate::cmd::registry::Registry;
use crate::cmd::{args, CmdError, CmdResult};
use crate::core::Core;

const ROW: usize = 16;

pub fn register(registry: &mut Registry) {
    registry.add(desc("px", "[len]", "hexdump of the current block"), cmd_hexdump);
    registry.add(desc("p8", "[len]", "bytes as a hex string"), cmd_hexpairs);
    registry.add(
        desc("/", "text", "search for a string in mapped memory")
            .detail("/x hexpairs searches bytes")
            .detail("hits become search.prefix flags and run cmd.hit"),
        cmd_search,
    );
}

fn read_len(core: &mut Core, input: &str) -> Result<usize, CmdError> {
    let len = num_arg(core, input)?.unwrap_or(core.blocksize);
    usize::try_from(len).map_err(|_| CmdError::Invalid(format!("length {:#x} too large", len)))
}

fn cmd_hexdump(core: &mut Core, input: &str) -> CmdResult {
    let len = read_len(core, input)?;
    let bytes = core.io.read_at(core.offset, len);
    let mut out = String::new();
    for (i, row) in bytes.chunks(ROW).enumerate() {
        let addr = core.offset.wrapping_add((i * ROW) as u64);
        let pairs: Vec<String> = row.chunks(2).map(hex::encode).collect();
        let ascii: String = row
            .iter()
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
            .collect();
        out.push_str(&format!("{:#010x}  {:<40} {}\n", addr, pairs.join(" "), ascii));
    }
    core.cons.print(&out);
    Ok(0)
}

fn cmd_hexpairs(core: &mut Core, input: &str) -> CmdResult {
    let len = read_len(core, input)?;
    let bytes = core.io.read_at(core.offset, len);
    core.cons.println(&hex::encode(bytes));
    Ok(0)
}

fn cmd_search(core: &mut Core, input: &str) -> CmdResult {
    let needle = match input.strip_prefix('x') {
        Some(pairs) => {
            let pairs: String = pairs.chars().filter(|c| !c.is_whitespace()).collect();
            hex::decode(&pairs).map_err(|e| CmdError::Invalid(format!("bad hex '{}': {}", pairs, e)))?
        }
        None => args::unquote(input).into_bytes(),
    };
    if needle.is_empty() {
        return Err(CmdError::Invalid("nothing to search for".into()));
    }

    let prefix = core.config.get("search.prefix").unwrap_or("hit").to_string();
    let on_hit = core.config.get("cmd.hit").unwrap_or("").to_string();
    let (from, to) = (
        core.config.get_i("search.from"),
        core.config.get_i("search.to"),
    );
    let mut hits = Vec::new();
    for map in core.io.maps().to_vec() {
        let data = core.io.read_at(map.from, map.size as usize);
        for pos in find_all(&data, &needle) {
            let addr = map.from + pos as u64;
            if to > from && !(from..to).contains(&addr) {
                continue;
            }
            if !hits.contains(&addr) {
                hits.push(addr);
            }
        }
    }
    log::info!("search: {} hits for {} bytes", hits.len(), needle.len());

    for (n, addr) in hits.into_iter().enumerate() {
        if core.is_interrupted() {
            break;
        }
        let name = format!("{}0_{}", prefix, n);
        core.flags.set(&name, addr, needle.len() as u64);
        core.cons.println(&format!("{:#x} {}", addr, name));
        if !on_hit.is_empty() {
            let saved = core.offset;
            core.seek(addr);
            let result = core.run_nested(&on_hit);
            core.seek(saved);
            if let Err(e) = result {
                core.report(&e);
            }
        }
    }
    Ok(0)
}

fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    if needle.len() > haystack.len() {
        return Vec::new();
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, w)| *w == needle)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MemoryProtection;

    fn core_with(data: &[u8]) -> Core {
        let mut core = Core::default();
        core.io.open("malloc://test", data.to_vec(), 0x1000, MemoryProtection::RW);
        core
    }

    #[test]
    fn test_hexpairs() {
        let mut core = core_with(b"ABCD");
        core.seek(0x1002);
        core.cmd("p8 4");
        assert_eq!(core.cons.take_output(), "4344ffff\n");
    }

    #[test]
    fn test_hexdump_row() {
        let mut core = core_with(b"hello");
        core.seek(0x1000);
        core.cmd("px 5");
        let out = core.cons.take_output();
        assert!(out.starts_with("0x00001000  6865 6c6c 6f"));
        assert!(out.trim_end().ends_with("hello"));
    }

    #[test]
    fn test_search_sets_hit_flags() {
        let mut core = core_with(b"xxabxxab");
        core.cmd("/ ab");
        assert_eq!(core.flags.get("hit0_0").unwrap().offset, 0x1002);
        assert_eq!(core.flags.get("hit0_1").unwrap().offset, 0x1006);
        core.cmd("/x 7878");
        assert_eq!(core.flags.get("hit0_0").unwrap().offset, 0x1000);
    }
}

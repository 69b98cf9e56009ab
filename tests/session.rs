//! Scripts, nested interpretation and file loading

use std::io::Write;

use fission_cmd::{Core, CoreOptions, ParserKind};

fn core(parser: ParserKind) -> Core {
    Core::new(CoreOptions {
        parser,
        ..CoreOptions::default()
    })
}

#[test]
fn test_script_stops_at_first_failure() {
    for parser in [ParserKind::Legacy, ParserKind::Grammar] {
        let mut core = core(parser);
        let status = core.run_script("?e one\ns 0x30\nnope\n?e never").unwrap();
        assert_eq!(status, -1);
        assert_eq!(core.cons.take_output(), "one\n");
        assert_eq!(core.offset, 0x30);
        assert!(core.cons.take_errors().contains("Unknown command 'nope'"));
    }
}

#[test]
fn test_script_file_and_comments() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# setup").unwrap();
    writeln!(file, "f here 1 0x1234 # flag it").unwrap();
    writeln!(file, "s here").unwrap();
    for parser in [ParserKind::Legacy, ParserKind::Grammar] {
        let mut core = core(parser);
        assert_eq!(core.cmd(&format!(". {}", file.path().display())), 0);
        assert_eq!(core.offset, 0x1234);
    }
}

#[test]
fn test_depth_limit_is_reported() {
    let mut core = core(ParserKind::Legacy);
    core.cmd("$loop=.$loop");
    assert!(core.cmd("$loop") < 0);
    assert!(core.cons.take_errors().contains("That was too deep"));
}

#[test]
fn test_parser_switch_keeps_state() {
    let mut core = core(ParserKind::Legacy);
    core.cmd("f mark 1 0x77");
    core.set_parser(ParserKind::Grammar);
    core.cmd("?v $$ @ mark");
    assert_eq!(core.cons.take_output(), "0x77\n");
}

#[cfg(target_os = "linux")]
#[test]
fn test_open_executable() {
    let exe = std::env::current_exe().unwrap();
    let mut core = core(ParserKind::Legacy);
    assert_eq!(core.cmd(&format!("o {}", exe.display())), 0);

    let entry = core.flags.get("entry0").unwrap().offset;
    assert_eq!(core.offset, entry);
    assert_eq!(core.config.get_i("asm.bits"), 64);
    assert!(core.bin.is_some());

    core.cons.take_output();
    core.cmd("iS~.text");
    assert!(core.cons.take_output().contains(".text"));
}

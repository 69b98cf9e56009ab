//! Both front ends must agree on output, diagnostics and session state

use fission_cmd::{Core, CoreOptions, ParserKind};

#[derive(Debug, PartialEq)]
struct Outcome {
    status: i32,
    output: String,
    errors: String,
    offset: u64,
    blocksize: u64,
}

fn session(parser: ParserKind) -> Core {
    let mut core = Core::new(CoreOptions {
        parser,
        ..CoreOptions::default()
    });
    core.cmd("f sym.main 0x10 0x400");
    core.cmd("f sym.exit 0x8 0x480");
    core.cmd("f str.hello 6 0x500");
    core.cmd("s 0x100");
    core.cons.take_output();
    core
}

fn run(parser: ParserKind, lines: &[&str]) -> Outcome {
    let mut core = session(parser);
    let mut status = 0;
    for line in lines {
        status = core.cmd(line);
    }
    Outcome {
        status,
        output: core.cons.take_output(),
        errors: core.cons.take_errors(),
        offset: core.offset,
        blocksize: core.blocksize,
    }
}

fn assert_same(lines: &[&str]) {
    let legacy = run(ParserKind::Legacy, lines);
    let grammar = run(ParserKind::Grammar, lines);
    assert_eq!(legacy, grammar, "front ends disagree on {:?}", lines);
}

const CORPUS: &[&str] = &[
    "?e hello",
    "?e 'single quoted' \"double quoted\"",
    "?e a; ?e b; ?e c",
    "?e a;",
    "nope; ?e after",
    "?e one && ?e two",
    "nope && ?e never",
    "?v $$",
    "?v $$ @ 0x10",
    "?v $$ @ +0x10",
    "?v $$ @ sym.main",
    "?v $$ @@ sym.*",
    "?v $$ @@=1 2 3",
    "?v $$ @@s:0 0x30 0x10",
    "?v $$ @@@f:str.*",
    "s 0x20; ?v $$",
    "s 0x20 @ 0x40",
    "3 ?e x",
    "?e a; 2 ?e b; ?e c",
    "\"?e q\"; ?e r; \"?e s\"",
    "2 s+ 8",
    "\"?e a;b\"",
    "\"?v $$\" @ 0x44",
    "?e `?e hi`",
    "?e ``?e gone``",
    "?e $(?e paren)",
    "?v `?v 0x20` @ 4",
    "?e beta ~bet",
    "?e alpha ~beta",
    "?e hi # trailing comment",
    "# whole line comment",
    "p8 4 @x:41424344",
    "p8 2 @s:hi",
    "?e a > $cap; $cap",
    "?e s 0x50 |.",
    "s?*",
    "?e \\; literal",
    "?v $$ @@@zz",
    "?v $$ @?",
];

#[test]
fn test_corpus_agrees() {
    for line in CORPUS {
        assert_same(&[line]);
    }
}

#[test]
fn test_multi_line_sessions_agree() {
    assert_same(&["$x=?v $$", "$x @ 0x30", "s sym.exit", "$x"]);
    assert_same(&["fs strings", "f str.bye 3 0x600", "fs", "?v $$ @@ str.*"]);
    assert_same(&["e asm.bits=32", "?v $$ @b:16", "e asm.bits"]);
    assert_same(&["af main 0x400 0x10", "?v $$ @@f", "so 0"]);
}

#[test]
fn test_known_values() {
    for parser in [ParserKind::Legacy, ParserKind::Grammar] {
        let outcome = run(parser, &["?v $$ @@ sym.*"]);
        assert_eq!(outcome.output, "0x400\n0x480\n", "{:?}", parser);
        assert_eq!(outcome.offset, 0x100);

        let outcome = run(parser, &["?e a; ?e b && ?e c"]);
        assert_eq!(outcome.output, "a\nb\nc\n");

        let outcome = run(parser, &["s 0x20 @ 0x40"]);
        assert_eq!(outcome.offset, 0x100);
    }
}

#[test]
fn test_long_sequence_agrees() {
    let line = vec!["?e a"; 2000].join(";");
    // the grammar front end nests one node per statement
    let worker = std::thread::Builder::new()
        .stack_size(8 << 20)
        .spawn(move || {
            assert_same(&[line.as_str()]);
            run(ParserKind::Legacy, &[line.as_str()]).output.lines().count()
        })
        .unwrap();
    assert_eq!(worker.join().unwrap(), 2000);
}

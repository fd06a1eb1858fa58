//! Unit tests for the GDB/MI record parser.

use gdbrpc::debugger::mi::{
    field, parse_record, quote, unquote, AsyncKind, Record, ResultClass, StreamKind,
};

// ── Records ─────────────────────────────────────────────────────────────────

#[test]
fn prompt_line_is_prompt() {
    assert_eq!(parse_record("(gdb) "), Record::Prompt);
    assert_eq!(parse_record("(gdb)\r\n"), Record::Prompt);
}

#[test]
fn result_record_with_token() {
    let record = parse_record("12^done");
    assert_eq!(
        record,
        Record::Result {
            token: Some(12),
            class: ResultClass::Done,
            results: String::new(),
        }
    );
}

#[test]
fn error_record_keeps_results() {
    let record = parse_record(r#"3^error,msg="No symbol \"nope\" in current context.""#);
    let Record::Result {
        token,
        class,
        results,
    } = record
    else {
        panic!("expected a result record");
    };
    assert_eq!(token, Some(3));
    assert_eq!(class, ResultClass::Error);
    assert_eq!(
        field(&results, "msg").as_deref(),
        Some("No symbol \"nope\" in current context.")
    );
}

#[test]
fn running_and_stopped_records() {
    assert!(matches!(
        parse_record("7^running"),
        Record::Result {
            token: Some(7),
            class: ResultClass::Running,
            ..
        }
    ));

    let stopped = parse_record(r#"*stopped,reason="signal-received",signal-name="SIGINT""#);
    let Record::Async {
        kind,
        class,
        results,
        ..
    } = stopped
    else {
        panic!("expected an async record");
    };
    assert_eq!(kind, AsyncKind::Exec);
    assert_eq!(class, "stopped");
    assert_eq!(field(&results, "reason").as_deref(), Some("signal-received"));
    assert_eq!(field(&results, "signal-name").as_deref(), Some("SIGINT"));
}

#[test]
fn notify_and_status_records() {
    assert!(matches!(
        parse_record(r#"=thread-group-added,id="i1""#),
        Record::Async {
            kind: AsyncKind::Notify,
            ..
        }
    ));
    assert!(matches!(
        parse_record("+download"),
        Record::Async {
            kind: AsyncKind::Status,
            ..
        }
    ));
}

#[test]
fn stream_records_are_unescaped() {
    assert_eq!(
        parse_record(r#"~"Thread 1 \"prog\" hit Breakpoint 1\n""#),
        Record::Stream {
            kind: StreamKind::Console,
            text: "Thread 1 \"prog\" hit Breakpoint 1\n".into(),
        }
    );
    assert!(matches!(
        parse_record(r#"&"warning: something\n""#),
        Record::Stream {
            kind: StreamKind::Log,
            ..
        }
    ));
    assert!(matches!(
        parse_record(r#"@"inferior says hi""#),
        Record::Stream {
            kind: StreamKind::Target,
            ..
        }
    ));
}

#[test]
fn non_mi_lines_are_other() {
    assert_eq!(
        parse_record("hello from the inferior"),
        Record::Other("hello from the inferior".into())
    );
    assert_eq!(parse_record(""), Record::Other(String::new()));
    assert_eq!(parse_record("^bogus"), Record::Other("^bogus".into()));
}

// ── Quoting ─────────────────────────────────────────────────────────────────

#[test]
fn quote_escapes_specials() {
    assert_eq!(quote(r#"print "a\b""#), r#""print \"a\\b\"""#);
    assert_eq!(quote("a\nb\tc"), r#""a\nb\tc""#);
}

#[test]
fn unquote_inverts_quote() {
    let original = "echo \"x\" \\ done\n";
    let quoted = quote(original);
    let (text, rest) = unquote(&quoted).expect("quoted text parses");
    assert_eq!(text, original);
    assert_eq!(rest, "");
}

#[test]
fn unquote_returns_remainder() {
    let (text, rest) = unquote(r#""abc",next="1""#).unwrap();
    assert_eq!(text, "abc");
    assert_eq!(rest, r#",next="1""#);
}

#[test]
fn unquote_octal_escapes_form_utf8() {
    let (text, _) = unquote(r#""\302\240x""#).unwrap();
    assert_eq!(text, "\u{a0}x");
}

#[test]
fn unquote_rejects_unterminated() {
    assert!(unquote(r#""never closed"#).is_none());
    assert!(unquote("no quote").is_none());
}

// ── Fields ──────────────────────────────────────────────────────────────────

#[test]
fn field_matches_whole_names_only() {
    let results = r#"bkptno="1",frame={addr="0x1",func="main"},no="2""#;
    assert_eq!(field(results, "no").as_deref(), Some("2"));
    assert_eq!(field(results, "bkptno").as_deref(), Some("1"));
    assert_eq!(field(results, "func").as_deref(), Some("main"));
    assert_eq!(field(results, "missing"), None);
}

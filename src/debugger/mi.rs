//! GDB/MI output record parsing.
//!
//! Only the subset needed to drive console commands through
//! `-interpreter-exec` is understood:
//!
//! | Prefix            | Maps to                                  |
//! |-------------------|------------------------------------------|
//! | `(gdb)`           | [`Record::Prompt`]                       |
//! | `[token]^class`   | [`Record::Result`]                       |
//! | `[token]*class`   | [`Record::Async`] with [`AsyncKind::Exec`]   |
//! | `[token]+class`   | [`Record::Async`] with [`AsyncKind::Status`] |
//! | `[token]=class`   | [`Record::Async`] with [`AsyncKind::Notify`] |
//! | `~"…"`            | [`Record::Stream`] with [`StreamKind::Console`] |
//! | `@"…"`            | [`Record::Stream`] with [`StreamKind::Target`]  |
//! | `&"…"`            | [`Record::Stream`] with [`StreamKind::Log`]     |
//! | *(anything else)* | [`Record::Other`]                        |

/// Class of a result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    /// `^done`
    Done,
    /// `^running`
    Running,
    /// `^connected`
    Connected,
    /// `^error`
    Error,
    /// `^exit`
    Exit,
}

/// Family of an out-of-band async record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    /// `*`: target execution state changes.
    Exec,
    /// `+`: progress of slow operations.
    Status,
    /// `=`: supplementary notifications.
    Notify,
}

/// Channel of a stream record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `~`: console output.
    Console,
    /// `@`: target program output.
    Target,
    /// `&`: gdb internal log, including echoed commands.
    Log,
}

/// One parsed line of MI output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// The `(gdb)` prompt terminating an output batch.
    Prompt,
    /// Answer to a command.
    Result {
        /// Token echoed from the command, if any.
        token: Option<u64>,
        /// Result class.
        class: ResultClass,
        /// Raw `key=value` list after the class.
        results: String,
    },
    /// Asynchronous notification.
    Async {
        /// Token echoed from the command, if any.
        token: Option<u64>,
        /// Record family.
        kind: AsyncKind,
        /// Class name such as `stopped` or `running`.
        class: String,
        /// Raw `key=value` list after the class.
        results: String,
    },
    /// Decoded stream text.
    Stream {
        /// Output channel.
        kind: StreamKind,
        /// Unescaped text.
        text: String,
    },
    /// Line that is not MI syntax (usually raw inferior output).
    Other(String),
}

/// Parse one line of MI output.
#[must_use]
pub fn parse_record(line: &str) -> Record {
    let line = line.trim_end_matches(['\r', '\n']);

    if line.trim_end() == "(gdb)" {
        return Record::Prompt;
    }

    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    let token = if digits == 0 {
        None
    } else {
        line[..digits].parse::<u64>().ok()
    };
    let rest = &line[digits..];

    let mut chars = rest.chars();
    let Some(marker) = chars.next() else {
        return Record::Other(line.to_owned());
    };
    let body = chars.as_str();

    match marker {
        '^' => {
            let (class, results) = split_class(body);
            let class = match class {
                "done" => ResultClass::Done,
                "running" => ResultClass::Running,
                "connected" => ResultClass::Connected,
                "error" => ResultClass::Error,
                "exit" => ResultClass::Exit,
                _ => return Record::Other(line.to_owned()),
            };
            Record::Result {
                token,
                class,
                results: results.to_owned(),
            }
        }
        '*' | '+' | '=' => {
            let kind = match marker {
                '*' => AsyncKind::Exec,
                '+' => AsyncKind::Status,
                _ => AsyncKind::Notify,
            };
            let (class, results) = split_class(body);
            Record::Async {
                token,
                kind,
                class: class.to_owned(),
                results: results.to_owned(),
            }
        }
        '~' | '@' | '&' if token.is_none() => {
            let kind = match marker {
                '~' => StreamKind::Console,
                '@' => StreamKind::Target,
                _ => StreamKind::Log,
            };
            match unquote(body) {
                Some((text, _)) => Record::Stream { kind, text },
                None => Record::Other(line.to_owned()),
            }
        }
        _ => Record::Other(line.to_owned()),
    }
}

/// Quote `text` as an MI C-string literal.
#[must_use]
pub fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for ch in text.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

/// Decode a leading MI C-string literal.
///
/// Returns the unescaped text and whatever follows the closing quote, or
/// `None` if `input` does not start with a complete literal. Octal escapes
/// (`\302\240`) are reassembled as UTF-8 bytes.
#[must_use]
pub fn unquote(input: &str) -> Option<(String, &str)> {
    let bytes = input.as_bytes();
    if bytes.first() != Some(&b'"') {
        return None;
    }

    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                let text = String::from_utf8_lossy(&out).into_owned();
                return Some((text, &input[i + 1..]));
            }
            b'\\' => {
                let escaped = *bytes.get(i + 1)?;
                i += 2;
                match escaped {
                    b'n' => out.push(b'\n'),
                    b't' => out.push(b'\t'),
                    b'r' => out.push(b'\r'),
                    b'a' => out.push(0x07),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0c),
                    b'v' => out.push(0x0b),
                    b'e' => out.push(0x1b),
                    b'0'..=b'7' => {
                        let mut value = u32::from(escaped - b'0');
                        let mut taken = 1;
                        while taken < 3 {
                            match bytes.get(i) {
                                Some(d @ b'0'..=b'7') => {
                                    value = value * 8 + u32::from(d - b'0');
                                    i += 1;
                                    taken += 1;
                                }
                                _ => break,
                            }
                        }
                        out.push(u8::try_from(value & 0xff).unwrap_or(b'?'));
                    }
                    other => out.push(other),
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    None
}

/// Look up a top-level `name="value"` pair in a results list.
#[must_use]
pub fn field(results: &str, name: &str) -> Option<String> {
    let needle = format!("{name}=");
    let mut search = results;
    let mut offset = 0;

    while let Some(pos) = search.find(&needle) {
        let start = offset + pos;
        let at_boundary = start == 0 || results[..start].ends_with([',', '{', '[']);
        let value = &results[start + needle.len()..];
        if at_boundary {
            if let Some((text, _)) = unquote(value) {
                return Some(text);
            }
        }
        offset = start + needle.len();
        search = &results[offset..];
    }

    None
}

/// Split `class,rest` into its two halves.
fn split_class(body: &str) -> (&str, &str) {
    match body.split_once(',') {
        Some((class, rest)) => (class, rest),
        None => (body, ""),
    }
}

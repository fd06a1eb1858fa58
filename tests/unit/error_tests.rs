use std::io;

use gdbrpc::AppError;

#[test]
fn display_prefixes_category() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Io("disk".into()), "io: disk"),
        (
            AppError::ConnectionRefused("localhost:1".into()),
            "connection refused: localhost:1",
        ),
        (
            AppError::ConnectionTimedOut("slow".into()),
            "connection timed out: slow",
        ),
        (AppError::ConnectionClosed("bye".into()), "connection closed: bye"),
        (AppError::Connection("bind".into()), "connection: bind"),
        (AppError::Protocol("junk".into()), "protocol: junk"),
        (AppError::Timeout("late".into()), "timeout: late"),
        (
            AppError::Execution("No symbol \"x\" in current context.".into()),
            "execution: No symbol \"x\" in current context.",
        ),
        (AppError::Interrupted("stopped".into()), "interrupted: stopped"),
        (AppError::Debugger("gone".into()), "debugger: gone"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn connection_errors_are_classified() {
    assert!(AppError::ConnectionRefused(String::new()).is_connection_error());
    assert!(AppError::ConnectionTimedOut(String::new()).is_connection_error());
    assert!(AppError::ConnectionClosed(String::new()).is_connection_error());
    assert!(AppError::Connection(String::new()).is_connection_error());

    assert!(!AppError::Timeout(String::new()).is_connection_error());
    assert!(!AppError::Protocol(String::new()).is_connection_error());
    assert!(!AppError::Execution(String::new()).is_connection_error());
}

#[test]
fn io_errors_map_by_kind() {
    let refused = AppError::from(io::Error::from(io::ErrorKind::ConnectionRefused));
    assert!(matches!(refused, AppError::ConnectionRefused(_)));

    let timed_out = AppError::from(io::Error::from(io::ErrorKind::TimedOut));
    assert!(matches!(timed_out, AppError::ConnectionTimedOut(_)));

    for kind in [
        io::ErrorKind::ConnectionReset,
        io::ErrorKind::ConnectionAborted,
        io::ErrorKind::BrokenPipe,
        io::ErrorKind::UnexpectedEof,
    ] {
        let err = AppError::from(io::Error::from(kind));
        assert!(
            matches!(err, AppError::ConnectionClosed(_)),
            "{kind:?} must map to ConnectionClosed"
        );
    }

    let other = AppError::from(io::Error::from(io::ErrorKind::PermissionDenied));
    assert!(matches!(other, AppError::Io(_)));
}

#[test]
fn toml_errors_map_to_config() {
    let err: AppError = toml::from_str::<toml::Value>("= nope").unwrap_err().into();
    assert!(matches!(err, AppError::Config(_)));
}

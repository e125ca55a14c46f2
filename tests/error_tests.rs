// Error handling tests
// Author: kelexine (https://github.com/kelexine)

use platecache::error::CacheError;

#[test]
fn test_error_display_messages() {
    let errors = vec![
        CacheError::Fetch("timed out".to_string()),
        CacheError::FetchStatus { locator: "https://a/b.png".to_string(), status: 503 },
        CacheError::Decode("bad header".to_string()),
        CacheError::Configuration("limit".to_string()),
        CacheError::InvalidLocator("nope".to_string()),
        CacheError::Io("disk full".to_string()),
        CacheError::Internal("oops".to_string()),
    ];

    for error in errors {
        let display = format!("{}", error);
        assert!(!display.is_empty(), "Error should have display message");
    }
}

#[test]
fn test_fetch_status_error() {
    let error = CacheError::FetchStatus {
        locator: "https://cdn.example.com/x.png".to_string(),
        status: 404,
    };
    let message = format!("{}", error);
    assert!(message.contains("404"));
    assert!(message.contains("https://cdn.example.com/x.png"));
    assert!(error.is_fetch_failure());
}

#[test]
fn test_decode_error_is_not_fetch_failure() {
    let error = CacheError::Decode("truncated".to_string());
    assert!(!error.is_fetch_failure());
    assert!(error.shows_placeholder());
}

#[test]
fn test_configuration_error_does_not_fall_back() {
    let error = CacheError::Configuration("memory byte limit must be positive".to_string());
    assert!(!error.shows_placeholder());
    assert!(format!("{}", error).contains("must be positive"));
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only filesystem");
    let error: CacheError = io.into();
    assert!(matches!(error, CacheError::Io(ref m) if m.contains("read-only")));
}

#[test]
fn test_errors_are_cloneable_for_shared_waiters() {
    let error = CacheError::Fetch("reset".to_string());
    assert_eq!(error.clone(), error);
}

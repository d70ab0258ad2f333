use std::error::Error as _;

use super::error::{Error, ErrorKind};
use super::logging;
use crate::broker::ProviderError;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
    logging::init("nonsense");
}

#[test]
fn test_provider_error_keeps_cause() {
    let err = Error::provider(
        "Error occurred while sending the message",
        ProviderError::Transport("broker unreachable".to_string()),
    );
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert_eq!(
        err.to_string(),
        "Error occurred while sending the message: transport failure: broker unreachable"
    );
    let source = err.source().expect("source");
    assert_eq!(source.to_string(), "transport failure: broker unreachable");
}

#[test]
fn test_closed_provider_error_maps_to_closed_kind() {
    let err = Error::provider(
        "Error occurred while receiving messages",
        ProviderError::Closed("connection is closed".to_string()),
    );
    assert!(err.is_closed());
}

#[test]
fn test_wrap_preserves_kind() {
    let inner = Error::conversion("Unsupported message type: StreamMessage");
    let err = Error::wrap("Error occurred while processing the received messages", inner);
    assert_eq!(err.kind(), ErrorKind::Conversion);
    assert!(err.message().ends_with("Unsupported message type: StreamMessage"));
    assert!(err.cause().is_some());
}

#[test]
fn test_config_error_has_no_cause() {
    let err = Error::config("unknown acknowledgement mode: SOMETIMES");
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.source().is_none());
    assert_eq!(err.kind().to_string(), "configuration");
}

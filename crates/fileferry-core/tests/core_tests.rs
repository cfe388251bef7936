use fileferry_core::{
    Clipboard, EngineConfig, ErrorKind, ItemError, OperationError, OperationKind,
    OperationRequest, TransferMode,
};
use std::io;
use std::path::PathBuf;

#[test]
fn test_config_from_json_uses_defaults() {
    let config: EngineConfig =
        serde_json::from_str(r#"{ "chunk_size": 8192, "primary_storage_root": "/sdcard" }"#)
            .unwrap();

    assert_eq!(config.chunk_size, 8192);
    assert_eq!(config.progress_step_percent, 10);
    assert_eq!(config.reserved_headroom, 2 * 1024 * 1024);
    assert_eq!(config.event_buffer, 100);
    assert_eq!(config.primary_storage_root, Some(PathBuf::from("/sdcard")));
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_json_config_detected() {
    let config: EngineConfig = serde_json::from_str(r#"{ "event_buffer": 0 }"#).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_request_serialization() {
    let request = OperationRequest::zip(vec![PathBuf::from("/a/docs")], "/a", "docs.zip");
    let json = serde_json::to_string(&request).unwrap();
    let back: OperationRequest = serde_json::from_str(&json).unwrap();

    assert_eq!(back.kind(), OperationKind::Zip);
    assert_eq!(back.sources(), &[PathBuf::from("/a/docs")]);
}

#[test]
fn test_clipboard_round() {
    let mut clipboard = Clipboard::new();
    clipboard.cut(vec![PathBuf::from("/x/one"), PathBuf::from("/x/two")]);

    match clipboard.paste_request("/y").unwrap() {
        OperationRequest::Paste {
            sources,
            destination,
            mode,
        } => {
            assert_eq!(sources.len(), 2);
            assert_eq!(destination, PathBuf::from("/y"));
            assert_eq!(mode, TransferMode::Move);
        }
        other => panic!("unexpected request {other:?}"),
    }

    clipboard.clear();
    assert!(!clipboard.can_paste());
}

#[test]
fn test_error_taxonomy() {
    let err = OperationError::DeleteFailed {
        path: PathBuf::from("/locked"),
        source: io::Error::from(io::ErrorKind::PermissionDenied),
    };
    assert_eq!(err.kind(), ErrorKind::DeleteFailed);

    let item = ItemError::from(err);
    assert_eq!(item.path, PathBuf::from("/locked"));
    assert!(item.to_string().starts_with("/locked: Failed to delete"));

    assert_eq!(OperationError::Cancelled.kind(), ErrorKind::Cancelled);
}

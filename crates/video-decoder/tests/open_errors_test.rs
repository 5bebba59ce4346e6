//! Opening inputs that are not decodable video
use egg_inspect_common::{ErrorKind, MediaError};
use egg_inspect_decoder::{probe, FfmpegSource};

#[test]
fn test_missing_file_is_open_error() {
    let err = FfmpegSource::open("/nonexistent/eggs.mp4".as_ref()).unwrap_err();
    assert!(matches!(err, MediaError::Open { .. }), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_garbage_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eggs.mp4");
    std::fs::write(&path, vec![0x5a_u8; 4096]).unwrap();

    let err = FfmpegSource::open(&path).unwrap_err();
    assert!(
        matches!(err, MediaError::Open { .. } | MediaError::NoVideoStream { .. }),
        "{err:?}"
    );
    assert!(probe(&path).is_err());
}

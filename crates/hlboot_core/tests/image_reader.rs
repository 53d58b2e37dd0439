mod support;

use hlboot_core::{load_code, read_from, read_image, BootError};
use std::io::Cursor;
use std::path::Path;
use support::{write_image, ScriptedVm, MAGIC};

#[test]
fn read_image_returns_exact_file_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_image(dir.path(), "main.hl", "noop");

    let image = read_image(&path).unwrap();

    let mut expected = MAGIC.to_vec();
    expected.extend_from_slice(b"noop");
    assert_eq!(image.as_bytes(), expected.as_slice());
}

#[test]
fn truncated_source_never_yields_an_image() {
    for available in 0..8usize {
        let data = vec![0xAAu8; available];
        let err = read_from(Cursor::new(data), 8, Path::new("main.hl"))
            .expect_err("short source must fail");
        assert!(matches!(err, BootError::ReadError { read, .. } if read == available));
    }
}

#[test]
fn load_code_maps_parser_rejection_to_malformed_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.hl");
    std::fs::write(&path, b"HLB\x02corrupt").unwrap();
    let vm = ScriptedVm::new();

    let err = load_code(&vm, &path).err().expect("bad header must fail");

    match err {
        BootError::MalformedImage { path: failed, reason } => {
            assert_eq!(failed, path);
            assert_eq!(reason, "bad magic");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(vm.live_allocations.get(), 0);
}

#[test]
fn load_code_reports_missing_file_without_touching_vm() {
    let dir = tempfile::tempdir().unwrap();
    let vm = ScriptedVm::new();

    let err = load_code(&vm, &dir.path().join("main.hl"))
        .err()
        .expect("missing file must fail");

    assert!(matches!(err, BootError::NotFound { .. }));
    assert!(vm.events().is_empty());
}

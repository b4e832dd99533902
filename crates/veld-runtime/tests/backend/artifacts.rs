//! Executable image round-trips through the filesystem.

use super::*;
use veld_runtime::bytecode::image;
use veld_runtime::vm::{CaptureBuffer, VM};
use veld_runtime::Pipeline;

#[test]
fn image_save_load_run() {
    let mut builder = fib_builder();
    let mut pipeline = Pipeline::new();
    for function in stdlib_functions() {
        pipeline = pipeline.with_function(function);
    }
    let exe = pipeline.build(&mut builder.ast).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fib.vbc");
    image::save(&exe, &path).unwrap();

    let restored = image::load(&path).unwrap();
    assert_eq!(restored, exe);

    let buffer = CaptureBuffer::new();
    let mut vm = VM::new(restored).with_output(Box::new(buffer.clone()));
    vm.run().unwrap();
    assert_eq!(buffer.contents(), "1346269\n");
}

#[test]
fn tampered_image_is_rejected() {
    let mut builder = fib_builder();
    let mut pipeline = Pipeline::new();
    for function in stdlib_functions() {
        pipeline = pipeline.with_function(function);
    }
    let exe = pipeline.build(&mut builder.ast).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fib.vbc");
    image::save(&exe, &path).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x40;
    std::fs::write(&path, bytes).unwrap();

    assert!(image::load(&path).is_err());
}

use nix::unistd::Pid;

use procimage::formats::elf::ElfError;
use procimage::image::FileSink;
use procimage::{ErrorKind, ImageReconstructor, ProcImageError};

use super::{map_server, server_elf64, EXE, INODE, LIBC_INODE, PID};
use crate::common::fake_proc::FakeProc;
use crate::common::RecordingTracer;

fn reconstruct(fake: &FakeProc, tracer: &RecordingTracer) -> ProcImageError {
    ImageReconstructor::with_tracer(fake.config(), tracer.clone())
        .reconstruct(Pid::from_raw(PID))
        .unwrap_err()
}

/// Unwrap the per-pid wrapper every pipeline failure carries.
fn cause(err: &ProcImageError) -> &ProcImageError {
    match err {
        ProcImageError::Reconstruction { pid, source } => {
            assert_eq!(*pid, PID);
            &**source
        }
        other => panic!("expected a per-pid failure, got {other:?}"),
    }
}

#[test]
fn test_missing_process() {
    let fake = FakeProc::new();
    let tracer = RecordingTracer::new();

    let err = reconstruct(&fake, &tracer);
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(cause(&err), ProcImageError::ProcessNotFound { pid: PID }));
    assert!(!err.is_retryable());
    assert!(tracer.events().is_empty());
}

#[test]
fn test_executable_inode_not_mapped_reads_nothing() {
    let fake = FakeProc::new();
    let mut p = fake.process(PID);
    p.map_file(0x20000, "r--p", 0, LIBC_INODE, "/usr/lib/libc.so.6", &[0xaa; 0x1000])
        .map_anon(0x40000, 0x1000, "[stack]")
        .exe(EXE)
        .commit();
    let tracer = RecordingTracer::new();

    let err = reconstruct(&fake, &tracer);
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(cause(&err), ProcImageError::NotFound { .. }));
    assert!(err
        .to_string()
        .starts_with("Reconstruction failed for pid 4242 (not found)"));
    assert_eq!(tracer.attaches(), 0);
}

#[test]
fn test_unknown_inode_is_not_found() {
    let fake = FakeProc::new();
    let mut p = fake.process(PID);
    p.map_file(0x10000, "r--p", 0, 0, EXE, &[0x7f; 0x1000])
        .exe(EXE)
        .commit();
    let tracer = RecordingTracer::new();

    let err = reconstruct(&fake, &tracer);
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(tracer.attaches(), 0);
}

#[test]
fn test_missing_exe_link() {
    let fake = FakeProc::new();
    let file = server_elf64();
    let mut p = fake.process(PID);
    map_server(&mut p, &file, EXE);
    p.commit();
    let tracer = RecordingTracer::new();

    let err = reconstruct(&fake, &tracer);
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(tracer.attaches(), 0);
}

#[test]
fn test_malformed_maps_line_aborts_catalog() {
    let fake = FakeProc::new();
    let mut p = fake.process(PID);
    p.map_file(0x10000, "r--p", 0, INODE, EXE, &[0x7f; 0x1000])
        .raw_maps_line("11000-12000 r- 00001000 08:01 1048577 /opt/app/bin/server")
        .exe(EXE)
        .commit();
    let tracer = RecordingTracer::new();

    let err = reconstruct(&fake, &tracer);
    assert_eq!(err.kind(), ErrorKind::Malformed);
    assert!(matches!(
        cause(&err),
        ProcImageError::MalformedMaps { line: 2, .. }
    ));
    assert!(tracer.events().is_empty());
}

#[test]
fn test_short_read_detaches_and_fails_whole_image() {
    let fake = FakeProc::new();
    let file = server_elf64();
    let mut p = fake.process(PID);
    map_server(&mut p, &file, EXE);
    p.exe(EXE);
    // The data region at 0x13000 loses its second half.
    p.commit_with(Some(0x13800));
    let tracer = RecordingTracer::new();

    let err = reconstruct(&fake, &tracer);
    assert_eq!(err.kind(), ErrorKind::ShortRead);
    assert!(err.is_retryable());
    assert!(matches!(
        cause(&err),
        ProcImageError::ShortRead {
            address: 0x13000,
            requested: 0x1000,
            read: 0x800
        }
    ));
    assert_eq!(tracer.attaches(), 3);
    tracer.assert_paired();
}

#[test]
fn test_refused_attach_stops_pipeline() {
    let fake = FakeProc::new();
    let file = server_elf64();
    let mut p = fake.process(PID);
    map_server(&mut p, &file, EXE);
    p.exe(EXE).commit();
    let tracer = RecordingTracer::refusing_attach(2);

    let err = reconstruct(&fake, &tracer);
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(err.is_retryable());
    assert_eq!(tracer.attaches(), 1);
    assert_eq!(tracer.detaches(), 1);
    tracer.assert_paired();
}

#[test]
fn test_first_region_not_elf() {
    let fake = FakeProc::new();
    let mut file = server_elf64();
    file[..4].copy_from_slice(b"MZ\x90\x00");
    let mut p = fake.process(PID);
    map_server(&mut p, &file, EXE);
    p.exe(EXE).commit();
    let tracer = RecordingTracer::new();

    let err = reconstruct(&fake, &tracer);
    assert_eq!(err.kind(), ErrorKind::Malformed);
    assert!(matches!(
        cause(&err),
        ProcImageError::MalformedElf(ElfError::InvalidMagic)
    ));
    tracer.assert_paired();
}

#[test]
fn test_image_size_limit() {
    let fake = FakeProc::new();
    let file = server_elf64();
    let mut p = fake.process(PID);
    map_server(&mut p, &file, EXE);
    p.exe(EXE).commit();

    let mut config = fake.config();
    config.reconstruct.max_image_size = 0x2000;
    let err = ImageReconstructor::with_tracer(config, RecordingTracer::new())
        .reconstruct(Pid::from_raw(PID))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert!(!err.is_retryable());
}

#[test]
fn test_image_size_limit_leaves_file_sink_untouched() {
    let fake = FakeProc::new();
    let file = server_elf64();
    let mut p = fake.process(PID);
    map_server(&mut p, &file, EXE);
    p.exe(EXE).commit();

    let out = tempfile::NamedTempFile::new().unwrap();
    let sink = FileSink::new(out.reopen().unwrap(), 0x2000);
    let err = ImageReconstructor::with_tracer(fake.config(), RecordingTracer::new())
        .reconstruct_into(Pid::from_raw(PID), sink)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    // The first two regions fit the limit but must not be written either.
    assert_eq!(std::fs::metadata(out.path()).unwrap().len(), 0);
}

#[test]
fn test_region_size_limit_reads_nothing() {
    let fake = FakeProc::new();
    let file = server_elf64();
    let mut p = fake.process(PID);
    map_server(&mut p, &file, EXE);
    p.exe(EXE).commit();

    let mut config = fake.config();
    config.memory.max_region_size = 0x800;
    let tracer = RecordingTracer::new();
    let err = ImageReconstructor::with_tracer(config, tracer.clone())
        .reconstruct(Pid::from_raw(PID))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert_eq!(tracer.attaches(), 0);
}

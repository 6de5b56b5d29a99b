use std::time::Duration;

use nix::unistd::Pid;

use procimage::timeout::reconstruct_with_timeout;
use procimage::{ErrorKind, ImageReconstructor, ProcImageError};

use super::{map_server, server_elf64, EXE, PID};
use crate::common::fake_proc::FakeProc;
use crate::common::RecordingTracer;

#[tokio::test]
async fn test_reconstruct_within_deadline() {
    let fake = FakeProc::new();
    let file = server_elf64();
    let mut p = fake.process(PID);
    map_server(&mut p, &file, EXE);
    p.exe(EXE).commit();

    let reconstructor = ImageReconstructor::with_tracer(fake.config(), RecordingTracer::new());
    let image = reconstruct_with_timeout(reconstructor, Pid::from_raw(PID), 30)
        .await
        .unwrap();
    assert_eq!(image.as_bytes(), &file[..]);
}

#[tokio::test]
async fn test_frozen_target_times_out_and_still_detaches() {
    let fake = FakeProc::new();
    let file = server_elf64();
    let mut p = fake.process(PID);
    map_server(&mut p, &file, EXE);
    p.exe(EXE).commit();

    let tracer = RecordingTracer::stalling(Duration::from_millis(1500));
    let reconstructor = ImageReconstructor::with_tracer(fake.config(), tracer.clone());
    let err = reconstruct_with_timeout(reconstructor, Pid::from_raw(PID), 1)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(matches!(
        err,
        ProcImageError::Reconstruction { pid: PID, .. }
    ));

    // The abandoned attempt keeps running on its blocking thread and
    // releases every region it attached to.
    let mut waited = Duration::ZERO;
    while tracer.detaches() < 3 && waited < Duration::from_secs(10) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += Duration::from_millis(100);
    }
    assert_eq!(tracer.attaches(), 3);
    tracer.assert_paired();
}

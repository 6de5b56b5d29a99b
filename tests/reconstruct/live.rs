//! Checks against real processes. Skipped where the environment refuses
//! ptrace or lacks the tools.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use nix::unistd::Pid;

use procimage::procfs::ProcFs;
use procimage::{ErrorKind, ImageReconstructor};

/// `sleep` child that is killed on drop.
struct Sleeper(Child);

impl Drop for Sleeper {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn spawn_sleeper() -> Option<(Sleeper, Pid)> {
    let child = Command::new("sleep").arg("30").spawn().ok()?;
    let pid = Pid::from_raw(child.id() as i32);
    let sleeper = Sleeper(child);

    // Until exec completes the child still runs the test binary.
    let own = std::env::current_exe().ok()?;
    let procfs = ProcFs::default();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Ok(image) = procfs.read_image_path(pid) {
            if image.path != own {
                return Some((sleeper, pid));
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    None
}

#[test]
fn test_self_catalog_contains_own_executable() {
    let procfs = ProcFs::default();
    let pid = Pid::this();

    let catalog = procfs.read_maps(pid).unwrap();
    assert!(!catalog.is_empty());
    for vma in &catalog {
        assert!(vma.end_address > vma.start_address);
    }

    let image = procfs.read_image_path(pid).unwrap();
    let own = catalog
        .find_by_path(&image.path.to_string_lossy())
        .expect("own executable is mapped");
    assert_ne!(own.inode, 0);
    assert!(!catalog.regions_with_inode(own.inode).is_empty());

    assert!(procfs.is_process_alive(pid));
    assert!(procfs.is_user_process(pid).unwrap());
    let stat = procfs.read_process_stat(pid).unwrap();
    assert_eq!(stat.pid, pid.as_raw());
    assert!(stat.state.has_address_space());
}

#[test]
fn test_live_child_reconstruction() {
    let Some((_sleeper, pid)) = spawn_sleeper() else {
        eprintln!("skipping: could not start a sleep child");
        return;
    };

    let reconstructor = ImageReconstructor::default();
    let image = match reconstructor.reconstruct(pid) {
        Ok(image) => image,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            eprintln!("skipping: ptrace refused here ({e})");
            return;
        }
        Err(e) => panic!("reconstruction of pid {pid} failed: {e}"),
    };

    assert_eq!(&image.as_bytes()[..4], b"\x7fELF");
    assert!(!image.regions.is_empty());
    assert!(image.elf.load_segments().count() > 0);

    // The header page is mapped read-only and matches the file on disk.
    let on_disk: PathBuf = image.executable.clone();
    if let Ok(file) = std::fs::read(&on_disk) {
        let header = image.elf.header().unwrap().ident.class.header_size();
        assert_eq!(&image.as_bytes()[..header], &file[..header]);
    }

    // A sleeping target does not change between attempts.
    let again = reconstructor.reconstruct(pid).unwrap();
    assert_eq!(image.sha256_hex(), again.sha256_hex());

    // Detached: the child is still alive and not left stopped.
    let stat = reconstructor.procfs().read_process_stat(pid).unwrap();
    assert!(stat.state.has_address_space());
    assert_ne!(stat.state, procimage::procfs::ProcessState::TracingStop);
}

mod failures;
mod live;
mod timeouts;

use crate::common::elf::{self, PF_R, PF_W, PF_X};
use crate::common::fake_proc::FakeProcess;

pub const PID: i32 = 4242;
pub const INODE: u64 = 1_048_577;
pub const EXE: &str = "/opt/app/bin/server";
pub const LIBC_INODE: u64 = 393_218;

/// 64-bit executable whose three PT_LOAD segments cover `[0, 0x3000)`.
pub fn server_elf64() -> Vec<u8> {
    elf::elf64(
        0x3000,
        0x1100,
        &[
            (0, 0x1000, PF_R),
            (0x1000, 0x1000, PF_R | PF_X),
            (0x2000, 0x800, PF_R | PF_W),
        ],
    )
}

/// A typical address space: the executable's regions interleaved with a
/// heap, a shared library, anonymous memory and the stack.
pub fn map_server(p: &mut FakeProcess, file: &[u8], path: &str) {
    p.map_file(0x10000, "r--p", 0, INODE, path, &file[..0x1000])
        .map_file(0x11000, "r-xp", 0x1000, INODE, path, &file[0x1000..0x2000])
        .map_file(0x13000, "rw-p", 0x2000, INODE, path, &file[0x2000..0x3000])
        .map_anon(0x14000, 0x2000, "[heap]")
        .map_file(0x20000, "r--p", 0, LIBC_INODE, "/usr/lib/libc.so.6", &[0xaa; 0x1000])
        .map_file(0x21000, "r-xp", 0x1000, LIBC_INODE, "/usr/lib/libc.so.6", &[0xbb; 0x1000])
        .map_anon(0x30000, 0x1000, "")
        .map_anon(0x40000, 0x1000, "[stack]");
}

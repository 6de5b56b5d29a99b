//! `procimage <pid> [output]`: dump the reconstructed executable of a process.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nix::unistd::Pid;
use tracing::info;

use procimage::logging::{init_tracing, init_tracing_json};
use procimage::procfs::ProcFs;
use procimage::timeout::reconstruct_with_timeout;
use procimage::{ImageReconstructor, ProcImageConfig, RegionPolicy};

/// Rebuild the mapped executable of a running process from its memory.
#[derive(Parser, Debug)]
#[command(name = "procimage", version, about, long_about = None)]
struct Args {
    /// Target process id
    pid: i32,
    /// Output file (default: <comm>-<pid>.img)
    output: Option<PathBuf>,
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Only write regions covered by a PT_LOAD segment
    #[arg(long)]
    load_covered: bool,
    /// Print the written regions as JSON
    #[arg(long)]
    regions_json: bool,
    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.json_logs {
        init_tracing_json();
    } else {
        init_tracing();
    }

    let mut config = match &args.config {
        Some(path) => ProcImageConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ProcImageConfig::default(),
    };
    if args.load_covered {
        config.reconstruct.region_policy = RegionPolicy::LoadCovered;
    }

    let pid = Pid::from_raw(args.pid);
    let procfs = ProcFs::new(&config.procfs);
    let stat = procfs
        .check_target(pid)
        .with_context(|| format!("process {} cannot be reconstructed", pid))?;

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("{}-{}.img", stat.comm.replace('/', "_"), pid)));

    let seconds = config.reconstruct.timeout_seconds;
    let reconstructor = ImageReconstructor::new(config);
    let image = reconstruct_with_timeout(reconstructor, pid, seconds).await?;

    image
        .write_to(&output)
        .with_context(|| format!("writing image to {}", output.display()))?;
    info!(pid = pid.as_raw(), output = %output.display(), "Image written");

    println!("pid:        {}", image.pid);
    println!("executable: {}{}", image.executable.display(), if image.deleted { " (deleted)" } else { "" });
    if let Some(header) = image.elf.header() {
        println!("class:      ELF{}", header.ident.class.bits());
        println!("type:       {:?} ({:?})", header.file_type(), header.machine());
        println!("entry:      {:#x}", header.e_entry);
        println!("segments:   {} ({} PT_LOAD)", image.elf.program_headers().len(), image.elf.load_segments().count());
        for phdr in image.elf.program_headers() {
            println!(
                "  {:<12} {} offset {:#010x} filesz {:#x}",
                phdr.type_name(),
                phdr.flags_string(),
                phdr.p_offset,
                phdr.p_filesz
            );
        }
    }
    println!("regions:    {}", image.regions.len());
    println!("size:       {} bytes", image.len);
    println!("sha256:     {}", image.sha256_hex());
    println!("output:     {}", output.display());

    if args.regions_json {
        println!("{}", serde_json::to_string_pretty(&image.regions)?);
    }

    Ok(())
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use fat32_vdisk::{BootSector, VirtualDisk};

#[derive(Parser)]
#[command(name = "vdisk")]
#[command(about = "Build and inspect FAT32 virtual disk images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty disk image
    Create {
        /// Volume name, stored as the boot sector label
        name: String,
        /// Disk size in bytes, K/M/G suffixes allowed
        #[arg(short, long, value_parser = parse_size)]
        size: u64,
        /// Image file to write
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Write only the 512-byte boot sector for a disk size
    BootSector {
        name: String,
        #[arg(short, long, value_parser = parse_size)]
        size: u64,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Copy a host file into an image
    Add {
        image: PathBuf,
        file: PathBuf,
        /// Name inside the image, defaults to the host file name
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List the root directory
    List {
        image: PathBuf,
        /// Include deleted records
        #[arg(short, long)]
        all: bool,
    },
    /// Copy a file out of an image
    Extract {
        image: PathBuf,
        name: String,
        output: PathBuf,
    },
    /// Delete a file from an image
    Delete { image: PathBuf, name: String },
    /// Report slack space and FAT consistency
    Slack { image: PathBuf },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Create { name, size, output } => {
            let disk = VirtualDisk::create(&name, size)?;
            disk.save(&output)?;
            let geometry = disk.geometry();
            println!("Created '{}' at {}", name, output.display());
            println!("  Size: {} bytes", geometry.disk_size());
            println!("  Sectors per cluster: {}", geometry.sectors_per_cluster());
            println!("  Sectors per FAT: {}", geometry.fat_size_sectors());
            println!("  Usable clusters: {}", geometry.usable_cluster_count());
        }
        Commands::BootSector { name, size, output } => {
            let boot_sector = BootSector::new(size, &name, &mut rand::thread_rng())?;
            fs::write(&output, boot_sector.get_bytes())
                .with_context(|| format!("writing {}", output.display()))?;
            println!(
                "Boot sector for '{}' written to {} (volume id {:02X?})",
                boot_sector.volume_label(),
                output.display(),
                boot_sector.volume_id()
            );
        }
        Commands::Add { image, file, name } => {
            let data = fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let name = match name {
                Some(name) => name,
                None => match file.file_name() {
                    Some(name) => name.to_string_lossy().into_owned(),
                    None => bail!("cannot derive a name from {}", file.display()),
                },
            };
            let mut disk = open_image(&image)?;
            let chain = disk.write_file(&name, &data)?;
            disk.save(&image)?;
            println!("Added '{}' ({} bytes, {} clusters)", name, data.len(), chain.len());
        }
        Commands::List { image, all } => {
            let disk = open_image(&image)?;
            let records: Vec<_> = disk
                .root_directory()
                .records()
                .iter()
                .filter(|r| all || !r.is_deleted())
                .collect();
            if records.is_empty() {
                println!("No files.");
            } else {
                for record in records {
                    println!("{}", record);
                }
            }
        }
        Commands::Extract { image, name, output } => {
            let disk = open_image(&image)?;
            let data = disk.read_file(&name)?;
            fs::write(&output, &data).with_context(|| format!("writing {}", output.display()))?;
            println!("Extracted '{}' ({} bytes) to {}", name, data.len(), output.display());
        }
        Commands::Delete { image, name } => {
            let mut disk = open_image(&image)?;
            let freed = disk.delete_file(&name)?;
            disk.save(&image)?;
            println!("Deleted '{}', {} clusters freed", name, freed);
        }
        Commands::Slack { image } => {
            let disk = open_image(&image)?;
            println!("Slack space: {} bytes", disk.slack_space());
            println!(
                "Free clusters: {} of {}",
                disk.main_fat().free_cluster_count(),
                disk.main_fat().cluster_count()
            );
            match disk.check_consistency() {
                Ok(()) => println!("FAT copies: consistent"),
                Err(e) => println!("FAT copies: {}", e),
            }
        }
    }

    Ok(())
}

fn open_image(path: &Path) -> anyhow::Result<VirtualDisk> {
    VirtualDisk::open(path).with_context(|| format!("opening image {}", path.display()))
}

/// Parse `4096`, `64K`, `300M` or `1G` into bytes
fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last() {
        Some('K' | 'k') => (&s[..s.len() - 1], 1u64 << 10),
        Some('M' | 'm') => (&s[..s.len() - 1], 1u64 << 20),
        Some('G' | 'g') => (&s[..s.len() - 1], 1u64 << 30),
        _ => (s, 1),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size '{}'", s))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{}' overflows", s))
}

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use fatdrv::{Error, FatType, FileDisk, FormatOptions, OpenFlags, Volume};

#[derive(Debug, Parser)]
#[command(name = "fatdrv", about = "Inspect and format FAT volume images")]
struct Arguments {
    /// Path to the volume image.
    image: PathBuf,
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// Print the mounted volume's geometry.
    Info,
    /// List a directory.
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Write a file's contents to stdout.
    Cat { path: String },
    /// Format the image.
    Format {
        /// 12, 16 or 32; omit to let the size decide.
        #[arg(long)]
        fat_type: Option<u8>,
        /// Cluster size in bytes.
        #[arg(long)]
        cluster_size: Option<u32>,
        #[arg(long)]
        label: Option<String>,
    },
    /// Run the integrity checks.
    Check,
}

fn main() -> anyhow::Result<()> {
    let args = Arguments::parse();
    let mut disk = FileDisk::open(&args.image)
        .with_context(|| format!("opening {}", args.image.display()))?;

    match args.subcommand {
        Subcommand::Info => {
            let volume = Volume::mount(&mut disk)?;
            println!("type:             {:?}", volume.fat_type());
            println!("label:            {}", volume.volume_label());
            println!("volume id:        {:08X}", volume.volume_id());
            println!("bytes/sector:     {}", volume.bytes_per_sector());
            println!("sectors/cluster:  {}", volume.sectors_per_cluster());
            println!("total sectors:    {}", volume.total_sectors());
            println!("total clusters:   {}", volume.total_clusters());
            println!("FAT copies:       {}", volume.num_fats());
            println!("FAT size:         {} sectors", volume.fat_size_sectors());
            println!("data begins:      sector {}", volume.data_begin_sector());
            println!("free clusters:    {}", volume.count_free_clusters()?);
        }
        Subcommand::Ls { path } => {
            let mut volume = Volume::mount(&mut disk)?;
            let mut reader = volume.open_dir(&path)?;
            loop {
                match reader.read_dir() {
                    Ok(entry) => {
                        let kind = if entry.is_directory() { 'd' } else { '-' };
                        println!(
                            "{} {:>10}  {:?}  {}",
                            kind,
                            entry.size,
                            entry.modified,
                            entry.name()
                        );
                    }
                    Err(Error::Eof) => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Subcommand::Cat { path } => {
            let mut volume = Volume::mount(&mut disk)?;
            let mut file = volume.open_file(&path, OpenFlags::RDONLY)?;
            let mut buf = vec![0u8; 64 * 1024];
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            loop {
                match file.read(&mut volume, &mut buf) {
                    Ok(n) => out.write_all(&buf[..n])?,
                    Err(Error::Eof) => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Subcommand::Format {
            fat_type,
            cluster_size,
            label,
        } => {
            let fat_type = match fat_type {
                None => None,
                Some(12) => Some(FatType::Fat12),
                Some(16) => Some(FatType::Fat16),
                Some(32) => Some(FatType::Fat32),
                Some(other) => bail!("unknown FAT type {other}"),
            };
            let total_sectors = disk.sector_count()?;
            let params = fatdrv::format(
                &mut disk,
                total_sectors,
                &FormatOptions {
                    fat_type,
                    cluster_size,
                    volume_label: label.as_deref(),
                },
            )?;
            println!(
                "formatted {:?}: {} clusters of {} bytes",
                params.fat_type, params.total_clusters, params.bytes_per_cluster
            );
        }
        Subcommand::Check => {
            let mut volume = Volume::mount(&mut disk)?;
            volume.check_integrity()?;
            println!("ok");
        }
    }
    Ok(())
}

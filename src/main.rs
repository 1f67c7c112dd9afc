use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;
use walkdir::WalkDir;

use chin::{ChinReader, ChinWriter};

#[derive(Parser)]
#[command(name = "chin")]
#[command(about = "chin is a fast and secure file archiver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new archive
    Pack {
        /// Files or folders to pack
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output archive path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Password for encryption
        #[arg(short, long)]
        password: Option<String>,
        /// Split archive size (e.g. 10MB, 1GB)
        #[arg(long)]
        split: Option<String>,
    },
    /// Extract files from an archive
    Unpack {
        archive: PathBuf,
        /// Destination directory
        #[arg(short = 'd', long)]
        destination: Option<PathBuf>,
        /// Password for decryption
        #[arg(short, long)]
        password: Option<String>,
        /// Wrap extracted files in a parent folder derived from the archive name
        #[arg(long)]
        wrap: bool,
    },
    /// List files in an archive
    List {
        archive: PathBuf,
        /// Password for decryption
        #[arg(short, long)]
        password: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Pack {
            inputs,
            output,
            password,
            split,
        } => cmd_pack(inputs, output, password, split),
        Commands::Unpack {
            archive,
            destination,
            password,
            wrap,
        } => cmd_unpack(archive, destination, password, wrap),
        Commands::List { archive, password } => cmd_list(archive, password),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

// ── Commands ─────────────────────────────────────────────────────────────────

fn cmd_pack(
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    password: Option<String>,
    split: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();

    let output = match output {
        Some(path) => ensure_chin_extension(&path),
        None => default_output_name(&inputs[0]),
    };

    let split_size = match split.as_deref() {
        Some(s) => {
            let size = parse_size(s)?;
            (size > 0).then_some(size)
        }
        None => None,
    };

    let total_size = total_input_size(&inputs)?;
    println!(
        "Packing {} input(s) to '{}'...",
        inputs.len(),
        output.display()
    );

    let mut writer = ChinWriter::create(&output, password.as_deref(), split_size)?;
    let bar = byte_progress_bar(total_size);
    bar.set_message("packing");
    {
        let bar = bar.clone();
        writer.on_progress = Some(Box::new(move |n| bar.inc(n as u64)));
    }
    {
        let bar = bar.clone();
        writer.on_file_start = Some(Box::new(move |name| {
            bar.set_message(format!("packing {}", truncate_label(name)));
        }));
    }

    for input in &inputs {
        let cleaned: PathBuf = input.components().collect();
        let name = cleaned
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| cleaned.to_string_lossy().into_owned());
        writer.add_path(&cleaned, &name)?;
    }
    writer.finalize()?;

    bar.finish();
    println!("\nDone in {:?}", start.elapsed());
    Ok(())
}

fn cmd_unpack(
    archive: PathBuf,
    destination: Option<PathBuf>,
    password: Option<String>,
    wrap: bool,
) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    let input = ensure_chin_extension(&archive);

    let mut dest = destination.unwrap_or_else(|| PathBuf::from("."));
    if wrap {
        dest = wrap_destination(&dest, &input);
    }

    println!("Unpacking '{}' to '{}'...", input.display(), dest.display());

    let mut reader = ChinReader::open(&input, password.as_deref())?;
    let total_size: u64 = reader.list_files().iter().map(|e| e.size).sum();

    let bar = byte_progress_bar(total_size);
    bar.set_message("unpacking");
    {
        let bar = bar.clone();
        reader.on_progress = Some(Box::new(move |n| bar.inc(n as u64)));
    }
    {
        let bar = bar.clone();
        reader.on_file_start = Some(Box::new(move |name| {
            bar.set_message(format!("unpacking {}", truncate_label(name)));
        }));
    }

    reader.extract_all(&dest, true)?;

    bar.finish();
    println!("\nDone in {:?}", start.elapsed());
    Ok(())
}

fn cmd_list(archive: PathBuf, password: Option<String>) -> Result<(), Box<dyn Error>> {
    let input = ensure_chin_extension(&archive);
    let reader = ChinReader::open(&input, password.as_deref())?;

    println!("Archive: {}", input.display());
    if let Some(created) = chrono::DateTime::from_timestamp(reader.metadata().created_at as i64, 0)
    {
        println!("Created: {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("{:<5} {:>12}  {}", "MODE", "SIZE", "NAME");
    for entry in reader.list_files() {
        let mode = if entry.is_dir { "DIR" } else { "FILE" };
        println!("{:<5} {:>12}  {}", mode, entry.size, entry.name);
    }
    println!("\nTotal: {} files", reader.list_files().len());
    println!(
        "Data checksum: {}",
        hex::encode(reader.header().data_checksum)
    );
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn byte_progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg:.green} {bar:40.cyan/blue} {bytes}/{total_bytes}")
            .unwrap()
            .progress_chars("━━─"),
    );
    bar
}

/// Parse a size with an optional KB/MB/GB suffix (base-1024).
fn parse_size(s: &str) -> Result<u64, String> {
    let upper = s.trim().to_uppercase();
    let (digits, multiplier) = if let Some(rest) = upper.strip_suffix("KB") {
        (rest, 1024u64)
    } else if let Some(rest) = upper.strip_suffix("MB") {
        (rest, 1024 * 1024)
    } else if let Some(rest) = upper.strip_suffix("GB") {
        (rest, 1024 * 1024 * 1024)
    } else {
        (upper.as_str(), 1)
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|e| format!("invalid split size '{s}': {e}"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("split size '{s}' overflows"))
}

fn ensure_chin_extension(path: &Path) -> PathBuf {
    if path.to_string_lossy().to_lowercase().ends_with(".chin") {
        return path.to_owned();
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(".chin");
    PathBuf::from(name)
}

fn default_output_name(input: &Path) -> PathBuf {
    let cleaned: PathBuf = input.components().collect();
    let mut name = cleaned.as_os_str().to_os_string();
    name.push(".chin");
    PathBuf::from(name)
}

/// `--wrap`: extract under a folder named after the archive. If a regular
/// file already sits at that path, fall back to `<name>_unpacked`.
fn wrap_destination(dest: &Path, archive: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "archive".into());
    let wrapped = dest.join(&stem);
    match std::fs::metadata(&wrapped) {
        Ok(info) if !info.is_dir() => {
            let mut name = stem;
            name.push("_unpacked");
            dest.join(name)
        }
        _ => wrapped,
    }
}

/// Keep progress labels short enough not to break the bar line.
fn truncate_label(name: &str) -> String {
    const MAX: usize = 30;
    if name.chars().count() <= MAX {
        return name.to_owned();
    }
    let tail: Vec<char> = name.chars().rev().take(MAX - 3).collect();
    let tail: String = tail.into_iter().rev().collect();
    format!("...{tail}")
}

fn total_input_size(paths: &[PathBuf]) -> Result<u64, Box<dyn Error>> {
    let mut total = 0u64;
    for path in paths {
        for entry in WalkDir::new(path) {
            let entry = entry?;
            if entry.file_type().is_file() {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}

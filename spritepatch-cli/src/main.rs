use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use spritepatch_core::rdc::SM_SPRITE_BLOCK_TYPE;
use spritepatch_core::{run, PatcherError, PatcherSettings, RdcDirectory};

#[derive(Debug, Parser)]
#[command(
    name = "spritepatch",
    version,
    about = "Apply the player sprite patch and RDC sprite containers to a Super Metroid ROM"
)]
struct Args {
    /// ROM image to patch.
    #[arg(long)]
    rom: Option<PathBuf>,

    /// IPS patch applied before any sprite container.
    #[arg(long)]
    ips: Option<PathBuf>,

    /// RDC sprite container to place on top of the patched ROM.
    #[arg(long)]
    rdc: Option<PathBuf>,

    /// Output file, or an existing directory for the derived file name.
    #[arg(long)]
    output: Option<PathBuf>,

    /// JSON placement table replacing the built-in sprite layout.
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// JSON settings file. Defaults to SpritePatch/config.json in the user config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// ROM buffer size in bytes (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_size)]
    rom_capacity: Option<usize>,

    /// Require the PATCH header and EOF footer on the IPS file.
    #[arg(long)]
    verify_ips_markers: bool,

    /// File name suffix used when no container is given.
    #[arg(long)]
    suffix: Option<String>,

    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    #[arg(short, long)]
    quiet: bool,

    /// Print the directory and author of an RDC file, then exit without patching.
    #[arg(long, value_name = "RDC")]
    inspect_rdc: Option<PathBuf>,
}

fn parse_size(token: &str) -> Result<usize, String> {
    let t = token.trim();
    let res = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16)
    } else {
        t.parse::<usize>()
    };
    res.map_err(|e| format!("invalid size '{t}': {e}"))
}

fn init_logging(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
}

fn default_config_path() -> Option<PathBuf> {
    let mut base = dirs::config_dir().or_else(dirs::data_dir)?;
    base.push("SpritePatch");
    base.push("config.json");
    Some(base)
}

fn read_config(path: &Path) -> spritepatch_core::Result<PatcherSettings> {
    let text = fs::read_to_string(path)?;
    PatcherSettings::from_json(&text)
}

/// Settings from the config file, if any. An explicit `--config` must load;
/// the per-user `fallback` is skipped when absent or unreadable.
fn load_config(
    explicit: Option<&Path>,
    fallback: Option<PathBuf>,
) -> spritepatch_core::Result<PatcherSettings> {
    if let Some(path) = explicit {
        info!("reading settings from {}", path.display());
        return read_config(path);
    }

    match fallback {
        Some(path) if path.is_file() => match read_config(&path) {
            Ok(settings) => {
                info!("reading settings from {}", path.display());
                Ok(settings)
            }
            Err(err) => {
                warn!("ignoring {}: {err}", path.display());
                Ok(PatcherSettings::default())
            }
        },
        _ => Ok(PatcherSettings::default()),
    }
}

fn build_settings(
    args: Args,
    fallback_config: Option<PathBuf>,
) -> spritepatch_core::Result<PatcherSettings> {
    let mut settings = load_config(args.config.as_deref(), fallback_config)?;

    if let Some(rom) = args.rom {
        settings.rom_path = rom;
    }
    if let Some(ips) = args.ips {
        settings.ips_path = ips;
    }
    if args.rdc.is_some() {
        settings.rdc_path = args.rdc;
    }
    if args.output.is_some() {
        settings.output_path = args.output;
    }
    if args.manifest.is_some() {
        settings.manifest_path = args.manifest;
    }
    if let Some(capacity) = args.rom_capacity {
        settings.rom_capacity = capacity;
    }
    if args.verify_ips_markers {
        settings.verify_ips_markers = true;
    }
    if let Some(suffix) = args.suffix {
        settings.default_suffix = suffix;
    }

    if settings.rom_path.as_os_str().is_empty() {
        return Err(PatcherError::Config("no ROM given (--rom)".to_string()));
    }
    if settings.ips_path.as_os_str().is_empty() {
        return Err(PatcherError::Config("no IPS patch given (--ips)".to_string()));
    }
    Ok(settings)
}

/// Human-readable version, author and directory of an RDC file.
fn inspect_rdc(path: &Path) -> spritepatch_core::Result<String> {
    let data = fs::read(path)?;
    let directory = RdcDirectory::parse(&data)?;

    let mut report = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(report, "{}", path.display());
    let _ = writeln!(report, "  version: {}", directory.version);
    let _ = writeln!(report, "  author:  {}", directory.author);
    let _ = writeln!(report, "  blocks:  {}", directory.entries.len());
    let sprite = directory.find(SM_SPRITE_BLOCK_TYPE);
    for entry in &directory.entries {
        let marker = if Some(*entry) == sprite { " (player sprite)" } else { "" };
        let _ = writeln!(
            report,
            "    type {:>3} at {:#010X}{marker}",
            entry.type_id, entry.offset
        );
    }
    Ok(report)
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    if let Err(e) = init_logging(level) {
        eprintln!("Failed to initialise logging: {e}");
    }

    // Debug path: inspect a container and exit.
    if let Some(rdc_path) = args.inspect_rdc.as_ref() {
        match inspect_rdc(rdc_path) {
            Ok(report) => print!("{report}"),
            Err(e) => {
                error!("Failed to inspect {}: {e}", rdc_path.display());
                std::process::exit(1);
            }
        }
        return;
    }

    let settings = match build_settings(args, default_config_path()) {
        Ok(settings) => settings,
        Err(err) => {
            error!("{err}");
            std::process::exit(2);
        }
    };

    match run(settings) {
        Ok(report) => {
            println!("Wrote {}", report.output_path.display());
            if let Some(author) = report.author.as_deref() {
                println!("Sprite by {author}");
            }
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

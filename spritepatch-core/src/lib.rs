use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod ips;
pub mod manifest;
pub mod rdc;
pub mod rom;

pub use ips::{apply_ips, check_ips_markers, IpsRecord, IpsRecords, IpsSummary};
pub use manifest::{
    find_overlaps, place, plan_placements, Manifest, ManifestEntry, Placement, PlacementSummary,
    Stride,
};
pub use rdc::{locate_sprite_block, BlockEntry, RdcDirectory};
pub use rom::{Rom, SM_ROM_CAPACITY};

/// Problems with the layout of a patch or container file.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("missing header: file does not start with the RDC magic")]
    MissingHeader,

    #[error("unsupported version {found}, expected version {expected}")]
    UnsupportedVersion { found: u8, expected: u8 },

    #[error("sprite block missing: no directory entry of type {type_id}")]
    SpriteBlockMissing { type_id: u32 },

    #[error("missing author terminator: no NUL byte after offset {start:#X}")]
    MissingAuthorTerminator { start: usize },

    #[error("container directory is truncated: need {needed} bytes, file has {available}")]
    TruncatedDirectory { needed: usize, available: usize },

    #[error("IPS {which} marker is missing or wrong")]
    BadIpsMarker { which: &'static str },
}

#[derive(Debug, Error)]
pub enum PatcherError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("{what} out of bounds: {len} bytes at {offset:#X} exceed capacity {capacity:#X}")]
    OutOfBounds {
        what: &'static str,
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("truncated patch: record at {offset:#X} needs {needed} bytes, {available} remain")]
    TruncatedPatch {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PatcherError>;

/// Resolve `offset..offset + len` against a buffer of `capacity` bytes.
pub(crate) fn checked_range(
    what: &'static str,
    offset: usize,
    len: usize,
    capacity: usize,
) -> Result<Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(offset..end),
        _ => Err(PatcherError::OutOfBounds {
            what,
            offset,
            len,
            capacity,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatcherSettings {
    pub rom_path: PathBuf,
    pub ips_path: PathBuf,
    pub rdc_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub rom_capacity: usize,
    pub verify_ips_markers: bool,
    pub default_suffix: String,
}

impl Default for PatcherSettings {
    fn default() -> Self {
        Self {
            rom_path: PathBuf::new(),
            ips_path: PathBuf::new(),
            rdc_path: None,
            output_path: None,
            manifest_path: None,
            rom_capacity: SM_ROM_CAPACITY,
            verify_ips_markers: false,
            default_suffix: "samus".to_string(),
        }
    }
}

impl PatcherSettings {
    /// Parse a settings file. Missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// What a successful [`run`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub output_path: PathBuf,
    pub ips: IpsSummary,
    pub author: Option<String>,
    pub placement: Option<PlacementSummary>,
}

/// Locate the sprite block in `rdc` and scatter it into `rom` following `manifest`.
///
/// Returns the container's author field along with what was placed.
pub fn apply_rdc(rom: &mut Rom, rdc: &[u8], manifest: &Manifest) -> Result<(String, PlacementSummary)> {
    let (offset, author) = locate_sprite_block(rdc)?;
    let block = rdc::block_payload(rdc, offset)?;
    let summary = place(rom, block, manifest)?;
    Ok((author, summary))
}

/// Insert `" - {suffix}"` before the final extension of `name`.
///
/// A name without an extension gets the suffix appended.
pub fn file_name_with_suffix(name: &str, suffix: &str) -> String {
    match name.rfind('.') {
        Some(dot) if dot + 1 < name.len() => {
            format!("{} - {}{}", &name[..dot], suffix, &name[dot..])
        }
        _ => format!("{name} - {suffix}"),
    }
}

/// The part of a container file name before its first `.`.
pub fn suffix_from_container_name(name: &str) -> Option<&str> {
    let stem = name.split('.').next().unwrap_or_default();
    if stem.is_empty() {
        None
    } else {
        Some(stem)
    }
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PatcherError::Config(format!("{} has no file name", path.display())))
}

/// Where the patched ROM is written.
///
/// Without an explicit output the file lands next to the input ROM. An
/// existing directory receives the derived file name; anything else is used
/// verbatim.
pub fn resolve_output_path(rom_path: &Path, output: Option<&Path>, suffix: &str) -> Result<PathBuf> {
    let name = file_name_with_suffix(&file_name_of(rom_path)?, suffix);
    Ok(match output {
        None => rom_path.with_file_name(name),
        Some(dir) if dir.is_dir() => dir.join(name),
        Some(path) => path.to_path_buf(),
    })
}

/// Load the placement table: a JSON file when given, the built-in player sprite layout otherwise.
pub fn load_manifest(path: Option<&Path>) -> Result<Manifest> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            let manifest = Manifest::from_json(&text)?;
            info!(
                "manifest {}: {} entries, {:#X} payload bytes",
                path.display(),
                manifest.entries().len(),
                manifest.payload_len()?
            );
            Ok(manifest)
        }
        None => Ok(Manifest::sm_player_sprite()),
    }
}

pub fn run(settings: PatcherSettings) -> Result<PatchReport> {
    if !settings.rom_path.is_file() {
        return Err(PatcherError::Config(format!(
            "ROM file does not exist: {}",
            settings.rom_path.display()
        )));
    }
    if !settings.ips_path.is_file() {
        return Err(PatcherError::Config(format!(
            "IPS patch does not exist: {}",
            settings.ips_path.display()
        )));
    }

    let image = fs::read(&settings.rom_path)?;
    let mut rom = Rom::from_image(&image, settings.rom_capacity)?;
    info!(
        "loaded {} ({:#X} bytes into a {:#X} byte buffer)",
        settings.rom_path.display(),
        image.len(),
        rom.capacity()
    );

    let patch = fs::read(&settings.ips_path)?;
    if settings.verify_ips_markers {
        check_ips_markers(&patch)?;
    }
    let ips = apply_ips(&mut rom, &patch)?;
    info!(
        "applied {}: {} copy and {} fill records",
        settings.ips_path.display(),
        ips.copies,
        ips.fills
    );

    let (author, placement, suffix) = match settings.rdc_path.as_deref() {
        Some(rdc_path) => {
            let manifest = load_manifest(settings.manifest_path.as_deref())?;
            let rdc = fs::read(rdc_path)?;
            let (author, summary) = apply_rdc(&mut rom, &rdc, &manifest)?;
            info!(
                "placed {} regions from {} (author: {author:?})",
                summary.placements,
                rdc_path.display()
            );

            let rdc_name = file_name_of(rdc_path)?;
            let suffix = match suffix_from_container_name(&rdc_name) {
                Some(stem) => stem.to_string(),
                None => {
                    warn!("cannot derive a suffix from {rdc_name:?}, using the default");
                    settings.default_suffix.clone()
                }
            };
            (Some(author), Some(summary), suffix)
        }
        None => (None, None, settings.default_suffix.clone()),
    };

    let output_path =
        resolve_output_path(&settings.rom_path, settings.output_path.as_deref(), &suffix)?;
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&output_path, rom.as_bytes())?;
    info!("wrote {}", output_path.display());

    Ok(PatchReport {
        output_path,
        ips,
        author,
        placement,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_goes_before_extension() {
        assert_eq!(file_name_with_suffix("Super Metroid.sfc", "samus"), "Super Metroid - samus.sfc");
        assert_eq!(file_name_with_suffix("sm.v1.smc", "link"), "sm.v1 - link.smc");
    }

    #[test]
    fn suffix_is_appended_without_extension() {
        assert_eq!(file_name_with_suffix("rom", "samus"), "rom - samus");
        assert_eq!(file_name_with_suffix("rom.", "samus"), "rom. - samus");
    }

    #[test]
    fn container_suffix_stops_at_first_dot() {
        assert_eq!(suffix_from_container_name("link.v2.rdc"), Some("link"));
        assert_eq!(suffix_from_container_name("ninja"), Some("ninja"));
        assert_eq!(suffix_from_container_name(".rdc"), None);
    }

    #[test]
    fn output_defaults_next_to_rom() {
        let path = resolve_output_path(Path::new("games/sm.sfc"), None, "samus").unwrap();
        assert_eq!(path, PathBuf::from("games/sm - samus.sfc"));
    }

    #[test]
    fn explicit_output_file_is_kept() {
        let path = resolve_output_path(
            Path::new("games/sm.sfc"),
            Some(Path::new("out/custom.sfc")),
            "samus",
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("out/custom.sfc"));
    }

    #[test]
    fn settings_file_keeps_defaults_for_missing_keys() {
        let settings = PatcherSettings::from_json(r#"{ "ips_path": "sprite.ips" }"#).unwrap();
        assert_eq!(settings.ips_path, PathBuf::from("sprite.ips"));
        assert_eq!(settings.rom_capacity, SM_ROM_CAPACITY);
        assert_eq!(settings.default_suffix, "samus");
        assert!(!settings.verify_ips_markers);
    }

    #[test]
    fn saved_settings_load_back_unchanged() {
        let settings = PatcherSettings {
            rom_path: PathBuf::from("sm.sfc"),
            ips_path: PathBuf::from("sprite.ips"),
            rdc_path: Some(PathBuf::from("ninja.rdc")),
            rom_capacity: 0x30_0000,
            verify_ips_markers: true,
            ..PatcherSettings::default()
        };
        let text = serde_json::to_string_pretty(&settings).unwrap();
        assert!(text.contains("\"rom_capacity\": 3145728"));
        assert_eq!(PatcherSettings::from_json(&text).unwrap(), settings);
    }

    #[test]
    fn checked_range_rejects_overflow() {
        assert_eq!(checked_range("x", 2, 3, 5).unwrap(), 2..5);
        assert!(matches!(
            checked_range("x", 3, 3, 5),
            Err(PatcherError::OutOfBounds { offset: 3, len: 3, capacity: 5, .. })
        ));
        assert!(checked_range("x", usize::MAX, 2, usize::MAX).is_err());
    }
}

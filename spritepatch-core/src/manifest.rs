//! Scatter a packed sprite block into a ROM.
//!
//! A [`Manifest`] is the schema of an otherwise opaque block: its entries
//! are laid out back to back in table order, with no padding, and each one
//! says where in the ROM its bytes belong.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::rom::Rom;
use crate::{checked_range, PatcherError, Result};

/// How successive repetitions of an entry are spaced in the ROM.
///
/// Serialised untagged: a number is a uniform stride, an array an offset table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stride {
    /// Repetition `i` lands `step * i` bytes after the destination.
    Uniform(u32),
    /// Repetition `i` lands `table[i]` bytes after the destination.
    Table(Vec<u32>),
}

impl Default for Stride {
    fn default() -> Self {
        Stride::Uniform(0)
    }
}

impl Stride {
    pub fn offset(&self, index: u32) -> Option<u32> {
        match self {
            Stride::Uniform(step) => step.checked_mul(index),
            Stride::Table(table) => table.get(index as usize).copied(),
        }
    }
}

fn default_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub destinations: Vec<u32>,
    pub length: u32,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub stride: Stride,
}

impl ManifestEntry {
    /// One copy of `length` bytes to each destination.
    pub fn new(destinations: impl Into<Vec<u32>>, length: u32) -> Self {
        Self {
            label: None,
            destinations: destinations.into(),
            length,
            count: 1,
            stride: Stride::default(),
        }
    }

    pub fn labelled(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    /// `count` consecutive regions of the block, spaced in the ROM by `stride`.
    pub fn repeated(mut self, count: u32, stride: Stride) -> Self {
        self.count = count;
        self.stride = stride;
        self
    }

    /// Bytes this entry consumes from the block.
    pub fn payload_len(&self) -> Option<usize> {
        (self.length as usize).checked_mul(self.count as usize)
    }

    fn name(&self) -> &str {
        self.label.as_deref().unwrap_or("unnamed")
    }

    fn validate(&self, index: usize) -> Result<()> {
        if let Stride::Table(table) = &self.stride {
            if table.len() < self.count as usize {
                return Err(PatcherError::Config(format!(
                    "manifest entry {index} ({}): {} repetitions but only {} table offsets",
                    self.name(),
                    self.count,
                    table.len()
                )));
            }
        }
        if self.payload_len().is_none() {
            return Err(PatcherError::Config(format!(
                "manifest entry {index} ({}): length * count overflows",
                self.name()
            )));
        }
        Ok(())
    }

    /// Push this entry's placements, reading from `block` at `cursor`.
    fn plan<'a>(&self, block: &'a [u8], cursor: usize, out: &mut Vec<Placement<'a>>) -> Result<()> {
        let length = self.length as usize;
        for &destination in &self.destinations {
            for i in 0..self.count {
                let address = self
                    .stride
                    .offset(i)
                    .and_then(|offset| destination.checked_add(offset))
                    .ok_or(PatcherError::OutOfBounds {
                        what: "placement address",
                        offset: destination as usize,
                        len: length,
                        capacity: u32::MAX as usize,
                    })?;
                let src_start = length
                    .checked_mul(i as usize)
                    .and_then(|rel| rel.checked_add(cursor))
                    .unwrap_or(usize::MAX);
                let src = checked_range("sprite block", src_start, length, block.len())?;
                out.push(Placement {
                    address,
                    data: &block[src],
                });
            }
        }
        Ok(())
    }
}

/// An ordered placement table, validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ManifestEntry>", into = "Vec<ManifestEntry>")]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl TryFrom<Vec<ManifestEntry>> for Manifest {
    type Error = PatcherError;

    fn try_from(entries: Vec<ManifestEntry>) -> Result<Self> {
        Self::new(entries)
    }
}

impl From<Manifest> for Vec<ManifestEntry> {
    fn from(manifest: Manifest) -> Self {
        manifest.entries
    }
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Result<Self> {
        for (index, entry) in entries.iter().enumerate() {
            entry.validate(index)?;
        }
        let manifest = Self { entries };
        manifest.payload_len()?;
        Ok(manifest)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Total bytes the manifest reads from a block.
    pub fn payload_len(&self) -> Result<usize> {
        self.entries
            .iter()
            .try_fold(0usize, |total, entry| {
                entry.payload_len().and_then(|len| total.checked_add(len))
            })
            .ok_or_else(|| PatcherError::Config("manifest payload length overflows".to_string()))
    }

    /// Layout of the Super Metroid player sprite block (RDC block type 4).
    pub fn sm_player_sprite() -> Self {
        use Stride::{Table, Uniform};

        const LOADER_OFFSETS: [u32; 9] = [0x0, 0x24, 0x4F, 0x73, 0x9E, 0xC2, 0xED, 0x111, 0x139];
        let loader = || Table(LOADER_OFFSETS.to_vec());
        let e = |label: &str, destinations: &[u32], length: u32| {
            ManifestEntry::new(destinations, length).labelled(label)
        };

        let entries = vec![
            e("DMA bank 1", &[0xE0000], 0x7D80),
            e("DMA bank 2", &[0xE8000], 0x7E00),
            e("DMA bank 3", &[0xF0000], 0x7D80),
            e("DMA bank 4", &[0xF8000], 0x7F00),
            e("DMA bank 5", &[0x3A8000], 0x7EC0),
            e("DMA bank 6", &[0x3B0000], 0x7E80),
            e("DMA bank 7", &[0x3B8000], 0x7F80),
            e("DMA bank 8", &[0x3C0000], 0x8000),
            e("DMA bank 9", &[0x3C8000], 0x8000),
            e("DMA bank 10", &[0x3D0000], 0x7F00),
            e("DMA bank 11", &[0x3D8000], 0x7F00),
            e("DMA bank 12", &[0x3E0000], 0x7F00),
            e("DMA bank 13", &[0x3E8000], 0x7D40),
            e("DMA bank 14", &[0x3F0000], 0x7D80),
            e("DMA bank 15", &[0xD8200], 0xC00),
            e("death pose left", &[0x3F8000], 0x4000),
            e("death pose right", &[0x3FC000], 0x4000),
            e("gun port", &[0xD1A00], 0x3C0),
            e("file select sprites", &[0x1B5A00], 0x600),
            e("file select missile", &[0x1B5900], 0x20),
            e("file select missile head", &[0x1B5980], 0x20),
            // Palettes: 15 colours of 2 bytes unless noted.
            e("power suit", &[0xD9402], 30),
            e("varia suit", &[0xD9522], 30),
            e("gravity suit", &[0xD9802], 30),
            e("power loader", &[0x6DB6D], 30).repeated(9, loader()),
            e("varia loader", &[0x6DCD3], 30).repeated(9, loader()),
            e("gravity loader", &[0x6DE39], 30).repeated(9, loader()),
            e("power heat", &[0x6E468], 30).repeated(16, Uniform(0x22)),
            e("varia heat", &[0x6E694], 30).repeated(16, Uniform(0x22)),
            e("gravity heat", &[0x6E8C0], 30).repeated(16, Uniform(0x22)),
            e("power charge", &[0xD9822], 30).repeated(8, Uniform(0x20)),
            e("varia charge", &[0xD9922], 30).repeated(8, Uniform(0x20)),
            e("gravity charge", &[0xD9A22], 30).repeated(8, Uniform(0x20)),
            e("power speed boost", &[0xD9B22], 30).repeated(4, Uniform(0x20)),
            e("varia speed boost", &[0xD9D22], 30).repeated(4, Uniform(0x20)),
            e("gravity speed boost", &[0xD9F22], 30).repeated(4, Uniform(0x20)),
            e("power speed squat", &[0xD9BA2], 30).repeated(4, Uniform(0x20)),
            e("varia speed squat", &[0xD9DA2], 30).repeated(4, Uniform(0x20)),
            e("gravity speed squat", &[0xD9FA2], 30).repeated(4, Uniform(0x20)),
            e("power shinespark", &[0xD9C22], 30).repeated(4, Uniform(0x20)),
            e("varia shinespark", &[0xD9E22], 30).repeated(4, Uniform(0x20)),
            e("gravity shinespark", &[0xDA022], 30).repeated(4, Uniform(0x20)),
            e("power screw attack", &[0xD9CA2], 30).repeated(4, Uniform(0x20)),
            e("varia screw attack", &[0xD9EA2], 30).repeated(4, Uniform(0x20)),
            e("gravity screw attack", &[0xDA0A2], 30).repeated(4, Uniform(0x20)),
            e("crystal flash", &[0xD96C2], 30).repeated(6, Uniform(0x20)),
            e("death", &[0xDA122], 30).repeated(9, Uniform(0x20)),
            e("hyper beam", &[0xDA242], 30).repeated(10, Uniform(0x20)),
            e("sepia", &[0xDA3A2, 0x6656B], 30),
            e("sepia hurt", &[0xDA382], 30),
            e("x-ray", &[0xDA3C6], 6),
            e("door visor", &[0x1652C], 2),
            e("file select", &[0x765E2], 30),
            e("ship intro", &[0x6668B], 30),
            e("ship outro", &[0x6D6C2], 30).repeated(16, Uniform(0x24)),
            e("ship", &[0x1125A0], 28),
            e("ship glow", &[0x6CA54], 2).repeated(14, Uniform(0x6)),
        ];

        Self { entries }
    }
}

/// One region of the block and the ROM address it is copied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement<'a> {
    pub address: u32,
    pub data: &'a [u8],
}

impl Placement<'_> {
    pub fn end(&self) -> u64 {
        self.address as u64 + self.data.len() as u64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementSummary {
    pub placements: usize,
    pub bytes_consumed: usize,
    pub bytes_written: usize,
    pub overlaps: usize,
}

/// Resolve every `(destination, repetition)` of `manifest` against `block`.
///
/// Fails with [`PatcherError::OutOfBounds`] if the block is shorter than
/// the manifest needs. Nothing is written anywhere.
pub fn plan_placements<'a>(block: &'a [u8], manifest: &Manifest) -> Result<Vec<Placement<'a>>> {
    let needed = manifest.payload_len()?;
    checked_range("sprite block", 0, needed, block.len())?;

    let (consumed, placements) = manifest.entries().iter().try_fold(
        (0usize, Vec::new()),
        |(cursor, mut placements), entry| -> Result<_> {
            entry.plan(block, cursor, &mut placements)?;
            // Validated on construction; cannot overflow.
            let advance = entry.payload_len().unwrap_or(usize::MAX);
            debug!(
                "manifest entry {:?}: {advance:#X} bytes at block offset {cursor:#X}",
                entry.name()
            );
            Ok((cursor.saturating_add(advance), placements))
        },
    )?;
    debug_assert_eq!(consumed, needed);

    Ok(placements)
}

/// Every pair of placement indices whose ROM ranges overlap, as `(lower, higher)`
/// index pairs in ascending order. Empty placements overlap nothing.
pub fn find_overlaps(placements: &[Placement<'_>]) -> Vec<(usize, usize)> {
    let mut order: Vec<usize> = (0..placements.len())
        .filter(|&i| !placements[i].data.is_empty())
        .collect();
    order.sort_by_key(|&i| (placements[i].address, placements[i].data.len()));

    let mut overlaps = Vec::new();
    // Placements whose range has not ended at the current start address.
    let mut active: Vec<usize> = Vec::new();
    for &i in &order {
        let start = placements[i].address as u64;
        active.retain(|&a| placements[a].end() > start);
        overlaps.extend(active.iter().map(|&a| (a.min(i), a.max(i))));
        active.push(i);
    }
    overlaps.sort_unstable();
    overlaps
}

/// Copy the regions described by `manifest` from `block` into `rom`.
///
/// Every destination range is checked before the first write, so an
/// out-of-range manifest leaves the ROM untouched.
pub fn place(rom: &mut Rom, block: &[u8], manifest: &Manifest) -> Result<PlacementSummary> {
    let placements = plan_placements(block, manifest)?;
    for placement in &placements {
        rom.check_range(placement.address as usize, placement.data.len())?;
    }

    let overlaps = find_overlaps(&placements);
    for &(a, b) in &overlaps {
        warn!(
            "placements overlap: {:#X}+{:#X} and {:#X}+{:#X}",
            placements[a].address,
            placements[a].data.len(),
            placements[b].address,
            placements[b].data.len()
        );
    }

    let mut bytes_written = 0;
    for placement in &placements {
        rom.write_n(placement.address as usize, placement.data)?;
        bytes_written += placement.data.len();
    }

    Ok(PlacementSummary {
        placements: placements.len(),
        bytes_consumed: manifest.payload_len()?,
        bytes_written,
        overlaps: overlaps.len(),
    })
}

//! Retro Data Container (RDC) files.
//!
//! ```text
//! "RETRODATACONTAINER"   18 bytes
//! version                 1 byte
//! block count             u32 LE
//! (type, offset) * count  u32 LE pairs, offset absolute from file start
//! block payloads          ...
//! author                  UTF-8, NUL-terminated, directly after the directory
//! ```

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::{checked_range, FormatError, PatcherError, Result};

pub const RDC_MAGIC: &[u8; 18] = b"RETRODATACONTAINER";
pub const RDC_VERSION: u8 = 1;

/// Block type of the Super Metroid player sprite data.
pub const SM_SPRITE_BLOCK_TYPE: u32 = 4;

const VERSION_OFFSET: usize = RDC_MAGIC.len();
const BLOCK_COUNT_OFFSET: usize = VERSION_OFFSET + 1;
const DIRECTORY_OFFSET: usize = BLOCK_COUNT_OFFSET + 4;
const DIRECTORY_ENTRY_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    pub type_id: u32,
    pub offset: u32,
}

/// Header, directory and author of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdcDirectory {
    pub version: u8,
    pub entries: Vec<BlockEntry>,
    pub author: String,
}

impl RdcDirectory {
    pub fn parse(rdc: &[u8]) -> Result<Self> {
        let version = read_version(rdc)?;
        let (entries, directory_end) = read_entries(rdc)?;
        let author = read_author(rdc, directory_end)?;
        Ok(Self {
            version,
            entries,
            author,
        })
    }

    /// First entry of the given type, in directory order.
    pub fn find(&self, type_id: u32) -> Option<BlockEntry> {
        first_of_type(&self.entries, type_id)
    }
}

/// Find the sprite block and the author field of a container.
///
/// Returns the absolute offset of the sprite block payload. Only the first
/// directory entry of the sprite type counts; later ones are ignored.
pub fn locate_sprite_block(rdc: &[u8]) -> Result<(u32, String)> {
    read_version(rdc)?;
    let (entries, directory_end) = read_entries(rdc)?;
    let block = first_of_type(&entries, SM_SPRITE_BLOCK_TYPE).ok_or(
        FormatError::SpriteBlockMissing {
            type_id: SM_SPRITE_BLOCK_TYPE,
        },
    )?;
    let author = read_author(rdc, directory_end)?;
    debug!("sprite block at {:#X}, author {author:?}", block.offset);
    Ok((block.offset, author))
}

/// The container bytes from a block's offset to the end of the file.
///
/// The directory carries no lengths, so the slice is open-ended; the
/// manifest decides how much of it is used.
pub fn block_payload(rdc: &[u8], offset: u32) -> Result<&[u8]> {
    let start = offset as usize;
    let range = checked_range("block offset", start, 0, rdc.len())?;
    Ok(&rdc[range.start..])
}

fn read_version(rdc: &[u8]) -> Result<u8> {
    if rdc.get(..RDC_MAGIC.len()) != Some(RDC_MAGIC.as_slice()) {
        return Err(FormatError::MissingHeader.into());
    }
    let found = *rdc.get(VERSION_OFFSET).ok_or(FormatError::TruncatedDirectory {
        needed: VERSION_OFFSET + 1,
        available: rdc.len(),
    })?;
    if found != RDC_VERSION {
        return Err(FormatError::UnsupportedVersion {
            found,
            expected: RDC_VERSION,
        }
        .into());
    }
    Ok(found)
}

/// Directory entries and the offset just past the directory.
fn read_entries(rdc: &[u8]) -> Result<(Vec<BlockEntry>, usize)> {
    let truncated = |needed: usize| -> PatcherError {
        FormatError::TruncatedDirectory {
            needed,
            available: rdc.len(),
        }
        .into()
    };

    let count_bytes = rdc
        .get(BLOCK_COUNT_OFFSET..DIRECTORY_OFFSET)
        .ok_or_else(|| truncated(DIRECTORY_OFFSET))?;
    let count = LittleEndian::read_u32(count_bytes) as usize;

    let directory_end = count
        .checked_mul(DIRECTORY_ENTRY_LEN)
        .and_then(|len| len.checked_add(DIRECTORY_OFFSET))
        .ok_or_else(|| truncated(usize::MAX))?;
    let directory = rdc
        .get(DIRECTORY_OFFSET..directory_end)
        .ok_or_else(|| truncated(directory_end))?;

    let entries = directory
        .chunks_exact(DIRECTORY_ENTRY_LEN)
        .enumerate()
        .map(|(i, raw)| {
            let entry = BlockEntry {
                type_id: LittleEndian::read_u32(&raw[0..4]),
                offset: LittleEndian::read_u32(&raw[4..8]),
            };
            debug!("rdc block {i}: type {} at {:#X}", entry.type_id, entry.offset);
            entry
        })
        .collect();

    Ok((entries, directory_end))
}

fn read_author(rdc: &[u8], start: usize) -> Result<String> {
    let field = rdc.get(start..).unwrap_or_default();
    let end = field
        .iter()
        .position(|&b| b == 0)
        .ok_or(FormatError::MissingAuthorTerminator { start })?;
    Ok(String::from_utf8_lossy(&field[..end]).into_owned())
}

fn first_of_type(entries: &[BlockEntry], type_id: u32) -> Option<BlockEntry> {
    entries.iter().copied().find(|e| e.type_id == type_id)
}

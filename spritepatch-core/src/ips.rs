//! IPS delta patches.
//!
//! Layout: a 5-byte header, any number of records, then a 3-byte footer.
//! Each record is a 3-byte big-endian destination and a 2-byte big-endian
//! length followed by `length` data bytes. A zero length marks a run-length
//! record instead: a 2-byte big-endian run length and the fill byte.
//!
//! Neither the header nor the footer is decoded as a record. Their contents
//! are only compared against `PATCH` / `EOF` by [`check_ips_markers`].

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::rom::Rom;
use crate::{FormatError, PatcherError, Result};

pub const IPS_HEADER_LEN: usize = 5;
pub const IPS_FOOTER_LEN: usize = 3;
pub const IPS_HEADER_MAGIC: &[u8; IPS_HEADER_LEN] = b"PATCH";
pub const IPS_FOOTER_MAGIC: &[u8; IPS_FOOTER_LEN] = b"EOF";

// dest(3) + length(2)
const RECORD_HEADER_LEN: usize = 5;
// run_length(2) + value(1)
const FILL_BODY_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpsRecord<'a> {
    Copy { dest: u32, data: &'a [u8] },
    Fill { dest: u32, run_length: u16, value: u8 },
}

impl IpsRecord<'_> {
    pub fn dest(&self) -> u32 {
        match *self {
            IpsRecord::Copy { dest, .. } | IpsRecord::Fill { dest, .. } => dest,
        }
    }

    /// Number of ROM bytes the record writes.
    pub fn len(&self) -> usize {
        match *self {
            IpsRecord::Copy { data, .. } => data.len(),
            IpsRecord::Fill { run_length, .. } => run_length as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn apply(&self, rom: &mut Rom) -> Result<()> {
        match *self {
            IpsRecord::Copy { dest, data } => rom.write_n(dest as usize, data),
            IpsRecord::Fill {
                dest,
                run_length,
                value,
            } => rom.fill(dest as usize, run_length as usize, value),
        }
    }
}

/// Decodes the records of a patch one at a time.
///
/// Iteration stops once no more than the footer remains. A record that runs
/// past the end of the patch yields [`PatcherError::TruncatedPatch`] and ends
/// the iteration.
pub struct IpsRecords<'a> {
    patch: &'a [u8],
    cursor: usize,
    failed: bool,
}

impl<'a> IpsRecords<'a> {
    pub fn new(patch: &'a [u8]) -> Self {
        Self {
            patch,
            cursor: IPS_HEADER_LEN,
            failed: false,
        }
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> usize {
        self.cursor
    }

    fn take(&mut self, record_start: usize, len: usize) -> Result<&'a [u8]> {
        let available = self.patch.len().saturating_sub(self.cursor);
        if len > available {
            return Err(PatcherError::TruncatedPatch {
                offset: record_start,
                needed: self.cursor - record_start + len,
                available: self.patch.len() - record_start,
            });
        }
        let bytes = &self.patch[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(bytes)
    }

    fn decode(&mut self) -> Result<IpsRecord<'a>> {
        let start = self.cursor;
        let header = self.take(start, RECORD_HEADER_LEN)?;
        let dest = BigEndian::read_u24(&header[0..3]);
        let length = BigEndian::read_u16(&header[3..5]);

        if length > 0 {
            let data = self.take(start, length as usize)?;
            Ok(IpsRecord::Copy { dest, data })
        } else {
            let body = self.take(start, FILL_BODY_LEN)?;
            Ok(IpsRecord::Fill {
                dest,
                run_length: BigEndian::read_u16(&body[0..2]),
                value: body[2],
            })
        }
    }
}

impl<'a> Iterator for IpsRecords<'a> {
    type Item = Result<IpsRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor + IPS_FOOTER_LEN >= self.patch.len() {
            return None;
        }
        let record = self.decode();
        self.failed = record.is_err();
        Some(record)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpsSummary {
    pub copies: usize,
    pub fills: usize,
    pub bytes_written: usize,
}

/// Apply every record of `patch` to `rom`, in patch order.
///
/// On error the ROM keeps the records applied so far and should be discarded.
pub fn apply_ips(rom: &mut Rom, patch: &[u8]) -> Result<IpsSummary> {
    let mut summary = IpsSummary::default();
    let mut records = IpsRecords::new(patch);

    loop {
        let at = records.offset();
        let Some(record) = records.next().transpose()? else {
            break;
        };
        debug!(
            "ips record at {at:#X}: {} {} bytes to {:#08X}",
            kind(&record),
            record.len(),
            record.dest()
        );
        record.apply(rom)?;

        match record {
            IpsRecord::Copy { .. } => summary.copies += 1,
            IpsRecord::Fill { .. } => summary.fills += 1,
        }
        summary.bytes_written += record.len();
    }

    Ok(summary)
}

fn kind(record: &IpsRecord<'_>) -> &'static str {
    match record {
        IpsRecord::Copy { .. } => "copy",
        IpsRecord::Fill { .. } => "fill",
    }
}

/// Check the `PATCH` header and `EOF` footer of a patch.
pub fn check_ips_markers(patch: &[u8]) -> Result<()> {
    if !patch.starts_with(IPS_HEADER_MAGIC) {
        return Err(FormatError::BadIpsMarker { which: "header" }.into());
    }
    if patch.len() < IPS_HEADER_LEN + IPS_FOOTER_LEN || !patch.ends_with(IPS_FOOTER_MAGIC) {
        return Err(FormatError::BadIpsMarker { which: "footer" }.into());
    }
    Ok(())
}

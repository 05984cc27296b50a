//! Binary encoding shared between the index builder and the read-only
//! index reader (§4.2 "on-disk layout").

use anyhow::{bail, Context, Result};

use crate::content_id::{ContentID, PackFile};

use super::entry::{Info, Payload};

pub const MAGIC: [u8; 8] = *b"BKIDX1\0\0";
pub const HEADER_LEN: usize = 16;

const FLAG_DELETED: u8 = 1 << 0;
const FLAG_INLINE: u8 = 1 << 1;
const FLAG_PACKED: u8 = 1 << 2;

pub fn write_header(out: &mut Vec<u8>, entry_count: u32) {
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&entry_count.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]); // reserved
}

pub fn write_entry(out: &mut Vec<u8>, info: &Info) {
    let id_bytes = info.block_id.as_str().as_bytes();
    out.push(id_bytes.len() as u8);
    out.extend_from_slice(id_bytes);
    out.extend_from_slice(&info.timestamp_seconds.to_le_bytes());

    let mut flags = 0u8;
    if info.deleted {
        flags |= FLAG_DELETED;
    }
    match &info.payload {
        Payload::Inline(_) => flags |= FLAG_INLINE,
        Payload::Packed { .. } => flags |= FLAG_PACKED,
        Payload::None => {}
    }
    out.push(flags);

    match &info.payload {
        Payload::Inline(bytes) => {
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(bytes);
        }
        Payload::Packed {
            pack_file,
            pack_offset,
            length,
            format_version,
        } => {
            let name = pack_file.as_str().as_bytes();
            out.push(name.len() as u8);
            out.extend_from_slice(name);
            out.extend_from_slice(&pack_offset.to_le_bytes());
            out.extend_from_slice(&length.to_le_bytes());
            out.push(*format_version);
        }
        Payload::None => {}
    }
}

pub struct ParsedHeader {
    pub entry_count: u32,
}

pub fn read_header(buf: &[u8]) -> Result<ParsedHeader> {
    if buf.len() < HEADER_LEN {
        bail!("index block truncated: shorter than header");
    }
    if buf[0..8] != MAGIC {
        bail!("index block has unknown magic");
    }
    let entry_count = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    Ok(ParsedHeader { entry_count })
}

/// Parse all entries following the header. Returns the entries in the order
/// they were encoded (the builder always encodes in ascending `ContentID`
/// order).
pub fn read_entries(buf: &[u8], entry_count: u32) -> Result<Vec<Info>> {
    let mut pos = HEADER_LEN;
    let mut out = Vec::with_capacity(entry_count as usize);

    for _ in 0..entry_count {
        let id_len = *buf.get(pos).context("truncated entry: id length")? as usize;
        pos += 1;
        let id_bytes = buf
            .get(pos..pos + id_len)
            .context("truncated entry: id bytes")?;
        let block_id = ContentID::parse(
            std::str::from_utf8(id_bytes).context("block id is not valid utf8")?,
        )
        .map_err(|e| anyhow::anyhow!(e))?;
        pos += id_len;

        let ts_bytes = buf
            .get(pos..pos + 8)
            .context("truncated entry: timestamp")?;
        let timestamp_seconds = u64::from_le_bytes(ts_bytes.try_into().unwrap());
        pos += 8;

        let flags = *buf.get(pos).context("truncated entry: flags")?;
        pos += 1;

        let deleted = flags & FLAG_DELETED != 0;

        let payload = if flags & FLAG_INLINE != 0 {
            let len_bytes = buf
                .get(pos..pos + 4)
                .context("truncated entry: inline length")?;
            let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
            pos += 4;
            let bytes = buf
                .get(pos..pos + len)
                .context("truncated entry: inline payload")?
                .to_vec();
            pos += len;
            Payload::Inline(bytes)
        } else if flags & FLAG_PACKED != 0 {
            let name_len = *buf.get(pos).context("truncated entry: pack name length")? as usize;
            pos += 1;
            let name_bytes = buf
                .get(pos..pos + name_len)
                .context("truncated entry: pack name")?;
            let pack_file = PackFile::new(
                std::str::from_utf8(name_bytes).context("pack file name is not valid utf8")?,
            )
            .map_err(|e| anyhow::anyhow!(e))?;
            pos += name_len;

            let pack_offset = u32::from_le_bytes(
                buf.get(pos..pos + 4)
                    .context("truncated entry: pack offset")?
                    .try_into()
                    .unwrap(),
            );
            pos += 4;
            let length = u32::from_le_bytes(
                buf.get(pos..pos + 4)
                    .context("truncated entry: pack length")?
                    .try_into()
                    .unwrap(),
            );
            pos += 4;
            let format_version = *buf.get(pos).context("truncated entry: format version")?;
            pos += 1;

            Payload::Packed {
                pack_file,
                pack_offset,
                length,
                format_version,
            }
        } else {
            Payload::None
        };

        out.push(Info {
            block_id,
            timestamp_seconds,
            deleted,
            payload,
        });
    }

    Ok(out)
}

// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Android sparse images: streaming decode and encode.
//!
//! The decoder is a single pass over a reader, emitting write/skip events
//! with strictly non-decreasing offsets; the final offset always equals
//! `total_blocks * block_size`. It never materializes the expanded image.

use std::io::Read;

use crc::Digest;

use crate::checksum::CRC32;
use crate::error::StorageError;

pub const SPARSE_MAGIC: u32 = 0xED26_FF3A;

const FILE_HEADER_LEN: usize = 28;
const CHUNK_HEADER_LEN: usize = 12;

const CHUNK_RAW: u16 = 0xCAC1;
const CHUNK_FILL: u16 = 0xCAC2;
const CHUNK_DONT_CARE: u16 = 0xCAC3;
const CHUNK_CRC32: u16 = 0xCAC4;

/// Largest single `Write` event. Big RAW/FILL chunks are split.
const MAX_EVENT_BYTES: usize = 0x100000;

fn malformed(reason: impl Into<String>) -> StorageError {
    StorageError::Malformed {
        layout: "sparse image",
        reason: reason.into(),
    }
}

/// Does this buffer start with a sparse image header?
pub fn is_sparse(data: &[u8]) -> bool {
    data.len() >= 4 && u32::from_le_bytes(data[..4].try_into().unwrap()) == SPARSE_MAGIC
}

/// Event produced by one decoding step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SparseEvent {
    /// Write `data` at absolute byte `offset`.
    Write { offset: u64, data: Vec<u8> },
    /// Advance to `offset` without writing (DONT_CARE on pre-erased
    /// flash; expand to zeros otherwise).
    SkipTo { offset: u64 },
}

/// Parsed 28-byte file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseHeader {
    pub block_size: u32,
    pub total_blocks: u32,
    pub total_chunks: u32,
    pub image_checksum: u32,
}

impl SparseHeader {
    pub fn expanded_len(&self) -> u64 {
        self.total_blocks as u64 * self.block_size as u64
    }
}

/// Streaming sparse decoder.
pub struct SparseReader<R: Read> {
    input: R,
    header: SparseHeader,
    chunks_done: u32,
    blocks_done: u64,
    /// Byte offset the next event starts at.
    offset: u64,
    /// Remaining bytes of an in-progress RAW chunk.
    raw_remaining: u64,
    /// Remaining bytes and pattern of an in-progress FILL chunk.
    fill_remaining: u64,
    fill_pattern: [u8; 4],
    crc: Digest<'static, u32>,
}

impl<R: Read> SparseReader<R> {
    pub fn new(mut input: R) -> Result<Self, StorageError> {
        let mut hdr = [0u8; FILE_HEADER_LEN];
        input
            .read_exact(&mut hdr)
            .map_err(|e| malformed(format!("header read: {e}")))?;
        let u16_at = |i: usize| u16::from_le_bytes(hdr[i..i + 2].try_into().unwrap());
        let u32_at = |i: usize| u32::from_le_bytes(hdr[i..i + 4].try_into().unwrap());

        if u32_at(0) != SPARSE_MAGIC {
            return Err(malformed("bad magic"));
        }
        if (u16_at(4), u16_at(6)) != (1, 0) {
            return Err(malformed(format!("unsupported version {}.{}", u16_at(4), u16_at(6))));
        }
        if u16_at(8) as usize != FILE_HEADER_LEN || u16_at(10) as usize != CHUNK_HEADER_LEN {
            return Err(malformed("header sizes disagree with version 1.0"));
        }
        let block_size = u32_at(12);
        if block_size == 0 || block_size % 4 != 0 {
            return Err(malformed(format!("block size {block_size} not a multiple of 4")));
        }
        Ok(SparseReader {
            input,
            header: SparseHeader {
                block_size,
                total_blocks: u32_at(16),
                total_chunks: u32_at(20),
                image_checksum: u32_at(24),
            },
            chunks_done: 0,
            blocks_done: 0,
            offset: 0,
            raw_remaining: 0,
            fill_remaining: 0,
            fill_pattern: [0; 4],
            crc: CRC32.digest(),
        })
    }

    pub fn header(&self) -> &SparseHeader {
        &self.header
    }

    /// Next event, or `None` once the image is fully decoded.
    pub fn next_event(&mut self) -> Result<Option<SparseEvent>, StorageError> {
        // Drain an in-progress RAW or FILL chunk first.
        if self.raw_remaining > 0 {
            let take = (self.raw_remaining as usize).min(MAX_EVENT_BYTES);
            let mut data = vec![0u8; take];
            self.input
                .read_exact(&mut data)
                .map_err(|e| malformed(format!("raw body read: {e}")))?;
            self.crc.update(&data);
            let offset = self.offset;
            self.offset += take as u64;
            self.raw_remaining -= take as u64;
            return Ok(Some(SparseEvent::Write { offset, data }));
        }
        if self.fill_remaining > 0 {
            let take = (self.fill_remaining as usize).min(MAX_EVENT_BYTES);
            let mut data = Vec::with_capacity(take);
            while data.len() < take {
                data.extend_from_slice(&self.fill_pattern);
            }
            self.crc.update(&data);
            let offset = self.offset;
            self.offset += take as u64;
            self.fill_remaining -= take as u64;
            return Ok(Some(SparseEvent::Write { offset, data }));
        }

        loop {
            if self.chunks_done == self.header.total_chunks {
                if self.blocks_done != self.header.total_blocks as u64 {
                    return Err(malformed(format!(
                        "chunks cover {} blocks, header promises {}",
                        self.blocks_done, self.header.total_blocks
                    )));
                }
                return Ok(None);
            }

            let mut hdr = [0u8; CHUNK_HEADER_LEN];
            self.input
                .read_exact(&mut hdr)
                .map_err(|e| malformed(format!("chunk header read: {e}")))?;
            let chunk_type = u16::from_le_bytes(hdr[0..2].try_into().unwrap());
            let chunk_blocks = u32::from_le_bytes(hdr[4..8].try_into().unwrap()) as u64;
            let total_sz = u32::from_le_bytes(hdr[8..12].try_into().unwrap()) as u64;
            self.chunks_done += 1;

            let bs = self.header.block_size as u64;
            let body = chunk_blocks * bs;

            match chunk_type {
                CHUNK_RAW => {
                    self.expect_blocks(chunk_blocks)?;
                    if total_sz != CHUNK_HEADER_LEN as u64 + body {
                        return Err(malformed("RAW chunk length disagrees with its blocks"));
                    }
                    self.blocks_done += chunk_blocks;
                    self.raw_remaining = body;
                    return self.next_event();
                }
                CHUNK_FILL => {
                    self.expect_blocks(chunk_blocks)?;
                    if total_sz != CHUNK_HEADER_LEN as u64 + 4 {
                        return Err(malformed("FILL chunk must carry one u32"));
                    }
                    let mut pattern = [0u8; 4];
                    self.input
                        .read_exact(&mut pattern)
                        .map_err(|e| malformed(format!("fill value read: {e}")))?;
                    self.blocks_done += chunk_blocks;
                    self.fill_pattern = pattern;
                    self.fill_remaining = body;
                    return self.next_event();
                }
                CHUNK_DONT_CARE => {
                    self.expect_blocks(chunk_blocks)?;
                    if total_sz != CHUNK_HEADER_LEN as u64 {
                        return Err(malformed("DONT_CARE chunk carries no body"));
                    }
                    self.blocks_done += chunk_blocks;
                    // Skipped ranges count as zeros in the running CRC.
                    let zeros = [0u8; 4096];
                    let mut left = body;
                    while left > 0 {
                        let n = (left as usize).min(zeros.len());
                        self.crc.update(&zeros[..n]);
                        left -= n as u64;
                    }
                    self.offset += body;
                    return Ok(Some(SparseEvent::SkipTo { offset: self.offset }));
                }
                CHUNK_CRC32 => {
                    if total_sz != CHUNK_HEADER_LEN as u64 + 4 || chunk_blocks != 0 {
                        return Err(malformed("CRC32 chunk must be 0 blocks + one u32"));
                    }
                    let mut val = [0u8; 4];
                    self.input
                        .read_exact(&mut val)
                        .map_err(|e| malformed(format!("crc value read: {e}")))?;
                    let stored = u32::from_le_bytes(val);
                    let computed = self.crc.clone().finalize();
                    if stored != computed {
                        return Err(malformed(format!(
                            "CRC32 mismatch: computed {computed:#010x}, stored {stored:#010x}"
                        )));
                    }
                    // Produces no output; keep going.
                }
                t => return Err(malformed(format!("unknown chunk type {t:#06x}"))),
            }
        }
    }

    fn expect_blocks(&self, chunk_blocks: u64) -> Result<(), StorageError> {
        if chunk_blocks == 0 {
            return Err(malformed("zero-block chunk"));
        }
        if self.blocks_done + chunk_blocks > self.header.total_blocks as u64 {
            return Err(malformed("chunks exceed the promised total blocks"));
        }
        Ok(())
    }
}

/// Decode an entire sparse buffer to its raw expansion (tests, small
/// images). Skipped ranges become zeros.
pub fn decode_to_vec(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut reader = SparseReader::new(data)?;
    let mut out = vec![0u8; reader.header().expanded_len() as usize];
    while let Some(event) = reader.next_event()? {
        if let SparseEvent::Write { offset, data } = event {
            out[offset as usize..offset as usize + data.len()].copy_from_slice(&data);
        }
    }
    Ok(out)
}

/// Encode a raw image, emitting RAW / FILL / DONT_CARE runs.
///
/// `raw.len()` must be a multiple of `block_size`. Zero blocks become
/// DONT_CARE, single-pattern blocks become FILL, everything else RAW;
/// zero-block chunks are never produced.
pub fn encode(raw: &[u8], block_size: u32) -> Result<Vec<u8>, StorageError> {
    if block_size == 0 || block_size % 4 != 0 {
        return Err(malformed(format!("block size {block_size} not a multiple of 4")));
    }
    let bs = block_size as usize;
    if raw.len() % bs != 0 {
        return Err(StorageError::SizeMismatch {
            expected: (raw.len().div_ceil(bs) * bs) as u64,
            actual: raw.len() as u64,
        });
    }
    let total_blocks = (raw.len() / bs) as u32;

    #[derive(PartialEq, Clone, Copy)]
    enum Kind {
        DontCare,
        Fill([u8; 4]),
        Raw,
    }

    let classify = |block: &[u8]| -> Kind {
        if block.iter().all(|&b| b == 0) {
            return Kind::DontCare;
        }
        let pattern: [u8; 4] = block[..4].try_into().unwrap();
        if block.chunks_exact(4).all(|c| c == pattern) {
            Kind::Fill(pattern)
        } else {
            Kind::Raw
        }
    };

    let mut chunks: Vec<(Kind, usize, usize)> = Vec::new(); // kind, first block, count
    for i in 0..total_blocks as usize {
        let kind = classify(&raw[i * bs..(i + 1) * bs]);
        match chunks.last_mut() {
            Some((k, _, count)) if *k == kind => *count += 1,
            _ => chunks.push((kind, i, 1)),
        }
    }

    let mut out = Vec::with_capacity(FILE_HEADER_LEN + raw.len() / 2);
    out.extend_from_slice(&SPARSE_MAGIC.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(FILE_HEADER_LEN as u16).to_le_bytes());
    out.extend_from_slice(&(CHUNK_HEADER_LEN as u16).to_le_bytes());
    out.extend_from_slice(&block_size.to_le_bytes());
    out.extend_from_slice(&total_blocks.to_le_bytes());
    out.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // image checksum unused

    for (kind, first, count) in chunks {
        let (ctype, body_len) = match kind {
            Kind::Raw => (CHUNK_RAW, count * bs),
            Kind::Fill(_) => (CHUNK_FILL, 4),
            Kind::DontCare => (CHUNK_DONT_CARE, 0),
        };
        out.extend_from_slice(&ctype.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(count as u32).to_le_bytes());
        out.extend_from_slice(&((CHUNK_HEADER_LEN + body_len) as u32).to_le_bytes());
        match kind {
            Kind::Raw => out.extend_from_slice(&raw[first * bs..(first + count) * bs]),
            Kind::Fill(pattern) => out.extend_from_slice(&pattern),
            Kind::DontCare => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(block_size: u32, total_blocks: u32, total_chunks: u32) -> Vec<u8> {
        let mut h = Vec::new();
        h.extend_from_slice(&SPARSE_MAGIC.to_le_bytes());
        h.extend_from_slice(&1u16.to_le_bytes());
        h.extend_from_slice(&0u16.to_le_bytes());
        h.extend_from_slice(&28u16.to_le_bytes());
        h.extend_from_slice(&12u16.to_le_bytes());
        h.extend_from_slice(&block_size.to_le_bytes());
        h.extend_from_slice(&total_blocks.to_le_bytes());
        h.extend_from_slice(&total_chunks.to_le_bytes());
        h.extend_from_slice(&0u32.to_le_bytes());
        h
    }

    fn chunk(ctype: u16, blocks: u32, body: &[u8]) -> Vec<u8> {
        let mut c = Vec::new();
        c.extend_from_slice(&ctype.to_le_bytes());
        c.extend_from_slice(&0u16.to_le_bytes());
        c.extend_from_slice(&blocks.to_le_bytes());
        c.extend_from_slice(&((12 + body.len()) as u32).to_le_bytes());
        c.extend_from_slice(body);
        c
    }

    // 8 MiB image: one RAW block, a long DONT_CARE run, one FILL block.
    #[test]
    fn eight_mib_raw_dontcare_fill() {
        let mut image = header(4096, 2048, 3);
        image.extend(chunk(CHUNK_RAW, 1, &[0xAA; 4096]));
        image.extend(chunk(CHUNK_DONT_CARE, 2046, &[]));
        image.extend(chunk(CHUNK_FILL, 1, &0xDEADBEEFu32.to_le_bytes()));

        let mut reader = SparseReader::new(image.as_slice()).unwrap();
        match reader.next_event().unwrap().unwrap() {
            SparseEvent::Write { offset, data } => {
                assert_eq!(offset, 0);
                assert_eq!(data, vec![0xAA; 4096]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(
            reader.next_event().unwrap().unwrap(),
            SparseEvent::SkipTo { offset: 8384512 }
        );
        match reader.next_event().unwrap().unwrap() {
            SparseEvent::Write { offset, data } => {
                assert_eq!(offset, 8384512);
                assert_eq!(data.len(), 4096);
                assert_eq!(&data[..8], &[0xEF, 0xBE, 0xAD, 0xDE, 0xEF, 0xBE, 0xAD, 0xDE]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(reader.next_event().unwrap().is_none());
        assert_eq!(reader.header().expanded_len(), 8 * 1024 * 1024);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let bs = 4096usize;
        let mut raw = vec![0u8; bs * 8];
        raw[0..bs].fill(0x11); // fill block
        for (i, b) in raw[bs..2 * bs].iter_mut().enumerate() {
            *b = (i % 251) as u8; // raw block
        }
        // blocks 2..6 zero
        raw[6 * bs + 17] = 0x99; // raw block with sparse content
        raw[7 * bs..].fill(0x22);

        let encoded = encode(&raw, bs as u32).unwrap();
        assert!(is_sparse(&encoded));
        assert_eq!(decode_to_vec(&encoded).unwrap(), raw);
    }

    #[test]
    fn trailing_dont_care_still_covers_total_blocks() {
        let mut image = header(4096, 4, 2);
        image.extend(chunk(CHUNK_RAW, 1, &[0x55; 4096]));
        image.extend(chunk(CHUNK_DONT_CARE, 3, &[]));
        let mut reader = SparseReader::new(image.as_slice()).unwrap();
        let mut last = 0;
        while let Some(ev) = reader.next_event().unwrap() {
            last = match ev {
                SparseEvent::Write { offset, data } => offset + data.len() as u64,
                SparseEvent::SkipTo { offset } => offset,
            };
        }
        assert_eq!(last, 4 * 4096);
    }

    #[test]
    fn zero_block_chunk_is_rejected() {
        let mut image = header(4096, 1, 2);
        image.extend(chunk(CHUNK_DONT_CARE, 0, &[]));
        image.extend(chunk(CHUNK_RAW, 1, &[0u8; 4096]));
        let mut reader = SparseReader::new(image.as_slice()).unwrap();
        assert!(matches!(
            reader.next_event(),
            Err(StorageError::Malformed { .. })
        ));
    }

    #[test]
    fn block_count_mismatch_is_rejected() {
        let mut image = header(4096, 4, 1);
        image.extend(chunk(CHUNK_RAW, 1, &[0u8; 4096]));
        let mut reader = SparseReader::new(image.as_slice()).unwrap();
        reader.next_event().unwrap().unwrap();
        assert!(matches!(
            reader.next_event(),
            Err(StorageError::Malformed { .. })
        ));
    }

    #[test]
    fn wrong_header_sizes_are_rejected() {
        let mut image = header(4096, 1, 1);
        image[8] = 30; // file header size
        assert!(SparseReader::new(image.as_slice()).is_err());
        let mut image = header(4095, 1, 1); // not a multiple of 4
        image.extend(chunk(CHUNK_RAW, 1, &[0u8; 4095]));
        assert!(SparseReader::new(image.as_slice()).is_err());
    }

    #[test]
    fn crc_chunk_validates_running_crc() {
        let body = vec![0x5Au8; 4096];
        let crc = CRC32.checksum(&body);
        let mut image = header(4096, 1, 2);
        image.extend(chunk(CHUNK_RAW, 1, &body));
        image.extend(chunk(CHUNK_CRC32, 0, &crc.to_le_bytes()));
        let mut reader = SparseReader::new(image.as_slice()).unwrap();
        reader.next_event().unwrap().unwrap();
        assert!(reader.next_event().unwrap().is_none());

        // Corrupt the stored CRC.
        let mut bad = header(4096, 1, 2);
        bad.extend(chunk(CHUNK_RAW, 1, &body));
        bad.extend(chunk(CHUNK_CRC32, 0, &(crc ^ 1).to_le_bytes()));
        let mut reader = SparseReader::new(bad.as_slice()).unwrap();
        reader.next_event().unwrap().unwrap();
        assert!(matches!(
            reader.next_event(),
            Err(StorageError::Malformed { .. })
        ));
    }

    #[test]
    fn misaligned_raw_input_rejected_by_encoder() {
        assert!(matches!(
            encode(&[0u8; 4097], 4096),
            Err(StorageError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn encoder_never_emits_zero_block_chunks() {
        let encoded = encode(&[0u8; 8192], 4096).unwrap();
        // One DONT_CARE chunk of 2 blocks.
        let chunks = u32::from_le_bytes(encoded[20..24].try_into().unwrap());
        assert_eq!(chunks, 1);
        let blocks = u32::from_le_bytes(encoded[32..36].try_into().unwrap());
        assert_eq!(blocks, 2);
    }
}

// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Generic compression of whole files, used for compressed mark files.
//!
//! A compressed file is a sequence of frames:
//!
//! ```plain
//! | checksum | method | compressed size | uncompressed size | payload  |
//! |    4B    |   1B   |       4B        |        4B         | variable |
//! ```
//!
//! All integers are little-endian. `compressed size` covers the 9 header bytes
//! after the checksum plus the payload, and the crc32 checksum covers the same
//! range.

use std::io::{self, Read};

use bytes::{Buf, BufMut};

use super::{build_checksum, verify_checksum};

pub const FRAME_CHECKSUM_SIZE: usize = 4;
pub const FRAME_HEADER_SIZE: usize = 1 + 4 + 4;

/// Every byte of an LZ4 block expands to at most this many bytes.
const MAX_LZ4_RATIO: usize = 255;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionMethod {
    None = 0x02,
    Lz4 = 0x82,
}

impl TryFrom<u8> for CompressionMethod {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x02 => Ok(Self::None),
            0x82 => Ok(Self::Lz4),
            _ => Err(value),
        }
    }
}

/// Compress `data` into frames holding at most `block_size` uncompressed bytes each.
pub fn compress_frames(data: &[u8], block_size: usize, method: CompressionMethod) -> Vec<u8> {
    let mut out = vec![];
    for chunk in data.chunks(block_size.max(1)) {
        let payload = match method {
            CompressionMethod::None => chunk.to_vec(),
            CompressionMethod::Lz4 => lz4_flex::block::compress(chunk),
        };
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.put_u8(method as u8);
        frame.put_u32_le((FRAME_HEADER_SIZE + payload.len()) as u32);
        frame.put_u32_le(chunk.len() as u32);
        frame.extend_from_slice(&payload);

        out.put_u32_le(build_checksum(&frame) as u32);
        out.extend_from_slice(&frame);
    }
    out
}

/// Fill `buf` completely. Returns `false` on a clean end of stream before any byte was
/// read, and fails with `UnexpectedEof` if the stream ends in the middle of `buf`.
pub(super) fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} of {} bytes", filled, buf.len()),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Decompressing reader over a framed file.
pub struct CompressedReader<R> {
    inner: R,
    block: Vec<u8>,
    pos: usize,
}

impl<R: Read> CompressedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            block: vec![],
            pos: 0,
        }
    }

    /// Load the next frame. Returns `false` at the end of the file.
    fn next_frame(&mut self) -> io::Result<bool> {
        let mut checksum = [0u8; FRAME_CHECKSUM_SIZE];
        if !read_exact_or_eof(&mut self.inner, &mut checksum)? {
            return Ok(false);
        }
        let checksum = u32::from_le_bytes(checksum) as u64;

        let mut header = [0u8; FRAME_HEADER_SIZE];
        self.inner.read_exact(&mut header)?;
        let mut buf = &header[..];
        let method = CompressionMethod::try_from(buf.get_u8())
            .map_err(|m| invalid_data(format!("unknown compression method {m:#04x}")))?;
        let compressed_size = buf.get_u32_le() as usize;
        let uncompressed_size = buf.get_u32_le() as usize;
        if compressed_size < FRAME_HEADER_SIZE {
            return Err(invalid_data(format!(
                "compressed size {compressed_size} is smaller than the frame header"
            )));
        }

        // the header is not verified yet, so only buffer what the stream really holds
        let payload_size = compressed_size - FRAME_HEADER_SIZE;
        let mut frame = header.to_vec();
        let read = self
            .inner
            .by_ref()
            .take(payload_size as u64)
            .read_to_end(&mut frame)?;
        if read != payload_size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("frame ended after {read} of {payload_size} payload bytes"),
            ));
        }
        verify_checksum(&frame, checksum).map_err(|e| invalid_data(e.kind().to_string()))?;

        let payload = &frame[FRAME_HEADER_SIZE..];
        self.block = match method {
            CompressionMethod::None => payload.to_vec(),
            CompressionMethod::Lz4 => {
                if uncompressed_size > payload.len().saturating_mul(MAX_LZ4_RATIO) {
                    return Err(invalid_data(format!(
                        "frame of {} bytes cannot decompress to {} bytes",
                        payload.len(),
                        uncompressed_size
                    )));
                }
                lz4_flex::block::decompress(payload, uncompressed_size)
                    .map_err(|e| invalid_data(e.to_string()))?
            }
        };
        if self.block.len() != uncompressed_size {
            return Err(invalid_data(format!(
                "frame decompressed to {} bytes, expected {}",
                self.block.len(),
                uncompressed_size
            )));
        }
        self.pos = 0;
        Ok(true)
    }
}

impl<R: Read> Read for CompressedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.block.len() {
            if !self.next_frame()? {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.block.len() - self.pos);
        buf[..n].copy_from_slice(&self.block[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

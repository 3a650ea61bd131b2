//! 2-bit-per-pixel frame codec.
//!
//! Packs a quantized canonical screen into raster-ordered 8x8 blocks; within
//! a block each pixel row becomes one little-endian u16, 2 bits per pixel,
//! least-significant bits first. The packing is a compressibility
//! pre-transform for a downstream byte-stream compressor, not entropy coding.
//!
//! Record framing, append-only:
//!
//!   [0..4]  magic `+f\xc9q`
//!   [4..8]  elapsed seconds  (u32 little-endian)
//!   [8]     frame counter mod 256
//!   [9..]   packed payload   (width*height/4 bytes)

pub const MAGIC: [u8; 4] = *b"+f\xc9q";

const HEADER_SIZE: usize = 9;

/// Packed payload size for a canonical resolution.
pub fn packed_len(width: u32, height: u32) -> usize {
    (width * height / 4) as usize
}

/// Pack pixel classes (values 0..=3, row-major) into the 2bpp block format.
pub fn pack_2bpp(vals: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CodecError> {
    if width == 0 || height == 0 || width % 8 != 0 || height % 8 != 0 {
        return Err(CodecError::BadDimensions { width, height });
    }
    if vals.len() != (width * height) as usize {
        return Err(CodecError::BadLength {
            got: vals.len(),
            expected: (width * height) as usize,
        });
    }
    let mut out = Vec::with_capacity(packed_len(width, height));
    for block_y in 0..height / 8 {
        for block_x in 0..width / 8 {
            for row in 0..8 {
                let y = block_y * 8 + row;
                let mut word: u16 = 0;
                for px in 0..8 {
                    let x = block_x * 8 + px;
                    let class = vals[(y * width + x) as usize] & 3;
                    word |= (class as u16) << (2 * px);
                }
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
    }
    Ok(out)
}

/// Inverse of [`pack_2bpp`]; returns row-major pixel classes.
pub fn unpack_2bpp(packed: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CodecError> {
    if width == 0 || height == 0 || width % 8 != 0 || height % 8 != 0 {
        return Err(CodecError::BadDimensions { width, height });
    }
    if packed.len() != packed_len(width, height) {
        return Err(CodecError::BadLength {
            got: packed.len(),
            expected: packed_len(width, height),
        });
    }
    let mut vals = vec![0u8; (width * height) as usize];
    let mut off = 0;
    for block_y in 0..height / 8 {
        for block_x in 0..width / 8 {
            for row in 0..8 {
                let y = block_y * 8 + row;
                let mut word = u16::from_le_bytes([packed[off], packed[off + 1]]);
                off += 2;
                for px in 0..8 {
                    let x = block_x * 8 + px;
                    vals[(y * width + x) as usize] = (word & 3) as u8;
                    word >>= 2;
                }
            }
        }
    }
    Ok(vals)
}

/// One unit of the codec output stream. Write-once, sequentially appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedRecord {
    pub timestamp_s: u32,
    pub frame_n: u8,
    pub payload: Vec<u8>,
}

impl CompressedRecord {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&self.timestamp_s.to_le_bytes());
        buf.push(self.frame_n);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Read one record with a payload of `payload_len` bytes. Consumers know
    /// the payload size from the canonical resolution and use the fixed
    /// framing to resynchronize.
    pub fn deserialize(data: &[u8], payload_len: usize) -> Result<Self, CodecError> {
        if data.len() < HEADER_SIZE + payload_len {
            return Err(CodecError::TooShort {
                got: data.len(),
                expected: HEADER_SIZE + payload_len,
            });
        }
        if data[0..4] != MAGIC {
            return Err(CodecError::BadMagic([data[0], data[1], data[2], data[3]]));
        }
        let timestamp_s = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let frame_n = data[8];
        Ok(Self {
            timestamp_s,
            frame_n,
            payload: data[HEADER_SIZE..HEADER_SIZE + payload_len].to_vec(),
        })
    }

    /// Total serialized size for a given canonical resolution.
    pub fn record_len(width: u32, height: u32) -> usize {
        HEADER_SIZE + packed_len(width, height)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("dimensions {width}x{height} must be non-zero and divisible by 8")]
    BadDimensions { width: u32, height: u32 },
    #[error("buffer length {got}, expected {expected}")]
    BadLength { got: usize, expected: usize },
    #[error("record too short: got {got} bytes, expected at least {expected}")]
    TooShort { got: usize, expected: usize },
    #[error("bad record magic {0:02x?}")]
    BadMagic([u8; 4]),
}

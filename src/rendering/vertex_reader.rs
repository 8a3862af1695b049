/// Vectorized index decoding and vertex attribute gathering
///
/// A `VertexReader` is a view over caller-owned vertex and index bytes. Each
/// draw call streams indices through it 16 (or 3x16) at a time; the vertex
/// shader then gathers attributes for the current index vector.
use crate::simd::{VFloat, VInt, LANES};
use thiserror::Error;

/// Width of each entry in the index buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexFormat {
    U8,
    U16,
    U32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            IndexFormat::U8 => 1,
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// Encoding of one attribute group in the vertex buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttribFormat {
    /// Plain 32-bit floats, one per 4 bytes.
    F32,
    /// Unsigned normalized integers of the given bit width, unpacked to [0, 1].
    UNorm(u32),
    /// Signed normalized integers of the given bit width, unpacked to [-1, 1].
    SNorm(u32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReaderError {
    #[error("index buffer holds {actual} bytes but {count} {format:?} indices need {required}")]
    IndexBufferTooSmall {
        count: usize,
        format: IndexFormat,
        required: usize,
        actual: usize,
    },
}

pub struct VertexReader<'a> {
    vertex_buffer: &'a [u8],
    index_buffer: &'a [u8],
    count: usize,
    index_format: IndexFormat,
    /// Vertex indices the shader reads next. Only meaningful during a draw call.
    indices: VInt,
}

impl<'a> VertexReader<'a> {
    /// Creates a reader over `count` indices of `index_format`.
    ///
    /// Index lanes past `count` read as vertex 0, so the index buffer needs no
    /// over-allocation. Vertex 0 must exist whenever `count` is not a multiple of 48.
    pub fn new(
        vertex_buffer: &'a [u8],
        index_buffer: &'a [u8],
        count: usize,
        index_format: IndexFormat,
    ) -> Result<Self, ReaderError> {
        let required = count * index_format.size();
        if index_buffer.len() < required {
            return Err(ReaderError::IndexBufferTooSmall {
                count,
                format: index_format,
                required,
                actual: index_buffer.len(),
            });
        }

        Ok(Self {
            vertex_buffer,
            index_buffer,
            count,
            index_format,
            indices: VInt::default(),
        })
    }

    /// Number of indices in the draw.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn index_format(&self) -> IndexFormat {
        self.index_format
    }

    /// Current vertex indices, one per lane.
    #[inline]
    pub fn indices(&self) -> VInt {
        self.indices
    }

    #[inline]
    pub fn set_indices(&mut self, indices: VInt) {
        self.indices = indices;
    }

    /// Raw vertex index at `offset`, or 0 past the end of the index buffer.
    #[inline]
    pub fn read_index(&self, offset: usize) -> u32 {
        if offset >= self.count {
            return 0;
        }
        let buf = self.index_buffer;
        match self.index_format {
            IndexFormat::U8 => buf[offset] as u32,
            IndexFormat::U16 => {
                let at = offset * 2;
                u16::from_ne_bytes([buf[at], buf[at + 1]]) as u32
            }
            IndexFormat::U32 => {
                let at = offset * 4;
                u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
            }
        }
    }

    /// Reads 16 consecutive indices starting at `offset`.
    #[inline]
    pub fn read_indices(&self, offset: usize) -> VInt {
        if offset + LANES <= self.count {
            let size = self.index_format.size();
            let bytes = &self.index_buffer[offset * size..(offset + LANES) * size];
            return match self.index_format {
                IndexFormat::U8 => VInt::from_fn(|i| bytes[i] as i32),
                IndexFormat::U16 => VInt::from_fn(|i| u16::from_ne_bytes([bytes[i * 2], bytes[i * 2 + 1]]) as i32),
                IndexFormat::U32 => VInt::from_fn(|i| {
                    let b = &bytes[i * 4..i * 4 + 4];
                    u32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as i32
                }),
            };
        }
        VInt::from_fn(|i| self.read_index(offset + i) as i32)
    }

    /// Reads and de-interleaves indices for 3x16 vertices: `out[v]` lane `i`
    /// is corner `v` of triangle `i` starting at `offset`.
    #[inline]
    pub fn read_triangle_indices(&self, offset: usize) -> [VInt; 3] {
        let a = self.read_indices(offset);
        let b = self.read_indices(offset + LANES);
        let c = self.read_indices(offset + LANES * 2);
        let flat = |j: usize| match j / LANES {
            0 => a.0[j],
            1 => b.0[j - LANES],
            _ => c.0[j - LANES * 2],
        };

        std::array::from_fn(|v| VInt::from_fn(|i| flat(i * 3 + v)))
    }

    /// Gathers one `f32` per lane at `index * stride + offset`.
    #[inline]
    pub fn read_attrib_f(&self, offset: usize, stride: usize) -> VFloat {
        VFloat::from_fn(|i| f32::from_bits(self.read_word(i, offset, stride)))
    }

    /// Gathers one 32-bit integer per lane at `index * stride + offset`.
    #[inline]
    pub fn read_attrib_s32(&self, offset: usize, stride: usize) -> VInt {
        VInt::from_fn(|i| self.read_word(i, offset, stride) as i32)
    }

    #[inline(always)]
    fn read_word(&self, lane: usize, offset: usize, stride: usize) -> u32 {
        let at = self.indices.0[lane] as u32 as usize * stride + offset;
        let b = &self.vertex_buffer[at..at + 4];
        u32::from_ne_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Reads a group of `N` attributes starting at byte `offset` of each vertex.
    ///
    /// Packed formats do one 32-bit gather per word and unpack all group
    /// members that fit in it with shifts and masks.
    pub fn read_attribs<const N: usize>(&self, offset: usize, stride: usize, format: AttribFormat) -> [VFloat; N] {
        let mut dest = [VFloat::default(); N];

        let (bits, signed) = match format {
            AttribFormat::F32 => {
                for (i, d) in dest.iter_mut().enumerate() {
                    *d = self.read_attrib_f(offset + i * 4, stride);
                }
                return dest;
            }
            AttribFormat::UNorm(bits) => (bits, false),
            AttribFormat::SNorm(bits) => (bits, true),
        };
        debug_assert!((1..=32).contains(&bits), "invalid normalized bit width {bits}");

        let mut i = 0;
        let mut word_offset = offset;
        while i < N {
            let data = self.read_attrib_s32(word_offset, stride);
            let mut pos = 0;
            while pos + bits <= 32 && i < N {
                dest[i] = if signed {
                    Self::unpack_snorm(data, pos, bits)
                } else {
                    Self::unpack_unorm(data, pos, bits)
                };
                pos += bits;
                i += 1;
            }
            word_offset += 4;
        }
        dest
    }

    /// `((data >> pos) & mask) / mask`
    #[inline]
    pub fn unpack_unorm(data: VInt, bit_pos: u32, bit_count: u32) -> VFloat {
        if bit_count == 32 {
            return VFloat::from_fn(|i| data.0[i] as u32 as f32 * (1.0 / u32::MAX as f32));
        }
        let mask = ((1u32 << bit_count) - 1) as i32;
        let attr = data.shr_logical(bit_pos) & mask;
        attr.to_float() * (1.0 / mask as f32)
    }

    /// Sign-extends the field, then scales by `1 / (2^(bits-1) - 1)`, clamped to -1.
    #[inline]
    pub fn unpack_snorm(data: VInt, bit_pos: u32, bit_count: u32) -> VFloat {
        debug_assert!(bit_count >= 2, "signed normalized fields need at least 2 bits");

        let scale = ((1u64 << bit_count) / 2 - 1) as f32;
        let attr = (data << (32 - bit_count - bit_pos)) >> (32 - bit_count);
        (attr.to_float() * (1.0 / scale)).max(VFloat::splat(-1.0))
    }
}

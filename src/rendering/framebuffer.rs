/// Tiled framebuffer for software rendering
/// Stores color, depth and optional attachment planes
///
/// Memory layout optimized for the rasterizer's 4x4 tile writes:
/// - Pixels are grouped into 4x4 tiles, tiles are stored in row-major order
/// - Every tile is one 64-byte aligned block, so a tile write touches exactly one cache line
/// - Attachment planes share the tiled pixel order and are addressed by plane index
use crate::count_call;
#[cfg(feature = "profiling")]
use crate::perf::FUNCTION_COUNTERS;
use crate::simd::{VFloat, VInt, VMask};
use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use std::mem::size_of;

#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::{
    __m128i, __m256i, _mm256_set1_epi32, _mm256_stream_si256, _mm_set1_epi32, _mm_sfence,
    _mm_stream_si128,
};

pub const TILE_SIZE: u32 = 4;
pub const TILE_SHIFT: u32 = 2;
pub const TILE_MASK: u32 = TILE_SIZE - 1;
pub const TILE_NUM_PIXELS: usize = (TILE_SIZE * TILE_SIZE) as usize;

/// One 4x4 tile worth of pixels, aligned to a cache line.
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(C, align(64))]
pub struct TileBlock<T: Copy>(pub [T; TILE_NUM_PIXELS]);

// Safety: 16 four-byte elements fill the 64-byte alignment exactly, so there is no padding.
unsafe impl Zeroable for TileBlock<u32> {}
unsafe impl Pod for TileBlock<u32> {}
unsafe impl Zeroable for TileBlock<f32> {}
unsafe impl Pod for TileBlock<f32> {}

/// Mutable view of a single tile, handed out by [`Framebuffer::for_each_tile_mut`].
pub struct TileMut<'a> {
    /// Top-left pixel X of the tile
    pub x: u32,
    /// Top-left pixel Y of the tile
    pub y: u32,
    pub color: &'a mut [u32; TILE_NUM_PIXELS],
    pub depth: &'a mut [f32; TILE_NUM_PIXELS],
}

#[derive(Clone)]
pub struct Framebuffer {
    // Hot data: used for every bounds check and offset calculation
    width: u32,
    height: u32,
    tile_stride: u32,
    /// Size of one attachment plane in bytes, rounded up to a cache line
    attachment_stride: usize,
    num_attachments: usize,

    color: Vec<TileBlock<u32>>,
    depth: Vec<TileBlock<f32>>,
    attachments: Vec<TileBlock<u32>>,
}

impl Framebuffer {
    /// Creates a framebuffer with dimensions rounded up to a multiple of the tile size.
    ///
    /// `num_attachments` is the number of extra byte planes. An attachment of type `T`
    /// occupies `size_of::<T>()` consecutive planes.
    pub fn new(width: u32, height: u32, num_attachments: usize) -> Self {
        let width = (width + TILE_MASK) & !TILE_MASK;
        let height = (height + TILE_MASK) & !TILE_MASK;
        let pixel_count = width as usize * height as usize;
        let tile_count = pixel_count / TILE_NUM_PIXELS;
        let attachment_stride = (pixel_count + 63) & !63;
        let attachment_blocks = attachment_stride * num_attachments / size_of::<TileBlock<u32>>();

        Self {
            width,
            height,
            tile_stride: width / TILE_SIZE,
            attachment_stride,
            num_attachments,
            color: vec![TileBlock([0; TILE_NUM_PIXELS]); tile_count],
            depth: vec![TileBlock([1.0; TILE_NUM_PIXELS]); tile_count],
            attachments: vec![TileBlock([0; TILE_NUM_PIXELS]); attachment_blocks],
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of tiles per row.
    #[inline]
    pub fn tile_stride(&self) -> u32 {
        self.tile_stride
    }

    #[inline]
    pub fn num_attachments(&self) -> usize {
        self.num_attachments
    }

    /// Color plane in tiled order.
    #[inline]
    pub fn color(&self) -> &[u32] {
        bytemuck::cast_slice(&self.color)
    }

    #[inline]
    pub fn color_mut(&mut self) -> &mut [u32] {
        bytemuck::cast_slice_mut(&mut self.color)
    }

    /// Depth plane in tiled order.
    #[inline]
    pub fn depth(&self) -> &[f32] {
        bytemuck::cast_slice(&self.depth)
    }

    #[inline]
    pub fn depth_mut(&mut self) -> &mut [f32] {
        bytemuck::cast_slice_mut(&mut self.depth)
    }

    /// Clear color and depth planes
    pub fn clear(&mut self, color: u32, depth: f32) {
        count_call!(FUNCTION_COUNTERS.framebuffer_clear_calls);
        fill_blocks(&mut self.color, color);
        self.clear_depth(depth);
    }

    pub fn clear_depth(&mut self, depth: f32) {
        fill_blocks(bytemuck::cast_slice_mut(&mut self.depth), depth.to_bits());
    }

    /// Offset of pixel (x, y) in the tiled planes.
    ///
    /// The hot loop only ever addresses whole tiles, so `x` and `y` must leave
    /// room for the remaining 3 pixels of their tile.
    #[inline(always)]
    pub fn pixel_offset(&self, x: u32, y: u32) -> usize {
        debug_assert!(x + 3 < self.width && y + 3 < self.height, "pixel ({x}, {y}) out of bounds");
        self.tiled_index(x, y)
    }

    /// Vectorized [`Self::pixel_offset`]. Lanes are not bounds checked.
    #[inline(always)]
    pub fn pixel_offset_v(&self, x: VInt, y: VInt) -> VInt {
        let tile_id = (x >> TILE_SHIFT) + (y >> TILE_SHIFT) * self.tile_stride as i32;
        let pixel_offset = (x & TILE_MASK as i32) + (y & TILE_MASK as i32) * TILE_SIZE as i32;
        tile_id * TILE_NUM_PIXELS as i32 + pixel_offset
    }

    #[inline(always)]
    fn tiled_index(&self, x: u32, y: u32) -> usize {
        let tile_id = (x >> TILE_SHIFT) as usize + (y >> TILE_SHIFT) as usize * self.tile_stride as usize;
        let pixel_offset = (x & TILE_MASK) + (y & TILE_MASK) * TILE_SIZE;
        tile_id * TILE_NUM_PIXELS + pixel_offset as usize
    }

    /// Color of a single pixel. Panics if (x, y) is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of bounds");
        self.color()[self.tiled_index(x, y)]
    }

    /// Depth of a single pixel. Panics if (x, y) is out of bounds.
    pub fn depth_at(&self, x: u32, y: u32) -> f32 {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of bounds");
        self.depth()[self.tiled_index(x, y)]
    }

    /// Masked store of one full tile of color and depth values.
    #[inline(always)]
    pub fn write_tile(&mut self, offset: usize, mask: VMask, color: VInt, depth: VFloat) {
        debug_assert_eq!(offset % TILE_NUM_PIXELS, 0, "tile writes must be tile aligned");

        color.store_masked(&mut self.color_mut()[offset..], mask);
        depth.store_masked(&mut self.depth_mut()[offset..], mask);
    }

    /// Typed view over the attachment planes starting at plane `attachment_id`.
    ///
    /// Element `i` belongs to the pixel at tiled offset `i`.
    pub fn attachment<T: Pod>(&self, attachment_id: usize) -> &[T] {
        let range = self.attachment_range::<T>(attachment_id);
        bytemuck::cast_slice(&bytemuck::cast_slice::<_, u8>(&self.attachments)[range])
    }

    pub fn attachment_mut<T: Pod>(&mut self, attachment_id: usize) -> &mut [T] {
        let range = self.attachment_range::<T>(attachment_id);
        bytemuck::cast_slice_mut(&mut bytemuck::cast_slice_mut::<_, u8>(&mut self.attachments)[range])
    }

    fn attachment_range<T>(&self, attachment_id: usize) -> std::ops::Range<usize> {
        debug_assert!(
            attachment_id + size_of::<T>() <= self.num_attachments,
            "missing attachment storage"
        );
        let start = attachment_id * self.attachment_stride;
        start..start + self.width as usize * self.height as usize * size_of::<T>()
    }

    /// Samples depth at normalized coordinates in [0, 1). Out-of-bounds lanes read 1.0.
    #[inline(always)]
    pub fn sample_depth_uv(&self, u: VFloat, v: VFloat) -> VFloat {
        let ix = (u * self.width as f32).round_to_int();
        let iy = (v * self.height as f32).round_to_int();
        self.sample_depth(ix, iy, VFloat::splat(1.0))
    }

    /// Gathers depth at integer pixel coordinates, substituting `default` for out-of-bounds lanes.
    #[inline(always)]
    pub fn sample_depth(&self, ix: VInt, iy: VInt, default: VFloat) -> VFloat {
        let indices = self.pixel_offset_v(ix, iy);
        let bound_mask = self.bound_mask(ix, iy);
        VFloat::gather_masked(default, bound_mask, self.depth(), indices)
    }

    /// Gathers color at integer pixel coordinates, substituting `default` for out-of-bounds lanes.
    #[inline(always)]
    pub fn sample_color(&self, ix: VInt, iy: VInt, default: VInt) -> VInt {
        let indices = self.pixel_offset_v(ix, iy);
        let bound_mask = self.bound_mask(ix, iy);
        VInt::gather_masked(default, bound_mask, self.color(), indices)
    }

    /// Twos-complement unsigned compare checks both `x >= 0` and `x < width` at once.
    #[inline(always)]
    fn bound_mask(&self, ix: VInt, iy: VInt) -> VMask {
        ix.lt_unsigned(VInt::splat(self.width as i32)) & iy.lt_unsigned(VInt::splat(self.height as i32))
    }

    /// Copies the color plane into `dest` in row-major order, `stride` pixels per row.
    pub fn get_pixels(&self, dest: &mut [u32], stride: usize) {
        let width = self.width as usize;
        let height = self.height as usize;
        if width == 0 || height == 0 {
            return;
        }
        assert!(stride >= width, "stride {stride} is smaller than width {width}");
        assert!(dest.len() >= (height - 1) * stride + width, "destination buffer too small");

        let color = self.color();
        dest.par_chunks_mut(stride)
            .take(height)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, pixel) in row[..width].iter_mut().enumerate() {
                    *pixel = color[self.tiled_index(x as u32, y as u32)];
                }
            });
    }

    /// Visits every tile in parallel with mutable access to its color and depth.
    /// Used by full-screen passes that operate on an already rasterized target.
    pub fn for_each_tile_mut<F>(&mut self, visitor: F)
    where
        F: Fn(TileMut<'_>) + Sync + Send,
    {
        let tile_stride = self.tile_stride.max(1) as usize;

        self.color
            .par_iter_mut()
            .zip(self.depth.par_iter_mut())
            .enumerate()
            .for_each(|(tile_id, (color, depth))| {
                visitor(TileMut {
                    x: ((tile_id % tile_stride) as u32) << TILE_SHIFT,
                    y: ((tile_id / tile_stride) as u32) << TILE_SHIFT,
                    color: &mut color.0,
                    depth: &mut depth.0,
                });
            });
    }
}

/// Fill a tiled plane with a 32-bit pattern.
///
/// Non-temporal stores bypass the cache: the whole plane is touched but the CPU
/// rarely reads it back before the next draw.
#[inline]
fn fill_blocks(blocks: &mut [TileBlock<u32>], value: u32) {
    #[cfg(target_arch = "x86_64")]
    {
        // SSE2 is part of the x86_64 baseline, AVX is not.
        if std::arch::is_x86_feature_detected!("avx") {
            unsafe { fill_blocks_avx(blocks, value) }
        } else {
            unsafe { fill_blocks_sse2(blocks, value) }
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    blocks.fill(TileBlock([value; TILE_NUM_PIXELS]));
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx")]
unsafe fn fill_blocks_avx(blocks: &mut [TileBlock<u32>], value: u32) {
    let v = _mm256_set1_epi32(value as i32);
    for block in blocks.iter_mut() {
        // Blocks are 64-byte aligned, as required by the streaming store.
        let ptr = block.0.as_mut_ptr() as *mut __m256i;
        _mm256_stream_si256(ptr, v);
        _mm256_stream_si256(ptr.add(1), v);
    }
    _mm_sfence();
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn fill_blocks_sse2(blocks: &mut [TileBlock<u32>], value: u32) {
    let v = _mm_set1_epi32(value as i32);
    for block in blocks.iter_mut() {
        let ptr = block.0.as_mut_ptr() as *mut __m128i;
        for i in 0..4 {
            _mm_stream_si128(ptr.add(i), v);
        }
    }
    _mm_sfence();
}

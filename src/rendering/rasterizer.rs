/// Binned triangle rasterizer
///
/// A draw call shades vertices 16 triangles at a time, classifies each packet
/// against the view volume, clips what straddles it, sets up edge functions
/// and bins the surviving lanes. Flushing walks every bin in 4x4 pixel tiles
/// and hands covered, depth-passing tiles to the pixel shader.
use glam::Vec2;

use super::binning::{TriangleBatch, BIN_SIZE, BIN_SIZE_LOG2};
use super::clipper::{ClipCodes, Clipper};
use super::framebuffer::{Framebuffer, TILE_SIZE};
use super::triangle::{
    CullMode, ShadedVertexPacket, TrianglePacket, VaryingBuffer, MAX_ATTRIBS, MAX_SCREEN_EXTENT,
};
use super::vertex_reader::VertexReader;
#[cfg(feature = "profiling")]
use crate::perf::FUNCTION_COUNTERS;
use crate::simd::{VFloat, VInt, VMask, LANES};
use crate::{count_add, count_call, perf_scope};

/// Caller-supplied shading stages.
pub trait ShaderProgram {
    /// Number of entries of [`ShadedVertexPacket::attribs`] written by `shade_vertices`.
    const NUM_CUSTOM_ATTRIBS: usize;

    /// Shades the 16 vertices whose indices are currently set on `vertices`.
    fn shade_vertices(&self, vertices: &VertexReader, output: &mut ShadedVertexPacket);

    /// Shades one 4x4 tile. Only lanes in `vars.tile_mask` may be written.
    fn shade_pixels(&self, fb: &mut Framebuffer, vars: &VaryingBuffer);
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RasterizerConfig {
    pub cull_mode: CullMode,
    /// Clip volume extent in NDC units along X and Y; values above 1 let
    /// slightly offscreen triangles skip the clipper. Narrowed per draw so the
    /// guarded region stays within [`MAX_SCREEN_EXTENT`] pixels.
    pub guard_band: Vec2,
    /// Apply perspective correction to the weights passed to the pixel shader.
    pub perspective_correct: bool,
}

impl Default for RasterizerConfig {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::CounterClockwise,
            guard_band: Vec2::ONE,
            perspective_correct: true,
        }
    }
}

pub struct Rasterizer {
    config: RasterizerConfig,
    batch: TriangleBatch,
    clipper: Clipper,
    /// Clipper output packets waiting for setup, with their live lanes
    pending: Vec<(usize, VMask)>,
}

impl Rasterizer {
    pub fn new(config: RasterizerConfig) -> Self {
        debug_assert!(config.guard_band.x >= 1.0 && config.guard_band.y >= 1.0);

        Self {
            config,
            batch: TriangleBatch::new(),
            clipper: Clipper::new(config.guard_band),
            pending: Vec::with_capacity(LANES),
        }
    }

    pub fn config(&self) -> &RasterizerConfig {
        &self.config
    }

    /// Draws the indexed triangle list described by `vertices` into `fb`.
    ///
    /// Trailing indices that don't form a whole triangle are ignored.
    pub fn draw<S: ShaderProgram>(&mut self, fb: &mut Framebuffer, vertices: &mut VertexReader, shader: &S) {
        debug_assert!(S::NUM_CUSTOM_ATTRIBS <= MAX_ATTRIBS, "too many custom attributes");
        debug_assert!(
            fb.width().max(fb.height()) as f32 <= MAX_SCREEN_EXTENT,
            "framebuffer too large for 32-bit edge functions"
        );
        count_call!(FUNCTION_COUNTERS.draw_calls);

        self.batch.resize(fb.width(), fb.height());

        let guard_band = clamp_guard_band(self.config.guard_band, fb.width(), fb.height());
        if guard_band != self.clipper.guard_band() {
            if guard_band != self.config.guard_band {
                log::debug!(
                    "Guard band {} narrowed to {} for a {}x{} target",
                    self.config.guard_band,
                    guard_band,
                    fb.width(),
                    fb.height()
                );
            }
            self.clipper.set_guard_band(guard_band);
        }

        let count = vertices.count() - vertices.count() % 3;
        let mut offset = 0;

        while offset < count {
            let live = VMask::first_n((count - offset) / 3);
            let corners = vertices.read_triangle_indices(offset);

            let slot = self.batch.alloc();
            let tri = self.batch.packet_mut(slot);
            for (v, indices) in corners.into_iter().enumerate() {
                vertices.set_indices(indices);
                shader.shade_vertices(vertices, &mut tri.vertices[v]);
            }
            count_add!(FUNCTION_COUNTERS.vertices_shaded, live.count() * 3);
            count_add!(FUNCTION_COUNTERS.triangles_submitted, live.count());

            self.bin_triangles(fb, slot, live, S::NUM_CUSTOM_ATTRIBS);

            if self.batch.is_full() {
                self.flush(fb, shader);
            }
            offset += LANES * 3;
        }
        self.flush(fb, shader);
    }

    /// Clips, sets up and bins the `live` lanes of a freshly shaded packet.
    fn bin_triangles(&mut self, fb: &Framebuffer, slot: usize, live: VMask, num_attribs: usize) {
        let (width, height) = (fb.width() as i32, fb.height() as i32);
        let cull_mode = self.config.cull_mode;

        let codes = ClipCodes::compute(self.batch.packet(slot), self.clipper.guard_band());
        let accept = codes.accept_mask & live;
        let mut clip = codes.non_trivial_mask & live;

        if clip.any() {
            // Winding can't be judged on screen once a vertex is behind the eye.
            let facing = self.batch.packet(slot).facing_mask(cull_mode);
            count_add!(FUNCTION_COUNTERS.triangles_culled, (clip & !facing).count());
            clip &= facing;
        }
        count_add!(FUNCTION_COUNTERS.triangles_culled, (live & !(accept | codes.non_trivial_mask)).count());

        self.pending.clear();
        if clip.any() {
            self.clip_lanes(slot, clip, &codes, num_attribs);
        }

        let mask = self.batch.packet_mut(slot).setup(width, height, num_attribs, cull_mode) & accept;
        count_add!(FUNCTION_COUNTERS.triangles_culled, (accept & !mask).count());
        count_add!(FUNCTION_COUNTERS.triangles_binned, mask.count());
        self.batch.bin_lanes(slot, mask);

        for i in 0..self.pending.len() {
            let (out_slot, out_live) = self.pending[i];
            // Clipped pieces keep their parent's winding; it was already tested above.
            let mask = self.batch.packet_mut(out_slot).setup(width, height, num_attribs, CullMode::None) & out_live;
            count_add!(FUNCTION_COUNTERS.triangles_binned, mask.count());
            self.batch.bin_lanes(out_slot, mask);
        }
    }

    /// Clips each lane in `mask` and packs the fanned output into new packets,
    /// queued in `self.pending`.
    fn clip_lanes(&mut self, slot: usize, mask: VMask, codes: &ClipCodes, num_attribs: usize) {
        count_add!(FUNCTION_COUNTERS.triangles_clipped, mask.count());

        let mut out_slot = self.batch.alloc();
        let mut out_lane = 0;

        for lane in mask.lanes() {
            self.clipper.load_triangle(self.batch.packet(slot), lane, num_attribs);
            self.clipper.clip(codes.out_codes[lane]);
            log::trace!(
                "Clipped triangle {} against planes {:#08b} into {} pieces",
                slot * LANES + lane,
                codes.out_codes[lane],
                self.clipper.num_triangles()
            );

            for k in 0..self.clipper.num_triangles() {
                if out_lane == LANES {
                    self.pending.push((out_slot, VMask::ALL));
                    out_slot = self.batch.alloc();
                    out_lane = 0;
                }
                self.clipper.store_triangle(self.batch.packet_mut(out_slot), out_lane, k);
                out_lane += 1;
            }
        }
        self.pending.push((out_slot, VMask::first_n(out_lane)));
    }

    /// Rasterizes every binned triangle and empties the batch.
    pub fn flush<S: ShaderProgram>(&mut self, fb: &mut Framebuffer, shader: &S) {
        if self.batch.is_empty() {
            return;
        }
        perf_scope!("rasterizer::flush");
        count_call!(FUNCTION_COUNTERS.batch_flushes);

        let mut binned = 0;
        for by in 0..self.batch.bins_y() {
            for bx in 0..self.batch.bins_x() {
                let bin = self.batch.bin(bx, by);
                binned += bin.len();

                for &id in bin {
                    let id = id as usize;
                    let tri = self.batch.packet(id / LANES);
                    draw_binned_triangle(fb, tri, id % LANES, bx, by, shader, self.config.perspective_correct);
                }
            }
        }
        log::debug!(
            "Flushed {} triangle packets ({} binned triangles across {} bins)",
            self.batch.len(),
            binned,
            self.batch.bins_x() * self.batch.bins_y()
        );

        self.batch.clear();
    }
}

impl Default for Rasterizer {
    fn default() -> Self {
        Self::new(RasterizerConfig::default())
    }
}

/// Narrows `guard_band` so that every triangle skipping the clipper spans at
/// most [`MAX_SCREEN_EXTENT`] pixels on a `width` x `height` target.
fn clamp_guard_band(guard_band: Vec2, width: u32, height: u32) -> Vec2 {
    let limit = Vec2::splat(MAX_SCREEN_EXTENT) / Vec2::new(width as f32, height as f32);
    guard_band.min(limit).max(Vec2::ONE)
}

/// Scans the part of triangle `lane` that lies in bin (bin_x, bin_y), one 4x4 tile at a time.
fn draw_binned_triangle<S: ShaderProgram>(
    fb: &mut Framebuffer,
    tri: &TrianglePacket,
    lane: usize,
    bin_x: usize,
    bin_y: usize,
    shader: &S,
    perspective_correct: bool,
) {
    let tile = TILE_SIZE as i32;
    let bin_min_x = (bin_x << BIN_SIZE_LOG2) as i32;
    let bin_min_y = (bin_y << BIN_SIZE_LOG2) as i32;

    let mut min_x = tri.min_x[lane];
    let mut min_y = tri.min_y[lane];
    let max_x = tri.max_x[lane].min(bin_min_x + BIN_SIZE as i32 - tile);
    let max_y = tri.max_y[lane].min(bin_min_y + BIN_SIZE as i32 - tile);

    let (a01, a12, a20) = (tri.a01[lane], tri.a12[lane], tri.a20[lane]);
    let (b01, b12, b20) = (tri.b01[lane], tri.b12[lane], tri.b20[lane]);
    let mut w0 = tri.weight0[lane];
    let mut w1 = tri.weight1[lane];
    let mut w2 = tri.weight2[lane];

    if min_x < bin_min_x {
        let dx = bin_min_x - min_x;
        w0 = w0.wrapping_add(a12.wrapping_mul(dx));
        w1 = w1.wrapping_add(a20.wrapping_mul(dx));
        w2 = w2.wrapping_add(a01.wrapping_mul(dx));
        min_x = bin_min_x;
    }
    if min_y < bin_min_y {
        let dy = bin_min_y - min_y;
        w0 = w0.wrapping_add(b12.wrapping_mul(dy));
        w1 = w1.wrapping_add(b20.wrapping_mul(dy));
        w2 = w2.wrapping_add(b01.wrapping_mul(dy));
        min_y = bin_min_y;
    }

    // In-tile pixel offsets, matching the tiled storage order
    let frag_x = VInt::from_fn(|i| (i % TILE_SIZE as usize) as i32);
    let frag_y = VInt::from_fn(|i| (i / TILE_SIZE as usize) as i32);

    let mut row0 = frag_x * a12 + frag_y * b12 + w0;
    let mut row1 = frag_x * a20 + frag_y * b20 + w1;
    let mut row2 = frag_x * a01 + frag_y * b01 + w2;

    let rcp_area = VFloat::splat(tri.rcp_area[lane]);
    let z0 = VFloat::splat(tri.vertices[0].position.z[lane]);
    let dz1 = VFloat::splat(tri.vertices[1].position.z[lane]);
    let dz2 = VFloat::splat(tri.vertices[2].position.z[lane]);

    let mut y = min_y;
    while y <= max_y {
        let (mut e0, mut e1, mut e2) = (row0, row1, row2);

        let mut x = min_x;
        while x <= max_x {
            count_call!(FUNCTION_COUNTERS.tiles_tested);
            let coverage = (e0 | e1 | e2).non_negative();

            if coverage.any() {
                let offset = fb.pixel_offset(x as u32, y as u32);
                let bary1 = e1.to_float() * rcp_area;
                let bary2 = e2.to_float() * rcp_area;
                let depth = dz1.fma(bary1, dz2.fma(bary2, z0));

                let stored = VFloat::load(&fb.depth()[offset..offset + LANES]);
                let mask = coverage & depth.lt(stored);

                if mask.any() {
                    count_call!(FUNCTION_COUNTERS.tiles_shaded);
                    let mut vars = VaryingBuffer::new(tri, lane, x as u32, y as u32, offset, bary1, bary2);
                    vars.tile_mask = mask;
                    vars.depth = depth;
                    if perspective_correct {
                        vars.apply_perspective_correction();
                    }
                    shader.shade_pixels(fb, &vars);
                }
            }

            e0 += a12 * tile;
            e1 += a20 * tile;
            e2 += a01 * tile;
            x += tile;
        }

        row0 += b12 * tile;
        row1 += b20 * tile;
        row2 += b01 * tile;
        y += tile;
    }
}

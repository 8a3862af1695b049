/// Homogeneous clip-space polygon clipping (Sutherland-Hodgman)
///
/// Triangles crossing the view volume are clipped one lane at a time into a
/// small fixed arena of vertices; the resulting convex polygon is fanned back
/// into triangle packets by the caller.
use glam::Vec2;

use super::triangle::{TrianglePacket, MAX_ATTRIBS};
use crate::simd::{VFloat, VFloat4, VMask, LANES};

/// Arena capacity. A triangle clipped by all six planes needs at most 3 + 2 * 6 vertices.
pub const MAX_VERTICES: usize = 24;

/// Position (4) plus custom attributes.
pub const VERTEX_STRIDE: usize = 4 + MAX_ATTRIBS;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Plane {
    Left = 0,
    Right = 1,
    Bottom = 2,
    Top = 3,
    Near = 4,
    Far = 5,
}

impl Plane {
    pub const ALL: [Plane; 6] = [Plane::Left, Plane::Right, Plane::Bottom, Plane::Top, Plane::Near, Plane::Far];

    #[inline(always)]
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Signed distance of a clip-space point to the plane; negative is outside.
    #[inline(always)]
    pub fn distance(self, x: f32, y: f32, z: f32, w: f32, guard_band: Vec2) -> f32 {
        match self {
            Plane::Left => x + guard_band.x * w,
            Plane::Right => guard_band.x * w - x,
            Plane::Bottom => y + guard_band.y * w,
            Plane::Top => guard_band.y * w - y,
            Plane::Near => z,
            Plane::Far => w - z,
        }
    }
}

/// Clip-space vertex: x, y, z, w followed by the custom attributes.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClipVertex {
    pub attribs: [f32; VERTEX_STRIDE],
}

impl Default for ClipVertex {
    fn default() -> Self {
        Self { attribs: [0.0; VERTEX_STRIDE] }
    }
}

impl ClipVertex {
    #[inline(always)]
    fn distance(&self, plane: Plane, guard_band: Vec2) -> f32 {
        let [x, y, z, w] = [self.attribs[0], self.attribs[1], self.attribs[2], self.attribs[3]];
        plane.distance(x, y, z, w, guard_band)
    }
}

/// Per-lane classification of a triangle packet against the view volume.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClipCodes {
    /// Triangles entirely inside every plane
    pub accept_mask: VMask,
    /// Triangles that straddle at least one plane and are not trivially outside
    pub non_trivial_mask: VMask,
    /// Union of the vertex outcodes per lane, i.e. the planes that need clipping
    pub out_codes: [u8; LANES],
}

impl ClipCodes {
    pub fn compute(tri: &TrianglePacket, guard_band: Vec2) -> Self {
        let oc0 = vertex_out_codes(&tri.vertices[0].position, guard_band);
        let oc1 = vertex_out_codes(&tri.vertices[1].position, guard_band);
        let oc2 = vertex_out_codes(&tri.vertices[2].position, guard_band);

        let mut out_codes = [0u8; LANES];
        let mut accept = 0u16;
        let mut non_trivial = 0u16;

        for i in 0..LANES {
            let any = oc0[i] | oc1[i] | oc2[i];
            let all = oc0[i] & oc1[i] & oc2[i];
            out_codes[i] = any;

            if any == 0 {
                accept |= 1 << i;
            } else if all == 0 {
                non_trivial |= 1 << i;
            }
        }

        Self {
            accept_mask: VMask(accept),
            non_trivial_mask: VMask(non_trivial),
            out_codes,
        }
    }
}

fn vertex_out_codes(pos: &VFloat4, guard_band: Vec2) -> [u8; LANES] {
    let gx = pos.w * guard_band.x;
    let gy = pos.w * guard_band.y;
    let distances = [pos.x + gx, gx - pos.x, pos.y + gy, gy - pos.y, pos.z, pos.w - pos.z];
    let zero = VFloat::splat(0.0);

    let mut codes = [0u8; LANES];
    for (plane, dist) in distances.iter().enumerate() {
        for lane in dist.lt(zero).lanes() {
            codes[lane] |= 1 << plane;
        }
    }
    codes
}

pub struct Clipper {
    vertices: [ClipVertex; MAX_VERTICES],
    /// Current polygon, as indices into `vertices`
    indices: [u8; MAX_VERTICES],
    scratch: [u8; MAX_VERTICES],
    count: usize,
    free_vtx: usize,
    num_attribs: usize,
    guard_band: Vec2,
}

impl Clipper {
    pub fn new(guard_band: Vec2) -> Self {
        Self {
            vertices: [ClipVertex::default(); MAX_VERTICES],
            indices: [0; MAX_VERTICES],
            scratch: [0; MAX_VERTICES],
            count: 0,
            free_vtx: 0,
            num_attribs: 0,
            guard_band,
        }
    }

    pub fn guard_band(&self) -> Vec2 {
        self.guard_band
    }

    pub fn set_guard_band(&mut self, guard_band: Vec2) {
        self.guard_band = guard_band;
    }

    /// Number of polygon vertices after the last clip.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of triangles the clipped polygon fans into.
    pub fn num_triangles(&self) -> usize {
        self.count.saturating_sub(2)
    }

    /// The `i`-th vertex of the current polygon, in winding order.
    pub fn vertex(&self, i: usize) -> &ClipVertex {
        &self.vertices[self.indices[i] as usize]
    }

    /// Resets the arena with triangle `lane` of a clip-space packet.
    pub fn load_triangle(&mut self, tri: &TrianglePacket, lane: usize, num_attribs: usize) {
        debug_assert!(lane < LANES);
        debug_assert!(num_attribs <= MAX_ATTRIBS);

        for (i, src) in tri.vertices.iter().enumerate() {
            let dst = &mut self.vertices[i].attribs;
            dst[0] = src.position.x.0[lane];
            dst[1] = src.position.y.0[lane];
            dst[2] = src.position.z.0[lane];
            dst[3] = src.position.w.0[lane];
            for j in 0..num_attribs {
                dst[4 + j] = src.attribs[j].0[lane];
            }
            self.indices[i] = i as u8;
        }
        self.count = 3;
        self.free_vtx = 3;
        self.num_attribs = num_attribs;
    }

    /// Clips the polygon against every plane whose bit is set in `planes`.
    pub fn clip(&mut self, planes: u8) {
        for plane in Plane::ALL {
            if planes & plane.bit() != 0 {
                self.clip_against_plane(plane);
                if self.count < 3 {
                    self.count = 0;
                    return;
                }
            }
        }
    }

    pub fn clip_against_plane(&mut self, plane: Plane) {
        let mut out_count = 0;

        for i in 0..self.count {
            let a = self.indices[i];
            let b = self.indices[(i + 1) % self.count];
            let da = self.vertices[a as usize].distance(plane, self.guard_band);
            let db = self.vertices[b as usize].distance(plane, self.guard_band);

            if da >= 0.0 {
                self.scratch[out_count] = a;
                out_count += 1;
            }
            if (da >= 0.0) != (db >= 0.0) {
                // Always interpolate from the inside vertex so shared edges produce identical vertices.
                let new_vtx = if da >= 0.0 {
                    self.intersect(a, b, da / (da - db))
                } else {
                    self.intersect(b, a, db / (db - da))
                };
                self.scratch[out_count] = new_vtx;
                out_count += 1;
            }
        }

        std::mem::swap(&mut self.indices, &mut self.scratch);
        self.count = out_count;
    }

    fn intersect(&mut self, from: u8, to: u8, t: f32) -> u8 {
        debug_assert!(self.free_vtx < MAX_VERTICES, "clipper vertex arena exhausted");

        let len = 4 + self.num_attribs;
        let va = self.vertices[from as usize];
        let vb = &self.vertices[to as usize];
        let mut dst = ClipVertex::default();
        for j in 0..len {
            dst.attribs[j] = va.attribs[j] + (vb.attribs[j] - va.attribs[j]) * t;
        }

        let index = self.free_vtx;
        self.vertices[index] = dst;
        self.free_vtx += 1;
        index as u8
    }

    /// Writes fan triangle `k` (polygon vertices 0, k+1, k+2) into `lane` of `dest`.
    pub fn store_triangle(&self, dest: &mut TrianglePacket, lane: usize, k: usize) {
        debug_assert!(k < self.num_triangles());

        let corners = [self.indices[0], self.indices[k + 1], self.indices[k + 2]];
        for (dst, &src) in dest.vertices.iter_mut().zip(corners.iter()) {
            let src = &self.vertices[src as usize].attribs;
            dst.position.x.0[lane] = src[0];
            dst.position.y.0[lane] = src[1];
            dst.position.z.0[lane] = src[2];
            dst.position.w.0[lane] = src[3];
            for j in 0..self.num_attribs {
                dst.attribs[j].0[lane] = src[4 + j];
            }
        }
    }
}

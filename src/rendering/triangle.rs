/// Batch-of-16 containers for shaded vertices and triangle edge-function state
use crate::simd::{VFloat, VFloat4, VInt, VMask, LANES};

/// Maximum number of custom per-vertex attributes.
pub const MAX_ATTRIBS: usize = 12;

/// Widest screen span, in pixels, of a triangle handed to [`TrianglePacket::setup`].
///
/// Edge values are bounded by `2 * span^2`, which must fit in an `i32`.
pub const MAX_SCREEN_EXTENT: f32 = 16384.0;

/// Screen-space winding that is discarded during setup.
///
/// Winding is judged on screen with Y pointing down, as the triangle appears in the framebuffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    Clockwise,
    #[default]
    CounterClockwise,
}

/// 16 vertices after vertex shading.
#[derive(Copy, Clone, Debug, Default)]
pub struct ShadedVertexPacket {
    /// Clip-space position; after triangle setup X/Y are screen coordinates,
    /// Z is z/w and W is 1/w.
    pub position: VFloat4,
    pub attribs: [VFloat; MAX_ATTRIBS],
}

impl ShadedVertexPacket {
    /// Writes `N` consecutive attributes starting at `attr_id`.
    #[inline]
    pub fn set_attribs<const N: usize>(&mut self, attr_id: usize, values: [VFloat; N]) {
        debug_assert!(attr_id + N <= MAX_ATTRIBS, "attribute range out of bounds");
        self.attribs[attr_id..attr_id + N].copy_from_slice(&values);
    }

    /// Attribute by id; ids -4..-1 address position x/y/z/w.
    #[inline(always)]
    pub fn attrib(&self, attr_id: i32) -> &VFloat {
        match attr_id {
            VaryingBuffer::ATTRIB_X => &self.position.x,
            VaryingBuffer::ATTRIB_Y => &self.position.y,
            VaryingBuffer::ATTRIB_Z => &self.position.z,
            VaryingBuffer::ATTRIB_W => &self.position.w,
            _ => &self.attribs[attr_id as usize],
        }
    }

    #[inline(always)]
    pub fn attrib_mut(&mut self, attr_id: i32) -> &mut VFloat {
        match attr_id {
            VaryingBuffer::ATTRIB_X => &mut self.position.x,
            VaryingBuffer::ATTRIB_Y => &mut self.position.y,
            VaryingBuffer::ATTRIB_Z => &mut self.position.z,
            VaryingBuffer::ATTRIB_W => &mut self.position.w,
            _ => &mut self.attribs[attr_id as usize],
        }
    }
}

/// 16 triangles with their edge functions.
///
/// Edge function `Eab(p) = Aab * (p.x - a.x) + Bab * (p.y - a.y)` with `A = dy`, `B = -dx`.
/// The weights are the edge values at the bounding box origin; a pixel is
/// inside when all three are non-negative.
#[derive(Clone, Default)]
pub struct TrianglePacket {
    pub min_x: VInt,
    pub min_y: VInt,
    pub max_x: VInt,
    pub max_y: VInt,
    pub weight0: VInt,
    pub weight1: VInt,
    pub weight2: VInt,
    pub a01: VInt,
    pub a12: VInt,
    pub a20: VInt,
    pub b01: VInt,
    pub b12: VInt,
    pub b20: VInt,
    /// 1 / (2 * signed area), always positive for live lanes
    pub rcp_area: VFloat,

    pub vertices: [ShadedVertexPacket; 3],
}

impl TrianglePacket {
    /// Lanes whose winding survives `cull_mode`, judged in clip space.
    ///
    /// Uses the determinant of the (x, y, w) rows, which gives the orientation
    /// of the visible part of the triangle even when vertices lie behind the eye.
    /// The Y flip of the viewport makes a positive determinant counter-clockwise
    /// on screen. Zero-determinant lanes are degenerate and never survive.
    pub fn facing_mask(&self, cull_mode: CullMode) -> VMask {
        let [p0, p1, p2] = [&self.vertices[0].position, &self.vertices[1].position, &self.vertices[2].position];

        let det = p0.x * (p1.y * p2.w - p2.y * p1.w) - p0.y * (p1.x * p2.w - p2.x * p1.w)
            + p0.w * (p1.x * p2.y - p2.x * p1.y);
        let zero = VFloat::splat(0.0);

        match cull_mode {
            CullMode::None => det.cmp_ne(zero),
            CullMode::Clockwise => det.gt(zero),
            CullMode::CounterClockwise => det.lt(zero),
        }
    }

    /// Computes edge variables from the shaded clip-space vertices.
    ///
    /// Applies the perspective divide and viewport transform in place, rewrites
    /// Z and the first `num_attribs` attributes of vertices 1 and 2 as deltas
    /// against vertex 0, and returns the lanes that survive culling: positive W,
    /// non-zero area, accepted winding and a non-empty bounding box.
    pub fn setup(&mut self, vp_width: i32, vp_height: i32, num_attribs: usize, cull_mode: CullMode) -> VMask {
        debug_assert!(num_attribs <= MAX_ATTRIBS);

        let half_w = VFloat::splat(vp_width as f32 * 0.5);
        let half_h = VFloat::splat(vp_height as f32 * 0.5);
        let mut mask = VMask::ALL;

        for v in self.vertices.iter_mut() {
            let pos = &mut v.position;
            mask &= pos.w.gt(VFloat::splat(0.0));

            let rw = pos.w.rcp();
            pos.x = (pos.x * rw).fma(half_w, half_w);
            pos.y = (pos.y * rw).fma(-half_h, half_h);
            pos.z = pos.z * rw;
            pos.w = rw;
        }

        let x0 = self.vertices[0].position.x.round_to_int();
        let y0 = self.vertices[0].position.y.round_to_int();
        let x1 = self.vertices[1].position.x.round_to_int();
        let y1 = self.vertices[1].position.y.round_to_int();
        let x2 = self.vertices[2].position.x.round_to_int();
        let y2 = self.vertices[2].position.y.round_to_int();

        let mut a01 = y0 - y1;
        let mut a12 = y1 - y2;
        let mut a20 = y2 - y0;
        let mut b01 = x1 - x0;
        let mut b12 = x2 - x1;
        let mut b20 = x0 - x2;

        // E01 evaluated at vertex 2. Positive means clockwise on screen.
        let mut area = a01 * (x2 - x0) + b01 * (y2 - y0);
        let zero = VInt::splat(0);

        mask &= !area.cmp_eq(zero);
        mask &= match cull_mode {
            CullMode::None => VMask::ALL,
            CullMode::Clockwise => area.lt(zero),
            CullMode::CounterClockwise => area.gt(zero),
        };

        // Flip counter-clockwise lanes so interior weights are always positive.
        let flip = area.lt(zero);
        if flip.any() {
            a01 = VInt::select(flip, -a01, a01);
            a12 = VInt::select(flip, -a12, a12);
            a20 = VInt::select(flip, -a20, a20);
            b01 = VInt::select(flip, -b01, b01);
            b12 = VInt::select(flip, -b12, b12);
            b20 = VInt::select(flip, -b20, b20);
            area = VInt::select(flip, -area, area);
        }

        let tile_align = !3;
        let min_x = x0.min(x1).min(x2).max(zero) & tile_align;
        let min_y = y0.min(y1).min(y2).max(zero) & tile_align;
        let max_x = x0.max(x1).max(x2).min(VInt::splat(vp_width - 1)) & tile_align;
        let max_y = y0.max(y1).max(y2).min(VInt::splat(vp_height - 1)) & tile_align;
        mask &= min_x.le(max_x) & min_y.le(max_y);

        self.weight0 = a12 * (min_x - x1) + b12 * (min_y - y1);
        self.weight1 = a20 * (min_x - x2) + b20 * (min_y - y2);
        self.weight2 = a01 * (min_x - x0) + b01 * (min_y - y0);

        self.rcp_area = area.to_float().rcp();
        mask &= self.rcp_area.is_finite();

        self.min_x = min_x;
        self.min_y = min_y;
        self.max_x = max_x;
        self.max_y = max_y;
        self.a01 = a01;
        self.a12 = a12;
        self.a20 = a20;
        self.b01 = b01;
        self.b12 = b12;
        self.b20 = b20;

        let [v0, v1, v2] = &mut self.vertices;
        v1.position.z -= v0.position.z;
        v2.position.z -= v0.position.z;
        for i in 0..num_attribs {
            v1.attribs[i] -= v0.attribs[i];
            v2.attribs[i] -= v0.attribs[i];
        }

        mask
    }
}

/// Read-only view of one triangle's interpolated attributes over a 4x4 tile.
pub struct VaryingBuffer<'a> {
    vertices: &'a [ShadedVertexPacket; 3],
    lane: usize,

    /// Top-left pixel of the tile
    pub x: u32,
    pub y: u32,
    /// Offset of the tile in the framebuffer planes
    pub tile_offset: usize,
    /// Pixels covered by the triangle that passed the depth test
    pub tile_mask: VMask,
    /// Barycentric weights of vertices 1 and 2
    pub w1: VFloat,
    pub w2: VFloat,
    /// Interpolated z/w
    pub depth: VFloat,
}

impl<'a> VaryingBuffer<'a> {
    pub const ATTRIB_X: i32 = -4;
    pub const ATTRIB_Y: i32 = -3;
    pub const ATTRIB_Z: i32 = -2;
    pub const ATTRIB_W: i32 = -1;

    /// Varyings for triangle `lane` of a packet that went through [`TrianglePacket::setup`].
    pub fn new(triangle: &'a TrianglePacket, lane: usize, x: u32, y: u32, tile_offset: usize, w1: VFloat, w2: VFloat) -> Self {
        debug_assert!(lane < LANES);
        Self {
            vertices: &triangle.vertices,
            lane,
            x,
            y,
            tile_offset,
            tile_mask: VMask::NONE,
            w1,
            w2,
            depth: VFloat::default(),
        }
    }

    /// Attribute value without interpolation.
    /// For `vertex_id != 0` this is `attr[vertex_id] - attr[0]`, except for the
    /// position X, Y (screen pixels) and W (1/w), which are absolute.
    #[inline(always)]
    pub fn get_flat(&self, attr_id: i32, vertex_id: usize) -> VFloat {
        debug_assert!((-4..MAX_ATTRIBS as i32).contains(&attr_id));
        debug_assert!(vertex_id < 3);
        VFloat::splat(self.vertices[vertex_id].attrib(attr_id).0[self.lane])
    }

    /// Interpolates an attribute with the current barycentric weights: `v0 + d1 * w1 + d2 * w2`.
    ///
    /// Only Z and the custom attributes are stored as deltas, so X, Y and W can't be interpolated.
    #[inline(always)]
    pub fn get_smooth(&self, attr_id: i32) -> VFloat {
        debug_assert!(attr_id >= Self::ATTRIB_Z, "position X, Y and W are not interpolatable");
        let v0 = self.get_flat(attr_id, 0);
        let v1 = self.get_flat(attr_id, 1);
        let v2 = self.get_flat(attr_id, 2);
        v1.fma(self.w1, v2.fma(self.w2, v0))
    }

    /// Interpolates `N` consecutive attributes.
    #[inline(always)]
    pub fn get_smooth_n<const N: usize>(&self, attr_id: i32) -> [VFloat; N] {
        std::array::from_fn(|i| self.get_smooth(attr_id + i as i32))
    }

    /// Converts the screen-linear weights into perspective-correct ones.
    pub fn apply_perspective_correction(&mut self) {
        let v0 = self.get_flat(Self::ATTRIB_W, 0);
        let v1 = self.get_flat(Self::ATTRIB_W, 1);
        let v2 = self.get_flat(Self::ATTRIB_W, 2);
        let vp = (v1 - v0).fma(self.w1, (v2 - v0).fma(self.w2, v0)).rcp();

        self.w1 *= vp * v1;
        self.w2 *= vp * v2;
    }
}

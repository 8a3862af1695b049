// Shared vertex layouts and shaders for the integration tests
#![allow(dead_code)]

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::mem::{offset_of, size_of};
use std::sync::atomic::{AtomicUsize, Ordering};
use swrast::simd::transform_point;
use swrast::{
    AttribFormat, Framebuffer, IndexFormat, Rasterizer, RasterizerConfig, ShadedVertexPacket, ShaderProgram,
    VaryingBuffer, VertexReader, VFloat, VInt,
};

pub const CLEAR_COLOR: u32 = 0xFF20_2020;
pub const WHITE: u32 = 0xFFFF_FFFF;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { pos: [x, y, z], uv: [0.0, 0.0] }
    }

    pub fn with_uv(x: f32, y: f32, z: f32, u: f32, v: f32) -> Self {
        Self { pos: [x, y, z], uv: [u, v] }
    }
}

pub const STRIDE: usize = size_of::<Vertex>();

/// Maps pixel coordinates (y down) to clip space, passing z through with w = 1.
pub fn screen_projection(width: u32, height: u32) -> Mat4 {
    Mat4::from_translation(Vec3::new(-1.0, 1.0, 0.0))
        * Mat4::from_scale(Vec3::new(2.0 / width as f32, -2.0 / height as f32, 1.0))
}

fn read_vertex(shader_mvp: &Mat4, vertices: &VertexReader, output: &mut ShadedVertexPacket) {
    let [x, y, z] = vertices.read_attribs::<3>(offset_of!(Vertex, pos), STRIDE, AttribFormat::F32);
    output.position = transform_point(shader_mvp, x, y, z);
    output.set_attribs(0, vertices.read_attribs::<2>(offset_of!(Vertex, uv), STRIDE, AttribFormat::F32));
}

/// Writes a constant color and counts shaded pixels.
pub struct FlatShader {
    pub mvp: Mat4,
    pub color: u32,
    pub pixels_shaded: AtomicUsize,
}

impl FlatShader {
    pub fn new(mvp: Mat4, color: u32) -> Self {
        Self { mvp, color, pixels_shaded: AtomicUsize::new(0) }
    }

    pub fn pixels_shaded(&self) -> usize {
        self.pixels_shaded.load(Ordering::Relaxed)
    }
}

impl ShaderProgram for FlatShader {
    const NUM_CUSTOM_ATTRIBS: usize = 2;

    fn shade_vertices(&self, vertices: &VertexReader, output: &mut ShadedVertexPacket) {
        read_vertex(&self.mvp, vertices, output);
    }

    fn shade_pixels(&self, fb: &mut Framebuffer, vars: &VaryingBuffer) {
        self.pixels_shaded.fetch_add(vars.tile_mask.count() as usize, Ordering::Relaxed);
        fb.write_tile(vars.tile_offset, vars.tile_mask, VInt::splat(self.color as i32), vars.depth);
    }
}

/// Writes the interpolated UV as 8-bit red/green.
pub struct UvShader {
    pub mvp: Mat4,
}

impl ShaderProgram for UvShader {
    const NUM_CUSTOM_ATTRIBS: usize = 2;

    fn shade_vertices(&self, vertices: &VertexReader, output: &mut ShadedVertexPacket) {
        read_vertex(&self.mvp, vertices, output);
    }

    fn shade_pixels(&self, fb: &mut Framebuffer, vars: &VaryingBuffer) {
        let [u, v] = vars.get_smooth_n::<2>(0);
        let to_byte = |c: VFloat| (c.max(VFloat::splat(0.0)).min(VFloat::splat(1.0)) * 255.0).round_to_int();
        let color = to_byte(u) | (to_byte(v) << 8) | VInt::splat(0xFF00_0000u32 as i32);
        fb.write_tile(vars.tile_offset, vars.tile_mask, color, vars.depth);
    }
}

pub fn draw_indexed<S: ShaderProgram>(
    fb: &mut Framebuffer,
    config: RasterizerConfig,
    shader: &S,
    vertices: &[Vertex],
    indices: &[u32],
) {
    let mut reader = VertexReader::new(
        bytemuck::cast_slice(vertices),
        bytemuck::cast_slice(indices),
        indices.len(),
        IndexFormat::U32,
    )
    .expect("index buffer sized for its count");
    Rasterizer::new(config).draw(fb, &mut reader, shader);
}

pub fn count_color(fb: &Framebuffer, color: u32) -> usize {
    fb.color().iter().filter(|&&c| c == color).count()
}

// End-to-end coverage, depth and index decoding tests for the draw pipeline

mod common;

use common::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use swrast::{
    AttribFormat, CullMode, Framebuffer, IndexFormat, RasterizerConfig, VertexReader, LANES,
};

fn no_culling() -> RasterizerConfig {
    RasterizerConfig { cull_mode: CullMode::None, ..Default::default() }
}

#[test]
fn test_single_triangle_scenario() {
    let mut fb = Framebuffer::new(64, 64, 0);
    fb.clear(CLEAR_COLOR, 1.0);

    let shader = FlatShader::new(screen_projection(64, 64), WHITE);
    let vertices = [Vertex::new(10.0, 10.0, 0.5), Vertex::new(50.0, 10.0, 0.5), Vertex::new(10.0, 50.0, 0.5)];
    draw_indexed(&mut fb, RasterizerConfig::default(), &shader, &vertices, &[0, 1, 2]);

    assert_eq!(fb.pixel(20, 20), WHITE);
    assert_eq!(fb.pixel(5, 5), CLEAR_COLOR);
    assert_eq!(fb.pixel(60, 60), CLEAR_COLOR);
    assert_eq!(shader.pixels_shaded(), count_color(&fb, WHITE));
}

#[test]
fn test_culling_both_orientations() {
    let vertices = [Vertex::new(10.0, 10.0, 0.5), Vertex::new(50.0, 10.0, 0.5), Vertex::new(10.0, 50.0, 0.5)];
    let clockwise = [0, 1, 2];
    let counter_clockwise = [0, 2, 1];

    let lit = |cull_mode: CullMode, indices: &[u32]| {
        let mut fb = Framebuffer::new(64, 64, 0);
        fb.clear(CLEAR_COLOR, 1.0);
        let shader = FlatShader::new(screen_projection(64, 64), WHITE);
        draw_indexed(&mut fb, RasterizerConfig { cull_mode, ..Default::default() }, &shader, &vertices, indices);
        count_color(&fb, WHITE)
    };

    let full = lit(CullMode::None, &clockwise);
    assert!(full > 0);
    assert_eq!(lit(CullMode::None, &counter_clockwise), full);

    assert_eq!(lit(CullMode::CounterClockwise, &clockwise), full);
    assert_eq!(lit(CullMode::CounterClockwise, &counter_clockwise), 0);

    assert_eq!(lit(CullMode::Clockwise, &clockwise), 0);
    assert_eq!(lit(CullMode::Clockwise, &counter_clockwise), full);
}

/// Reference coverage: pixel (x, y) is lit when all three integer edge
/// functions are non-negative for the triangle's orientation.
fn reference_coverage(points: [(i32, i32); 3], size: i32) -> usize {
    let edge = |a: (i32, i32), b: (i32, i32), p: (i32, i32)| (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    let [p0, p1, p2] = points;
    let sign = edge(p0, p1, p2).signum();

    let mut count = 0;
    for y in 0..size {
        for x in 0..size {
            let w = [edge(p1, p2, (x, y)), edge(p2, p0, (x, y)), edge(p0, p1, (x, y))];
            if w.iter().all(|&e| e * sign >= 0) {
                count += 1;
            }
        }
    }
    count
}

#[test]
fn test_coverage_matches_edge_functions_and_converges_to_area() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    for _ in 0..6 {
        // Lattice points in 1/64 units map to exact pixel coordinates at every size below.
        let (points, area) = loop {
            let pts: [(i32, i32); 3] = std::array::from_fn(|_| (rng.gen_range(0..=64), rng.gen_range(0..=64)));
            let [a, b, c] = pts;
            let area = ((b.0 - a.0) * (c.1 - a.1) - (c.0 - a.0) * (b.1 - a.1)).abs() as f64 / 2.0;
            if area > 300.0 {
                break (pts, area / (64.0 * 64.0));
            }
        };

        let mut errors = Vec::new();
        for size in [64u32, 256, 1024] {
            let scale = size as i32 / 64;
            let vertices: Vec<Vertex> = points
                .iter()
                .map(|&(x, y)| Vertex::new((x * scale) as f32, (y * scale) as f32, 0.5))
                .collect();

            let mut fb = Framebuffer::new(size, size, 0);
            fb.clear(CLEAR_COLOR, 1.0);
            let shader = FlatShader::new(screen_projection(size, size), WHITE);
            draw_indexed(&mut fb, no_culling(), &shader, &vertices, &[0, 1, 2]);

            let lit = count_color(&fb, WHITE);
            if size <= 256 {
                let scaled = points.map(|(x, y)| (x * scale, y * scale));
                assert_eq!(lit, reference_coverage(scaled, size as i32), "{points:?} at {size}");
            }

            let analytic = area * (size * size) as f64;
            errors.push((lit as f64 - analytic).abs() / analytic);
        }

        assert!(errors[2] < errors[0], "{points:?}: {errors:?}");
        assert!(errors[2] < 0.02, "{points:?}: {errors:?}");
    }
}

#[test]
fn test_depth_test_is_idempotent() {
    let mut fb = Framebuffer::new(64, 64, 0);
    fb.clear(CLEAR_COLOR, 1.0);

    let shader = FlatShader::new(screen_projection(64, 64), WHITE);
    let vertices = [Vertex::new(4.0, 4.0, 0.3), Vertex::new(60.0, 8.0, 0.6), Vertex::new(12.0, 60.0, 0.9)];

    draw_indexed(&mut fb, no_culling(), &shader, &vertices, &[0, 1, 2]);
    let first_pass = shader.pixels_shaded();
    let depth = fb.depth().to_vec();
    assert!(first_pass > 0);

    draw_indexed(&mut fb, no_culling(), &shader, &vertices, &[0, 1, 2]);
    assert_eq!(shader.pixels_shaded(), first_pass);
    assert_eq!(fb.depth(), &depth[..]);
}

#[test]
fn test_depth_picks_nearest_triangle() {
    let mut fb = Framebuffer::new(64, 64, 0);
    fb.clear(CLEAR_COLOR, 1.0);

    let far = FlatShader::new(screen_projection(64, 64), 0xFF00_00FF);
    let near = FlatShader::new(screen_projection(64, 64), 0xFFFF_0000);
    let quad = |z: f32| {
        [Vertex::new(0.0, 0.0, z), Vertex::new(64.0, 0.0, z), Vertex::new(0.0, 64.0, z), Vertex::new(64.0, 64.0, z)]
    };
    let indices = [0, 1, 2, 1, 3, 2];

    draw_indexed(&mut fb, RasterizerConfig::default(), &near, &quad(0.2), &indices);
    draw_indexed(&mut fb, RasterizerConfig::default(), &far, &quad(0.8), &indices);

    assert_eq!(count_color(&fb, 0xFFFF_0000), 64 * 64);
    assert!(fb.depth().iter().all(|&d| (d - 0.2).abs() < 1e-6));
}

#[test]
fn test_index_formats_are_equivalent() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let vertices: Vec<Vertex> = (0..200)
        .map(|_| Vertex::with_uv(rng.gen_range(0.0..128.0), rng.gen_range(0.0..128.0), rng.gen_range(0.1..0.9), rng.gen(), rng.gen()))
        .collect();
    let indices: Vec<u32> = (0..150).map(|_| rng.gen_range(0..200)).collect();

    let as_u8: Vec<u8> = indices.iter().map(|&i| i as u8).collect();
    let as_u16: Vec<u16> = indices.iter().map(|&i| i as u16).collect();
    let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);

    let readers = [
        VertexReader::new(vertex_bytes, &as_u8, indices.len(), IndexFormat::U8).unwrap(),
        VertexReader::new(vertex_bytes, bytemuck::cast_slice(&as_u16), indices.len(), IndexFormat::U16).unwrap(),
        VertexReader::new(vertex_bytes, bytemuck::cast_slice(&indices), indices.len(), IndexFormat::U32).unwrap(),
    ];

    let gathered: Vec<Vec<[u32; LANES]>> = readers
        .into_iter()
        .map(|mut reader| {
            let mut out = Vec::new();
            for offset in (0..indices.len()).step_by(LANES * 3) {
                for corner in reader.read_triangle_indices(offset) {
                    reader.set_indices(corner);
                    let [x, y, z, u, v] = reader.read_attribs::<5>(0, STRIDE, AttribFormat::F32);
                    out.extend([x, y, z, u, v].map(|a| a.0.map(f32::to_bits)));
                }
            }
            out
        })
        .collect();

    assert_eq!(gathered[0], gathered[1]);
    assert_eq!(gathered[1], gathered[2]);

    // The rendered images agree as well.
    let render = |index_bytes: &[u8], format: IndexFormat| {
        let mut fb = Framebuffer::new(128, 128, 0);
        fb.clear(CLEAR_COLOR, 1.0);
        let shader = UvShader { mvp: screen_projection(128, 128) };
        let mut reader = VertexReader::new(vertex_bytes, index_bytes, indices.len(), format).unwrap();
        swrast::Rasterizer::new(no_culling()).draw(&mut fb, &mut reader, &shader);
        fb.color().to_vec()
    };
    let reference = render(bytemuck::cast_slice(&indices), IndexFormat::U32);
    assert_eq!(render(&as_u8, IndexFormat::U8), reference);
    assert_eq!(render(bytemuck::cast_slice(&as_u16), IndexFormat::U16), reference);
}

#[test]
fn test_partial_and_empty_draws() {
    let mut fb = Framebuffer::new(64, 64, 0);
    fb.clear(CLEAR_COLOR, 1.0);
    let shader = FlatShader::new(screen_projection(64, 64), WHITE);
    let vertices = [Vertex::new(10.0, 10.0, 0.5), Vertex::new(50.0, 10.0, 0.5), Vertex::new(10.0, 50.0, 0.5)];

    // Fewer than three indices draw nothing
    draw_indexed(&mut fb, no_culling(), &shader, &vertices, &[0, 1]);
    draw_indexed(&mut fb, no_culling(), &shader, &vertices, &[]);
    assert_eq!(count_color(&fb, WHITE), 0);

    // A trailing partial triangle is ignored
    draw_indexed(&mut fb, no_culling(), &shader, &vertices, &[0, 1, 2, 2]);
    assert!(count_color(&fb, WHITE) > 0);
}

#[test]
fn test_offscreen_and_degenerate_triangles_are_dropped() {
    let mut fb = Framebuffer::new(64, 64, 0);
    fb.clear(CLEAR_COLOR, 1.0);
    let shader = FlatShader::new(screen_projection(64, 64), WHITE);
    let vertices = [
        // Entirely left of the viewport
        Vertex::new(-90.0, 10.0, 0.5),
        Vertex::new(-50.0, 10.0, 0.5),
        Vertex::new(-90.0, 50.0, 0.5),
        // Zero area
        Vertex::new(10.0, 10.0, 0.5),
        Vertex::new(30.0, 30.0, 0.5),
        Vertex::new(50.0, 50.0, 0.5),
        // Beyond the far plane
        Vertex::new(10.0, 10.0, 1.5),
        Vertex::new(50.0, 10.0, 1.5),
        Vertex::new(10.0, 50.0, 1.5),
    ];

    draw_indexed(&mut fb, no_culling(), &shader, &vertices, &[0, 1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(shader.pixels_shaded(), 0);
    assert_eq!(count_color(&fb, CLEAR_COLOR), 64 * 64);
}

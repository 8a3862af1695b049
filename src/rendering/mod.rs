pub mod binning;
pub mod clipper;
pub mod framebuffer;
/// Tiled software rasterization pipeline
/// Vertex reading, clipping, binning and tile scanning in 16-wide lanes
pub mod rasterizer;
pub mod triangle;
pub mod vertex_reader;

pub use binning::{TriangleBatch, BIN_SIZE};
pub use clipper::{ClipCodes, Clipper, Plane};
pub use framebuffer::{Framebuffer, TileMut, TILE_SIZE};
pub use rasterizer::{Rasterizer, RasterizerConfig, ShaderProgram};
pub use triangle::{CullMode, ShadedVertexPacket, TrianglePacket, VaryingBuffer, MAX_ATTRIBS};
pub use vertex_reader::{AttribFormat, IndexFormat, ReaderError, VertexReader};

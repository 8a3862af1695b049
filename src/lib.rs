pub mod perf;
pub mod rendering;
/// Software rasterizer - tiled, 16-lane triangle pipeline
/// Caller-supplied shaders drive vertex and pixel stages
pub mod simd;

pub use perf::{CounterSnapshot, FunctionCounters, FUNCTION_COUNTERS};
pub use rendering::{
    AttribFormat, CullMode, Framebuffer, IndexFormat, Rasterizer, RasterizerConfig, ReaderError, ShadedVertexPacket,
    ShaderProgram, VaryingBuffer, VertexReader,
};
pub use simd::{VFloat, VFloat4, VInt, VMask, LANES};

/// Triangle batching and screen-space binning
///
/// Set-up triangle packets are accumulated in a fixed-size batch. Each live
/// lane is recorded in every 128x128 bin its bounding box touches, so a flush
/// can shade bin by bin while the bin's framebuffer tiles stay in cache.
use super::triangle::TrianglePacket;
use crate::simd::{VMask, LANES};

pub const BIN_SIZE_LOG2: u32 = 7;
/// Bin size in pixels (128x128)
pub const BIN_SIZE: usize = 1 << BIN_SIZE_LOG2;

/// Maximum number of triangles in one batch
pub const MAX_TRIANGLES: usize = 4096;
pub const MAX_PACKETS: usize = MAX_TRIANGLES / LANES;

/// Packets kept free for clipper output when the batch reports full.
/// A full packet of clipped triangles fans into at most 16 * 7 triangles.
pub const CLIP_HEADROOM: usize = 24;

/// Triangle identifier inside a batch: `slot * LANES + lane`
pub type TriangleId = u16;

pub struct TriangleBatch {
    triangles: Box<[TrianglePacket]>,
    count: usize,
    /// Per-bin triangle lists (bin index -> triangle ids)
    bins: Vec<Vec<TriangleId>>,
    bins_x: usize,
    bins_y: usize,
    width: u32,
    height: u32,
}

impl TriangleBatch {
    pub fn new() -> Self {
        Self {
            triangles: vec![TrianglePacket::default(); MAX_PACKETS].into_boxed_slice(),
            count: 0,
            bins: Vec::new(),
            bins_x: 0,
            bins_y: 0,
            width: 0,
            height: 0,
        }
    }

    /// Sizes the bin grid for a render target. Does nothing if the size is unchanged.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.width == width && self.height == height {
            return;
        }
        debug_assert!(self.count == 0, "resizing a batch with pending triangles");

        self.width = width;
        self.height = height;
        self.bins_x = (width as usize).div_ceil(BIN_SIZE);
        self.bins_y = (height as usize).div_ceil(BIN_SIZE);
        self.bins = vec![Vec::new(); self.bins_x * self.bins_y];

        log::debug!("Binning grid resized to {}x{} bins for {}x{}", self.bins_x, self.bins_y, width, height);
    }

    /// Reserves a packet slot and returns its index.
    pub fn alloc(&mut self) -> usize {
        debug_assert!(self.count < MAX_PACKETS, "triangle batch overflow");
        let slot = self.count;
        self.count += 1;
        slot
    }

    /// True once there's no longer room for a new packet and its clipper output.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.count >= MAX_PACKETS - CLIP_HEADROOM
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of allocated packets.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn packet(&self, slot: usize) -> &TrianglePacket {
        &self.triangles[slot]
    }

    #[inline]
    pub fn packet_mut(&mut self, slot: usize) -> &mut TrianglePacket {
        &mut self.triangles[slot]
    }

    /// Adds the lanes in `mask` of packet `slot` to every bin their bounding box overlaps.
    /// Bounds must already be clamped to the render target.
    pub fn bin_lanes(&mut self, slot: usize, mask: VMask) {
        let tri = &self.triangles[slot];

        for lane in mask.lanes() {
            let bx0 = (tri.min_x[lane] >> BIN_SIZE_LOG2) as usize;
            let by0 = (tri.min_y[lane] >> BIN_SIZE_LOG2) as usize;
            let bx1 = (tri.max_x[lane] >> BIN_SIZE_LOG2) as usize;
            let by1 = (tri.max_y[lane] >> BIN_SIZE_LOG2) as usize;
            debug_assert!(bx1 < self.bins_x && by1 < self.bins_y);

            let id = (slot * LANES + lane) as TriangleId;
            for by in by0..=by1 {
                let row = by * self.bins_x;
                for bx in bx0..=bx1 {
                    self.bins[row + bx].push(id);
                }
            }
        }
    }

    pub fn bins_x(&self) -> usize {
        self.bins_x
    }

    pub fn bins_y(&self) -> usize {
        self.bins_y
    }

    /// Triangle ids recorded in bin (bx, by), in submission order.
    pub fn bin(&self, bx: usize, by: usize) -> &[TriangleId] {
        &self.bins[by * self.bins_x + bx]
    }

    /// Drops every packet and empties the bins, keeping their allocations.
    pub fn clear(&mut self) {
        self.count = 0;
        for bin in &mut self.bins {
            bin.clear();
        }
    }
}

impl Default for TriangleBatch {
    fn default() -> Self {
        Self::new()
    }
}

use super::SmallBuffer;

/// Inline capacity for a Voronoi face ring.
///
/// Faces of cells in well-spaced point sets have 4-8 vertices; 16 covers
/// nearly all of them without spilling.
pub const RING_BUFFER_SIZE: usize = 16;

/// Inline capacity for per-insertion cavity bookkeeping.
pub const CAVITY_BUFFER_SIZE: usize = 32;

/// Vertex ring of a Voronoi face (indices into a block's vertex array).
pub type RingBuffer = SmallBuffer<u32, RING_BUFFER_SIZE>;

//! Attribute compression.
//!
//! Everything a layer stores per vertex is integer-quantized before it
//! reaches the GPU: positions become 16-bit grid coordinates with a 4x4
//! decode matrix, normals become octahedral byte pairs, UVs become 16-bit
//! grids with a 3x3 decode matrix, and colors become bytes. Large world
//! coordinates are first split into a double-precision tile origin plus
//! single-precision locals (RTC).

pub mod colors;
pub mod normals;
pub mod positions;
pub mod rtc;
pub mod uv;

pub use colors::{quantize_channel, quantize_colors};
pub use normals::{decode_normal, encode_normal, encode_normals};
pub use positions::{
    CompressedPositions, decode_matrix_from_boundary, decompress_position, quantize_positions,
};
pub use rtc::{RTC_THRESHOLD, TILE_SIZE, world_to_rtc};
pub use uv::{CompressedUvs, decompress_uv, quantize_uvs};

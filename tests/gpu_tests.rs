//! GPU Surface Tests
//!
//! Tests for:
//! - Headless backend allocation/upload accounting
//! - Out-of-range uploads rejected without corruption
//! - Program compile failure capture (fatal-but-contained)
//! - Scratch pool lease exclusivity

use strata::gpu::{BufferDesc, Gpu, TextureDesc, TextureFormat};
use strata::scratch::ScratchPool;
use strata::{Result, StrataError};

// ============================================================================
// Buffers
// ============================================================================

#[test]
fn buffer_lifecycle_accounting() {
    let gpu = Gpu::headless();
    let buffer = gpu.create_array_buffer(&BufferDesc::vertex("test", 4), &[0u8; 64]);
    let stats = gpu.stats();
    assert_eq!(stats.buffers_alive, 1);
    assert_eq!(stats.bytes_uploaded, 64);

    gpu.buffer_sub_data(buffer, 16, &[1u8; 16]);
    let stats = gpu.stats();
    assert_eq!(stats.buffer_sub_uploads, 1);
    assert_eq!(stats.bytes_uploaded, 80);

    gpu.destroy_buffer(buffer);
    assert_eq!(gpu.stats().buffers_alive, 0);
}

#[test]
fn buffer_out_of_range_upload_is_dropped() {
    let gpu = Gpu::headless();
    let buffer = gpu.create_array_buffer(&BufferDesc::vertex("test", 4), &[0u8; 16]);
    gpu.buffer_sub_data(buffer, 12, &[0u8; 16]);
    // The bad upload never counts.
    assert_eq!(gpu.stats().buffer_sub_uploads, 0);
}

// ============================================================================
// Textures
// ============================================================================

#[test]
fn texture_sub_image_accounting() {
    let gpu = Gpu::headless();
    let texture =
        gpu.create_texture_2d(&TextureDesc::data_table("table", 64, 4, TextureFormat::Rgba8));
    gpu.texture_sub_image_2d(texture, 0, 8, 1, 2, 1, &[0u8; 8]);
    let stats = gpu.stats();
    assert_eq!(stats.texture_sub_uploads, 1);

    // Out of bounds: dropped.
    gpu.texture_sub_image_2d(texture, 0, 63, 0, 4, 1, &[0u8; 16]);
    assert_eq!(gpu.stats().texture_sub_uploads, 1);

    gpu.destroy_texture(texture);
    assert_eq!(gpu.stats().textures_alive, 0);
}

// ============================================================================
// Programs
// ============================================================================

#[test]
fn program_compiles_and_links() {
    let gpu = Gpu::headless();
    let program = gpu.create_program("void main() {}", "void main() {}");
    assert!(program.is_linked());
    assert!(Gpu::require_linked(&program).is_ok());
}

#[test]
fn program_failure_is_contained() {
    let gpu = Gpu::headless();
    let program = gpu.create_program("#error broken", "void main() {}");
    assert!(!program.is_linked());
    assert!(program.errors().is_some_and(|e| !e.is_empty()));

    // The failure maps to the fatal kind but never panics.
    let err: Result<()> = Gpu::require_linked(&program);
    assert!(matches!(err, Err(StrataError::ProgramCompile(_))));
}

// ============================================================================
// Scratch pool
// ============================================================================

#[test]
fn scratch_lease_is_exclusive_and_scoped() {
    let pool = ScratchPool::new();
    {
        let mut lease = pool.acquire().unwrap();
        lease.f32s.extend_from_slice(&[1.0, 2.0]);
        // A second lease while one is out is a caller bug.
        assert!(matches!(pool.acquire(), Err(StrataError::ScratchBusy)));
    }
    // Released on drop; the next lease starts cleared.
    let lease = pool.acquire().unwrap();
    assert!(lease.f32s.is_empty());
}

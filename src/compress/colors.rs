//! Color quantization.

/// Quantizes `[0, 1]` float colors to RGBA bytes.
///
/// `stride` is 3 for RGB input or 4 for RGBA; three-component input gets
/// an opaque alpha appended so every stored color is a 4-byte cell.
#[must_use]
pub fn quantize_colors(colors: &[f32], stride: usize) -> Vec<u8> {
    debug_assert!(stride == 3 || stride == 4);
    debug_assert_eq!(colors.len() % stride, 0);

    let mut out = Vec::with_capacity(colors.len() / stride * 4);
    for c in colors.chunks_exact(stride) {
        out.push(quantize_channel(c[0]));
        out.push(quantize_channel(c[1]));
        out.push(quantize_channel(c[2]));
        out.push(if stride == 4 {
            quantize_channel(c[3])
        } else {
            255
        });
    }
    out
}

/// Quantizes a single `[0, 1]` channel to a byte.
#[must_use]
pub fn quantize_channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

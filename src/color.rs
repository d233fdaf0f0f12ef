//! Fixed color correction applied to every captured frame.
//!
//! The sensor runs warm-blue under the fixed white-balance gains, so each frame is
//! pushed toward red, highlights are cooled slightly, and the whole image is lifted.
//! Gains are per physical color; `PixelFormat::rgb_indices` maps them onto the
//! frame's byte layout and the output keeps the input's channel order.

use crate::frame::{CorrectedFrame, RawFrame, CHANNELS};

pub const RED_GAIN: f32 = 1.15;
pub const GREEN_GAIN: f32 = 1.0;
pub const BLUE_GAIN: f32 = 0.75;

/// Mean scaled brightness above which a pixel counts as a highlight (strict).
pub const HIGHLIGHT_THRESHOLD: f32 = 200.0;

/// (red, green, blue) shift applied to highlight pixels.
pub const HIGHLIGHT_SHIFT: [f32; 3] = [-10.0, -5.0, 15.0];

/// Flat offset added to every channel of every pixel.
pub const BRIGHTEN_OFFSET: f32 = 15.0;

/// Apply the color correction to a whole frame.
///
/// Pure and deterministic: the same input always yields byte-identical output.
pub fn adjust_colors(frame: &RawFrame) -> CorrectedFrame {
    let (ri, gi, bi) = frame.format().rgb_indices();
    let src = frame.pixels();
    let mut out = vec![0u8; src.len()];

    for (px, dst) in src.chunks_exact(CHANNELS).zip(out.chunks_exact_mut(CHANNELS)) {
        let [r, g, b] = adjust_pixel([px[ri], px[gi], px[bi]]);
        dst[ri] = r;
        dst[gi] = g;
        dst[bi] = b;
    }

    CorrectedFrame::from_parts(out, frame.width(), frame.height(), frame.format())
}

/// Correct a single pixel given as (red, green, blue).
pub fn adjust_pixel(rgb: [u8; 3]) -> [u8; 3] {
    let mut r = rgb[0] as f32 * RED_GAIN;
    let mut g = rgb[1] as f32 * GREEN_GAIN;
    let mut b = rgb[2] as f32 * BLUE_GAIN;

    if is_highlight((r + g + b) / 3.0) {
        r += HIGHLIGHT_SHIFT[0];
        g += HIGHLIGHT_SHIFT[1];
        b += HIGHLIGHT_SHIFT[2];
    }

    [
        to_channel(r + BRIGHTEN_OFFSET),
        to_channel(g + BRIGHTEN_OFFSET),
        to_channel(b + BRIGHTEN_OFFSET),
    ]
}

pub fn is_highlight(brightness: f32) -> bool {
    brightness > HIGHLIGHT_THRESHOLD
}

/// Clamp to [0, 255] and truncate. NaN maps to 0.
fn to_channel(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 255.0) as u8
}

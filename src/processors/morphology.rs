//! Directional binary morphology and projection profiles.
//!
//! `imageproc::morphology` provides isotropic structuring elements only;
//! table line extraction needs long 1xN / Nx1 kernels, so the directional
//! operators are implemented here as run-based passes over binary
//! `GrayImage` buffers (foreground = 255, background = 0).

use image::{GrayImage, Luma};

const FG: u8 = 255;

/// Erodes with a horizontal 1xN structuring element: a pixel survives only
/// when the whole N-wide window around it is foreground.
pub fn erode_horizontal(image: &GrayImage, len: u32) -> GrayImage {
    directional_pass(image, len, Axis::Horizontal, PassKind::Erode)
}

/// Dilates with a horizontal 1xN structuring element.
pub fn dilate_horizontal(image: &GrayImage, len: u32) -> GrayImage {
    directional_pass(image, len, Axis::Horizontal, PassKind::Dilate)
}

/// Erodes with a vertical Nx1 structuring element.
pub fn erode_vertical(image: &GrayImage, len: u32) -> GrayImage {
    directional_pass(image, len, Axis::Vertical, PassKind::Erode)
}

/// Dilates with a vertical Nx1 structuring element.
pub fn dilate_vertical(image: &GrayImage, len: u32) -> GrayImage {
    directional_pass(image, len, Axis::Vertical, PassKind::Dilate)
}

/// Morphological opening with a 1xN kernel: keeps only horizontal runs of
/// foreground at least `len` pixels long. Used to extract long horizontal
/// rule lines.
pub fn open_horizontal(image: &GrayImage, len: u32) -> GrayImage {
    dilate_horizontal(&erode_horizontal(image, len), len)
}

/// Morphological opening with an Nx1 kernel: keeps only vertical runs of
/// foreground at least `len` pixels long.
pub fn open_vertical(image: &GrayImage, len: u32) -> GrayImage {
    dilate_vertical(&erode_vertical(image, len), len)
}

/// Dilates with a `width x height` rectangular kernel. Used to fuse glyphs
/// into word/line blobs (kernel much wider than tall).
pub fn dilate_rect(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    dilate_vertical(&dilate_horizontal(image, width), height)
}

/// Pixel-wise union of two binary images.
pub fn combine(a: &GrayImage, b: &GrayImage) -> GrayImage {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let mut out = a.clone();
    for (po, pb) in out.pixels_mut().zip(b.pixels()) {
        if pb.0[0] == FG {
            *po = Luma([FG]);
        }
    }
    out
}

/// Clears every pixel of `image` inside the given rectangle (in place).
pub fn clear_rect(image: &mut GrayImage, x: u32, y: u32, width: u32, height: u32) {
    let right = (x + width).min(image.width());
    let bottom = (y + height).min(image.height());
    for py in y..bottom {
        for px in x..right {
            image.put_pixel(px, py, Luma([0]));
        }
    }
}

/// Foreground pixel count per row.
pub fn project_rows(image: &GrayImage) -> Vec<u32> {
    let mut counts = vec![0u32; image.height() as usize];
    for (_, y, p) in image.enumerate_pixels() {
        if p.0[0] == FG {
            counts[y as usize] += 1;
        }
    }
    counts
}

/// Foreground pixel count per column.
pub fn project_cols(image: &GrayImage) -> Vec<u32> {
    let mut counts = vec![0u32; image.width() as usize];
    for (x, _, p) in image.enumerate_pixels() {
        if p.0[0] == FG {
            counts[x as usize] += 1;
        }
    }
    counts
}

/// Clusters sorted positions into groups whose neighbors are at most
/// `min_gap` apart, returning each cluster's center. Table grid lines are a
/// few pixels thick; this collapses each thick line into one boundary.
pub fn cluster_positions(positions: &[u32], min_gap: u32) -> Vec<u32> {
    if positions.is_empty() {
        return Vec::new();
    }
    let mut centers = Vec::new();
    let mut start = positions[0];
    let mut prev = positions[0];
    for &pos in &positions[1..] {
        if pos.saturating_sub(prev) > min_gap {
            centers.push((start + prev) / 2);
            start = pos;
        }
        prev = pos;
    }
    centers.push((start + prev) / 2);
    centers
}

#[derive(Clone, Copy)]
enum Axis {
    Horizontal,
    Vertical,
}

#[derive(Clone, Copy)]
enum PassKind {
    Erode,
    Dilate,
}

/// One-dimensional erode/dilate along an axis using a sliding window of
/// foreground counts. The window is centered; even lengths extend one pixel
/// further to the left/top.
fn directional_pass(image: &GrayImage, len: u32, axis: Axis, kind: PassKind) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut out = GrayImage::new(width, height);
    if len == 0 || width == 0 || height == 0 {
        return out;
    }
    let len = len as i64;
    let before = len / 2;
    let after = len - before - 1;

    let (outer, inner) = match axis {
        Axis::Horizontal => (height, width),
        Axis::Vertical => (width, height),
    };

    for o in 0..outer {
        for i in 0..inner as i64 {
            let lo = (i - before).max(0);
            let hi = (i + after).min(inner as i64 - 1);
            let mut all = true;
            let mut any = false;
            for j in lo..=hi {
                let v = match axis {
                    Axis::Horizontal => image.get_pixel(j as u32, o).0[0],
                    Axis::Vertical => image.get_pixel(o, j as u32).0[0],
                };
                if v == FG {
                    any = true;
                } else {
                    all = false;
                }
            }
            // A truncated window at the border must not pass erosion: the
            // kernel would extend past the image.
            let truncated = (hi - lo + 1) < len;
            let keep = match kind {
                PassKind::Erode => all && !truncated,
                PassKind::Dilate => any,
            };
            if keep {
                match axis {
                    Axis::Horizontal => out.put_pixel(i as u32, o, Luma([FG])),
                    Axis::Vertical => out.put_pixel(o, i as u32, Luma([FG])),
                }
            }
        }
    }
    out
}

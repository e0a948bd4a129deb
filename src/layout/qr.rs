//! Machine-readable code detection.
//!
//! QR codes are located and decoded before any other layout analysis so
//! their pixels are never misread as text or table structure.

use crate::processors::BoundingBox;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A decoded machine-readable code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrCode {
    /// Decoded payload.
    pub data: String,
    /// Position on the page.
    pub bbox: BoundingBox,
}

/// Detects and decodes QR codes in the grayscale buffer.
///
/// Grids that are found but fail to decode are skipped: an undecodable code
/// carries no payload for the downstream AI and its area is better left to
/// the text detector.
pub fn detect_qr_codes(gray: &GrayImage) -> Vec<QrCode> {
    let mut prepared = rqrr::PreparedImage::prepare(gray.clone());
    let grids = prepared.detect_grids();

    let mut codes = Vec::new();
    for grid in grids {
        let bbox = bounds_to_bbox(&grid.bounds, gray.width(), gray.height());
        match grid.decode() {
            Ok((_, content)) => {
                debug!(target: "layout", bbox = ?bbox, "qr code decoded");
                codes.push(QrCode {
                    data: content,
                    bbox,
                });
            }
            Err(err) => {
                warn!(target: "layout", error = %err, "qr grid found but failed to decode");
            }
        }
    }
    codes
}

fn bounds_to_bbox(points: &[rqrr::Point; 4], width: u32, height: u32) -> BoundingBox {
    let xs = points.iter().map(|p| p.x.clamp(0, width as i32 - 1) as u32);
    let ys = points.iter().map(|p| p.y.clamp(0, height as i32 - 1) as u32);
    let min_x = xs.clone().min().unwrap_or(0);
    let max_x = xs.max().unwrap_or(0);
    let min_y = ys.clone().min().unwrap_or(0);
    let max_y = ys.max().unwrap_or(0);
    BoundingBox::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn plain_document_has_no_qr_codes() {
        let gray = GrayImage::from_pixel(200, 200, Luma([220]));
        assert!(detect_qr_codes(&gray).is_empty());
    }

    #[test]
    fn bounds_clamp_to_image() {
        let points = [
            rqrr::Point { x: -5, y: -5 },
            rqrr::Point { x: 50, y: -5 },
            rqrr::Point { x: 50, y: 50 },
            rqrr::Point { x: -5, y: 50 },
        ];
        let bbox = bounds_to_bbox(&points, 100, 100);
        assert_eq!(bbox, BoundingBox::new(0, 0, 51, 51));
    }
}

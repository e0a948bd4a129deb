//! # Stage Definition: Layout Analysis
//!
//! This stage is considered "Done" when it fulfills the following contract:
//!
//! - **Inputs**: binarized page buffer (ink = white) plus the grayscale
//!   buffer for machine-code decoding.
//! - **Outputs**: [`LayoutAnalysis`] with an ordered, non-overlapping list
//!   of [`Region`]s (tables carrying recovered grids and explicit cell
//!   children) and the decoded QR payloads.
//! - **Logging**: region counts per kind after detection.
//! - **Error Behavior**: a region with an empty bounding box is a violated
//!   structural invariant and aborts the document.
//! - **Invariants**:
//!     - Regions carry structural meaning only; no text is attached here.
//!     - Regions never overlap except a table with its own cells.
//!     - The returned order is the reading order (center-y, then x) that
//!       every downstream consumer relies on for concatenation.

pub mod qr;
pub mod table;

use crate::core::config::LayoutConfig;
use crate::core::errors::PipelineError;
use crate::processors::morphology::{clear_rect, combine, dilate_rect, open_horizontal, open_vertical};
use crate::processors::BoundingBox;
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use serde::{Deserialize, Serialize};
use tracing::info;

pub use qr::QrCode;
pub use table::TableGrid;

/// Structural classification of a page region.
///
/// Every consumer matches this set exhaustively; adding a kind is a
/// compile-visible change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// Top-of-page block (clinic letterhead, patient details).
    Header,
    /// Free-text block in the page body.
    BodyText,
    /// Ruled table.
    Table,
    /// A single cell inside a table; only ever a child of a `Table` region.
    TableCell,
    /// Bottom-of-page block.
    Footer,
    /// Wide, short block in the footer band; typically a handwritten
    /// signature.
    Signature,
    /// Machine-readable code (QR).
    MachineCode,
}

/// A structurally classified rectangular area of the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    /// Stable identifier; assigned in reading order.
    pub id: usize,
    /// Structural classification.
    pub kind: RegionKind,
    /// Position on the page.
    pub bbox: BoundingBox,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    /// Child regions; populated only for tables (their cells).
    pub children: Vec<Region>,
    /// Recovered grid; populated only for tables with visible rule lines.
    pub grid: Option<TableGrid>,
}

impl Region {
    fn new(kind: RegionKind, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            id: 0,
            kind,
            bbox,
            confidence,
            children: Vec::new(),
            grid: None,
        }
    }

    /// True for regions the recognition orchestrator should read.
    pub fn is_recognizable(&self) -> bool {
        // QR payloads are already decoded; running OCR over the code pattern
        // would only produce noise.
        !matches!(self.kind, RegionKind::MachineCode | RegionKind::TableCell)
    }
}

/// Output of layout analysis.
#[derive(Debug, Clone)]
pub struct LayoutAnalysis {
    /// Top-level regions in reading order.
    pub regions: Vec<Region>,
    /// Decoded machine-readable codes.
    pub qr_codes: Vec<QrCode>,
}

/// Detects document structure without understanding content: tables, text
/// blocks, headers, footers, signatures and machine codes, from pixel
/// geometry alone.
#[derive(Debug, Clone)]
pub struct LayoutDetector {
    config: LayoutConfig,
}

impl LayoutDetector {
    /// Creates a detector with the given parameters.
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    /// Runs layout analysis over the binarized page.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidRegion`] when a produced region has a
    /// degenerate bounding box, a violated structural invariant.
    pub fn detect(
        &self,
        binary: &GrayImage,
        gray: &GrayImage,
    ) -> Result<LayoutAnalysis, PipelineError> {
        let (width, height) = binary.dimensions();

        // Machine codes first; their area is excluded from everything else.
        let qr_codes = qr::detect_qr_codes(gray);
        let mut regions: Vec<Region> = qr_codes
            .iter()
            .map(|code| Region::new(RegionKind::MachineCode, code.bbox, 1.0))
            .collect();

        let tables = self.detect_tables(binary, width, height);
        let claimed: Vec<BoundingBox> = regions
            .iter()
            .map(|r| r.bbox)
            .chain(tables.iter().map(|t| t.bbox))
            .collect();
        regions.extend(tables);

        let text_blocks = self.detect_text_regions(binary, height, &claimed);
        regions.extend(text_blocks);

        // Reading order: top to bottom by vertical center, ties left to
        // right. Stable, so equal keys keep detection order.
        regions.sort_by_key(|r| (r.bbox.center_y(), r.bbox.x));
        for (id, region) in regions.iter_mut().enumerate() {
            region.id = id;
        }

        for region in &regions {
            if region.bbox.is_degenerate() {
                return Err(PipelineError::InvalidRegion {
                    message: format!("region {} has an empty bounding box", region.id),
                });
            }
        }

        info!(
            target: "layout",
            total = regions.len(),
            tables = regions.iter().filter(|r| r.kind == RegionKind::Table).count(),
            qr = qr_codes.len(),
            "layout analysis complete"
        );

        Ok(LayoutAnalysis { regions, qr_codes })
    }

    /// Finds ruled tables: long horizontal and vertical line segments are
    /// extracted independently, combined into one mask, and the bounding
    /// contours of its connected components become table candidates.
    fn detect_tables(&self, binary: &GrayImage, width: u32, height: u32) -> Vec<Region> {
        let h_len = (width / self.config.line_kernel_divisor).max(2);
        let v_len = (height / self.config.line_kernel_divisor).max(2);
        let h_lines = open_horizontal(binary, h_len);
        let v_lines = open_vertical(binary, v_len);
        let line_mask = combine(&h_lines, &v_lines);

        let min_area = self.config.min_block_area as u64 * self.config.table_area_factor as u64;

        let mut tables = Vec::new();
        for contour in find_contours::<u32>(&line_mask) {
            if contour.border_type != BorderType::Outer || contour.parent.is_some() {
                continue;
            }
            let bbox = BoundingBox::from_contour(&contour);
            // Accidental line noise produces small or thin candidates.
            if bbox.area() <= min_area
                || bbox.width <= self.config.table_min_width
                || bbox.height <= self.config.table_min_height
            {
                continue;
            }

            let mut region = Region::new(RegionKind::Table, bbox, 0.8);
            if let Some(grid) = table::recover_grid(&h_lines, &v_lines, &bbox, &self.config) {
                region.children = cell_children(&grid);
                region.grid = Some(grid);
            }
            tables.push(region);
        }
        tables
    }

    /// Finds non-table text: claimed areas are masked out, remaining
    /// foreground is dilated horizontally to fuse glyphs into line-sized
    /// blobs, and bounding contours become candidates classified by page
    /// position.
    fn detect_text_regions(
        &self,
        binary: &GrayImage,
        page_height: u32,
        claimed: &[BoundingBox],
    ) -> Vec<Region> {
        let mut masked = binary.clone();
        // Clearing is padded by the fuse kernel so dilation cannot bleed
        // text blobs back into claimed area.
        let pad = self.config.text_fuse_width;
        for bbox in claimed {
            let padded = bbox.padded(pad, masked.width(), masked.height());
            clear_rect(&mut masked, padded.x, padded.y, padded.width, padded.height);
        }

        let fused = dilate_rect(&masked, self.config.text_fuse_width, self.config.text_fuse_height);

        let mut blocks = Vec::new();
        for contour in find_contours::<u32>(&fused) {
            if contour.border_type != BorderType::Outer || contour.parent.is_some() {
                continue;
            }
            let bbox = BoundingBox::from_contour(&contour);
            if bbox.area() <= self.config.min_block_area as u64 {
                continue;
            }
            if claimed.iter().any(|c| c.intersects(&bbox)) {
                continue;
            }
            let kind = self.classify_position(&bbox, page_height);
            blocks.push(Region::new(kind, bbox, 0.7));
        }
        blocks
    }

    /// Position-based classification: the top band is header territory, the
    /// bottom band footer territory, with wide-short footer blocks read as
    /// signatures.
    fn classify_position(&self, bbox: &BoundingBox, page_height: u32) -> RegionKind {
        let center_y = bbox.center_y();
        let header_limit = (page_height as f32 * self.config.header_band_ratio) as u32;
        let footer_limit = (page_height as f32 * (1.0 - self.config.footer_band_ratio)) as u32;

        if center_y < header_limit {
            RegionKind::Header
        } else if center_y > footer_limit {
            let aspect = bbox.width as f32 / bbox.height.max(1) as f32;
            if aspect > self.config.signature_min_aspect
                && bbox.height < self.config.signature_max_height
            {
                RegionKind::Signature
            } else {
                RegionKind::Footer
            }
        } else {
            RegionKind::BodyText
        }
    }
}

/// Materializes a table's cells as explicit child regions.
fn cell_children(grid: &TableGrid) -> Vec<Region> {
    let mut children = Vec::with_capacity(grid.row_count() * grid.col_count());
    for row in 0..grid.row_count() {
        for col in 0..grid.col_count() {
            if let Some(rect) = grid.cell_rect(row, col) {
                children.push(Region::new(RegionKind::TableCell, rect, 0.8));
            }
        }
    }
    children
}

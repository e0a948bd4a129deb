//! Table grid recovery.
//!
//! Once a table region is confirmed, its internal grid is recovered from the
//! rule-line mask: the mask is projected onto each axis, positions with
//! enough coverage are clustered into distinct boundaries, and every piece
//! of content is later assigned to the cell whose boundaries contain it.

use crate::core::config::LayoutConfig;
use crate::processors::morphology::{cluster_positions, project_cols, project_rows};
use crate::processors::BoundingBox;
use image::GrayImage;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Recovered row/column boundaries of a table, in page coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableGrid {
    /// Row boundary y-positions, ascending; `n + 1` boundaries enclose `n`
    /// rows.
    pub row_bounds: Vec<u32>,
    /// Column boundary x-positions, ascending.
    pub col_bounds: Vec<u32>,
}

impl TableGrid {
    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.row_bounds.len().saturating_sub(1)
    }

    /// Number of columns.
    pub fn col_count(&self) -> usize {
        self.col_bounds.len().saturating_sub(1)
    }

    /// Rectangle of the cell at `(row, col)`.
    ///
    /// Returns `None` when the indices are out of range.
    pub fn cell_rect(&self, row: usize, col: usize) -> Option<BoundingBox> {
        if row >= self.row_count() || col >= self.col_count() {
            return None;
        }
        let x = self.col_bounds[col];
        let y = self.row_bounds[row];
        Some(BoundingBox::new(
            x,
            y,
            self.col_bounds[col + 1] - x,
            self.row_bounds[row + 1] - y,
        ))
    }

    /// Locates the cell containing the point `(x, y)`.
    pub fn cell_at(&self, x: u32, y: u32) -> Option<(usize, usize)> {
        let col = locate(&self.col_bounds, x)?;
        let row = locate(&self.row_bounds, y)?;
        Some((row, col))
    }
}

/// Index of the interval of `bounds` containing `value`.
fn locate(bounds: &[u32], value: u32) -> Option<usize> {
    if bounds.len() < 2 || value < bounds[0] || value >= bounds[bounds.len() - 1] {
        return None;
    }
    bounds
        .iter()
        .tuple_windows()
        .position(|(&lo, &hi)| value >= lo && value < hi)
}

/// Recovers a table's grid from the directional line masks.
///
/// `h_lines` / `v_lines` are the page-sized masks of long horizontal and
/// vertical rule lines. Returns `None` when fewer than two boundaries exist
/// on either axis; the region stays a table, just without cell structure.
pub fn recover_grid(
    h_lines: &GrayImage,
    v_lines: &GrayImage,
    table: &BoundingBox,
    config: &LayoutConfig,
) -> Option<TableGrid> {
    let h_crop = image::imageops::crop_imm(h_lines, table.x, table.y, table.width, table.height)
        .to_image();
    let v_crop = image::imageops::crop_imm(v_lines, table.x, table.y, table.width, table.height)
        .to_image();

    // A boundary line must span a meaningful fraction of the table.
    let row_min = (table.width as f32 * config.grid_coverage_fraction) as u32;
    let col_min = (table.height as f32 * config.grid_coverage_fraction) as u32;

    let row_positions: Vec<u32> = project_rows(&h_crop)
        .into_iter()
        .enumerate()
        .filter_map(|(y, count)| (count > row_min).then_some(y as u32))
        .collect();
    let col_positions: Vec<u32> = project_cols(&v_crop)
        .into_iter()
        .enumerate()
        .filter_map(|(x, count)| (count > col_min).then_some(x as u32))
        .collect();

    let mut row_bounds = cluster_positions(&row_positions, config.grid_merge_gap);
    let mut col_bounds = cluster_positions(&col_positions, config.grid_merge_gap);

    // Completion below can only extend detected rules to the table edges;
    // with no rules at all on an axis there is no grid to recover.
    if row_bounds.is_empty() || col_bounds.is_empty() {
        debug!(target: "layout", "table has no rule lines on at least one axis");
        return None;
    }

    // Border rules may fall outside the contour crop; make sure the grid
    // covers the full table so edge cells are not lost.
    complete_bounds(&mut row_bounds, table.height, config.grid_merge_gap);
    complete_bounds(&mut col_bounds, table.width, config.grid_merge_gap);

    if row_bounds.len() < 2 || col_bounds.len() < 2 {
        debug!(
            target: "layout",
            rows = row_bounds.len(),
            cols = col_bounds.len(),
            "table has no recoverable grid"
        );
        return None;
    }

    // Back to page coordinates.
    for b in &mut row_bounds {
        *b += table.y;
    }
    for b in &mut col_bounds {
        *b += table.x;
    }

    debug!(
        target: "layout",
        rows = row_bounds.len() - 1,
        cols = col_bounds.len() - 1,
        "table grid recovered"
    );
    Some(TableGrid {
        row_bounds,
        col_bounds,
    })
}

/// Ensures the boundary list starts at 0 and ends at `extent`.
fn complete_bounds(bounds: &mut Vec<u32>, extent: u32, merge_gap: u32) {
    if extent == 0 {
        return;
    }
    match bounds.first() {
        Some(&first) if first > merge_gap => bounds.insert(0, 0),
        None => bounds.insert(0, 0),
        _ => {}
    }
    if let Some(&last) = bounds.last() {
        if last + merge_gap < extent - 1 {
            bounds.push(extent - 1);
        }
    }
    if bounds.len() == 1 {
        bounds.push(extent - 1);
    }
}

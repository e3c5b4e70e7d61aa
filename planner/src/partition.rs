use log::debug;
use skyguard_structs::LocalPoint;

use crate::PlanError;

/// An `rows` x `cols` grid over a `width_m` x `height_m` rectangle whose
/// bottom-left corner is (0, 0). Width runs along east, height along north.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SectorGrid {
    pub rows: usize,
    pub cols: usize,
    pub width_m: f64,
    pub height_m: f64,
}

impl SectorGrid {
    pub fn new(width_m: f64, height_m: f64, rows: usize, cols: usize) -> Result<Self, PlanError> {
        // `!(x > 0)` also rejects NaN.
        if !(width_m > 0.0) {
            return Err(PlanError::InvalidDimension { name: "width_m", value: width_m });
        }
        if !(height_m > 0.0) {
            return Err(PlanError::InvalidDimension { name: "height_m", value: height_m });
        }
        if rows == 0 {
            return Err(PlanError::InvalidDimension { name: "rows", value: 0.0 });
        }
        if cols == 0 {
            return Err(PlanError::InvalidDimension { name: "cols", value: 0.0 });
        }
        Ok(Self { rows, cols, width_m, height_m })
    }

    pub fn cell_width(&self) -> f64 {
        self.width_m / self.cols as f64
    }

    pub fn cell_height(&self) -> f64 {
        self.height_m / self.rows as f64
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Center of cell (row, col). Row 0 is the bottom band, col 0 the left
    /// column.
    pub fn center(&self, row: usize, col: usize) -> LocalPoint {
        LocalPoint::new(
            (row as f64 + 0.5) * self.cell_height(),
            (col as f64 + 0.5) * self.cell_width(),
            0.0,
        )
    }

    /// Cell centers in row-major order: bottom row first, left to right.
    pub fn centers(&self) -> Vec<LocalPoint> {
        debug!(
            "partitioning {:.1}x{:.1} m into {}x{} sectors of {:.1}x{:.1} m",
            self.width_m,
            self.height_m,
            self.rows,
            self.cols,
            self.cell_width(),
            self.cell_height()
        );
        (0..self.rows)
            .flat_map(|row| (0..self.cols).map(move |col| (row, col)))
            .map(|(row, col)| self.center(row, col))
            .collect()
    }
}

/// Splits a `width_m` x `height_m` rectangle into `rows` x `cols` sectors and
/// returns their centers, row-major. `east_m` carries the width axis and
/// `north_m` the height axis; `down_m` is always 0.
pub fn partition(
    width_m: f64,
    height_m: f64,
    rows: usize,
    cols: usize,
) -> Result<Vec<LocalPoint>, PlanError> {
    Ok(SectorGrid::new(width_m, height_m, rows, cols)?.centers())
}

// ============================================================================
// LASSO SELECTION: freehand polygon region with inversion
// ============================================================================

use egui::Pos2;

use crate::geometry::point_in_polygon;

/// Minimum vertex count for a lasso to become an active selection.
pub const MIN_LASSO_POINTS: usize = 3;

/// Closed freehand polygon in scene space.
///
/// `active` is only set when a drag ends with enough points; while the user
/// is still dragging the path exists but is not active.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LassoSelection {
    pub points: Vec<Pos2>,
    pub inverted: bool,
    pub active: bool,
}

impl LassoSelection {
    /// Start a fresh path, discarding any previous selection.
    pub fn begin(&mut self, p: Pos2) {
        self.points.clear();
        self.points.push(p);
        self.inverted = false;
        self.active = false;
    }

    pub fn extend(&mut self, p: Pos2) {
        self.points.push(p);
    }

    /// Close the path.  Returns whether the selection became active.
    pub fn finish(&mut self) -> bool {
        self.active = self.points.len() >= MIN_LASSO_POINTS;
        self.active
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.inverted = false;
        self.active = false;
    }

    /// Flip between inside and outside.  Only meaningful when active.
    pub fn invert(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.inverted = !self.inverted;
        true
    }

    /// Anything worth drawing: a committed selection or a path in progress.
    pub fn has_path(&self) -> bool {
        self.points.len() >= 2
    }

    /// Is the scene point inside the selected region?
    pub fn contains(&self, p: Pos2) -> bool {
        point_in_polygon(p, &self.points) != self.inverted
    }

    /// Axis-aligned bounds of the path, if any.
    pub fn bounds(&self) -> Option<egui::Rect> {
        let first = *self.points.first()?;
        Some(
            self.points
                .iter()
                .fold(egui::Rect::from_min_max(first, first), |r, p| r.union(egui::Rect::from_min_max(*p, *p))),
        )
    }
}

//! Spatial partition of a grid for change detection.
//!
//! A [`Quadtree`] splits the grid into quadrants until every node is at most
//! `leaf_size` cells on each side. Nodes live in a flat arena built
//! breadth-first, so a node's children are contiguous and always come after
//! it; hashing in reverse arena order therefore sees children before their
//! parent.
//!
//! Each node carries a 64-bit FNV-1a hash of its cells. Two trees over
//! same-shaped grids compare in time proportional to the changed area:
//! matching subtrees are pruned at the first equal hash, and leaves with
//! differing hashes are confirmed against the actual cells.

use ansicast_grid::Grid;
use serde::{Deserialize, Serialize};

use crate::error::EncodeError;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Tuning for [`Quadtree::partition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadtreeParams {
    /// Maximum side length of a leaf, in cells.
    pub leaf_size: usize,
}

impl Default for QuadtreeParams {
    fn default() -> Self {
        Self { leaf_size: 4 }
    }
}

/// A rectangle of cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    pub row: usize,
    pub col: usize,
    pub height: usize,
    pub width: usize,
}

impl Region {
    pub fn new(row: usize, col: usize, height: usize, width: usize) -> Self {
        Self {
            row,
            col,
            height,
            width,
        }
    }

    pub fn area(&self) -> usize {
        self.height * self.width
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        (self.row..self.row + self.height).contains(&row)
            && (self.col..self.col + self.width).contains(&col)
    }

    /// Whether the region is non-empty and lies inside a `rows x cols` grid.
    pub fn fits(&self, rows: usize, cols: usize) -> bool {
        self.height > 0
            && self.width > 0
            && self.row.checked_add(self.height).is_some_and(|end| end <= rows)
            && self.col.checked_add(self.width).is_some_and(|end| end <= cols)
    }

    /// Cell indices covered by the region, row-major, for a grid `cols` wide.
    pub fn indices(&self, cols: usize) -> impl Iterator<Item = usize> + '_ {
        (self.row..self.row + self.height).flat_map(move |r| {
            let start = r * cols + self.col;
            start..start + self.width
        })
    }

    /// Split into at most four non-empty quadrants. Only sides longer than
    /// `leaf_size` are halved.
    fn split(&self, leaf_size: usize) -> impl Iterator<Item = Region> {
        let (top, bottom) = halve(self.height, leaf_size);
        let (left, right) = halve(self.width, leaf_size);
        let (row, col) = (self.row, self.col);
        [
            Region::new(row, col, top, left),
            Region::new(row, col + left, top, right),
            Region::new(row + top, col, bottom, left),
            Region::new(row + top, col + left, bottom, right),
        ]
        .into_iter()
        .filter(|r| r.area() > 0)
    }
}

fn halve(len: usize, leaf_size: usize) -> (usize, usize) {
    if len > leaf_size {
        let first = len.div_ceil(2);
        (first, len - first)
    } else {
        (len, 0)
    }
}

#[derive(Clone, Debug)]
struct Node {
    region: Region,
    /// Arena index of the first child; `0` for leaves (the root is never a
    /// child).
    first_child: usize,
    child_count: usize,
    hash: u64,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.child_count == 0
    }

    fn children(&self) -> std::ops::Range<usize> {
        self.first_child..self.first_child + self.child_count
    }
}

/// Hash tree over one grid.
#[derive(Clone, Debug)]
pub struct Quadtree {
    params: QuadtreeParams,
    nodes: Vec<Node>,
    grid: Grid,
}

impl Quadtree {
    /// Build the tree for `grid`.
    pub fn partition(grid: &Grid, params: QuadtreeParams) -> Self {
        let leaf_size = params.leaf_size.max(1);
        let mut nodes = vec![Node {
            region: Region::new(0, 0, grid.rows(), grid.cols()),
            first_child: 0,
            child_count: 0,
            hash: 0,
        }];

        let mut idx = 0;
        while idx < nodes.len() {
            let region = nodes[idx].region;
            if region.height > leaf_size || region.width > leaf_size {
                let first_child = nodes.len();
                nodes.extend(region.split(leaf_size).map(|region| Node {
                    region,
                    first_child: 0,
                    child_count: 0,
                    hash: 0,
                }));
                nodes[idx].first_child = first_child;
                nodes[idx].child_count = nodes.len() - first_child;
            }
            idx += 1;
        }

        let mut tree = Self {
            params: QuadtreeParams { leaf_size },
            nodes,
            grid: grid.clone(),
        };
        tree.rehash();
        tree
    }

    /// Re-summarize a new grid of the same shape, keeping the node layout.
    pub fn rebind(&mut self, grid: &Grid) -> Result<(), EncodeError> {
        if grid.rows() != self.rows() || grid.cols() != self.cols() {
            return Err(EncodeError::DimensionMismatch {
                rows: self.rows(),
                cols: self.cols(),
                got_rows: grid.rows(),
                got_cols: grid.cols(),
            });
        }
        self.grid = grid.clone();
        self.rehash();
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.grid.rows()
    }

    pub fn cols(&self) -> usize {
        self.grid.cols()
    }

    pub fn params(&self) -> QuadtreeParams {
        self.params
    }

    /// The grid this tree currently summarizes.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Regions whose content differs between `self` (the older tree) and
    /// `other`. See [`changed_regions_into`](Self::changed_regions_into).
    pub fn changed_regions(&self, other: &Quadtree) -> Result<Vec<Region>, EncodeError> {
        let mut out = Vec::new();
        self.changed_regions_into(other, &mut out)?;
        Ok(out)
    }

    /// Replace the contents of `out` with the changed regions.
    ///
    /// Regions are leaves, except that a node whose children all changed is
    /// reported once as the whole node. Order follows a depth-first walk,
    /// top-left quadrant first.
    pub fn changed_regions_into(
        &self,
        other: &Quadtree,
        out: &mut Vec<Region>,
    ) -> Result<(), EncodeError> {
        if self.rows() != other.rows()
            || self.cols() != other.cols()
            || self.params != other.params
        {
            return Err(EncodeError::DimensionMismatch {
                rows: self.rows(),
                cols: self.cols(),
                got_rows: other.rows(),
                got_cols: other.cols(),
            });
        }
        out.clear();
        self.diff(other, 0, out);
        Ok(())
    }

    /// Returns whether the whole node changed.
    fn diff(&self, other: &Quadtree, idx: usize, out: &mut Vec<Region>) -> bool {
        let node = &self.nodes[idx];
        if node.hash == other.nodes[idx].hash && !node.is_leaf() {
            return false;
        }

        if node.is_leaf() {
            let changed = node.hash != other.nodes[idx].hash
                || self.leaf_cells_differ(other, &node.region);
            if changed {
                out.push(node.region);
            }
            return changed;
        }

        let start = out.len();
        let mut all_changed = true;
        for child in node.children() {
            all_changed &= self.diff(other, child, out);
        }
        if all_changed {
            out.truncate(start);
            out.push(node.region);
        }
        all_changed
    }

    fn leaf_cells_differ(&self, other: &Quadtree, region: &Region) -> bool {
        let cols = self.cols();
        let (a, b) = (&self.grid, &other.grid);
        region.indices(cols).any(|i| {
            a.chars()[i] != b.chars()[i] || a.colors()[i] != b.colors()[i]
        })
    }

    fn rehash(&mut self) {
        let cols = self.grid.cols();
        for idx in (0..self.nodes.len()).rev() {
            let hash = if self.nodes[idx].is_leaf() {
                let region = self.nodes[idx].region;
                let mut h = FNV_OFFSET;
                for i in region.indices(cols) {
                    h = fnv(h, self.grid.chars()[i]);
                    h = fnv(h, self.grid.colors()[i]);
                }
                h
            } else {
                self.nodes[idx]
                    .children()
                    .fold(FNV_OFFSET, |h, child| {
                        self.nodes[child]
                            .hash
                            .to_le_bytes()
                            .iter()
                            .fold(h, |h, &b| fnv(h, b))
                    })
            };
            self.nodes[idx].hash = hash;
        }
    }
}

#[inline]
fn fnv(hash: u64, byte: u8) -> u64 {
    (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with(rows: usize, cols: usize, edits: &[(usize, usize, u8)]) -> Grid {
        let mut chars = vec![b' '; rows * cols];
        let colors = vec![0u8; rows * cols];
        for &(r, c, ch) in edits {
            chars[r * cols + c] = ch;
        }
        Grid::from_parts(rows, cols, &chars, &colors).unwrap()
    }

    fn params(leaf_size: usize) -> QuadtreeParams {
        QuadtreeParams { leaf_size }
    }

    #[test]
    fn test_partition_shape() {
        let tree = Quadtree::partition(&Grid::blank(8, 8), params(4));
        // Root plus four 4x4 leaves.
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.leaf_count(), 4);

        // Uneven sizes still cover every cell exactly once.
        let tree = Quadtree::partition(&Grid::blank(24, 80), params(4));
        let covered: usize = tree
            .nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| {
                assert!(n.region.height <= 4 && n.region.width <= 4);
                n.region.area()
            })
            .sum();
        assert_eq!(covered, 24 * 80);
    }

    #[test]
    fn test_children_follow_parent() {
        let tree = Quadtree::partition(&Grid::blank(13, 29), params(3));
        for (idx, node) in tree.nodes.iter().enumerate() {
            if !node.is_leaf() {
                assert!(node.first_child > idx);
                assert!((2..=4).contains(&node.child_count));
            }
        }
    }

    #[test]
    fn test_identical_grids_have_no_changes() {
        let grid = grid_with(24, 80, &[(3, 7, b'@'), (20, 79, b'#')]);
        let a = Quadtree::partition(&grid, params(4));
        let b = Quadtree::partition(&grid.clone(), params(4));
        assert!(a.changed_regions(&b).unwrap().is_empty());
    }

    #[test]
    fn test_single_cell_change_reports_its_leaf() {
        let before = grid_with(24, 80, &[]);
        let after = grid_with(24, 80, &[(10, 42, b'@')]);
        let a = Quadtree::partition(&before, params(4));
        let b = Quadtree::partition(&after, params(4));

        let regions = a.changed_regions(&b).unwrap();
        assert_eq!(regions.len(), 1);
        let leaf = regions[0];
        assert!(leaf.contains(10, 42));
        assert!(leaf.height <= 4 && leaf.width <= 4);

        // The reported region is exactly one leaf of the tree.
        assert!(a
            .nodes
            .iter()
            .any(|n| n.is_leaf() && n.region == leaf));
    }

    #[test]
    fn test_color_change_detected() {
        let chars = vec![b'x'; 16];
        let before = Grid::from_parts(4, 4, &chars, &[0; 16]).unwrap();
        let mut colors = [0u8; 16];
        colors[5] = 0xE0;
        let after = Grid::from_parts(4, 4, &chars, &colors).unwrap();

        let a = Quadtree::partition(&before, params(2));
        let b = Quadtree::partition(&after, params(2));
        assert_eq!(a.changed_regions(&b).unwrap(), vec![Region::new(0, 0, 2, 2)]);
    }

    #[test]
    fn test_full_change_coalesces_to_root() {
        let before = grid_with(8, 8, &[]);
        let edits: Vec<_> = (0..8)
            .flat_map(|r| (0..8).map(move |c| (r, c, b'#')))
            .collect();
        let after = grid_with(8, 8, &edits);

        let a = Quadtree::partition(&before, params(2));
        let b = Quadtree::partition(&after, params(2));
        assert_eq!(a.changed_regions(&b).unwrap(), vec![Region::new(0, 0, 8, 8)]);
    }

    #[test]
    fn test_rebind_reuses_layout() {
        let mut tree = Quadtree::partition(&grid_with(16, 16, &[]), params(4));
        let nodes = tree.node_count();
        let reference = Quadtree::partition(&grid_with(16, 16, &[(0, 0, b'a')]), params(4));

        tree.rebind(&grid_with(16, 16, &[(0, 0, b'a')])).unwrap();
        assert_eq!(tree.node_count(), nodes);
        assert!(tree.changed_regions(&reference).unwrap().is_empty());

        assert!(matches!(
            tree.rebind(&Grid::blank(8, 16)),
            Err(EncodeError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_mismatched_trees_rejected() {
        let a = Quadtree::partition(&Grid::blank(4, 4), params(2));
        let b = Quadtree::partition(&Grid::blank(4, 8), params(2));
        let c = Quadtree::partition(&Grid::blank(4, 4), params(1));
        assert!(a.changed_regions(&b).is_err());
        assert!(a.changed_regions(&c).is_err());
    }

    #[test]
    fn test_region_helpers() {
        let region = Region::new(1, 2, 2, 3);
        assert_eq!(region.area(), 6);
        assert_eq!(region.indices(10).collect::<Vec<_>>(), vec![12, 13, 14, 22, 23, 24]);
        assert!(region.fits(3, 5));
        assert!(!region.fits(3, 4));
        assert!(!Region::new(0, 0, 0, 1).fits(4, 4));
    }
}

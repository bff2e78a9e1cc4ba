//! Quadtree spatial index for bounding-box candidate queries
//!
//! This module provides a region quadtree over the envelope of a feature collection.
//! Each feature's bounding box is stored at the deepest node whose quadrant fully
//! contains it, so queries only visit the branches that overlap the query box.
//! Candidates are bounding-box hits: exact geometric tests happen downstream.

use crate::FeatureCollection;
use geo::{Coord, Rect};

/// Maximum depth of the quadtree to prevent infinite recursion
const MAX_DEPTH: u32 = 16;

/// Minimum number of entries before a node is split into children
const MIN_ENTRIES_FOR_RECURSION: usize = 8;

/// One indexed bounding box
#[derive(Clone, Copy, Debug)]
struct Entry {
    /// Position of the feature in the indexed collection
    position: usize,
    bounding_box: Rect<f64>,
}

/// Root container for the spatial index
#[derive(Debug, Clone)]
pub struct Quadtree {
    /// Root node covering the envelope of the collection (None if nothing was indexed)
    root: Option<QuadtreeNode>,
    /// Number of indexed features
    len: usize,
}

/// A single node in the quadtree
#[derive(Debug, Clone)]
struct QuadtreeNode {
    /// Region covered by this node
    bounding_box: Rect<f64>,
    /// Depth level in the tree (0 = root)
    level: u32,
    /// Entries that straddle child quadrants (or sit in a leaf)
    entries: Vec<Entry>,
    /// Child nodes (NW, NE, SW, SE) if subdivided
    children: Option<Box<[QuadtreeNode; 4]>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Quadtree {
    /// Build an index over every feature of the collection, keyed by position
    ///
    /// Features with empty geometry have no envelope and are never returned.
    pub fn build(fc: &FeatureCollection) -> Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("quadtree::build");

        let entries: Vec<Entry> = fc
            .features
            .iter()
            .enumerate()
            .filter_map(|(position, feature)| {
                feature
                    .geometry
                    .bounding_rect()
                    .map(|bounding_box| Entry {
                        position,
                        bounding_box,
                    })
            })
            .collect();

        let len = entries.len();
        let root = fc.bounding_rect().map(|extent| {
            let mut root = QuadtreeNode::new(extent, 0);
            root.insert_all(entries);
            root
        });

        Self { root, len }
    }

    /// Positions of all features whose bounding box intersects `query`, ascending
    pub fn query(&self, query: Rect<f64>) -> Vec<usize> {
        let mut results = Vec::new();
        if let Some(root) = &self.root {
            root.query(query, &mut results);
        }
        results.sort_unstable();
        results
    }

    /// Number of indexed features
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl QuadtreeNode {
    fn new(bounding_box: Rect<f64>, level: u32) -> Self {
        Self {
            bounding_box,
            level,
            entries: Vec::new(),
            children: None,
        }
    }

    /// Distribute a batch of entries into this subtree
    ///
    /// Entries that fit entirely inside one quadrant go down; the rest stay here.
    fn insert_all(&mut self, entries: Vec<Entry>) {
        if self.level >= MAX_DEPTH || entries.len() < MIN_ENTRIES_FOR_RECURSION {
            self.entries.extend(entries);
            return;
        }

        self.subdivide();
        let mut buckets: [Vec<Entry>; 4] = Default::default();

        if let Some(children) = &self.children {
            for entry in entries {
                match children
                    .iter()
                    .position(|child| rect_contains(child.bounding_box, entry.bounding_box))
                {
                    Some(quadrant) => buckets[quadrant].push(entry),
                    None => self.entries.push(entry),
                }
            }
        }

        if let Some(children) = &mut self.children {
            for (child, bucket) in children.iter_mut().zip(buckets) {
                if !bucket.is_empty() {
                    child.insert_all(bucket);
                }
            }
        }
    }

    /// Subdivide this node into 4 children
    fn subdivide(&mut self) {
        if self.children.is_some() {
            return; // Already subdivided
        }

        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let mid_x = (min.x + max.x) / 2.0;
        let mid_y = (min.y + max.y) / 2.0;
        let child_level = self.level + 1;

        let nw = QuadtreeNode::new(
            Rect::new(Coord { x: min.x, y: mid_y }, Coord { x: mid_x, y: max.y }),
            child_level,
        );
        let ne = QuadtreeNode::new(
            Rect::new(Coord { x: mid_x, y: mid_y }, Coord { x: max.x, y: max.y }),
            child_level,
        );
        let sw = QuadtreeNode::new(
            Rect::new(Coord { x: min.x, y: min.y }, Coord { x: mid_x, y: mid_y }),
            child_level,
        );
        let se = QuadtreeNode::new(
            Rect::new(Coord { x: mid_x, y: min.y }, Coord { x: max.x, y: mid_y }),
            child_level,
        );

        self.children = Some(Box::new([nw, ne, sw, se]));
    }

    /// Collect positions of entries intersecting the query box
    fn query(&self, query: Rect<f64>, results: &mut Vec<usize>) {
        // Prune branches that cannot contain any hit
        if !rects_intersect(self.bounding_box, query) {
            return;
        }

        results.extend(
            self.entries
                .iter()
                .filter(|entry| rects_intersect(entry.bounding_box, query))
                .map(|entry| entry.position),
        );

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query(query, results);
            }
        }
    }

    /// Total number of entries stored in this subtree
    #[cfg(test)]
    fn count(&self) -> usize {
        self.entries.len()
            + self
                .children
                .as_ref()
                .map(|children| children.iter().map(QuadtreeNode::count).sum())
                .unwrap_or(0)
    }
}

/// Closed-interval rectangle overlap (touching boxes intersect)
#[inline]
fn rects_intersect(a: Rect<f64>, b: Rect<f64>) -> bool {
    !(a.max().x < b.min().x || a.min().x > b.max().x || a.max().y < b.min().y || a.min().y > b.max().y)
}

/// Whether `outer` fully contains `inner`
#[inline]
fn rect_contains(outer: Rect<f64>, inner: Rect<f64>) -> bool {
    inner.min().x >= outer.min().x
        && inner.max().x <= outer.max().x
        && inner.min().y >= outer.min().y
        && inner.max().y <= outer.max().y
}

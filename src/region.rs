//! Volume decomposition for parallel solving.
//!
//! A requested volume is split into disjoint rectangular regions that cover
//! it exactly; each region is solved independently by one worker, and the
//! seams between regions are checked afterwards. Splitting recursively
//! halves the longest axis, which keeps regions close to cubical and their
//! boundary areas small.

use collapse_core::Direction;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One rectangular sub-volume: global offset plus size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Region {
    pub fn volume(&self) -> usize {
        self.width * self.height * self.depth
    }

    pub fn contains(&self, x: usize, y: usize, z: usize) -> bool {
        x >= self.x
            && x < self.x + self.width
            && y >= self.y
            && y < self.y + self.height
            && z >= self.z
            && z < self.z + self.depth
    }

    /// Translate a global coordinate into this region's local space.
    pub fn to_local(&self, x: usize, y: usize, z: usize) -> Option<(usize, usize, usize)> {
        if self.contains(x, y, z) {
            Some((x - self.x, y - self.y, z - self.z))
        } else {
            None
        }
    }

    /// Translate a region-local coordinate into global space.
    pub fn to_global(&self, x: usize, y: usize, z: usize) -> (usize, usize, usize) {
        (self.x + x, self.y + y, self.z + z)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}@({},{},{})",
            self.width, self.height, self.depth, self.x, self.y, self.z
        )
    }
}

/// Split a volume into at most `count` disjoint regions covering it exactly.
///
/// Recursive longest-axis halving; worker counts that don't divide the volume
/// produce proportionally sized halves. Axes too short to split stop the
/// recursion, so tiny volumes may yield fewer regions than requested.
pub fn split_volume(width: usize, height: usize, depth: usize, count: usize) -> Vec<Region> {
    let root = Region {
        x: 0,
        y: 0,
        z: 0,
        width,
        height,
        depth,
    };
    let mut regions = Vec::new();
    split_region(root, count.max(1), &mut regions);
    regions
}

fn split_region(region: Region, count: usize, out: &mut Vec<Region>) {
    let longest = region.width.max(region.height).max(region.depth);
    if count <= 1 || longest < 2 || region.volume() < 2 {
        out.push(region);
        return;
    }

    let low_count = count / 2;
    let high_count = count - low_count;

    // Cut the longest axis proportionally to the worker counts on each side.
    let cut = |len: usize| -> usize {
        ((len * low_count + count / 2) / count).clamp(1, len - 1)
    };

    let (low, high) = if region.width == longest {
        let w = cut(region.width);
        (
            Region {
                width: w,
                ..region
            },
            Region {
                x: region.x + w,
                width: region.width - w,
                ..region
            },
        )
    } else if region.height == longest {
        let h = cut(region.height);
        (
            Region {
                height: h,
                ..region
            },
            Region {
                y: region.y + h,
                height: region.height - h,
                ..region
            },
        )
    } else {
        let d = cut(region.depth);
        (
            Region {
                depth: d,
                ..region
            },
            Region {
                z: region.z + d,
                depth: region.depth - d,
                ..region
            },
        )
    };

    split_region(low, low_count, out);
    split_region(high, high_count, out);
}

/// One shared-face adjacency between two regions: the cell in `a`, the cell
/// in `b` right next to it, and the direction leading from `a` to `b`. All
/// coordinates are global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryPair {
    pub a: (usize, usize, usize),
    pub b: (usize, usize, usize),
    pub direction: Direction,
}

/// Enumerate the boundary coordinate pairs between two regions, or an empty
/// list when they do not share a face. Edge and corner contacts are not
/// faces and produce nothing.
pub fn boundary_pairs(a: &Region, b: &Region) -> Vec<BoundaryPair> {
    let mut pairs = forward_pairs(a, b);
    if pairs.is_empty() {
        pairs = forward_pairs(b, a)
            .into_iter()
            .map(|pair| BoundaryPair {
                a: pair.b,
                b: pair.a,
                direction: pair.direction.opposite(),
            })
            .collect();
    }
    pairs
}

/// Face pairs for the case where `a` ends exactly where `b` begins along one
/// axis (directions East/North/Up only); the other two axes must genuinely
/// overlap or the contact is just an edge or corner.
fn forward_pairs(a: &Region, b: &Region) -> Vec<BoundaryPair> {
    let overlap = |a0: usize, alen: usize, b0: usize, blen: usize| {
        let lo = a0.max(b0);
        let hi = (a0 + alen).min(b0 + blen);
        (lo, hi)
    };

    let mut pairs = Vec::new();
    if a.x + a.width == b.x {
        let (y0, y1) = overlap(a.y, a.height, b.y, b.height);
        let (z0, z1) = overlap(a.z, a.depth, b.z, b.depth);
        for z in z0..z1 {
            for y in y0..y1 {
                pairs.push(BoundaryPair {
                    a: (a.x + a.width - 1, y, z),
                    b: (b.x, y, z),
                    direction: Direction::East,
                });
            }
        }
    } else if a.y + a.height == b.y {
        let (x0, x1) = overlap(a.x, a.width, b.x, b.width);
        let (z0, z1) = overlap(a.z, a.depth, b.z, b.depth);
        for z in z0..z1 {
            for x in x0..x1 {
                pairs.push(BoundaryPair {
                    a: (x, a.y + a.height - 1, z),
                    b: (x, b.y, z),
                    direction: Direction::North,
                });
            }
        }
    } else if a.z + a.depth == b.z {
        let (x0, x1) = overlap(a.x, a.width, b.x, b.width);
        let (y0, y1) = overlap(a.y, a.height, b.y, b.height);
        for y in y0..y1 {
            for x in x0..x1 {
                pairs.push(BoundaryPair {
                    a: (x, y, a.z + a.depth - 1),
                    b: (x, y, b.z),
                    direction: Direction::Up,
                });
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_exact_cover(regions: &[Region], width: usize, height: usize, depth: usize) {
        let mut seen = HashSet::new();
        for region in regions {
            for z in region.z..region.z + region.depth {
                for y in region.y..region.y + region.height {
                    for x in region.x..region.x + region.width {
                        assert!(seen.insert((x, y, z)), "overlap at ({},{},{})", x, y, z);
                    }
                }
            }
        }
        assert_eq!(seen.len(), width * height * depth, "regions do not cover");
    }

    #[test]
    fn test_split_single_region() {
        let regions = split_volume(8, 8, 8, 1);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].volume(), 512);
    }

    #[test]
    fn test_split_is_disjoint_cover() {
        for count in [2, 3, 4, 7, 8] {
            let regions = split_volume(10, 6, 4, count);
            assert!(regions.len() <= count);
            assert_exact_cover(&regions, 10, 6, 4);
        }
    }

    #[test]
    fn test_split_balances_volumes() {
        let regions = split_volume(16, 16, 16, 4);
        assert_eq!(regions.len(), 4);
        let total: usize = regions.iter().map(Region::volume).sum();
        assert_eq!(total, 16 * 16 * 16);
        let max = regions.iter().map(Region::volume).max().unwrap();
        let min = regions.iter().map(Region::volume).min().unwrap();
        assert!(max <= min * 2, "unbalanced split: {} vs {}", min, max);
    }

    #[test]
    fn test_split_tiny_volume_caps_regions() {
        let regions = split_volume(1, 1, 1, 8);
        assert_eq!(regions.len(), 1);
        assert_exact_cover(&regions, 1, 1, 1);

        let regions = split_volume(2, 1, 1, 8);
        assert_exact_cover(&regions, 2, 1, 1);
    }

    #[test]
    fn test_boundary_pairs_east_face() {
        let a = Region {
            x: 0,
            y: 0,
            z: 0,
            width: 2,
            height: 2,
            depth: 1,
        };
        let b = Region {
            x: 2,
            y: 0,
            z: 0,
            width: 2,
            height: 2,
            depth: 1,
        };
        let pairs = boundary_pairs(&a, &b);
        assert_eq!(pairs.len(), 2);
        for pair in &pairs {
            assert_eq!(pair.direction, Direction::East);
            assert_eq!(pair.a.0, 1);
            assert_eq!(pair.b.0, 2);
            assert_eq!(pair.a.1, pair.b.1);
        }
    }

    #[test]
    fn test_boundary_pairs_reversed_arguments() {
        let a = Region {
            x: 0,
            y: 0,
            z: 0,
            width: 2,
            height: 1,
            depth: 1,
        };
        let b = Region {
            x: 2,
            y: 0,
            z: 0,
            width: 1,
            height: 1,
            depth: 1,
        };
        let forward = boundary_pairs(&a, &b);
        let backward = boundary_pairs(&b, &a);
        assert_eq!(forward.len(), 1);
        assert_eq!(backward.len(), 1);
        assert_eq!(backward[0].direction, Direction::West);
        assert_eq!(backward[0].a, forward[0].b);
        assert_eq!(backward[0].b, forward[0].a);
    }

    #[test]
    fn test_boundary_pairs_ignore_edge_contact() {
        // Anti-diagonal quadrants touch along an edge, not a face.
        let a = Region {
            x: 0,
            y: 1,
            z: 0,
            width: 1,
            height: 1,
            depth: 1,
        };
        let b = Region {
            x: 1,
            y: 0,
            z: 0,
            width: 1,
            height: 1,
            depth: 1,
        };
        assert!(boundary_pairs(&a, &b).is_empty());
        assert!(boundary_pairs(&b, &a).is_empty());
    }

    #[test]
    fn test_boundary_pairs_disjoint_regions() {
        let a = Region {
            x: 0,
            y: 0,
            z: 0,
            width: 2,
            height: 1,
            depth: 1,
        };
        let b = Region {
            x: 5,
            y: 0,
            z: 0,
            width: 1,
            height: 1,
            depth: 1,
        };
        assert!(boundary_pairs(&a, &b).is_empty());
    }

    #[test]
    fn test_split_regions_share_full_faces() {
        // Every cell on an internal face must appear in exactly one pair of
        // some adjacent region pair.
        let regions = split_volume(8, 4, 2, 4);
        let mut face_cells = 0;
        for i in 0..regions.len() {
            for j in (i + 1)..regions.len() {
                face_cells += boundary_pairs(&regions[i], &regions[j]).len();
            }
        }
        assert!(face_cells > 0);
    }

    #[test]
    fn test_local_global_round_trip() {
        let region = Region {
            x: 3,
            y: 4,
            z: 5,
            width: 2,
            height: 2,
            depth: 2,
        };
        let (lx, ly, lz) = region.to_local(4, 5, 6).unwrap();
        assert_eq!((lx, ly, lz), (1, 1, 1));
        assert_eq!(region.to_global(lx, ly, lz), (4, 5, 6));
        assert_eq!(region.to_local(0, 0, 0), None);
    }
}

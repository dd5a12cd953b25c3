//! Bounded-vertex polygon fracturing.
//!
//! Splits a polygon into pieces of at most `max_vertices` vertices whose
//! union reproduces the input area exactly: the pieces partition the
//! interior and only share edges. The decomposition uses orientation-aware
//! ear clipping over the original vertex set (no new coordinates are ever
//! introduced), followed by a greedy in-order merge of edge-adjacent pieces
//! back up to the vertex bound.
//!
//! Determinism: the same vertex sequence always yields the same ordered
//! piece sequence, so downstream serialization is byte-stable.

use crate::geometry::{cross, Point, Polygon};

/// Fracturing parameters.
#[derive(Debug, Clone, Copy)]
pub struct FractureConfig {
    /// Maximum vertex count per output piece. Values below 3 are treated
    /// as 3, since no polygon has fewer vertices.
    pub max_vertices: usize,
    /// Coordinate tolerance in the polygon's own units. Cross products
    /// smaller than `epsilon^2` are treated as zero.
    pub epsilon: f64,
}

impl Default for FractureConfig {
    fn default() -> Self {
        Self {
            max_vertices: 4,
            epsilon: 1e-9,
        }
    }
}

impl FractureConfig {
    pub fn new(max_vertices: usize, epsilon: f64) -> Self {
        Self {
            max_vertices,
            epsilon,
        }
    }

    fn vertex_bound(&self) -> usize {
        self.max_vertices.max(3)
    }

    fn area_tolerance(&self) -> f64 {
        self.epsilon * self.epsilon
    }
}

/// Fracture one polygon into pieces of at most `config.max_vertices`
/// vertices each.
///
/// A polygon already within the bound is returned unchanged. If the
/// decomposition fails (zero-area or otherwise numerically degenerate
/// input), the original polygon passes through as the single piece rather
/// than being dropped.
pub fn fracture_polygon(polygon: &Polygon, config: &FractureConfig) -> Vec<Polygon> {
    let bound = config.vertex_bound();
    if polygon.vertex_count() <= bound {
        return vec![polygon.clone()];
    }

    match ear_clip(&polygon.vertices, config.area_tolerance()) {
        Some(triangles) => merge_pieces(triangles, bound),
        None => {
            log::debug!(
                "fracture fell back to passthrough for degenerate {}-vertex polygon",
                polygon.vertex_count()
            );
            vec![polygon.clone()]
        }
    }
}

/// Decompose a vertex ring into triangles, each wound like the input.
/// Returns `None` when no ear can be found, which covers zero-area and
/// self-degenerate rings.
fn ear_clip(vertices: &[Point], tol: f64) -> Option<Vec<[Point; 3]>> {
    let n = vertices.len();
    let ring = Polygon::new(vertices.to_vec());
    let area = ring.signed_area();
    if area.abs() <= tol {
        return None;
    }
    let winding = area.signum();

    let mut idx: Vec<usize> = (0..n).collect();
    let mut triangles = Vec::with_capacity(n - 2);

    while idx.len() > 3 {
        let m = idx.len();
        let mut clipped = false;

        for i in 0..m {
            let ip = (i + m - 1) % m;
            let inx = (i + 1) % m;
            let prev = vertices[idx[ip]];
            let curr = vertices[idx[i]];
            let next = vertices[idx[inx]];

            // Reflex or collinear corners cannot be ears.
            if cross(prev, curr, next) * winding <= tol {
                continue;
            }

            let mut is_ear = true;
            for (j, &vj) in idx.iter().enumerate() {
                if j == ip || j == i || j == inx {
                    continue;
                }
                if triangle_covers(vertices[vj], prev, curr, next, winding, tol) {
                    is_ear = false;
                    break;
                }
            }

            if is_ear {
                triangles.push([prev, curr, next]);
                idx.remove(i);
                clipped = true;
                break;
            }
        }

        if !clipped {
            return None;
        }
    }

    triangles.push([vertices[idx[0]], vertices[idx[1]], vertices[idx[2]]]);
    Some(triangles)
}

/// Inclusive containment test. Points on the triangle boundary count as
/// covered: a reflex vertex sitting exactly on a candidate ear's diagonal
/// would otherwise let the ear swallow area outside the polygon.
fn triangle_covers(p: Point, a: Point, b: Point, c: Point, winding: f64, tol: f64) -> bool {
    cross(a, b, p) * winding >= -tol
        && cross(b, c, p) * winding >= -tol
        && cross(c, a, p) * winding >= -tol
}

/// Greedily grow pieces by absorbing the next triangle when it shares a
/// full edge with the current piece and the merged ring stays within the
/// vertex bound.
fn merge_pieces(triangles: Vec<[Point; 3]>, bound: usize) -> Vec<Polygon> {
    let mut pieces: Vec<Polygon> = Vec::new();

    for tri in triangles {
        if let Some(last) = pieces.last_mut() {
            if last.vertex_count() < bound {
                if let Some(merged) = splice_triangle(last, &tri) {
                    *last = merged;
                    continue;
                }
            }
        }
        pieces.push(Polygon::new(tri.to_vec()));
    }

    pieces
}

/// Merge a triangle into a piece along a shared edge. The piece traverses
/// the edge as `u -> v`; a triangle wound the same way traverses it as
/// `v -> u`, so its opposite vertex is inserted between `u` and `v`.
fn splice_triangle(piece: &Polygon, tri: &[Point; 3]) -> Option<Polygon> {
    let n = piece.vertices.len();
    for i in 0..n {
        let u = piece.vertices[i];
        let v = piece.vertices[(i + 1) % n];
        for k in 0..3 {
            if tri[k] == v && tri[(k + 1) % 3] == u {
                let w = tri[(k + 2) % 3];
                let mut vertices = piece.vertices.clone();
                vertices.insert(i + 1, w);
                return Some(Polygon::new(vertices));
            }
        }
    }
    None
}

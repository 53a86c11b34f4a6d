//! Lattice assembly: turn an unordered cloud of corner candidates into a
//! complete, canonically ordered `cols x rows` grid.

use crate::params::GridParams;
use checkercal_core::PatternSpec;
use kiddo::{KdTree, SquaredEuclidean};
use log::debug;
use nalgebra::{Point2, Vector2};
use std::collections::{HashMap, VecDeque};

const NEIGHBOR_QUERY: usize = 9;

#[derive(Clone, Copy, Debug)]
struct Node {
    index: usize,
    i: i32,
    j: i32,
    step_i: Vector2<f64>,
    step_j: Vector2<f64>,
}

/// Integer lattice coordinates assigned to candidates by region growing.
struct Lattice {
    cells: HashMap<(i32, i32), usize>,
    i_range: (i32, i32),
    j_range: (i32, i32),
}

impl Lattice {
    fn extent(&self) -> (usize, usize) {
        (
            (self.i_range.1 - self.i_range.0 + 1) as usize,
            (self.j_range.1 - self.j_range.0 + 1) as usize,
        )
    }

    fn at(&self, ii: usize, jj: usize) -> Option<usize> {
        self.cells
            .get(&(self.i_range.0 + ii as i32, self.j_range.0 + jj as i32))
            .copied()
    }
}

struct CandidateIndex<'a> {
    points: &'a [Point2<f64>],
    tree: KdTree<f32, 2>,
}

impl<'a> CandidateIndex<'a> {
    fn new(points: &'a [Point2<f64>]) -> Self {
        let coords = points
            .iter()
            .map(|p| [p.x as f32, p.y as f32])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();
        Self { points, tree }
    }

    fn nearest(&self, q: Point2<f64>) -> (usize, f64) {
        let nn = self
            .tree
            .nearest_one::<SquaredEuclidean>(&[q.x as f32, q.y as f32]);
        (nn.item as usize, (nn.distance as f64).sqrt())
    }

    /// Two independent lattice steps at `seed`: the shortest neighbour
    /// vector, and the closest-to-perpendicular one of similar length.
    fn seed_steps(&self, seed: usize, min_step: f64) -> Option<(Vector2<f64>, Vector2<f64>)> {
        let p = self.points[seed];
        let q = [p.x as f32, p.y as f32];
        let others: Vec<Vector2<f64>> = self
            .tree
            .nearest_n::<SquaredEuclidean>(&q, NEIGHBOR_QUERY)
            .into_iter()
            .map(|nn| self.points[nn.item as usize] - p)
            .filter(|v| v.norm() >= min_step)
            .collect();

        let u = *others.first()?;
        let du = u.norm();
        let v = others
            .iter()
            .skip(1)
            .filter(|v| {
                let d = v.norm();
                d >= 0.6 * du && d <= 1.7 * du
            })
            .map(|v| (v, (v.dot(&u) / (v.norm() * du)).abs()))
            .filter(|(_, cos)| *cos < 0.5)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(v, _)| *v)?;
        Some((u, v))
    }

    /// Breadth-first growth from `seed`, predicting each neighbour from the
    /// parent's local steps.
    fn grow(
        &self,
        seed: usize,
        steps: (Vector2<f64>, Vector2<f64>),
        params: &GridParams,
        limit: usize,
    ) -> Option<Lattice> {
        let mut owner: Vec<Option<(i32, i32)>> = vec![None; self.points.len()];
        let mut cells = HashMap::new();
        let mut queue = VecDeque::new();

        owner[seed] = Some((0, 0));
        cells.insert((0, 0), seed);
        queue.push_back(Node {
            index: seed,
            i: 0,
            j: 0,
            step_i: steps.0,
            step_j: steps.1,
        });

        while let Some(node) = queue.pop_front() {
            let p = self.points[node.index];
            for (di, dj) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
                let key = (node.i + di, node.j + dj);
                if cells.contains_key(&key) {
                    continue;
                }
                let step = node.step_i * di as f64 + node.step_j * dj as f64;
                let (m, dist) = self.nearest(p + step);
                if dist > params.match_tolerance as f64 * step.norm() || owner[m].is_some() {
                    continue;
                }
                let actual = self.points[m] - p;
                let (step_i, step_j) = if di != 0 {
                    (actual * di as f64, node.step_j)
                } else {
                    (node.step_i, actual * dj as f64)
                };
                owner[m] = Some(key);
                cells.insert(key, m);
                if cells.len() > limit {
                    return None;
                }
                queue.push_back(Node {
                    index: m,
                    i: key.0,
                    j: key.1,
                    step_i,
                    step_j,
                });
            }
        }

        let i_range = cells
            .keys()
            .fold((i32::MAX, i32::MIN), |(lo, hi), k| (lo.min(k.0), hi.max(k.0)));
        let j_range = cells
            .keys()
            .fold((i32::MAX, i32::MIN), |(lo, hi), k| (lo.min(k.1), hi.max(k.1)));
        Some(Lattice {
            cells,
            i_range,
            j_range,
        })
    }
}

fn mean_step(lattice: &Lattice, points: &[Point2<f64>], along_i: bool) -> Vector2<f64> {
    let (ni, nj) = lattice.extent();
    let mut sum = Vector2::zeros();
    let mut n = 0.0;
    for jj in 0..nj {
        for ii in 0..ni {
            let next = if along_i { (ii + 1, jj) } else { (ii, jj + 1) };
            if let (Some(a), Some(b)) = (lattice.at(ii, jj), lattice.at(next.0, next.1)) {
                sum += points[b] - points[a];
                n += 1.0;
            }
        }
    }
    if n > 0.0 {
        sum / n
    } else {
        sum
    }
}

/// Read a complete lattice out in pattern order.
///
/// The column axis is the lattice axis holding `cols` corners (the more
/// horizontal one for square patterns). Columns run left to right in the
/// image and rows are chosen so the board is not mirrored.
fn canonical_order(
    lattice: &Lattice,
    points: &[Point2<f64>],
    pattern: &PatternSpec,
) -> Option<Vec<Point2<f64>>> {
    let (cols, rows) = (pattern.cols() as usize, pattern.rows() as usize);
    let (ni, nj) = lattice.extent();
    if lattice.cells.len() != ni * nj {
        return None;
    }

    let a_i = mean_step(lattice, points, true);
    let a_j = mean_step(lattice, points, false);
    let i_is_col = match ((ni, nj) == (cols, rows), (ni, nj) == (rows, cols)) {
        (true, true) => a_i.x.abs() / a_i.norm() >= a_j.x.abs() / a_j.norm(),
        (true, false) => true,
        (false, true) => false,
        (false, false) => return None,
    };

    let (a_col, a_row) = if i_is_col { (a_i, a_j) } else { (a_j, a_i) };
    let flip_col = a_col.x < 0.0 || (a_col.x == 0.0 && a_col.y < 0.0);
    let a_col = if flip_col { -a_col } else { a_col };
    let flip_row = a_col.perp(&a_row) < 0.0;

    let mut out = Vec::with_capacity(cols * rows);
    for r in 0..rows {
        for c in 0..cols {
            let c = if flip_col { cols - 1 - c } else { c };
            let r = if flip_row { rows - 1 - r } else { r };
            let (ii, jj) = if i_is_col { (c, r) } else { (r, c) };
            out.push(points[lattice.at(ii, jj)?]);
        }
    }
    Some(out)
}

/// Find the pattern among `candidates` and return its corners in pattern
/// order, or `None` when no complete grid of the right size exists.
pub(crate) fn assemble_grid(
    candidates: &[Point2<f64>],
    pattern: &PatternSpec,
    params: &GridParams,
) -> Option<Vec<Point2<f64>>> {
    let needed = pattern.point_count();
    if candidates.len() < needed {
        debug!(
            "{} candidates, fewer than the {} corners of a {} pattern",
            candidates.len(),
            needed,
            pattern
        );
        return None;
    }

    let n = candidates.len() as f64;
    let centroid = candidates
        .iter()
        .fold(Vector2::zeros(), |acc, p| acc + p.coords)
        / n;
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        let da = (candidates[a].coords - centroid).norm_squared();
        let db = (candidates[b].coords - centroid).norm_squared();
        da.total_cmp(&db)
    });

    let index = CandidateIndex::new(candidates);
    for &seed in order.iter().take(params.max_seeds.max(1)) {
        let Some(steps) = index.seed_steps(seed, params.min_step_pix as f64) else {
            continue;
        };
        let Some(lattice) = index.grow(seed, steps, params, needed) else {
            continue;
        };
        if let Some(ordered) = canonical_order(&lattice, candidates, pattern) {
            return Some(ordered);
        }
        debug!(
            "seed {} grew a {}x{} lattice, not a {} grid",
            seed,
            lattice.extent().0,
            lattice.extent().1,
            pattern
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lattice_points(
        cols: usize,
        rows: usize,
        origin: Vector2<f64>,
        u: Vector2<f64>,
        v: Vector2<f64>,
    ) -> Vec<Point2<f64>> {
        let mut pts = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                pts.push(Point2::from(origin + u * c as f64 + v * r as f64));
            }
        }
        pts
    }

    #[test]
    fn orders_shuffled_grid_row_major() {
        let pattern = PatternSpec::new(5, 3).unwrap();
        let truth = lattice_points(
            5,
            3,
            Vector2::new(40.0, 30.0),
            Vector2::new(20.0, 2.0),
            Vector2::new(-1.5, 19.0),
        );
        let mut shuffled = truth.clone();
        shuffled.reverse();
        shuffled.swap(2, 9);
        let got = assemble_grid(&shuffled, &pattern, &GridParams::default()).expect("grid");
        assert_eq!(got, truth);
    }

    #[test]
    fn transposed_lattice_is_reoriented() {
        // Board x axis runs down the image: columns follow the longer axis.
        let pattern = PatternSpec::new(6, 3).unwrap();
        let pts = lattice_points(
            3,
            6,
            Vector2::new(50.0, 20.0),
            Vector2::new(18.0, 0.0),
            Vector2::new(0.0, 18.0),
        );
        let got = assemble_grid(&pts, &pattern, &GridParams::default()).expect("grid");
        assert_eq!(got.len(), 18);
        // Rows of 6 corners lie along the image y axis.
        assert!((got[1].x - got[0].x).abs() < 1e-9);
        let a_col = got[1] - got[0];
        let a_row = got[6] - got[0];
        assert!(a_col.perp(&a_row) > 0.0);
    }

    #[test]
    fn incomplete_grid_is_rejected() {
        let pattern = PatternSpec::new(4, 4).unwrap();
        let mut pts = lattice_points(
            4,
            4,
            Vector2::new(30.0, 30.0),
            Vector2::new(15.0, 0.0),
            Vector2::new(0.0, 15.0),
        );
        pts.remove(5);
        pts.push(Point2::new(400.0, 400.0));
        assert!(assemble_grid(&pts, &pattern, &GridParams::default()).is_none());
    }

    #[test]
    fn stray_candidates_outside_the_board_are_ignored() {
        let pattern = PatternSpec::new(4, 3).unwrap();
        let truth = lattice_points(
            4,
            3,
            Vector2::new(100.0, 100.0),
            Vector2::new(16.0, 0.0),
            Vector2::new(0.0, 16.0),
        );
        let mut pts = truth.clone();
        pts.push(Point2::new(10.0, 10.0));
        pts.push(Point2::new(300.0, 20.0));
        let got = assemble_grid(&pts, &pattern, &GridParams::default()).expect("grid");
        assert_eq!(got, truth);
    }
}

//! 基于 Delaunay 三角剖分的 alpha shape（凹包）。
//!
//! 外接圆半径小于 `1/alpha` 的三角形被保留，共享边的三角形组成同一个多边形；
//! `alpha == 0` 时保留全部三角形，即退化为凸包。

use std::collections::HashMap;
use std::f64::consts::TAU;

use topoband_core::geometry::{Point2, Vector2, close_ring, ring_area};
use tracing::debug;

use crate::errors::GeometryError;

/// 凹包中的一块多边形：闭合外环（首点等于末点）与扣除孔洞后的面积。
#[derive(Debug, Clone, PartialEq)]
pub struct HullPolygon {
    exterior: Vec<Point2>,
    area: f64,
}

impl HullPolygon {
    pub fn new(exterior: Vec<Point2>, area: f64) -> Self {
        Self {
            exterior: close_ring(exterior),
            area,
        }
    }

    #[inline]
    pub fn exterior(&self) -> &[Point2] {
        &self.exterior
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.area
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HullResult {
    Single(HullPolygon),
    Multi(Vec<HullPolygon>),
}

impl HullResult {
    fn from_polygons(mut polygons: Vec<HullPolygon>) -> Self {
        if polygons.len() == 1 {
            HullResult::Single(polygons.remove(0))
        } else {
            HullResult::Multi(polygons)
        }
    }

    pub fn polygons(&self) -> &[HullPolygon] {
        match self {
            HullResult::Single(polygon) => std::slice::from_ref(polygon),
            HullResult::Multi(polygons) => polygons,
        }
    }

    pub fn into_polygons(self) -> Vec<HullPolygon> {
        match self {
            HullResult::Single(polygon) => vec![polygon],
            HullResult::Multi(polygons) => polygons,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.polygons().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 仅保留面积严格大于 `threshold` 的多边形。
    pub fn retain_above(self, threshold: f64) -> Result<Vec<HullPolygon>, GeometryError> {
        let candidates = self.len();
        let kept: Vec<HullPolygon> = self
            .into_polygons()
            .into_iter()
            .filter(|polygon| {
                let keep = polygon.area > threshold;
                if !keep {
                    debug!(area = polygon.area, threshold, "多边形面积低于阈值，已排除");
                }
                keep
            })
            .collect();
        if kept.is_empty() {
            return Err(GeometryError::NothingAboveThreshold {
                threshold,
                candidates,
            });
        }
        Ok(kept)
    }
}

/// 第 `index` 个海拔带的面积阈值：`start - step * index`。
#[inline]
pub fn area_threshold(index: usize, start: f64, step: f64) -> f64 {
    start - step * index as f64
}

pub fn extract_concave_hull(points: &[Point2], alpha: f64) -> Result<HullResult, GeometryError> {
    let unique = distinct_points(points);
    if unique.len() < 3 {
        return Err(GeometryError::TooFewPoints {
            found: unique.len(),
        });
    }

    let coords: Vec<delaunator::Point> = unique
        .iter()
        .map(|p| delaunator::Point { x: p.x(), y: p.y() })
        .collect();
    let triangulation = delaunator::triangulate(&coords);

    let triangles: Vec<[usize; 3]> = triangulation
        .triangles
        .chunks_exact(3)
        .filter_map(|tri| counter_clockwise(&unique, [tri[0], tri[1], tri[2]]))
        .filter(|tri| alpha <= 0.0 || circumradius(&unique, *tri) < 1.0 / alpha)
        .collect();
    if triangles.is_empty() {
        return Err(GeometryError::Degenerate { alpha });
    }

    let polygons: Vec<HullPolygon> = edge_connected_components(&triangles)
        .into_iter()
        .filter_map(|component| component_polygon(&unique, &triangles, &component))
        .collect();
    if polygons.is_empty() {
        return Err(GeometryError::Degenerate { alpha });
    }
    Ok(HullResult::from_polygons(polygons))
}

fn distinct_points(points: &[Point2]) -> Vec<Point2> {
    let mut unique: Vec<Point2> = points
        .iter()
        .copied()
        .filter(|p| p.x().is_finite() && p.y().is_finite())
        .collect();
    unique.sort_by(|a, b| a.x().total_cmp(&b.x()).then(a.y().total_cmp(&b.y())));
    unique.dedup();
    unique
}

fn triangle_area(points: &[Point2], [a, b, c]: [usize; 3]) -> f64 {
    let ab = Vector2::from_points(points[a], points[b]);
    let ac = Vector2::from_points(points[a], points[c]);
    ab.cross(ac) * 0.5
}

/// 统一为逆时针顶点顺序；零面积三角形返回 `None`。
fn counter_clockwise(points: &[Point2], tri: [usize; 3]) -> Option<[usize; 3]> {
    let area = triangle_area(points, tri);
    if area > 0.0 {
        Some(tri)
    } else if area < 0.0 {
        Some([tri[0], tri[2], tri[1]])
    } else {
        None
    }
}

fn circumradius(points: &[Point2], [a, b, c]: [usize; 3]) -> f64 {
    let la = points[b].distance(points[c]);
    let lb = points[a].distance(points[c]);
    let lc = points[a].distance(points[b]);
    let area = triangle_area(points, [a, b, c]).abs();
    if area <= f64::EPSILON {
        return f64::INFINITY;
    }
    la * lb * lc / (4.0 * area)
}

#[inline]
fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a < b { (a, b) } else { (b, a) }
}

fn edge_connected_components(triangles: &[[usize; 3]]) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..triangles.len()).collect();
    let mut owner: HashMap<(usize, usize), usize> = HashMap::new();

    for (index, tri) in triangles.iter().enumerate() {
        for k in 0..3 {
            let key = edge_key(tri[k], tri[(k + 1) % 3]);
            match owner.get(&key) {
                Some(&other) => union(&mut parent, index, other),
                None => {
                    owner.insert(key, index);
                }
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
    for index in 0..triangles.len() {
        let root = find(&mut parent, index);
        let slot = *slot_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(index);
    }
    groups
}

fn find(parent: &mut [usize], mut node: usize) -> usize {
    while parent[node] != node {
        parent[node] = parent[parent[node]];
        node = parent[node];
    }
    node
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        parent[ra.max(rb)] = ra.min(rb);
    }
}

fn component_polygon(
    points: &[Point2],
    triangles: &[[usize; 3]],
    component: &[usize],
) -> Option<HullPolygon> {
    let mut edge_count: HashMap<(usize, usize), usize> = HashMap::new();
    for &index in component {
        let tri = triangles[index];
        for k in 0..3 {
            *edge_count
                .entry(edge_key(tri[k], tri[(k + 1) % 3]))
                .or_insert(0) += 1;
        }
    }

    // 边界边保持其所在三角形的逆时针方向，多边形内部始终在左侧
    let mut outgoing: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut boundary: Vec<(usize, usize)> = Vec::new();
    for &index in component {
        let tri = triangles[index];
        for k in 0..3 {
            let (from, to) = (tri[k], tri[(k + 1) % 3]);
            if edge_count[&edge_key(from, to)] == 1 {
                outgoing.entry(from).or_default().push(to);
                boundary.push((from, to));
            }
        }
    }

    let area: f64 = component
        .iter()
        .map(|&index| triangle_area(points, triangles[index]))
        .sum();

    let exterior = trace_rings(points, &boundary, &mut outgoing)
        .into_iter()
        .map(|ring| {
            let signed = ring_area(&ring);
            (ring, signed)
        })
        .filter(|(_, signed)| *signed > 0.0)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(ring, _)| ring)?;

    Some(HullPolygon::new(exterior, area))
}

/// 将有向边界边串成环。顶点处有多条出边时，取自入射反方向顺时针转过的第一条，
/// 使每个环紧贴同一块内部区域。
fn trace_rings(
    points: &[Point2],
    boundary: &[(usize, usize)],
    outgoing: &mut HashMap<usize, Vec<usize>>,
) -> Vec<Vec<Point2>> {
    let mut rings = Vec::new();
    for &(start, first) in boundary {
        let Some(candidates) = outgoing.get_mut(&start) else {
            continue;
        };
        let Some(position) = candidates.iter().position(|&to| to == first) else {
            continue;
        };
        candidates.swap_remove(position);

        let mut ring = vec![points[start]];
        let (mut previous, mut current) = (start, first);
        let mut guard = boundary.len();
        while current != start && guard > 0 {
            guard -= 1;
            ring.push(points[current]);
            let Some(next) = take_next_edge(points, previous, current, outgoing) else {
                break;
            };
            previous = current;
            current = next;
        }
        if current == start && ring.len() >= 3 {
            rings.push(ring);
        }
    }
    rings
}

fn take_next_edge(
    points: &[Point2],
    previous: usize,
    current: usize,
    outgoing: &mut HashMap<usize, Vec<usize>>,
) -> Option<usize> {
    let candidates = outgoing.get_mut(&current)?;
    if candidates.is_empty() {
        return None;
    }
    let back = points[current].vector_to(points[previous]);
    let best = candidates
        .iter()
        .enumerate()
        .map(|(slot, &to)| {
            let dir = points[current].vector_to(points[to]);
            let ccw = back.cross(dir).atan2(back.as_vec2().dot(dir.as_vec2()));
            let clockwise = (TAU - ccw).rem_euclid(TAU);
            (slot, clockwise)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(slot, _)| slot)?;
    Some(candidates.swap_remove(best))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(origin: (f64, f64), cols: usize, rows: usize, spacing: f64) -> Vec<Point2> {
        let mut points = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            for col in 0..cols {
                points.push(Point2::new(
                    origin.0 + col as f64 * spacing,
                    origin.1 + row as f64 * spacing,
                ));
            }
        }
        points
    }

    #[test]
    fn convex_hull_of_square_grid() {
        let points = grid((0.0, 0.0), 5, 5, 1.0);
        let hull = extract_concave_hull(&points, 0.0).expect("hull");
        let polygons = hull.polygons();
        assert_eq!(polygons.len(), 1);
        let polygon = &polygons[0];
        assert!((polygon.area() - 16.0).abs() < 1e-9);
        let exterior = polygon.exterior();
        assert_eq!(exterior.first(), exterior.last());
        assert!((ring_area(exterior) - 16.0).abs() < 1e-9);
    }

    #[test]
    fn separated_clusters_become_multiple_polygons() {
        let mut points = grid((0.0, 0.0), 4, 4, 1.0);
        points.extend(grid((20.0, 20.0), 3, 3, 1.0));
        let hull = extract_concave_hull(&points, 0.6).expect("hull");
        match &hull {
            HullResult::Multi(polygons) => {
                assert_eq!(polygons.len(), 2);
                let mut areas: Vec<f64> = polygons.iter().map(HullPolygon::area).collect();
                areas.sort_by(f64::total_cmp);
                assert!((areas[0] - 4.0).abs() < 1e-9);
                assert!((areas[1] - 9.0).abs() < 1e-9);
            }
            other => panic!("expected multi polygon hull, got {other:?}"),
        }

        let kept = hull.retain_above(5.0).expect("one polygon survives");
        assert_eq!(kept.len(), 1);
        assert!((kept[0].area() - 9.0).abs() < 1e-9);
    }

    #[test]
    fn concave_notch_is_preserved() {
        // L 形点阵：右上角缺少 (3,3)、(3,4)、(4,3)、(4,4) 四个点
        let points: Vec<Point2> = grid((0.0, 0.0), 5, 5, 1.0)
            .into_iter()
            .filter(|p| !(p.x() > 2.0 && p.y() > 2.0))
            .collect();
        let convex = extract_concave_hull(&points, 0.0).expect("convex hull");
        let concave = extract_concave_hull(&points, 1.2).expect("concave hull");
        // 凸包切去 (4,2)-(4,4)-(2,4) 三角形
        assert!((convex.polygons()[0].area() - 14.0).abs() < 1e-9);
        // 12 个完整单元格，外加 (2,2)-(3,2)-(2,3) 半格
        assert!((concave.polygons()[0].area() - 12.5).abs() < 1e-9);
        assert!(concave.polygons()[0].area() < convex.polygons()[0].area());
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let points = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(2.0, 2.0),
        ];
        let err = extract_concave_hull(&points, 0.6).unwrap_err();
        assert!(matches!(err, GeometryError::Degenerate { .. }), "{err}");
    }

    #[test]
    fn duplicates_do_not_count_as_distinct_points() {
        let points = [
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
        ];
        let err = extract_concave_hull(&points, 0.0).unwrap_err();
        assert!(matches!(err, GeometryError::TooFewPoints { found: 2 }), "{err}");
    }

    #[test]
    fn tight_alpha_rejects_every_triangle() {
        let points = grid((0.0, 0.0), 3, 3, 10.0);
        let err = extract_concave_hull(&points, 1.0).unwrap_err();
        assert!(matches!(err, GeometryError::Degenerate { .. }), "{err}");
    }

    #[test]
    fn nothing_above_threshold_is_reported() {
        let points = grid((0.0, 0.0), 2, 2, 1.0);
        let hull = extract_concave_hull(&points, 0.0).expect("hull");
        let err = hull.retain_above(4.0).unwrap_err();
        assert!(
            matches!(err, GeometryError::NothingAboveThreshold { candidates: 1, .. }),
            "{err}"
        );
    }

    #[test]
    fn threshold_decreases_by_step_per_band() {
        assert!((area_threshold(0, 4.0, 0.02) - 4.0).abs() < 1e-12);
        for index in 0..50 {
            let current = area_threshold(index, 4.0, 0.02);
            let next = area_threshold(index + 1, 4.0, 0.02);
            assert!(next < current);
            assert!((current - next - 0.02).abs() < 1e-12);
        }
    }
}

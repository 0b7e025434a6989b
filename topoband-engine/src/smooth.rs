//! 闭合边界的周期三次平滑样条。
//!
//! 以弦长为参数（归一化到 `[0, 1)`），求解 Reinsch 形式的惩罚最小二乘：
//! `(R + λQ²)γ = Qy`，拟合值 `f = y - λQγ`。`λ` 通过对数二分取满足
//! `Σ|y - f|² <= factor` 的最大值，`factor == 0` 时退化为插值。
//!
//! 周期拟合在 `λ → ∞` 时收缩到质心，因此 `λ` 另受面积约束：拟合顶点围成的
//! 面积不得低于原始环的 [`MIN_AREA_RETAINED`] 倍。

use std::collections::BTreeMap;

use glam::DVec2;
use topoband_core::geometry::{Point2, ring_area};
use tracing::{debug, trace, warn};

use crate::errors::SmoothingError;
use crate::params::SmoothingParams;

/// 拟合所需的最少输入点数（含闭合点）。
pub const MIN_SPLINE_POINTS: usize = 4;
const MIN_DISTINCT_VERTICES: usize = 3;

/// 平滑后拟合顶点须保留的原始面积比例。
pub const MIN_AREA_RETAINED: f64 = 0.5;
/// 采样曲线面积低于原始面积的该比例时视为坍缩。
const COLLAPSE_RATIO: f64 = 0.1;
/// 面积不超过 `周长² ×` 该值的环视为零面积。
const DEGENERATE_AREA_RATIO: f64 = 1e-9;

const LOG10_LAMBDA_MIN: f64 = -30.0;
const LOG10_LAMBDA_MAX: f64 = 30.0;
const BISECTION_STEPS: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedCurve {
    points: Vec<Point2>,
}

impl SmoothedCurve {
    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn into_points(self) -> Vec<Point2> {
        self.points
    }
}

/// 对闭合环做周期平滑，输出 `samples + 1` 个点，末点与首点相同。
pub fn smooth_boundary(
    ring: &[Point2],
    params: &SmoothingParams,
) -> Result<SmoothedCurve, SmoothingError> {
    if ring.len() < MIN_SPLINE_POINTS {
        return Err(SmoothingError::TooFewPoints {
            found: ring.len(),
            required: MIN_SPLINE_POINTS,
        });
    }

    let vertices = distinct_vertices(ring);
    if vertices.len() < MIN_DISTINCT_VERTICES {
        return Err(SmoothingError::TooFewPoints {
            found: vertices.len(),
            required: MIN_DISTINCT_VERTICES,
        });
    }

    let area = enclosed_area(&vertices);
    let length = perimeter(&vertices);
    if area <= DEGENERATE_AREA_RATIO * length * length {
        return Err(SmoothingError::Degenerate { area });
    }

    let spline =
        PeriodicSpline::fit_retaining(&vertices, params.factor, MIN_AREA_RETAINED * area)?;
    debug!(
        vertices = vertices.len(),
        lambda = spline.lambda,
        residual = spline.residual,
        "边界平滑完成"
    );

    let samples = params.samples.max(2);
    let mut points = spline.sample(samples);
    if collapsed(&points, area) {
        warn!(
            area,
            curve_area = ring_area(&points).abs(),
            "平滑曲线坍缩，改用经过原始顶点的插值曲线"
        );
        points = PeriodicSpline::fit_retaining(&vertices, 0.0, 0.0)?.sample(samples);
    }
    Ok(SmoothedCurve { points })
}

fn collapsed(points: &[Point2], area: f64) -> bool {
    ring_area(points).abs() < COLLAPSE_RATIO * area
}

fn enclosed_area(vertices: &[DVec2]) -> f64 {
    let n = vertices.len();
    let twice: f64 = (0..n)
        .map(|i| vertices[i].perp_dot(vertices[(i + 1) % n]))
        .sum();
    0.5 * twice.abs()
}

fn perimeter(vertices: &[DVec2]) -> f64 {
    let n = vertices.len();
    (0..n)
        .map(|i| vertices[i].distance(vertices[(i + 1) % n]))
        .sum()
}

/// 去掉闭合重复点与相邻重复点。
fn distinct_vertices(ring: &[Point2]) -> Vec<DVec2> {
    let mut vertices: Vec<DVec2> = Vec::with_capacity(ring.len());
    for point in ring {
        let v = point.as_vec2();
        if vertices.last() != Some(&v) {
            vertices.push(v);
        }
    }
    while vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    vertices
}

#[derive(Debug, Clone)]
struct PeriodicSpline {
    /// `n + 1` 个节点参数，末项为 1。
    knots: Vec<f64>,
    values: Vec<DVec2>,
    curvature: Vec<DVec2>,
    lambda: f64,
    residual: f64,
}

impl PeriodicSpline {
    /// `min_area` 为拟合顶点须围住的最小面积，0 表示不约束。
    fn fit_retaining(
        vertices: &[DVec2],
        factor: f64,
        min_area: f64,
    ) -> Result<Self, SmoothingError> {
        let n = vertices.len();
        let mut widths: Vec<f64> = (0..n)
            .map(|i| vertices[i].distance(vertices[(i + 1) % n]))
            .collect();
        let total: f64 = widths.iter().sum();
        if !(total > 0.0) || !total.is_finite() {
            return Err(SmoothingError::Singular);
        }
        widths.iter_mut().for_each(|h| *h /= total);

        let mut knots = Vec::with_capacity(n + 1);
        let mut t = 0.0;
        for h in &widths {
            knots.push(t);
            t += h;
        }
        knots.push(1.0);

        let system = SplineSystem { widths };
        let fit = if factor > 0.0 {
            system.fit_within(vertices, factor, min_area)?
        } else {
            system.fit(vertices, 0.0)?
        };

        Ok(Self {
            knots,
            values: fit.values,
            curvature: fit.curvature,
            lambda: fit.lambda,
            residual: fit.residual,
        })
    }

    /// 在 `[0, 1]` 上等距取 `samples` 个点，并追加首点闭合。
    fn sample(&self, samples: usize) -> Vec<Point2> {
        let last = (samples - 1) as f64;
        let mut points: Vec<Point2> = (0..samples)
            .map(|i| Point2::from_vec(self.evaluate(i as f64 / last)))
            .collect();
        points.push(points[0]);
        points
    }

    fn evaluate(&self, u: f64) -> DVec2 {
        let n = self.values.len();
        let u = u.rem_euclid(1.0);
        let i = self
            .knots
            .partition_point(|&t| t <= u)
            .saturating_sub(1)
            .min(n - 1);
        let j = (i + 1) % n;
        let h = self.knots[i + 1] - self.knots[i];
        let a = self.knots[i + 1] - u;
        let b = u - self.knots[i];

        (self.curvature[i] * a.powi(3) + self.curvature[j] * b.powi(3)) / (6.0 * h)
            + (self.values[i] / h - self.curvature[i] * h / 6.0) * a
            + (self.values[j] / h - self.curvature[j] * h / 6.0) * b
    }
}

struct Fit {
    values: Vec<DVec2>,
    curvature: Vec<DVec2>,
    lambda: f64,
    residual: f64,
}

/// 周期样条的带状系统；`widths[i]` 为第 i 段的参数跨度。
struct SplineSystem {
    widths: Vec<f64>,
}

impl SplineSystem {
    fn len(&self) -> usize {
        self.widths.len()
    }

    /// 二阶差分算子 Q 的第 `i` 行（对称、循环）。
    fn q_row(&self, i: usize) -> [(usize, f64); 3] {
        let n = self.len();
        let prev = (i + n - 1) % n;
        let next = (i + 1) % n;
        let left = 1.0 / self.widths[prev];
        let right = 1.0 / self.widths[i];
        [(prev, left), (i, -(left + right)), (next, right)]
    }

    fn apply_q(&self, v: &[f64]) -> Vec<f64> {
        (0..self.len())
            .map(|i| self.q_row(i).iter().map(|&(j, q)| q * v[j]).sum())
            .collect()
    }

    /// 组装 `R + λQ²` 的下三角部分，按行存储。
    fn assemble(&self, lambda: f64) -> Vec<BTreeMap<usize, f64>> {
        let n = self.len();
        (0..n)
            .map(|i| {
                let prev = (i + n - 1) % n;
                let next = (i + 1) % n;
                let mut row: BTreeMap<usize, f64> = BTreeMap::new();
                *row.entry(i).or_insert(0.0) += (self.widths[prev] + self.widths[i]) / 3.0;
                *row.entry(prev).or_insert(0.0) += self.widths[prev] / 6.0;
                *row.entry(next).or_insert(0.0) += self.widths[i] / 6.0;
                if lambda > 0.0 {
                    for (k, qik) in self.q_row(i) {
                        for (j, qkj) in self.q_row(k) {
                            *row.entry(j).or_insert(0.0) += lambda * qik * qkj;
                        }
                    }
                }
                row.retain(|&j, _| j <= i);
                row
            })
            .collect()
    }

    fn fit(&self, vertices: &[DVec2], lambda: f64) -> Result<Fit, SmoothingError> {
        let factor = EnvelopeCholesky::factor(self.assemble(lambda))?;
        let n = self.len();
        let mut values = vertices.to_vec();
        let mut curvature = vec![DVec2::ZERO; n];
        let mut residual = 0.0;

        for axis in 0..2 {
            let y: Vec<f64> = vertices.iter().map(|v| v[axis]).collect();
            let gamma = factor.solve(self.apply_q(&y));
            let correction = self.apply_q(&gamma);
            for i in 0..n {
                let shift = lambda * correction[i];
                values[i][axis] -= shift;
                curvature[i][axis] = gamma[i];
                residual += shift * shift;
            }
        }

        Ok(Fit {
            values,
            curvature,
            lambda,
            residual,
        })
    }

    /// 二分 `log10 λ`，取残差不超过 `factor` 且拟合面积不低于 `min_area` 的最大 `λ`。
    /// 分解失败视为不可行。
    fn fit_within(
        &self,
        vertices: &[DVec2],
        factor: f64,
        min_area: f64,
    ) -> Result<Fit, SmoothingError> {
        let feasible = |lambda: f64| match self.fit(vertices, lambda) {
            Ok(fit) if fit.residual <= factor && enclosed_area(&fit.values) >= min_area => {
                Some(fit)
            }
            _ => None,
        };

        if let Some(fit) = feasible(10f64.powf(LOG10_LAMBDA_MAX)) {
            return Ok(fit);
        }

        let mut best = self.fit(vertices, 0.0)?;
        let (mut lo, mut hi) = (LOG10_LAMBDA_MIN, LOG10_LAMBDA_MAX);
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            match feasible(10f64.powf(mid)) {
                Some(fit) => {
                    best = fit;
                    lo = mid;
                }
                None => hi = mid,
            }
        }
        trace!(log10_lambda = lo, residual = best.residual, "平滑参数二分结束");
        Ok(best)
    }
}

/// 对称正定矩阵的轮廓（envelope）Cholesky 分解：每行只存从首个非零列到对角线的部分。
struct EnvelopeCholesky {
    first: Vec<usize>,
    rows: Vec<Vec<f64>>,
}

impl EnvelopeCholesky {
    fn factor(lower: Vec<BTreeMap<usize, f64>>) -> Result<Self, SmoothingError> {
        let n = lower.len();
        let mut first = Vec::with_capacity(n);
        let mut rows = Vec::with_capacity(n);
        for (i, entries) in lower.into_iter().enumerate() {
            let start = entries.keys().next().copied().unwrap_or(i);
            let mut row = vec![0.0; i - start + 1];
            for (j, value) in entries {
                row[j - start] = value;
            }
            first.push(start);
            rows.push(row);
        }

        for i in 0..n {
            let fi = first[i];
            let (done, rest) = rows.split_at_mut(i);
            let row = &mut rest[0];
            for j in fi..i {
                let fj = first[j];
                let lj = &done[j];
                let mut sum = row[j - fi];
                for k in fi.max(fj)..j {
                    sum -= row[k - fi] * lj[k - fj];
                }
                row[j - fi] = sum / lj[j - fj];
            }
            let mut pivot = row[i - fi];
            for k in fi..i {
                pivot -= row[k - fi] * row[k - fi];
            }
            if !(pivot > 0.0) || !pivot.is_finite() {
                return Err(SmoothingError::Singular);
            }
            row[i - fi] = pivot.sqrt();
        }

        Ok(Self { first, rows })
    }

    fn solve(&self, mut rhs: Vec<f64>) -> Vec<f64> {
        let n = rhs.len();
        // L z = b
        for i in 0..n {
            let fi = self.first[i];
            let row = &self.rows[i];
            let mut sum = rhs[i];
            for k in fi..i {
                sum -= row[k - fi] * rhs[k];
            }
            rhs[i] = sum / row[i - fi];
        }
        // Lᵀ x = z
        for i in (0..n).rev() {
            let fi = self.first[i];
            let row = &self.rows[i];
            rhs[i] /= row[i - fi];
            let xi = rhs[i];
            for k in fi..i {
                rhs[k] -= row[k - fi] * xi;
            }
        }
        rhs
    }
}

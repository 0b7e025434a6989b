//! 单个海拔带的图纸内容：累计点集的凹包、平滑边界与山峰标记。

use topoband_core::geometry::Point2;
use tracing::{debug, warn};

use crate::errors::GeometryError;
use crate::hull::extract_concave_hull;
use crate::params::{BandSequenceParams, SmoothingParams};
use crate::smooth::{SmoothedCurve, smooth_boundary};
use crate::survey::{Band, BandLabel};

#[derive(Debug, Clone, PartialEq)]
pub struct BandDrawing {
    pub label: BandLabel,
    pub index: usize,
    pub threshold: f64,
    pub curves: Vec<SmoothedCurve>,
    pub markers: Vec<Point2>,
}

/// 为排序后第 `index` 个海拔带构建图纸。
///
/// 凹包基于 `bands[index..]` 的全部测点，即该带及所有更高海拔带；
/// 标记只取当前带中带名称的测点。
pub fn build_band(
    bands: &[Band],
    index: usize,
    params: &BandSequenceParams,
) -> Result<BandDrawing, GeometryError> {
    let Some(band) = bands.get(index) else {
        return Err(GeometryError::TooFewPoints { found: 0 });
    };

    let cumulative: Vec<Point2> = bands[index..]
        .iter()
        .flat_map(|band| band.points.iter().map(|point| point.position))
        .collect();
    let threshold = params.hull.threshold_for(index);
    debug!(
        band = %band.label,
        points = cumulative.len(),
        threshold,
        "计算海拔带凹包"
    );

    let polygons = extract_concave_hull(&cumulative, params.hull.alpha)?.retain_above(threshold)?;

    let curves = smooth_exteriors(
        band.label,
        polygons.iter().map(|polygon| polygon.exterior()),
        &params.smoothing,
    );

    let markers: Vec<Point2> = band
        .points
        .iter()
        .filter(|point| point.is_marker())
        .map(|point| point.position)
        .collect();

    Ok(BandDrawing {
        label: band.label,
        index,
        threshold,
        curves,
        markers,
    })
}

/// 逐个平滑外环；失败的环记录警告后丢弃，其余照常保留。
fn smooth_exteriors<'a>(
    label: BandLabel,
    exteriors: impl IntoIterator<Item = &'a [Point2]>,
    params: &SmoothingParams,
) -> Vec<SmoothedCurve> {
    let mut curves = Vec::new();
    for exterior in exteriors {
        match smooth_boundary(exterior, params) {
            Ok(curve) => curves.push(curve),
            Err(err) => warn!(
                band = %label,
                vertices = exterior.len(),
                error = %err,
                "边界平滑失败，已跳过该多边形"
            ),
        }
    }
    curves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::{SurveyPoint, categorize};

    fn square_patch(x0: f64, y0: f64, size: usize, altitude: f64) -> Vec<SurveyPoint> {
        let mut points = Vec::new();
        for i in 0..size {
            for j in 0..size {
                points.push(SurveyPoint::new(x0 + i as f64, y0 + j as f64, altitude));
            }
        }
        points
    }

    #[test]
    fn lower_band_hull_includes_higher_bands() {
        let mut points = square_patch(0.0, 0.0, 4, 20.0);
        points.extend(square_patch(3.0, 0.0, 4, 70.0));
        points.push(SurveyPoint::named(1.0, 1.0, 30.0, "Puig Major"));
        points.push(SurveyPoint::named(5.0, 1.0, 80.0, "Tossal"));
        let bands = categorize(&points, 50.0);
        let params = BandSequenceParams::default();

        let low = build_band(&bands, 0, &params).expect("low band");
        let high = build_band(&bands, 1, &params).expect("high band");

        assert_eq!(low.label.to_string(), "0m to 50m");
        assert_eq!(low.curves.len(), 1);
        assert_eq!(low.curves[0].len(), 501);
        assert_eq!(low.markers, vec![Point2::new(1.0, 1.0)]);
        assert!((low.threshold - 4.0).abs() < 1e-9);

        assert_eq!(high.markers, vec![Point2::new(5.0, 1.0)]);
        assert!((high.threshold - 3.98).abs() < 1e-9);

        // 低海拔带覆盖 x ∈ [0, 6]，高海拔带只有 [3, 6]
        let span = |drawing: &BandDrawing| {
            let xs = drawing.curves[0].points().iter().map(|p| p.x());
            xs.clone().fold(f64::NEG_INFINITY, f64::max) - xs.fold(f64::INFINITY, f64::min)
        };
        assert!(span(&low) > span(&high));
    }

    #[test]
    fn failed_smoothing_drops_only_that_ring() {
        let square = vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
            Point2::new(0.0, 0.0),
        ];
        let short = vec![
            Point2::new(20.0, 0.0),
            Point2::new(21.0, 0.0),
            Point2::new(20.0, 0.0),
        ];
        let flat = vec![
            Point2::new(30.0, 0.0),
            Point2::new(31.0, 0.0),
            Point2::new(32.0, 0.0),
            Point2::new(31.0, 0.0),
            Point2::new(30.0, 0.0),
        ];

        let curves = smooth_exteriors(
            BandLabel::new(0.0, 50.0),
            [short.as_slice(), square.as_slice(), flat.as_slice()],
            &SmoothingParams::default(),
        );

        assert_eq!(curves.len(), 1);
        assert_eq!(curves[0].len(), 501);
        assert!(curves[0].points().iter().all(|p| p.x() < 15.0));
    }

    #[test]
    fn collinear_band_is_degenerate() {
        let points: Vec<SurveyPoint> = (0..5)
            .map(|i| SurveyPoint::new(i as f64, i as f64, 10.0))
            .collect();
        let bands = categorize(&points, 50.0);
        let err = build_band(&bands, 0, &BandSequenceParams::default()).unwrap_err();
        assert!(matches!(err, GeometryError::Degenerate { .. }), "{err}");
    }

    #[test]
    fn small_hull_is_below_threshold() {
        let points = square_patch(0.0, 0.0, 2, 10.0);
        let bands = categorize(&points, 50.0);
        let err = build_band(&bands, 0, &BandSequenceParams::default()).unwrap_err();
        assert!(
            matches!(err, GeometryError::NothingAboveThreshold { candidates: 1, .. }),
            "{err}"
        );
    }
}

use std::path::{Path, PathBuf};

use topoband_core::document::{Document, Layer};
use topoband_core::geometry::{Point2, close_ring};
use topoband_io::DocumentSaver;
use tracing::info;

use crate::band::BandDrawing;
use crate::errors::BandError;
use crate::params::DrawingParams;
use crate::smooth::SmoothedCurve;

pub const BOUNDARIES_LAYER: &str = "Boundaries";
pub const CROSSES_LAYER: &str = "Crosses";
pub const MARGIN_LAYER: &str = "Margin";
pub const BOUNDARIES_START_LAYER: &str = "Boundaries_start";
pub const BOUNDARIES_END_LAYER: &str = "Boundaries_end";

pub const BOUNDARIES_COLOR: i16 = 7;
pub const CROSSES_COLOR: i16 = 1;
pub const MARGIN_COLOR: i16 = 3;
pub const BOUNDARIES_END_COLOR: i16 = 5;

/// 以原点为角点、边长为 `size` 的闭合方框。
pub fn margin_square(size: f64) -> Vec<Point2> {
    close_ring(vec![
        Point2::new(0.0, 0.0),
        Point2::new(size, 0.0),
        Point2::new(size, size),
        Point2::new(0.0, size),
    ])
}

/// 组装单个海拔带的图纸：边界曲线、山峰圆标记与外框。
pub fn marker_document(
    curves: &[SmoothedCurve],
    markers: &[Point2],
    params: &DrawingParams,
) -> Document {
    let mut doc = Document::new();
    doc.add_layer(Layer::with_color(BOUNDARIES_LAYER, BOUNDARIES_COLOR));
    doc.add_layer(Layer::with_color(CROSSES_LAYER, CROSSES_COLOR));
    doc.add_layer(Layer::with_color(MARGIN_LAYER, MARGIN_COLOR));

    // 点列本身首尾重合，多段线不再设置闭合标志
    for curve in curves {
        doc.add_polyline(curve.points().iter().copied(), false, BOUNDARIES_LAYER);
    }
    for &marker in markers {
        doc.add_circle(marker, params.marker_radius, CROSSES_LAYER);
    }
    doc.add_polyline(margin_square(params.margin_size), false, MARGIN_LAYER);
    doc
}

pub fn band_file_name(label: impl std::fmt::Display, extension: &str) -> String {
    format!("{label}.{extension}")
}

/// 将海拔带图纸写入 `dir/<label>.<ext>`，返回写出的路径。
pub fn write_band_drawing(
    drawing: &BandDrawing,
    dir: &Path,
    params: &DrawingParams,
    saver: &dyn DocumentSaver,
) -> Result<PathBuf, BandError> {
    let doc = marker_document(&drawing.curves, &drawing.markers, params);
    let path = dir.join(band_file_name(drawing.label, &params.extension));
    saver.save(&doc, &path)?;
    info!(
        path = %path.display(),
        curves = drawing.curves.len(),
        markers = drawing.markers.len(),
        "海拔带图纸已写出"
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use topoband_core::document::Entity;
    use topoband_io::{DocumentLoader, DxfFacade};

    use crate::params::SmoothingParams;
    use crate::smooth::smooth_boundary;
    use crate::survey::BandLabel;

    fn sample_curve() -> SmoothedCurve {
        let ring = margin_square(10.0);
        smooth_boundary(
            &ring,
            &SmoothingParams {
                factor: 0.0,
                samples: 40,
            },
        )
        .expect("smooth square")
    }

    #[test]
    fn margin_square_is_closed() {
        let square = margin_square(333.0);
        assert_eq!(square.len(), 5);
        assert_eq!(square.first(), square.last());
        assert_eq!(square[2], Point2::new(333.0, 333.0));
    }

    #[test]
    fn marker_document_declares_layers_and_entities() {
        let curve = sample_curve();
        let markers = [Point2::new(1.0, 2.0), Point2::new(3.0, 4.0)];
        let doc = marker_document(&[curve], &markers, &DrawingParams::default());

        assert_eq!(doc.layer(BOUNDARIES_LAYER).map(|l| l.color), Some(7));
        assert_eq!(doc.layer(CROSSES_LAYER).map(|l| l.color), Some(1));
        assert_eq!(doc.layer(MARGIN_LAYER).map(|l| l.color), Some(3));

        let boundaries: Vec<&Entity> = doc.entities_on_layer(BOUNDARIES_LAYER).collect();
        match boundaries.as_slice() {
            [Entity::Polyline(polyline)] => {
                assert!(!polyline.is_closed);
                assert_eq!(polyline.vertices.len(), 41);
                assert_eq!(polyline.vertices.first(), polyline.vertices.last());
            }
            other => panic!("期望一条边界多段线，实际为 {other:?}"),
        }

        let crosses: Vec<&Entity> = doc.entities_on_layer(CROSSES_LAYER).collect();
        assert_eq!(crosses.len(), 2);
        assert!(crosses.iter().all(|entity| match entity {
            Entity::Circle(circle) => (circle.radius - 0.5).abs() < 1e-9,
            _ => false,
        }));

        let margin = doc.entities_on_layer(MARGIN_LAYER).next().expect("缺少外框");
        let bounds = margin.bounds().expect("外框范围");
        assert_eq!(bounds.max(), Point2::new(333.0, 333.0));
    }

    #[test]
    fn margin_has_no_zero_length_closing_segment() {
        let doc = marker_document(&[], &[], &DrawingParams::default());
        match doc.entities_on_layer(MARGIN_LAYER).next() {
            Some(Entity::Polyline(polyline)) => {
                assert!(!polyline.is_closed);
                assert_eq!(polyline.vertices.len(), 5);
                assert_eq!(polyline.vertices.first(), polyline.vertices.last());
            }
            other => panic!("期望外框多段线，实际为 {other:?}"),
        }
    }

    #[test]
    fn empty_band_still_has_margin() {
        let doc = marker_document(&[], &[], &DrawingParams::default());
        assert_eq!(doc.entities().count(), 1);
        assert!(doc.layer(CROSSES_LAYER).is_some());
    }

    #[test]
    fn band_drawing_is_written_under_label() {
        let dir = tempfile::tempdir().expect("创建临时目录失败");
        let drawing = BandDrawing {
            label: BandLabel::new(150.0, 50.0),
            index: 3,
            threshold: 3.94,
            curves: vec![sample_curve()],
            markers: vec![Point2::new(5.0, 5.0)],
        };
        let facade = DxfFacade::new();
        let path = write_band_drawing(&drawing, dir.path(), &DrawingParams::default(), &facade)
            .expect("写出海拔带失败");
        assert_eq!(path, dir.path().join("150m to 200m.dxf"));

        let doc = facade.load(&path).expect("读取海拔带失败");
        assert_eq!(doc.entities_on_layer(BOUNDARIES_LAYER).count(), 1);
        assert_eq!(doc.entities_on_layer(CROSSES_LAYER).count(), 1);
        assert_eq!(doc.entities_on_layer(MARGIN_LAYER).count(), 1);
    }
}

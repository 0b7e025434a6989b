//! 测点输入、清洗与海拔分档。

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use topoband_core::geometry::{Bounds2D, Point2};
use tracing::{debug, warn};

use crate::errors::SurveyError;

/// 一个测点：平面位置、海拔，以及可选的山峰名称。
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyPoint {
    pub position: Point2,
    pub altitude: f64,
    pub name: Option<String>,
}

impl SurveyPoint {
    pub fn new(x: f64, y: f64, altitude: f64) -> Self {
        Self {
            position: Point2::new(x, y),
            altitude,
            name: None,
        }
    }

    pub fn named(x: f64, y: f64, altitude: f64, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(x, y, altitude)
        }
    }

    /// 带名称的测点在图纸中绘制为标记。
    pub fn is_marker(&self) -> bool {
        self.name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty())
    }
}

pub trait PointSource {
    fn load(&self) -> Result<Vec<SurveyPoint>, SurveyError>;
}

/// 读取预处理后的测点 CSV，列为 `longitude, latitude, altitude[, nom]`，多余列被忽略。
#[derive(Debug, Clone)]
pub struct CsvPointSource {
    path: PathBuf,
}

impl CsvPointSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Deserialize)]
struct PointRecord {
    longitude: f64,
    latitude: f64,
    altitude: f64,
    #[serde(default)]
    nom: Option<String>,
}

impl PointSource for CsvPointSource {
    fn load(&self) -> Result<Vec<SurveyPoint>, SurveyError> {
        let mut reader = csv::Reader::from_path(&self.path).map_err(|source| SurveyError::Open {
            path: self.path.clone(),
            source,
        })?;

        let mut points = Vec::new();
        for record in reader.deserialize::<PointRecord>() {
            let record = record.map_err(|source| SurveyError::Record {
                path: self.path.clone(),
                line: source.position().map_or(0, |pos| pos.line()),
                source,
            })?;
            let name = record.nom.filter(|name| !name.trim().is_empty());
            points.push(SurveyPoint {
                position: Point2::new(record.longitude, record.latitude),
                altitude: record.altitude,
                name,
            });
        }
        debug!(path = %self.path.display(), count = points.len(), "测点读取完成");
        Ok(points)
    }
}

/// 丢弃海拔不大于 0 的测点，返回保留的测点与丢弃数量。
pub fn drop_non_positive_altitude(points: Vec<SurveyPoint>) -> (Vec<SurveyPoint>, usize) {
    let total = points.len();
    let kept: Vec<SurveyPoint> = points
        .into_iter()
        .filter(|point| point.altitude > 0.0)
        .collect();
    let dropped = total - kept.len();
    if dropped > 0 {
        warn!(dropped, total, "已丢弃海拔不大于 0 的测点");
    }
    (kept, dropped)
}

/// 将 x、y 分别线性映射到 `range`。跨度为 0 的轴映射到 `range[0]`。
pub fn rescale(points: &mut [SurveyPoint], range: [f64; 2]) {
    let bounds = Bounds2D::from_points(points.iter().map(|point| point.position));
    if bounds.is_empty() {
        return;
    }
    let (min, span) = (bounds.min(), range[1] - range[0]);
    let map = |value: f64, low: f64, extent: f64| {
        if extent > 0.0 {
            (value - low) / extent * span + range[0]
        } else {
            range[0]
        }
    };
    for point in points.iter_mut() {
        point.position = Point2::new(
            map(point.position.x(), min.x(), bounds.width()),
            map(point.position.y(), min.y(), bounds.height()),
        );
    }
}

#[inline]
pub fn band_floor(altitude: f64, band_size: f64) -> f64 {
    (altitude / band_size).floor() * band_size
}

/// 海拔带标签，显示为 `"<start>m to <end>m"`，同时用作输出文件名。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandLabel {
    pub start: f64,
    pub end: f64,
}

impl BandLabel {
    pub fn new(start: f64, band_size: f64) -> Self {
        Self {
            start,
            end: start + band_size,
        }
    }
}

impl fmt::Display for BandLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m to {}m", self.start, self.end)
    }
}

/// 读取名称首个词的米数，如 `"150m to 200m"` 得到 150。
pub fn parse_leading_meters(text: &str) -> Option<f64> {
    let token = text.split_whitespace().next()?;
    token.strip_suffix('m').unwrap_or(token).parse().ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub label: BandLabel,
    pub mean_altitude: f64,
    pub points: Vec<SurveyPoint>,
}

/// 按海拔分档，并按平均海拔升序排列；平均值相同时按档位起点排序。
pub fn categorize(points: &[SurveyPoint], band_size: f64) -> Vec<Band> {
    if !(band_size > 0.0) {
        warn!(band_size, "海拔分档宽度必须为正数");
        return Vec::new();
    }

    let mut groups: BTreeMap<i64, Vec<SurveyPoint>> = BTreeMap::new();
    for point in points {
        if !point.altitude.is_finite() {
            debug!(altitude = point.altitude, "跳过无效海拔");
            continue;
        }
        let key = (point.altitude / band_size).floor() as i64;
        groups.entry(key).or_default().push(point.clone());
    }

    let mut bands: Vec<Band> = groups
        .into_iter()
        .map(|(key, points)| {
            let mean_altitude =
                points.iter().map(|point| point.altitude).sum::<f64>() / points.len() as f64;
            Band {
                label: BandLabel::new(key as f64 * band_size, band_size),
                mean_altitude,
                points,
            }
        })
        .collect();
    bands.sort_by(|a, b| {
        a.mean_altitude
            .total_cmp(&b.mean_altitude)
            .then(a.label.start.total_cmp(&b.label.start))
    });
    bands
}

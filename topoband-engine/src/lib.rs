pub mod band;
pub mod driver;
pub mod hull;
pub mod merge;
pub mod smooth;
pub mod survey;
pub mod writer;

pub mod errors {
    use std::path::PathBuf;

    use thiserror::Error;
    use topoband_io::IoError;

    /// 凹包计算失败或结果退化，调用方应跳过该海拔带。
    #[derive(Debug, Error)]
    pub enum GeometryError {
        #[error("concave hull needs at least 3 distinct points, found {found}")]
        TooFewPoints { found: usize },
        #[error("point set is degenerate: no triangle survives alpha = {alpha}")]
        Degenerate { alpha: f64 },
        #[error("none of {candidates} polygon(s) exceeds area threshold {threshold:.2}")]
        NothingAboveThreshold { threshold: f64, candidates: usize },
    }

    #[derive(Debug, Error)]
    pub enum SmoothingError {
        #[error("spline fit needs at least {required} points, found {found}")]
        TooFewPoints { found: usize, required: usize },
        #[error("spline system is not positive definite")]
        Singular,
        #[error("ring encloses no area (area = {area})")]
        Degenerate { area: f64 },
    }

    #[derive(Debug, Error)]
    pub enum SurveyError {
        #[error("failed to open point source {path:?}: {source}")]
        Open {
            path: PathBuf,
            #[source]
            source: csv::Error,
        },
        #[error("malformed record at line {line} of {path:?}: {source}")]
        Record {
            path: PathBuf,
            line: u64,
            #[source]
            source: csv::Error,
        },
    }

    #[derive(Debug, Error)]
    pub enum BandError {
        #[error(transparent)]
        Geometry(#[from] GeometryError),
        #[error(transparent)]
        Survey(#[from] SurveyError),
        #[error("failed to write band drawing: {0}")]
        Write(#[from] IoError),
        #[error("failed to create output directory {path:?}: {source}")]
        CreateDir {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
    }

    /// 合并阶段在开始写出前就应拒绝的输入。
    #[derive(Debug, Error)]
    pub enum MergeConfigError {
        #[error("gap {gap} must be a positive multiple of the band size {band_size}")]
        InvalidGap { gap: u32, band_size: f64 },
        #[error("no band drawings to merge")]
        EmptySequence,
    }

    #[derive(Debug, Error)]
    pub enum MergeError {
        #[error(transparent)]
        Config(#[from] MergeConfigError),
        #[error("failed to read band drawing {path:?}: {source}")]
        Read {
            path: PathBuf,
            #[source]
            source: IoError,
        },
        #[error("failed to write composite drawing {path:?}: {source}")]
        Write {
            path: PathBuf,
            #[source]
            source: IoError,
        },
        #[error("failed to create output directory {path:?}: {source}")]
        CreateDir {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("failed to scan directory {path:?}: {source}")]
        Scan {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
    }
}

/// 管道各阶段的显式参数，取代全局共享的坐标范围与输出目录。
pub mod params {
    use topoband_config::AppConfig;

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct HullParams {
        pub alpha: f64,
        pub area_threshold_start: f64,
        pub area_threshold_step: f64,
    }

    impl HullParams {
        /// 第 `index` 个海拔带使用的面积阈值。
        #[inline]
        pub fn threshold_for(&self, index: usize) -> f64 {
            crate::hull::area_threshold(index, self.area_threshold_start, self.area_threshold_step)
        }
    }

    impl Default for HullParams {
        fn default() -> Self {
            Self {
                alpha: 0.6,
                area_threshold_start: 4.0,
                area_threshold_step: 0.02,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct SmoothingParams {
        /// 残差平方和上限，0 表示严格插值。
        pub factor: f64,
        pub samples: usize,
    }

    impl Default for SmoothingParams {
        fn default() -> Self {
            Self {
                factor: 10.0,
                samples: 500,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct DrawingParams {
        pub marker_radius: f64,
        pub margin_size: f64,
        pub extension: String,
    }

    impl Default for DrawingParams {
        fn default() -> Self {
            Self {
                marker_radius: 0.5,
                margin_size: 333.0,
                extension: "dxf".to_string(),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct BandSequenceParams {
        pub band_size: f64,
        pub hull: HullParams,
        pub smoothing: SmoothingParams,
        pub drawing: DrawingParams,
    }

    impl Default for BandSequenceParams {
        fn default() -> Self {
            Self {
                band_size: 50.0,
                hull: HullParams::default(),
                smoothing: SmoothingParams::default(),
                drawing: DrawingParams::default(),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct MergeParams {
        pub gap: u32,
        pub band_size: f64,
        pub extension: String,
    }

    impl Default for MergeParams {
        fn default() -> Self {
            Self {
                gap: 100,
                band_size: 50.0,
                extension: "dxf".to_string(),
            }
        }
    }

    impl From<&AppConfig> for BandSequenceParams {
        fn from(config: &AppConfig) -> Self {
            Self {
                band_size: config.survey.band_size,
                hull: HullParams {
                    alpha: config.hull.alpha,
                    area_threshold_start: config.hull.area_threshold_start,
                    area_threshold_step: config.hull.area_threshold_step,
                },
                smoothing: SmoothingParams {
                    factor: config.smoothing.factor,
                    samples: config.smoothing.samples,
                },
                drawing: DrawingParams {
                    marker_radius: config.drawing.marker_radius,
                    margin_size: config.drawing.margin_size,
                    extension: config.drawing.extension.clone(),
                },
            }
        }
    }

    impl From<&AppConfig> for MergeParams {
        fn from(config: &AppConfig) -> Self {
            Self {
                gap: config.merge.gap,
                band_size: config.survey.band_size,
                extension: config.drawing.extension.clone(),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn params_from_default_config_match_defaults() {
            let config = AppConfig::default();
            assert_eq!(BandSequenceParams::from(&config), BandSequenceParams::default());
            assert_eq!(MergeParams::from(&config), MergeParams::default());
        }
    }
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV_VAR: &str = "TOPOBAND_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub survey: SurveyConfig,
    #[serde(default)]
    pub hull: HullConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub drawing: DrawingConfig,
    #[serde(default)]
    pub merge: MergeConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `TOPOBAND_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV_VAR) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 测点预处理：海拔分档宽度、平面坐标缩放范围。
#[derive(Debug, Clone, Deserialize)]
pub struct SurveyConfig {
    #[serde(default = "SurveyConfig::default_band_size")]
    pub band_size: f64,
    #[serde(default = "SurveyConfig::default_xy_range")]
    pub xy_range: [f64; 2],
    #[serde(default = "SurveyConfig::default_drop_non_positive")]
    pub drop_non_positive_altitude: bool,
}

impl SurveyConfig {
    fn default_band_size() -> f64 {
        50.0
    }

    fn default_xy_range() -> [f64; 2] {
        [0.0, 333.0]
    }

    fn default_drop_non_positive() -> bool {
        true
    }
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            band_size: Self::default_band_size(),
            xy_range: Self::default_xy_range(),
            drop_non_positive_altitude: Self::default_drop_non_positive(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HullConfig {
    #[serde(default = "HullConfig::default_alpha")]
    pub alpha: f64,
    #[serde(default = "HullConfig::default_threshold_start")]
    pub area_threshold_start: f64,
    #[serde(default = "HullConfig::default_threshold_step")]
    pub area_threshold_step: f64,
}

impl HullConfig {
    fn default_alpha() -> f64 {
        0.6
    }

    fn default_threshold_start() -> f64 {
        4.0
    }

    fn default_threshold_step() -> f64 {
        0.02
    }
}

impl Default for HullConfig {
    fn default() -> Self {
        Self {
            alpha: Self::default_alpha(),
            area_threshold_start: Self::default_threshold_start(),
            area_threshold_step: Self::default_threshold_step(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmoothingConfig {
    #[serde(default = "SmoothingConfig::default_factor")]
    pub factor: f64,
    #[serde(default = "SmoothingConfig::default_samples")]
    pub samples: usize,
}

impl SmoothingConfig {
    fn default_factor() -> f64 {
        10.0
    }

    fn default_samples() -> usize {
        500
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            factor: Self::default_factor(),
            samples: Self::default_samples(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DrawingConfig {
    #[serde(default = "DrawingConfig::default_marker_radius")]
    pub marker_radius: f64,
    #[serde(default = "DrawingConfig::default_margin_size")]
    pub margin_size: f64,
    #[serde(default = "DrawingConfig::default_extension")]
    pub extension: String,
}

impl DrawingConfig {
    fn default_marker_radius() -> f64 {
        0.5
    }

    fn default_margin_size() -> f64 {
        333.0
    }

    fn default_extension() -> String {
        "dxf".to_string()
    }
}

impl Default for DrawingConfig {
    fn default() -> Self {
        Self {
            marker_radius: Self::default_marker_radius(),
            margin_size: Self::default_margin_size(),
            extension: Self::default_extension(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "MergeConfig::default_gap")]
    pub gap: u32,
}

impl MergeConfig {
    fn default_gap() -> u32 {
        100
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            gap: Self::default_gap(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_pipeline() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.logging.level, "info");
        assert!((cfg.survey.band_size - 50.0).abs() < f64::EPSILON);
        assert_eq!(cfg.survey.xy_range, [0.0, 333.0]);
        assert!(cfg.survey.drop_non_positive_altitude);
        assert!((cfg.hull.alpha - 0.6).abs() < f64::EPSILON);
        assert!((cfg.hull.area_threshold_start - 4.0).abs() < f64::EPSILON);
        assert!((cfg.hull.area_threshold_step - 0.02).abs() < f64::EPSILON);
        assert!((cfg.smoothing.factor - 10.0).abs() < f64::EPSILON);
        assert_eq!(cfg.smoothing.samples, 500);
        assert!((cfg.drawing.marker_radius - 0.5).abs() < f64::EPSILON);
        assert!((cfg.drawing.margin_size - 333.0).abs() < f64::EPSILON);
        assert_eq!(cfg.drawing.extension, "dxf");
        assert_eq!(cfg.merge.gap, 100);
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [hull]
            alpha = 1.5

            [smoothing]
            factor = 0.0

            [merge]
            gap = 150
            "#
        )
        .unwrap();

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert!((cfg.hull.alpha - 1.5).abs() < f64::EPSILON);
        // 未出现的字段保持默认
        assert!((cfg.hull.area_threshold_start - 4.0).abs() < f64::EPSILON);
        assert!(cfg.smoothing.factor.abs() < f64::EPSILON);
        assert_eq!(cfg.smoothing.samples, 500);
        assert_eq!(cfg.merge.gap, 150);
        assert_eq!(cfg.drawing.extension, "dxf");
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[merge]\ngap = \"wide\"").unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
    }

    #[test]
    fn missing_file_reports_io_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let err = AppConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }), "{err}");
    }
}

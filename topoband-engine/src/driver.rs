use std::fs;
use std::path::{Path, PathBuf};

use topoband_io::DocumentSaver;
use tracing::{info, warn};

use crate::band::build_band;
use crate::errors::BandError;
use crate::params::BandSequenceParams;
use crate::survey::{BandLabel, SurveyPoint, categorize};
use crate::writer::write_band_drawing;

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedBand {
    pub label: BandLabel,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandSequenceReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<SkippedBand>,
}

/// 依次为每个海拔带构建并写出图纸。
///
/// 单个海拔带的几何或写出失败只记录在报告中，不会中断后续海拔带。
pub fn run_band_sequence(
    points: &[SurveyPoint],
    params: &BandSequenceParams,
    output_dir: &Path,
    saver: &dyn DocumentSaver,
) -> Result<BandSequenceReport, BandError> {
    fs::create_dir_all(output_dir).map_err(|source| BandError::CreateDir {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let bands = categorize(points, params.band_size);
    info!(bands = bands.len(), points = points.len(), "开始生成海拔带图纸");

    let mut report = BandSequenceReport::default();
    for index in 0..bands.len() {
        let label = bands[index].label;
        let outcome = build_band(&bands, index, params)
            .map_err(BandError::from)
            .and_then(|drawing| write_band_drawing(&drawing, output_dir, &params.drawing, saver));
        match outcome {
            Ok(path) => report.written.push(path),
            Err(err) => {
                warn!(band = %label, error = %err, "海拔带已跳过");
                report.skipped.push(SkippedBand {
                    label,
                    reason: err.to_string(),
                });
            }
        }
    }

    info!(
        written = report.written.len(),
        skipped = report.skipped.len(),
        "海拔带图纸生成结束"
    );
    Ok(report)
}

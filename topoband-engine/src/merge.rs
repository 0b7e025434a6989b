//! 按海拔间隔合并海拔带图纸。
//!
//! 每个窗口取起始与结束两张图纸的边界，分别放入 `Boundaries_start` 与
//! `Boundaries_end` 图层；`Crosses` 汇总起始图纸及其后所有图纸的标记。

use std::fs;
use std::path::{Path, PathBuf};

use topoband_core::document::{Document, Entity, Layer};
use topoband_io::{DocumentLoader, DocumentSaver};
use tracing::{debug, info, warn};

use crate::errors::{MergeConfigError, MergeError};
use crate::params::MergeParams;
use crate::survey::parse_leading_meters;
use crate::writer::{
    BOUNDARIES_COLOR, BOUNDARIES_END_COLOR, BOUNDARIES_END_LAYER, BOUNDARIES_LAYER,
    BOUNDARIES_START_LAYER, CROSSES_COLOR, CROSSES_LAYER, MARGIN_COLOR, MARGIN_LAYER,
};

const GAP_TOLERANCE: f64 = 1e-9;

/// 合并窗口，`start` 与 `end` 为排序后图纸序列中的下标。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeWindow {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedWindow {
    pub window: MergeWindow,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<FailedWindow>,
}

/// 列出目录中指定扩展名、且文件名以米数开头的图纸，按米数升序排列。
pub fn collect_band_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, MergeError> {
    let scan_error = |source| MergeError::Scan {
        path: dir.to_path_buf(),
        source,
    };

    let mut files: Vec<(f64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).map_err(scan_error)? {
        let path = entry.map_err(scan_error)?.path();
        if !path.is_file() {
            continue;
        }
        let matches_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if !matches_extension {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        match parse_leading_meters(stem) {
            Some(meters) => files.push((meters, path)),
            None => debug!(path = %path.display(), "文件名缺少米数前缀，已忽略"),
        }
    }

    files.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// 按 `gap / band_size` 个图纸为步长划分窗口，末尾越界时截到最后一张。
pub fn plan_windows(
    len: usize,
    gap: u32,
    band_size: f64,
) -> Result<Vec<MergeWindow>, MergeConfigError> {
    let invalid = || MergeConfigError::InvalidGap { gap, band_size };
    if gap == 0 || !(band_size > 0.0) {
        return Err(invalid());
    }
    let ratio = f64::from(gap) / band_size;
    let step = ratio.round();
    if step < 1.0 || (ratio - step).abs() > GAP_TOLERANCE {
        return Err(invalid());
    }
    if len == 0 {
        return Err(MergeConfigError::EmptySequence);
    }

    let step = step as usize;
    Ok((0..len)
        .step_by(step)
        .map(|start| MergeWindow {
            start,
            end: if start + step < len { start + step } else { len - 1 },
        })
        .collect())
}

/// 合并图纸名：两端文件名的首个词，如 `"0m to 100m.dxf"`。
pub fn composite_name(start: &Path, end: &Path, extension: &str) -> String {
    format!(
        "{} to {}.{extension}",
        leading_token(start),
        leading_token(end)
    )
}

fn leading_token(path: &Path) -> &str {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    stem.split_whitespace().next().unwrap_or(stem)
}

/// 组装一个窗口的合并图纸。只读取 `files[window.start..]`，每个文件读取一次。
pub fn combine(
    files: &[PathBuf],
    window: MergeWindow,
    loader: &dyn DocumentLoader,
) -> Result<Document, MergeError> {
    let group = files
        .get(window.start..)
        .filter(|group| window.end >= window.start && window.end - window.start < group.len())
        .ok_or(MergeError::Config(MergeConfigError::EmptySequence))?;

    let docs = group
        .iter()
        .map(|path| {
            loader.load(path).map_err(|source| MergeError::Read {
                path: path.clone(),
                source,
            })
        })
        .collect::<Result<Vec<Document>, MergeError>>()?;
    let start_doc = &docs[0];
    let end_doc = &docs[window.end - window.start];

    let mut combined = Document::new();
    combined.add_layer(Layer::with_color(BOUNDARIES_START_LAYER, BOUNDARIES_COLOR));
    combined.add_layer(Layer::with_color(BOUNDARIES_END_LAYER, BOUNDARIES_END_COLOR));
    combined.add_layer(Layer::with_color(CROSSES_LAYER, CROSSES_COLOR));
    combined.add_layer(Layer::with_color(MARGIN_LAYER, MARGIN_COLOR));

    let start_boundaries = copy_polylines(
        start_doc,
        BOUNDARIES_LAYER,
        BOUNDARIES_START_LAYER,
        &mut combined,
    );
    copy_polylines(start_doc, MARGIN_LAYER, MARGIN_LAYER, &mut combined);
    let end_boundaries =
        copy_polylines(end_doc, BOUNDARIES_LAYER, BOUNDARIES_END_LAYER, &mut combined);
    debug!(
        start = %group[0].display(),
        end = %group[window.end - window.start].display(),
        start_boundaries,
        end_boundaries,
        "边界已复制"
    );

    for (path, doc) in group.iter().zip(&docs) {
        let crosses: Vec<Entity> = doc
            .entities_on_layer(CROSSES_LAYER)
            .filter(|entity| matches!(entity, Entity::Circle(_)))
            .cloned()
            .collect();
        debug!(path = %path.display(), count = crosses.len(), "标记已复制");
        for entity in crosses {
            combined.add_entity(entity);
        }
    }

    Ok(combined)
}

fn copy_polylines(source: &Document, from: &str, to: &str, target: &mut Document) -> usize {
    let copies: Vec<Entity> = source
        .entities_on_layer(from)
        .filter(|entity| matches!(entity, Entity::Polyline(_)))
        .map(|entity| entity.with_layer(to))
        .collect();
    let count = copies.len();
    for entity in copies {
        target.add_entity(entity);
    }
    count
}

/// 按间隔合并已排序的海拔带图纸。
///
/// 间隔不合法或序列为空时直接返回错误，不写出任何文件；单个窗口的读写失败
/// 只记录在报告中。
pub fn merge_by_gap(
    files: &[PathBuf],
    params: &MergeParams,
    output_dir: &Path,
    loader: &dyn DocumentLoader,
    saver: &dyn DocumentSaver,
) -> Result<MergeReport, MergeError> {
    let windows = plan_windows(files.len(), params.gap, params.band_size)?;
    fs::create_dir_all(output_dir).map_err(|source| MergeError::CreateDir {
        path: output_dir.to_path_buf(),
        source,
    })?;
    info!(
        files = files.len(),
        windows = windows.len(),
        gap = params.gap,
        "开始合并海拔带图纸"
    );

    let mut report = MergeReport::default();
    for window in windows {
        let name = composite_name(&files[window.start], &files[window.end], &params.extension);
        let path = output_dir.join(&name);
        let outcome = combine(files, window, loader).and_then(|doc| {
            saver.save(&doc, &path).map_err(|source| MergeError::Write {
                path: path.clone(),
                source,
            })
        });
        match outcome {
            Ok(()) => {
                info!(path = %path.display(), "合并图纸已写出");
                report.written.push(path);
            }
            Err(err) => {
                warn!(composite = %name, error = %err, "合并窗口失败，继续处理下一组");
                report.failed.push(FailedWindow {
                    window,
                    name,
                    error: err.to_string(),
                });
            }
        }
    }
    Ok(report)
}

/// 扫描目录后按间隔合并，供命令行直接调用。
pub fn merge_directory(
    input_dir: &Path,
    params: &MergeParams,
    output_dir: &Path,
    loader: &dyn DocumentLoader,
    saver: &dyn DocumentSaver,
) -> Result<MergeReport, MergeError> {
    let files = collect_band_files(input_dir, &params.extension)?;
    merge_by_gap(&files, params, output_dir, loader, saver)
}

use std::fmt::Write as _;
use std::path::Path;

use topoband_core::document::{Document, Entity};

/// 图纸概览：范围、各图层颜色与可见性，以及每个图层的实体数量。
pub fn summarize(path: &Path, doc: &Document) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "图纸：{}", path.display());
    match doc.bounds() {
        Some(bounds) => {
            let _ = writeln!(
                out,
                "范围=({:.2}, {:.2}) - ({:.2}, {:.2})",
                bounds.min().x(),
                bounds.min().y(),
                bounds.max().x(),
                bounds.max().y()
            );
        }
        None => {
            let _ = writeln!(out, "范围=<空>");
        }
    }

    let _ = writeln!(out, "图层：");
    for layer in doc.layers() {
        let mut polylines = 0usize;
        let mut circles = 0usize;
        for entity in doc.entities_on_layer(&layer.name) {
            match entity {
                Entity::Polyline(_) => polylines += 1,
                Entity::Circle(_) => circles += 1,
            }
        }
        let _ = writeln!(
            out,
            "  - {} (颜色: {}, 可见: {}) 多段线={}, 圆={}",
            layer.name,
            layer.color,
            if layer.is_visible { "是" } else { "否" },
            polylines,
            circles
        );
    }
    let _ = writeln!(out, "实体总数={}", doc.entities().count());
    out
}

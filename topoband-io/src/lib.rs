use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use thiserror::Error;
use topoband_core::{
    document::{Circle, Document, Entity, Layer, Polyline},
    geometry::Point2,
};
use tracing::debug;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Document, IoError>;
}

pub trait DocumentSaver {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError>;
}

/// ASCII DXF 读写入口，仅覆盖分层图纸需要的 LAYER 表、LWPOLYLINE 与 CIRCLE。
#[derive(Debug, Clone, Copy, Default)]
pub struct DxfFacade;

impl DxfFacade {
    pub fn new() -> Self {
        Self
    }

    /// 从内存文本解析文档，便于测试与管道复用。
    pub fn parse_str(&self, source: &str) -> Result<Document, IoError> {
        DxfParser::new(source).parse().map_err(IoError::from)
    }

    /// 将文档编码为 DXF 文本。相同文档总是得到逐字节相同的输出。
    pub fn write_string(&self, document: &Document) -> String {
        DxfWriter::new().write(document)
    }
}

impl DocumentLoader for DxfFacade {
    fn load(&self, path: &Path) -> Result<Document, IoError> {
        let data = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let document = self.parse_str(&data)?;
        debug!(
            path = %path.display(),
            entity_count = document.entities().count(),
            "已读取 DXF"
        );
        Ok(document)
    }
}

impl DocumentSaver for DxfFacade {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError> {
        let content = self.write_string(document);
        fs::write(path, content).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug)]
enum DxfError {
    Unsupported { feature: String },
    Invalid { message: String },
}

impl DxfError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

impl From<DxfError> for IoError {
    fn from(err: DxfError) -> Self {
        match err {
            DxfError::Unsupported { feature } => IoError::UnsupportedFeature(feature),
            DxfError::Invalid { message } => IoError::InvalidDocument(message),
        }
    }
}

struct DxfParser<'a> {
    reader: DxfReader<'a>,
}

impl<'a> DxfParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            reader: DxfReader::new(source),
        }
    }

    fn parse(mut self) -> Result<Document, DxfError> {
        let mut document = Document::new();
        while let Some((code, value)) = self.reader.next_pair()? {
            if code == 999 {
                continue;
            }
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "意外的组码 {code}（期望 0 表示 SECTION/EOF）"
                )));
            }
            match value.as_str() {
                "SECTION" => {
                    let (name_code, name) = self
                        .reader
                        .next_pair()?
                        .ok_or_else(|| DxfError::invalid("SECTION 缺少名称（组码 2）"))?;
                    if name_code != 2 {
                        return Err(DxfError::invalid(format!(
                            "SECTION 名称使用了组码 {name_code}（期望 2）"
                        )));
                    }
                    match name.trim() {
                        "TABLES" => self.parse_tables(&mut document)?,
                        "ENTITIES" => self.parse_entities(&mut document)?,
                        _ => self.skip_section()?,
                    }
                }
                "EOF" => break,
                unexpected => {
                    return Err(DxfError::invalid(format!(
                        "意外的标记 {unexpected}，期望 SECTION 或 EOF"
                    )));
                }
            }
        }
        Ok(document)
    }

    fn skip_section(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value == "ENDSEC" => break,
                Some(_) => continue,
                None => {
                    return Err(DxfError::invalid("SECTION 未找到 ENDSEC 终止标记"));
                }
            }
        }
        Ok(())
    }

    fn parse_tables(&mut self, document: &mut Document) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("TABLES 段提前结束")),
            };
            if code != 0 {
                // TABLE 头部属性（组码 2/5/70/100 等）
                continue;
            }
            match value.as_str() {
                "ENDSEC" => break,
                "LAYER" => {
                    let layer = self.parse_layer_record()?;
                    document.add_layer(layer);
                }
                _ => {
                    // TABLE / ENDTAB 以及其他符号表记录
                    self.skip_entity_body()?;
                }
            }
        }
        Ok(())
    }

    fn parse_layer_record(&mut self) -> Result<Layer, DxfError> {
        let mut name: Option<String> = None;
        let mut color: Option<i16> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    2 => {
                        if name.replace(value.trim().to_string()).is_some() {
                            return Err(DxfError::invalid("LAYER 遇到重复的名称（组码 2）"));
                        }
                    }
                    62 => color = Some(parse_i16(&value, "LAYER 颜色（组码 62）")?),
                    _ => {}
                },
                None => return Err(DxfError::invalid("LAYER 记录未正确结束")),
            }
        }

        let name = name.ok_or_else(|| DxfError::invalid("LAYER 缺少名称（组码 2）"))?;
        // 负色号表示图层关闭
        let raw = color.unwrap_or(topoband_core::document::DEFAULT_LAYER_COLOR);
        Ok(Layer {
            name,
            color: raw.saturating_abs(),
            is_visible: raw >= 0,
        })
    }

    fn parse_entities(&mut self, document: &mut Document) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("ENTITIES 段提前结束")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "ENTITIES 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }

            match value.as_str() {
                "ENDSEC" => break,
                "LWPOLYLINE" => {
                    let parsed = self.parse_lwpolyline()?;
                    document.add_entity(parsed);
                }
                "CIRCLE" => {
                    let parsed = self.parse_circle()?;
                    document.add_entity(parsed);
                }
                other => {
                    debug!(kind = other, "跳过不支持的实体类型");
                    self.skip_entity_body()?;
                }
            }
        }
        Ok(())
    }

    fn parse_circle(&mut self) -> Result<Entity, DxfError> {
        let mut layer = None;
        let mut center_x = None;
        let mut center_y = None;
        let mut radius = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut center_x, &value, "CIRCLE 圆心 X（组码 10）")?,
                    20 => assign_coord(&mut center_y, &value, "CIRCLE 圆心 Y（组码 20）")?,
                    40 => assign_coord(&mut radius, &value, "CIRCLE 半径（组码 40）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("CIRCLE 未正确结束")),
            }
        }

        let layer = layer.unwrap_or_else(|| "0".to_string());
        let cx = center_x.ok_or_else(|| DxfError::invalid("CIRCLE 缺少圆心 X（组码 10）"))?;
        let cy = center_y.ok_or_else(|| DxfError::invalid("CIRCLE 缺少圆心 Y（组码 20）"))?;
        let radius = radius.ok_or_else(|| DxfError::invalid("CIRCLE 缺少半径（组码 40）"))?;

        Ok(Entity::Circle(Circle {
            center: Point2::new(cx, cy),
            radius,
            layer,
        }))
    }

    fn parse_lwpolyline(&mut self) -> Result<Entity, DxfError> {
        let mut layer = None;
        let mut is_closed = false;
        let mut expected: Option<usize> = None;
        let mut vertices: Vec<Point2> = Vec::new();
        let mut pending_x: Option<f64> = None;
        let mut pending_y: Option<f64> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    70 => {
                        let flag = parse_i32(&value, "LWPOLYLINE 标志")?;
                        is_closed = flag & 0x01 == 0x01;
                    }
                    90 => {
                        let count = parse_i32(&value, "LWPOLYLINE 顶点数（组码 90）")?;
                        expected = usize::try_from(count).ok();
                    }
                    10 => {
                        let x = parse_f64(&value, "LWPOLYLINE 顶点 X")?;
                        if let Some(y) = pending_y.take() {
                            vertices.push(Point2::new(x, y));
                        } else if pending_x.replace(x).is_some() {
                            return Err(DxfError::invalid(
                                "LWPOLYLINE 顶点缺少对应的 Y（组码 20）",
                            ));
                        }
                    }
                    20 => {
                        let y = parse_f64(&value, "LWPOLYLINE 顶点 Y")?;
                        if let Some(x) = pending_x.take() {
                            vertices.push(Point2::new(x, y));
                        } else if pending_y.replace(y).is_some() {
                            return Err(DxfError::invalid(
                                "LWPOLYLINE 顶点缺少对应的 X（组码 10）",
                            ));
                        }
                    }
                    42 => {
                        let bulge = parse_f64(&value, "LWPOLYLINE 顶点 bulge")?;
                        if bulge.abs() > f64::EPSILON {
                            return Err(DxfError::Unsupported {
                                feature: "LWPOLYLINE 圆弧段（bulge ≠ 0）".to_string(),
                            });
                        }
                    }
                    _ => {}
                },
                None => return Err(DxfError::invalid("LWPOLYLINE 未正确结束")),
            }
        }

        if pending_x.is_some() || pending_y.is_some() {
            return Err(DxfError::invalid(
                "LWPOLYLINE 顶点坐标成对出现（组码 10/20），检测到不完整的顶点",
            ));
        }

        if vertices.is_empty() {
            return Err(DxfError::invalid("LWPOLYLINE 未解析到任何顶点"));
        }

        if let Some(count) = expected {
            if count != vertices.len() {
                return Err(DxfError::invalid(format!(
                    "LWPOLYLINE 声明 {count} 个顶点，实际解析到 {} 个",
                    vertices.len()
                )));
            }
        }

        let layer = layer.unwrap_or_else(|| "0".to_string());
        Ok(Entity::Polyline(Polyline {
            vertices,
            is_closed,
            layer,
        }))
    }

    fn skip_entity_body(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        Ok(())
    }
}

struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    buffer: Option<(i32, String)>,
    line_number: usize,
}

impl<'a> DxfReader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines(),
            buffer: None,
            line_number: 0,
        }
    }

    fn next_pair(&mut self) -> Result<Option<(i32, String)>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }

        let code_line = loop {
            match self.lines.next() {
                Some(line) => {
                    self.line_number += 1;
                    // 容忍文件末尾的空行
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Ok(None),
            }
        };

        let value_line = match self.lines.next() {
            Some(line) => {
                self.line_number += 1;
                line
            }
            None => {
                return Err(DxfError::invalid(format!(
                    "文件在第 {} 行结束，缺少与组码对应的值行",
                    self.line_number
                )));
            }
        };

        let code = code_line.trim().parse::<i32>().map_err(|_| {
            DxfError::invalid(format!(
                "第 {} 行的组码 \"{}\" 无法解析为整数",
                self.line_number - 1,
                code_line.trim()
            ))
        })?;
        let value = value_line.trim_end_matches('\r').to_string();
        Ok(Some((code, value)))
    }

    fn put_back(&mut self, pair: (i32, String)) {
        debug_assert!(self.buffer.is_none(), "尝试多次回退 DXF pair");
        self.buffer = Some(pair);
    }
}

/// 句柄从 0x20 开始分配，低位保留给 R2000 骨架中的符号表、块与字典。
const FIRST_HANDLE: u64 = 0x20;

const VPORT_TABLE_HANDLE: u64 = 0x1;
const LAYER_TABLE_HANDLE: u64 = 0x2;
const LTYPE_TABLE_HANDLE: u64 = 0x3;
const STYLE_TABLE_HANDLE: u64 = 0x4;
const VIEW_TABLE_HANDLE: u64 = 0x5;
const UCS_TABLE_HANDLE: u64 = 0x6;
const APPID_TABLE_HANDLE: u64 = 0x7;
const DIMSTYLE_TABLE_HANDLE: u64 = 0x8;
const BLOCK_RECORD_TABLE_HANDLE: u64 = 0x9;

const LINETYPES: [(u64, &str, &str); 3] = [
    (0x10, "ByBlock", ""),
    (0x11, "ByLayer", ""),
    (0x12, "Continuous", "Solid line"),
];
const STANDARD_STYLE_HANDLE: u64 = 0x13;
const ACAD_APPID_HANDLE: u64 = 0x14;

const MODEL_SPACE_RECORD: u64 = 0x15;
const PAPER_SPACE_RECORD: u64 = 0x16;
const MODEL_SPACE_BLOCK: (u64, u64) = (0x17, 0x18);
const PAPER_SPACE_BLOCK: (u64, u64) = (0x19, 0x1A);

const ROOT_DICTIONARY_HANDLE: u64 = 0x1B;
const GROUP_DICTIONARY_HANDLE: u64 = 0x1C;

/// 写出 R2000（AC1015）最小骨架：全部必需符号表、模型/图纸空间块与根字典。
struct DxfWriter {
    out: String,
    next_handle: u64,
}

impl DxfWriter {
    fn new() -> Self {
        Self {
            out: String::new(),
            next_handle: FIRST_HANDLE,
        }
    }

    fn write(mut self, document: &Document) -> String {
        let layers: Vec<&Layer> = document.layers().collect();
        let entities: Vec<&Entity> = document.entities().collect();
        let handle_seed = FIRST_HANDLE + (layers.len() + entities.len()) as u64;

        self.section("HEADER");
        self.pair(9, "$ACADVER");
        self.pair(1, "AC1015");
        self.pair(9, "$HANDSEED");
        self.pair(5, &format!("{handle_seed:X}"));
        self.pair(0, "ENDSEC");

        self.section("TABLES");
        self.table("VPORT", VPORT_TABLE_HANDLE, 0);
        self.pair(0, "ENDTAB");

        self.table("LTYPE", LTYPE_TABLE_HANDLE, LINETYPES.len());
        for (handle, name, description) in LINETYPES {
            self.linetype(handle, name, description);
        }
        self.pair(0, "ENDTAB");

        self.table("LAYER", LAYER_TABLE_HANDLE, layers.len());
        for layer in layers {
            self.layer(layer);
        }
        self.pair(0, "ENDTAB");

        self.table("STYLE", STYLE_TABLE_HANDLE, 1);
        self.text_style();
        self.pair(0, "ENDTAB");

        self.table("VIEW", VIEW_TABLE_HANDLE, 0);
        self.pair(0, "ENDTAB");
        self.table("UCS", UCS_TABLE_HANDLE, 0);
        self.pair(0, "ENDTAB");

        self.table("APPID", APPID_TABLE_HANDLE, 1);
        self.record("APPID", ACAD_APPID_HANDLE, APPID_TABLE_HANDLE, "AcDbRegAppTableRecord");
        self.pair(2, "ACAD");
        self.pair(70, "0");
        self.pair(0, "ENDTAB");

        self.table("DIMSTYLE", DIMSTYLE_TABLE_HANDLE, 0);
        self.pair(100, "AcDbDimStyleTable");
        self.pair(0, "ENDTAB");

        self.table("BLOCK_RECORD", BLOCK_RECORD_TABLE_HANDLE, 2);
        for (handle, name) in [
            (MODEL_SPACE_RECORD, "*Model_Space"),
            (PAPER_SPACE_RECORD, "*Paper_Space"),
        ] {
            self.record(
                "BLOCK_RECORD",
                handle,
                BLOCK_RECORD_TABLE_HANDLE,
                "AcDbBlockTableRecord",
            );
            self.pair(2, name);
        }
        self.pair(0, "ENDTAB");
        self.pair(0, "ENDSEC");

        self.section("BLOCKS");
        self.block("*Model_Space", MODEL_SPACE_BLOCK, MODEL_SPACE_RECORD, false);
        self.block("*Paper_Space", PAPER_SPACE_BLOCK, PAPER_SPACE_RECORD, true);
        self.pair(0, "ENDSEC");

        self.section("ENTITIES");
        for entity in entities {
            match entity {
                Entity::Polyline(polyline) => self.lwpolyline(polyline),
                Entity::Circle(circle) => self.circle(circle),
            }
        }
        self.pair(0, "ENDSEC");

        self.section("OBJECTS");
        self.pair(0, "DICTIONARY");
        self.fixed_handle(ROOT_DICTIONARY_HANDLE);
        self.pair(330, "0");
        self.pair(100, "AcDbDictionary");
        self.pair(281, "1");
        self.pair(3, "ACAD_GROUP");
        self.pair(350, &format!("{GROUP_DICTIONARY_HANDLE:X}"));
        self.pair(0, "DICTIONARY");
        self.fixed_handle(GROUP_DICTIONARY_HANDLE);
        self.owner(ROOT_DICTIONARY_HANDLE);
        self.pair(100, "AcDbDictionary");
        self.pair(281, "1");
        self.pair(0, "ENDSEC");

        self.pair(0, "EOF");
        self.out
    }

    fn section(&mut self, name: &str) {
        self.pair(0, "SECTION");
        self.pair(2, name);
    }

    fn table(&mut self, name: &str, handle: u64, count: usize) {
        self.pair(0, "TABLE");
        self.pair(2, name);
        self.fixed_handle(handle);
        self.pair(330, "0");
        self.pair(100, "AcDbSymbolTable");
        self.pair(70, &count.to_string());
    }

    fn record(&mut self, kind: &str, handle: u64, table: u64, subclass: &str) {
        self.pair(0, kind);
        self.fixed_handle(handle);
        self.owner(table);
        self.pair(100, "AcDbSymbolTableRecord");
        self.pair(100, subclass);
    }

    fn linetype(&mut self, handle: u64, name: &str, description: &str) {
        self.record("LTYPE", handle, LTYPE_TABLE_HANDLE, "AcDbLinetypeTableRecord");
        self.pair(2, name);
        self.pair(70, "0");
        self.pair(3, description);
        self.pair(72, "65");
        self.pair(73, "0");
        self.real(40, 0.0);
    }

    fn text_style(&mut self) {
        self.record(
            "STYLE",
            STANDARD_STYLE_HANDLE,
            STYLE_TABLE_HANDLE,
            "AcDbTextStyleTableRecord",
        );
        self.pair(2, "Standard");
        self.pair(70, "0");
        self.real(40, 0.0);
        self.real(41, 1.0);
        self.real(50, 0.0);
        self.pair(71, "0");
        self.real(42, 2.5);
        self.pair(3, "txt");
        self.pair(4, "");
    }

    fn block(&mut self, name: &str, (begin, end): (u64, u64), record: u64, paper_space: bool) {
        self.pair(0, "BLOCK");
        self.fixed_handle(begin);
        self.owner(record);
        self.pair(100, "AcDbEntity");
        if paper_space {
            self.pair(67, "1");
        }
        self.pair(8, "0");
        self.pair(100, "AcDbBlockBegin");
        self.pair(2, name);
        self.pair(70, "0");
        self.real(10, 0.0);
        self.real(20, 0.0);
        self.real(30, 0.0);
        self.pair(3, name);
        self.pair(1, "");

        self.pair(0, "ENDBLK");
        self.fixed_handle(end);
        self.owner(record);
        self.pair(100, "AcDbEntity");
        if paper_space {
            self.pair(67, "1");
        }
        self.pair(8, "0");
        self.pair(100, "AcDbBlockEnd");
    }

    fn layer(&mut self, layer: &Layer) {
        // 负色号表示图层关闭
        let color = if layer.is_visible {
            layer.color.saturating_abs()
        } else {
            -layer.color.saturating_abs()
        };
        self.pair(0, "LAYER");
        self.handle();
        self.owner(LAYER_TABLE_HANDLE);
        self.pair(100, "AcDbSymbolTableRecord");
        self.pair(100, "AcDbLayerTableRecord");
        self.pair(2, &layer.name);
        self.pair(70, "0");
        self.pair(62, &color.to_string());
        self.pair(6, "Continuous");
    }

    fn lwpolyline(&mut self, polyline: &Polyline) {
        self.pair(0, "LWPOLYLINE");
        self.handle();
        self.owner(MODEL_SPACE_RECORD);
        self.pair(100, "AcDbEntity");
        self.pair(8, &polyline.layer);
        self.pair(100, "AcDbPolyline");
        self.pair(90, &polyline.vertices.len().to_string());
        self.pair(70, if polyline.is_closed { "1" } else { "0" });
        for vertex in &polyline.vertices {
            self.real(10, vertex.x());
            self.real(20, vertex.y());
        }
    }

    fn circle(&mut self, circle: &Circle) {
        self.pair(0, "CIRCLE");
        self.handle();
        self.owner(MODEL_SPACE_RECORD);
        self.pair(100, "AcDbEntity");
        self.pair(8, &circle.layer);
        self.pair(100, "AcDbCircle");
        self.real(10, circle.center.x());
        self.real(20, circle.center.y());
        self.real(30, 0.0);
        self.real(40, circle.radius);
    }

    fn handle(&mut self) {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.fixed_handle(handle);
    }

    fn fixed_handle(&mut self, handle: u64) {
        self.pair(5, &format!("{handle:X}"));
    }

    fn owner(&mut self, handle: u64) {
        self.pair(330, &format!("{handle:X}"));
    }

    fn real(&mut self, code: i32, value: f64) {
        // `Display` 输出最短且可精确回读的十进制表示，且不使用指数记法
        self.pair(code, &format!("{value}"));
    }

    fn pair(&mut self, code: i32, value: &str) {
        let _ = writeln!(self.out, "{code:>3}\n{value}");
    }
}

fn assign_coord(slot: &mut Option<f64>, raw: &str, context: &str) -> Result<(), DxfError> {
    if slot.is_some() {
        return Err(DxfError::invalid(format!("{context} 出现重复值")));
    }
    *slot = Some(parse_f64(raw, context)?);
    Ok(())
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, DxfError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i32(raw: &str, context: &str) -> Result<i32, DxfError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i16(raw: &str, context: &str) -> Result<i16, DxfError> {
    let value = parse_i32(raw, context)?;
    i16::try_from(value)
        .map_err(|_| DxfError::invalid(format!("{context} 超出 i16 范围（值：{value}）")))
}

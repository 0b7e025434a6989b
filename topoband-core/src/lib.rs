pub mod geometry {
    use glam::DVec2;

    /// 二维点，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn vector_to(self, other: Point2) -> Vector2 {
            Vector2(other.0 - self.0)
        }

        #[inline]
        pub fn distance(self, other: Point2) -> f64 {
            self.0.distance(other.0)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    /// 二维向量。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        /// 二维叉积（z 分量），正值表示 `other` 位于逆时针方向。
        #[inline]
        pub fn cross(self, other: Vector2) -> f64 {
            self.0.perp_dot(other.0)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    /// 轴对齐边界框，用于估算文档/点集范围。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        pub fn from_points<I>(points: I) -> Self
        where
            I: IntoIterator<Item = Point2>,
        {
            let mut bounds = Self::empty();
            for point in points {
                bounds.include_point(point);
            }
            bounds
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        #[inline]
        pub fn width(&self) -> f64 {
            self.max.x() - self.min.x()
        }

        #[inline]
        pub fn height(&self) -> f64 {
            self.max.y() - self.min.y()
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }
    }

    /// 鞋带公式计算的有向面积，逆时针为正。首尾是否重复不影响结果。
    pub fn ring_area(ring: &[Point2]) -> f64 {
        if ring.len() < 3 {
            return 0.0;
        }
        let mut twice = 0.0;
        for (index, current) in ring.iter().enumerate() {
            let next = ring[(index + 1) % ring.len()];
            twice += current.x() * next.y() - next.x() * current.y();
        }
        twice * 0.5
    }

    /// 判定点序列首尾重合（闭合环）。
    #[inline]
    pub fn is_closed(ring: &[Point2]) -> bool {
        match (ring.first(), ring.last()) {
            (Some(first), Some(last)) => ring.len() > 1 && first == last,
            _ => false,
        }
    }

    /// 若首尾不重合，则追加首点使之闭合。
    pub fn close_ring(mut ring: Vec<Point2>) -> Vec<Point2> {
        if let Some(&first) = ring.first() {
            if !is_closed(&ring) {
                ring.push(first);
            }
        }
        ring
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn ring_area_is_signed_by_orientation() {
            let ccw = [
                Point2::new(0.0, 0.0),
                Point2::new(4.0, 0.0),
                Point2::new(4.0, 3.0),
                Point2::new(0.0, 3.0),
            ];
            assert!((ring_area(&ccw) - 12.0).abs() < 1e-9);

            let mut cw = ccw.to_vec();
            cw.reverse();
            assert!((ring_area(&cw) + 12.0).abs() < 1e-9);

            let closed = close_ring(ccw.to_vec());
            assert!(is_closed(&closed));
            assert_eq!(closed.len(), 5);
            assert!((ring_area(&closed) - 12.0).abs() < 1e-9);
        }

        #[test]
        fn bounds_from_points() {
            let bounds = Bounds2D::from_points([
                Point2::new(1.0, -2.0),
                Point2::new(-3.0, 5.0),
                Point2::new(2.0, 0.0),
            ]);
            assert!(!bounds.is_empty());
            assert!((bounds.width() - 5.0).abs() < 1e-9);
            assert!((bounds.height() - 7.0).abs() < 1e-9);
            assert_eq!(bounds.min(), Point2::new(-3.0, -2.0));
            assert_eq!(bounds.max(), Point2::new(2.0, 5.0));
            assert!(Bounds2D::from_points(std::iter::empty()).is_empty());
        }
    }
}

pub mod document {
    use crate::geometry::{Bounds2D, Point2};

    /// 未显式指定颜色时使用的 ACI 色号（7，黑/白）。
    pub const DEFAULT_LAYER_COLOR: i16 = 7;

    /// 图层，颜色采用 DXF ACI 整数色号。
    #[derive(Debug, Clone, PartialEq)]
    pub struct Layer {
        pub name: String,
        pub color: i16,
        pub is_visible: bool,
    }

    impl Layer {
        #[inline]
        pub fn new(name: impl Into<String>) -> Self {
            Self::with_color(name, DEFAULT_LAYER_COLOR)
        }

        #[inline]
        pub fn with_color(name: impl Into<String>, color: i16) -> Self {
            Self {
                name: name.into(),
                color,
                is_visible: true,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum Entity {
        Polyline(Polyline),
        Circle(Circle),
    }

    impl Entity {
        #[inline]
        pub fn layer_name(&self) -> &str {
            match self {
                Entity::Polyline(polyline) => &polyline.layer,
                Entity::Circle(circle) => &circle.layer,
            }
        }

        /// 返回换到指定图层的副本，原实体保持不变。
        pub fn with_layer(&self, layer: impl Into<String>) -> Entity {
            let layer = layer.into();
            match self {
                Entity::Polyline(polyline) => Entity::Polyline(Polyline {
                    vertices: polyline.vertices.clone(),
                    is_closed: polyline.is_closed,
                    layer,
                }),
                Entity::Circle(circle) => Entity::Circle(Circle {
                    center: circle.center,
                    radius: circle.radius,
                    layer,
                }),
            }
        }

        /// 计算实体的 2D 轴对齐范围。
        pub fn bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            match self {
                Entity::Polyline(polyline) => {
                    for vertex in &polyline.vertices {
                        bounds.include_point(*vertex);
                    }
                }
                Entity::Circle(circle) => {
                    let radius = circle.radius.abs();
                    let center = circle.center;
                    bounds.include_point(Point2::new(center.x() - radius, center.y() - radius));
                    bounds.include_point(Point2::new(center.x() + radius, center.y() + radius));
                }
            }
            if bounds.is_empty() { None } else { Some(bounds) }
        }
    }

    /// 轻量多段线。`is_closed` 对应 DXF 闭合标志，顶点序列本身也可以显式首尾重合。
    #[derive(Debug, Clone, PartialEq)]
    pub struct Polyline {
        pub vertices: Vec<Point2>,
        pub is_closed: bool,
        pub layer: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct Circle {
        pub center: Point2,
        pub radius: f64,
        pub layer: String,
    }

    /// 分层矢量图纸。图层按声明顺序保存，保证写出结果稳定。
    #[derive(Debug, Clone, Default)]
    pub struct Document {
        layers: Vec<Layer>,
        entities: Vec<Entity>,
    }

    impl Document {
        pub fn new() -> Self {
            let mut doc = Self::default();
            doc.ensure_layer("0");
            doc
        }

        /// 若图层不存在则以默认颜色创建。
        pub fn ensure_layer(&mut self, name: impl AsRef<str>) {
            let key = name.as_ref();
            if self.layer(key).is_none() {
                self.layers.push(Layer::new(key));
            }
        }

        /// 声明图层并设置颜色；已存在时只更新颜色与可见性。
        pub fn add_layer(&mut self, layer: Layer) {
            match self.layers.iter_mut().find(|existing| existing.name == layer.name) {
                Some(existing) => {
                    existing.color = layer.color;
                    existing.is_visible = layer.is_visible;
                }
                None => self.layers.push(layer),
            }
        }

        pub fn add_polyline<I>(
            &mut self,
            points: I,
            is_closed: bool,
            layer: impl Into<String>,
        ) where
            I: IntoIterator<Item = Point2>,
        {
            let layer = layer.into();
            self.add_entity(Entity::Polyline(Polyline {
                vertices: points.into_iter().collect(),
                is_closed,
                layer,
            }))
        }

        pub fn add_circle(
            &mut self,
            center: Point2,
            radius: f64,
            layer: impl Into<String>,
        ) {
            let layer = layer.into();
            self.add_entity(Entity::Circle(Circle {
                center,
                radius,
                layer,
            }))
        }

        /// 追加现有实体，自动补齐其所在图层。
        pub fn add_entity(&mut self, entity: Entity) {
            self.ensure_layer(entity.layer_name());
            self.entities.push(entity);
        }

        #[inline]
        pub fn layers(&self) -> impl Iterator<Item = &Layer> {
            self.layers.iter()
        }

        #[inline]
        pub fn layer(&self, name: &str) -> Option<&Layer> {
            self.layers.iter().find(|layer| layer.name == name)
        }

        #[inline]
        pub fn entities(&self) -> impl Iterator<Item = &Entity> {
            self.entities.iter()
        }

        /// 按图层名筛选实体。
        pub fn entities_on_layer<'a>(&'a self, layer: &'a str) -> impl Iterator<Item = &'a Entity> {
            self.entities
                .iter()
                .filter(move |entity| entity.layer_name() == layer)
        }

        pub fn bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            let mut has = false;
            for entity in &self.entities {
                if let Some(entity_bounds) = entity.bounds() {
                    bounds.include_bounds(&entity_bounds);
                    has = true;
                }
            }
            if has { Some(bounds) } else { None }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn document_stores_entities() {
            let mut doc = Document::new();
            doc.add_polyline(
                [
                    Point2::new(0.0, 0.0),
                    Point2::new(2.0, 2.0),
                    Point2::new(4.0, 0.0),
                ],
                true,
                "SHAPE",
            );
            doc.add_circle(Point2::new(5.0, 5.0), 2.0, "ANNOT");

            let layers: Vec<_> = doc.layers().map(|l| l.name.as_str()).collect();
            assert_eq!(layers, ["0", "SHAPE", "ANNOT"]);
            assert_eq!(doc.entities().count(), 2);
            assert_eq!(doc.entities_on_layer("ANNOT").count(), 1);

            match doc.entities().nth(1) {
                Some(Entity::Circle(circle)) => {
                    assert_eq!(circle.layer, "ANNOT");
                    assert!((circle.radius - 2.0).abs() < f64::EPSILON);
                }
                other => panic!("unexpected entity lookup result: {other:?}"),
            }

            let bounds = doc.bounds().expect("document bounds");
            assert!((bounds.max().x() - 7.0).abs() < 1e-9);
            assert!((bounds.max().y() - 7.0).abs() < 1e-9);
        }

        #[test]
        fn add_layer_updates_color_in_place() {
            let mut doc = Document::new();
            doc.ensure_layer("Crosses");
            assert_eq!(doc.layer("Crosses").map(|l| l.color), Some(DEFAULT_LAYER_COLOR));
            doc.add_layer(Layer::with_color("Crosses", 1));
            assert_eq!(doc.layer("Crosses").map(|l| l.color), Some(1));
            assert_eq!(doc.layers().count(), 2);
        }

        #[test]
        fn with_layer_leaves_source_untouched() {
            let source = Entity::Circle(Circle {
                center: Point2::new(1.0, 2.0),
                radius: 0.5,
                layer: "Crosses".to_string(),
            });
            let moved = source.with_layer("Crosses_copy");
            assert_eq!(source.layer_name(), "Crosses");
            assert_eq!(moved.layer_name(), "Crosses_copy");
            match moved {
                Entity::Circle(circle) => assert_eq!(circle.center, Point2::new(1.0, 2.0)),
                other => panic!("expected circle, got {other:?}"),
            }
        }
    }
}

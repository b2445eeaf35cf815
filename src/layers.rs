// ============================================================================
// LAYER MODEL: image/group tree, transforms and recursive tree operations
// ============================================================================
//
// Layers are addressed by id everywhere outside this module; nothing holds a
// reference into the tree across an edit.  Rasters are mutated in place and
// the editor bumps its revision counter after every change.

use std::sync::Arc;

use egui::Pos2;
use image::RgbaImage;
use uuid::Uuid;

use crate::canvas::BlendMode;
use crate::geometry::rotate_point;

pub type LayerId = Uuid;

/// Deepest group nesting accepted when loading a stored tree.
pub const MAX_TREE_DEPTH: usize = 64;

/// Pixel payload of an image layer.
///
/// `Source` is a read-only decoded image (imports, loaded projects).  The
/// first edit turns it into an owned `Surface`; there is no way back.
#[derive(Clone, Debug)]
pub enum Raster {
    Source(Arc<RgbaImage>),
    Surface(RgbaImage),
}

impl Raster {
    pub fn image(&self) -> &RgbaImage {
        match self {
            Raster::Source(img) => img,
            Raster::Surface(img) => img,
        }
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, Raster::Surface(_))
    }

    /// Materialize an editable surface (copying a shared source once).
    pub fn make_editable(&mut self) -> &mut RgbaImage {
        if let Raster::Source(src) = self {
            let owned = src.as_ref().clone();
            *self = Raster::Surface(owned);
        }
        match self {
            Raster::Surface(img) => img,
            Raster::Source(_) => unreachable!("raster was just materialized"),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image().dimensions()
    }
}

#[derive(Clone, Debug)]
pub enum LayerKind {
    Image { raster: Option<Raster> },
    Group { children: Vec<Layer>, collapsed: bool },
}

/// Placement snapshot used by drags and gestures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerTransform {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
}

impl LayerTransform {
    pub fn center(&self) -> Pos2 {
        Pos2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Clone, Debug)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    /// 0..=100
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Radians, about the layer's own center.
    pub rotation: f32,
    pub kind: LayerKind,
}

impl Layer {
    pub fn new_image(name: impl Into<String>, raster: Option<Raster>, x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            visible: true,
            locked: false,
            opacity: 100.0,
            blend_mode: BlendMode::Normal,
            x,
            y,
            width,
            height,
            rotation: 0.0,
            kind: LayerKind::Image { raster },
        }
    }

    pub fn new_group(name: impl Into<String>, children: Vec<Layer>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            visible: true,
            locked: false,
            opacity: 100.0,
            blend_mode: BlendMode::Normal,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            rotation: 0.0,
            kind: LayerKind::Group { children, collapsed: false },
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, LayerKind::Group { .. })
    }

    pub fn raster(&self) -> Option<&Raster> {
        match &self.kind {
            LayerKind::Image { raster } => raster.as_ref(),
            LayerKind::Group { .. } => None,
        }
    }

    pub fn raster_mut(&mut self) -> Option<&mut Raster> {
        match &mut self.kind {
            LayerKind::Image { raster } => raster.as_mut(),
            LayerKind::Group { .. } => None,
        }
    }

    pub fn children(&self) -> &[Layer] {
        match &self.kind {
            LayerKind::Group { children, .. } => children,
            LayerKind::Image { .. } => &[],
        }
    }

    pub fn transform(&self) -> LayerTransform {
        LayerTransform {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            rotation: self.rotation,
        }
    }

    pub fn set_transform(&mut self, t: LayerTransform) {
        self.x = t.x;
        self.y = t.y;
        self.width = t.width;
        self.height = t.height;
        self.rotation = t.rotation;
    }

    pub fn center(&self) -> Pos2 {
        self.transform().center()
    }

    /// Display-box corners in scene space, rotated: TL, TR, BR, BL.
    pub fn corners(&self) -> [Pos2; 4] {
        let c = self.center();
        [
            Pos2::new(self.x, self.y),
            Pos2::new(self.x + self.width, self.y),
            Pos2::new(self.x + self.width, self.y + self.height),
            Pos2::new(self.x, self.y + self.height),
        ]
        .map(|p| rotate_point(p, c, self.rotation))
    }

    /// Does the rotated display box contain the scene point?
    pub fn contains_point(&self, p: Pos2) -> bool {
        let local = rotate_point(p, self.center(), -self.rotation);
        local.x >= self.x
            && local.x <= self.x + self.width
            && local.y >= self.y
            && local.y <= self.y + self.height
    }

    /// True when `id` is this layer or anywhere below it.
    pub fn contains_id(&self, id: LayerId) -> bool {
        self.id == id || self.children().iter().any(|c| c.contains_id(id))
    }
}

/// Partial field update for [`update_layer`].  `None` leaves a field alone.
#[derive(Clone, Debug, Default)]
pub struct LayerPatch {
    pub name: Option<String>,
    pub visible: Option<bool>,
    pub locked: Option<bool>,
    pub opacity: Option<f32>,
    pub blend_mode: Option<BlendMode>,
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub rotation: Option<f32>,
    pub collapsed: Option<bool>,
}

impl LayerPatch {
    pub fn opacity(value: f32) -> Self {
        Self { opacity: Some(value), ..Default::default() }
    }

    pub fn blend_mode(mode: BlendMode) -> Self {
        Self { blend_mode: Some(mode), ..Default::default() }
    }

    pub fn transform(t: LayerTransform) -> Self {
        Self {
            x: Some(t.x),
            y: Some(t.y),
            width: Some(t.width),
            height: Some(t.height),
            rotation: Some(t.rotation),
            ..Default::default()
        }
    }

    pub fn apply(&self, layer: &mut Layer) {
        if let Some(name) = &self.name {
            layer.name = name.clone();
        }
        if let Some(v) = self.visible {
            layer.visible = v;
        }
        if let Some(v) = self.locked {
            layer.locked = v;
        }
        if let Some(v) = self.opacity {
            layer.opacity = v.clamp(0.0, 100.0);
        }
        if let Some(v) = self.blend_mode {
            layer.blend_mode = v;
        }
        if let Some(v) = self.x {
            layer.x = v;
        }
        if let Some(v) = self.y {
            layer.y = v;
        }
        if let Some(v) = self.width {
            layer.width = v;
        }
        if let Some(v) = self.height {
            layer.height = v;
        }
        if let Some(v) = self.rotation {
            layer.rotation = v;
        }
        if let (Some(v), LayerKind::Group { collapsed, .. }) = (self.collapsed, &mut layer.kind) {
            *collapsed = v;
        }
    }
}

// ============================================================================
// TREE OPERATIONS
// ============================================================================

pub fn find_layer(layers: &[Layer], id: LayerId) -> Option<&Layer> {
    for layer in layers {
        if layer.id == id {
            return Some(layer);
        }
        if let Some(found) = find_layer(layer.children(), id) {
            return Some(found);
        }
    }
    None
}

pub fn find_layer_mut(layers: &mut [Layer], id: LayerId) -> Option<&mut Layer> {
    for layer in layers.iter_mut() {
        if layer.id == id {
            return Some(layer);
        }
        if let LayerKind::Group { children, .. } = &mut layer.kind
            && let Some(found) = find_layer_mut(children, id)
        {
            return Some(found);
        }
    }
    None
}

/// Merge `patch` into the layer with `id`, wherever it sits.  Returns false
/// (and touches nothing) when the id is unknown.
pub fn update_layer(layers: &mut [Layer], id: LayerId, patch: &LayerPatch) -> bool {
    match find_layer_mut(layers, id) {
        Some(layer) => {
            patch.apply(layer);
            true
        }
        None => false,
    }
}

/// Detach the layer with `id` (and its whole subtree) from the tree.
pub fn remove_layer(layers: &mut Vec<Layer>, id: LayerId) -> Option<Layer> {
    if let Some(i) = layers.iter().position(|l| l.id == id) {
        return Some(layers.remove(i));
    }
    for layer in layers.iter_mut() {
        if let LayerKind::Group { children, .. } = &mut layer.kind
            && let Some(removed) = remove_layer(children, id)
        {
            return Some(removed);
        }
    }
    None
}

/// The list that directly holds `id`, plus its index in that list.
pub fn sibling_list_mut(layers: &mut Vec<Layer>, id: LayerId) -> Option<(&mut Vec<Layer>, usize)> {
    if let Some(i) = layers.iter().position(|l| l.id == id) {
        return Some((layers, i));
    }
    for layer in layers.iter_mut() {
        if let LayerKind::Group { children, .. } = &mut layer.kind
            && let Some(found) = sibling_list_mut(children, id)
        {
            return Some(found);
        }
    }
    None
}

/// Total number of nodes (groups and images) in the tree.
pub fn count_layers(layers: &[Layer]) -> usize {
    layers.iter().map(|l| 1 + count_layers(l.children())).sum()
}

pub fn count_images(layers: &[Layer]) -> usize {
    layers
        .iter()
        .map(|l| if l.is_group() { count_images(l.children()) } else { 1 })
        .sum()
}

pub fn tree_depth(layers: &[Layer]) -> usize {
    layers
        .iter()
        .map(|l| 1 + tree_depth(l.children()))
        .max()
        .unwrap_or(0)
}

/// Visible image layers in paint order (bottom first).  Children of hidden
/// groups are skipped along with the group.
pub fn visible_images(layers: &[Layer]) -> Vec<&Layer> {
    fn walk<'a>(layers: &'a [Layer], out: &mut Vec<&'a Layer>) {
        for layer in layers {
            if !layer.visible {
                continue;
            }
            match &layer.kind {
                LayerKind::Group { children, .. } => walk(children, out),
                LayerKind::Image { .. } => out.push(layer),
            }
        }
    }
    let mut out = Vec::new();
    walk(layers, &mut out);
    out
}

/// Topmost visible, unlocked image layer whose box contains `p`.
pub fn hit_test(layers: &[Layer], p: Pos2) -> Option<LayerId> {
    visible_images(layers)
        .into_iter()
        .rev()
        .find(|l| !l.locked && l.contains_point(p))
        .map(|l| l.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> Layer {
        Layer::new_image(name, None, 0.0, 0.0, 100.0, 100.0)
    }

    /// root: [a, g1[ b, g2[ c, d ] ], e]
    fn sample_tree() -> (Vec<Layer>, [LayerId; 7]) {
        let c = image("c");
        let d = image("d");
        let g2 = Layer::new_group("g2", vec![c, d]);
        let b = image("b");
        let g1 = Layer::new_group("g1", vec![b, g2]);
        let a = image("a");
        let e = image("e");
        let ids = [
            a.id,
            g1.id,
            g1.children()[0].id,
            g1.children()[1].id,
            g1.children()[1].children()[0].id,
            g1.children()[1].children()[1].id,
            e.id,
        ];
        (vec![a, g1, e], ids)
    }

    #[test]
    fn nested_update_touches_only_target() {
        let (mut tree, [a, g1, b, g2, c, d, e]) = sample_tree();
        let before = tree.clone();
        assert!(update_layer(&mut tree, c, &LayerPatch::opacity(50.0)));

        assert_eq!(count_layers(&tree), count_layers(&before));
        assert_eq!(find_layer(&tree, c).map(|l| l.opacity), Some(50.0));
        for id in [a, g1, b, g2, d, e] {
            let (now, was) = (find_layer(&tree, id).unwrap(), find_layer(&before, id).unwrap());
            assert_eq!(now.opacity, was.opacity);
            assert_eq!(now.name, was.name);
            assert_eq!(now.transform(), was.transform());
        }
    }

    #[test]
    fn update_unknown_id_is_noop() {
        let (mut tree, _) = sample_tree();
        assert!(!update_layer(&mut tree, Uuid::new_v4(), &LayerPatch::opacity(1.0)));
    }

    #[test]
    fn deleting_group_removes_subtree() {
        let (mut tree, [a, g1, b, g2, c, d, e]) = sample_tree();
        let removed = remove_layer(&mut tree, g1).unwrap();
        assert_eq!(count_layers(std::slice::from_ref(&removed)), 5);
        for id in [g1, b, g2, c, d] {
            assert!(find_layer(&tree, id).is_none());
        }
        assert!(find_layer(&tree, a).is_some());
        assert!(find_layer(&tree, e).is_some());
        assert_eq!(count_layers(&tree), 2);
    }

    #[test]
    fn deleting_nested_leaf_keeps_siblings() {
        let (mut tree, [_, g1, b, g2, c, d, _]) = sample_tree();
        assert!(remove_layer(&mut tree, c).is_some());
        assert!(find_layer(&tree, c).is_none());
        assert!(find_layer(&tree, d).is_some());
        assert_eq!(find_layer(&tree, g2).unwrap().children().len(), 1);
        assert_eq!(find_layer(&tree, g1).unwrap().children().len(), 2);
        assert!(find_layer(&tree, b).is_some());
    }

    #[test]
    fn hidden_groups_hide_children_from_draw_order() {
        let (mut tree, [a, g1, _, _, _, _, e]) = sample_tree();
        assert_eq!(visible_images(&tree).len(), 5);
        update_layer(&mut tree, g1, &LayerPatch { visible: Some(false), ..Default::default() });
        let ids: Vec<_> = visible_images(&tree).iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![a, e]);
    }

    #[test]
    fn hit_test_prefers_topmost_and_skips_locked() {
        let mut low = Layer::new_image("low", None, 0.0, 0.0, 100.0, 100.0);
        let mut high = Layer::new_image("high", None, 50.0, 50.0, 100.0, 100.0);
        let (low_id, high_id) = (low.id, high.id);
        let mut tree = vec![low.clone(), high.clone()];
        assert_eq!(hit_test(&tree, Pos2::new(75.0, 75.0)), Some(high_id));
        assert_eq!(hit_test(&tree, Pos2::new(10.0, 10.0)), Some(low_id));
        assert_eq!(hit_test(&tree, Pos2::new(500.0, 10.0)), None);

        high.locked = true;
        low.visible = false;
        tree = vec![low, high];
        assert_eq!(hit_test(&tree, Pos2::new(75.0, 75.0)), None);
    }

    #[test]
    fn rotated_box_containment() {
        let mut l = Layer::new_image("r", None, 0.0, 40.0, 100.0, 20.0);
        assert!(!l.contains_point(Pos2::new(50.0, 5.0)));
        l.rotation = std::f32::consts::FRAC_PI_2;
        assert!(l.contains_point(Pos2::new(50.0, 5.0)));
        assert!(!l.contains_point(Pos2::new(5.0, 50.0)));
    }

    #[test]
    fn source_materializes_once() {
        let src = Arc::new(RgbaImage::new(4, 4));
        let mut r = Raster::Source(src.clone());
        assert!(!r.is_editable());
        r.make_editable().put_pixel(0, 0, image::Rgba([1, 2, 3, 4]));
        assert!(r.is_editable());
        assert_eq!(src.get_pixel(0, 0), &image::Rgba([0, 0, 0, 0]));
        assert_eq!(r.image().get_pixel(0, 0), &image::Rgba([1, 2, 3, 4]));
    }

    #[test]
    fn sibling_lookup_finds_nested_parent() {
        let (mut tree, [_, _, _, _, c, d, _]) = sample_tree();
        let (list, idx) = sibling_list_mut(&mut tree, d).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(list[0].id, c);
        assert_eq!(tree_depth(&tree), 3);
        assert_eq!(count_images(&tree), 5);
    }
}

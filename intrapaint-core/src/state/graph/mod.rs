//! # Graph
//!
//! The layers of the document form a tree. Leaves are image and text layers, groups form the upper levels
//! and a single root group sits on top. Leaves are not allowed to have children.
//!
//! Layers live in an arena keyed by [`LayerID`]. Each layer stores its parent, each group stores its
//! ordered children, index 0 being the top-most.

use super::transform::Matrix;
use crate::id::LayerID;
use crate::raster;
use crate::util::{clamp_unit, Point, Rect, Size};
use image::RgbaImage;

#[derive(Clone, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
pub struct TextData {
    pub text: String,
    pub font_size: f32,
    /// Straight RGBA.
    pub color: [u8; 4],
    /// Layout box. Glyphs are laid out by the renderer.
    pub size: Size,
}
impl Default for TextData {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_size: 32.0,
            color: [0, 0, 0, 255],
            size: Size::new(256, 64),
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum LayerKind {
    Image(RgbaImage),
    Text(TextData),
    /// Children, top first.
    Group(Vec<LayerID>),
}
impl LayerKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Text(_) => "text",
            Self::Group(_) => "group",
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct LayerNode {
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    // Private, kept in 0..=1 by the setter.
    opacity: f32,
    /// Layer-local to parent space.
    pub transform: Matrix,
    // NOT public, users could break the tree by mutating these!
    parent: Option<LayerID>,
    kind: LayerKind,
}
impl LayerNode {
    fn new(name: String, kind: LayerKind) -> Self {
        Self {
            name,
            visible: true,
            locked: false,
            opacity: 1.0,
            transform: Matrix::IDENTITY,
            parent: None,
            kind,
        }
    }
    #[must_use]
    pub fn new_image(name: impl Into<String>, image: RgbaImage) -> Self {
        Self::new(name.into(), LayerKind::Image(image))
    }
    #[must_use]
    pub fn new_text(name: impl Into<String>, text: TextData) -> Self {
        Self::new(name.into(), LayerKind::Text(text))
    }
    #[must_use]
    pub fn new_group(name: impl Into<String>) -> Self {
        Self::new(name.into(), LayerKind::Group(Vec::new()))
    }
    #[must_use]
    pub fn opacity(&self) -> f32 {
        self.opacity
    }
    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = clamp_unit(opacity);
    }
    #[must_use]
    pub fn parent(&self) -> Option<LayerID> {
        self.parent
    }
    #[must_use]
    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }
    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self.kind, LayerKind::Group(_))
    }
    #[must_use]
    pub fn image(&self) -> Option<&RgbaImage> {
        match &self.kind {
            LayerKind::Image(image) => Some(image),
            _ => None,
        }
    }
    pub fn image_mut(&mut self) -> Option<&mut RgbaImage> {
        match &mut self.kind {
            LayerKind::Image(image) => Some(image),
            _ => None,
        }
    }
    #[must_use]
    pub fn text_data(&self) -> Option<&TextData> {
        match &self.kind {
            LayerKind::Text(text) => Some(text),
            _ => None,
        }
    }
    pub fn text_data_mut(&mut self) -> Option<&mut TextData> {
        match &mut self.kind {
            LayerKind::Text(text) => Some(text),
            _ => None,
        }
    }
    #[must_use]
    pub fn children(&self) -> Option<&[LayerID]> {
        match &self.kind {
            LayerKind::Group(children) => Some(children),
            _ => None,
        }
    }
    fn children_mut(&mut self) -> Option<&mut Vec<LayerID>> {
        match &mut self.kind {
            LayerKind::Group(children) => Some(children),
            _ => None,
        }
    }
    /// Size of the content, in layer pixels. Groups have none of their own.
    #[must_use]
    pub fn content_size(&self) -> Option<Size> {
        match &self.kind {
            LayerKind::Image(image) => Some(raster::size_of(image)),
            LayerKind::Text(text) => Some(text.size),
            LayerKind::Group(_) => None,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetError {
    #[error("ID not found")]
    TargetNotFound,
    #[error("target is not a group")]
    NotAGroup,
    #[error("operation not allowed on the root")]
    Root,
    #[error("ID already present")]
    AlreadyPresent,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReparentError {
    #[error("target not found: {}", .0)]
    TargetError(TargetError),
    #[error("destination not found: {}", .0)]
    DestinationError(TargetError),
    #[error("can't reparent to the layer's own [grand]children")]
    WouldCycle,
}

/// `layer` or one of its ancestors is locked.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{0} is locked")]
pub struct LockedError(pub LayerID);

/// The nth child of a group, where top = 0.
///
/// An index too large will be clamped to the bottom position.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub parent: LayerID,
    pub index: usize,
}
impl Location {
    #[must_use]
    pub fn new(parent: LayerID, index: usize) -> Self {
        Self { parent, index }
    }
}

/// A subtree taken out of (or copied from) the graph, ready to be attached again.
#[derive(Clone, PartialEq, Debug)]
pub struct Detached {
    root: LayerID,
    /// Root first, then descendants in pre-order.
    nodes: Vec<(LayerID, LayerNode)>,
}
impl Detached {
    /// A fresh layer. Groups must be empty.
    #[must_use]
    pub fn single(id: LayerID, mut node: LayerNode) -> Self {
        node.parent = None;
        if let Some(children) = node.children_mut() {
            children.clear();
        }
        Self {
            root: id,
            nodes: vec![(id, node)],
        }
    }
    #[must_use]
    pub fn root(&self) -> LayerID {
        self.root
    }
    #[must_use]
    pub fn root_node(&self) -> &LayerNode {
        // Never empty, constructors always include the root.
        &self.nodes[0].1
    }
    pub fn iter(&self) -> impl Iterator<Item = (LayerID, &LayerNode)> + '_ {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }
}

#[derive(Clone, Debug)]
pub struct LayerGraph {
    nodes: hashbrown::HashMap<LayerID, LayerNode>,
}
impl Default for LayerGraph {
    fn default() -> Self {
        let mut nodes = hashbrown::HashMap::new();
        nodes.insert(LayerID::ROOT, LayerNode::new_group(String::new()));
        Self { nodes }
    }
}
impl LayerGraph {
    /// Number of layers, not counting the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    #[must_use]
    pub fn contains(&self, id: LayerID) -> bool {
        self.nodes.contains_key(&id)
    }
    #[must_use]
    pub fn get(&self, id: LayerID) -> Option<&LayerNode> {
        self.nodes.get(&id)
    }
    pub fn get_mut(&mut self, id: LayerID) -> Option<&mut LayerNode> {
        self.nodes.get_mut(&id)
    }
    #[must_use]
    pub fn root(&self) -> &LayerNode {
        // Root is inserted on construction and can never be detached.
        &self.nodes[&LayerID::ROOT]
    }
    /// Children of a group, top first.
    #[must_use]
    pub fn children(&self, id: LayerID) -> Option<&[LayerID]> {
        self.get(id)?.children()
    }
    /// Parent and index within it. None for the root or unknown layers.
    #[must_use]
    pub fn location_of(&self, id: LayerID) -> Option<(LayerID, usize)> {
        let parent = self.get(id)?.parent?;
        let idx = self
            .children(parent)?
            .iter()
            .position(|child| *child == id)?;
        Some((parent, idx))
    }
    /// Parents, nearest first, ending with the root.
    pub fn ancestors(&self, id: LayerID) -> impl Iterator<Item = LayerID> + '_ {
        std::iter::successors(self.get(id).and_then(LayerNode::parent), |id| {
            self.get(*id).and_then(LayerNode::parent)
        })
    }
    /// Every layer below `id`, pre-order, top first. Does not include `id`.
    #[must_use]
    pub fn descendants(&self, id: LayerID) -> Vec<LayerID> {
        let mut out = Vec::new();
        let mut stack: Vec<LayerID> = self
            .children(id)
            .map(|c| c.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(children) = self.children(next) {
                stack.extend(children.iter().rev().copied());
            }
        }
        out
    }
    /// Every layer, as the layer panel lists them: pre-order, top first. Root excluded.
    pub fn iter_top_down(&self) -> impl Iterator<Item = (LayerID, &LayerNode)> + '_ {
        self.descendants(LayerID::ROOT)
            .into_iter()
            .filter_map(|id| Some((id, self.get(id)?)))
    }
    /// Ancestors (not the layer itself) include a locked one.
    #[must_use]
    pub fn parent_locked(&self, id: LayerID) -> bool {
        self.ancestors(id)
            .any(|ancestor| self.get(ancestor).is_some_and(|a| a.locked))
    }
    /// Fails if the layer or any ancestor is locked.
    pub fn check_unlocked(&self, id: LayerID) -> Result<(), LockedError> {
        match self.get(id) {
            Some(node) if node.locked => Err(LockedError(id)),
            _ if self.parent_locked(id) => Err(LockedError(id)),
            _ => Ok(()),
        }
    }
    /// Visible, and every ancestor visible.
    #[must_use]
    pub fn is_visible(&self, id: LayerID) -> bool {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .all(|layer| self.get(layer).is_some_and(|node| node.visible))
    }
    /// Position among siblings, where the top-most sibling has the highest value.
    #[must_use]
    pub fn z_value(&self, id: LayerID) -> Option<usize> {
        let (parent, idx) = self.location_of(id)?;
        let count = self.children(parent)?.len();
        Some(count - 1 - idx)
    }
    /// Layer-local to document space, accumulated through its ancestors.
    #[must_use]
    pub fn document_transform(&self, id: LayerID) -> Matrix {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .filter_map(|layer| self.get(layer))
            .fold(Matrix::IDENTITY, |acc, node| acc.then(&node.transform))
    }
    /// Parent space to document space. Identity for top-level layers.
    #[must_use]
    pub fn parent_transform(&self, id: LayerID) -> Matrix {
        self.get(id)
            .and_then(LayerNode::parent)
            .map_or(Matrix::IDENTITY, |parent| self.document_transform(parent))
    }
    /// Document-space bounds. Groups cover their children, empty groups have none.
    #[must_use]
    pub fn bounds(&self, id: LayerID) -> Option<Rect> {
        let node = self.get(id)?;
        if let Some(size) = node.content_size() {
            return Some(self.document_transform(id).cover(size));
        }
        self.children(id)?
            .iter()
            .filter_map(|child| self.bounds(*child))
            .reduce(|a, b| a.union(&b))
    }
    /// The top-most visible leaf whose bounds contain `point` and which passes `filter`.
    #[must_use]
    pub fn top_layer_at(
        &self,
        point: Point,
        filter: impl Fn(&LayerNode) -> bool,
    ) -> Option<LayerID> {
        self.iter_top_down()
            .filter(|(_, node)| !node.is_group() && filter(node))
            .find(|(id, node)| self.is_visible(*id) && self.covers(*id, node, point))
            .map(|(id, _)| id)
    }
    /// Whether the content of a leaf lands on `point`.
    fn covers(&self, id: LayerID, node: &LayerNode, point: Point) -> bool {
        let Some(size) = node.content_size() else {
            return false;
        };
        let Some(to_local) = self.document_transform(id).inverse() else {
            return false;
        };
        let [x, y] = to_local.map_point([point.x as f32 + 0.5, point.y as f32 + 0.5]);
        x >= 0.0 && y >= 0.0 && x < size.width as f32 && y < size.height as f32
    }

    /// Convert a location to a parent and (unclamped) child idx.
    /// Ok result implies the parent is present and a group.
    pub fn find_location(&self, location: Location) -> Result<(LayerID, usize), TargetError> {
        let Location { parent, index: idx } = location;
        match self.get(parent) {
            None => Err(TargetError::TargetNotFound),
            Some(node) if !node.is_group() => Err(TargetError::NotAGroup),
            Some(_) => Ok((parent, idx)),
        }
    }
    /// Copy a layer and everything under it.
    #[must_use]
    pub fn snapshot(&self, id: LayerID) -> Option<Detached> {
        if id == LayerID::ROOT {
            return None;
        }
        let mut root = self.get(id)?.clone();
        root.parent = None;
        let mut nodes = vec![(id, root)];
        for descendant in self.descendants(id) {
            nodes.push((descendant, self.get(descendant)?.clone()));
        }
        Some(Detached { root: id, nodes })
    }
    /// Insert a subtree. The index is clamped to the bottom position.
    /// Returns the index actually used.
    pub fn attach(&mut self, subtree: Detached, location: Location) -> Result<usize, TargetError> {
        let (parent, idx) = self.find_location(location)?;
        if subtree.nodes.iter().any(|(id, _)| self.contains(*id)) {
            return Err(TargetError::AlreadyPresent);
        }
        let root = subtree.root;
        let siblings = self
            .get_mut(parent)
            .and_then(LayerNode::children_mut)
            .ok_or(TargetError::NotAGroup)?;
        let idx = idx.min(siblings.len());
        siblings.insert(idx, root);
        for (id, mut node) in subtree.nodes {
            if id == root {
                node.parent = Some(parent);
            }
            self.nodes.insert(id, node);
        }
        Ok(idx)
    }
    /// Take a layer and everything under it out of the graph.
    /// Returns the subtree and where it was.
    pub fn detach(&mut self, id: LayerID) -> Result<(Detached, (LayerID, usize)), TargetError> {
        if id == LayerID::ROOT {
            return Err(TargetError::Root);
        }
        let (parent, idx) = self.location_of(id).ok_or(TargetError::TargetNotFound)?;
        let descendants = self.descendants(id);
        if let Some(siblings) = self.get_mut(parent).and_then(LayerNode::children_mut) {
            siblings.remove(idx);
        }
        let mut nodes = Vec::with_capacity(descendants.len() + 1);
        for layer in std::iter::once(id).chain(descendants) {
            if let Some(mut node) = self.nodes.remove(&layer) {
                if layer == id {
                    node.parent = None;
                }
                nodes.push((layer, node));
            }
        }
        Ok((Detached { root: id, nodes }, (parent, idx)))
    }
    /// Reparent the target onto a new parent.
    /// Children are brought along for the ride!
    ///
    /// When moving within the same parent, `destination`'s index refers to the order *after* the target
    /// was taken out.
    pub fn reparent(&mut self, target: LayerID, destination: Location) -> Result<(), ReparentError> {
        if target == LayerID::ROOT {
            return Err(ReparentError::TargetError(TargetError::Root));
        }
        let (old_parent, old_idx) = self
            .location_of(target)
            .ok_or(ReparentError::TargetError(TargetError::TargetNotFound))?;
        let (destination_id, idx) = self
            .find_location(destination)
            .map_err(ReparentError::DestinationError)?;
        // Are we trying to reparent to one of this layer's own children
        // or itself?
        if std::iter::once(destination_id)
            .chain(self.ancestors(destination_id))
            .any(|ancestor| ancestor == target)
        {
            return Err(ReparentError::WouldCycle);
        }
        if let Some(siblings) = self.get_mut(old_parent).and_then(LayerNode::children_mut) {
            siblings.remove(old_idx);
        }
        // Destination was checked to be a group above.
        if let Some(siblings) = self
            .get_mut(destination_id)
            .and_then(LayerNode::children_mut)
        {
            let idx = idx.min(siblings.len());
            siblings.insert(idx, target);
        }
        if let Some(node) = self.get_mut(target) {
            node.parent = Some(destination_id);
        }
        Ok(())
    }

    /// Composite every visible image layer into a buffer of `size`, bottom up.
    /// Text layers are left to the renderer.
    #[must_use]
    pub fn flatten(&self, size: Size) -> RgbaImage {
        let mut out = raster::transparent(size);
        self.composite_children(&mut out, LayerID::ROOT, &Matrix::IDENTITY);
        out
    }
    fn composite_children(&self, dst: &mut RgbaImage, group: LayerID, parent: &Matrix) {
        let Some(children) = self.children(group) else {
            return;
        };
        for child in children.iter().rev() {
            let Some(node) = self.get(*child) else {
                continue;
            };
            if !node.visible {
                continue;
            }
            let transform = node.transform.then(parent);
            match &node.kind {
                LayerKind::Image(image) => {
                    raster::composite_transformed(dst, image, &transform, node.opacity);
                }
                LayerKind::Text(_) => (),
                LayerKind::Group(_) => {
                    let mut buffer = raster::transparent(raster::size_of(dst));
                    self.composite_children(&mut buffer, *child, &transform);
                    raster::composite_at(dst, &buffer, Point::default(), node.opacity);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::transform::Similarity;
    use crate::id::LayerIDServer;

    fn graph_with(ids: &mut LayerIDServer, layout: &[(&str, bool)]) -> (LayerGraph, Vec<LayerID>) {
        let mut graph = LayerGraph::default();
        let mut out = vec![];
        for (name, group) in layout {
            let id = ids.allocate();
            let node = if *group {
                LayerNode::new_group(*name)
            } else {
                LayerNode::new_image(*name, raster::transparent(Size::new(4, 4)))
            };
            graph
                .attach(Detached::single(id, node), Location::new(LayerID::ROOT, usize::MAX))
                .unwrap();
            out.push(id);
        }
        (graph, out)
    }

    #[test]
    fn attach_clamps_and_orders() {
        let mut ids = LayerIDServer::default();
        let (mut graph, layers) = graph_with(&mut ids, &[("a", false), ("b", false)]);
        assert_eq!(graph.children(LayerID::ROOT).unwrap(), &layers[..]);
        let c = ids.allocate();
        graph
            .attach(
                Detached::single(c, LayerNode::new_image("c", raster::transparent(Size::new(1, 1)))),
                Location::new(LayerID::ROOT, 1),
            )
            .unwrap();
        assert_eq!(
            graph.children(LayerID::ROOT).unwrap(),
            &[layers[0], c, layers[1]]
        );
        assert_eq!(graph.z_value(layers[0]), Some(2));
        assert_eq!(graph.z_value(layers[1]), Some(0));
        // Leaves can't have children.
        assert_eq!(
            graph.attach(
                Detached::single(ids.allocate(), LayerNode::new_group("x")),
                Location::new(c, 0)
            ),
            Err(TargetError::NotAGroup)
        );
    }
    #[test]
    fn detach_and_reattach_subtree() {
        let mut ids = LayerIDServer::default();
        let (mut graph, layers) = graph_with(&mut ids, &[("group", true), ("leaf", false)]);
        graph
            .reparent(layers[1], Location::new(layers[0], 0))
            .unwrap();
        let before = graph.clone();
        let (subtree, (parent, idx)) = graph.detach(layers[0]).unwrap();
        assert_eq!((parent, idx), (LayerID::ROOT, 0));
        assert!(graph.is_empty());
        graph
            .attach(subtree, Location::new(parent, idx))
            .unwrap();
        assert_eq!(graph.nodes, before.nodes);
    }
    #[test]
    fn reparent_rejects_cycles() {
        let mut ids = LayerIDServer::default();
        let (mut graph, layers) = graph_with(&mut ids, &[("outer", true), ("inner", true)]);
        graph
            .reparent(layers[1], Location::new(layers[0], 0))
            .unwrap();
        assert_eq!(
            graph.reparent(layers[0], Location::new(layers[1], 0)),
            Err(ReparentError::WouldCycle)
        );
        assert_eq!(
            graph.reparent(layers[0], Location::new(layers[0], 0)),
            Err(ReparentError::WouldCycle)
        );
        // Unchanged.
        assert_eq!(graph.location_of(layers[1]), Some((layers[0], 0)));
        assert_eq!(graph.ancestors(layers[1]).collect::<Vec<_>>(), vec![layers[0], LayerID::ROOT]);
    }
    #[test]
    fn locks_inherit() {
        let mut ids = LayerIDServer::default();
        let (mut graph, layers) = graph_with(&mut ids, &[("group", true), ("leaf", false)]);
        graph
            .reparent(layers[1], Location::new(layers[0], 0))
            .unwrap();
        graph.get_mut(layers[0]).unwrap().locked = true;
        assert!(graph.parent_locked(layers[1]));
        assert_eq!(graph.check_unlocked(layers[1]), Err(LockedError(layers[1])));
        assert_eq!(graph.check_unlocked(layers[0]), Err(LockedError(layers[0])));
    }
    #[test]
    fn flatten_respects_order_and_visibility() {
        let mut graph = LayerGraph::default();
        let mut ids = LayerIDServer::default();
        let red = raster::filled(Size::new(2, 2), image::Rgba([255, 0, 0, 255]));
        let blue = raster::filled(Size::new(2, 2), image::Rgba([0, 0, 255, 255]));
        let top = ids.allocate();
        let bottom = ids.allocate();
        graph
            .attach(Detached::single(top, LayerNode::new_image("top", red)), Location::new(LayerID::ROOT, 0))
            .unwrap();
        graph
            .attach(Detached::single(bottom, LayerNode::new_image("bottom", blue)), Location::new(LayerID::ROOT, 1))
            .unwrap();
        graph.get_mut(top).unwrap().transform = Matrix::from_translation(1.0, 0.0);
        let flat = graph.flatten(Size::new(3, 2));
        assert_eq!(flat.get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert_eq!(flat.get_pixel(1, 0).0, [255, 0, 0, 255]);
        assert_eq!(flat.get_pixel(2, 0).0, [255, 0, 0, 255]);
        graph.get_mut(top).unwrap().visible = false;
        assert_eq!(graph.flatten(Size::new(3, 2)).get_pixel(1, 0).0, [0, 0, 255, 255]);
        assert_eq!(graph.top_layer_at(Point::new(2, 1), |_| true), None);
        assert_eq!(graph.top_layer_at(Point::new(1, 1), |_| true), Some(bottom));
    }
    #[test]
    fn nested_transforms_compose() {
        let mut ids = LayerIDServer::default();
        let (mut graph, layers) = graph_with(&mut ids, &[("group", true), ("leaf", false)]);
        let (group, leaf) = (layers[0], layers[1]);
        graph.reparent(leaf, Location::new(group, 0)).unwrap();
        graph.get_mut(group).unwrap().transform = Matrix::from_translation(2.0, 0.0);
        graph.get_mut(leaf).unwrap().transform =
            Matrix::from([[2.0, 0.0], [0.0, 2.0], [0.0, 1.0]]);
        assert_eq!(graph.document_transform(leaf).map_point([1.0, 1.0]), [4.0, 3.0]);
        assert_eq!(graph.parent_transform(leaf), Matrix::from_translation(2.0, 0.0));
        assert_eq!(graph.bounds(leaf), Some(Rect::new(2, 1, 8, 8)));
        assert_eq!(graph.bounds(group), graph.bounds(leaf));

        // An eighth turn: the bounding box corners are not covered by the content.
        graph.get_mut(leaf).unwrap().transform = Similarity {
            rotation: std::f32::consts::FRAC_PI_4,
            ..Default::default()
        }
        .into();
        assert_eq!(graph.bounds(leaf), Some(Rect::new(-1, 0, 6, 6)));
        assert_eq!(graph.top_layer_at(Point::new(4, 0), |_| true), None);
        assert_eq!(graph.top_layer_at(Point::new(2, 2), |_| true), Some(leaf));
    }
}

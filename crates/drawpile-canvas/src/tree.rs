//! Layer tree in nested-set encoding
//!
//! The tree is stored as a flat list in depth-first, bottom-to-top order.
//! Each layer carries `left`/`right` numbers such that a node's descendants
//! occupy exactly the open interval `(left, right)`. A `LayerTree` is never
//! modified after it is built: structural changes convert it into an owned
//! node forest, edit that, and flatten it into a new tree.

use drawpile_msg::{BlendMode, LayerId, LayerOrderEntry};
use serde::Serialize;

/// A layer or group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layer {
    /// Layer id
    pub id: LayerId,
    /// Title
    pub title: String,
    /// Opacity 0-255
    pub opacity: u8,
    /// Blend mode
    pub blend: BlendMode,
    /// Attribute bits, see [`drawpile_msg::attr_flags`]
    pub flags: u8,
    /// Whether this is a group
    pub group: bool,
    /// Locally hidden, never part of the replicated state
    pub hidden: bool,
    /// Parent group, or [`LayerId::NONE`] at the root
    pub parent: LayerId,
    /// Number of direct children
    pub children: u16,
    /// Nested-set left value
    pub left: u32,
    /// Nested-set right value
    pub right: u32,
}

impl Layer {
    /// A new layer with default attributes
    #[must_use]
    pub fn new(id: LayerId, title: impl Into<String>, group: bool) -> Self {
        Self {
            id,
            title: title.into(),
            opacity: 255,
            blend: BlendMode::Normal,
            flags: 0,
            group,
            hidden: false,
            parent: LayerId::NONE,
            children: 0,
            left: 0,
            right: 0,
        }
    }

    /// Whether `other` lies inside this layer's interval
    #[must_use]
    pub fn contains(&self, other: &Layer) -> bool {
        self.left < other.left && other.right < self.right
    }

    /// Whether the attributes differ from a freshly created layer
    #[must_use]
    pub fn has_custom_attributes(&self) -> bool {
        self.opacity != 255 || self.blend != BlendMode::Normal || self.flags != 0
    }
}

/// Owned tree node used while restructuring
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) layer: Layer,
    pub(crate) children: Vec<Node>,
}

impl Node {
    pub(crate) fn leaf(layer: Layer) -> Self {
        Self {
            layer,
            children: Vec::new(),
        }
    }

    fn collect_ids(&self, out: &mut Vec<LayerId>) {
        out.push(self.layer.id);
        for child in &self.children {
            child.collect_ids(out);
        }
    }
}

/// Immutable layer tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayerTree {
    layers: Vec<Layer>,
}

impl LayerTree {
    /// An empty tree
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of layers, groups included
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the tree has no layers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layers in depth-first, bottom-to-top order
    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    /// Look up a layer
    #[must_use]
    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    /// Whether a layer exists
    #[must_use]
    pub fn contains(&self, id: LayerId) -> bool {
        self.get(id).is_some()
    }

    /// Direct children of a group, bottom to top
    pub fn children(&self, id: LayerId) -> impl Iterator<Item = &Layer> {
        self.layers.iter().filter(move |l| l.parent == id)
    }

    /// The layer and everything nested inside it
    #[must_use]
    pub fn subtree(&self, id: LayerId) -> Vec<&Layer> {
        match self.get(id) {
            Some(root) => self
                .layers
                .iter()
                .filter(|l| l.id == root.id || root.contains(l))
                .collect(),
            None => Vec::new(),
        }
    }

    /// The sibling directly below a layer
    #[must_use]
    pub fn sibling_below(&self, id: LayerId) -> Option<&Layer> {
        let layer = self.get(id)?;
        self.children(layer.parent)
            .take_while(|l| l.id != id)
            .last()
    }

    /// The layer ordering as a `LayerOrder` entry list
    #[must_use]
    pub fn order_entries(&self) -> Vec<LayerOrderEntry> {
        self.layers
            .iter()
            .map(|l| LayerOrderEntry {
                id: l.id,
                children: l.children,
            })
            .collect()
    }

    /// Check the nested-set invariant
    ///
    /// Every interval is non-empty, children nest strictly inside their
    /// parent and sibling intervals do not overlap.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        for layer in &self.layers {
            if layer.right <= layer.left {
                return false;
            }
            if !layer.parent.is_none() {
                match self.get(layer.parent) {
                    Some(parent) if parent.contains(layer) => {}
                    _ => return false,
                }
            }
            let siblings: Vec<&Layer> = self.children(layer.parent).collect();
            for pair in siblings.windows(2) {
                if pair[0].right >= pair[1].left {
                    return false;
                }
            }
        }
        true
    }

    pub(crate) fn to_forest(&self) -> Vec<Node> {
        fn build(layers: &[Layer], pos: &mut usize, count: usize) -> Vec<Node> {
            let mut nodes = Vec::with_capacity(count);
            for _ in 0..count {
                let Some(layer) = layers.get(*pos) else { break };
                *pos += 1;
                let children = build(layers, pos, usize::from(layer.children));
                nodes.push(Node {
                    layer: layer.clone(),
                    children,
                });
            }
            nodes
        }

        let roots = self.layers.iter().filter(|l| l.parent.is_none()).count();
        let mut pos = 0;
        build(&self.layers, &mut pos, roots)
    }

    pub(crate) fn from_forest(forest: Vec<Node>) -> Self {
        fn flatten(nodes: Vec<Node>, parent: LayerId, counter: &mut u32, out: &mut Vec<Layer>) {
            for node in nodes {
                let index = out.len();
                let mut layer = node.layer;
                layer.parent = parent;
                layer.children = node.children.len() as u16;
                *counter += 1;
                layer.left = *counter;
                let id = layer.id;
                out.push(layer);
                flatten(node.children, id, counter, out);
                *counter += 1;
                out[index].right = *counter;
            }
        }

        let mut layers = Vec::new();
        let mut counter = 0;
        flatten(forest, LayerId::NONE, &mut counter, &mut layers);
        Self { layers }
    }

    /// Copy of the tree with one layer's fields changed
    pub(crate) fn with_layer(&self, id: LayerId, f: impl FnOnce(&mut Layer)) -> Self {
        let mut next = self.clone();
        if let Some(layer) = next.layers.iter_mut().find(|l| l.id == id) {
            f(layer);
        }
        next
    }
}

/// Find the sibling list containing `id` and its index
pub(crate) fn locate_mut(nodes: &mut Vec<Node>, id: LayerId) -> Option<(&mut Vec<Node>, usize)> {
    if let Some(index) = nodes.iter().position(|n| n.layer.id == id) {
        return Some((nodes, index));
    }
    for node in nodes.iter_mut() {
        if let Some(found) = locate_mut(&mut node.children, id) {
            return Some(found);
        }
    }
    None
}

/// Ids of a node and all of its descendants
pub(crate) fn subtree_ids(node: &Node) -> Vec<LayerId> {
    let mut ids = Vec::new();
    node.collect_ids(&mut ids);
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LayerTree {
        // root: A, B{C, D}, E
        let mut b = Node::leaf(Layer::new(LayerId(0x0102), "B", true));
        b.children.push(Node::leaf(Layer::new(LayerId(0x0103), "C", false)));
        b.children.push(Node::leaf(Layer::new(LayerId(0x0104), "D", false)));
        LayerTree::from_forest(vec![
            Node::leaf(Layer::new(LayerId(0x0101), "A", false)),
            b,
            Node::leaf(Layer::new(LayerId(0x0105), "E", false)),
        ])
    }

    #[test]
    fn test_nested_set_numbering() {
        let tree = sample();
        let nums: Vec<(u16, u32, u32)> = tree.iter().map(|l| (l.id.0, l.left, l.right)).collect();
        assert_eq!(
            nums,
            vec![
                (0x0101, 1, 2),
                (0x0102, 3, 8),
                (0x0103, 4, 5),
                (0x0104, 6, 7),
                (0x0105, 9, 10),
            ]
        );
        assert!(tree.is_consistent());
    }

    #[test]
    fn test_parent_and_children() {
        let tree = sample();
        assert_eq!(tree.get(LayerId(0x0103)).unwrap().parent, LayerId(0x0102));
        assert_eq!(tree.get(LayerId(0x0102)).unwrap().children, 2);
        let ids: Vec<u16> = tree.children(LayerId(0x0102)).map(|l| l.id.0).collect();
        assert_eq!(ids, vec![0x0103, 0x0104]);
        assert_eq!(tree.subtree(LayerId(0x0102)).len(), 3);
    }

    #[test]
    fn test_sibling_below() {
        let tree = sample();
        assert_eq!(
            tree.sibling_below(LayerId(0x0105)).map(|l| l.id),
            Some(LayerId(0x0102))
        );
        assert_eq!(
            tree.sibling_below(LayerId(0x0104)).map(|l| l.id),
            Some(LayerId(0x0103))
        );
        assert!(tree.sibling_below(LayerId(0x0103)).is_none());
        assert!(tree.sibling_below(LayerId(0x0101)).is_none());
    }

    #[test]
    fn test_forest_roundtrip() {
        let tree = sample();
        let rebuilt = LayerTree::from_forest(tree.to_forest());
        assert_eq!(rebuilt, tree);
    }

    #[test]
    fn test_detects_broken_intervals() {
        let mut tree = sample();
        tree.layers[2].right = 9;
        assert!(!tree.is_consistent());
    }
}

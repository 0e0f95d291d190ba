//! Canvas state model
//!
//! [`CanvasState::apply`] is the only way to mutate the state. Every check
//! runs before anything is changed, so a failed command leaves the state as
//! it was. The layer tree is published as an `Arc<LayerTree>`: each change
//! builds a complete new tree and swaps it in, and readers holding an older
//! `Arc` keep a consistent view.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use drawpile_msg::{
    attr_flags, create_flags, Command, FeatureTiers, LayerId, LayerOrderEntry, Message,
    SERVER_CONTEXT,
};
use serde::Serialize;
use tracing::debug;

use crate::acl::{AclState, LayerAcl};
use crate::error::{AclError, CanvasError, Result};
use crate::tree::{locate_mut, subtree_ids, Layer, LayerTree, Node};

/// Largest canvas width or height
pub const MAX_CANVAS_SIZE: i64 = 32767;

/// Replicated canvas state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanvasState {
    tree: Arc<LayerTree>,
    acl: AclState,
    width: u32,
    height: u32,
    default_layer: LayerId,
    undo_points: BTreeMap<u8, u32>,
}

/// Summary of the canvas for status queries
#[derive(Debug, Clone, Serialize)]
pub struct CanvasSummary {
    /// Canvas width
    pub width: u32,
    /// Canvas height
    pub height: u32,
    /// Number of layers, groups included
    pub layers: usize,
    /// Default layer for new users
    pub default_layer: LayerId,
}

impl CanvasState {
    /// An empty 0x0 canvas
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current layer tree snapshot
    #[must_use]
    pub fn layers(&self) -> Arc<LayerTree> {
        Arc::clone(&self.tree)
    }

    /// Borrow the current layer tree
    #[must_use]
    pub fn tree(&self) -> &LayerTree {
        &self.tree
    }

    /// Access control state
    #[must_use]
    pub fn acl(&self) -> &AclState {
        &self.acl
    }

    /// Canvas size
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Default layer for new users
    #[must_use]
    pub fn default_layer(&self) -> LayerId {
        self.default_layer
    }

    /// Number of undo points a user has sent
    #[must_use]
    pub fn undo_points(&self, ctx: u8) -> u32 {
        self.undo_points.get(&ctx).copied().unwrap_or(0)
    }

    /// Short description for status queries
    #[must_use]
    pub fn summary(&self) -> CanvasSummary {
        CanvasSummary {
            width: self.width,
            height: self.height,
            layers: self.tree.len(),
            default_layer: self.default_layer,
        }
    }

    /// Authoritative permission check for a command
    pub fn check(&self, ctx: u8, command: &Command) -> std::result::Result<(), AclError> {
        self.acl.check(&self.tree, ctx, command)
    }

    /// First free layer id in a user's namespace
    #[must_use]
    pub fn available_layer_id(&self, ctx: u8) -> Option<LayerId> {
        (0..=u8::MAX)
            .map(|index| LayerId::new(ctx, index))
            .find(|id| !id.is_none() && !self.tree.contains(*id))
    }

    /// Apply one command
    pub fn apply(&mut self, message: &Message) -> Result<()> {
        let ctx = message.context_id;
        match &message.command {
            Command::ServerCommand { .. }
            | Command::Disconnect { .. }
            | Command::Ping { .. }
            | Command::Chat { .. }
            | Command::PrivateChat { .. }
            | Command::Interval { .. }
            | Command::MovePointer { .. }
            | Command::Marker { .. } => {}
            Command::Join { flags, .. } => self.acl.user_joined(ctx, *flags),
            Command::Leave => self.acl.user_left(ctx),
            Command::SessionOwner { users } => self.acl.set_operators(users),
            Command::UserAcl { users } => self.acl.set_locked_users(users),
            Command::LayerAcl {
                id,
                locked,
                tier,
                exclusive,
            } => {
                self.require_layer(*id)?;
                self.acl.set_layer(
                    *id,
                    LayerAcl {
                        locked: *locked,
                        tier: *tier,
                        exclusive: exclusive.clone(),
                    },
                );
            }
            Command::FeatureAccessLevels { tiers } => self.acl.set_features(*tiers),
            Command::DefaultLayer { id } => {
                if !id.is_none() {
                    self.require_layer(*id)?;
                }
                self.default_layer = *id;
            }
            Command::UndoPoint => *self.undo_points.entry(ctx).or_insert(0) += 1,
            Command::CanvasResize {
                top,
                right,
                bottom,
                left,
            } => self.resize(*top, *right, *bottom, *left)?,
            Command::LayerCreate {
                id,
                source,
                target,
                flags,
                title,
                ..
            } => self.create_layer(*id, *source, *target, *flags, title)?,
            Command::LayerAttributes {
                id,
                flags,
                mask,
                opacity,
                blend,
            } => {
                self.require_layer(*id)?;
                let (flags, mask, opacity, blend) = (*flags, *mask & attr_flags::ALL, *opacity, *blend);
                self.tree = Arc::new(self.tree.with_layer(*id, |layer| {
                    layer.flags = (layer.flags & !mask) | (flags & mask);
                    layer.opacity = opacity;
                    layer.blend = blend;
                }));
            }
            Command::LayerRetitle { id, title } => {
                self.require_layer(*id)?;
                self.tree = Arc::new(self.tree.with_layer(*id, |layer| {
                    layer.title = title.clone();
                }));
            }
            Command::LayerOrder { entries } => self.reorder(entries)?,
            Command::LayerDelete { id, merge_to } => self.delete_layer(*id, *merge_to)?,
            Command::LayerVisibility { id, visible } => {
                self.require_layer(*id)?;
                let hidden = !*visible;
                self.tree = Arc::new(self.tree.with_layer(*id, |layer| layer.hidden = hidden));
            }
            Command::PutImage { layer, .. } | Command::FillRect { layer, .. } => {
                if self.require_layer(*layer)?.group {
                    return Err(CanvasError::IsAGroup(*layer));
                }
            }
        }
        Ok(())
    }

    /// Command sequence that rebuilds this state from an empty one
    ///
    /// Covers canvas size, the layer tree with attributes, access control
    /// and the default layer. Users, undo history and pixel content are not
    /// part of the snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        let mut out = Vec::new();
        let mut push = |command| out.push(Message::new(SERVER_CONTEXT, command));

        if self.width > 0 || self.height > 0 {
            push(Command::CanvasResize {
                top: 0,
                right: self.width as i32,
                bottom: self.height as i32,
                left: 0,
            });
        }

        for layer in self.tree.iter() {
            let mut flags = 0;
            if layer.group {
                flags |= create_flags::GROUP;
            }
            if !layer.parent.is_none() {
                flags |= create_flags::INTO;
            }
            push(Command::LayerCreate {
                id: layer.id,
                source: LayerId::NONE,
                target: layer.parent,
                fill: 0,
                flags,
                title: layer.title.clone(),
            });
        }

        for layer in self.tree.iter().filter(|l| l.has_custom_attributes()) {
            push(Command::LayerAttributes {
                id: layer.id,
                flags: layer.flags,
                mask: attr_flags::ALL,
                opacity: layer.opacity,
                blend: layer.blend,
            });
        }

        for (id, entry) in self.acl.layer_entries() {
            push(Command::LayerAcl {
                id: *id,
                locked: entry.locked,
                tier: entry.tier,
                exclusive: entry.exclusive.clone(),
            });
        }

        if *self.acl.features() != FeatureTiers::default() {
            push(Command::FeatureAccessLevels {
                tiers: *self.acl.features(),
            });
        }
        if !self.acl.operators().is_empty() {
            push(Command::SessionOwner {
                users: self.acl.operators().iter().copied().collect(),
            });
        }
        if !self.acl.locked_users().is_empty() {
            push(Command::UserAcl {
                users: self.acl.locked_users().iter().copied().collect(),
            });
        }
        if !self.default_layer.is_none() {
            push(Command::DefaultLayer {
                id: self.default_layer,
            });
        }

        out
    }

    fn require_layer(&self, id: LayerId) -> Result<&Layer> {
        self.tree.get(id).ok_or(CanvasError::LayerNotFound(id))
    }

    fn resize(&mut self, top: i32, right: i32, bottom: i32, left: i32) -> Result<()> {
        let width = i64::from(self.width) + i64::from(left) + i64::from(right);
        let height = i64::from(self.height) + i64::from(top) + i64::from(bottom);
        if !(1..=MAX_CANVAS_SIZE).contains(&width) || !(1..=MAX_CANVAS_SIZE).contains(&height) {
            return Err(CanvasError::InvalidSize { width, height });
        }
        self.width = width as u32;
        self.height = height as u32;
        Ok(())
    }

    fn create_layer(
        &mut self,
        id: LayerId,
        source: LayerId,
        target: LayerId,
        flags: u8,
        title: &str,
    ) -> Result<()> {
        if id.is_none() {
            return Err(CanvasError::ReservedLayerId);
        }
        if self.tree.contains(id) {
            return Err(CanvasError::LayerExists(id));
        }
        if !source.is_none() {
            self.require_layer(source)?;
        }
        let into = flags & create_flags::INTO != 0;
        if !target.is_none() {
            let target_layer = self.require_layer(target)?;
            if into && !target_layer.group {
                return Err(CanvasError::NotAGroup(target));
            }
        }

        let node = Node::leaf(Layer::new(id, title, flags & create_flags::GROUP != 0));
        let mut forest = self.tree.to_forest();
        if target.is_none() {
            forest.push(node);
        } else if let Some((siblings, index)) = locate_mut(&mut forest, target) {
            if into {
                siblings[index].children.push(node);
            } else {
                siblings.insert(index + 1, node);
            }
        }
        self.tree = Arc::new(LayerTree::from_forest(forest));
        Ok(())
    }

    fn delete_layer(&mut self, id: LayerId, merge_to: LayerId) -> Result<()> {
        self.require_layer(id)?;
        if !merge_to.is_none() {
            match self.tree.sibling_below(id) {
                Some(below) if below.id == merge_to => {
                    if below.group {
                        return Err(CanvasError::IsAGroup(merge_to));
                    }
                    if self.acl.layer(merge_to).is_some_and(|e| e.locked) {
                        return Err(CanvasError::MergeTargetLocked(merge_to));
                    }
                }
                other => {
                    return Err(CanvasError::MergeTargetMoved {
                        layer: id,
                        expected: merge_to,
                        found: other.map_or(LayerId::NONE, |l| l.id),
                    });
                }
            }
            debug!(layer = %id, into = %merge_to, "merging layer down");
        }

        let mut forest = self.tree.to_forest();
        let removed = match locate_mut(&mut forest, id) {
            Some((siblings, index)) => subtree_ids(&siblings.remove(index)),
            None => return Err(CanvasError::LayerNotFound(id)),
        };
        self.acl.remove_layers(&removed);
        if removed.contains(&self.default_layer) {
            self.default_layer = LayerId::NONE;
        }
        self.tree = Arc::new(LayerTree::from_forest(forest));
        Ok(())
    }

    fn reorder(&mut self, entries: &[LayerOrderEntry]) -> Result<()> {
        if entries.len() != self.tree.len() {
            return Err(CanvasError::InvalidOrder(format!(
                "expected {} entries, got {}",
                self.tree.len(),
                entries.len()
            )));
        }
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in entries {
            let layer = self.require_layer(entry.id)?;
            if !seen.insert(entry.id) {
                return Err(CanvasError::InvalidOrder(format!("{} listed twice", entry.id)));
            }
            if entry.children > 0 && !layer.group {
                return Err(CanvasError::NotAGroup(entry.id));
            }
        }

        fn build(
            tree: &LayerTree,
            entries: &[LayerOrderEntry],
            pos: &mut usize,
            count: usize,
        ) -> Result<Vec<Node>> {
            let mut nodes = Vec::with_capacity(count);
            for _ in 0..count {
                let entry = entries.get(*pos).ok_or_else(|| {
                    CanvasError::InvalidOrder("child count runs past the end".to_string())
                })?;
                *pos += 1;
                let layer = tree
                    .get(entry.id)
                    .cloned()
                    .ok_or(CanvasError::LayerNotFound(entry.id))?;
                let children = build(tree, entries, pos, usize::from(entry.children))?;
                nodes.push(Node { layer, children });
            }
            Ok(nodes)
        }

        let mut forest = Vec::new();
        let mut pos = 0;
        while pos < entries.len() {
            forest.extend(build(&self.tree, entries, &mut pos, 1)?);
        }
        debug!(layers = entries.len(), "layers reordered");
        self.tree = Arc::new(LayerTree::from_forest(forest));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drawpile_msg::{AccessTier, BlendMode};

    fn create(ctx: u8, id: u16, target: u16, flags: u8, title: &str) -> Message {
        Message::new(
            ctx,
            Command::LayerCreate {
                id: LayerId(id),
                source: LayerId::NONE,
                target: LayerId(target),
                fill: 0,
                flags,
                title: title.to_string(),
            },
        )
    }

    fn order(entries: &[(u16, u16)]) -> Message {
        Message::new(
            1,
            Command::LayerOrder {
                entries: entries
                    .iter()
                    .map(|(id, children)| LayerOrderEntry {
                        id: LayerId(*id),
                        children: *children,
                    })
                    .collect(),
            },
        )
    }

    fn ids(state: &CanvasState) -> Vec<u16> {
        state.tree().iter().map(|l| l.id.0).collect()
    }

    /// A(0x0101), B(0x0102, group) containing C(0x0103)
    fn scenario() -> CanvasState {
        let mut state = CanvasState::new();
        state.apply(&create(1, 0x0101, 0, 0, "A")).unwrap();
        state
            .apply(&create(1, 0x0102, 0, create_flags::GROUP, "B"))
            .unwrap();
        state
            .apply(&create(1, 0x0103, 0x0102, create_flags::INTO, "C"))
            .unwrap();
        state
    }

    #[test]
    fn test_create_placement() {
        let mut state = scenario();
        assert_eq!(ids(&state), vec![0x0101, 0x0102, 0x0103]);

        // directly above the target, in the target's parent
        state.apply(&create(1, 0x0104, 0x0101, 0, "D")).unwrap();
        assert_eq!(ids(&state), vec![0x0101, 0x0104, 0x0102, 0x0103]);

        // topmost child of the group
        state
            .apply(&create(1, 0x0105, 0x0102, create_flags::INTO, "E"))
            .unwrap();
        assert_eq!(ids(&state), vec![0x0101, 0x0104, 0x0102, 0x0103, 0x0105]);
        assert!(state.tree().is_consistent());
    }

    #[test]
    fn test_create_errors_leave_state_untouched() {
        let mut state = scenario();
        let before = state.clone();
        assert_eq!(
            state.apply(&create(1, 0x0101, 0, 0, "dup")),
            Err(CanvasError::LayerExists(LayerId(0x0101)))
        );
        assert_eq!(
            state.apply(&create(1, 0x0104, 0x0101, create_flags::INTO, "x")),
            Err(CanvasError::NotAGroup(LayerId(0x0101)))
        );
        assert_eq!(
            state.apply(&create(1, 0x0104, 0x0199, 0, "x")),
            Err(CanvasError::LayerNotFound(LayerId(0x0199)))
        );
        assert_eq!(
            state.apply(&create(0, 0, 0, 0, "x")),
            Err(CanvasError::ReservedLayerId)
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_reorder_scenario() {
        let mut state = scenario();
        state.apply(&order(&[(0x0102, 1), (0x0103, 0), (0x0101, 0)])).unwrap();

        let tree = state.tree();
        let a = tree.get(LayerId(0x0101)).unwrap();
        let b = tree.get(LayerId(0x0102)).unwrap();
        let c = tree.get(LayerId(0x0103)).unwrap();
        assert!(b.right < a.left);
        assert!(b.contains(c));
        assert_eq!((b.left, b.right, c.left, c.right, a.left, a.right), (1, 4, 2, 3, 5, 6));

        let mut joiner = CanvasState::new();
        for message in state.snapshot() {
            joiner.apply(&message).unwrap();
        }
        assert_eq!(ids(&joiner), vec![0x0102, 0x0103, 0x0101]);
        assert_eq!(joiner.tree(), state.tree());
    }

    #[test]
    fn test_reorder_rejects_bad_lists() {
        let mut state = scenario();
        let before = state.clone();
        // missing a layer
        assert!(matches!(
            state.apply(&order(&[(0x0102, 1), (0x0103, 0)])),
            Err(CanvasError::InvalidOrder(_))
        ));
        // duplicate
        assert!(matches!(
            state.apply(&order(&[(0x0102, 1), (0x0103, 0), (0x0103, 0)])),
            Err(CanvasError::InvalidOrder(_))
        ));
        // children on a non-group
        assert_eq!(
            state.apply(&order(&[(0x0101, 1), (0x0103, 0), (0x0102, 0)])),
            Err(CanvasError::NotAGroup(LayerId(0x0101)))
        );
        // child count past the end
        assert!(matches!(
            state.apply(&order(&[(0x0101, 0), (0x0102, 2), (0x0103, 0)])),
            Err(CanvasError::InvalidOrder(_))
        ));
        // references a deleted layer
        assert_eq!(
            state.apply(&order(&[(0x0101, 0), (0x0102, 0), (0x0104, 0)])),
            Err(CanvasError::LayerNotFound(LayerId(0x0104)))
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_delete_removes_subtree_and_acl() {
        let mut state = scenario();
        let acl = Message::new(
            1,
            Command::LayerAcl {
                id: LayerId(0x0103),
                locked: true,
                tier: AccessTier::Guest,
                exclusive: vec![],
            },
        );
        state.apply(&acl).unwrap();
        state
            .apply(&Message::new(1, Command::DefaultLayer { id: LayerId(0x0103) }))
            .unwrap();

        state
            .apply(&Message::new(
                1,
                Command::LayerDelete {
                    id: LayerId(0x0102),
                    merge_to: LayerId::NONE,
                },
            ))
            .unwrap();
        assert_eq!(ids(&state), vec![0x0101]);
        assert!(state.acl().layer(LayerId(0x0103)).is_none());
        assert_eq!(state.default_layer(), LayerId::NONE);
    }

    #[test]
    fn test_merge_checks_sibling_below() {
        let mut state = scenario();
        state.apply(&create(1, 0x0104, 0x0102, 0, "D")).unwrap();
        // root: A, B{C}, D

        let merge = |id: u16, to: u16| {
            Message::new(
                1,
                Command::LayerDelete {
                    id: LayerId(id),
                    merge_to: LayerId(to),
                },
            )
        };

        // D sits on a group
        assert_eq!(
            state.apply(&merge(0x0104, 0x0102)),
            Err(CanvasError::IsAGroup(LayerId(0x0102)))
        );
        // stale target, the layer below is B
        assert_eq!(
            state.apply(&merge(0x0104, 0x0101)),
            Err(CanvasError::MergeTargetMoved {
                layer: LayerId(0x0104),
                expected: LayerId(0x0101),
                found: LayerId(0x0102),
            })
        );
        // nothing below A
        assert!(matches!(
            state.apply(&merge(0x0101, 0x0104)),
            Err(CanvasError::MergeTargetMoved { .. })
        ));

        // locked target
        state.apply(&create(1, 0x0105, 0x0104, 0, "E")).unwrap();
        state
            .apply(&Message::new(
                1,
                Command::LayerAcl {
                    id: LayerId(0x0104),
                    locked: true,
                    tier: AccessTier::Guest,
                    exclusive: vec![],
                },
            ))
            .unwrap();
        assert_eq!(
            state.apply(&merge(0x0105, 0x0104)),
            Err(CanvasError::MergeTargetLocked(LayerId(0x0104)))
        );

        state
            .apply(&Message::new(
                1,
                Command::LayerAcl {
                    id: LayerId(0x0104),
                    locked: false,
                    tier: AccessTier::Guest,
                    exclusive: vec![],
                },
            ))
            .unwrap();
        state.apply(&merge(0x0105, 0x0104)).unwrap();
        assert!(!state.tree().contains(LayerId(0x0105)));
    }

    #[test]
    fn test_attributes_read_modify_write() {
        let mut state = scenario();
        let attrs = |flags: u8, mask: u8| {
            Message::new(
                1,
                Command::LayerAttributes {
                    id: LayerId(0x0101),
                    flags,
                    mask,
                    opacity: 200,
                    blend: BlendMode::Multiply,
                },
            )
        };
        state.apply(&attrs(attr_flags::CENSOR, attr_flags::CENSOR)).unwrap();
        state.apply(&attrs(attr_flags::FIXED, attr_flags::FIXED)).unwrap();
        let layer = state.tree().get(LayerId(0x0101)).unwrap();
        assert_eq!(layer.flags, attr_flags::CENSOR | attr_flags::FIXED);
        assert_eq!(layer.opacity, 200);
        assert_eq!(layer.blend, BlendMode::Multiply);

        state.apply(&attrs(0, attr_flags::CENSOR)).unwrap();
        assert_eq!(state.tree().get(LayerId(0x0101)).unwrap().flags, attr_flags::FIXED);
    }

    #[test]
    fn test_readers_keep_old_tree() {
        let mut state = scenario();
        let before = state.layers();
        state.apply(&create(1, 0x0104, 0, 0, "D")).unwrap();
        assert_eq!(before.len(), 3);
        assert_eq!(state.layers().len(), 4);
    }

    #[test]
    fn test_resize_bounds() {
        let mut state = CanvasState::new();
        let resize = |right: i32, bottom: i32| {
            Message::new(
                1,
                Command::CanvasResize {
                    top: 0,
                    right,
                    bottom,
                    left: 0,
                },
            )
        };
        state.apply(&resize(800, 600)).unwrap();
        assert_eq!(state.size(), (800, 600));
        assert!(matches!(
            state.apply(&resize(-800, 0)),
            Err(CanvasError::InvalidSize { width: 0, .. })
        ));
        assert!(matches!(
            state.apply(&resize(40000, 0)),
            Err(CanvasError::InvalidSize { .. })
        ));
        assert_eq!(state.size(), (800, 600));
    }

    #[test]
    fn test_pixel_commands_need_a_layer() {
        let mut state = scenario();
        let fill = |layer: u16| {
            Message::new(
                1,
                Command::FillRect {
                    layer: LayerId(layer),
                    mode: BlendMode::Normal,
                    x: 0,
                    y: 0,
                    w: 1,
                    h: 1,
                    color: 0xff00_0000,
                },
            )
        };
        assert!(state.apply(&fill(0x0101)).is_ok());
        assert_eq!(
            state.apply(&fill(0x0102)),
            Err(CanvasError::IsAGroup(LayerId(0x0102)))
        );
        assert_eq!(
            state.apply(&fill(0x0199)),
            Err(CanvasError::LayerNotFound(LayerId(0x0199)))
        );
    }

    #[test]
    fn test_available_layer_id() {
        let state = scenario();
        assert_eq!(state.available_layer_id(1), Some(LayerId(0x0100)));
        assert_eq!(state.available_layer_id(2), Some(LayerId(0x0200)));
        assert_eq!(state.available_layer_id(0), Some(LayerId(0x0001)));
    }

    #[test]
    fn test_replay_is_deterministic() {
        let messages = vec![
            Message::new(1, Command::CanvasResize { top: 0, right: 64, bottom: 64, left: 0 }),
            create(1, 0x0101, 0, 0, "A"),
            create(1, 0x0102, 0, create_flags::GROUP, "B"),
            Message::new(1, Command::UndoPoint),
            create(2, 0x0201, 0x0102, create_flags::INTO, "C"),
            Message::new(1, Command::SessionOwner { users: vec![1] }),
            order(&[(0x0102, 1), (0x0201, 0), (0x0101, 0)]),
            Message::new(2, Command::UndoPoint),
        ];
        let run = || {
            let mut state = CanvasState::new();
            for message in &messages {
                state.apply(message).unwrap();
            }
            state
        };
        let first = run();
        assert_eq!(first, run());
        assert_eq!(first.undo_points(1), 1);
        assert_eq!(first.undo_points(2), 1);
    }

    #[test]
    fn test_snapshot_reproduces_acl_and_attributes() {
        let mut state = scenario();
        let messages = vec![
            Message::new(1, Command::CanvasResize { top: 0, right: 100, bottom: 50, left: 0 }),
            Message::new(
                1,
                Command::LayerAttributes {
                    id: LayerId(0x0103),
                    flags: attr_flags::ISOLATED,
                    mask: attr_flags::ALL,
                    opacity: 10,
                    blend: BlendMode::Screen,
                },
            ),
            Message::new(
                1,
                Command::LayerAcl {
                    id: LayerId(0x0101),
                    locked: false,
                    tier: AccessTier::Registered,
                    exclusive: vec![4],
                },
            ),
            Message::new(1, Command::SessionOwner { users: vec![1, 3] }),
            Message::new(1, Command::UserAcl { users: vec![5] }),
            Message::new(1, Command::DefaultLayer { id: LayerId(0x0101) }),
        ];
        for message in &messages {
            state.apply(message).unwrap();
        }

        let mut joiner = CanvasState::new();
        for message in state.snapshot() {
            joiner.apply(&message).unwrap();
        }
        assert_eq!(joiner.tree(), state.tree());
        assert_eq!(joiner.acl(), state.acl());
        assert_eq!(joiner.size(), (100, 50));
        assert_eq!(joiner.default_layer(), LayerId(0x0101));
    }

    #[test]
    fn test_nested_set_holds_after_every_change() {
        let mut state = CanvasState::new();
        let steps = vec![
            create(1, 0x0101, 0, create_flags::GROUP, "G1"),
            create(1, 0x0102, 0x0101, create_flags::INTO | create_flags::GROUP, "G2"),
            create(1, 0x0103, 0x0102, create_flags::INTO, "L1"),
            create(1, 0x0104, 0x0101, 0, "L2"),
            create(1, 0x0105, 0x0103, 0, "L3"),
            order(&[(0x0104, 0), (0x0101, 1), (0x0102, 2), (0x0105, 0), (0x0103, 0)]),
            Message::new(
                1,
                Command::LayerDelete {
                    id: LayerId(0x0105),
                    merge_to: LayerId::NONE,
                },
            ),
        ];
        for step in &steps {
            state.apply(step).unwrap();
            assert!(state.tree().is_consistent(), "after {step:?}");
        }
    }
}

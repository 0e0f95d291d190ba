//! Access control
//!
//! The server calls [`AclState::check`] on every inbound command before it is
//! applied. User tiers are derived from the command stream itself: operators
//! from `SessionOwner`, registered users from the `Join` flags, locked users
//! from `UserAcl`.

use std::collections::{BTreeMap, BTreeSet};

use drawpile_msg::{join_flags, AccessTier, Command, Feature, FeatureTiers, LayerId, SERVER_CONTEXT};
use serde::Serialize;

use crate::error::AclError;
use crate::tree::LayerTree;

/// Per-layer access control entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayerAcl {
    /// Nobody may draw on the layer
    pub locked: bool,
    /// Minimum tier required to draw
    pub tier: AccessTier,
    /// When non-empty, only these users may draw
    pub exclusive: Vec<u8>,
}

impl LayerAcl {
    /// Whether this entry is equivalent to having no entry at all
    #[must_use]
    pub fn is_default(&self) -> bool {
        !self.locked && self.tier == AccessTier::Guest && self.exclusive.is_empty()
    }

    /// Check whether a user may draw on the layer
    pub fn check(&self, id: LayerId, ctx: u8, tier: AccessTier) -> Result<(), AclError> {
        if self.locked {
            return Err(AclError::LayerLocked(id));
        }
        if !self.exclusive.is_empty() {
            return if self.exclusive.contains(&ctx) {
                Ok(())
            } else {
                Err(AclError::NotExclusiveUser(id))
            };
        }
        if tier < self.tier {
            return Err(AclError::TierTooLow(id));
        }
        Ok(())
    }
}

/// Session access control state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AclState {
    operators: BTreeSet<u8>,
    registered: BTreeSet<u8>,
    locked_users: BTreeSet<u8>,
    features: FeatureTiers,
    layers: BTreeMap<LayerId, LayerAcl>,
}

impl AclState {
    /// Fresh state: no operators, default feature tiers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tier of a user
    #[must_use]
    pub fn user_tier(&self, ctx: u8) -> AccessTier {
        if ctx == SERVER_CONTEXT || self.operators.contains(&ctx) {
            AccessTier::Operator
        } else if self.registered.contains(&ctx) {
            AccessTier::Registered
        } else {
            AccessTier::Guest
        }
    }

    /// Whether a user is a session operator
    #[must_use]
    pub fn is_operator(&self, ctx: u8) -> bool {
        self.user_tier(ctx) == AccessTier::Operator
    }

    /// Whether a user is locked
    #[must_use]
    pub fn is_locked(&self, ctx: u8) -> bool {
        self.locked_users.contains(&ctx)
    }

    /// Whether a user may use a feature
    #[must_use]
    pub fn can_use(&self, ctx: u8, feature: Feature) -> bool {
        self.user_tier(ctx) >= self.features.get(feature)
    }

    /// Session operators
    #[must_use]
    pub fn operators(&self) -> &BTreeSet<u8> {
        &self.operators
    }

    /// Locked users
    #[must_use]
    pub fn locked_users(&self) -> &BTreeSet<u8> {
        &self.locked_users
    }

    /// Feature tier map
    #[must_use]
    pub fn features(&self) -> &FeatureTiers {
        &self.features
    }

    /// Layer entries that differ from the default
    pub fn layer_entries(&self) -> impl Iterator<Item = (&LayerId, &LayerAcl)> {
        self.layers.iter()
    }

    /// Entry for one layer
    #[must_use]
    pub fn layer(&self, id: LayerId) -> Option<&LayerAcl> {
        self.layers.get(&id)
    }

    /// Check whether a user may send a command
    ///
    /// Structural validity (does the layer exist) is not checked here.
    pub fn check(&self, tree: &LayerTree, ctx: u8, command: &Command) -> Result<(), AclError> {
        if ctx == SERVER_CONTEXT {
            return Ok(());
        }
        if command.is_canvas() && self.is_locked(ctx) {
            return Err(AclError::UserLocked(ctx));
        }

        match command {
            Command::Join { .. } | Command::Leave | Command::Disconnect { .. } => {
                Err(AclError::ServerOnly(command.message_type()))
            }
            Command::ServerCommand { .. }
            | Command::Ping { .. }
            | Command::Chat { .. }
            | Command::PrivateChat { .. }
            | Command::Interval { .. }
            | Command::Marker { .. }
            | Command::LayerVisibility { .. } => Ok(()),
            Command::MovePointer { .. } => self.require(ctx, Feature::Laser),
            Command::SessionOwner { .. }
            | Command::UserAcl { .. }
            | Command::FeatureAccessLevels { .. }
            | Command::DefaultLayer { .. } => self.require_operator(ctx),
            Command::LayerAcl { id, .. } => {
                if self.is_operator(ctx) || (self.can_use(ctx, Feature::OwnLayers) && id.creator() == ctx) {
                    Ok(())
                } else {
                    Err(AclError::NotOperator)
                }
            }
            Command::UndoPoint => self.require(ctx, Feature::Undo),
            Command::CanvasResize { .. } => self.require(ctx, Feature::Resize),
            Command::LayerCreate { id, .. } => {
                if !self.can_use(ctx, Feature::EditLayers) && !self.can_use(ctx, Feature::OwnLayers) {
                    return Err(AclError::MissingFeature(Feature::OwnLayers));
                }
                if !self.is_operator(ctx) && id.creator() != ctx {
                    return Err(AclError::NotOwner(*id));
                }
                Ok(())
            }
            Command::LayerAttributes { id, .. }
            | Command::LayerRetitle { id, .. }
            | Command::LayerDelete { id, .. } => self.require_layer_edit(ctx, *id),
            Command::LayerOrder { .. } => self.require(ctx, Feature::EditLayers),
            Command::PutImage { layer, .. } | Command::FillRect { layer, .. } => {
                self.require(ctx, Feature::PutImage)?;
                self.check_layer_access(tree, ctx, *layer)
            }
        }
    }

    /// Per-layer drawing permission, including inherited group entries
    pub fn check_layer_access(&self, tree: &LayerTree, ctx: u8, id: LayerId) -> Result<(), AclError> {
        let tier = self.user_tier(ctx);
        let mut current = Some(id);
        while let Some(layer_id) = current {
            if let Some(entry) = self.layers.get(&layer_id) {
                entry.check(layer_id, ctx, tier)?;
            }
            current = tree
                .get(layer_id)
                .map(|l| l.parent)
                .filter(|p| !p.is_none());
        }
        Ok(())
    }

    fn require(&self, ctx: u8, feature: Feature) -> Result<(), AclError> {
        if self.can_use(ctx, feature) {
            Ok(())
        } else {
            Err(AclError::MissingFeature(feature))
        }
    }

    fn require_operator(&self, ctx: u8) -> Result<(), AclError> {
        if self.is_operator(ctx) {
            Ok(())
        } else {
            Err(AclError::NotOperator)
        }
    }

    fn require_layer_edit(&self, ctx: u8, id: LayerId) -> Result<(), AclError> {
        if self.can_use(ctx, Feature::EditLayers) {
            return Ok(());
        }
        if !self.can_use(ctx, Feature::OwnLayers) {
            return Err(AclError::MissingFeature(Feature::EditLayers));
        }
        if id.creator() != ctx {
            return Err(AclError::NotOwner(id));
        }
        Ok(())
    }

    pub(crate) fn user_joined(&mut self, ctx: u8, flags: u8) {
        if flags & join_flags::AUTHENTICATED != 0 {
            self.registered.insert(ctx);
        } else {
            self.registered.remove(&ctx);
        }
    }

    pub(crate) fn user_left(&mut self, ctx: u8) {
        self.registered.remove(&ctx);
        self.operators.remove(&ctx);
        self.locked_users.remove(&ctx);
    }

    pub(crate) fn set_operators(&mut self, users: &[u8]) {
        self.operators = users.iter().copied().filter(|u| *u != SERVER_CONTEXT).collect();
    }

    pub(crate) fn set_locked_users(&mut self, users: &[u8]) {
        self.locked_users = users.iter().copied().filter(|u| *u != SERVER_CONTEXT).collect();
    }

    pub(crate) fn set_features(&mut self, features: FeatureTiers) {
        self.features = features;
    }

    pub(crate) fn set_layer(&mut self, id: LayerId, entry: LayerAcl) {
        if entry.is_default() {
            self.layers.remove(&id);
        } else {
            self.layers.insert(id, entry);
        }
    }

    pub(crate) fn remove_layers(&mut self, ids: &[LayerId]) {
        for id in ids {
            self.layers.remove(id);
        }
    }
}

//! Bidirectional alias ↔ node-id registry.
//!
//! Learns mappings from the frames that announce them (AMD,
//! InitializationComplete, VerifiedNodeID) and forgets them on AMR.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::frame::CanFrame;
use crate::types::{Alias, NodeId};

/// Callback invoked when a new alias mapping is learned.
pub type AliasWatcher = Arc<dyn Fn(NodeId, Alias) + Send + Sync>;

#[derive(Default)]
struct Maps {
    by_alias: HashMap<u16, NodeId>,
    by_node: HashMap<NodeId, u16>,
}

/// Registry of currently live alias bindings on one CAN segment.
///
/// Both directions live under a single mutex; watcher callbacks run after the
/// lock is released so a watcher may re-enter the map.
#[derive(Default)]
pub struct AliasMap {
    maps: Mutex<Maps>,
    watchers: RwLock<Vec<AliasWatcher>>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watcher; it observes every subsequent insertion exactly
    /// once, in insertion order.
    pub fn add_watcher(&self, watcher: AliasWatcher) {
        self.watchers.write().push(watcher);
    }

    /// Record `alias` ↔ `node`, replacing any stale binding of either key.
    pub fn insert(&self, alias: Alias, node: NodeId) {
        {
            let mut maps = self.maps.lock();
            if let Some(old_node) = maps.by_alias.insert(alias.raw(), node) {
                if old_node != node {
                    maps.by_node.remove(&old_node);
                }
            }
            if let Some(old_alias) = maps.by_node.insert(node, alias.raw()) {
                if old_alias != alias.raw() {
                    maps.by_alias.remove(&old_alias);
                }
            }
        }
        debug!(%alias, %node, "alias mapping learned");
        let watchers = self.watchers.read().clone();
        for watcher in &watchers {
            watcher(node, alias);
        }
    }

    /// Forget the binding for `alias`. No-op when unknown.
    pub fn remove(&self, alias: Alias) {
        let mut maps = self.maps.lock();
        if let Some(node) = maps.by_alias.remove(&alias.raw()) {
            maps.by_node.remove(&node);
            debug!(%alias, %node, "alias mapping dropped");
        }
    }

    /// The node currently bound to `alias`.
    pub fn node_for(&self, alias: u16) -> Option<NodeId> {
        self.maps.lock().by_alias.get(&alias).copied()
    }

    /// Like [`node_for`](Self::node_for) but yields the all-zero sentinel for
    /// unknown aliases, matching what goes on the wire for an unresolved
    /// source.
    pub fn node_for_or_unknown(&self, alias: u16) -> NodeId {
        self.node_for(alias).unwrap_or(NodeId::UNKNOWN)
    }

    /// The alias currently bound to `node`.
    pub fn alias_for(&self, node: NodeId) -> Option<Alias> {
        self.maps
            .lock()
            .by_node
            .get(&node)
            .copied()
            .and_then(Alias::new)
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.maps.lock().by_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Learn from or forget on the frames that carry mapping information;
    /// all other frames are ignored.
    pub fn process_frame(&self, frame: &CanFrame) {
        if frame.is_initialization_complete()
            || frame.is_verified_node_id()
            || frame.is_alias_map_definition()
        {
            let (Some(alias), Some(node)) = (Alias::new(frame.source_alias()), frame.node_id())
            else {
                trace!(header = frame.header(), "mapping frame without usable alias/node");
                return;
            };
            self.insert(alias, node);
        } else if frame.is_alias_map_reset() {
            if let Some(alias) = Alias::new(frame.source_alias()) {
                self.remove(alias);
            }
        }
    }
}

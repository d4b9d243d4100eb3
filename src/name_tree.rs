//! Sorted name tree stored as indirect objects (PDF 32000-1 §7.9.6).
//!
//! ```text
//! root          << /Kids [ 10 0 R 11 0 R ] >>                 (no /Limits)
//! intermediate  << /Kids [ ... ] /Limits [ (a.bin) (m.bin) ] >>
//! leaf          << /Names [ (a.bin) 20 0 R (b.bin) 22 0 R ] /Limits [ (a.bin) (b.bin) ] >>
//! ```
//!
//! Keys are compared as raw bytes. Nodes that grow past the fan-out are
//! split into freshly allocated nodes and the old node is freed; nodes
//! that shrink are rewritten in place and freed once empty. Underfull nodes
//! are never merged.

use crate::pdf_utils::display_key;
use crate::store::ObjectStore;
use crate::{AttachError, Result};
use lopdf::{Dictionary, Object, ObjectId, StringFormat};
use std::collections::BTreeSet;
use std::fmt;

/// Deepest tree accepted before the structure is treated as cyclic.
const MAX_DEPTH: usize = 64;

// ── Nodes ─────────────────────────────────────────────────────────────────────

/// Smallest and largest key stored beneath a node (its `/Limits`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub low: Vec<u8>,
    pub high: Vec<u8>,
}

impl KeyRange {
    fn contains(&self, key: &[u8]) -> bool {
        self.low.as_slice() <= key && key <= self.high.as_slice()
    }
}

/// One decoded name-tree node.
#[derive(Debug, Clone)]
pub enum NameTreeNode {
    /// `(key, value)` pairs in strictly ascending key order.
    Leaf(Vec<(Vec<u8>, ObjectId)>),
    /// Child references with the key range each one covers.
    Intermediate(Vec<(ObjectId, KeyRange)>),
}

impl NameTreeNode {
    fn len(&self) -> usize {
        match self {
            NameTreeNode::Leaf(entries) => entries.len(),
            NameTreeNode::Intermediate(kids) => kids.len(),
        }
    }

    /// Key range covered by this node, `None` when it holds nothing.
    pub fn range(&self) -> Option<KeyRange> {
        match self {
            NameTreeNode::Leaf(entries) => Some(KeyRange {
                low: entries.first()?.0.clone(),
                high: entries.last()?.0.clone(),
            }),
            NameTreeNode::Intermediate(kids) => Some(KeyRange {
                low: kids.first()?.1.low.clone(),
                high: kids.last()?.1.high.clone(),
            }),
        }
    }

    /// Cut into as few nodes as keep each one within `fan_out`, sized as
    /// evenly as possible and in key order.
    fn split(self, fan_out: usize) -> Vec<NameTreeNode> {
        match self {
            NameTreeNode::Leaf(entries) => chunk_evenly(entries, fan_out)
                .into_iter()
                .map(NameTreeNode::Leaf)
                .collect(),
            NameTreeNode::Intermediate(kids) => chunk_evenly(kids, fan_out)
                .into_iter()
                .map(NameTreeNode::Intermediate)
                .collect(),
        }
    }

    /// Encode as a node dictionary; the root carries no `/Limits`.
    pub fn to_dictionary(&self, with_limits: bool) -> Dictionary {
        let mut dict = Dictionary::new();
        match self {
            NameTreeNode::Leaf(entries) => {
                let mut names = Vec::with_capacity(entries.len() * 2);
                for (key, value) in entries {
                    names.push(key_object(key));
                    names.push(Object::Reference(*value));
                }
                dict.set("Names", Object::Array(names));
            }
            NameTreeNode::Intermediate(kids) => {
                let refs = kids.iter().map(|(id, _)| Object::Reference(*id)).collect();
                dict.set("Kids", Object::Array(refs));
            }
        }
        if with_limits {
            if let Some(range) = self.range() {
                dict.set(
                    "Limits",
                    Object::Array(vec![key_object(&range.low), key_object(&range.high)]),
                );
            }
        }
        dict
    }

    fn to_object(&self, with_limits: bool) -> Object {
        Object::Dictionary(self.to_dictionary(with_limits))
    }
}

/// Cut `items` into `ceil(len / fan_out)` runs whose lengths differ by at
/// most one; later runs take the remainder.
fn chunk_evenly<T>(mut items: Vec<T>, fan_out: usize) -> Vec<Vec<T>> {
    let fan_out = fan_out.max(1);
    let pieces = items.len().div_ceil(fan_out).max(1);
    let base = items.len() / pieces;
    let longer = items.len() % pieces;
    let mut sizes: Vec<usize> = (0..pieces)
        .map(|i| if i >= pieces - longer { base + 1 } else { base })
        .collect();

    let mut out = Vec::with_capacity(pieces);
    while let Some(size) = sizes.pop() {
        let tail = items.split_off(items.len() - size);
        out.push(tail);
    }
    out.reverse();
    out
}

fn key_object(key: &[u8]) -> Object {
    Object::String(key.to_vec(), StringFormat::Literal)
}

/// Raw contents of a node dictionary, without touching its kids.
enum RawNode {
    Leaf(Vec<(Vec<u8>, ObjectId)>),
    Kids(Vec<ObjectId>),
}

fn read_raw(dict: &Dictionary) -> Result<RawNode> {
    if let Ok(kids) = dict.get(b"Kids") {
        let kids = kids
            .as_array()
            .map_err(|_| AttachError::malformed("name tree /Kids is not an array"))?;
        let ids = kids
            .iter()
            .map(|k| {
                k.as_reference()
                    .map_err(|_| AttachError::malformed("name tree kid is not a reference"))
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(RawNode::Kids(ids));
    }

    let names = match dict.get(b"Names") {
        Ok(names) => names
            .as_array()
            .map_err(|_| AttachError::malformed("name tree /Names is not an array"))?,
        Err(_) => return Ok(RawNode::Leaf(Vec::new())),
    };
    if names.len() % 2 != 0 {
        return Err(AttachError::malformed("name tree /Names has an odd length"));
    }
    let mut entries = Vec::with_capacity(names.len() / 2);
    for pair in names.chunks_exact(2) {
        let key = pair[0]
            .as_str()
            .map_err(|_| AttachError::malformed("name tree key is not a string"))?;
        let value = pair[1].as_reference().map_err(|_| {
            AttachError::malformed(format!(
                "name tree value for '{}' is not a reference",
                display_key(key)
            ))
        })?;
        entries.push((key.to_vec(), value));
    }
    Ok(RawNode::Leaf(entries))
}

fn read_limits(dict: &Dictionary) -> Option<KeyRange> {
    let limits = dict.get(b"Limits").ok()?.as_array().ok()?;
    match limits.as_slice() {
        [low, high] => Some(KeyRange {
            low: low.as_str().ok()?.to_vec(),
            high: high.as_str().ok()?.to_vec(),
        }),
        _ => None,
    }
}

/// Key range of the subtree at `id`: its `/Limits`, or computed when absent.
fn subtree_range(store: &ObjectStore, id: ObjectId, depth: usize) -> Result<Option<KeyRange>> {
    if depth > MAX_DEPTH {
        return Err(AttachError::malformed("name tree is too deep or cyclic"));
    }
    let dict = store.get_dict(id)?;
    if let Some(range) = read_limits(dict) {
        return Ok(Some(range));
    }
    match read_raw(dict)? {
        RawNode::Leaf(entries) => Ok(NameTreeNode::Leaf(entries).range()),
        RawNode::Kids(kids) => {
            let mut low = None;
            let mut high = None;
            for kid in kids {
                if let Some(range) = subtree_range(store, kid, depth + 1)? {
                    low.get_or_insert(range.low);
                    high = Some(range.high);
                }
            }
            Ok(low.zip(high).map(|(low, high)| KeyRange { low, high }))
        }
    }
}

fn decode_node(store: &ObjectStore, dict: &Dictionary, depth: usize) -> Result<NameTreeNode> {
    match read_raw(dict)? {
        RawNode::Leaf(entries) => Ok(NameTreeNode::Leaf(entries)),
        RawNode::Kids(ids) => {
            let mut kids = Vec::with_capacity(ids.len());
            for id in ids {
                // empty kids cover nothing and are dropped on the next rewrite
                if let Some(range) = subtree_range(store, id, depth + 1)? {
                    kids.push((id, range));
                }
            }
            Ok(NameTreeNode::Intermediate(kids))
        }
    }
}

fn load_node(store: &ObjectStore, id: ObjectId, depth: usize) -> Result<NameTreeNode> {
    if depth > MAX_DEPTH {
        return Err(AttachError::malformed("name tree is too deep or cyclic"));
    }
    decode_node(store, store.get_dict(id)?, depth)
}

// ── Structural faults ─────────────────────────────────────────────────────────

/// A structural problem found by [`NameTree::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeFault {
    /// A key is not greater than the key before it in traversal order.
    OutOfOrder { previous: String, key: String },
    /// The same key appears twice.
    DuplicateKey(String),
    /// A node's `/Limits` disagree with the keys beneath it.
    BadLimits(ObjectId),
    /// A node could not be resolved or decoded.
    BrokenNode { node: Option<ObjectId>, reason: String },
}

impl fmt::Display for TreeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeFault::OutOfOrder { previous, key } => {
                write!(f, "key '{key}' follows '{previous}' out of order")
            }
            TreeFault::DuplicateKey(key) => write!(f, "duplicate key '{key}'"),
            TreeFault::BadLimits((n, g)) => write!(f, "node {n} {g} R has wrong /Limits"),
            TreeFault::BrokenNode { node: Some((n, g)), reason } => {
                write!(f, "node {n} {g} R: {reason}")
            }
            TreeFault::BrokenNode { node: None, reason } => write!(f, "root node: {reason}"),
        }
    }
}

// ── NameTree ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum TreeRoot {
    Empty,
    Indirect(ObjectId),
    /// Root dictionary written directly inside its owner; turned into an
    /// indirect object before the first mutation.
    Inline(Dictionary),
}

enum Inserted {
    InPlace(KeyRange),
    Split(Vec<(ObjectId, KeyRange)>),
}

enum Removed {
    NotFound,
    InPlace(ObjectId, KeyRange),
    Emptied(ObjectId),
}

/// Handle on one name tree inside an [`ObjectStore`].
///
/// The handle only remembers where the root lives; all node data is read
/// from and written to the store passed into each call.
#[derive(Debug, Clone)]
pub struct NameTree {
    root: TreeRoot,
    fan_out: usize,
}

impl NameTree {
    pub fn new(root: Option<ObjectId>, fan_out: usize) -> Self {
        Self {
            root: root.map_or(TreeRoot::Empty, TreeRoot::Indirect),
            fan_out: fan_out.max(2),
        }
    }

    pub(crate) fn inline(root: Dictionary, fan_out: usize) -> Self {
        Self {
            root: TreeRoot::Inline(root),
            fan_out: fan_out.max(2),
        }
    }

    /// The indirect root, `None` when the tree is empty or inline.
    pub fn root(&self) -> Option<ObjectId> {
        match self.root {
            TreeRoot::Indirect(id) => Some(id),
            _ => None,
        }
    }

    pub fn fan_out(&self) -> usize {
        self.fan_out
    }

    fn root_node(&self, store: &ObjectStore) -> Result<Option<NameTreeNode>> {
        match &self.root {
            TreeRoot::Empty => Ok(None),
            TreeRoot::Indirect(id) => load_node(store, *id, 0).map(Some),
            TreeRoot::Inline(dict) => decode_node(store, dict, 0).map(Some),
        }
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Descend by key range, then binary-search the leaf.
    pub fn lookup(&self, store: &ObjectStore, key: &[u8]) -> Result<Option<ObjectId>> {
        let mut node = match self.root_node(store)? {
            Some(node) => node,
            None => return Ok(None),
        };
        for depth in 0..MAX_DEPTH {
            match node {
                NameTreeNode::Leaf(entries) => {
                    return Ok(entries
                        .binary_search_by(|(k, _)| k.as_slice().cmp(key))
                        .ok()
                        .map(|i| entries[i].1));
                }
                NameTreeNode::Intermediate(kids) => {
                    let i = kids.partition_point(|(_, r)| r.high.as_slice() < key);
                    match kids.get(i) {
                        Some((id, range)) if range.contains(key) => {
                            node = load_node(store, *id, depth + 1)?;
                        }
                        _ => return Ok(None),
                    }
                }
            }
        }
        Err(AttachError::malformed("name tree is too deep or cyclic"))
    }

    /// In-order traversal. Each call starts from the root again.
    pub fn iter<'a>(&self, store: &'a ObjectStore) -> NameTreeIter<'a> {
        let start = match &self.root {
            TreeRoot::Empty => Ok(None),
            TreeRoot::Indirect(id) => store.get_dict(*id).and_then(read_raw).map(Some),
            TreeRoot::Inline(dict) => read_raw(dict).map(Some),
        };
        let mut visited = BTreeSet::new();
        if let TreeRoot::Indirect(id) = self.root {
            visited.insert(id);
        }
        match start {
            Ok(frame) => NameTreeIter {
                store,
                stack: frame.into_iter().map(Frame::from).collect(),
                visited,
                pending_error: None,
            },
            Err(e) => NameTreeIter {
                store,
                stack: Vec::new(),
                visited,
                pending_error: Some(e),
            },
        }
    }

    /// All entries in key order.
    pub fn entries(&self, store: &ObjectStore) -> Result<Vec<(Vec<u8>, ObjectId)>> {
        self.iter(store).collect()
    }

    pub fn is_empty(&self, store: &ObjectStore) -> Result<bool> {
        Ok(self.iter(store).next().transpose()?.is_none())
    }

    /// Number of node levels from the root down to the leftmost leaf.
    pub fn depth(&self, store: &ObjectStore) -> Result<usize> {
        let mut node = match self.root_node(store)? {
            Some(node) => node,
            None => return Ok(0),
        };
        let mut depth = 1;
        while let NameTreeNode::Intermediate(kids) = node {
            let Some((first, _)) = kids.first() else {
                break;
            };
            node = load_node(store, *first, depth)?;
            depth += 1;
        }
        Ok(depth)
    }

    /// Check ordering, uniqueness and `/Limits` of the whole tree.
    pub fn verify(&self, store: &ObjectStore) -> Vec<TreeFault> {
        let mut faults = Vec::new();
        let mut previous: Option<Vec<u8>> = None;
        let mut visited = BTreeSet::new();

        let root_dict = match &self.root {
            TreeRoot::Empty => return faults,
            TreeRoot::Indirect(id) => match store.get_dict(*id) {
                Ok(dict) => dict,
                Err(e) => {
                    faults.push(TreeFault::BrokenNode {
                        node: Some(*id),
                        reason: e.to_string(),
                    });
                    return faults;
                }
            },
            TreeRoot::Inline(dict) => dict,
        };
        if let TreeRoot::Indirect(id) = self.root {
            visited.insert(id);
        }
        verify_node(
            store,
            self.root(),
            root_dict,
            0,
            &mut previous,
            &mut visited,
            &mut faults,
        );
        faults
    }

    /// Fail with `MalformedStructure` if [`NameTree::verify`] finds anything.
    pub fn ensure_well_formed(&self, store: &ObjectStore) -> Result<()> {
        match self.verify(store).into_iter().next() {
            None => Ok(()),
            Some(fault) => Err(AttachError::malformed(format!("name tree: {fault}"))),
        }
    }

    // ── Mutation ──────────────────────────────────────────────────────────────

    /// Turn an inline root into an indirect object and return the root id.
    fn materialize(&mut self, store: &mut ObjectStore) -> Option<ObjectId> {
        match &self.root {
            TreeRoot::Empty => None,
            TreeRoot::Indirect(id) => Some(*id),
            TreeRoot::Inline(dict) => {
                let id = store.allocate(Object::Dictionary(dict.clone()));
                self.root = TreeRoot::Indirect(id);
                Some(id)
            }
        }
    }

    /// Insert `key` in sorted position, splitting nodes that exceed the
    /// fan-out. Fails with `DuplicateName` if the key is already present.
    pub fn insert(&mut self, store: &mut ObjectStore, key: &[u8], value: ObjectId) -> Result<()> {
        let root_id = match self.materialize(store) {
            Some(id) => id,
            None => {
                let leaf = NameTreeNode::Leaf(vec![(key.to_vec(), value)]);
                self.root = TreeRoot::Indirect(store.allocate(leaf.to_object(false)));
                return Ok(());
            }
        };

        if let Inserted::Split(mut pieces) = self.insert_into(store, root_id, key, value, true, 0)? {
            // an oversized node read from the file can split into more
            // pieces than one root holds
            while pieces.len() > self.fan_out {
                let mut level = Vec::new();
                for group in NameTreeNode::Intermediate(pieces).split(self.fan_out) {
                    let range = group
                        .range()
                        .ok_or_else(|| AttachError::malformed("empty node after split"))?;
                    level.push((store.allocate(group.to_object(true)), range));
                }
                pieces = level;
            }
            let root = NameTreeNode::Intermediate(pieces);
            self.root = TreeRoot::Indirect(store.allocate(root.to_object(false)));
        }
        Ok(())
    }

    fn insert_into(
        &self,
        store: &mut ObjectStore,
        id: ObjectId,
        key: &[u8],
        value: ObjectId,
        is_root: bool,
        depth: usize,
    ) -> Result<Inserted> {
        match load_node(store, id, depth)? {
            NameTreeNode::Leaf(mut entries) => {
                let pos = match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
                    Ok(_) => return Err(AttachError::DuplicateName(display_key(key))),
                    Err(pos) => pos,
                };
                entries.insert(pos, (key.to_vec(), value));
                self.store_node(store, id, NameTreeNode::Leaf(entries), is_root)
            }
            NameTreeNode::Intermediate(mut kids) => {
                if kids.is_empty() {
                    return Err(AttachError::malformed("intermediate node without kids"));
                }
                let i = kids
                    .partition_point(|(_, r)| r.high.as_slice() < key)
                    .min(kids.len() - 1);
                match self.insert_into(store, kids[i].0, key, value, false, depth + 1)? {
                    Inserted::InPlace(range) => {
                        if kids[i].1 == range {
                            let node = NameTreeNode::Intermediate(kids);
                            return node
                                .range()
                                .map(Inserted::InPlace)
                                .ok_or_else(|| AttachError::malformed("empty intermediate node"));
                        }
                        kids[i].1 = range;
                    }
                    Inserted::Split(pieces) => {
                        kids.splice(i..=i, pieces);
                    }
                }
                self.store_node(store, id, NameTreeNode::Intermediate(kids), is_root)
            }
        }
    }

    /// Rewrite `id` in place, or split it into new nodes of at most the
    /// fan-out and free it.
    fn store_node(
        &self,
        store: &mut ObjectStore,
        id: ObjectId,
        node: NameTreeNode,
        is_root: bool,
    ) -> Result<Inserted> {
        if node.len() <= self.fan_out {
            let range = node
                .range()
                .ok_or_else(|| AttachError::malformed("empty name tree node"))?;
            store.mutate(id, node.to_object(!is_root))?;
            return Ok(Inserted::InPlace(range));
        }

        let mut pieces = Vec::new();
        for piece in node.split(self.fan_out) {
            let range = piece
                .range()
                .ok_or_else(|| AttachError::malformed("empty node after split"))?;
            pieces.push((store.allocate(piece.to_object(true)), range));
        }
        store.free(id)?;
        Ok(Inserted::Split(pieces))
    }

    /// Remove `key`, returning the value it mapped to. Emptied nodes are
    /// freed; an emptied root leaves the tree empty.
    pub fn remove(&mut self, store: &mut ObjectStore, key: &[u8]) -> Result<Option<ObjectId>> {
        if self.lookup(store, key)?.is_none() {
            return Ok(None);
        }
        let Some(root_id) = self.materialize(store) else {
            return Ok(None);
        };
        match self.remove_from(store, root_id, key, true, 0)? {
            Removed::NotFound => Ok(None),
            Removed::InPlace(value, _) => Ok(Some(value)),
            Removed::Emptied(value) => {
                self.root = TreeRoot::Empty;
                Ok(Some(value))
            }
        }
    }

    fn remove_from(
        &self,
        store: &mut ObjectStore,
        id: ObjectId,
        key: &[u8],
        is_root: bool,
        depth: usize,
    ) -> Result<Removed> {
        match load_node(store, id, depth)? {
            NameTreeNode::Leaf(mut entries) => {
                let Ok(pos) = entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) else {
                    return Ok(Removed::NotFound);
                };
                let (_, value) = entries.remove(pos);
                let node = NameTreeNode::Leaf(entries);
                match node.range() {
                    None => {
                        store.free(id)?;
                        Ok(Removed::Emptied(value))
                    }
                    Some(range) => {
                        store.mutate(id, node.to_object(!is_root))?;
                        Ok(Removed::InPlace(value, range))
                    }
                }
            }
            NameTreeNode::Intermediate(mut kids) => {
                let i = kids.partition_point(|(_, r)| r.high.as_slice() < key);
                if !kids.get(i).is_some_and(|(_, r)| r.contains(key)) {
                    return Ok(Removed::NotFound);
                }
                let value = match self.remove_from(store, kids[i].0, key, false, depth + 1)? {
                    Removed::NotFound => return Ok(Removed::NotFound),
                    Removed::InPlace(value, range) => {
                        if kids[i].1 == range {
                            let node = NameTreeNode::Intermediate(kids);
                            let range = node
                                .range()
                                .ok_or_else(|| AttachError::malformed("empty intermediate node"))?;
                            return Ok(Removed::InPlace(value, range));
                        }
                        kids[i].1 = range;
                        value
                    }
                    Removed::Emptied(value) => {
                        kids.remove(i);
                        value
                    }
                };
                let node = NameTreeNode::Intermediate(kids);
                match node.range() {
                    None => {
                        store.free(id)?;
                        Ok(Removed::Emptied(value))
                    }
                    Some(range) => {
                        store.mutate(id, node.to_object(!is_root))?;
                        Ok(Removed::InPlace(value, range))
                    }
                }
            }
        }
    }
}

fn verify_node(
    store: &ObjectStore,
    id: Option<ObjectId>,
    dict: &Dictionary,
    depth: usize,
    previous: &mut Option<Vec<u8>>,
    visited: &mut BTreeSet<ObjectId>,
    faults: &mut Vec<TreeFault>,
) -> Option<KeyRange> {
    if depth > MAX_DEPTH {
        faults.push(TreeFault::BrokenNode {
            node: id,
            reason: "tree too deep".into(),
        });
        return None;
    }
    let raw = match read_raw(dict) {
        Ok(raw) => raw,
        Err(e) => {
            faults.push(TreeFault::BrokenNode {
                node: id,
                reason: e.to_string(),
            });
            return None;
        }
    };

    let mut low: Option<Vec<u8>> = None;
    let mut high: Option<Vec<u8>> = None;
    match raw {
        RawNode::Leaf(entries) => {
            for (key, _) in entries {
                if let Some(prev) = previous.as_deref() {
                    if prev == key.as_slice() {
                        faults.push(TreeFault::DuplicateKey(display_key(&key)));
                    } else if prev > key.as_slice() {
                        faults.push(TreeFault::OutOfOrder {
                            previous: display_key(prev),
                            key: display_key(&key),
                        });
                    }
                }
                low.get_or_insert_with(|| key.clone());
                high = Some(key.clone());
                *previous = Some(key);
            }
        }
        RawNode::Kids(kids) => {
            for kid in kids {
                if !visited.insert(kid) {
                    faults.push(TreeFault::BrokenNode {
                        node: Some(kid),
                        reason: "node reached twice".into(),
                    });
                    continue;
                }
                let kid_dict = match store.get_dict(kid) {
                    Ok(d) => d,
                    Err(e) => {
                        faults.push(TreeFault::BrokenNode {
                            node: Some(kid),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };
                let range = verify_node(
                    store,
                    Some(kid),
                    kid_dict,
                    depth + 1,
                    previous,
                    visited,
                    faults,
                );
                if let Some(range) = range {
                    if read_limits(kid_dict).is_some_and(|declared| declared != range) {
                        faults.push(TreeFault::BadLimits(kid));
                    }
                    low.get_or_insert(range.low);
                    high = Some(range.high);
                }
            }
        }
    }
    low.zip(high).map(|(low, high)| KeyRange { low, high })
}

// ── Iteration ─────────────────────────────────────────────────────────────────

enum Frame {
    Leaf {
        entries: Vec<(Vec<u8>, ObjectId)>,
        next: usize,
    },
    Kids {
        kids: Vec<ObjectId>,
        next: usize,
    },
}

impl From<RawNode> for Frame {
    fn from(raw: RawNode) -> Self {
        match raw {
            RawNode::Leaf(entries) => Frame::Leaf { entries, next: 0 },
            RawNode::Kids(kids) => Frame::Kids { kids, next: 0 },
        }
    }
}

/// Lazy in-order traversal returned by [`NameTree::iter`].
///
/// Yields an error and stops when a node cannot be decoded or is reached a
/// second time.
pub struct NameTreeIter<'a> {
    store: &'a ObjectStore,
    stack: Vec<Frame>,
    visited: BTreeSet<ObjectId>,
    pending_error: Option<AttachError>,
}

impl NameTreeIter<'_> {
    fn descend(&mut self, id: ObjectId) -> Result<Frame> {
        if self.stack.len() > MAX_DEPTH {
            return Err(AttachError::malformed("name tree is too deep"));
        }
        if !self.visited.insert(id) {
            return Err(AttachError::malformed(format!(
                "name tree node {} {} R reached twice",
                id.0, id.1
            )));
        }
        let dict = self.store.get_dict(id)?;
        read_raw(dict).map(Frame::from)
    }
}

impl Iterator for NameTreeIter<'_> {
    type Item = Result<(Vec<u8>, ObjectId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            self.stack.clear();
            return Some(Err(e));
        }
        loop {
            let kid = match self.stack.last_mut()? {
                Frame::Leaf { entries, next } => {
                    if let Some(item) = entries.get(*next) {
                        *next += 1;
                        return Some(Ok(item.clone()));
                    }
                    None
                }
                Frame::Kids { kids, next } => {
                    let kid = kids.get(*next).copied();
                    *next += 1;
                    kid
                }
            };
            match kid {
                None => {
                    self.stack.pop();
                }
                Some(id) => match self.descend(id) {
                    Ok(frame) => self.stack.push(frame),
                    Err(e) => {
                        self.stack.clear();
                        return Some(Err(e));
                    }
                },
            }
        }
    }
}

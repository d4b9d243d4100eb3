use crate::{AttachError, Result};
use lopdf::{Dictionary, Object, ObjectId};
use std::collections::{BTreeMap, BTreeSet};

/// Upper bound on reference hops followed by [`ObjectStore::deref`].
const MAX_DEREF_DEPTH: usize = 32;

// ── Revision entries ──────────────────────────────────────────────────────────

/// State of one object number within a revision.
#[derive(Debug, Clone)]
pub enum Slot {
    InUse(Object),
    Free,
}

/// An object number's entry in one revision.
///
/// For a [`Slot::Free`] entry `generation` is the generation a reader would
/// have to use if the number were ever reused, i.e. the freed generation + 1.
#[derive(Debug, Clone)]
pub struct Entry {
    pub generation: u16,
    pub slot: Slot,
}

impl Entry {
    pub fn object(&self) -> Option<&Object> {
        match &self.slot {
            Slot::InUse(obj) => Some(obj),
            Slot::Free => None,
        }
    }
}

/// The objects created, mutated or freed by one append-only update.
#[derive(Debug, Clone, Default)]
pub struct Revision {
    entries: BTreeMap<u32, Entry>,
}

impl Revision {
    pub fn entries(&self) -> impl Iterator<Item = (u32, &Entry)> {
        self.entries.iter().map(|(n, e)| (*n, e))
    }

    pub fn get(&self, number: u32) -> Option<&Entry> {
        self.entries.get(&number)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Position in the revision stack captured by [`ObjectStore::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionMarker(usize);

/// Result of walking every reference reachable from the trailer.
#[derive(Debug, Default)]
pub struct ReferenceWalk {
    pub reachable: BTreeSet<ObjectId>,
    /// `(holder, target)` pairs; `holder` is `None` for the trailer itself.
    pub broken: Vec<(Option<ObjectId>, ObjectId)>,
}

// ── ObjectStore ───────────────────────────────────────────────────────────────

/// Arena of indirect objects layered as a stack of revisions.
///
/// Revision 0 is the parsed document. Every later revision holds only the
/// entries one committed update touched; lookups walk from the pending
/// revision down to revision 0 and the first entry found wins. History is
/// never edited: [`ObjectStore::rollback`] only drops revisions pushed after
/// the marker.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    revisions: Vec<Revision>,
    pending: Option<Revision>,
    next_number: u32,
    trailer: Dictionary,
    version: String,
}

impl ObjectStore {
    /// An empty store with no objects and an empty trailer.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            revisions: vec![Revision::default()],
            pending: None,
            next_number: 1,
            trailer: Dictionary::new(),
            version: version.into(),
        }
    }

    /// Take ownership of a parsed document's objects as the base revision.
    pub fn from_document(document: lopdf::Document) -> Self {
        let declared_size = document
            .trailer
            .get(b"Size")
            .and_then(Object::as_i64)
            .ok()
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);

        let mut base = Revision::default();
        for ((number, generation), object) in document.objects {
            base.entries.insert(
                number,
                Entry {
                    generation,
                    slot: Slot::InUse(object),
                },
            );
        }

        let highest = base.entries.keys().next_back().copied().unwrap_or(0);
        let next_number = highest
            .max(document.max_id)
            .saturating_add(1)
            .max(declared_size)
            .max(1);

        Self {
            revisions: vec![base],
            pending: None,
            next_number,
            trailer: document.trailer,
            version: document.version,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    #[cfg(test)]
    pub(crate) fn trailer_mut(&mut self) -> &mut Dictionary {
        &mut self.trailer
    }

    /// One past the highest object number ever handed out (the `/Size`).
    pub fn size(&self) -> u32 {
        self.next_number
    }

    // ── Lookup ────────────────────────────────────────────────────────────────

    /// The latest entry for `number`, pending revision included.
    pub fn entry(&self, number: u32) -> Option<&Entry> {
        self.pending
            .iter()
            .chain(self.revisions.iter().rev())
            .find_map(|rev| rev.get(number))
    }

    /// Dereference `id` through the revision stack.
    pub fn resolve(&self, id: ObjectId) -> Result<&Object> {
        match self.entry(id.0) {
            Some(Entry {
                generation,
                slot: Slot::InUse(obj),
            }) if *generation == id.1 => Ok(obj),
            _ => Err(AttachError::broken(id)),
        }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.resolve(id).is_ok()
    }

    /// Follow `obj` through indirect references until a direct value is reached.
    pub fn deref<'a>(&'a self, obj: &'a Object) -> Result<&'a Object> {
        let mut current = obj;
        for _ in 0..MAX_DEREF_DEPTH {
            match current {
                Object::Reference(id) => current = self.resolve(*id)?,
                other => return Ok(other),
            }
        }
        Err(AttachError::malformed("reference chain too long"))
    }

    /// Resolve `id` and require a dictionary (a stream's dictionary also counts).
    pub fn get_dict(&self, id: ObjectId) -> Result<&Dictionary> {
        match self.resolve(id)? {
            Object::Dictionary(dict) => Ok(dict),
            Object::Stream(stream) => Ok(&stream.dict),
            _ => Err(AttachError::malformed(format!(
                "object {} {} R is not a dictionary",
                id.0, id.1
            ))),
        }
    }

    /// The `/Root` reference from the trailer.
    pub fn root(&self) -> Result<ObjectId> {
        self.trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|_| AttachError::InvalidPdf("trailer has no /Root reference".into()))
    }

    pub fn catalog(&self) -> Result<&Dictionary> {
        let root = self.root()?;
        self.get_dict(root)
    }

    /// Every in-use object visible at the top of the stack, keyed by number.
    pub fn live_objects(&self) -> BTreeMap<u32, (u16, &Object)> {
        let mut seen: BTreeMap<u32, Option<(u16, &Object)>> = BTreeMap::new();
        for rev in self.pending.iter().chain(self.revisions.iter().rev()) {
            for (number, entry) in rev.entries() {
                seen.entry(number)
                    .or_insert_with(|| entry.object().map(|o| (entry.generation, o)));
            }
        }
        seen.into_iter()
            .filter_map(|(n, live)| live.map(|l| (n, l)))
            .collect()
    }

    /// Walk every reference reachable from the trailer.
    pub fn walk_references(&self) -> ReferenceWalk {
        let mut walk = ReferenceWalk::default();
        let mut stack: Vec<(Option<ObjectId>, ObjectId)> = Vec::new();

        let mut roots = Vec::new();
        for (_, value) in self.trailer.iter() {
            collect_references(value, &mut roots);
        }
        stack.extend(roots.into_iter().map(|id| (None, id)));

        while let Some((holder, id)) = stack.pop() {
            if walk.reachable.contains(&id) {
                continue;
            }
            match self.resolve(id) {
                Ok(obj) => {
                    walk.reachable.insert(id);
                    let mut refs = Vec::new();
                    collect_references(obj, &mut refs);
                    stack.extend(refs.into_iter().map(|r| (Some(id), r)));
                }
                Err(_) => walk.broken.push((holder, id)),
            }
        }

        walk
    }

    // ── Mutation ──────────────────────────────────────────────────────────────

    /// Open the pending revision if none is open and return the marker to
    /// roll back to.
    pub fn begin(&mut self) -> RevisionMarker {
        self.pending.get_or_insert_with(Revision::default);
        RevisionMarker(self.revisions.len())
    }

    fn pending_mut(&mut self) -> &mut Revision {
        self.pending.get_or_insert_with(Revision::default)
    }

    /// Store `object` under a fresh number in the pending revision.
    ///
    /// Numbers are never handed out twice by one store, even after the
    /// object is freed or the revision is rolled back.
    pub fn allocate(&mut self, object: Object) -> ObjectId {
        let number = self.next_number;
        self.next_number += 1;
        self.pending_mut().entries.insert(
            number,
            Entry {
                generation: 0,
                slot: Slot::InUse(object),
            },
        );
        (number, 0)
    }

    /// Replace the value visible for `id` without changing its identity.
    pub fn mutate(&mut self, id: ObjectId, object: Object) -> Result<()> {
        self.resolve(id)?;
        self.pending_mut().entries.insert(
            id.0,
            Entry {
                generation: id.1,
                slot: Slot::InUse(object),
            },
        );
        Ok(())
    }

    /// Mark `id` free in the pending revision. Earlier revisions keep their data.
    pub fn free(&mut self, id: ObjectId) -> Result<()> {
        self.resolve(id)?;
        self.pending_mut().entries.insert(
            id.0,
            Entry {
                generation: id.1.saturating_add(1),
                slot: Slot::Free,
            },
        );
        Ok(())
    }

    // ── Revision stack ────────────────────────────────────────────────────────

    pub fn pending(&self) -> Option<&Revision> {
        self.pending.as_ref()
    }

    pub fn has_pending_changes(&self) -> bool {
        self.pending.as_ref().is_some_and(|rev| !rev.is_empty())
    }

    /// Push the pending revision onto the stack. Returns its index, or `None`
    /// when nothing was pending.
    pub fn commit(&mut self) -> Option<usize> {
        let rev = self.pending.take()?;
        if rev.is_empty() {
            return None;
        }
        self.revisions.push(rev);
        Some(self.revisions.len() - 1)
    }

    /// Discard the pending revision and anything committed after `marker`.
    pub fn rollback(&mut self, marker: RevisionMarker) {
        self.pending = None;
        self.revisions.truncate(marker.0.max(1));
    }

    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    pub fn revision_count(&self) -> usize {
        self.revisions.len()
    }
}

/// Append every indirect reference held anywhere inside `obj`.
pub(crate) fn collect_references(obj: &Object, out: &mut Vec<ObjectId>) {
    match obj {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => items.iter().for_each(|o| collect_references(o, out)),
        Object::Dictionary(dict) => dict.iter().for_each(|(_, v)| collect_references(v, out)),
        Object::Stream(stream) => stream
            .dict
            .iter()
            .for_each(|(_, v)| collect_references(v, out)),
        _ => {}
    }
}

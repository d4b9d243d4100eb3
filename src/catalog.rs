//! Catalog plumbing: where the `/EmbeddedFiles` name tree hangs and the
//! optional portfolio `/Collection` dictionary.

use crate::name_tree::NameTree;
use crate::pdf_utils::text_object;
use crate::store::ObjectStore;
use crate::{AttachError, Result};
use lopdf::{Dictionary, Object, ObjectId};

/// Initial presentation of a portfolio (`/Collection /View`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionView {
    /// `/D`: a details list of the attachments.
    #[default]
    Details,
    /// `/T`: tiles.
    Tile,
    /// `/H`: collection hidden, first document shown.
    Hidden,
}

impl CollectionView {
    fn name(self) -> &'static [u8] {
        match self {
            CollectionView::Details => b"D",
            CollectionView::Tile => b"T",
            CollectionView::Hidden => b"H",
        }
    }

    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"D" => Some(CollectionView::Details),
            b"T" => Some(CollectionView::Tile),
            b"H" => Some(CollectionView::Hidden),
            _ => None,
        }
    }
}

/// Open the `/Names/EmbeddedFiles` tree; a missing entry is an empty tree.
pub(crate) fn embedded_files_tree(store: &ObjectStore, fan_out: usize) -> Result<NameTree> {
    let catalog = store.catalog()?;
    let names = match catalog.get(b"Names") {
        Ok(value) => store
            .deref(value)?
            .as_dict()
            .map_err(|_| AttachError::malformed("catalog /Names is not a dictionary"))?,
        Err(_) => return Ok(NameTree::new(None, fan_out)),
    };

    match names.get(b"EmbeddedFiles") {
        Err(_) | Ok(Object::Null) => Ok(NameTree::new(None, fan_out)),
        Ok(Object::Reference(id)) => Ok(NameTree::new(Some(*id), fan_out)),
        Ok(Object::Dictionary(dict)) => Ok(NameTree::inline(dict.clone(), fan_out)),
        Ok(_) => Err(AttachError::malformed(
            "/Names/EmbeddedFiles is not a dictionary",
        )),
    }
}

/// Point `/Names/EmbeddedFiles` at `root`, or drop the entry for `None`.
/// Nothing is written when the entry already says so.
pub(crate) fn set_embedded_files(store: &mut ObjectStore, root: Option<ObjectId>) -> Result<()> {
    let catalog_id = store.root()?;
    let mut catalog = store.catalog()?.clone();

    match catalog.get(b"Names") {
        Ok(Object::Reference(names_id)) => {
            let names_id = *names_id;
            let mut names = store.get_dict(names_id)?.clone();
            if point_at(&mut names, root) {
                store.mutate(names_id, Object::Dictionary(names))?;
            }
        }
        Ok(Object::Dictionary(names)) => {
            let mut names = names.clone();
            if !point_at(&mut names, root) {
                return Ok(());
            }
            if names.is_empty() {
                catalog.remove(b"Names");
            } else {
                catalog.set("Names", Object::Dictionary(names));
            }
            store.mutate(catalog_id, Object::Dictionary(catalog))?;
        }
        _ => {
            let Some(root) = root else {
                return Ok(());
            };
            let mut names = Dictionary::new();
            names.set("EmbeddedFiles", Object::Reference(root));
            catalog.set("Names", Object::Dictionary(names));
            store.mutate(catalog_id, Object::Dictionary(catalog))?;
        }
    }
    Ok(())
}

/// Returns `true` if `names` was changed.
fn point_at(names: &mut Dictionary, root: Option<ObjectId>) -> bool {
    let current = names
        .get(b"EmbeddedFiles")
        .ok()
        .map(|o| o.as_reference().ok());
    match (current, root) {
        (Some(Some(id)), Some(root)) if id == root => false,
        (None, None) => false,
        (_, Some(root)) => {
            names.set("EmbeddedFiles", Object::Reference(root));
            true
        }
        (Some(_), None) => {
            names.remove(b"EmbeddedFiles");
            true
        }
    }
}

/// Mark the document as a portfolio, or drop `/Collection` for `None`.
pub(crate) fn set_collection(store: &mut ObjectStore, view: Option<CollectionView>) -> Result<()> {
    let catalog_id = store.root()?;
    let mut catalog = store.catalog()?.clone();

    match view {
        Some(view) => {
            if collection_view(store) == Some(view) {
                return Ok(());
            }
            catalog.set("Collection", Object::Dictionary(collection_dictionary(view)));
        }
        None => {
            if catalog.remove(b"Collection").is_none() {
                return Ok(());
            }
        }
    }
    store.mutate(catalog_id, Object::Dictionary(catalog))
}

/// Collection schema with a single file-name field, sorted ascending.
fn collection_dictionary(view: CollectionView) -> Dictionary {
    let mut field = Dictionary::new();
    field.set("Type", Object::Name(b"CollectionField".to_vec()));
    field.set("Subtype", Object::Name(b"F".to_vec()));
    field.set("N", text_object("Name"));
    field.set("O", Object::Integer(0));

    let mut schema = Dictionary::new();
    schema.set("Type", Object::Name(b"CollectionSchema".to_vec()));
    schema.set("FileName", Object::Dictionary(field));

    let mut sort = Dictionary::new();
    sort.set("Type", Object::Name(b"CollectionSort".to_vec()));
    sort.set("S", Object::Name(b"FileName".to_vec()));
    sort.set("A", Object::Boolean(true));

    let mut collection = Dictionary::new();
    collection.set("Type", Object::Name(b"Collection".to_vec()));
    collection.set("View", Object::Name(view.name().to_vec()));
    collection.set("Schema", Object::Dictionary(schema));
    collection.set("Sort", Object::Dictionary(sort));
    collection
}

/// `/Collection /View` of the catalog, if the document is a portfolio.
pub(crate) fn collection_view(store: &ObjectStore) -> Option<CollectionView> {
    let catalog = store.catalog().ok()?;
    let collection = store.deref(catalog.get(b"Collection").ok()?).ok()?.as_dict().ok()?;
    match collection.get(b"View") {
        Ok(view) => CollectionView::from_name(view.as_name().ok()?),
        Err(_) => Some(CollectionView::Details),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_catalog() -> ObjectStore {
        let mut store = ObjectStore::new("1.7");
        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        let root = store.allocate(Object::Dictionary(catalog));
        store.trailer_mut().set("Root", Object::Reference(root));
        store.commit();
        store
    }

    #[test]
    fn missing_names_is_empty_tree() {
        let store = store_with_catalog();
        let tree = embedded_files_tree(&store, 16).unwrap();
        assert!(tree.root().is_none());
        assert!(tree.is_empty(&store).unwrap());
    }

    #[test]
    fn setting_and_clearing_root_round_trips() {
        let mut store = store_with_catalog();
        let leaf = store.allocate(Object::Dictionary(Dictionary::new()));
        set_embedded_files(&mut store, Some(leaf)).unwrap();
        assert_eq!(embedded_files_tree(&store, 16).unwrap().root(), Some(leaf));

        set_embedded_files(&mut store, None).unwrap();
        assert!(store.catalog().unwrap().get(b"Names").is_err());
    }

    #[test]
    fn unchanged_root_writes_nothing() {
        let mut store = store_with_catalog();
        let leaf = store.allocate(Object::Dictionary(Dictionary::new()));
        set_embedded_files(&mut store, Some(leaf)).unwrap();
        store.commit();
        set_embedded_files(&mut store, Some(leaf)).unwrap();
        assert!(!store.has_pending_changes());
    }

    #[test]
    fn collection_view_round_trips() {
        let mut store = store_with_catalog();
        assert_eq!(collection_view(&store), None);
        set_collection(&mut store, Some(CollectionView::Tile)).unwrap();
        assert_eq!(collection_view(&store), Some(CollectionView::Tile));
        set_collection(&mut store, None).unwrap();
        assert_eq!(collection_view(&store), None);
    }
}

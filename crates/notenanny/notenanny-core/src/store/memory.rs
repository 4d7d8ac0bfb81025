use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use anyhow::{Result, bail};

use super::{DocumentQuery, DocumentStore, WriteBack};
use crate::document::Document;

/// Notes kept in memory. Clones share the same notes, so one handle can be
/// given to the scanner as store and write-back while another inspects it.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    docs: Rc<RefCell<BTreeMap<String, Document>>>,
    writes: Rc<RefCell<Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, doc: Document) {
        self.docs.borrow_mut().insert(doc.id.clone(), doc);
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.docs.borrow().get(id).cloned()
    }

    /// Ids written back so far, in order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.borrow().clone()
    }
}

impl DocumentStore for MemoryStore {
    fn query(&mut self, query: &DocumentQuery) -> Result<Vec<Document>> {
        Ok(self
            .docs
            .borrow()
            .values()
            .filter(|doc| query.matches(doc))
            .cloned()
            .collect())
    }
}

impl WriteBack for MemoryStore {
    fn replace_text(&mut self, doc: &Document, text: &str) -> Result<()> {
        let mut docs = self.docs.borrow_mut();
        let Some(stored) = docs.get_mut(&doc.id) else {
            bail!("no note with id {}", doc.id);
        };
        // Writing is an edit: the note must look newer than anything seen.
        let modified = SystemTime::now().max(stored.modified + Duration::from_millis(1));
        let trashed = stored.trashed;
        *stored = Document::from_text(doc.id.clone(), text, modified);
        stored.trashed = trashed;
        self.writes.borrow_mut().push(doc.id.clone());
        Ok(())
    }
}

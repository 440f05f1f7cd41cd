use std::sync::Arc;

use super::{ClientClass, Export};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The export set, partitioned into client-specification priority classes.
///
/// Within a class exports keep their insertion order; resolution scans the
/// classes in fixed priority order, so a match in an earlier class always
/// wins over later classes.
#[derive(Debug, Default)]
pub struct ExportTable {
    classes: [Vec<Arc<Export>>; ClientClass::COUNT],
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExportTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an export to the class its client specification dictates.
    pub fn insert(&mut self, export: Export) -> Arc<Export> {
        let class = export.get_client().class();
        let export = Arc::new(export);
        self.classes[class as usize].push(Arc::clone(&export));
        export
    }

    /// Iterates every export in class-priority order, then insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (ClientClass, &Arc<Export>)> {
        ClientClass::ALL
            .iter()
            .flat_map(move |&class| self.classes[class as usize].iter().map(move |e| (class, e)))
    }

    /// Number of exports across all classes.
    pub fn len(&self) -> usize {
        self.classes.iter().map(Vec::len).sum()
    }

    /// True when the table holds no exports.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;

/// Interns read-group names to dense integer ids.
#[derive(Debug, Clone, Default)]
pub struct ReadGroupDatabase {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl ReadGroupDatabase {
    /// Empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `name`, returning its id (existing id if already present).
    pub fn insert(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    /// Id of `name`, if interned.
    pub fn id(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    /// Name for `id`.
    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut db = ReadGroupDatabase::new();
        assert_eq!(db.insert("rg1"), 0);
        assert_eq!(db.insert("rg2"), 1);
        assert_eq!(db.insert("rg1"), 0);
        assert_eq!(db.len(), 2);
        assert_eq!(db.name(1), Some("rg2"));
        assert_eq!(db.id("rg3"), None);
    }
}

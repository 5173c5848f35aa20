//! Entity identifier <-> matrix row bijection.

use crate::types::error::{LinkerError, Result};
use std::collections::HashMap;

/// Bijection between entity identifiers and dense row indices `[0, N)`.
///
/// Built once per run and immutable afterwards. Row `i` of the embedding
/// matrix holds the vector of `entity(i)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityIndexMap {
    /// Identifier by row
    entities: Vec<String>,

    /// Row by identifier
    rows: HashMap<String, u32>,
}

impl EntityIndexMap {
    /// Build from identifiers in row order.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::InvalidMapping` on duplicate identifiers or if
    /// the count does not fit in `u32`.
    pub fn from_ordered(entities: Vec<String>) -> Result<Self> {
        if entities.len() > u32::MAX as usize {
            return Err(LinkerError::InvalidMapping(format!(
                "{} entities exceed the u32 row range",
                entities.len()
            )));
        }

        let mut rows = HashMap::with_capacity(entities.len());
        for (row, entity) in entities.iter().enumerate() {
            if let Some(first) = rows.insert(entity.clone(), row as u32) {
                return Err(LinkerError::InvalidMapping(format!(
                    "duplicate entity '{}' at rows {} and {}",
                    entity, first, row
                )));
            }
        }

        Ok(Self { entities, rows })
    }

    /// Build from an identifier -> row assignment.
    ///
    /// The assigned rows must cover `[0, N)` exactly once.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::InvalidMapping` if any row is out of range,
    /// shared, or left unmapped.
    pub fn from_assignments(assignments: HashMap<String, u32>) -> Result<Self> {
        let n = assignments.len();
        let mut slots: Vec<Option<String>> = vec![None; n];

        for (entity, row) in &assignments {
            let slot = slots.get_mut(*row as usize).ok_or_else(|| {
                LinkerError::InvalidMapping(format!(
                    "entity '{}' maps to row {} outside [0, {})",
                    entity, row, n
                ))
            })?;
            if let Some(other) = slot.as_ref() {
                return Err(LinkerError::InvalidMapping(format!(
                    "entities '{}' and '{}' share row {}",
                    other, entity, row
                )));
            }
            *slot = Some(entity.clone());
        }

        // n distinct in-range rows over n slots leaves no gaps
        let entities = slots.into_iter().flatten().collect();
        Ok(Self {
            entities,
            rows: assignments,
        })
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if the mapping holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Identifier at `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row >= len()`.
    pub fn entity(&self, row: u32) -> &str {
        &self.entities[row as usize]
    }

    /// Row of `entity`, if mapped.
    pub fn row_of(&self, entity: &str) -> Option<u32> {
        self.rows.get(entity).copied()
    }

    /// Identifiers in row order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_ordered_is_bijective() {
        let map = EntityIndexMap::from_ordered(names(&["a", "b", "c"])).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.entity(1), "b");
        assert_eq!(map.row_of("c"), Some(2));
        assert_eq!(map.row_of("z"), None);
        assert_eq!(map.iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_from_ordered_rejects_duplicates() {
        let err = EntityIndexMap::from_ordered(names(&["a", "b", "a"])).unwrap_err();
        assert!(matches!(err, LinkerError::InvalidMapping(_)));
    }

    #[test]
    fn test_from_assignments_matches_ordered() {
        let assignments: HashMap<String, u32> =
            [("x".to_string(), 1), ("y".to_string(), 0)].into_iter().collect();
        let map = EntityIndexMap::from_assignments(assignments).unwrap();
        assert_eq!(map, EntityIndexMap::from_ordered(names(&["y", "x"])).unwrap());
    }

    #[test]
    fn test_from_assignments_rejects_gaps_and_collisions() {
        let gap: HashMap<String, u32> =
            [("x".to_string(), 0), ("y".to_string(), 2)].into_iter().collect();
        assert!(EntityIndexMap::from_assignments(gap).is_err());

        let shared: HashMap<String, u32> =
            [("x".to_string(), 0), ("y".to_string(), 0)].into_iter().collect();
        assert!(EntityIndexMap::from_assignments(shared).is_err());
    }
}

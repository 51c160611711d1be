//! Static lookup table of known operators, independent of any one ceremony's
//! [`OperatorSet`](crate::types::OperatorSet).
//!
//! The directory is the thing an initiator or operator loads once at startup
//! (from wherever its out-of-scope configuration layer gets it from) and then
//! clones per ceremony, never shares live: each [`crate::instance::Instance`]
//! owns its own snapshot so a directory reload never mutates a ceremony mid-flight.

use crate::types::{OperatorId, OperatorRecord};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable, cheaply cloneable table of operator identity records.
#[derive(Debug, Clone, Default)]
pub struct OperatorDirectory {
    by_id: Arc<HashMap<OperatorId, OperatorRecord>>,
}

impl OperatorDirectory {
    pub fn new(records: Vec<OperatorRecord>) -> Self {
        let by_id = records.into_iter().map(|r| (r.id, r)).collect();
        Self {
            by_id: Arc::new(by_id),
        }
    }

    /// Look up an operator or fail with [`Error::UnknownOperator`].
    pub fn require(&self, id: OperatorId) -> Result<&OperatorRecord> {
        self.by_id.get(&id).ok_or(Error::UnknownOperator(id))
    }

    pub fn get(&self, id: OperatorId) -> Option<&OperatorRecord> {
        self.by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperatorRecord> {
        self.by_id.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: OperatorId) -> OperatorRecord {
        OperatorRecord {
            id,
            rsa_pub_der: vec![],
            endpoint: format!("https://op{id}.example/"),
        }
    }

    #[test]
    fn require_fails_for_unknown_operator() {
        let dir = OperatorDirectory::new(vec![op(1), op(2)]);
        assert!(dir.require(1).is_ok());
        match dir.require(99) {
            Err(Error::UnknownOperator(99)) => {}
            other => panic!("expected UnknownOperator(99), got {other:?}"),
        }
    }

    #[test]
    fn clone_is_cheap_and_independent() {
        let dir = OperatorDirectory::new(vec![op(1)]);
        let cloned = dir.clone();
        assert_eq!(cloned.len(), 1);
        drop(dir);
        assert!(cloned.require(1).is_ok());
    }
}

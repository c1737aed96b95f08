//! Edges between entities.

use serde::{Deserialize, Serialize};

/// How an edge's rows are found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeJoin {
    /// This entity holds the target's id in `local_column` (to-one).
    Owned { local_column: String },
    /// The target holds this entity's id in `remote_column` (to-many).
    Inverse { remote_column: String },
}

/// A named edge from one entity kind to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDef {
    pub name: String,
    pub target: String,
    pub join: EdgeJoin,
}

impl EdgeDef {
    /// Edge following a column on this entity to the target's id.
    pub fn owned(
        name: impl Into<String>,
        target: impl Into<String>,
        local_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            join: EdgeJoin::Owned {
                local_column: local_column.into(),
            },
        }
    }

    /// Edge collecting target rows whose column references this entity.
    pub fn inverse(
        name: impl Into<String>,
        target: impl Into<String>,
        remote_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            join: EdgeJoin::Inverse {
                remote_column: remote_column.into(),
            },
        }
    }
}

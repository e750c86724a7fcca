//! Idempotent merge patterns.
//!
//! A [`MergePattern`] is a small, declarative "create if absent" write over
//! several nodes and edges. Aliases name nodes within the pattern; every
//! value travels in [`Params`], never in the pattern itself, so rendering a
//! pattern (its `Display`) only ever shows `$param` placeholders.
//!
//! Evaluation order:
//!
//! 1. the optional anchor is matched (it must exist);
//! 2. nodes are merged in order, each binding its alias;
//! 3. edges are merged in order between bound aliases.
//!
//! Repeating a merge with identical parameters binds the same nodes and
//! creates nothing.

use std::collections::BTreeMap;
use std::fmt;

use typegraph_types::{Properties, Value};

use crate::NodeId;

/// A query parameter: a scalar or a property map.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Value(Value),
    Map(Properties),
}

impl From<Value> for Param {
    fn from(v: Value) -> Self {
        Param::Value(v)
    }
}

impl From<Properties> for Param {
    fn from(m: Properties) -> Self {
        Param::Map(m)
    }
}

pub type Params = BTreeMap<String, Param>;

/// An existing node the pattern hangs off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeAnchor {
    pub alias: String,
    pub label: String,
    pub key: String,
    /// Scalar parameter holding the key value.
    pub param: String,
}

/// How a merged node is recognised as already present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeIdentity {
    /// A node with the label whose `key` equals the props' `key`.
    Key { key: String },
    /// A node with an outgoing `rel_type` edge to the bound `target` whose
    /// `key` equals the props' `key`.
    Edge {
        rel_type: String,
        target: String,
        key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeNode {
    pub alias: String,
    pub label: Option<String>,
    /// Map parameter with the node's properties, applied on create only.
    pub props_param: String,
    pub identity: NodeIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeEdge {
    pub from: String,
    pub rel_type: String,
    pub to: String,
    /// Map parameter with the edge properties; an existing edge is reused
    /// only if its properties equal these.
    pub props_param: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePattern {
    pub anchor: Option<MergeAnchor>,
    pub nodes: Vec<MergeNode>,
    pub edges: Vec<MergeEdge>,
}

impl MergePattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self, alias: &str) -> bool {
        self.anchor.as_ref().is_some_and(|a| a.alias == alias)
            || self.nodes.iter().any(|n| n.alias == alias)
    }

    /// Names of every parameter the pattern reads.
    pub fn parameter_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        if let Some(anchor) = &self.anchor {
            names.push(&anchor.param);
        }
        names.extend(self.nodes.iter().map(|n| n.props_param.as_str()));
        names.extend(self.edges.iter().filter_map(|e| e.props_param.as_deref()));
        names
    }
}

impl fmt::Display for MergePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        if let Some(a) = &self.anchor {
            lines.push(format!(
                "MATCH ({}:{} {{{}: ${}}})",
                a.alias, a.label, a.key, a.param
            ));
        }
        for n in &self.nodes {
            let label = n.label.as_ref().map(|l| format!(":{l}")).unwrap_or_default();
            let head = match &n.identity {
                NodeIdentity::Key { key } => {
                    format!("MERGE ({}{label} {{{key}: ${}.{key}}})", n.alias, n.props_param)
                }
                NodeIdentity::Edge {
                    rel_type,
                    target,
                    key,
                } => format!(
                    "MERGE ({}{label} {{{key}: ${}.{key}}})-[:{rel_type}]->({target})",
                    n.alias, n.props_param
                ),
            };
            lines.push(format!("{head} ON CREATE SET {} = ${}", n.alias, n.props_param));
        }
        for e in &self.edges {
            let props = e
                .props_param
                .as_ref()
                .map(|p| format!(" ${p}"))
                .unwrap_or_default();
            lines.push(format!(
                "MERGE ({})-[:{}{props}]->({})",
                e.from, e.rel_type, e.to
            ));
        }
        write!(f, "{}", lines.join("\n"))
    }
}

/// What a merge did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub bound: BTreeMap<String, NodeId>,
    pub created_nodes: usize,
    pub created_edges: usize,
}

impl MergeOutcome {
    pub fn created_anything(&self) -> bool {
        self.created_nodes > 0 || self.created_edges > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering_only_shows_placeholders() {
        let pattern = MergePattern {
            anchor: Some(MergeAnchor {
                alias: "ts".into(),
                label: "TypeSystem".into(),
                key: "id".into(),
                param: "ts_id".into(),
            }),
            nodes: vec![MergeNode {
                alias: "type_0".into(),
                label: Some("PersistableType".into()),
                props_param: "type_0_props".into(),
                identity: NodeIdentity::Key { key: "id".into() },
            }],
            edges: vec![MergeEdge {
                from: "ts".into(),
                rel_type: "DEFINES".into(),
                to: "type_0".into(),
                props_param: None,
            }],
        };
        let text = pattern.to_string();
        assert_eq!(
            text,
            "MATCH (ts:TypeSystem {id: $ts_id})\n\
             MERGE (type_0:PersistableType {id: $type_0_props.id}) ON CREATE SET type_0 = $type_0_props\n\
             MERGE (ts)-[:DEFINES]->(type_0)"
        );
        assert_eq!(pattern.parameter_names(), vec!["ts_id", "type_0_props"]);
    }
}

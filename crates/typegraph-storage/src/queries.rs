//! Query fragments.
//!
//! Fragments are structured values that the manager executes against a
//! [`GraphStore`](typegraph_store::GraphStore); their rendered text is for
//! logs and diagnostics and only ever shows `$param` placeholders.

use typegraph_store::{Param, Params};
use typegraph_types::{Properties, Value};

/// Match a single node by an indexed `(label, key)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLookup {
    pub alias: String,
    pub label: String,
    pub key: String,
    pub value: Value,
}

impl NodeLookup {
    pub fn param_name(&self) -> String {
        format!("{}_{}", self.alias, self.key)
    }

    pub fn pattern(&self) -> String {
        format!(
            "({}:{} {{{}: ${}}})",
            self.alias,
            self.label,
            self.key,
            self.param_name()
        )
    }

    fn with_alias(mut self, alias: String) -> Self {
        self.alias = alias;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchClause {
    Node(NodeLookup),
    Relationship {
        alias: String,
        rel_type: String,
        start: NodeLookup,
        end: NodeLookup,
    },
}

impl MatchClause {
    pub fn relationship(alias: &str, rel_type: String, start: NodeLookup, end: NodeLookup) -> Self {
        MatchClause::Relationship {
            alias: alias.to_string(),
            rel_type,
            start: start.with_alias(format!("{alias}__start")),
            end: end.with_alias(format!("{alias}__end")),
        }
    }

    pub fn text(&self) -> String {
        match self {
            MatchClause::Node(lookup) => lookup.pattern(),
            MatchClause::Relationship {
                alias,
                rel_type,
                start,
                end,
            } => format!(
                "{}, {}, ({})-[{alias}:{rel_type}]->({})",
                start.pattern(),
                end.pattern(),
                start.alias,
                end.alias
            ),
        }
    }

    pub fn params(&self) -> Params {
        let mut params = Params::new();
        let mut add = |lookup: &NodeLookup| {
            params.insert(lookup.param_name(), Param::Value(lookup.value.clone()));
        };
        match self {
            MatchClause::Node(lookup) => add(lookup),
            MatchClause::Relationship { start, end, .. } => {
                add(start);
                add(end);
            }
        }
        params
    }
}

/// A relationship to be created between two matched nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRelationship {
    pub start: NodeLookup,
    pub end: NodeLookup,
    pub rel_type: String,
    pub properties: Properties,
}

impl CreateRelationship {
    pub fn text(&self) -> String {
        format!(
            "MATCH {}, {}\nCREATE ({})-[:{} {}]->({})",
            self.start.pattern(),
            self.end.pattern(),
            self.start.alias,
            self.rel_type,
            parameter_map(&self.properties, "rel_props"),
            self.end.alias
        )
    }

    pub fn params(&self) -> Params {
        let mut params = Params::new();
        params.insert(self.start.param_name(), Param::Value(self.start.value.clone()));
        params.insert(self.end.param_name(), Param::Value(self.end.value.clone()));
        params.insert("rel_props".to_string(), Param::Map(self.properties.clone()));
        params
    }
}

/// `{a: $name.a, b: $name.b}` for the keys of `data`.
pub fn parameter_map(data: &Properties, name: &str) -> String {
    let items: Vec<String> = data.keys().map(|k| format!("{k}: ${name}.{k}")).collect();
    format!("{{{}}}", items.join(", "))
}

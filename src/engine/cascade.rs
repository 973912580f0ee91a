//! The cascade table: for every (mutation, root kind) pair, the fixed order in which dependent
//! layers are deleted before the root layer itself is mutated.
//!
//! Chains are written out by hand, not derived at runtime. [`CascadeTable::verify`] checks them
//! against the reference graph of [`EntityKind::references`] so that a chain can never delete a
//! kind while something later in the same chain still points at it.
//!
//! Dependents are found with one SQL prelude per chain step. Every prelude defines the same family
//! of derived id sets (`r_databases`, `r_nodes`, ...), seeded by the root ids at the root's kind and
//! derived from live join rows for everything downstream of it. Because the derivations read live
//! state and chains run most-downstream first, the sets a step depends on are still intact when
//! that step is resolved.

use once_cell::sync::Lazy;
use petgraph::{graph::DiGraph, visit::Dfs};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{error::EngineError, model::EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Mutation {
    Delete,
    /// Material edit of the root entities. Only snapshot kinds and their results are invalidated,
    /// including snapshots over collections that hold an edited node.
    Edit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeChain {
    pub mutation: Mutation,
    pub root: EntityKind,
    /// Dependent kinds, most-downstream first. The root itself is never listed.
    pub steps: Vec<EntityKind>,
}

pub static CASCADE_TABLE: Lazy<CascadeTable> = Lazy::new(CascadeTable::standard);

/// Derived id sets in dependency order, leaves first.
const DERIVED_SETS: [(EntityKind, &str); 12] = [
    (EntityKind::DatabaseType, "r_database_types"),
    (EntityKind::Database, "r_databases"),
    (EntityKind::DatabaseField, "r_fields"),
    (EntityKind::Role, "r_roles"),
    (EntityKind::User, "r_users"),
    (EntityKind::Node, "r_nodes"),
    (EntityKind::Edge, "r_edges"),
    (EntityKind::NodeCollection, "r_collections"),
    (EntityKind::Network, "r_networks"),
    (EntityKind::Analysis, "r_analyses"),
    (EntityKind::ControlPath, "r_control_paths"),
    (EntityKind::Path, "r_paths"),
];

fn derived_set(kind: EntityKind) -> &'static str {
    DERIVED_SETS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, name)| *name)
        .unwrap_or("roots")
}

/// Queries deriving dependents of `kind` from the sets defined before it.
fn derivations(mutation: Mutation, kind: EntityKind) -> &'static [&'static str] {
    use EntityKind::*;
    let structural = matches!(mutation, Mutation::Delete);
    match kind {
        Database if structural => &[
            "SELECT id FROM databases WHERE database_type_id IN (SELECT id FROM r_database_types)",
        ],
        DatabaseField if structural => {
            &["SELECT id FROM database_fields WHERE database_id IN (SELECT id FROM r_databases)"]
        }
        Node if structural => &[
            "SELECT node_id FROM database_nodes WHERE database_id IN (SELECT id FROM r_databases)",
            "SELECT node_id FROM node_fields WHERE database_field_id IN (SELECT id FROM r_fields)",
        ],
        Edge if structural => &[
            "SELECT edge_id FROM database_edges WHERE database_id IN (SELECT id FROM r_databases)",
            "SELECT edge_id FROM edge_fields WHERE database_field_id IN (SELECT id FROM r_fields)",
            "SELECT edge_id FROM edge_nodes WHERE node_id IN (SELECT id FROM r_nodes)",
        ],
        NodeCollection if structural => &[
            "SELECT node_collection_id FROM node_collection_databases \
             WHERE database_id IN (SELECT id FROM r_databases)",
        ],
        // An edited node may leave its collections, which changes them.
        NodeCollection => &[
            "SELECT node_collection_id FROM node_collection_nodes \
             WHERE node_id IN (SELECT id FROM r_nodes)",
        ],
        Network => &[
            "SELECT network_id FROM network_databases WHERE database_id IN (SELECT id FROM r_databases)",
            "SELECT network_id FROM network_nodes WHERE node_id IN (SELECT id FROM r_nodes)",
            "SELECT network_id FROM network_edges WHERE edge_id IN (SELECT id FROM r_edges)",
            "SELECT network_id FROM network_node_collections \
             WHERE node_collection_id IN (SELECT id FROM r_collections)",
            "SELECT network_id FROM network_users GROUP BY network_id \
             HAVING COUNT(*) = SUM(user_id IN (SELECT id FROM r_users))",
        ],
        Analysis => &[
            "SELECT analysis_id FROM analysis_networks WHERE network_id IN (SELECT id FROM r_networks)",
            "SELECT analysis_id FROM analysis_nodes WHERE node_id IN (SELECT id FROM r_nodes)",
            "SELECT analysis_id FROM analysis_edges WHERE edge_id IN (SELECT id FROM r_edges)",
            "SELECT analysis_id FROM analysis_node_collections \
             WHERE node_collection_id IN (SELECT id FROM r_collections)",
            "SELECT analysis_id FROM analysis_users GROUP BY analysis_id \
             HAVING COUNT(*) = SUM(user_id IN (SELECT id FROM r_users))",
        ],
        ControlPath => {
            &["SELECT id FROM control_paths WHERE analysis_id IN (SELECT id FROM r_analyses)"]
        }
        Path => &["SELECT id FROM paths WHERE control_path_id IN (SELECT id FROM r_control_paths)"],
        _ => &[],
    }
}

/// The CTE definitions following `WITH roots(id) AS (VALUES ...)`, ending with a `dependents(id)`
/// set holding every `target` entity affected by mutating the roots.
pub fn dependents_prelude(mutation: Mutation, root: EntityKind, target: EntityKind) -> String {
    let mut sql = String::new();
    for (kind, name) in DERIVED_SETS.iter() {
        let seed = if *kind == root {
            "SELECT id FROM roots"
        } else {
            "SELECT id FROM roots WHERE 0"
        };
        sql.push_str(", ");
        sql.push_str(name);
        sql.push_str("(id) AS (");
        sql.push_str(seed);
        for derivation in derivations(mutation, *kind) {
            sql.push_str(" UNION ");
            sql.push_str(derivation);
        }
        sql.push(')');
        if *kind == target {
            break;
        }
    }
    sql.push_str(", dependents(id) AS (SELECT id FROM ");
    sql.push_str(derived_set(target));
    sql.push_str(") ");
    sql
}

#[derive(Debug, Clone)]
pub struct CascadeTable {
    chains: BTreeMap<(Mutation, EntityKind), CascadeChain>,
}

impl CascadeTable {
    pub fn standard() -> CascadeTable {
        use EntityKind::*;
        let delete: [(EntityKind, &[EntityKind]); 12] = [
            (
                DatabaseType,
                &[
                    Path,
                    ControlPath,
                    Analysis,
                    Network,
                    NodeCollection,
                    Edge,
                    Node,
                    DatabaseField,
                    Database,
                ],
            ),
            (
                Database,
                &[
                    Path,
                    ControlPath,
                    Analysis,
                    Network,
                    NodeCollection,
                    Edge,
                    Node,
                    DatabaseField,
                ],
            ),
            (
                DatabaseField,
                &[Path, ControlPath, Analysis, Network, Edge, Node],
            ),
            (Node, &[Path, ControlPath, Analysis, Network, Edge]),
            (Edge, &[Path, ControlPath, Analysis, Network]),
            (NodeCollection, &[Path, ControlPath, Analysis, Network]),
            (Network, &[Path, ControlPath, Analysis]),
            (Analysis, &[Path, ControlPath]),
            (ControlPath, &[Path]),
            (User, &[Path, ControlPath, Analysis, Network]),
            (Path, &[]),
            (Role, &[]),
        ];
        let edit: [(EntityKind, &[EntityKind]); 4] = [
            (Node, &[Path, ControlPath, Analysis, Network]),
            (Edge, &[Path, ControlPath, Analysis, Network]),
            (NodeCollection, &[Path, ControlPath, Analysis, Network]),
            (Network, &[Path, ControlPath, Analysis]),
        ];

        let mut chains = Vec::new();
        for (root, steps) in delete {
            chains.push(CascadeChain {
                mutation: Mutation::Delete,
                root,
                steps: steps.to_vec(),
            });
        }
        for root in EntityKind::all() {
            let steps = edit
                .iter()
                .find(|(kind, _)| *kind == root)
                .map(|(_, steps)| steps.to_vec())
                .unwrap_or_default();
            chains.push(CascadeChain {
                mutation: Mutation::Edit,
                root,
                steps,
            });
        }
        CascadeTable::from_chains(chains)
    }

    pub fn from_chains(chains: impl IntoIterator<Item = CascadeChain>) -> CascadeTable {
        CascadeTable {
            chains: chains
                .into_iter()
                .map(|chain| ((chain.mutation, chain.root), chain))
                .collect(),
        }
    }

    pub fn chain(&self, mutation: Mutation, root: EntityKind) -> Result<&CascadeChain, EngineError> {
        self.chains.get(&(mutation, root)).ok_or_else(|| {
            EngineError::Cascade(format!("no {mutation:?} chain registered for {root}"))
        })
    }

    pub fn chains(&self) -> impl Iterator<Item = &CascadeChain> {
        self.chains.values()
    }

    /// Checks every chain against the reference graph: steps are distinct, strictly downstream of
    /// the root, and ordered so that no step is deleted before a later step that references it.
    pub fn verify(&self) -> Result<(), EngineError> {
        let mut graph = DiGraph::<EntityKind, ()>::new();
        let index = EntityKind::all()
            .iter()
            .map(|kind| (kind, graph.add_node(kind)))
            .collect::<BTreeMap<_, _>>();
        for kind in EntityKind::all() {
            for referenced in kind.references() {
                graph.add_edge(index[&referenced], index[&kind], ());
            }
        }
        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(EngineError::Cascade(
                "entity reference graph contains a cycle".to_string(),
            ));
        }

        for chain in self.chains() {
            let mut downstream = BTreeSet::new();
            let mut dfs = Dfs::new(&graph, index[&chain.root]);
            while let Some(node) = dfs.next(&graph) {
                downstream.insert(graph[node]);
            }
            downstream.remove(&chain.root);

            let mut seen = BTreeSet::new();
            for (position, step) in chain.steps.iter().enumerate() {
                if !seen.insert(*step) {
                    return Err(EngineError::Cascade(format!(
                        "{:?} chain for {} lists {} twice",
                        chain.mutation, chain.root, step
                    )));
                }
                if !downstream.contains(step) {
                    return Err(EngineError::Cascade(format!(
                        "{:?} chain for {} lists {}, which is not downstream of it",
                        chain.mutation, chain.root, step
                    )));
                }
                if let Some(later) = chain.steps[position + 1..]
                    .iter()
                    .find(|later| later.references().contains(*step))
                {
                    return Err(EngineError::Cascade(format!(
                        "{:?} chain for {} deletes {} before {}, which references it",
                        chain.mutation, chain.root, step, later
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_verifies() {
        CASCADE_TABLE.verify().unwrap();
    }

    #[test]
    fn every_kind_has_both_chains() {
        for kind in EntityKind::all() {
            assert!(CASCADE_TABLE.chain(Mutation::Delete, kind).is_ok(), "{kind}");
            assert!(CASCADE_TABLE.chain(Mutation::Edit, kind).is_ok(), "{kind}");
        }
    }

    #[test]
    fn database_chain_matches_layer_order() {
        use EntityKind::*;
        let chain = CASCADE_TABLE.chain(Mutation::Delete, Database).unwrap();
        assert_eq!(
            chain.steps,
            vec![
                Path,
                ControlPath,
                Analysis,
                Network,
                NodeCollection,
                Edge,
                Node,
                DatabaseField
            ]
        );
    }

    #[test]
    fn edits_only_invalidate_snapshots() {
        for chain in CASCADE_TABLE
            .chains()
            .filter(|chain| chain.mutation == Mutation::Edit)
        {
            for step in &chain.steps {
                assert!(
                    step.is_snapshot()
                        || matches!(step, EntityKind::ControlPath | EntityKind::Path),
                    "edit of {} cascades into {}",
                    chain.root,
                    step
                );
            }
        }
    }

    #[test]
    fn out_of_order_chain_is_rejected() {
        use EntityKind::*;
        let table = CascadeTable::from_chains([CascadeChain {
            mutation: Mutation::Delete,
            root: Database,
            steps: vec![Node, Edge],
        }]);
        assert!(matches!(table.verify(), Err(EngineError::Cascade(_))));
    }

    #[test]
    fn upstream_step_is_rejected() {
        use EntityKind::*;
        let table = CascadeTable::from_chains([CascadeChain {
            mutation: Mutation::Delete,
            root: Node,
            steps: vec![Database],
        }]);
        assert!(matches!(table.verify(), Err(EngineError::Cascade(_))));
    }

    #[test]
    fn prelude_seeds_only_the_root_set() {
        let sql = dependents_prelude(Mutation::Delete, EntityKind::Node, EntityKind::Network);
        assert!(sql.contains("r_nodes(id) AS (SELECT id FROM roots UNION"));
        assert!(sql.contains("r_databases(id) AS (SELECT id FROM roots WHERE 0 UNION"));
        assert!(sql.ends_with("dependents(id) AS (SELECT id FROM r_networks) "));
        assert!(!sql.contains("r_analyses"));
    }

    #[test]
    fn edit_prelude_has_no_structural_derivations() {
        let sql = dependents_prelude(Mutation::Edit, EntityKind::Node, EntityKind::Analysis);
        assert!(!sql.contains("edge_nodes"));
        assert!(!sql.contains("database_nodes"));
        assert!(!sql.contains("node_collection_databases"));
        assert!(sql.contains("analysis_nodes"));
    }

    #[test]
    fn node_edit_reaches_snapshots_through_collections() {
        let edit = dependents_prelude(Mutation::Edit, EntityKind::Node, EntityKind::Network);
        assert!(edit.contains(
            "r_collections(id) AS (SELECT id FROM roots WHERE 0 \
             UNION SELECT node_collection_id FROM node_collection_nodes"
        ));
        let delete =
            dependents_prelude(Mutation::Delete, EntityKind::Database, EntityKind::Network);
        assert!(!delete.contains("FROM node_collection_nodes"));
    }
}

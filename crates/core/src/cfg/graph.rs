use crate::ir::{BlockId, Function, InstKind};
use petgraph::{
    algo::dominators::{simple_fast, Dominators},
    graph::{DiGraph, NodeIndex},
    visit::Dfs,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Kind of control transfer an edge stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Unconditional branch.
    Jump,
    /// Conditional branch taken when the condition holds.
    BranchTrue,
    /// Conditional branch taken when the condition fails.
    BranchFalse,
    /// Switch arm for the given discriminant value.
    Case(u64),
    /// Switch fallback.
    Default,
}

/// A `petgraph` view of a function's blocks and terminator edges.
///
/// Built on demand from the function; edits to the function are not reflected, so rebuild
/// after mutating.
#[derive(Debug, Clone)]
pub struct CfgGraph {
    pub graph: DiGraph<BlockId, EdgeKind>,
    nodes: HashMap<BlockId, NodeIndex>,
    entry: Option<NodeIndex>,
}

impl CfgGraph {
    pub fn build(func: &Function) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        for &b in func.layout() {
            nodes.insert(b, graph.add_node(b));
        }
        for &b in func.layout() {
            let Some(term) = func.terminator(b) else {
                continue;
            };
            let Ok(data) = func.inst(term) else { continue };
            let edges: Vec<(BlockId, EdgeKind)> = match &data.kind {
                InstKind::Br { target } => vec![(*target, EdgeKind::Jump)],
                InstKind::CondBr {
                    then_dest,
                    else_dest,
                    ..
                } => vec![
                    (*then_dest, EdgeKind::BranchTrue),
                    (*else_dest, EdgeKind::BranchFalse),
                ],
                InstKind::Switch { default, cases, .. } => std::iter::once((*default, EdgeKind::Default))
                    .chain(cases.iter().map(|(v, t)| (*t, EdgeKind::Case(*v))))
                    .collect(),
                _ => Vec::new(),
            };
            for (target, kind) in edges {
                if let (Some(&from), Some(&to)) = (nodes.get(&b), nodes.get(&target)) {
                    graph.add_edge(from, to, kind);
                }
            }
        }
        let entry = func.entry().and_then(|e| nodes.get(&e).copied());
        Self {
            graph,
            nodes,
            entry,
        }
    }

    pub fn node(&self, block: BlockId) -> Option<NodeIndex> {
        self.nodes.get(&block).copied()
    }

    pub fn block(&self, node: NodeIndex) -> Option<BlockId> {
        self.graph.node_weight(node).copied()
    }

    pub const fn entry(&self) -> Option<NodeIndex> {
        self.entry
    }

    /// Blocks reachable from the entry.
    pub fn reachable_blocks(&self) -> HashSet<BlockId> {
        let mut seen = HashSet::new();
        let Some(entry) = self.entry else {
            return seen;
        };
        let mut dfs = Dfs::new(&self.graph, entry);
        while let Some(n) = dfs.next(&self.graph) {
            seen.insert(self.graph[n]);
        }
        seen
    }

    /// Dominator tree rooted at the entry block.
    pub fn dominators(&self) -> Option<Dominators<NodeIndex>> {
        self.entry.map(|entry| simple_fast(&self.graph, entry))
    }

    /// Whether `a` dominates `b` (reflexive). False when `b` is unreachable.
    pub fn dominates(&self, doms: &Dominators<NodeIndex>, a: BlockId, b: BlockId) -> bool {
        let (Some(na), Some(nb)) = (self.node(a), self.node(b)) else {
            return false;
        };
        doms.dominators(nb)
            .is_some_and(|mut chain| chain.any(|n| n == na))
    }
}

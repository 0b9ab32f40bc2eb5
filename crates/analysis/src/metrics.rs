/// Module for computing analytical metrics to evaluate obfuscation passes on IR functions.
///
/// Implements a minimal set of metrics quantified by instruction count, control flow
/// complexity, block size, and dominator overlap to assess pass potency (analyst effort) and
/// code growth. The module provides functions to collect metrics from a `Function`, compare
/// pre- and post-obfuscation states, and compute dominator/post-dominator pairs for control
/// flow analysis.
///
/// # Usage
/// ```rust,ignore
/// let func = veil_core::samples::compute()?;
/// let metrics = metrics::collect_metrics(&func)?;
/// println!("{}", serde_json::to_string_pretty(&metrics)?);
/// ```
use petgraph::{
    algo::dominators::simple_fast,
    graph::{DiGraph, NodeIndex},
    visit::Reversed,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use veil_core::{
    cfg::{successors, CfgGraph},
    Function,
};
use veil_utils::errors::MetricsError;

/// Represents a set of analytical metrics for evaluating function obfuscation.
///
/// Metrics include instruction count, control flow complexity (block and edge counts), the
/// largest block, dominator overlap, and a composite potency score. Used to compare pre- and
/// post-obfuscation states in pass logs and reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Number of instructions placed in the function.
    pub inst_cnt: usize,
    /// Number of basic blocks in the layout.
    pub block_cnt: usize,
    /// Number of terminator edges in the CFG.
    pub edge_cnt: usize,
    /// Instruction count of the largest block.
    pub max_block_len: usize,
    /// Fraction of nodes whose immediate dominator is also their immediate post-dominator.
    pub dom_overlap: f64,
    /// Heuristic analyst-effort score, computed by `score`.
    pub potency: f64,
}

/// Collects metrics from a function body.
///
/// The potency score balances complexity (nodes, edges) against overlap to estimate analyst
/// effort.
///
/// # Arguments
/// * `func` - A function with at least one block.
///
/// # Returns
/// A `Metrics` struct with computed metrics, or an error for declarations.
pub fn collect_metrics(func: &Function) -> Result<Metrics, MetricsError> {
    if func.is_declaration() {
        return Err(MetricsError::EmptyCfg);
    }

    let cfg = CfgGraph::build(func);
    let (doms, post_doms) = dominator_pairs(func, &cfg)?;
    let overlap = dom_overlap(&doms, &post_doms);

    let block_cnt = func.block_count();
    let edge_cnt = cfg.graph.edge_count();
    let max_block_len = func
        .layout()
        .iter()
        .filter_map(|&b| func.block(b).ok().map(|blk| blk.len()))
        .max()
        .unwrap_or(0);

    let metrics = Metrics {
        inst_cnt: func.inst_count(),
        block_cnt,
        edge_cnt,
        max_block_len,
        dom_overlap: overlap,
        potency: score(overlap, block_cnt, edge_cnt),
    };
    debug!(function = %func.name, ?metrics, "collected metrics");
    Ok(metrics)
}

// Immediate (post-)dominator of each node, keyed by node index in the augmented graph.
type DominatorMap = HashMap<NodeIndex, NodeIndex>;

/// Computes dominator and post-dominator pairs for the CFG.
///
/// Uses `petgraph`'s `simple_fast` algorithm on a copy of the CFG extended with a virtual exit
/// node that every returning block feeds into, so functions with several `ret` blocks still
/// have a single post-dominator root. The virtual exit is excluded from both maps.
///
/// # Returns
/// A tuple of two hash maps: (dominators, post-dominators), mapping node indices to their
/// immediate dominator/post-dominator.
fn dominator_pairs(
    func: &Function,
    cfg: &CfgGraph,
) -> Result<(DominatorMap, DominatorMap), MetricsError> {
    let entry = cfg.entry().ok_or(MetricsError::EmptyCfg)?;
    let mut g: DiGraph<bool, ()> = cfg.graph.map(|_, _| false, |_, _| ());
    let exit = g.add_node(true);
    for &b in func.layout() {
        if successors(func, b).is_empty() {
            if let Some(n) = cfg.node(b) {
                g.add_edge(n, exit, ());
            }
        }
    }

    let doms = simple_fast(&g, entry);
    let mut dom_map = HashMap::new();
    for n in g.node_indices().filter(|&n| n != exit) {
        if let Some(idom) = doms.immediate_dominator(n) {
            dom_map.insert(n, idom);
        }
    }

    let post = simple_fast(Reversed(&g), exit);
    let mut pdom_map = HashMap::new();
    for n in g.node_indices().filter(|&n| n != exit) {
        if let Some(ipdom) = post.immediate_dominator(n) {
            pdom_map.insert(n, ipdom);
        }
    }

    Ok((dom_map, pdom_map))
}

/// Computes the fraction of nodes whose dominator and post-dominator coincide.
///
/// A higher overlap suggests a more linear CFG, reducing obfuscation potency.
fn dom_overlap(doms: &DominatorMap, pdoms: &DominatorMap) -> f64 {
    let common = doms
        .iter()
        .filter(|(n, d)| pdoms.get(*n) == Some(*d))
        .count();
    if doms.is_empty() {
        0.0
    } else {
        common as f64 / doms.len() as f64
    }
}

/// Potency in the sense of Wroblewski: grows with blocks and edges, shrinks as dominators and
/// post-dominators coincide (a straight chain of blocks scores lowest).
fn score(overlap: f64, nodes: usize, edges: usize) -> f64 {
    5.0 * (nodes as f64).log2() + edges as f64 + 30.0 * (1.0 - overlap)
}

/// Compares two sets of metrics to evaluate an obfuscation pass.
///
/// Computes the difference in potency scores, adjusted for instruction growth. A positive
/// result indicates the pass increases complexity without excessive size growth.
pub fn compare(before: &Metrics, after: &Metrics) -> f64 {
    after.potency - before.potency - 0.25 * (after.inst_cnt as f64 - before.inst_cnt as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::{samples, Type};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    /// Tests metrics computation for the loop sample.
    #[tokio::test]
    async fn test_collect_metrics_loop() {
        init_tracing();
        let func = samples::compute().unwrap();
        let metrics = collect_metrics(&func).expect("Metrics computation failed");
        assert_eq!(metrics.block_cnt, 5, "Block count mismatch");
        assert_eq!(metrics.edge_cnt, 5, "Edge count mismatch");
        assert_eq!(metrics.inst_cnt, func.inst_count());
        assert_eq!(metrics.max_block_len, 6);
        assert!(metrics.potency > 0.0, "Potency score should be positive");
        assert!(
            (0.0..=1.0).contains(&metrics.dom_overlap),
            "Invalid overlap"
        );
    }

    /// Tests metrics computation for a single-block function.
    #[tokio::test]
    async fn test_collect_metrics_single_block() {
        init_tracing();
        let func = samples::mix().unwrap();
        let metrics = collect_metrics(&func).unwrap();
        assert_eq!(metrics.block_cnt, 1);
        assert_eq!(metrics.edge_cnt, 0);
        assert_eq!(metrics.dom_overlap, 0.0);
    }

    /// Declarations have no CFG.
    #[tokio::test]
    async fn test_collect_metrics_declaration() {
        init_tracing();
        let decl = Function::new("puts", vec![Type::Ptr], Type::I32);
        assert!(matches!(
            collect_metrics(&decl),
            Err(MetricsError::EmptyCfg)
        ));
    }

    /// Tests invariant: potency score increases with more blocks and edges.
    #[tokio::test]
    async fn test_potency_edge_increase() {
        init_tracing();
        let simple = collect_metrics(&samples::mix().unwrap()).unwrap();
        let complex = collect_metrics(&samples::classify().unwrap()).unwrap();
        assert!(
            complex.potency > simple.potency,
            "More edges should increase potency"
        );
    }

    /// Tests dominator and post-dominator computation for the loop sample.
    #[tokio::test]
    async fn test_dominator_computation() {
        init_tracing();
        let func = samples::compute().unwrap();
        let cfg = CfgGraph::build(&func);
        let (doms, post_doms) = dominator_pairs(&func, &cfg).unwrap();
        let node = |i: usize| cfg.node(func.layout()[i]).unwrap();
        let (entry, cond, body, latch, exit) = (node(0), node(1), node(2), node(3), node(4));

        assert_eq!(doms.get(&cond), Some(&entry));
        assert_eq!(doms.get(&body), Some(&cond));
        assert_eq!(doms.get(&latch), Some(&body));
        assert_eq!(doms.get(&exit), Some(&cond));
        assert_eq!(post_doms.get(&entry), Some(&cond));
        assert_eq!(post_doms.get(&body), Some(&latch));
        assert_eq!(post_doms.get(&latch), Some(&cond));
        assert_eq!(post_doms.get(&cond), Some(&exit));

        // No block shares its immediate dominator with its immediate post-dominator.
        let overlap = dom_overlap(&doms, &post_doms);
        assert_eq!(overlap, 0.0);
        let metrics = collect_metrics(&func).unwrap();
        assert_eq!(metrics.dom_overlap, overlap);
    }

    #[tokio::test]
    async fn test_compare_metrics() {
        init_tracing();
        let before = collect_metrics(&samples::mix().unwrap()).unwrap();
        let after = collect_metrics(&samples::classify().unwrap()).unwrap();
        let expected = after.potency
            - before.potency
            - 0.25 * (after.inst_cnt as f64 - before.inst_cnt as f64);
        assert_eq!(compare(&before, &after), expected);
    }
}

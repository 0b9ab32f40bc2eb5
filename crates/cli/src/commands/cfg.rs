use super::{function, read_module, write_output};
use async_trait::async_trait;
use clap::Args;
use std::error::Error;
use std::fmt::Write;
use veil_core::{
    cfg::{CfgGraph, EdgeKind},
    Function,
};

#[derive(Args)]
pub struct CfgArgs {
    /// Path to the input module (JSON)
    pub input: String,
    /// Function to render
    #[arg(short, long, default_value = "main")]
    pub function: String,
    /// Output file for Graphviz .dot (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,
}

#[async_trait]
impl super::Command for CfgArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let module = read_module(&self.input).await?;
        let dot = generate_dot(function(&module, &self.function)?)?;
        write_output(self.output.as_deref(), &dot).await?;
        Ok(())
    }
}

/// Renders the CFG of `func` as a Graphviz digraph, one node per laid-out block.
pub fn generate_dot(func: &Function) -> Result<String, std::fmt::Error> {
    let cfg = CfgGraph::build(func);
    let mut dot = format!("digraph \"{}\" {{\n", func.name);

    for node in cfg.graph.node_indices() {
        let block = cfg.graph[node];
        let len = func.block(block).map(|b| b.len()).unwrap_or_default();
        writeln!(
            dot,
            "    {} [label=\"{}\\n{} insts\"];",
            node.index(),
            func.block_name(block),
            len
        )?;
    }

    for edge in cfg.graph.edge_indices() {
        let Some((src, dst)) = cfg.graph.edge_endpoints(edge) else {
            continue;
        };
        let label = match cfg.graph[edge] {
            EdgeKind::Jump => "Jump".to_owned(),
            EdgeKind::BranchTrue => "BranchTrue".to_owned(),
            EdgeKind::BranchFalse => "BranchFalse".to_owned(),
            EdgeKind::Case(value) => format!("Case {value}"),
            EdgeKind::Default => "Default".to_owned(),
        };
        writeln!(
            dot,
            "    {} -> {} [label=\"{}\"];",
            src.index(),
            dst.index(),
            label
        )?;
    }

    dot.push_str("}\n");
    Ok(dot)
}

//! Graphviz dot rendering of a flow snapshot
//!
//! Produces a `dot` digraph for a (usually snapshotted) [`Flow`]: one node
//! per flow node, a cluster per multi-member logical group, colors keyed by
//! scheduling status. Intended for debugging and external visualization
//! tooling; the coordinator itself never renders.

use std::fmt::Write;

use crate::flow::{Flow, LogicalNodeStatus};

const DARK_BLUE: &str = "00008b";
const LIGHT_BLUE: &str = "87cefa";
const DARK_ORANGE: &str = "ff8c00";
const DARK_GREEN: &str = "006400";
const DARK_RED: &str = "8b0000";
const BLACK: &str = "000000";

fn status_color(status: LogicalNodeStatus) -> &'static str {
    match status {
        LogicalNodeStatus::Pending => DARK_BLUE,
        LogicalNodeStatus::Resource | LogicalNodeStatus::Prepare => LIGHT_BLUE,
        LogicalNodeStatus::Execute => DARK_ORANGE,
        LogicalNodeStatus::Finished => DARK_GREEN,
        LogicalNodeStatus::Failed => DARK_RED,
    }
}

/// Render a flow as a Graphviz dot digraph
pub fn render_dot(flow: &Flow) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{}\" {{", flow.name());
    let _ = writeln!(out, "\trankdir = TB;");

    for logical in flow.logicals() {
        let color = status_color(logical.status);
        let singleton = logical.members().len() == 1;

        if !singleton {
            let _ = writeln!(out, "\n\tsubgraph cluster_{} {{", logical.order());
            let _ = writeln!(out, "\t\tcolor = \"#{}\";", color);
        }
        for member in logical.members() {
            if let Ok(node) = flow.node(*member) {
                let indent = if singleton { "\t" } else { "\t\t" };
                let _ = writeln!(
                    out,
                    "{}node_{} [ label = \"{}\", color = \"#{}\" ];",
                    indent,
                    node.order(),
                    node.codelet(),
                    color
                );
            }
        }
        if !singleton {
            let _ = writeln!(out, "\t}}");
        }
    }

    for edge in flow.edges() {
        let (u, v) = (edge.u(), edge.v());
        let color = match (flow.node(u), flow.node(v)) {
            (Ok(nu), Ok(_)) => match flow.logical(nu.logical()).status {
                LogicalNodeStatus::Execute | LogicalNodeStatus::Finished => DARK_GREEN,
                _ => BLACK,
            },
            _ => BLACK,
        };
        if let (Ok(nu), Ok(nv)) = (flow.node(u), flow.node(v)) {
            let _ = writeln!(
                out,
                "\tnode_{} -> node_{} [ style = \"solid\", color = \"#{}\" ];",
                nu.order(),
                nv.order(),
                color
            );
        }
    }

    let _ = writeln!(out, "}}");
    out
}

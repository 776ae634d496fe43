// Copyright 2017 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use graph::{Direction, Graph};

use crate::core::TypeId;
use crate::nodes::{Complete, Node};

// NB: There are only 12 colors in `set312`.
const COLOR_SCHEME: &str = "set312";
const MAX_COLORS: usize = 12;

///
/// Renders the subgraph reachable from the given roots as Graphviz dot lines, one line
/// per entry. Nodes are coloured by product type, with Throw red and Noop white;
/// Noop-rooted subgraphs are omitted.
///
pub fn render(graph: &Graph<Node>, roots: &[Node]) -> Vec<String> {
    let mut viz_colors: HashMap<TypeId, usize> = HashMap::new();
    let mut format_color = |node: &Node, state: Option<&Complete>| match state {
        Some(&Complete::Throw(_)) => "tomato".to_owned(),
        Some(&Complete::Noop(_)) => "white".to_owned(),
        _ => {
            let next_color = viz_colors.len() % MAX_COLORS + 1;
            viz_colors
                .entry(*node.product())
                .or_insert(next_color)
                .to_string()
        }
    };

    let mut lines = vec![
        "digraph plans {".to_owned(),
        format!("  node[colorscheme={}];", COLOR_SCHEME),
        "  concentrate=true;".to_owned(),
        "  rankdir=LR;".to_owned(),
    ];

    let walked = graph.walk(roots, Direction::Outgoing, |_, state| {
        !matches!(state, Some(&Complete::Noop(_)))
    });
    for (node, state) in &walked {
        let node_str = format_node(node, state.as_ref());
        lines.push(format!(
            "  \"{}\" [style=filled, fillcolor={}];",
            node_str,
            format_color(node, state.as_ref()),
        ));

        for dep in graph.dependencies_of(node) {
            let dep_state = graph.state(&dep);
            if matches!(dep_state, Some(Complete::Noop(_))) {
                continue;
            }
            lines.push(format!(
                "  \"{}\" -> \"{}\";",
                node_str,
                format_node(&dep, dep_state.as_ref()),
            ));
        }
    }

    lines.push("}".to_owned());
    lines
}

///
/// Writes the rendered graph to the given path.
///
pub fn write(graph: &Graph<Node>, roots: &[Node], path: &Path) -> io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut f = BufWriter::new(file);
    for line in render(graph, roots) {
        f.write_all(line.as_bytes())?;
        f.write_all(b"\n")?;
    }
    Ok(())
}

fn format_node(node: &Node, state: Option<&Complete>) -> String {
    let state_str = match state {
        Some(state) => format!("{:?}", state),
        None => "<not started>".to_owned(),
    };
    format!("{} == {}", node, state_str).replace('"', "\\\"")
}

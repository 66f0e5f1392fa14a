/**************************************************************************/
/*  This file is part of PROVCIRC.                                        */
/*                                                                        */
/*  Copyright (C) 2025                                                    */
/*    CEA (Commissariat à l'énergie atomique et aux énergies              */
/*         alternatives)                                                  */
/*                                                                        */
/*  you can redistribute it and/or modify it under the terms of the GNU   */
/*  Lesser General Public License as published by the Free Software       */
/*  Foundation, version 2.1.                                              */
/*                                                                        */
/*  It is distributed in the hope that it will be useful,                 */
/*  but WITHOUT ANY WARRANTY; without even the implied warranty of        */
/*  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the         */
/*  GNU Lesser General Public License for more details.                   */
/*                                                                        */
/*  See the GNU Lesser General Public License version 2.1                 */
/*  for more details (enclosed in the file licenses/LGPLv2.1).            */
/*                                                                        */
/**************************************************************************/

//! Reading the d-DNNF dialect of d4

use crate::cnf::Lit;
use crate::nnf::{Header, MemoryNnf, Node, Source, Visitor};
use crate::utils::{end_of_line, int_list};
use anyhow::Context;
use nom::bytes::complete::{tag, take_until};
use nom::character::complete::{one_of, space1};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::{Direction, Graph};
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
/// A node as returned by d4
pub enum D4Node {
    /// True formula
    True,
    /// False formula
    False,
    /// Disjunction of descendents
    Or,
    /// Conjunction of descendents
    And,
}

/// d4 output graphs are labelled by literals that are chosen true descending the edge
type Edge = Vec<Lit>;

/// graph as returned by d4
#[derive(Clone, Debug, Default)]
pub struct D4Graph {
    /// the graph itself
    graph: Graph<D4Node, Edge>,
    /// number of variables if d4 reported it, 0 otherwise
    pub nvars: usize,
}

type NomError<'a> = nom::error::Error<&'a str>;

/// Records `value` as the node numbered `index` by d4
fn insert_at_index(vec: &mut Vec<Option<NodeIndex>>, index: usize, value: NodeIndex) {
    if vec.len() <= index {
        vec.resize(index + 1, None);
    }
    vec[index] = Some(value);
}

/// Parses the output of d4 into a `D4Graph`.
pub fn parse_d4_output(s: &str) -> anyhow::Result<D4Graph> {
    let mut res = D4Graph::default();
    let mut indexmap: Vec<Option<NodeIndex>> = Vec::new();
    let mut rest = s;
    let mut lineno = 1;
    while !rest.is_empty() {
        if let Ok((r, _)) = tag::<_, _, NomError>("c")(rest) {
            if let Ok((r, _)) = tag::<_, _, NomError>(" nvars ")(r) {
                let (_, args) = int_list(r).map_err(|_| {
                    anyhow::anyhow!("expected number of variables at line {}", lineno)
                })?;
                anyhow::ensure!(
                    args.len() == 1 && args[0] >= 0,
                    "expected 1 integer line {}",
                    lineno
                );
                res.nvars = args[0] as usize;
            }
            rest = match take_until::<_, _, NomError>("\n")(r) {
                Ok((r, _)) => r,
                Err(_) => "",
            };
        } else if let Ok((r, kind)) = one_of::<_, _, NomError>("aotf")(rest) {
            let (r, _) = space1::<_, NomError>(r).map_err(|_| {
                anyhow::anyhow!("expected space after node type at line {}", lineno)
            })?;
            let (r, args) = int_list(r).map_err(|_| {
                anyhow::anyhow!("expected list of ints after node type at line {}", lineno)
            })?;
            rest = r;
            anyhow::ensure!(args.len() == 2, "expected 2 arguments line {}", lineno);
            anyhow::ensure!(args[1] == 0, "line {} does not end with 0", lineno);
            anyhow::ensure!(args[0] > 0, "invalid node number line {}", lineno);
            let node = match kind {
                'a' => D4Node::And,
                'o' => D4Node::Or,
                't' => D4Node::True,
                _ => D4Node::False,
            };
            let real_index = res.graph.add_node(node);
            insert_at_index(&mut indexmap, args[0] as usize, real_index);
        } else {
            let (r, args) = int_list(rest)
                .map_err(|_| anyhow::anyhow!("expected list of ints line {}", lineno))?;
            rest = r;
            anyhow::ensure!(
                args.len() >= 3,
                "expected at least 3 arguments line {}",
                lineno
            );
            anyhow::ensure!(
                args[args.len() - 1] == 0,
                "line {} does not end with 0",
                lineno
            );
            let node = |i: isize| {
                indexmap
                    .get(i as usize)
                    .copied()
                    .flatten()
                    .filter(|_| i > 0)
                    .with_context(|| format!("unexpected index {} line {}", i, lineno))
            };
            let from = node(args[0])?;
            let to = node(args[1])?;
            let labels: Edge = args[2..(args.len() - 1)]
                .iter()
                .map(|&i| Lit::from_dimacs(i))
                .collect();
            res.graph.add_edge(from, to, labels);
        }
        rest = end_of_line(rest)
            .map_err(|_| anyhow::anyhow!("expected end of line after 0 line {}", lineno))?
            .0;
        lineno += 1;
    }
    Ok(res)
}

impl D4Graph {
    /// Translates to NNF nodes, children first.
    ///
    /// Edges labelled by literals become `AND(literals, target)`, and literal nodes are shared.
    pub fn to_nnf(&self) -> anyhow::Result<MemoryNnf> {
        let sources: Vec<_> = self.graph.externals(Direction::Incoming).collect();
        anyhow::ensure!(sources.len() == 1, "expected one root node, found {}", sources.len());
        let root = sources[0];
        let toposort = petgraph::algo::toposort(petgraph::visit::Reversed(&self.graph), None)
            .map_err(|cycle| anyhow::anyhow!("cycle on node {:?}", cycle.node_id()))?;
        let mut nodes: Vec<Node> = Vec::with_capacity(self.graph.node_count());
        let mut indexmap = vec![0; self.graph.node_count()];
        let mut literals: HashMap<Lit, usize> = HashMap::new();
        let mut nedges = 0;
        for &node in toposort.iter() {
            let mut children = Vec::new();
            for edge in self.graph.edges_directed(node, Direction::Outgoing) {
                let target = indexmap[edge.target().index()];
                if edge.weight().is_empty() {
                    children.push(target);
                    continue;
                }
                let mut conjuncts = Vec::with_capacity(edge.weight().len() + 1);
                for &lit in edge.weight() {
                    anyhow::ensure!(
                        self.nvars == 0 || lit.var().index() < self.nvars,
                        "literal {} may not appear in d4 output for formula with {} variables",
                        lit.to_dimacs(),
                        self.nvars
                    );
                    let index = *literals.entry(lit).or_insert_with(|| {
                        nodes.push(Node::L(lit));
                        nodes.len() - 1
                    });
                    conjuncts.push(index);
                }
                conjuncts.push(target);
                nedges += conjuncts.len();
                nodes.push(Node::A(conjuncts));
                children.push(nodes.len() - 1);
            }
            nedges += children.len();
            let translation = match self.graph[node] {
                D4Node::And => Node::A(children),
                D4Node::Or => Node::O(None, children),
                D4Node::True => {
                    anyhow::ensure!(children.is_empty(), "true node may not have descendents");
                    Node::A(children)
                }
                D4Node::False => {
                    anyhow::ensure!(children.is_empty(), "false node may not have descendents");
                    Node::O(None, children)
                }
            };
            nodes.push(translation);
            indexmap[node.index()] = nodes.len() - 1;
        }
        anyhow::ensure!(
            indexmap[root.index()] + 1 == nodes.len(),
            "root of d4 output is not last in topological order"
        );
        Ok(MemoryNnf {
            header: Header {
                nvars: self.nvars,
                nnodes: nodes.len(),
                nedges,
            },
            nodes,
        })
    }
}

impl<'a> Source for &'a D4Graph {
    fn visit<T: Visitor>(self, visitor: T) -> anyhow::Result<()> {
        let nnf = self.to_nnf()?;
        (&nnf).visit(visitor)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parsing() -> anyhow::Result<()> {
        let output = parse_d4_output(
            "c nvars 6
o 1 0
o 2 0
o 3 0
t 4 0
3 4 -2 3 0
3 4 2 0
2 3 -1 0
2 4 1 0
1 2 0
c commentary
",
        )?;
        assert_eq!(output.graph.node_count(), 4);
        assert_eq!(output.graph.edge_count(), 5);
        assert_eq!(output.nvars, 6);
        let nnf = output.to_nnf()?;
        // 4 nodes, 4 labelled edges, 5 distinct literals
        assert_eq!(nnf.nodes.len(), 13);
        assert_eq!(nnf.header.nvars, 6);
        match nnf.nodes.last() {
            Some(Node::O(None, children)) => assert_eq!(children.len(), 1),
            other => panic!("unexpected root {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn no_trailing_newline() -> anyhow::Result<()> {
        let output = parse_d4_output("a 1 0\nt 2 0\n1 2 1 0")?;
        assert_eq!(output.nvars, 0);
        let nnf = output.to_nnf()?;
        assert_eq!(nnf.nodes.len(), 4);
        assert_eq!(nnf.nodes[3], Node::A(vec![2]));
        Ok(())
    }

    #[test]
    fn malformed() {
        assert!(parse_d4_output("o 1 1\n").is_err());
        assert!(parse_d4_output("o 1 0\n1 2 0\n").is_err());
        let two_roots = parse_d4_output("o 1 0\nt 2 0\n").unwrap();
        assert!(two_roots.to_nnf().is_err());
        let bad_true = parse_d4_output("t 1 0\nt 2 0\n1 2 0\n").unwrap();
        assert!(bad_true.to_nnf().is_err());
    }
}

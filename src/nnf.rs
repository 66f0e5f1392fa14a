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

//! Reading d-DNNF formulas in the NNF format of c2d and dsharp.

use crate::cnf::{Lit, Var};
use crate::utils::{int_list, unsigned};
use anyhow::Context;
use nom::bytes::complete::tag;
use nom::character::complete::{one_of, space1};
use nom::sequence::tuple;

/// One node of a d-DNNF formula
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Literal
    L(Lit),
    /// And node, represented by the index of conjoined nodes. True when empty.
    A(Vec<usize>),
    /// Or node, represented by the index of disjoined nodes and the opposing variable. False
    /// when empty.
    O(Option<Var>, Vec<usize>),
}

/// Metadata for a d-DNNF formula
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    /// Number of variables
    pub nvars: usize,
    /// Number of nodes
    pub nnodes: usize,
    /// Number of edges. Dsharp sometimes reports wrong numbers.
    pub nedges: usize,
}

/// Iterate through the nodes of the d-DNNF formula in topological order
pub trait Visitor {
    /// Will be called before visit node
    fn visit_header(&mut self, _header: &Header) -> anyhow::Result<()> {
        Ok(())
    }
    /// Will be called in topological order, children first. The last node is the root.
    fn visit_node(&mut self, _node: &Node) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<T: Visitor> Visitor for &mut T {
    fn visit_header(&mut self, header: &Header) -> anyhow::Result<()> {
        T::visit_header(self, header)
    }
    fn visit_node(&mut self, node: &Node) -> anyhow::Result<()> {
        T::visit_node(self, node)
    }
}

/// Something that can be interpreted as a d-DNNF
pub trait Source {
    /// Call the visitor methods according to the formula encoded by the source.
    fn visit<T: Visitor>(self, visitor: T) -> anyhow::Result<()>;
}

/// A d-DNNF held in memory
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryNnf {
    /// Metadata for the formula
    pub header: Header,
    /// Nodes in topological order
    pub nodes: Vec<Node>,
}

impl<'a> Source for &'a MemoryNnf {
    fn visit<T: Visitor>(self, mut visitor: T) -> anyhow::Result<()> {
        visitor.visit_header(&self.header)?;
        for node in self.nodes.iter() {
            visitor.visit_node(node)?;
        }
        Ok(())
    }
}

/// A visitor to store the formula of a source to memory
#[derive(Debug, Default)]
struct ToMemoryVisitor(MemoryNnf);

impl Visitor for ToMemoryVisitor {
    fn visit_header(&mut self, h: &Header) -> anyhow::Result<()> {
        self.0.header = h.clone();
        self.0.nodes.reserve(h.nnodes);
        Ok(())
    }
    fn visit_node(&mut self, node: &Node) -> anyhow::Result<()> {
        self.0.nodes.push(node.clone());
        Ok(())
    }
}

impl MemoryNnf {
    /// Store the formula expressed by a source to memory.
    pub fn from_source<T: Source>(source: T) -> anyhow::Result<Self> {
        let mut visitor = ToMemoryVisitor::default();
        source.visit(&mut visitor)?;
        Ok(visitor.0)
    }
}

/// NNF text as output by c2d, dsharp, or d4 in compatibility mode
#[derive(Debug, Clone, Copy)]
pub struct TextSource<'a>(pub &'a str);

fn parse_header(s: &str) -> nom::IResult<&str, Header> {
    let (rest, (_, _, nnodes, _, nedges, _, nvars)) = tuple((
        tag("nnf"),
        space1,
        unsigned,
        space1,
        unsigned,
        space1,
        unsigned,
    ))(s)?;
    Ok((
        rest,
        Header {
            nvars,
            nnodes,
            nedges,
        },
    ))
}

fn check_child(index: isize, current_index: usize) -> anyhow::Result<usize> {
    anyhow::ensure!(
        index >= 0 && (index as usize) < current_index,
        "File is not in topological order: {} >= {}",
        index,
        current_index
    );
    Ok(index as usize)
}

impl<'a> Source for TextSource<'a> {
    fn visit<T: Visitor>(self, mut visitor: T) -> anyhow::Result<()> {
        let mut lines = self
            .0
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty() && !line.starts_with('c'));
        let (lineno, first) = lines.next().context("empty NNF file")?;
        let (_, header) = parse_header(first.trim_end())
            .map_err(|_| anyhow::anyhow!("expected nnf header line {}", lineno + 1))?;
        visitor.visit_header(&header)?;
        let mut current_index = 0;
        for (lineno, line) in lines {
            let lineno = lineno + 1;
            anyhow::ensure!(
                current_index < header.nnodes,
                "more than {} nodes, line {}",
                header.nnodes,
                lineno
            );
            let (r, kind) = one_of::<_, _, nom::error::Error<&str>>("LAO")(line)
                .map_err(|_| anyhow::anyhow!("expected node type at line {}", lineno))?;
            let (r, args) = int_list(r)
                .map_err(|_| anyhow::anyhow!("expected list of ints line {}", lineno))?;
            anyhow::ensure!(
                r.trim().is_empty(),
                "trailing garbage line {}",
                lineno
            );
            let node = match kind {
                'L' => {
                    anyhow::ensure!(
                        args.len() == 1 && args[0] != 0,
                        "expected one literal line {}",
                        lineno
                    );
                    let lit = Lit::from_dimacs(args[0]);
                    anyhow::ensure!(
                        header.nvars == 0 || lit.var().index() < header.nvars,
                        "Literal {} impossible with only {} variables",
                        args[0],
                        header.nvars
                    );
                    Node::L(lit)
                }
                'A' => {
                    anyhow::ensure!(
                        !args.is_empty() && args[0] >= 0 && args.len() == args[0] as usize + 1,
                        "wrong number of children line {}",
                        lineno
                    );
                    let children = args[1..]
                        .iter()
                        .map(|&i| check_child(i, current_index))
                        .collect::<anyhow::Result<Vec<usize>>>()?;
                    Node::A(children)
                }
                _ => {
                    anyhow::ensure!(
                        args.len() >= 2 && args[1] >= 0 && args.len() == args[1] as usize + 2,
                        "wrong number of children line {}",
                        lineno
                    );
                    let opposing = match args[0] {
                        0 => None,
                        v if v > 0 => Some(Var::from_dimacs(v)),
                        v => anyhow::bail!("negative opposing variable {} line {}", v, lineno),
                    };
                    let children = args[2..]
                        .iter()
                        .map(|&i| check_child(i, current_index))
                        .collect::<anyhow::Result<Vec<usize>>>()?;
                    Node::O(opposing, children)
                }
            };
            visitor.visit_node(&node)?;
            current_index += 1;
        }
        anyhow::ensure!(
            current_index == header.nnodes,
            "expected {} nodes, found {}",
            header.nnodes,
            current_index
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_nnf() -> anyhow::Result<()> {
        let text = "nnf 6 5 2\nL 1\nL -2\nA 2 0 1\nL -1\nO 1 2 2 3\nA 0\n";
        let nnf = MemoryNnf::from_source(TextSource(text))?;
        assert_eq!(
            nnf.header,
            Header {
                nvars: 2,
                nnodes: 6,
                nedges: 5
            }
        );
        assert_eq!(nnf.nodes[2], Node::A(vec![0, 1]));
        assert_eq!(
            nnf.nodes[4],
            Node::O(Some(Var::from_dimacs(1)), vec![2, 3])
        );
        assert_eq!(nnf.nodes[5], Node::A(vec![]));
        Ok(())
    }

    #[test]
    fn reject_bad_nnf() {
        let not_topological = "nnf 2 1 1\nA 1 1\nL 1\n";
        assert!(MemoryNnf::from_source(TextSource(not_topological)).is_err());
        let too_few = "nnf 3 0 1\nL 1\n";
        assert!(MemoryNnf::from_source(TextSource(too_few)).is_err());
        let bad_literal = "nnf 1 0 1\nL 2\n";
        assert!(MemoryNnf::from_source(TextSource(bad_literal)).is_err());
    }

    #[test]
    fn unknown_variable_count() -> anyhow::Result<()> {
        let text = "nnf 3 2 0\nL 4\nL -7\nA 2 0 1\n";
        let nnf = MemoryNnf::from_source(TextSource(text))?;
        assert_eq!(nnf.header.nvars, 0);
        assert_eq!(nnf.nodes[0], Node::L(Lit::from_dimacs(4)));
        assert_eq!(nnf.nodes[1], Node::L(Lit::from_dimacs(-7)));
        Ok(())
    }
}

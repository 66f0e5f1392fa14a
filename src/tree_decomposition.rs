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

//! Tree decompositions of circuits of bounded treewidth.

use crate::boolean_circuit::BooleanCircuit;
use crate::circuit::Gate;
use crate::graph::Graph;
use crate::permutation::PermutationStrategy;
use crate::utils::unsigned;
use anyhow::Context;
use nom::character::complete::multispace0;
use nom::multi::many0;
use nom::sequence::preceded;
use petgraph::dot::{Config, Dot};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::{trace, trace_span};

/// Decompositions wider than this are refused
pub const MAX_TREEWIDTH: usize = 10;
/// Maximum number of children of a bag in a friendly decomposition
pub const OPTIMAL_ARITY: usize = 2;

/// Index of a bag in a tree decomposition
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bag(usize);

impl Bag {
    /// The bag with this dense index
    pub fn from_index(index: usize) -> Bag {
        Bag(index)
    }

    /// dense index of the bag, starting at 0
    pub fn index(self) -> usize {
        self.0
    }
}

/// The elimination found a bag larger than allowed.
///
/// Carried inside `anyhow::Error`: callers fall back to another method when
/// `downcast_ref::<TreewidthExceeded>()` succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreewidthExceeded {
    /// width of the offending bag
    pub width: usize,
    /// allowed width
    pub max: usize,
}

impl fmt::Display for TreewidthExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Treewidth greater than {} (found a bag of width {})", self.max, self.width)
    }
}

impl std::error::Error for TreewidthExceeded {}

/// A tree of bags of gates such that the endpoints of every wire are together in some bag and
/// the bags containing a given gate form a subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDecomposition {
    bags: Vec<BTreeSet<Gate>>,
    parent: Vec<Bag>,
    children: Vec<Vec<Bag>>,
    root: Bag,
    treewidth: usize,
}

impl TreeDecomposition {
    /// Decomposition of `circuit` by min-degree elimination, of width at most [`MAX_TREEWIDTH`]
    pub fn new(circuit: &BooleanCircuit) -> anyhow::Result<Self> {
        Self::with_max_width(circuit, MAX_TREEWIDTH)
    }

    /// Decomposition of `circuit` by min-degree elimination.
    ///
    /// Fails with [`TreewidthExceeded`] as soon as a bag wider than `max_width` appears.
    pub fn with_max_width(circuit: &BooleanCircuit, max_width: usize) -> anyhow::Result<Self> {
        let span = trace_span!("tree_decomposition", timing = true).entered();
        let mut graph = Graph::from_circuit(circuit);
        let mut strategy = PermutationStrategy::new(&graph);
        let mut bags: Vec<BTreeSet<Gate>> = Vec::new();
        let mut neighbourhoods: Vec<BTreeSet<Gate>> = Vec::new();
        let mut eliminated_in: Vec<Option<usize>> = vec![None; circuit.nb_gates()];
        let mut max_bag_size = 0;
        while graph.number_nodes() > max_bag_size {
            let node = match strategy.get_next() {
                Some(node) => node,
                None => break,
            };
            let neighbours = graph.remove_node(node);
            let width = neighbours.len();
            if width > max_width {
                return Err(TreewidthExceeded {
                    width,
                    max: max_width,
                }
                .into());
            }
            graph.fill(&neighbours);
            strategy.recompute(&neighbours, &graph);
            let mut bag = neighbours.clone();
            bag.insert(node);
            max_bag_size = max_bag_size.max(bag.len());
            eliminated_in[node.index()] = Some(bags.len());
            bags.push(bag);
            neighbourhoods.push(neighbours);
        }
        let residual: BTreeSet<Gate> = graph.nodes().collect();
        if !residual.is_empty() || bags.is_empty() {
            bags.push(residual);
        }
        let root = Bag(bags.len() - 1);
        let mut parent: Vec<Bag> = neighbourhoods
            .iter()
            .map(|neighbours| {
                neighbours
                    .iter()
                    .filter_map(|n| eliminated_in[n.index()])
                    .min()
                    .map_or(root, Bag)
            })
            .collect();
        parent.resize(bags.len(), root);
        let mut td = TreeDecomposition {
            treewidth: 0,
            children: vec![Vec::new(); bags.len()],
            bags,
            parent,
            root,
        };
        td.rebuild_children();
        td.treewidth = td.max_bag_size().saturating_sub(1);
        trace!(
            stats = true,
            treewidth = td.treewidth,
            bags = td.nb_bags(),
            "tree decomposition"
        );
        drop(span);
        Ok(td)
    }

    fn rebuild_children(&mut self) {
        for children in self.children.iter_mut() {
            children.clear();
        }
        for (i, &parent) in self.parent.iter().enumerate() {
            if parent.0 != i {
                self.children[parent.0].push(Bag(i));
            }
        }
    }

    fn max_bag_size(&self) -> usize {
        self.bags.iter().map(BTreeSet::len).max().unwrap_or(0)
    }

    /// Size of the largest bag minus one
    pub fn treewidth(&self) -> usize {
        self.treewidth
    }

    /// The only bag which is its own parent
    pub fn root(&self) -> Bag {
        self.root
    }

    /// Number of bags
    pub fn nb_bags(&self) -> usize {
        self.bags.len()
    }

    /// All bags, by increasing index
    pub fn bags(&self) -> impl Iterator<Item = Bag> {
        (0..self.bags.len()).map(Bag)
    }

    /// Gates of a bag
    pub fn bag(&self, bag: Bag) -> &BTreeSet<Gate> {
        &self.bags[bag.0]
    }

    /// Parent of a bag, the root is its own parent
    pub fn parent(&self, bag: Bag) -> Bag {
        self.parent[bag.0]
    }

    /// Children of a bag
    pub fn children(&self, bag: Bag) -> &[Bag] {
        &self.children[bag.0]
    }

    fn add_bag(&mut self, parent: Bag, gates: BTreeSet<Gate>) -> Bag {
        let bag = Bag(self.bags.len());
        self.bags.push(gates);
        self.parent.push(parent);
        self.children.push(Vec::new());
        self.children[parent.0].push(bag);
        bag
    }

    fn link(&mut self, child: Bag, parent: Bag) {
        self.parent[child.0] = parent;
        self.children[parent.0].push(child);
    }

    /// First bag containing `gate`, or the root
    fn find_gate_connection(&self, gate: Gate) -> Bag {
        self.bags()
            .find(|&b| self.bags[b.0].contains(&gate))
            .unwrap_or(self.root)
    }

    /// Makes `bag` the root by reversing the parent links on the path to the old root
    fn reroot(&mut self, bag: Bag) {
        let mut path = vec![bag];
        let mut current = bag;
        while self.parent[current.0] != current {
            current = self.parent[current.0];
            path.push(current);
        }
        for pair in path.windows(2) {
            let (child, parent) = (pair[0], pair[1]);
            self.children[parent.0].retain(|&c| c != child);
            self.link(parent, child);
        }
        self.parent[bag.0] = bag;
        self.root = bag;
    }

    /// Normalizes the decomposition so that:
    /// - the root is the bag `{root}`;
    /// - every bag has at most [`OPTIMAL_ARITY`] children;
    /// - every leaf contains exactly one gate;
    /// - every gate of an internal bag appears in one of its children, and a bag whose gates
    ///   are not all in a single child is exactly the union of its children.
    pub fn make_friendly(&mut self, root: Gate) {
        let _span = trace_span!("make_friendly").entered();
        let connection = self.find_gate_connection(root);
        let new_root = self.add_bag(connection, std::iter::once(root).collect());
        self.reroot(new_root);

        let mut i = 0;
        while i < self.bags.len() {
            if self.children[i].len() > OPTIMAL_ARITY {
                let children = std::mem::take(&mut self.children[i]);
                let gates = self.bags[i].clone();
                let mut remaining = children.len();
                let mut current = Bag(i);
                for child in children {
                    if remaining > OPTIMAL_ARITY {
                        self.link(child, current);
                        let copy = self.add_bag(current, gates.clone());
                        current = copy;
                    } else {
                        self.link(child, current);
                    }
                    remaining -= 1;
                }
            }
            i += 1;
        }

        let mut i = 0;
        while i < self.bags.len() {
            if self.children[i].is_empty() && self.bags[i].len() > 1 {
                let mut rest = self.bags[i].clone();
                if let Some(last) = self.bags[i].iter().next_back().copied() {
                    rest.remove(&last);
                    self.add_bag(Bag(i), rest);
                    self.add_bag(Bag(i), std::iter::once(last).collect());
                }
            }
            i += 1;
        }

        for i in 0..self.bags.len() {
            if self.children[i].is_empty() {
                continue;
            }
            let mut covered = BTreeSet::new();
            for &child in &self.children[i] {
                covered.extend(self.bags[child.0].iter().copied());
            }
            let introduced: Vec<Gate> = self.bags[i].difference(&covered).copied().collect();
            let mut current = Bag(i);
            for gate in introduced {
                let mut remaining = self.bags[current.0].clone();
                remaining.remove(&gate);
                let children = std::mem::take(&mut self.children[current.0]);
                let reduced = self.add_bag(current, remaining);
                for child in children {
                    self.link(child, reduced);
                }
                self.add_bag(current, std::iter::once(gate).collect());
                current = reduced;
            }
        }
        trace!(stats = true, friendly_bags = self.nb_bags(), "friendly tree decomposition");
    }

    /// Checks that every wire of `circuit` has both endpoints in some bag and that the bags
    /// form a tree.
    pub fn check(&self, circuit: &BooleanCircuit) -> anyhow::Result<()> {
        let mut roots = 0;
        for bag in self.bags() {
            if self.parent(bag) == bag {
                roots += 1;
                continue;
            }
            let mut current = bag;
            for _ in 0..self.nb_bags() {
                current = self.parent(current);
            }
            anyhow::ensure!(current == self.root, "bag {} is not below the root", bag.0);
        }
        anyhow::ensure!(roots == 1, "{} bags are their own parent", roots);
        for gate in circuit.gates() {
            for &child in circuit.wires(gate) {
                anyhow::ensure!(
                    self.bags
                        .iter()
                        .any(|b| b.contains(&gate) && b.contains(&child)),
                    "no bag contains wire {} -> {}",
                    gate,
                    child
                );
            }
        }
        Ok(())
    }

    /// dot rendering of the tree
    pub fn to_dot(&self) -> String {
        let mut graph = petgraph::Graph::<String, &'static str>::new();
        let nodes: Vec<_> = self
            .bags
            .iter()
            .enumerate()
            .map(|(i, gates)| graph.add_node(format!("{}: {}", i, itertools::join(gates, " "))))
            .collect();
        for bag in self.bags() {
            for &child in self.children(bag) {
                graph.add_edge(nodes[bag.0], nodes[child.0], "");
            }
        }
        format!("{}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
    }
}

/// Text serialization: width, number of bags, then one line per bag with its id, number of
/// gates, gates, parent id, number of children and children ids.
impl fmt::Display for TreeDecomposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.treewidth)?;
        writeln!(f, "{}", self.bags.len())?;
        for bag in self.bags() {
            write!(f, "{} {}", bag.0, self.bags[bag.0].len())?;
            for gate in &self.bags[bag.0] {
                write!(f, " {}", gate)?;
            }
            write!(f, " {} {}", self.parent[bag.0].0, self.children[bag.0].len())?;
            for child in &self.children[bag.0] {
                write!(f, " {}", child.0)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl FromStr for TreeDecomposition {
    type Err = anyhow::Error;

    /// Reads the format of `Display`. Children lists are ignored and rebuilt from parents.
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (rest, numbers) = many0(preceded(multispace0, unsigned))(s)
            .map_err(|e| anyhow::anyhow!("parse error in tree decomposition: {}", e))?;
        anyhow::ensure!(
            rest.trim().is_empty(),
            "unexpected trailing data in tree decomposition: {:?}",
            rest
        );
        let mut numbers = numbers.into_iter();
        let mut next = |what: &str| {
            numbers
                .next()
                .with_context(|| format!("tree decomposition truncated, expected {}", what))
        };
        let treewidth = next("width")?;
        let nb_bags = next("number of bags")?;
        let mut bags = Vec::with_capacity(nb_bags);
        let mut parent = Vec::with_capacity(nb_bags);
        for i in 0..nb_bags {
            let id = next("bag id")?;
            anyhow::ensure!(id == i, "bag ids must be sequential, expected {} got {}", i, id);
            let size = next("bag size")?;
            let mut gates = BTreeSet::new();
            for _ in 0..size {
                gates.insert(Gate::from_index(next("gate")?));
            }
            bags.push(gates);
            let p = next("parent")?;
            parent.push(Bag(p));
            let nb_children = next("number of children")?;
            for _ in 0..nb_children {
                next("child")?;
            }
        }
        let mut root = None;
        for (i, &p) in parent.iter().enumerate() {
            anyhow::ensure!(p.0 < nb_bags, "parent {} of bag {} does not exist", p.0, i);
            if p.0 == i {
                anyhow::ensure!(root.is_none(), "several bags are their own parent");
                root = Some(p);
            }
        }
        let root = root.context("no root in tree decomposition")?;
        let mut td = TreeDecomposition {
            children: vec![Vec::new(); nb_bags],
            bags,
            parent,
            root,
            treewidth,
        };
        td.rebuild_children();
        let mut reached = vec![false; nb_bags];
        let mut stack = vec![root];
        while let Some(bag) = stack.pop() {
            if !std::mem::replace(&mut reached[bag.0], true) {
                stack.extend(td.children(bag).iter().copied());
            }
        }
        if let Some(orphan) = reached.iter().position(|&r| !r) {
            anyhow::bail!("bag {} is not connected to the root of the decomposition", orphan);
        }
        Ok(td)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::boolean_circuit::BooleanGate;

    /// root = AND(x1, AND(x2, AND(x3, x4)))
    fn and_chain() -> (BooleanCircuit, Gate) {
        let mut c = BooleanCircuit::new();
        let mut current = c.set_input("x4", 0.5);
        for i in (1..4).rev() {
            let input = c.set_input(&format!("x{}", i), 0.5);
            let and = c.add_gate(BooleanGate::And);
            c.add_wire(and, input);
            c.add_wire(and, current);
            current = and;
        }
        (c, current)
    }

    /// root = OR(AND(a, b), AND(b, c), AND(a, c))
    fn majority() -> (BooleanCircuit, Gate) {
        let mut c = BooleanCircuit::new();
        let inputs: Vec<Gate> = ["a", "b", "c"].iter().map(|n| c.set_input(n, 0.5)).collect();
        let root = c.set_gate("root", BooleanGate::Or);
        for (i, j) in [(0, 1), (1, 2), (0, 2)].iter() {
            let and = c.add_gate(BooleanGate::And);
            c.add_wire(and, inputs[*i]);
            c.add_wire(and, inputs[*j]);
            c.add_wire(root, and);
        }
        (c, root)
    }

    fn check_friendly(td: &TreeDecomposition, root: Gate) {
        assert_eq!(td.bag(td.root()), &std::iter::once(root).collect());
        for bag in td.bags() {
            let children = td.children(bag);
            assert!(children.len() <= OPTIMAL_ARITY);
            if children.is_empty() {
                assert_eq!(td.bag(bag).len(), 1, "leaf {:?}", bag);
                continue;
            }
            let mut union = BTreeSet::new();
            for &child in children {
                assert_eq!(td.parent(child), bag);
                union.extend(td.bag(child).iter().copied());
            }
            assert!(td.bag(bag).is_subset(&union), "bag {:?} has introduced gates", bag);
        }
    }

    #[test]
    fn chain_has_small_width() -> anyhow::Result<()> {
        let (c, _) = and_chain();
        let td = TreeDecomposition::new(&c)?;
        assert!(td.treewidth() <= 1, "{}", td);
        td.check(&c)?;
        Ok(())
    }

    #[test]
    fn majority_decomposition() -> anyhow::Result<()> {
        let (c, root) = majority();
        let mut td = TreeDecomposition::new(&c)?;
        td.check(&c)?;
        let width = td.treewidth();
        td.make_friendly(root);
        td.check(&c)?;
        check_friendly(&td, root);
        assert_eq!(td.max_bag_size() - 1, width);
        Ok(())
    }

    #[test]
    fn friendly_chain() -> anyhow::Result<()> {
        let (c, root) = and_chain();
        let mut td = TreeDecomposition::new(&c)?;
        td.make_friendly(root);
        td.check(&c)?;
        check_friendly(&td, root);
        Ok(())
    }

    #[test]
    fn width_budget() {
        // every gate reads all previous gates: a clique of 6 vertices
        let mut c = BooleanCircuit::new();
        let mut gates = vec![c.add_input(0.5)];
        for _ in 0..5 {
            let g = c.add_gate(BooleanGate::And);
            for &other in &gates {
                c.add_wire(g, other);
            }
            gates.push(g);
        }
        let err = TreeDecomposition::with_max_width(&c, 2).unwrap_err();
        assert_eq!(
            err.downcast_ref::<TreewidthExceeded>(),
            Some(&TreewidthExceeded { width: 5, max: 2 })
        );
        assert_eq!(TreeDecomposition::with_max_width(&c, 5).unwrap().treewidth(), 5);
    }

    #[test]
    fn empty_circuit() -> anyhow::Result<()> {
        let td = TreeDecomposition::new(&BooleanCircuit::new())?;
        assert_eq!(td.treewidth(), 0);
        assert_eq!(td.nb_bags(), 1);
        assert_eq!(td.parent(td.root()), td.root());
        Ok(())
    }

    #[test]
    fn serialization() -> anyhow::Result<()> {
        let (c, root) = majority();
        let mut td = TreeDecomposition::new(&c)?;
        td.make_friendly(root);
        let text = td.to_string();
        let parsed: TreeDecomposition = text.parse()?;
        assert_eq!(parsed.treewidth(), td.treewidth());
        assert_eq!(parsed.root(), td.root());
        for bag in td.bags() {
            assert_eq!(parsed.bag(bag), td.bag(bag));
            assert_eq!(parsed.parent(bag), td.parent(bag));
            let mut expected = td.children(bag).to_vec();
            let mut actual = parsed.children(bag).to_vec();
            expected.sort();
            actual.sort();
            assert_eq!(actual, expected);
        }
        assert!(td.to_dot().contains("digraph"));
        Ok(())
    }

    #[test]
    fn parse_errors() {
        assert!("1\n2\n0 1 3 0 0\n1 1 4 1 0\n".parse::<TreeDecomposition>().is_err());
        assert!("1\n2\n0 1 3 1 0\n1 1 4 1 0\n".parse::<TreeDecomposition>().is_ok());
        assert!("1\n2\n1 1 3 1 0\n0 1 4 1 0\n".parse::<TreeDecomposition>().is_err());
        assert!("1\n2\n0 1 3 1 0\n".parse::<TreeDecomposition>().is_err());
    }

    #[test]
    fn parent_cycle_is_rejected() {
        let cycle = "1\n3\n0 1 3 0 0\n1 1 4 2 0\n2 1 5 1 0\n";
        let err = cycle.parse::<TreeDecomposition>().unwrap_err();
        assert!(format!("{}", err).contains("not connected"), "{}", err);
        let tree = "1\n3\n0 1 3 0 0\n1 1 4 2 0\n2 1 5 0 0\n";
        assert!(tree.parse::<TreeDecomposition>().is_ok());
    }
}

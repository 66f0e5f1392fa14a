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

//! Undirected graph of a circuit, consumed by vertex elimination.

use crate::boolean_circuit::{BooleanCircuit, BooleanGate};
use crate::circuit::Gate;
use itertools::Itertools;
use petgraph::graphmap::UnGraphMap;
use std::collections::BTreeSet;

/// Undirected graph whose vertices are gates.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    graph: UnGraphMap<Gate, ()>,
}

impl Graph {
    /// An empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// The primal graph of a circuit: one vertex per defined gate, one edge per wire.
    pub fn from_circuit(circuit: &BooleanCircuit) -> Self {
        let mut graph = Self::new();
        for gate in circuit.gates() {
            if circuit.gate_type(gate) == BooleanGate::Undetermined {
                continue;
            }
            graph.add_node(gate);
            for &child in circuit.wires(gate) {
                if circuit.gate_type(child) != BooleanGate::Undetermined {
                    graph.add_edge(gate, child);
                }
            }
        }
        graph
    }

    /// Adds a vertex, does nothing if it exists
    pub fn add_node(&mut self, node: Gate) {
        self.graph.add_node(node);
    }

    /// Adds an edge and its endpoints. Self loops are ignored.
    pub fn add_edge(&mut self, a: Gate, b: Gate) {
        if a != b {
            self.graph.add_edge(a, b, ());
        }
    }

    /// Removes a vertex and returns its former neighbours
    pub fn remove_node(&mut self, node: Gate) -> BTreeSet<Gate> {
        let neighbours = self.neighbours(node).collect();
        self.graph.remove_node(node);
        neighbours
    }

    /// Makes `nodes` a clique
    pub fn fill(&mut self, nodes: &BTreeSet<Gate>) {
        for (&a, &b) in nodes.iter().tuple_combinations() {
            self.add_edge(a, b);
        }
    }

    /// Merges `tgt` into `src`: neighbours of `tgt` become neighbours of `src`, then `tgt` is
    /// removed.
    pub fn contract_edge(&mut self, src: Gate, tgt: Gate) {
        for neighbour in self.remove_node(tgt) {
            self.add_edge(src, neighbour);
        }
    }

    /// Neighbours of a vertex
    pub fn neighbours(&self, node: Gate) -> impl Iterator<Item = Gate> + '_ {
        self.graph.neighbors(node)
    }

    /// Number of neighbours of a vertex
    pub fn degree(&self, node: Gate) -> usize {
        self.neighbours(node).count()
    }

    /// Whether `a` and `b` are adjacent
    pub fn has_edge(&self, a: Gate, b: Gate) -> bool {
        self.graph.contains_edge(a, b)
    }

    /// Whether this vertex is in the graph
    pub fn has_node(&self, node: Gate) -> bool {
        self.graph.contains_node(node)
    }

    /// All vertices
    pub fn nodes(&self) -> impl Iterator<Item = Gate> + '_ {
        self.graph.nodes()
    }

    /// Number of vertices
    pub fn number_nodes(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges
    pub fn number_edges(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn g(i: usize) -> Gate {
        Gate::from_index(i)
    }

    #[test]
    fn removal_returns_neighbours() {
        let mut graph = Graph::new();
        graph.add_edge(g(0), g(1));
        graph.add_edge(g(0), g(2));
        graph.add_edge(g(1), g(2));
        graph.add_edge(g(2), g(2));
        assert_eq!(graph.number_edges(), 3);
        assert!(graph.has_edge(g(1), g(0)));
        let removed = graph.remove_node(g(0));
        assert_eq!(removed, vec![g(1), g(2)].into_iter().collect());
        assert_eq!(graph.number_edges(), 1);
        assert_eq!(graph.number_nodes(), 2);
        assert!(!graph.has_node(g(0)));
    }

    #[test]
    fn fill_and_contract() {
        let mut graph = Graph::new();
        for i in 1..4 {
            graph.add_edge(g(0), g(i));
        }
        let leaves: BTreeSet<Gate> = (1..4).map(g).collect();
        graph.fill(&leaves);
        assert_eq!(graph.number_edges(), 6);
        graph.contract_edge(g(1), g(0));
        assert_eq!(graph.number_nodes(), 3);
        assert_eq!(graph.number_edges(), 3);
        assert_eq!(graph.degree(g(1)), 2);
    }

    #[test]
    fn circuit_graph_skips_undetermined() {
        let mut c = BooleanCircuit::new();
        let a = c.set_input("a", 0.5);
        let root = c.set_gate("root", BooleanGate::Not);
        c.add_wire(root, a);
        let other = c.set_gate("other", BooleanGate::Or);
        let missing = c.get_gate("missing");
        c.add_wire(other, missing);
        let graph = Graph::from_circuit(&c);
        assert_eq!(graph.number_nodes(), 3);
        assert_eq!(graph.number_edges(), 1);
        assert!(graph.has_edge(a, root));
        assert_eq!(graph.degree(other), 0);
    }
}

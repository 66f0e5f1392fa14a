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

//! Min-degree elimination ordering.

use crate::circuit::Gate;
use crate::graph::Graph;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

/// Priority queue of the vertices of a [`Graph`] by increasing degree, ties going to the vertex
/// with the highest index.
#[derive(Debug, Clone, Default)]
pub struct PermutationStrategy {
    queue: BTreeSet<(usize, Reverse<Gate>)>,
    degrees: HashMap<Gate, usize>,
}

impl PermutationStrategy {
    /// A strategy for all the vertices of `graph`
    pub fn new(graph: &Graph) -> Self {
        let mut res = Self::default();
        res.init_permutation(graph);
        res
    }

    /// Forgets everything and ranks all the vertices of `graph`
    pub fn init_permutation(&mut self, graph: &Graph) {
        self.queue.clear();
        self.degrees.clear();
        for node in graph.nodes() {
            self.insert(node, graph.degree(node));
        }
    }

    fn insert(&mut self, node: Gate, degree: usize) {
        if let Some(old) = self.degrees.insert(node, degree) {
            self.queue.remove(&(old, Reverse(node)));
        }
        self.queue.insert((degree, Reverse(node)));
    }

    /// Updates the rank of `nodes` after `graph` changed
    pub fn recompute<'a, I: IntoIterator<Item = &'a Gate>>(&mut self, nodes: I, graph: &Graph) {
        for &node in nodes {
            self.insert(node, graph.degree(node));
        }
    }

    /// Removes and returns the vertex of lowest degree
    pub fn get_next(&mut self) -> Option<Gate> {
        let first = *self.queue.iter().next()?;
        self.queue.remove(&first);
        let (_, Reverse(node)) = first;
        self.degrees.remove(&node);
        Some(node)
    }

    /// Whether all vertices were returned
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn g(i: usize) -> Gate {
        Gate::from_index(i)
    }

    #[test]
    fn lowest_degree_first_then_highest_index() {
        // star centered on 0, plus 3 - 4
        let mut graph = Graph::new();
        for i in 1..4 {
            graph.add_edge(g(0), g(i));
        }
        graph.add_edge(g(3), g(4));
        let mut strategy = PermutationStrategy::new(&graph);
        assert_eq!(strategy.get_next(), Some(g(4)));
        let neighbours = graph.remove_node(g(4));
        strategy.recompute(&neighbours, &graph);
        assert_eq!(strategy.get_next(), Some(g(3)));
        assert_eq!(strategy.get_next(), Some(g(2)));
        assert_eq!(strategy.get_next(), Some(g(1)));
        assert_eq!(strategy.get_next(), Some(g(0)));
        assert!(strategy.is_empty());
        assert_eq!(strategy.get_next(), None);
    }
}

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

//! Generic circuits: an arena of typed gates with ordered wires, where gates can be named by
//! external identifiers.

use fixedbitset::FixedBitSet;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Index of a gate in a circuit
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Gate(usize);

impl Gate {
    /// The gate with this dense index
    pub fn from_index(index: usize) -> Gate {
        Gate(index)
    }

    /// dense index of the gate, starting at 0
    pub fn index(self) -> usize {
        self.0
    }

    /// The variable number of this gate in DIMACS files: index + 1
    pub fn to_dimacs(self) -> isize {
        self.0 as isize + 1
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failures of circuit algorithms.
///
/// Carried inside `anyhow::Error` and recovered with `downcast_ref` when a caller has a fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitError {
    /// A variable is read at two places, so closed form evaluation is unsound
    NotIndependent(Gate),
    /// A multivalued input reached an algorithm that only supports Boolean inputs
    Multivalued(Gate),
    /// Enumerating worlds over this many inputs is not possible
    TooManyInputs(usize),
    /// This gate was referenced but never defined
    Undetermined(Gate),
    /// This gate is its own descendant
    Cyclic(Gate),
    /// This gate has a type or arity the algorithm cannot handle
    Unsupported(Gate, &'static str),
    /// An external tool returned something we cannot read
    MalformedOutput(String),
    /// An external tool failed
    External(String),
    /// No such knowledge compiler
    UnknownEngine(String),
    /// The cancellation token was triggered after that many iterations
    Interrupted {
        /// number of iterations done
        done: u64,
        /// what an iteration is
        unit: &'static str,
    },
}

impl fmt::Display for CircuitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitError::NotIndependent(g) => {
                write!(f, "Not an independent circuit: gate {} is used twice", g)
            }
            CircuitError::Multivalued(g) => write!(
                f,
                "Multivalued input {} must be rewritten before this operation",
                g
            ),
            CircuitError::TooManyInputs(n) => {
                write!(f, "Too many inputs ({}) to enumerate possible worlds", n)
            }
            CircuitError::Undetermined(g) => write!(f, "Gate {} is undetermined", g),
            CircuitError::Cyclic(g) => write!(f, "Gate {} is on a cycle of wires", g),
            CircuitError::Unsupported(g, what) => write!(f, "Unsupported gate {}: {}", g, what),
            CircuitError::MalformedOutput(msg) => write!(f, "Unreadable d-DNNF: {}", msg),
            CircuitError::External(msg) => write!(f, "{}", msg),
            CircuitError::UnknownEngine(name) => write!(f, "Unknown compiler '{}'", name),
            CircuitError::Interrupted { done, unit } => {
                write!(f, "Interrupted after {} {}", done, unit)
            }
        }
    }
}

impl std::error::Error for CircuitError {}

/// A type of gate
pub trait GateType: Copy + Eq + fmt::Debug + Default {}

/// A DAG of gates, with ordered wires from each gate to its children.
#[derive(Debug, Clone)]
pub struct Circuit<T> {
    gates: Vec<T>,
    wires: Vec<Vec<Gate>>,
    uuid2id: HashMap<String, Gate>,
    id2uuid: HashMap<Gate, String>,
}

impl<T: GateType> Default for Circuit<T> {
    fn default() -> Self {
        Circuit {
            gates: Vec::new(),
            wires: Vec::new(),
            uuid2id: HashMap::new(),
            id2uuid: HashMap::new(),
        }
    }
}

impl<T: GateType> Circuit<T> {
    /// An empty circuit
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an anonymous gate
    pub fn add_gate(&mut self, t: T) -> Gate {
        let gate = Gate(self.gates.len());
        self.gates.push(t);
        self.wires.push(Vec::new());
        gate
    }

    /// Returns the gate named `uuid`, creating it with the default type if needed
    pub fn get_gate(&mut self, uuid: &str) -> Gate {
        if let Some(&gate) = self.uuid2id.get(uuid) {
            return gate;
        }
        let gate = self.add_gate(T::default());
        self.set_uuid(gate, uuid);
        gate
    }

    /// Returns the gate named `uuid` if it exists
    pub fn find_gate(&self, uuid: &str) -> Option<Gate> {
        self.uuid2id.get(uuid).copied()
    }

    /// Whether a gate is named `uuid`
    pub fn has_gate(&self, uuid: &str) -> bool {
        self.uuid2id.contains_key(uuid)
    }

    /// External identifier of this gate
    pub fn uuid(&self, gate: Gate) -> Option<&str> {
        self.id2uuid.get(&gate).map(String::as_str)
    }

    /// Names a gate. The previous name of the gate, if any, is forgotten, and so is the gate
    /// previously named `uuid`.
    pub fn set_uuid(&mut self, gate: Gate, uuid: &str) {
        self.remove_uuid(gate);
        if let Some(owner) = self.uuid2id.remove(uuid) {
            self.id2uuid.remove(&owner);
        }
        self.uuid2id.insert(uuid.to_owned(), gate);
        self.id2uuid.insert(gate, uuid.to_owned());
    }

    /// Makes a gate anonymous, returns its former name
    pub fn remove_uuid(&mut self, gate: Gate) -> Option<String> {
        let uuid = self.id2uuid.remove(&gate)?;
        self.uuid2id.remove(&uuid);
        Some(uuid)
    }

    /// Type of a gate
    pub fn gate_type(&self, gate: Gate) -> T {
        self.gates[gate.0]
    }

    pub(crate) fn set_gate_type(&mut self, gate: Gate, t: T) {
        self.gates[gate.0] = t;
    }

    /// Children of a gate
    pub fn wires(&self, gate: Gate) -> &[Gate] {
        &self.wires[gate.0]
    }

    pub(crate) fn wires_mut(&mut self, gate: Gate) -> &mut Vec<Gate> {
        &mut self.wires[gate.0]
    }

    /// Adds `to` as last child of `from`
    pub fn add_wire(&mut self, from: Gate, to: Gate) {
        self.wires[from.0].push(to);
    }

    /// Number of gates
    pub fn nb_gates(&self) -> usize {
        self.gates.len()
    }

    /// All gates, by increasing index
    pub fn gates(&self) -> impl Iterator<Item = Gate> {
        (0..self.gates.len()).map(Gate)
    }

    /// Fails with [`CircuitError::Cyclic`] unless the wires form a DAG.
    pub fn check_acyclic(&self) -> anyhow::Result<()> {
        let mut graph = DiGraphMap::<Gate, ()>::with_capacity(self.nb_gates(), 0);
        for gate in self.gates() {
            graph.add_node(gate);
            for &child in self.wires(gate) {
                graph.add_edge(gate, child, ());
            }
        }
        match toposort(&graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(CircuitError::Cyclic(cycle.node_id()).into()),
        }
    }

    /// All gates reachable from `root`, each exactly once, children before parents.
    pub fn post_order(&self, root: Gate) -> Vec<Gate> {
        let mut visited = FixedBitSet::with_capacity(self.nb_gates());
        visited.insert(root.0);
        let mut order = Vec::new();
        let mut stack = vec![(root, 0)];
        while let Some(top) = stack.last_mut() {
            let (gate, next) = *top;
            match self.wires[gate.0].get(next) {
                Some(&child) => {
                    top.1 += 1;
                    if !visited.put(child.0) {
                        stack.push((child, 0));
                    }
                }
                None => {
                    stack.pop();
                    order.push(gate);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    enum Color {
        Red,
        Blue,
    }

    impl Default for Color {
        fn default() -> Self {
            Color::Red
        }
    }

    impl GateType for Color {}

    #[test]
    fn interning() {
        let mut c: Circuit<Color> = Circuit::new();
        let a = c.get_gate("a");
        assert_eq!(c.get_gate("a"), a);
        assert_eq!(c.gate_type(a), Color::Red);
        let b = c.add_gate(Color::Blue);
        assert_eq!(c.uuid(b), None);
        c.set_uuid(b, "b");
        assert_eq!(c.find_gate("b"), Some(b));
        assert_eq!(c.remove_uuid(a).as_deref(), Some("a"));
        assert!(!c.has_gate("a"));
        assert_eq!(c.nb_gates(), 2);
    }

    #[test]
    fn post_order_visits_shared_gates_once() -> anyhow::Result<()> {
        let mut c: Circuit<Color> = Circuit::new();
        let leaf = c.add_gate(Color::Blue);
        let left = c.add_gate(Color::Red);
        let right = c.add_gate(Color::Red);
        let root = c.add_gate(Color::Red);
        let unreachable = c.add_gate(Color::Red);
        c.add_wire(unreachable, leaf);
        c.add_wire(left, leaf);
        c.add_wire(right, leaf);
        c.add_wire(root, left);
        c.add_wire(root, right);
        assert_eq!(c.post_order(root), vec![leaf, left, right, root]);
        c.check_acyclic()?;
        c.add_wire(leaf, right);
        let err = c.check_acyclic().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CircuitError>(),
            Some(CircuitError::Cyclic(_))
        ));
        Ok(())
    }

    #[test]
    fn renaming_moves_the_name() {
        let mut c: Circuit<Color> = Circuit::new();
        let a = c.get_gate("x");
        let b = c.add_gate(Color::Blue);
        c.set_uuid(b, "x");
        assert_eq!(c.find_gate("x"), Some(b));
        assert_eq!(c.uuid(b), Some("x"));
        assert_eq!(c.uuid(a), None);
        assert_eq!(c.remove_uuid(a), None);
        assert_eq!(c.find_gate("x"), Some(b));
    }
}

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

//! Compilation of a Boolean circuit of bounded treewidth to a d-DNNF, by dynamic programming
//! over a friendly tree decomposition.
//!
//! Each bag produces a list of entries `(gate, valuation, suspicious)`: `gate` is a d-DNNF gate
//! which is true exactly on the input worlds where the gates of the bag take the values of
//! `valuation`, consistently with the part of the circuit below the bag. Suspicious gates have a
//! strong value (a value which a child must justify, like true for OR) that is not justified yet.

use crate::boolean_circuit::{BooleanCircuit, BooleanGate};
use crate::circuit::{CircuitError, Gate};
use crate::ddnnf::DDnnf;
use crate::tree_decomposition::{Bag, TreeDecomposition};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{trace, trace_span};

type Valuation = BTreeMap<Gate, bool>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    id: Gate,
    valuation: Valuation,
    suspicious: BTreeSet<Gate>,
}

/// Whether a gate of type `t` with value `value` needs one of its children to justify it.
fn is_strong(t: BooleanGate, value: bool) -> bool {
    match t {
        BooleanGate::Or => value,
        BooleanGate::And => !value,
        BooleanGate::In => false,
        BooleanGate::Not | BooleanGate::Mulin | BooleanGate::Undetermined => true,
    }
}

/// Builds a d-DNNF equivalent to a gate of a circuit from a tree decomposition of the circuit.
pub struct DDnnfTreeDecompositionBuilder<'a> {
    circuit: &'a BooleanCircuit,
    root: Gate,
    td: TreeDecomposition,
    dd: BooleanCircuit,
    responsible_bag: HashMap<Gate, Bag>,
    input_gate: HashMap<Gate, Gate>,
    negated_input_gate: HashMap<Gate, Gate>,
    true_gate: Gate,
    wires: HashSet<(Gate, Gate)>,
}

impl<'a> DDnnfTreeDecompositionBuilder<'a> {
    /// Prepares the compilation of `root`. `td` must be a tree decomposition of `circuit`; it is
    /// made friendly here.
    pub fn new(
        circuit: &'a BooleanCircuit,
        root: Gate,
        mut td: TreeDecomposition,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(root.index() < circuit.nb_gates(), "no gate {} in circuit", root);
        if let Some(&gate) = circuit.mulinputs().iter().next() {
            return Err(CircuitError::Multivalued(gate).into());
        }
        if let Some(gate) = circuit
            .gates()
            .find(|&g| circuit.gate_type(g) == BooleanGate::Undetermined)
        {
            return Err(CircuitError::Undetermined(gate).into());
        }
        td.make_friendly(root);

        let mut responsible_bag = HashMap::new();
        for bag in td.bags() {
            if !td.children(bag).is_empty() {
                continue;
            }
            if let Some(&gate) = td.bag(bag).iter().next() {
                if td.bag(bag).len() == 1 && circuit.gate_type(gate) == BooleanGate::In {
                    responsible_bag.insert(gate, bag);
                }
            }
        }

        let mut dd = BooleanCircuit::new();
        let mut input_gate = HashMap::new();
        let mut negated_input_gate = HashMap::new();
        for &input in circuit.inputs() {
            anyhow::ensure!(
                responsible_bag.contains_key(&input),
                "no leaf bag responsible for input {}",
                input
            );
            let positive = dd.add_input(circuit.prob(input));
            if let Some(uuid) = circuit.uuid(input) {
                dd.set_uuid(positive, uuid);
            }
            let negative = dd.add_gate(BooleanGate::Not);
            dd.add_wire(negative, positive);
            input_gate.insert(input, positive);
            negated_input_gate.insert(input, negative);
        }
        let true_gate = dd.add_gate(BooleanGate::And);

        let mut wires = HashSet::new();
        for gate in circuit.gates() {
            for &child in circuit.wires(gate) {
                wires.insert((gate, child));
            }
        }

        Ok(DDnnfTreeDecompositionBuilder {
            circuit,
            root,
            td,
            dd,
            responsible_bag,
            input_gate,
            negated_input_gate,
            true_gate,
            wires,
        })
    }

    fn has_wire(&self, from: Gate, to: Gate) -> bool {
        self.wires.contains(&(from, to))
    }

    /// Runs the dynamic program, bottom up from the leaves of the decomposition.
    pub fn build(mut self) -> anyhow::Result<DDnnf> {
        let span = trace_span!("ddnnf_builder", timing = true).entered();
        let mut results: Vec<Option<Vec<Entry>>> = vec![None; self.td.nb_bags()];
        let mut stack = vec![(self.td.root(), false)];
        while let Some((bag, expanded)) = stack.pop() {
            let children = self.td.children(bag).to_vec();
            let entries = match children.as_slice() {
                [] => self.leaf(bag)?,
                _ if !expanded => {
                    stack.push((bag, true));
                    stack.extend(children.iter().map(|&c| (c, false)));
                    continue;
                }
                [child] => {
                    let first = results[child.index()].take().unwrap_or_default();
                    self.merge(bag, &first, None)
                }
                [left, right] => {
                    let first = results[left.index()].take().unwrap_or_default();
                    let second = results[right.index()].take().unwrap_or_default();
                    self.merge(bag, &first, Some(&second))
                }
                _ => anyhow::bail!("bag {:?} of a friendly decomposition has more than 2 children", bag),
            };
            results[bag.index()] = Some(entries);
        }

        let root_gate = self.dd.add_gate(BooleanGate::Or);
        for entry in results[self.td.root().index()].take().unwrap_or_default() {
            if entry.suspicious.is_empty() && entry.valuation.get(&self.root) == Some(&true) {
                self.dd.add_wire(root_gate, entry.id);
            }
        }
        trace!(
            stats = true,
            bags = self.td.nb_bags(),
            dnnf_gates = self.dd.nb_gates(),
            "d-DNNF from tree decomposition"
        );
        drop(span);
        Ok(DDnnf::new(self.dd, root_gate))
    }

    fn leaf(&self, bag: Bag) -> anyhow::Result<Vec<Entry>> {
        let gates = self.td.bag(bag);
        let gate = match gates.iter().next() {
            None => return Ok(Vec::new()),
            Some(&gate) => gate,
        };
        anyhow::ensure!(gates.len() == 1, "leaf bag {:?} has several gates", bag);
        let single = |value: bool| std::iter::once((gate, value)).collect::<Valuation>();
        let t = self.circuit.gate_type(gate);
        if t == BooleanGate::In && self.responsible_bag.get(&gate) == Some(&bag) {
            return Ok(vec![
                Entry {
                    id: self.input_gate[&gate],
                    valuation: single(true),
                    suspicious: BTreeSet::new(),
                },
                Entry {
                    id: self.negated_input_gate[&gate],
                    valuation: single(false),
                    suspicious: BTreeSet::new(),
                },
            ]);
        }
        Ok([true, false]
            .iter()
            .map(|&value| Entry {
                id: self.true_gate,
                valuation: single(value),
                suspicious: if is_strong(t, value) {
                    std::iter::once(gate).collect()
                } else {
                    BTreeSet::new()
                },
            })
            .collect())
    }

    fn merge(&mut self, bag: Bag, first: &[Entry], second: Option<&[Entry]>) -> Vec<Entry> {
        let bag_gates = self.td.bag(bag).clone();
        let neutral = [Entry {
            id: self.true_gate,
            valuation: Valuation::new(),
            suspicious: BTreeSet::new(),
        }];
        let second = second.unwrap_or(&neutral);
        let mut groups: BTreeMap<(Valuation, BTreeSet<Gate>), Vec<Gate>> = BTreeMap::new();
        for e1 in first {
            if !e1.suspicious.is_subset(&bag_gates) {
                continue;
            }
            let mut partial_valuation = Valuation::new();
            let mut partial_innocent = BTreeSet::new();
            for (&gate, &value) in &e1.valuation {
                if bag_gates.contains(&gate) {
                    partial_valuation.insert(gate, value);
                    if !e1.suspicious.contains(&gate) {
                        partial_innocent.insert(gate);
                    }
                }
            }
            for e2 in second {
                if !e2.suspicious.is_subset(&bag_gates) {
                    continue;
                }
                let agree = e2
                    .valuation
                    .iter()
                    .all(|(g, v)| e1.valuation.get(g).map_or(true, |v1| v1 == v));
                if !agree {
                    continue;
                }
                let mut valuation = partial_valuation.clone();
                let mut innocent = partial_innocent.clone();
                for (&gate, &value) in &e2.valuation {
                    if bag_gates.contains(&gate) {
                        valuation.insert(gate, value);
                        if !e2.suspicious.contains(&gate) {
                            innocent.insert(gate);
                        }
                    }
                }
                if !self.is_almost_valuation(&valuation) {
                    continue;
                }
                let suspicious = self.suspicious(&valuation, &bag_gates, &innocent);
                let parts: Vec<Gate> = [e1.id, e2.id]
                    .iter()
                    .copied()
                    .filter(|&g| g != self.true_gate)
                    .collect();
                let id = match parts.as_slice() {
                    [] => self.true_gate,
                    &[only] => only,
                    _ => {
                        let and = self.dd.add_gate(BooleanGate::And);
                        for &g in &parts {
                            self.dd.add_wire(and, g);
                        }
                        and
                    }
                };
                groups.entry((valuation, suspicious)).or_default().push(id);
            }
        }
        groups
            .into_iter()
            .map(|((valuation, suspicious), gates)| {
                let id = match gates.as_slice() {
                    &[only] => only,
                    _ => {
                        let or = self.dd.add_gate(BooleanGate::Or);
                        for &g in &gates {
                            self.dd.add_wire(or, g);
                        }
                        or
                    }
                };
                Entry {
                    id,
                    valuation,
                    suspicious,
                }
            })
            .collect()
    }

    /// Whether no wire between gates of the valuation contradicts the semantics of its source.
    ///
    /// Only wires whose target has a value strong for the source are checked: other constraints
    /// are enforced through suspicious gates.
    fn is_almost_valuation(&self, valuation: &Valuation) -> bool {
        for (&parent, &parent_value) in valuation {
            let t = self.circuit.gate_type(parent);
            for (&child, &child_value) in valuation {
                if parent == child
                    || !is_strong(t, child_value)
                    || !self.has_wire(parent, child)
                {
                    continue;
                }
                let consistent = match t {
                    BooleanGate::And | BooleanGate::Or => parent_value == child_value,
                    BooleanGate::Not => parent_value != child_value,
                    BooleanGate::In | BooleanGate::Mulin | BooleanGate::Undetermined => true,
                };
                if !consistent {
                    return false;
                }
            }
        }
        true
    }

    /// Gates of the valuation whose strong value is neither innocent nor justified by a child in
    /// the bag.
    fn suspicious(
        &self,
        valuation: &Valuation,
        bag: &BTreeSet<Gate>,
        innocent: &BTreeSet<Gate>,
    ) -> BTreeSet<Gate> {
        let mut result = BTreeSet::new();
        for (&gate, &value) in valuation {
            if innocent.contains(&gate) {
                continue;
            }
            let t = self.circuit.gate_type(gate);
            if !is_strong(t, value) {
                continue;
            }
            let justified = bag.iter().any(|&child| {
                child != gate
                    && self.has_wire(gate, child)
                    && valuation.get(&child).map_or(false, |&v| is_strong(t, v))
            });
            if !justified {
                result.insert(gate);
            }
        }
        result
    }
}

impl DDnnf {
    /// d-DNNF equivalent to `root`, through a tree decomposition of `circuit`.
    ///
    /// Fails with [`crate::tree_decomposition::TreewidthExceeded`] when the circuit is too wide.
    pub fn from_tree_decomposition(circuit: &BooleanCircuit, root: Gate) -> anyhow::Result<Self> {
        let td = TreeDecomposition::new(circuit)?;
        DDnnfTreeDecompositionBuilder::new(circuit, root, td)?.build()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::{almost_equals, CancellationToken};

    /// Builds the d-DNNF of `root` and checks it against possible worlds
    fn check(circuit: &BooleanCircuit, root: Gate) -> anyhow::Result<DDnnf> {
        let dd = DDnnf::from_tree_decomposition(circuit, root)?;
        let expected = circuit.possible_worlds(root, &CancellationToken::new())?;
        let actual = dd.probability_evaluation()?;
        assert!(
            almost_equals(actual, expected),
            "{} vs {} for {}",
            actual,
            expected,
            circuit.render(root)
        );
        Ok(dd)
    }

    fn inputs(c: &mut BooleanCircuit, probs: &[f64]) -> Vec<Gate> {
        probs
            .iter()
            .enumerate()
            .map(|(i, &p)| c.set_input(&format!("x{}", i), p))
            .collect()
    }

    #[test]
    fn single_input() -> anyhow::Result<()> {
        let mut c = BooleanCircuit::new();
        let x = c.set_input("x", 0.3);
        check(&c, x)?;
        Ok(())
    }

    #[test]
    fn and_chain() -> anyhow::Result<()> {
        let mut c = BooleanCircuit::new();
        let xs = inputs(&mut c, &[0.9, 0.8, 0.7, 0.6]);
        let mut current = xs[3];
        for &x in xs[..3].iter().rev() {
            let and = c.add_gate(BooleanGate::And);
            c.add_wire(and, x);
            c.add_wire(and, current);
            current = and;
        }
        assert!(crate::tree_decomposition::TreeDecomposition::new(&c)?.treewidth() <= 1);
        check(&c, current)?;
        Ok(())
    }

    #[test]
    fn shared_inputs_and_negation() -> anyhow::Result<()> {
        // (a ∧ b) ∨ ¬(a ∨ c)
        let mut c = BooleanCircuit::new();
        let xs = inputs(&mut c, &[0.3, 0.6, 0.2]);
        let and = c.add_gate(BooleanGate::And);
        c.add_wire(and, xs[0]);
        c.add_wire(and, xs[1]);
        let or = c.add_gate(BooleanGate::Or);
        c.add_wire(or, xs[0]);
        c.add_wire(or, xs[2]);
        let not = c.add_gate(BooleanGate::Not);
        c.add_wire(not, or);
        let root = c.add_gate(BooleanGate::Or);
        c.add_wire(root, and);
        c.add_wire(root, not);
        check(&c, root)?;
        check(&c, not)?;
        Ok(())
    }

    #[test]
    fn majority_and_shapley() -> anyhow::Result<()> {
        let mut c = BooleanCircuit::new();
        let xs = inputs(&mut c, &[0.5, 0.5, 0.5]);
        let root = c.add_gate(BooleanGate::Or);
        for &(i, j) in [(0, 1), (1, 2), (0, 2)].iter() {
            let and = c.add_gate(BooleanGate::And);
            c.add_wire(and, xs[i]);
            c.add_wire(and, xs[j]);
            c.add_wire(root, and);
        }
        let mut dd = check(&c, root)?;
        dd.make_smooth();
        dd.make_gates_binary(BooleanGate::And)?;
        assert!(almost_equals(dd.probability_evaluation()?, 0.5));
        let values = dd.shapley_all_vars()?;
        assert_eq!(values.len(), 3);
        for &(_, value) in &values {
            assert!(almost_equals(value, 1. / 6.), "{:?}", values);
        }
        let total: f64 = values.iter().map(|(_, v)| v).sum();
        assert!(almost_equals(total, 0.5));
        for var in dd.inputs() {
            assert!(dd.uuid(*var).is_some());
        }
        Ok(())
    }

    #[test]
    fn unused_inputs_and_constants() -> anyhow::Result<()> {
        // OR(a, AND()) is always true, b is not read
        let mut c = BooleanCircuit::new();
        let xs = inputs(&mut c, &[0.3, 0.4]);
        let t = c.add_gate(BooleanGate::And);
        let root = c.add_gate(BooleanGate::Or);
        c.add_wire(root, xs[0]);
        c.add_wire(root, t);
        check(&c, root)?;
        let f = c.add_gate(BooleanGate::Or);
        check(&c, f)?;
        Ok(())
    }

    #[test]
    fn rejects_multivalued() {
        let mut c = BooleanCircuit::new();
        let x = c.set_mulinput("x", 0.5, 1);
        let err = DDnnf::from_tree_decomposition(&c, x).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CircuitError>(),
            Some(&CircuitError::Multivalued(x))
        );
    }
}

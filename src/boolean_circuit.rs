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

//! Boolean provenance circuits, whose inputs are independent random variables.

use crate::circuit::{Circuit, CircuitError, Gate, GateType};
use crate::utils::{almost_equals, CancellationToken};
use fixedbitset::FixedBitSet;
use petgraph::dot::{Config, Dot};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;
use std::str::FromStr;
use tracing::{debug, trace, trace_span};

/// Types of gates of a Boolean circuit
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BooleanGate {
    /// Referenced but not defined yet
    Undetermined,
    /// Boolean input, true with its probability
    In,
    /// One alternative of a categorical input: the inputs sharing a key are mutually exclusive
    Mulin,
    /// Conjunction, true when empty
    And,
    /// Disjunction, false when empty
    Or,
    /// Negation of its only child
    Not,
}

impl Default for BooleanGate {
    fn default() -> Self {
        BooleanGate::Undetermined
    }
}

impl GateType for BooleanGate {}

impl FromStr for BooleanGate {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "UNDETERMINED" => BooleanGate::Undetermined,
            "IN" => BooleanGate::In,
            "MULIN" => BooleanGate::Mulin,
            "AND" => BooleanGate::And,
            "OR" => BooleanGate::Or,
            "NOT" => BooleanGate::Not,
            _ => anyhow::bail!("Unknown gate type {}", s),
        })
    }
}

/// A circuit over [`BooleanGate`]s, with a probability for each input and a key for each
/// multivalued input.
#[derive(Debug, Clone, Default)]
pub struct BooleanCircuit {
    circuit: Circuit<BooleanGate>,
    inputs: BTreeSet<Gate>,
    mulinputs: BTreeSet<Gate>,
    prob: Vec<f64>,
    info: BTreeMap<Gate, u32>,
}

/// Gate of [`BooleanCircuit::independent_evaluation`] whose children are being visited.
struct Frame {
    gate: Gate,
    next: usize,
    /// child value for NOT, product of child values for AND, of their complements for OR
    acc: f64,
}

impl Frame {
    fn absorb(&mut self, t: BooleanGate, p: f64) {
        match t {
            BooleanGate::Not => self.acc = p,
            BooleanGate::Or => self.acc *= 1. - p,
            _ => self.acc *= p,
        }
    }
}

impl Deref for BooleanCircuit {
    type Target = Circuit<BooleanGate>;
    fn deref(&self) -> &Self::Target {
        &self.circuit
    }
}

impl BooleanCircuit {
    /// An empty circuit
    pub fn new() -> Self {
        Self::default()
    }

    fn sync(&mut self) {
        self.prob.resize(self.circuit.nb_gates(), 1.);
    }

    /// Creates an anonymous gate
    pub fn add_gate(&mut self, t: BooleanGate) -> Gate {
        let gate = self.circuit.add_gate(BooleanGate::Undetermined);
        self.sync();
        self.set_type(gate, t);
        gate
    }

    /// Returns the gate named `uuid`, creating an undetermined gate if needed
    pub fn get_gate(&mut self, uuid: &str) -> Gate {
        let gate = self.circuit.get_gate(uuid);
        self.sync();
        gate
    }

    /// Returns the gate named `uuid` with type `t`
    pub fn set_gate(&mut self, uuid: &str, t: BooleanGate) -> Gate {
        let gate = self.get_gate(uuid);
        self.set_type(gate, t);
        gate
    }

    /// Changes the type of a gate, keeping the sets of inputs up to date
    pub fn set_type(&mut self, gate: Gate, t: BooleanGate) {
        self.inputs.remove(&gate);
        self.mulinputs.remove(&gate);
        match t {
            BooleanGate::In => {
                self.inputs.insert(gate);
            }
            BooleanGate::Mulin => {
                self.mulinputs.insert(gate);
            }
            BooleanGate::Undetermined
            | BooleanGate::And
            | BooleanGate::Or
            | BooleanGate::Not => (),
        }
        self.circuit.set_gate_type(gate, t);
    }

    /// Returns the input named `uuid`, true with probability `p`
    pub fn set_input(&mut self, uuid: &str, p: f64) -> Gate {
        let gate = self.set_gate(uuid, BooleanGate::In);
        self.set_prob(gate, p);
        gate
    }

    /// Creates an anonymous input, true with probability `p`
    pub fn add_input(&mut self, p: f64) -> Gate {
        let gate = self.add_gate(BooleanGate::In);
        self.set_prob(gate, p);
        gate
    }

    /// Returns the multivalued input named `uuid`: alternative of weight `p` for key `key`
    pub fn set_mulinput(&mut self, uuid: &str, p: f64, key: u32) -> Gate {
        let gate = self.set_gate(uuid, BooleanGate::Mulin);
        self.set_prob(gate, p);
        self.set_info(gate, key);
        gate
    }

    /// Sets the probability of an input
    pub fn set_prob(&mut self, gate: Gate, p: f64) {
        self.prob[gate.index()] = p;
    }

    /// Probability of an input, 1 for other gates
    pub fn prob(&self, gate: Gate) -> f64 {
        self.prob[gate.index()]
    }

    /// Sets the key of a multivalued input
    pub fn set_info(&mut self, gate: Gate, key: u32) {
        self.info.insert(gate, key);
    }

    /// Key of a multivalued input
    pub fn info(&self, gate: Gate) -> Option<u32> {
        self.info.get(&gate).copied()
    }

    /// Adds `to` as last child of `from`
    pub fn add_wire(&mut self, from: Gate, to: Gate) {
        self.circuit.add_wire(from, to);
    }

    pub(crate) fn wires_mut(&mut self, gate: Gate) -> &mut Vec<Gate> {
        self.circuit.wires_mut(gate)
    }

    pub(crate) fn remove_uuid(&mut self, gate: Gate) -> Option<String> {
        self.circuit.remove_uuid(gate)
    }

    pub(crate) fn set_uuid(&mut self, gate: Gate, uuid: &str) {
        self.circuit.set_uuid(gate, uuid)
    }

    /// Boolean inputs
    pub fn inputs(&self) -> &BTreeSet<Gate> {
        &self.inputs
    }

    /// Multivalued inputs
    pub fn mulinputs(&self) -> &BTreeSet<Gate> {
        &self.mulinputs
    }

    fn single_child(&self, gate: Gate) -> anyhow::Result<Gate> {
        match self.wires(gate) {
            &[child] => Ok(child),
            _ => Err(CircuitError::Unsupported(gate, "NOT gate must have exactly one child").into()),
        }
    }

    /// `Some(true)` for an empty AND, `Some(false)` for an empty OR
    pub(crate) fn constant(&self, gate: Gate) -> Option<bool> {
        match self.gate_type(gate) {
            BooleanGate::And if self.wires(gate).is_empty() => Some(true),
            BooleanGate::Or if self.wires(gate).is_empty() => Some(false),
            _ => None,
        }
    }

    /// Value of `gate` when exactly the inputs in `world` (by gate index) are true.
    pub fn evaluate(&self, gate: Gate, world: &FixedBitSet) -> anyhow::Result<bool> {
        let order = self.post_order(gate);
        let mut values = FixedBitSet::with_capacity(self.nb_gates());
        self.evaluate_in_order(&order, world, &mut values)
    }

    /// Evaluates the gates of `order`, children first, and returns the value of the last one.
    fn evaluate_in_order(
        &self,
        order: &[Gate],
        world: &FixedBitSet,
        values: &mut FixedBitSet,
    ) -> anyhow::Result<bool> {
        values.clear();
        for &gate in order {
            let value = match self.gate_type(gate) {
                BooleanGate::In => world.contains(gate.index()),
                BooleanGate::Not => !values.contains(self.single_child(gate)?.index()),
                BooleanGate::And => self.wires(gate).iter().all(|c| values.contains(c.index())),
                BooleanGate::Or => self.wires(gate).iter().any(|c| values.contains(c.index())),
                BooleanGate::Mulin => return Err(CircuitError::Multivalued(gate).into()),
                BooleanGate::Undetermined => return Err(CircuitError::Undetermined(gate).into()),
            };
            values.set(gate.index(), value);
        }
        Ok(order.last().map_or(false, |g| values.contains(g.index())))
    }

    fn ensure_no_mulinput(&self) -> anyhow::Result<()> {
        match self.mulinputs.iter().next() {
            Some(&gate) => Err(CircuitError::Multivalued(gate).into()),
            None => Ok(()),
        }
    }

    /// Exact probability of `root` by enumerating all truth assignments of the inputs.
    pub fn possible_worlds(&self, root: Gate, token: &CancellationToken) -> anyhow::Result<f64> {
        self.ensure_no_mulinput()?;
        let inputs: Vec<Gate> = self.inputs.iter().copied().collect();
        if inputs.len() >= u64::BITS as usize {
            return Err(CircuitError::TooManyInputs(inputs.len()).into());
        }
        let _span = trace_span!("possible_worlds", inputs = inputs.len(), timing = true).entered();
        let order = self.post_order(root);
        let mut values = FixedBitSet::with_capacity(self.nb_gates());
        let mut total = 0.;
        let mut world = FixedBitSet::with_capacity(self.nb_gates());
        for i in 0..(1u64 << inputs.len()) {
            world.clear();
            let mut p = 1.;
            for (j, &input) in inputs.iter().enumerate() {
                if (i >> j) & 1 == 1 {
                    world.insert(input.index());
                    p *= self.prob(input);
                } else {
                    p *= 1. - self.prob(input);
                }
            }
            if self.evaluate_in_order(&order, &world, &mut values)? {
                total += p;
            }
            if token.is_cancelled() {
                return Err(CircuitError::Interrupted {
                    done: i + 1,
                    unit: "worlds",
                }
                .into());
            }
        }
        Ok(total)
    }

    /// Estimates the probability of `root` as the frequency of worlds where it is true among
    /// `samples` random worlds.
    pub fn monte_carlo(
        &self,
        root: Gate,
        samples: u64,
        token: &CancellationToken,
    ) -> anyhow::Result<f64> {
        self.monte_carlo_with_rng(root, samples, token, &mut rand::thread_rng())
    }

    /// Same as [`BooleanCircuit::monte_carlo`] with an explicit source of randomness.
    pub fn monte_carlo_with_rng<R: Rng + ?Sized>(
        &self,
        root: Gate,
        samples: u64,
        token: &CancellationToken,
        rng: &mut R,
    ) -> anyhow::Result<f64> {
        self.ensure_no_mulinput()?;
        anyhow::ensure!(samples > 0, "Monte-Carlo needs at least one sample");
        let _span = trace_span!("monte_carlo", samples, timing = true).entered();
        let order = self.post_order(root);
        let mut values = FixedBitSet::with_capacity(self.nb_gates());
        let mut success = 0u64;
        let mut world = FixedBitSet::with_capacity(self.nb_gates());
        for i in 0..samples {
            world.clear();
            for &input in &self.inputs {
                if rng.gen::<f64>() < self.prob(input) {
                    world.insert(input.index());
                }
            }
            if self.evaluate_in_order(&order, &world, &mut values)? {
                success += 1;
            }
            if token.is_cancelled() {
                return Err(CircuitError::Interrupted {
                    done: i + 1,
                    unit: "samples",
                }
                .into());
            }
        }
        Ok(success as f64 / samples as f64)
    }

    /// Probability of `root` computed bottom up, assuming no input is read twice.
    ///
    /// Children of an OR gate that are alternatives of the same multivalued input are mutually
    /// exclusive: their weights are summed. Fails if the circuit is not independent.
    pub fn independent_evaluation(&self, root: Gate) -> anyhow::Result<f64> {
        let mut seen_inputs = BTreeSet::new();
        let mut seen_keys = BTreeSet::new();
        if let Some(p) = self.independent_leaf(root, &mut seen_inputs, &mut seen_keys)? {
            return Ok(p);
        }
        let mut stack = vec![self.independent_frame(root)?];
        while let Some(top) = stack.last_mut() {
            let t = self.gate_type(top.gate);
            match self.wires(top.gate).get(top.next) {
                Some(&child) => {
                    top.next += 1;
                    // alternatives of multivalued inputs are summed when the OR gate is done
                    if t == BooleanGate::Or && self.gate_type(child) == BooleanGate::Mulin {
                        continue;
                    }
                    match self.independent_leaf(child, &mut seen_inputs, &mut seen_keys)? {
                        Some(p) => top.absorb(t, p),
                        None => {
                            let frame = self.independent_frame(child)?;
                            stack.push(frame);
                        }
                    }
                }
                None => {
                    let gate = top.gate;
                    let acc = top.acc;
                    stack.pop();
                    let value = match t {
                        BooleanGate::And => acc,
                        BooleanGate::Not => 1. - acc,
                        _ => 1. - acc * self.mulin_complement(gate, &mut seen_keys)?,
                    };
                    match stack.last_mut() {
                        Some(parent) => {
                            let t = self.gate_type(parent.gate);
                            parent.absorb(t, value);
                        }
                        None => return Ok(value),
                    }
                }
            }
        }
        anyhow::bail!("independent evaluation of {} ended without a value", root)
    }

    /// Probability of an input, `None` for gates with children.
    fn independent_leaf(
        &self,
        gate: Gate,
        seen_inputs: &mut BTreeSet<Gate>,
        seen_keys: &mut BTreeSet<u32>,
    ) -> anyhow::Result<Option<f64>> {
        Ok(match self.gate_type(gate) {
            BooleanGate::In => {
                if !seen_inputs.insert(gate) {
                    return Err(CircuitError::NotIndependent(gate).into());
                }
                Some(self.prob(gate))
            }
            BooleanGate::Mulin => {
                let key = self.mulin_key(gate)?;
                if !seen_keys.insert(key) {
                    return Err(CircuitError::NotIndependent(gate).into());
                }
                Some(self.prob(gate))
            }
            BooleanGate::Undetermined => return Err(CircuitError::Undetermined(gate).into()),
            BooleanGate::Not | BooleanGate::And | BooleanGate::Or => None,
        })
    }

    fn independent_frame(&self, gate: Gate) -> anyhow::Result<Frame> {
        let acc = match self.gate_type(gate) {
            BooleanGate::Not => {
                self.single_child(gate)?;
                0.
            }
            _ => 1.,
        };
        Ok(Frame { gate, next: 0, acc })
    }

    /// Probability that no multivalued child of the OR gate `gate` is true.
    fn mulin_complement(&self, gate: Gate, seen_keys: &mut BTreeSet<u32>) -> anyhow::Result<f64> {
        let mut groups: BTreeMap<u32, f64> = BTreeMap::new();
        for &child in self.wires(gate) {
            if self.gate_type(child) == BooleanGate::Mulin {
                *groups.entry(self.mulin_key(child)?).or_default() += self.prob(child);
            }
        }
        let mut result = 1.;
        for (key, p) in groups {
            if !seen_keys.insert(key) {
                return Err(CircuitError::NotIndependent(gate).into());
            }
            result *= 1. - p;
        }
        Ok(result)
    }

    fn mulin_key(&self, gate: Gate) -> anyhow::Result<u32> {
        self.info(gate)
            .ok_or_else(|| CircuitError::Unsupported(gate, "multivalued input without key").into())
    }

    /// Replaces multivalued inputs by Boolean ones.
    ///
    /// The alternatives of each key become the leaves of a balanced decision tree over fresh
    /// inputs, so that each former multivalued input is true with its weight and at most one
    /// alternative per key is true.
    pub fn rewrite_multivalued_gates(&mut self) {
        if self.mulinputs.is_empty() {
            return;
        }
        let mut groups: BTreeMap<Option<u32>, Vec<Gate>> = BTreeMap::new();
        for &gate in &self.mulinputs {
            groups.entry(self.info(gate)).or_default().push(gate);
        }
        trace!(keys = groups.len(), "rewriting multivalued inputs");
        for (_, alternatives) in groups {
            let mut cumulated = Vec::with_capacity(alternatives.len() + 1);
            cumulated.push(0.);
            for &gate in &alternatives {
                let last = cumulated[cumulated.len() - 1];
                cumulated.push(last + self.prob(gate));
            }
            let total = cumulated[alternatives.len()];
            let mut prefix = Vec::new();
            if !almost_equals(total, 1.) {
                debug!(total, "multivalued weights do not sum to 1");
                prefix.push(self.add_input(total));
            }
            self.rewrite_range(&alternatives, &cumulated, 0, alternatives.len() - 1, &mut prefix);
            for gate in alternatives {
                self.set_type(gate, BooleanGate::And);
                self.set_prob(gate, 1.);
                self.info.remove(&gate);
            }
        }
    }

    fn rewrite_range(
        &mut self,
        alternatives: &[Gate],
        cumulated: &[f64],
        start: usize,
        end: usize,
        prefix: &mut Vec<Gate>,
    ) {
        if start == end {
            *self.wires_mut(alternatives[start]) = prefix.clone();
            return;
        }
        let mid = (start + end) / 2;
        let total = cumulated[end + 1] - cumulated[start];
        let p = if total > 0. {
            (cumulated[mid + 1] - cumulated[start]) / total
        } else {
            0.
        };
        let left = self.add_input(p);
        let right = self.add_gate(BooleanGate::Not);
        self.add_wire(right, left);
        prefix.push(left);
        self.rewrite_range(alternatives, cumulated, start, mid, prefix);
        prefix.pop();
        prefix.push(right);
        self.rewrite_range(alternatives, cumulated, mid + 1, end, prefix);
        prefix.pop();
    }

    fn gate_name(&self, gate: Gate) -> String {
        match self.uuid(gate) {
            Some(uuid) => uuid.to_owned(),
            None => gate.to_string(),
        }
    }

    /// Infix rendering of the formula of `gate`
    pub fn render(&self, gate: Gate) -> String {
        let children = || self.wires(gate).iter().map(|&c| self.render(c));
        match self.gate_type(gate) {
            BooleanGate::In => {
                let p = self.prob(gate);
                if p == 0. {
                    "⊥".to_owned()
                } else if p == 1. {
                    "⊤".to_owned()
                } else {
                    format!("{}[{}]", self.gate_name(gate), p)
                }
            }
            BooleanGate::Mulin => format!(
                "{}[{}]{{{}}}",
                self.gate_name(gate),
                self.prob(gate),
                self.info(gate).map_or_else(String::new, |k| k.to_string())
            ),
            BooleanGate::Not => match self.wires(gate).first() {
                Some(&child) => format!("¬{}", self.render(child)),
                None => "¬?".to_owned(),
            },
            BooleanGate::And if self.wires(gate).is_empty() => "⊤".to_owned(),
            BooleanGate::Or if self.wires(gate).is_empty() => "⊥".to_owned(),
            BooleanGate::And => format!("({})", itertools::join(children(), " ∧ ")),
            BooleanGate::Or => format!("({})", itertools::join(children(), " ∨ ")),
            BooleanGate::Undetermined => "?".to_owned(),
        }
    }

    /// dot rendering of the gates reachable from `root`
    pub fn to_dot(&self, root: Gate) -> String {
        let mut graph = petgraph::Graph::<String, &'static str>::new();
        let mut nodes = BTreeMap::new();
        for gate in self.post_order(root) {
            let label = match self.gate_type(gate) {
                BooleanGate::In => format!("{} [{}]", self.gate_name(gate), self.prob(gate)),
                t => format!("{} {:?}", gate, t),
            };
            let node = graph.add_node(label);
            nodes.insert(gate, node);
            for child in self.wires(gate) {
                graph.add_edge(node, nodes[child], "");
            }
        }
        format!("{}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Context;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn or_of_halves() -> (BooleanCircuit, Gate) {
        let mut c = BooleanCircuit::new();
        let a = c.set_input("a", 0.5);
        let b = c.set_input("b", 0.5);
        let root = c.set_gate("root", BooleanGate::Or);
        c.add_wire(root, a);
        c.add_wire(root, b);
        (c, root)
    }

    /// root = (a ∧ b) ∨ (a ∧ ¬c): a is read twice
    fn shared_input() -> (BooleanCircuit, Gate) {
        let mut c = BooleanCircuit::new();
        let a = c.set_input("a", 0.3);
        let b = c.set_input("b", 0.6);
        let x = c.set_input("c", 0.2);
        let not_c = c.add_gate(BooleanGate::Not);
        c.add_wire(not_c, x);
        let left = c.add_gate(BooleanGate::And);
        c.add_wire(left, a);
        c.add_wire(left, b);
        let right = c.add_gate(BooleanGate::And);
        c.add_wire(right, a);
        c.add_wire(right, not_c);
        let root = c.add_gate(BooleanGate::Or);
        c.add_wire(root, left);
        c.add_wire(root, right);
        (c, root)
    }

    #[test]
    fn forward_references() {
        let mut c = BooleanCircuit::new();
        let root = c.set_gate("root", BooleanGate::And);
        let a = c.get_gate("a");
        c.add_wire(root, a);
        assert_eq!(c.gate_type(a), BooleanGate::Undetermined);
        assert!(c.inputs().is_empty());
        assert_eq!(c.set_input("a", 0.2), a);
        assert!(c.inputs().contains(&a));
        assert_eq!(c.prob(a), 0.2);
        assert_eq!(c.prob(root), 1.);
    }

    #[test]
    fn evaluation() -> anyhow::Result<()> {
        let (c, root) = shared_input();
        let mut world = FixedBitSet::with_capacity(c.nb_gates());
        assert!(!c.evaluate(root, &world)?);
        world.insert(c.find_gate("a").unwrap().index());
        assert!(c.evaluate(root, &world)?);
        world.insert(c.find_gate("c").unwrap().index());
        assert!(!c.evaluate(root, &world)?);
        Ok(())
    }

    #[test]
    fn independent_or() -> anyhow::Result<()> {
        let (c, root) = or_of_halves();
        assert!(almost_equals(c.independent_evaluation(root)?, 0.75));
        Ok(())
    }

    #[test]
    fn independent_and() -> anyhow::Result<()> {
        let mut c = BooleanCircuit::new();
        let a = c.set_input("a", 0.3);
        let b = c.set_input("b", 0.4);
        let root = c.set_gate("root", BooleanGate::And);
        c.add_wire(root, a);
        c.add_wire(root, b);
        assert!(almost_equals(c.independent_evaluation(root)?, 0.12));
        let world = FixedBitSet::with_capacity(c.nb_gates());
        assert!(!c.evaluate(root, &world)?);
        Ok(())
    }

    #[test]
    fn independent_rejects_shared_inputs() {
        let (c, root) = shared_input();
        let err = c.independent_evaluation(root).unwrap_err();
        let a = c.find_gate("a").unwrap();
        assert_eq!(
            err.downcast_ref::<CircuitError>(),
            Some(&CircuitError::NotIndependent(a))
        );
    }

    #[test]
    fn independent_groups_alternatives() -> anyhow::Result<()> {
        let mut c = BooleanCircuit::new();
        let x = c.set_mulinput("x", 0.2, 7);
        let y = c.set_mulinput("y", 0.3, 7);
        let root = c.set_gate("root", BooleanGate::Or);
        c.add_wire(root, x);
        c.add_wire(root, y);
        assert!(almost_equals(c.independent_evaluation(root)?, 0.5));

        let z = c.set_mulinput("z", 0.1, 7);
        let and = c.set_gate("and", BooleanGate::And);
        c.add_wire(and, root);
        c.add_wire(and, z);
        let err = c.independent_evaluation(and).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CircuitError>(),
            Some(CircuitError::NotIndependent(_))
        ));
        Ok(())
    }

    #[test]
    fn possible_worlds() -> anyhow::Result<()> {
        let token = CancellationToken::new();
        let (c, root) = shared_input();
        // a ∧ (b ∨ ¬c)
        let expected = 0.3 * (1. - 0.4 * 0.2);
        assert!(almost_equals(c.possible_worlds(root, &token)?, expected));
        let (c, root) = or_of_halves();
        assert!(almost_equals(c.possible_worlds(root, &token)?, 0.75));
        Ok(())
    }

    #[test]
    fn possible_worlds_rejects_mulin() {
        let mut c = BooleanCircuit::new();
        let x = c.set_mulinput("x", 0.2, 1);
        let err = c.possible_worlds(x, &CancellationToken::new()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CircuitError>(),
            Some(&CircuitError::Multivalued(x))
        );
    }

    #[test]
    fn possible_worlds_input_limit() {
        let mut c = BooleanCircuit::new();
        let root = c.add_gate(BooleanGate::Or);
        for _ in 0..64 {
            let input = c.add_input(0.5);
            c.add_wire(root, input);
        }
        let err = c
            .possible_worlds(root, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CircuitError>(),
            Some(&CircuitError::TooManyInputs(64))
        );
    }

    /// 300000 NOT gates above an input of probability 0.3, then an AND and an OR on top
    fn deep_chain() -> (BooleanCircuit, Gate) {
        let mut c = BooleanCircuit::new();
        let mut top = c.set_input("x", 0.3);
        for _ in 0..300_000 {
            let not = c.add_gate(BooleanGate::Not);
            c.add_wire(not, top);
            top = not;
        }
        let and = c.add_gate(BooleanGate::And);
        c.add_wire(and, top);
        let or = c.add_gate(BooleanGate::Or);
        c.add_wire(or, and);
        (c, or)
    }

    #[test]
    fn deep_chain_evaluation() -> anyhow::Result<()> {
        let (c, root) = deep_chain();
        assert!(almost_equals(c.independent_evaluation(root)?, 0.3));
        let mut world = FixedBitSet::with_capacity(c.nb_gates());
        assert!(!c.evaluate(root, &world)?);
        world.insert(c.find_gate("x").context("x")?.index());
        assert!(c.evaluate(root, &world)?);
        assert!(almost_equals(
            c.possible_worlds(root, &CancellationToken::new())?,
            0.3
        ));
        Ok(())
    }

    #[test]
    fn independent_shared_below_not() {
        let mut c = BooleanCircuit::new();
        let a = c.set_input("a", 0.5);
        let n = c.add_gate(BooleanGate::Not);
        c.add_wire(n, a);
        let root = c.add_gate(BooleanGate::And);
        c.add_wire(root, n);
        c.add_wire(root, n);
        let err = c.independent_evaluation(root).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CircuitError>(),
            Some(&CircuitError::NotIndependent(a))
        );
    }

    #[test]
    fn possible_worlds_is_interruptible() {
        let (c, root) = or_of_halves();
        let token = CancellationToken::new();
        token.cancel();
        let err = c.possible_worlds(root, &token).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CircuitError>(),
            Some(&CircuitError::Interrupted {
                done: 1,
                unit: "worlds"
            })
        );
    }

    #[test]
    fn monte_carlo() -> anyhow::Result<()> {
        let (c, root) = shared_input();
        let mut rng = StdRng::seed_from_u64(42);
        let token = CancellationToken::new();
        let estimate = c.monte_carlo_with_rng(root, 20000, &token, &mut rng)?;
        let exact = c.possible_worlds(root, &token)?;
        assert!((estimate - exact).abs() < 0.02, "{} vs {}", estimate, exact);
        Ok(())
    }

    #[test]
    fn monte_carlo_is_interruptible() {
        let (c, root) = or_of_halves();
        let token = CancellationToken::new();
        token.cancel();
        let err = c.monte_carlo(root, 10, &token).unwrap_err();
        assert_eq!(err.to_string(), "Interrupted after 1 samples");
    }

    #[test]
    fn rewrite_preserves_weights() -> anyhow::Result<()> {
        let mut c = BooleanCircuit::new();
        let weights = [0.2, 0.3, 0.5];
        let alternatives: Vec<Gate> = weights
            .iter()
            .enumerate()
            .map(|(i, &w)| c.set_mulinput(&format!("x{}", i), w, 3))
            .collect();
        c.rewrite_multivalued_gates();
        assert!(c.mulinputs().is_empty());
        let token = CancellationToken::new();
        for (&gate, &w) in alternatives.iter().zip(weights.iter()) {
            assert_eq!(c.gate_type(gate), BooleanGate::And);
            assert!(almost_equals(c.possible_worlds(gate, &token)?, w));
        }
        // alternatives are mutually exclusive
        let any = c.add_gate(BooleanGate::Or);
        for &gate in &alternatives {
            c.add_wire(any, gate);
        }
        assert!(almost_equals(c.possible_worlds(any, &token)?, 1.));
        Ok(())
    }

    #[test]
    fn rewrite_adds_prefix_when_weights_do_not_sum_to_one() -> anyhow::Result<()> {
        let mut c = BooleanCircuit::new();
        let x = c.set_mulinput("x", 0.1, 0);
        let y = c.set_mulinput("y", 0.3, 0);
        c.rewrite_multivalued_gates();
        let token = CancellationToken::new();
        assert!(almost_equals(c.possible_worlds(x, &token)?, 0.1));
        assert!(almost_equals(c.possible_worlds(y, &token)?, 0.3));
        Ok(())
    }

    #[test]
    fn rendering() {
        let (c, root) = or_of_halves();
        assert_eq!(c.render(root), "(a[0.5] ∨ b[0.5])");
        let mut c = BooleanCircuit::new();
        let t = c.set_input("t", 1.);
        let not = c.add_gate(BooleanGate::Not);
        c.add_wire(not, t);
        let empty = c.add_gate(BooleanGate::Or);
        let root = c.add_gate(BooleanGate::And);
        c.add_wire(root, not);
        c.add_wire(root, empty);
        assert_eq!(c.render(root), "(¬⊤ ∧ ⊥)");
        assert!(c.to_dot(root).contains("digraph"));
    }

    #[test]
    fn gate_names() -> anyhow::Result<()> {
        assert_eq!("MULIN".parse::<BooleanGate>()?, BooleanGate::Mulin);
        assert!("XOR".parse::<BooleanGate>().is_err());
        Ok(())
    }
}

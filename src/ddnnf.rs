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

//! Deterministic decomposable negation normal forms: probability, Shapley and Banzhaf values.

use crate::boolean_circuit::{BooleanCircuit, BooleanGate};
use crate::circuit::{CircuitError, Gate};
use crate::utils::binomials;
use fixedbitset::FixedBitSet;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Deref;
use tracing::{trace, trace_span};

/// A Boolean circuit with a root, which is decomposable (children of AND gates have disjoint
/// variables) and deterministic (children of OR gates are mutually exclusive).
///
/// Probabilities of gates are memoized per instance: the cache is dropped on clone and on every
/// mutation.
#[derive(Debug)]
pub struct DDnnf {
    circuit: BooleanCircuit,
    root: Gate,
    cache: RefCell<HashMap<Gate, f64>>,
}

impl Clone for DDnnf {
    fn clone(&self) -> Self {
        DDnnf::new(self.circuit.clone(), self.root)
    }
}

impl Deref for DDnnf {
    type Target = BooleanCircuit;
    fn deref(&self) -> &Self::Target {
        &self.circuit
    }
}

/// Partial result of the evaluation of a gate: how many children were folded, and their
/// combined value.
struct Frame {
    gate: Gate,
    next: usize,
    value: f64,
}

/// Weight of a coalition of size `l` among `k` players
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Score {
    Shapley,
    Banzhaf,
}

impl DDnnf {
    /// Wraps a circuit known to be a d-DNNF
    pub fn new(circuit: BooleanCircuit, root: Gate) -> Self {
        DDnnf {
            circuit,
            root,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// The d-DNNF which is always false
    pub fn falsum() -> Self {
        let mut circuit = BooleanCircuit::new();
        let root = circuit.add_gate(BooleanGate::Or);
        DDnnf::new(circuit, root)
    }

    /// The output gate
    pub fn root(&self) -> Gate {
        self.root
    }

    /// The underlying circuit
    pub fn circuit(&self) -> &BooleanCircuit {
        &self.circuit
    }

    /// Mutable access to the circuit, which drops cached probabilities.
    pub fn circuit_mut(&mut self) -> &mut BooleanCircuit {
        self.cache.get_mut().clear();
        &mut self.circuit
    }

    /// Probability that the root is true
    pub fn probability_evaluation(&self) -> anyhow::Result<f64> {
        let _span = trace_span!("probability_evaluation", gates = self.nb_gates()).entered();
        self.probability_of(self.root)
    }

    fn frame(&self, gate: Gate) -> Frame {
        let value = match self.gate_type(gate) {
            BooleanGate::And => 1.,
            _ => 0.,
        };
        Frame {
            gate,
            next: 0,
            value,
        }
    }

    /// Probability that `gate` is true: products under AND, sums under OR.
    pub fn probability_of(&self, gate: Gate) -> anyhow::Result<f64> {
        let mut cache = self.cache.borrow_mut();
        if let Some(&p) = cache.get(&gate) {
            return Ok(p);
        }
        let mut stack = vec![self.frame(gate)];
        let mut result = 0.;
        while let Some(top) = stack.last_mut() {
            let wires = self.wires(top.gate);
            if let Some(&child) = wires.get(top.next) {
                match cache.get(&child) {
                    Some(&p) => {
                        match self.gate_type(top.gate) {
                            BooleanGate::And => top.value *= p,
                            _ => top.value += p,
                        }
                        top.next += 1;
                    }
                    None => {
                        let frame = self.frame(child);
                        stack.push(frame);
                    }
                }
                continue;
            }
            let gate = top.gate;
            let value = match self.gate_type(gate) {
                BooleanGate::In => self.prob(gate),
                BooleanGate::And | BooleanGate::Or => top.value,
                BooleanGate::Not => {
                    if wires.len() != 1 {
                        return Err(CircuitError::Unsupported(
                            gate,
                            "NOT gate must have exactly one child",
                        )
                        .into());
                    }
                    1. - top.value
                }
                BooleanGate::Mulin => return Err(CircuitError::Multivalued(gate).into()),
                BooleanGate::Undetermined => {
                    return Err(CircuitError::Undetermined(gate).into())
                }
            };
            cache.insert(gate, value);
            stack.pop();
            match stack.last_mut() {
                Some(parent) => {
                    match self.gate_type(parent.gate) {
                        BooleanGate::And => parent.value *= value,
                        _ => parent.value += value,
                    }
                    parent.next += 1;
                }
                None => result = value,
            }
        }
        Ok(result)
    }

    /// Makes the d-DNNF smooth: all children of an OR gate get the same variables, by conjoining
    /// each child with `v ∨ ¬v` for the variables `v` it misses.
    pub fn make_smooth(&mut self) {
        let _span = trace_span!("make_smooth", timing = true).entered();
        let order = self.post_order(self.root);
        let positions: HashMap<Gate, usize> = self
            .inputs()
            .iter()
            .enumerate()
            .map(|(i, &g)| (g, i))
            .collect();
        let inputs: Vec<Gate> = self.inputs().iter().copied().collect();
        let mut variables: Vec<Option<FixedBitSet>> = vec![None; self.nb_gates()];
        for &gate in &order {
            let mut vars = FixedBitSet::with_capacity(inputs.len());
            if let Some(&i) = positions.get(&gate) {
                vars.insert(i);
            }
            for child in self.wires(gate) {
                if let Some(child_vars) = &variables[child.index()] {
                    vars.union_with(child_vars);
                }
            }
            variables[gate.index()] = Some(vars);
        }
        let circuit = self.circuit_mut();
        let mut gadgets: HashMap<usize, Gate> = HashMap::new();
        for &gate in &order {
            if circuit.gate_type(gate) != BooleanGate::Or {
                continue;
            }
            let all = match &variables[gate.index()] {
                Some(vars) => vars,
                None => continue,
            };
            for i in 0..circuit.wires(gate).len() {
                let child = circuit.wires(gate)[i];
                let missing: Vec<usize> = match &variables[child.index()] {
                    Some(vars) => all.difference(vars).collect(),
                    None => all.ones().collect(),
                };
                if missing.is_empty() {
                    continue;
                }
                let and = circuit.add_gate(BooleanGate::And);
                circuit.add_wire(and, child);
                for position in missing {
                    let gadget = *gadgets.entry(position).or_insert_with(|| {
                        let input = inputs[position];
                        let not = circuit.add_gate(BooleanGate::Not);
                        circuit.add_wire(not, input);
                        let or = circuit.add_gate(BooleanGate::Or);
                        circuit.add_wire(or, input);
                        circuit.add_wire(or, not);
                        or
                    });
                    circuit.add_wire(and, gadget);
                }
                circuit.wires_mut(gate)[i] = and;
            }
        }
        trace!(stats = true, smooth_gates = self.nb_gates(), "smoothing");
    }

    /// Replaces gates of type `t` (AND or OR) with more than two children by balanced binary
    /// trees of gates of the same type.
    pub fn make_gates_binary(&mut self, t: BooleanGate) -> anyhow::Result<()> {
        anyhow::ensure!(
            t == BooleanGate::And || t == BooleanGate::Or,
            "only AND and OR gates can be made binary, not {:?}",
            t
        );
        let circuit = self.circuit_mut();
        for gate in 0..circuit.nb_gates() {
            let gate = Gate::from_index(gate);
            if circuit.gate_type(gate) != t || circuit.wires(gate).len() <= 2 {
                continue;
            }
            let mut layer = std::mem::take(circuit.wires_mut(gate));
            while layer.len() > 2 {
                let mut next = Vec::with_capacity((layer.len() + 1) / 2);
                for pair in layer.chunks(2) {
                    match pair {
                        &[left, right] => {
                            let node = circuit.add_gate(t);
                            circuit.add_wire(node, left);
                            circuit.add_wire(node, right);
                            next.push(node);
                        }
                        _ => next.extend_from_slice(pair),
                    }
                }
                layer = next;
            }
            *circuit.wires_mut(gate) = layer;
        }
        Ok(())
    }

    /// Copy of this d-DNNF where `var` is replaced by the constant `value`.
    ///
    /// `var` becomes `AND()` or `OR()`, stops being an input and loses its name.
    pub fn condition(&self, var: Gate, value: bool) -> DDnnf {
        let mut result = self.clone();
        let circuit = result.circuit_mut();
        circuit.set_type(
            var,
            if value {
                BooleanGate::And
            } else {
                BooleanGate::Or
            },
        );
        circuit.wires_mut(var).clear();
        circuit.remove_uuid(var);
        result
            .cache
            .get_mut()
            .insert(var, if value { 1. } else { 0. });
        result
    }

    /// `delta[g][k]`: probability that exactly `k` variables of `g` are true, for each gate
    /// reachable from `root`. The d-DNNF must be smooth.
    fn deltas(&self, root: Gate) -> anyhow::Result<Vec<Option<Vec<f64>>>> {
        let mut deltas: Vec<Option<Vec<f64>>> = vec![None; self.nb_gates()];
        for gate in self.post_order(root) {
            let children = self.wires(gate);
            let child_delta = |i: usize| child_table(&deltas, gate, children, i);
            let delta = match self.gate_type(gate) {
                BooleanGate::In => {
                    let p = self.prob(gate);
                    vec![1. - p, p]
                }
                BooleanGate::Not => child_delta(0)?.clone(),
                BooleanGate::Or if children.is_empty() => vec![1.],
                BooleanGate::Or => child_delta(0)?.clone(),
                BooleanGate::And => {
                    let mut result = vec![1.];
                    for i in 0..children.len() {
                        result = convolve(&result, child_delta(i)?);
                    }
                    result
                }
                BooleanGate::Mulin => return Err(CircuitError::Multivalued(gate).into()),
                BooleanGate::Undetermined => {
                    return Err(CircuitError::Undetermined(gate).into())
                }
            };
            deltas[gate.index()] = Some(delta);
        }
        Ok(deltas)
    }

    /// Probability that exactly `k` variables of `gate` are true, for each `k`.
    pub fn shapley_delta(&self, gate: Gate) -> anyhow::Result<Vec<f64>> {
        let mut deltas = self.deltas(gate)?;
        Ok(deltas[gate.index()].take().unwrap_or_default())
    }

    /// `alpha[k][l]`: sum over worlds `ν` with `k` true variables of `Pr(ν)` times the number of
    /// subsets of `ν` of size `l` on which `gate` is true.
    ///
    /// The d-DNNF must be smooth, with binary AND gates for reasonable complexity.
    pub fn shapley_alpha(&self, gate: Gate) -> anyhow::Result<Vec<Vec<f64>>> {
        let deltas = self.deltas(gate)?;
        let mut alphas: Vec<Option<Vec<Vec<f64>>>> = vec![None; self.nb_gates()];
        let mut binomial = binomials(0);
        for current in self.post_order(gate) {
            let children = self.wires(current);
            let child_alpha = |i: usize| child_table(&alphas, current, children, i);
            let alpha = match self.gate_type(current) {
                BooleanGate::In => vec![vec![0.], vec![0., self.prob(current)]],
                BooleanGate::And => {
                    let mut result = vec![vec![1.]];
                    for i in 0..children.len() {
                        result = convolve2(&result, child_alpha(i)?);
                    }
                    result
                }
                BooleanGate::Or => {
                    let mut result: Vec<Vec<f64>> = vec![vec![0.]];
                    for i in 0..children.len() {
                        let alpha = child_alpha(i)?;
                        if alpha.len() > result.len() {
                            result.resize_with(alpha.len(), Vec::new);
                        }
                        for (k, row) in alpha.iter().enumerate() {
                            let target = &mut result[k];
                            target.resize(k + 1, 0.);
                            for (l, &x) in row.iter().enumerate() {
                                target[l] += x;
                            }
                        }
                    }
                    result
                }
                BooleanGate::Not => {
                    let child = match children {
                        &[child] => child,
                        _ => {
                            return Err(CircuitError::Unsupported(
                                current,
                                "NOT gate must have exactly one child",
                            )
                            .into())
                        }
                    };
                    let alpha = child_alpha(0)?;
                    let delta = child_table(&deltas, current, &[child], 0)?;
                    if binomial.len() < alpha.len() {
                        binomial = binomials(alpha.len());
                    }
                    alpha
                        .iter()
                        .enumerate()
                        .map(|(k, row)| {
                            let d = delta.get(k).copied().unwrap_or(0.);
                            row.iter()
                                .enumerate()
                                .map(|(l, &x)| binomial[k][l] * d - x)
                                .collect()
                        })
                        .collect()
                }
                BooleanGate::Mulin => return Err(CircuitError::Multivalued(current).into()),
                BooleanGate::Undetermined => {
                    return Err(CircuitError::Undetermined(current).into())
                }
            };
            alphas[current.index()] = Some(alpha);
        }
        Ok(alphas[gate.index()].take().unwrap_or_default())
    }

    fn score(&self, var: Gate, score: Score) -> anyhow::Result<f64> {
        if self.gate_type(var) != BooleanGate::In {
            return Ok(0.);
        }
        let _span = trace_span!("shapley", ?score, var = var.index()).entered();
        let positive = self.condition(var, true);
        let negative = self.condition(var, false);
        let alpha_positive = positive.shapley_alpha(positive.root)?;
        let alpha_negative = negative.shapley_alpha(negative.root)?;
        let size = alpha_positive.len().max(alpha_negative.len());
        let binomial = binomials(size);
        let get = |alpha: &Vec<Vec<f64>>, k: usize, l: usize| {
            alpha.get(k).and_then(|row| row.get(l)).copied().unwrap_or(0.)
        };
        let mut result = 0.;
        for k in 0..size {
            for l in 0..=k {
                let difference = get(&alpha_positive, k, l) - get(&alpha_negative, k, l);
                if difference == 0. {
                    continue;
                }
                result += match score {
                    Score::Shapley => difference / binomial[k][l] / (k + 1) as f64,
                    Score::Banzhaf => difference / 2f64.powi(k as i32),
                };
            }
        }
        result *= self.prob(var);
        Ok(result.max(-1.).min(1.))
    }

    /// Expected Shapley value of input `var`: the Shapley value of `var` in the game whose
    /// players are the true inputs of a random world, averaged over worlds.
    ///
    /// The d-DNNF must be smooth with binary AND gates. Gates which are not inputs get 0.
    pub fn shapley(&self, var: Gate) -> anyhow::Result<f64> {
        self.score(var, Score::Shapley)
    }

    /// Expected Banzhaf value of input `var`. The d-DNNF must be smooth.
    pub fn banzhaf(&self, var: Gate) -> anyhow::Result<f64> {
        self.score(var, Score::Banzhaf)
    }

    fn all_scores(&self, score: Score) -> anyhow::Result<Vec<(Gate, f64)>> {
        self.inputs()
            .iter()
            .map(|&var| Ok((var, self.score(var, score)?)))
            .collect()
    }

    /// [`DDnnf::shapley`] of every input
    pub fn shapley_all_vars(&self) -> anyhow::Result<Vec<(Gate, f64)>> {
        self.all_scores(Score::Shapley)
    }

    /// [`DDnnf::banzhaf`] of every input
    pub fn banzhaf_all_vars(&self) -> anyhow::Result<Vec<(Gate, f64)>> {
        self.all_scores(Score::Banzhaf)
    }

    /// Folds constants, splices out AND and OR gates with a single child, then keeps only gates
    /// reachable from the root, renumbered densely.
    pub fn simplify(&mut self) {
        let _span = trace_span!("simplify", timing = true).entered();
        let before = self.nb_gates();
        let order = self.post_order(self.root);
        let mut alias: Vec<Gate> = self.gates().collect();
        {
            let circuit = self.circuit_mut();
            for &gate in &order {
                let t = circuit.gate_type(gate);
                let children: Vec<Gate> = circuit
                    .wires(gate)
                    .iter()
                    .map(|c| alias[c.index()])
                    .collect();
                match t {
                    BooleanGate::And | BooleanGate::Or => {
                        let neutral = t == BooleanGate::And;
                        if children.iter().any(|&c| circuit.constant(c) == Some(!neutral)) {
                            let absorbing = if neutral {
                                BooleanGate::Or
                            } else {
                                BooleanGate::And
                            };
                            circuit.set_type(gate, absorbing);
                            circuit.wires_mut(gate).clear();
                            continue;
                        }
                        let kept: Vec<Gate> = children
                            .into_iter()
                            .filter(|&c| circuit.constant(c) != Some(neutral))
                            .collect();
                        if let &[only] = kept.as_slice() {
                            alias[gate.index()] = only;
                        }
                        *circuit.wires_mut(gate) = kept;
                    }
                    BooleanGate::Not => {
                        let folded = children.first().and_then(|&c| circuit.constant(c));
                        match folded {
                            Some(value) => {
                                let t = if value {
                                    BooleanGate::Or
                                } else {
                                    BooleanGate::And
                                };
                                circuit.set_type(gate, t);
                                circuit.wires_mut(gate).clear();
                            }
                            None => *circuit.wires_mut(gate) = children,
                        }
                    }
                    BooleanGate::In | BooleanGate::Mulin | BooleanGate::Undetermined => (),
                }
            }
        }
        let root = alias[self.root.index()];
        let mut result = BooleanCircuit::new();
        let mut renumbering: HashMap<Gate, Gate> = HashMap::new();
        for gate in self.post_order(root) {
            let new = result.add_gate(self.gate_type(gate));
            result.set_prob(new, self.prob(gate));
            if let Some(key) = self.info(gate) {
                result.set_info(new, key);
            }
            if let Some(uuid) = self.uuid(gate) {
                result.set_uuid(new, uuid);
            }
            for child in self.wires(gate) {
                result.add_wire(new, renumbering[child]);
            }
            renumbering.insert(gate, new);
        }
        let new_root = renumbering[&root];
        self.circuit = result;
        self.root = new_root;
        self.cache.get_mut().clear();
        trace!(stats = true, before, after = self.nb_gates(), "simplification");
    }
}

/// The entry of `table` for the `i`-th child of `gate`, which must have been computed already
fn child_table<'a, T>(
    table: &'a [Option<T>],
    gate: Gate,
    children: &[Gate],
    i: usize,
) -> anyhow::Result<&'a T> {
    children
        .get(i)
        .and_then(|c| table[c.index()].as_ref())
        .ok_or_else(|| CircuitError::Unsupported(gate, "child evaluated out of order").into())
}

fn convolve(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut result = vec![0.; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            result[i + j] += x * y;
        }
    }
    result
}

/// Convolution on both indices of triangular tables
fn convolve2(a: &[Vec<f64>], b: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut result: Vec<Vec<f64>> = (0..(a.len() + b.len() - 1))
        .map(|k| vec![0.; k + 1])
        .collect();
    for (k1, row1) in a.iter().enumerate() {
        for (l1, &x) in row1.iter().enumerate() {
            if x == 0. {
                continue;
            }
            for (k2, row2) in b.iter().enumerate() {
                for (l2, &y) in row2.iter().enumerate() {
                    result[k1 + k2][l1 + l2] += x * y;
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::almost_equals;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    /// AND(a, b), already a d-DNNF
    fn conjunction(p: f64) -> (DDnnf, Gate, Gate) {
        let mut c = BooleanCircuit::new();
        let a = c.set_input("a", p);
        let b = c.set_input("b", p);
        let root = c.add_gate(BooleanGate::And);
        c.add_wire(root, a);
        c.add_wire(root, b);
        (DDnnf::new(c, root), a, b)
    }

    /// a ∨ b as the deterministic a ∨ (¬a ∧ b)
    fn disjunction(p: f64) -> (DDnnf, Gate, Gate) {
        let mut c = BooleanCircuit::new();
        let a = c.set_input("a", p);
        let b = c.set_input("b", p);
        let not_a = c.add_gate(BooleanGate::Not);
        c.add_wire(not_a, a);
        let and = c.add_gate(BooleanGate::And);
        c.add_wire(and, not_a);
        c.add_wire(and, b);
        let root = c.add_gate(BooleanGate::Or);
        c.add_wire(root, a);
        c.add_wire(root, and);
        (DDnnf::new(c, root), a, b)
    }

    #[test]
    fn probability() -> anyhow::Result<()> {
        let (dd, _, _) = disjunction(0.5);
        assert_close(dd.probability_evaluation()?, 0.75);
        let (dd, _, _) = conjunction(0.3);
        assert_close(dd.probability_evaluation()?, 0.09);
        assert_close(DDnnf::falsum().probability_evaluation()?, 0.);
        Ok(())
    }

    #[test]
    fn conditioning() -> anyhow::Result<()> {
        let (dd, a, _) = disjunction(0.5);
        assert_close(dd.probability_evaluation()?, 0.75);
        let positive = dd.condition(a, true);
        assert_close(positive.probability_evaluation()?, 1.);
        let negative = dd.condition(a, false);
        assert_close(negative.probability_evaluation()?, 0.5);
        assert!(!negative.inputs().contains(&a));
        assert_eq!(negative.uuid(a), None);
        // the original is untouched
        assert_eq!(dd.uuid(a), Some("a"));
        assert_close(dd.probability_of(a)?, 0.5);
        Ok(())
    }

    #[test]
    fn smoothing() -> anyhow::Result<()> {
        let (mut dd, a, b) = disjunction(0.3);
        let before = dd.probability_evaluation()?;
        dd.make_smooth();
        assert_close(dd.probability_evaluation()?, before);
        // the first child of the root now mentions b
        let first = dd.wires(dd.root())[0];
        assert_ne!(first, a);
        assert_close(dd.shapley_delta(first)?.iter().sum(), 1.);
        assert_eq!(dd.shapley_delta(dd.root())?.len(), 3);
        let _ = b;
        Ok(())
    }

    #[test]
    fn binary_gates() -> anyhow::Result<()> {
        let mut c = BooleanCircuit::new();
        let inputs: Vec<Gate> = (0..5).map(|i| c.set_input(&i.to_string(), 0.9)).collect();
        let root = c.add_gate(BooleanGate::And);
        for &i in &inputs {
            c.add_wire(root, i);
        }
        let mut dd = DDnnf::new(c, root);
        let before = dd.probability_evaluation()?;
        dd.make_gates_binary(BooleanGate::And)?;
        for gate in dd.gates() {
            assert!(dd.wires(gate).len() <= 2);
        }
        assert_close(dd.probability_evaluation()?, before);
        assert!(dd.make_gates_binary(BooleanGate::Not).is_err());
        Ok(())
    }

    #[test]
    fn deterministic_shapley() -> anyhow::Result<()> {
        let (dd, a, b) = conjunction(1.);
        assert_close(dd.shapley(a)?, 0.5);
        assert_close(dd.shapley(b)?, 0.5);
        assert_close(dd.banzhaf(a)?, 0.5);
        let (mut dd, a, b) = disjunction(1.);
        dd.make_smooth();
        dd.make_gates_binary(BooleanGate::And)?;
        assert_close(dd.shapley(a)?, 0.5);
        assert_close(dd.shapley(b)?, 0.5);
        assert_close(dd.banzhaf(b)?, 0.5);
        Ok(())
    }

    #[test]
    fn expected_shapley_sums_to_probability() -> anyhow::Result<()> {
        let (dd, a, _) = conjunction(0.5);
        assert_close(dd.shapley(a)?, 0.125);
        let total: f64 = dd.shapley_all_vars()?.iter().map(|(_, v)| v).sum();
        assert_close(total, dd.probability_evaluation()?);
        let (mut dd, _, _) = disjunction(0.3);
        dd.make_smooth();
        let total: f64 = dd.shapley_all_vars()?.iter().map(|(_, v)| v).sum();
        assert_close(total, dd.probability_evaluation()?);
        assert_eq!(dd.shapley(dd.root())?, 0.);
        Ok(())
    }

    #[test]
    fn alpha_of_input() -> anyhow::Result<()> {
        let (dd, a, _) = conjunction(0.25);
        assert_eq!(dd.shapley_alpha(a)?, vec![vec![0.], vec![0., 0.25]]);
        let alpha = dd.shapley_alpha(dd.root())?;
        assert_eq!(alpha.len(), 3);
        assert_close(alpha[2][2], 0.0625);
        assert!(almost_equals(alpha[1][1], 0.));
        Ok(())
    }

    #[test]
    fn simplification() -> anyhow::Result<()> {
        let mut c = BooleanCircuit::new();
        let a = c.set_input("a", 0.4);
        let b = c.set_input("b", 0.7);
        let t = c.add_gate(BooleanGate::And);
        let f = c.add_gate(BooleanGate::Or);
        let not_f = c.add_gate(BooleanGate::Not);
        c.add_wire(not_f, f);
        // AND(a, ⊤, ¬⊥) → a
        let and = c.add_gate(BooleanGate::And);
        c.add_wire(and, a);
        c.add_wire(and, t);
        c.add_wire(and, not_f);
        // AND(b, ⊥) → ⊥
        let dead = c.add_gate(BooleanGate::And);
        c.add_wire(dead, b);
        c.add_wire(dead, f);
        let root = c.add_gate(BooleanGate::Or);
        c.add_wire(root, and);
        c.add_wire(root, dead);
        let unreachable = c.add_gate(BooleanGate::Not);
        c.add_wire(unreachable, b);
        let mut dd = DDnnf::new(c, root);
        assert_close(dd.probability_evaluation()?, 0.4);
        dd.simplify();
        assert_close(dd.probability_evaluation()?, 0.4);
        assert_eq!(dd.nb_gates(), 1);
        assert_eq!(dd.gate_type(dd.root()), BooleanGate::In);
        assert_eq!(dd.uuid(dd.root()), Some("a"));
        Ok(())
    }
}

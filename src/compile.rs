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

//! Compilation to d-DNNF and weighted model counting through external tools.
//!
//! The tools themselves are injected: [`KnowledgeCompiler`] turns a DIMACS CNF into d-DNNF text,
//! and [`WeightedModelCounter`] approximates the weight of a weighted CNF. Closures implement
//! both traits, which is how tests replay canned outputs.

use crate::boolean_circuit::{BooleanCircuit, BooleanGate};
use crate::circuit::{CircuitError, Gate};
use crate::cnf::{cnf_bytes, Lit, Var};
use crate::d4::parse_d4_output;
use crate::ddnnf::DDnnf;
use crate::nnf::{Header, Node, Source, TextSource, Visitor};
use anyhow::Context;
use std::collections::HashMap;
use tracing::{debug, trace, trace_span};

/// Compiles CNF formulas to d-DNNF.
pub trait KnowledgeCompiler {
    /// Compiles `cnf`, in DIMACS format, with the compiler named `engine`.
    ///
    /// Returns the d-DNNF as NNF text (c2d, dsharp) or in the d4 dialect. Output which is neither
    /// is read as an unsatisfiable formula.
    fn compile(&self, cnf: &[u8], engine: &str) -> anyhow::Result<String>;
}

impl<F: Fn(&[u8], &str) -> anyhow::Result<String>> KnowledgeCompiler for F {
    fn compile(&self, cnf: &[u8], engine: &str) -> anyhow::Result<String> {
        self(cnf, engine)
    }
}

/// Approximate weighted model counting.
pub trait WeightedModelCounter {
    /// Weight of the models of `weighted_cnf`, a DIMACS CNF with `w lit weight` lines, within a
    /// factor `1 + epsilon` with probability at least `1 - delta`.
    fn count(&self, weighted_cnf: &[u8], delta: f64, epsilon: f64) -> anyhow::Result<f64>;
}

impl<F: Fn(&[u8], f64, f64) -> anyhow::Result<f64>> WeightedModelCounter for F {
    fn count(&self, weighted_cnf: &[u8], delta: f64, epsilon: f64) -> anyhow::Result<f64> {
        self(weighted_cnf, delta, epsilon)
    }
}

/// Translates the nodes of a compiled Tseytin encoding back to a circuit over the original
/// inputs.
struct CompiledVisitor<'a> {
    circuit: &'a BooleanCircuit,
    dd: BooleanCircuit,
    /// gate of each node, in order
    nodes: Vec<Gate>,
    literals: HashMap<Lit, Gate>,
    true_gate: Option<Gate>,
}

impl<'a> CompiledVisitor<'a> {
    fn new(circuit: &'a BooleanCircuit) -> Self {
        CompiledVisitor {
            circuit,
            dd: BooleanCircuit::new(),
            nodes: Vec::new(),
            literals: HashMap::new(),
            true_gate: None,
        }
    }

    fn input(&mut self, gate: Gate) -> Gate {
        let lit = Lit::positive(Var::from_index(gate.index()));
        if let Some(&g) = self.literals.get(&lit) {
            return g;
        }
        let g = self.dd.add_input(self.circuit.prob(gate));
        if let Some(uuid) = self.circuit.uuid(gate) {
            self.dd.set_uuid(g, uuid);
        }
        self.literals.insert(lit, g);
        g
    }

    fn literal(&mut self, lit: Lit) -> anyhow::Result<Gate> {
        let index = lit.var().index();
        anyhow::ensure!(
            index < self.circuit.nb_gates(),
            "literal {} does not match a gate",
            lit.to_dimacs()
        );
        let gate = Gate::from_index(index);
        if self.circuit.gate_type(gate) != BooleanGate::In {
            // auxiliary Tseytin variable, fixed by the inputs
            let dd = &mut self.dd;
            return Ok(*self
                .true_gate
                .get_or_insert_with(|| dd.add_gate(BooleanGate::And)));
        }
        let positive = self.input(gate);
        if lit.is_positive() {
            return Ok(positive);
        }
        if let Some(&g) = self.literals.get(&lit) {
            return Ok(g);
        }
        let negative = self.dd.add_gate(BooleanGate::Not);
        self.dd.add_wire(negative, positive);
        self.literals.insert(lit, negative);
        Ok(negative)
    }

    fn connective(&mut self, t: BooleanGate, children: &[usize]) -> anyhow::Result<Gate> {
        let gate = self.dd.add_gate(t);
        for &child in children {
            let target = *self
                .nodes
                .get(child)
                .with_context(|| format!("no node {}", child))?;
            self.dd.add_wire(gate, target);
        }
        Ok(gate)
    }

    fn finish(self) -> anyhow::Result<DDnnf> {
        let root = *self.nodes.last().context("empty d-DNNF")?;
        Ok(DDnnf::new(self.dd, root))
    }
}

impl<'a> Visitor for CompiledVisitor<'a> {
    fn visit_header(&mut self, header: &Header) -> anyhow::Result<()> {
        // d4 does not always report the number of variables
        anyhow::ensure!(
            header.nvars == 0 || header.nvars == self.circuit.nb_gates(),
            "wrong number of variables: {} vs {}",
            header.nvars,
            self.circuit.nb_gates()
        );
        self.nodes.reserve(header.nnodes);
        Ok(())
    }

    fn visit_node(&mut self, node: &Node) -> anyhow::Result<()> {
        let gate = match node {
            Node::L(lit) => self.literal(*lit)?,
            Node::A(children) => self.connective(BooleanGate::And, children)?,
            Node::O(_, children) => self.connective(BooleanGate::Or, children)?,
        };
        self.nodes.push(gate);
        Ok(())
    }
}

/// Reads the output of a knowledge compiler run on the Tseytin encoding of `circuit`.
///
/// Variable `i + 1` of the output is gate `i`: literals of inputs become the corresponding input
/// of the result, carrying its probability and identifier, and literals of other gates are
/// true. Output which is not a d-DNNF means the formula was unsatisfiable.
pub fn read_compiled(circuit: &BooleanCircuit, text: &str) -> anyhow::Result<DDnnf> {
    let first = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('c'));
    let mut visitor = CompiledVisitor::new(circuit);
    let parsed = match first {
        Some(line) if line.starts_with("nnf") => TextSource(text).visit(&mut visitor),
        Some(line) if line.starts_with(|c: char| "oatf".contains(c)) => {
            parse_d4_output(text).and_then(|graph| (&graph).visit(&mut visitor))
        }
        _ => {
            debug!("compiler output is not a d-DNNF, the formula is unsatisfiable");
            return Ok(DDnnf::falsum());
        }
    };
    parsed
        .and_then(|()| visitor.finish())
        .map_err(|e| CircuitError::MalformedOutput(format!("{:#}", e)).into())
}

impl BooleanCircuit {
    /// d-DNNF equivalent to `root`, obtained by compiling its Tseytin encoding with the
    /// compiler named `engine`.
    pub fn compilation(
        &self,
        root: Gate,
        compiler: &dyn KnowledgeCompiler,
        engine: &str,
    ) -> anyhow::Result<DDnnf> {
        let _span = trace_span!("compilation", engine, timing = true).entered();
        let cnf = cnf_bytes(self, root, false)?;
        let text = compiler.compile(&cnf, engine)?;
        let dd = read_compiled(self, &text)?;
        trace!(stats = true, engine, dnnf_gates = dd.nb_gates(), "compiled d-DNNF");
        Ok(dd)
    }

    /// Approximate probability of `root` by weighted model counting of its Tseytin encoding.
    pub fn weightmc(
        &self,
        root: Gate,
        counter: &dyn WeightedModelCounter,
        delta: f64,
        epsilon: f64,
    ) -> anyhow::Result<f64> {
        let _span = trace_span!("weightmc", delta, epsilon, timing = true).entered();
        let cnf = cnf_bytes(self, root, true)?;
        counter.count(&cnf, delta, epsilon)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::almost_equals;

    /// gates: a b AND(a, b)
    fn conjunction() -> (BooleanCircuit, Gate) {
        let mut c = BooleanCircuit::new();
        let a = c.set_input("a", 0.3);
        let b = c.set_input("b", 0.4);
        let root = c.set_gate("root", BooleanGate::And);
        c.add_wire(root, a);
        c.add_wire(root, b);
        (c, root)
    }

    #[test]
    fn nnf_output() -> anyhow::Result<()> {
        let (c, root) = conjunction();
        let compiler = |cnf: &[u8], engine: &str| -> anyhow::Result<String> {
            assert_eq!(engine, "c2d");
            assert!(String::from_utf8_lossy(cnf).starts_with("p cnf 3 4"));
            Ok("nnf 4 3 3\nL 1\nL 2\nL 3\nA 3 0 1 2\n".to_owned())
        };
        let dd = c.compilation(root, &compiler, "c2d")?;
        assert!(almost_equals(dd.probability_evaluation()?, 0.12));
        assert_eq!(dd.inputs().len(), 2);
        assert!(dd.find_gate("a").is_some());
        Ok(())
    }

    #[test]
    fn nnf_output_without_variable_count() -> anyhow::Result<()> {
        let (c, root) = conjunction();
        let compiler = |_: &[u8], _: &str| -> anyhow::Result<String> {
            Ok("nnf 4 3 0\nL 1\nL 2\nL 3\nA 3 0 1 2\n".to_owned())
        };
        let dd = c.compilation(root, &compiler, "d4")?;
        assert!(almost_equals(dd.probability_evaluation()?, 0.12));
        Ok(())
    }

    #[test]
    fn d4_output() -> anyhow::Result<()> {
        // a ∨ b as a decision on a
        let mut c = BooleanCircuit::new();
        let a = c.set_input("a", 0.5);
        let b = c.set_input("b", 0.5);
        let root = c.add_gate(BooleanGate::Or);
        c.add_wire(root, a);
        c.add_wire(root, b);
        let compiler = |_: &[u8], _: &str| -> anyhow::Result<String> {
            Ok("c nvars 3\no 1 0\nt 2 0\n1 2 1 3 0\n1 2 -1 2 3 0\n".to_owned())
        };
        let dd = c.compilation(root, &compiler, "d4")?;
        assert!(almost_equals(dd.probability_evaluation()?, 0.75));
        Ok(())
    }

    #[test]
    fn unsatisfiable() -> anyhow::Result<()> {
        let (c, root) = conjunction();
        let compiler =
            |_: &[u8], _: &str| -> anyhow::Result<String> { Ok("s UNSATISFIABLE\n".to_owned()) };
        let dd = c.compilation(root, &compiler, "c2d")?;
        assert_eq!(dd.probability_evaluation()?, 0.);
        Ok(())
    }

    #[test]
    fn wrong_variable_count() {
        let (c, root) = conjunction();
        let compiler = |_: &[u8], _: &str| -> anyhow::Result<String> {
            Ok("nnf 1 0 5\nL 1\n".to_owned())
        };
        let err = c.compilation(root, &compiler, "dsharp").unwrap_err();
        match err.downcast_ref::<CircuitError>() {
            Some(CircuitError::MalformedOutput(msg)) => {
                assert!(msg.contains("wrong number of variables: 5 vs 3"), "{}", msg)
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn weighted_counting() -> anyhow::Result<()> {
        let (c, root) = conjunction();
        let counter = |cnf: &[u8], delta: f64, epsilon: f64| -> anyhow::Result<f64> {
            let text = String::from_utf8_lossy(cnf);
            assert!(text.contains("w 1 0.3"));
            assert_eq!((delta, epsilon), (0.2, 0.8));
            Ok(0.12)
        };
        assert_eq!(c.weightmc(root, &counter, 0.2, 0.8)?, 0.12);
        Ok(())
    }
}

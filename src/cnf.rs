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

//! Tseytin encoding of Boolean circuits to CNF formulas

use crate::boolean_circuit::{BooleanCircuit, BooleanGate};
use crate::circuit::{CircuitError, Gate};
use std::io::Write;
use tracing::trace;
pub use varisat_dimacs::write_dimacs;
pub use varisat_formula::{CnfFormula, ExtendFormula, Lit, Var};

/// Converts a string to dimacs in a string, for debugging.
pub fn to_dimacs_string(f: &CnfFormula) -> anyhow::Result<String> {
    let mut buf = Vec::new();
    write_dimacs(&mut buf, f)?;
    Ok(String::from_utf8(buf)?)
}

fn var(gate: Gate) -> Var {
    Var::from_index(gate.index())
}

/// Tseytin encoding of `circuit` with `root` forced to true.
///
/// Variable `i + 1` stands for gate `i`. The formula has one variable per gate, so that its
/// models restricted to input variables are exactly the worlds where `root` is true.
pub fn tseytin(circuit: &BooleanCircuit, root: Gate) -> anyhow::Result<CnfFormula> {
    let mut formula = CnfFormula::new();
    let mut clause = Vec::new();
    for gate in circuit.gates() {
        let id = var(gate);
        match circuit.gate_type(gate) {
            BooleanGate::In => (),
            BooleanGate::And => {
                for &child in circuit.wires(gate) {
                    formula.add_clause(&[Lit::negative(id), Lit::positive(var(child))]);
                }
                clause.clear();
                clause.push(Lit::positive(id));
                clause.extend(circuit.wires(gate).iter().map(|&c| Lit::negative(var(c))));
                formula.add_clause(&clause);
            }
            BooleanGate::Or => {
                for &child in circuit.wires(gate) {
                    formula.add_clause(&[Lit::positive(id), Lit::negative(var(child))]);
                }
                clause.clear();
                clause.push(Lit::negative(id));
                clause.extend(circuit.wires(gate).iter().map(|&c| Lit::positive(var(c))));
                formula.add_clause(&clause);
            }
            BooleanGate::Not => {
                let child = match circuit.wires(gate) {
                    &[child] => child,
                    _ => {
                        return Err(CircuitError::Unsupported(
                            gate,
                            "NOT gate must have exactly one child",
                        )
                        .into())
                    }
                };
                formula.add_clause(&[Lit::negative(id), Lit::negative(var(child))]);
                formula.add_clause(&[Lit::positive(id), Lit::positive(var(child))]);
            }
            BooleanGate::Mulin => return Err(CircuitError::Multivalued(gate).into()),
            BooleanGate::Undetermined => return Err(CircuitError::Undetermined(gate).into()),
        }
    }
    formula.add_clause(&[Lit::positive(var(root))]);
    formula.set_var_count(circuit.nb_gates());
    trace!(
        stats = true,
        cnf_vars = formula.var_count(),
        cnf_clauses = formula.len(),
        "tseytin encoding"
    );
    Ok(formula)
}

/// Writes the DIMACS Tseytin encoding of `circuit` rooted at `root` to `out`.
///
/// When `weighted`, each input `g` of probability `p` is followed by lines `w g p` and
/// `w -g 1-p`, as read by weighted model counters.
pub fn write_cnf<W: Write>(
    circuit: &BooleanCircuit,
    root: Gate,
    weighted: bool,
    mut out: W,
) -> anyhow::Result<()> {
    let formula = tseytin(circuit, root)?;
    write_dimacs(&mut out, &formula)?;
    if weighted {
        for &input in circuit.inputs() {
            let p = circuit.prob(input);
            writeln!(out, "w {} {}", input.to_dimacs(), p)?;
            writeln!(out, "w -{} {}", input.to_dimacs(), 1. - p)?;
        }
    }
    Ok(())
}

/// [`write_cnf`] to a buffer
pub fn cnf_bytes(circuit: &BooleanCircuit, root: Gate, weighted: bool) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_cnf(circuit, root, weighted, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn and_encoding() -> anyhow::Result<()> {
        let mut c = BooleanCircuit::new();
        let a = c.set_input("a", 0.3);
        let b = c.set_input("b", 0.4);
        let root = c.set_gate("root", BooleanGate::And);
        c.add_wire(root, a);
        c.add_wire(root, b);
        let text = String::from_utf8(cnf_bytes(&c, root, true)?)?;
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        assert_eq!(lines[0], "p cnf 3 4");
        for clause in ["-3 1 0", "-3 2 0", "3 -1 -2 0", "3 0"].iter() {
            assert!(lines.contains(clause), "{} missing in\n{}", clause, text);
        }
        assert!(lines.contains(&"w 1 0.3"));
        assert!(lines.contains(&"w -2 0.6"));
        Ok(())
    }

    #[test]
    fn or_not_encoding() -> anyhow::Result<()> {
        let mut c = BooleanCircuit::new();
        let a = c.set_input("a", 0.5);
        let not = c.add_gate(BooleanGate::Not);
        c.add_wire(not, a);
        let root = c.add_gate(BooleanGate::Or);
        c.add_wire(root, not);
        let formula = tseytin(&c, root)?;
        assert_eq!(formula.var_count(), 3);
        let text = to_dimacs_string(&formula)?;
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        for clause in ["-2 -1 0", "2 1 0", "3 -2 0", "-3 2 0", "3 0"].iter() {
            assert!(lines.contains(clause), "{} missing in\n{}", clause, text);
        }
        Ok(())
    }

    #[test]
    fn rejects_multivalued() {
        let mut c = BooleanCircuit::new();
        let x = c.set_mulinput("x", 0.5, 0);
        let err = tseytin(&c, x).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CircuitError>(),
            Some(&CircuitError::Multivalued(x))
        );
    }
}

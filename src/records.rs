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

//! Reading circuits: JSON gate records, and the plain text format of the tree decomposition
//! compiler.

use crate::boolean_circuit::{BooleanCircuit, BooleanGate};
use crate::circuit::Gate;
use crate::utils::{end_of_line, unsigned};
use anyhow::Context;
use nom::character::complete::{alpha1, space1};
use nom::combinator::{map_res, opt};
use nom::number::complete::double;
use nom::sequence::{preceded, tuple};
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Probability of inputs of the text format which do not specify one
pub const DEFAULT_INPUT_PROBABILITY: f64 = 0.001;

/// One gate of a circuit, as serialized in JSON.
///
/// Children may be defined after their parents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRecord {
    /// External identifier
    pub id: String,
    /// Type of the gate
    pub gate: BooleanGate,
    /// Identifiers of the children, in order
    #[serde(default)]
    pub children: Vec<String>,
    /// Probability, for inputs
    #[serde(default)]
    pub prob: Option<f64>,
    /// Key of the categorical variable, for multivalued inputs
    #[serde(default)]
    pub key: Option<u32>,
}

fn check_probability(id: &str, p: f64) -> anyhow::Result<f64> {
    anyhow::ensure!(
        (0. ..=1.).contains(&p),
        "probability {} of gate {} is not in [0, 1]",
        p,
        id
    );
    Ok(p)
}

impl BooleanCircuit {
    /// Adds the gate described by `record`, creating its children as undetermined gates when they
    /// are not known yet.
    pub fn ingest(&mut self, record: &GateRecord) -> anyhow::Result<Gate> {
        if let Some(existing) = self.find_gate(&record.id) {
            anyhow::ensure!(
                self.gate_type(existing) == BooleanGate::Undetermined,
                "gate {} is defined twice",
                record.id
            );
        }
        match record.gate {
            BooleanGate::In | BooleanGate::Mulin => anyhow::ensure!(
                record.children.is_empty(),
                "input {} may not have children",
                record.id
            ),
            BooleanGate::Not => anyhow::ensure!(
                record.children.len() == 1,
                "NOT gate {} must have exactly one child",
                record.id
            ),
            BooleanGate::And | BooleanGate::Or => (),
            BooleanGate::Undetermined => anyhow::bail!("gate {} has no type", record.id),
        }
        let gate = self.set_gate(&record.id, record.gate);
        match record.gate {
            BooleanGate::In => {
                let p = record.prob.unwrap_or(1.);
                self.set_prob(gate, check_probability(&record.id, p)?);
            }
            BooleanGate::Mulin => {
                let p = record
                    .prob
                    .with_context(|| format!("multivalued input {} has no probability", record.id))?;
                let key = record
                    .key
                    .with_context(|| format!("multivalued input {} has no key", record.id))?;
                self.set_prob(gate, check_probability(&record.id, p)?);
                self.set_info(gate, key);
            }
            BooleanGate::And | BooleanGate::Or | BooleanGate::Not | BooleanGate::Undetermined => {}
        }
        for child in &record.children {
            let child = self.get_gate(child);
            self.add_wire(gate, child);
        }
        Ok(gate)
    }
}

/// Reads one [`GateRecord`] per line.
pub fn read_json_lines<R: BufRead>(reader: R) -> anyhow::Result<BooleanCircuit> {
    let mut circuit = BooleanCircuit::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.context("reading gate records")?;
        if line.trim().is_empty() {
            continue;
        }
        let record: GateRecord = serde_json::from_str(&line)
            .with_context(|| format!("parsing gate record line {}", lineno + 1))?;
        circuit
            .ingest(&record)
            .with_context(|| format!("line {}", lineno + 1))?;
    }
    circuit.check_acyclic()?;
    Ok(circuit)
}

type GateLine = (BooleanGate, Option<f64>, Option<usize>);

fn gate_line(line: &str) -> IResult<&str, GateLine> {
    let (rest, t) = map_res(alpha1, BooleanGate::from_str)(line)?;
    let (rest, prob) = opt(preceded(space1, double))(rest)?;
    let (rest, key) = opt(preceded(space1, unsigned))(rest)?;
    let (rest, _) = end_of_line(rest)?;
    Ok((rest, (t, prob, key)))
}

fn wire_line(line: &str) -> IResult<&str, (usize, usize)> {
    let (rest, (from, _, to, _)) = tuple((unsigned, space1, unsigned, end_of_line))(line)?;
    Ok((rest, (from, to)))
}

/// Parses the text format: a gate count `N`, then `N` lines `IN [p]`, `MULIN p key`, `AND`,
/// `OR` or `NOT` for gates named `0` to `N - 1`, then one wire `from to` per line.
pub fn parse_circuit_text(text: &str) -> anyhow::Result<BooleanCircuit> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());
    let (_, first) = lines.next().context("empty circuit file")?;
    let nb_gates: usize = first
        .parse()
        .with_context(|| format!("expected number of gates, found {:?}", first))?;
    let mut circuit = BooleanCircuit::new();
    for i in 0..nb_gates {
        let (lineno, line) = lines
            .next()
            .with_context(|| format!("expected {} gates, found {}", nb_gates, i))?;
        let (_, (t, prob, key)) = gate_line(line)
            .map_err(|_| anyhow::anyhow!("Wrong line type: {} line {}", line, lineno))?;
        let id = i.to_string();
        let gate = circuit.set_gate(&id, t);
        match (t, prob, key) {
            (BooleanGate::In, prob, None) => {
                let p = prob.unwrap_or(DEFAULT_INPUT_PROBABILITY);
                circuit.set_prob(gate, check_probability(&id, p)?);
            }
            (BooleanGate::Mulin, Some(p), Some(key)) => {
                let key = u32::try_from(key).with_context(|| format!("key too large line {}", lineno))?;
                circuit.set_prob(gate, check_probability(&id, p)?);
                circuit.set_info(gate, key);
            }
            (BooleanGate::And, None, None)
            | (BooleanGate::Or, None, None)
            | (BooleanGate::Not, None, None) => (),
            _ => anyhow::bail!("Wrong line type: {} line {}", line, lineno),
        }
    }
    for (lineno, line) in lines {
        let (_, (from, to)) =
            wire_line(line).map_err(|_| anyhow::anyhow!("expected a wire line {}", lineno))?;
        anyhow::ensure!(
            from < nb_gates && to < nb_gates,
            "wire {} -> {} to unknown gate line {}",
            from,
            to,
            lineno
        );
        circuit.add_wire(Gate::from_index(from), Gate::from_index(to));
    }
    circuit.check_acyclic()?;
    Ok(circuit)
}

/// Reads a circuit from a file: JSON lines of [`GateRecord`]s when the extension is `json` or
/// `jsonl`, the text format otherwise.
pub fn read_circuit(path: &Path) -> anyhow::Result<BooleanCircuit> {
    let json = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("jsonl")
    );
    debug!(path = %path.display(), json, "reading circuit");
    let circuit = if json {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening circuit {}", path.display()))?;
        read_json_lines(std::io::BufReader::new(file))
    } else {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading circuit {}", path.display()))?;
        parse_circuit_text(&text)
    };
    circuit.with_context(|| format!("reading circuit {}", path.display()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::circuit::CircuitError;
    use crate::utils::almost_equals;

    #[test]
    fn text_format() -> anyhow::Result<()> {
        let circuit = parse_circuit_text("4\nOR\nIN 0.5\nIN\nMULIN 0.3 7\n0 1\n0 2\n\n0 3\n")?;
        assert_eq!(circuit.nb_gates(), 4);
        let root = circuit.find_gate("0").context("root")?;
        assert_eq!(circuit.gate_type(root), BooleanGate::Or);
        assert_eq!(circuit.wires(root).len(), 3);
        let default = circuit.find_gate("2").context("input")?;
        assert_eq!(circuit.prob(default), DEFAULT_INPUT_PROBABILITY);
        let mulin = circuit.find_gate("3").context("mulin")?;
        assert_eq!(circuit.info(mulin), Some(7));
        assert!(almost_equals(circuit.prob(mulin), 0.3));
        Ok(())
    }

    #[test]
    fn bad_text() {
        assert!(parse_circuit_text("2\nOR\nXOR\n").is_err());
        assert!(parse_circuit_text("2\nOR\n").is_err());
        assert!(parse_circuit_text("1\nAND 0.5\n").is_err());
        assert!(parse_circuit_text("1\nIN 1.5\n").is_err());
        assert!(parse_circuit_text("2\nOR\nIN\n0 2\n").is_err());
        assert!(parse_circuit_text("2\nOR\nIN\n0 x\n").is_err());
    }

    #[test]
    fn cycles_are_rejected() {
        let text = r#"{"id": "a", "gate": "AND", "children": ["b"]}
{"id": "b", "gate": "OR", "children": ["a"]}
"#;
        let err = read_json_lines(text.as_bytes()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CircuitError>(),
            Some(CircuitError::Cyclic(_))
        ));
        let err = parse_circuit_text("2\nAND\nNOT\n0 1\n1 0\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CircuitError>(),
            Some(CircuitError::Cyclic(_))
        ));
        assert!(parse_circuit_text("1\nOR\n0 0\n").is_err());
    }

    #[test]
    fn json_lines() -> anyhow::Result<()> {
        let text = r#"{"id": "root", "gate": "AND", "children": ["a", "n"]}
{"id": "n", "gate": "NOT", "children": ["b"]}
{"id": "a", "gate": "IN", "prob": 0.3}

{"id": "b", "gate": "IN", "prob": 0.4}
"#;
        let circuit = read_json_lines(text.as_bytes())?;
        let root = circuit.find_gate("root").context("root")?;
        assert!(almost_equals(circuit.independent_evaluation(root)?, 0.3 * 0.6));
        assert_eq!(circuit.inputs().len(), 2);
        Ok(())
    }

    #[test]
    fn bad_records() {
        let twice = "{\"id\": \"a\", \"gate\": \"IN\"}\n{\"id\": \"a\", \"gate\": \"OR\"}\n";
        assert!(read_json_lines(twice.as_bytes()).is_err());
        let no_key = "{\"id\": \"a\", \"gate\": \"MULIN\", \"prob\": 0.5}\n";
        assert!(read_json_lines(no_key.as_bytes()).is_err());
        let unknown = "{\"id\": \"a\", \"gate\": \"XOR\"}\n";
        assert!(read_json_lines(unknown.as_bytes()).is_err());
    }

    #[test]
    fn record_serialization() -> anyhow::Result<()> {
        let record = GateRecord {
            id: "x".to_owned(),
            gate: BooleanGate::Mulin,
            children: vec![],
            prob: Some(0.5),
            key: Some(2),
        };
        let text = serde_json::to_string(&record)?;
        assert!(text.contains("\"MULIN\""), "{}", text);
        assert_eq!(serde_json::from_str::<GateRecord>(&text)?, record);
        Ok(())
    }
}

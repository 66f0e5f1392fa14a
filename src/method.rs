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

//! Choice of the algorithm computing the probability of a gate, with fallbacks.

use crate::boolean_circuit::{BooleanCircuit, BooleanGate};
use crate::circuit::Gate;
use crate::compile::{KnowledgeCompiler, WeightedModelCounter};
use crate::ddnnf::DDnnf;
use crate::tree_decomposition::TreewidthExceeded;
use crate::utils::CancellationToken;
use anyhow::Context;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace_span, warn};

/// Knowledge compiler used when none is named
pub const DEFAULT_ENGINE: &str = "d4";
/// Default probability that weightmc misses its tolerance
pub const DEFAULT_DELTA: f64 = 0.2;
/// Default multiplicative tolerance of weightmc
pub const DEFAULT_EPSILON: f64 = 0.8;

/// How to compute probabilities.
///
/// Parsed from `name[:arguments]`, for instance `monte-carlo:10000` or `compilation:c2d`.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    /// Sampling random worlds
    MonteCarlo {
        /// number of worlds
        samples: u64,
    },
    /// Enumerating all worlds
    PossibleWorlds,
    /// Compiling the Tseytin encoding to a d-DNNF with an external compiler
    Compilation {
        /// d4, c2d or dsharp
        engine: String,
    },
    /// Approximate weighted model counting
    WeightMc {
        /// probability of missing the tolerance
        delta: f64,
        /// multiplicative tolerance
        epsilon: f64,
    },
    /// Compiling to a d-DNNF through a tree decomposition
    TreeDecomposition,
    /// Closed form, for circuits which read each input once
    Independent,
    /// Independent evaluation, then tree decomposition, then compilation with d4
    Default,
}

impl Default for Method {
    fn default() -> Self {
        Method::Default
    }
}

fn weightmc_parameter(text: Option<&str>, default: f64) -> anyhow::Result<f64> {
    let text = text.map(str::trim).unwrap_or("");
    if text.is_empty() {
        return Ok(default);
    }
    let value: f64 = text
        .parse()
        .with_context(|| format!("Invalid weightmc parameter '{}'", text))?;
    Ok(if value == 0. { default } else { value })
}

impl FromStr for Method {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (name, args) = match s.split_once(':') {
            Some((name, args)) => (name, Some(args)),
            None => (s, None),
        };
        let args = args.filter(|a| !a.trim().is_empty());
        Ok(match name {
            "" => Method::Default,
            "monte-carlo" => {
                let text = args.unwrap_or("").trim();
                let samples = text
                    .parse::<u64>()
                    .ok()
                    .filter(|&n| n > 0)
                    .with_context(|| format!("Invalid number of samples: '{}'", text))?;
                Method::MonteCarlo { samples }
            }
            "possible-worlds" => {
                if let Some(args) = args {
                    warn!("Argument '{}' ignored for method possible-worlds", args);
                }
                Method::PossibleWorlds
            }
            "compilation" => Method::Compilation {
                engine: args.unwrap_or(DEFAULT_ENGINE).trim().to_owned(),
            },
            "weightmc" => {
                let mut parts = args.unwrap_or("").splitn(2, ';');
                let delta = weightmc_parameter(parts.next(), DEFAULT_DELTA)?;
                let epsilon = weightmc_parameter(parts.next(), DEFAULT_EPSILON)?;
                Method::WeightMc { delta, epsilon }
            }
            "tree-decomposition" => Method::TreeDecomposition,
            "independent" => Method::Independent,
            _ => anyhow::bail!("Wrong method '{}' for probability evaluation", name),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::MonteCarlo { samples } => write!(f, "monte-carlo:{}", samples),
            Method::PossibleWorlds => write!(f, "possible-worlds"),
            Method::Compilation { engine } => write!(f, "compilation:{}", engine),
            Method::WeightMc { delta, epsilon } => write!(f, "weightmc:{};{}", delta, epsilon),
            Method::TreeDecomposition => write!(f, "tree-decomposition"),
            Method::Independent => write!(f, "independent"),
            Method::Default => Ok(()),
        }
    }
}

/// `circuit` with multivalued inputs replaced by Boolean ones
fn without_mulinputs(circuit: &BooleanCircuit) -> Cow<'_, BooleanCircuit> {
    if circuit.mulinputs().is_empty() {
        return Cow::Borrowed(circuit);
    }
    let mut rewritten = circuit.clone();
    rewritten.rewrite_multivalued_gates();
    Cow::Owned(rewritten)
}

/// Runs a [`Method`] with the external tools it may need.
#[derive(Clone, Default)]
pub struct Evaluator<'a> {
    compiler: Option<&'a dyn KnowledgeCompiler>,
    counter: Option<&'a dyn WeightedModelCounter>,
    token: CancellationToken,
}

impl<'a> Evaluator<'a> {
    /// An evaluator without external tools, interrupted by `token`
    pub fn new(token: CancellationToken) -> Self {
        Evaluator {
            compiler: None,
            counter: None,
            token,
        }
    }

    /// Uses `compiler` for compilation, including as a fallback.
    pub fn with_compiler(mut self, compiler: &'a dyn KnowledgeCompiler) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Uses `counter` for weightmc.
    pub fn with_counter(mut self, counter: &'a dyn WeightedModelCounter) -> Self {
        self.counter = Some(counter);
        self
    }

    fn compiler(&self) -> anyhow::Result<&'a dyn KnowledgeCompiler> {
        self.compiler.context("no knowledge compiler available")
    }

    fn counter(&self) -> anyhow::Result<&'a dyn WeightedModelCounter> {
        self.counter.context("no weighted model counter available")
    }

    /// Probability that `root` is true, clamped to [0, 1].
    ///
    /// Every method but `independent` first rewrites multivalued inputs.
    pub fn probability(
        &self,
        circuit: &BooleanCircuit,
        root: Gate,
        method: &Method,
    ) -> anyhow::Result<f64> {
        let _span = trace_span!("probability", %method, timing = true).entered();
        let result = match method {
            Method::Independent => circuit.independent_evaluation(root)?,
            Method::Default => match circuit.independent_evaluation(root) {
                Ok(p) => p,
                Err(e) => {
                    debug!("independent evaluation failed: {:#}", e);
                    self.make_dd(circuit, root, method)?.probability_evaluation()?
                }
            },
            Method::MonteCarlo { samples } => {
                without_mulinputs(circuit).monte_carlo(root, *samples, &self.token)?
            }
            Method::PossibleWorlds => without_mulinputs(circuit).possible_worlds(root, &self.token)?,
            Method::WeightMc { delta, epsilon } => {
                without_mulinputs(circuit).weightmc(root, self.counter()?, *delta, *epsilon)?
            }
            Method::Compilation { .. } | Method::TreeDecomposition => {
                self.make_dd(circuit, root, method)?.probability_evaluation()?
            }
        };
        debug!(result, "probability");
        Ok(result.max(0.).min(1.))
    }

    /// d-DNNF equivalent to `root`, for `compilation`, `tree-decomposition` or the default
    /// method, which tries a tree decomposition before compiling with d4.
    pub fn make_dd(
        &self,
        circuit: &BooleanCircuit,
        root: Gate,
        method: &Method,
    ) -> anyhow::Result<DDnnf> {
        let circuit = without_mulinputs(circuit);
        match method {
            Method::Compilation { engine } => circuit.compilation(root, self.compiler()?, engine),
            Method::TreeDecomposition => DDnnf::from_tree_decomposition(&circuit, root),
            Method::Default => match DDnnf::from_tree_decomposition(&circuit, root) {
                Err(e) => match e.downcast_ref::<TreewidthExceeded>() {
                    Some(exceeded) => {
                        debug!(%exceeded, "falling back to compilation with {}", DEFAULT_ENGINE);
                        circuit.compilation(root, self.compiler()?, DEFAULT_ENGINE)
                    }
                    None => Err(e),
                },
                ok => ok,
            },
            Method::MonteCarlo { .. }
            | Method::PossibleWorlds
            | Method::WeightMc { .. }
            | Method::Independent => {
                anyhow::bail!("Method '{}' does not build a d-DNNF", method)
            }
        }
    }

    /// d-DNNF ready for Shapley (smooth, binary AND gates) or Banzhaf (smooth) computations
    fn scoring_dd(
        &self,
        circuit: &BooleanCircuit,
        root: Gate,
        method: &Method,
        banzhaf: bool,
    ) -> anyhow::Result<DDnnf> {
        let mut dd = self.make_dd(circuit, root, method)?;
        dd.make_smooth();
        if !banzhaf {
            dd.make_gates_binary(BooleanGate::And)?;
        }
        Ok(dd)
    }

    /// Expected Shapley value, or Banzhaf value if `banzhaf`, of the input named `var` for
    /// `root`. Gates which are not Boolean inputs get 0.
    pub fn shapley(
        &self,
        circuit: &BooleanCircuit,
        root: Gate,
        var: &str,
        method: &Method,
        banzhaf: bool,
    ) -> anyhow::Result<f64> {
        match circuit.find_gate(var) {
            Some(gate) if circuit.gate_type(gate) == BooleanGate::In => (),
            _ => return Ok(0.),
        }
        let dd = self.scoring_dd(circuit, root, method, banzhaf)?;
        match dd.find_gate(var) {
            // the input does not influence the root
            None => Ok(0.),
            Some(gate) if banzhaf => dd.banzhaf(gate),
            Some(gate) => dd.shapley(gate),
        }
    }

    /// [`Evaluator::shapley`] of every named input of the circuit.
    pub fn shapley_all_vars(
        &self,
        circuit: &BooleanCircuit,
        root: Gate,
        method: &Method,
        banzhaf: bool,
    ) -> anyhow::Result<Vec<(String, f64)>> {
        let dd = self.scoring_dd(circuit, root, method, banzhaf)?;
        let mut result = Vec::with_capacity(circuit.inputs().len());
        for &input in circuit.inputs() {
            let name = match circuit.uuid(input) {
                Some(name) => name,
                None => continue,
            };
            let value = match dd.find_gate(name) {
                None => 0.,
                Some(gate) if banzhaf => dd.banzhaf(gate)?,
                Some(gate) => dd.shapley(gate)?,
            };
            result.push((name.to_owned(), value));
        }
        Ok(result)
    }
}

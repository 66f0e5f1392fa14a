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

#![warn(missing_docs)]

//! Exact probabilistic inference over Boolean provenance circuits: probability of a gate and
//! expected Shapley or Banzhaf values of its inputs, by compilation to d-DNNF through a tree
//! decomposition or an external knowledge compiler.

pub mod boolean_circuit;
pub mod builder;
pub mod circuit;
pub mod cnf;
pub mod compile;
pub mod d4;
pub mod ddnnf;
pub mod external;
pub mod graph;
pub mod method;
pub mod nnf;
pub mod permutation;
pub mod records;
pub mod tree_decomposition;
pub mod utils;

use anyhow::Context;
use boolean_circuit::BooleanCircuit;
use chrono::Duration;
use circuit::{CircuitError, Gate};
use external::{ExternalCompiler, ExternalWeightMc};
use method::{Evaluator, Method};
use serde::Serialize;
use std::cell::RefCell;
use std::fs::File;
use std::ops::DerefMut;
use std::path::PathBuf;
use std::time::Instant;
use structopt::StructOpt;
use utils::CancellationToken;

/// Exit code when the timeout interrupts the computation
const TIMEOUT_EXIT_CODE: i32 = 42;

fn parse_duration(txt: &str) -> anyhow::Result<Duration> {
    let n = txt.parse()?;
    Ok(Duration::milliseconds(n))
}

#[derive(Debug)]
/// Writes the result in json to a file.
pub struct ResultWriter {
    file: RefCell<File>,
    path: PathBuf,
}

impl ResultWriter {
    fn write<R: Serialize>(&self, result: &R) -> anyhow::Result<()> {
        serde_json::to_writer_pretty(self.file.borrow_mut().deref_mut(), result)
            .with_context(|| format!("writing result to {}", self.path.display()))
    }
}

impl From<&std::ffi::OsStr> for ResultWriter {
    fn from(path: &std::ffi::OsStr) -> ResultWriter {
        let path: PathBuf = path.into();
        let file = match File::create(&path) {
            Ok(f) => RefCell::new(f),
            Err(e) => {
                tracing::error!(
                    "failed to open {} to write results (--json option): {}",
                    path.display(),
                    e
                );
                std::process::exit(1);
            }
        };
        ResultWriter { path, file }
    }
}

#[derive(Debug, Serialize)]
struct ProbabilityResult<'a> {
    root: &'a str,
    method: String,
    probability: f64,
}

#[derive(Debug, Serialize)]
struct VariableScore {
    variable: String,
    value: f64,
}

#[derive(Debug, Serialize)]
struct ScoreResult<'a> {
    root: &'a str,
    method: String,
    score: &'static str,
    values: Vec<VariableScore>,
}

/// Configuration options
#[derive(Debug, StructOpt)]
#[structopt(
    name = "provcirc",
    about = "Computes the probability of a gate of a Boolean provenance circuit"
)]
pub struct Opt {
    /// Input circuit: JSON gate records, one per line, if the file ends with .json or .jsonl,
    /// the plain text format otherwise
    #[structopt(parse(from_os_str))]
    input: PathBuf,

    /// Identifier of the output gate
    #[structopt(short, long, default_value = "0")]
    root: String,

    /// Evaluation method: independent, possible-worlds, monte-carlo:N, tree-decomposition,
    /// compilation[:d4|c2d|dsharp] or weightmc[:delta;epsilon].
    ///
    /// By default, tries independent evaluation, then a tree decomposition, then compilation
    /// with d4.
    #[structopt(short, long)]
    method: Option<Method>,

    /// Compute the expected Shapley value of inputs instead of the probability
    #[structopt(long, conflicts_with = "banzhaf")]
    shapley: bool,

    /// Compute the expected Banzhaf value of inputs instead of the probability
    #[structopt(long)]
    banzhaf: bool,

    /// Only compute the Shapley or Banzhaf value of this input
    #[structopt(long)]
    variable: Option<String>,

    /// JSON output to the specified file
    #[structopt(short, long, parse(from_os_str))]
    json: Option<ResultWriter>,

    /// Timeout, in milliseconds. Return code is 42 on timeout.
    #[structopt(short="T", long, parse(try_from_str = parse_duration))]
    timeout: Option<Duration>,

    /// Enable debug output
    #[structopt(short, long)]
    debug: bool,
}

/// Installs a fmt subscriber showing INFO events, or everything when `debug`.
pub fn setup_tracing(debug: bool) -> anyhow::Result<()> {
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::prelude::*;
    let min_level = if debug { Level::TRACE } else { Level::INFO };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(tracing_subscriber::filter::filter_fn(move |metadata| {
            *metadata.level() <= min_level
        }));
    let subscriber = tracing_subscriber::Registry::default().with(fmt_layer);
    #[cfg(feature = "tracy")]
    let subscriber = subscriber.with(tracing_tracy::TracyLayer::new());
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default tracing collector")?;
    Ok(())
}

fn evaluate(
    opt: &Opt,
    evaluator: &Evaluator,
    circuit: &BooleanCircuit,
    root: Gate,
    method: &Method,
) -> anyhow::Result<()> {
    if opt.shapley || opt.banzhaf {
        let score = if opt.banzhaf { "banzhaf" } else { "shapley" };
        let values = match &opt.variable {
            Some(var) => vec![(
                var.clone(),
                evaluator.shapley(circuit, root, var, method, opt.banzhaf)?,
            )],
            None => evaluator.shapley_all_vars(circuit, root, method, opt.banzhaf)?,
        };
        match &opt.json {
            Some(writer) => writer.write(&ScoreResult {
                root: &opt.root,
                method: method.to_string(),
                score,
                values: values
                    .into_iter()
                    .map(|(variable, value)| VariableScore { variable, value })
                    .collect(),
            })?,
            None => {
                for (var, value) in values {
                    println!("{} value of {}: {}", score, var, value);
                }
            }
        }
    } else {
        let probability = evaluator.probability(circuit, root, method)?;
        match &opt.json {
            Some(writer) => writer.write(&ProbabilityResult {
                root: &opt.root,
                method: method.to_string(),
                probability,
            })?,
            None => println!("Probability of {}: {}", opt.root, probability),
        }
    }
    Ok(())
}

/// entrypoint of the binary
pub fn run() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    let start_time = Instant::now();
    setup_tracing(opt.debug)?;
    let circuit = records::read_circuit(&opt.input)?;
    let root = circuit
        .find_gate(&opt.root)
        .with_context(|| format!("no gate {} in {}", opt.root, opt.input.display()))?;
    tracing::trace!(
        gates = circuit.nb_gates(),
        inputs = circuit.inputs().len(),
        mulinputs = circuit.mulinputs().len(),
        stats = true
    );
    let token = CancellationToken::new();
    let timer = opt.timeout.map(|duration| {
        let timer = timer::Timer::new();
        let token = token.clone();
        let giveup = move || {
            tracing::warn!(timeout = true, stats = true);
            token.cancel();
        };
        // the guard returned by schedule_with_delay must be ignored otherwise it is cancelled on
        // drop
        timer.schedule_with_delay(duration, giveup).ignore();
        // the timer must not be dropped, otherwise everything is cancelled
        timer
    });
    let method = opt.method.clone().unwrap_or_default();
    let compiler = ExternalCompiler;
    let counter = ExternalWeightMc;
    let evaluator = Evaluator::new(token)
        .with_compiler(&compiler)
        .with_counter(&counter);
    let result = evaluate(&opt, &evaluator, &circuit, root, &method);
    drop(timer);
    tracing::trace!(
        wall_time_ms = start_time.elapsed().as_millis() as u64,
        stats = true
    );
    match result {
        Err(e) if matches!(e.downcast_ref::<CircuitError>(), Some(CircuitError::Interrupted { .. })) => {
            tracing::error!("{:#}", e);
            std::process::exit(TIMEOUT_EXIT_CODE)
        }
        other => other.with_context(|| format!("evaluating {}", opt.input.display())),
    }
}

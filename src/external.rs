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

//! Running d4, c2d, dsharp and weightmc as subprocesses.

use crate::circuit::CircuitError;
use crate::compile::{KnowledgeCompiler, WeightedModelCounter};
use crate::utils::last_lines;
use anyhow::Context;
use nom::bytes::complete::tag;
use nom::number::complete::double;
use nom::sequence::tuple;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::{debug, trace};

/// Lines of output of a failed tool reported in the error
const REPORTED_LINES: usize = 10;

/// Compiles with the d4, c2d or dsharp executable found in `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalCompiler;

/// Estimates weights with the weightmc executable found in `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalWeightMc;

/// Writes `contents` as `name` in `dir`.
fn write_input(dir: &Path, name: &str, contents: &[u8]) -> anyhow::Result<std::path::PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, contents)
        .with_context(|| format!("writing tool input to {}", path.display()))?;
    Ok(path)
}

/// Runs `cmd` to completion, failing when it does not exit successfully.
fn run(tool: &str, mut cmd: Command) -> anyhow::Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    trace!(?cmd, "starting {}", tool);
    let output = cmd
        .output()
        .with_context(|| format!("failed to run {}", tool))?;
    if !output.status.success() {
        return Err(CircuitError::External(format!(
            "{} failed with code {:?} signal {:?}: {} {}",
            tool,
            output.status.code(),
            output.status.signal(),
            last_lines(&output.stdout, REPORTED_LINES),
            last_lines(&output.stderr, REPORTED_LINES)
        ))
        .into());
    }
    Ok(output)
}

impl KnowledgeCompiler for ExternalCompiler {
    fn compile(&self, cnf: &[u8], engine: &str) -> anyhow::Result<String> {
        let dir = tempfile::tempdir()
            .with_context(|| format!("creating a temporary directory to run {}", engine))?;
        let input = write_input(dir.path(), "circuit.cnf", cnf)?;
        let mut cmd = Command::new(engine);
        let output = match engine {
            "d4" => {
                let output = dir.path().join("circuit.nnf");
                cmd.arg(&input).arg(format!("-out={}", output.display()));
                output
            }
            "c2d" => {
                // c2d always writes to $input.nnf
                cmd.arg("-in").arg(&input).arg("-silent");
                dir.path().join("circuit.cnf.nnf")
            }
            "dsharp" => {
                let output = dir.path().join("circuit.nnf");
                cmd.arg("-q").arg("-Fnnf").arg(&output).arg(&input);
                output
            }
            _ => return Err(CircuitError::UnknownEngine(engine.to_owned()).into()),
        };
        run(engine, cmd)?;
        let text = if output.exists() {
            std::fs::read_to_string(&output)
                .with_context(|| format!("reading output of {}", engine))?
        } else {
            debug!("{} wrote no d-DNNF", engine);
            String::new()
        };
        dir.close().context("removing temporary directory")?;
        Ok(text)
    }
}

/// Number of solutions per cell that weightmc aims for, to be within a factor `1 + epsilon`.
pub fn pivot_ac(epsilon: f64) -> u64 {
    let pivot = (1.5f64).exp() * (1. + 1. / epsilon).powi(2);
    2 * pivot.ceil() as u64
}

/// Parses the count printed by weightmc on its last line: the fifth word reads `ax2^b`.
pub fn parse_weightmc_count(line: &str) -> anyhow::Result<f64> {
    let word = line
        .split_whitespace()
        .nth(4)
        .with_context(|| format!("no count in weightmc output {:?}", line))?;
    let (_, (mantissa, _, exponent)) =
        tuple((double, tag("x2^"), double))(word).map_err(|_: nom::Err<nom::error::Error<&str>>| {
            CircuitError::MalformedOutput(format!("weightmc count {:?}", word))
        })?;
    Ok(mantissa * exponent.exp2())
}

impl WeightedModelCounter for ExternalWeightMc {
    fn count(&self, weighted_cnf: &[u8], delta: f64, epsilon: f64) -> anyhow::Result<f64> {
        let dir = tempfile::tempdir().context("creating a temporary directory to run weightmc")?;
        let input = write_input(dir.path(), "circuit.cnf", weighted_cnf)?;
        let pivot = pivot_ac(epsilon);
        // weightmc takes no confidence parameter
        debug!(delta, epsilon, pivot, "running weightmc");
        let mut cmd = Command::new("weightmc");
        cmd.arg("--startIteration=0")
            .arg("--gaussuntil=400")
            .arg("--verbosity=0")
            .arg(format!("--pivotAC={}", pivot))
            .arg(&input);
        let output = run("weightmc", cmd)?;
        dir.close().context("removing temporary directory")?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let last = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .context("weightmc printed nothing")?;
        parse_weightmc_count(last)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pivot() {
        // e^1.5 * 1.25^2 = 7.0026...
        assert_eq!(pivot_ac(4.), 16);
        assert_eq!(pivot_ac(0.8), 2 * ((1.5f64).exp() * 2.25f64.powi(2)).ceil() as u64);
    }

    #[test]
    fn weightmc_count() -> anyhow::Result<()> {
        let count = parse_weightmc_count("Approximate weighted count is: 1.5x2^-3")?;
        assert_eq!(count, 0.1875);
        assert!(parse_weightmc_count("Approximate count").is_err());
        let err = parse_weightmc_count("a b c d 12").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CircuitError>(),
            Some(CircuitError::MalformedOutput(_))
        ));
        Ok(())
    }

    #[test]
    fn unknown_engine() {
        let err = ExternalCompiler.compile(b"p cnf 1 1\n1 0\n", "minic2d").unwrap_err();
        assert_eq!(
            err.downcast_ref::<CircuitError>(),
            Some(&CircuitError::UnknownEngine("minic2d".to_owned()))
        );
    }

    #[test]
    fn failing_tool() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo oops; exit 3");
        let err = run("sh", cmd).unwrap_err();
        let msg = format!("{}", err);
        assert!(msg.contains("code Some(3)"), "{}", msg);
        assert!(msg.contains("oops"), "{}", msg);
    }
}

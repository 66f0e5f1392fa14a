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

use anyhow::Context;
use provcirc::{cnf, records};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "circuit2cnf",
    about = "Converts a circuit to a CNF formula in dimacs format by Tseytin encoding"
)]
struct Opt {
    /// Input circuit
    #[structopt(parse(from_os_str))]
    input: PathBuf,

    /// Output file
    #[structopt(parse(from_os_str))]
    output: PathBuf,

    /// Identifier of the gate forced to true
    #[structopt(short, long, default_value = "0")]
    root: String,

    /// Append the weights of inputs, for weighted model counters
    #[structopt(short, long)]
    weighted: bool,
}

fn main() -> anyhow::Result<()> {
    let opts = Opt::from_args();
    let circuit = records::read_circuit(&opts.input)?;
    let root = circuit
        .find_gate(&opts.root)
        .with_context(|| format!("no gate {} in input", opts.root))?;
    let out = std::fs::File::create(&opts.output).context("failed to open ouput for writing")?;
    cnf::write_cnf(&circuit, root, opts.weighted, std::io::BufWriter::new(out))
        .context("writing output")?;
    Ok(())
}

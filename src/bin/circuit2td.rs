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
use provcirc::records;
use provcirc::tree_decomposition::TreeDecomposition;
use std::io::Write;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "circuit2td",
    about = "Computes a tree decomposition of a circuit"
)]
struct Opt {
    /// Input circuit
    #[structopt(parse(from_os_str))]
    input: PathBuf,

    /// Output file
    #[structopt(parse(from_os_str))]
    output: PathBuf,

    /// Write the decomposition in dot format
    #[structopt(long)]
    dot: bool,

    /// Normalize the decomposition for d-DNNF compilation of this gate
    #[structopt(long)]
    friendly: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let opts = Opt::from_args();
    let circuit = records::read_circuit(&opts.input)?;
    let mut td = TreeDecomposition::new(&circuit).context("decomposing circuit")?;
    if let Some(root) = &opts.friendly {
        let root = circuit
            .find_gate(root)
            .with_context(|| format!("no gate {} in input", root))?;
        td.make_friendly(root);
    }
    eprintln!("Treewidth: {}", td.treewidth());
    let mut out = std::fs::File::create(&opts.output).context("failed to open ouput for writing")?;
    if opts.dot {
        write!(out, "{}", td.to_dot())
    } else {
        write!(out, "{}", td)
    }
    .context("writing output")?;
    Ok(())
}

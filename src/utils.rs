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

//! Misc utils.

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{digit1, line_ending, space0, space1};
use nom::combinator::{eof, map_res, opt, recognize};
use nom::multi::separated_list1;
use nom::sequence::pair;
use nom::IResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tolerance of [`almost_equals`]
pub const EPSILON: f64 = 1e-9;

/// Compares two probabilities up to rounding errors
pub fn almost_equals(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

/// A shared flag telling long running computations to stop.
///
/// Clones share the same flag, so one clone can be handed to a timer while the computation
/// polls another one.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A fresh token, not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of every computation holding a clone of this token
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Pascal triangle of binomial coefficients as floats: `result[n][k]` is `C(n, k)`
pub fn binomials(n: usize) -> Vec<Vec<f64>> {
    let mut res: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    for i in 0..=n {
        let mut row = vec![1.; i + 1];
        for k in 1..i {
            row[k] = res[i - 1][k - 1] + res[i - 1][k];
        }
        res.push(row);
    }
    res
}

/// Keeps the last `n` lines of the output of a process, for error messages
pub fn last_lines(output: &[u8], n: usize) -> String {
    let text = String::from_utf8_lossy(output);
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// parses an unsigned integer
pub fn unsigned(input: &str) -> IResult<&str, usize> {
    map_res(digit1, str::parse)(input)
}

/// parses a signed integer
pub fn signed(input: &str) -> IResult<&str, isize> {
    map_res(recognize(pair(opt(tag("-")), digit1)), str::parse)(input)
}

/// parses a space separated list of signed integers, possibly preceded by spaces
pub fn int_list(input: &str) -> IResult<&str, Vec<isize>> {
    let (input, _) = space0(input)?;
    separated_list1(space1, signed)(input)
}

/// parses the end of a line or of the input, with optional trailing spaces
pub fn end_of_line(input: &str) -> IResult<&str, &str> {
    let (input, _) = space0(input)?;
    alt((line_ending, eof))(input)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pascal() {
        let c = binomials(5);
        assert_eq!(c[0], vec![1.]);
        assert_eq!(c[4], vec![1., 4., 6., 4., 1.]);
        assert_eq!(c[5][2], 10.);
    }

    #[test]
    fn cancellation_is_shared() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn integers() {
        assert_eq!(int_list(" 1 -2 3 0\n"), Ok(("\n", vec![1, -2, 3, 0])));
        assert_eq!(unsigned("12 a"), Ok((" a", 12)));
        assert!(signed("a").is_err());
        assert_eq!(end_of_line("  \nx"), Ok(("x", "\n")));
        assert_eq!(end_of_line(" "), Ok(("", "")));
    }

    #[test]
    fn keeps_last_lines() {
        assert_eq!(last_lines(b"a\nb\nc\n", 2), "b\nc");
        assert_eq!(last_lines(b"a", 10), "a");
    }
}

//! DIMACS CNF format parser.
//!
//! Standard format used in SAT competitions. Lines beginning with `c` are
//! comments, `p cnf <vars> <clauses>` is the header, each clause is a
//! zero-terminated list of signed literals. A file may additionally contain
//! pregenerated cubes as `a <lit>* 0` lines; these form an ordered cube
//! table addressed by paths of uniform length.

use quarry_base::{Cube, Error, Literal, Path, Result};
use std::io::{BufRead, BufReader, Read};

/// A DIMACS CNF formula.
#[derive(Debug, Clone)]
pub struct DimacsCnf {
    /// Number of variables.
    pub num_vars: usize,
    /// Clauses as vectors of literals.
    pub clauses: Vec<Vec<Literal>>,
    /// Pregenerated cube table from `a` lines, in file order.
    pub cubes: Vec<Cube>,
}

impl DimacsCnf {
    /// Parses DIMACS CNF from a reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let reader = BufReader::new(reader);
        let mut num_vars = 0;
        let mut clauses = Vec::new();
        let mut cubes = Vec::new();
        let mut header_found = false;
        // Clauses may span lines; literals accumulate until a 0 terminator.
        let mut clause: Vec<Literal> = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('c') {
                continue;
            }

            // Parse header
            if line.starts_with('p') {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() < 4 || parts[1] != "cnf" {
                    return Err(Error::Parse(format!("malformed DIMACS header: {line}")));
                }
                num_vars = parts[2]
                    .parse()
                    .map_err(|e| Error::Parse(format!("invalid variable count: {e}")))?;
                let num_clauses: usize = parts[3]
                    .parse()
                    .map_err(|e| Error::Parse(format!("invalid clause count: {e}")))?;
                header_found = true;
                clauses.reserve(num_clauses);
                continue;
            }

            if !header_found {
                return Err(Error::Parse(
                    "DIMACS header 'p cnf ...' not found".to_string(),
                ));
            }

            // Cube line: a <lit>* 0
            if let Some(rest) = line.strip_prefix('a') {
                if !clause.is_empty() {
                    return Err(Error::Parse(
                        "cube line inside an unterminated clause".to_string(),
                    ));
                }
                cubes.push(parse_cube(rest)?);
                continue;
            }

            // Clause literals
            for token in line.split_whitespace() {
                let lit: Literal = token
                    .parse()
                    .map_err(|e| Error::Parse(format!("invalid literal: {e}")))?;
                if lit == 0 {
                    clauses.push(std::mem::take(&mut clause));
                } else {
                    clause.push(lit);
                }
            }
        }

        if !header_found {
            return Err(Error::Parse(
                "DIMACS header 'p cnf ...' not found".to_string(),
            ));
        }
        // Tolerate a final clause without its 0 terminator.
        if !clause.is_empty() {
            clauses.push(clause);
        }

        tracing::debug!(
            vars = num_vars,
            clauses = clauses.len(),
            cubes = cubes.len(),
            "parsed DIMACS formula"
        );

        Ok(Self {
            num_vars,
            clauses,
            cubes,
        })
    }

    /// Parses DIMACS CNF from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        Self::from_reader(s.as_bytes())
    }

    /// Converts to DIMACS string.
    #[must_use]
    pub fn to_dimacs(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("p cnf {} {}\n", self.num_vars, self.clauses.len()));
        for clause in &self.clauses {
            for lit in clause {
                out.push_str(&format!("{lit} "));
            }
            out.push_str("0\n");
        }
        for cube in &self.cubes {
            out.push('a');
            for lit in cube {
                out.push_str(&format!(" {lit}"));
            }
            out.push_str(" 0\n");
        }
        out
    }

    /// The cube table of this formula, if any `a` lines were present.
    #[must_use]
    pub fn cube_table(&self) -> Option<CubeTable> {
        if self.cubes.is_empty() {
            None
        } else {
            Some(CubeTable::new(self.cubes.clone()))
        }
    }
}

fn parse_cube(rest: &str) -> Result<Cube> {
    let mut cube = Vec::new();
    let mut terminated = false;
    for token in rest.split_whitespace() {
        if terminated {
            return Err(Error::Parse("literals after cube terminator".to_string()));
        }
        let lit: Literal = token
            .parse()
            .map_err(|e| Error::Parse(format!("invalid cube literal: {e}")))?;
        if lit == 0 {
            terminated = true;
        } else {
            cube.push(lit);
        }
    }
    if !terminated {
        return Err(Error::Parse("cube line not terminated by 0".to_string()));
    }
    Ok(cube)
}

/// An ordered table of pregenerated cubes, addressed by paths of uniform
/// length `ceil(log2(N))`.
#[derive(Debug, Clone)]
pub struct CubeTable {
    cubes: Vec<Cube>,
    normalized_length: u8,
}

impl CubeTable {
    /// Builds a table from cubes in file order.
    #[must_use]
    pub fn new(cubes: Vec<Cube>) -> Self {
        let n = cubes.len();
        let normalized_length = if n <= 1 {
            0
        } else {
            (n as f64).log2().ceil() as u8
        };
        Self {
            cubes,
            normalized_length,
        }
    }

    /// Number of cubes in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cubes.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cubes.is_empty()
    }

    /// The uniform path length addressing this table.
    #[must_use]
    pub fn normalized_length(&self) -> u8 {
        self.normalized_length
    }

    /// The cube at a flat table index.
    #[must_use]
    pub fn cube_for_index(&self, index: u64) -> Option<&Cube> {
        self.cubes.get(index as usize)
    }

    /// Resolves a path to its table cube.
    ///
    /// Only paths of exactly the normalized length address a cube; shorter
    /// paths are inner nodes of the cube tree and resolve to nothing.
    #[must_use]
    pub fn cube_for_path(&self, path: Path) -> Option<&Cube> {
        if path.is_unknown() || path.length() != self.normalized_length {
            return None;
        }
        self.cube_for_index(path.depth_shifted())
    }

    /// The table cube governing a position at or below table depth.
    ///
    /// Paths deeper than the table resolve through their ancestor at the
    /// normalized length, so re-split leaves keep their table assumptions.
    #[must_use]
    pub fn cube_along_path(&self, path: Path) -> Option<&Cube> {
        if path.is_unknown() || path.length() < self.normalized_length {
            return None;
        }
        let mut ancestor = path;
        while ancestor.length() > self.normalized_length {
            ancestor = ancestor.parent()?;
        }
        self.cube_for_path(ancestor)
    }
}

//! Variable registry with stable index ranges.
//!
//! Variables are registered once at problem assembly and keep their index
//! range for the life of the solve. Terms hold [`VarSlice`] handles (plain
//! index ranges) rather than references to variable objects, so the
//! problem/variable/constraint graph stays acyclic.

use crate::error::{ScoError, ScoResult};

/// Copyable handle to a registered variable block: `[start, start + len)`
/// in the global NLP variable vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarSlice {
    pub start: usize,
    pub len: usize,
}

impl VarSlice {
    /// Global column indices covered by this block.
    pub fn cols(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }

    /// View this block's values inside a full variable vector.
    pub fn get<'a>(&self, x: &'a [f64]) -> &'a [f64] {
        &x[self.start..self.start + self.len]
    }
}

/// A named block of decision values with box bounds.
#[derive(Debug, Clone)]
pub struct VarBlock {
    name: String,
    start: usize,
    values: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl VarBlock {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slice(&self) -> VarSlice {
        VarSlice { start: self.start, len: self.values.len() }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }
}

/// Registry of all variable blocks in a problem.
#[derive(Debug, Default)]
pub struct VariableRegistry {
    blocks: Vec<VarBlock>,
    total: usize,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block. Bounds must bracket the initial values; a
    /// zero-width bound (`lower == upper`) pins the entry (fixed DOF).
    pub fn add(
        &mut self,
        name: impl Into<String>,
        values: &[f64],
        lower: &[f64],
        upper: &[f64],
    ) -> ScoResult<VarSlice> {
        let name = name.into();
        if values.is_empty() {
            return Err(ScoError::InvalidVariable(format!("block '{name}' is empty")));
        }
        if lower.len() != values.len() || upper.len() != values.len() {
            return Err(ScoError::InvalidVariable(format!(
                "block '{name}' bounds length {}/{} does not match value length {}",
                lower.len(),
                upper.len(),
                values.len()
            )));
        }
        for i in 0..values.len() {
            if lower[i] > upper[i] {
                return Err(ScoError::InvalidVariable(format!(
                    "block '{name}' entry {i} has lower bound {} > upper bound {}",
                    lower[i], upper[i]
                )));
            }
        }
        if self.blocks.iter().any(|b| b.name == name) {
            return Err(ScoError::InvalidVariable(format!("duplicate block name '{name}'")));
        }

        let start = self.total;
        self.total += values.len();
        self.blocks.push(VarBlock {
            name,
            start,
            values: values.to_vec(),
            lower: lower.to_vec(),
            upper: upper.to_vec(),
        });
        Ok(self.blocks.last().unwrap().slice())
    }

    /// Register a block with unbounded box limits.
    pub fn add_unbounded(&mut self, name: impl Into<String>, values: &[f64]) -> ScoResult<VarSlice> {
        let lower = vec![f64::NEG_INFINITY; values.len()];
        let upper = vec![f64::INFINITY; values.len()];
        self.add(name, values, &lower, &upper)
    }

    pub fn num_vars(&self) -> usize {
        self.total
    }

    pub fn blocks(&self) -> &[VarBlock] {
        &self.blocks
    }

    /// Find a block by name.
    pub fn find(&self, name: &str) -> Option<&VarBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Concatenated values of all blocks, in registration order.
    pub fn values(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.total);
        for b in &self.blocks {
            out.extend_from_slice(&b.values);
        }
        out
    }

    /// Overwrite all block values from a full variable vector.
    pub fn set_values(&mut self, x: &[f64]) {
        debug_assert_eq!(x.len(), self.total);
        for b in &mut self.blocks {
            let n = b.values.len();
            b.values.copy_from_slice(&x[b.start..b.start + n]);
        }
    }

    /// Concatenated lower bounds.
    pub fn lower(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.total);
        for b in &self.blocks {
            out.extend_from_slice(&b.lower);
        }
        out
    }

    /// Concatenated upper bounds.
    pub fn upper(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.total);
        for b in &self.blocks {
            out.extend_from_slice(&b.upper);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_index_ranges() {
        let mut reg = VariableRegistry::new();
        let a = reg.add("a", &[1.0, 2.0], &[-1.0, -1.0], &[3.0, 3.0]).unwrap();
        let b = reg.add_unbounded("b", &[5.0]).unwrap();
        assert_eq!(a, VarSlice { start: 0, len: 2 });
        assert_eq!(b, VarSlice { start: 2, len: 1 });
        assert_eq!(reg.num_vars(), 3);
        assert_eq!(reg.values(), vec![1.0, 2.0, 5.0]);
    }

    #[test]
    fn test_set_values_round_trip() {
        let mut reg = VariableRegistry::new();
        reg.add_unbounded("a", &[0.0, 0.0]).unwrap();
        reg.add_unbounded("b", &[0.0]).unwrap();
        reg.set_values(&[1.0, 2.0, 3.0]);
        assert_eq!(reg.values(), vec![1.0, 2.0, 3.0]);
        assert_eq!(reg.find("b").unwrap().values(), &[3.0]);
    }

    #[test]
    fn test_validation_errors() {
        let mut reg = VariableRegistry::new();
        assert!(reg.add("empty", &[], &[], &[]).is_err());
        assert!(reg.add("bad", &[0.0], &[1.0], &[-1.0]).is_err());
        reg.add_unbounded("dup", &[0.0]).unwrap();
        assert!(reg.add_unbounded("dup", &[0.0]).is_err());
    }
}

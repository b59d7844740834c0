//! Index planning: what the engine offers to `best_index` and what the table
//! answers.

use crate::error::{Error, Result};
use crate::provider::{ApiVersion, Sqlite3Api, engine_string, sqlite3_index_info};

const ESTIMATED_ROWS_SINCE: ApiVersion = ApiVersion::new(3, 8, 2);
const SCAN_FLAGS_SINCE: ApiVersion = ApiVersion::new(3, 9, 0);
const COL_USED_SINCE: ApiVersion = ApiVersion::new(3, 10, 0);

/// `SQLITE_INDEX_SCAN_UNIQUE`.
const SCAN_UNIQUE: i32 = 1;

/// Comparison operator of a candidate constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintOp {
    Eq,
    Gt,
    Le,
    Lt,
    Ge,
    Match,
    Like,
    Glob,
    Regexp,
    Ne,
    IsNot,
    IsNotNull,
    IsNull,
    Is,
    /// Operator overloaded by a function, codes 150 and above.
    Function(u8),
    /// Code this crate does not name.
    Other(u8),
}

impl ConstraintOp {
    pub fn from_code(code: u8) -> ConstraintOp {
        match code {
            2 => ConstraintOp::Eq,
            4 => ConstraintOp::Gt,
            8 => ConstraintOp::Le,
            16 => ConstraintOp::Lt,
            32 => ConstraintOp::Ge,
            64 => ConstraintOp::Match,
            65 => ConstraintOp::Like,
            66 => ConstraintOp::Glob,
            67 => ConstraintOp::Regexp,
            68 => ConstraintOp::Ne,
            69 => ConstraintOp::IsNot,
            70 => ConstraintOp::IsNotNull,
            71 => ConstraintOp::IsNull,
            72 => ConstraintOp::Is,
            150.. => ConstraintOp::Function(code),
            other => ConstraintOp::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ConstraintOp::Eq => 2,
            ConstraintOp::Gt => 4,
            ConstraintOp::Le => 8,
            ConstraintOp::Lt => 16,
            ConstraintOp::Ge => 32,
            ConstraintOp::Match => 64,
            ConstraintOp::Like => 65,
            ConstraintOp::Glob => 66,
            ConstraintOp::Regexp => 67,
            ConstraintOp::Ne => 68,
            ConstraintOp::IsNot => 69,
            ConstraintOp::IsNotNull => 70,
            ConstraintOp::IsNull => 71,
            ConstraintOp::Is => 72,
            ConstraintOp::Function(code) | ConstraintOp::Other(code) => code,
        }
    }
}

/// One candidate constraint offered by the planner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexConstraint {
    /// Column index, or -1 for the rowid.
    pub column: i32,
    pub op: ConstraintOp,
    /// Whether the constraint can be used in this plan.
    pub usable: bool,
}

impl IndexConstraint {
    pub fn is_rowid(&self) -> bool {
        self.column == -1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub column: i32,
    pub desc: bool,
}

/// Planner input handed to [`VirtualTable::best_index`](super::VirtualTable::best_index).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexInfo {
    pub constraints: Vec<IndexConstraint>,
    pub order_by: Vec<OrderBy>,
    /// Bitmask of columns the statement reads; absent on engines older than 3.10.0.
    pub columns_used: Option<u64>,
}

impl IndexInfo {
    /// Copy the planner input out of the native structure.
    ///
    /// # Safety
    /// The constraint and order-by arrays of `raw` must hold the advertised
    /// number of entries.
    pub(crate) unsafe fn from_raw(raw: &sqlite3_index_info, version: ApiVersion) -> IndexInfo {
        let constraints = unsafe { raw_slice(raw.a_constraint, raw.n_constraint) }
            .iter()
            .map(|c| IndexConstraint {
                column: c.i_column,
                op: ConstraintOp::from_code(c.op),
                usable: c.usable != 0,
            })
            .collect();
        let order_by = unsafe { raw_slice(raw.a_order_by, raw.n_order_by) }
            .iter()
            .map(|o| OrderBy {
                column: o.i_column,
                desc: o.desc != 0,
            })
            .collect();
        IndexInfo {
            constraints,
            order_by,
            columns_used: (version >= COL_USED_SINCE).then_some(raw.col_used),
        }
    }
}

unsafe fn raw_slice<'a, T>(ptr: *const T, len: i32) -> &'a [T] {
    match usize::try_from(len) {
        Ok(len) if len > 0 && !ptr.is_null() => unsafe { core::slice::from_raw_parts(ptr, len) },
        _ => &[],
    }
}

/// How a plan uses one input constraint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConstraintUsage {
    /// Zero-based position of the constraint's value in the filter arguments.
    pub argv_index: Option<u32>,
    /// The engine may skip re-checking the constraint.
    pub omit: bool,
}

/// Plan chosen by [`VirtualTable::best_index`](super::VirtualTable::best_index).
#[derive(Clone, Debug, PartialEq)]
pub struct IndexPlan {
    /// Empty, or exactly one entry per input constraint in input order.
    pub usage: Vec<ConstraintUsage>,
    pub index_number: i32,
    pub index_string: Option<String>,
    pub order_by_consumed: bool,
    pub estimated_cost: f64,
    pub estimated_rows: i64,
    /// At most one row is produced.
    pub unique_scan: bool,
}

impl Default for IndexPlan {
    fn default() -> Self {
        Self {
            usage: Vec::new(),
            index_number: 0,
            index_string: None,
            order_by_consumed: false,
            estimated_cost: 1_000_000.0,
            estimated_rows: 25,
            unique_scan: false,
        }
    }
}

impl IndexPlan {
    /// Full scan plan with one unused entry per constraint of `info`.
    pub fn for_info(info: &IndexInfo) -> IndexPlan {
        IndexPlan {
            usage: vec![ConstraintUsage::default(); info.constraints.len()],
            ..IndexPlan::default()
        }
    }

    /// Feed constraint `constraint` to filter argument `slot`.
    pub fn use_constraint(&mut self, constraint: usize, slot: u32, omit: bool) -> &mut Self {
        if let Some(usage) = self.usage.get_mut(constraint) {
            *usage = ConstraintUsage {
                argv_index: Some(slot),
                omit,
            };
        }
        self
    }

    /// Check the plan against a planner input of `n_constraints` entries.
    ///
    /// Usage must be empty or index-aligned with the input, and the assigned
    /// argument slots must be exactly `0..n` with no repeats.
    pub fn validate(&self, n_constraints: usize) -> Result<()> {
        if !self.usage.is_empty() && self.usage.len() != n_constraints {
            return Err(Error::misuse(format!(
                "index plan has {} usage entries for {} constraints",
                self.usage.len(),
                n_constraints
            )));
        }
        let mut slots: Vec<u32> = self.usage.iter().filter_map(|u| u.argv_index).collect();
        slots.sort_unstable();
        for (expected, slot) in slots.iter().enumerate() {
            if *slot as usize != expected {
                return Err(Error::misuse(format!(
                    "index plan argument slots are not contiguous from 0 (found {slot} at position {expected})"
                )));
            }
        }
        Ok(())
    }

    /// Validate and write the plan into the native structure.
    ///
    /// # Safety
    /// `raw.a_constraint_usage` must hold `raw.n_constraint` entries.
    pub(crate) unsafe fn write<P: Sqlite3Api>(
        &self,
        api: &P,
        raw: &mut sqlite3_index_info,
        version: ApiVersion,
    ) -> Result<()> {
        let n = usize::try_from(raw.n_constraint).unwrap_or(0);
        self.validate(n)?;
        if !self.usage.is_empty() && !raw.a_constraint_usage.is_null() {
            let out = unsafe { core::slice::from_raw_parts_mut(raw.a_constraint_usage, n) };
            for (dst, usage) in out.iter_mut().zip(&self.usage) {
                dst.argv_index = usage.argv_index.map_or(0, |slot| slot as i32 + 1);
                dst.omit = u8::from(usage.omit);
            }
        }
        raw.idx_num = self.index_number;
        if let Some(index_string) = &self.index_string {
            let ptr = unsafe { engine_string(api, index_string)? };
            raw.idx_str = ptr;
            raw.need_to_free_idx_str = 1;
        }
        raw.order_by_consumed = i32::from(self.order_by_consumed);
        raw.estimated_cost = self.estimated_cost;
        if version >= ESTIMATED_ROWS_SINCE {
            raw.estimated_rows = self.estimated_rows;
        }
        if version >= SCAN_FLAGS_SINCE && self.unique_scan {
            raw.idx_flags |= SCAN_UNIQUE;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConstraintOp, ConstraintUsage, IndexConstraint, IndexInfo, IndexPlan};
    use crate::error::ErrorCode;

    fn info(n: usize) -> IndexInfo {
        IndexInfo {
            constraints: vec![
                IndexConstraint {
                    column: 0,
                    op: ConstraintOp::Eq,
                    usable: true,
                };
                n
            ],
            ..IndexInfo::default()
        }
    }

    #[test]
    fn empty_usage_is_accepted() {
        assert!(IndexPlan::default().validate(3).is_ok());
    }

    #[test]
    fn misaligned_usage_is_rejected() {
        let plan = IndexPlan {
            usage: vec![ConstraintUsage::default(); 2],
            ..IndexPlan::default()
        };
        assert_eq!(plan.validate(3).unwrap_err().code, ErrorCode::Misuse);
    }

    #[test]
    fn slots_must_be_contiguous() {
        let mut plan = IndexPlan::for_info(&info(3));
        plan.use_constraint(0, 0, true).use_constraint(2, 2, false);
        assert!(plan.validate(3).is_err());
        plan.use_constraint(1, 1, false);
        assert!(plan.validate(3).is_ok());
    }

    #[test]
    fn duplicate_slots_are_rejected() {
        let mut plan = IndexPlan::for_info(&info(2));
        plan.use_constraint(0, 0, false).use_constraint(1, 0, false);
        assert!(plan.validate(2).is_err());
    }

    #[test]
    fn operator_codes() {
        assert_eq!(ConstraintOp::from_code(2), ConstraintOp::Eq);
        assert_eq!(ConstraintOp::from_code(72), ConstraintOp::Is);
        assert_eq!(ConstraintOp::from_code(151), ConstraintOp::Function(151));
        assert_eq!(ConstraintOp::from_code(73), ConstraintOp::Other(73));
        assert_eq!(ConstraintOp::Glob.code(), 66);
    }
}

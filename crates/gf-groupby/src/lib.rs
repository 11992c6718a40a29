#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::mem::size_of;
use std::sync::Arc;

use bumpalo::{Bump, collections::Vec as BumpVec};
use gf_columnar::{Column, ColumnData, ColumnError, DType, ValidityMask};
use gf_order::{NullOrder, OrderError, RowComparator, hash_row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-group reduction to apply to the value column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggKind {
    Max,
    Min,
    Sum,
    Count,
}

/// Which grouping strategy the caller wants. `Auto` lets the engine choose;
/// the forced variants exist so conformance tests can pin both paths against
/// each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyHint {
    Auto,
    ForceHash,
    ForceSort,
}

/// What happens to rows whose key tuple contains a null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKeyPolicy {
    /// Null-key rows are dropped; an all-null key column produces zero
    /// output rows.
    Exclude,
    /// Null-key rows form a single group, emitted last with null keys.
    Include,
}

impl NullKeyPolicy {
    /// Decode a policy from its wire representation (bridge callers pass
    /// integers, not enum values).
    pub fn from_raw(code: u8) -> Result<Self, GroupByError> {
        match code {
            0 => Ok(Self::Exclude),
            1 => Ok(Self::Include),
            _ => Err(GroupByError::UnsupportedNullPolicy { code }),
        }
    }
}

/// Strategy that actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Hash,
    Sort,
}

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupReduceExecutionOptions {
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
    /// Caller promises that key-equal rows are adjacent in the input. The
    /// sort grouper then skips its sort and only scans for boundaries.
    pub keys_presorted: bool,
}

impl Default for GroupReduceExecutionOptions {
    fn default() -> Self {
        Self {
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
            keys_presorted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GroupReduceTrace {
    strategy: Strategy,
    used_arena: bool,
    input_rows: usize,
    group_count: usize,
}

/// Output of `group_reduce`: one row per group, sorted ascending by key.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupReduceResult {
    pub keys: Vec<Column>,
    pub values: Column,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GroupByError {
    #[error("group_reduce requires at least one key column")]
    NoKeyColumns,
    #[error("key column {column} has {key_len} rows but the value column has {value_len}")]
    ShapeMismatch {
        column: usize,
        key_len: usize,
        value_len: usize,
    },
    #[error("{kind:?} does not support value columns of type {dtype:?}")]
    TypeMismatch { kind: AggKind, dtype: DType },
    #[error("unsupported null-key policy code {code} (expected 0=exclude or 1=include)")]
    UnsupportedNullPolicy { code: u8 },
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// Group rows by the key columns and reduce the value column per group.
///
/// Returns one output row per distinct key, sorted ascending by key; under
/// `NullKeyPolicy::Include` the null-key group (if any) comes last with
/// every key column null on that row.
pub fn group_reduce(
    keys: &[Column],
    values: &Column,
    kind: AggKind,
    strategy: StrategyHint,
    null_policy: NullKeyPolicy,
) -> Result<GroupReduceResult, GroupByError> {
    group_reduce_with_options(
        keys,
        values,
        kind,
        strategy,
        null_policy,
        GroupReduceExecutionOptions::default(),
    )
}

pub fn group_reduce_with_options(
    keys: &[Column],
    values: &Column,
    kind: AggKind,
    strategy: StrategyHint,
    null_policy: NullKeyPolicy,
    exec: GroupReduceExecutionOptions,
) -> Result<GroupReduceResult, GroupByError> {
    let (result, _trace) =
        group_reduce_with_trace(keys, values, kind, strategy, null_policy, exec)?;
    Ok(result)
}

fn group_reduce_with_trace(
    keys: &[Column],
    values: &Column,
    kind: AggKind,
    strategy: StrategyHint,
    null_policy: NullKeyPolicy,
    exec: GroupReduceExecutionOptions,
) -> Result<(GroupReduceResult, GroupReduceTrace), GroupByError> {
    validate_request(keys, values, kind)?;

    let cmp = RowComparator::over(keys, NullOrder::Before)?;
    let strategy = choose_strategy(keys, strategy, &exec);
    let input_rows = values.len();

    let (groups, used_arena) = match strategy {
        Strategy::Hash => run_hash_grouper(keys, null_policy, &cmp, &exec),
        Strategy::Sort => (
            sort_group_rows(keys, null_policy, &cmp, exec.keys_presorted),
            false,
        ),
    };

    let reduced = reduce_groups(values, &groups, kind)?;
    let result = assemble(keys, &groups, reduced)?;

    let trace = GroupReduceTrace {
        strategy,
        used_arena,
        input_rows,
        group_count: groups.group_count(),
    };
    Ok((result, trace))
}

/// All fatal conditions are detected here, before any grouping or reduction
/// work starts.
fn validate_request(
    keys: &[Column],
    values: &Column,
    kind: AggKind,
) -> Result<(), GroupByError> {
    if keys.is_empty() {
        return Err(GroupByError::NoKeyColumns);
    }
    for (column, key) in keys.iter().enumerate() {
        if key.len() != values.len() {
            return Err(GroupByError::ShapeMismatch {
                column,
                key_len: key.len(),
                value_len: values.len(),
            });
        }
    }
    if kind == AggKind::Sum {
        match values.data() {
            ColumnData::Bool(_)
            | ColumnData::Int32(_)
            | ColumnData::Int64(_)
            | ColumnData::Float32(_)
            | ColumnData::Float64(_)
            | ColumnData::Decimal { .. } => {}
            ColumnData::Utf8(_) | ColumnData::Dictionary { .. } | ColumnData::Struct(_) => {
                return Err(GroupByError::TypeMismatch {
                    kind,
                    dtype: values.dtype(),
                });
            }
        }
    }
    Ok(())
}

fn choose_strategy(
    keys: &[Column],
    hint: StrategyHint,
    exec: &GroupReduceExecutionOptions,
) -> Strategy {
    match hint {
        StrategyHint::ForceHash => Strategy::Hash,
        StrategyHint::ForceSort => Strategy::Sort,
        StrategyHint::Auto => {
            let nested_keys = keys
                .iter()
                .any(|key| matches!(key.data(), ColumnData::Struct(_)));
            if exec.keys_presorted || nested_keys {
                Strategy::Sort
            } else {
                Strategy::Hash
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Group formation
// ---------------------------------------------------------------------------

/// Row partition produced by either grouper. Group ids are grouper-native
/// (first-seen for hash, sorted for sort); the assembler re-orders them.
struct Groups {
    representatives: Vec<usize>,
    membership: Membership,
    null_group: Option<usize>,
}

enum Membership {
    /// Hash grouper: explicit member lists.
    RowSets(Vec<Vec<usize>>),
    /// Sort grouper: contiguous runs of a permutation. Group `g` owns
    /// `permutation[boundaries[g]..boundaries[g + 1]]`.
    SortedRuns {
        permutation: Vec<usize>,
        boundaries: Vec<usize>,
    },
}

impl Groups {
    fn group_count(&self) -> usize {
        self.representatives.len()
    }

    fn rows(&self, group: usize) -> &[usize] {
        match &self.membership {
            Membership::RowSets(sets) => &sets[group],
            Membership::SortedRuns {
                permutation,
                boundaries,
            } => &permutation[boundaries[group]..boundaries[group + 1]],
        }
    }
}

/// A row whose key tuple contains any top-level null. All such rows belong
/// to one group; EXCLUDE drops them entirely.
fn is_null_key_row(keys: &[Column], row: usize) -> bool {
    keys.iter().any(|key| !key.is_valid(row))
}

const HASH_SLOT_EMPTY: u32 = u32::MAX;

/// Estimate of the grouping intermediates (slot table, member bookkeeping,
/// representatives) used to gate arena allocation against the budget.
fn estimate_grouping_intermediate_bytes(input_rows: usize) -> usize {
    input_rows.saturating_mul(2 * size_of::<u32>() + 2 * size_of::<usize>())
}

fn run_hash_grouper(
    keys: &[Column],
    policy: NullKeyPolicy,
    cmp: &RowComparator<'_>,
    exec: &GroupReduceExecutionOptions,
) -> (Groups, bool) {
    let rows = keys[0].len();
    let capacity = (rows.max(4) * 2).next_power_of_two();
    let estimated = estimate_grouping_intermediate_bytes(rows);
    let use_arena = exec.use_arena && estimated <= exec.arena_budget_bytes;

    if use_arena {
        // The slot table is a pure intermediate; it dies with the arena.
        let arena = Bump::new();
        let mut slots = BumpVec::with_capacity_in(capacity, &arena);
        slots.resize(capacity, HASH_SLOT_EMPTY);
        (hash_group_rows(keys, policy, cmp, &mut slots), true)
    } else {
        let mut slots = vec![HASH_SLOT_EMPTY; capacity];
        (hash_group_rows(keys, policy, cmp, &mut slots), false)
    }
}

/// Single pass over the rows: open-addressed probe of `slots` (group ids),
/// with key equality confirmed through the row comparator rather than the
/// hash. The first row of each distinct key becomes the representative.
fn hash_group_rows(
    keys: &[Column],
    policy: NullKeyPolicy,
    cmp: &RowComparator<'_>,
    slots: &mut [u32],
) -> Groups {
    let rows = keys[0].len();
    let mask = slots.len() - 1;
    let mut representatives = Vec::new();
    let mut sets: Vec<Vec<usize>> = Vec::new();
    let mut null_group: Option<usize> = None;

    for row in 0..rows {
        if is_null_key_row(keys, row) {
            match policy {
                NullKeyPolicy::Exclude => {}
                NullKeyPolicy::Include => match null_group {
                    Some(group) => sets[group].push(row),
                    None => {
                        null_group = Some(representatives.len());
                        representatives.push(row);
                        sets.push(vec![row]);
                    }
                },
            }
            continue;
        }

        let mut slot = (hash_row(keys, row) as usize) & mask;
        loop {
            let group = slots[slot];
            if group == HASH_SLOT_EMPTY {
                slots[slot] = representatives.len() as u32;
                representatives.push(row);
                sets.push(vec![row]);
                break;
            }
            // Null-key rows never enter the table, so every occupied slot
            // references a fully valid representative.
            if cmp.rows_equal(representatives[group as usize], row) {
                sets[group as usize].push(row);
                break;
            }
            slot = (slot + 1) & mask;
        }
    }

    Groups {
        representatives,
        membership: Membership::RowSets(sets),
        null_group,
    }
}

/// Stable sort of the row indices by key, then a scan marking a boundary
/// wherever adjacent keys differ. Null-key rows sort after every non-null
/// row and equal to each other, so INCLUDE yields exactly one trailing
/// null group.
fn sort_group_rows(
    keys: &[Column],
    policy: NullKeyPolicy,
    cmp: &RowComparator<'_>,
    keys_presorted: bool,
) -> Groups {
    let rows = keys[0].len();
    let mut permutation = Vec::with_capacity(rows);
    let mut null_rows = Vec::new();
    for row in 0..rows {
        if is_null_key_row(keys, row) {
            null_rows.push(row);
        } else {
            permutation.push(row);
        }
    }

    if !keys_presorted {
        permutation.sort_by(|&a, &b| cmp.compare(a, b));
    }

    let sorted_rows = permutation.len();
    if policy == NullKeyPolicy::Include {
        permutation.extend(null_rows);
    }

    let mut representatives = Vec::new();
    let mut boundaries = Vec::new();
    let mut null_group: Option<usize> = None;
    for pos in 0..permutation.len() {
        let in_null_run = pos >= sorted_rows;
        let starts_group = pos == 0
            || pos == sorted_rows
            || (!in_null_run && cmp.compare(permutation[pos - 1], permutation[pos]) != Ordering::Equal);
        if starts_group {
            boundaries.push(pos);
            if in_null_run {
                null_group = Some(representatives.len());
            }
            representatives.push(permutation[pos]);
        }
    }
    boundaries.push(permutation.len());

    Groups {
        representatives,
        membership: Membership::SortedRuns {
            permutation,
            boundaries,
        },
        null_group,
    }
}

// ---------------------------------------------------------------------------
// Reduction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Extremum {
    Max,
    Min,
}

impl Extremum {
    fn wins(self, candidate_vs_best: Ordering) -> bool {
        match self {
            Self::Max => candidate_vs_best == Ordering::Greater,
            Self::Min => candidate_vs_best == Ordering::Less,
        }
    }
}

/// Reduce the value column once per group, in grouper-native group order.
fn reduce_groups(
    values: &Column,
    groups: &Groups,
    kind: AggKind,
) -> Result<Column, GroupByError> {
    match kind {
        AggKind::Max => extremum_groups(values, groups, Extremum::Max),
        AggKind::Min => extremum_groups(values, groups, Extremum::Min),
        AggKind::Sum => sum_groups(values, groups),
        AggKind::Count => count_groups(values, groups),
    }
}

/// Fold each group's valid members down to a winner under `cmp`. Replacement
/// is strict, so tied members (which are value-equal) keep the incumbent and
/// the result does not depend on member visitation order.
fn fold_extremum<T: Clone + Default>(
    data: &[T],
    column: &Column,
    groups: &Groups,
    goal: Extremum,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> (Vec<T>, ValidityMask) {
    let count = groups.group_count();
    let mut out = Vec::with_capacity(count);
    let mut validity = ValidityMask::all_invalid(count);
    for group in 0..count {
        let mut best: Option<&T> = None;
        for &row in groups.rows(group) {
            if !column.is_valid(row) {
                continue;
            }
            let candidate = &data[row];
            best = match best {
                Some(current) if !goal.wins(cmp(candidate, current)) => Some(current),
                _ => Some(candidate),
            };
        }
        match best {
            Some(winner) => {
                validity.set(group, true);
                out.push(winner.clone());
            }
            None => out.push(T::default()),
        }
    }
    (out, validity)
}

fn extremum_groups(
    values: &Column,
    groups: &Groups,
    goal: Extremum,
) -> Result<Column, GroupByError> {
    let column = match values.data() {
        ColumnData::Bool(data) => {
            let (out, validity) = fold_extremum(data, values, groups, goal, bool::cmp);
            Column::new(ColumnData::Bool(out), Some(validity))
        }
        ColumnData::Int32(data) => {
            let (out, validity) = fold_extremum(data, values, groups, goal, i32::cmp);
            Column::new(ColumnData::Int32(out), Some(validity))
        }
        ColumnData::Int64(data) => {
            let (out, validity) = fold_extremum(data, values, groups, goal, i64::cmp);
            Column::new(ColumnData::Int64(out), Some(validity))
        }
        ColumnData::Float32(data) => {
            let (out, validity) = fold_extremum(data, values, groups, goal, f32::total_cmp);
            Column::new(ColumnData::Float32(out), Some(validity))
        }
        ColumnData::Float64(data) => {
            let (out, validity) = fold_extremum(data, values, groups, goal, f64::total_cmp);
            Column::new(ColumnData::Float64(out), Some(validity))
        }
        ColumnData::Utf8(data) => {
            let (out, validity) =
                fold_extremum(data, values, groups, goal, |a: &String, b: &String| {
                    a.as_bytes().cmp(b.as_bytes())
                });
            Column::new(ColumnData::Utf8(out), Some(validity))
        }
        ColumnData::Decimal { scale, mantissa } => {
            let (out, validity) = fold_extremum(mantissa, values, groups, goal, i128::cmp);
            Column::new(
                ColumnData::Decimal {
                    scale: *scale,
                    mantissa: out,
                },
                Some(validity),
            )
        }
        ColumnData::Dictionary { indices, keys } => {
            return dictionary_extremum(values, indices, keys, groups, goal);
        }
        ColumnData::Struct(children) => {
            return struct_extremum(values, children, groups, goal);
        }
    };
    column.map_err(GroupByError::from)
}

/// Dictionary reduction decodes each member through the shared key column,
/// picks the winner, and re-encodes it as an index into that same key
/// column; the output shares the input key set rather than building a
/// fresh one.
fn dictionary_extremum(
    values: &Column,
    indices: &[u32],
    keys: &Arc<Column>,
    groups: &Groups,
    goal: Extremum,
) -> Result<Column, GroupByError> {
    let key_column = std::slice::from_ref(keys.as_ref());
    let cmp = RowComparator::over(key_column, NullOrder::Before)?;

    let count = groups.group_count();
    let mut out = Vec::with_capacity(count);
    let mut validity = ValidityMask::all_invalid(count);
    for group in 0..count {
        let mut best: Option<u32> = None;
        for &row in groups.rows(group) {
            if !values.is_valid(row) {
                continue;
            }
            let candidate = indices[row];
            best = match best {
                Some(current)
                    if !goal.wins(cmp.compare(candidate as usize, current as usize)) =>
                {
                    Some(current)
                }
                _ => Some(candidate),
            };
        }
        match best {
            Some(winner) => {
                validity.set(group, true);
                out.push(winner);
            }
            None => out.push(0),
        }
    }

    Column::new(
        ColumnData::Dictionary {
            indices: out,
            keys: Arc::clone(keys),
        },
        Some(validity),
    )
    .map_err(GroupByError::from)
}

/// Struct reduction: members are included only when the struct's own
/// top-level validity bit is set; among included rows the winner is the
/// comparator-greatest (or -least) child tuple, nulls ordered first. A group
/// with no included rows emits a null row with null children.
fn struct_extremum(
    values: &Column,
    children: &[Column],
    groups: &Groups,
    goal: Extremum,
) -> Result<Column, GroupByError> {
    let cmp = RowComparator::over(children, NullOrder::Before)?;

    let count = groups.group_count();
    let mut winners: Vec<Option<usize>> = Vec::with_capacity(count);
    for group in 0..count {
        let mut best: Option<usize> = None;
        for &row in groups.rows(group) {
            if !values.is_valid(row) {
                continue;
            }
            best = match best {
                Some(current) if !goal.wins(cmp.compare(row, current)) => Some(current),
                _ => Some(row),
            };
        }
        winners.push(best);
    }

    let out_children = children
        .iter()
        .map(|child| child.gather(&winners))
        .collect::<Result<Vec<_>, _>>()?;
    let validity =
        ValidityMask::from_bools(&winners.iter().map(Option::is_some).collect::<Vec<_>>());
    Column::new(ColumnData::Struct(out_children), Some(validity)).map_err(GroupByError::from)
}

fn fold_sum<T: Copy, A: Copy + Default>(
    data: &[T],
    column: &Column,
    groups: &Groups,
    add: impl Fn(A, T) -> A,
) -> (Vec<A>, ValidityMask) {
    let count = groups.group_count();
    let mut out = Vec::with_capacity(count);
    let mut validity = ValidityMask::all_invalid(count);
    for group in 0..count {
        let mut acc = A::default();
        let mut any_valid = false;
        for &row in groups.rows(group) {
            if !column.is_valid(row) {
                continue;
            }
            any_valid = true;
            acc = add(acc, data[row]);
        }
        if any_valid {
            validity.set(group, true);
        }
        out.push(acc);
    }
    (out, validity)
}

fn sum_groups(values: &Column, groups: &Groups) -> Result<Column, GroupByError> {
    let column = match values.data() {
        ColumnData::Bool(data) => {
            let (out, validity) =
                fold_sum(data, values, groups, |acc: i64, v| acc + i64::from(v));
            Column::new(ColumnData::Int64(out), Some(validity))
        }
        ColumnData::Int32(data) => {
            let (out, validity) = fold_sum(data, values, groups, |acc: i64, v| {
                acc.wrapping_add(i64::from(v))
            });
            Column::new(ColumnData::Int64(out), Some(validity))
        }
        ColumnData::Int64(data) => {
            let (out, validity) =
                fold_sum(data, values, groups, |acc: i64, v| acc.wrapping_add(v));
            Column::new(ColumnData::Int64(out), Some(validity))
        }
        ColumnData::Float32(data) => {
            let (out, validity) =
                fold_sum(data, values, groups, |acc: f64, v| acc + f64::from(v));
            Column::new(ColumnData::Float64(out), Some(validity))
        }
        ColumnData::Float64(data) => {
            let (out, validity) = fold_sum(data, values, groups, |acc: f64, v| acc + v);
            Column::new(ColumnData::Float64(out), Some(validity))
        }
        ColumnData::Decimal { scale, mantissa } => {
            let (out, validity) = fold_sum(mantissa, values, groups, |acc: i128, v| {
                acc.wrapping_add(v)
            });
            Column::new(
                ColumnData::Decimal {
                    scale: *scale,
                    mantissa: out,
                },
                Some(validity),
            )
        }
        ColumnData::Utf8(_) | ColumnData::Dictionary { .. } | ColumnData::Struct(_) => {
            return Err(GroupByError::TypeMismatch {
                kind: AggKind::Sum,
                dtype: values.dtype(),
            });
        }
    };
    column.map_err(GroupByError::from)
}

fn count_groups(values: &Column, groups: &Groups) -> Result<Column, GroupByError> {
    let counts: Vec<i64> = (0..groups.group_count())
        .map(|group| {
            groups
                .rows(group)
                .iter()
                .filter(|&&row| values.is_valid(row))
                .count() as i64
        })
        .collect();
    Column::from_data(ColumnData::Int64(counts)).map_err(GroupByError::from)
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Emit output columns in ascending key order, whichever grouper ran. The
/// sort grouper's native order is already ascending; sorting here verifies
/// that instead of assuming it, and puts hash output into the same order.
fn assemble(
    keys: &[Column],
    groups: &Groups,
    reduced: Column,
) -> Result<GroupReduceResult, GroupByError> {
    let cmp = RowComparator::over(keys, NullOrder::Before)?;

    let mut order: Vec<usize> = (0..groups.group_count()).collect();
    order.sort_by(|&a, &b| {
        match (Some(a) == groups.null_group, Some(b) == groups.null_group) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                cmp.compare(groups.representatives[a], groups.representatives[b])
            }
        }
    });

    // The null-key group materializes as a null in every key column.
    let key_positions: Vec<Option<usize>> = order
        .iter()
        .map(|&group| {
            if Some(group) == groups.null_group {
                None
            } else {
                Some(groups.representatives[group])
            }
        })
        .collect();
    let out_keys = keys
        .iter()
        .map(|key| key.gather(&key_positions))
        .collect::<Result<Vec<_>, _>>()?;

    let value_positions: Vec<Option<usize>> = order.iter().map(|&group| Some(group)).collect();
    let out_values = reduced.gather(&value_positions)?;

    Ok(GroupReduceResult {
        keys: out_keys,
        values: out_values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32(values: &[i32]) -> Column {
        Column::from_data(ColumnData::Int32(values.to_vec())).expect("column")
    }

    fn int32_nulls(values: &[i32], validity: &[bool]) -> Column {
        Column::new(
            ColumnData::Int32(values.to_vec()),
            Some(ValidityMask::from_bools(validity)),
        )
        .expect("column")
    }

    fn int64_values(column: &Column) -> Vec<i64> {
        match column.data() {
            ColumnData::Int64(values) => values.clone(),
            other => panic!("expected Int64, found {other:?}"),
        }
    }

    fn classic_keys() -> Column {
        int32(&[1, 2, 3, 1, 2, 2, 1, 3, 3, 2])
    }

    #[test]
    fn max_basic_on_both_strategies() {
        let keys = [classic_keys()];
        let values = int32(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        for strategy in [StrategyHint::ForceHash, StrategyHint::ForceSort] {
            let result = group_reduce(
                &keys,
                &values,
                AggKind::Max,
                strategy,
                NullKeyPolicy::Exclude,
            )
            .expect("group_reduce");
            assert_eq!(result.keys[0], int32(&[1, 2, 3]));
            assert_eq!(result.values, int32(&[6, 9, 8]));
        }
    }

    #[test]
    fn include_policy_appends_one_trailing_null_group() {
        let keys = [int32_nulls(
            &[2, 0, 1, 0, 2],
            &[true, false, true, false, true],
        )];
        let values = int32(&[10, 20, 30, 40, 50]);
        for strategy in [StrategyHint::ForceHash, StrategyHint::ForceSort] {
            let result = group_reduce(
                &keys,
                &values,
                AggKind::Max,
                strategy,
                NullKeyPolicy::Include,
            )
            .expect("group_reduce");
            let out_keys = &result.keys[0];
            assert_eq!(out_keys.len(), 3);
            assert!(out_keys.is_valid(0) && out_keys.is_valid(1));
            assert!(!out_keys.is_valid(2));
            match result.values.data() {
                ColumnData::Int32(values) => assert_eq!(values, &[30, 50, 40]),
                other => panic!("unexpected data {other:?}"),
            }
        }
    }

    #[test]
    fn multi_key_rows_with_any_null_key_share_the_trailing_group() {
        let first = int32_nulls(&[1, 0, 1, 1], &[true, false, true, true]);
        let second = int32_nulls(&[5, 1, 0, 5], &[true, true, false, true]);
        let values = int32(&[1, 2, 3, 4]);
        for strategy in [StrategyHint::ForceHash, StrategyHint::ForceSort] {
            let result = group_reduce(
                &[first.clone(), second.clone()],
                &values,
                AggKind::Max,
                strategy,
                NullKeyPolicy::Include,
            )
            .expect("group_reduce");
            // Groups: (1,5) and the null-key group {row1, row2}.
            assert_eq!(result.values, int32(&[4, 3]));
            assert!(!result.keys[0].is_valid(1));
            assert!(!result.keys[1].is_valid(1));
        }
    }

    #[test]
    fn count_and_sum_and_min() {
        let keys = [classic_keys()];
        let values = int32_nulls(
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
            &[true, true, true, true, true, true, false, true, true, false],
        );
        let counts = group_reduce(
            &keys,
            &values,
            AggKind::Count,
            StrategyHint::Auto,
            NullKeyPolicy::Exclude,
        )
        .expect("count");
        assert_eq!(int64_values(&counts.values), vec![2, 3, 3]);

        let sums = group_reduce(
            &keys,
            &values,
            AggKind::Sum,
            StrategyHint::Auto,
            NullKeyPolicy::Exclude,
        )
        .expect("sum");
        assert_eq!(int64_values(&sums.values), vec![3, 10, 17]);

        let mins = group_reduce(
            &keys,
            &values,
            AggKind::Min,
            StrategyHint::Auto,
            NullKeyPolicy::Exclude,
        )
        .expect("min");
        assert_eq!(mins.values, int32(&[0, 1, 2]));
    }

    #[test]
    fn empty_input_produces_empty_output() {
        let keys = [int32(&[])];
        let values = int32(&[]);
        for strategy in [StrategyHint::ForceHash, StrategyHint::ForceSort] {
            let result = group_reduce(
                &keys,
                &values,
                AggKind::Max,
                strategy,
                NullKeyPolicy::Include,
            )
            .expect("group_reduce");
            assert!(result.keys[0].is_empty());
            assert!(result.values.is_empty());
        }
    }

    #[test]
    fn validation_runs_before_any_grouping() {
        let values = int32(&[1, 2]);
        let err = group_reduce(
            &[],
            &values,
            AggKind::Max,
            StrategyHint::Auto,
            NullKeyPolicy::Exclude,
        )
        .expect_err("must fail");
        assert_eq!(err, GroupByError::NoKeyColumns);

        let err = group_reduce(
            &[int32(&[1, 2, 3])],
            &values,
            AggKind::Max,
            StrategyHint::Auto,
            NullKeyPolicy::Exclude,
        )
        .expect_err("must fail");
        assert_eq!(
            err,
            GroupByError::ShapeMismatch {
                column: 0,
                key_len: 3,
                value_len: 2
            }
        );

        let strings = Column::from_data(ColumnData::Utf8(vec!["a".into(), "b".into()]))
            .expect("column");
        let err = group_reduce(
            &[int32(&[1, 1])],
            &strings,
            AggKind::Sum,
            StrategyHint::Auto,
            NullKeyPolicy::Exclude,
        )
        .expect_err("must fail");
        assert!(matches!(err, GroupByError::TypeMismatch { kind: AggKind::Sum, .. }));
    }

    #[test]
    fn null_policy_wire_codes() {
        assert_eq!(NullKeyPolicy::from_raw(0), Ok(NullKeyPolicy::Exclude));
        assert_eq!(NullKeyPolicy::from_raw(1), Ok(NullKeyPolicy::Include));
        assert_eq!(
            NullKeyPolicy::from_raw(9),
            Err(GroupByError::UnsupportedNullPolicy { code: 9 })
        );
    }

    #[test]
    fn trace_reports_strategy_and_arena_use() {
        let keys = [classic_keys()];
        let values = int32(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

        let (_, trace) = group_reduce_with_trace(
            &keys,
            &values,
            AggKind::Max,
            StrategyHint::ForceHash,
            NullKeyPolicy::Exclude,
            GroupReduceExecutionOptions::default(),
        )
        .expect("group_reduce");
        assert_eq!(trace.strategy, Strategy::Hash);
        assert!(trace.used_arena);
        assert_eq!(trace.input_rows, 10);
        assert_eq!(trace.group_count, 3);

        let (_, trace) = group_reduce_with_trace(
            &keys,
            &values,
            AggKind::Max,
            StrategyHint::ForceHash,
            NullKeyPolicy::Exclude,
            GroupReduceExecutionOptions {
                arena_budget_bytes: 0,
                ..GroupReduceExecutionOptions::default()
            },
        )
        .expect("group_reduce");
        assert!(!trace.used_arena);

        let (_, trace) = group_reduce_with_trace(
            &keys,
            &values,
            AggKind::Max,
            StrategyHint::ForceSort,
            NullKeyPolicy::Exclude,
            GroupReduceExecutionOptions::default(),
        )
        .expect("group_reduce");
        assert_eq!(trace.strategy, Strategy::Sort);
        assert!(!trace.used_arena);
    }

    #[test]
    fn presorted_hint_routes_auto_to_the_sort_grouper() {
        let keys = [int32(&[1, 1, 2, 2, 3])];
        let values = int32(&[5, 1, 2, 8, 4]);
        let (result, trace) = group_reduce_with_trace(
            &keys,
            &values,
            AggKind::Max,
            StrategyHint::Auto,
            NullKeyPolicy::Exclude,
            GroupReduceExecutionOptions {
                keys_presorted: true,
                ..GroupReduceExecutionOptions::default()
            },
        )
        .expect("group_reduce");
        assert_eq!(trace.strategy, Strategy::Sort);
        assert_eq!(result.keys[0], int32(&[1, 2, 3]));
        assert_eq!(result.values, int32(&[5, 8, 4]));
    }
}

#![forbid(unsafe_code)]

//! Fixture builders and assertion helpers for the conformance suite.
//!
//! Builders mirror the shapes the engine consumes: typed columns with and
//! without validity, dictionary columns over a sorted-unique key set, and
//! struct columns. The strategy helper runs both groupers and insists they
//! agree before handing a result back to the test.

use std::collections::BTreeSet;
use std::sync::Arc;

use gf_columnar::{Column, ColumnData, ValidityMask};
use gf_groupby::{AggKind, GroupReduceResult, NullKeyPolicy, StrategyHint, group_reduce};
use gf_order::{NullOrder, RowComparator};

pub fn int32_column(values: &[i32]) -> Column {
    Column::from_data(ColumnData::Int32(values.to_vec())).expect("int32 column")
}

pub fn int32_column_nulls(values: &[i32], validity: &[bool]) -> Column {
    Column::new(
        ColumnData::Int32(values.to_vec()),
        Some(ValidityMask::from_bools(validity)),
    )
    .expect("int32 column")
}

pub fn int64_column(values: &[i64]) -> Column {
    Column::from_data(ColumnData::Int64(values.to_vec())).expect("int64 column")
}

pub fn int64_column_nulls(values: &[i64], validity: &[bool]) -> Column {
    Column::new(
        ColumnData::Int64(values.to_vec()),
        Some(ValidityMask::from_bools(validity)),
    )
    .expect("int64 column")
}

pub fn float64_column(values: &[f64]) -> Column {
    Column::from_data(ColumnData::Float64(values.to_vec())).expect("float64 column")
}

pub fn utf8_column(values: &[&str]) -> Column {
    Column::from_data(ColumnData::Utf8(
        values.iter().map(|s| (*s).to_owned()).collect(),
    ))
    .expect("utf8 column")
}

pub fn utf8_column_nulls(values: &[&str], validity: &[bool]) -> Column {
    Column::new(
        ColumnData::Utf8(values.iter().map(|s| (*s).to_owned()).collect()),
        Some(ValidityMask::from_bools(validity)),
    )
    .expect("utf8 column")
}

pub fn decimal_column(scale: i32, mantissa: &[i128]) -> Column {
    Column::from_data(ColumnData::Decimal {
        scale,
        mantissa: mantissa.to_vec(),
    })
    .expect("decimal column")
}

/// Dictionary-encode strings against a sorted set of the distinct values,
/// the way the original columnar wrappers build their key sets.
pub fn dictionary_utf8_column(values: &[&str]) -> Column {
    let key_set: Vec<&str> = values.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
    let indices = values
        .iter()
        .map(|v| {
            key_set
                .binary_search(v)
                .expect("value is in its own key set") as u32
        })
        .collect();
    Column::from_data(ColumnData::Dictionary {
        indices,
        keys: Arc::new(utf8_column(&key_set)),
    })
    .expect("dictionary column")
}

pub fn dictionary_int64_column(values: &[i64]) -> Column {
    let key_set: Vec<i64> = values.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
    let indices = values
        .iter()
        .map(|v| {
            key_set
                .binary_search(v)
                .expect("value is in its own key set") as u32
        })
        .collect();
    Column::from_data(ColumnData::Dictionary {
        indices,
        keys: Arc::new(int64_column(&key_set)),
    })
    .expect("dictionary column")
}

pub fn struct_column(children: Vec<Column>) -> Column {
    Column::from_data(ColumnData::Struct(children)).expect("struct column")
}

pub fn struct_column_nulls(children: Vec<Column>, validity: &[bool]) -> Column {
    Column::new(
        ColumnData::Struct(children),
        Some(ValidityMask::from_bools(validity)),
    )
    .expect("struct column")
}

/// Run the request under both forced strategies, require identical output,
/// and return it.
pub fn run_both_strategies(
    keys: &[Column],
    values: &Column,
    kind: AggKind,
    policy: NullKeyPolicy,
) -> GroupReduceResult {
    let hash = group_reduce(keys, values, kind, StrategyHint::ForceHash, policy)
        .expect("hash strategy");
    let sort = group_reduce(keys, values, kind, StrategyHint::ForceSort, policy)
        .expect("sort strategy");
    assert_eq!(hash, sort, "hash and sort grouping must agree");
    hash
}

/// Row-wise semantic equality: same dtype, length, validity, and equal valid
/// cells under the row comparator (dictionary cells compare decoded).
pub fn assert_columns_equivalent(actual: &Column, expected: &Column) {
    assert_eq!(actual.len(), expected.len(), "row counts differ");
    let cmp = RowComparator::new(
        std::slice::from_ref(actual),
        std::slice::from_ref(expected),
        NullOrder::Before,
    )
    .expect("comparable columns");
    for row in 0..actual.len() {
        assert_eq!(
            actual.is_valid(row),
            expected.is_valid(row),
            "validity differs at row {row}"
        );
        assert!(
            cmp.rows_equal(row, row),
            "values differ at row {row}: {actual:?} vs {expected:?}"
        );
    }
}

#![forbid(unsafe_code)]

//! End-to-end coverage for the non-max reductions, the error taxonomy, and
//! the bridge helpers that ride along with the engine.

use gf_columnar::{Column, ColumnData, offsets_from_lengths};
use gf_conformance::{
    assert_columns_equivalent, decimal_column, float64_column, int32_column, int32_column_nulls,
    int64_column, run_both_strategies, struct_column, utf8_column,
};
use gf_groupby::{AggKind, GroupByError, NullKeyPolicy, StrategyHint, group_reduce};

fn classic_keys() -> Column {
    int32_column(&[1, 2, 3, 1, 2, 2, 1, 3, 3, 2])
}

#[test]
fn min_mirrors_max_with_the_order_reversed() {
    let keys = [classic_keys()];
    let values = int32_column(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    let result = run_both_strategies(&keys, &values, AggKind::Min, NullKeyPolicy::Exclude);
    assert_columns_equivalent(&result.values, &int32_column(&[0, 1, 2]));
}

#[test]
fn min_struct_prefers_null_children() {
    // Under null-before ordering, (1, null) sorts below (1, -1).
    let keys = [int32_column(&[1, 1])];
    let values = struct_column(vec![
        int32_column(&[1, 1]),
        int32_column_nulls(&[-1, 0], &[true, false]),
    ]);
    let result = run_both_strategies(&keys, &values, AggKind::Min, NullKeyPolicy::Exclude);
    let expected = struct_column(vec![
        int32_column(&[1]),
        int32_column_nulls(&[0], &[false]),
    ]);
    assert_columns_equivalent(&result.values, &expected);
}

#[test]
fn sum_widens_integers_and_skips_nulls() {
    let keys = [classic_keys()];
    let values = int32_column_nulls(
        &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
        &[true, true, true, true, true, true, false, true, true, true],
    );
    let result = run_both_strategies(&keys, &values, AggKind::Sum, NullKeyPolicy::Exclude);
    // Valid members per group: {0, 3}, {1, 4, 5, 9}, {2, 7, 8}.
    assert_columns_equivalent(&result.values, &int64_column(&[3, 19, 17]));
}

#[test]
fn sum_floats_accumulate_as_float64() {
    let keys = [int32_column(&[1, 1, 2])];
    let values = float64_column(&[0.5, 0.25, 3.0]);
    let result = run_both_strategies(&keys, &values, AggKind::Sum, NullKeyPolicy::Exclude);
    assert_columns_equivalent(&result.values, &float64_column(&[0.75, 3.0]));
}

#[test]
fn sum_decimal_keeps_the_scale() {
    let keys = [int32_column(&[7, 7, 8])];
    let values = decimal_column(-2, &[150, 25, 1]);
    let result = run_both_strategies(&keys, &values, AggKind::Sum, NullKeyPolicy::Exclude);
    assert_columns_equivalent(&result.values, &decimal_column(-2, &[175, 1]));
}

#[test]
fn sum_of_an_all_null_group_is_null() {
    let keys = [int32_column(&[1, 1])];
    let values = int32_column_nulls(&[5, 6], &[false, false]);
    let result = run_both_strategies(&keys, &values, AggKind::Sum, NullKeyPolicy::Exclude);
    assert_eq!(result.values.len(), 1);
    assert!(!result.values.is_valid(0));
}

#[test]
fn count_reports_valid_members_only() {
    let keys = [classic_keys()];
    let values = int32_column_nulls(
        &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
        &[false, true, true, false, true, true, false, true, true, false],
    );
    let result = run_both_strategies(&keys, &values, AggKind::Count, NullKeyPolicy::Exclude);
    assert_columns_equivalent(&result.values, &int64_column(&[0, 3, 3]));
    // COUNT is always valid, even for an all-null group.
    assert!(result.values.is_valid(0));
}

#[test]
fn sum_rejects_non_numeric_values_before_grouping() {
    let keys = [int32_column(&[1, 2])];
    for values in [
        utf8_column(&["a", "b"]),
        struct_column(vec![int32_column(&[1, 2])]),
    ] {
        let err = group_reduce(
            &keys,
            &values,
            AggKind::Sum,
            StrategyHint::Auto,
            NullKeyPolicy::Exclude,
        )
        .expect_err("must fail");
        assert!(matches!(
            err,
            GroupByError::TypeMismatch {
                kind: AggKind::Sum,
                ..
            }
        ));
    }
}

#[test]
fn shape_mismatch_is_fatal_for_any_key_column() {
    let keys = [int32_column(&[1, 2]), int32_column(&[1, 2, 3])];
    let values = int32_column(&[4, 5]);
    let err = group_reduce(
        &keys,
        &values,
        AggKind::Max,
        StrategyHint::Auto,
        NullKeyPolicy::Exclude,
    )
    .expect_err("must fail");
    assert_eq!(
        err,
        GroupByError::ShapeMismatch {
            column: 1,
            key_len: 3,
            value_len: 2
        }
    );
}

#[test]
fn masked_copies_feed_straight_into_grouping() {
    // A bridge caller stamps its own validity, then groups the result.
    let keys = [int32_column(&[1, 1, 2, 2])];
    let values = int32_column(&[10, 99, 20, 99])
        .apply_boolean_mask(&[true, false, true, false])
        .expect("masked copy");
    let result = run_both_strategies(&keys, &values, AggKind::Max, NullKeyPolicy::Exclude);
    assert_columns_equivalent(&result.values, &int32_column(&[10, 20]));
}

#[test]
fn list_offsets_are_a_plain_prefix_sum() {
    assert_eq!(offsets_from_lengths(&[2, 0, 5]), vec![0, 2, 2, 7]);
    let lengths = vec![3_u32; 4];
    let offsets = offsets_from_lengths(&lengths);
    assert_eq!(offsets.len(), lengths.len() + 1);
    assert_eq!(offsets.last(), Some(&12));
}

#[test]
fn dictionary_values_support_min_too() {
    let keys = [int32_column(&[1, 2, 1, 2])];
    let values = gf_conformance::dictionary_utf8_column(&["zit", "bat", "aaa", "wut"]);
    let result = run_both_strategies(&keys, &values, AggKind::Min, NullKeyPolicy::Exclude);
    assert_columns_equivalent(
        &result.values,
        &gf_conformance::dictionary_utf8_column(&["aaa", "bat"]),
    );
    match result.values.data() {
        ColumnData::Dictionary { .. } => {}
        other => panic!("expected dictionary output, found {other:?}"),
    }
}

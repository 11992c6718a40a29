#![forbid(unsafe_code)]

use std::cmp::Ordering;

use gf_columnar::{Column, ColumnData, DType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where null cells sort relative to non-null cells. Two nulls at the same
/// position always compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullOrder {
    /// Null compares less than every non-null value.
    Before,
    /// Null compares greater than every non-null value.
    After,
}

impl NullOrder {
    fn null_vs_value(self) -> Ordering {
        match self {
            Self::Before => Ordering::Less,
            Self::After => Ordering::Greater,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("row comparison requires equal column counts: left={left}, right={right}")]
    ArityMismatch { left: usize, right: usize },
    #[error("column {column}: cannot compare {left:?} with {right:?}")]
    DTypeMismatch {
        column: usize,
        left: DType,
        right: DType,
    },
    #[error("column {column}: decimal scales differ (left={left}, right={right})")]
    ScaleMismatch {
        column: usize,
        left: i32,
        right: i32,
    },
}

/// Total order over rows of two column lists of identical shape.
///
/// Comparison is lexicographic across columns, and within struct cells
/// lexicographic across children in declared order. Construction validates
/// the shape once so `compare` never fails.
#[derive(Debug, Clone, Copy)]
pub struct RowComparator<'a> {
    left: &'a [Column],
    right: &'a [Column],
    null_order: NullOrder,
}

impl<'a> RowComparator<'a> {
    pub fn new(
        left: &'a [Column],
        right: &'a [Column],
        null_order: NullOrder,
    ) -> Result<Self, OrderError> {
        if left.len() != right.len() {
            return Err(OrderError::ArityMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        for (column, (l, r)) in left.iter().zip(right.iter()).enumerate() {
            let (ld, rd) = (l.dtype(), r.dtype());
            if let (DType::Decimal { scale: ls }, DType::Decimal { scale: rs }) = (&ld, &rd) {
                if ls != rs {
                    return Err(OrderError::ScaleMismatch {
                        column,
                        left: *ls,
                        right: *rs,
                    });
                }
            }
            if ld != rd {
                return Err(OrderError::DTypeMismatch {
                    column,
                    left: ld,
                    right: rd,
                });
            }
        }
        Ok(Self {
            left,
            right,
            null_order,
        })
    }

    /// Comparator over one column list against itself.
    pub fn over(columns: &'a [Column], null_order: NullOrder) -> Result<Self, OrderError> {
        Self::new(columns, columns, null_order)
    }

    /// Compare row `i` of the left columns with row `j` of the right columns.
    #[must_use]
    pub fn compare(&self, i: usize, j: usize) -> Ordering {
        for (l, r) in self.left.iter().zip(self.right.iter()) {
            let ordering = compare_cell(l, i, r, j, self.null_order);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    #[must_use]
    pub fn rows_equal(&self, i: usize, j: usize) -> bool {
        self.compare(i, j) == Ordering::Equal
    }
}

fn compare_cell(
    left: &Column,
    i: usize,
    right: &Column,
    j: usize,
    null_order: NullOrder,
) -> Ordering {
    match (left.is_valid(i), right.is_valid(j)) {
        (false, false) => Ordering::Equal,
        (false, true) => null_order.null_vs_value(),
        (true, false) => null_order.null_vs_value().reverse(),
        (true, true) => compare_values(left, i, right, j, null_order),
    }
}

fn compare_values(
    left: &Column,
    i: usize,
    right: &Column,
    j: usize,
    null_order: NullOrder,
) -> Ordering {
    match (left.data(), right.data()) {
        (ColumnData::Bool(a), ColumnData::Bool(b)) => a[i].cmp(&b[j]),
        (ColumnData::Int32(a), ColumnData::Int32(b)) => a[i].cmp(&b[j]),
        (ColumnData::Int64(a), ColumnData::Int64(b)) => a[i].cmp(&b[j]),
        (ColumnData::Float32(a), ColumnData::Float32(b)) => a[i].total_cmp(&b[j]),
        (ColumnData::Float64(a), ColumnData::Float64(b)) => a[i].total_cmp(&b[j]),
        (ColumnData::Utf8(a), ColumnData::Utf8(b)) => a[i].as_bytes().cmp(b[j].as_bytes()),
        (
            ColumnData::Decimal { mantissa: a, .. },
            ColumnData::Decimal { mantissa: b, .. },
        ) => a[i].cmp(&b[j]),
        (
            ColumnData::Dictionary {
                indices: a,
                keys: a_keys,
            },
            ColumnData::Dictionary {
                indices: b,
                keys: b_keys,
            },
        ) => compare_cell(a_keys, a[i] as usize, b_keys, b[j] as usize, null_order),
        (ColumnData::Struct(a), ColumnData::Struct(b)) => {
            for (l, r) in a.iter().zip(b.iter()) {
                let ordering = compare_cell(l, i, r, j, null_order);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        }
        // Construction guarantees matching dtypes.
        _ => unreachable!("comparator constructed over mismatched column types"),
    }
}

/// Hash of a null cell. Fixed so null keys group consistently with each
/// other regardless of the placeholder stored underneath them.
const NULL_HASH_SENTINEL: u64 = 0xDEAD_BEEF_CAFE_BABE;

const HASH_SEED: u64 = 0x243F_6A88_85A3_08D3;

/// SplitMix64 finalizer for good avalanche on short integer inputs.
fn splitmix(value: u64) -> u64 {
    let mut h = value;
    h = (h ^ (h >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    h ^ (h >> 31)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h = 0xcbf2_9ce4_8422_2325_u64;
    for &b in bytes {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

fn combine(acc: u64, cell: u64) -> u64 {
    splitmix(acc.rotate_left(13) ^ cell)
}

/// Combined hash of one row across a list of columns.
///
/// Comparator-equal rows hash equally: dictionary cells hash their decoded
/// key value, struct cells fold their children, and float cells hash raw
/// bits (bit equality is exactly `total_cmp` equality).
#[must_use]
pub fn hash_row(columns: &[Column], row: usize) -> u64 {
    let mut acc = HASH_SEED;
    for column in columns {
        acc = combine(acc, hash_cell(column, row));
    }
    acc
}

fn hash_cell(column: &Column, row: usize) -> u64 {
    if !column.is_valid(row) {
        return NULL_HASH_SENTINEL;
    }
    match column.data() {
        ColumnData::Bool(d) => splitmix(u64::from(d[row])),
        ColumnData::Int32(d) => splitmix(d[row] as u64),
        ColumnData::Int64(d) => splitmix(d[row] as u64),
        ColumnData::Float32(d) => splitmix(u64::from(d[row].to_bits())),
        ColumnData::Float64(d) => splitmix(d[row].to_bits()),
        ColumnData::Utf8(d) => fnv1a(d[row].as_bytes()),
        ColumnData::Decimal { mantissa, .. } => {
            let m = mantissa[row];
            combine(splitmix(m as u64), splitmix((m >> 64) as u64))
        }
        ColumnData::Dictionary { indices, keys } => hash_cell(keys, indices[row] as usize),
        ColumnData::Struct(children) => {
            let mut acc = HASH_SEED;
            for child in children {
                acc = combine(acc, hash_cell(child, row));
            }
            acc
        }
    }
}

#![forbid(unsafe_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Packed per-row validity bitmap. Bit set = value present, bit clear = null.
#[derive(Debug, Clone, Eq)]
pub struct ValidityMask {
    words: Vec<u64>,
    len: usize,
}

impl ValidityMask {
    #[must_use]
    pub fn from_bools(bits: &[bool]) -> Self {
        let len = bits.len();
        let mut words = vec![0_u64; len.div_ceil(64)];
        for (idx, &valid) in bits.iter().enumerate() {
            if valid {
                words[idx / 64] |= 1_u64 << (idx % 64);
            }
        }
        Self { words, len }
    }

    #[must_use]
    pub fn all_valid(len: usize) -> Self {
        let mut words = vec![u64::MAX; len.div_ceil(64)];
        let remainder = len % 64;
        if remainder > 0 && !words.is_empty() {
            let last = words.len() - 1;
            words[last] = (1_u64 << remainder) - 1;
        }
        Self { words, len }
    }

    #[must_use]
    pub fn all_invalid(len: usize) -> Self {
        Self {
            words: vec![0_u64; len.div_ceil(64)],
            len,
        }
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    pub fn set(&mut self, idx: usize, valid: bool) {
        if idx >= self.len {
            return;
        }
        if valid {
            self.words[idx / 64] |= 1_u64 << (idx % 64);
        } else {
            self.words[idx / 64] &= !(1_u64 << (idx % 64));
        }
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        let full_words = self.len / 64;
        let mut count: u32 = self.words[..full_words]
            .iter()
            .map(|w| w.count_ones())
            .sum();
        let remainder = self.len % 64;
        if remainder > 0 && full_words < self.words.len() {
            let tail = (1_u64 << remainder) - 1;
            count += (self.words[full_words] & tail).count_ones();
        }
        count as usize
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn and_mask(&self, other: &Self) -> Self {
        let len = self.len.min(other.len);
        let word_count = len.div_ceil(64);
        let words = self.words[..word_count]
            .iter()
            .zip(&other.words[..word_count])
            .map(|(a, b)| a & b)
            .collect();
        Self { words, len }
    }

    /// Iterator over per-row validity, in row order.
    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|idx| self.get(idx))
    }
}

impl PartialEq for ValidityMask {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.bits().eq(other.bits())
    }
}

impl Serialize for ValidityMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let bits: Vec<bool> = self.bits().collect();
        let mut state = serializer.serialize_struct("ValidityMask", 1)?;
        state.serialize_field("bits", &bits)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ValidityMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            bits: Vec<bool>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self::from_bools(&raw.bits))
    }
}

/// Logical type of a column. A closed set: every consumer matches exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DType {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Decimal { scale: i32 },
    Dictionary(Box<DType>),
    Struct(Vec<DType>),
}

impl DType {
    /// True for types that contain other columns.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        matches!(self, Self::Dictionary(_) | Self::Struct(_))
    }
}

/// Typed value storage for one column.
///
/// Invalid positions hold unspecified placeholder values; callers must
/// consult the owning column's validity before reading a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    Bool(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
    /// Fixed-point values as integer mantissas at a common scale
    /// (logical value = mantissa * 10^scale).
    Decimal { scale: i32, mantissa: Vec<i128> },
    /// Row indices into a shared column of unique key values.
    Dictionary { indices: Vec<u32>, keys: Arc<Column> },
    /// Ordered, row-aligned child columns.
    Struct(Vec<Column>),
}

impl ColumnData {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(d) => d.len(),
            Self::Int32(d) => d.len(),
            Self::Int64(d) => d.len(),
            Self::Float32(d) => d.len(),
            Self::Float64(d) => d.len(),
            Self::Utf8(d) => d.len(),
            Self::Decimal { mantissa, .. } => mantissa.len(),
            Self::Dictionary { indices, .. } => indices.len(),
            Self::Struct(children) => children.first().map_or(0, Column::len),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("validity bitmap has {found} bits but the column has {expected} rows")]
    ValidityLengthMismatch { expected: usize, found: usize },
    #[error("struct child {child} has {found} rows, expected {expected}")]
    ChildLengthMismatch {
        child: usize,
        expected: usize,
        found: usize,
    },
    #[error("struct columns require at least one child")]
    EmptyStruct,
    #[error("dictionary key columns must be flat, found {0:?}")]
    NestedDictionaryKeys(DType),
    #[error("dictionary key columns must not contain nulls")]
    NullDictionaryKeys,
    #[error("dictionary index {index} out of range for key set of {len}")]
    DictionaryIndexOutOfRange { index: u32, len: usize },
    #[error("slice [{offset}, {offset}+{len}) out of range for column of {rows} rows")]
    SliceOutOfRange {
        offset: usize,
        len: usize,
        rows: usize,
    },
    #[error("boolean mask has {found} entries but the column has {expected} rows")]
    MaskLengthMismatch { expected: usize, found: usize },
}

/// Read-only typed view over a sequence of values plus optional validity.
///
/// A column without a validity bitmap is all-valid. Construction validates
/// shape invariants once; every later accessor is infallible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    data: ColumnData,
    validity: Option<ValidityMask>,
}

impl Column {
    pub fn new(data: ColumnData, validity: Option<ValidityMask>) -> Result<Self, ColumnError> {
        let len = data.len();
        if let Some(mask) = &validity {
            if mask.len() != len {
                return Err(ColumnError::ValidityLengthMismatch {
                    expected: len,
                    found: mask.len(),
                });
            }
        }

        match &data {
            ColumnData::Struct(children) => {
                if children.is_empty() {
                    return Err(ColumnError::EmptyStruct);
                }
                for (child, column) in children.iter().enumerate() {
                    if column.len() != len {
                        return Err(ColumnError::ChildLengthMismatch {
                            child,
                            expected: len,
                            found: column.len(),
                        });
                    }
                }
            }
            ColumnData::Dictionary { indices, keys } => {
                if keys.dtype().is_nested() {
                    return Err(ColumnError::NestedDictionaryKeys(keys.dtype()));
                }
                if keys.null_count() > 0 {
                    return Err(ColumnError::NullDictionaryKeys);
                }
                for (row, &index) in indices.iter().enumerate() {
                    let valid = validity.as_ref().is_none_or(|mask| mask.get(row));
                    if valid && index as usize >= keys.len() {
                        return Err(ColumnError::DictionaryIndexOutOfRange {
                            index,
                            len: keys.len(),
                        });
                    }
                }
            }
            _ => {}
        }

        // Normalize: an all-valid bitmap and an absent bitmap are the same
        // column; store the canonical form so equality is structural.
        let validity = validity.filter(|mask| mask.count_valid() != len);

        Ok(Self { data, validity })
    }

    /// Construct an all-valid column.
    pub fn from_data(data: ColumnData) -> Result<Self, ColumnError> {
        Self::new(data, None)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match &self.data {
            ColumnData::Bool(_) => DType::Bool,
            ColumnData::Int32(_) => DType::Int32,
            ColumnData::Int64(_) => DType::Int64,
            ColumnData::Float32(_) => DType::Float32,
            ColumnData::Float64(_) => DType::Float64,
            ColumnData::Utf8(_) => DType::Utf8,
            ColumnData::Decimal { scale, .. } => DType::Decimal { scale: *scale },
            ColumnData::Dictionary { keys, .. } => DType::Dictionary(Box::new(keys.dtype())),
            ColumnData::Struct(children) => {
                DType::Struct(children.iter().map(Self::dtype).collect())
            }
        }
    }

    /// Top-level validity of one row. A null struct row is null regardless
    /// of its children; a null dictionary row is null regardless of the
    /// index stored at that position.
    #[must_use]
    pub fn is_valid(&self, row: usize) -> bool {
        if row >= self.len() {
            return false;
        }
        self.validity.as_ref().is_none_or(|mask| mask.get(row))
    }

    #[must_use]
    pub fn null_count(&self) -> usize {
        match &self.validity {
            Some(mask) => mask.len() - mask.count_valid(),
            None => 0,
        }
    }

    #[must_use]
    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    #[must_use]
    pub fn validity(&self) -> Option<&ValidityMask> {
        self.validity.as_ref()
    }

    /// Child columns of a struct column.
    #[must_use]
    pub fn children(&self) -> Option<&[Column]> {
        match &self.data {
            ColumnData::Struct(children) => Some(children),
            _ => None,
        }
    }

    /// Index sequence and shared key column of a dictionary column.
    #[must_use]
    pub fn dictionary(&self) -> Option<(&[u32], &Arc<Column>)> {
        match &self.data {
            ColumnData::Dictionary { indices, keys } => Some((indices, keys)),
            _ => None,
        }
    }

    /// Materialize a column by position. `None` and out-of-range positions
    /// produce null cells; placeholder values are the type default.
    pub fn gather(&self, positions: &[Option<usize>]) -> Result<Self, ColumnError> {
        let source = |slot: &Option<usize>| -> Option<usize> {
            slot.filter(|&idx| idx < self.len() && self.is_valid(idx))
        };
        let validity =
            ValidityMask::from_bools(&positions.iter().map(|p| source(p).is_some()).collect::<Vec<_>>());

        let data = match &self.data {
            ColumnData::Bool(d) => ColumnData::Bool(gather_values(d, positions, &source)),
            ColumnData::Int32(d) => ColumnData::Int32(gather_values(d, positions, &source)),
            ColumnData::Int64(d) => ColumnData::Int64(gather_values(d, positions, &source)),
            ColumnData::Float32(d) => ColumnData::Float32(gather_values(d, positions, &source)),
            ColumnData::Float64(d) => ColumnData::Float64(gather_values(d, positions, &source)),
            ColumnData::Utf8(d) => ColumnData::Utf8(gather_values(d, positions, &source)),
            ColumnData::Decimal { scale, mantissa } => ColumnData::Decimal {
                scale: *scale,
                mantissa: gather_values(mantissa, positions, &source),
            },
            ColumnData::Dictionary { indices, keys } => ColumnData::Dictionary {
                indices: gather_values(indices, positions, &source),
                keys: Arc::clone(keys),
            },
            ColumnData::Struct(children) => {
                // A null parent position nulls the gathered child cell even
                // when the source child cell was valid.
                let child_positions: Vec<Option<usize>> =
                    positions.iter().map(|p| source(p)).collect();
                let gathered = children
                    .iter()
                    .map(|child| child.gather(&child_positions))
                    .collect::<Result<Vec<_>, _>>()?;
                ColumnData::Struct(gathered)
            }
        };

        Self::new(data, Some(validity))
    }

    /// Contiguous sub-view, materialized.
    pub fn slice(&self, offset: usize, len: usize) -> Result<Self, ColumnError> {
        if offset.checked_add(len).is_none_or(|end| end > self.len()) {
            return Err(ColumnError::SliceOutOfRange {
                offset,
                len,
                rows: self.len(),
            });
        }
        let positions: Vec<Option<usize>> = (offset..offset + len).map(Some).collect();
        self.gather(&positions)
    }

    /// Copy of the column with validity restricted to `mask`: a row of the
    /// result is valid only where it was valid and the mask is set.
    pub fn apply_boolean_mask(&self, mask: &[bool]) -> Result<Self, ColumnError> {
        if mask.len() != self.len() {
            return Err(ColumnError::MaskLengthMismatch {
                expected: self.len(),
                found: mask.len(),
            });
        }
        let stamped = ValidityMask::from_bools(mask);
        let combined = match &self.validity {
            Some(existing) => existing.and_mask(&stamped),
            None => stamped,
        };
        Self::new(self.data.clone(), Some(combined))
    }
}

fn gather_values<T: Clone + Default>(
    data: &[T],
    positions: &[Option<usize>],
    source: &impl Fn(&Option<usize>) -> Option<usize>,
) -> Vec<T> {
    positions
        .iter()
        .map(|slot| source(slot).map_or_else(T::default, |idx| data[idx].clone()))
        .collect()
}

/// Offsets array for a list layout: `lengths.len() + 1` entries, starting at
/// zero, each entry the running sum of the preceding lengths.
#[must_use]
pub fn offsets_from_lengths(lengths: &[u32]) -> Vec<i64> {
    let mut offsets = Vec::with_capacity(lengths.len() + 1);
    let mut running = 0_i64;
    offsets.push(running);
    for &len in lengths {
        running += i64::from(len);
        offsets.push(running);
    }
    offsets
}

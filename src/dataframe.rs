//! Tabular serving.
//!
//! Requests are turned into [`DataFrame`]s following the same rules pandas'
//! `DataFrame` constructor uses for JSON-like data, and results are rendered
//! back with one of the `to_dict` orientations.

use std::{fmt, str::FromStr};

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::{
    error::{PostProcessingError, PreProcessingError, PredictionError, ServingError},
    serving::ServingPipeline,
};

/// Top-level key marking a payload as several named frames.
pub const MULTI_DATAFRAME_KEY: &str = "multi_dataframe";

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("arrays must all be same length")]
    LengthMismatch,
    #[error("if using all scalar values, you must pass an index")]
    ScalarsWithoutIndex,
    #[error("mixing dicts with non-Series may lead to ambiguous ordering")]
    MixedColumns,
    #[error("rows must all be objects, arrays or scalars")]
    MixedRows,
    #[error("nested value in column {0} is not supported")]
    NestedCell(String),
    #[error("DataFrame constructor not properly called with {0}")]
    NotTabular(&'static str),
    #[error("DataFrame index must be unique for orient='index'")]
    DuplicateIndex,
    #[error("cannot convert non-finite float {0} to JSON")]
    NonFinite(f64),
    #[error("frame name {0} is reserved")]
    ReservedName(String),
    #[error("unknown orient {0}")]
    UnknownOrient(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn nan() -> Self {
        Scalar::Float(f64::NAN)
    }

    /// Null or NaN.
    pub fn is_missing(&self) -> bool {
        match self {
            Scalar::Null => true,
            Scalar::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    fn from_json(column: &str, value: Value) -> Result<Self, FrameError> {
        Ok(match value {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::Int(i),
                None => Scalar::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Scalar::Str(s),
            Value::Array(_) | Value::Object(_) => {
                return Err(FrameError::NestedCell(column.to_string()));
            }
        })
    }

    /// NaN becomes `null`; infinities have no JSON form.
    pub fn to_json(&self) -> Result<Value, FrameError> {
        Ok(match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::Number((*i).into()),
            Scalar::Float(f) if f.is_nan() => Value::Null,
            Scalar::Float(f) => {
                Value::Number(Number::from_f64(*f).ok_or(FrameError::NonFinite(*f))?)
            }
            Scalar::Str(s) => Value::String(s.clone()),
        })
    }

    fn label(&self) -> String {
        match self {
            Scalar::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

/// `to_dict` orientations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Orient {
    Dict,
    List,
    Series,
    Split,
    Records,
    #[default]
    Index,
}

impl FromStr for Orient {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dict" | "columns" => Ok(Orient::Dict),
            "list" => Ok(Orient::List),
            "series" => Ok(Orient::Series),
            "split" => Ok(Orient::Split),
            "records" => Ok(Orient::Records),
            "index" => Ok(Orient::Index),
            _ => Err(FrameError::UnknownOrient(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFrame {
    index: Vec<Scalar>,
    columns: IndexMap<String, Vec<Scalar>>,
}

impl DataFrame {
    /// Columns must be the same length; the index is `0..len`.
    pub fn from_columns<I, S>(columns: I) -> Result<Self, FrameError>
    where
        I: IntoIterator<Item = (S, Vec<Scalar>)>,
        S: Into<String>,
    {
        let columns: IndexMap<String, Vec<Scalar>> =
            columns.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let len = columns.values().next().map_or(0, Vec::len);
        if columns.values().any(|c| c.len() != len) {
            return Err(FrameError::LengthMismatch);
        }
        Ok(Self {
            index: range_index(len),
            columns,
        })
    }

    pub fn from_json(value: Value) -> Result<Self, FrameError> {
        match value {
            Value::Object(map) => Self::from_object(map),
            Value::Array(rows) => Self::from_rows(rows),
            Value::Null => Err(FrameError::NotTabular("null")),
            Value::Bool(_) => Err(FrameError::NotTabular("a boolean")),
            Value::Number(_) => Err(FrameError::NotTabular("a number")),
            Value::String(_) => Err(FrameError::NotTabular("a string")),
        }
    }

    fn from_object(map: Map<String, Value>) -> Result<Self, FrameError> {
        if map.is_empty() {
            return Ok(Self::default());
        }

        let has_arrays = map.values().any(Value::is_array);
        let has_objects = map.values().any(Value::is_object);

        if has_objects && has_arrays {
            return Err(FrameError::MixedColumns);
        }

        if has_objects {
            let mut labels: IndexSet<String> = IndexSet::new();
            for value in map.values() {
                if let Value::Object(inner) = value {
                    labels.extend(inner.keys().cloned());
                }
            }
            let mut columns = IndexMap::with_capacity(map.len());
            for (name, value) in map {
                let cells = match value {
                    Value::Object(inner) => {
                        let mut cells = vec![Scalar::nan(); labels.len()];
                        for (label, cell) in inner {
                            if let Some(pos) = labels.get_index_of(&label) {
                                cells[pos] = Scalar::from_json(&name, cell)?;
                            }
                        }
                        cells
                    }
                    scalar => vec![Scalar::from_json(&name, scalar)?; labels.len()],
                };
                columns.insert(name, cells);
            }
            return Ok(Self {
                index: labels.into_iter().map(Scalar::Str).collect(),
                columns,
            });
        }

        if has_arrays {
            let len = map
                .values()
                .filter_map(Value::as_array)
                .map(Vec::len)
                .next()
                .unwrap_or(0);
            let mut columns = IndexMap::with_capacity(map.len());
            for (name, value) in map {
                let cells = match value {
                    Value::Array(items) => {
                        if items.len() != len {
                            return Err(FrameError::LengthMismatch);
                        }
                        items
                            .into_iter()
                            .map(|cell| Scalar::from_json(&name, cell))
                            .collect::<Result<Vec<_>, _>>()?
                    }
                    scalar => vec![Scalar::from_json(&name, scalar)?; len],
                };
                columns.insert(name, cells);
            }
            return Ok(Self {
                index: range_index(len),
                columns,
            });
        }

        Err(FrameError::ScalarsWithoutIndex)
    }

    fn from_rows(rows: Vec<Value>) -> Result<Self, FrameError> {
        if rows.is_empty() {
            return Ok(Self::default());
        }
        let len = rows.len();

        if rows.iter().all(Value::is_object) {
            let mut columns: IndexMap<String, Vec<Scalar>> = IndexMap::new();
            for (pos, row) in rows.into_iter().enumerate() {
                let Value::Object(row) = row else { continue };
                for (name, cell) in row {
                    let cell = Scalar::from_json(&name, cell)?;
                    columns
                        .entry(name)
                        .or_insert_with(|| vec![Scalar::nan(); len])[pos] = cell;
                }
            }
            return Ok(Self {
                index: range_index(len),
                columns,
            });
        }

        if rows.iter().all(Value::is_array) {
            let width = rows
                .iter()
                .filter_map(Value::as_array)
                .map(Vec::len)
                .max()
                .unwrap_or(0);
            let mut columns: IndexMap<String, Vec<Scalar>> = (0..width)
                .map(|i| (i.to_string(), vec![Scalar::nan(); len]))
                .collect();
            for (pos, row) in rows.into_iter().enumerate() {
                let Value::Array(row) = row else { continue };
                for (i, cell) in row.into_iter().enumerate() {
                    let name = i.to_string();
                    let cell = Scalar::from_json(&name, cell)?;
                    if let Some(column) = columns.get_mut(&name) {
                        column[pos] = cell;
                    }
                }
            }
            return Ok(Self {
                index: range_index(len),
                columns,
            });
        }

        if rows.iter().any(|row| row.is_array() || row.is_object()) {
            return Err(FrameError::MixedRows);
        }
        let cells = rows
            .into_iter()
            .map(|cell| Scalar::from_json("0", cell))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_columns([("0", cells)])
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[Scalar] {
        &self.index
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn column(&self, name: &str) -> Option<&[Scalar]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Cells can be rewritten in place; the column keeps its length.
    pub fn column_mut(&mut self, name: &str) -> Option<&mut [Scalar]> {
        self.columns.get_mut(name).map(Vec::as_mut_slice)
    }

    /// Adds or replaces a column. Its length must match the index.
    pub fn insert_column(
        &mut self,
        name: impl Into<String>,
        cells: Vec<Scalar>,
    ) -> Result<(), FrameError> {
        if self.columns.is_empty() && self.index.is_empty() {
            self.index = range_index(cells.len());
        } else if cells.len() != self.index.len() {
            return Err(FrameError::LengthMismatch);
        }
        self.columns.insert(name.into(), cells);
        Ok(())
    }

    /// Fills missing numeric cells by linear interpolation over position.
    ///
    /// Gaps between two known values are always filled. Leading gaps are
    /// filled with the first known value for [`FillDirection::Backward`] and
    /// [`FillDirection::Both`]; trailing gaps with the last known value for
    /// [`FillDirection::Forward`] and [`FillDirection::Both`]. Columns holding
    /// anything other than numbers and missing cells are left alone.
    pub fn interpolate(&self, direction: FillDirection) -> DataFrame {
        let mut out = self.clone();
        for cells in out.columns.values_mut() {
            let numeric = cells
                .iter()
                .all(|c| c.is_missing() || c.as_f64().is_some());
            if !numeric {
                continue;
            }
            let known: Vec<(usize, f64)> = cells
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.as_f64().map(|v| (i, v)))
                .collect();
            let (Some(&(first, first_value)), Some(&(last, last_value))) =
                (known.first(), known.last())
            else {
                continue;
            };

            for pair in known.windows(2) {
                let (start, a) = pair[0];
                let (end, b) = pair[1];
                for (i, cell) in cells.iter_mut().enumerate().take(end).skip(start + 1) {
                    let t = (i - start) as f64 / (end - start) as f64;
                    *cell = Scalar::Float(a + (b - a) * t);
                }
            }
            if matches!(direction, FillDirection::Backward | FillDirection::Both) {
                for cell in cells.iter_mut().take(first) {
                    *cell = Scalar::Float(first_value);
                }
            }
            if matches!(direction, FillDirection::Forward | FillDirection::Both) {
                for cell in cells.iter_mut().skip(last + 1) {
                    *cell = Scalar::Float(last_value);
                }
            }
        }
        out
    }

    pub fn to_json(&self, orient: Orient) -> Result<Value, FrameError> {
        if self.columns.values().any(|cells| cells.len() != self.index.len()) {
            return Err(FrameError::LengthMismatch);
        }
        match orient {
            Orient::Dict => {
                let mut out = Map::with_capacity(self.columns.len());
                for (name, cells) in &self.columns {
                    let mut column = Map::with_capacity(cells.len());
                    for (label, cell) in self.index.iter().zip(cells) {
                        column.insert(label.label(), cell.to_json()?);
                    }
                    out.insert(name.clone(), Value::Object(column));
                }
                Ok(Value::Object(out))
            }
            Orient::List | Orient::Series => {
                let mut out = Map::with_capacity(self.columns.len());
                for (name, cells) in &self.columns {
                    let values = cells
                        .iter()
                        .map(Scalar::to_json)
                        .collect::<Result<Vec<_>, _>>()?;
                    out.insert(name.clone(), Value::Array(values));
                }
                Ok(Value::Object(out))
            }
            Orient::Split => {
                let index = self
                    .index
                    .iter()
                    .map(Scalar::to_json)
                    .collect::<Result<Vec<_>, _>>()?;
                let columns = self
                    .columns
                    .keys()
                    .map(|name| Value::String(name.clone()))
                    .collect();
                let data = (0..self.len())
                    .map(|row| {
                        self.columns
                            .values()
                            .map(|cells| cells[row].to_json())
                            .collect::<Result<Vec<_>, _>>()
                            .map(Value::Array)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let mut out = Map::new();
                out.insert("index".into(), Value::Array(index));
                out.insert("columns".into(), Value::Array(columns));
                out.insert("data".into(), Value::Array(data));
                Ok(Value::Object(out))
            }
            Orient::Records => {
                let records = (0..self.len())
                    .map(|row| self.row_json(row).map(Value::Object))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(records))
            }
            Orient::Index => {
                let mut out = Map::with_capacity(self.len());
                for (row, label) in self.index.iter().enumerate() {
                    let key = label.label();
                    if out.contains_key(&key) {
                        return Err(FrameError::DuplicateIndex);
                    }
                    out.insert(key, Value::Object(self.row_json(row)?));
                }
                Ok(Value::Object(out))
            }
        }
    }

    fn row_json(&self, row: usize) -> Result<Map<String, Value>, FrameError> {
        let mut out = Map::with_capacity(self.columns.len());
        for (name, cells) in &self.columns {
            out.insert(name.clone(), cells[row].to_json()?);
        }
        Ok(out)
    }
}

fn range_index(len: usize) -> Vec<Scalar> {
    (0..len as i64).map(Scalar::Int).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillDirection {
    Forward,
    Backward,
    Both,
}

/// One frame, or several named frames.
#[derive(Debug, Clone, PartialEq)]
pub enum Frames {
    Single(DataFrame),
    Multi(IndexMap<String, DataFrame>),
}

impl Frames {
    /// Applies `f` to every frame, keeping names.
    pub fn map(self, mut f: impl FnMut(DataFrame) -> DataFrame) -> Frames {
        match self {
            Frames::Single(frame) => Frames::Single(f(frame)),
            Frames::Multi(frames) => {
                Frames::Multi(frames.into_iter().map(|(k, v)| (k, f(v))).collect())
            }
        }
    }
}

/// Builds frames from a request payload. `multi_dataframe: true` makes every
/// other top-level key its own frame.
pub fn format_frames_input(data: Value) -> Result<Frames, ServingError> {
    frames_from_json(data).map_err(|err| {
        let detail = format!("Error reading in json: {err}");
        warn!("{detail}");
        ServingError::bad_request(detail)
    })
}

fn frames_from_json(data: Value) -> Result<Frames, FrameError> {
    let Value::Object(mut map) = data else {
        return DataFrame::from_json(data).map(Frames::Single);
    };
    if map.shift_remove(MULTI_DATAFRAME_KEY) == Some(Value::Bool(true)) {
        let frames = map
            .into_iter()
            .map(|(name, value)| DataFrame::from_json(value).map(|frame| (name, frame)))
            .collect::<Result<IndexMap<_, _>, _>>()?;
        Ok(Frames::Multi(frames))
    } else {
        DataFrame::from_json(Value::Object(map)).map(Frames::Single)
    }
}

/// Renders prediction results; several frames come back tagged with
/// `multi_dataframe: true`.
pub fn format_frames_output(results: Frames, orient: Orient) -> Result<Value, ServingError> {
    frames_to_json(results, orient).map_err(|err| {
        error!("Failed to format prediction results: {err}");
        ServingError::internal("Failed to format prediction results")
    })
}

fn frames_to_json(results: Frames, orient: Orient) -> Result<Value, FrameError> {
    match results {
        Frames::Single(frame) => frame.to_json(orient),
        Frames::Multi(frames) => {
            let mut out = Map::with_capacity(frames.len() + 1);
            for (name, frame) in frames {
                if name == MULTI_DATAFRAME_KEY {
                    return Err(FrameError::ReservedName(name));
                }
                out.insert(name, frame.to_json(orient)?);
            }
            out.insert(MULTI_DATAFRAME_KEY.to_string(), Value::Bool(true));
            Ok(Value::Object(out))
        }
    }
}

/// A model served on tabular data.
pub trait DataFrameModelServing: Send + Sync + 'static {
    /// Hook to load a model or models.
    fn load_model(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Must return a single frame or named frames.
    fn predict(&self, data: Frames) -> Result<Frames, PredictionError>;

    fn pre_process_input(&self, data: Frames) -> Result<Frames, PreProcessingError> {
        Ok(data)
    }

    fn post_process_results(&self, data: Frames) -> Result<Frames, PostProcessingError> {
        Ok(data)
    }
}

/// Adapts a [`DataFrameModelServing`] to the pipeline.
pub struct DataFrameServing<M> {
    model: M,
    orient: Orient,
}

impl<M> DataFrameServing<M> {
    pub fn new(model: M, orient: Orient) -> Self {
        Self { model, orient }
    }
}

impl<M: DataFrameModelServing> ServingPipeline for DataFrameServing<M> {
    type Input = Frames;
    type Output = Frames;

    fn load_model(&mut self) -> anyhow::Result<()> {
        self.model.load_model()
    }

    fn format_input(&self, data: Value) -> Result<Frames, ServingError> {
        format_frames_input(data)
    }

    fn pre_process_input(&self, data: Frames) -> Result<Frames, PreProcessingError> {
        self.model.pre_process_input(data)
    }

    fn predict(&self, data: Frames) -> Result<Frames, PredictionError> {
        self.model.predict(data)
    }

    fn post_process_results(&self, data: Frames) -> Result<Frames, PostProcessingError> {
        self.model.post_process_results(data)
    }

    fn format_output(&self, results: Frames) -> Result<Value, ServingError> {
        format_frames_output(results, self.orient)
    }
}

//! Channel-stacked extraction of a variable subset from one gridded dataset.

use super::source::{Field, GridSource};
use crate::error::{DataError, Result};
use ndarray::{concatenate, Array3, ArrayView2, Axis};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How much of a variable to take
#[derive(Debug, Clone, PartialEq)]
pub enum VariableSelector {
    /// The whole field when `true`, nothing when `false`
    WholeField(bool),
    /// Exactly these pressure levels, in this order
    Levels(Vec<f64>),
}

impl VariableSelector {
    fn to_json(&self) -> serde_json::Value {
        match self {
            VariableSelector::WholeField(include) => serde_json::Value::Bool(*include),
            VariableSelector::Levels(levels) => serde_json::Value::from(levels.clone()),
        }
    }

    fn from_json(value: serde_json::Value) -> std::result::Result<Self, String> {
        match value {
            serde_json::Value::Bool(include) => Ok(VariableSelector::WholeField(include)),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|v| v.as_f64().ok_or_else(|| format!("level {} is not a number", v)))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(VariableSelector::Levels),
            other => Err(format!("expected a boolean or a list of levels, got {}", other)),
        }
    }
}

/// Ordered mapping from variable name to selector.
///
/// Declaration order fixes output channel order: the channels of an extraction
/// are the entries flattened in order, one channel per requested level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSubset {
    entries: Vec<(String, VariableSelector)>,
}

impl VariableSubset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the whole field of `name`
    pub fn whole(mut self, name: impl Into<String>) -> Self {
        self.insert(name, VariableSelector::WholeField(true));
        self
    }

    /// Select `levels` of `name`
    pub fn levels(mut self, name: impl Into<String>, levels: &[f64]) -> Self {
        self.insert(name, VariableSelector::Levels(levels.to_vec()));
        self
    }

    /// Insert or replace an entry. Replacing keeps the original position.
    pub fn insert(&mut self, name: impl Into<String>, selector: VariableSelector) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = selector,
            None => self.entries.push((name, selector)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariableSelector)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of output channels, when every whole-field entry is a single level.
    ///
    /// Whole-field selections of leveled fields contribute one channel per file
    /// level, which is only known once a file is opened.
    pub fn channel_count(&self) -> usize {
        self.entries
            .iter()
            .map(|(_, s)| match s {
                VariableSelector::WholeField(true) => 1,
                VariableSelector::WholeField(false) => 0,
                VariableSelector::Levels(levels) => levels.len(),
            })
            .sum()
    }

    /// Human-readable channel names, e.g. `absvprs@900`, `capesfc`
    pub fn channel_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (name, selector) in &self.entries {
            match selector {
                VariableSelector::WholeField(true) => names.push(name.clone()),
                VariableSelector::WholeField(false) => {}
                VariableSelector::Levels(levels) => {
                    names.extend(levels.iter().map(|l| format!("{}@{}", name, l)))
                }
            }
        }
        names
    }
}

impl Serialize for VariableSubset {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, selector) in &self.entries {
            map.serialize_entry(name, &selector.to_json())?;
        }
        map.end()
    }
}

struct SubsetVisitor;

impl<'de> Visitor<'de> for SubsetVisitor {
    type Value = VariableSubset;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map from variable name to a boolean or a list of levels")
    }

    // Entries are visited in document order, independent of any map type.
    fn visit_map<A: MapAccess<'de>>(
        self,
        mut access: A,
    ) -> std::result::Result<Self::Value, A::Error> {
        let mut subset = VariableSubset::new();
        while let Some((name, value)) = access.next_entry::<String, serde_json::Value>()? {
            let selector = VariableSelector::from_json(value)
                .map_err(|e| de::Error::custom(format!("variable '{}': {}", name, e)))?;
            subset.insert(name, selector);
        }
        Ok(subset)
    }
}

impl<'de> Deserialize<'de> for VariableSubset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(SubsetVisitor)
    }
}

/// Extract `subset` from `source` as one `[lat, lon, channel]` array.
///
/// Channels appear in subset declaration order. A requested level missing from a
/// field is an error naming the variable and level; nothing is silently dropped.
pub fn extract<S: GridSource + ?Sized>(source: &S, subset: &VariableSubset) -> Result<Array3<f32>> {
    let mut slices: Vec<Array3<f32>> = Vec::new();

    for (name, selector) in subset.iter() {
        match selector {
            VariableSelector::WholeField(false) => continue,
            VariableSelector::WholeField(true) => match source.field(name)? {
                Field::Surface(values) => slices.push(values.insert_axis(Axis(0))),
                Field::Leveled { values, .. } => slices.push(values),
            },
            VariableSelector::Levels(levels) => {
                let field = source.field(name)?;
                for &level in levels {
                    let slice: ArrayView2<f32> =
                        field.level(level).ok_or_else(|| DataError::MissingLevel {
                            variable: name.to_string(),
                            level,
                            available: field.levels().to_vec(),
                        })?;
                    slices.push(slice.to_owned().insert_axis(Axis(0)));
                }
            }
        }
        log::trace!("extracted variable {}", name);
    }

    let Some(first) = slices.first() else {
        return Err(DataError::Config("variable subset selects no channels".to_string()));
    };
    let grid = first.shape()[1..].to_vec();
    if let Some(other) = slices.iter().find(|s| s.shape()[1..] != grid[..]) {
        return Err(DataError::ShapeMismatch {
            expected: grid,
            actual: other.shape()[1..].to_vec(),
        });
    }

    let views: Vec<_> = slices.iter().map(|s| s.view()).collect();
    let stacked = concatenate(Axis(0), &views)
        .map_err(|e| DataError::Config(format!("failed to stack channels: {}", e)))?;

    // [channel, lat, lon] -> [lat, lon, channel]
    Ok(stacked.permuted_axes([1, 2, 0]).as_standard_layout().into_owned())
}

//! Conflict-resolution policies for mergeable attributes
//!
//! A strategy combines the value held by the older record with the value
//! held by the newer one. `None` means the attribute is not set.

use super::value::AttrValue;
use std::cmp::Ordering;
use std::sync::Arc;

/// Signature of a user-supplied merge callback: `(old, new, attribute_name)`.
pub type MergeFn =
    dyn Fn(Option<&AttrValue>, Option<&AttrValue>, &str) -> Option<AttrValue> + Send + Sync;

/// Something a strategy noticed while combining two values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeNote {
    /// A value could not be evaluated as a boolean and was treated as true
    UncoercibleBoolean,
    /// An ordering strategy saw a non-numeric value and kept the newer one
    NonNumeric,
}

/// How two values of the same mergeable attribute are combined
#[derive(Clone, Default)]
pub enum MergeStrategy {
    /// Containers are combined, scalars are overwritten by the newer value
    #[default]
    Default,
    KeepNewer,
    KeepOlder,
    KeepGreater,
    KeepLesser,
    /// Prefer values that evaluate to true, otherwise behave like `KeepNewer`
    KeepTrue,
    /// Prefer values that evaluate to false, otherwise behave like `KeepNewer`
    KeepFalse,
    Custom(Arc<MergeFn>),
}

impl MergeStrategy {
    /// Wrap a callback as a custom strategy
    pub fn custom<F>(callback: F) -> Self
    where
        F: Fn(Option<&AttrValue>, Option<&AttrValue>, &str) -> Option<AttrValue>
            + Send
            + Sync
            + 'static,
    {
        Self::Custom(Arc::new(callback))
    }

    /// Short name used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::KeepNewer => "keep_newer",
            Self::KeepOlder => "keep_older",
            Self::KeepGreater => "keep_greater",
            Self::KeepLesser => "keep_lesser",
            Self::KeepTrue => "keep_true",
            Self::KeepFalse => "keep_false",
            Self::Custom(_) => "custom",
        }
    }

    /// Combine the old and new values of `field`.
    pub fn combine(
        &self,
        field: &str,
        old: Option<&AttrValue>,
        new: Option<&AttrValue>,
        notes: &mut Vec<MergeNote>,
    ) -> Option<AttrValue> {
        match self {
            Self::Default => combine_default(old, new),
            Self::KeepNewer => new.or(old).cloned(),
            Self::KeepOlder => old.or(new).cloned(),
            Self::KeepGreater => keep_ordered(old, new, Ordering::Greater, notes),
            Self::KeepLesser => keep_ordered(old, new, Ordering::Less, notes),
            Self::KeepTrue => keep_truth(old, new, true, notes),
            Self::KeepFalse => keep_truth(old, new, false, notes),
            Self::Custom(callback) => callback(old, new, field),
        }
    }
}

impl std::fmt::Debug for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MergeStrategy::{}", self.name())
    }
}

fn combine_default(old: Option<&AttrValue>, new: Option<&AttrValue>) -> Option<AttrValue> {
    let Some(new) = new else {
        return old.cloned();
    };
    let Some(old) = old else {
        return Some(new.clone());
    };
    let merged = match (old, new) {
        (AttrValue::Set(a), AttrValue::Set(b)) => AttrValue::Set(a.union(b).cloned().collect()),
        (AttrValue::Map(a), AttrValue::Map(b)) => {
            let mut merged = a.clone();
            merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            AttrValue::Map(merged)
        }
        (AttrValue::List(a), AttrValue::List(b)) => {
            AttrValue::List(a.iter().chain(b.iter()).cloned().collect())
        }
        _ => new.clone(),
    };
    Some(merged)
}

fn keep_ordered(
    old: Option<&AttrValue>,
    new: Option<&AttrValue>,
    prefer: Ordering,
    notes: &mut Vec<MergeNote>,
) -> Option<AttrValue> {
    let (old_value, new_value) = match (old, new) {
        (Some(o), Some(n)) => (o, n),
        (o, n) => return n.or(o).cloned(),
    };
    match (old_value.as_f64(), new_value.as_f64()) {
        (Some(a), Some(b)) => {
            if a.partial_cmp(&b) == Some(prefer) {
                Some(old_value.clone())
            } else {
                Some(new_value.clone())
            }
        }
        _ => {
            notes.push(MergeNote::NonNumeric);
            Some(new_value.clone())
        }
    }
}

fn truth_of(value: Option<&AttrValue>, notes: &mut Vec<MergeNote>) -> Option<bool> {
    let value = value?;
    match value.truthiness() {
        Some(b) => Some(b),
        None => {
            notes.push(MergeNote::UncoercibleBoolean);
            Some(true)
        }
    }
}

fn keep_truth(
    old: Option<&AttrValue>,
    new: Option<&AttrValue>,
    prefer: bool,
    notes: &mut Vec<MergeNote>,
) -> Option<AttrValue> {
    let old_bool = truth_of(old, notes);
    let new_bool = truth_of(new, notes);

    let keep_new = match (old_bool, new_bool) {
        (a, b) if a == b => true,
        (None, _) => true,
        (_, None) => false,
        (_, Some(b)) => b == prefer,
    };
    if keep_new {
        new.cloned()
    } else {
        old.cloned()
    }
}

//! Shape-preserving trees of requirement nodes.
//!
//! Requirements, resolved requirement values, and in-flight futures all share
//! one structure: an arbitrarily nested arrangement of lists, tuples and maps
//! with interesting values at the leaves. [`Tree`] is that structure, and the
//! `map`/`try_map` family is the resolver every backend plugs its own leaf
//! transform into — replace each leaf, keep the shape, pass plain data
//! through untouched.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ShapeError;

/// A nested container shape with `T` at the leaves.
///
/// `Scalar` nodes carry plain data that is not subject to resolution; they
/// survive every transform unchanged. Map keys and sequence order are
/// preserved by all operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Tree<T> {
    /// No requirements at all.
    Empty,
    /// A node subject to resolution.
    Leaf(T),
    /// Plain data, passed through unchanged by every transform.
    Scalar(Value),
    List(Vec<Tree<T>>),
    Tuple(Vec<Tree<T>>),
    Map(BTreeMap<String, Tree<T>>),
}

impl<T> Tree<T> {
    pub fn leaf(value: T) -> Self {
        Tree::Leaf(value)
    }

    pub fn scalar(value: impl Into<Value>) -> Self {
        Tree::Scalar(value.into())
    }

    pub fn list(items: impl IntoIterator<Item = Tree<T>>) -> Self {
        Tree::List(items.into_iter().collect())
    }

    pub fn tuple(items: impl IntoIterator<Item = Tree<T>>) -> Self {
        Tree::Tuple(items.into_iter().collect())
    }

    pub fn mapping(entries: impl IntoIterator<Item = (String, Tree<T>)>) -> Self {
        Tree::Map(entries.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Tree::Empty)
    }

    /// Number of leaves in the tree.
    pub fn len(&self) -> usize {
        self.fold(0, &mut |_, acc| acc + 1)
    }

    pub(crate) fn variant(&self) -> &'static str {
        match self {
            Tree::Empty => "nothing",
            Tree::Leaf(_) => "a single node",
            Tree::Scalar(_) => "a scalar",
            Tree::List(_) => "a list",
            Tree::Tuple(_) => "a tuple",
            Tree::Map(_) => "a map",
        }
    }

    /// Replace every leaf with `f(leaf)`, preserving shape.
    pub fn map<U, F>(self, f: &mut F) -> Tree<U>
    where
        F: FnMut(T) -> U,
    {
        match self {
            Tree::Empty => Tree::Empty,
            Tree::Leaf(value) => Tree::Leaf(f(value)),
            Tree::Scalar(value) => Tree::Scalar(value),
            Tree::List(items) => Tree::List(items.into_iter().map(|x| x.map(f)).collect()),
            Tree::Tuple(items) => Tree::Tuple(items.into_iter().map(|x| x.map(f)).collect()),
            Tree::Map(entries) => Tree::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, v.map(f)))
                    .collect(),
            ),
        }
    }

    /// Fallible [`Tree::map`]. Stops at the first failed leaf.
    pub fn try_map<U, E, F>(self, f: &mut F) -> Result<Tree<U>, E>
    where
        F: FnMut(T) -> Result<U, E>,
    {
        Ok(match self {
            Tree::Empty => Tree::Empty,
            Tree::Leaf(value) => Tree::Leaf(f(value)?),
            Tree::Scalar(value) => Tree::Scalar(value),
            Tree::List(items) => Tree::List(
                items
                    .into_iter()
                    .map(|x| x.try_map(f))
                    .collect::<Result<_, E>>()?,
            ),
            Tree::Tuple(items) => Tree::Tuple(
                items
                    .into_iter()
                    .map(|x| x.try_map(f))
                    .collect::<Result<_, E>>()?,
            ),
            Tree::Map(entries) => Tree::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((k, v.try_map(f)?)))
                    .collect::<Result<_, E>>()?,
            ),
        })
    }

    /// Borrowing variant of [`Tree::try_map`].
    pub fn try_map_ref<'a, U, E, F>(&'a self, f: &mut F) -> Result<Tree<U>, E>
    where
        F: FnMut(&'a T) -> Result<U, E>,
    {
        Ok(match self {
            Tree::Empty => Tree::Empty,
            Tree::Leaf(value) => Tree::Leaf(f(value)?),
            Tree::Scalar(value) => Tree::Scalar(value.clone()),
            Tree::List(items) => Tree::List(
                items
                    .iter()
                    .map(|x| x.try_map_ref(f))
                    .collect::<Result<_, E>>()?,
            ),
            Tree::Tuple(items) => Tree::Tuple(
                items
                    .iter()
                    .map(|x| x.try_map_ref(f))
                    .collect::<Result<_, E>>()?,
            ),
            Tree::Map(entries) => Tree::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.try_map_ref(f)?)))
                    .collect::<Result<_, E>>()?,
            ),
        })
    }

    /// Visit every leaf in deterministic order.
    pub fn for_each<F>(&self, f: &mut F)
    where
        F: FnMut(&T),
    {
        match self {
            Tree::Empty | Tree::Scalar(_) => {}
            Tree::Leaf(value) => f(value),
            Tree::List(items) | Tree::Tuple(items) => {
                for item in items {
                    item.for_each(f);
                }
            }
            Tree::Map(entries) => {
                for value in entries.values() {
                    value.for_each(f);
                }
            }
        }
    }

    /// Fold over every leaf in deterministic order.
    pub fn fold<'a, A, F>(&'a self, acc: A, f: &mut F) -> A
    where
        F: FnMut(&'a T, A) -> A,
    {
        match self {
            Tree::Empty | Tree::Scalar(_) => acc,
            Tree::Leaf(value) => f(value, acc),
            Tree::List(items) | Tree::Tuple(items) => items
                .iter()
                .fold(acc, |acc, item| item.fold(acc, f)),
            Tree::Map(entries) => entries
                .values()
                .fold(acc, |acc, value| value.fold(acc, f)),
        }
    }

    /// All leaves, in the same order `for_each` visits them.
    pub fn leaves(&self) -> Vec<&T> {
        self.fold(Vec::new(), &mut |leaf, mut acc| {
            acc.push(leaf);
            acc
        })
    }

    /// Direct subtree of a `Map` node.
    pub fn get(&self, key: &str) -> Option<&Tree<T>> {
        match self {
            Tree::Map(entries) => entries.get(key),
            _ => None,
        }
    }
}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Tree::Empty
    }
}

impl<T> FromIterator<Tree<T>> for Tree<T> {
    fn from_iter<I: IntoIterator<Item = Tree<T>>>(iter: I) -> Self {
        Tree::List(iter.into_iter().collect())
    }
}

impl Tree<Value> {
    /// Collapse a fully resolved tree into one value. Lists and tuples become
    /// arrays, maps become objects, `Empty` becomes null.
    pub fn into_value(self) -> Value {
        match self {
            Tree::Empty => Value::Null,
            Tree::Leaf(value) | Tree::Scalar(value) => value,
            Tree::List(items) | Tree::Tuple(items) => {
                Value::Array(items.into_iter().map(Tree::into_value).collect())
            }
            Tree::Map(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, v.into_value()))
                    .collect(),
            ),
        }
    }

    /// The declared shape was a single requirement.
    pub fn single(&self) -> Result<&Value, ShapeError> {
        match self {
            Tree::Leaf(value) | Tree::Scalar(value) => Ok(value),
            other => Err(ShapeError::ExpectedSingle {
                found: other.variant(),
            }),
        }
    }

    /// The declared shape was a flat sequence of requirements.
    pub fn values(&self) -> Result<Vec<&Value>, ShapeError> {
        match self {
            Tree::List(items) | Tree::Tuple(items) => items
                .iter()
                .map(|item| {
                    item.single().map_err(|_| ShapeError::ExpectedList {
                        found: item.variant(),
                    })
                })
                .collect(),
            other => Err(ShapeError::ExpectedList {
                found: other.variant(),
            }),
        }
    }

    /// The declared shape was a named map; fetch one entry.
    pub fn named(&self, key: &str) -> Result<&Value, ShapeError> {
        match self {
            Tree::Map(entries) => entries
                .get(key)
                .ok_or_else(|| ShapeError::MissingKey(key.to_string()))?
                .single(),
            other => Err(ShapeError::ExpectedMap {
                found: other.variant(),
            }),
        }
    }
}

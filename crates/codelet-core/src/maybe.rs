//! Null-safe optional values.
//!
//! `Maybe<T>` is an optional container that refuses to hold values that are
//! empty by convention: constructing one from a blank string (or from an
//! absent `Option`) yields the absent state. Lookups that might not find
//! anything return `Maybe` instead of a sentinel.

use std::borrow::{Borrow, Cow};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::rc::Rc;
use std::sync::Arc;

/// Decides whether a value carries content or is empty by convention.
///
/// Strings are empty when blank or whitespace-only; scalar types always have
/// content.
pub trait HasContent {
    /// Returns `true` if the value is worth wrapping in a present `Maybe`.
    fn has_content(&self) -> bool;
}

impl HasContent for str {
    fn has_content(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl HasContent for String {
    fn has_content(&self) -> bool {
        self.as_str().has_content()
    }
}

impl HasContent for Cow<'_, str> {
    fn has_content(&self) -> bool {
        self.as_ref().has_content()
    }
}

impl<T: HasContent + ?Sized> HasContent for &T {
    fn has_content(&self) -> bool {
        (**self).has_content()
    }
}

impl<T: HasContent + ?Sized> HasContent for Box<T> {
    fn has_content(&self) -> bool {
        (**self).has_content()
    }
}

impl<T: HasContent + ?Sized> HasContent for Rc<T> {
    fn has_content(&self) -> bool {
        (**self).has_content()
    }
}

impl<T: HasContent + ?Sized> HasContent for Arc<T> {
    fn has_content(&self) -> bool {
        (**self).has_content()
    }
}

impl<T: HasContent> HasContent for Option<T> {
    fn has_content(&self) -> bool {
        self.as_ref().is_some_and(HasContent::has_content)
    }
}

impl<T> HasContent for Vec<T> {
    fn has_content(&self) -> bool {
        true
    }
}

macro_rules! always_has_content {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HasContent for $ty {
                fn has_content(&self) -> bool {
                    true
                }
            }
        )*
    };
}

always_has_content!(
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    std::time::Duration,
    uuid::Uuid,
    chrono::DateTime<chrono::Utc>,
);

/// An optional value that never wraps an empty-by-convention value.
///
/// Two instances are equal when both are absent, or both are present with
/// equal values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Maybe<T>(Option<T>);

impl<T> Maybe<T> {
    /// Wraps `value`, or returns the absent state if it has no content.
    pub fn of(value: T) -> Self
    where
        T: HasContent,
    {
        if value.has_content() {
            Self(Some(value))
        } else {
            Self(None)
        }
    }

    /// The absent value.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    /// Returns `true` if a value is present.
    #[must_use]
    pub const fn has_value(&self) -> bool {
        self.0.is_some()
    }

    /// Returns `true` if no value is present.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Borrows the value, if present.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    /// Converts `&Maybe<T>` into `Maybe<&T>`.
    #[must_use]
    pub fn as_ref(&self) -> Maybe<&T> {
        Maybe(self.0.as_ref())
    }

    /// Returns the value or `default`.
    pub fn get_or(self, default: T) -> T {
        self.0.unwrap_or(default)
    }

    /// Returns the value or invokes `default_factory`.
    pub fn get_or_else(self, default_factory: impl FnOnce() -> T) -> T {
        self.0.unwrap_or_else(default_factory)
    }

    /// Returns the value, or the error built by `error_factory`.
    ///
    /// # Errors
    ///
    /// Returns the constructed error when the value is absent.
    pub fn get_or_throw<E>(self, error_factory: impl FnOnce() -> E) -> Result<T, E> {
        self.0.ok_or_else(error_factory)
    }

    /// Projects the value; a projection without content becomes absent.
    pub fn map<U: HasContent>(self, selector: impl FnOnce(T) -> U) -> Maybe<U> {
        self.and_then(|value| Maybe::of(selector(value)))
    }

    /// Projects the value into another `Maybe`.
    pub fn and_then<U>(self, selector: impl FnOnce(T) -> Maybe<U>) -> Maybe<U> {
        match self.0 {
            Some(value) => selector(value),
            None => Maybe(None),
        }
    }

    /// Keeps the value only if `predicate` holds.
    #[must_use]
    pub fn filter(self, predicate: impl FnOnce(&T) -> bool) -> Self {
        Self(self.0.filter(predicate))
    }

    /// Returns `self` if present, otherwise the result of `alternative`.
    #[must_use]
    pub fn or_else(self, alternative: impl FnOnce() -> Self) -> Self {
        if self.has_value() { self } else { alternative() }
    }

    /// Converts into a standard `Option`.
    pub fn into_option(self) -> Option<T> {
        self.0
    }
}

impl<T> Maybe<Maybe<T>> {
    /// Removes one level of nesting.
    pub fn flatten(self) -> Maybe<T> {
        self.0.unwrap_or(Maybe(None))
    }
}

impl Maybe<bool> {
    /// Returns the value, or `true` when absent.
    #[must_use]
    pub fn or_true(self) -> bool {
        self.get_or(true)
    }

    /// Returns the value, or `false` when absent.
    #[must_use]
    pub fn or_false(self) -> bool {
        self.get_or(false)
    }
}

impl Maybe<String> {
    /// Returns the value, or an empty string when absent.
    #[must_use]
    pub fn or_empty(self) -> String {
        self.get_or_else(String::new)
    }
}

impl<T> Default for Maybe<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T: fmt::Debug> fmt::Debug for Maybe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str("None"),
        }
    }
}

impl<T: HasContent> From<Option<T>> for Maybe<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self(None), Self::of)
    }
}

impl<T> From<Maybe<T>> for Option<T> {
    fn from(value: Maybe<T>) -> Self {
        value.0
    }
}

impl<T> IntoIterator for Maybe<T> {
    type Item = T;
    type IntoIter = std::option::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// `Maybe`-returning element lookups over any iterator.
pub trait MaybeIteratorExt: Iterator + Sized
where
    Self::Item: HasContent,
{
    /// The first element, if any.
    fn first_or_none(mut self) -> Maybe<Self::Item> {
        self.next().map_or_else(Maybe::none, Maybe::of)
    }

    /// The first element matching `predicate`, if any.
    fn first_or_none_by(mut self, predicate: impl FnMut(&Self::Item) -> bool) -> Maybe<Self::Item> {
        self.find(predicate).map_or_else(Maybe::none, Maybe::of)
    }

    /// The last element, if any.
    fn last_or_none(self) -> Maybe<Self::Item> {
        self.last().map_or_else(Maybe::none, Maybe::of)
    }

    /// The last element matching `predicate`, if any.
    fn last_or_none_by(self, predicate: impl FnMut(&Self::Item) -> bool) -> Maybe<Self::Item> {
        self.filter(predicate).last().map_or_else(Maybe::none, Maybe::of)
    }

    /// The only element; absent when there are zero or several.
    fn single_or_none(mut self) -> Maybe<Self::Item> {
        match (self.next(), self.next()) {
            (Some(only), None) => Maybe::of(only),
            _ => Maybe::none(),
        }
    }

    /// The element at `index`, if the iterator is long enough.
    fn element_at_or_none(mut self, index: usize) -> Maybe<Self::Item> {
        self.nth(index).map_or_else(Maybe::none, Maybe::of)
    }
}

impl<I> MaybeIteratorExt for I
where
    I: Iterator,
    I::Item: HasContent,
{
}

/// `Maybe`-returning lookups on maps.
pub trait MaybeMapExt<K, V> {
    /// Returns a copy of the value stored under `key`, if any.
    fn get_maybe<Q>(&self, key: &Q) -> Maybe<V>
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized;
}

impl<K, V, S> MaybeMapExt<K, V> for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: Clone + HasContent,
    S: BuildHasher,
{
    fn get_maybe<Q>(&self, key: &Q) -> Maybe<V>
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        self.get(key).cloned().into()
    }
}

impl<K, V> MaybeMapExt<K, V> for BTreeMap<K, V>
where
    K: Ord,
    V: Clone + HasContent,
{
    fn get_maybe<Q>(&self, key: &Q) -> Maybe<V>
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        self.get(key).cloned().into()
    }
}

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::trace;

use crate::accessor::Accessor;
use crate::error::Error;
use crate::filter::Filter;

/// Accessor adding per-variable filter chains on top of another accessor.
///
/// Raw access through the [`Accessor`] impl passes straight through. Filtered
/// values come from [`FilteredAccessor::read_filtered`], which folds the
/// chain of `name` over its raw value.
///
/// A cached accessor memoizes filtered values per name. Writing or discarding
/// a name invalidates its entry, and filters can no longer be attached to a
/// name once its value is cached.
pub struct FilteredAccessor<A> {
    inner: A,
    filters: BTreeMap<String, Vec<Box<dyn Filter>>>,
    cache: Option<HashMap<String, Value>>,
}

impl<A: Accessor> FilteredAccessor<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            filters: BTreeMap::new(),
            cache: None,
        }
    }

    pub fn cached(inner: A) -> Self {
        Self {
            cache: Some(HashMap::new()),
            ..Self::new(inner)
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn into_inner(self) -> A {
        self.inner
    }

    /// Append `filter` to the chain of `name`.
    pub fn add_filter(&mut self, name: &str, filter: Box<dyn Filter>) -> Result<(), Error> {
        if self
            .cache
            .as_ref()
            .is_some_and(|cache| cache.contains_key(name))
        {
            return Err(Error::FilterAfterCache {
                name: name.to_owned(),
            });
        }

        self.filters.entry(name.to_owned()).or_default().push(filter);
        Ok(())
    }

    pub fn has_filters(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn has_eager_filters(&self, name: &str) -> bool {
        self.filters
            .get(name)
            .is_some_and(|chain| chain.iter().any(|filter| !filter.is_lazy()))
    }

    /// Names with at least one eager filter, sorted.
    pub fn eager_names(&self) -> Vec<String> {
        self.filters
            .keys()
            .filter(|name| self.has_eager_filters(name))
            .cloned()
            .collect()
    }

    /// The raw value of `name` run through its filter chain.
    ///
    /// Absent variables enter the chain as [`Value::Null`]. Without filters
    /// the raw value is returned as is.
    pub fn read_filtered(&mut self, name: &str) -> Result<Value, Error> {
        if let Some(value) = self.cache.as_ref().and_then(|cache| cache.get(name)) {
            return Ok(value.clone());
        }

        if !self.has_filters(name) {
            return Ok(self.raw_value(name));
        }

        let value = self.apply(name)?;
        if let Some(cache) = &mut self.cache {
            cache.insert(name.to_owned(), value.clone());
        }
        Ok(value)
    }

    /// Run the chain of `name` without caching the result.
    ///
    /// Used for eager validation, which must not keep later filters from
    /// being attached.
    pub fn validate(&self, name: &str) -> Result<(), Error> {
        if self
            .cache
            .as_ref()
            .is_some_and(|cache| cache.contains_key(name))
        {
            return Ok(());
        }
        self.apply(name).map(|_| ())
    }

    fn raw_value(&self, name: &str) -> Value {
        self.inner.read(name).map_or(Value::Null, Value::String)
    }

    fn apply(&self, name: &str) -> Result<Value, Error> {
        let raw = self.raw_value(name);
        let Some(chain) = self.filters.get(name) else {
            return Ok(raw);
        };

        chain
            .iter()
            .try_fold(raw, |value, filter| filter.filter(value))
            .map_err(|err| err.for_variable(name))
    }

    fn invalidate(&mut self, name: &str) {
        if let Some(cache) = &mut self.cache
            && cache.remove(name).is_some()
        {
            trace!(name, "filtered value invalidated");
        }
    }
}

impl<A: Accessor> Accessor for FilteredAccessor<A> {
    fn read(&self, name: &str) -> Option<String> {
        self.inner.read(name)
    }

    fn write(&mut self, name: &str, value: Option<&str>) -> Result<String, Error> {
        let name = self.inner.write(name, value)?;
        self.invalidate(&name);
        Ok(name)
    }

    fn discard(&mut self, name: &str) -> Result<String, Error> {
        let name = self.inner.discard(name)?;
        self.invalidate(&name);
        Ok(name)
    }
}

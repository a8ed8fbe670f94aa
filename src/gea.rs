use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::accessor::{Accessor, MemoryAccessor, ProcessAccessor, ReadOnlyAccessor};
use crate::error::Error;
use crate::filter::{Filter, FilterFactory, FilterSpec};
use crate::filtered::FilteredAccessor;
use crate::loader::{Loader, NestedLoader, NoopLoader};
use crate::parser::FileParser;

/// Immutable environment: loads a `.env` file on first use and serves
/// filtered values.
///
/// Every variable is write-once. Loaded variables cannot be rewritten through
/// [`Gea::write`] until they are discarded or hard-flushed.
pub struct Gea {
    accessor: FilteredAccessor<Box<dyn Accessor>>,
    loader: Box<dyn Loader>,
    filters: FilterFactory,
    hold_names: bool,
    read_only: bool,
    names: Vec<String>,
}

impl Gea {
    pub fn builder() -> GeaBuilder {
        GeaBuilder::new()
    }

    /// Load `dir/.env` into the process environment.
    ///
    /// # Safety
    ///
    /// See [`ProcessAccessor::new`].
    pub unsafe fn instance(dir: impl AsRef<Path>) -> Result<Self, Error> {
        unsafe { Self::builder().process() }.dir(dir).build()
    }

    /// Process environment without a file.
    ///
    /// # Safety
    ///
    /// See [`ProcessAccessor::new`].
    pub unsafe fn no_loader() -> Self {
        unsafe { Self::builder().process() }.assemble(Box::new(NoopLoader))
    }

    /// Read-only view of the process environment, without a file.
    pub fn read_only() -> Self {
        Self::builder()
            .accessor(ProcessAccessor::read_only())
            .read_only(true)
            .assemble(Box::new(NoopLoader))
    }

    /// Load the variables, returning their names in write order.
    ///
    /// Eager filters of every filtered variable run afterwards, so a missing
    /// required variable fails here rather than at first read.
    pub fn load(&mut self) -> Result<Vec<String>, Error> {
        let names = self.loader.load(&mut self.accessor)?;
        if self.hold_names {
            self.names = names.clone();
        }

        for name in self.accessor.eager_names() {
            trace!(name = %name, "evaluating eager filters");
            self.accessor.validate(&name)?;
        }
        Ok(names)
    }

    pub fn loaded(&self) -> bool {
        self.loader.loaded()
    }

    fn ensure_loaded(&mut self) -> Result<(), Error> {
        if !self.loader.loaded() {
            self.load()?;
        }
        Ok(())
    }

    /// Filtered value of `name`; [`Value::Null`] when it is not set and no
    /// filter says otherwise.
    pub fn read(&mut self, name: &str) -> Result<Value, Error> {
        self.ensure_loaded()?;
        self.accessor.read_filtered(name)
    }

    /// Raw value of `name`, bypassing filters.
    pub fn read_str(&mut self, name: &str) -> Result<Option<String>, Error> {
        self.ensure_loaded()?;
        Ok(self.accessor.read(name))
    }

    /// Filtered value of `name` deserialized into `T`.
    pub fn read_as<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, Error> {
        let value = self.read(name)?;
        serde_json::from_value(value).map_err(|err| Error::Filter {
            name: name.to_owned(),
            message: format!("can't be converted: {err}"),
        })
    }

    pub fn contains(&mut self, name: &str) -> Result<bool, Error> {
        Ok(!self.read(name)?.is_null())
    }

    pub fn write(&mut self, name: &str, value: &str) -> Result<String, Error> {
        if self.read_only {
            return Err(Error::ReadOnly {
                name: name.to_owned(),
                action: "write",
            });
        }
        if self.names.iter().any(|held| held == name) {
            return Err(Error::Overwrite {
                name: name.to_owned(),
            });
        }

        let name = self.accessor.write(name, Some(value))?;
        if self.hold_names {
            self.names.push(name.clone());
        }
        Ok(name)
    }

    /// Remove `name` and return the value it had.
    pub fn discard(&mut self, name: &str) -> Result<Option<String>, Error> {
        if self.read_only {
            return Err(Error::ReadOnly {
                name: name.to_owned(),
                action: "discard",
            });
        }
        self.ensure_loaded()?;

        let previous = self.accessor.read(name);
        if previous.is_some() {
            self.accessor.discard(name)?;
        }
        self.names.retain(|held| held != name);
        Ok(previous)
    }

    /// Attach the filter registered as `spec.id`.
    pub fn add_filter(
        &mut self,
        name: &str,
        spec: impl Into<FilterSpec>,
    ) -> Result<&mut Self, Error> {
        self.add_filters(name, [spec])
    }

    /// Attach several registered filters; they run in the given order.
    pub fn add_filters<I, S>(&mut self, name: &str, specs: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<FilterSpec>,
    {
        let filters = specs
            .into_iter()
            .map(|spec| self.filters.create(&spec.into()))
            .collect::<Result<Vec<_>, Error>>()?;
        for filter in filters {
            self.accessor.add_filter(name, filter)?;
        }
        self.evaluate_eager(name)?;
        Ok(self)
    }

    /// Attach a filter instance, e.g. a [`CallbackFilter`](crate::CallbackFilter).
    pub fn add_filter_instance(
        &mut self,
        name: &str,
        filter: impl Filter + 'static,
    ) -> Result<&mut Self, Error> {
        self.accessor.add_filter(name, Box::new(filter))?;
        self.evaluate_eager(name)?;
        Ok(self)
    }

    fn evaluate_eager(&mut self, name: &str) -> Result<(), Error> {
        if self.loader.loaded() && self.accessor.has_eager_filters(name) {
            trace!(name, "evaluating eager filters");
            self.accessor.validate(name)?;
        }
        Ok(())
    }

    pub fn filter_factory_mut(&mut self) -> &mut FilterFactory {
        &mut self.filters
    }

    /// Names loaded or written through this instance.
    pub fn var_names(&self) -> Result<&[String], Error> {
        if !self.hold_names {
            return Err(Error::NamesNotHeld);
        }
        Ok(&self.names)
    }

    /// Allow a new [`Gea::load`]. Values already written stay in place.
    pub fn flush(&mut self) -> Result<&mut Self, Error> {
        self.ensure_writable()?;
        self.loader.flush();
        self.names.clear();
        debug!("variables flushed");
        Ok(self)
    }

    /// Flush and discard `names`, or every held name when `names` is empty.
    pub fn flush_hard(&mut self, names: &[&str]) -> Result<&mut Self, Error> {
        self.ensure_writable()?;
        self.loader.flush();

        let names: Vec<String> = if names.is_empty() {
            std::mem::take(&mut self.names)
        } else {
            names.iter().map(|name| (*name).to_owned()).collect()
        };
        for name in &names {
            self.accessor.discard(name)?;
        }
        self.names.clear();
        debug!(discarded = names.len(), "variables hard-flushed");
        Ok(self)
    }

    fn ensure_writable(&self) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::ReadOnlyVars { action: "flush" });
        }
        Ok(())
    }

    /// The backing store, unfiltered.
    pub fn accessor(&self) -> &dyn Accessor {
        self.accessor.inner()
    }
}

/// Builder for [`Gea`].
///
/// Without [`GeaBuilder::dir`] nothing is loaded. Without
/// [`GeaBuilder::accessor`] variables live in memory, isolated from the
/// process environment.
pub struct GeaBuilder {
    dir: Option<PathBuf>,
    filename: String,
    hold_names: bool,
    read_only: bool,
    cached: bool,
    accessor: Option<Box<dyn Accessor>>,
    loader: Option<Box<dyn Loader>>,
    filters: Option<FilterFactory>,
}

impl GeaBuilder {
    pub fn new() -> Self {
        Self {
            dir: None,
            filename: ".env".to_owned(),
            hold_names: true,
            read_only: false,
            cached: true,
            accessor: None,
            loader: None,
            filters: None,
        }
    }

    pub fn dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn hold_names(mut self, hold_names: bool) -> Self {
        self.hold_names = hold_names;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn accessor(mut self, accessor: impl Accessor + 'static) -> Self {
        self.accessor = Some(Box::new(accessor));
        self
    }

    /// Store variables in the process environment.
    ///
    /// # Safety
    ///
    /// See [`ProcessAccessor::new`].
    pub unsafe fn process(self) -> Self {
        self.accessor(unsafe { ProcessAccessor::new() })
    }

    /// Use `loader` instead of loading `dir/filename`.
    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    pub fn filter_factory(mut self, filters: FilterFactory) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn build(mut self) -> Result<Gea, Error> {
        let loader: Box<dyn Loader> = match (self.loader.take(), &self.dir) {
            (Some(loader), _) => loader,
            (None, Some(dir)) => {
                if !dir.is_dir() {
                    return Err(Error::InvalidDirectory { path: dir.clone() });
                }
                Box::new(NestedLoader::new(FileParser::new(dir.join(&self.filename))))
            }
            (None, None) => Box::new(NoopLoader),
        };
        Ok(self.assemble(loader))
    }

    fn assemble(self, loader: Box<dyn Loader>) -> Gea {
        let mut accessor = self
            .accessor
            .unwrap_or_else(|| Box::new(MemoryAccessor::new()));
        if self.read_only {
            accessor = Box::new(ReadOnlyAccessor::new(accessor));
        }

        Gea {
            accessor: if self.cached {
                FilteredAccessor::cached(accessor)
            } else {
                FilteredAccessor::new(accessor)
            },
            loader,
            filters: self.filters.unwrap_or_default(),
            hold_names: self.hold_names,
            read_only: self.read_only,
            names: Vec::new(),
        }
    }
}

impl Default for GeaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

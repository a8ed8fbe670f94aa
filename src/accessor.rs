use std::collections::BTreeMap;

use crate::error::Error;

/// Key/value store that loaded variables are written to.
///
/// Stores are write-once: writing a name that already holds a value fails with
/// [`Error::Overwrite`] until the name is discarded.
pub trait Accessor {
    /// The stored value, or `None` when `name` is not set.
    fn read(&self, name: &str) -> Option<String>;

    /// Store `value` under `name` and return the name.
    ///
    /// Writing `None` is the same as [`Accessor::discard`].
    fn write(&mut self, name: &str, value: Option<&str>) -> Result<String, Error>;

    /// Remove any stored value for `name` and return the name.
    fn discard(&mut self, name: &str) -> Result<String, Error>;
}

impl<A: Accessor + ?Sized> Accessor for Box<A> {
    fn read(&self, name: &str) -> Option<String> {
        (**self).read(name)
    }

    fn write(&mut self, name: &str, value: Option<&str>) -> Result<String, Error> {
        (**self).write(name, value)
    }

    fn discard(&mut self, name: &str) -> Result<String, Error> {
        (**self).discard(name)
    }
}

/// In-memory store, isolated from the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryAccessor {
    vars: BTreeMap<String, String>,
}

impl MemoryAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing variables, e.g. to stand in for an ambient
    /// environment.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.vars
    }
}

impl<K, V> FromIterator<(K, V)> for MemoryAccessor
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

impl Accessor for MemoryAccessor {
    fn read(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }

    fn write(&mut self, name: &str, value: Option<&str>) -> Result<String, Error> {
        let Some(value) = value else {
            return self.discard(name);
        };
        if self.vars.contains_key(name) {
            return Err(Error::Overwrite {
                name: name.to_owned(),
            });
        }

        self.vars.insert(name.to_owned(), value.to_owned());
        Ok(name.to_owned())
    }

    fn discard(&mut self, name: &str) -> Result<String, Error> {
        self.vars.remove(name);
        Ok(name.to_owned())
    }
}

/// Store backed by the current process environment.
///
/// Variables whose value is not valid Unicode read as absent.
///
/// Writes go through [`std::env::set_var`], which mutates global process state
/// and is not thread-safe for concurrent environment access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessAccessor {
    _private: (),
}

impl ProcessAccessor {
    /// Create a process-environment store.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other threads concurrently read or write the
    /// process environment while this store writes or discards variables.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }

    /// A process-environment store that can only be read.
    pub fn read_only() -> ReadOnlyAccessor<Self> {
        ReadOnlyAccessor::new(Self { _private: () })
    }
}

impl Accessor for ProcessAccessor {
    fn read(&self, name: &str) -> Option<String> {
        if !is_portable_name(name) {
            return None;
        }
        std::env::var(name).ok()
    }

    fn write(&mut self, name: &str, value: Option<&str>) -> Result<String, Error> {
        let Some(value) = value else {
            return self.discard(name);
        };
        if !is_portable_name(name) {
            return Err(Error::InvalidName);
        }
        if value.contains('\0') {
            return Err(Error::InvalidValue {
                name: name.to_owned(),
            });
        }
        if self.read(name).is_some() {
            return Err(Error::Overwrite {
                name: name.to_owned(),
            });
        }

        // SAFETY: guaranteed by the contract of `ProcessAccessor::new`, the
        // only way to obtain a writable process store.
        unsafe { std::env::set_var(name, value) };
        Ok(name.to_owned())
    }

    fn discard(&mut self, name: &str) -> Result<String, Error> {
        if self.read(name).is_some() {
            // SAFETY: see `write`.
            unsafe { std::env::remove_var(name) };
        }
        Ok(name.to_owned())
    }
}

// `std::env::set_var` panics on these.
fn is_portable_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['=', '\0'])
}

/// Wrapper rejecting every mutation of the inner store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOnlyAccessor<A> {
    inner: A,
}

impl<A: Accessor> ReadOnlyAccessor<A> {
    pub fn new(inner: A) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: Accessor> Accessor for ReadOnlyAccessor<A> {
    fn read(&self, name: &str) -> Option<String> {
        self.inner.read(name)
    }

    fn write(&mut self, name: &str, _value: Option<&str>) -> Result<String, Error> {
        Err(Error::ReadOnly {
            name: name.to_owned(),
            action: "write",
        })
    }

    fn discard(&mut self, name: &str) -> Result<String, Error> {
        Err(Error::ReadOnly {
            name: name.to_owned(),
            action: "discard",
        })
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn memory_read_of_absent_name_is_none() {
        let accessor = MemoryAccessor::new();
        assert_eq!(accessor.read("NOPE"), None);
    }

    #[test]
    fn memory_write_is_immutable_until_discarded() {
        let mut accessor = MemoryAccessor::new();

        assert_eq!(accessor.write("FOO", Some("1")).expect("first write"), "FOO");
        let err = accessor
            .write("FOO", Some("2"))
            .expect_err("second write must fail");
        assert!(matches!(err, Error::Overwrite { ref name } if name == "FOO"));
        assert_eq!(accessor.read("FOO").as_deref(), Some("1"));

        accessor.discard("FOO").expect("discard always succeeds");
        accessor.write("FOO", Some("2")).expect("write after discard");
        assert_eq!(accessor.read("FOO").as_deref(), Some("2"));
    }

    #[test]
    fn memory_empty_string_is_a_value() {
        let mut accessor = MemoryAccessor::new();
        accessor.write("EMPTY", Some("")).expect("write");

        assert_eq!(accessor.read("EMPTY").as_deref(), Some(""));
        assert!(matches!(
            accessor.write("EMPTY", Some("x")),
            Err(Error::Overwrite { .. })
        ));
    }

    #[test]
    fn memory_writing_none_discards() {
        let mut accessor: MemoryAccessor = [("FOO", "1")].into_iter().collect();

        accessor.write("FOO", None).expect("writing none discards");
        assert_eq!(accessor.read("FOO"), None);
        accessor.discard("NEVER_SET").expect("discard always succeeds");
    }

    #[test]
    fn read_only_rejects_mutations_but_reads() {
        let inner: MemoryAccessor = [("FOO", "1")].into_iter().collect();
        let mut accessor = ReadOnlyAccessor::new(inner);

        assert_eq!(accessor.read("FOO").as_deref(), Some("1"));
        assert!(matches!(
            accessor.write("BAR", Some("2")),
            Err(Error::ReadOnly { action: "write", .. })
        ));
        assert!(matches!(
            accessor.discard("FOO"),
            Err(Error::ReadOnly { action: "discard", .. })
        ));
        assert_eq!(accessor.into_inner().read("FOO").as_deref(), Some("1"));
    }

    #[test]
    #[serial]
    fn process_rejects_unstorable_names_and_values() {
        // SAFETY: `#[serial]` keeps environment access single-threaded.
        let mut accessor = unsafe { ProcessAccessor::new() };

        for name in ["", "GEA_UNIT=BAD", "GEA_UNIT\0BAD"] {
            assert!(matches!(
                accessor.write(name, Some("1")),
                Err(Error::InvalidName)
            ));
            assert_eq!(accessor.read(name), None);
        }

        let err = accessor
            .write("GEA_UNIT_NUL", Some("a\0b"))
            .expect_err("NUL in value");
        assert!(matches!(err, Error::InvalidValue { ref name } if name == "GEA_UNIT_NUL"));
        assert!(!err.to_string().contains("name must be"));
        assert_eq!(accessor.read("GEA_UNIT_NUL"), None);
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn process_non_unicode_value_reads_as_absent() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        // SAFETY: `#[serial]` keeps environment access single-threaded.
        unsafe { std::env::set_var("GEA_UNIT_NON_UNICODE", OsStr::from_bytes(b"a\xffb")) };
        let accessor = ProcessAccessor::read_only();

        assert_eq!(accessor.read("GEA_UNIT_NON_UNICODE"), None);

        // SAFETY: see above.
        unsafe { std::env::remove_var("GEA_UNIT_NON_UNICODE") };
    }

    #[test]
    fn boxed_accessor_delegates() {
        let mut accessor: Box<dyn Accessor> = Box::new(MemoryAccessor::new());

        accessor.write("FOO", Some("1")).expect("write");
        assert_eq!(accessor.read("FOO").as_deref(), Some("1"));
        assert!(accessor.write("FOO", Some("2")).is_err());
    }
}

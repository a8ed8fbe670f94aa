use tracing::{debug, trace};

use crate::accessor::Accessor;
use crate::error::Error;
use crate::parser::Parser;

/// Moves parsed variables into an [`Accessor`].
///
/// Loaders are a two-state machine: `load` moves them to *loaded* and fails
/// with [`Error::AlreadyLoaded`] while they are there; `flush` moves them
/// back. Flushing never touches values already written.
pub trait Loader {
    /// Write the source variables and return their names in write order.
    fn load(&mut self, accessor: &mut dyn Accessor) -> Result<Vec<String>, Error>;

    fn loaded(&self) -> bool;

    fn flush(&mut self);
}

impl<L: Loader + ?Sized> Loader for Box<L> {
    fn load(&mut self, accessor: &mut dyn Accessor) -> Result<Vec<String>, Error> {
        (**self).load(accessor)
    }

    fn loaded(&self) -> bool {
        (**self).loaded()
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}

/// Loader resolving `${NAME}` references.
///
/// Variables without references are written first, in source order. Variables
/// with references are written afterwards, in source order, each reference
/// replaced by the value the accessor holds for it at that moment: a value
/// written earlier in this load, or one already in the store. References that
/// resolve to nothing stay in the value as literal `${NAME}` text.
///
/// Since substitution happens once per variable, a referenced variable that
/// itself has references only resolves when it appears earlier in the source.
#[derive(Debug, Clone)]
pub struct NestedLoader<P> {
    parser: P,
    loaded: bool,
}

impl<P: Parser> NestedLoader<P> {
    pub fn new(parser: P) -> Self {
        Self {
            parser,
            loaded: false,
        }
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }
}

impl<P: Parser> Loader for NestedLoader<P> {
    fn load(&mut self, accessor: &mut dyn Accessor) -> Result<Vec<String>, Error> {
        if self.loaded {
            return Err(Error::AlreadyLoaded);
        }

        let mut names = Vec::new();
        let mut nested = Vec::new();

        for variable in self.parser.parse()? {
            let Some((name, value, references)) = variable.into_parts() else {
                continue;
            };
            if !references.is_empty() {
                nested.push((name, value, references));
                continue;
            }

            names.push(accessor.write(&name, Some(&value))?);
            trace!(name = %name, "loaded variable");
        }

        let plain_count = names.len();
        for (name, value, references) in nested {
            let value = references.iter().fold(value, |value, reference| {
                resolve_reference(&*accessor, value, &name, reference)
            });
            names.push(accessor.write(&name, Some(&value))?);
            trace!(name = %name, "loaded nested variable");
        }

        self.loaded = true;
        debug!(
            plain = plain_count,
            nested = names.len() - plain_count,
            "variables loaded"
        );
        Ok(names)
    }

    fn loaded(&self) -> bool {
        self.loaded
    }

    fn flush(&mut self) {
        self.loaded = false;
    }
}

fn resolve_reference(
    accessor: &dyn Accessor,
    value: String,
    name: &str,
    reference: &str,
) -> String {
    match accessor.read(reference) {
        Some(resolved) => value.replace(&format!("${{{reference}}}"), &resolved),
        None => {
            debug!(name, reference, "nested reference left unresolved");
            value
        }
    }
}

/// Loader for variables that are already in place.
///
/// It is always loaded, so readers never trigger a load, and flushing it is a
/// no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLoader;

impl Loader for NoopLoader {
    fn load(&mut self, _accessor: &mut dyn Accessor) -> Result<Vec<String>, Error> {
        Ok(Vec::new())
    }

    fn loaded(&self) -> bool {
        true
    }

    fn flush(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::{MemoryAccessor, ReadOnlyAccessor};
    use crate::parser::StringParser;

    fn loader(content: &str) -> NestedLoader<StringParser> {
        NestedLoader::new(StringParser::new(content))
    }

    #[test]
    fn loads_plain_then_nested() {
        let mut accessor = MemoryAccessor::new();
        let mut loader = loader("A=1\nB=${A}-2\n");

        let names = loader.load(&mut accessor).expect("load should succeed");

        assert_eq!(names, ["A", "B"]);
        assert_eq!(accessor.read("A").as_deref(), Some("1"));
        assert_eq!(accessor.read("B").as_deref(), Some("1-2"));
        assert!(loader.loaded());
    }

    #[test]
    fn nested_variables_are_written_after_all_plain_ones() {
        let mut accessor = MemoryAccessor::new();
        let mut loader = loader("URL=${HOST}:${PORT}\nHOST=localhost\n# c\nPORT=8080\n");

        let names = loader.load(&mut accessor).expect("load should succeed");

        assert_eq!(names, ["HOST", "PORT", "URL"]);
        assert_eq!(accessor.read("URL").as_deref(), Some("localhost:8080"));
    }

    #[test]
    fn unresolved_reference_stays_literal() {
        let mut accessor = MemoryAccessor::new();
        let mut loader = loader("A=${MISSING}x\n");

        loader.load(&mut accessor).expect("load should succeed");

        assert_eq!(accessor.read("A").as_deref(), Some("${MISSING}x"));
    }

    #[test]
    fn references_resolve_against_existing_values() {
        let mut accessor: MemoryAccessor = [("BASE", "/opt/app")].into_iter().collect();
        let mut loader = loader("BIN=${BASE}/bin:${BASE}/sbin\n");

        loader.load(&mut accessor).expect("load should succeed");

        assert_eq!(
            accessor.read("BIN").as_deref(),
            Some("/opt/app/bin:/opt/app/sbin")
        );
    }

    #[test]
    fn nested_chains_resolve_in_source_order_only() {
        let mut accessor = MemoryAccessor::new();
        let mut loader = loader("ROOT=/srv\nB=${A}/b\nA=${ROOT}/a\nC=${A}/c\n");

        loader.load(&mut accessor).expect("load should succeed");

        assert_eq!(accessor.read("A").as_deref(), Some("/srv/a"));
        assert_eq!(accessor.read("B").as_deref(), Some("${A}/b"));
        assert_eq!(accessor.read("C").as_deref(), Some("/srv/a/c"));
    }

    #[test]
    fn resolved_values_are_not_expanded_again() {
        let mut accessor: MemoryAccessor = [("OUTER", "${INNER}")].into_iter().collect();
        let mut loader = loader("INNER=x\nVALUE=${OUTER}\n");

        loader.load(&mut accessor).expect("load should succeed");

        assert_eq!(accessor.read("VALUE").as_deref(), Some("${INNER}"));
    }

    #[test]
    fn second_load_requires_flush() {
        let mut accessor = MemoryAccessor::new();
        let mut loader = loader("A=1\n");

        loader.load(&mut accessor).expect("first load");
        let err = loader.load(&mut accessor).expect_err("second load");
        assert!(matches!(err, Error::AlreadyLoaded));

        loader.flush();
        assert!(!loader.loaded());
        accessor.discard("A").expect("discard");
        assert_eq!(loader.load(&mut accessor).expect("reload"), ["A"]);
    }

    #[test]
    fn flush_keeps_written_values() {
        let mut accessor = MemoryAccessor::new();
        let mut loader = loader("A=1\n");

        loader.load(&mut accessor).expect("load");
        loader.flush();

        assert_eq!(accessor.read("A").as_deref(), Some("1"));
        let err = loader.load(&mut accessor).expect_err("A still set");
        assert!(matches!(err, Error::Overwrite { ref name } if name == "A"));
        assert!(!loader.loaded());
    }

    #[test]
    fn duplicate_name_aborts_load() {
        let mut accessor = MemoryAccessor::new();
        let mut loader = loader("A=1\nB=2\nA=${B}\n");

        let err = loader.load(&mut accessor).expect_err("duplicate name");

        assert!(matches!(err, Error::Overwrite { ref name } if name == "A"));
        assert!(!loader.loaded());
    }

    #[test]
    fn parse_errors_abort_load() {
        let mut accessor = MemoryAccessor::new();
        let mut loader = loader("A=1\nB=not quoted\n");

        let err = loader.load(&mut accessor).expect_err("malformed value");

        assert!(matches!(err, Error::Parse(_)));
        assert_eq!(accessor.read("A"), None);
    }

    #[test]
    fn read_only_accessor_rejects_load() {
        let mut accessor = ReadOnlyAccessor::new(MemoryAccessor::new());
        let mut loader = loader("A=1\n");

        let err = loader.load(&mut accessor).expect_err("read-only");
        assert!(matches!(err, Error::ReadOnly { action: "write", .. }));
    }

    #[test]
    fn noop_loader_is_always_loaded() {
        let mut accessor = MemoryAccessor::new();
        let mut loader = NoopLoader;

        assert!(loader.loaded());
        assert!(loader.load(&mut accessor).expect("noop load").is_empty());
        assert!(loader.load(&mut accessor).expect("noop load again").is_empty());
        loader.flush();
        assert!(loader.loaded());
    }
}

//! Load `.env` files into an immutable environment.
//!
//! [`Gea`] reads a `.env` file once, resolves `${NAME}` references against
//! variables loaded before them, and refuses to overwrite any variable until
//! it is explicitly discarded. Values can be validated and converted by
//! [`Filter`] chains attached per variable.
//!
//! [`GeaBuilder::build`] is the safe default and keeps variables in memory.
//! Constructors that write to the process environment (`Gea::instance`,
//! `Gea::no_loader`, `GeaBuilder::process`) are `unsafe`, because callers
//! must guarantee no concurrent process-environment access.

mod accessor;
mod error;
mod filter;
mod filtered;
mod gea;
mod loader;
mod model;
mod parser;

pub use accessor::{Accessor, MemoryAccessor, ProcessAccessor, ReadOnlyAccessor};
pub use error::{Error, FilterError, ParseError, ParseErrorKind};
pub use filter::{
    ArrayFilter, BoolFilter, CallbackFilter, EnumFilter, Filter, FilterConstructor, FilterFactory,
    FilterSpec, FloatFilter, IntFilter, ObjectFilter, RequiredFilter,
};
pub use filtered::FilteredAccessor;
pub use gea::{Gea, GeaBuilder};
pub use loader::{Loader, NestedLoader, NoopLoader};
pub use model::Variable;
pub use parser::{
    DotenvLineParser, FileParser, LineParser, Lines, Parser, StringParser, parse_line,
    parse_reader, parse_str,
};
pub use serde_json::Value;

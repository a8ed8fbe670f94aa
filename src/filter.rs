//! Value filters.
//!
//! A [`Filter`] validates or transforms a variable value. Filters attached to
//! the same variable run in registration order, each one receiving the output
//! of the previous one, so a chain may turn a string into a list and the list
//! into an object. The raw value enters the chain as [`Value::String`], or as
//! [`Value::Null`] when the variable is not set.
//!
//! Lazy filters run when the variable is read; eager filters also run as soon
//! as the variables are available, so that invalid configuration is reported
//! at startup rather than at first use.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

use crate::error::{Error, FilterError};

pub trait Filter {
    fn filter(&self, value: Value) -> Result<Value, FilterError>;

    fn is_lazy(&self) -> bool;
}

impl<F: Filter + ?Sized> Filter for Box<F> {
    fn filter(&self, value: Value) -> Result<Value, FilterError> {
        (**self).filter(value)
    }

    fn is_lazy(&self) -> bool {
        (**self).is_lazy()
    }
}

type Walker = Box<dyn Fn(&str) -> Value>;

/// Splits a string into a list.
pub struct ArrayFilter {
    separator: String,
    trim: bool,
    walker: Option<Walker>,
}

impl ArrayFilter {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            trim: true,
            walker: None,
        }
    }

    /// Trim every item (the default).
    pub fn trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    /// Map every item through `walker`.
    pub fn walker(mut self, walker: impl Fn(&str) -> Value + 'static) -> Self {
        self.walker = Some(Box::new(walker));
        self
    }
}

impl Default for ArrayFilter {
    fn default() -> Self {
        Self::new(",")
    }
}

impl fmt::Debug for ArrayFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayFilter")
            .field("separator", &self.separator)
            .field("trim", &self.trim)
            .field("walker", &self.walker.is_some())
            .finish()
    }
}

impl Filter for ArrayFilter {
    fn filter(&self, value: Value) -> Result<Value, FilterError> {
        if value.is_array() {
            return Ok(value);
        }
        let Some(text) = scalar_text(&value).filter(|text| !text.is_empty()) else {
            return Ok(Value::Array(Vec::new()));
        };

        let items = text
            .split(self.separator.as_str())
            .map(|item| if self.trim { item.trim() } else { item })
            .map(|item| match &self.walker {
                Some(walker) => walker(item),
                None => Value::String(item.to_owned()),
            })
            .collect();
        Ok(Value::Array(items))
    }

    fn is_lazy(&self) -> bool {
        true
    }
}

/// `1`, `true`, `on` and `yes` (any case) become `true`, everything else
/// `false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolFilter;

impl Filter for BoolFilter {
    fn filter(&self, value: Value) -> Result<Value, FilterError> {
        if let Value::Bool(flag) = value {
            return Ok(Value::Bool(flag));
        }
        let truthy = scalar_text(&value).is_some_and(|text| {
            matches!(
                text.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "on" | "yes"
            )
        });
        Ok(Value::Bool(truthy))
    }

    fn is_lazy(&self) -> bool {
        true
    }
}

/// Integer coercion; unset becomes `0`, fractions are truncated.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntFilter;

impl Filter for IntFilter {
    fn filter(&self, value: Value) -> Result<Value, FilterError> {
        if value.is_null() {
            return Ok(Value::from(0));
        }
        if let Some(int) = value.as_i64() {
            return Ok(Value::from(int));
        }

        let number = numeric(&value)?;
        if let Ok(int) = number.trim().parse::<i64>() {
            return Ok(Value::from(int));
        }
        let float = parse_float(&number)?.trunc();
        if float < i64::MIN as f64 || float >= i64::MAX as f64 {
            return Err(FilterError::new("is not numeric."));
        }
        Ok(Value::from(float as i64))
    }

    fn is_lazy(&self) -> bool {
        true
    }
}

/// Float coercion; unset becomes `0.0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatFilter;

impl Filter for FloatFilter {
    fn filter(&self, value: Value) -> Result<Value, FilterError> {
        if value.is_null() {
            return Ok(Value::from(0.0));
        }
        let float = parse_float(&numeric(&value)?)?;
        Number::from_f64(float)
            .map(Value::Number)
            .ok_or_else(|| FilterError::new("is not numeric."))
    }

    fn is_lazy(&self) -> bool {
        true
    }
}

fn numeric(value: &Value) -> Result<String, FilterError> {
    match value {
        Value::Number(number) => Ok(number.to_string()),
        Value::String(text) => Ok(text.clone()),
        _ => Err(FilterError::new("is not numeric.")),
    }
}

fn parse_float(text: &str) -> Result<f64, FilterError> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|float| float.is_finite())
        .ok_or_else(|| FilterError::new("is not numeric."))
}

/// Restricts a variable to a set of allowed values.
///
/// Strict mode compares values as they are; loose mode compares their text
/// form, so `"1"` matches `1`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumFilter {
    allowed: Vec<Value>,
    strict: bool,
}

impl EnumFilter {
    pub fn new<I, V>(allowed: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
            strict: true,
        }
    }

    pub fn loose<I, V>(allowed: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            strict: false,
            ..Self::new(allowed)
        }
    }

    fn allows(&self, value: &Value) -> bool {
        if self.strict {
            return self.allowed.contains(value);
        }
        let text = scalar_text(value);
        self.allowed
            .iter()
            .any(|allowed| allowed == value || (text.is_some() && scalar_text(allowed) == text))
    }
}

impl Filter for EnumFilter {
    fn filter(&self, value: Value) -> Result<Value, FilterError> {
        if !self.allows(&value) {
            return Err(FilterError::new("value is not allowed."));
        }
        Ok(value)
    }

    fn is_lazy(&self) -> bool {
        false
    }
}

type ObjectCheck = Box<dyn Fn(&Value) -> Result<(), String>>;

/// Turns a value into an object.
///
/// Unset becomes `{}`, objects pass through and strings must hold a JSON
/// object. [`ObjectFilter::typed`] additionally requires the object to
/// deserialize into `T`.
#[derive(Default)]
pub struct ObjectFilter {
    check: Option<ObjectCheck>,
}

impl ObjectFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn typed<T: DeserializeOwned>() -> Self {
        Self {
            check: Some(Box::new(|value| {
                serde_json::from_value::<T>(value.clone())
                    .map(|_| ())
                    .map_err(|err| err.to_string())
            })),
        }
    }
}

impl fmt::Debug for ObjectFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFilter")
            .field("typed", &self.check.is_some())
            .finish()
    }
}

impl Filter for ObjectFilter {
    fn filter(&self, value: Value) -> Result<Value, FilterError> {
        let object = match value {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => value,
            Value::String(text) => match serde_json::from_str::<Value>(&text) {
                Ok(parsed @ Value::Object(_)) => parsed,
                _ => return Err(FilterError::new("is not a valid object.")),
            },
            _ => return Err(FilterError::new("is not a valid object.")),
        };

        if let Some(check) = &self.check {
            check(&object)
                .map_err(|err| FilterError::new(format!("is not a valid object: {err}.")))?;
        }
        Ok(object)
    }

    fn is_lazy(&self) -> bool {
        true
    }
}

/// Rejects unset variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredFilter;

impl Filter for RequiredFilter {
    fn filter(&self, value: Value) -> Result<Value, FilterError> {
        if value.is_null() {
            return Err(FilterError::new("is required."));
        }
        Ok(value)
    }

    fn is_lazy(&self) -> bool {
        false
    }
}

type Callback = Box<dyn Fn(Value) -> Result<Value, FilterError>>;

/// Filter running a user closure; lazy unless made [`CallbackFilter::eager`].
pub struct CallbackFilter {
    callback: Callback,
    lazy: bool,
}

impl CallbackFilter {
    pub fn new(callback: impl Fn(Value) -> Value + 'static) -> Self {
        Self::try_new(move |value| Ok(callback(value)))
    }

    pub fn try_new(callback: impl Fn(Value) -> Result<Value, FilterError> + 'static) -> Self {
        Self {
            callback: Box::new(callback),
            lazy: true,
        }
    }

    pub fn eager(mut self) -> Self {
        self.lazy = false;
        self
    }
}

impl fmt::Debug for CallbackFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackFilter")
            .field("lazy", &self.lazy)
            .finish_non_exhaustive()
    }
}

impl Filter for CallbackFilter {
    fn filter(&self, value: Value) -> Result<Value, FilterError> {
        (self.callback)(value)
    }

    fn is_lazy(&self) -> bool {
        self.lazy
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// A filter id plus its constructor arguments, resolved by a [`FilterFactory`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub id: String,
    pub args: Vec<Value>,
}

impl FilterSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl From<&str> for FilterSpec {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for FilterSpec {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

pub type FilterConstructor = Box<dyn Fn(&[Value]) -> Result<Box<dyn Filter>, Error>>;

/// Registry mapping filter ids to constructors.
///
/// Ids are case-insensitive. [`FilterFactory::new`] registers the built-in
/// `array`, `bool`, `choices`, `enum`, `float`, `int`, `object` and `required`
/// filters; callback filters carry code and are attached as instances instead.
pub struct FilterFactory {
    constructors: HashMap<String, FilterConstructor>,
}

impl FilterFactory {
    pub fn new() -> Self {
        let mut factory = Self::empty();
        factory.insert("array", array_from_args);
        factory.insert("bool", |_| Ok(Box::new(BoolFilter)));
        factory.insert("choices", |args| {
            Ok(Box::new(EnumFilter::loose(allowed_from_args("choices", args)?)))
        });
        factory.insert("enum", enum_from_args);
        factory.insert("float", |_| Ok(Box::new(FloatFilter)));
        factory.insert("int", |_| Ok(Box::new(IntFilter)));
        factory.insert("object", |_| Ok(Box::new(ObjectFilter::new())));
        factory.insert("required", |_| Ok(Box::new(RequiredFilter)));
        factory
    }

    /// A registry without built-in filters.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register a constructor for `id`; ids already taken are refused.
    pub fn register<F>(&mut self, id: &str, constructor: F) -> Result<&mut Self, Error>
    where
        F: Fn(&[Value]) -> Result<Box<dyn Filter>, Error> + 'static,
    {
        let id = id.to_lowercase();
        if self.constructors.contains_key(&id) {
            return Err(Error::FilterAlreadyRegistered { id });
        }
        self.insert(&id, constructor);
        Ok(self)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(&id.to_lowercase())
    }

    pub fn create(&self, spec: &FilterSpec) -> Result<Box<dyn Filter>, Error> {
        let id = spec.id.to_lowercase();
        let constructor = self
            .constructors
            .get(&id)
            .ok_or(Error::UnknownFilter { id })?;
        constructor(&spec.args)
    }

    fn insert<F>(&mut self, id: &str, constructor: F)
    where
        F: Fn(&[Value]) -> Result<Box<dyn Filter>, Error> + 'static,
    {
        self.constructors
            .insert(id.to_owned(), Box::new(constructor));
    }
}

impl Default for FilterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FilterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.constructors.keys().collect();
        ids.sort();
        f.debug_struct("FilterFactory").field("ids", &ids).finish()
    }
}

fn args_error(id: &str, message: &str) -> Error {
    Error::FilterArgs {
        id: id.to_owned(),
        message: message.to_owned(),
    }
}

// array: [separator] [trim]
fn array_from_args(args: &[Value]) -> Result<Box<dyn Filter>, Error> {
    let separator = match args.first() {
        None => ",",
        Some(Value::String(separator)) if !separator.is_empty() => separator.as_str(),
        Some(_) => return Err(args_error("array", "separator must be a non-empty string")),
    };
    let trim = match args.get(1) {
        None => true,
        Some(Value::Bool(trim)) => *trim,
        Some(_) => return Err(args_error("array", "trim flag must be a boolean")),
    };
    Ok(Box::new(ArrayFilter::new(separator).trim(trim)))
}

// enum: [allowed...] [strict], or the allowed values as separate arguments
fn enum_from_args(args: &[Value]) -> Result<Box<dyn Filter>, Error> {
    let strict = match (args.first(), args.get(1)) {
        (Some(Value::Array(_)), Some(Value::Bool(strict))) => *strict,
        (Some(Value::Array(_)), Some(_)) => {
            return Err(args_error("enum", "strict flag must be a boolean"));
        }
        _ => true,
    };
    let allowed = allowed_from_args("enum", args)?;
    Ok(Box::new(if strict {
        EnumFilter::new(allowed)
    } else {
        EnumFilter::loose(allowed)
    }))
}

fn allowed_from_args(id: &str, args: &[Value]) -> Result<Vec<Value>, Error> {
    let allowed = match args.first() {
        Some(Value::Array(allowed)) => allowed.clone(),
        _ => args.to_vec(),
    };
    if allowed.is_empty() {
        return Err(args_error(id, "at least one allowed value is required"));
    }
    Ok(allowed)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[test]
    fn array_splits_and_trims() {
        let filter = ArrayFilter::default();

        assert_eq!(filter.filter(json!("a, b ,c")), Ok(json!(["a", "b", "c"])));
        assert_eq!(filter.filter(json!("")), Ok(json!([])));
        assert_eq!(filter.filter(Value::Null), Ok(json!([])));
        assert!(filter.is_lazy());
    }

    #[test]
    fn array_custom_separator_without_trim() {
        let filter = ArrayFilter::new("|").trim(false);

        assert_eq!(filter.filter(json!("a, b| c")), Ok(json!(["a, b", " c"])));
    }

    #[test]
    fn array_walker_maps_items() {
        let filter = ArrayFilter::default().walker(|item| json!(item.len()));

        assert_eq!(filter.filter(json!("a,bb,ccc")), Ok(json!([1, 2, 3])));
    }

    #[test]
    fn bool_coercion() {
        for (input, expected) in [
            (json!("1"), true),
            (json!("true"), true),
            (json!(" On "), true),
            (json!("YES"), true),
            (json!("0"), false),
            (json!("false"), false),
            (json!("off"), false),
            (json!("whatever"), false),
            (json!(""), false),
            (Value::Null, false),
            (json!(1), true),
            (json!(true), true),
        ] {
            assert_eq!(BoolFilter.filter(input), Ok(json!(expected)));
        }
        assert!(BoolFilter.is_lazy());
    }

    #[test]
    fn int_coercion() {
        for (input, expected) in [
            (json!("12"), 12),
            (json!(" -7 "), -7),
            (json!("1.9"), 1),
            (json!("1e3"), 1000),
            (json!(3), 3),
            (json!(2.5), 2),
            (Value::Null, 0),
        ] {
            assert_eq!(IntFilter.filter(input), Ok(json!(expected)));
        }
    }

    #[test]
    fn int_rejects_non_numeric() {
        for input in [
            json!("m2"),
            json!("2,0"),
            json!("inf"),
            json!("1e30"),
            json!("-1e30"),
            json!(true),
            json!([]),
        ] {
            let err = IntFilter.filter(input).expect_err("expected non numeric");
            assert_eq!(err.message, "is not numeric.");
        }
    }

    #[test]
    fn float_coercion() {
        assert_eq!(FloatFilter.filter(json!("1.5")), Ok(json!(1.5)));
        assert_eq!(FloatFilter.filter(json!("2")), Ok(json!(2.0)));
        assert_eq!(FloatFilter.filter(Value::Null), Ok(json!(0.0)));
        assert!(FloatFilter.filter(json!("NaN")).is_err());
        assert!(FloatFilter.filter(json!("1.5x")).is_err());
    }

    #[test]
    fn enum_strict_and_loose() {
        let strict = EnumFilter::new([json!(1), json!("a")]);
        assert_eq!(strict.filter(json!("a")), Ok(json!("a")));
        assert!(strict.filter(json!("1")).is_err());
        assert!(!strict.is_lazy());

        let loose = EnumFilter::loose([json!(1), json!("a")]);
        assert_eq!(loose.filter(json!("1")), Ok(json!("1")));
        assert_eq!(
            loose.filter(json!("b")).expect_err("not allowed").message,
            "value is not allowed."
        );
        assert!(loose.filter(Value::Null).is_err());
    }

    #[test]
    fn object_from_json_text() {
        let filter = ObjectFilter::new();

        assert_eq!(filter.filter(Value::Null), Ok(json!({})));
        assert_eq!(
            filter.filter(json!(r#"{"host":"db","port":5432}"#)),
            Ok(json!({"host": "db", "port": 5432}))
        );
        assert_eq!(filter.filter(json!({"a": 1})), Ok(json!({"a": 1})));
        assert!(filter.filter(json!("[1,2]")).is_err());
        assert!(filter.filter(json!("nope")).is_err());
        assert!(filter.filter(json!(["a"])).is_err());
    }

    #[test]
    fn typed_object_checks_shape() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        struct Database {
            host: String,
            port: u16,
        }

        let filter = ObjectFilter::typed::<Database>();
        assert!(filter.filter(json!(r#"{"host":"db","port":5432}"#)).is_ok());
        let err = filter
            .filter(json!(r#"{"host":"db"}"#))
            .expect_err("port is missing");
        assert!(err.message.starts_with("is not a valid object"));
    }

    #[test]
    fn required_rejects_null_only() {
        assert_eq!(
            RequiredFilter.filter(Value::Null),
            Err(FilterError::new("is required."))
        );
        assert_eq!(RequiredFilter.filter(json!("")), Ok(json!("")));
        assert!(!RequiredFilter.is_lazy());
    }

    #[test]
    fn callback_filter_laziness() {
        let upper = CallbackFilter::new(|value| match value {
            Value::String(text) => Value::String(text.to_uppercase()),
            other => other,
        });
        assert!(upper.is_lazy());
        assert_eq!(upper.filter(json!("abc")), Ok(json!("ABC")));

        let failing = CallbackFilter::try_new(|_| Err(FilterError::new("is wrong."))).eager();
        assert!(!failing.is_lazy());
        assert!(failing.filter(Value::Null).is_err());
    }

    #[test]
    fn factory_builds_builtins_case_insensitively() {
        let factory = FilterFactory::new();

        let int = factory.create(&"INT".into()).expect("int filter");
        assert_eq!(int.filter(json!("4")), Ok(json!(4)));

        let array = factory
            .create(&FilterSpec::new("array").arg("|").arg(false))
            .expect("array filter");
        assert_eq!(array.filter(json!("a |b")), Ok(json!(["a ", "b"])));

        let choices = factory
            .create(&FilterSpec::new("choices").arg("1").arg("2"))
            .expect("choices filter");
        assert!(choices.filter(json!(2)).is_ok());
        assert!(!choices.is_lazy());

        let enumeration = factory
            .create(&FilterSpec::new("enum").arg(json!(["a", "b"])))
            .expect("enum filter");
        assert!(enumeration.filter(json!("c")).is_err());
    }

    #[test]
    fn factory_rejects_unknown_ids_and_bad_args() {
        let factory = FilterFactory::new();

        assert!(matches!(
            factory.create(&"callback".into()),
            Err(Error::UnknownFilter { ref id }) if id == "callback"
        ));
        assert!(matches!(
            factory.create(&"enum".into()),
            Err(Error::FilterArgs { .. })
        ));
        assert!(matches!(
            factory.create(&FilterSpec::new("array").arg(3)),
            Err(Error::FilterArgs { .. })
        ));
    }

    #[test]
    fn factory_registration_is_explicit_and_unique() {
        let mut factory = FilterFactory::empty();
        assert!(!factory.contains("bool"));

        factory
            .register("Upper", |_| {
                Ok(Box::new(CallbackFilter::new(|value| match value {
                    Value::String(text) => Value::String(text.to_uppercase()),
                    other => other,
                })))
            })
            .expect("first registration");

        let upper = factory.create(&"upper".into()).expect("registered filter");
        assert_eq!(upper.filter(json!("x")), Ok(json!("X")));

        let err = factory
            .register("UPPER", |_| Ok(Box::new(BoolFilter)))
            .err()
            .expect("duplicate id");
        assert!(matches!(err, Error::FilterAlreadyRegistered { ref id } if id == "upper"));
    }
}

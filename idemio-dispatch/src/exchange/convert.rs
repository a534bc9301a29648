use serde_json::{Number, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use thiserror::Error;

/// Conversion from a dynamically typed body or header value into a concrete type.
///
/// Implementations only see values that are present and not null. Absence is handled by
/// [`convert`], so a missing header never turns into an error.
///
/// Returns `Ok(None)` when the value's JSON kind has no conversion to `Self` at all, and an
/// error when a conversion exists but fails on this value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Option<Self>, Box<dyn Error + Send + Sync>>;
}

/// Converts an optional value into `T`.
///
/// # Returns
/// - `Ok(None)` if there is no value, the value is JSON `null`, or its kind has no conversion
///   to `T`
/// - `Ok(Some(T))` if the value converted
/// - `Err(TypeConversionError)` carrying the original value and the cause otherwise
pub fn convert<T>(value: Option<&Value>) -> Result<Option<T>, TypeConversionError>
where
    T: FromValue,
{
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            T::from_value(value).map_err(|cause| TypeConversionError::new::<T>(value, cause))
        }
    }
}

/// A present value could not be converted to the requested type.
#[derive(Debug, Clone)]
pub struct TypeConversionError {
    value: Value,
    target: &'static str,
    cause: Arc<dyn Error + Send + Sync>,
}

impl TypeConversionError {
    pub(crate) fn new<T>(value: &Value, cause: Box<dyn Error + Send + Sync>) -> Self {
        Self {
            value: value.clone(),
            target: std::any::type_name::<T>(),
            cause: Arc::from(cause),
        }
    }

    /// The value that failed to convert.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn target(&self) -> &'static str {
        self.target
    }
}

impl Display for TypeConversionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Could not convert value {} to {}: {}",
            self.value, self.target, self.cause
        )
    }
}

impl Error for TypeConversionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.cause.as_ref() as &(dyn Error + 'static))
    }
}

/// A number that does not fit the target type.
#[derive(Error, Debug)]
#[error("Number {number} is out of range for {target}")]
pub struct OutOfRange {
    number: Number,
    target: &'static str,
}

impl OutOfRange {
    fn boxed<T>(number: &Number) -> Box<dyn Error + Send + Sync> {
        Box::new(Self {
            number: number.clone(),
            target: std::any::type_name::<T>(),
        })
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Option<Self>, Box<dyn Error + Send + Sync>> {
        Ok(Some(value.clone()))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Option<Self>, Box<dyn Error + Send + Sync>> {
        Ok(match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        })
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Option<Self>, Box<dyn Error + Send + Sync>> {
        match value {
            Value::Number(n) => n.as_i64().map(Some).ok_or_else(|| OutOfRange::boxed::<i64>(n)),
            Value::String(s) => Ok(Some(s.trim().parse::<i64>()?)),
            _ => Ok(None),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Option<Self>, Box<dyn Error + Send + Sync>> {
        match value {
            Value::String(s) => Ok(Some(s.trim().parse::<i32>()?)),
            Value::Number(n) => {
                let wide = n.as_i64().ok_or_else(|| OutOfRange::boxed::<i32>(n))?;
                let narrow = i32::try_from(wide).map_err(|_| OutOfRange::boxed::<i32>(n))?;
                Ok(Some(narrow))
            }
            _ => Ok(None),
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Option<Self>, Box<dyn Error + Send + Sync>> {
        match value {
            Value::Number(n) => n.as_u64().map(Some).ok_or_else(|| OutOfRange::boxed::<u64>(n)),
            Value::String(s) => Ok(Some(s.trim().parse::<u64>()?)),
            _ => Ok(None),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Option<Self>, Box<dyn Error + Send + Sync>> {
        match value {
            Value::Number(n) => n.as_f64().map(Some).ok_or_else(|| OutOfRange::boxed::<f64>(n)),
            Value::String(s) => Ok(Some(s.trim().parse::<f64>()?)),
            _ => Ok(None),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Option<Self>, Box<dyn Error + Send + Sync>> {
        match value {
            Value::Bool(b) => Ok(Some(*b)),
            Value::String(s) => Ok(Some(s.trim().parse::<bool>()?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::num::ParseIntError;

    #[test]
    fn test_missing_value_is_absent_not_error() {
        let result = convert::<i32>(None);
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_non_numeric_string_to_number_wraps_parse_error() {
        let value = json!("Hello World");
        let err = convert::<i32>(Some(&value)).unwrap_err();
        assert_eq!(err.value(), &value);
        assert_eq!(err.target(), "i32");
        assert!(err.source().unwrap().downcast_ref::<ParseIntError>().is_some());

        let err = convert::<i64>(Some(&value)).unwrap_err();
        assert!(err.source().unwrap().downcast_ref::<ParseIntError>().is_some());
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(convert::<i64>(Some(&json!(123))).unwrap(), Some(123));
        assert_eq!(convert::<i32>(Some(&json!("200"))).unwrap(), Some(200));
        assert_eq!(convert::<u64>(Some(&json!(7))).unwrap(), Some(7));
        assert_eq!(convert::<f64>(Some(&json!("1.5"))).unwrap(), Some(1.5));
        assert!(convert::<i32>(Some(&json!(i64::MAX))).is_err());
        let err = convert::<u64>(Some(&json!(-1))).unwrap_err();
        assert!(err.source().unwrap().downcast_ref::<OutOfRange>().is_some());
    }

    #[test]
    fn test_string_conversions() {
        assert_eq!(
            convert::<String>(Some(&json!("Hello"))).unwrap(),
            Some("Hello".to_string())
        );
        assert_eq!(
            convert::<String>(Some(&json!(123))).unwrap(),
            Some("123".to_string())
        );
        assert_eq!(
            convert::<String>(Some(&json!(true))).unwrap(),
            Some("true".to_string())
        );
    }

    #[test]
    fn test_null_is_absent_not_error() {
        assert!(matches!(convert::<String>(Some(&Value::Null)), Ok(None)));
        assert!(matches!(convert::<i32>(Some(&Value::Null)), Ok(None)));
        assert!(matches!(convert::<bool>(Some(&Value::Null)), Ok(None)));
        assert!(matches!(convert::<Value>(Some(&Value::Null)), Ok(None)));
    }

    #[test]
    fn test_bool_conversions() {
        assert_eq!(convert::<bool>(Some(&json!("true"))).unwrap(), Some(true));
        assert!(convert::<bool>(Some(&json!("yes"))).is_err());
    }

    #[test]
    fn test_kind_without_conversion_is_absent() {
        let cool = json!(true);
        assert!(matches!(convert::<i32>(Some(&cool)), Ok(None)));
        assert!(matches!(convert::<i64>(Some(&cool)), Ok(None)));
        assert!(matches!(convert::<f64>(Some(&json!([1, 2]))), Ok(None)));
        assert!(matches!(convert::<bool>(Some(&json!(1))), Ok(None)));
        assert_eq!(convert::<bool>(Some(&cool)).unwrap(), Some(true));
        assert_eq!(convert::<String>(Some(&cool)).unwrap().as_deref(), Some("true"));
    }
}

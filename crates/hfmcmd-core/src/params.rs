//! Parameter binding
//!
//! Commands declare an ordered list of [`ParameterSpec`]s; the front-end
//! supplies raw strings in an [`InvocationRequest`]. [`bind`] turns the
//! latter into typed [`BoundParameters`] or a validation error naming the
//! offending parameter. Binding performs no I/O.

use crate::errors::{HfmError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Semantic type of a command parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    /// One of a fixed set of variants, matched case-insensitively
    Enumeration(&'static [&'static str]),
    Path,
}

impl ParamType {
    /// Convert a raw supplied value to this type
    fn parse(&self, parameter: &str, raw: &str) -> Result<ParamValue> {
        let mismatch = || HfmError::TypeMismatch {
            parameter: parameter.to_string(),
            expected: self.to_string(),
            value: raw.to_string(),
        };

        match self {
            ParamType::String => Ok(ParamValue::Str(raw.to_string())),
            ParamType::Path => Ok(ParamValue::Path(PathBuf::from(raw))),
            ParamType::Integer => raw
                .trim()
                .parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|_| mismatch()),
            ParamType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "1" | "on" => Ok(ParamValue::Bool(true)),
                "false" | "no" | "n" | "0" | "off" => Ok(ParamValue::Bool(false)),
                _ => Err(mismatch()),
            },
            ParamType::Enumeration(variants) => variants
                .iter()
                .find(|v| v.eq_ignore_ascii_case(raw.trim()))
                .map(|v| ParamValue::Enum(*v))
                .ok_or_else(mismatch),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::String => write!(f, "string"),
            ParamType::Integer => write!(f, "integer"),
            ParamType::Boolean => write!(f, "boolean"),
            ParamType::Enumeration(variants) => write!(f, "one of [{}]", variants.join(", ")),
            ParamType::Path => write!(f, "path"),
        }
    }
}

/// A typed parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Bool(bool),
    /// Canonical spelling of the matched variant
    Enum(&'static str),
    Path(PathBuf),
}

impl ParamValue {
    /// Whether this value is a legal value of `ty`
    pub fn conforms_to(&self, ty: &ParamType) -> bool {
        match (self, ty) {
            (ParamValue::Str(_), ParamType::String)
            | (ParamValue::Int(_), ParamType::Integer)
            | (ParamValue::Bool(_), ParamType::Boolean)
            | (ParamValue::Path(_), ParamType::Path) => true,
            (ParamValue::Enum(v), ParamType::Enumeration(variants)) => variants.contains(v),
            _ => false,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => write!(f, "{}", s),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Enum(v) => write!(f, "{}", v),
            ParamValue::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Declared shape of one command parameter
///
/// A parameter is required exactly when it has no default.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    name: &'static str,
    ty: ParamType,
    default: Option<ParamValue>,
    description: &'static str,
}

impl ParameterSpec {
    /// A required parameter
    pub fn new(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            default: None,
            description,
        }
    }

    /// Make the parameter optional with the given default
    pub fn with_default(mut self, default: ParamValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ty(&self) -> &ParamType {
        &self.ty
    }

    pub fn default(&self) -> Option<&ParamValue> {
        self.default.as_ref()
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// One command execution as produced by the front-end
///
/// Named arguments are matched to parameter names case-insensitively;
/// positional arguments fill parameters in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationRequest {
    pub command: String,
    pub args: BTreeMap<String, String>,
    pub positional: Vec<String>,
}

impl InvocationRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Add a named argument
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Append a positional argument
    pub fn positional(mut self, value: impl Into<String>) -> Self {
        self.positional.push(value.into());
        self
    }
}

/// Typed parameter values keyed by parameter name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundParameters {
    values: BTreeMap<&'static str, ParamValue>,
}

impl BoundParameters {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    pub fn string(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            Some(ParamValue::Str(s)) => Ok(s),
            other => Err(undeclared(name, "string", other)),
        }
    }

    pub fn integer(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            Some(ParamValue::Int(i)) => Ok(*i),
            other => Err(undeclared(name, "integer", other)),
        }
    }

    pub fn boolean(&self, name: &str) -> Result<bool> {
        match self.get(name) {
            Some(ParamValue::Bool(b)) => Ok(*b),
            other => Err(undeclared(name, "boolean", other)),
        }
    }

    pub fn enumeration(&self, name: &str) -> Result<&'static str> {
        match self.get(name) {
            Some(ParamValue::Enum(v)) => Ok(v),
            other => Err(undeclared(name, "enumeration", other)),
        }
    }

    pub fn path(&self, name: &str) -> Result<&Path> {
        match self.get(name) {
            Some(ParamValue::Path(p)) => Ok(p),
            other => Err(undeclared(name, "path", other)),
        }
    }

    /// A path parameter whose empty default means "not supplied"
    pub fn optional_path(&self, name: &str) -> Result<Option<&Path>> {
        let path = self.path(name)?;
        Ok((!path.as_os_str().is_empty()).then_some(path))
    }
}

// A command body asked for a parameter its definition does not declare
// with that type.
fn undeclared(name: &str, expected: &str, found: Option<&ParamValue>) -> HfmError {
    HfmError::Internal {
        message: match found {
            Some(value) => format!(
                "parameter '{}' is bound as {:?}, not {}",
                name, value, expected
            ),
            None => format!("parameter '{}' is not declared", name),
        },
    }
}

/// Bind a request's raw arguments against a command's parameter specs
///
/// Strict: any named argument not matching a spec is `UnknownParameter`.
pub fn bind(specs: &[ParameterSpec], request: &InvocationRequest) -> Result<BoundParameters> {
    if request.positional.len() > specs.len() {
        return Err(HfmError::TooManyArguments {
            supplied: request.positional.len(),
            accepted: specs.len(),
        });
    }

    for key in request.args.keys() {
        if !specs.iter().any(|s| s.name.eq_ignore_ascii_case(key)) {
            return Err(HfmError::UnknownParameter {
                parameter: key.clone(),
            });
        }
    }

    let mut values = BTreeMap::new();
    for (index, spec) in specs.iter().enumerate() {
        let mut named = request
            .args
            .iter()
            .filter(|(k, _)| spec.name.eq_ignore_ascii_case(k))
            .map(|(_, v)| v);
        let first = named.next();
        let repeated = named.next().is_some();
        let positional = request.positional.get(index);

        if first.is_some() && (repeated || positional.is_some()) {
            return Err(HfmError::DuplicateArgument {
                parameter: spec.name.to_string(),
            });
        }
        let raw = first.or(positional);

        let value = match (raw, &spec.default) {
            (Some(raw), _) => spec.ty.parse(spec.name, raw)?,
            (None, Some(default)) => default.clone(),
            (None, None) => {
                return Err(HfmError::MissingParameter {
                    parameter: spec.name.to_string(),
                })
            }
        };
        values.insert(spec.name, value);
    }

    Ok(BoundParameters { values })
}

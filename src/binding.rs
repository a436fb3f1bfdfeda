//! Argument binding against an explicit parameter table
//!
//! Each cacheable function declares its parameter list once, at
//! registration time. Call data (positional values plus name/value pairs)
//! is bound against that table, with declared defaults applied, producing a
//! canonical ordered name-to-value map. Two calls that bind to equal
//! argument sets are the same call, no matter how they were spelled.

use serde_json::Value;

use crate::error::{MnemoError, MnemoResult};

/// One declared parameter of a cacheable function
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Declared default value, if any
    pub default: Option<Value>,
}

impl Parameter {
    /// Declare a required parameter
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    /// Declare a parameter with a default value
    pub fn optional(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
        }
    }
}

/// Ordered parameter table of a cacheable function
#[derive(Debug, Clone)]
pub struct Signature {
    params: Vec<Parameter>,
}

impl Signature {
    /// Start building a signature
    pub fn builder() -> SignatureBuilder {
        SignatureBuilder { params: Vec::new() }
    }

    /// Build a signature from a parameter list, validating name uniqueness
    pub fn new(params: Vec<Parameter>) -> MnemoResult<Self> {
        for (i, param) in params.iter().enumerate() {
            if params[..i].iter().any(|p| p.name == param.name) {
                return Err(MnemoError::SignatureInvalid {
                    reason: format!("duplicate parameter name: {}", param.name),
                });
            }
        }
        Ok(Self { params })
    }

    /// Declared parameters, in order
    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    /// Bind call arguments against this signature, applying defaults.
    ///
    /// Positional values fill parameters in declared order; keyword values
    /// match by name. Surplus positionals, unknown names, duplicate
    /// bindings, and missing required parameters all fail with a
    /// `KeyDerivation` error.
    pub fn bind(&self, args: &CallArgs) -> MnemoResult<BoundArgs> {
        if args.positional.len() > self.params.len() {
            return Err(MnemoError::key_derivation(format!(
                "expected at most {} positional arguments, got {}",
                self.params.len(),
                args.positional.len()
            )));
        }

        let mut slots: Vec<Option<Value>> = vec![None; self.params.len()];
        for (i, value) in args.positional.iter().enumerate() {
            slots[i] = Some(value.clone());
        }

        for (name, value) in &args.keyword {
            let index = self
                .params
                .iter()
                .position(|p| &p.name == name)
                .ok_or_else(|| {
                    MnemoError::key_derivation(format!("unexpected keyword argument: {name}"))
                })?;
            if slots[index].is_some() {
                return Err(MnemoError::key_derivation(format!(
                    "argument bound more than once: {name}"
                )));
            }
            slots[index] = Some(value.clone());
        }

        let mut values = Vec::with_capacity(self.params.len());
        for (param, slot) in self.params.iter().zip(slots) {
            let value = match slot {
                Some(value) => value,
                None => param.default.clone().ok_or_else(|| {
                    MnemoError::key_derivation(format!(
                        "missing required argument: {}",
                        param.name
                    ))
                })?,
            };
            values.push((param.name.clone(), value));
        }

        Ok(BoundArgs { values })
    }
}

/// Builder for [`Signature`]
#[derive(Debug, Default)]
pub struct SignatureBuilder {
    params: Vec<Parameter>,
}

impl SignatureBuilder {
    /// Add a required parameter
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.params.push(Parameter::required(name));
        self
    }

    /// Add a parameter with a default value
    pub fn optional(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(Parameter::optional(name, default));
        self
    }

    /// Finish building, validating the parameter table
    pub fn build(self) -> MnemoResult<Signature> {
        Signature::new(self.params)
    }
}

/// Call-site argument data, before binding
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl CallArgs {
    /// Start an empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Append a keyword argument
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }
}

/// Arguments after binding and defaulting, in declared parameter order
#[derive(Debug, Clone, PartialEq)]
pub struct BoundArgs {
    values: Vec<(String, Value)>,
}

impl BoundArgs {
    /// Look up a bound argument by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Iterate bound (name, value) pairs in declared order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of bound arguments
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no arguments are bound
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

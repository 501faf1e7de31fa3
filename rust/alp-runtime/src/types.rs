//! Type registry and validator.
//!
//! Holds `@shape` record types and `@def` type definitions (aliases,
//! unions, literal enums, constrained scalars) in a single namespace, and
//! validates/coerces values against them. Validation is recursive and runs
//! in a fixed order: base-type check, then defaults, then constraints, then
//! subfield recursion.

use alp_core::node::{DefNode, ShapeNode};
use alp_core::value::{as_integer, as_number, type_name};
use alp_core::{AlpError, Result};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Type expressions
// ---------------------------------------------------------------------------

/// A parsed type expression as it appears in shape fields and defs.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Str,
    Int,
    Float,
    Bool,
    /// Timestamp, carried as an RFC 3339 string.
    Ts,
    /// `list` or `list<T>`.
    List(Option<Box<TypeExpr>>),
    /// `map` or `map<T>` (string keys, `T` values).
    Map(Option<Box<TypeExpr>>),
    /// Inline enum of string literals: `enum<a,b,c>`.
    Enum(Vec<String>),
    /// Reference to a registered shape or def.
    Ref(String),
}

impl TypeExpr {
    /// Parse a textual type expression. Unknown names become [`TypeExpr::Ref`];
    /// whether the reference resolves is checked at validation time.
    pub fn parse(spec: &str) -> Result<TypeExpr> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(AlpError::syntax("empty type expression"));
        }
        Ok(match spec {
            "str" => TypeExpr::Str,
            "int" => TypeExpr::Int,
            "float" => TypeExpr::Float,
            "bool" => TypeExpr::Bool,
            "ts" => TypeExpr::Ts,
            "list" => TypeExpr::List(None),
            "map" => TypeExpr::Map(None),
            _ => {
                if let Some(inner) = generic_param(spec, "list") {
                    TypeExpr::List(Some(Box::new(TypeExpr::parse(inner)?)))
                } else if let Some(inner) = generic_param(spec, "map") {
                    TypeExpr::Map(Some(Box::new(TypeExpr::parse(inner)?)))
                } else if let Some(inner) = generic_param(spec, "enum") {
                    let values: Vec<String> = inner
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                    if values.is_empty() {
                        return Err(AlpError::syntax(format!("enum '{spec}' has no values")));
                    }
                    TypeExpr::Enum(values)
                } else {
                    TypeExpr::Ref(spec.to_string())
                }
            }
        })
    }
}

fn generic_param<'a>(spec: &'a str, head: &str) -> Option<&'a str> {
    spec.strip_prefix(head)?
        .strip_prefix('<')?
        .strip_suffix('>')
}

// ---------------------------------------------------------------------------
// Registered entries
// ---------------------------------------------------------------------------

/// One field of a shape. A trailing `?` on the declared name marks the field
/// omittable.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeExpr,
    pub optional: bool,
}

/// A registered record type.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub id: String,
    pub fields: Vec<Field>,
    pub defaults: Map<String, Value>,
}

/// Scalar constraints on a constrained def.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Constraint {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// A registered `@def`.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    /// Another name for a single type expression.
    Alias(TypeExpr),
    /// Any of the listed types.
    Union(Vec<TypeExpr>),
    /// Exactly one literal value.
    Literal(Value),
    /// Finite set of literal values.
    LiteralEnum(Vec<Value>),
    /// Base scalar plus constraints.
    Constrained { base: TypeExpr, constraint: Constraint },
}

#[derive(Debug, Clone, PartialEq)]
enum TypeEntry {
    Shape(Shape),
    Def(TypeDef),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Shape and def registry. Immutable after load; shared by reference.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    entries: HashMap<String, TypeEntry>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry::default()
    }

    /// Register a `@shape`. Re-registering an identical body is idempotent;
    /// a differing body is `ErrDuplicate`.
    pub fn register_shape(&mut self, node: &ShapeNode) -> Result<()> {
        let mut fields = Vec::with_capacity(node.fields.len());
        for (declared, spec) in &node.fields {
            let spec = spec.as_str().ok_or_else(|| {
                AlpError::syntax(format!(
                    "shape '{}': field '{}' type must be a string",
                    node.id, declared
                ))
            })?;
            let (name, optional) = match declared.strip_suffix('?') {
                Some(base) => (base.to_string(), true),
                None => (declared.clone(), false),
            };
            fields.push(Field {
                name,
                ty: TypeExpr::parse(spec)?,
                optional,
            });
        }
        let shape = Shape {
            id: node.id.clone(),
            fields,
            defaults: node.defaults.clone(),
        };
        self.insert(node.id.clone(), TypeEntry::Shape(shape))
    }

    /// Register a `@def`.
    pub fn register_def(&mut self, node: &DefNode) -> Result<()> {
        let def = parse_def_body(node)?;
        self.insert(node.id.clone(), TypeEntry::Def(def))
    }

    fn insert(&mut self, id: String, entry: TypeEntry) -> Result<()> {
        match self.entries.get(&id) {
            Some(existing) if *existing == entry => Ok(()),
            Some(_) => Err(AlpError::duplicate(format!(
                "type '{id}' already registered with a different body"
            ))),
            None => {
                self.entries.insert(id, entry);
                Ok(())
            }
        }
    }

    /// Whether a type reference resolves.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Validate `value` against the named type, returning the coerced value
    /// (defaults applied, integral floats normalized to ints).
    pub fn validate(&self, type_ref: &str, value: &Value) -> Result<Value> {
        let entry = self
            .entries
            .get(type_ref)
            .ok_or_else(|| AlpError::unresolved(format!("unknown type '{type_ref}'")))?;
        match entry {
            TypeEntry::Shape(shape) => self.validate_shape(shape, value),
            TypeEntry::Def(def) => self.validate_def(type_ref, def, value),
        }
    }

    /// Validate against an inline type expression.
    pub fn validate_expr(&self, ty: &TypeExpr, value: &Value) -> Result<Value> {
        match ty {
            TypeExpr::Str => match value {
                Value::String(_) => Ok(value.clone()),
                other => Err(mismatch("str", other)),
            },
            TypeExpr::Int => match as_integer(value) {
                Some(i) => Ok(json!(i)),
                None => Err(mismatch("int", value)),
            },
            TypeExpr::Float => match as_number(value) {
                Some(_) => Ok(value.clone()),
                None => Err(mismatch("float", value)),
            },
            TypeExpr::Bool => match value {
                Value::Bool(_) => Ok(value.clone()),
                other => Err(mismatch("bool", other)),
            },
            TypeExpr::Ts => match value {
                Value::String(_) => Ok(value.clone()),
                other => Err(mismatch("ts", other)),
            },
            TypeExpr::List(item) => match value {
                Value::Array(items) => {
                    let coerced = match item {
                        Some(item_ty) => items
                            .iter()
                            .enumerate()
                            .map(|(i, v)| {
                                self.validate_expr(item_ty, v).map_err(|e| {
                                    AlpError::type_err(format!("element {i}: {}", e.message()))
                                })
                            })
                            .collect::<Result<Vec<_>>>()?,
                        None => items.clone(),
                    };
                    Ok(Value::Array(coerced))
                }
                other => Err(mismatch("list", other)),
            },
            TypeExpr::Map(item) => match value {
                Value::Object(entries) => {
                    let mut coerced = Map::new();
                    for (k, v) in entries {
                        let v = match item {
                            Some(item_ty) => self.validate_expr(item_ty, v).map_err(|e| {
                                AlpError::type_err(format!("key '{k}': {}", e.message()))
                            })?,
                            None => v.clone(),
                        };
                        coerced.insert(k.clone(), v);
                    }
                    Ok(Value::Object(coerced))
                }
                other => Err(mismatch("map", other)),
            },
            TypeExpr::Enum(values) => match value {
                Value::String(s) if values.contains(s) => Ok(value.clone()),
                other => Err(AlpError::type_err(format!(
                    "value {other} not in enum [{}]",
                    values.join(", ")
                ))),
            },
            TypeExpr::Ref(name) => self.validate(name, value),
        }
    }

    fn validate_shape(&self, shape: &Shape, value: &Value) -> Result<Value> {
        let object = match value {
            Value::Object(m) => m,
            other => {
                return Err(AlpError::type_err(format!(
                    "shape '{}': expected object, got {}",
                    shape.id,
                    type_name(other)
                )))
            }
        };

        // Defaults fill missing keys before the required check.
        let mut out = object.clone();
        for (key, default) in &shape.defaults {
            out.entry(key.clone()).or_insert_with(|| default.clone());
        }

        for field in &shape.fields {
            match out.get(&field.name) {
                None => {
                    if !field.optional {
                        return Err(AlpError::type_err(format!(
                            "shape '{}': missing required field '{}'",
                            shape.id, field.name
                        )));
                    }
                }
                Some(v) => {
                    let coerced = self.validate_expr(&field.ty, v).map_err(|e| {
                        AlpError::type_err(format!(
                            "shape '{}', field '{}': {}",
                            shape.id,
                            field.name,
                            e.message()
                        ))
                    })?;
                    out.insert(field.name.clone(), coerced);
                }
            }
        }
        // Unknown extra fields are permitted (lenient by default).
        Ok(Value::Object(out))
    }

    fn validate_def(&self, id: &str, def: &TypeDef, value: &Value) -> Result<Value> {
        match def {
            TypeDef::Alias(ty) => self.validate_expr(ty, value),
            TypeDef::Union(branches) => {
                for branch in branches {
                    if let Ok(coerced) = self.validate_expr(branch, value) {
                        return Ok(coerced);
                    }
                }
                Err(AlpError::type_err(format!(
                    "value {value} does not match any branch of union '{id}'"
                )))
            }
            TypeDef::Literal(expected) => {
                if value == expected {
                    Ok(value.clone())
                } else {
                    Err(AlpError::type_err(format!(
                        "value {value} does not match literal {expected}"
                    )))
                }
            }
            TypeDef::LiteralEnum(values) => {
                if values.contains(value) {
                    Ok(value.clone())
                } else {
                    Err(AlpError::type_err(format!(
                        "value {value} not in enum of '{id}'"
                    )))
                }
            }
            TypeDef::Constrained { base, constraint } => {
                let coerced = self.validate_expr(base, value)?;
                check_constraint(id, constraint, &coerced)?;
                Ok(coerced)
            }
        }
    }

    // -- JSON Schema projection ---------------------------------------------

    /// Convert a registered shape into a draft-07 JSON Schema object, used
    /// to prompt LLM providers. Def references resolve through aliases;
    /// non-shape defs project to a permissive object schema.
    pub fn shape_to_json_schema(&self, type_ref: &str) -> Result<Value> {
        let shape = match self.entries.get(type_ref) {
            Some(TypeEntry::Shape(shape)) => shape,
            Some(TypeEntry::Def(TypeDef::Alias(TypeExpr::Ref(inner)))) => {
                return self.shape_to_json_schema(inner)
            }
            Some(TypeEntry::Def(TypeDef::LiteralEnum(values))) => {
                return Ok(json!({
                    "$schema": "http://json-schema.org/draft-07/schema#",
                    "title": type_ref,
                    "enum": values,
                }))
            }
            Some(TypeEntry::Def(_)) => {
                return Ok(json!({
                    "$schema": "http://json-schema.org/draft-07/schema#",
                    "title": type_ref,
                    "type": "object",
                }))
            }
            None => {
                return Err(AlpError::unresolved(format!("unknown type '{type_ref}'")))
            }
        };

        let mut props = Map::new();
        let mut required = Vec::new();
        for field in &shape.fields {
            if !field.optional {
                required.push(Value::String(field.name.clone()));
            }
            props.insert(field.name.clone(), expr_to_schema(&field.ty));
        }
        Ok(json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": type_ref,
            "type": "object",
            "properties": props,
            "required": required,
            "additionalProperties": false,
        }))
    }
}

fn expr_to_schema(ty: &TypeExpr) -> Value {
    match ty {
        TypeExpr::Str => json!({"type": "string"}),
        TypeExpr::Int | TypeExpr::Float => json!({"type": "number"}),
        TypeExpr::Bool => json!({"type": "boolean"}),
        TypeExpr::Ts => json!({"type": "string", "format": "date-time"}),
        TypeExpr::Enum(values) => json!({"enum": values}),
        TypeExpr::List(item) => match item {
            Some(inner) => json!({"type": "array", "items": expr_to_schema(inner)}),
            None => json!({"type": "array"}),
        },
        TypeExpr::Map(item) => match item {
            Some(inner) => json!({"type": "object", "additionalProperties": expr_to_schema(inner)}),
            None => json!({"type": "object"}),
        },
        TypeExpr::Ref(_) => json!({"type": "object"}),
    }
}

fn mismatch(expected: &str, got: &Value) -> AlpError {
    AlpError::type_err(format!("expected {expected}, got {}", type_name(got)))
}

fn parse_def_body(node: &DefNode) -> Result<TypeDef> {
    match &node.type_spec {
        // Array of literals: ["success", "error", "pending"].
        Value::Array(values) => Ok(TypeDef::LiteralEnum(values.clone())),
        Value::String(spec) => {
            let spec = spec.trim();
            if spec.contains(" | ") {
                let branches = spec
                    .split(" | ")
                    .map(|part| TypeExpr::parse(part.trim()))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(TypeDef::Union(branches));
            }
            if let Some(literal) = spec.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                return Ok(TypeDef::Literal(Value::String(literal.to_string())));
            }
            let base = TypeExpr::parse(spec)?;
            match &node.constraint {
                Some(raw) => Ok(TypeDef::Constrained {
                    base,
                    constraint: parse_constraint(&node.id, raw)?,
                }),
                None => Ok(TypeDef::Alias(base)),
            }
        }
        other => Err(AlpError::syntax(format!(
            "def '{}': unsupported type spec {other}",
            node.id
        ))),
    }
}

fn parse_constraint(id: &str, raw: &Map<String, Value>) -> Result<Constraint> {
    let mut constraint = Constraint::default();
    for (key, value) in raw {
        match key.as_str() {
            "minLength" => constraint.min_length = value.as_u64().map(|v| v as usize),
            "maxLength" => constraint.max_length = value.as_u64().map(|v| v as usize),
            "pattern" => {
                let pattern = value
                    .as_str()
                    .ok_or_else(|| AlpError::syntax(format!("def '{id}': pattern must be a string")))?;
                // Compile once here so a bad pattern fails at load, not at
                // first validation.
                Regex::new(pattern)
                    .map_err(|e| AlpError::syntax(format!("def '{id}': invalid pattern: {e}")))?;
                constraint.pattern = Some(pattern.to_string());
            }
            "min" => constraint.min = value.as_f64(),
            "max" => constraint.max = value.as_f64(),
            other => {
                return Err(AlpError::syntax(format!(
                    "def '{id}': unknown constraint '{other}'"
                )))
            }
        }
    }
    Ok(constraint)
}

fn check_constraint(id: &str, constraint: &Constraint, value: &Value) -> Result<()> {
    if let Value::String(s) = value {
        let chars = s.chars().count();
        if let Some(min) = constraint.min_length {
            if chars < min {
                return Err(AlpError::type_err(format!(
                    "'{id}': length {chars} below minimum {min}"
                )));
            }
        }
        if let Some(max) = constraint.max_length {
            if chars > max {
                return Err(AlpError::type_err(format!(
                    "'{id}': length {chars} above maximum {max}"
                )));
            }
        }
        if let Some(pattern) = &constraint.pattern {
            let re = Regex::new(pattern)
                .map_err(|e| AlpError::syntax(format!("'{id}': invalid pattern: {e}")))?;
            if !re.is_match(s) {
                return Err(AlpError::type_err(format!(
                    "'{id}': value does not match pattern '{pattern}'"
                )));
            }
        }
    }
    if let Some(n) = as_number(value) {
        if let Some(min) = constraint.min {
            if n < min {
                return Err(AlpError::type_err(format!(
                    "'{id}': value {n} below minimum {min}"
                )));
            }
        }
        if let Some(max) = constraint.max {
            if n > max {
                return Err(AlpError::type_err(format!(
                    "'{id}': value {n} above maximum {max}"
                )));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

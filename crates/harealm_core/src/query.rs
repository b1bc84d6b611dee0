//! Query predicates and their compiled evaluators.
//!
//! A [`Predicate`] is an expression tree over property names. Compiling it
//! against an object schema and an [`Accessor`] validates every property
//! and operand and produces an [`Evaluator`] that tests rows directly.

use crate::accessor::Accessor;
use crate::error::{CoreError, CoreResult};
use crate::schema::{ObjectSchema, PropertyType, Schema};
use crate::value::Value;
use harealm_storage::{Cell, RowKey, Table};
use std::cmp::Ordering;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equality: `property == value`
    Eq,
    /// Inequality: `property != value`
    Ne,
    /// Less than: `property < value`
    Lt,
    /// Less than or equal: `property <= value`
    Lte,
    /// Greater than: `property > value`
    Gt,
    /// Greater than or equal: `property >= value`
    Gte,
    /// String prefix.
    BeginsWith,
    /// String suffix.
    EndsWith,
    /// Substring, or membership for array properties.
    Contains,
}

impl CompareOp {
    /// Returns the operator name for messages.
    #[must_use]
    pub fn op_name(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::BeginsWith => "BEGINSWITH",
            Self::EndsWith => "ENDSWITH",
            Self::Contains => "CONTAINS",
        }
    }

    fn is_range(self) -> bool {
        matches!(self, Self::Lt | Self::Lte | Self::Gt | Self::Gte)
    }

    fn is_string(self) -> bool {
        matches!(self, Self::BeginsWith | Self::EndsWith | Self::Contains)
    }
}

/// A filter expression over the properties of one type.
///
/// # Example
///
/// ```rust
/// use harealm_core::Predicate;
///
/// let adults_named_a = Predicate::gte("age", 18i64).and(Predicate::begins_with("name", "A"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Compares a property with a constant.
    Compare {
        /// Property name.
        property: String,
        /// Operator.
        op: CompareOp,
        /// Constant operand.
        value: Value,
    },
    /// Tests whether a property is null.
    IsNull {
        /// Property name.
        property: String,
    },
    /// All sub-predicates hold.
    And(Vec<Predicate>),
    /// Any sub-predicate holds.
    Or(Vec<Predicate>),
    /// The sub-predicate does not hold.
    Not(Box<Predicate>),
    /// Always holds.
    Always,
}

impl Predicate {
    fn compare(property: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            property: property.into(),
            op,
            value: value.into(),
        }
    }

    /// `property == value`
    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Eq, value)
    }

    /// `property != value`
    pub fn ne(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Ne, value)
    }

    /// `property < value`
    pub fn lt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Lt, value)
    }

    /// `property <= value`
    pub fn lte(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Lte, value)
    }

    /// `property > value`
    pub fn gt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Gt, value)
    }

    /// `property >= value`
    pub fn gte(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Gte, value)
    }

    /// String property starts with `prefix`.
    pub fn begins_with(property: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::compare(property, CompareOp::BeginsWith, Value::String(prefix.into()))
    }

    /// String property ends with `suffix`.
    pub fn ends_with(property: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self::compare(property, CompareOp::EndsWith, Value::String(suffix.into()))
    }

    /// String property contains `value`, or array property contains an object.
    pub fn contains(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Contains, value)
    }

    /// Property is null.
    pub fn is_null(property: impl Into<String>) -> Self {
        Self::IsNull {
            property: property.into(),
        }
    }

    /// The predicate that matches every row.
    #[must_use]
    pub fn always() -> Self {
        Self::Always
    }

    /// Conjunction with `other`.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::Always, p) | (p, Self::Always) => p,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), p) => {
                left.push(p);
                Self::And(left)
            }
            (p, q) => Self::And(vec![p, q]),
        }
    }

    /// Disjunction with `other`.
    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), p) => {
                left.push(p);
                Self::Or(left)
            }
            (p, q) => Self::Or(vec![p, q]),
        }
    }

    /// Negation.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::Not(inner) => *inner,
            p => Self::Not(Box::new(p)),
        }
    }

    /// Checks property names and operand types without binding columns.
    ///
    /// # Errors
    ///
    /// `InvalidProperty` for unknown properties, `InvalidValue` for operands
    /// or operators the property kind does not support.
    pub fn validate(&self, object_schema: &ObjectSchema) -> CoreResult<()> {
        self.build(&Context {
            object_schema,
            accessor: None,
            links: None,
        })
        .map(|_| ())
    }

    /// Compiles the predicate into an evaluator over the accessor's table.
    ///
    /// Object operands compare by row identity.
    ///
    /// # Errors
    ///
    /// Same as [`Predicate::validate`].
    pub fn compile(&self, object_schema: &ObjectSchema, accessor: &Accessor) -> CoreResult<Evaluator> {
        let root = self.build(&Context {
            object_schema,
            accessor: Some(accessor),
            links: None,
        })?;
        Ok(Evaluator { root })
    }

    /// Compiles within a realm session, so objects of other sessions never
    /// match.
    pub(crate) fn compile_in(
        &self,
        object_schema: &ObjectSchema,
        accessor: &Accessor,
        schema: &Schema,
        session: u64,
    ) -> CoreResult<Evaluator> {
        let root = self.build(&Context {
            object_schema,
            accessor: Some(accessor),
            links: Some((schema, session)),
        })?;
        Ok(Evaluator { root })
    }

    fn build(&self, cx: &Context<'_>) -> CoreResult<Node> {
        Ok(match self {
            Self::Always => Node::Const(true),
            Self::And(parts) => Node::And(parts.iter().map(|p| p.build(cx)).collect::<CoreResult<_>>()?),
            Self::Or(parts) => Node::Or(parts.iter().map(|p| p.build(cx)).collect::<CoreResult<_>>()?),
            Self::Not(inner) => Node::Not(Box::new(inner.build(cx)?)),
            Self::IsNull { property } => {
                let (column, kind) = cx.resolve(property)?;
                if kind == PropertyType::Array {
                    return Err(cx.unsupported(property, "IS NULL"));
                }
                Node::IsNull { column }
            }
            Self::Compare {
                property,
                op,
                value,
            } => cx.compare(property, *op, value)?,
        })
    }
}

struct Context<'a> {
    object_schema: &'a ObjectSchema,
    accessor: Option<&'a Accessor>,
    links: Option<(&'a Schema, u64)>,
}

impl Context<'_> {
    fn resolve(&self, property: &str) -> CoreResult<(usize, PropertyType)> {
        let index = self.object_schema.property_index(property).ok_or_else(|| {
            CoreError::invalid_property(self.object_schema.name(), property, "no such property")
        })?;
        let column = self.accessor.map_or(0, |a| a.column(index));
        Ok((column, self.object_schema.properties()[index].kind()))
    }

    fn unsupported(&self, property: &str, op: &str) -> CoreError {
        CoreError::invalid_value(
            self.object_schema.name(),
            property,
            format!("operator {op} is not supported for this property"),
        )
    }

    fn compare(&self, property: &str, op: CompareOp, value: &Value) -> CoreResult<Node> {
        let (column, kind) = self.resolve(property)?;
        let declared = self
            .object_schema
            .property(property)
            .ok_or_else(|| CoreError::invalid_property(self.object_schema.name(), property, "no such property"))?;

        match kind {
            PropertyType::Array => {
                if op != CompareOp::Contains {
                    return Err(self.unsupported(property, op.op_name()));
                }
                let key = self.link_operand(property, declared.object_type(), value)?;
                Ok(Node::ListContains { column, key })
            }
            PropertyType::Object => {
                if !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                    return Err(self.unsupported(property, op.op_name()));
                }
                let operand = match value {
                    Value::Null => Some(None),
                    _ => self
                        .link_operand(property, declared.object_type(), value)?
                        .map(Some),
                };
                let node = match operand {
                    Some(key) => Node::Compare {
                        column,
                        op: CompareOp::Eq,
                        operand: Cell::Link(key),
                    },
                    None => Node::Const(false),
                };
                Ok(if op == CompareOp::Ne {
                    Node::Not(Box::new(node))
                } else {
                    node
                })
            }
            _ => {
                let supported = if op.is_string() {
                    matches!(kind, PropertyType::String | PropertyType::Any)
                        && matches!(value, Value::String(_))
                } else if op.is_range() {
                    matches!(
                        kind,
                        PropertyType::Int
                            | PropertyType::Float
                            | PropertyType::Double
                            | PropertyType::Date
                            | PropertyType::Any
                    )
                } else {
                    true
                };
                if !supported {
                    return Err(self.unsupported(property, op.op_name()));
                }
                let operand = if op.is_string() {
                    Cell::String(value.as_str().unwrap_or_default().to_string())
                } else if value.is_null() && op == CompareOp::Eq {
                    return Ok(Node::IsNull { column });
                } else if value.is_null() && op == CompareOp::Ne {
                    return Ok(Node::Not(Box::new(Node::IsNull { column })));
                } else {
                    value.to_cell(self.object_schema.name(), declared)?
                };
                Ok(Node::Compare {
                    column,
                    op,
                    operand,
                })
            }
        }
    }

    /// Resolves an object operand to a row key, or `None` if it can never
    /// match in this session.
    fn link_operand(
        &self,
        property: &str,
        target: Option<&str>,
        value: &Value,
    ) -> CoreResult<Option<RowKey>> {
        let Value::Object(object) = value else {
            return Err(CoreError::invalid_value(
                self.object_schema.name(),
                property,
                format!("expected an object, got {}", value.type_name()),
            ));
        };
        match self.links {
            None => Ok(Some(object.row_key())),
            Some((schema, session)) => {
                let same_type = target.and_then(|t| schema.index_of(t)) == Some(object.schema_index());
                if object.session() != session || !same_type {
                    Ok(None)
                } else {
                    Ok(Some(object.row_key()))
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Compare {
        column: usize,
        op: CompareOp,
        operand: Cell,
    },
    IsNull {
        column: usize,
    },
    ListContains {
        column: usize,
        key: Option<RowKey>,
    },
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Const(bool),
}

/// A compiled predicate.
#[derive(Debug, Clone)]
pub struct Evaluator {
    root: Node,
}

impl Evaluator {
    /// Tests a row of the table the predicate was compiled for.
    ///
    /// Rows that cannot be read never match.
    #[must_use]
    pub fn matches(&self, table: &Table, row: RowKey) -> bool {
        Self::eval(&self.root, table, row)
    }

    fn eval(node: &Node, table: &Table, row: RowKey) -> bool {
        match node {
            Node::Const(b) => *b,
            Node::And(parts) => parts.iter().all(|p| Self::eval(p, table, row)),
            Node::Or(parts) => parts.iter().any(|p| Self::eval(p, table, row)),
            Node::Not(inner) => !Self::eval(inner, table, row),
            Node::IsNull { column } => table.get(row, *column).is_ok_and(Cell::is_null),
            Node::ListContains { column, key } => match (table.get(row, *column), key) {
                (Ok(Cell::LinkList(keys)), Some(key)) => keys.contains(key),
                _ => false,
            },
            Node::Compare {
                column,
                op,
                operand,
            } => table
                .get(row, *column)
                .is_ok_and(|cell| compare(cell, *op, operand)),
        }
    }
}

fn text(cell: &Cell) -> Option<&str> {
    match cell {
        Cell::String(s) => Some(s),
        Cell::Mixed(inner) => text(inner),
        _ => None,
    }
}

fn compare(cell: &Cell, op: CompareOp, operand: &Cell) -> bool {
    match op {
        CompareOp::BeginsWith => text(cell)
            .zip(text(operand))
            .is_some_and(|(s, p)| s.starts_with(p)),
        CompareOp::EndsWith => text(cell)
            .zip(text(operand))
            .is_some_and(|(s, p)| s.ends_with(p)),
        CompareOp::Contains => text(cell)
            .zip(text(operand))
            .is_some_and(|(s, p)| s.contains(p)),
        CompareOp::Eq => cell.compare(operand) == Some(Ordering::Equal),
        CompareOp::Ne => cell.compare(operand) != Some(Ordering::Equal),
        CompareOp::Lt => cell.compare(operand) == Some(Ordering::Less),
        CompareOp::Lte => matches!(cell.compare(operand), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => cell.compare(operand) == Some(Ordering::Greater),
        CompareOp::Gte => matches!(
            cell.compare(operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor;
    use crate::metadata;
    use crate::schema::Property;
    use harealm_storage::Group;

    fn dog_schema() -> ObjectSchema {
        ObjectSchema::builder("QueryDog")
            .property(Property::string("name"))
            .property(Property::int("age"))
            .property(Property::double("weight"))
            .property(Property::any("tag"))
            .build()
    }

    fn dogs() -> (Group, Vec<RowKey>) {
        let schema = dog_schema();
        let mut group = Group::new();
        metadata::create_type_table(&mut group, &schema).unwrap();
        let table = group.table_mut("class_QueryDog").unwrap();
        let mut rows = Vec::new();
        for (name, age, weight) in [("Rex", 3, 20.5), ("Fido", 7, 12.0), ("Rover", 5, 30.0)] {
            let row = table.add_row();
            table.set(row, 0, Cell::String(name.into())).unwrap();
            table.set(row, 1, Cell::Int(age)).unwrap();
            table.set(row, 2, Cell::Double(weight)).unwrap();
            rows.push(row);
        }
        (group, rows)
    }

    fn matching(predicate: &Predicate) -> Vec<usize> {
        let schema = dog_schema();
        let (group, rows) = dogs();
        let table = group.table("class_QueryDog").unwrap();
        let accessor = accessor::bind(&schema, table).unwrap();
        let evaluator = predicate.compile(&schema, &accessor).unwrap();
        rows.iter()
            .enumerate()
            .filter(|(_, row)| evaluator.matches(table, **row))
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn comparisons_match_rows() {
        assert_eq!(matching(&Predicate::eq("name", "Rex")), [0]);
        assert_eq!(matching(&Predicate::gt("age", 4i64)), [1, 2]);
        assert_eq!(matching(&Predicate::lte("weight", 20.5)), [0, 1]);
        assert_eq!(matching(&Predicate::ne("age", 7i64)), [0, 2]);
    }

    #[test]
    fn numeric_operands_coerce() {
        assert_eq!(matching(&Predicate::gt("weight", 25i64)), [2]);
    }

    #[test]
    fn string_operators() {
        assert_eq!(matching(&Predicate::begins_with("name", "R")), [0, 2]);
        assert_eq!(matching(&Predicate::ends_with("name", "do")), [1]);
        assert_eq!(matching(&Predicate::contains("name", "ov")), [2]);
    }

    #[test]
    fn boolean_composition() {
        let p = Predicate::begins_with("name", "R").and(Predicate::lt("age", 4i64));
        assert_eq!(matching(&p), [0]);
        let p = Predicate::eq("name", "Fido").or(Predicate::eq("age", 5i64));
        assert_eq!(matching(&p), [1, 2]);
        assert_eq!(matching(&Predicate::eq("name", "Rex").negate()), [1, 2]);
        assert_eq!(matching(&Predicate::always()), [0, 1, 2]);
    }

    #[test]
    fn any_property_null_check() {
        assert_eq!(matching(&Predicate::is_null("tag")), [0, 1, 2]);
        assert_eq!(matching(&Predicate::eq("tag", Value::Null)), [0, 1, 2]);
    }

    #[test]
    fn and_flattens_and_absorbs_always() {
        let p = Predicate::always().and(Predicate::eq("a", 1i64));
        assert_eq!(p, Predicate::eq("a", 1i64));
        let p = Predicate::eq("a", 1i64)
            .and(Predicate::eq("b", 2i64))
            .and(Predicate::eq("c", 3i64));
        assert!(matches!(p, Predicate::And(ref parts) if parts.len() == 3));
    }

    #[test]
    fn unknown_property_rejected() {
        let err = Predicate::eq("color", "brown")
            .validate(&dog_schema())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidProperty { .. }));
    }

    #[test]
    fn mismatched_operand_rejected() {
        let err = Predicate::eq("age", "old").validate(&dog_schema()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidValue { .. }));
        let err = Predicate::begins_with("age", "1")
            .validate(&dog_schema())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidValue { .. }));
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Query intermediate representation. A tagged variant of Select/Insert/
//! Update/Delete/Raw, each holding a dialect-free description of the
//! statement; [`crate::compiler`] turns these into backend SQL + args.

use std::collections::BTreeMap;

use qore_core::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
    Contains,
    StartsWith,
    EndsWith,
}

/// A where-condition tree over model-space field names.
#[derive(Debug, Clone)]
pub enum Condition {
    Leaf {
        field: String,
        op: Op,
        value: ConditionValue,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

#[derive(Debug, Clone)]
pub enum ConditionValue {
    Scalar(Value),
    List(Vec<Value>),
    None,
}

impl Condition {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        if value.is_null() {
            return Condition::Leaf {
                field: field.into(),
                op: Op::IsNull,
                value: ConditionValue::None,
            };
        }
        Condition::Leaf {
            field: field.into(),
            op: Op::Eq,
            value: ConditionValue::Scalar(value),
        }
    }

    pub fn not_eq(field: impl Into<String>, value: Value) -> Self {
        if value.is_null() {
            return Condition::Leaf {
                field: field.into(),
                op: Op::IsNotNull,
                value: ConditionValue::None,
            };
        }
        Condition::Leaf {
            field: field.into(),
            op: Op::NotEq,
            value: ConditionValue::Scalar(value),
        }
    }

    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Condition::Leaf {
            field: field.into(),
            op: Op::In,
            value: ConditionValue::List(values),
        }
    }

    pub fn and(conditions: Vec<Condition>) -> Self {
        Condition::And(conditions)
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Condition::Or(conditions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct OrderTerm {
    pub field: String,
    pub direction: Direction,
    pub nulls_first: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct IncludeOptions {
    pub select: Vec<String>,
    pub r#where: Option<Condition>,
    pub order_by: Vec<OrderTerm>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Include {
    pub relation_name: String,
    pub options: IncludeOptions,
    pub nested: Vec<Include>,
}

#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    pub model: String,
    pub select: Vec<String>,
    pub r#where: Option<Condition>,
    pub order_by: Vec<OrderTerm>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub includes: Vec<Include>,
}

#[derive(Debug, Clone)]
pub struct InsertQuery {
    pub model: String,
    pub data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct UpdateQuery {
    pub model: String,
    pub data: BTreeMap<String, Value>,
    pub r#where: Condition,
}

#[derive(Debug, Clone)]
pub struct DeleteQuery {
    pub model: String,
    pub r#where: Condition,
}

#[derive(Debug, Clone)]
pub struct RawQuery {
    pub sql: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone)]
pub enum Query {
    Select(SelectQuery),
    Insert(InsertQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
    Raw(RawQuery),
}

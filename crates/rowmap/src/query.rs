//! The query compiler: one expression tree, two evaluators.
//!
//! A query expression compiles to parameterized SQL (with auto-named
//! constants) for the database, and is also evaluated as a predicate over
//! in-memory rows using their raw lookup values. Execution runs the SQL,
//! materializes results through the identity map, then walks the entity's
//! dirty set: matching dirty rows join the result, non-matching ones are
//! removed, so reads stay consistent while changes are pending.

use crate::entity::Entity;
use crate::row::Row;
use crate::stmt::{quote_ident, select_columns};
use regex::Regex;
use rowmap_core::{
    Error, FieldKind, Result, SchemaErrorKind, StateErrorKind, Statement, Step, Value,
    ValueErrorKind,
};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::LazyLock;

static PARAM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid pattern"));

/// An untyped query expression argument, classified against the target
/// entity at compile time.
#[derive(Debug, Clone)]
pub enum Q {
    /// A string: an operator name, a leaf token, or a whitespace-separated
    /// expression.
    Str(String),
    /// A nested expression, or a one-element list wrapping a constant.
    List(Vec<Q>),
    /// A bare non-string constant.
    Val(Value),
}

impl From<&str> for Q {
    fn from(s: &str) -> Self {
        Q::Str(s.to_string())
    }
}

impl From<String> for Q {
    fn from(s: String) -> Self {
        Q::Str(s)
    }
}

impl From<i64> for Q {
    fn from(v: i64) -> Self {
        Q::Val(Value::Int(v))
    }
}

impl From<f64> for Q {
    fn from(v: f64) -> Self {
        Q::Val(Value::Real(v))
    }
}

impl From<Value> for Q {
    fn from(v: Value) -> Self {
        Q::Val(v)
    }
}

impl From<Vec<Q>> for Q {
    fn from(items: Vec<Q>) -> Self {
        Q::List(items)
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            ">" => Some(CmpOp::Gt),
            ">=" => Some(CmpOp::Ge),
            "<" => Some(CmpOp::Lt),
            "<=" => Some(CmpOp::Le),
            "=" => Some(CmpOp::Eq),
            "~=" | "!=" => Some(CmpOp::Ne),
            _ => None,
        }
    }

    const fn sql(self) -> &'static str {
        match self {
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
        }
    }
}

/// A leaf of the expression tree.
#[derive(Debug, Clone)]
pub(crate) enum Term {
    /// Reference to a persisted field of the target entity.
    Field(String),
    /// A path into a JSON field: `field.sub.sub`.
    JsonPath { field: String, path: Vec<String> },
    /// A named parameter supplied at execution time.
    Param(String),
    /// A constant, auto-named in the SQL form.
    Const(Value),
}

/// An expression node.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    All(Vec<Node>),
    Any(Vec<Node>),
    IsNull(Term),
    NotNull(Term),
    Cmp { op: CmpOp, lhs: Term, rhs: Term },
}

// ------------------------------------------------------------------
// Parsing
// ------------------------------------------------------------------

fn invalid(message: impl Into<String>) -> Error {
    Error::value_bare(ValueErrorKind::Uncoercible, message.into())
}

fn parse_expr(entity: &Entity, q: &Q) -> Result<Node> {
    match q {
        Q::Str(s) => {
            let tokens: Vec<Q> = s.split_whitespace().map(Q::from).collect();
            if tokens.len() < 2 {
                return Err(invalid(format!("'{s}' is not a query expression")));
            }
            parse_list(entity, &tokens)
        }
        Q::List(items) => parse_list(entity, items),
        Q::Val(v) => Err(invalid(format!("bare constant {v} is not an expression"))),
    }
}

fn parse_list(entity: &Entity, items: &[Q]) -> Result<Node> {
    let head = items.first().ok_or_else(|| invalid("empty query expression"))?;

    if let Q::Str(tag) = head {
        match tag.as_str() {
            "all" => {
                let nodes = items[1..]
                    .iter()
                    .map(|q| parse_expr(entity, q))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(Node::All(nodes));
            }
            "any" => {
                let nodes = items[1..]
                    .iter()
                    .map(|q| parse_expr(entity, q))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(Node::Any(nodes));
            }
            _ => {}
        }
    }

    match items.len() {
        2 => {
            let Q::Str(op) = &items[1] else {
                return Err(invalid("expected an operator name"));
            };
            let term = parse_term(entity, &items[0])?;
            match op.as_str() {
                "is_null" => Ok(Node::IsNull(term)),
                "is_not_null" => Ok(Node::NotNull(term)),
                other => Err(invalid(format!("unknown unary operator '{other}'"))),
            }
        }
        3 => {
            let Q::Str(op) = &items[1] else {
                return Err(invalid("expected a comparison operator"));
            };
            let op = CmpOp::from_token(op)
                .ok_or_else(|| invalid(format!("unknown operator '{op}'")))?;
            Ok(Node::Cmp {
                op,
                lhs: parse_term(entity, &items[0])?,
                rhs: parse_term(entity, &items[2])?,
            })
        }
        n => Err(invalid(format!("query expression of length {n}"))),
    }
}

fn parse_term(entity: &Entity, q: &Q) -> Result<Term> {
    match q {
        Q::Val(v) => Ok(Term::Const(v.clone())),
        Q::List(items) => match items.as_slice() {
            // A one-element list wraps a constant, shielding it from field
            // and parameter interpretation.
            [Q::Str(s)] => Ok(Term::Const(Value::Text(s.clone()))),
            [Q::Val(v)] => Ok(Term::Const(v.clone())),
            _ => Err(invalid("nested expression where a value was expected")),
        },
        Q::Str(token) => parse_token(entity, token),
    }
}

fn parse_token(entity: &Entity, token: &str) -> Result<Term> {
    if let Some(name) = token.strip_prefix(':') {
        let name = name.to_lowercase();
        if name.starts_with('_') {
            return Err(invalid(format!(
                "parameter name ':{name}' uses the reserved ':_' prefix"
            )));
        }
        if !PARAM_NAME.is_match(&name) {
            return Err(invalid(format!("invalid parameter name ':{name}'")));
        }
        return Ok(Term::Param(name));
    }

    if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        return Ok(Term::Const(Value::Text(token[1..token.len() - 1].to_string())));
    }

    let lowered = token.to_lowercase();
    if let Some((field, path)) = lowered.split_once('.') {
        if let Some(def) = entity.field(field) {
            if def.kind != FieldKind::Json {
                return Err(invalid(format!(
                    "'{field}' is not a json field; paths require one"
                )));
            }
            if cfg!(not(feature = "json")) {
                return Err(Error::schema(
                    SchemaErrorKind::JsonUnavailable,
                    "json support is not enabled; paths cannot be compiled",
                ));
            }
            return Ok(Term::JsonPath {
                field: field.to_string(),
                path: path.split('.').map(str::to_string).collect(),
            });
        }
    }

    if let Some(def) = entity.field(&lowered) {
        if def.virtual_nav {
            return Err(invalid(format!(
                "virtual field '{lowered}' cannot appear in a query"
            )));
        }
        return Ok(Term::Field(def.name.clone()));
    }

    // Bare constant: numeric if it parses, text otherwise.
    if let Ok(v) = token.parse::<i64>() {
        return Ok(Term::Const(Value::Int(v)));
    }
    if let Ok(v) = token.parse::<f64>() {
        return Ok(Term::Const(Value::Real(v)));
    }
    Ok(Term::Const(Value::Text(token.to_string())))
}

// ------------------------------------------------------------------
// Compilation
// ------------------------------------------------------------------

/// A compiled query: SQL for the database plus an equivalent predicate over
/// in-memory rows.
pub struct Query {
    entity: Rc<Entity>,
    node: Node,
    sql: String,
    consts: Vec<(String, Value)>,
    stmt: RefCell<Option<Box<dyn Statement>>>,
}

/// Compile query arguments against an entity. Multiple top-level arguments
/// are implicitly wrapped in `all`.
pub(crate) fn compile(entity: &Rc<Entity>, args: Vec<Q>) -> Result<Query> {
    let node = match args.len() {
        1 => parse_expr(entity, &args[0])?,
        _ => Node::All(
            args.iter()
                .map(|q| parse_expr(entity, q))
                .collect::<Result<Vec<_>>>()?,
        ),
    };
    compile_node(entity, node)
}

/// Compile a prebuilt expression node.
pub(crate) fn compile_node(entity: &Rc<Entity>, node: Node) -> Result<Query> {
    let mut consts = Vec::new();
    let where_sql = node_sql(&node, &mut consts);
    let sql = format!(
        "SELECT {}, rowid FROM {} WHERE {}",
        select_columns(entity),
        quote_ident(entity.name()),
        where_sql
    );
    tracing::debug!(entity = entity.name(), sql, "compiled query");
    Ok(Query {
        entity: Rc::clone(entity),
        node,
        sql,
        consts,
        stmt: RefCell::new(None),
    })
}

fn node_sql(node: &Node, consts: &mut Vec<(String, Value)>) -> String {
    match node {
        Node::All(nodes) => {
            if nodes.is_empty() {
                "(1 = 1)".to_string()
            } else {
                let parts: Vec<String> = nodes.iter().map(|n| node_sql(n, consts)).collect();
                format!("({})", parts.join(" AND "))
            }
        }
        Node::Any(nodes) => {
            if nodes.is_empty() {
                "(1 = 0)".to_string()
            } else {
                let parts: Vec<String> = nodes.iter().map(|n| node_sql(n, consts)).collect();
                format!("({})", parts.join(" OR "))
            }
        }
        Node::IsNull(term) => format!("{} IS NULL", term_sql(term, consts)),
        Node::NotNull(term) => format!("{} IS NOT NULL", term_sql(term, consts)),
        Node::Cmp { op, lhs, rhs } => format!(
            "{} {} {}",
            term_sql(lhs, consts),
            op.sql(),
            term_sql(rhs, consts)
        ),
    }
}

fn term_sql(term: &Term, consts: &mut Vec<(String, Value)>) -> String {
    match term {
        Term::Field(name) => quote_ident(name),
        Term::JsonPath { field, path } => format!(
            "json_extract({}, '$.{}')",
            quote_ident(field),
            path.join(".")
        ),
        Term::Param(name) => format!(":{name}"),
        Term::Const(value) => {
            let name = format!("_{}", consts.len() + 1);
            consts.push((name.clone(), value.clone()));
            format!(":{name}")
        }
    }
}

impl Query {
    /// The entity this query targets.
    pub fn entity(&self) -> &Rc<Entity> {
        &self.entity
    }

    /// The compiled SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Execute the query, merging database results with matching dirty rows.
    ///
    /// Execution is rejected while a transaction is active: the SQL side
    /// cannot see uncommitted overlay writes.
    pub fn run(&self, params: &[(&str, Value)]) -> Result<Vec<Rc<Row>>> {
        let session = self.entity.session()?;
        if session.in_txn() {
            return Err(Error::state(
                StateErrorKind::QueryInTransaction,
                "queries cannot run inside a transaction",
            ));
        }

        let bindings = self.merged_params(params);
        let fetched: Vec<Vec<Value>> = {
            let mut slot = self.stmt.borrow_mut();
            if slot.is_none() {
                *slot = Some(session.driver.prepare(&self.sql)?);
            }
            let stmt = slot.as_mut().expect("statement prepared above");
            stmt.reset()?;
            stmt.bind_named(&bindings)?;
            let mut rows = Vec::new();
            while session.step_stmt(stmt.as_mut())? == Step::Row {
                rows.push(stmt.values());
            }
            rows
        };

        let mut results = Vec::new();
        let mut seen = HashSet::new();
        for values in fetched {
            let row = self.entity.materialize(values)?;
            if seen.insert(row.serial()) {
                results.push(row);
            }
        }

        // Merge the dirty set: pending rows join on match, drop on mismatch.
        for row in self.entity.dirty_rows() {
            if row.deleted() {
                if seen.remove(&row.serial()) {
                    results.retain(|r| r.serial() != row.serial());
                }
                continue;
            }
            if self.test(&row, params)? {
                if seen.insert(row.serial()) {
                    results.push(row);
                }
            } else if seen.remove(&row.serial()) {
                results.retain(|r| r.serial() != row.serial());
            }
        }

        Ok(results)
    }

    /// Evaluate the predicate side against one row.
    pub fn test(&self, row: &Rc<Row>, params: &[(&str, Value)]) -> Result<bool> {
        let bindings = self.merged_params(params);
        eval_node(&self.node, row, &bindings)
    }

    fn merged_params(&self, params: &[(&str, Value)]) -> Vec<(String, Value)> {
        let mut merged: Vec<(String, Value)> = params
            .iter()
            .map(|(name, value)| (name.to_lowercase(), value.clone()))
            .collect();
        merged.extend(self.consts.iter().cloned());
        merged
    }
}

// ------------------------------------------------------------------
// Predicate evaluation
// ------------------------------------------------------------------

fn eval_node(node: &Node, row: &Rc<Row>, params: &[(String, Value)]) -> Result<bool> {
    match node {
        Node::All(nodes) => {
            for n in nodes {
                if !eval_node(n, row, params)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Node::Any(nodes) => {
            for n in nodes {
                if eval_node(n, row, params)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Node::IsNull(term) => Ok(term_value(term, row, params)?.is_null()),
        Node::NotNull(term) => Ok(!term_value(term, row, params)?.is_null()),
        Node::Cmp { op, lhs, rhs } => {
            let lhs = term_value(lhs, row, params)?;
            let rhs = term_value(rhs, row, params)?;
            Ok(compare(*op, &lhs, &rhs))
        }
    }
}

fn term_value(term: &Term, row: &Rc<Row>, params: &[(String, Value)]) -> Result<Value> {
    match term {
        Term::Field(name) => row.raw(name),
        Term::Param(name) => Ok(params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            // An unbound parameter compares like SQL's unbound NULL.
            .unwrap_or(Value::Null)),
        Term::Const(value) => Ok(value.clone()),
        #[cfg(feature = "json")]
        Term::JsonPath { field, path } => {
            use crate::row::Resolved;
            match row.get(field)? {
                Resolved::Json(proxy) => Ok(json_to_value(proxy.get(&path.join(".")))),
                _ => Ok(Value::Null),
            }
        }
        #[cfg(not(feature = "json"))]
        Term::JsonPath { .. } => Err(Error::schema(
            SchemaErrorKind::JsonUnavailable,
            "json support is not enabled",
        )),
    }
}

#[cfg(feature = "json")]
fn json_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Int(i64::from(b)),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Value::Int(v)
            } else {
                Value::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Text(s),
        // json_extract renders composite values as JSON text.
        other => Value::Text(other.to_string()),
    }
}

/// Comparison with SQL semantics: NULL never compares; mixed types order
/// numeric < text < blob.
fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> bool {
    use std::cmp::Ordering;

    if lhs.is_null() || rhs.is_null() {
        return false;
    }

    let ordering = match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (lhs, rhs) {
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            _ => Some(type_rank(lhs).cmp(&type_rank(rhs))),
        },
    };

    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Int(_) | Value::Real(_) => 1,
        Value::Text(_) => 2,
        Value::Blob(_) => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_follows_sql_null_semantics() {
        assert!(!compare(CmpOp::Eq, &Value::Null, &Value::Null));
        assert!(!compare(CmpOp::Ne, &Value::Null, &Value::Int(1)));
        assert!(!compare(CmpOp::Lt, &Value::Null, &Value::Int(1)));
    }

    #[test]
    fn compare_widens_integers() {
        assert!(compare(CmpOp::Eq, &Value::Int(5), &Value::Real(5.0)));
        assert!(compare(CmpOp::Gt, &Value::Real(5.5), &Value::Int(5)));
    }

    #[test]
    fn compare_orders_mixed_types_like_sqlite() {
        assert!(compare(CmpOp::Lt, &Value::Int(999), &Value::Text("a".into())));
        assert!(compare(
            CmpOp::Lt,
            &Value::Text("zzz".into()),
            &Value::Blob(vec![0])
        ));
        assert!(!compare(CmpOp::Eq, &Value::Int(1), &Value::Text("1".into())));
    }

    #[test]
    fn op_tokens() {
        assert_eq!(CmpOp::from_token("~="), Some(CmpOp::Ne));
        assert_eq!(CmpOp::from_token(">="), Some(CmpOp::Ge));
        assert_eq!(CmpOp::from_token("like"), None);
    }
}

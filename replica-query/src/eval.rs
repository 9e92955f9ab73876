//! Replica query evaluation
//!
//! Executes a structured select against an in-memory [`Dataset`] of entity
//! rows. Query shapes the replica cannot serve are reported as
//! [`StoreError::Unsupported`] so callers can fall back to the primary.

use crate::resolve::{short_name, Resolver, DEFAULT_MAX_DEPTH};
use replica_core::{
    relation_name, texts_name, BinaryOp, Cardinality, Column, Definition, Element, Expr, JoinKind,
    Model, Query, Relation, Row, Select, SetKind, Source, StoreError,
};
use serde_json::{Number, Value};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

pub type EvalResult<T> = Result<T, StoreError>;

const AGGREGATES: &[&str] = &["count", "sum", "min", "max", "avg"];

/// Rows per entity, keyed by qualified entity name.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    relations: HashMap<String, Vec<Row>>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: impl Into<String>, rows: Vec<Row>) {
        self.relations.insert(entity.into(), rows);
    }

    pub fn with_relation(mut self, entity: impl Into<String>, rows: Vec<Row>) -> Self {
        self.insert(entity, rows);
        self
    }

    pub fn rows(&self, entity: &str) -> Option<&[Row]> {
        self.relations.get(entity).map(Vec::as_slice)
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.relations.contains_key(entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }
}

/// One source row visible to expressions.
#[derive(Debug, Clone)]
struct Binding<'a> {
    name: Option<String>,
    entity: Option<&'a Definition>,
    row: Row,
}

type Frame<'a> = Vec<Binding<'a>>;

fn unsupported(reason: impl Into<String>) -> StoreError {
    StoreError::Unsupported {
        reason: reason.into(),
    }
}

/// Evaluates queries over a dataset.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    model: &'a Model,
    data: &'a Dataset,
    locale: Option<&'a str>,
    localized: bool,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(model: &'a Model, data: &'a Dataset) -> Self {
        Self {
            model,
            data,
            locale: None,
            localized: false,
            depth: 0,
        }
    }

    /// Locale used to overlay text variants on localized queries.
    pub fn with_locale(mut self, locale: Option<&'a str>) -> Self {
        self.locale = locale;
        self
    }

    pub fn execute(&self, query: &Query) -> EvalResult<Vec<Row>> {
        match query {
            Query::Native(_) => Err(unsupported("native statements have no structured source")),
            Query::Select(select) => {
                let evaluator = Self {
                    localized: select.localized,
                    ..*self
                };
                evaluator.select(select, &[])
            }
        }
    }

    fn select(&self, select: &Select, outer: &[&Frame<'a>]) -> EvalResult<Vec<Row>> {
        if select.search.is_some() {
            return Err(unsupported("full-text search"));
        }

        let mut frames = Vec::new();
        for frame in self.source(&select.from, outer)? {
            if self.matches(select.filter.as_ref(), &frame, outer)? {
                frames.push(frame);
            }
        }

        let mut rows = if select.columns.iter().any(is_aggregate) {
            let row = self.aggregate(&select.columns, &frames, outer)?;
            let frame = vec![Binding {
                name: None,
                entity: None,
                row,
            }];
            if self.matches(select.having.as_ref(), &frame, outer)? {
                frame.into_iter().map(|binding| binding.row).collect()
            } else {
                Vec::new()
            }
        } else {
            let mut projected = Vec::with_capacity(frames.len());
            for frame in frames {
                if !self.matches(select.having.as_ref(), &frame, outer)? {
                    continue;
                }
                let row = self.project(&select.columns, &frame, outer)?;
                let keys = select
                    .order_by
                    .iter()
                    .map(|order| self.sort_key(&order.expr, &frame, &row, outer))
                    .collect::<EvalResult<Vec<_>>>()?;
                projected.push((keys, row));
            }
            if !select.order_by.is_empty() {
                projected.sort_by(|(a, _), (b, _)| {
                    for ((x, y), order) in a.iter().zip(b).zip(&select.order_by) {
                        let ordering = compare_values(x, y);
                        let ordering = if order.descending {
                            ordering.reverse()
                        } else {
                            ordering
                        };
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                    Ordering::Equal
                });
            }
            projected.into_iter().map(|(_, row)| row).collect()
        };

        if select.distinct {
            rows = dedup(rows);
        }
        if let Some(limit) = select.limit {
            rows = rows
                .into_iter()
                .skip(limit.offset)
                .take(limit.rows)
                .collect();
        }
        if select.one {
            rows.truncate(1);
        }
        Ok(rows)
    }

    // ========================================================================
    // SOURCES
    // ========================================================================

    fn source(&self, source: &Source, outer: &[&Frame<'a>]) -> EvalResult<Vec<Frame<'a>>> {
        match source {
            Source::Scan(scan) => {
                let mut definition = self.model.get(&scan.entity);
                let mut rows = Vec::new();
                for row in self.entity_rows(&scan.entity)?.iter() {
                    let frame = vec![Binding {
                        name: None,
                        entity: definition,
                        row: row.clone(),
                    }];
                    if self.matches(scan.filter.as_ref(), &frame, outer)? {
                        rows.extend(frame.into_iter().map(|binding| binding.row));
                    }
                }

                let mut current = scan.entity.clone();
                for hop in &scan.path {
                    let relation = self.model.relation(&current, hop).ok_or_else(|| {
                        unsupported(format!("{current} has no relationship {hop}"))
                    })?;
                    let targets = self.entity_rows(&relation.target)?;
                    rows = targets
                        .iter()
                        .filter(|target| rows.iter().any(|row| joins(relation, row, target)))
                        .cloned()
                        .collect();
                    current = relation.target.clone();
                    definition = self.model.get(&current);
                }

                let name = scan
                    .alias
                    .clone()
                    .unwrap_or_else(|| short_name(&current).to_string());
                Ok(rows
                    .into_iter()
                    .map(|row| {
                        vec![Binding {
                            name: Some(name.clone()),
                            entity: definition,
                            row,
                        }]
                    })
                    .collect())
            }
            Source::Nested(inner) => {
                let entity = Resolver::new(self.model)
                    .target(inner)
                    .and_then(|name| self.model.get(&name));
                let rows = self.select(inner, outer)?;
                Ok(rows
                    .into_iter()
                    .map(|row| {
                        vec![Binding {
                            name: None,
                            entity,
                            row,
                        }]
                    })
                    .collect())
            }
            Source::Join(join) => self.join(join.kind, &join.args, join.on.as_ref(), outer),
            Source::Set(set) => {
                let mut rows = Vec::new();
                for arg in &set.args {
                    rows.extend(self.source(arg, outer)?.into_iter().map(flatten));
                }
                if set.kind == SetKind::Union {
                    rows = dedup(rows);
                }
                Ok(rows
                    .into_iter()
                    .map(|row| {
                        vec![Binding {
                            name: None,
                            entity: None,
                            row,
                        }]
                    })
                    .collect())
            }
        }
    }

    fn join(
        &self,
        kind: JoinKind,
        args: &[Source],
        on: Option<&Expr>,
        outer: &[&Frame<'a>],
    ) -> EvalResult<Vec<Frame<'a>>> {
        match kind {
            JoinKind::Inner => {
                if args.is_empty() {
                    return Err(unsupported("join without sources"));
                }
                let mut frames: Vec<Frame<'a>> = vec![Vec::new()];
                for arg in args {
                    let right = self.source(arg, outer)?;
                    frames = frames
                        .iter()
                        .flat_map(|left| {
                            right
                                .iter()
                                .map(move |r| left.iter().chain(r).cloned().collect::<Frame<'a>>())
                        })
                        .collect();
                }
                let mut joined = Vec::new();
                for frame in frames {
                    if self.matches(on, &frame, outer)? {
                        joined.push(frame);
                    }
                }
                Ok(joined)
            }
            JoinKind::Left => {
                let [left_source, right_source] = args else {
                    return Err(unsupported("left join needs exactly two sources"));
                };
                let left = self.source(left_source, outer)?;
                let right = self.source(right_source, outer)?;
                let mut joined = Vec::new();
                for left_frame in left {
                    let mut matched = false;
                    for right_frame in &right {
                        let frame: Frame<'a> = left_frame.iter().chain(right_frame).cloned().collect();
                        if self.matches(on, &frame, outer)? {
                            joined.push(frame);
                            matched = true;
                        }
                    }
                    if !matched {
                        let mut frame = left_frame;
                        frame.push(Binding {
                            name: source_name(right_source),
                            entity: None,
                            row: Row::new(),
                        });
                        joined.push(frame);
                    }
                }
                Ok(joined)
            }
        }
    }

    /// Rows of an entity; views run their defining query.
    fn entity_rows(&self, name: &str) -> EvalResult<Cow<'a, [Row]>> {
        if let Some(query) = self.model.get(name).and_then(|d| d.query.as_ref()) {
            if self.depth >= DEFAULT_MAX_DEPTH {
                return Err(unsupported(format!("view nesting too deep at {name}")));
            }
            let nested = Self {
                depth: self.depth + 1,
                ..*self
            };
            return nested.select(query, &[]).map(Cow::Owned);
        }

        let rows = self
            .data
            .rows(name)
            .ok_or_else(|| StoreError::UnknownRelation {
                relation: relation_name(name),
            })?;
        if self.localized {
            if let Some(localized) = self.localize(name, rows) {
                return Ok(Cow::Owned(localized));
            }
        }
        Ok(Cow::Borrowed(rows))
    }

    /// Overlay text-variant fields for the request locale.
    fn localize(&self, name: &str, rows: &[Row]) -> Option<Vec<Row>> {
        let locale = self.locale?;
        let definition = self.model.get(name)?;
        let texts = self.data.rows(&texts_name(name))?;

        Some(
            rows.iter()
                .map(|row| {
                    let mut localized = row.clone();
                    let text = texts.iter().find(|text| {
                        text.get("locale").and_then(Value::as_str) == Some(locale)
                            && definition.keys.iter().all(|key| {
                                matches!(
                                    (text.get(key), row.get(key)),
                                    (Some(a), Some(b)) if values_equal(a, b)
                                )
                            })
                    });
                    if let Some(text) = text {
                        for (field, value) in text {
                            if field != "locale" && !definition.keys.contains(field) && !value.is_null()
                            {
                                localized.insert(field.clone(), value.clone());
                            }
                        }
                    }
                    localized
                })
                .collect(),
        )
    }

    fn related(&self, relation: &Relation, row: &Row) -> EvalResult<Vec<Row>> {
        let targets = self.entity_rows(&relation.target)?;
        Ok(targets
            .iter()
            .filter(|target| joins(relation, row, target))
            .cloned()
            .collect())
    }

    // ========================================================================
    // PROJECTION
    // ========================================================================

    fn project(&self, columns: &[Column], frame: &Frame<'a>, outer: &[&Frame<'a>]) -> EvalResult<Row> {
        let mut row = Row::new();
        if columns.is_empty() || columns.iter().any(|c| matches!(c, Column::All)) {
            for binding in frame {
                for (key, value) in &binding.row {
                    row.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }

        for column in columns {
            match column {
                Column::All => {}
                Column::Expr { expr, .. } => {
                    let name = column
                        .output_name()
                        .ok_or_else(|| unsupported("unnamed expression column"))?;
                    row.insert(name, self.expr(expr, frame, outer)?);
                }
                Column::Expand { path, columns, .. } => {
                    let name = column
                        .output_name()
                        .ok_or_else(|| unsupported("unnamed expansion"))?;
                    row.insert(name, self.expand(path, columns, frame, outer)?);
                }
            }
        }
        Ok(row)
    }

    fn expand(
        &self,
        path: &[String],
        columns: &[Column],
        frame: &Frame<'a>,
        outer: &[&Frame<'a>],
    ) -> EvalResult<Value> {
        let (binding, segments) = locate(path, frame)
            .ok_or_else(|| unsupported(format!("cannot expand {}", path.join("."))))?;

        let mut definition = binding.entity;
        let mut rows = vec![binding.row.clone()];
        let mut many = false;
        for segment in segments {
            let relation = definition
                .and_then(|d| d.element(segment))
                .and_then(Element::relation_ref)
                .ok_or_else(|| unsupported(format!("{segment} is not a relationship")))?;
            let mut next = Vec::new();
            for row in &rows {
                next.extend(self.related(relation, row)?);
            }
            many |= relation.cardinality == Cardinality::Many;
            rows = next;
            definition = self.model.get(&relation.target);
        }

        let mut nested = Vec::with_capacity(rows.len());
        for row in rows {
            let frame = vec![Binding {
                name: None,
                entity: definition,
                row,
            }];
            nested.push(Value::Object(self.project(columns, &frame, outer)?));
        }
        Ok(if many {
            Value::Array(nested)
        } else {
            nested.into_iter().next().unwrap_or(Value::Null)
        })
    }

    fn aggregate(&self, columns: &[Column], frames: &[Frame<'a>], outer: &[&Frame<'a>]) -> EvalResult<Row> {
        let mut row = Row::new();
        for column in columns {
            let Column::Expr { expr, .. } = column else {
                return Err(unsupported("aggregate select with non-expression column"));
            };
            let name = column
                .output_name()
                .ok_or_else(|| unsupported("unnamed aggregate column"))?;
            let value = match expr {
                Expr::Func { name: func, args } if is_aggregate_name(func) => {
                    self.aggregate_value(func, args, frames, outer)?
                }
                Expr::Val(value) => value.clone(),
                _ => return Err(unsupported("plain column mixed with aggregates")),
            };
            row.insert(name, value);
        }
        Ok(row)
    }

    fn aggregate_value(
        &self,
        func: &str,
        args: &[Expr],
        frames: &[Frame<'a>],
        outer: &[&Frame<'a>],
    ) -> EvalResult<Value> {
        let func = func.to_ascii_lowercase();
        let values = match args {
            [Expr::Star] if func == "count" => return Ok(Value::from(frames.len() as u64)),
            [arg] => {
                let mut values = Vec::with_capacity(frames.len());
                for frame in frames {
                    let value = self.expr(arg, frame, outer)?;
                    if !value.is_null() {
                        values.push(value);
                    }
                }
                values
            }
            _ => return Err(unsupported(format!("{func} takes exactly one argument"))),
        };

        let sum = || values.iter().filter_map(Value::as_f64).sum::<f64>();
        Ok(match func.as_str() {
            "count" => Value::from(values.len() as u64),
            "sum" => number(sum()),
            "avg" if values.is_empty() => Value::Null,
            "avg" => number(sum() / values.len() as f64),
            "min" => values.iter().min_by(|a, b| compare_values(a, b)).cloned().unwrap_or(Value::Null),
            "max" => values.iter().max_by(|a, b| compare_values(a, b)).cloned().unwrap_or(Value::Null),
            other => return Err(unsupported(format!("aggregate {other}"))),
        })
    }

    // ========================================================================
    // EXPRESSIONS
    // ========================================================================

    fn matches(&self, expr: Option<&Expr>, frame: &Frame<'a>, outer: &[&Frame<'a>]) -> EvalResult<bool> {
        match expr {
            None => Ok(true),
            Some(expr) => Ok(truthy(&self.expr(expr, frame, outer)?)),
        }
    }

    fn sort_key(
        &self,
        expr: &Expr,
        frame: &Frame<'a>,
        projected: &Row,
        outer: &[&Frame<'a>],
    ) -> EvalResult<Value> {
        // Projected aliases take precedence for single names.
        if let Expr::Ref(path) = expr {
            if let [name] = path.as_slice() {
                if let Some(value) = projected.get(name) {
                    return Ok(value.clone());
                }
            }
        }
        self.expr(expr, frame, outer)
    }

    fn expr(&self, expr: &Expr, frame: &Frame<'a>, outer: &[&Frame<'a>]) -> EvalResult<Value> {
        Ok(match expr {
            Expr::Ref(path) => self.reference(path, frame, outer)?,
            Expr::Val(value) => value.clone(),
            Expr::Star => return Err(unsupported("* outside count(*)")),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs, frame, outer)?;
                let rhs = self.expr(rhs, frame, outer)?;
                binary(*op, &lhs, &rhs)
            }
            Expr::And(exprs) => {
                for expr in exprs {
                    if !truthy(&self.expr(expr, frame, outer)?) {
                        return Ok(Value::Bool(false));
                    }
                }
                Value::Bool(true)
            }
            Expr::Or(exprs) => {
                for expr in exprs {
                    if truthy(&self.expr(expr, frame, outer)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Value::Bool(false)
            }
            Expr::Not(inner) => Value::Bool(!truthy(&self.expr(inner, frame, outer)?)),
            Expr::IsNull { expr, negated } => {
                Value::Bool(self.expr(expr, frame, outer)?.is_null() != *negated)
            }
            Expr::In { expr, list } => {
                let value = self.expr(expr, frame, outer)?;
                if value.is_null() {
                    return Ok(Value::Bool(false));
                }
                for item in list {
                    let candidates = match item {
                        Expr::SubSelect(select) => self.column_values(select, frame, outer)?,
                        other => vec![self.expr(other, frame, outer)?],
                    };
                    if candidates.iter().any(|candidate| values_equal(&value, candidate)) {
                        return Ok(Value::Bool(true));
                    }
                }
                Value::Bool(false)
            }
            Expr::Func { name, args } => self.function(name, args, frame, outer)?,
            Expr::SubSelect(select) => self
                .column_values(select, frame, outer)?
                .into_iter()
                .next()
                .unwrap_or(Value::Null),
            Expr::Exists(select) => Value::Bool(!self.nested(select, frame, outer)?.is_empty()),
        })
    }

    fn function(&self, name: &str, args: &[Expr], frame: &Frame<'a>, outer: &[&Frame<'a>]) -> EvalResult<Value> {
        let name = name.to_ascii_lowercase();
        if is_aggregate_name(&name) {
            return Err(unsupported(format!("aggregate {name} outside a projection")));
        }
        let values = args
            .iter()
            .map(|arg| self.expr(arg, frame, outer))
            .collect::<EvalResult<Vec<_>>>()?;

        Ok(match (name.as_str(), values.as_slice()) {
            ("lower", [Value::String(s)]) => Value::String(s.to_lowercase()),
            ("upper", [Value::String(s)]) => Value::String(s.to_uppercase()),
            ("length", [Value::String(s)]) => Value::from(s.chars().count() as u64),
            ("lower" | "upper" | "length", [Value::Null]) => Value::Null,
            ("concat", values) => Value::String(values.iter().map(display).collect()),
            ("coalesce", values) => values
                .iter()
                .find(|value| !value.is_null())
                .cloned()
                .unwrap_or(Value::Null),
            _ => return Err(unsupported(format!("function {name}"))),
        })
    }

    fn nested(&self, select: &Select, frame: &Frame<'a>, outer: &[&Frame<'a>]) -> EvalResult<Vec<Row>> {
        let mut stack: Vec<&Frame<'a>> = outer.to_vec();
        stack.push(frame);
        self.select(select, &stack)
    }

    /// Values of the single projected column of a sub-select.
    fn column_values(&self, select: &Select, frame: &Frame<'a>, outer: &[&Frame<'a>]) -> EvalResult<Vec<Value>> {
        let rows = self.nested(select, frame, outer)?;
        let name = match (select.columns.as_slice(), rows.first()) {
            ([column], _) => column.output_name(),
            (_, Some(first)) if first.len() == 1 => first.keys().next().cloned(),
            (_, None) => return Ok(Vec::new()),
            _ => None,
        }
        .ok_or_else(|| unsupported("sub-select must project a single column"))?;

        Ok(rows
            .iter()
            .map(|row| row.get(&name).cloned().unwrap_or(Value::Null))
            .collect())
    }

    fn reference(&self, path: &[String], frame: &Frame<'a>, outer: &[&Frame<'a>]) -> EvalResult<Value> {
        if let Some((binding, segments)) = locate(path, frame) {
            return self.navigate(binding.entity, &binding.row, segments);
        }
        for outer_frame in outer.iter().rev() {
            if let Some((binding, segments)) = locate(path, outer_frame) {
                return self.navigate(binding.entity, &binding.row, segments);
            }
        }
        Ok(Value::Null)
    }

    fn navigate(&self, entity: Option<&'a Definition>, row: &Row, path: &[String]) -> EvalResult<Value> {
        let Some((first, rest)) = path.split_first() else {
            return Ok(Value::Object(row.clone()));
        };

        let relation = entity
            .and_then(|d| d.element(first))
            .and_then(Element::relation_ref);
        let Some(relation) = relation else {
            return match row.get(first) {
                Some(value) if rest.is_empty() => Ok(value.clone()),
                Some(Value::Object(object)) => self.navigate(None, object, rest),
                _ => Ok(Value::Null),
            };
        };

        if rest.is_empty() {
            if let Some(value) = row.get(first) {
                return Ok(value.clone());
            }
        }
        let related = self.related(relation, row)?;
        let target = self.model.get(&relation.target);
        match relation.cardinality {
            Cardinality::One => match related.first() {
                Some(next) => self.navigate(target, next, rest),
                None => Ok(Value::Null),
            },
            Cardinality::Many if rest.is_empty() => {
                Ok(Value::Array(related.into_iter().map(Value::Object).collect()))
            }
            Cardinality::Many => Err(unsupported(format!(
                "to-many path {first} in scalar position"
            ))),
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Find the binding a path starts from: an element of some binding first,
/// then a binding named by the first segment.
fn locate<'f, 'a>(path: &'f [String], frame: &'f Frame<'a>) -> Option<(&'f Binding<'a>, &'f [String])> {
    let (first, rest) = path.split_first()?;
    if let Some(binding) = frame.iter().find(|binding| {
        binding.row.contains_key(first)
            || binding.entity.is_some_and(|d| d.element(first).is_some())
    }) {
        return Some((binding, path));
    }
    if rest.is_empty() {
        return None;
    }
    frame
        .iter()
        .find(|binding| binding.name.as_deref() == Some(first.as_str()))
        .map(|binding| (binding, rest))
}

fn source_name(source: &Source) -> Option<String> {
    match source {
        Source::Scan(scan) => Some(
            scan.alias
                .clone()
                .unwrap_or_else(|| short_name(&scan.entity).to_string()),
        ),
        _ => None,
    }
}

fn joins(relation: &Relation, local: &Row, remote: &Row) -> bool {
    !relation.on.is_empty()
        && relation.on.iter().all(|(l, r)| match (local.get(l), remote.get(r)) {
            (Some(a), Some(b)) => !a.is_null() && values_equal(a, b),
            _ => false,
        })
}

fn flatten(frame: Frame<'_>) -> Row {
    let mut row = Row::new();
    for binding in frame {
        for (key, value) in binding.row {
            row.entry(key).or_insert(value);
        }
    }
    row
}

fn dedup(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(Value::Object(row.clone()).to_string()))
        .collect()
}

fn is_aggregate_name(name: &str) -> bool {
    AGGREGATES.iter().any(|a| a.eq_ignore_ascii_case(name))
}

fn is_aggregate(column: &Column) -> bool {
    matches!(
        column,
        Column::Expr { expr: Expr::Func { name, .. }, .. } if is_aggregate_name(name)
    )
}

fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Equality with numeric coercion between integer and float forms.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ if rank(a) == rank(b) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    if lhs.is_null() || rhs.is_null() {
        return Value::Null;
    }
    Value::Bool(match op {
        BinaryOp::Eq => values_equal(lhs, rhs),
        BinaryOp::Ne => !values_equal(lhs, rhs),
        BinaryOp::Lt => compare_values(lhs, rhs) == Ordering::Less,
        BinaryOp::Lte => compare_values(lhs, rhs) != Ordering::Greater,
        BinaryOp::Gt => compare_values(lhs, rhs) == Ordering::Greater,
        BinaryOp::Gte => compare_values(lhs, rhs) != Ordering::Less,
        BinaryOp::Like => match (lhs.as_str(), rhs.as_str()) {
            (Some(text), Some(pattern)) => like(text, pattern),
            _ => false,
        },
    })
}

/// SQL `LIKE` with `%` and `_` wildcards.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let mut matched = vec![false; text.len() + 1];
    matched[0] = true;

    for p in pattern.chars() {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut any = false;
                for (i, slot) in next.iter_mut().enumerate() {
                    any |= matched[i];
                    *slot = any;
                }
            }
            '_' => {
                for i in 1..=text.len() {
                    next[i] = matched[i - 1];
                }
            }
            c => {
                for i in 1..=text.len() {
                    next[i] = matched[i - 1] && text[i - 1] == c;
                }
            }
        }
        matched = next;
    }
    matched[text.len()]
}

// ============================================================================
// TESTS
// ============================================================================

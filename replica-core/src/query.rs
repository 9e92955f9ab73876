//! Structured read-query descriptor
//!
//! A closed, tagged representation of a read query. The resolver and the
//! evaluator match on it exhaustively; there is no field probing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a query interacts with the replication cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CacheDirective {
    /// Eligible for cache service.
    #[default]
    Default,
    /// The caller explicitly opted out of the cache.
    Skip,
    /// Issued by the cache itself while loading a replica.
    Internal,
}

/// A read query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    /// Structured select.
    Select(Select),
    /// Raw pass-through statement with no structured source.
    Native(String),
}

impl Query {
    /// Get the structured select, if any.
    pub fn as_select(&self) -> Option<&Select> {
        match self {
            Self::Select(select) => Some(select),
            Self::Native(_) => None,
        }
    }
}

impl From<Select> for Query {
    fn from(select: Select) -> Self {
        Self::Select(select)
    }
}

/// Row limit with offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub rows: usize,
    pub offset: usize,
}

/// A structured select.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub from: Source,
    pub columns: Vec<Column>,
    pub filter: Option<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<Limit>,
    /// Return at most a single row.
    pub one: bool,
    pub distinct: bool,
    /// Language-variant data requested.
    pub localized: bool,
    /// Full-text search term.
    pub search: Option<String>,
    pub cache: CacheDirective,
}

/// Source of a select.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Source {
    /// Named entity, optionally navigated through relationships.
    Scan(ScanRef),
    /// Nested query.
    Nested(Box<Select>),
    /// Join over several sources.
    Join(Join),
    /// Set composition over several sources.
    Set(SetOp),
}

/// Named entity reference with optional navigation path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRef {
    pub entity: String,
    /// Filter applied to the entity before navigating.
    pub filter: Option<Expr>,
    /// Relationship hops starting at `entity`.
    pub path: Vec<String>,
    pub alias: Option<String>,
}

impl ScanRef {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filter: None,
            path: Vec::new(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub args: Vec<Source>,
    pub on: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetKind {
    Union,
    UnionAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetOp {
    pub kind: SetKind,
    pub args: Vec<Source>,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    /// SQL-style pattern with `%` and `_`.
    Like,
}

/// Expression tree used by filters, projections and ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Element reference, possibly a relationship path (`author.name`).
    Ref(Vec<String>),
    Val(Value),
    /// The `*` argument of `count(*)`.
    Star,
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Func {
        name: String,
        args: Vec<Expr>,
    },
    SubSelect(Box<Select>),
    Exists(Box<Select>),
}

impl Expr {
    /// Element reference from a dotted path.
    pub fn col(path: &str) -> Self {
        Self::Ref(path.split('.').map(str::to_string).collect())
    }

    pub fn val(value: impl Into<Value>) -> Self {
        Self::Val(value.into())
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Eq, lhs, rhs)
    }

    pub fn count_all() -> Self {
        Self::Func {
            name: "count".to_string(),
            args: vec![Self::Star],
        }
    }
}

/// Projected column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    /// `*`
    All,
    Expr { expr: Expr, alias: Option<String> },
    /// Nested fetch of a related entity's fields.
    Expand {
        path: Vec<String>,
        columns: Vec<Column>,
        alias: Option<String>,
    },
}

impl Column {
    /// Plain column or dotted path, named after its last segment.
    pub fn path(path: &str) -> Self {
        Self::Expr {
            expr: Expr::col(path),
            alias: None,
        }
    }

    /// Column with an explicit alias.
    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self::Expr {
            expr,
            alias: Some(alias.into()),
        }
    }

    pub fn expand(path: &str, columns: Vec<Column>) -> Self {
        Self::Expand {
            path: path.split('.').map(str::to_string).collect(),
            columns,
            alias: None,
        }
    }

    /// Output name of this column.
    pub fn output_name(&self) -> Option<String> {
        match self {
            Self::All => None,
            Self::Expr { alias: Some(alias), .. } | Self::Expand { alias: Some(alias), .. } => {
                Some(alias.clone())
            }
            Self::Expr { expr, .. } => match expr {
                Expr::Ref(path) => path.last().cloned(),
                Expr::Func { name, .. } => Some(name.clone()),
                _ => None,
            },
            Self::Expand { path, .. } => path.last().cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub expr: Expr,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(path: &str) -> Self {
        Self {
            expr: Expr::col(path),
            descending: false,
        }
    }

    pub fn desc(path: &str) -> Self {
        Self {
            expr: Expr::col(path),
            descending: true,
        }
    }
}

// ============================================================================
// BUILDERS
// ============================================================================

impl Select {
    /// Select from a source with default settings.
    pub fn new(from: Source) -> Self {
        Self {
            from,
            columns: Vec::new(),
            filter: None,
            having: None,
            order_by: Vec::new(),
            limit: None,
            one: false,
            distinct: false,
            localized: false,
            search: None,
            cache: CacheDirective::Default,
        }
    }

    /// `SELECT * FROM entity`
    pub fn from_entity(entity: impl Into<String>) -> Self {
        Self::new(Source::Scan(ScanRef::new(entity)))
    }

    /// Select from an entity navigated through a relationship path.
    pub fn from_path(entity: impl Into<String>, path: &[&str]) -> Self {
        Self::new(Source::Scan(ScanRef::new(entity).with_path(path.iter().copied())))
    }

    /// Select from a nested query.
    pub fn from_select(inner: Select) -> Self {
        Self::new(Source::Nested(Box::new(inner)))
    }

    pub fn join(kind: JoinKind, args: Vec<Source>, on: Option<Expr>) -> Self {
        Self::new(Source::Join(Join { kind, args, on }))
    }

    pub fn union(kind: SetKind, args: Vec<Source>) -> Self {
        Self::new(Source::Set(SetOp { kind, args }))
    }

    pub fn columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn having(mut self, having: Expr) -> Self {
        self.having = Some(having);
        self
    }

    pub fn order_by(mut self, order_by: Vec<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn limit(mut self, rows: usize, offset: usize) -> Self {
        self.limit = Some(Limit { rows, offset });
        self
    }

    pub fn one(mut self) -> Self {
        self.one = true;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn localized(mut self) -> Self {
        self.localized = true;
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Opt this query out of cache service.
    pub fn skip_cache(mut self) -> Self {
        self.cache = CacheDirective::Skip;
        self
    }

    /// Mark this query as issued by the cache itself.
    pub fn internal(mut self) -> Self {
        self.cache = CacheDirective::Internal;
        self
    }

    /// Returns true if the cache must not intercept this query.
    pub fn bypasses_cache(&self) -> bool {
        self.cache != CacheDirective::Default
    }
}

//! Query reference resolution
//!
//! Maps a query descriptor to the sorted set of entity names it depends on.
//! Resolution is pure: it walks the descriptor and the model and never
//! touches data.

use replica_core::{
    texts_name, Column, Definition, ElementKind, Expr, Model, OrderBy, Query, ResolveError, Select,
    Source,
};
use std::collections::BTreeSet;

/// Sorted, deduplicated entity names.
pub type RefSet = BTreeSet<String>;

/// Default bound on nested selects and view expansion.
pub const DEFAULT_MAX_DEPTH: usize = 32;

type ResolveResult<T> = Result<T, ResolveError>;

/// Entities visible to the clauses of one select.
#[derive(Debug, Default)]
struct Scope<'m> {
    /// Entity that unqualified paths start from.
    target: Option<&'m Definition>,
    /// Named sources for qualified paths.
    aliases: Vec<(String, &'m Definition)>,
}

impl<'m> Scope<'m> {
    fn of(definition: &'m Definition) -> Self {
        Self {
            target: Some(definition),
            aliases: Vec::new(),
        }
    }

    fn alias(&self, name: &str) -> Option<&'m Definition> {
        self.aliases
            .iter()
            .find(|(alias, _)| alias == name)
            .map(|(_, definition)| *definition)
    }
}

/// Resolves query descriptors against a model.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'m> {
    model: &'m Model,
    max_depth: usize,
}

impl<'m> Resolver<'m> {
    pub fn new(model: &'m Model) -> Self {
        Self {
            model,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Entities a query depends on, expanding derived views into their base
    /// entities and adding text variants for localized queries when
    /// `expand_views` is set.
    ///
    /// Queries without a structured source resolve to the empty set.
    pub fn dependencies(&self, query: &Query, expand_views: bool) -> ResolveResult<RefSet> {
        let Some(select) = query.as_select() else {
            return Ok(RefSet::new());
        };
        let refs = self.select_refs(select)?;
        if !expand_views {
            return Ok(refs);
        }
        let refs = self.base_refs(&refs)?;
        Ok(self.localized_refs(select, refs))
    }

    /// Entities referenced by a select, without view expansion.
    pub fn query_refs(&self, query: &Query) -> ResolveResult<RefSet> {
        match query {
            Query::Select(select) => self.select_refs(select),
            Query::Native(_) => Ok(RefSet::new()),
        }
    }

    pub fn select_refs(&self, select: &Select) -> ResolveResult<RefSet> {
        let mut refs = RefSet::new();
        self.select(select, 0, &mut refs)?;
        Ok(refs)
    }

    /// Replace every derived view by the base entities its query depends on.
    ///
    /// Cyclic view definitions fail with [`ResolveError::DepthExceeded`].
    pub fn base_refs(&self, refs: &RefSet) -> ResolveResult<RefSet> {
        let mut base = RefSet::new();
        let mut stack = Vec::new();
        for name in refs {
            self.expand_view(name, &mut stack, &mut base)?;
        }
        Ok(base)
    }

    /// Add the text variant of each entity when the select is localized.
    pub fn localized_refs(&self, select: &Select, mut refs: RefSet) -> RefSet {
        if !select.localized {
            return refs;
        }
        let texts: Vec<String> = refs
            .iter()
            .filter(|name| self.model.text_variant(name).is_some())
            .map(|name| texts_name(name))
            .collect();
        refs.extend(texts);
        refs
    }

    /// Entity a select ultimately reads from, if it has a single one.
    pub fn target(&self, select: &Select) -> Option<String> {
        match &select.from {
            Source::Scan(scan) => {
                let mut current = scan.entity.clone();
                for hop in &scan.path {
                    current = self.model.relation(&current, hop)?.target.clone();
                }
                Some(current)
            }
            Source::Nested(inner) => self.target(inner),
            Source::Join(_) | Source::Set(_) => None,
        }
    }

    fn expand_view(
        &self,
        name: &str,
        stack: &mut Vec<String>,
        base: &mut RefSet,
    ) -> ResolveResult<()> {
        let Some(query) = self.model.get(name).and_then(|d| d.query.as_ref()) else {
            base.insert(name.to_string());
            return Ok(());
        };
        if stack.len() >= self.max_depth || stack.iter().any(|seen| seen == name) {
            return Err(ResolveError::DepthExceeded {
                entity: name.to_string(),
                depth: stack.len(),
            });
        }
        stack.push(name.to_string());
        for dependency in self.select_refs(query)? {
            self.expand_view(&dependency, stack, base)?;
        }
        stack.pop();
        Ok(())
    }

    fn select(&self, select: &Select, depth: usize, refs: &mut RefSet) -> ResolveResult<()> {
        if depth > self.max_depth {
            return Err(ResolveError::DepthExceeded {
                entity: self.target(select).unwrap_or_default(),
                depth,
            });
        }

        let scope = self.source(&select.from, depth, refs)?;

        for OrderBy { expr, .. } in &select.order_by {
            self.expr(&scope, expr, depth, refs)?;
        }
        for column in &select.columns {
            self.column(&scope, column, depth, refs)?;
        }
        if let Some(filter) = &select.filter {
            self.expr(&scope, filter, depth, refs)?;
        }
        if let Some(having) = &select.having {
            self.expr(&scope, having, depth, refs)?;
        }
        Ok(())
    }

    fn source(&self, source: &Source, depth: usize, refs: &mut RefSet) -> ResolveResult<Scope<'m>> {
        match source {
            Source::Scan(scan) => {
                refs.insert(scan.entity.clone());
                let Some(definition) = self.model.get(&scan.entity) else {
                    if let Some(hop) = scan.path.first() {
                        return Err(ResolveError::UnknownElement {
                            entity: scan.entity.clone(),
                            element: hop.clone(),
                        });
                    }
                    return Ok(Scope::default());
                };
                if let Some(filter) = &scan.filter {
                    self.expr(&Scope::of(definition), filter, depth, refs)?;
                }
                let target = self.walk(definition, &scan.path, refs)?;

                let mut scope = Scope {
                    target,
                    aliases: Vec::new(),
                };
                if let Some(target) = target {
                    let name = scan
                        .alias
                        .clone()
                        .unwrap_or_else(|| short_name(&target.name).to_string());
                    scope.aliases.push((name, target));
                }
                Ok(scope)
            }
            Source::Nested(inner) => {
                self.select(inner, depth + 1, refs)?;
                let target = self.target(inner).and_then(|name| self.model.get(&name));
                Ok(Scope {
                    target,
                    aliases: Vec::new(),
                })
            }
            Source::Join(join) => {
                let mut scope = Scope::default();
                for arg in &join.args {
                    scope.aliases.extend(self.source(arg, depth, refs)?.aliases);
                }
                if let Some(on) = &join.on {
                    self.expr(&scope, on, depth, refs)?;
                }
                Ok(scope)
            }
            Source::Set(set) => {
                for arg in &set.args {
                    self.source(arg, depth, refs)?;
                }
                Ok(Scope::default())
            }
        }
    }

    fn column(
        &self,
        scope: &Scope<'m>,
        column: &Column,
        depth: usize,
        refs: &mut RefSet,
    ) -> ResolveResult<()> {
        match column {
            Column::All => Ok(()),
            Column::Expr { expr, .. } => self.expr(scope, expr, depth, refs),
            Column::Expand { path, columns, .. } => {
                let Some(target) = self.path(scope, path, refs)? else {
                    return Ok(());
                };
                let nested = Scope::of(target);
                for column in columns {
                    self.column(&nested, column, depth, refs)?;
                }
                Ok(())
            }
        }
    }

    fn expr(&self, scope: &Scope<'m>, expr: &Expr, depth: usize, refs: &mut RefSet) -> ResolveResult<()> {
        match expr {
            Expr::Ref(path) => self.path(scope, path, refs).map(|_| ()),
            Expr::Val(_) | Expr::Star => Ok(()),
            Expr::Binary { lhs, rhs, .. } => {
                self.expr(scope, lhs, depth, refs)?;
                self.expr(scope, rhs, depth, refs)
            }
            Expr::And(exprs) | Expr::Or(exprs) | Expr::Func { args: exprs, .. } => exprs
                .iter()
                .try_for_each(|expr| self.expr(scope, expr, depth, refs)),
            Expr::Not(inner) | Expr::IsNull { expr: inner, .. } => {
                self.expr(scope, inner, depth, refs)
            }
            Expr::In { expr, list } => {
                self.expr(scope, expr, depth, refs)?;
                list.iter()
                    .try_for_each(|item| self.expr(scope, item, depth, refs))
            }
            Expr::SubSelect(select) | Expr::Exists(select) => self.select(select, depth + 1, refs),
        }
    }

    /// Resolve a path reference, returning the definition it ends on if
    /// every segment is a relationship.
    fn path(
        &self,
        scope: &Scope<'m>,
        path: &[String],
        refs: &mut RefSet,
    ) -> ResolveResult<Option<&'m Definition>> {
        let Some((first, rest)) = path.split_first() else {
            return Ok(None);
        };

        if let Some(target) = scope.target {
            if target.element(first).is_some() {
                return self.walk(target, path, refs);
            }
        }
        if !rest.is_empty() {
            if let Some(aliased) = scope.alias(first) {
                return self.walk(aliased, rest, refs);
            }
        }

        match scope.target {
            // Single names that are not elements refer to projected aliases.
            _ if rest.is_empty() => Ok(None),
            Some(target) => Err(ResolveError::UnknownElement {
                entity: target.name.clone(),
                element: first.clone(),
            }),
            None => Err(ResolveError::Ambiguous {
                reason: format!("path {} has no source entity", path.join(".")),
            }),
        }
    }

    /// Follow relationship hops from `start`, recording every target.
    fn walk(
        &self,
        start: &'m Definition,
        segments: &[String],
        refs: &mut RefSet,
    ) -> ResolveResult<Option<&'m Definition>> {
        let mut current = start;
        for (index, segment) in segments.iter().enumerate() {
            let element = current
                .element(segment)
                .ok_or_else(|| ResolveError::UnknownElement {
                    entity: current.name.clone(),
                    element: segment.clone(),
                })?;
            let ElementKind::Relation(relation) = &element.kind else {
                return Ok(None);
            };
            refs.insert(relation.target.clone());
            match self.model.get(&relation.target) {
                Some(next) => current = next,
                None if index + 1 == segments.len() => return Ok(None),
                None => {
                    return Err(ResolveError::UnknownDefinition {
                        name: relation.target.clone(),
                    })
                }
            }
        }
        Ok(Some(current))
    }
}

/// Last dotted segment of a qualified name.
pub(crate) fn short_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

// ============================================================================
// TESTS
// ============================================================================

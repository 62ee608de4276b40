//! Record formats, declared relations and the lookups the planner needs.
//!
//! The planner only ever reads the catalogue through the [`Catalog`] trait.
//! [`Schema`] is the in-memory implementation: formats and relations are
//! registered once, then the schema is shared immutably behind an `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, WeaveError};
use crate::sql::helpers::{validate_ident, validate_sql_type};

/// A named field and the storage column backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub column: String,
    /// Declared column type. Parameters compared against the column are
    /// cast to it, which keeps text-decoded values (uuid, timestamptz)
    /// usable as filter and link keys.
    pub sql_type: Option<String>,
}

/// A record format: ordered fields stored in one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    name: String,
    table: String,
    fields: Vec<Field>,
}

impl Format {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Format {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field stored in `column`.
    pub fn field(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            column: column.into(),
            sql_type: None,
        });
        self
    }

    /// Append a field whose column has a non-text type values must be cast to,
    /// e.g. `typed_field("id", "id", "uuid")`.
    pub fn typed_field(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        sql_type: impl Into<String>,
    ) -> Self {
        self.fields.push(Field {
            name: name.into(),
            column: column.into(),
            sql_type: Some(sql_type.into()),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn column_of(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| f.column.as_str())
    }

    pub fn sql_type_of(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .and_then(|f| f.sql_type.as_deref())
    }

    /// Column for `field`, or a configuration error naming the format.
    pub fn require_column(&self, field: &str) -> Result<&str> {
        self.column_of(field).ok_or_else(|| {
            WeaveError::config(format!("unknown field `{field}` on format `{}`", self.name))
        })
    }

    fn validate(&self) -> Result<()> {
        let check = |what: &str, ident: &str| {
            validate_ident(ident)
                .map_err(|e| WeaveError::config(format!("format `{}`: {what}: {e}", self.name)))
        };
        check("name", &self.name)?;
        check("table", &self.table)?;
        if self.fields.is_empty() {
            return Err(WeaveError::config(format!(
                "format `{}` declares no fields",
                self.name
            )));
        }
        for (i, field) in self.fields.iter().enumerate() {
            check("field", &field.name)?;
            check("column", &field.column)?;
            if let Some(sql_type) = &field.sql_type {
                validate_sql_type(sql_type).map_err(|e| {
                    WeaveError::config(format!("format `{}`: field `{}`: {e}", self.name, field.name))
                })?;
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(WeaveError::config(format!(
                    "format `{}` declares field `{}` twice",
                    self.name, field.name
                )));
            }
        }
        Ok(())
    }
}

/// `format.field`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub format: String,
    pub field: String,
}

impl FieldRef {
    pub fn new(format: impl Into<String>, field: impl Into<String>) -> Self {
        FieldRef {
            format: format.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.format, self.field)
    }
}

impl std::str::FromStr for FieldRef {
    type Err = WeaveError;

    /// Parse `format.field`.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().split_once('.') {
            Some((format, field)) if !format.is_empty() && !field.is_empty() => {
                Ok(FieldRef::new(format, field))
            }
            _ => Err(WeaveError::config(format!(
                "invalid field reference `{s}`, expected `format.field`"
            ))),
        }
    }
}

/// Intermediate table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Junction {
    pub table: String,
    /// Column holding the left endpoint's value.
    pub left_column: String,
    /// Column holding the right endpoint's value.
    pub right_column: String,
}

impl Junction {
    pub fn new(
        table: impl Into<String>,
        left_column: impl Into<String>,
        right_column: impl Into<String>,
    ) -> Self {
        Junction {
            table: table.into(),
            left_column: left_column.into(),
            right_column: right_column.into(),
        }
    }

    /// `{left}_{right}` with `{format}_{field}` columns. Self-referential
    /// relations get `_left`/`_right` suffixes so the columns stay distinct.
    pub fn derive(left: &FieldRef, right: &FieldRef) -> Self {
        let table = format!("{}_{}", left.format, right.format);
        let left_column = format!("{}_{}", left.format, left.field);
        let right_column = format!("{}_{}", right.format, right.field);
        if left_column == right_column {
            Junction::new(table, format!("{left_column}_left"), format!("{right_column}_right"))
        } else {
            Junction::new(table, left_column, right_column)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

/// A declared relation between two field references.
///
/// For `OneToMany`, `left` is the "one" side and `right` the "many" side, so
/// `Relation::one_to_many(user.id, article.author_id)` reads as "a user has
/// many articles".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    OneToOne {
        left: FieldRef,
        right: FieldRef,
    },
    OneToMany {
        left: FieldRef,
        right: FieldRef,
    },
    ManyToMany {
        left: FieldRef,
        right: FieldRef,
        junction: Junction,
    },
}

impl Relation {
    pub fn one_to_one(left: FieldRef, right: FieldRef) -> Self {
        Relation::OneToOne { left, right }
    }

    pub fn one_to_many(one: FieldRef, many: FieldRef) -> Self {
        Relation::OneToMany {
            left: one,
            right: many,
        }
    }

    /// Many-to-many with a derived junction table.
    pub fn many_to_many(left: FieldRef, right: FieldRef) -> Self {
        let junction = Junction::derive(&left, &right);
        Relation::ManyToMany {
            left,
            right,
            junction,
        }
    }

    /// Replace the derived junction of a many-to-many relation.
    pub fn with_junction(self, junction: Junction) -> Self {
        match self {
            Relation::ManyToMany { left, right, .. } => Relation::ManyToMany {
                left,
                right,
                junction,
            },
            other => other,
        }
    }

    pub fn kind(&self) -> RelationKind {
        match self {
            Relation::OneToOne { .. } => RelationKind::OneToOne,
            Relation::OneToMany { .. } => RelationKind::OneToMany,
            Relation::ManyToMany { .. } => RelationKind::ManyToMany,
        }
    }

    pub fn left(&self) -> &FieldRef {
        match self {
            Relation::OneToOne { left, .. }
            | Relation::OneToMany { left, .. }
            | Relation::ManyToMany { left, .. } => left,
        }
    }

    pub fn right(&self) -> &FieldRef {
        match self {
            Relation::OneToOne { right, .. }
            | Relation::OneToMany { right, .. }
            | Relation::ManyToMany { right, .. } => right,
        }
    }

    pub fn endpoint(&self, side: Side) -> &FieldRef {
        match side {
            Side::Left => self.left(),
            Side::Right => self.right(),
        }
    }

    pub fn junction(&self) -> Option<&Junction> {
        match self {
            Relation::ManyToMany { junction, .. } => Some(junction),
            _ => None,
        }
    }

    /// Whether the side opposite `local` holds many records.
    pub fn is_plural_from(&self, local: Side) -> bool {
        match self {
            Relation::OneToOne { .. } => false,
            Relation::OneToMany { .. } => local == Side::Left,
            Relation::ManyToMany { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// A relation seen from one of its formats.
#[derive(Debug, Clone)]
pub struct ResolvedRelation {
    pub relation: Arc<Relation>,
    /// The side the lookup started from.
    pub side: Side,
    pub foreign_format: Arc<Format>,
    pub is_plural: bool,
    pub local_field: FieldRef,
    pub foreign_field: FieldRef,
}

impl ResolvedRelation {
    pub fn kind(&self) -> RelationKind {
        self.relation.kind()
    }

    /// `(table, local column, foreign column)` of the junction, for many-to-many.
    pub fn junction_columns(&self) -> Option<(&str, &str, &str)> {
        self.relation.junction().map(|j| match self.side {
            Side::Left => (j.table.as_str(), j.left_column.as_str(), j.right_column.as_str()),
            Side::Right => (j.table.as_str(), j.right_column.as_str(), j.left_column.as_str()),
        })
    }
}

/// Read-only lookups consumed by the planner.
pub trait Catalog: Send + Sync {
    fn resolve_format(&self, name: &str) -> Result<Arc<Format>>;

    fn resolve_relation(&self, local_format: &str, relation: &str) -> Result<ResolvedRelation>;
}

/// In-memory catalogue.
#[derive(Debug, Default, Clone)]
pub struct Schema {
    formats: HashMap<String, Arc<Format>>,
    relations: HashMap<(String, String), (Arc<Relation>, Side)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_format(&mut self, format: Format) -> Result<()> {
        format.validate()?;
        if self.formats.contains_key(format.name()) {
            return Err(WeaveError::config(format!(
                "format `{}` is already registered",
                format.name()
            )));
        }
        self.formats.insert(format.name.clone(), Arc::new(format));
        Ok(())
    }

    /// Builder form of [`Schema::add_format`].
    pub fn with_format(mut self, format: Format) -> Result<Self> {
        self.add_format(format)?;
        Ok(self)
    }

    /// Register `relation`, naming it on the left format as `left_name` and on
    /// the right format as `right_name`. Either side may stay unnamed.
    pub fn relate(
        &mut self,
        relation: Relation,
        left_name: Option<&str>,
        right_name: Option<&str>,
    ) -> Result<()> {
        if left_name.is_none() && right_name.is_none() {
            return Err(WeaveError::config(format!(
                "relation {} -> {} has no name on either side",
                relation.left(),
                relation.right()
            )));
        }
        for side in [Side::Left, Side::Right] {
            let endpoint = relation.endpoint(side);
            let format = self.lookup(&endpoint.format)?;
            format.require_column(&endpoint.field)?;
        }
        if let Some(junction) = relation.junction() {
            for ident in [&junction.table, &junction.left_column, &junction.right_column] {
                validate_ident(ident).map_err(|e| WeaveError::config(format!("junction: {e}")))?;
            }
            if junction.left_column == junction.right_column {
                return Err(WeaveError::config(format!(
                    "junction `{}` uses `{}` for both endpoints",
                    junction.table, junction.left_column
                )));
            }
        }

        let names = [(Side::Left, left_name), (Side::Right, right_name)];
        for (side, name) in names {
            let Some(name) = name else { continue };
            let owner = &relation.endpoint(side).format;
            self.check_relation_name(owner, name)?;
        }
        if let (Some(l), Some(r)) = (left_name, right_name) {
            if l == r && relation.left().format == relation.right().format {
                return Err(WeaveError::config(format!(
                    "relation `{l}` on `{}` is named the same on both sides",
                    relation.left().format
                )));
            }
        }

        let relation = Arc::new(relation);
        for (side, name) in names {
            if let Some(name) = name {
                let owner = relation.endpoint(side).format.clone();
                self.relations
                    .insert((owner, name.to_string()), (relation.clone(), side));
            }
        }
        Ok(())
    }

    /// Builder form of [`Schema::relate`].
    pub fn with_relation(
        mut self,
        relation: Relation,
        left_name: Option<&str>,
        right_name: Option<&str>,
    ) -> Result<Self> {
        self.relate(relation, left_name, right_name)?;
        Ok(self)
    }

    /// Relation names declared on `format`, sorted.
    pub fn relation_names(&self, format: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .relations
            .keys()
            .filter(|(owner, _)| owner == format)
            .map(|(_, name)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    fn lookup(&self, name: &str) -> Result<&Arc<Format>> {
        self.formats
            .get(name)
            .ok_or_else(|| WeaveError::config(format!("unknown format `{name}`")))
    }

    fn check_relation_name(&self, owner: &str, name: &str) -> Result<()> {
        validate_ident(name)
            .map_err(|e| WeaveError::config(format!("relation on `{owner}`: {e}")))?;
        if self.lookup(owner)?.has_field(name) {
            return Err(WeaveError::config(format!(
                "relation `{name}` clashes with a field of `{owner}`"
            )));
        }
        if self
            .relations
            .contains_key(&(owner.to_string(), name.to_string()))
        {
            return Err(WeaveError::config(format!(
                "relation `{name}` is already declared on `{owner}`"
            )));
        }
        Ok(())
    }
}

impl Catalog for Schema {
    fn resolve_format(&self, name: &str) -> Result<Arc<Format>> {
        self.lookup(name).cloned()
    }

    fn resolve_relation(&self, local_format: &str, relation: &str) -> Result<ResolvedRelation> {
        let (rel, side) = self
            .relations
            .get(&(local_format.to_string(), relation.to_string()))
            .ok_or_else(|| {
                WeaveError::config(format!(
                    "unknown relation `{relation}` on format `{local_format}`"
                ))
            })?;
        let foreign_field = rel.endpoint(side.opposite()).clone();
        Ok(ResolvedRelation {
            relation: rel.clone(),
            side: *side,
            foreign_format: self.lookup(&foreign_field.format)?.clone(),
            is_plural: rel.is_plural_from(*side),
            local_field: rel.endpoint(*side).clone(),
            foreign_field,
        })
    }
}

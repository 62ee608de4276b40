//! Normalization of a request tree into the data-node arena.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::catalog::{Catalog, Format, RelationKind, ResolvedRelation};
use crate::error::{Result, WeaveError};
use crate::request::RequestNode;
use crate::sql::helpers::qualified;

pub type DataNodeId = usize;

/// How a data node hangs off its parent.
#[derive(Debug, Clone)]
pub struct Link {
    /// The relation as seen from the parent.
    pub relation: ResolvedRelation,
    /// Field of this node's format joined to the parent.
    pub field: String,
    /// Field of the parent's format this node is joined to.
    pub parent_field: String,
}

impl Link {
    pub fn is_many_to_many(&self) -> bool {
        self.relation.kind() == RelationKind::ManyToMany
    }
}

/// Field selection of one data node.
#[derive(Debug, Clone, Default)]
pub struct FieldsInfo {
    /// Fields projected by SQL, in format order.
    pub select: Vec<String>,
    /// Fields returned to the caller.
    pub keep: Vec<String>,
    /// field -> column alias, `"{node}.{field}"`
    pub aliases: BTreeMap<String, String>,
    /// field -> `"{node}"."{column}"`
    pub qualified: BTreeMap<String, String>,
    /// Selected only so parents and children can be matched.
    pub linkage_only: BTreeSet<String>,
}

impl FieldsInfo {
    pub fn alias(&self, field: &str) -> Result<&str> {
        self.aliases
            .get(field)
            .map(String::as_str)
            .ok_or_else(|| WeaveError::internal(format!("field `{field}` is not selected")))
    }

    pub fn qualified(&self, field: &str) -> Result<&str> {
        self.qualified
            .get(field)
            .map(String::as_str)
            .ok_or_else(|| WeaveError::internal(format!("field `{field}` is not selected")))
    }
}

/// One requested record, root or nested.
#[derive(Debug, Clone)]
pub struct DataNode {
    pub id: DataNodeId,
    pub format: Arc<Format>,
    pub is_plural: bool,
    pub parent: Option<DataNodeId>,
    /// relation name -> child, in request order
    pub children: IndexMap<String, DataNodeId>,
    /// `None` only for the root.
    pub link: Option<Link>,
    pub request: RequestNode,
    pub fields: FieldsInfo,
    /// Dotted path from the root, used in messages.
    pub path: String,
}

impl DataNode {
    /// Table alias in generated SQL.
    pub fn alias(&self) -> String {
        self.id.to_string()
    }

    /// Alias of the junction table joined for a many-to-many node.
    pub fn junction_alias(&self) -> String {
        format!("{}_j", self.id)
    }

    /// Column alias carrying the parent-side junction value.
    pub fn junction_local_alias(&self) -> String {
        format!("{}.#local", self.id)
    }

    /// Column alias carrying the foreign-side junction value.
    pub fn junction_foreign_alias(&self) -> String {
        format!("{}.#foreign", self.id)
    }

    /// Column alias whose value must equal the parent's link value.
    pub fn link_alias(&self) -> Result<String> {
        match &self.link {
            Some(link) if link.is_many_to_many() => Ok(self.junction_local_alias()),
            Some(link) => self.fields.alias(&link.field).map(str::to_string),
            None => Err(WeaveError::internal("the root node has no link")),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Build the arena for `request` rooted at `root_format`. Ids follow
/// pre-order, so a parent always precedes its children.
pub fn build_data_nodes(
    catalog: &dyn Catalog,
    root_format: &str,
    is_plural: bool,
    request: &RequestNode,
) -> Result<Vec<DataNode>> {
    let format = catalog.resolve_format(root_format)?;
    let mut nodes = Vec::new();
    visit(
        catalog,
        &mut nodes,
        format,
        is_plural,
        None,
        request,
        root_format.to_string(),
    )?;
    debug!(root = root_format, nodes = nodes.len(), "built data nodes");
    Ok(nodes)
}

fn visit(
    catalog: &dyn Catalog,
    nodes: &mut Vec<DataNode>,
    format: Arc<Format>,
    is_plural: bool,
    parent: Option<(DataNodeId, Link)>,
    request: &RequestNode,
    path: String,
) -> Result<DataNodeId> {
    request.query().validate(&format, is_plural, &path)?;

    let id = nodes.len();
    let (parent, link) = match parent {
        Some((parent, link)) => (Some(parent), Some(link)),
        None => (None, None),
    };
    nodes.push(DataNode {
        id,
        format: format.clone(),
        is_plural,
        parent,
        children: IndexMap::new(),
        link,
        request: request.clone(),
        fields: FieldsInfo::default(),
        path: path.clone(),
    });

    for (name, child_request) in &request.relations {
        let resolved = catalog.resolve_relation(format.name(), name).map_err(|e| match e {
            WeaveError::ConfigurationError(msg) => {
                WeaveError::config(format!("`{path}.{name}`: {msg}"))
            }
            other => other,
        })?;
        let link = Link {
            field: resolved.foreign_field.field.clone(),
            parent_field: resolved.local_field.field.clone(),
            relation: resolved.clone(),
        };
        let child = visit(
            catalog,
            nodes,
            resolved.foreign_format.clone(),
            resolved.is_plural,
            Some((id, link)),
            child_request,
            format!("{path}.{name}"),
        )?;
        nodes[id].children.insert(name.clone(), child);
    }

    let fields = fields_info(nodes, id)?;
    nodes[id].fields = fields;
    Ok(id)
}

fn fields_info(nodes: &[DataNode], id: DataNodeId) -> Result<FieldsInfo> {
    let node = &nodes[id];
    let format = &node.format;

    let keep: BTreeSet<&str> = match &node.request.fields {
        Some(explicit) => {
            let mut keep = BTreeSet::new();
            for field in explicit {
                if !format.has_field(field) {
                    return Err(WeaveError::config(format!(
                        "`{}`: unknown field `{field}` on format `{}`",
                        node.path,
                        format.name()
                    )));
                }
                keep.insert(field.as_str());
            }
            keep
        }
        None => format.fields().iter().map(|f| f.name.as_str()).collect(),
    };

    let mut wanted = keep.clone();
    for child in node.children.values() {
        if let Some(link) = &nodes[*child].link {
            wanted.insert(link.parent_field.as_str());
        }
    }
    if let Some(link) = &node.link {
        // many-to-many linkage rides on the junction columns
        if !link.is_many_to_many() {
            wanted.insert(link.field.as_str());
        }
    }

    let alias = node.alias();
    let mut info = FieldsInfo::default();
    for field in format.fields() {
        let name = field.name.as_str();
        if !wanted.contains(name) {
            continue;
        }
        info.select.push(name.to_string());
        info.aliases
            .insert(name.to_string(), format!("{alias}.{name}"));
        info.qualified
            .insert(name.to_string(), qualified(&alias, &field.column));
        if keep.contains(name) {
            info.keep.push(name.to_string());
        } else {
            info.linkage_only.insert(name.to_string());
        }
    }
    Ok(info)
}

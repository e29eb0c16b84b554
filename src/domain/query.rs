//! Query expressions for bulk reads.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use super::types::Value;

/// Columns to fetch for each record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSet {
    All,
    Columns(BTreeSet<String>),
}

impl ColumnSet {
    pub fn columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ColumnSet::Columns(names.into_iter().map(Into::into).collect())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, ColumnSet::All)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    Like,
    In,
    NotIn,
    Null,
    NotNull,
}

impl ConditionOperator {
    fn is_set_valued(self) -> bool {
        matches!(self, ConditionOperator::In | ConditionOperator::NotIn)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub attribute: String,
    pub operator: ConditionOperator,
    pub values: Vec<Value>,
}

impl Condition {
    pub fn new(
        attribute: impl Into<String>,
        operator: ConditionOperator,
        values: impl IntoIterator<Item = Value>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            values: values.into_iter().collect(),
        }
    }

    pub fn equal(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, ConditionOperator::Equal, [value.into()])
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Filter {
    pub operator: LogicalOperator,
    pub conditions: Vec<Condition>,
    pub filters: Vec<Filter>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.filters.iter().all(Filter::is_empty)
    }

    fn canonicalize(&mut self) -> Result<(), serde_json::Error> {
        for condition in &mut self.conditions {
            if condition.operator.is_set_valued() {
                Value::canonicalize_all(&mut condition.values)?;
            } else {
                for value in &mut condition.values {
                    value.canonicalize()?;
                }
            }
        }
        sort_by_encoding(&mut self.conditions)?;
        for filter in &mut self.filters {
            filter.canonicalize()?;
        }
        sort_by_encoding(&mut self.filters)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub attribute: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinOperator {
    #[default]
    Inner,
    LeftOuter,
}

/// A join onto another record type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkEntity {
    pub from_attribute: String,
    pub to_entity: String,
    pub to_attribute: String,
    pub alias: Option<String>,
    pub join: JoinOperator,
    pub columns: ColumnSet,
    pub criteria: Filter,
    pub links: Vec<LinkEntity>,
}

impl LinkEntity {
    pub fn new(
        from_attribute: impl Into<String>,
        to_entity: impl Into<String>,
        to_attribute: impl Into<String>,
    ) -> Self {
        Self {
            from_attribute: from_attribute.into(),
            to_entity: to_entity.into(),
            to_attribute: to_attribute.into(),
            alias: None,
            join: JoinOperator::Inner,
            columns: ColumnSet::Columns(BTreeSet::new()),
            criteria: Filter::default(),
            links: Vec::new(),
        }
    }

    fn canonicalize(&mut self) -> Result<(), serde_json::Error> {
        self.criteria.canonicalize()?;
        for link in &mut self.links {
            link.canonicalize()?;
        }
        sort_by_encoding(&mut self.links)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paging {
    pub page_number: u32,
    pub count: u32,
    pub cookie: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub entity_name: String,
    pub columns: ColumnSet,
    pub criteria: Filter,
    pub orders: Vec<Order>,
    pub links: Vec<LinkEntity>,
    pub distinct: bool,
    pub paging: Option<Paging>,
    pub top: Option<u32>,
}

impl Query {
    /// A query for every column of every record of `entity_name`.
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            columns: ColumnSet::All,
            criteria: Filter::default(),
            orders: Vec::new(),
            links: Vec::new(),
            distinct: false,
            paging: None,
            top: None,
        }
    }

    pub fn with_columns(mut self, columns: ColumnSet) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.criteria.conditions.push(condition);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.criteria.filters.push(filter);
        self
    }

    pub fn with_order(mut self, attribute: impl Into<String>, descending: bool) -> Self {
        self.orders.push(Order {
            attribute: attribute.into(),
            descending,
        });
        self
    }

    pub fn with_link(mut self, link: LinkEntity) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn with_paging(mut self, page_number: u32, count: u32, cookie: Option<String>) -> Self {
        self.paging = Some(Paging {
            page_number,
            count,
            cookie,
        });
        self
    }

    pub fn with_top(mut self, top: u32) -> Self {
        self.top = Some(top);
        self
    }

    /// All columns, no filter, no ordering, no joins, no paging.
    pub fn is_unrestricted(&self) -> bool {
        self.columns.is_all()
            && self.criteria.is_empty()
            && self.orders.is_empty()
            && self.links.is_empty()
            && self.paging.is_none()
            && self.top.is_none()
    }

    /// Every record type this query reads, including joined ones.
    pub fn entity_names(&self) -> BTreeSet<&str> {
        fn walk<'a>(links: &'a [LinkEntity], names: &mut BTreeSet<&'a str>) {
            for link in links {
                names.insert(&link.to_entity);
                walk(&link.links, names);
            }
        }

        let mut names = BTreeSet::from([self.entity_name.as_str()]);
        walk(&self.links, &mut names);
        names
    }

    pub(crate) fn canonicalize(&mut self) -> Result<(), serde_json::Error> {
        self.criteria.canonicalize()?;
        for link in &mut self.links {
            link.canonicalize()?;
        }
        sort_by_encoding(&mut self.links)
    }
}

/// Related-record sub-queries attached to a single-record read, keyed by
/// relationship name.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct RelationshipQueryCollection(BTreeMap<String, Arc<Query>>);

impl RelationshipQueryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, relationship: impl Into<String>, query: Query) -> Self {
        self.0.insert(relationship.into(), Arc::new(query));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Query>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The single entry, if there is exactly one.
    pub fn single(&self) -> Option<(&String, &Arc<Query>)> {
        match self.0.len() {
            1 => self.0.iter().next(),
            _ => None,
        }
    }

    pub(crate) fn canonicalize(&mut self) -> Result<(), serde_json::Error> {
        for query in self.0.values_mut() {
            Arc::make_mut(query).canonicalize()?;
        }
        Ok(())
    }
}

/// Sort items by their JSON encoding. Used for collections whose order
/// carries no meaning. On an encode error `items` is left as it was.
pub(crate) fn sort_by_encoding<T: Serialize>(items: &mut Vec<T>) -> Result<(), serde_json::Error> {
    let encodings = items
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    let mut keyed: Vec<(String, T)> = encodings.into_iter().zip(items.drain(..)).collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    items.extend(keyed.into_iter().map(|(_, item)| item));
    Ok(())
}

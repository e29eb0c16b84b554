//! Dependency tokens and the extractor that derives them from requests.
//!
//! A cached response depends on every record, record type and schema bucket
//! it was computed from. The extractor walks the request parameters and the
//! response and returns an over-approximation of that set: extra tokens only
//! cost an occasional unnecessary invalidation, a missing one leaves a stale
//! entry behind for good.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{
    Entity, EntityCollection, EntityRef, Filter, LinkEntity, Query, RecordId, Request,
    RequestKind, Response, Value,
};

/// A string naming a group of cache entries that are invalidated together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyToken(String);

impl DependencyToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DependencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders tokens under a namespace prefix. Every token is a pure function
/// of the prefix, the type name and (for instances) the record id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenScheme {
    prefix: String,
}

impl TokenScheme {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn instance(&self, type_name: &str, id: &RecordId) -> DependencyToken {
        DependencyToken(format!("{}:entity:{}:{}", self.prefix, type_name, id))
    }

    pub fn class(&self, type_name: &str) -> DependencyToken {
        DependencyToken(format!("{}:entity:{}", self.prefix, type_name))
    }

    pub fn metadata(&self) -> DependencyToken {
        DependencyToken(format!("{}:metadata:*", self.prefix))
    }

    pub fn content(&self) -> DependencyToken {
        DependencyToken(format!("{}:content:*", self.prefix))
    }

    /// Removing this token clears the whole store.
    pub fn all(&self) -> DependencyToken {
        DependencyToken(format!("{}:*", self.prefix))
    }

    /// Class token, plus the instance token when the reference carries an id.
    pub fn entity(&self, reference: &EntityRef) -> Vec<DependencyToken> {
        let mut tokens = vec![self.class(&reference.type_name)];
        if let Some(id) = &reference.id {
            tokens.push(self.instance(&reference.type_name, id));
        }
        tokens
    }
}

/// How a request interacts with the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Reads records; depends on the content bucket.
    Content,
    /// Reads schema; depends on the metadata bucket.
    Metadata,
    /// Anything else. Never cached, always invalidates.
    Mutation,
}

impl RequestClass {
    pub fn is_cacheable(self) -> bool {
        !matches!(self, RequestClass::Mutation)
    }
}

/// Sorts requests into content reads, metadata reads and mutations.
///
/// Generic messages are mutations unless explicitly listed as read-only.
#[derive(Debug, Clone, Default)]
pub struct RequestClassifier {
    read_only_requests: BTreeSet<String>,
}

impl RequestClassifier {
    pub fn new(read_only_requests: BTreeSet<String>) -> Self {
        Self { read_only_requests }
    }

    pub fn classify(&self, request: &Request) -> RequestClass {
        match request.kind {
            RequestKind::SingleRecordRead | RequestKind::BulkRead => RequestClass::Content,
            RequestKind::MetadataRead | RequestKind::RelationshipRead => RequestClass::Metadata,
            RequestKind::Generic if self.read_only_requests.contains(&request.name) => {
                RequestClass::Content
            }
            RequestKind::Generic => RequestClass::Mutation,
        }
    }
}

const SCHEMA_VERBS: [&str; 3] = ["Create", "Update", "Delete"];
const SCHEMA_OBJECTS: [&str; 6] = [
    "Entity",
    "Attribute",
    "Relationship",
    "OneToManyRelationship",
    "ManyToManyRelationship",
    "OptionSet",
];

/// Messages that change schema rather than records.
pub fn is_schema_mutation(name: &str) -> bool {
    name.starts_with("Publish")
        || SCHEMA_VERBS.iter().any(|verb| {
            name.strip_prefix(verb)
                .is_some_and(|object| SCHEMA_OBJECTS.contains(&object))
        })
}

/// Computes the dependency set of a request/response pair.
#[derive(Debug, Clone)]
pub struct DependencyExtractor {
    scheme: TokenScheme,
    classifier: RequestClassifier,
}

impl DependencyExtractor {
    pub fn new(scheme: TokenScheme, classifier: RequestClassifier) -> Self {
        Self { scheme, classifier }
    }

    pub fn scheme(&self) -> &TokenScheme {
        &self.scheme
    }

    pub fn classifier(&self) -> &RequestClassifier {
        &self.classifier
    }

    pub fn extract(&self, request: &Request, response: Option<&Response>) -> BTreeSet<DependencyToken> {
        let mut walk = Walk::new(&self.scheme);
        let class = self.classifier.classify(request);

        match class {
            RequestClass::Content => walk.insert(self.scheme.content()),
            RequestClass::Metadata => walk.insert(self.scheme.metadata()),
            RequestClass::Mutation if is_schema_mutation(&request.name) => {
                walk.insert(self.scheme.metadata())
            }
            RequestClass::Mutation => {}
        }

        for value in request.parameters.values() {
            walk.value(value);
        }
        if let Some(response) = response {
            walk.response(response);
        }

        // A mutation that names no record could have touched any of them.
        if class == RequestClass::Mutation && walk.tokens.is_empty() {
            walk.insert(self.scheme.content());
        }

        walk.tokens
    }
}

/// Recursive, identity-tracked traversal. Shared `Arc` nodes are walked once.
struct Walk<'a> {
    scheme: &'a TokenScheme,
    visited: HashSet<*const ()>,
    tokens: BTreeSet<DependencyToken>,
}

impl<'a> Walk<'a> {
    fn new(scheme: &'a TokenScheme) -> Self {
        Self {
            scheme,
            visited: HashSet::new(),
            tokens: BTreeSet::new(),
        }
    }

    fn insert(&mut self, token: DependencyToken) {
        self.tokens.insert(token);
    }

    fn first_visit<T>(&mut self, node: &Arc<T>) -> bool {
        self.visited.insert(Arc::as_ptr(node).cast::<()>())
    }

    fn value(&mut self, value: &Value) {
        match value {
            Value::EntityRef(reference) => self.reference(reference),
            Value::EntityRefs(references) => references.iter().for_each(|r| self.reference(r)),
            Value::Entity(entity) => self.entity(entity),
            Value::Entities(collection) => self.collection(collection),
            Value::Query(query) => self.query(query),
            Value::RelatedQueries(queries) => {
                for (_, query) in queries.iter() {
                    self.query(query);
                }
            }
            Value::Null
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Text(_)
            | Value::Guid(_)
            | Value::Columns(_) => {}
        }
    }

    fn response(&mut self, response: &Response) {
        match response {
            Response::Entity(entity) => self.entity(entity),
            Response::Entities(collection) => self.collection(collection),
            Response::Values(values) => values.values().for_each(|value| self.value(value)),
            Response::Metadata(_) | Response::Created(_) | Response::Empty => {}
        }
    }

    fn reference(&mut self, reference: &EntityRef) {
        self.tokens.extend(self.scheme.entity(reference));
    }

    fn entity(&mut self, entity: &Arc<Entity>) {
        if !self.first_visit(entity) {
            return;
        }
        self.insert(self.scheme.class(&entity.type_name));
        if let Some(id) = &entity.id {
            self.insert(self.scheme.instance(&entity.type_name, id));
        }
        for value in entity.attributes.values() {
            self.value(value);
        }
        for related in entity.related.values() {
            self.collection(related);
        }
    }

    fn collection(&mut self, collection: &Arc<EntityCollection>) {
        if !self.first_visit(collection) {
            return;
        }
        // Declared type counts even for an empty result: a later create of
        // that type must still reach this entry.
        self.insert(self.scheme.class(&collection.type_name));
        for entity in &collection.entities {
            self.entity(entity);
        }
    }

    fn query(&mut self, query: &Arc<Query>) {
        if !self.first_visit(query) {
            return;
        }
        for name in query.entity_names() {
            self.insert(self.scheme.class(name));
        }
        self.filter(&query.criteria);
        query.links.iter().for_each(|link| self.link(link));
    }

    fn filter(&mut self, filter: &Filter) {
        for condition in &filter.conditions {
            condition.values.iter().for_each(|value| self.value(value));
        }
        filter.filters.iter().for_each(|nested| self.filter(nested));
    }

    fn link(&mut self, link: &LinkEntity) {
        self.filter(&link.criteria);
        link.links.iter().for_each(|nested| self.link(nested));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ColumnSet, Condition, EntityFilters, RelationshipQueryCollection};

    fn extractor() -> DependencyExtractor {
        DependencyExtractor::new(
            TokenScheme::new("test"),
            RequestClassifier::new(BTreeSet::from(["WhoAmI".to_string()])),
        )
    }

    fn tokens(items: &[&str]) -> BTreeSet<DependencyToken> {
        items.iter().map(|item| DependencyToken(item.to_string())).collect()
    }

    #[test]
    fn token_shapes() {
        let scheme = TokenScheme::new("xrm");
        assert_eq!(scheme.instance("widget", &RecordId::from(42u64)).as_str(), "xrm:entity:widget:42");
        assert_eq!(scheme.class("widget").as_str(), "xrm:entity:widget");
        assert_eq!(scheme.metadata().as_str(), "xrm:metadata:*");
        assert_eq!(scheme.content().as_str(), "xrm:content:*");
        assert_eq!(scheme.all().as_str(), "xrm:*");
        assert_eq!(scheme.entity(&EntityRef::class("widget")), vec![scheme.class("widget")]);
    }

    #[test]
    fn single_record_read_depends_on_instance_class_and_content() {
        let request = Request::retrieve(EntityRef::new("Widget", 42u64), ColumnSet::All);
        let response = Response::from(Entity::new("Widget").with_id(42u64).with_attribute("name", "A"));

        let deps = extractor().extract(&request, Some(&response));

        assert_eq!(
            deps,
            tokens(&["test:content:*", "test:entity:Widget", "test:entity:Widget:42"])
        );
    }

    #[test]
    fn empty_bulk_result_still_depends_on_declared_type() {
        let request = Request::retrieve_multiple(Query::new("widget"));
        let response = Response::from(EntityCollection::new("widget"));

        let deps = extractor().extract(&request, Some(&response));

        assert!(deps.contains(&TokenScheme::new("test").class("widget")));
    }

    #[test]
    fn bulk_result_contributes_every_record() {
        let request = Request::retrieve_multiple(Query::new("widget"));
        let response = Response::from(EntityCollection::new("widget").with_entities([
            Entity::new("widget").with_id("1"),
            Entity::new("widget").with_id("2"),
        ]));

        let deps = extractor().extract(&request, Some(&response));

        assert!(deps.contains(&DependencyToken("test:entity:widget:1".to_string())));
        assert!(deps.contains(&DependencyToken("test:entity:widget:2".to_string())));
    }

    #[test]
    fn related_collections_and_sub_queries_are_walked() {
        let related = RelationshipQueryCollection::new().with("account_contacts", Query::new("contact"));
        let request = Request::retrieve_with_related(EntityRef::new("account", "a1"), ColumnSet::All, related);
        let response = Response::from(Entity::new("account").with_id("a1").with_related(
            "account_contacts",
            EntityCollection::new("contact").with_entities([Entity::new("contact").with_id("c1")]),
        ));

        let deps = extractor().extract(&request, Some(&response));

        assert!(deps.contains(&DependencyToken("test:entity:contact".to_string())));
        assert!(deps.contains(&DependencyToken("test:entity:contact:c1".to_string())));
        assert!(deps.contains(&DependencyToken("test:entity:account:a1".to_string())));
    }

    #[test]
    fn linked_entities_contribute_class_tokens() {
        let query = Query::new("account").with_link(LinkEntity::new("primarycontactid", "contact", "contactid"));
        let deps = extractor().extract(&Request::retrieve_multiple(query), None);

        assert!(deps.contains(&DependencyToken("test:entity:account".to_string())));
        assert!(deps.contains(&DependencyToken("test:entity:contact".to_string())));
    }

    #[test]
    fn nested_filters_and_link_criteria_are_walked() {
        let mut nested = Filter::default();
        nested.filters.push(Filter {
            conditions: vec![Condition::equal("parentid", EntityRef::new("account", "a9"))],
            ..Filter::default()
        });
        let mut owner = LinkEntity::new("ownerid", "user", "userid");
        owner.criteria.conditions.push(Condition::equal("teamid", EntityRef::new("team", "t1")));
        let mut contact = LinkEntity::new("primarycontactid", "contact", "contactid");
        contact.links.push(owner);

        let query = Query::new("account").with_filter(nested).with_link(contact);
        let deps = extractor().extract(&Request::retrieve_multiple(query), None);

        assert!(deps.contains(&DependencyToken("test:entity:account:a9".to_string())));
        assert!(deps.contains(&DependencyToken("test:entity:team:t1".to_string())));
        assert!(deps.contains(&DependencyToken("test:entity:user".to_string())));
    }

    #[test]
    fn metadata_reads_depend_on_metadata_bucket_only() {
        let request = Request::retrieve_entity("account", EntityFilters::ALL, false);
        let deps = extractor().extract(&request, None);
        assert_eq!(deps, tokens(&["test:metadata:*"]));
    }

    #[test]
    fn shared_nodes_are_walked_once_and_deduplicated() {
        let shared = Arc::new(Entity::new("widget").with_id("7"));
        let request = Request::generic("Touch")
            .with_parameter("First", Value::Entity(Arc::clone(&shared)))
            .with_parameter("Second", Value::Entity(Arc::clone(&shared)));

        let deps = extractor().extract(&request, Some(&Response::Entity(shared)));

        assert_eq!(deps, tokens(&["test:entity:widget", "test:entity:widget:7"]));
    }

    #[test]
    fn unscoped_mutation_falls_back_to_content_bucket() {
        let request = Request::generic("Ping").with_parameter("Count", 3).with_parameter("Label", "x");
        assert_eq!(extractor().extract(&request, None), tokens(&["test:content:*"]));
    }

    #[test]
    fn scalars_contribute_nothing() {
        let request = Request::generic("WhoAmI").with_parameter("Count", 3);
        assert_eq!(extractor().extract(&request, None), tokens(&["test:content:*"]));
    }

    #[test]
    fn classification() {
        let classifier = extractor().classifier().clone();
        assert_eq!(classifier.classify(&Request::generic("WhoAmI")), RequestClass::Content);
        assert_eq!(classifier.classify(&Request::generic("SetState")), RequestClass::Mutation);
        assert_eq!(
            classifier.classify(&Request::retrieve_relationship("account_contacts", false)),
            RequestClass::Metadata
        );
        assert!(!RequestClass::Mutation.is_cacheable());
    }

    #[test]
    fn schema_mutations_flush_metadata() {
        assert!(is_schema_mutation("PublishAllXml"));
        assert!(is_schema_mutation("CreateAttribute"));
        assert!(is_schema_mutation("DeleteOptionSet"));
        assert!(!is_schema_mutation("Create"));
        assert!(!is_schema_mutation("UpdateWidget"));

        let deps = extractor().extract(&Request::generic("PublishXml"), None);
        assert_eq!(deps, tokens(&["test:metadata:*"]));
    }
}

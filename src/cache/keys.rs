//! Cache key derivation.
//!
//! The common request shapes get short templated keys; everything else is
//! keyed by a canonical JSON encoding of the request.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::request::{
    MESSAGE_RETRIEVE, MESSAGE_RETRIEVE_ALL_ENTITIES, MESSAGE_RETRIEVE_ENTITY,
    MESSAGE_RETRIEVE_MULTIPLE, MESSAGE_RETRIEVE_RELATIONSHIP, PARAM_AS_IF_PUBLISHED,
    PARAM_COLUMN_SET, PARAM_ENTITY_FILTERS, PARAM_LOGICAL_NAME, PARAM_NAME, PARAM_QUERY,
    PARAM_RELATED_QUERIES, PARAM_TARGET,
};
use crate::domain::{EntityRef, Request, RequestKind, Value};
use crate::error::KeyError;

use super::config::CacheConfig;

/// Builds cache keys of the form `{namespace}[:{connection}]:{body}[#{selector}]`.
///
/// Every caller-supplied scalar is percent-escaped, so `:`
/// only ever separates template fields and `#` only ever opens the selector.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    prefix: String,
    hash_keys: bool,
}

impl CacheKeyBuilder {
    pub fn new(namespace: &str, connection_id: Option<&str>, hash_keys: bool) -> Self {
        let prefix = match connection_id {
            Some(connection) if hash_keys => format!("{namespace}:{}", hash_text(connection)),
            Some(connection) => format!("{namespace}:{}", escape_segment(connection)),
            None => namespace.to_string(),
        };
        Self { prefix, hash_keys }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            &config.namespace,
            config.connection_id.as_deref(),
            config.hash_keys,
        )
    }

    /// Derive the key for `request`. An explicit key is returned verbatim.
    pub fn build(&self, request: &Request) -> Result<String, KeyError> {
        if let Some(key) = &request.key {
            return Ok(key.clone());
        }

        let body = match simple_key(request) {
            Some(body) => body,
            None => canonical_key(request)?,
        };
        let body = if self.hash_keys { hash_text(&body) } else { body };

        Ok(match &request.selector {
            Some(selector) => format!("{}:{body}#{}", self.prefix, escape_segment(selector)),
            None => format!("{}:{body}", self.prefix),
        })
    }
}

/// Percent-encode the characters that carry structure in a key.
fn escape_segment(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '#' => escaped.push_str("%23"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Templated key for the dominant request shapes, or `None` if `request`
/// has any parameter the template would drop.
fn simple_key(request: &Request) -> Option<String> {
    let params = &request.parameters;
    match (request.kind, request.name.as_str()) {
        (RequestKind::SingleRecordRead, MESSAGE_RETRIEVE) => {
            let (type_name, id) = match params.get(PARAM_TARGET)? {
                Value::EntityRef(EntityRef {
                    type_name,
                    id: Some(id),
                }) => (escape_segment(type_name), escape_segment(id.as_str())),
                _ => return None,
            };
            if !matches!(params.get(PARAM_COLUMN_SET)?, Value::Columns(columns) if columns.is_all()) {
                return None;
            }
            match params.get(PARAM_RELATED_QUERIES) {
                None if params.len() == 2 => Some(format!("retrieve:{type_name}:{id}")),
                Some(Value::RelatedQueries(related)) if params.len() == 3 => {
                    let (relationship, query) = related.single()?;
                    query.is_unrestricted().then(|| {
                        format!(
                            "retrieve:{type_name}:{id}:{}:{}",
                            escape_segment(relationship),
                            escape_segment(&query.entity_name)
                        )
                    })
                }
                _ => None,
            }
        }
        (RequestKind::MetadataRead, MESSAGE_RETRIEVE_ALL_ENTITIES) if params.len() == 2 => {
            let (filters, published) = metadata_flags(params)?;
            Some(format!("metadata:all:{filters}:{published}"))
        }
        (RequestKind::MetadataRead, MESSAGE_RETRIEVE_ENTITY) if params.len() == 3 => {
            let (filters, published) = metadata_flags(params)?;
            let name = escape_segment(params.get(PARAM_LOGICAL_NAME)?.as_text()?);
            Some(format!("metadata:entity:{name}:{filters}:{published}"))
        }
        (RequestKind::BulkRead, MESSAGE_RETRIEVE_MULTIPLE) if params.len() == 1 => {
            match params.get(PARAM_QUERY)? {
                Value::Query(query) if query.is_unrestricted() => {
                    Some(format!(
                        "query:{}:{}",
                        escape_segment(&query.entity_name),
                        query.distinct
                    ))
                }
                _ => None,
            }
        }
        (RequestKind::RelationshipRead, MESSAGE_RETRIEVE_RELATIONSHIP) if params.len() == 2 => {
            let name = escape_segment(params.get(PARAM_NAME)?.as_text()?);
            let published = params.get(PARAM_AS_IF_PUBLISHED)?.as_bool()?;
            Some(format!("relationship:{name}:{published}"))
        }
        _ => None,
    }
}

fn metadata_flags(params: &BTreeMap<String, Value>) -> Option<(i64, bool)> {
    let filters = match params.get(PARAM_ENTITY_FILTERS)? {
        Value::Int(bits) => *bits,
        _ => return None,
    };
    let published = params.get(PARAM_AS_IF_PUBLISHED)?.as_bool()?;
    Some((filters, published))
}

#[derive(Serialize)]
struct CanonicalRequest<'a> {
    kind: RequestKind,
    name: &'a str,
    parameters: BTreeMap<&'a str, Value>,
}

/// Canonical JSON of the request. Map fields are ordered by `BTreeMap`;
/// set-like collections inside values are sorted first so that ordering
/// differences the service ignores do not split the cache.
fn canonical_key(request: &Request) -> Result<String, KeyError> {
    let parameters = request
        .parameters
        .iter()
        .map(|(name, value)| {
            let mut value = value.clone();
            value.canonicalize()?;
            Ok((name.as_str(), value))
        })
        .collect::<Result<BTreeMap<_, _>, serde_json::Error>>()?;

    let encoded = serde_json::to_string(&CanonicalRequest {
        kind: request.kind,
        name: &request.name,
        parameters,
    })?;
    Ok(format!("request:{}", escape_segment(&encoded)))
}

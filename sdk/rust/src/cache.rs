//! Normalized response cache.
//!
//! Objects that carry a `__typename` and their type's key fields are stored
//! once, under `Typename:key`, and referenced from wherever they appear as
//! `{"__ref": "Typename:key"}`. Two operations selecting the same entity
//! therefore share one record: writes merge field by field and the last
//! write of a field wins.
//!
//! Fields are stored under their name plus serialized arguments, so
//! `documents(first: 10)` and `documents(first: 20)` do not collide.
//! Local fields are not cached; they are recomputed after every read.

use std::collections::BTreeMap;

use gqlbind_syntax::ast::{Document, OperationType, Selection, SelectionSet};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value as Json};
use tokio::sync::RwLock;

use crate::selection::{
    arguments_to_json, deep_merge, effective_variables, is_included, is_reference, typename,
    PossibleTypes, REFERENCE_KEY,
};

pub const ROOT_QUERY: &str = "ROOT_QUERY";
pub const ROOT_MUTATION: &str = "ROOT_MUTATION";

/// Cache identity settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Key fields per type; types not listed use `default_key_fields`.
    pub key_fields: FxHashMap<String, Vec<String>>,
    pub default_key_fields: Vec<String>,
    pub possible_types: PossibleTypes,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_fields: FxHashMap::default(),
            default_key_fields: vec!["id".to_string()],
            possible_types: PossibleTypes::default(),
        }
    }
}

impl CacheConfig {
    fn key_fields_for(&self, typename: &str) -> &[String] {
        self.key_fields
            .get(typename)
            .unwrap_or(&self.default_key_fields)
    }

    /// The cache key of `object`, if it is identifiable.
    pub fn identify(&self, object: &Map<String, Json>) -> Option<String> {
        let typename = typename(object)?;
        let fields = self.key_fields_for(typename);
        if fields.is_empty() {
            return None;
        }

        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            match object.get(field)? {
                Json::Null => return None,
                Json::String(s) => values.push(s.clone()),
                other => values.push(other.to_string()),
            }
        }
        Some(format!("{typename}:{}", values.join(":")))
    }
}

type Entity = Map<String, Json>;

/// A normalized store of response data shared by every operation of a client.
#[derive(Debug, Default)]
pub struct NormalizedCache {
    config: CacheConfig,
    entities: RwLock<FxHashMap<String, Entity>>,
}

impl NormalizedCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entities: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Writes the response `data` of the operation `name` in `document`.
    pub async fn write(&self, document: &Document, name: &str, data: &Json, variables: &Json) {
        let Some(operation) = document.operation(name) else {
            return;
        };
        let Json::Object(data) = data else {
            return;
        };
        let root = match operation.operation {
            OperationType::Query => ROOT_QUERY,
            OperationType::Mutation => ROOT_MUTATION,
            OperationType::Subscription => return,
        };

        let variables = effective_variables(Some(operation), variables);
        let mut writer = Writer {
            config: &self.config,
            document,
            variables: &variables,
            pending: Vec::new(),
        };
        let mut fields = Entity::new();
        writer.selection_set(&operation.selection_set, data, &mut fields);
        writer.pending.push((root.to_string(), fields));

        let mut entities = self.entities.write().await;
        for (key, fields) in writer.pending {
            deep_merge(entities.entry(key).or_default(), fields);
        }
    }

    /// Reads the data of operation `name` in `document` from the cache.
    ///
    /// Returns `None` if any selected field is missing.
    pub async fn read(&self, document: &Document, name: &str, variables: &Json) -> Option<Json> {
        let operation = document.operation(name)?;
        let root = match operation.operation {
            OperationType::Query => ROOT_QUERY,
            OperationType::Mutation | OperationType::Subscription => return None,
        };

        let variables = effective_variables(Some(operation), variables);
        let entities = self.entities.read().await;
        let reader = Reader {
            config: &self.config,
            document,
            variables: &variables,
            entities: &entities,
        };
        let root_entity = entities.get(root)?;
        let mut out = Map::new();
        reader.selection_set(&operation.selection_set, root_entity, Some("Query"), &mut out)?;
        Some(Json::Object(out))
    }

    /// A copy of one stored record.
    pub async fn entity(&self, key: &str) -> Option<Map<String, Json>> {
        self.entities.read().await.get(key).cloned()
    }

    /// Removes one record. References to it become misses on read.
    pub async fn evict(&self, key: &str) -> bool {
        self.entities.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.entities.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }
}

/// Storage key of a field: its name, plus its arguments when it has any.
fn storage_key(name: &str, arguments: Map<String, Json>) -> String {
    if arguments.is_empty() {
        return name.to_string();
    }
    let sorted: BTreeMap<String, Json> = arguments.into_iter().collect();
    match serde_json::to_string(&sorted) {
        Ok(args) => format!("{name}({args})"),
        Err(_) => name.to_string(),
    }
}

struct Writer<'a> {
    config: &'a CacheConfig,
    document: &'a Document,
    variables: &'a Map<String, Json>,
    /// Entity records to merge, in discovery order.
    pending: Vec<(String, Entity)>,
}

impl Writer<'_> {
    fn selection_set(&mut self, set: &SelectionSet, data: &Map<String, Json>, fields: &mut Entity) {
        for selection in &set.selections {
            if !is_included(selection.directives(), self.variables) {
                continue;
            }
            match selection {
                Selection::Field(field) => {
                    let Some(value) = data.get(field.response_key()) else {
                        continue;
                    };
                    let key = storage_key(
                        &field.name.value,
                        arguments_to_json(&field.arguments, self.variables),
                    );
                    let value = match &field.selection_set {
                        Some(sub) => self.normalize(sub, value),
                        None => value.clone(),
                    };
                    deep_merge(fields, Map::from_iter([(key, value)]));
                }
                Selection::FragmentSpread(spread) => {
                    let Some(fragment) = self.document.fragment(&spread.name.value) else {
                        continue;
                    };
                    if self
                        .config
                        .possible_types
                        .matches(&fragment.type_condition.value, typename(data))
                    {
                        self.selection_set(&fragment.selection_set, data, fields);
                    }
                }
                Selection::InlineFragment(inline) => {
                    let applies = inline.type_condition.as_ref().map_or(true, |c| {
                        self.config.possible_types.matches(&c.value, typename(data))
                    });
                    if applies {
                        self.selection_set(&inline.selection_set, data, fields);
                    }
                }
            }
        }
    }

    fn normalize(&mut self, set: &SelectionSet, value: &Json) -> Json {
        match value {
            Json::Array(items) => Json::Array(items.iter().map(|item| self.normalize(set, item)).collect()),
            Json::Object(object) => {
                let mut fields = Entity::new();
                self.selection_set(set, object, &mut fields);
                match self.config.identify(object) {
                    Some(key) => {
                        self.pending.push((key.clone(), fields));
                        Json::Object(Map::from_iter([(REFERENCE_KEY.to_string(), Json::String(key))]))
                    }
                    None => Json::Object(fields),
                }
            }
            other => other.clone(),
        }
    }
}

struct Reader<'a> {
    config: &'a CacheConfig,
    document: &'a Document,
    variables: &'a Map<String, Json>,
    entities: &'a FxHashMap<String, Entity>,
}

impl Reader<'_> {
    fn selection_set(
        &self,
        set: &SelectionSet,
        record: &Entity,
        static_type: Option<&str>,
        out: &mut Map<String, Json>,
    ) -> Option<()> {
        let record_type = typename(record).or(static_type);
        for selection in &set.selections {
            if !is_included(selection.directives(), self.variables) {
                continue;
            }
            match selection {
                Selection::Field(field) => {
                    let value = if field.name.value == "__typename" {
                        record
                            .get("__typename")
                            .cloned()
                            .or_else(|| record_type.map(Json::from))?
                    } else {
                        let key = storage_key(
                            &field.name.value,
                            arguments_to_json(&field.arguments, self.variables),
                        );
                        let stored = record.get(&key)?;
                        match &field.selection_set {
                            Some(sub) => self.denormalize(sub, stored)?,
                            None => stored.clone(),
                        }
                    };
                    deep_merge(out, Map::from_iter([(field.response_key().to_string(), value)]));
                }
                Selection::FragmentSpread(spread) => {
                    let fragment = self.document.fragment(&spread.name.value)?;
                    if self
                        .config
                        .possible_types
                        .matches(&fragment.type_condition.value, record_type)
                    {
                        self.selection_set(&fragment.selection_set, record, record_type, out)?;
                    }
                }
                Selection::InlineFragment(inline) => {
                    let applies = inline.type_condition.as_ref().map_or(true, |c| {
                        self.config.possible_types.matches(&c.value, record_type)
                    });
                    if applies {
                        self.selection_set(&inline.selection_set, record, record_type, out)?;
                    }
                }
            }
        }
        Some(())
    }

    fn denormalize(&self, set: &SelectionSet, stored: &Json) -> Option<Json> {
        match stored {
            Json::Array(items) => items
                .iter()
                .map(|item| self.denormalize(set, item))
                .collect::<Option<Vec<_>>>()
                .map(Json::Array),
            Json::Object(object) => {
                let record = if is_reference(object) {
                    let key = object.get(REFERENCE_KEY)?.as_str()?;
                    self.entities.get(key)?
                } else {
                    object
                };
                let mut out = Map::new();
                self.selection_set(set, record, None, &mut out)?;
                Some(Json::Object(out))
            }
            other => Some(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gqlbind_syntax::parse;
    use serde_json::json;

    const DOCUMENT: &str = r#"
        query GetDocumentBasic($id: ID!) {
          document(id: $id) { __typename id title }
        }

        query GetDocumentFull($id: ID!) {
          document(id: $id) {
            __typename
            ...Full
          }
        }

        query ListDocuments($first: Int = 10) {
          documents(first: $first) { __typename id title }
        }

        mutation RenameDocument($id: ID!, $title: String!) {
          renameDocument(id: $id, title: $title) { __typename id title }
        }

        fragment Full on Document {
          id
          title
          settings { theme }
          owner { __typename id displayName }
        }
    "#;

    fn document() -> Document {
        let result = parse(DOCUMENT);
        assert!(!result.has_errors());
        result.document
    }

    fn full_data() -> Json {
        json!({
            "document": {
                "__typename": "Document",
                "id": "d1",
                "title": "Roadmap",
                "settings": { "theme": "dark" },
                "owner": { "__typename": "User", "id": "u1", "displayName": "Ada" }
            }
        })
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let cache = NormalizedCache::default();
        let doc = document();
        let vars = json!({ "id": "d1" });

        cache.write(&doc, "GetDocumentFull", &full_data(), &vars).await;

        let read = cache.read(&doc, "GetDocumentFull", &vars).await;
        assert_eq!(read, Some(full_data()));
        assert_eq!(
            cache.entity("User:u1").await,
            Some(Map::from_iter([
                ("__typename".to_string(), json!("User")),
                ("id".to_string(), json!("u1")),
                ("displayName".to_string(), json!("Ada")),
            ]))
        );
    }

    #[tokio::test]
    async fn test_entities_are_shared_between_operations() {
        let cache = NormalizedCache::default();
        let doc = document();
        let vars = json!({ "id": "d1" });

        cache.write(&doc, "GetDocumentFull", &full_data(), &vars).await;
        let basic = cache.read(&doc, "GetDocumentBasic", &vars).await;
        assert_eq!(
            basic,
            Some(json!({ "document": { "__typename": "Document", "id": "d1", "title": "Roadmap" } }))
        );

        // A rename returned by a mutation updates the shared record.
        cache
            .write(
                &doc,
                "RenameDocument",
                &json!({ "renameDocument": { "__typename": "Document", "id": "d1", "title": "Plan" } }),
                &json!({ "id": "d1", "title": "Plan" }),
            )
            .await;

        let full = cache.read(&doc, "GetDocumentFull", &vars).await.expect("cached");
        assert_eq!(full["document"]["title"], "Plan");
        assert_eq!(full["document"]["settings"]["theme"], "dark");
    }

    #[tokio::test]
    async fn test_missing_field_is_a_miss() {
        let cache = NormalizedCache::default();
        let doc = document();
        let vars = json!({ "id": "d1" });

        cache
            .write(
                &doc,
                "GetDocumentBasic",
                &json!({ "document": { "__typename": "Document", "id": "d1", "title": "Roadmap" } }),
                &vars,
            )
            .await;

        assert!(cache.read(&doc, "GetDocumentFull", &vars).await.is_none());
        assert!(cache.read(&doc, "GetDocumentBasic", &json!({ "id": "d2" })).await.is_none());
    }

    #[tokio::test]
    async fn test_arguments_are_part_of_the_field_key() {
        let cache = NormalizedCache::default();
        let doc = document();
        let list = |title: &str| {
            json!({ "documents": [{ "__typename": "Document", "id": "d1", "title": title }] })
        };

        cache.write(&doc, "ListDocuments", &list("A"), &json!({ "first": 1 })).await;

        assert!(cache.read(&doc, "ListDocuments", &json!({ "first": 1 })).await.is_some());
        assert!(cache.read(&doc, "ListDocuments", &Json::Null).await.is_none());

        // Defaults are applied before keying.
        cache.write(&doc, "ListDocuments", &list("B"), &Json::Null).await;
        assert!(cache.read(&doc, "ListDocuments", &json!({ "first": 10 })).await.is_some());

        let root = cache.entity(ROOT_QUERY).await.expect("root");
        assert!(root.contains_key(r#"documents({"first":1})"#));
        assert!(root.contains_key(r#"documents({"first":10})"#));
    }

    #[tokio::test]
    async fn test_evict_and_clear() {
        let cache = NormalizedCache::default();
        let doc = document();
        let vars = json!({ "id": "d1" });
        cache.write(&doc, "GetDocumentFull", &full_data(), &vars).await;

        assert!(cache.evict("User:u1").await);
        assert!(!cache.evict("User:u1").await);
        assert!(cache.read(&doc, "GetDocumentFull", &vars).await.is_none());
        assert!(cache.read(&doc, "GetDocumentBasic", &vars).await.is_some());

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[test]
    fn test_identify() {
        let mut config = CacheConfig::default();
        config
            .key_fields
            .insert("Membership".to_string(), vec!["teamId".to_string(), "userId".to_string()]);

        let object = |value: Json| match value {
            Json::Object(map) => map,
            _ => unreachable!(),
        };

        assert_eq!(
            config.identify(&object(json!({ "__typename": "Document", "id": "d1" }))),
            Some("Document:d1".to_string())
        );
        assert_eq!(
            config.identify(&object(json!({ "__typename": "Membership", "teamId": "t", "userId": 4 }))),
            Some("Membership:t:4".to_string())
        );
        assert_eq!(config.identify(&object(json!({ "id": "d1" }))), None);
        assert_eq!(config.identify(&object(json!({ "__typename": "Settings" }))), None);
    }
}

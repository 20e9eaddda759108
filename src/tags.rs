//! Tag synchronisation
//!
//! Services expose tags through `POST {scope}/{id}/tags/action` with a
//! `delete` or `create` batch. [`sync_tags`] turns an old/new tag map into
//! at most two batch calls, deleting before creating so changed values are
//! replaced rather than duplicated.

use crate::context::Context;
use crate::error::{Classifier, Result};
use crate::otc::ServiceClient;
use crate::waiter::{retry_while_transient, RetrySpec};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Batches needed to turn one tag map into another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    pub remove: Tags,
    pub add: Tags,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

pub fn diff_tags(old: &Tags, new: &Tags) -> TagDiff {
    let remove = old
        .iter()
        .filter(|(k, v)| new.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let add = new
        .iter()
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    TagDiff { remove, add }
}

pub fn to_tag_list(tags: &Tags) -> Vec<Tag> {
    tags.iter()
        .map(|(k, v)| Tag {
            key: k.clone(),
            value: Some(v.clone()),
        })
        .collect()
}

pub fn from_tag_list(tags: Vec<Tag>) -> Tags {
    tags.into_iter()
        .map(|t| (t.key, t.value.unwrap_or_default()))
        .collect()
}

/// Apply the difference between `old` and `new` to `{scope}/{resource_id}`.
/// Calls run under the generic classifier and the phase deadline.
pub async fn sync_tags(
    ctx: &Context,
    client: &ServiceClient,
    scope: &str,
    resource_id: &str,
    old: &Tags,
    new: &Tags,
) -> Result<()> {
    let changes = diff_tags(old, new);
    if changes.is_empty() {
        return Ok(());
    }

    let url = client.path_url(&[scope, resource_id, "tags", "action"]);
    let spec = RetrySpec {
        classifier: Classifier::default(),
        ..ctx.retry()
    };

    // Deleting a key only needs the key; changed values are re-created below
    if !changes.remove.is_empty() {
        let keys: Vec<Tag> = changes
            .remove
            .keys()
            .map(|k| Tag {
                key: k.clone(),
                value: None,
            })
            .collect();
        let body = json!({ "action": "delete", "tags": keys });
        tracing::debug!("Removing {} tag(s) from {}/{}", keys.len(), scope, resource_id);
        retry_while_transient(ctx, &spec, || client.post(&url, &body)).await?;
    }

    if !changes.add.is_empty() {
        let body = json!({ "action": "create", "tags": to_tag_list(&changes.add) });
        tracing::debug!("Adding {} tag(s) to {}/{}", changes.add.len(), scope, resource_id);
        retry_while_transient(ctx, &spec, || client.post(&url, &body)).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_diff_tags() {
        let diff = diff_tags(&tags(&[("a", "1"), ("b", "2")]), &tags(&[("a", "1"), ("b", "3"), ("c", "4")]));
        assert_eq!(diff.remove, tags(&[("b", "2")]));
        assert_eq!(diff.add, tags(&[("b", "3"), ("c", "4")]));
    }

    #[test]
    fn test_identical_tags_are_empty() {
        let t = tags(&[("a", "1")]);
        assert!(diff_tags(&t, &t).is_empty());
        assert!(diff_tags(&Tags::new(), &Tags::new()).is_empty());
    }

    #[test]
    fn test_tag_list_round_trip_drops_missing_values() {
        let list = vec![
            Tag { key: "a".into(), value: Some("1".into()) },
            Tag { key: "b".into(), value: None },
        ];
        let map = from_tag_list(list);
        assert_eq!(map, tags(&[("a", "1"), ("b", "")]));
    }
}

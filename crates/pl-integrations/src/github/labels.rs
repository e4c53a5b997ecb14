//! Label plumbing. The iteration tracker treats labels as its persistence
//! medium, so writes go through the full-replace `PUT` endpoint: a single
//! atomic swap of the whole label set instead of add/remove pairs that can
//! interleave with other writers.

use serde_json::json;

use super::client::{GitHubClient, Result};

/// List the current labels on an issue or pull request.
pub async fn list_labels(client: &GitHubClient, number: u64) -> Result<Vec<String>> {
    let route = client.repo_route(&format!("issues/{number}/labels?per_page=100"));
    let value = client.rest_get(&route).await?;
    Ok(label_names(&value))
}

/// Replace the entire label set on an issue or pull request. Returns the
/// set the host reports after the write.
pub async fn set_labels(
    client: &GitHubClient,
    number: u64,
    labels: &[String],
) -> Result<Vec<String>> {
    let route = client.repo_route(&format!("issues/{number}/labels"));
    let body = json!({ "labels": labels });
    let value = client.rest_put(&route, &body).await?;
    Ok(label_names(&value))
}

/// Add labels without touching the rest of the set.
pub async fn add_labels(
    client: &GitHubClient,
    number: u64,
    labels: &[String],
) -> Result<Vec<String>> {
    let route = client.repo_route(&format!("issues/{number}/labels"));
    let body = json!({ "labels": labels });
    let value = client.rest_post(&route, &body).await?;
    Ok(label_names(&value))
}

// ---- internal helpers -------------------------------------------------------

/// Pull the `name` field out of a label-object array, skipping anything
/// that does not look like a label.
fn label_names(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("name").and_then(|n| n.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_names_from_label_objects() {
        let value = json!([
            { "id": 1, "name": "agent:managed", "color": "ededed" },
            { "id": 2, "name": "agent:iter-2", "color": "ededed" },
            { "id": 3, "name": "bug", "color": "d73a4a" },
        ]);
        assert_eq!(
            label_names(&value),
            vec!["agent:managed", "agent:iter-2", "bug"]
        );
    }

    #[test]
    fn tolerates_malformed_entries() {
        let value = json!([{ "id": 1 }, { "name": "ok" }, 42]);
        assert_eq!(label_names(&value), vec!["ok"]);
    }

    #[test]
    fn non_array_yields_empty() {
        assert!(label_names(&json!({"message": "Not Found"})).is_empty());
        assert!(label_names(&json!(null)).is_empty());
    }
}

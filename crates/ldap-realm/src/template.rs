//! Search filter templates with named placeholders.
//!
//! A template such as `(&(objectClass=posixGroup)(|(memberUid={uid})(member={dn})))`
//! compiles into the positional filter `(&(objectClass=posixGroup)(|(memberUid={0})(member={1})))`
//! plus the placeholder list `["uid", "dn"]`. Binding looks every placeholder up
//! in a value map and yields the parameters in filter order.

use std::collections::HashMap;
use std::fmt;

use crate::search::SearchRequest;

/// A compiled filter template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    source: String,
    filter: String,
    placeholders: Vec<String>,
}

impl QueryTemplate {
    /// Compiles `source`, rewriting `{name}` into `{index}` in first-occurrence order.
    ///
    /// The same name always maps to the same index.
    #[must_use]
    pub fn compile(source: &str) -> Self {
        let mut filter = String::with_capacity(source.len());
        let mut placeholders: Vec<String> = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find('{') {
            filter.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if is_placeholder_name(&after[..close]) => {
                    let name = &after[..close];
                    let index = match placeholders.iter().position(|p| p == name) {
                        Some(index) => index,
                        None => {
                            placeholders.push(name.to_string());
                            placeholders.len() - 1
                        }
                    };
                    filter.push('{');
                    filter.push_str(&index.to_string());
                    filter.push('}');
                    rest = &after[close + 1..];
                }
                _ => {
                    filter.push('{');
                    rest = after;
                }
            }
        }
        filter.push_str(rest);

        Self {
            source: source.to_string(),
            filter,
            placeholders,
        }
    }

    /// The template as configured.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The filter with positional `{i}` markers.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Placeholder names, index `i` corresponding to marker `{i}`.
    #[must_use]
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Resolves the positional parameters from `values`.
    ///
    /// A missing value yields an empty parameter.
    #[must_use]
    pub fn parameters(&self, values: &HashMap<String, String>) -> Vec<String> {
        self.placeholders
            .iter()
            .map(|name| values.get(name).cloned().unwrap_or_default())
            .collect()
    }

    /// Binds `values` into a subtree search request under `base_dn`.
    #[must_use]
    pub fn bind(&self, base_dn: &str, values: &HashMap<String, String>) -> SearchRequest {
        SearchRequest::new(base_dn, &self.filter, self.parameters(values))
    }
}

impl fmt::Display for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filter)
    }
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

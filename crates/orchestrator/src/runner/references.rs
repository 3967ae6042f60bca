use entities::{EntityKind, EntityRecord, EntityStore, StoreSet};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::request::{CodeAnalysis, ReferencedId};

/// Marker left in place of a reference that could not be resolved.
pub const UNRESOLVED_SENTINEL: &str = "__unresolved_reference__";

const REFERENCE_TOKEN: &str = r"\{\{\s*([A-Za-z]+)\s*:\s*([^{}\s]+)\s*\}\}";

/// Size metrics of the raw payload. References are filled in by expansion.
pub fn analyze(code: &str) -> CodeAnalysis {
    CodeAnalysis {
        char_count: code.chars().count(),
        line_count: code.lines().count(),
        referenced_ids: Vec::new(),
    }
}

/// Replaces `{{kind:id}}` tokens with the JSON of the referenced record.
pub struct ReferenceExpander {
    token: Regex,
}

impl ReferenceExpander {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token: Regex::new(REFERENCE_TOKEN)?,
        })
    }

    /// Expanded code plus every reference token in order of appearance.
    ///
    /// Tokens naming an unknown kind are not references and stay untouched.
    pub async fn expand(&self, code: &str, stores: &StoreSet) -> (String, Vec<ReferencedId>) {
        let tokens: Vec<(std::ops::Range<usize>, EntityKind, String)> = self
            .token
            .captures_iter(code)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let kind = caps.get(1)?.as_str().parse::<EntityKind>().ok()?;
                let id = caps.get(2)?.as_str().to_string();
                Some((whole.range(), kind, id))
            })
            .collect();

        if tokens.is_empty() {
            return (code.to_string(), Vec::new());
        }

        let mut loaded: HashMap<EntityKind, Vec<EntityRecord>> = HashMap::new();
        let mut expanded = String::with_capacity(code.len());
        let mut referenced = Vec::with_capacity(tokens.len());
        let mut cursor = 0;

        for (range, kind, id) in tokens {
            if !loaded.contains_key(&kind) {
                let records = load_kind(stores, kind).await;
                loaded.insert(kind, records);
            }
            let record = loaded
                .get(&kind)
                .and_then(|records| records.iter().find(|r| r.id == id));

            let replacement = match record.map(serde_json::to_string) {
                Some(Ok(json)) => Some(json),
                Some(Err(e)) => {
                    warn!(%kind, %id, error = %e, "could not encode referenced record");
                    None
                }
                None => None,
            };

            expanded.push_str(&code[cursor..range.start]);
            match &replacement {
                Some(json) => expanded.push_str(json),
                None => {
                    debug!(%kind, %id, "unresolved reference");
                    expanded.push_str(&format!("{UNRESOLVED_SENTINEL}(\"{kind}:{id}\")"));
                }
            }
            cursor = range.end;

            referenced.push(ReferencedId {
                kind,
                id,
                resolved: replacement.is_some(),
            });
        }
        expanded.push_str(&code[cursor..]);

        (expanded, referenced)
    }
}

async fn load_kind(stores: &StoreSet, kind: EntityKind) -> Vec<EntityRecord> {
    let Some(store) = stores.get(kind) else {
        debug!(%kind, "no store registered for referenced kind");
        return Vec::new();
    };
    match store.load().await {
        Ok(records) => records,
        Err(e) => {
            warn!(%kind, error = %e, "store load failed during reference expansion");
            Vec::new()
        }
    }
}

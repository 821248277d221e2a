//! Conversation memory backends for AgentX.

pub mod file_backend;
pub mod in_memory;
pub mod noop;

pub use file_backend::FileBackend;
pub use in_memory::InMemoryBackend;
pub use noop::NoopMemory;

use std::sync::Arc;

use agentx_config::{MemoryBackendKind, MemoryConfig};
use agentx_core::memory::{MemoryBackend, MemoryEntry, MemoryQuery, term_overlap};

/// Build the backend selected in configuration.
///
/// Returns `None` when memory is disabled so pipes can skip recall entirely.
pub fn from_config(config: &MemoryConfig) -> Option<Arc<dyn MemoryBackend>> {
    match config.backend {
        MemoryBackendKind::None => None,
        MemoryBackendKind::InMemory => Some(Arc::new(InMemoryBackend::new())),
        MemoryBackendKind::File => Some(Arc::new(FileBackend::new(config.file_path()))),
    }
}

/// Shared keyword ranking used by the in-process backends.
pub(crate) fn rank(entries: &[MemoryEntry], query: &MemoryQuery) -> Vec<MemoryEntry> {
    let mut results: Vec<MemoryEntry> = entries
        .iter()
        .filter(|e| {
            let conversation_match = query.conversation_id.is_none()
                || e.conversation_id == query.conversation_id;
            let tag_match =
                query.tags.is_empty() || query.tags.iter().any(|t| e.tags.contains(t));
            conversation_match && tag_match
        })
        .cloned()
        .map(|mut e| {
            let haystack = match &e.reason {
                Some(reason) => format!("{} {}", e.content, reason),
                None => e.content.clone(),
            };
            e.score = term_overlap(&query.text, &haystack);
            e
        })
        .filter(|e| e.score > 0.0 && e.score >= query.min_score)
        .collect();

    // Best score first; newer entries win ties.
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    results.truncate(query.limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_selects_backend() {
        assert!(from_config(&MemoryConfig::default()).is_none());

        let in_memory = MemoryConfig {
            backend: MemoryBackendKind::InMemory,
            path: None,
        };
        assert_eq!(from_config(&in_memory).unwrap().name(), "in_memory");

        let dir = tempfile::tempdir().unwrap();
        let file = MemoryConfig {
            backend: MemoryBackendKind::File,
            path: Some(dir.path().join("m.jsonl")),
        };
        assert_eq!(from_config(&file).unwrap().name(), "file");
    }
}

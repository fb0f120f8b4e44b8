//! Lexical ranking with conversation-aware boosting

use crate::error::MemoryResult;
use crate::memory_db::{MemoryDatabase, RankedDocument};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Multiplier applied once per call to documents already linked to the conversation.
pub const CONVERSATION_BOOST: f64 = 1.5;

/// Default result size for relevant-context lookups.
pub const DEFAULT_RELEVANT_LIMIT: usize = 5;

#[derive(Clone)]
pub struct RelevanceRanker {
    database: Arc<MemoryDatabase>,
}

impl RelevanceRanker {
    pub fn new(database: Arc<MemoryDatabase>) -> Self {
        Self { database }
    }

    /// Plain lexical ranking, best first.
    pub async fn rank(&self, query: &str, limit: usize) -> MemoryResult<Vec<RankedDocument>> {
        let query = query.to_string();
        self.database
            .run(move |db| db.documents.search(&query, limit))
            .await
    }

    /// Ranking with documents already associated to `conversation_id` boosted.
    ///
    /// The boost is applied to this result only and never written back, so it
    /// cannot compound across calls.
    pub async fn rank_for_conversation(
        &self,
        query: &str,
        conversation_id: &str,
        limit: usize,
    ) -> MemoryResult<Vec<RankedDocument>> {
        let ranked = self.rank(query, limit).await?;
        if ranked.is_empty() {
            return Ok(ranked);
        }

        let conversation_id = conversation_id.to_string();
        let associated = self
            .database
            .run(move |db| db.contexts.associated_document_ids(&conversation_id))
            .await?;

        debug!(
            "Boosting {} ranked documents against {} associated",
            ranked.len(),
            associated.len()
        );
        Ok(apply_conversation_boost(ranked, &associated))
    }
}

/// Multiply the rank of associated documents by [`CONVERSATION_BOOST`] and
/// re-sort by adjusted rank, then original rank, then document id.
pub fn apply_conversation_boost(
    ranked: Vec<RankedDocument>,
    associated: &HashSet<String>,
) -> Vec<RankedDocument> {
    let mut adjusted: Vec<(f64, RankedDocument)> = ranked
        .into_iter()
        .map(|mut item| {
            let original = item.rank;
            if associated.contains(&item.document.id) {
                item.rank *= CONVERSATION_BOOST;
            }
            (original, item)
        })
        .collect();

    adjusted.sort_by(|(orig_a, a), (orig_b, b)| {
        b.rank
            .partial_cmp(&a.rank)
            .unwrap_or(Ordering::Equal)
            .then_with(|| orig_b.partial_cmp(orig_a).unwrap_or(Ordering::Equal))
            .then_with(|| a.document.id.cmp(&b.document.id))
    });

    adjusted.into_iter().map(|(_, item)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::{Document, Metadata};
    use chrono::Utc;
    use proptest::prelude::*;

    fn ranked(id: &str, rank: f64) -> RankedDocument {
        let now = Utc::now();
        RankedDocument {
            document: Document {
                id: id.to_string(),
                title: id.to_string(),
                content: String::new(),
                metadata: Metadata::new(),
                created_at: now,
                updated_at: now,
            },
            rank,
        }
    }

    #[test]
    fn test_boost_can_reorder() {
        let input = vec![ranked("a", 0.6), ranked("b", 0.5)];
        let associated: HashSet<String> = ["b".to_string()].into_iter().collect();
        let output = apply_conversation_boost(input, &associated);
        assert_eq!(output[0].document.id, "b");
        assert!((output[0].rank - 0.75).abs() < 1e-12);
        assert_eq!(output[1].rank, 0.6);
    }

    #[test]
    fn test_ties_fall_back_to_original_rank_then_id() {
        let input = vec![ranked("z", 0.25), ranked("boosted", 0.25), ranked("a", 0.375), ranked("m", 0.25)];
        let associated: HashSet<String> = ["boosted".to_string()].into_iter().collect();
        let output = apply_conversation_boost(input, &associated);
        let ids: Vec<_> = output.iter().map(|r| r.document.id.as_str()).collect();
        // boosted: 0.25 * 1.5 = 0.375 ties with "a", which has the higher original rank
        assert_eq!(ids, vec!["a", "boosted", "m", "z"]);
    }

    #[test]
    fn test_empty_association_set_keeps_order() {
        let input = vec![ranked("a", 0.9), ranked("b", 0.3)];
        let output = apply_conversation_boost(input.clone(), &HashSet::new());
        assert_eq!(output, input);
    }

    proptest! {
        #[test]
        fn prop_boost_is_exactly_one_and_a_half(
            ranks in prop::collection::vec((0.0001f64..1.0, any::<bool>()), 0..20)
        ) {
            let input: Vec<RankedDocument> = ranks
                .iter()
                .enumerate()
                .map(|(i, (rank, _))| ranked(&format!("doc-{:02}", i), *rank))
                .collect();
            let associated: HashSet<String> = ranks
                .iter()
                .enumerate()
                .filter(|(_, (_, linked))| *linked)
                .map(|(i, _)| format!("doc-{:02}", i))
                .collect();

            let output = apply_conversation_boost(input.clone(), &associated);
            prop_assert_eq!(output.len(), input.len());
            for item in &output {
                let original = input.iter().find(|r| r.document.id == item.document.id).unwrap();
                let expected = if associated.contains(&item.document.id) {
                    original.rank * CONVERSATION_BOOST
                } else {
                    original.rank
                };
                prop_assert_eq!(item.rank, expected);
            }
            prop_assert!(output.windows(2).all(|w| w[0].rank >= w[1].rank));
        }
    }

    #[tokio::test]
    async fn test_rank_for_conversation_boosts_linked_document() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        db.conversations.ensure("conv", None).unwrap();
        let guidelines = db.documents.create(
            "AI Assistant Guidelines",
            "Guidelines for being helpful, harmless and honest.",
            Metadata::new(),
        ).unwrap();
        db.documents.create("Style guidelines", "Writing guidelines for docs.", Metadata::new()).unwrap();
        db.contexts.add_context("conv", &guidelines.id, 0.5).unwrap();

        let ranker = RelevanceRanker::new(Arc::clone(&db));
        let plain = ranker.rank("guidelines", 5).await.unwrap();
        let boosted = ranker.rank_for_conversation("guidelines", "conv", 5).await.unwrap();

        let plain_rank = plain.iter().find(|r| r.document.id == guidelines.id).unwrap().rank;
        let boosted_rank = boosted.iter().find(|r| r.document.id == guidelines.id).unwrap().rank;
        assert_eq!(boosted_rank, plain_rank * CONVERSATION_BOOST);
        assert_eq!(boosted[0].document.id, guidelines.id);

        // applied per call, never stored
        let again = ranker.rank_for_conversation("guidelines", "conv", 5).await.unwrap();
        assert_eq!(again[0].rank, boosted_rank);
    }
}

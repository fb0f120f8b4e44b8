use std::collections::HashSet;
use std::sync::Arc;

use context_memory::{
    context_engine::CONVERSATION_BOOST, Config, ContextService, ConversationMemory, MemoryDatabase,
    MemoryOptions, Metadata, RelevanceRanker, SessionMemoryCache,
};

const SENTINEL: &str = "New Conversation";

fn database() -> Arc<MemoryDatabase> {
    Arc::new(MemoryDatabase::new_in_memory().unwrap())
}

fn add_doc(db: &MemoryDatabase, title: &str, content: &str) -> String {
    db.documents.create(title, content, Metadata::new()).unwrap().id
}

fn guideline_and_support(db: &MemoryDatabase) -> (String, String) {
    let d1 = add_doc(
        db,
        "AI Assistant Guidelines",
        "I am an AI assistant designed to be helpful, harmless, and honest.",
    );
    let d2 = add_doc(
        db,
        "Technical Support",
        "For technical issues, please provide detailed information about your problem including error messages.",
    );
    (d1, d2)
}

#[tokio::test]
async fn test_search_ranks_support_document_first() {
    let db = database();
    let (d1, d2) = guideline_and_support(&db);
    let ranker = RelevanceRanker::new(Arc::clone(&db));

    let results = ranker.rank("technical issue", 10).await.unwrap();
    assert_eq!(results[0].document.id, d2);
    let d1_position = results.iter().position(|r| r.document.id == d1);
    assert!(d1_position.map_or(true, |p| p > 0));
    assert!(results.iter().all(|r| r.rank > 0.0 && r.rank < 1.0));
}

#[tokio::test]
async fn test_associated_document_is_boosted_once() {
    let db = database();
    let (d1, _) = guideline_and_support(&db);
    db.conversations.ensure("conv-c", None).unwrap();
    db.contexts.add_context("conv-c", &d1, 0.5).unwrap();

    let ranker = RelevanceRanker::new(Arc::clone(&db));
    let plain = ranker.rank("guidelines", 5).await.unwrap();
    let boosted = ranker.rank_for_conversation("guidelines", "conv-c", 5).await.unwrap();
    let again = ranker.rank_for_conversation("guidelines", "conv-c", 5).await.unwrap();

    assert_eq!(plain[0].document.id, d1);
    assert_eq!(boosted[0].rank, plain[0].rank * CONVERSATION_BOOST);
    assert_eq!(again[0].rank, boosted[0].rank);

    let other = ranker.rank_for_conversation("guidelines", "conv-other", 5).await.unwrap();
    assert_eq!(other[0].rank, plain[0].rank);
}

#[tokio::test]
async fn test_short_first_message_becomes_title() {
    let db = database();
    let memory = ConversationMemory::new("conv-c", Arc::clone(&db), MemoryOptions::default());
    assert!(db.conversations.get("conv-c").unwrap().is_none());

    memory
        .save_exchange("Hello, can you help me plan a trip?", "Sure, where to?")
        .await
        .unwrap();

    let conversation = db.conversations.get("conv-c").unwrap().unwrap();
    assert_eq!(conversation.title, "Hello, can you help me plan a trip?");
}

#[tokio::test]
async fn test_long_first_message_is_truncated_with_ellipsis() {
    let db = database();
    let memory = ConversationMemory::new("conv-long", Arc::clone(&db), MemoryOptions::default());
    let first = "Could you explain how the relevance ranking in this system works in detail?";

    memory.save_exchange(first, "Of course.").await.unwrap();

    let title = db.conversations.get("conv-long").unwrap().unwrap().title;
    assert_eq!(title, format!("{}...", &first[..47]));
    assert_eq!(title.chars().count(), 50);
}

#[tokio::test]
async fn test_title_is_set_only_once() {
    let db = database();
    let memory = ConversationMemory::new("conv-c", Arc::clone(&db), MemoryOptions::default());

    memory.save_exchange("First topic", "ok").await.unwrap();
    memory.save_exchange("A completely different second topic", "ok").await.unwrap();

    assert_eq!(db.conversations.get("conv-c").unwrap().unwrap().title, "First topic");
}

#[tokio::test]
async fn test_clear_empties_memory_but_keeps_conversation() {
    let db = database();
    let (_, d2) = guideline_and_support(&db);
    let memory = ConversationMemory::new("conv-c", Arc::clone(&db), MemoryOptions::default());
    memory.save_exchange("technical issue with error messages", "Which error?").await.unwrap();
    db.contexts.add_context("conv-c", &d2, 0.9).unwrap();
    assert!(!memory.load_context().await.is_empty());

    memory.clear().await.unwrap();

    let loaded = memory.load_context().await;
    assert!(loaded.history.is_empty());
    assert!(loaded.context.is_empty());
    let conversation = db.conversations.get("conv-c").unwrap().unwrap();
    assert_eq!(conversation.title, SENTINEL);
    assert!(db.documents.exists(&d2).unwrap());
}

#[tokio::test]
async fn test_saved_exchange_auto_attaches_matching_documents() {
    let db = database();
    let (d1, d2) = guideline_and_support(&db);
    let memory = ConversationMemory::new("conv-c", Arc::clone(&db), MemoryOptions::default());

    memory.save_exchange("technical issue", "Please describe it.").await.unwrap();

    let attached: HashSet<String> = db
        .contexts
        .get_context_for_conversation("conv-c")
        .unwrap()
        .into_iter()
        .map(|entry| entry.document.id)
        .collect();
    assert!(attached.contains(&d2));
    assert!(!attached.contains(&d1));
}

#[test]
fn test_association_upsert_keeps_one_row() {
    let db = database();
    let (d1, _) = guideline_and_support(&db);
    db.conversations.ensure("conv-c", None).unwrap();

    db.contexts.add_context("conv-c", &d1, 0.2).unwrap();
    db.contexts.add_context("conv-c", &d1, 0.7).unwrap();

    let entries = db.contexts.get_context_for_conversation("conv-c").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].relevance_score, 0.7);
    assert_eq!(db.get_stats().unwrap().total_associations, 1);
}

#[test]
fn test_context_is_ordered_by_score_then_recency() {
    let db = database();
    db.conversations.ensure("conv-c", None).unwrap();
    let low = add_doc(&db, "Low", "low");
    let tie_old = add_doc(&db, "Tie old", "tie");
    let tie_new = add_doc(&db, "Tie new", "tie");
    let high = add_doc(&db, "High", "high");

    db.contexts.add_context("conv-c", &low, 0.1).unwrap();
    db.contexts.add_context("conv-c", &tie_old, 0.5).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    db.contexts.add_context("conv-c", &tie_new, 0.5).unwrap();
    db.contexts.add_context("conv-c", &high, 0.9).unwrap();

    let order: Vec<String> = db
        .contexts
        .get_context_for_conversation("conv-c")
        .unwrap()
        .into_iter()
        .map(|entry| entry.document.id)
        .collect();
    assert_eq!(order, vec![high, tie_new, tie_old, low]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_lookups_leave_one_instance() {
    let cache = Arc::new(SessionMemoryCache::new(database(), MemoryOptions::default()));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_create("sess-X") })
        })
        .collect();
    let instances: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(cache.len(), 1);
    let survivor = cache.get_or_create("sess-X");
    assert!(instances.iter().all(|m| Arc::ptr_eq(m, &survivor)));
}

#[tokio::test]
async fn test_database_file_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("memory.db");

    {
        let db = Arc::new(MemoryDatabase::new(&path, 2).unwrap());
        let service = ContextService::new(Arc::clone(&db), Config::default());
        service.save_exchange("persisted", "Where should I save notes?", "In the notes folder.").await.unwrap();
    }

    let db = Arc::new(MemoryDatabase::new(&path, 2).unwrap());
    let service = ContextService::new(Arc::clone(&db), Config::default());
    let loaded = service.load_context("persisted").await;
    assert_eq!(loaded.history.len(), 2);
    assert_eq!(loaded.history[0].content, "Where should I save notes?");
    assert_eq!(
        db.conversations.get("persisted").unwrap().unwrap().title,
        "Where should I save notes?"
    );
}

mod common;

use std::sync::Arc;

use interfaces::defs::{AccountMode, ContentStatus, IntentType};
use interfaces::empty::UnavailableGenerator;
use interfaces::Store;
use reddit_harvester::classifier::Intent;
use reddit_harvester::drafting::fallback_reply;
use reddit_harvester::types::DraftConfig;
use reddit_harvester::{ChannelDispatcher, ClassificationWorker, DraftComposer, RelevanceClassifier};

use common::*;

fn variants(list: &[&str]) -> Vec<String> {
    list.iter().map(|v| v.to_string()).collect()
}

#[test]
fn offering_language_vetoes_requests() {
    let classifier = RelevanceClassifier::default();
    let result = classifier.detect_intent("Selling my old camera", "can you believe it? need it gone");
    assert_eq!(result.intent, Intent::Offering);
    assert_eq!(result.confidence, 1.0);

    let classification = classifier.classify(&variants(&["camera"]), "photography", "Selling my old camera", "");
    assert_eq!(classification.status, ContentStatus::Rejected);
    assert_eq!(classification.update().intent_type, IntentType::Irrelevant);
    assert!(!classification.draft_eligible);
}

#[test]
fn requests_score_by_phrase_matches() {
    let classifier = RelevanceClassifier::default();

    let strong = classifier.detect_intent("Can you rate me?", "");
    assert_eq!(strong.intent, Intent::Requesting);
    assert_eq!(strong.confidence, 1.0);

    let weak = classifier.detect_intent("Looking for a photographer", "");
    assert_eq!(weak.intent, Intent::Requesting);
    assert!((weak.confidence - 1.0 / 3.0).abs() < 1e-9);

    let question_only = classifier.detect_intent("Thoughts on this?", "");
    assert_eq!(question_only.intent, Intent::Requesting);

    let neither = classifier.detect_intent("Sunset over the bay", "");
    assert_eq!(neither.intent, Intent::Irrelevant);
    assert_eq!(neither.confidence, 0.3);
}

#[test]
fn relevance_is_the_share_of_variants_present() {
    let classifier = RelevanceClassifier::default();
    let terms = variants(&["rate me", "Feedback"]);

    assert_eq!(classifier.relevance_score(&terms, "Can you RATE ME?", ""), 0.5);
    assert_eq!(classifier.relevance_score(&terms, "rate me", "any feedback welcome"), 1.0);
    assert_eq!(classifier.relevance_score(&[], "rate me", ""), 0.0);
    assert_eq!(classifier.relevance_score(&variants(&["  "]), "rate me", ""), 0.0);
}

#[test]
fn rate_me_post_is_verified_and_drafted() {
    let classifier = RelevanceClassifier::default();
    let classification = classifier.classify(&variants(&["rate me", "feedback"]), "rateme", "Can you rate me?", "");

    assert_eq!(classification.intent.intent, Intent::Requesting);
    assert_eq!(classification.intent.confidence, 1.0);
    assert_eq!(classification.relevance, 0.5);
    assert_eq!(classification.intent_score, 0.5);
    assert_eq!(classification.status, ContentStatus::Verified);
    assert!(classification.draft_eligible);

    let mixed = classifier.classify(&variants(&["rate", "nsfw"]), "pics", "Can you rate me?", "");
    assert_eq!(mixed.relevance, 0.5);
    assert_eq!(mixed.intent_score, 0.5 * mixed.intent.confidence);
}

#[test]
fn high_signal_channels_open_the_gate_without_keywords() {
    let classifier = RelevanceClassifier::default();

    let signal = classifier.classify(&[], "RateMe", "Looking for honest opinions", "");
    assert_eq!(signal.relevance, 0.0);
    assert!(signal.draft_eligible);

    let quiet = classifier.classify(&[], "pics", "Looking for a photographer", "");
    assert_eq!(quiet.status, ContentStatus::Verified);
    assert!(!quiet.draft_eligible);
}

#[test]
fn fallback_reply_follows_the_post_topic() {
    let context = |channel: &str, title: &str| interfaces::defs::ItemContext {
        title: title.to_string(),
        body: String::new(),
        author: "someone".to_string(),
        channel: channel.to_string(),
    };

    assert!(fallback_reply(&context("rateme", "hello")).contains("feedback"));
    assert!(fallback_reply(&context("askreddit", "Need advice on a job")).contains("happy to help"));
    assert!(fallback_reply(&context("pics", "My dog")).contains("Thanks for the post"));
}

fn worker(harness: &Harness) -> (ClassificationWorker, tokio::sync::mpsc::UnboundedReceiver<interfaces::defs::Task>) {
    let (dispatcher, tasks) = ChannelDispatcher::new();
    let worker = ClassificationWorker::new(
        harness.store.clone(),
        RelevanceClassifier::default(),
        DraftComposer::new(Arc::new(UnavailableGenerator), DraftConfig::default()),
        Arc::new(dispatcher),
    );
    (worker, tasks)
}

#[tokio::test]
async fn worker_classifies_and_drafts_once() {
    let harness = Harness::new();
    let account = harness.account("harvester", AccountMode::Both).await;
    harness
        .store
        .create_keyword(account.id, "rate", vec!["rate my".to_string()])
        .await
        .unwrap();
    let item = harness.content(&account, "q1").await;
    let (worker, _tasks) = worker(&harness);

    let first = worker.classify_content(item.id, account.id).await.unwrap();
    assert!(first.classification.draft_eligible);
    let draft_id = first.draft_id.expect("draft created");

    let stored = harness.store.get_content_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ContentStatus::Verified);
    assert_eq!(stored.intent_type, Some(IntentType::RequestingService));
    assert!(stored.intent_score.is_some());

    let draft = harness.store.get_draft(draft_id).await.unwrap().unwrap();
    assert!(!draft.approved);
    assert!(draft.text.contains("feedback"));

    let second = worker.classify_content(item.id, account.id).await.unwrap();
    assert_eq!(second.draft_id, None);
    assert_eq!(harness.store.list_drafts(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn worker_handles_queued_tasks_and_reprocesses_pending_items() {
    let harness = Harness::new();
    let account = harness.account("harvester", AccountMode::Scrape).await;
    let first = harness.content(&account, "q1").await;
    let second = harness.content(&account, "q2").await;
    let (worker, mut tasks) = worker(&harness);

    assert_eq!(worker.reprocess_pending().await.unwrap(), 2);

    let mut handled = Vec::new();
    while let Ok(task) = tasks.try_recv() {
        let outcome = worker.handle(&task).await.unwrap().expect("classify task");
        handled.push(outcome.content_id);
    }
    handled.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(handled, expected);

    let pending = harness
        .store
        .list_content_items(Some(ContentStatus::Pending), 10)
        .await
        .unwrap();
    assert!(pending.is_empty());

    let other = interfaces::defs::Task {
        name: "something-else".to_string(),
        payload: serde_json::json!({}),
    };
    assert!(worker.handle(&other).await.unwrap().is_none());
}

//! Enrichment runs against a real on-disk store and a scripted
//! completion client.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use scout_core::{Row, Value, PROCESSED_COMPANIES};
use scout_enrich::{
    CompletionClient, CompletionError, CompletionOptions, EnrichmentPipeline, QUESTION_SLOTS,
};
use scout_store::RecordStore;

/// Replays a scripted sequence of completion results and records every
/// prompt it was asked. Cloning shares the script and the recording.
#[derive(Clone)]
struct ScriptedClient {
    responses: Arc<Mutex<Vec<Result<String, CompletionError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedClient {
    fn new(responses: Vec<Result<String, CompletionError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(
        &self,
        _system: Option<&str>,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(CompletionError::EmptyResponse);
        }
        responses.remove(0)
    }
}

fn store_with_company(company: &str) -> (tempfile::TempDir, RecordStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = RecordStore::open(dir.path().join("scout.db")).expect("open store");
    let row = Row::new()
        .with("Company", Value::Text(company.into()))
        .with("Company Processed", Value::Bool(false));
    store.upsert(&PROCESSED_COMPANIES, &[row]);
    (dir, store)
}

fn good_enrichment_json() -> String {
    serde_json::json!({
        "summary": "builds rockets",
        "product": "orbital launch",
        "tags": ["aerospace", "deeptech"],
        "investors": ["Example Capital"],
        "ideal_roles": "VP Engineering",
        "recent_news": "raised a series B",
        "tone_advice": "direct",
        "alignment_reason": "infrastructure focus",
        "suggested_opener": "congrats on the raise",
        "funding_stage": "Series B",
        "technologies_used": "Rust",
        "website_url": "https://acme.test",
        "industry": "aerospace",
        "linkedin_company_url": "https://linkedin.test/acme",
        "linkedin_search_links": ["https://linkedin.test/search"]
    })
    .to_string()
}

#[tokio::test]
async fn failed_sub_question_leaves_an_empty_slot_and_still_enriches() {
    // Sub-question 3 of 6 fails; the synthesis prompt still carries all
    // six slots and the record is fully enriched.
    let (_dir, store) = store_with_company("Acme");
    let mut responses: Vec<Result<String, CompletionError>> = vec![
        Ok("answer one".into()),
        Ok("answer two".into()),
        Err(CompletionError::EmptyResponse),
        Ok("answer four".into()),
        Ok("answer five".into()),
        Ok("answer six".into()),
    ];
    responses.push(Ok(good_enrichment_json()));

    let client = ScriptedClient::new(responses);
    let pipeline = EnrichmentPipeline::new(store, Box::new(client.clone()));

    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.enriched, 1);
    assert_eq!(summary.skipped, 0);

    let prompts = client.prompts();
    // Six sub-questions plus one synthesis prompt.
    assert_eq!(prompts.len(), QUESTION_SLOTS + 1);
    let synthesis = prompts.last().unwrap();
    assert!(synthesis.contains("- What they do: answer one"));
    assert!(synthesis.contains("- Investors & funding: \n"));
    assert!(synthesis.contains("- Industry & website: answer six"));

    let snapshot = pipeline.store().fetch_all(&PROCESSED_COMPANIES);
    let row = snapshot.get("Acme").unwrap();
    assert_eq!(row.get("company_processed"), &Value::Int(1));
    assert_eq!(row.get("summary"), &Value::Text("builds rockets".into()));
    assert_eq!(row.get("tags"), &Value::Text("aerospace, deeptech".into()));
}

#[tokio::test]
async fn malformed_synthesis_leaves_record_unprocessed() {
    let (_dir, store) = store_with_company("Acme");
    let mut responses: Vec<Result<String, CompletionError>> =
        (0..QUESTION_SLOTS).map(|i| Ok(format!("answer {i}"))).collect();
    responses.push(Ok("I could not find structured data, sorry!".into()));

    let pipeline = EnrichmentPipeline::new(store, Box::new(ScriptedClient::new(responses)));
    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.enriched, 0);
    assert_eq!(summary.skipped, 1);

    // The record stays unprocessed for the next run; nothing was written.
    assert_eq!(
        pipeline.store().unprocessed_companies().unwrap(),
        vec!["Acme".to_string()]
    );
    let snapshot = pipeline.store().fetch_all(&PROCESSED_COMPANIES);
    assert!(snapshot.get("Acme").unwrap().get("summary").is_null());

    // The parse failure was recorded for review.
    let errors: i64 = pipeline
        .store()
        .conn_ref()
        .query_row(
            "SELECT COUNT(*) FROM api_errors_log WHERE stage = 'parse_enrichment'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(errors, 1);
}

#[tokio::test]
async fn failed_synthesis_call_is_skipped_not_fatal() {
    let (_dir, store) = store_with_company("Acme");
    let mut responses: Vec<Result<String, CompletionError>> =
        (0..QUESTION_SLOTS).map(|i| Ok(format!("answer {i}"))).collect();
    responses.push(Err(CompletionError::HttpStatus {
        status: 500,
        body: "upstream".into(),
    }));

    let pipeline = EnrichmentPipeline::new(store, Box::new(ScriptedClient::new(responses)));
    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.enriched, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(
        pipeline.store().unprocessed_companies().unwrap(),
        vec!["Acme".to_string()]
    );
}

#[tokio::test]
async fn already_processed_companies_are_not_scanned() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::open(dir.path().join("scout.db")).unwrap();
    let row = Row::new()
        .with("Company", Value::Text("Done Inc".into()))
        .with("Company Processed", Value::Bool(true));
    store.upsert(&PROCESSED_COMPANIES, &[row]);

    let pipeline = EnrichmentPipeline::new(store, Box::new(ScriptedClient::new(Vec::new())));
    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.scanned, 0);
    assert_eq!(summary.enriched, 0);
}

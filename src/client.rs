use std::time::Instant;

use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{ClientConfig, PanelSpec};
use crate::model::{
    AnnotationSubmission, Document, ErrorBody, EvaluationBatch, MessageResponse, NdcgResult,
    PanelResults, RandomDocument, RandomImage, SavedAnswers, TopDocuments, TopicSet,
    TopicsResponse,
};
use crate::workflow::answer::AnswerParam;

pub const SEARCH: &str = "/search";
pub const RANDOM_DOCUMENT: &str = "/get-random-document";
pub const RANDOM_IMAGE: &str = "/get-random-image";
pub const STORE_SCORES: &str = "/store-scores";
pub const EVALUATE: &str = "/evaluate";
pub const PREPARE_LLM_INPUT: &str = "/prepare-llm-input";
pub const GENERATE_LLM_ANSWER: &str = "/generate-llm-answer";
pub const RETRIEVE_SCORES: &str = "/retrieve-scores";
pub const RETRIEVE_LLM_ANSWERS: &str = "/retrieve-llm-answers";
pub const RETRIEVE_TOP_DOCUMENTS: &str = "/retrieve-top-documents";
pub const RETRIEVE_RESULTS: &str = "/retrieve-results";
pub const SAVE_LLM_ANSWERS: &str = "/save-llm-answers";
pub const SAVE_QUERY: &str = "/save-query";
pub const SAVE_ANNOTATIONS: &str = "/save-annotations";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("{endpoint} broke the response contract: {detail}")]
    Contract {
        endpoint: &'static str,
        detail: String,
    },
}

#[derive(Debug, Clone)]
pub struct AnnotatorApi {
    client: reqwest::Client,
    base_url: String,
    panels: Vec<PanelSpec>,
}

impl AnnotatorApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.server_url.clone(),
            panels: config.panels.clone(),
        })
    }

    pub fn panels(&self) -> &[PanelSpec] {
        &self.panels
    }

    pub async fn topics(&self, set: TopicSet) -> Result<Vec<String>, ApiError> {
        let response: TopicsResponse = self.get_json(set.endpoint(), &[]).await?;
        Ok(response.topics)
    }

    pub async fn random_document(&self) -> Result<RandomDocument, ApiError> {
        self.get_json(RANDOM_DOCUMENT, &[]).await
    }

    pub async fn random_image(&self) -> Result<RandomImage, ApiError> {
        self.get_json(RANDOM_IMAGE, &[]).await
    }

    pub async fn search(&self, topic: &str) -> Result<PanelResults, ApiError> {
        let body = serde_json::json!({ "topic": topic });
        let raw: Map<String, Value> = self.post_json(SEARCH, Some(&body)).await?;
        extract_panels(SEARCH, raw, &self.panels)
    }

    pub async fn store_scores(&self, batch: &EvaluationBatch) -> Result<MessageResponse, ApiError> {
        self.post_json(STORE_SCORES, Some(batch)).await
    }

    pub async fn evaluate(&self, batch: &EvaluationBatch) -> Result<NdcgResult, ApiError> {
        let raw: Value = self.post_json(EVALUATE, Some(batch)).await?;
        NdcgResult::from_value(raw).map_err(|detail| ApiError::Contract {
            endpoint: EVALUATE,
            detail,
        })
    }

    pub async fn prepare_llm_input(&self, param: AnswerParam) -> Result<MessageResponse, ApiError> {
        let (name, value) = param.query_pair();
        self.get_json(PREPARE_LLM_INPUT, &[(name, value.to_string())])
            .await
    }

    pub async fn generate_llm_answer(&self) -> Result<Value, ApiError> {
        self.post_json::<Value, Value>(GENERATE_LLM_ANSWER, None).await
    }

    pub async fn retrieve_scores(&self) -> Result<Map<String, Value>, ApiError> {
        self.get_json(RETRIEVE_SCORES, &[]).await
    }

    pub async fn retrieve_llm_answers(&self) -> Result<IndexMap<String, Value>, ApiError> {
        self.get_json(RETRIEVE_LLM_ANSWERS, &[]).await
    }

    pub async fn retrieve_top_documents(&self) -> Result<Vec<Document>, ApiError> {
        let response: TopDocuments = self.get_json(RETRIEVE_TOP_DOCUMENTS, &[]).await?;
        Ok(response.top_documents)
    }

    pub async fn retrieve_results(&self) -> Result<PanelResults, ApiError> {
        let raw: Map<String, Value> = self.get_json(RETRIEVE_RESULTS, &[]).await?;
        extract_panels(RETRIEVE_RESULTS, raw, &self.panels)
    }

    pub async fn save_llm_answers(&self, answers: &SavedAnswers) -> Result<MessageResponse, ApiError> {
        self.post_json(SAVE_LLM_ANSWERS, Some(answers)).await
    }

    pub async fn save_query(&self) -> Result<MessageResponse, ApiError> {
        self.post_json::<Value, MessageResponse>(SAVE_QUERY, None).await
    }

    pub async fn save_annotations(
        &self,
        submission: &AnnotationSubmission,
    ) -> Result<MessageResponse, ApiError> {
        self.post_json(SAVE_ANNOTATIONS, Some(submission)).await
    }

    // ---- private helpers ----

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let started = Instant::now();
        let mut request = self.client.get(self.url(endpoint));
        if !query.is_empty() {
            request = request.query(query);
        }
        let result = match request.send().await {
            Ok(response) => Self::parse_response(endpoint, response).await,
            Err(err) => Err(ApiError::from(err)),
        };
        debug!(
            endpoint,
            method = "GET",
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "api call finished"
        );
        result
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let started = Instant::now();
        let mut request = self.client.post(self.url(endpoint));
        if let Some(body) = body {
            request = request.json(body);
        }
        let result = match request.send().await {
            Ok(response) => Self::parse_response(endpoint, response).await,
            Err(err) => Err(ApiError::from(err)),
        };
        debug!(
            endpoint,
            method = "POST",
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "api call finished"
        );
        result
    }

    async fn ensure_success(
        endpoint: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let body = serde_json::from_str::<ErrorBody>(&body)
                .map(|parsed| parsed.error)
                .unwrap_or(body);
            return Err(ApiError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: DeserializeOwned>(
        endpoint: &'static str,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(endpoint, response).await?;
        Ok(response.json::<T>().await?)
    }
}

fn extract_panels(
    endpoint: &'static str,
    mut raw: Map<String, Value>,
    panels: &[PanelSpec],
) -> Result<PanelResults, ApiError> {
    let query = raw
        .get("query")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut lists = IndexMap::with_capacity(panels.len());
    for panel in panels {
        let value = raw.remove(&panel.key).ok_or_else(|| ApiError::Contract {
            endpoint,
            detail: format!("missing panel key {}", panel.key),
        })?;
        let documents = serde_json::from_value::<Vec<Document>>(value).map_err(|err| {
            ApiError::Contract {
                endpoint,
                detail: format!("panel {} is not a document list: {err}", panel.key),
            }
        })?;
        lists.insert(panel.key.clone(), documents);
    }

    Ok(PanelResults {
        query,
        panels: lists,
    })
}

#[cfg(test)]
mod tests {
    use axum::Json;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use serde_json::json;

    use super::*;
    use crate::config::test_config;
    use crate::test_support::{FakeBackend, sample_document, search_payload};

    #[test]
    fn extract_panels_requires_every_configured_key() {
        let panels = vec![
            PanelSpec::numbered(1, "BM25"),
            PanelSpec::numbered(2, "CLIP"),
        ];
        let mut raw = Map::new();
        raw.insert(
            "model_1_documents".to_string(),
            json!([sample_document("a", 1.0)]),
        );

        let error = extract_panels(SEARCH, raw.clone(), &panels).expect_err("model 2 is missing");
        assert!(
            error.to_string().contains("model_2_documents"),
            "unexpected error: {error}"
        );

        raw.insert("model_2_documents".to_string(), json!([]));
        raw.insert("BM25_documents".to_string(), json!("ignored"));
        raw.insert("query".to_string(), json!("solar panels"));
        let results = extract_panels(SEARCH, raw, &panels).expect("all keys present");
        assert_eq!(results.query.as_deref(), Some("solar panels"));
        assert_eq!(results.panels["model_1_documents"].len(), 1);
        assert!(results.panels["model_2_documents"].is_empty());
    }

    #[tokio::test]
    async fn search_posts_topic_and_keeps_server_order() {
        let backend = FakeBackend::start(|router| {
            router.route(
                SEARCH,
                post(|Json(body): Json<Value>| async move {
                    let topic = body["topic"].as_str().unwrap_or_default().to_string();
                    Json(search_payload(&topic, 4, 3))
                }),
            )
        })
        .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let api = AnnotatorApi::new(&test_config(&backend.url, dir.path().to_path_buf()))
            .expect("client builds");

        let results = api.search("solar panels").await.expect("search succeeds");
        assert_eq!(results.panels.len(), 4);
        let titles = results.panels["model_3_documents"]
            .iter()
            .map(|doc| doc.title.as_str())
            .collect::<Vec<&str>>();
        assert_eq!(
            titles,
            vec![
                "solar panels m3 d1",
                "solar panels m3 d2",
                "solar panels m3 d3"
            ]
        );
    }

    #[tokio::test]
    async fn non_success_status_surfaces_backend_error_message() {
        let backend = FakeBackend::start(|router| {
            router.route(
                PREPARE_LLM_INPUT,
                get(|| async {
                    (
                        StatusCode::NOT_FOUND,
                        Json(json!({"error": "No NDCG scores found for NDCG@2"})),
                    )
                }),
            )
        })
        .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let api = AnnotatorApi::new(&test_config(&backend.url, dir.path().to_path_buf()))
            .expect("client builds");

        let error = api
            .prepare_llm_input(AnswerParam::NdcgCutoff(2))
            .await
            .expect_err("404 must fail");
        match error {
            ApiError::Status {
                endpoint,
                status,
                body,
            } => {
                assert_eq!(endpoint, PREPARE_LLM_INPUT);
                assert_eq!(status, 404);
                assert_eq!(body, "No NDCG scores found for NDCG@2");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_request_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let api = AnnotatorApi::new(&test_config("http://127.0.0.1:9", dir.path().to_path_buf()))
            .expect("client builds");
        let error = api
            .topics(TopicSet::Manual)
            .await
            .expect_err("nothing listens on port 9");
        assert!(matches!(error, ApiError::Request(_)), "unexpected error: {error}");
    }
}

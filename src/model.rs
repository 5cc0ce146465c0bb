use std::collections::BTreeMap;
use std::fmt;

use clap::ValueEnum;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum TopicSet {
    Curated,
    Manual,
}

impl TopicSet {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Curated => "curated",
            Self::Manual => "manual",
        }
    }

    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Curated => "/get-topics",
            Self::Manual => "/get-manual-topics",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ContextKind {
    Document,
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub image_data: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Grade(i8);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GradeError {
    #[error("grade must be an integer, got {0:?}")]
    NotAnInteger(String),
    #[error("grade {value} is outside the {scale} scale ({min}..={max})")]
    OutOfRange {
        value: i64,
        scale: &'static str,
        min: i8,
        max: i8,
    },
}

impl Grade {
    pub const MIN: i8 = -1;
    pub const MAX: i8 = 3;

    pub fn value(self) -> i8 {
        self.0
    }
}

impl TryFrom<i64> for Grade {
    type Error = GradeError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        GradeScale::Extended.grade(value)
    }
}

impl From<Grade> for i64 {
    fn from(grade: Grade) -> Self {
        i64::from(grade.0)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// The evaluation page accepts `-1` ("off-topic") on top of the 0..=3 scale
// the annotation page uses.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GradeScale {
    Extended,
    Standard,
}

impl GradeScale {
    pub fn bounds(self) -> (i8, i8) {
        match self {
            Self::Extended => (Grade::MIN, Grade::MAX),
            Self::Standard => (0, Grade::MAX),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extended => "extended",
            Self::Standard => "standard",
        }
    }

    pub fn grade(self, value: i64) -> Result<Grade, GradeError> {
        let (min, max) = self.bounds();
        if value < i64::from(min) || value > i64::from(max) {
            return Err(GradeError::OutOfRange {
                value,
                scale: self.as_str(),
                min,
                max,
            });
        }
        Ok(Grade(value as i8))
    }

    pub fn parse(self, raw: &str) -> Result<Grade, GradeError> {
        let trimmed = raw.trim();
        let value = trimmed
            .parse::<i64>()
            .map_err(|_| GradeError::NotAnInteger(trimmed.to_string()))?;
        self.grade(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgedDocument {
    #[serde(flatten)]
    pub document: Document,
    pub relevance: Grade,
    pub completeness: Grade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationBatch {
    pub query: String,
    #[serde(flatten)]
    pub panels: IndexMap<String, Vec<JudgedDocument>>,
}

impl EvaluationBatch {
    pub fn document_count(&self) -> usize {
        self.panels.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelResults {
    pub query: Option<String>,
    pub panels: IndexMap<String, Vec<Document>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicsResponse {
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomDocument {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomImage {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub image_data: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopDocuments {
    #[serde(default)]
    pub top_documents: Vec<Document>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NdcgResult {
    pub scores: BTreeMap<Option<u32>, IndexMap<String, f64>>,
}

impl NdcgResult {
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(map) = value else {
            return Err("ndcg response is not a json object".to_string());
        };

        let mut result = NdcgResult::default();
        let nested = map.values().any(Value::is_object);
        if !nested {
            let flat = result.scores.entry(None).or_default();
            for (key, value) in map {
                let score = value
                    .as_f64()
                    .ok_or_else(|| format!("ndcg score for {key} is not a number"))?;
                flat.insert(key, score);
            }
            return Ok(result);
        }

        for (cutoff_raw, value) in map {
            let cutoff = cutoff_raw
                .trim()
                .parse::<u32>()
                .map_err(|_| format!("ndcg cutoff {cutoff_raw:?} is not a rank"))?;
            let Value::Object(per_model) = value else {
                return Err(format!("ndcg@{cutoff} entry is not an object"));
            };
            let bucket = result.scores.entry(Some(cutoff)).or_default();
            for (key, value) in per_model {
                let score = value
                    .as_f64()
                    .ok_or_else(|| format!("ndcg@{cutoff} score for {key} is not a number"))?;
                bucket.insert(key, score);
            }
        }
        Ok(result)
    }

    pub fn for_panel(&self, key: &str) -> BTreeMap<Option<u32>, f64> {
        self.scores
            .iter()
            .filter_map(|(cutoff, per_model)| per_model.get(key).map(|score| (*cutoff, *score)))
            .collect()
    }

    pub fn score_count(&self) -> usize {
        self.scores.values().map(IndexMap::len).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationEntry {
    pub title: String,
    pub content: String,
    pub relevance: Grade,
    pub completeness: Grade,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationSubmission {
    #[serde(rename = "annotatorName")]
    pub annotator_name: String,
    #[serde(rename = "annotatorUrl", skip_serializing_if = "Option::is_none")]
    pub annotator_url: Option<String>,
    pub annotations: Vec<AnnotationEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerComparisonRecord {
    pub candidate: String,
    pub position: String,
    pub answer_markdown: String,
    pub relevance: u8,
    pub faithfulness: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedAnswers {
    pub query: String,
    pub annotated_at: String,
    pub comparison: Vec<AnswerComparisonRecord>,
}

use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use indexmap::IndexMap;
use pulldown_cmark::{Event, Options, Parser, html};
use rand::Rng;
use serde_json::Value;
use tracing::{info, warn};

use crate::client::{AnnotatorApi, ApiError};
use crate::model::{AnswerComparisonRecord, Document, SavedAnswers};
use crate::util::{escape_html, now_utc_string, utc_compact_string, write_bytes};

pub const TOP_N_RANGE: (u32, u32) = (1, 20);
pub const NDCG_CUTOFF_RANGE: (u32, u32) = (1, 3);
pub const RATING_RANGE: (u8, u8) = (1, 5);

const ANSWER_SUFFIX: &str = "_llm_answer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerParam {
    TopN(u32),
    NdcgCutoff(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnswerParamError {
    #[error("{name} must be a whole number, got {raw:?}")]
    NotANumber { name: &'static str, raw: String },
    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("unknown answer parameter {0:?}; use top-n or ndcg")]
    UnknownKind(String),
}

impl AnswerParam {
    pub fn top_n(raw: &str) -> Result<Self, AnswerParamError> {
        parse_bounded("top_n", raw, TOP_N_RANGE).map(Self::TopN)
    }

    pub fn ndcg(raw: &str) -> Result<Self, AnswerParamError> {
        parse_bounded("ndcg", raw, NDCG_CUTOFF_RANGE).map(Self::NdcgCutoff)
    }

    pub fn parse(kind: &str, raw: &str) -> Result<Self, AnswerParamError> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "top-n" | "top_n" | "topn" => Self::top_n(raw),
            "ndcg" => Self::ndcg(raw),
            other => Err(AnswerParamError::UnknownKind(other.to_string())),
        }
    }

    pub fn query_pair(self) -> (&'static str, u32) {
        match self {
            Self::TopN(n) => ("top_n", n),
            Self::NdcgCutoff(k) => ("ndcg", k),
        }
    }
}

impl fmt::Display for AnswerParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopN(n) => write!(f, "top {n} documents"),
            Self::NdcgCutoff(k) => write!(f, "best model by NDCG@{k}"),
        }
    }
}

fn parse_bounded(
    name: &'static str,
    raw: &str,
    (min, max): (u32, u32),
) -> Result<u32, AnswerParamError> {
    let value = raw
        .trim()
        .parse::<u32>()
        .map_err(|_| AnswerParamError::NotANumber {
            name,
            raw: raw.to_string(),
        })?;
    if !(min..=max).contains(&value) {
        return Err(AnswerParamError::OutOfRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

// Markdown to HTML. Raw HTML in the answer is escaped, not passed through.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

#[derive(Debug, Clone, PartialEq)]
pub enum CandidateAnswer {
    Ready {
        name: String,
        markdown: String,
        html: String,
    },
    Failed {
        name: String,
        message: String,
    },
}

impl CandidateAnswer {
    pub fn from_completion(key: &str, completion: &Value) -> Self {
        let name = key.strip_suffix(ANSWER_SUFFIX).unwrap_or(key).to_string();

        let content = completion
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .or_else(|| completion.as_str());
        if let Some(markdown) = content {
            return Self::Ready {
                name,
                html: markdown_to_html(markdown),
                markdown: markdown.to_string(),
            };
        }

        let message = completion
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("no answer content returned")
            .to_string();
        Self::Failed { name, message }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Ready { name, .. } | Self::Failed { name, .. } => name,
        }
    }

    pub fn markdown(&self) -> &str {
        match self {
            Self::Ready { markdown, .. } => markdown,
            Self::Failed { .. } => "",
        }
    }

    pub fn render_text(&self) -> String {
        match self {
            Self::Ready { markdown, .. } => markdown.clone(),
            Self::Failed { message, .. } => format!("Error: {message}"),
        }
    }

    fn render_html(&self) -> String {
        match self {
            Self::Ready { html, .. } => html.clone(),
            Self::Failed { message, .. } => {
                format!("<p class=\"error\">Error: {}</p>", escape_html(message))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Some(Self::Left),
            "right" | "r" => Some(Self::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnswerRating {
    pub relevance: Option<u8>,
    pub faithfulness: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnswerError {
    #[error("{field} rating must be between {min} and {max}, got {value}")]
    RatingOutOfRange {
        field: &'static str,
        value: u8,
        min: u8,
        max: u8,
    },
    #[error("the {} answer still needs relevance and faithfulness", .0.as_str())]
    Unrated(Side),
    #[error("no blind comparison is shown")]
    NoComparison,
}

fn check_rating(field: &'static str, value: u8) -> Result<u8, AnswerError> {
    let (min, max) = RATING_RANGE;
    if !(min..=max).contains(&value) {
        return Err(AnswerError::RatingOutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlindPair {
    pub left: CandidateAnswer,
    pub right: CandidateAnswer,
    pub left_rating: AnswerRating,
    pub right_rating: AnswerRating,
}

impl BlindPair {
    pub fn new<R: Rng + ?Sized>(first: CandidateAnswer, second: CandidateAnswer, rng: &mut R) -> Self {
        let (left, right) = if rng.random_bool(0.5) {
            (second, first)
        } else {
            (first, second)
        };
        Self {
            left,
            right,
            left_rating: AnswerRating::default(),
            right_rating: AnswerRating::default(),
        }
    }

    pub fn candidate(&self, side: Side) -> &CandidateAnswer {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn rating(&self, side: Side) -> AnswerRating {
        match side {
            Side::Left => self.left_rating,
            Side::Right => self.right_rating,
        }
    }

    pub fn rate(&mut self, side: Side, relevance: u8, faithfulness: u8) -> Result<(), AnswerError> {
        let rating = AnswerRating {
            relevance: Some(check_rating("relevance", relevance)?),
            faithfulness: Some(check_rating("faithfulness", faithfulness)?),
        };
        match side {
            Side::Left => self.left_rating = rating,
            Side::Right => self.right_rating = rating,
        }
        Ok(())
    }

    pub fn records(&self) -> Result<Vec<AnswerComparisonRecord>, AnswerError> {
        [Side::Left, Side::Right]
            .into_iter()
            .map(|side| {
                let rating = self.rating(side);
                let (Some(relevance), Some(faithfulness)) = (rating.relevance, rating.faithfulness)
                else {
                    return Err(AnswerError::Unrated(side));
                };
                let candidate = self.candidate(side);
                Ok(AnswerComparisonRecord {
                    candidate: candidate.name().to_string(),
                    position: side.as_str().to_string(),
                    answer_markdown: candidate.markdown().to_string(),
                    relevance,
                    faithfulness,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum AnswerView {
    #[default]
    Empty,
    Failed(String),
    Single(CandidateAnswer),
    Blind(BlindPair),
}

impl AnswerView {
    pub fn from_answers<R: Rng + ?Sized>(answers: &IndexMap<String, Value>, rng: &mut R) -> Self {
        let mut candidates = answers
            .iter()
            .map(|(key, completion)| CandidateAnswer::from_completion(key, completion));
        match (candidates.next(), candidates.next()) {
            (None, _) => Self::Failed("no answers were returned".to_string()),
            (Some(only), None) => Self::Single(only),
            (Some(first), Some(second)) => Self::Blind(BlindPair::new(first, second, rng)),
        }
    }

    pub fn render_text(&self) -> String {
        match self {
            Self::Empty => "no answer generated yet".to_string(),
            Self::Failed(message) => format!("Error: {message}"),
            Self::Single(candidate) => candidate.render_text(),
            Self::Blind(pair) => {
                let mut out = String::new();
                for side in [Side::Left, Side::Right] {
                    let rating = pair.rating(side);
                    let _ = writeln!(
                        out,
                        "--- {} answer (relevance={} faithfulness={}) ---\n{}",
                        side.as_str(),
                        rating.relevance.map_or("_".to_string(), |v| v.to_string()),
                        rating.faithfulness.map_or("_".to_string(), |v| v.to_string()),
                        pair.candidate(side).render_text()
                    );
                }
                out.trim_end().to_string()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub param: AnswerParam,
    pub prepared: Option<String>,
    pub view: AnswerView,
    pub top_documents: Vec<Document>,
}

struct FetchedAnswers {
    prepared: Option<String>,
    answers: IndexMap<String, Value>,
    top_documents: Vec<Document>,
}

async fn fetch_answers(api: &AnnotatorApi, param: AnswerParam) -> Result<FetchedAnswers, ApiError> {
    let prepared = api.prepare_llm_input(param).await?;
    api.generate_llm_answer().await?;
    let answers = api.retrieve_llm_answers().await?;
    let top_documents = api.retrieve_top_documents().await?;
    Ok(FetchedAnswers {
        prepared: prepared.message,
        answers,
        top_documents,
    })
}

pub async fn run_pipeline<R: Rng + ?Sized>(
    api: &AnnotatorApi,
    param: AnswerParam,
    rng: &mut R,
) -> AnswerOutcome {
    match fetch_answers(api, param).await {
        Ok(fetched) => {
            let view = AnswerView::from_answers(&fetched.answers, rng);
            info!(
                param = %param,
                candidates = fetched.answers.len(),
                top_documents = fetched.top_documents.len(),
                "answers generated"
            );
            AnswerOutcome {
                param,
                prepared: fetched.prepared,
                view,
                top_documents: fetched.top_documents,
            }
        }
        Err(err) => {
            warn!(param = %param, error = %err, "answer generation failed");
            AnswerOutcome {
                param,
                prepared: None,
                view: AnswerView::Failed(err.to_string()),
                top_documents: Vec::new(),
            }
        }
    }
}

pub fn saved_answers(query: &str, pair: &BlindPair) -> Result<SavedAnswers, AnswerError> {
    Ok(SavedAnswers {
        query: query.to_string(),
        annotated_at: now_utc_string(),
        comparison: pair.records()?,
    })
}

pub fn render_comparison_page(query: &str, outcome: &AnswerOutcome) -> String {
    let mut page = String::new();
    let _ = write!(
        page,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n\
         <style>.columns{{display:flex;gap:2em}}.columns>section{{flex:1}}.error{{color:#b00}}</style>\n\
         </head>\n<body>\n<h1>{title}</h1>\n<p>Context: {param}</p>\n",
        title = escape_html(query),
        param = escape_html(&outcome.param.to_string()),
    );

    match &outcome.view {
        AnswerView::Empty => page.push_str("<p>No answer generated.</p>\n"),
        AnswerView::Failed(message) => {
            let _ = writeln!(page, "<p class=\"error\">Error: {}</p>", escape_html(message));
        }
        AnswerView::Single(candidate) => {
            let _ = writeln!(page, "<section>\n{}</section>", candidate.render_html());
        }
        AnswerView::Blind(pair) => {
            page.push_str("<div class=\"columns\">\n");
            for side in [Side::Left, Side::Right] {
                let _ = writeln!(
                    page,
                    "<section id=\"answer-{side}\">\n<h2>Answer {label}</h2>\n{body}</section>",
                    side = side.as_str(),
                    label = if side == Side::Left { "A" } else { "B" },
                    body = pair.candidate(side).render_html(),
                );
            }
            page.push_str("</div>\n");
        }
    }

    if !outcome.top_documents.is_empty() {
        page.push_str("<h2>Context documents</h2>\n<ol>\n");
        for document in &outcome.top_documents {
            let _ = writeln!(
                page,
                "<li><strong>{}</strong> ({:.4})<br>{}</li>",
                escape_html(&document.title),
                document.score,
                escape_html(&document.content)
            );
        }
        page.push_str("</ol>\n");
    }
    page.push_str("</body>\n</html>\n");
    page
}

pub fn write_comparison_page(output_dir: &Path, query: &str, outcome: &AnswerOutcome) -> Result<PathBuf> {
    let path = output_dir
        .join("answers")
        .join(format!("answer-{}.html", utc_compact_string(Utc::now())));
    write_bytes(&path, render_comparison_page(query, outcome).as_bytes())?;
    Ok(path)
}

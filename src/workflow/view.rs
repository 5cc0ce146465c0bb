use std::collections::BTreeMap;
use std::fmt::Write as _;

use indexmap::IndexMap;

use crate::config::PanelSpec;
use crate::model::{Document, EvaluationBatch, Grade, JudgedDocument, NdcgResult};
use crate::util::{condense_whitespace, truncate_chars};

const CONTENT_PREVIEW_CHARS: usize = 280;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JudgmentField {
    Relevance,
    Completeness,
}

impl JudgmentField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relevance => "relevance",
            Self::Completeness => "completeness",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JudgmentDraft {
    pub relevance: Option<Grade>,
    pub completeness: Option<Grade>,
}

impl JudgmentDraft {
    pub fn get(&self, field: JudgmentField) -> Option<Grade> {
        match field {
            JudgmentField::Relevance => self.relevance,
            JudgmentField::Completeness => self.completeness,
        }
    }

    pub fn set(&mut self, field: JudgmentField, grade: Grade) {
        match field {
            JudgmentField::Relevance => self.relevance = Some(grade),
            JudgmentField::Completeness => self.completeness = Some(grade),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.relevance.is_some() && self.completeness.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentCard {
    pub document: Document,
    pub judgment: JudgmentDraft,
}

impl DocumentCard {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            judgment: JudgmentDraft::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CardRef {
    pub panel: usize,
    pub card: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub key: String,
    pub label: String,
    pub cards: Vec<DocumentCard>,
    pub ndcg: BTreeMap<Option<u32>, f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} judgment field(s) are still unset", missing.len())]
pub struct IncompleteJudgments {
    pub missing: Vec<(CardRef, JudgmentField)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsView {
    pub query: String,
    pub panels: Vec<Panel>,
}

impl ResultsView {
    pub fn from_results(
        query: &str,
        specs: &[PanelSpec],
        mut lists: IndexMap<String, Vec<Document>>,
    ) -> Self {
        let panels = specs
            .iter()
            .map(|spec| Panel {
                key: spec.key.clone(),
                label: spec.label.clone(),
                cards: lists
                    .shift_remove(&spec.key)
                    .unwrap_or_default()
                    .into_iter()
                    .map(DocumentCard::new)
                    .collect(),
                ndcg: BTreeMap::new(),
            })
            .collect();

        Self {
            query: query.to_string(),
            panels,
        }
    }

    pub fn card_refs(&self) -> Vec<CardRef> {
        self.panels
            .iter()
            .enumerate()
            .flat_map(|(panel_idx, panel)| {
                (0..panel.cards.len()).map(move |card| CardRef {
                    panel: panel_idx,
                    card,
                })
            })
            .collect()
    }

    pub fn card_count(&self) -> usize {
        self.panels.iter().map(|panel| panel.cards.len()).sum()
    }

    pub fn layout(&self) -> Vec<usize> {
        self.panels.iter().map(|panel| panel.cards.len()).collect()
    }

    pub fn card(&self, at: CardRef) -> Option<&DocumentCard> {
        self.panels.get(at.panel)?.cards.get(at.card)
    }

    pub fn card_mut(&mut self, at: CardRef) -> Option<&mut DocumentCard> {
        self.panels.get_mut(at.panel)?.cards.get_mut(at.card)
    }

    pub fn missing_judgments(&self) -> Vec<(CardRef, JudgmentField)> {
        let mut missing = Vec::new();
        for at in self.card_refs() {
            let Some(card) = self.card(at) else {
                continue;
            };
            for field in [JudgmentField::Relevance, JudgmentField::Completeness] {
                if card.judgment.get(field).is_none() {
                    missing.push((at, field));
                }
            }
        }
        missing
    }

    pub fn collect_batch(&self) -> Result<EvaluationBatch, IncompleteJudgments> {
        let missing = self.missing_judgments();
        if !missing.is_empty() {
            return Err(IncompleteJudgments { missing });
        }

        let mut panels = IndexMap::with_capacity(self.panels.len());
        for panel in &self.panels {
            let judged = panel
                .cards
                .iter()
                .filter_map(|card| {
                    Some(JudgedDocument {
                        document: card.document.clone(),
                        relevance: card.judgment.relevance?,
                        completeness: card.judgment.completeness?,
                    })
                })
                .collect::<Vec<JudgedDocument>>();
            panels.insert(panel.key.clone(), judged);
        }

        Ok(EvaluationBatch {
            query: self.query.clone(),
            panels,
        })
    }

    pub fn apply_ndcg(&mut self, result: &NdcgResult) -> usize {
        let mut updated = 0;
        for panel in &mut self.panels {
            let scores = result.for_panel(&panel.key);
            if scores.is_empty() {
                continue;
            }
            panel.ndcg = scores;
            updated += 1;
        }
        updated
    }
}

fn format_grade(grade: Option<Grade>) -> String {
    grade.map_or_else(|| "_".to_string(), |grade| grade.to_string())
}

pub fn render_ndcg(ndcg: &BTreeMap<Option<u32>, f64>) -> String {
    ndcg.iter()
        .map(|(cutoff, score)| match cutoff {
            Some(cutoff) => format!("NDCG@{cutoff}={score:.4}"),
            None => format!("NDCG={score:.4}"),
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn render_panel_header(panel: &Panel) -> String {
    let mut header = format!("== {} ({}) ==", panel.label, panel.key);
    if !panel.ndcg.is_empty() {
        let _ = write!(header, " {}", render_ndcg(&panel.ndcg));
    }
    header
}

pub fn render_card(
    panel: &Panel,
    index: usize,
    card: &DocumentCard,
    focused: Option<JudgmentField>,
) -> String {
    let marker = |field: JudgmentField| if focused == Some(field) { ">" } else { " " };
    let content = truncate_chars(
        &condense_whitespace(&card.document.content),
        CONTENT_PREVIEW_CHARS,
    );
    let image = if card.document.image_data.is_empty() {
        "no image".to_string()
    } else {
        format!("image {} b64 chars", card.document.image_data.len())
    };

    format!(
        "[{label} #{number}] {title}\n    {content}\n    score={score:.4} {image}\n   {rel_marker}relevance={relevance} {comp_marker}completeness={completeness}",
        label = panel.label,
        number = index + 1,
        title = card.document.title,
        score = card.document.score,
        rel_marker = marker(JudgmentField::Relevance),
        relevance = format_grade(card.judgment.relevance),
        comp_marker = marker(JudgmentField::Completeness),
        completeness = format_grade(card.judgment.completeness),
    )
}

pub fn render_panel(panel: &Panel, focus: Option<(usize, JudgmentField)>) -> String {
    let mut out = render_panel_header(panel);
    for (idx, card) in panel.cards.iter().enumerate() {
        let focused = focus.and_then(|(card_idx, field)| (card_idx == idx).then_some(field));
        let _ = write!(out, "\n{}", render_card(panel, idx, card, focused));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GradeScale;

    fn grade(value: i64) -> Grade {
        GradeScale::Extended.grade(value).expect("valid grade")
    }

    fn document(title: &str) -> Document {
        Document {
            title: title.to_string(),
            content: format!("  {title}\n content with   spacing "),
            image_data: "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==".to_string(),
            score: 3.25,
        }
    }

    fn view(models: usize, docs: usize) -> ResultsView {
        let specs = (1..=models)
            .map(|idx| PanelSpec::numbered(idx, &format!("M{idx}")))
            .collect::<Vec<PanelSpec>>();
        let lists = specs
            .iter()
            .enumerate()
            .map(|(model, spec)| {
                (
                    spec.key.clone(),
                    (0..docs)
                        .map(|doc| document(&format!("m{} d{}", model + 1, doc + 1)))
                        .collect(),
                )
            })
            .collect::<IndexMap<String, Vec<Document>>>();
        ResultsView::from_results("solar panels", &specs, lists)
    }

    fn judge_all(view: &mut ResultsView) {
        for at in view.card_refs() {
            let card = view.card_mut(at).expect("card exists");
            card.judgment.set(JudgmentField::Relevance, grade(2));
            card.judgment.set(JudgmentField::Completeness, grade(-1));
        }
    }

    #[test]
    fn collect_batch_rejects_any_unset_field() {
        let mut view = view(2, 2);
        judge_all(&mut view);
        view.card_mut(CardRef { panel: 1, card: 1 })
            .expect("card exists")
            .judgment
            .completeness = None;

        let error = view.collect_batch().expect_err("one field is unset");
        assert_eq!(
            error.missing,
            vec![(CardRef { panel: 1, card: 1 }, JudgmentField::Completeness)]
        );
    }

    #[test]
    fn collect_batch_round_trips_document_payloads() {
        let mut view = view(4, 3);
        let originals = view
            .card_refs()
            .into_iter()
            .map(|at| view.card(at).expect("card exists").document.clone())
            .collect::<Vec<Document>>();
        judge_all(&mut view);

        let batch = view.collect_batch().expect("all fields are set");
        assert_eq!(batch.query, "solar panels");
        assert_eq!(batch.document_count(), 12);
        let collected = batch
            .panels
            .values()
            .flatten()
            .map(|judged| judged.document.clone())
            .collect::<Vec<Document>>();
        assert_eq!(collected, originals);
        assert!(
            batch
                .panels
                .values()
                .flatten()
                .all(|judged| judged.relevance.value() == 2 && judged.completeness.value() == -1)
        );
    }

    #[test]
    fn card_refs_follow_document_order() {
        let view = view(2, 2);
        assert_eq!(
            view.card_refs(),
            vec![
                CardRef { panel: 0, card: 0 },
                CardRef { panel: 0, card: 1 },
                CardRef { panel: 1, card: 0 },
                CardRef { panel: 1, card: 1 },
            ]
        );
        assert_eq!(view.layout(), vec![2, 2]);
    }

    #[test]
    fn apply_ndcg_updates_matching_panels_only() {
        let mut view = view(3, 1);
        let result = NdcgResult::from_value(serde_json::json!({
            "1": {"model_1_documents": 1.0, "model_3_documents": 0.5, "model_9_documents": 0.1},
            "2": {"model_1_documents": 0.8}
        }))
        .expect("ndcg parses");

        assert_eq!(view.apply_ndcg(&result), 2);
        assert_eq!(view.panels[0].ndcg.len(), 2);
        assert!(view.panels[1].ndcg.is_empty());
        assert_eq!(
            render_panel_header(&view.panels[0]),
            "== M1 (model_1_documents) == NDCG@1=1.0000 NDCG@2=0.8000"
        );
    }

    #[test]
    fn render_card_marks_focused_control() {
        let view = view(1, 1);
        let panel = &view.panels[0];
        let rendered = render_card(panel, 0, &panel.cards[0], Some(JudgmentField::Completeness));
        assert!(rendered.starts_with("[M1 #1] m1 d1"));
        assert!(rendered.contains("m1 d1 content with spacing"));
        assert!(rendered.contains(" relevance=_ >completeness=_"));
    }
}

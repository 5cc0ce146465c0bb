use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::model::{
    AnnotationEntry, AnnotationSubmission, Document, Grade, GradeError, GradeScale, PanelResults,
};
use crate::util::sha256_fields;
use crate::workflow::view::{DocumentCard, JudgmentField};

pub const POOL_SCALE: GradeScale = GradeScale::Standard;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("annotator name is required")]
    MissingAnnotator,
    #[error("{missing} document(s) still need relevance and completeness")]
    Incomplete { missing: usize },
    #[error("no document at position {0}")]
    UnknownCard(usize),
    #[error(transparent)]
    Grade(#[from] GradeError),
}

pub fn document_key(document: &Document) -> String {
    sha256_fields(&[&document.title, &document.content, &document.image_data])
}

pub fn merge_unique<I>(lists: I) -> Vec<Document>
where
    I: IntoIterator<Item = Vec<Document>>,
{
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for document in lists.into_iter().flatten() {
        if seen.insert(document_key(&document)) {
            unique.push(document);
        }
    }
    unique
}

pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationPool {
    pub query: String,
    pub cards: Vec<DocumentCard>,
}

impl AnnotationPool {
    pub fn from_results<R: Rng + ?Sized>(results: PanelResults, rng: &mut R) -> Self {
        let mut documents = merge_unique(results.panels.into_values());
        documents.shuffle(rng);
        Self {
            query: results
                .query
                .unwrap_or_else(|| "No Query Found".to_string()),
            cards: documents.into_iter().map(DocumentCard::new).collect(),
        }
    }

    pub fn set_grade(&mut self, card: usize, field: JudgmentField, raw: &str) -> Result<Grade, PoolError> {
        let grade = POOL_SCALE.parse(raw)?;
        let entry = self.cards.get_mut(card).ok_or(PoolError::UnknownCard(card))?;
        entry.judgment.set(field, grade);
        Ok(grade)
    }

    pub fn auto_fill<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let (min, max) = POOL_SCALE.bounds();
        for card in &mut self.cards {
            for field in [JudgmentField::Relevance, JudgmentField::Completeness] {
                let value = rng.random_range(i64::from(min)..=i64::from(max));
                if let Ok(grade) = POOL_SCALE.grade(value) {
                    card.judgment.set(field, grade);
                }
            }
        }
    }

    pub fn missing_count(&self) -> usize {
        self.cards
            .iter()
            .filter(|card| !card.judgment.is_complete())
            .count()
    }

    pub fn submission(
        &self,
        annotator_name: &str,
        annotator_url: Option<&str>,
    ) -> Result<AnnotationSubmission, PoolError> {
        let annotator_name = annotator_name.trim();
        if annotator_name.is_empty() {
            return Err(PoolError::MissingAnnotator);
        }

        let mut annotations = Vec::with_capacity(self.cards.len());
        for card in &self.cards {
            let (Some(relevance), Some(completeness)) =
                (card.judgment.relevance, card.judgment.completeness)
            else {
                return Err(PoolError::Incomplete {
                    missing: self.missing_count(),
                });
            };
            annotations.push(AnnotationEntry {
                title: card.document.title.clone(),
                content: card.document.content.clone(),
                relevance,
                completeness,
            });
        }

        Ok(AnnotationSubmission {
            annotator_name: annotator_name.to_string(),
            annotator_url: annotator_url
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string),
            annotations,
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    fn doc(title: &str, content: &str, image: &str) -> Document {
        Document {
            title: title.to_string(),
            content: content.to_string(),
            image_data: image.to_string(),
            score: 0.0,
        }
    }

    fn results() -> PanelResults {
        let mut panels = IndexMap::new();
        panels.insert(
            "model_1_documents".to_string(),
            vec![doc("A", "a", "img-a"), doc("B", "b", "img-b")],
        );
        panels.insert(
            "model_2_documents".to_string(),
            vec![doc("B", "b", "img-b"), doc("C", "c", "img-c")],
        );
        panels.insert(
            "model_3_documents".to_string(),
            vec![doc("A", "a", "img-other"), doc("C", "c", "img-c")],
        );
        PanelResults {
            query: Some("wind power".to_string()),
            panels,
        }
    }

    #[test]
    fn merge_unique_drops_identical_triples_only() {
        let merged = merge_unique(results().panels.into_values());
        let keys = merged
            .iter()
            .map(|doc| (doc.title.as_str(), doc.image_data.as_str()))
            .collect::<Vec<(&str, &str)>>();
        assert_eq!(
            keys,
            vec![
                ("A", "img-a"),
                ("B", "img-b"),
                ("C", "img-c"),
                ("A", "img-other")
            ]
        );

        let unique = merged.iter().map(document_key).collect::<HashSet<String>>();
        assert_eq!(unique.len(), merged.len());
    }

    #[test]
    fn document_key_does_not_confuse_field_boundaries() {
        assert_ne!(
            document_key(&doc("ab", "c", "")),
            document_key(&doc("a", "bc", ""))
        );
    }

    #[test]
    fn seeded_shuffle_is_deterministic() {
        let first = AnnotationPool::from_results(results(), &mut seeded_rng(Some(7)));
        let second = AnnotationPool::from_results(results(), &mut seeded_rng(Some(7)));
        assert_eq!(first, second);
        assert_eq!(first.cards.len(), 4);
        assert_eq!(first.query, "wind power");
    }

    #[test]
    fn submission_requires_annotator_and_complete_judgments() {
        let mut pool = AnnotationPool::from_results(results(), &mut seeded_rng(Some(1)));
        assert_eq!(
            pool.submission("  ", None),
            Err(PoolError::MissingAnnotator)
        );
        assert_eq!(
            pool.submission("Reviewer", None),
            Err(PoolError::Incomplete { missing: 4 })
        );

        pool.auto_fill(&mut seeded_rng(Some(3)));
        let submission = pool
            .submission("Reviewer", Some(" https://example.org/r "))
            .expect("complete pool submits");
        assert_eq!(submission.annotations.len(), 4);
        assert_eq!(
            submission.annotator_url.as_deref(),
            Some("https://example.org/r")
        );
        assert!(submission.annotations.iter().all(|entry| {
            (0..=3).contains(&entry.relevance.value())
                && (0..=3).contains(&entry.completeness.value())
        }));
    }

    #[test]
    fn set_grade_uses_standard_scale() {
        let mut pool = AnnotationPool::from_results(results(), &mut seeded_rng(Some(1)));
        assert!(matches!(
            pool.set_grade(0, JudgmentField::Relevance, "-1"),
            Err(PoolError::Grade(_))
        ));
        assert_eq!(
            pool.set_grade(9, JudgmentField::Relevance, "1"),
            Err(PoolError::UnknownCard(9))
        );
        let grade = pool
            .set_grade(0, JudgmentField::Completeness, "3")
            .expect("3 is on the standard scale");
        assert_eq!(grade.value(), 3);
        assert_eq!(pool.cards[0].judgment.completeness, Some(grade));
    }
}

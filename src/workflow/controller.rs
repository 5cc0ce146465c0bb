use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::client::{AnnotatorApi, ApiError};
use crate::config::ClientConfig;
use crate::model::{
    ContextKind, Grade, GradeError, GradeScale, MessageResponse, TopicSet,
};
use crate::util::write_json_pretty;
use crate::workflow::answer::{
    AnswerError, AnswerParam, AnswerView, Side, run_pipeline, saved_answers,
    write_comparison_page,
};
use crate::workflow::focus::{FocusRing, FocusTarget};
use crate::workflow::pool::seeded_rng;
use crate::workflow::stagger::{RenderEvent, spawn_staggered};
use crate::workflow::state::{
    CycleClock, CycleState, QuerySession, StateMachine, TopicInput, TransitionError,
};
use crate::workflow::notice::NoticeBoard;
use crate::workflow::view::{
    CardRef, IncompleteJudgments, JudgmentField, ResultsView, render_card, render_panel,
    render_panel_header,
};
use crate::workflow::viewer::{
    Dismissal, Overlay, ViewerError, decode_image, open_overlay, save_image, thumbnail_for_panel,
};

pub const EVALUATION_SCALE: GradeScale = GradeScale::Extended;
pub const INCOMPLETE_NOTICE: &str = "Please annotate all documents before submitting.";

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Incomplete(#[from] IncompleteJudgments),
    #[error(transparent)]
    Viewer(#[from] ViewerError),
    #[error(transparent)]
    Grade(#[from] GradeError),
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error("no topic selected or typed")]
    NoTopic,
    #[error("no search results are shown")]
    NoResults,
    #[error("no card at panel {} position {}", .0.panel + 1, .0.card + 1)]
    UnknownCard(CardRef),
    #[error("no judgment control is focused")]
    NoFocus,
    #[error("topic list is not shown; fetch topics first")]
    NotInSelectionMode,
    #[error("topic {index} is out of range (list has {len})")]
    TopicOutOfRange { index: usize, len: usize },
    #[error("random image response carried no image")]
    MissingImage,
    #[error("{0}")]
    Output(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContextPreview {
    Document {
        title: String,
        content: String,
    },
    Image {
        title: Option<String>,
        width: u32,
        height: u32,
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSummary {
    pub generation: u64,
    pub query: String,
    pub cards: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluateSummary {
    pub documents: usize,
    pub scores: usize,
    pub panels_updated: usize,
}

#[derive(Debug)]
pub struct Controller {
    api: AnnotatorApi,
    config: ClientConfig,
    clock: CycleClock,
    machine: StateMachine,
    topic_input: TopicInput,
    session: Option<QuerySession>,
    results: Option<ResultsView>,
    focus: FocusRing,
    overlay: Option<Overlay>,
    notices: NoticeBoard,
    answer: AnswerView,
    answer_page: Option<PathBuf>,
    render_tx: UnboundedSender<RenderEvent>,
    rng: StdRng,
}

impl Controller {
    pub fn new(api: AnnotatorApi, config: ClientConfig) -> (Self, UnboundedReceiver<RenderEvent>) {
        Self::with_seed(api, config, None)
    }

    pub fn with_seed(
        api: AnnotatorApi,
        config: ClientConfig,
        seed: Option<u64>,
    ) -> (Self, UnboundedReceiver<RenderEvent>) {
        let (render_tx, render_rx) = mpsc::unbounded_channel();
        let controller = Self {
            api,
            config,
            clock: CycleClock::default(),
            machine: StateMachine::default(),
            topic_input: TopicInput::default(),
            session: None,
            results: None,
            focus: FocusRing::default(),
            overlay: None,
            notices: NoticeBoard::default(),
            answer: AnswerView::Empty,
            answer_page: None,
            render_tx,
            rng: seeded_rng(seed),
        };
        (controller, render_rx)
    }

    pub fn state(&self) -> CycleState {
        self.machine.state()
    }

    pub fn topic_input(&self) -> &TopicInput {
        &self.topic_input
    }

    pub fn session(&self) -> Option<&QuerySession> {
        self.session.as_ref()
    }

    pub fn results(&self) -> Option<&ResultsView> {
        self.results.as_ref()
    }

    pub fn focused(&self) -> Option<FocusTarget> {
        self.focus.current()
    }

    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    pub fn notice(&self) -> Option<String> {
        self.notices.current()
    }

    pub fn answer(&self) -> &AnswerView {
        &self.answer
    }

    pub fn answer_page(&self) -> Option<&Path> {
        self.answer_page.as_deref()
    }

    fn reset_cycle(&mut self) {
        self.clock.start_cycle();
        self.session = None;
        self.results = None;
        self.focus = FocusRing::default();
        self.overlay = None;
        self.answer = AnswerView::Empty;
        self.answer_page = None;
    }

    fn settle_topic_state(&mut self) -> Result<(), WorkflowError> {
        let next = if self.topic_input.current_topic().is_some() {
            CycleState::TopicSelected
        } else {
            CycleState::Idle
        };
        self.machine.advance(next)?;
        Ok(())
    }

    pub async fn fetch_topics(&mut self, set: TopicSet) -> Result<&[String], WorkflowError> {
        self.reset_cycle();
        self.machine.advance(CycleState::Idle)?;

        let topics = match self.api.topics(set).await {
            Ok(topics) => topics,
            Err(err) => {
                warn!(set = set.as_str(), error = %err, "topic fetch failed");
                self.settle_topic_state()?;
                return Err(err.into());
            }
        };
        info!(set = set.as_str(), topics = topics.len(), "topics loaded");

        self.topic_input = TopicInput::Selection {
            set,
            topics,
            selected: 0,
        };
        self.settle_topic_state()?;
        match &self.topic_input {
            TopicInput::Selection { topics, .. } => Ok(topics.as_slice()),
            TopicInput::FreeText(_) => Ok(&[]),
        }
    }

    pub fn select_topic(&mut self, index: usize) -> Result<String, WorkflowError> {
        let TopicInput::Selection {
            topics, selected, ..
        } = &mut self.topic_input
        else {
            return Err(WorkflowError::NotInSelectionMode);
        };
        let topic = topics
            .get(index)
            .cloned()
            .ok_or(WorkflowError::TopicOutOfRange {
                index,
                len: topics.len(),
            })?;
        *selected = index;
        if self.machine.state() == CycleState::Idle {
            self.machine.advance(CycleState::TopicSelected)?;
        }
        Ok(topic)
    }

    pub fn type_topic(&mut self, text: &str) -> Result<(), WorkflowError> {
        self.topic_input = TopicInput::FreeText(text.to_string());
        match self.machine.state() {
            CycleState::Idle | CycleState::TopicSelected => self.settle_topic_state(),
            _ => Ok(()),
        }
    }

    pub async fn random_context(&mut self, kind: ContextKind) -> Result<ContextPreview, WorkflowError> {
        self.reset_cycle();
        self.topic_input = TopicInput::FreeText(String::new());
        self.machine.advance(CycleState::Idle)?;

        match kind {
            ContextKind::Document => {
                let document = self.api.random_document().await.map_err(|err| {
                    warn!(error = %err, "random document fetch failed");
                    err
                })?;
                Ok(ContextPreview::Document {
                    title: document.title,
                    content: document.content,
                })
            }
            ContextKind::Image => {
                let image = match self.api.random_image().await {
                    Ok(image) => image,
                    Err(ApiError::Status {
                        status: 404, body, ..
                    }) => {
                        warn!(body = %body, "no random image available");
                        return Err(WorkflowError::MissingImage);
                    }
                    Err(err) => {
                        warn!(error = %err, "random image fetch failed");
                        return Err(err.into());
                    }
                };
                let Some(image_data) = image.image_data.filter(|data| !data.trim().is_empty())
                else {
                    return Err(WorkflowError::MissingImage);
                };
                let decoded = decode_image(&image_data)?;
                let stem = format!(
                    "random|{}|{}",
                    image.title.as_deref().unwrap_or_default(),
                    image_data
                );
                let path = save_image(&decoded, &stem, &self.config.output_dir)?;
                Ok(ContextPreview::Image {
                    title: image.title,
                    width: decoded.width,
                    height: decoded.height,
                    path,
                })
            }
        }
    }

    pub async fn search(&mut self) -> Result<SearchSummary, WorkflowError> {
        let topic = self
            .topic_input
            .current_topic()
            .ok_or(WorkflowError::NoTopic)?
            .to_string();
        let previous = self.machine.advance(CycleState::Searching)?;

        let results = match self.api.search(&topic).await {
            Ok(results) => results,
            Err(err) => {
                warn!(topic = %topic, error = %err, "search failed");
                self.machine.restore(previous);
                return Err(err.into());
            }
        };
        let ticket = self.clock.start_cycle();

        let query = results.query.clone().unwrap_or_else(|| topic.clone());
        let view = ResultsView::from_results(&query, self.api.panels(), results.panels);
        let cards = view.card_count();
        spawn_staggered(
            view.layout(),
            self.config.stagger_delay,
            ticket.clone(),
            self.render_tx.clone(),
        );

        self.focus = FocusRing::new(view.card_refs());
        self.focus.focus_first();
        self.overlay = None;
        self.results = Some(view);
        self.answer = AnswerView::Empty;
        self.answer_page = None;
        self.session = Some(QuerySession {
            generation: ticket.generation(),
            topic,
        });
        self.machine.advance(CycleState::ResultsShown)?;
        info!(
            query = %query,
            generation = ticket.generation(),
            panels = self.api.panels().len(),
            cards,
            "search completed"
        );

        Ok(SearchSummary {
            generation: ticket.generation(),
            query,
            cards,
        })
    }

    pub fn render_event(&self, event: RenderEvent) -> Option<String> {
        if event.generation() != self.clock.generation() {
            debug!(
                event_generation = event.generation(),
                current = self.clock.generation(),
                "stale render event dropped"
            );
            return None;
        }

        let view = self.results.as_ref()?;
        match event {
            RenderEvent::Card { card: at, .. } => {
                let panel = view.panels.get(at.panel)?;
                let card = panel.cards.get(at.card)?;
                let focused = self
                    .focus
                    .current()
                    .and_then(|target| (target.card == at).then_some(target.field));
                let rendered = render_card(panel, at.card, card, focused);
                if at.card == 0 {
                    Some(format!("{}\n{rendered}", render_panel_header(panel)))
                } else {
                    Some(rendered)
                }
            }
            RenderEvent::Done { .. } => Some(format!(
                "all {} documents shown for {:?}",
                view.card_count(),
                view.query
            )),
        }
    }

    pub fn render_results(&self) -> Option<String> {
        let view = self.results.as_ref()?;
        let focus = self.focus.current();
        let mut out = format!("query: {}", view.query);
        for (idx, panel) in view.panels.iter().enumerate() {
            let panel_focus = focus
                .filter(|target| target.card.panel == idx)
                .map(|target| (target.card.card, target.field));
            let _ = write!(out, "\n{}", render_panel(panel, panel_focus));
        }
        Some(out)
    }

    pub fn set_grade(
        &mut self,
        at: CardRef,
        field: JudgmentField,
        raw: &str,
    ) -> Result<Grade, WorkflowError> {
        let grade = EVALUATION_SCALE.parse(raw)?;
        let view = self.results.as_mut().ok_or(WorkflowError::NoResults)?;
        let card = view.card_mut(at).ok_or(WorkflowError::UnknownCard(at))?;
        self.machine.advance(CycleState::Judging)?;
        card.judgment.set(field, grade);
        debug!(
            panel = at.panel,
            card = at.card,
            field = field.as_str(),
            grade = grade.value(),
            "judgment set"
        );
        Ok(grade)
    }

    pub fn enter(&mut self, grade: Option<&str>) -> Result<Option<FocusTarget>, WorkflowError> {
        if self.results.is_none() {
            return Err(WorkflowError::NoResults);
        }
        if let Some(raw) = grade {
            let target = self.focus.current().ok_or(WorkflowError::NoFocus)?;
            self.set_grade(target.card, target.field, raw)?;
        }
        Ok(self.focus.enter())
    }

    pub fn focus(&mut self, target: FocusTarget) -> Result<(), WorkflowError> {
        if self.results.is_none() {
            return Err(WorkflowError::NoResults);
        }
        if !self.focus.focus(target) {
            return Err(WorkflowError::UnknownCard(target.card));
        }
        Ok(())
    }

    pub fn open_viewer(&mut self, at: CardRef) -> Result<Overlay, WorkflowError> {
        let view = self.results.as_ref().ok_or(WorkflowError::NoResults)?;
        let card = view.card(at).ok_or(WorkflowError::UnknownCard(at))?;
        let thumbnail = thumbnail_for_panel(at.panel, view.panels.len(), self.config.viewport_width);
        let overlay = open_overlay(
            at,
            &card.document.title,
            &card.document.image_data,
            thumbnail,
            self.config.viewport_width,
            &self.config.output_dir,
        )
        .map_err(|err| {
            warn!(panel = at.panel, card = at.card, error = %err, "image viewer failed");
            err
        })?;

        self.focus.focus(FocusTarget {
            card: at,
            field: JudgmentField::Relevance,
        });
        info!(
            panel = at.panel,
            card = at.card,
            width = overlay.width,
            height = overlay.height,
            side = overlay.side.as_str(),
            path = %overlay.path.display(),
            "image viewer opened"
        );
        self.overlay = Some(overlay.clone());
        Ok(overlay)
    }

    pub fn close_viewer(&mut self, dismissal: Dismissal) -> Option<Overlay> {
        let overlay = self.overlay.take()?;
        debug!(?dismissal, panel = overlay.card.panel, card = overlay.card.card, "image viewer closed");
        Some(overlay)
    }

    // Stores the judged batch, then asks for NDCG and injects the scores
    // into the panels. Nothing is posted while any judgment is unset.
    pub async fn evaluate(&mut self) -> Result<EvaluateSummary, WorkflowError> {
        let view = self.results.as_ref().ok_or(WorkflowError::NoResults)?;
        let batch = match view.collect_batch() {
            Ok(batch) => batch,
            Err(incomplete) => {
                self.notices
                    .show(INCOMPLETE_NOTICE, self.config.notice_duration);
                info!(missing = incomplete.missing.len(), "submission blocked");
                return Err(incomplete.into());
            }
        };

        let previous = self.machine.advance(CycleState::Submitted)?;
        let ticket = self.clock.ticket();

        if let Err(err) = self.api.store_scores(&batch).await {
            warn!(error = %err, "storing scores failed");
            self.machine.restore(previous);
            return Err(err.into());
        }
        let ndcg = match self.api.evaluate(&batch).await {
            Ok(ndcg) => ndcg,
            Err(err) => {
                warn!(error = %err, "ndcg evaluation failed");
                self.machine.restore(previous);
                return Err(err.into());
            }
        };

        if !ticket.is_current() {
            debug!(generation = ticket.generation(), "ndcg for older query dropped");
            return Ok(EvaluateSummary {
                documents: batch.document_count(),
                scores: ndcg.score_count(),
                panels_updated: 0,
            });
        }

        let panels_updated = self
            .results
            .as_mut()
            .map_or(0, |view| view.apply_ndcg(&ndcg));
        info!(
            query = %batch.query,
            documents = batch.document_count(),
            scores = ndcg.score_count(),
            panels_updated,
            "evaluation stored"
        );
        Ok(EvaluateSummary {
            documents: batch.document_count(),
            scores: ndcg.score_count(),
            panels_updated,
        })
    }

    pub async fn generate_answer(&mut self, param: AnswerParam) -> Result<&AnswerView, WorkflowError> {
        self.machine.advance(CycleState::AnswerGenerating)?;
        let outcome = run_pipeline(&self.api, param, &mut self.rng).await;

        let query = self.answer_query();
        match write_comparison_page(&self.config.output_dir, &query, &outcome) {
            Ok(path) => {
                info!(path = %path.display(), "comparison page written");
                self.answer_page = Some(path);
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "comparison page not written");
                self.answer_page = None;
            }
        }

        self.answer = outcome.view;
        self.machine.advance(CycleState::AnswerShown)?;
        Ok(&self.answer)
    }

    fn answer_query(&self) -> String {
        self.results
            .as_ref()
            .map(|view| view.query.clone())
            .or_else(|| self.session.as_ref().map(|session| session.topic.clone()))
            .unwrap_or_default()
    }

    pub fn rate_answer(
        &mut self,
        side: Side,
        relevance: u8,
        faithfulness: u8,
    ) -> Result<(), WorkflowError> {
        let AnswerView::Blind(pair) = &mut self.answer else {
            return Err(AnswerError::NoComparison.into());
        };
        if !self.machine.state().can_transition(CycleState::AnswerAnnotated) {
            return Err(TransitionError {
                from: self.machine.state(),
                to: CycleState::AnswerAnnotated,
            }
            .into());
        }
        pair.rate(side, relevance, faithfulness)?;
        self.machine.advance(CycleState::AnswerAnnotated)?;
        Ok(())
    }

    pub async fn save_answers(&mut self) -> Result<MessageResponse, WorkflowError> {
        let AnswerView::Blind(pair) = &self.answer else {
            return Err(AnswerError::NoComparison.into());
        };
        let saved = saved_answers(&self.answer_query(), pair)?;
        let response = self.api.save_llm_answers(&saved).await.map_err(|err| {
            warn!(error = %err, "saving answer ratings failed");
            err
        })?;
        info!(query = %saved.query, candidates = saved.comparison.len(), "answer ratings saved");
        Ok(response)
    }

    pub async fn save_query(&mut self) -> Result<MessageResponse, WorkflowError> {
        let response = self.api.save_query().await.map_err(|err| {
            warn!(error = %err, "saving query failed");
            err
        })?;
        info!(message = response.message.as_deref().unwrap_or(""), "query saved");
        Ok(response)
    }

    pub fn export_batch(&self, path: &Path) -> Result<usize, WorkflowError> {
        let view = self.results.as_ref().ok_or(WorkflowError::NoResults)?;
        let batch = match view.collect_batch() {
            Ok(batch) => batch,
            Err(incomplete) => {
                self.notices
                    .show(INCOMPLETE_NOTICE, self.config.notice_duration);
                return Err(incomplete.into());
            }
        };
        write_json_pretty(path, &batch).map_err(|err| WorkflowError::Output(format!("{err:#}")))?;
        info!(path = %path.display(), documents = batch.document_count(), "batch exported");
        Ok(batch.document_count())
    }
}

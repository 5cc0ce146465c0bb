use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::model::TopicSet;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CycleState {
    Idle,
    TopicSelected,
    Searching,
    ResultsShown,
    Judging,
    Submitted,
    AnswerGenerating,
    AnswerShown,
    AnswerAnnotated,
}

impl CycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::TopicSelected => "topic-selected",
            Self::Searching => "searching",
            Self::ResultsShown => "results-shown",
            Self::Judging => "judging",
            Self::Submitted => "submitted",
            Self::AnswerGenerating => "answer-generating",
            Self::AnswerShown => "answer-shown",
            Self::AnswerAnnotated => "answer-annotated",
        }
    }

    pub fn can_transition(self, next: CycleState) -> bool {
        use CycleState::*;

        match (self, next) {
            (_, Idle | TopicSelected) => true,
            (
                TopicSelected | ResultsShown | Judging | Submitted | AnswerShown | AnswerAnnotated,
                Searching,
            ) => true,
            (Searching, ResultsShown) => true,
            (
                ResultsShown | Judging | Submitted | AnswerShown | AnswerAnnotated,
                Judging | Submitted,
            ) => true,
            (
                ResultsShown | Judging | Submitted | AnswerShown | AnswerAnnotated,
                AnswerGenerating,
            ) => true,
            (AnswerGenerating, AnswerShown) => true,
            (AnswerShown | AnswerAnnotated, AnswerAnnotated) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move from {} to {}", from.as_str(), to.as_str())]
pub struct TransitionError {
    pub from: CycleState,
    pub to: CycleState,
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    state: CycleState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            state: CycleState::Idle,
        }
    }
}

impl StateMachine {
    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn advance(&mut self, next: CycleState) -> Result<CycleState, TransitionError> {
        if !self.state.can_transition(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }

    pub fn restore(&mut self, previous: CycleState) {
        self.state = previous;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySession {
    pub generation: u64,
    pub topic: String,
}

#[derive(Debug)]
pub struct CycleClock {
    generation: Arc<AtomicU64>,
    token: CancellationToken,
}

impl Default for CycleClock {
    fn default() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            token: CancellationToken::new(),
        }
    }
}

impl CycleClock {
    pub fn start_cycle(&mut self) -> CycleTicket {
        self.token.cancel();
        self.token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        CycleTicket {
            generation,
            current: Arc::clone(&self.generation),
            token: self.token.clone(),
        }
    }

    pub fn ticket(&self) -> CycleTicket {
        CycleTicket {
            generation: self.generation.load(Ordering::SeqCst),
            current: Arc::clone(&self.generation),
            token: self.token.clone(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CycleTicket {
    generation: u64,
    current: Arc<AtomicU64>,
    token: CancellationToken,
}

impl CycleTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        !self.token.is_cancelled() && self.current.load(Ordering::SeqCst) == self.generation
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicInput {
    FreeText(String),
    Selection {
        set: TopicSet,
        topics: Vec<String>,
        selected: usize,
    },
}

impl Default for TopicInput {
    fn default() -> Self {
        Self::FreeText(String::new())
    }
}

impl TopicInput {
    pub fn current_topic(&self) -> Option<&str> {
        let topic = match self {
            Self::FreeText(text) => text.as_str(),
            Self::Selection {
                topics, selected, ..
            } => topics.get(*selected).map(String::as_str)?,
        };
        let topic = topic.trim();
        (!topic.is_empty()).then_some(topic)
    }
}

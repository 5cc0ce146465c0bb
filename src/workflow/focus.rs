use crate::workflow::view::{CardRef, JudgmentField};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusTarget {
    pub card: CardRef,
    pub field: JudgmentField,
}

#[derive(Debug, Clone, Default)]
pub struct FocusRing {
    cards: Vec<CardRef>,
    position: Option<usize>,
}

impl FocusRing {
    pub fn new(cards: Vec<CardRef>) -> Self {
        Self {
            cards,
            position: None,
        }
    }

    fn control_count(&self) -> usize {
        self.cards.len() * 2
    }

    fn target_at(&self, position: usize) -> Option<FocusTarget> {
        let card = *self.cards.get(position / 2)?;
        let field = if position % 2 == 0 {
            JudgmentField::Relevance
        } else {
            JudgmentField::Completeness
        };
        Some(FocusTarget { card, field })
    }

    pub fn current(&self) -> Option<FocusTarget> {
        self.target_at(self.position?)
    }

    pub fn focus(&mut self, target: FocusTarget) -> bool {
        let Some(card_idx) = self.cards.iter().position(|card| *card == target.card) else {
            return false;
        };
        let offset = match target.field {
            JudgmentField::Relevance => 0,
            JudgmentField::Completeness => 1,
        };
        self.position = Some(card_idx * 2 + offset);
        true
    }

    pub fn focus_first(&mut self) -> Option<FocusTarget> {
        self.position = (self.control_count() > 0).then_some(0);
        self.current()
    }

    // Enter: next control in document order, wrapping from the last
    // card's completeness control to the first card's relevance control.
    pub fn enter(&mut self) -> Option<FocusTarget> {
        let count = self.control_count();
        if count == 0 {
            self.position = None;
            return None;
        }
        self.position = Some(match self.position {
            Some(position) => (position + 1) % count,
            None => 0,
        });
        self.current()
    }
}

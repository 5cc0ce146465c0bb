use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::workflow::state::CycleTicket;
use crate::workflow::view::CardRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderEvent {
    Card { generation: u64, card: CardRef },
    Done { generation: u64 },
}

impl RenderEvent {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Card { generation, .. } | Self::Done { generation } => *generation,
        }
    }
}

pub fn spawn_staggered(
    layout: Vec<usize>,
    delay: Duration,
    ticket: CycleTicket,
    tx: UnboundedSender<RenderEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let generation = ticket.generation();
        let start = Instant::now();
        let ticks = layout.iter().copied().max().unwrap_or(0);

        for index in 0..ticks {
            let deadline = release_at(start, delay, index);
            tokio::select! {
                _ = ticket.cancelled() => {
                    debug!(generation, index, "stagger cancelled by newer cycle");
                    return;
                }
                _ = sleep_until(deadline) => {}
            }

            if !ticket.is_current() {
                return;
            }

            for (panel, &len) in layout.iter().enumerate() {
                if index >= len {
                    continue;
                }
                let event = RenderEvent::Card {
                    generation,
                    card: CardRef { panel, card: index },
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
        }

        if ticket.is_current() {
            let _ = tx.send(RenderEvent::Done { generation });
        }
    })
}

fn release_at(start: Instant, delay: Duration, index: usize) -> Instant {
    let steps = u32::try_from(index).unwrap_or(u32::MAX);
    let offset = delay.saturating_mul(steps);
    start
        .checked_add(offset)
        .unwrap_or_else(|| start + Duration::from_secs(86_400 * 365))
}

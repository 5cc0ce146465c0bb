use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct NoticeSlot {
    text: Option<String>,
    serial: u64,
}

#[derive(Debug, Clone, Default)]
pub struct NoticeBoard {
    slot: Arc<Mutex<NoticeSlot>>,
}

impl NoticeBoard {
    pub fn show(&self, text: impl Into<String>, duration: Duration) -> JoinHandle<()> {
        let serial = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.serial += 1;
            slot.text = Some(text.into());
            slot.serial
        };

        let slot = Arc::clone(&self.slot);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.serial == serial {
                slot.text = None;
            }
        })
    }

    pub fn current(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .text
            .clone()
    }
}

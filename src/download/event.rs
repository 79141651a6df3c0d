use async_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::download::status::StatusSnapshot;

/// 会话生命周期事件
///
/// Lifecycle variants fire at most once per session; `Status` repeats at
/// roughly one hertz while the session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadEvent {
    Execute,
    Success,
    Fail,
    Finish,
    Pause,
    Resume,
    Cancel,
    Status(StatusSnapshot),
}

#[derive(Default)]
struct FiredOnce {
    execute: bool,
    success: bool,
    fail: bool,
    finish: bool,
    cancel: bool,
}

/// Event fan-out for one session. The once-only guarantee for lifecycle
/// variants lives here so no caller path can double-fire them.
pub(crate) struct EventHub {
    sender: Sender<DownloadEvent>,
    receiver: Receiver<DownloadEvent>,
    fired: Mutex<FiredOnce>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self {
            sender,
            receiver,
            fired: Mutex::new(FiredOnce::default()),
        }
    }

    pub fn subscribe(&self) -> Receiver<DownloadEvent> {
        self.receiver.clone()
    }

    pub fn emit(&self, event: DownloadEvent) {
        {
            let mut fired = self.fired.lock();
            let slot = match event {
                DownloadEvent::Execute => Some(&mut fired.execute),
                DownloadEvent::Success => Some(&mut fired.success),
                DownloadEvent::Fail => Some(&mut fired.fail),
                DownloadEvent::Finish => Some(&mut fired.finish),
                DownloadEvent::Cancel => Some(&mut fired.cancel),
                DownloadEvent::Pause | DownloadEvent::Resume | DownloadEvent::Status(_) => None,
            };
            if let Some(slot) = slot {
                if *slot {
                    return;
                }
                *slot = true;
            }
        }
        let _ = self.sender.try_send(event);
    }
}

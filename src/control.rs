// Runtime control surface
// Per-stream enable flags gate both engine evaluation and session
// reconnection; status() is the operator-facing snapshot.

use crate::state::SharedState;
use crate::types::AccountSnapshot;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    BookTicker,
    Trade,
    UserData,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::BookTicker => "book-ticker",
            StreamKind::Trade => "trade",
            StreamKind::UserData => "user-data",
        }
    }
}

pub struct StreamToggles {
    ticker: AtomicBool,
    trade: AtomicBool,
    user_data: AtomicBool,
}

impl StreamToggles {
    pub fn all_enabled() -> Self {
        Self {
            ticker: AtomicBool::new(true),
            trade: AtomicBool::new(true),
            user_data: AtomicBool::new(true),
        }
    }

    pub fn all_disabled() -> Self {
        Self {
            ticker: AtomicBool::new(false),
            trade: AtomicBool::new(false),
            user_data: AtomicBool::new(false),
        }
    }

    fn flag(&self, kind: StreamKind) -> &AtomicBool {
        match kind {
            StreamKind::BookTicker => &self.ticker,
            StreamKind::Trade => &self.trade,
            StreamKind::UserData => &self.user_data,
        }
    }

    pub fn enable(&self, kind: StreamKind) {
        info!("CONTROL: {} stream enabled", kind.as_str());
        self.flag(kind).store(true, Ordering::SeqCst);
    }

    pub fn disable(&self, kind: StreamKind) {
        info!("CONTROL: {} stream disabled", kind.as_str());
        self.flag(kind).store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self, kind: StreamKind) -> bool {
        self.flag(kind).load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StreamStatus {
    pub ticker_enabled: bool,
    pub trade_enabled: bool,
    pub user_data_enabled: bool,
    pub account: Option<AccountSnapshot>,
}

#[derive(Clone)]
pub struct ControlHandle {
    toggles: Arc<StreamToggles>,
    state: SharedState,
}

impl ControlHandle {
    pub fn new(toggles: Arc<StreamToggles>, state: SharedState) -> Self {
        Self { toggles, state }
    }

    pub fn enable(&self, kind: StreamKind) {
        self.toggles.enable(kind);
    }

    pub fn disable(&self, kind: StreamKind) {
        self.toggles.disable(kind);
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            ticker_enabled: self.toggles.is_enabled(StreamKind::BookTicker),
            trade_enabled: self.toggles.is_enabled(StreamKind::Trade),
            user_data_enabled: self.toggles.is_enabled(StreamKind::UserData),
            account: self.state.account(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_flip_independently() {
        let toggles = StreamToggles::all_enabled();
        toggles.disable(StreamKind::Trade);
        assert!(toggles.is_enabled(StreamKind::BookTicker));
        assert!(!toggles.is_enabled(StreamKind::Trade));
        assert!(toggles.is_enabled(StreamKind::UserData));

        toggles.enable(StreamKind::Trade);
        assert!(toggles.is_enabled(StreamKind::Trade));
    }

    #[test]
    fn status_reflects_toggles_and_account() {
        let toggles = Arc::new(StreamToggles::all_enabled());
        let state = SharedState::new(50);
        let control = ControlHandle::new(toggles, state);
        control.disable(StreamKind::UserData);

        let status = control.status();
        assert!(status.ticker_enabled);
        assert!(!status.user_data_enabled);
        assert!(status.account.is_none());
    }
}

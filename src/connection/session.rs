// Session lifecycle supervision
// One supervisor per stream kind drives the state machine
// DISCONNECTED -> CONNECTING -> CONNECTED -> {CLOSING, FAILED} ->
// RECONNECT_WAIT -> CONNECTING. Reconnects use a fixed delay and only
// happen while the stream's toggle is enabled.

use crate::connection::{rest, websocket, Connection};
use crate::control::{StreamKind, StreamToggles};
use crate::error::EngineError;
use crate::event_bus::EventBus;
use crate::types::AccountEvent;
use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::time::{interval, sleep, Duration};
use tokio_tungstenite::connect_async;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Failed,
    ReconnectWait,
}

struct SupervisorInner {
    kind: StreamKind,
    toggles: Arc<StreamToggles>,
    reconnect_delay: Duration,
    state: Mutex<SessionState>,
}

#[derive(Clone)]
pub struct StreamSupervisor {
    inner: Arc<SupervisorInner>,
}

impl StreamSupervisor {
    pub fn new(kind: StreamKind, toggles: Arc<StreamToggles>, reconnect_delay: Duration) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                kind,
                toggles,
                reconnect_delay,
                state: Mutex::new(SessionState::Disconnected),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner
            .state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Failed)
    }

    /// Sessions call this once the socket is up.
    pub fn mark_connected(&self) {
        self.transition(SessionState::Connected);
    }

    fn transition(&self, next: SessionState) {
        if let Ok(mut state) = self.inner.state.lock() {
            if *state != next {
                info!(
                    "CONNECTION: {} session {:?} -> {:?}",
                    self.inner.kind.as_str(),
                    *state,
                    next
                );
                *state = next;
            }
        }
    }

    fn enabled(&self) -> bool {
        self.inner.toggles.is_enabled(self.inner.kind)
    }

    /// Drive `connect` until the toggle is cleared. Each invocation is one
    /// full session; a return (clean or failed) followed by an enabled
    /// toggle triggers exactly one reconnect after the fixed delay.
    pub async fn run<F, Fut>(&self, mut connect: F)
    where
        F: FnMut(StreamSupervisor) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        loop {
            if !self.enabled() {
                self.transition(SessionState::Disconnected);
                return;
            }
            self.transition(SessionState::Connecting);
            match connect(self.clone()).await {
                Ok(()) => self.transition(SessionState::Closing),
                Err(e) => {
                    warn!(
                        error = %e,
                        "CONNECTION: {} session ended with error",
                        self.inner.kind.as_str()
                    );
                    self.transition(SessionState::Failed);
                }
            }
            if !self.enabled() {
                self.transition(SessionState::Disconnected);
                return;
            }
            self.transition(SessionState::ReconnectWait);
            sleep(self.inner.reconnect_delay).await;
        }
    }
}

// ============================================================================
// Concrete sessions
// ============================================================================

fn market_stream_url(conn: &Connection, channel: &str) -> String {
    format!(
        "{}/ws/{}@{}",
        conn.config.ws_base_url.trim_end_matches('/'),
        conn.config.symbol.to_lowercase(),
        channel
    )
}

pub async fn run_book_ticker_session(
    conn: Arc<Connection>,
    bus: Arc<EventBus>,
    supervisor: StreamSupervisor,
) -> Result<()> {
    let url = market_stream_url(&conn, "bookTicker");
    let (ws_stream, _) = connect_async(&url).await?;
    supervisor.mark_connected();
    info!("CONNECTION: book-ticker stream connected ({url})");

    let (_, mut read) = ws_stream.split();
    while let Some(msg) = read.next().await {
        match websocket::extract_text_from_message(
            &msg,
            conn.config.max_ws_message_bytes,
            "book-ticker",
        ) {
            Ok(Some(txt)) => {
                if let Some(tick) = websocket::parse_book_ticker(&txt, Utc::now()) {
                    if bus.market_tick_tx.send(tick).is_err() {
                        warn!("CONNECTION: all market tick receivers dropped");
                        return Ok(());
                    }
                }
            }
            Ok(None) => {}
            Err(e) => return Err(e),
        }
    }
    Err(EngineError::StreamDisconnected("book-ticker".into()).into())
}

pub async fn run_trade_session(
    conn: Arc<Connection>,
    bus: Arc<EventBus>,
    supervisor: StreamSupervisor,
) -> Result<()> {
    let url = market_stream_url(&conn, "trade");
    let (ws_stream, _) = connect_async(&url).await?;
    supervisor.mark_connected();
    info!("CONNECTION: trade stream connected ({url})");

    let (_, mut read) = ws_stream.split();
    while let Some(msg) = read.next().await {
        match websocket::extract_text_from_message(&msg, conn.config.max_ws_message_bytes, "trade")
        {
            Ok(Some(txt)) => {
                if let Some(trade) = websocket::parse_trade(&txt, Utc::now()) {
                    if bus.trade_tx.send(trade).is_err() {
                        warn!("CONNECTION: all trade receivers dropped");
                        return Ok(());
                    }
                }
            }
            Ok(None) => {}
            Err(e) => return Err(e),
        }
    }
    Err(EngineError::StreamDisconnected("trade".into()).into())
}

/// User-data session: listen key, full account snapshot on connect, then
/// execution reports and balance patches until the stream ends. The
/// keep-alive ping task lives exactly as long as the session.
pub async fn run_user_data_session(
    conn: Arc<Connection>,
    bus: Arc<EventBus>,
    supervisor: StreamSupervisor,
) -> Result<()> {
    let listen_key = rest::create_listen_key(&conn).await?;
    let url = format!(
        "{}/ws/{}",
        conn.config.ws_base_url.trim_end_matches('/'),
        listen_key
    );
    let (ws_stream, _) = connect_async(&url).await?;
    supervisor.mark_connected();
    info!("CONNECTION: user-data stream connected");

    match rest::fetch_account(&conn).await {
        Ok(snapshot) => {
            let _ = bus.account_tx.send(AccountEvent::Snapshot(snapshot));
        }
        Err(e) => warn!(error = %e, "CONNECTION: initial account snapshot failed"),
    }

    let keepalive = tokio::spawn(keepalive_loop(
        conn.clone(),
        listen_key.clone(),
        Duration::from_secs(conn.config.keepalive_interval_secs),
    ));

    let (_, mut read) = ws_stream.split();
    let result = loop {
        let Some(msg) = read.next().await else {
            break Err(EngineError::StreamDisconnected("user-data".into()).into());
        };
        match websocket::extract_text_from_message(
            &msg,
            conn.config.max_ws_message_bytes,
            "user-data",
        ) {
            Ok(Some(txt)) => match websocket::parse_user_event(&txt) {
                Ok(websocket::UserEvent::Execution(report)) => {
                    if bus.execution_tx.send(report).is_err() {
                        warn!("CONNECTION: all execution receivers dropped");
                        break Ok(());
                    }
                }
                Ok(websocket::UserEvent::Account(patches)) => {
                    for patch in patches {
                        let _ = bus.account_tx.send(patch);
                    }
                }
                Ok(websocket::UserEvent::Ignored) => {}
                Err(e) => {
                    warn!(error = %e, "CONNECTION: dropping malformed user-data payload")
                }
            },
            Ok(None) => {}
            Err(e) => break Err(e),
        }
    };

    keepalive.abort();
    result
}

async fn keepalive_loop(conn: Arc<Connection>, listen_key: String, every: Duration) {
    let mut ticker = interval(every);
    // The first tick fires immediately; the key was just created.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = rest::keepalive_listen_key(&conn, &listen_key).await {
            warn!(error = %e, "CONNECTION: listen key keep-alive failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn disabled_stream_never_connects() {
        let toggles = Arc::new(StreamToggles::all_disabled());
        let supervisor = StreamSupervisor::new(
            StreamKind::Trade,
            toggles,
            Duration::from_millis(1),
        );
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        supervisor
            .run(move |_handle| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        assert_eq!(supervisor.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn failed_session_reconnects_exactly_once_before_disable() {
        let toggles = Arc::new(StreamToggles::all_enabled());
        let supervisor = StreamSupervisor::new(
            StreamKind::BookTicker,
            toggles.clone(),
            Duration::from_millis(1),
        );
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        let toggles_in_session = toggles.clone();
        supervisor
            .run(move |handle| {
                let counter = counter.clone();
                let toggles = toggles_in_session.clone();
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    if attempt == 0 {
                        Err(anyhow!("socket dropped"))
                    } else {
                        // Second connection: disable so the supervisor
                        // terminates instead of reconnecting again.
                        handle.mark_connected();
                        toggles.disable(StreamKind::BookTicker);
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(supervisor.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn clean_close_with_toggle_still_set_reenters_connect() {
        let toggles = Arc::new(StreamToggles::all_enabled());
        let supervisor = StreamSupervisor::new(
            StreamKind::UserData,
            toggles.clone(),
            Duration::from_millis(1),
        );
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        let toggles_in_session = toggles.clone();
        supervisor
            .run(move |_handle| {
                let counter = counter.clone();
                let toggles = toggles_in_session.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 2 {
                        toggles.disable(StreamKind::UserData);
                    }
                    Ok(())
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}

//! Connection lifecycle and the outbound send pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use fancy_regex::Regex;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::collector::{CollectorOptions, EndReason, MessageCollector};
use crate::bridge::filter::FilterHolder;
use crate::common::error::{ChatError, CommandError, SendRejection};
use crate::common::messages::BridgeEvent;
use crate::common::types::{BotIdentity, ChatKind, MessageKind, ProtocolVersion, RingKey};
use crate::config::types::{LimitsConfig, PatternsConfig};
use crate::discord::markdown;
use crate::game::dedup::{
    normalize, pad_invisible, DuplicateRingBuffer, DUPLICATE_THRESHOLD, MAX_PADDING,
    THRESHOLD_STEP,
};
use crate::game::message::MessageParser;
use crate::game::protocol::{GameConnection, GameConnector, GameEvent};
use crate::game::split::split_message;

/// Server notices meaning a just-sent line was rejected for content.
const BLOCKED_SHAPE: &str =
    r"^(?:We blocked your comment|Your message was blocked|Advertising is against the rules)";

#[derive(Default)]
enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Ready {
        conn: Arc<dyn GameConnection>,
        identity: BotIdentity,
        version: ProtocolVersion,
    },
    /// Terminal; no further reconnects.
    Errored,
}

/// Timing knobs for the send pipeline. Tests shrink these.
#[derive(Debug, Clone)]
pub struct SendTuning {
    /// How long to wait for the server to echo a sent line.
    pub echo_wait: Duration,
    /// Total write attempts per part before giving up on the
    /// duplicate filter.
    pub max_attempts: u32,
    /// Base delay between duplicate-filter retries; grows per attempt.
    pub retry_base: Duration,
}

impl Default for SendTuning {
    fn default() -> Self {
        Self {
            echo_wait: Duration::from_millis(2500),
            max_attempts: 3,
            retry_base: Duration::from_millis(1000),
        }
    }
}

/// Per-call options for `chat()`.
pub struct ChatOptions {
    pub kind: ChatKind,
    /// Target IGN; required when `kind` is `Whisper`.
    pub whisper_to: Option<String>,
    /// Checked before every packet write.
    pub cancel: Option<CancellationToken>,
}

impl ChatOptions {
    pub fn new(kind: ChatKind) -> Self {
        Self {
            kind,
            whisper_to: None,
            cancel: None,
        }
    }

    pub fn whisper(target: impl Into<String>) -> Self {
        Self {
            kind: ChatKind::Whisper,
            whisper_to: Some(target.into()),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Per-call options for `command()`.
pub struct CommandOptions {
    /// Lines must match to count as part of the response. `None`
    /// collects every system line until a bound fires.
    pub response_pattern: Option<Regex>,
    /// A matching line aborts the command.
    pub abort_pattern: Option<Regex>,
    pub timeout: Duration,
    pub idle: Duration,
    pub cancel: Option<CancellationToken>,
}

impl CommandOptions {
    pub fn new(timeout: Duration, idle: Duration) -> Self {
        Self {
            response_pattern: None,
            abort_pattern: None,
            timeout,
            idle,
            cancel: None,
        }
    }

    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self::new(
            Duration::from_millis(limits.command_timeout_ms),
            Duration::from_millis(limits.command_idle_ms),
        )
    }

    pub fn with_response(mut self, pattern: Regex) -> Self {
        self.response_pattern = Some(pattern);
        self
    }

    pub fn with_abort(mut self, pattern: Regex) -> Self {
        self.abort_pattern = Some(pattern);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A collected command response.
#[derive(Debug)]
pub struct CommandReply {
    /// Matching lines joined with newlines.
    pub text: String,
    /// The raw collected messages, in arrival order.
    pub messages: Vec<Arc<crate::game::message::GameMessage>>,
}

enum EchoOutcome {
    Success,
    Spam,
    Blocked,
    Timeout,
}

enum SessionEnd {
    Dropped(String),
    Fatal(String),
    Shutdown,
}

/// One game account's connection state machine and send queue.
pub struct GameChatManager {
    connector: Arc<dyn GameConnector>,
    parser: MessageParser,
    filters: Arc<FilterHolder>,
    limits: LimitsConfig,
    tuning: SendTuning,
    events: broadcast::Sender<BridgeEvent>,
    state: RwLock<ConnectionState>,
    /// Fair queue; holding it is the single-in-flight-write invariant.
    chat_lock: Mutex<()>,
    /// Serializes `command()` calls against each other.
    command_lock: Mutex<()>,
    rings: StdMutex<HashMap<RingKey, DuplicateRingBuffer>>,
    blocked_shape: Regex,
    unknown_command: Regex,
    pagination_divider: Regex,
    shutdown: CancellationToken,
}

impl GameChatManager {
    pub fn new(
        connector: Arc<dyn GameConnector>,
        filters: Arc<FilterHolder>,
        limits: LimitsConfig,
        patterns: &PatternsConfig,
        command_prefix: &str,
        events: broadcast::Sender<BridgeEvent>,
    ) -> Result<Self, fancy_regex::Error> {
        Ok(Self {
            connector,
            parser: MessageParser::new(command_prefix)?,
            filters,
            limits,
            tuning: SendTuning::default(),
            events,
            state: RwLock::new(ConnectionState::Disconnected),
            chat_lock: Mutex::new(()),
            command_lock: Mutex::new(()),
            rings: StdMutex::new(HashMap::new()),
            blocked_shape: Regex::new(BLOCKED_SHAPE)?,
            unknown_command: Regex::new(&patterns.unknown_command)?,
            pagination_divider: Regex::new(&patterns.pagination_divider)?,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_tuning(mut self, tuning: SendTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    pub async fn is_ready(&self) -> bool {
        matches!(&*self.state.read().await, ConnectionState::Ready { .. })
    }

    pub async fn identity(&self) -> Option<BotIdentity> {
        match &*self.state.read().await {
            ConnectionState::Ready { identity, .. } => Some(identity.clone()),
            _ => None,
        }
    }

    /// Start the connect/reconnect loop. Runs until a fatal kick or
    /// `disconnect()`.
    pub fn connect(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run_loop().await });
    }

    /// Drop the live connection; the run loop reconnects immediately.
    pub async fn reconnect(&self) {
        if let Some((conn, _, _)) = self.ready_handle().await {
            conn.disconnect().await;
        }
    }

    /// Tear down permanently.
    pub async fn disconnect(&self) {
        self.shutdown.cancel();
        if let Some((conn, _, _)) = self.ready_handle().await {
            conn.disconnect().await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    async fn run_loop(self: Arc<Self>) {
        let mut backoff = self.new_backoff();
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            *self.state.write().await = ConnectionState::Connecting;
            match self.connector.connect().await {
                Ok(conn) => {
                    let _ = self.events.send(BridgeEvent::Connected);
                    backoff = self.new_backoff();
                    match self.drive_connection(conn).await {
                        SessionEnd::Dropped(reason) => {
                            info!("Game connection dropped: {}", reason);
                            *self.state.write().await = ConnectionState::Disconnected;
                            let _ = self.events.send(BridgeEvent::Disconnected { reason });
                        }
                        SessionEnd::Fatal(reason) => {
                            warn!("Game connection failed terminally: {}", reason);
                            *self.state.write().await = ConnectionState::Errored;
                            let _ = self.events.send(BridgeEvent::Errored { reason });
                            return;
                        }
                        SessionEnd::Shutdown => return,
                    }
                }
                Err(e) => {
                    warn!("Game connection attempt failed: {}", e);
                    *self.state.write().await = ConnectionState::Disconnected;
                }
            }
            let delay = backoff.next().unwrap_or(Duration::from_secs(600));
            info!("Reconnecting to the game in {:?}", delay);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown.cancelled() => return,
            }
        }
    }

    async fn drive_connection(&self, conn: Arc<dyn GameConnection>) -> SessionEnd {
        let mut events = conn.subscribe();
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = self.shutdown.cancelled() => {
                    conn.disconnect().await;
                    return SessionEnd::Shutdown;
                }
            };
            match event {
                Ok(GameEvent::Spawned { identity, version }) => {
                    info!(ign = %identity.ign, "Spawned in as {:?}", version);
                    *self.state.write().await = ConnectionState::Ready {
                        conn: Arc::clone(&conn),
                        identity,
                        version,
                    };
                    let _ = self.events.send(BridgeEvent::Ready);
                }
                Ok(GameEvent::Chat {
                    content,
                    position,
                    profile_id,
                }) => {
                    let identity = self.identity().await;
                    let message =
                        self.parser
                            .parse(&content, position, profile_id, identity.as_ref());
                    let _ = self.events.send(BridgeEvent::Message(Arc::new(message)));
                }
                Ok(GameEvent::Disconnected { reason }) => return SessionEnd::Dropped(reason),
                Ok(GameEvent::Kicked { reason, fatal }) => {
                    return if fatal {
                        SessionEnd::Fatal(reason)
                    } else {
                        SessionEnd::Dropped(reason)
                    };
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} game events under load", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return SessionEnd::Dropped("event stream closed".to_string());
                }
            }
        }
    }

    fn new_backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(600))
            .without_max_times()
            .build()
    }

    async fn ready_handle(
        &self,
    ) -> Option<(Arc<dyn GameConnection>, BotIdentity, ProtocolVersion)> {
        match &*self.state.read().await {
            ConnectionState::Ready {
                conn,
                identity,
                version,
            } => Some((Arc::clone(conn), identity.clone(), *version)),
            _ => None,
        }
    }

    pub async fn guild_chat(&self, content: &str) -> Result<(), ChatError> {
        self.chat(content, ChatOptions::new(ChatKind::Guild)).await
    }

    pub async fn officer_chat(&self, content: &str) -> Result<(), ChatError> {
        self.chat(content, ChatOptions::new(ChatKind::Officer)).await
    }

    pub async fn party_chat(&self, content: &str) -> Result<(), ChatError> {
        self.chat(content, ChatOptions::new(ChatKind::Party)).await
    }

    pub async fn whisper(&self, target: &str, content: &str) -> Result<(), ChatError> {
        self.chat(content, ChatOptions::whisper(target)).await
    }

    /// Send one logical message: translate, split, filter, queue, and
    /// write each part with duplicate evasion.
    pub async fn chat(&self, content: &str, opts: ChatOptions) -> Result<(), ChatError> {
        let (conn, identity, version) = self.ready_handle().await.ok_or(ChatError::NotReady)?;

        let prefix = match &opts.whisper_to {
            Some(target) => format!("/msg {} ", target),
            None => opts.kind.prefix().to_string(),
        };
        let plain = markdown::discord_to_game(content);
        // Leave room for the prefix and for duplicate-evasion padding.
        let limit = version
            .line_limit()
            .saturating_sub(prefix.chars().count() + MAX_PADDING);
        let parts = split_message(&plain, limit);

        if parts.is_empty() {
            return Err(SendRejection::Empty.into());
        }
        if parts.iter().any(|part| self.filters.is_blocked(part)) {
            return Err(SendRejection::LocalBlocked.into());
        }
        if parts.len() > self.limits.max_parts {
            return Err(SendRejection::MessageCount {
                parts: parts.len(),
                max: self.limits.max_parts,
            }
            .into());
        }

        // All parts of one message stay contiguous in the queue.
        let _queue = self.chat_lock.lock().await;
        for part in &parts {
            self.send_part(&conn, &identity, &prefix, part, opts.kind, opts.cancel.as_ref())
                .await?;
        }
        Ok(())
    }

    async fn send_part(
        &self,
        conn: &Arc<dyn GameConnection>,
        identity: &BotIdentity,
        prefix: &str,
        part: &str,
        kind: ChatKind,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), ChatError> {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(ChatError::Cancelled);
            }

            let threshold = DUPLICATE_THRESHOLD - f64::from(attempt) * THRESHOLD_STEP;
            let line = {
                let mut rings = self.rings.lock().unwrap_or_else(|e| e.into_inner());
                let ring = rings.entry(kind.ring()).or_default();
                if attempt > 0 || ring.would_trip(part, threshold) {
                    pad_invisible(part, attempt as usize)
                } else {
                    part.to_string()
                }
            };

            let mut echo_rx = self.events.subscribe();
            conn.write_chat(&format!("{}{}", prefix, line)).await?;

            match self.await_echo(&mut echo_rx, identity, part, kind).await {
                EchoOutcome::Success => {
                    // Guard must not live across the pacing sleep.
                    {
                        let mut rings = self.rings.lock().unwrap_or_else(|e| e.into_inner());
                        rings.entry(kind.ring()).or_default().record(part);
                    }
                    sleep(kind.pacing()).await;
                    return Ok(());
                }
                EchoOutcome::Timeout => {
                    // No echo is normal for lines the server doesn't
                    // repeat back; treat as sent.
                    debug!(kind = kind.as_str(), "No echo for sent line");
                    sleep(kind.pacing()).await;
                    return Ok(());
                }
                EchoOutcome::Blocked => return Err(ChatError::ServerBlocked),
                EchoOutcome::Spam => {
                    attempt += 1;
                    if attempt >= self.tuning.max_attempts {
                        return Err(ChatError::SpamFilter { attempts: attempt });
                    }
                    debug!(attempt, "Duplicate filter tripped, retrying with more padding");
                    sleep(self.tuning.retry_base * attempt).await;
                }
            }
        }
    }

    /// Race the server's reaction to a write against a fixed delay.
    async fn await_echo(
        &self,
        events: &mut broadcast::Receiver<BridgeEvent>,
        identity: &BotIdentity,
        part: &str,
        kind: ChatKind,
    ) -> EchoOutcome {
        let expected = normalize(part);
        let deadline = sleep(self.tuning.echo_wait);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return EchoOutcome::Timeout,
                event = events.recv() => match event {
                    Ok(BridgeEvent::Message(message)) => {
                        if message.spam {
                            return EchoOutcome::Spam;
                        }
                        if message.kind == MessageKind::System
                            && self
                                .blocked_shape
                                .is_match(&message.cleaned_content)
                                .unwrap_or(false)
                        {
                            return EchoOutcome::Blocked;
                        }
                        if message.from_self(identity)
                            && kind.ring() == message.kind.reply_kind().map(|k| k.ring()).unwrap_or(RingKey::Whisper)
                            && normalize(&message.body) == expected
                        {
                            return EchoOutcome::Success;
                        }
                    }
                    Ok(BridgeEvent::Disconnected { .. }) | Ok(BridgeEvent::Errored { .. }) => {
                        return EchoOutcome::Timeout;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return EchoOutcome::Timeout,
                },
            }
        }
    }

    /// Send a raw command line and collect its system-message response.
    ///
    /// Mutually exclusive with itself; waits for the chat queue to
    /// drain before writing so a queued plain send cannot interleave
    /// its echo into the response window.
    pub async fn command(
        &self,
        line: &str,
        opts: CommandOptions,
    ) -> Result<CommandReply, CommandError> {
        let (conn, _, _) = self.ready_handle().await.ok_or(CommandError::NotReady)?;
        let _exclusive = self.command_lock.lock().await;

        let mut collector = MessageCollector::new(
            self.events.subscribe(),
            Box::new(|message| message.kind == MessageKind::System),
            CollectorOptions {
                time: Some(opts.timeout),
                idle: Some(opts.idle),
                cancel: opts.cancel.clone(),
                ..Default::default()
            },
        );

        {
            let _queue = self.chat_lock.lock().await;
            conn.write_chat(line).await.map_err(CommandError::Transport)?;
        }

        let mut collected = Vec::new();
        while let Some(message) = collector.next().await {
            let text = &message.cleaned_content;
            if self.unknown_command.is_match(text).unwrap_or(false) {
                return Err(CommandError::Aborted);
            }
            if let Some(abort) = &opts.abort_pattern {
                if abort.is_match(text).unwrap_or(false) {
                    return Err(CommandError::Aborted);
                }
            }
            if self.pagination_divider.is_match(text).unwrap_or(false) {
                if collected.is_empty() {
                    continue; // opening divider
                }
                collector.stop();
                break;
            }
            match &opts.response_pattern {
                Some(pattern) if !pattern.is_match(text).unwrap_or(false) => {}
                _ => collected.push(message),
            }
        }

        if collected.is_empty() {
            return match collector.end_reason() {
                Some(EndReason::User) => Err(CommandError::Aborted),
                _ => Err(CommandError::Timeout),
            };
        }

        let text = collected
            .iter()
            .map(|message| message.cleaned_content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(CommandReply {
            text,
            messages: collected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ScriptedConnection, ScriptedConnector};
    use crate::common::error::ChatError;
    use std::sync::atomic::Ordering;

    fn tuning() -> SendTuning {
        SendTuning {
            echo_wait: Duration::from_millis(50),
            max_attempts: 3,
            retry_base: Duration::from_millis(5),
        }
    }

    async fn ready_manager(conn: Arc<ScriptedConnection>) -> Arc<GameChatManager> {
        let (events, _) = broadcast::channel(64);
        let manager = Arc::new(
            GameChatManager::new(
                Arc::new(ScriptedConnector::new(Arc::clone(&conn))),
                Arc::new(FilterHolder::new(None)),
                LimitsConfig::default(),
                &PatternsConfig::default(),
                "!",
                events,
            )
            .unwrap()
            .with_tuning(tuning()),
        );
        manager.connect();
        conn.spawn_bot("BridgeBot", "bot-uuid").await;
        // Wait for the state machine to observe the spawn.
        for _ in 0..100 {
            if manager.is_ready().await {
                return manager;
            }
            sleep(Duration::from_millis(2)).await;
        }
        panic!("manager never became ready");
    }

    #[tokio::test]
    async fn test_chat_requires_ready() {
        let (events, _) = broadcast::channel(8);
        let manager = GameChatManager::new(
            Arc::new(ScriptedConnector::new(Arc::new(ScriptedConnection::new()))),
            Arc::new(FilterHolder::new(None)),
            LimitsConfig::default(),
            &PatternsConfig::default(),
            "!",
            events,
        )
        .unwrap();
        let result = manager.chat("hi", ChatOptions::new(ChatKind::Guild)).await;
        assert!(matches!(result, Err(ChatError::NotReady)));
    }

    #[tokio::test]
    async fn test_guild_chat_writes_prefixed_line() {
        let conn = Arc::new(ScriptedConnection::new().echo_guild_sends());
        let manager = ready_manager(Arc::clone(&conn)).await;

        manager.guild_chat("hello everyone").await.unwrap();

        let written = conn.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0], "/gc hello everyone");
    }

    #[tokio::test]
    async fn test_long_message_splits_at_space_and_succeeds() {
        let conn = Arc::new(ScriptedConnection::new().echo_guild_sends());
        let manager = ready_manager(Arc::clone(&conn)).await;

        let word = "abcdefghi";
        let content = std::iter::repeat(word).take(30).collect::<Vec<_>>().join(" ");
        assert_eq!(content.len(), 299);

        manager.guild_chat(&content).await.unwrap();

        let written = conn.written();
        assert_eq!(written.len(), 2);
        for line in &written {
            assert!(line.starts_with("/gc "));
            assert!(line.chars().count() <= 256);
        }
        assert!(written[0].ends_with(word));
    }

    #[tokio::test]
    async fn test_blocked_content_writes_no_packets() {
        let conn = Arc::new(ScriptedConnection::new());
        let (events, _) = broadcast::channel(64);
        let filters = FilterHolder::new(Some(&crate::config::types::FiltersConfig {
            blocked: vec![r"(?i)\bforbidden\b".to_string()],
            allowed_urls: vec![],
        }));
        let manager = Arc::new(
            GameChatManager::new(
                Arc::new(ScriptedConnector::new(Arc::clone(&conn))),
                Arc::new(filters),
                LimitsConfig::default(),
                &PatternsConfig::default(),
                "!",
                events,
            )
            .unwrap()
            .with_tuning(tuning()),
        );
        manager.connect();
        conn.spawn_bot("BridgeBot", "bot-uuid").await;
        while !manager.is_ready().await {
            sleep(Duration::from_millis(2)).await;
        }

        let result = manager.guild_chat("this is forbidden content").await;
        assert!(matches!(
            result,
            Err(ChatError::Rejected(SendRejection::LocalBlocked))
        ));
        assert!(conn.written().is_empty());
    }

    #[tokio::test]
    async fn test_too_many_parts_rejected() {
        let conn = Arc::new(ScriptedConnection::new());
        let manager = ready_manager(Arc::clone(&conn)).await;

        let content = (0..10).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let result = manager.guild_chat(&content).await;
        assert!(matches!(
            result,
            Err(ChatError::Rejected(SendRejection::MessageCount { parts: 10, max: 5 }))
        ));
        assert!(conn.written().is_empty());
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let conn = Arc::new(ScriptedConnection::new());
        let manager = ready_manager(conn).await;
        let result = manager.guild_chat("   \n  ").await;
        assert!(matches!(
            result,
            Err(ChatError::Rejected(SendRejection::Empty))
        ));
    }

    #[tokio::test]
    async fn test_repeat_send_gets_invisible_padding() {
        let conn = Arc::new(ScriptedConnection::new().echo_guild_sends());
        let manager = ready_manager(Arc::clone(&conn)).await;

        manager.guild_chat("good morning").await.unwrap();
        manager.guild_chat("good morning").await.unwrap();

        let written = conn.written();
        assert_eq!(written.len(), 2);
        assert_ne!(written[0], written[1]);
        assert_eq!(
            crate::game::dedup::strip_invisible(&written[1]).trim_end(),
            written[0]
        );
    }

    #[tokio::test]
    async fn test_padded_repeat_stays_within_line_limit() {
        let conn = Arc::new(ScriptedConnection::new().echo_guild_sends());
        let manager = ready_manager(Arc::clone(&conn)).await;

        let line_limit = ProtocolVersion::Modern.line_limit();
        let content = "b".repeat(line_limit - "/gc ".chars().count() - MAX_PADDING);
        manager.guild_chat(&content).await.unwrap();
        manager.guild_chat(&content).await.unwrap();

        let written = conn.written();
        assert_eq!(written.len(), 2);
        // The repeat got padding, yet both stay inside the protocol cap.
        assert!(written[1].chars().count() > written[0].chars().count());
        for line in &written {
            assert!(line.chars().count() <= line_limit);
        }
    }

    #[tokio::test]
    async fn test_three_spam_echoes_fail_the_send() {
        let conn = Arc::new(ScriptedConnection::new().always_spam());
        let manager = ready_manager(Arc::clone(&conn)).await;

        let result = manager.guild_chat("spammy line").await;
        assert!(matches!(result, Err(ChatError::SpamFilter { attempts: 3 })));
        assert_eq!(conn.written().len(), 3);
    }

    #[tokio::test]
    async fn test_server_blocked_echo_fails_without_retry() {
        let conn = Arc::new(ScriptedConnection::new().always_blocked());
        let manager = ready_manager(Arc::clone(&conn)).await;

        let result = manager.guild_chat("some advert").await;
        assert!(matches!(result, Err(ChatError::ServerBlocked)));
        assert_eq!(conn.written().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_write() {
        let conn = Arc::new(ScriptedConnection::new());
        let manager = ready_manager(Arc::clone(&conn)).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = manager
            .chat("hello", ChatOptions::new(ChatKind::Guild).with_cancel(cancel))
            .await;
        assert!(matches!(result, Err(ChatError::Cancelled)));
        assert!(conn.written().is_empty());
    }

    #[tokio::test]
    async fn test_single_write_in_flight_under_concurrency() {
        let conn = Arc::new(ScriptedConnection::new().echo_guild_sends());
        let manager = ready_manager(Arc::clone(&conn)).await;

        let mut handles = Vec::new();
        for i in 0..4 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager.guild_chat(&format!("message number {}", i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(conn.max_concurrent_writes.load(Ordering::SeqCst), 1);
        assert_eq!(conn.written().len(), 4);
    }

    #[tokio::test]
    async fn test_command_collects_until_idle() {
        let conn = Arc::new(ScriptedConnection::new().respond_to_command(vec![
            "Guild Name: The Bridge".to_string(),
            "Members: 42".to_string(),
        ]));
        let manager = ready_manager(Arc::clone(&conn)).await;

        let reply = manager
            .command(
                "/g info",
                CommandOptions::new(Duration::from_millis(500), Duration::from_millis(100)),
            )
            .await
            .unwrap();
        assert_eq!(reply.text, "Guild Name: The Bridge\nMembers: 42");
        assert_eq!(reply.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_command_times_out_with_no_response() {
        let conn = Arc::new(ScriptedConnection::new());
        let manager = ready_manager(conn).await;

        let result = manager
            .command(
                "/g info",
                CommandOptions::new(Duration::from_millis(80), Duration::from_millis(40)),
            )
            .await;
        assert!(matches!(result, Err(CommandError::Timeout)));
    }

    #[tokio::test]
    async fn test_unknown_command_aborts() {
        let conn = Arc::new(ScriptedConnection::new().respond_to_command(vec![
            "Unknown command. Type \"/help\" for help.".to_string(),
        ]));
        let manager = ready_manager(conn).await;

        let result = manager
            .command(
                "/g bogus",
                CommandOptions::new(Duration::from_millis(500), Duration::from_millis(100)),
            )
            .await;
        assert!(matches!(result, Err(CommandError::Aborted)));
    }

    #[tokio::test]
    async fn test_response_pattern_filters_lines() {
        let conn = Arc::new(ScriptedConnection::new().respond_to_command(vec![
            "noise line".to_string(),
            "Online Members: 7".to_string(),
        ]));
        let manager = ready_manager(conn).await;

        let reply = manager
            .command(
                "/g online",
                CommandOptions::new(Duration::from_millis(500), Duration::from_millis(100))
                    .with_response(Regex::new(r"^Online Members:").unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(reply.text, "Online Members: 7");
    }

    #[tokio::test]
    async fn test_reconnect_drops_and_redials() {
        let conn = Arc::new(ScriptedConnection::new());
        let manager = ready_manager(Arc::clone(&conn)).await;

        manager.reconnect().await;
        for _ in 0..1000 {
            if conn.connect_count() == 2 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(conn.connect_count(), 2);

        conn.spawn_bot("BridgeBot", "bot-uuid").await;
        for _ in 0..100 {
            if manager.is_ready().await {
                break;
            }
            sleep(Duration::from_millis(2)).await;
        }
        assert!(manager.is_ready().await);
    }

    #[tokio::test]
    async fn test_fatal_kick_is_terminal() {
        let conn = Arc::new(ScriptedConnection::new());
        let manager = ready_manager(Arc::clone(&conn)).await;
        let mut events = manager.subscribe();

        conn.kick("You are banned", true).await;

        loop {
            match events.recv().await.unwrap() {
                BridgeEvent::Errored { reason } => {
                    assert_eq!(reason, "You are banned");
                    break;
                }
                _ => continue,
            }
        }
        assert!(!manager.is_ready().await);
        assert_eq!(conn.connect_count(), 1);
    }
}

//! Scripted fakes shared across test modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::common::error::{ConnectionError, RelayError};
use crate::common::messages::WebhookPayload;
use crate::common::types::{BotIdentity, ProtocolVersion};
use crate::discord::platform::{ChatPlatform, WebhookInfo};
use crate::game::protocol::{ChatPosition, GameConnection, GameConnector, GameEvent};

const CHAT_PREFIXES: [&str; 4] = ["/gc ", "/oc ", "/pc ", "/msg "];

#[derive(Default)]
struct Behavior {
    echo_guild: bool,
    always_spam: bool,
    always_blocked: bool,
    command_response: Vec<String>,
}

/// In-memory game connection with scripted server behavior.
pub struct ScriptedConnection {
    events: broadcast::Sender<GameEvent>,
    written_lines: Mutex<Vec<String>>,
    ign: Mutex<String>,
    behavior: Behavior,
    connects: AtomicUsize,
    current_writes: AtomicUsize,
    pub max_concurrent_writes: AtomicUsize,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            events,
            written_lines: Mutex::new(Vec::new()),
            ign: Mutex::new(String::new()),
            behavior: Behavior::default(),
            connects: AtomicUsize::new(0),
            current_writes: AtomicUsize::new(0),
            max_concurrent_writes: AtomicUsize::new(0),
        }
    }

    /// Echo `/gc` sends back as guild chat lines from the bot itself.
    pub fn echo_guild_sends(mut self) -> Self {
        self.behavior.echo_guild = true;
        self
    }

    /// Answer every send with the duplicate-suppression notice.
    pub fn always_spam(mut self) -> Self {
        self.behavior.always_spam = true;
        self
    }

    /// Answer every send with the content-policy rejection notice.
    pub fn always_blocked(mut self) -> Self {
        self.behavior.always_blocked = true;
        self
    }

    /// Answer any slash command with these system lines.
    pub fn respond_to_command(mut self, lines: Vec<String>) -> Self {
        self.behavior.command_response = lines;
        self
    }

    pub fn written(&self) -> Vec<String> {
        self.written_lines.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Emit a spawn event once someone is listening.
    pub async fn spawn_bot(&self, ign: &str, uuid: &str) {
        *self.ign.lock().unwrap() = ign.to_string();
        self.emit(GameEvent::Spawned {
            identity: BotIdentity {
                ign: ign.to_string(),
                uuid: uuid.to_string(),
            },
            version: ProtocolVersion::Modern,
        })
        .await;
    }

    pub async fn kick(&self, reason: &str, fatal: bool) {
        self.emit(GameEvent::Kicked {
            reason: reason.to_string(),
            fatal,
        })
        .await;
    }

    pub async fn push_chat(&self, content: &str) {
        self.emit(GameEvent::Chat {
            content: content.to_string(),
            position: ChatPosition::Chat,
            profile_id: None,
        })
        .await;
    }

    async fn emit(&self, event: GameEvent) {
        // Wait for the consumer's read task to subscribe.
        for _ in 0..200 {
            if self.events.receiver_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let _ = self.events.send(event);
    }

    fn react_to_write(&self, line: &str) {
        if self.behavior.always_spam {
            let _ = self.events.send(GameEvent::Chat {
                content: "You cannot say the same message twice!".to_string(),
                position: ChatPosition::System,
                profile_id: None,
            });
            return;
        }
        if self.behavior.always_blocked {
            let _ = self.events.send(GameEvent::Chat {
                content: "We blocked your comment as it breaks the rules".to_string(),
                position: ChatPosition::System,
                profile_id: None,
            });
            return;
        }
        if self.behavior.echo_guild {
            if let Some(content) = line.strip_prefix("/gc ") {
                let ign = self.ign.lock().unwrap().clone();
                let _ = self.events.send(GameEvent::Chat {
                    content: format!("Guild > {}: {}", ign, content),
                    position: ChatPosition::Chat,
                    profile_id: None,
                });
                return;
            }
        }
        let is_chat = CHAT_PREFIXES.iter().any(|prefix| line.starts_with(prefix));
        if !is_chat && !self.behavior.command_response.is_empty() {
            for response in &self.behavior.command_response {
                let _ = self.events.send(GameEvent::Chat {
                    content: response.clone(),
                    position: ChatPosition::System,
                    profile_id: None,
                });
            }
        }
    }
}

#[async_trait]
impl GameConnection for ScriptedConnection {
    async fn write_chat(&self, line: &str) -> Result<(), ConnectionError> {
        let concurrent = self.current_writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_writes
            .fetch_max(concurrent, Ordering::SeqCst);
        // Hold the write slot long enough for racing writers to collide.
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.current_writes.fetch_sub(1, Ordering::SeqCst);

        self.written_lines.lock().unwrap().push(line.to_string());
        self.react_to_write(line);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        let _ = self.events.send(GameEvent::Disconnected {
            reason: "disconnect requested".to_string(),
        });
    }
}

/// Hands out the same scripted connection on every connect.
pub struct ScriptedConnector {
    conn: Arc<ScriptedConnection>,
}

impl ScriptedConnector {
    pub fn new(conn: Arc<ScriptedConnection>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl GameConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Arc<dyn GameConnection>, ConnectionError> {
        self.conn.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.conn) as Arc<dyn GameConnection>)
    }
}

/// In-memory chat platform recording everything sent through it.
pub struct MockPlatform {
    webhooks: Mutex<HashMap<u64, Vec<WebhookInfo>>>,
    executed_payloads: Mutex<Vec<WebhookPayload>>,
    bot_messages: Mutex<Vec<(u64, String)>>,
    added_reactions: Mutex<Vec<(u64, u64, char)>>,
    sent_dms: Mutex<Vec<(u64, String)>>,
    next_webhook_id: AtomicUsize,
    creates: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            webhooks: Mutex::new(HashMap::new()),
            executed_payloads: Mutex::new(Vec::new()),
            bot_messages: Mutex::new(Vec::new()),
            added_reactions: Mutex::new(Vec::new()),
            sent_dms: Mutex::new(Vec::new()),
            next_webhook_id: AtomicUsize::new(1),
            creates: AtomicUsize::new(0),
        }
    }

    /// Pretend someone else already made a webhook in the channel.
    pub fn seed_webhook(&self, channel_id: u64, name: &str) {
        let id = self.next_webhook_id.fetch_add(1, Ordering::SeqCst) as u64;
        self.webhooks
            .lock()
            .unwrap()
            .entry(channel_id)
            .or_default()
            .push(WebhookInfo {
                id,
                token: format!("token-{}", id),
                name: name.to_string(),
            });
    }

    /// Simulate external deletion of every webhook.
    pub fn delete_all_webhooks(&self) {
        self.webhooks.lock().unwrap().clear();
    }

    pub fn created_webhooks(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<WebhookPayload> {
        self.executed_payloads.lock().unwrap().clone()
    }

    pub fn bot_sends(&self) -> Vec<(u64, String)> {
        self.bot_messages.lock().unwrap().clone()
    }

    pub fn reactions(&self) -> Vec<(u64, u64, char)> {
        self.added_reactions.lock().unwrap().clone()
    }

    pub fn dms(&self) -> Vec<(u64, String)> {
        self.sent_dms.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    async fn channel_webhooks(&self, channel_id: u64) -> Result<Vec<WebhookInfo>, RelayError> {
        Ok(self
            .webhooks
            .lock()
            .unwrap()
            .get(&channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_webhook(
        &self,
        channel_id: u64,
        name: &str,
    ) -> Result<WebhookInfo, RelayError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let id = self.next_webhook_id.fetch_add(1, Ordering::SeqCst) as u64;
        let webhook = WebhookInfo {
            id,
            token: format!("token-{}", id),
            name: name.to_string(),
        };
        self.webhooks
            .lock()
            .unwrap()
            .entry(channel_id)
            .or_default()
            .push(webhook.clone());
        Ok(webhook)
    }

    async fn execute_webhook(
        &self,
        webhook: &WebhookInfo,
        payload: &WebhookPayload,
    ) -> Result<(), RelayError> {
        let exists = self
            .webhooks
            .lock()
            .unwrap()
            .values()
            .flatten()
            .any(|w| w.id == webhook.id);
        if !exists {
            return Err(RelayError::WebhookDeleted);
        }
        self.executed_payloads.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn send_message(&self, channel_id: u64, content: &str) -> Result<(), RelayError> {
        self.bot_messages
            .lock()
            .unwrap()
            .push((channel_id, content.to_string()));
        Ok(())
    }

    async fn react(
        &self,
        channel_id: u64,
        message_id: u64,
        emoji: char,
    ) -> Result<(), RelayError> {
        self.added_reactions
            .lock()
            .unwrap()
            .push((channel_id, message_id, emoji));
        Ok(())
    }

    async fn dm_user(&self, user_id: u64, content: &str) -> Result<(), RelayError> {
        self.sent_dms
            .lock()
            .unwrap()
            .push((user_id, content.to_string()));
        Ok(())
    }
}

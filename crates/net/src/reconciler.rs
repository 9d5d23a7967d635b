use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use protoworld_common::NetMessage;
use protoworld_kernel::EntityManager;

use crate::NetError;

/// Tunables for [`MessageReconciler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Expiry applied to messages that do not carry their own.
    pub default_expiry_secs: f64,
}

impl ReconcilerConfig {
    /// Rejects a negative, NaN or overflowing default expiry.
    pub fn validate(&self) -> Result<(), NetError> {
        Duration::try_from_secs_f64(self.default_expiry_secs)
            .map(|_| ())
            .map_err(|_| NetError::InvalidExpiry(self.default_expiry_secs))
    }

    /// The default expiry as a duration. An invalid value falls back to zero
    /// so unaddressed messages are dropped on the first sweep.
    pub fn default_expiry(&self) -> Duration {
        match Duration::try_from_secs_f64(self.default_expiry_secs) {
            Ok(expiry) => expiry,
            Err(_) => {
                tracing::warn!(
                    secs = self.default_expiry_secs,
                    "invalid default expiry, using zero"
                );
                Duration::ZERO
            }
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            default_expiry_secs: 10.0,
        }
    }
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(flatten)]
    message: NetMessage,
    #[serde(default)]
    expiry: Option<f64>,
}

/// Parse a raw inbound message into its addressed form and optional expiry.
pub fn parse_message(raw: &[u8]) -> Result<(NetMessage, Option<Duration>), NetError> {
    let wire: WireMessage = serde_json::from_slice(raw)?;
    let expiry = wire
        .expiry
        .map(|secs| Duration::try_from_secs_f64(secs).map_err(|_| NetError::InvalidExpiry(secs)))
        .transpose()?;
    Ok((wire.message, expiry))
}

/// A message waiting for its target entity.
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    pub message: NetMessage,
    pub first_received: Instant,
    pub last_attempt: Instant,
    pub expiry: Duration,
}

impl BufferedMessage {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.first_received) > self.expiry
    }
}

/// What happened to a newly handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Delivered,
    Buffered,
    Ignored,
}

/// Counters from one buffer sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub delivered: usize,
    pub retained: usize,
    pub dropped: usize,
}

/// Buffers messages addressed to entities that do not exist yet.
#[derive(Debug, Default)]
pub struct MessageReconciler {
    config: ReconcilerConfig,
    buffer: Vec<BufferedMessage>,
}

impl MessageReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn handle(&mut self, raw: &[u8], manager: &mut EntityManager) -> Result<HandleOutcome, NetError> {
        self.handle_at(raw, manager, Instant::now())
    }

    /// Handle one raw message with an explicit clock reading.
    ///
    /// Before the manager is initialized every message is buffered. After,
    /// the buffer is swept first and then the new message is delivered or
    /// buffered for the next sweep.
    pub fn handle_at(
        &mut self,
        raw: &[u8],
        manager: &mut EntityManager,
        now: Instant,
    ) -> Result<HandleOutcome, NetError> {
        let (message, expiry) = parse_message(raw)?;
        if message.kind.is_null() {
            tracing::trace!(entity = %message.target, "ignoring null message");
            return Ok(HandleOutcome::Ignored);
        }
        let expiry = expiry.unwrap_or_else(|| self.config.default_expiry());

        if !manager.is_initialized() {
            self.buffer_message(message, expiry, now);
            return Ok(HandleOutcome::Buffered);
        }

        self.process_buffer(manager, now);

        if manager.deliver(&message) {
            Ok(HandleOutcome::Delivered)
        } else {
            self.buffer_message(message, expiry, now);
            Ok(HandleOutcome::Buffered)
        }
    }

    /// Retry every buffered message once.
    ///
    /// Messages whose target now exists are delivered and removed. The rest
    /// are stamped with this attempt and kept, unless their expiry window
    /// has already passed, in which case they are dropped silently.
    pub fn process_buffer(&mut self, manager: &mut EntityManager, now: Instant) -> SweepStats {
        let _span = tracing::debug_span!("process_buffer", buffered = self.buffer.len()).entered();
        let mut stats = SweepStats::default();

        for mut pending in std::mem::take(&mut self.buffer) {
            if manager.deliver(&pending.message) {
                stats.delivered += 1;
                continue;
            }
            pending.last_attempt = now;
            if pending.is_expired(now) {
                tracing::debug!(
                    entity = %pending.message.target,
                    kind = %pending.message.kind,
                    "dropping expired message"
                );
                stats.dropped += 1;
            } else {
                stats.retained += 1;
                self.buffer.push(pending);
            }
        }

        if stats != SweepStats::default() {
            tracing::debug!(
                delivered = stats.delivered,
                retained = stats.retained,
                dropped = stats.dropped,
                "message buffer swept"
            );
        }
        stats
    }

    fn buffer_message(&mut self, message: NetMessage, expiry: Duration, now: Instant) {
        tracing::trace!(entity = %message.target, kind = %message.kind, "buffering message");
        self.buffer.push(BufferedMessage {
            message,
            first_received: now,
            last_attempt: now,
            expiry,
        });
    }

    pub fn buffered(&self) -> &[BufferedMessage] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protoworld_common::EntityId;

    #[test]
    fn parse_reads_addressed_form() {
        let (msg, expiry) =
            parse_message(br#"{"entity": 3, "type": "Move", "payload": [1, 2], "expiry": 2.5}"#).unwrap();
        assert_eq!(msg.target, EntityId(3));
        assert_eq!(msg.kind.as_str(), "Move");
        assert_eq!(expiry, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn parse_without_expiry_or_payload() {
        let (msg, expiry) = parse_message(br#"{"entity": 1, "type": "Null"}"#).unwrap();
        assert!(msg.kind.is_null());
        assert!(msg.payload.is_null());
        assert_eq!(expiry, None);
    }

    #[test]
    fn parse_rejects_negative_expiry() {
        let err = parse_message(br#"{"entity": 1, "type": "A", "expiry": -1}"#).unwrap_err();
        assert!(matches!(err, NetError::InvalidExpiry(_)));
    }

    #[test]
    fn parse_rejects_missing_target() {
        assert!(matches!(
            parse_message(br#"{"type": "A"}"#),
            Err(NetError::Json(_))
        ));
    }

    #[test]
    fn config_rejects_bad_default_expiry() {
        assert!(ReconcilerConfig::default().validate().is_ok());
        for secs in [-1.0, f64::NAN, f64::INFINITY] {
            let config = ReconcilerConfig {
                default_expiry_secs: secs,
            };
            assert!(matches!(config.validate(), Err(NetError::InvalidExpiry(_))));
            assert_eq!(config.default_expiry(), Duration::ZERO);
        }
    }

    #[test]
    fn expiry_is_strictly_greater_than() {
        let start = Instant::now();
        let buffered = BufferedMessage {
            message: NetMessage::new(EntityId(1), "A", serde_json::Value::Null),
            first_received: start,
            last_attempt: start,
            expiry: Duration::from_secs(5),
        };
        assert!(!buffered.is_expired(start + Duration::from_secs(5)));
        assert!(buffered.is_expired(start + Duration::from_secs(6)));
    }
}

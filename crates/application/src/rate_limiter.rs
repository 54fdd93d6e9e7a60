//! 消息限流器
//!
//! 按 (发送者, 目标类型, 目标) 计数的固定窗口限流，计数保存在外部计数器存储中。
//! 达到阈值后锁定该目标，并在一个窗口后自动解锁、清零计数。
//! 计数器存储不可用时放行（可用性优先于严格限流）。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use config::MessagingConfig;
use domain::{ConversationTarget, TargetKind, UserId};
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::connection::ConnectionHandle;
use crate::counter_store::CounterStore;
use crate::events::ServerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// 固定窗口，同时也是锁定冷却时长
    pub window: Duration,
    /// 每个窗口允许的消息数
    pub threshold: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            threshold: 5,
        }
    }
}

impl From<&MessagingConfig> for RateLimitPolicy {
    fn from(config: &MessagingConfig) -> Self {
        Self {
            window: Duration::from_secs(config.rate_limit_window_secs),
            threshold: config.rate_limit_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow,
    Deny { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allow)
    }
}

/// 每个 (发送者, 目标类型) 当前被锁定的目标及锁定时间
type LockedTargets = HashMap<(UserId, TargetKind), BTreeMap<Uuid, Instant>>;

pub struct MessageRateLimiter {
    store: Arc<dyn CounterStore>,
    policy: RateLimitPolicy,
    locked: Arc<Mutex<LockedTargets>>,
}

impl MessageRateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            policy,
            locked: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 计数器键带目标类型前缀，房间与私聊的配额互不影响
    pub fn counter_key(sender: UserId, target: ConversationTarget) -> String {
        match target {
            ConversationTarget::Room(room_id) => format!("message-count:{}:{}", sender, room_id),
            ConversationTarget::Direct(receiver_id) => {
                format!("private-message-count:{}:{}", sender, receiver_id)
            }
        }
    }

    /// 检查并消耗一次配额。
    ///
    /// 被拒绝时会锁定该目标，并通过 `notify` 推送该发送者当前被锁定的目标列表；
    /// 解锁时会再次推送。
    pub async fn check_and_consume(
        &self,
        sender: UserId,
        target: ConversationTarget,
        notify: &ConnectionHandle,
    ) -> RateLimitDecision {
        let key = Self::counter_key(sender, target);

        let count = match self.store.get(&key).await {
            Ok(count) => count.unwrap_or(0),
            Err(err) => {
                tracing::warn!(error = %err, user_id = %sender, target = %target, "计数器存储不可用，放行消息");
                return RateLimitDecision::Allow;
            }
        };

        if count >= i64::from(self.policy.threshold) {
            let retry_after = self.lock(sender, target, key, notify);
            tracing::info!(
                user_id = %sender,
                target = %target,
                retry_after_secs = retry_after.as_secs(),
                "消息被限流"
            );
            return RateLimitDecision::Deny { retry_after };
        }

        if let Err(err) = self.store.set(&key, count + 1, self.policy.window).await {
            tracing::warn!(error = %err, user_id = %sender, target = %target, "计数器写入失败，放行消息");
        }
        RateLimitDecision::Allow
    }

    /// 当前被锁定的目标（按 id 排序）
    pub fn locked_targets(&self, sender: UserId, kind: TargetKind) -> Vec<Uuid> {
        self.locked
            .lock()
            .get(&(sender, kind))
            .map(|targets| targets.keys().copied().collect())
            .unwrap_or_default()
    }

    fn lock(
        &self,
        sender: UserId,
        target: ConversationTarget,
        key: String,
        notify: &ConnectionHandle,
    ) -> Duration {
        let now = Instant::now();
        let (newly_locked, locked_at, listing) = {
            let mut locked = self.locked.lock();
            let targets = locked.entry((sender, target.kind())).or_default();
            let newly_locked = !targets.contains_key(&target.id());
            let locked_at = *targets.entry(target.id()).or_insert(now);
            (newly_locked, locked_at, targets.keys().copied().collect())
        };

        notify.send(ServerEvent::RateLimitUpdated(listing));

        if newly_locked {
            self.schedule_release(sender, target, key, notify.clone());
        }
        self.policy
            .window
            .saturating_sub(now.saturating_duration_since(locked_at))
    }

    fn schedule_release(
        &self,
        sender: UserId,
        target: ConversationTarget,
        key: String,
        notify: ConnectionHandle,
    ) {
        let store = Arc::clone(&self.store);
        let locked = Arc::clone(&self.locked);
        let window = self.policy.window;
        let release_at = Instant::now() + window;

        tokio::spawn(async move {
            tokio::time::sleep_until(release_at).await;

            if let Err(err) = store.set(&key, 0, window).await {
                tracing::warn!(error = %err, user_id = %sender, target = %target, "解锁时清零计数失败");
            }

            let listing: Vec<Uuid> = {
                let mut locked = locked.lock();
                let group = (sender, target.kind());
                match locked.get_mut(&group) {
                    Some(targets) => {
                        targets.remove(&target.id());
                        let listing = targets.keys().copied().collect();
                        if targets.is_empty() {
                            locked.remove(&group);
                        }
                        listing
                    }
                    None => Vec::new(),
                }
            };

            notify.send(ServerEvent::RateLimitUpdated(listing));
            tracing::info!(user_id = %sender, target = %target, "限流解除");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter_store::{CounterStoreError, MockCounterStore};
    use crate::memory::MemoryCounterStore;
    use domain::RoomId;

    fn limiter() -> MessageRateLimiter {
        MessageRateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            RateLimitPolicy::default(),
        )
    }

    fn room() -> ConversationTarget {
        ConversationTarget::Room(RoomId::from(Uuid::new_v4()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_message_in_window_is_denied() {
        let limiter = limiter();
        let sender = UserId::from(Uuid::new_v4());
        let (handle, mut rx) = ConnectionHandle::channel(sender);
        let target = room();

        for i in 0..5 {
            let decision = limiter.check_and_consume(sender, target, &handle).await;
            assert!(decision.is_allowed(), "Message {} should be allowed", i + 1);
        }

        let decision = limiter.check_and_consume(sender, target, &handle).await;
        assert_eq!(
            decision,
            RateLimitDecision::Deny {
                retry_after: Duration::from_secs(60)
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::RateLimitUpdated(vec![target.id()])
        );
        assert_eq!(
            limiter.locked_targets(sender, TargetKind::Room),
            vec![target.id()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_is_released_after_window() {
        let limiter = limiter();
        let sender = UserId::from(Uuid::new_v4());
        let (handle, mut rx) = ConnectionHandle::channel(sender);
        let target = room();

        for _ in 0..5 {
            limiter.check_and_consume(sender, target, &handle).await;
        }
        assert!(!limiter
            .check_and_consume(sender, target, &handle)
            .await
            .is_allowed());
        assert_eq!(
            rx.recv().await,
            Some(ServerEvent::RateLimitUpdated(vec![target.id()]))
        );

        // 暂停时钟下等待会自动推进到解锁时刻
        let started = Instant::now();
        assert_eq!(rx.recv().await, Some(ServerEvent::RateLimitUpdated(vec![])));
        assert!(started.elapsed() >= Duration::from_secs(60));

        assert!(limiter
            .check_and_consume(sender, target, &handle)
            .await
            .is_allowed());
        assert!(limiter.locked_targets(sender, TargetKind::Room).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_deny_reports_remaining_cooldown() {
        let limiter = limiter();
        let sender = UserId::from(Uuid::new_v4());
        let (handle, _rx) = ConnectionHandle::channel(sender);
        let target = room();

        for _ in 0..5 {
            limiter.check_and_consume(sender, target, &handle).await;
        }
        limiter.check_and_consume(sender, target, &handle).await;

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(
            limiter.check_and_consume(sender, target, &handle).await,
            RateLimitDecision::Deny {
                retry_after: Duration::from_secs(40)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_and_direct_quotas_are_independent() {
        let limiter = limiter();
        let sender = UserId::from(Uuid::new_v4());
        let (handle, _rx) = ConnectionHandle::channel(sender);
        let shared = Uuid::new_v4();
        let as_room = ConversationTarget::Room(RoomId::from(shared));
        let as_direct = ConversationTarget::Direct(UserId::from(shared));

        for _ in 0..5 {
            limiter.check_and_consume(sender, as_room, &handle).await;
        }
        assert!(!limiter
            .check_and_consume(sender, as_room, &handle)
            .await
            .is_allowed());
        assert!(limiter
            .check_and_consume(sender, as_direct, &handle)
            .await
            .is_allowed());
        assert!(limiter.locked_targets(sender, TargetKind::Direct).is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_open() {
        let mut store = MockCounterStore::new();
        store
            .expect_get()
            .returning(|_| Err(CounterStoreError::Unavailable("connection refused".into())));
        store.expect_set().never();

        let limiter = MessageRateLimiter::new(Arc::new(store), RateLimitPolicy::default());
        let sender = UserId::from(Uuid::new_v4());
        let (handle, _rx) = ConnectionHandle::channel(sender);

        for _ in 0..10 {
            assert!(limiter
                .check_and_consume(sender, room(), &handle)
                .await
                .is_allowed());
        }
    }

    #[tokio::test]
    async fn test_failed_increment_still_allows() {
        let mut store = MockCounterStore::new();
        store.expect_get().times(1).returning(|_| Ok(Some(2)));
        store
            .expect_set()
            .withf(|_, value, ttl| *value == 3 && *ttl == Duration::from_secs(60))
            .times(1)
            .returning(|_, _, _| Err(CounterStoreError::Unavailable("timeout".into())));

        let limiter = MessageRateLimiter::new(Arc::new(store), RateLimitPolicy::default());
        let sender = UserId::from(Uuid::new_v4());
        let (handle, _rx) = ConnectionHandle::channel(sender);

        assert!(limiter
            .check_and_consume(sender, room(), &handle)
            .await
            .is_allowed());
    }

    #[test]
    fn test_counter_keys_are_kind_qualified() {
        let sender = UserId::from(Uuid::new_v4());
        let id = Uuid::new_v4();
        assert_eq!(
            MessageRateLimiter::counter_key(sender, ConversationTarget::Room(RoomId::from(id))),
            format!("message-count:{}:{}", sender, id)
        );
        assert_eq!(
            MessageRateLimiter::counter_key(sender, ConversationTarget::Direct(UserId::from(id))),
            format!("private-message-count:{}:{}", sender, id)
        );
    }
}

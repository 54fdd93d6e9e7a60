mod support;

use std::time::Duration;

use application::ServerEvent;
use domain::{ConversationTarget, TargetKind};

use support::Harness;

#[tokio::test(start_paused = true)]
async fn sixth_room_message_is_denied_then_allowed_after_cooldown() {
    let h = Harness::new();
    let alice = h.user("alice");
    let room = h.room("general");
    let mut a = h.connect(&alice).await;
    h.join(&a, ConversationTarget::Room(room)).await;
    a.drain();

    for i in 0..5 {
        h.send(&a, ConversationTarget::Room(room), &format!("m{i}")).await;
        tokio::time::advance(Duration::from_secs(2)).await;
    }
    assert!(a.errors().is_empty());
    assert_eq!(h.store.messages().len(), 5);

    h.send(&a, ConversationTarget::Room(room), "one too many").await;
    let events = a.drain();
    assert!(events.contains(&ServerEvent::RateLimitUpdated(vec![room.0])));
    assert!(events
        .iter()
        .any(|event| matches!(event, ServerEvent::Error(payload) if payload.message.contains("rate limit"))));
    assert_eq!(h.store.messages().len(), 5);
    assert_eq!(
        h.manager.rate_limiter().locked_targets(alice.id, TargetKind::Room),
        vec![room.0]
    );

    // 等待解锁通知（暂停时钟自动推进 60 秒）
    loop {
        match a.rx.recv().await {
            Some(ServerEvent::RateLimitUpdated(locked)) if locked.is_empty() => break,
            Some(_) => continue,
            None => panic!("connection closed before release"),
        }
    }

    h.send(&a, ConversationTarget::Room(room), "back again").await;
    assert!(a.errors().is_empty());
    assert_eq!(h.store.messages().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn locked_room_does_not_block_direct_messages() {
    let h = Harness::new();
    let alice = h.user("alice");
    let bob = h.user("bob");
    let room = h.room("general");
    let mut a = h.connect(&alice).await;

    for _ in 0..6 {
        h.send(&a, ConversationTarget::Room(room), "flood").await;
    }
    a.drain();

    h.send(&a, ConversationTarget::Direct(bob.id), "still here").await;
    assert!(a.errors().is_empty());
    assert_eq!(h.store.messages().len(), 6);
}

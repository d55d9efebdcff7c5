//! Shard connection lifecycle: reconnect, membership replay, terminal auth
//! failure, and stop semantics. Runs on a paused clock so backoff waits are
//! deterministic and instant.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{test_config, wait_for_status, MockTransport};
use flock_gateway::{
    Frame, GatewayError, ShardManager, ShardStatus, StaticCredentialProvider,
};

fn distributed(
    channels_per_shard: usize,
    max_shard_count: usize,
) -> (Arc<ShardManager>, Arc<MockTransport>) {
    let transport = MockTransport::new();
    let manager = ShardManager::with_distributed_policy(
        test_config(channels_per_shard, max_shard_count, 1),
        Arc::new(StaticCredentialProvider::new("flockbot", "token")),
        Arc::clone(&transport) as Arc<dyn flock_gateway::Transport>,
    )
    .unwrap();
    (Arc::new(manager), transport)
}

#[tokio::test(start_paused = true)]
async fn membership_is_joined_on_connect() {
    let (manager, transport) = distributed(10, 5);
    manager.setup(["alpha", "beta", "gamma"]).await.unwrap();
    manager.start_all_shards().await.unwrap();

    let shard = manager.shards_by_seq().remove(0);
    wait_for_status(&shard, ShardStatus::Active).await;

    let conn = transport.latest();
    assert_eq!(conn.login(), "flockbot");
    assert_eq!(conn.sent_joins(), vec!["alpha", "beta", "gamma"]);
    assert!(matches!(conn.sent().first(), Some(Frame::Auth { .. })));
}

#[tokio::test(start_paused = true)]
async fn reconnect_replays_the_tracked_set_exactly_once() {
    let (manager, transport) = distributed(10, 5);
    manager.setup(["alpha", "beta", "gamma"]).await.unwrap();
    manager.start_all_shards().await.unwrap();

    let shard = manager.shards_by_seq().remove(0);
    wait_for_status(&shard, ShardStatus::Active).await;

    manager.assign_shard("delta", false).await.unwrap();
    let first = transport.latest();
    assert_eq!(
        first.sent_joins(),
        vec!["alpha", "beta", "gamma", "delta"]
    );

    // Server drops the connection; the shard sits in backoff.
    first.drop_connection();
    wait_for_status(&shard, ShardStatus::ReconnectWait).await;

    // Mutations during the reconnect window are retained, not sent.
    manager.assign_shard("epsilon", false).await.unwrap();
    manager.release_channel("alpha").await.unwrap();

    wait_for_status(&shard, ShardStatus::Active).await;
    assert_eq!(transport.connect_count(), 2);

    // Exactly the K currently tracked channels are re-joined: the channel
    // added mid-reconnect appears, the released one does not, no duplicates.
    let second = transport.latest();
    let joins = second.sent_joins();
    assert_eq!(joins, vec!["beta", "delta", "epsilon", "gamma"]);
    assert_eq!(joins.len(), shard.channel_count());
    assert!(second.sent_parts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_connect_failures_are_retried_until_success() {
    let (manager, transport) = distributed(10, 5);
    manager.setup(["alpha"]).await.unwrap();
    transport.fail_next_connects(3);
    manager.start_all_shards().await.unwrap();

    let shard = manager.shards_by_seq().remove(0);
    wait_for_status(&shard, ShardStatus::Active).await;

    assert_eq!(transport.connect_count(), 1);
    assert_eq!(shard.stats().reconnect_waits(), 3);
    assert_eq!(shard.stats().connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_a_pending_backoff_wait() {
    let (manager, transport) = distributed(10, 5);
    manager.setup(["alpha"]).await.unwrap();
    transport.fail_next_connects(u32::MAX);
    manager.start_all_shards().await.unwrap();

    let shard = manager.shards_by_seq().remove(0);
    wait_for_status(&shard, ShardStatus::ReconnectWait).await;

    // Returns without waiting out the (unbounded) retry schedule.
    tokio::time::timeout(Duration::from_secs(5), manager.stop())
        .await
        .expect("stop() should cancel the backoff wait");

    assert_eq!(shard.status(), ShardStatus::Stopped);
    assert!(!shard.is_running());
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_is_terminal_and_fires_the_exit_signal() {
    let (manager, transport) = distributed(10, 5);
    manager.setup(["alpha"]).await.unwrap();
    transport.reject_auth(true);
    manager.start_all_shards().await.unwrap();

    let shard = manager.shards_by_seq().remove(0);
    wait_for_status(&shard, ShardStatus::Failed).await;

    // No reconnect attempts follow a credential rejection.
    tokio::time::timeout(Duration::from_secs(5), manager.wait_until_exit())
        .await
        .expect("fatal shard error should fire the exit signal");
    assert_eq!(transport.connect_count(), 1);
    assert!(shard.last_auth_error().is_some());
    assert!(!shard.is_running());

    // The shard stays observable as failed and no sender is offered.
    assert!(matches!(
        manager.get_sender_shard("alpha"),
        Err(GatewayError::NoAvailableShard)
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_shard_can_be_restarted_after_credentials_recover() {
    let (manager, transport) = distributed(10, 5);
    manager.setup(["alpha"]).await.unwrap();
    transport.reject_auth(true);
    manager.start_all_shards().await.unwrap();

    let shard = manager.shards_by_seq().remove(0);
    wait_for_status(&shard, ShardStatus::Failed).await;

    transport.reject_auth(false);
    shard.start(false).await.unwrap();
    wait_for_status(&shard, ShardStatus::Active).await;
    assert_eq!(transport.latest().sent_joins(), vec!["alpha"]);
}

#[tokio::test(start_paused = true)]
async fn blocking_start_surfaces_the_auth_error() {
    let transport = MockTransport::new();
    let manager = ShardManager::with_default_policy(
        test_config(10, 5, 1),
        Arc::new(StaticCredentialProvider::new("flockbot", "token")),
        Arc::clone(&transport) as Arc<dyn flock_gateway::Transport>,
    )
    .unwrap();
    manager.setup(["alpha"]).await.unwrap();
    transport.reject_auth(true);

    // The default policy runs its single shard inline.
    let err = manager.start().await.unwrap_err();
    assert!(matches!(err, GatewayError::Auth { .. }));
}

#[tokio::test]
async fn ping_frames_are_answered_with_pong() {
    let (manager, transport) = distributed(10, 5);
    manager.setup(["alpha"]).await.unwrap();
    manager.start_all_shards().await.unwrap();

    let shard = manager.shards_by_seq().remove(0);
    wait_for_status(&shard, ShardStatus::Active).await;

    let conn = transport.latest();
    conn.push_inbound(Frame::Ping);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !conn.sent().contains(&Frame::Pong) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("pong should be sent in reply to ping");

    assert!(shard.stats().frames_received() >= 1);
}

#[tokio::test(start_paused = true)]
async fn channel_mutations_on_a_live_shard_send_frames_immediately() {
    let (manager, transport) = distributed(10, 5);
    manager.setup(["alpha"]).await.unwrap();
    manager.start_all_shards().await.unwrap();

    let shard = manager.shards_by_seq().remove(0);
    wait_for_status(&shard, ShardStatus::Active).await;
    let conn = transport.latest();

    manager.assign_shard("beta", false).await.unwrap();
    assert_eq!(conn.sent_joins(), vec!["alpha", "beta"]);

    manager.release_channel("alpha").await.unwrap();
    assert_eq!(conn.sent_parts(), vec!["alpha"]);
    assert_eq!(shard.channels(), vec!["beta"]);
}

#[tokio::test(start_paused = true)]
async fn manager_stop_tears_down_every_shard() {
    let (manager, transport) = distributed(1, 3);
    manager.setup(Vec::<String>::new()).await.unwrap();
    manager.start_all_shards().await.unwrap();
    for i in 0..3 {
        manager.assign_shard(&format!("channel-{i}"), false).await.unwrap();
    }
    assert_eq!(manager.shard_count(), 3);

    for shard in manager.shards_by_seq() {
        wait_for_status(&shard, ShardStatus::Active).await;
    }

    manager.stop().await;
    for shard in manager.shards_by_seq() {
        assert_eq!(shard.status(), ShardStatus::Stopped);
        assert!(!shard.is_running());
    }
    for conn in transport.connections() {
        assert!(conn.is_closed());
    }

    // Calling stop again is harmless.
    manager.stop().await;
}

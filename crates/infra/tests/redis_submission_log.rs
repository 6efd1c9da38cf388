use std::sync::Arc;
use std::time::Duration;

use questflow_domain::ports::submission_log::{GroupStart, ReadBlock, SubmissionLog};
use questflow_domain::util::uuid_v7_without_dashes;
use questflow_infra::submission_log::RedisSubmissionLog;
use tokio::time::timeout;

const GROUP: &str = "submission-consumers";

fn redis_url() -> String {
    std::env::var("QUESTFLOW_TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into())
}

async fn fresh_log() -> Arc<RedisSubmissionLog> {
    let suffix = uuid_v7_without_dashes();
    let log = RedisSubmissionLog::connect_with_keys(
        &redis_url(),
        format!("questflow:test:{suffix}"),
        format!("questflow:test:{suffix}:dead"),
    )
    .await
    .unwrap();
    log.ensure_group(GROUP, GroupStart::Beginning).await.unwrap();
    Arc::new(log)
}

#[tokio::test]
#[ignore = "needs a redis server at QUESTFLOW_TEST_REDIS_URL"]
async fn ack_is_not_held_up_by_another_consumers_blocked_read() {
    let log = fresh_log().await;
    let entry_id = log.append("{}").await.unwrap();
    let entries = log
        .read_group(GROUP, "worker-0", 10, ReadBlock::NoWait)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);

    let blocked = {
        let log = log.clone();
        tokio::spawn(async move {
            log.read_group(GROUP, "worker-1", 10, ReadBlock::Forever)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!blocked.is_finished());

    timeout(Duration::from_secs(2), log.ack(GROUP, &entry_id))
        .await
        .expect("ack waited on the blocked read")
        .unwrap();
    let reclaimed = timeout(
        Duration::from_secs(2),
        log.claim_stale(GROUP, "worker-0", Duration::ZERO, 10),
    )
    .await
    .expect("claim waited on the blocked read")
    .unwrap();
    assert!(reclaimed.is_empty());

    log.append("{\"next\":true}").await.unwrap();
    let woken = timeout(Duration::from_secs(2), blocked)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(woken.len(), 1);
}

#[tokio::test]
#[ignore = "needs a redis server at QUESTFLOW_TEST_REDIS_URL"]
async fn two_consumers_block_independently() {
    let log = fresh_log().await;
    let readers: Vec<_> = ["worker-0", "worker-1"]
        .into_iter()
        .map(|consumer| {
            let log = log.clone();
            tokio::spawn(async move {
                log.read_group(GROUP, consumer, 1, ReadBlock::For(Duration::from_secs(5)))
                    .await
            })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(200)).await;

    log.append("{\"n\":1}").await.unwrap();
    log.append("{\"n\":2}").await.unwrap();
    let mut delivered = 0;
    for reader in readers {
        let entries = timeout(Duration::from_secs(2), reader)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        delivered += entries.len();
    }
    assert_eq!(delivered, 2);
}

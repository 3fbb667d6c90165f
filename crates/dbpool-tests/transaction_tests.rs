//! Shared transaction tests
//!
//! Commit, rollback and timeout behavior observed through the rows the
//! in-memory backend ends up holding.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use dbpool_connection::{TransactionConfig, TransactionManager};
use dbpool_core::{Connection, DbPoolError};
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::fixtures::{test_pool, test_pool_config};

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Commit,
    Rollback,
}

#[rstest]
#[case::commit(Outcome::Commit, vec!["first", "second"])]
#[case::rollback(Outcome::Rollback, vec![])]
#[tokio::test]
async fn test_transaction_outcome_controls_visibility(
    #[case] outcome: Outcome,
    #[case] expected: Vec<&str>,
) -> Result<()> {
    let (pool, db) = test_pool(test_pool_config(1, 0, 2)).await?;
    let manager = TransactionManager::new(pool.clone());

    let id = manager.begin_transaction().await?;
    let conn = manager.get_transaction_connection(&id).await?;
    conn.execute("INSERT first").await?;
    conn.execute("INSERT second").await?;
    assert!(db.committed_rows().is_empty(), "rows leaked before resolution");

    match outcome {
        Outcome::Commit => manager.commit_transaction(&id).await?,
        Outcome::Rollback => manager.rollback_transaction(&id).await?,
    }

    assert_eq!(db.committed_rows(), expected);
    assert!(!manager.is_transaction_active(&id));
    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.idle_count(), 1);

    // The session is back in autocommit mode for the next borrower
    let next = pool.get_connection().await?;
    next.execute("INSERT later").await?;
    assert!(db.committed_rows().contains(&"later".to_string()));
    pool.return_connection(&next).await;

    manager.close().await;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn test_workers_share_one_transaction() -> Result<()> {
    let (pool, db) = test_pool(test_pool_config(1, 0, 4)).await?;
    let manager = TransactionManager::new(pool.clone());
    let id = manager.begin_transaction().await?;

    let mut workers = Vec::new();
    for worker in 0..4 {
        let manager = manager.clone();
        let id = id.clone();
        workers.push(tokio::spawn(async move {
            let conn = manager.get_transaction_connection(&id).await?;
            conn.execute(&format!("INSERT worker-{}", worker)).await?;
            Ok::<_, DbPoolError>(conn.id())
        }));
    }

    let mut connection_ids = BTreeSet::new();
    for worker in futures::future::join_all(workers).await {
        connection_ids.insert(worker.context("worker panicked")??);
    }
    // Every worker ran on the transaction's single connection
    assert_eq!(connection_ids.len(), 1);
    assert!(db.committed_rows().is_empty());

    manager.commit_transaction(&id).await?;

    let mut rows = db.committed_rows();
    rows.sort();
    assert_eq!(rows, vec!["worker-0", "worker-1", "worker-2", "worker-3"]);

    manager.close().await;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn test_abandoned_transaction_is_rolled_back_by_cleanup() -> Result<()> {
    let (pool, db) = test_pool(test_pool_config(1, 0, 2)).await?;
    let manager = TransactionManager::with_config(
        pool.clone(),
        TransactionConfig::default()
            .with_timeout_ms(40)
            .with_cleanup_interval_ms(10),
    )?;

    let id = manager.begin_transaction().await?;
    manager
        .get_transaction_connection(&id)
        .await?
        .execute("INSERT abandoned")
        .await?;

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!manager.is_transaction_active(&id));
    assert_eq!(manager.active_transaction_count(), 0);
    assert!(db.committed_rows().is_empty());
    assert_eq!(pool.active_count(), 0);
    assert!(matches!(
        manager.commit_transaction(&id).await,
        Err(DbPoolError::TransactionNotFound(_))
    ));

    manager.close().await;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn test_commit_unknown_and_twice() -> Result<()> {
    let (pool, _db) = test_pool(test_pool_config(1, 0, 2)).await?;
    let manager = TransactionManager::new(pool.clone());

    let unknown = manager.commit_transaction("unknown").await;
    assert!(matches!(unknown, Err(DbPoolError::TransactionNotFound(_))));

    let id = manager.begin_transaction().await?;
    manager.commit_transaction(&id).await?;
    let again = manager.commit_transaction(&id).await;
    assert!(matches!(again, Err(DbPoolError::TransactionNotFound(_))));

    manager.close().await;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn test_racing_commit_and_rollback_resolve_once() -> Result<()> {
    let (pool, db) = test_pool(test_pool_config(1, 0, 2)).await?;
    let manager = TransactionManager::new(pool.clone());

    for round in 0..20 {
        let id = manager.begin_transaction().await?;
        manager
            .get_transaction_connection(&id)
            .await?
            .execute(&format!("INSERT round-{}", round))
            .await?;

        let (commit, rollback) = tokio::join!(
            manager.commit_transaction(&id),
            manager.rollback_transaction(&id)
        );
        let succeeded = [commit.is_ok(), rollback.is_ok()];
        assert_eq!(
            succeeded.iter().filter(|ok| **ok).count(),
            1,
            "round {} resolved {:?}",
            round,
            succeeded
        );
        assert_eq!(pool.active_count(), 0);
    }

    assert!(db.committed_rows().len() <= 20);
    assert_eq!(pool.idle_count(), 1);

    manager.close().await;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn test_closing_manager_rolls_back_and_keeps_pool() -> Result<()> {
    let (pool, db) = test_pool(test_pool_config(2, 0, 3)).await?;
    let manager = TransactionManager::new(pool.clone());

    for name in ["a", "b"] {
        let id = manager.begin_transaction().await?;
        manager
            .get_transaction_connection(&id)
            .await?
            .execute(&format!("INSERT {}", name))
            .await?;
    }
    assert_eq!(pool.active_count(), 2);

    manager.close().await;

    assert!(db.committed_rows().is_empty());
    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.idle_count(), 2);
    assert!(matches!(
        manager.begin_transaction().await,
        Err(DbPoolError::TransactionManagerClosed)
    ));
    assert!(pool.is_running());

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn test_pool_close_under_open_transaction() -> Result<()> {
    let (pool, db) = test_pool(test_pool_config(1, 0, 2)).await?;
    let manager = TransactionManager::new(pool.clone());

    let id = manager.begin_transaction().await?;
    manager
        .get_transaction_connection(&id)
        .await?
        .execute("INSERT doomed")
        .await?;

    pool.close().await;

    // The session is gone, so the commit cannot reach the backend
    let result = manager.commit_transaction(&id).await;
    assert!(result.is_err());
    assert!(db.committed_rows().is_empty());
    assert_eq!(db.open_sessions(), 0);
    assert!(!manager.is_transaction_active(&id));

    manager.close().await;
    Ok(())
}

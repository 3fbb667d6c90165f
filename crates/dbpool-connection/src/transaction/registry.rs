//! Registry of open transactions

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::context::TransactionContext;

/// Maps transaction ids to their contexts.
///
/// Every terminal event (commit, rollback, timeout, shutdown) goes through a
/// `remove`, `take_expired` or `drain` under the one lock, so each context
/// leaves the registry exactly once.
#[derive(Default)]
pub(crate) struct TransactionRegistry {
    transactions: Mutex<HashMap<String, Arc<TransactionContext>>>,
}

impl TransactionRegistry {
    pub(crate) fn insert(&self, context: Arc<TransactionContext>) {
        self.transactions
            .lock()
            .insert(context.transaction_id().to_string(), context);
    }

    /// Look up an open transaction and mark it as just used
    pub(crate) fn touch(&self, transaction_id: &str) -> Option<Arc<TransactionContext>> {
        let transactions = self.transactions.lock();
        let context = transactions.get(transaction_id)?;
        context.touch();
        Some(context.clone())
    }

    pub(crate) fn get(&self, transaction_id: &str) -> Option<Arc<TransactionContext>> {
        self.transactions.lock().get(transaction_id).cloned()
    }

    pub(crate) fn remove(&self, transaction_id: &str) -> Option<Arc<TransactionContext>> {
        self.transactions.lock().remove(transaction_id)
    }

    /// Remove and return every context idle for longer than `timeout`
    pub(crate) fn take_expired(&self, timeout: Duration) -> Vec<Arc<TransactionContext>> {
        let mut transactions = self.transactions.lock();
        let expired: Vec<String> = transactions
            .iter()
            .filter(|(_, context)| context.idle_for() > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| transactions.remove(id))
            .collect()
    }

    pub(crate) fn drain(&self) -> Vec<Arc<TransactionContext>> {
        self.transactions
            .lock()
            .drain()
            .map(|(_, context)| context)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.transactions.lock().len()
    }
}

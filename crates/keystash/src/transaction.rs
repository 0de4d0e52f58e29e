use crate::driver::{Connection, Transaction, TransactionMode, TransactionOutcome};
use crate::Result;

/// A transaction on a single object store. The terminal event is captured as soon as the scope
/// exists, so requests issued on `object_store()` can't race it.
pub struct TransactionScope<T: Transaction> {
    tx: T,
    store: T::ObjectStore,
}

pub fn begin<C: Connection>(
    connection: &C,
    store_name: &str,
    mode: TransactionMode,
) -> Result<TransactionScope<C::Transaction>> {
    let tx = connection.transaction(&[store_name], mode)?;
    let store = tx.object_store(store_name)?;
    Ok(TransactionScope { tx, store })
}

impl<T: Transaction> TransactionScope<T> {
    pub fn object_store(&self) -> &T::ObjectStore {
        &self.store
    }

    pub fn mode(&self) -> TransactionMode {
        self.tx.mode()
    }

    pub fn abort(&self) -> Result<()> {
        self.tx.abort()
    }

    /// Waits for the transaction's terminal event.
    pub async fn finish(self) -> TransactionOutcome {
        let TransactionScope { tx, store } = self;
        drop(store);
        tx.outcome().await
    }

    pub async fn commit(self) -> Result<()> {
        self.finish().await.into_result()
    }
}

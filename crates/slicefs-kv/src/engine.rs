use crate::transaction::{ReadOnlyTransaction, ReadWriteTransaction};

/// KV engine: the factory for transactions.
pub trait KvEngine: Send + Sync {
    type RoTxn: ReadOnlyTransaction + 'static;
    type RwTxn: ReadWriteTransaction + 'static;

    fn create_readonly_transaction(&self) -> Self::RoTxn;
    fn create_readwrite_transaction(&self) -> Self::RwTxn;
}

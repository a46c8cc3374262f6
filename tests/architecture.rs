//! Architecture Verification Suite
//!
//! The store and the service are shared across tasks, so they must stay
//! thread-safe, and the store must stay usable behind the trait object.

#[cfg(test)]
mod architecture_tests {
    use std::sync::Arc;
    use weworklocal::ledger::LedgerStore;

    #[test]
    fn test_shared_components_are_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<weworklocal::SqliteLedgerStore>();
        assert_send_sync::<weworklocal::MarketplaceService>();
        assert_send_sync::<weworklocal::commission_core::CommissionCalculator>();
        assert_send_sync::<weworklocal::commission_core::CommissionRateTable>();
    }

    #[test]
    fn test_store_is_object_safe() {
        #[allow(dead_code)]
        fn accepts(store: Arc<dyn LedgerStore>) -> Arc<dyn LedgerStore> {
            store
        }
    }
}

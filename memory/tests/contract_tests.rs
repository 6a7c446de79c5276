//! Shared storage checks run against the in-memory backend.

use calendar_memory::InMemoryStorage;
use calendar_testing::contract;

#[tokio::test]
async fn test_memory_backend_contract() {
    calendar_testing::init_tracing();
    let storage = InMemoryStorage::new();
    contract::run_all(&storage).await;
}

#[tokio::test]
async fn test_contract_through_trait_object() {
    let storage: Box<dyn calendar_core::repository::Storage> = Box::new(InMemoryStorage::new());
    contract::overlapping_create_is_rejected(storage.as_ref()).await;
    contract::delete_user_cascades(storage.as_ref()).await;
}

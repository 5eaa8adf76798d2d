use patchguard::error::{PatchguardError, Result};
use patchguard::storage::ObjectStorage;

/// Assert that an object exists at the given key.
pub async fn assert_object_exists(store: &ObjectStorage, key: &str) {
    assert!(
        store.exists(key).await.expect("exists check failed"),
        "expected object at key '{key}' to exist"
    );
}

/// Assert that an object does NOT exist at the given key.
pub async fn assert_object_not_exists(store: &ObjectStorage, key: &str) {
    assert!(
        !store.exists(key).await.expect("exists check failed"),
        "expected object at key '{key}' to NOT exist"
    );
}

/// Assert that nothing at all was written under `prefix`.
pub async fn assert_prefix_empty(store: &ObjectStorage, prefix: &str) {
    let keys = store.list_prefix(prefix).await.expect("list failed");
    assert!(
        keys.is_empty(),
        "expected no objects under '{prefix}', found {keys:?}"
    );
}

/// Assert that a result failed with the given error kind.
pub fn assert_error_kind<T: std::fmt::Debug>(result: Result<T>, kind: &str) -> PatchguardError {
    match result {
        Ok(value) => panic!("expected {kind} error, got Ok({value:?})"),
        Err(e) => {
            assert_eq!(e.kind(), kind, "unexpected error: {e}");
            e
        }
    }
}

/// Assert every value is finite.
pub fn assert_all_finite<'a>(values: impl IntoIterator<Item = &'a f32>) {
    for (i, v) in values.into_iter().enumerate() {
        assert!(v.is_finite(), "value {i} is not finite: {v}");
    }
}

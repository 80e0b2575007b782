//! Process-wide instance lifecycle. Kept in one test file because the
//! singleton and the settings environment are process-global.

use std::sync::Arc;

use recap_capture::{
    check_create_instance_status, create_instance, destroy_instance, instance, NullStateTracker,
    ENV_CAPTURE_FILE, ENV_FORCE_FLUSH, ENV_TIMESTAMP_FILE,
};

#[test]
fn refcounted_instance_lifecycle() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::env::set_var(ENV_CAPTURE_FILE, dir.path().join("singleton.rcap"));
    std::env::set_var(ENV_TIMESTAMP_FILE, "0");
    std::env::set_var(ENV_FORCE_FLUSH, "1");

    assert!(instance().is_none());

    let first = create_instance(|| Box::new(NullStateTracker));
    let second = create_instance(|| Box::new(NullStateTracker));
    assert!(Arc::ptr_eq(&first, &second));
    assert!(instance().is_some());

    destroy_instance();
    assert!(instance().is_some(), "one instance is still alive");

    destroy_instance();
    assert!(instance().is_none(), "last destroy tears the manager down");

    // A failed driver create inverts the refcount it took.
    let _third = create_instance(|| Box::new(NullStateTracker));
    check_create_instance_status(false);
    assert!(instance().is_none());

    // Unbalanced destroys only warn.
    destroy_instance();
    assert!(instance().is_none());
    Ok(())
}

//! Process-wide access to the most recently created manager.
//!
//! Prefer passing the manager explicitly; this exists for call sites that
//! cannot be threaded through. Every [`UnitOfWork::new`] replaces the value,
//! so with several managers alive the answer depends on construction order.

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::storage::Storage;
use crate::uow::UnitOfWork;

static CURRENT: RwLock<Option<Arc<dyn Any + Send + Sync>>> = parking_lot::const_rwlock(None);

pub(crate) fn publish<S, R>(uow: Arc<UnitOfWork<S, R>>)
where
    S: Storage + 'static,
    R: 'static,
{
    let uow: Arc<dyn Any + Send + Sync> = uow;
    *CURRENT.write() = Some(uow);
}

/// The manager most recently created with [`UnitOfWork::new`], if it has
/// the requested storage and repository types.
pub fn current<S, R>() -> Option<Arc<UnitOfWork<S, R>>>
where
    S: Storage + 'static,
    R: 'static,
{
    let any = CURRENT.read().clone()?;
    any.downcast::<UnitOfWork<S, R>>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    use crate::context::Context;
    use crate::uow::mock::MockStorage;

    // managers built by these tests all publish themselves
    static SERIAL: Mutex<()> = parking_lot::const_mutex(());

    // repository types no other test uses
    type PublishedRepo = Box<str>;
    type NeverBuilt = Box<[u8]>;

    #[test]
    fn test_latest_manager_wins() {
        let _serial = SERIAL.lock();
        let storage = Arc::new(MockStorage::default());

        let first = UnitOfWork::<MockStorage, PublishedRepo>::new(&Context::background(), storage.clone()).unwrap();
        let found = current::<MockStorage, PublishedRepo>().unwrap();
        assert!(Arc::ptr_eq(&first, &found));

        let second = UnitOfWork::<MockStorage, PublishedRepo>::new(&Context::background(), storage).unwrap();
        let found = current::<MockStorage, PublishedRepo>().unwrap();
        assert!(Arc::ptr_eq(&second, &found));
        assert!(!Arc::ptr_eq(&first, &found));
    }

    #[test]
    fn test_type_mismatch_is_none() {
        let _serial = SERIAL.lock();
        let _uow = UnitOfWork::<MockStorage, PublishedRepo>::new(&Context::background(), Arc::new(MockStorage::default()))
            .unwrap();
        assert!(current::<MockStorage, NeverBuilt>().is_none());
    }

    #[test]
    fn test_failed_construction_does_not_publish() {
        let _serial = SERIAL.lock();
        let kept = UnitOfWork::<MockStorage, PublishedRepo>::new(&Context::background(), Arc::new(MockStorage::default()))
            .unwrap();

        let ctx = Context::background();
        ctx.cancel();
        assert!(UnitOfWork::<MockStorage, PublishedRepo>::new(&ctx, Arc::new(MockStorage::default())).is_err());

        let found = current::<MockStorage, PublishedRepo>().unwrap();
        assert!(Arc::ptr_eq(&kept, &found));
    }
}

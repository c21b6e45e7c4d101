//! コールバック購読レジストリ
//!
//! コレクターとアラートマネージャーが共有する購読者管理。
//! 通知はロック外で行い、購読者のパニックは個別に捕捉してログに残します。

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::error;

/// 購読コールバック
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback<T>)>>,
}

impl<T> Registry<T> {
    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Callback<T>)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|(sub_id, _)| *sub_id != id);
    }
}

/// 購読者レジストリ
pub struct SubscriberRegistry<T> {
    inner: Arc<Registry<T>>,
}

impl<T> Clone for SubscriberRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> SubscriberRegistry<T> {
    /// 空のレジストリを作成
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// コールバックを登録
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().push((id, Arc::new(callback)));

        let registry = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(id);
                }
            }),
        }
    }

    /// 登録数
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 全購読者を解除
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// 全購読者に通知し、正常に完了した件数を返す
    pub fn notify(&self, value: &T) -> usize {
        let callbacks: Vec<Callback<T>> = self
            .inner
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        let mut delivered = 0;
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    error!("Subscriber panicked: {}", panic_message(payload.as_ref()));
                }
            }
        }
        delivered
    }
}

/// 購読ハンドル
///
/// `unsubscribe()` は何度呼んでも安全です。ハンドルを破棄しても購読は解除されません。
pub struct Subscription {
    cancel: Box<dyn Fn() + Send + Sync>,
}

impl Subscription {
    /// 購読を解除
    pub fn unsubscribe(&self) {
        (self.cancel)();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// パニックペイロードからメッセージを取り出す
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use std::future::Future;
use tokio::sync::Mutex;

use crate::model::EmbedError;

type LoadFuture<T> = Shared<BoxFuture<'static, Result<T, EmbedError>>>;

enum Slot<T: Clone> {
    Idle,
    Loading(LoadFuture<T>),
    Loaded(T),
}

/// At most one in-flight load shared by all callers until it settles.
/// Failure (including timeout) resets the slot so the next caller retries.
pub(crate) struct SingleFlight<T: Clone> {
    slot: Mutex<Slot<T>>,
}

impl<T: Clone + Send + 'static> SingleFlight<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Idle),
        }
    }

    pub(crate) async fn get_or_load<F>(&self, load: F) -> Result<T, EmbedError>
    where
        F: Future<Output = Result<T, EmbedError>> + Send + 'static,
    {
        let future = {
            let mut slot = self.slot.lock().await;
            match &*slot {
                Slot::Loaded(value) => return Ok(value.clone()),
                Slot::Loading(future) => future.clone(),
                Slot::Idle => {
                    let future = load.boxed().shared();
                    *slot = Slot::Loading(future.clone());
                    future
                }
            }
        };

        let result = future.await;

        {
            let mut slot = self.slot.lock().await;
            if matches!(&*slot, Slot::Loading(_)) {
                *slot = match &result {
                    Ok(value) => Slot::Loaded(value.clone()),
                    Err(_) => Slot::Idle,
                };
            }
        }

        result
    }

    pub(crate) async fn is_loaded(&self) -> bool {
        matches!(&*self.slot.lock().await, Slot::Loaded(_))
    }

    pub(crate) async fn loaded(&self) -> Option<T> {
        match &*self.slot.lock().await {
            Slot::Loaded(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub(crate) async fn unload(&self) {
        *self.slot.lock().await = Slot::Idle;
    }
}

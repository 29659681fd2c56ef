use std::sync::Arc;

/// Shared callback invoked for every event of type `T` delivered to a
/// subscriber.
pub type NextFn<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

/// One-shot callback invoked when an asynchronous operation settles.
pub type SettledFn<E> = Box<dyn FnOnce(Result<(), E>) + Send + 'static>;

/// Closure that removes a previously registered subscription.
pub type Unsubscribe = Box<dyn FnOnce() + Send + 'static>;

pub mod subscribe;

pub use subscribe::{NextFn, SettledFn, Unsubscribe};

//! Asynchronous message dispatch.
//!
//! Alerts accepted by the API become [`task::DispatchTask`]s on a
//! [`queue::TaskQueue`]; [`worker::DispatchWorker`]s pull them off and deliver
//! them through a [`messaging::MessagingApi`], retrying with a fixed delay up to
//! the task's attempt budget.

pub mod messaging;
pub mod queue;
pub mod spark;
pub mod task;
pub mod worker;

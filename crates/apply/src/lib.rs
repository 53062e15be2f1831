//! Plinth apply: converges a declared project onto the remote control plane.
//!
//! [`Reconciler`] drives the state machine; [`mapper`] and the waiter from
//! `plinth_ops` are stateless helpers, and [`BillingRetrier`] runs only when
//! billing is declared or changed.

#![forbid(unsafe_code)]

use std::sync::Arc;

use plinth_ops::{Clients, Clock, OperationWaiter, WaitPolicy};

mod billing;
pub mod mapper;
pub mod network;
mod reconciler;

pub use billing::{BillingPolicy, BillingRetrier};
pub use reconciler::{GroupOutcome, Reconciler, UpdateReport};

/// Timing knobs for one reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuning {
    pub wait: WaitPolicy,
    pub billing: BillingPolicy,
}

impl Tuning {
    pub fn from_env() -> Self {
        Self { wait: WaitPolicy::from_env(), billing: BillingPolicy::from_env() }
    }
}

/// Wire a reconciler over `clients`, sleeping through `clock`.
pub fn reconciler(clients: Clients, clock: Arc<dyn Clock>, tuning: Tuning) -> Reconciler {
    let waiter = OperationWaiter::new(clock.clone(), tuning.wait);
    let billing = BillingRetrier::new(clients.billing.clone(), clock, tuning.billing);
    Reconciler::new(clients, waiter, billing)
}

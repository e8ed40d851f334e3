//! Context-keyed gain learning.
//!
//! The control cycle owns an [`MlGainCache`](cache::MlGainCache) per loop;
//! the slow [`GainLookupStore`](store::GainLookupStore) lives on the
//! adaptation worker behind an [`AdaptationLink`](worker::AdaptationLink).

pub mod cache;
pub mod context;
pub mod store;
pub mod worker;

//! A live, sorted, conversation-grouped message list.
//!
//! Producers feed [`reconcile::InboundEvent`]s into a [`reconcile::Reconciler`],
//! which mutates the shared [`collection::SortedCollection`]. Every mutation
//! pokes the debounced [`pipeline::Pipeline`], whose grouping results reach the
//! single [`view::View`] over a channel.

pub mod collection;
pub mod config;
pub mod grouping;
pub mod headers;
pub mod logging;
pub mod message;
pub mod pipeline;
pub mod reconcile;
pub mod sort;
pub mod view;

//! Dunning Engine - Failed Payment Recovery
//!
//! Receives payment-provider webhooks, tracks one dunning cycle per failed
//! invoice, retries the charge on a backoff schedule, notifies the customer
//! and cancels the subscription once retries are exhausted.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

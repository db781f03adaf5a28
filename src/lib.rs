//! Push delivery engine: routes messages over a pool of notification hubs and
//! delivers encrypted Web Push messages to browser subscriptions.

pub mod comb;
pub mod config;
pub mod db;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod hub;
pub mod models;
pub mod push;
pub mod state;
pub mod tags;
pub mod templates;
pub mod webpush;

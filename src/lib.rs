//! Synchronization engine for live multiplayer quizzes.
//!
//! One host drives a game's lifecycle; any number of players replicate it
//! through a change feed over a shared record store and submit answers that
//! are scored atomically in the store. All clients converge on the same
//! leaderboard without sharing memory.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod feed;
pub mod projection;
pub mod services;
pub mod state;

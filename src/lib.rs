//! cardscan - card image field extraction.
//!
//! Scanned card images are ingested into a shared record store. Independent
//! extraction workers, one per field, poll the store for cards still missing
//! their field, crop a fixed region of the source image, extract a value
//! (recognized text or a persisted sub-image) and write it back.

pub mod cli;
pub mod config;
pub mod extraction;
pub mod models;
pub mod ocr;
pub mod repository;
pub mod schema;
pub mod server;
pub mod services;
pub mod work_queue;

//! Job posting annotation tool
//!
//! A single reviewer labels each row of a CSV dataset of job postings as an
//! AI or non-AI job. Progress lives in memory and every decision triggers a
//! background upload of the full dataset back to the file's remote storage
//! (Google Drive, Cloudflare R2, or a local directory).

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod session;

//! Pipeline components, one per transformation step.
//!
//! ```text
//! input ──▶ split ──▶ convert ──▶ extract ──▶ table
//! (path/URL) (lopdf)  (text layer  (prompt +   (CSV append)
//!                      or vision)   model)
//! ```
//!
//! 1. [`input`]  : load the source PDF from a path, bytes or a URL
//! 2. [`split`]  : one single-page PDF per page, named by [`unit`]
//! 3. [`convert`]: unit → text via the text layer or [`vision`], then [`tidy`]
//! 4. [`extract`]: prompt the model and validate its JSON reply
//!
//! Each component is usable on its own; [`crate::orchestrator`] drives
//! them as stages over a whole batch.

pub mod convert;
pub mod extract;
pub mod input;
pub mod split;
pub mod tidy;
pub mod unit;
pub mod vision;

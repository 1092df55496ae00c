//! Pipeline stages for document structuring and region extraction.
//!
//! Each submodule implements exactly one step. Keeping stages separate makes
//! each independently testable and lets us swap implementations (a different
//! rasteriser, oracle or store) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ extract ──▶ regions ──▶ link ──▶ persist ──▶ cleanup
//! (bytes)   (pdfium)   (oracle)    (crop+put)  (join)   (2 stores)  (temp)
//! ```
//!
//! 1. [`input`]: read a path or download a URL; reject non-PDF bytes
//! 2. [`render`]: rasterise every page to PNG; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`extract`]: one oracle call with all pages ([`oracle`], [`encode`]),
//!    JSON repair ([`repair`]), validation and post-processing
//! 4. [`regions`]: crop and store each region candidate independently
//! 5. [`link`]: pure merge of items and stored assets by item number
//! 6. [`persist`]: concurrent writes to the relational and document stores
//! 7. [`cleanup`]: remove the job's working storage, whatever happened

pub mod cleanup;
pub mod encode;
pub mod extract;
pub mod input;
pub mod link;
pub mod oracle;
pub mod persist;
pub mod regions;
pub mod render;
pub mod repair;

//! # Attachment Indexer
//!
//! A recurring batch job that makes stored file attachments searchable:
//! it finds attachments that are not yet indexed (plus an optional random
//! sample for re-processing), sends each to an external text-extraction
//! service, and writes the extracted text into Postgres as size-bounded
//! segments with a server-computed full-text search vector.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌───────────┐   ┌─────────────┐
//! │ Candidates │──▶│ Extraction │──▶│ Normalize │──▶│  Segments   │
//! │ (Postgres) │   │  service   │   │  + chunk  │   │ (tsvector)  │
//! └────────────┘   └────────────┘   └───────────┘   └─────────────┘
//! ```
//!
//! Each attachment is processed fully before the next begins. Segment
//! writes are transactional: when the store rejects a chunk's text for
//! indexing, the chunk length is halved and the whole attachment retried,
//! so a file is either completely indexed or not at all.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with defaults |
//! | [`models`] | Core data types |
//! | [`extract`] | Extraction service client with retry/backoff |
//! | [`normalize`] | Metadata and content cleanup |
//! | [`chunk`] | Whitespace-boundary text splitting |
//! | [`persist`] | Adaptive chunk-size transactional writes |
//! | [`store`] | Postgres connections, schema, candidate query |
//! | [`pipeline`] | Batch driver |

pub mod chunk;
pub mod config;
pub mod extract;
pub mod models;
pub mod normalize;
pub mod persist;
pub mod pipeline;
pub mod store;

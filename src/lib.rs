//! # lore-forest
//!
//! Thread forest reconstruction, content chunking, and link verification
//! for lore-style mailing-list mirrors.
//!
//! lore-forest turns a mirrored archive of mailing-list messages into
//! verified, navigable discussion trees: it parses one message per mirror
//! commit, links the flat records into nested reply trees (tolerating
//! missing and out-of-order parents), derives a canonical permalink per
//! message, verifies each permalink against the remote archive with a
//! weighted fuzzy match, and splits oversized bodies into bounded,
//! priority-tagged chunks for a token-limited consumer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────────┐
//! │  GitArchive  │──▶│ parse → forest │──▶│   ThreadForest   │
//! │ (one msg per │   │  (reply trees, │   │ roots + node idx │
//! │   commit)    │   │  pseudo-roots) │   └───────┬──────────┘
//! └──────────────┘   └───────────────┘           │
//!                        ┌──────────────┬────────┴──────┐
//!                        ▼              ▼               ▼
//!                  ┌──────────┐  ┌────────────┐  ┌────────────┐
//!                  │ permalink │  │  verifier  │  │  chunker   │
//!                  │ derivation│  │ (fuzzy +   │  │ (bounded,  │
//!                  │  (pure)   │  │  workers)  │  │  typed)    │
//!                  └──────────┘  └────────────┘  └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! loref sync                    # clone/update the mirror
//! loref build --limit 200      # reconstruct reply trees
//! loref verify --limit 50      # check permalinks against the remote
//! loref chunk --limit 200      # produce bounded content chunks
//! loref stats                   # forest overview
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`archive`] | Git mirror access (`ArchiveSource` seam) |
//! | [`parse`] | Raw message → record parsing |
//! | [`forest`] | Thread forest reconstruction |
//! | [`lore`] | Permalink derivation |
//! | [`verify`] | Remote link verification |
//! | [`chunker`] | Structure-aware content chunking |
//! | [`stats`] | Forest statistics |
//! | [`pipeline`] | CLI orchestration |

pub mod archive;
pub mod chunker;
pub mod config;
pub mod forest;
pub mod lore;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod stats;
pub mod verify;

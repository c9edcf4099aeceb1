//! # Second Brain
//!
//! **Retrieval-augmented search over your reading history.**
//!
//! Second Brain ingests your reading archive (articles, PDFs, tweets, web
//! clippings) from an upstream reader service, turns each document into a
//! hybrid dense + sparse vector representation — a synthesized
//! "super-header" for the whole document plus semantically chunked body
//! fragments — and answers queries with a two-stage coarse-to-fine search
//! that returns relevant passages with provenance.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────────┐   ┌───────────┐
//! │  Reader  │──▶│  Pipeline                     │──▶│  Vector   │
//! │   API    │   │ normalize → TF-IDF → header  │   │  index    │
//! └──────────┘   │ → chunk → embed → sparsify   │   │ (hybrid)  │
//!                └──────────────────────────────┘   └─────┬─────┘
//!                                                         │
//!                ┌──────────────────────────────┐         │
//!   query ──────▶│ rewrite → strip → embed      │─────────┤
//!                │ → header pass → chunk pass   │◀────────┘
//!                └──────────────────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **reader client** ([`reader`]) pages the reading-history API
//!    across locations and deduplicates by document id.
//! 2. Bodies are normalized from HTML ([`html`]) and accumulated into a
//!    corpus-wide TF-IDF model ([`keywords`]).
//! 3. Per document, the pipeline ([`ingest`]) synthesizes a super-header
//!    ([`header`]), splits the body with the embedding-guided chunker
//!    ([`chunker`]), embeds everything ([`embedding`]), builds sparse
//!    vectors ([`sparse`]), and upserts the records ([`store`]).
//! 4. At query time ([`search`]), the raw query is expanded by an LLM
//!    rewriter ([`rewrite`]), stop-stripped ([`tokenize`]), and run
//!    through the header pass then the chunk pass; surviving passages
//!    are formatted with citations and a `## Sources` list.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML tuning config and environment credentials |
//! | [`models`] | Core data types: `ReaderDoc`, `VectorRecord`, `SparseVector` |
//! | [`tokenize`] | Exact token counts, context splitting, stop-word stripping |
//! | [`sparse`] | Top-K sparse vector construction with stable term ids |
//! | [`keywords`] | Corpus TF-IDF model and RAKE phrase extraction |
//! | [`html`] | Deterministic HTML-to-text normalization |
//! | [`embedding`] | Embedding client with overflow bisection and batching |
//! | [`chunker`] | Similarity-guided semantic chunker |
//! | [`header`] | Super-header synthesis |
//! | [`reader`] | Reader API client with pagination and rate-limit handling |
//! | [`store`] | Hybrid vector store trait, Pinecone and in-memory backends |
//! | [`rewrite`] | LLM query rewriter with silent degradation |
//! | [`ingest`] | Two-phase sync orchestration |
//! | [`search`] | Two-stage retrieval and context formatting |

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod header;
pub mod html;
pub mod ingest;
pub mod keywords;
pub mod models;
pub mod reader;
pub mod rewrite;
pub mod search;
pub mod sparse;
pub mod store;
pub mod tokenize;

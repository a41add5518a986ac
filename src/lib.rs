//! # Fathom
//!
//! Typed aggregation pipelines and stream-friendly cursors for MongoDB.
//!
//! Fathom provides:
//! - A typed model of every aggregation stage with a fluent builder
//! - Cursor adapters that expose driver cursors as `futures::Stream`s with
//!   backpressure, events and teardown
//! - Find and aggregation cursor variants with `count()`, `map()` and
//!   `clone_cursor()`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fathom::prelude::*;
//! use futures::TryStreamExt;
//!
//! #[derive(Debug, serde::Deserialize)]
//! struct CityTotal {
//!     #[serde(rename = "_id")]
//!     city: String,
//!     total: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fathom::CursorError> {
//!     let client = mongodb::Client::with_uri_str("mongodb://localhost").await?;
//!     let orders = client.database("shop").collection::<Document>("orders");
//!
//!     let pipeline = AggregationBuilder::new("orders")
//!         .match_stage(doc! { "status": "paid" })
//!         .group(doc! { "_id": "$city", "total": accumulators::sum("$amount") })
//!         .sort(Sort::new().descending("total"))
//!         .build();
//!
//!     let mut cursor = orders.aggregate_cursor::<CityTotal>(pipeline);
//!     while let Some(row) = cursor.try_next().await? {
//!         println!("{}: {}", row.city, row.total);
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Aggregation stages, expressions and the pipeline builder.
pub mod pipeline {
    pub use fathom_pipeline::*;
}

/// Cursor adapters and driver bindings.
pub mod cursor {
    pub use fathom_cursor::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use fathom_cursor::prelude::*;
}

// Re-export key types at the crate root
pub use fathom_cursor::{
    AggregationCursor, CursorAdapter, CursorError, CursorOptions, CursorResult, FindCursor,
};
pub use fathom_pipeline::{AggregationBuilder, Pipeline, Stage};

//! # fathom-pipeline
//!
//! Strongly-typed aggregation pipeline stages for MongoDB and a fluent
//! builder that assembles them.
//!
//! This crate provides:
//! - A closed [`Stage`] enum with one variant per supported operator
//! - Structured payloads for the composite operators (`$lookup`, `$merge`, `$geoNear`, ...)
//! - [`AggregationBuilder`], a chainable pipeline builder bound to a collection
//! - Expression and accumulator helpers in [`expr`]
//!
//! ## Example
//!
//! ```rust
//! use bson::doc;
//! use fathom_pipeline::{AggregationBuilder, Lookup, Sort};
//!
//! let pipeline = AggregationBuilder::new("orders")
//!     .match_stage(doc! { "status": "shipped" })
//!     .lookup(Lookup::new("customers", "customer_id", "_id", "customer"))
//!     .unwind("customer")
//!     .sort(Sort::new().descending("total"))
//!     .limit(10)
//!     .build();
//!
//! assert_eq!(pipeline.len(), 5);
//!
//! // A pipeline converts straight into the documents the driver expects.
//! let stages: Vec<bson::Document> = pipeline.into_iter().collect();
//! assert!(stages[0].contains_key("$match"));
//! ```

pub mod builder;
pub mod expr;
pub mod stage;

pub use builder::AggregationBuilder;
pub use stage::{
    Bucket, BucketAuto, Facet, GeoNear, GeoPoint, Granularity, GraphLookup, Lookup, Merge,
    MergeAction, MergeInto, MergeNotMatchedAction, OutTarget, Pipeline, ReplaceRoot, Sample, Sort,
    SortOrder, Stage, UnionWith, Unwind,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::builder::AggregationBuilder;
    pub use crate::expr::{self, accumulators};
    pub use crate::stage::{
        Bucket, BucketAuto, Facet, GeoNear, GeoPoint, Granularity, GraphLookup, Lookup, Merge,
        MergeAction, MergeInto, MergeNotMatchedAction, OutTarget, Pipeline, ReplaceRoot, Sample,
        Sort, SortOrder, Stage, UnionWith, Unwind,
    };
    pub use bson::{Bson, Document, doc};
}

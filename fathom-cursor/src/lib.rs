//! # fathom-cursor
//!
//! Stream-friendly cursors over the MongoDB driver.
//!
//! This crate provides:
//! - [`CursorAdapter`], a buffered `futures::Stream` over a native cursor with
//!   pause/resume, events, destroy and the usual cursor passthroughs
//! - [`AggregationCursor`] and [`FindCursor`], typed variants with `count()`,
//!   `map()` and `clone_cursor()`
//! - Driver bindings in [`mongo`], plus the collaborator traits in [`driver`]
//!   for plugging in anything else
//!
//! ## Example
//!
//! ```rust,ignore
//! use futures::TryStreamExt;
//! use fathom_cursor::prelude::*;
//!
//! let orders = db.collection::<Document>("orders");
//! let pipeline = AggregationBuilder::new("orders")
//!     .match_stage(doc! { "status": "open" })
//!     .build();
//!
//! let mut cursor = orders.aggregate_cursor::<Order>(pipeline);
//! cursor.set_filter(doc! { "status": "open" });
//! println!("{} open orders", cursor.count().await?);
//!
//! while let Some(order) = cursor.next().await? {
//!     println!("{:?}", order);
//! }
//! ```

pub mod adapter;
pub mod aggregation;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod find;
pub mod logging;
pub mod mongo;

pub use adapter::{CursorAdapter, CursorVariant, Transform};
pub use aggregation::AggregationCursor;
pub use config::{CursorOptions, CursorOptionsBuilder, DEFAULT_HIGH_WATER_MARK, ReadPreference};
pub use driver::{CollectionOps, DriverCursor, FindDriverCursor};
pub use error::{CursorError, CursorResult};
pub use events::{EventEmitter, EventPayload, Listener, listener};
pub use find::FindCursor;
pub use mongo::{
    AggregateQuery, CollectionCursorExt, FindQuery, MongoAggregateCursor, MongoCursor,
    MongoFindCursor, QueryDefinition,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::adapter::{CursorAdapter, CursorVariant};
    pub use crate::aggregation::AggregationCursor;
    pub use crate::config::{CursorOptions, ReadPreference};
    pub use crate::error::{CursorError, CursorResult};
    pub use crate::events::{self, EventPayload, Listener, listener};
    pub use crate::find::FindCursor;
    pub use crate::mongo::CollectionCursorExt;
    pub use bson::{Bson, Document, doc};
    pub use fathom_pipeline::prelude::*;
}

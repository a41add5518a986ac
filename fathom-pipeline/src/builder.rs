//! Fluent aggregation pipeline builder.
//!
//! [`AggregationBuilder`] is bound to the collection the pipeline runs
//! against. Every operator method appends exactly one stage and hands the
//! builder back, so a pipeline reads top to bottom in execution order.
//!
//! ```rust
//! use bson::doc;
//! use fathom_pipeline::AggregationBuilder;
//! use fathom_pipeline::expr::accumulators;
//!
//! let pipeline = AggregationBuilder::new("events")
//!     .match_stage(doc! { "kind": "click" })
//!     .group(doc! { "_id": "$page", "clicks": accumulators::sum(1) })
//!     .build();
//!
//! assert_eq!(pipeline.len(), 2);
//! ```

use bson::{Bson, Document};

use crate::stage::{
    Bucket, BucketAuto, Facet, GeoNear, GraphLookup, Lookup, Merge, MergeInto, OutTarget,
    Pipeline, ReplaceRoot, Sample, Sort, Stage, UnionWith, Unwind, field_path,
};

/// Builder for aggregation pipelines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationBuilder {
    collection: String,
    stages: Vec<Stage>,
}

impl AggregationBuilder {
    /// Create an empty builder for `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            stages: Vec::new(),
        }
    }

    /// The collection this pipeline runs against.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The stages accumulated so far.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Number of stages accumulated so far.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether no stage has been added.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Append a typed stage.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append a raw stage document, emitted unchanged.
    pub fn add_stage(self, stage: Document) -> Self {
        self.stage(Stage::Raw(stage))
    }

    /// Append copies of every stage of `other`, in order.
    pub fn concat(mut self, other: &AggregationBuilder) -> Self {
        self.stages.extend(other.stages.iter().cloned());
        self
    }

    /// Add a `$addFields` stage.
    pub fn add_fields(self, fields: Document) -> Self {
        self.stage(Stage::AddFields(fields))
    }

    /// Add a `$bucket` stage.
    pub fn bucket(self, bucket: Bucket) -> Self {
        self.stage(Stage::Bucket(bucket))
    }

    /// Add a `$bucketAuto` stage.
    pub fn bucket_auto(self, bucket: BucketAuto) -> Self {
        self.stage(Stage::BucketAuto(bucket))
    }

    /// Add a `$collStats` stage.
    pub fn coll_stats(self, options: Document) -> Self {
        self.stage(Stage::CollStats(options))
    }

    /// Add a `$count` stage writing the count to `field`.
    pub fn count(self, field: impl Into<String>) -> Self {
        self.stage(Stage::Count(field.into()))
    }

    /// Add a `$facet` stage.
    pub fn facet(self, facet: Facet) -> Self {
        self.stage(Stage::Facet(facet))
    }

    /// Add a `$geoNear` stage.
    pub fn geo_near(self, geo: GeoNear) -> Self {
        self.stage(Stage::GeoNear(geo))
    }

    /// Add a `$graphLookup` stage.
    pub fn graph_lookup(self, lookup: GraphLookup) -> Self {
        self.stage(Stage::GraphLookup(lookup))
    }

    /// Add a `$group` stage.
    pub fn group(self, group: Document) -> Self {
        self.stage(Stage::Group(group))
    }

    /// Add a `$indexStats` stage.
    pub fn index_stats(self) -> Self {
        self.stage(Stage::IndexStats)
    }

    /// Add a `$limit` stage.
    pub fn limit(self, limit: i64) -> Self {
        self.stage(Stage::Limit(limit))
    }

    /// Add a `$lookup` stage (join).
    pub fn lookup(self, lookup: Lookup) -> Self {
        self.stage(Stage::Lookup(lookup))
    }

    /// Add a `$match` stage.
    pub fn match_stage(self, filter: Document) -> Self {
        self.stage(Stage::Match(filter))
    }

    /// Add a `$merge` stage.
    ///
    /// The output collection is overwritten with this builder's collection
    /// unless `force_output` is set, in which case `merge.into` is kept.
    pub fn merge(self, mut merge: Merge, force_output: bool) -> Self {
        if !force_output {
            merge.into = MergeInto::Collection(self.collection.clone());
        }
        self.stage(Stage::Merge(merge))
    }

    /// Add a `$out` stage.
    ///
    /// Like [`merge`](Self::merge), the target is replaced by this builder's
    /// collection unless `force_output` is set.
    pub fn out(self, target: impl Into<OutTarget>, force_output: bool) -> Self {
        let target = if force_output {
            target.into()
        } else {
            OutTarget::Collection(self.collection.clone())
        };
        self.stage(Stage::Out(target))
    }

    /// Add a `$project` stage.
    pub fn project(self, projection: Document) -> Self {
        self.stage(Stage::Project(projection))
    }

    /// Add a `$redact` stage.
    pub fn redact(self, expr: impl Into<Bson>) -> Self {
        self.stage(Stage::Redact(expr.into()))
    }

    /// Add a `$replaceRoot` stage.
    pub fn replace_root(self, new_root: impl Into<Bson>) -> Self {
        self.stage(Stage::ReplaceRoot(ReplaceRoot::new(new_root)))
    }

    /// Add a `$replaceWith` stage.
    pub fn replace_with(self, expr: impl Into<Bson>) -> Self {
        self.stage(Stage::ReplaceWith(expr.into()))
    }

    /// Add a `$sample` stage.
    pub fn sample(self, size: i64) -> Self {
        self.stage(Stage::Sample(Sample { size }))
    }

    /// Add a `$set` stage.
    pub fn set(self, fields: Document) -> Self {
        self.stage(Stage::Set(fields))
    }

    /// Add a `$skip` stage.
    pub fn skip(self, skip: i64) -> Self {
        self.stage(Stage::Skip(skip))
    }

    /// Add a `$sort` stage.
    pub fn sort(self, sort: Sort) -> Self {
        self.stage(Stage::Sort(sort))
    }

    /// Add a `$sortByCount` stage.
    pub fn sort_by_count(self, expr: impl Into<Bson>) -> Self {
        self.stage(Stage::SortByCount(expr.into()))
    }

    /// Add a `$unionWith` stage.
    pub fn union_with(self, union: UnionWith) -> Self {
        self.stage(Stage::UnionWith(union))
    }

    /// Add a `$unset` stage.
    pub fn unset<S: Into<String>>(self, fields: impl IntoIterator<Item = S>) -> Self {
        self.stage(Stage::Unset(fields.into_iter().map(Into::into).collect()))
    }

    /// Add an `$unwind` stage.
    pub fn unwind(self, unwind: impl Into<Unwind>) -> Self {
        self.stage(Stage::Unwind(unwind.into()))
    }

    /// Unwind `field` and promote each element to the document root.
    pub fn unwind_and_replace_root_with_field(self, field: &str) -> Self {
        let path = field_path(field);
        self.unwind(Unwind::new(&path))
            .stage(Stage::ReplaceRoot(ReplaceRoot::new(path)))
    }

    /// Finish the pipeline.
    pub fn build(self) -> Pipeline {
        Pipeline::from(self.stages)
    }

    /// Finish the pipeline as the documents the driver expects.
    pub fn build_documents(self) -> Vec<Document> {
        self.build().into_documents()
    }
}

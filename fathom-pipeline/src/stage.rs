//! Typed aggregation pipeline stages.
//!
//! Every stage renders as a single-key document `{ "$operator": payload }`.
//! The payload shape is fixed by the variant, so processing a [`Stage`] is an
//! exhaustive `match` rather than a lookup into an open-ended map. Nothing in
//! this module validates payload contents; the server is the authority on
//! whether a stage makes sense.

use bson::{Bson, Document, doc};
use serde::{Serialize, Serializer};

/// A single aggregation pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// `$addFields`
    AddFields(Document),
    /// `$bucket`
    Bucket(Bucket),
    /// `$bucketAuto`
    BucketAuto(BucketAuto),
    /// `$collStats`
    CollStats(Document),
    /// `$count`: name of the output field.
    Count(String),
    /// `$facet`
    Facet(Facet),
    /// `$geoNear`
    GeoNear(GeoNear),
    /// `$graphLookup`
    GraphLookup(GraphLookup),
    /// `$group`: the group specification including `_id`.
    Group(Document),
    /// `$indexStats`
    IndexStats,
    /// `$limit`
    Limit(i64),
    /// `$lookup`
    Lookup(Lookup),
    /// `$match`
    Match(Document),
    /// `$merge`
    Merge(Merge),
    /// `$out`
    Out(OutTarget),
    /// `$project`
    Project(Document),
    /// `$redact`
    Redact(Bson),
    /// `$replaceRoot`
    ReplaceRoot(ReplaceRoot),
    /// `$replaceWith`
    ReplaceWith(Bson),
    /// `$sample`
    Sample(Sample),
    /// `$set`
    Set(Document),
    /// `$skip`
    Skip(i64),
    /// `$sort`
    Sort(Sort),
    /// `$sortByCount`
    SortByCount(Bson),
    /// `$unionWith`
    UnionWith(UnionWith),
    /// `$unset`
    Unset(Vec<String>),
    /// `$unwind`
    Unwind(Unwind),
    /// Any other stage, emitted exactly as given.
    Raw(Document),
}

impl Stage {
    /// The operator tag of this stage, e.g. `"$match"`.
    ///
    /// Raw stages report their first key, if any.
    pub fn operator(&self) -> Option<&str> {
        let tag = match self {
            Self::AddFields(_) => "$addFields",
            Self::Bucket(_) => "$bucket",
            Self::BucketAuto(_) => "$bucketAuto",
            Self::CollStats(_) => "$collStats",
            Self::Count(_) => "$count",
            Self::Facet(_) => "$facet",
            Self::GeoNear(_) => "$geoNear",
            Self::GraphLookup(_) => "$graphLookup",
            Self::Group(_) => "$group",
            Self::IndexStats => "$indexStats",
            Self::Limit(_) => "$limit",
            Self::Lookup(_) => "$lookup",
            Self::Match(_) => "$match",
            Self::Merge(_) => "$merge",
            Self::Out(_) => "$out",
            Self::Project(_) => "$project",
            Self::Redact(_) => "$redact",
            Self::ReplaceRoot(_) => "$replaceRoot",
            Self::ReplaceWith(_) => "$replaceWith",
            Self::Sample(_) => "$sample",
            Self::Set(_) => "$set",
            Self::Skip(_) => "$skip",
            Self::Sort(_) => "$sort",
            Self::SortByCount(_) => "$sortByCount",
            Self::UnionWith(_) => "$unionWith",
            Self::Unset(_) => "$unset",
            Self::Unwind(_) => "$unwind",
            Self::Raw(raw) => return raw.keys().next().map(String::as_str),
        };
        Some(tag)
    }

    /// Render this stage as a BSON document.
    pub fn to_document(&self) -> Document {
        Document::from(self.clone())
    }
}

impl From<Stage> for Document {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::AddFields(fields) => doc! { "$addFields": fields },
            Stage::Bucket(bucket) => doc! { "$bucket": Document::from(bucket) },
            Stage::BucketAuto(bucket) => doc! { "$bucketAuto": Document::from(bucket) },
            Stage::CollStats(options) => doc! { "$collStats": options },
            Stage::Count(field) => doc! { "$count": field },
            Stage::Facet(facet) => doc! { "$facet": Document::from(facet) },
            Stage::GeoNear(geo) => doc! { "$geoNear": Document::from(geo) },
            Stage::GraphLookup(lookup) => doc! { "$graphLookup": Document::from(lookup) },
            Stage::Group(group) => doc! { "$group": group },
            Stage::IndexStats => doc! { "$indexStats": {} },
            Stage::Limit(n) => doc! { "$limit": n },
            Stage::Lookup(lookup) => doc! { "$lookup": Document::from(lookup) },
            Stage::Match(filter) => doc! { "$match": filter },
            Stage::Merge(merge) => doc! { "$merge": Document::from(merge) },
            Stage::Out(target) => doc! { "$out": Bson::from(target) },
            Stage::Project(projection) => doc! { "$project": projection },
            Stage::Redact(expr) => doc! { "$redact": expr },
            Stage::ReplaceRoot(replace) => doc! { "$replaceRoot": { "newRoot": replace.new_root } },
            Stage::ReplaceWith(expr) => doc! { "$replaceWith": expr },
            Stage::Sample(sample) => doc! { "$sample": { "size": sample.size } },
            Stage::Set(fields) => doc! { "$set": fields },
            Stage::Skip(n) => doc! { "$skip": n },
            Stage::Sort(sort) => doc! { "$sort": Document::from(sort) },
            Stage::SortByCount(expr) => doc! { "$sortByCount": expr },
            Stage::UnionWith(union) => doc! { "$unionWith": Bson::from(union) },
            Stage::Unset(mut fields) => {
                if fields.len() == 1 {
                    doc! { "$unset": fields.remove(0) }
                } else {
                    doc! { "$unset": fields }
                }
            }
            Stage::Unwind(unwind) => doc! { "$unwind": Bson::from(unwind) },
            Stage::Raw(raw) => raw,
        }
    }
}

impl From<Document> for Stage {
    fn from(raw: Document) -> Self {
        Stage::Raw(raw)
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_document().serialize(serializer)
    }
}

fn stages_to_bson(stages: Vec<Stage>) -> Bson {
    Bson::Array(
        stages
            .into_iter()
            .map(|stage| Bson::Document(stage.into()))
            .collect(),
    )
}

/// Prefix a field name with `$` unless it already is a field path.
pub(crate) fn field_path(field: &str) -> String {
    if field.starts_with('$') {
        field.to_string()
    } else {
        format!("${}", field)
    }
}

/// An ordered sequence of stages.
///
/// Order is significant and the same operator may appear any number of times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Take ownership of the stages.
    pub fn into_stages(self) -> Vec<Stage> {
        self.stages
    }

    /// Render every stage as a BSON document.
    pub fn to_documents(&self) -> Vec<Document> {
        self.stages.iter().map(Stage::to_document).collect()
    }

    /// Consume the pipeline into the documents the driver expects.
    pub fn into_documents(self) -> Vec<Document> {
        self.into_iter().collect()
    }
}

impl From<Vec<Stage>> for Pipeline {
    fn from(stages: Vec<Stage>) -> Self {
        Self { stages }
    }
}

impl FromIterator<Stage> for Pipeline {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        Self {
            stages: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Pipeline {
    type Item = Document;
    type IntoIter = std::iter::Map<std::vec::IntoIter<Stage>, fn(Stage) -> Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.stages
            .into_iter()
            .map(<Document as From<Stage>>::from as fn(Stage) -> Document)
    }
}

impl Serialize for Pipeline {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.stages)
    }
}

/// `$lookup` payload.
///
/// Either the equality form (`localField`/`foreignField`), the sub-pipeline
/// form (`let`/`pipeline`), or both combined.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    /// Collection to join.
    pub from: String,
    /// Field of the input documents.
    pub local_field: Option<String>,
    /// Field of the joined documents.
    pub foreign_field: Option<String>,
    /// Variables made available to the sub-pipeline.
    pub let_vars: Option<Document>,
    /// Sub-pipeline run against the joined collection.
    pub pipeline: Option<Vec<Stage>>,
    /// Output array field.
    pub as_field: String,
}

impl Lookup {
    /// Equality join.
    pub fn new(
        from: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            local_field: Some(local_field.into()),
            foreign_field: Some(foreign_field.into()),
            let_vars: None,
            pipeline: None,
            as_field: as_field.into(),
        }
    }

    /// Join through a sub-pipeline.
    pub fn with_pipeline(
        from: impl Into<String>,
        pipeline: Vec<Stage>,
        as_field: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            local_field: None,
            foreign_field: None,
            let_vars: None,
            pipeline: Some(pipeline),
            as_field: as_field.into(),
        }
    }

    /// Set the `let` variables.
    pub fn let_vars(mut self, vars: Document) -> Self {
        self.let_vars = Some(vars);
        self
    }
}

impl From<Lookup> for Document {
    fn from(lookup: Lookup) -> Self {
        let mut out = doc! { "from": lookup.from };
        if let Some(local) = lookup.local_field {
            out.insert("localField", local);
        }
        if let Some(foreign) = lookup.foreign_field {
            out.insert("foreignField", foreign);
        }
        if let Some(vars) = lookup.let_vars {
            out.insert("let", vars);
        }
        if let Some(pipeline) = lookup.pipeline {
            out.insert("pipeline", stages_to_bson(pipeline));
        }
        out.insert("as", lookup.as_field);
        out
    }
}

/// `$facet` payload: named sub-pipelines, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Facet {
    facets: Vec<(String, Vec<Stage>)>,
}

impl Facet {
    /// Create an empty facet set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named sub-pipeline.
    pub fn facet(mut self, name: impl Into<String>, stages: Vec<Stage>) -> Self {
        self.facets.push((name.into(), stages));
        self
    }

    /// The facet names and their sub-pipelines.
    pub fn facets(&self) -> &[(String, Vec<Stage>)] {
        &self.facets
    }
}

impl From<Facet> for Document {
    fn from(facet: Facet) -> Self {
        facet
            .facets
            .into_iter()
            .map(|(name, stages)| (name, stages_to_bson(stages)))
            .collect()
    }
}

/// `$bucket` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    /// Expression to group by.
    pub group_by: Bson,
    /// Sorted bucket boundaries.
    pub boundaries: Vec<Bson>,
    /// Bucket id for values outside the boundaries.
    pub default: Option<Bson>,
    /// Accumulators computed per bucket.
    pub output: Option<Document>,
}

impl Bucket {
    /// Create a bucket stage payload.
    pub fn new<B: Into<Bson>>(group_by: impl Into<Bson>, boundaries: Vec<B>) -> Self {
        Self {
            group_by: group_by.into(),
            boundaries: boundaries.into_iter().map(Into::into).collect(),
            default: None,
            output: None,
        }
    }

    /// Set the default bucket.
    pub fn default_bucket(mut self, value: impl Into<Bson>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Set the output accumulators.
    pub fn output(mut self, output: Document) -> Self {
        self.output = Some(output);
        self
    }
}

impl From<Bucket> for Document {
    fn from(bucket: Bucket) -> Self {
        let mut out = doc! {
            "groupBy": bucket.group_by,
            "boundaries": bucket.boundaries,
        };
        if let Some(default) = bucket.default {
            out.insert("default", default);
        }
        if let Some(output) = bucket.output {
            out.insert("output", output);
        }
        out
    }
}

/// Preferred number series for `$bucketAuto` boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// Renard R5
    R5,
    /// Renard R10
    R10,
    /// Renard R20
    R20,
    /// Renard R40
    R40,
    /// Renard R80
    R80,
    /// 1-2-5 series
    Series125,
    /// E6
    E6,
    /// E12
    E12,
    /// E24
    E24,
    /// E48
    E48,
    /// E96
    E96,
    /// E192
    E192,
    /// Powers of two
    PowersOf2,
}

impl Granularity {
    /// The server spelling of this granularity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::R5 => "R5",
            Self::R10 => "R10",
            Self::R20 => "R20",
            Self::R40 => "R40",
            Self::R80 => "R80",
            Self::Series125 => "1-2-5",
            Self::E6 => "E6",
            Self::E12 => "E12",
            Self::E24 => "E24",
            Self::E48 => "E48",
            Self::E96 => "E96",
            Self::E192 => "E192",
            Self::PowersOf2 => "POWERSOF2",
        }
    }
}

/// `$bucketAuto` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketAuto {
    /// Expression to group by.
    pub group_by: Bson,
    /// Number of buckets.
    pub buckets: i32,
    /// Accumulators computed per bucket.
    pub output: Option<Document>,
    /// Boundary series.
    pub granularity: Option<Granularity>,
}

impl BucketAuto {
    /// Create a bucketAuto stage payload.
    pub fn new(group_by: impl Into<Bson>, buckets: i32) -> Self {
        Self {
            group_by: group_by.into(),
            buckets,
            output: None,
            granularity: None,
        }
    }

    /// Set the output accumulators.
    pub fn output(mut self, output: Document) -> Self {
        self.output = Some(output);
        self
    }

    /// Set the boundary series.
    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = Some(granularity);
        self
    }
}

impl From<BucketAuto> for Document {
    fn from(bucket: BucketAuto) -> Self {
        let mut out = doc! {
            "groupBy": bucket.group_by,
            "buckets": bucket.buckets,
        };
        if let Some(output) = bucket.output {
            out.insert("output", output);
        }
        if let Some(granularity) = bucket.granularity {
            out.insert("granularity", granularity.as_str());
        }
        out
    }
}

/// `$graphLookup` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphLookup {
    /// Collection to search.
    pub from: String,
    /// Expression the recursion starts from.
    pub start_with: Bson,
    /// Field whose value feeds the next recursion step.
    pub connect_from_field: String,
    /// Field matched against `connect_from_field`.
    pub connect_to_field: String,
    /// Output array field.
    pub as_field: String,
    /// Maximum recursion depth.
    pub max_depth: Option<i32>,
    /// Field recording the depth of each match.
    pub depth_field: Option<String>,
    /// Additional filter applied during the search.
    pub restrict_search_with_match: Option<Document>,
}

impl GraphLookup {
    /// Create a graphLookup stage payload.
    pub fn new(
        from: impl Into<String>,
        start_with: impl Into<Bson>,
        connect_from_field: impl Into<String>,
        connect_to_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            start_with: start_with.into(),
            connect_from_field: connect_from_field.into(),
            connect_to_field: connect_to_field.into(),
            as_field: as_field.into(),
            max_depth: None,
            depth_field: None,
            restrict_search_with_match: None,
        }
    }

    /// Limit the recursion depth.
    pub fn max_depth(mut self, depth: i32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Record the depth of each match in `field`.
    pub fn depth_field(mut self, field: impl Into<String>) -> Self {
        self.depth_field = Some(field.into());
        self
    }

    /// Restrict the recursive search.
    pub fn restrict_search_with_match(mut self, filter: Document) -> Self {
        self.restrict_search_with_match = Some(filter);
        self
    }
}

impl From<GraphLookup> for Document {
    fn from(lookup: GraphLookup) -> Self {
        let mut out = doc! {
            "from": lookup.from,
            "startWith": lookup.start_with,
            "connectFromField": lookup.connect_from_field,
            "connectToField": lookup.connect_to_field,
            "as": lookup.as_field,
        };
        if let Some(depth) = lookup.max_depth {
            out.insert("maxDepth", depth);
        }
        if let Some(field) = lookup.depth_field {
            out.insert("depthField", field);
        }
        if let Some(filter) = lookup.restrict_search_with_match {
            out.insert("restrictSearchWithMatch", filter);
        }
        out
    }
}

/// A point for `$geoNear`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeoPoint {
    /// GeoJSON point, for `2dsphere` indexes.
    GeoJson {
        /// Longitude in degrees.
        longitude: f64,
        /// Latitude in degrees.
        latitude: f64,
    },
    /// Legacy coordinate pair, for `2d` indexes.
    Legacy(f64, f64),
}

impl From<GeoPoint> for Bson {
    fn from(point: GeoPoint) -> Self {
        match point {
            GeoPoint::GeoJson {
                longitude,
                latitude,
            } => Bson::Document(doc! {
                "type": "Point",
                "coordinates": [longitude, latitude],
            }),
            GeoPoint::Legacy(x, y) => Bson::Array(vec![Bson::Double(x), Bson::Double(y)]),
        }
    }
}

/// `$geoNear` payload. `near` and `distance_field` are required.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoNear {
    /// Point to measure from.
    pub near: GeoPoint,
    /// Output field holding the computed distance.
    pub distance_field: String,
    /// Use spherical geometry.
    pub spherical: Option<bool>,
    /// Maximum distance.
    pub max_distance: Option<f64>,
    /// Minimum distance.
    pub min_distance: Option<f64>,
    /// Additional filter.
    pub query: Option<Document>,
    /// Output field holding the matched location.
    pub include_locs: Option<String>,
    /// Factor applied to every distance.
    pub distance_multiplier: Option<f64>,
    /// Geospatial index field to use.
    pub key: Option<String>,
}

impl GeoNear {
    /// Create a geoNear stage payload.
    pub fn new(near: GeoPoint, distance_field: impl Into<String>) -> Self {
        Self {
            near,
            distance_field: distance_field.into(),
            spherical: None,
            max_distance: None,
            min_distance: None,
            query: None,
            include_locs: None,
            distance_multiplier: None,
            key: None,
        }
    }

    /// Use spherical geometry.
    pub fn spherical(mut self, spherical: bool) -> Self {
        self.spherical = Some(spherical);
        self
    }

    /// Set the maximum distance.
    pub fn max_distance(mut self, distance: f64) -> Self {
        self.max_distance = Some(distance);
        self
    }

    /// Set the minimum distance.
    pub fn min_distance(mut self, distance: f64) -> Self {
        self.min_distance = Some(distance);
        self
    }

    /// Restrict candidates with a filter.
    pub fn query(mut self, filter: Document) -> Self {
        self.query = Some(filter);
        self
    }

    /// Record the matched location in `field`.
    pub fn include_locs(mut self, field: impl Into<String>) -> Self {
        self.include_locs = Some(field.into());
        self
    }

    /// Multiply every distance by `factor`.
    pub fn distance_multiplier(mut self, factor: f64) -> Self {
        self.distance_multiplier = Some(factor);
        self
    }

    /// Pick the geospatial index field.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl From<GeoNear> for Document {
    fn from(geo: GeoNear) -> Self {
        let mut out = doc! {
            "near": Bson::from(geo.near),
            "distanceField": geo.distance_field,
        };
        if let Some(spherical) = geo.spherical {
            out.insert("spherical", spherical);
        }
        if let Some(max) = geo.max_distance {
            out.insert("maxDistance", max);
        }
        if let Some(min) = geo.min_distance {
            out.insert("minDistance", min);
        }
        if let Some(query) = geo.query {
            out.insert("query", query);
        }
        if let Some(field) = geo.include_locs {
            out.insert("includeLocs", field);
        }
        if let Some(factor) = geo.distance_multiplier {
            out.insert("distanceMultiplier", factor);
        }
        if let Some(key) = geo.key {
            out.insert("key", key);
        }
        out
    }
}

/// Output collection of `$merge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeInto {
    /// A collection in the current database.
    Collection(String),
    /// A collection in another database.
    Namespace {
        /// Database name.
        db: String,
        /// Collection name.
        coll: String,
    },
}

impl From<&str> for MergeInto {
    fn from(coll: &str) -> Self {
        Self::Collection(coll.to_string())
    }
}

impl From<String> for MergeInto {
    fn from(coll: String) -> Self {
        Self::Collection(coll)
    }
}

/// Action when a document matches during `$merge`.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeAction {
    /// Replace the existing document.
    Replace,
    /// Keep the existing document.
    KeepExisting,
    /// Merge fields into the existing document.
    Merge,
    /// Fail the operation.
    Fail,
    /// Update the existing document with a pipeline.
    Pipeline(Vec<Stage>),
}

impl From<MergeAction> for Bson {
    fn from(action: MergeAction) -> Self {
        match action {
            MergeAction::Replace => Bson::from("replace"),
            MergeAction::KeepExisting => Bson::from("keepExisting"),
            MergeAction::Merge => Bson::from("merge"),
            MergeAction::Fail => Bson::from("fail"),
            MergeAction::Pipeline(stages) => stages_to_bson(stages),
        }
    }
}

/// Action when a document does not match during `$merge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeNotMatchedAction {
    /// Insert the new document.
    Insert,
    /// Discard the document.
    Discard,
    /// Fail the operation.
    Fail,
}

impl MergeNotMatchedAction {
    /// The server spelling of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Discard => "discard",
            Self::Fail => "fail",
        }
    }
}

/// `$merge` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    /// Output collection.
    pub into: MergeInto,
    /// Fields identifying a match.
    pub on: Option<Vec<String>>,
    /// Variables for a `whenMatched` pipeline.
    pub let_vars: Option<Document>,
    /// Action on match.
    pub when_matched: Option<MergeAction>,
    /// Action on no match.
    pub when_not_matched: Option<MergeNotMatchedAction>,
}

impl Merge {
    /// Merge into `into` with server defaults for everything else.
    pub fn new(into: impl Into<MergeInto>) -> Self {
        Self {
            into: into.into(),
            on: None,
            let_vars: None,
            when_matched: None,
            when_not_matched: None,
        }
    }

    /// Set the match fields.
    pub fn on<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.on = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Set the `let` variables.
    pub fn let_vars(mut self, vars: Document) -> Self {
        self.let_vars = Some(vars);
        self
    }

    /// Set the action on match.
    pub fn when_matched(mut self, action: MergeAction) -> Self {
        self.when_matched = Some(action);
        self
    }

    /// Set the action on no match.
    pub fn when_not_matched(mut self, action: MergeNotMatchedAction) -> Self {
        self.when_not_matched = Some(action);
        self
    }
}

impl From<Merge> for Document {
    fn from(merge: Merge) -> Self {
        let into = match merge.into {
            MergeInto::Collection(coll) => Bson::String(coll),
            MergeInto::Namespace { db, coll } => Bson::Document(doc! { "db": db, "coll": coll }),
        };
        let mut out = doc! { "into": into };
        if let Some(on) = merge.on {
            if on.len() == 1 {
                out.insert("on", on.into_iter().next().unwrap_or_default());
            } else {
                out.insert("on", on);
            }
        }
        if let Some(vars) = merge.let_vars {
            out.insert("let", vars);
        }
        if let Some(action) = merge.when_matched {
            out.insert("whenMatched", Bson::from(action));
        }
        if let Some(action) = merge.when_not_matched {
            out.insert("whenNotMatched", action.as_str());
        }
        out
    }
}

/// Output of `$out`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutTarget {
    /// A collection in the current database.
    Collection(String),
    /// A collection in another database.
    Namespace {
        /// Database name.
        db: String,
        /// Collection name.
        coll: String,
    },
}

impl From<&str> for OutTarget {
    fn from(coll: &str) -> Self {
        Self::Collection(coll.to_string())
    }
}

impl From<String> for OutTarget {
    fn from(coll: String) -> Self {
        Self::Collection(coll)
    }
}

impl From<OutTarget> for Bson {
    fn from(target: OutTarget) -> Self {
        match target {
            OutTarget::Collection(coll) => Bson::String(coll),
            OutTarget::Namespace { db, coll } => Bson::Document(doc! { "db": db, "coll": coll }),
        }
    }
}

/// `$replaceRoot` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceRoot {
    /// Expression evaluating to the new root document.
    pub new_root: Bson,
}

impl ReplaceRoot {
    /// Replace the root with `new_root`.
    pub fn new(new_root: impl Into<Bson>) -> Self {
        Self {
            new_root: new_root.into(),
        }
    }
}

/// `$sample` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Number of documents to pick.
    pub size: i64,
}

/// Direction of one `$sort` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// `1`
    Ascending,
    /// `-1`
    Descending,
    /// `{ $meta: "textScore" }`
    TextScore,
}

impl From<SortOrder> for Bson {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::Ascending => Bson::Int32(1),
            SortOrder::Descending => Bson::Int32(-1),
            SortOrder::TextScore => Bson::Document(doc! { "$meta": "textScore" }),
        }
    }
}

/// `$sort` payload: ordered sort keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sort {
    keys: Vec<(String, SortOrder)>,
}

impl Sort {
    /// Create an empty sort specification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sort key.
    pub fn by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.keys.push((field.into(), order));
        self
    }

    /// Sort ascending on `field`.
    pub fn ascending(self, field: impl Into<String>) -> Self {
        self.by(field, SortOrder::Ascending)
    }

    /// Sort descending on `field`.
    pub fn descending(self, field: impl Into<String>) -> Self {
        self.by(field, SortOrder::Descending)
    }

    /// Sort by text search score, stored in `field`.
    pub fn text_score(self, field: impl Into<String>) -> Self {
        self.by(field, SortOrder::TextScore)
    }

    /// The sort keys in priority order.
    pub fn keys(&self) -> &[(String, SortOrder)] {
        &self.keys
    }
}

impl From<Sort> for Document {
    fn from(sort: Sort) -> Self {
        sort.keys
            .into_iter()
            .map(|(field, order)| (field, Bson::from(order)))
            .collect()
    }
}

/// `$unionWith` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionWith {
    /// Collection whose documents are appended.
    pub coll: String,
    /// Pipeline applied to that collection first.
    pub pipeline: Option<Vec<Stage>>,
}

impl UnionWith {
    /// Union with every document of `coll`.
    pub fn new(coll: impl Into<String>) -> Self {
        Self {
            coll: coll.into(),
            pipeline: None,
        }
    }

    /// Run `pipeline` on `coll` before the union.
    pub fn pipeline(mut self, pipeline: Vec<Stage>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }
}

impl From<UnionWith> for Bson {
    fn from(union: UnionWith) -> Self {
        match union.pipeline {
            None => Bson::String(union.coll),
            Some(pipeline) => Bson::Document(doc! {
                "coll": union.coll,
                "pipeline": stages_to_bson(pipeline),
            }),
        }
    }
}

/// `$unwind` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwind {
    /// Array field path, always `$`-prefixed.
    pub path: String,
    /// Field receiving the array index.
    pub include_array_index: Option<String>,
    /// Keep documents whose array is missing, null or empty.
    pub preserve_null_and_empty_arrays: Option<bool>,
}

impl Unwind {
    /// Unwind `field`; a missing `$` prefix is added.
    pub fn new(field: &str) -> Self {
        Self {
            path: field_path(field),
            include_array_index: None,
            preserve_null_and_empty_arrays: None,
        }
    }

    /// Record the array index in `field`.
    pub fn include_array_index(mut self, field: impl Into<String>) -> Self {
        self.include_array_index = Some(field.into());
        self
    }

    /// Keep documents without array elements.
    pub fn preserve_null_and_empty_arrays(mut self, preserve: bool) -> Self {
        self.preserve_null_and_empty_arrays = Some(preserve);
        self
    }
}

impl From<&str> for Unwind {
    fn from(field: &str) -> Self {
        Self::new(field)
    }
}

impl From<String> for Unwind {
    fn from(field: String) -> Self {
        Self::new(&field)
    }
}

impl From<Unwind> for Bson {
    fn from(unwind: Unwind) -> Self {
        if unwind.include_array_index.is_none() && unwind.preserve_null_and_empty_arrays.is_none() {
            return Bson::String(unwind.path);
        }
        let mut out = doc! { "path": unwind.path };
        if let Some(field) = unwind.include_array_index {
            out.insert("includeArrayIndex", field);
        }
        if let Some(preserve) = unwind.preserve_null_and_empty_arrays {
            out.insert("preserveNullAndEmptyArrays", preserve);
        }
        Bson::Document(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_every_stage_has_one_key() {
        let stages = vec![
            Stage::AddFields(doc! { "a": 1 }),
            Stage::Bucket(Bucket::new("$price", vec![0, 100, 200]).default_bucket("other")),
            Stage::BucketAuto(BucketAuto::new("$price", 4).granularity(Granularity::R5)),
            Stage::CollStats(doc! { "count": {} }),
            Stage::Count("total".into()),
            Stage::Facet(Facet::new().facet("by_tag", vec![Stage::SortByCount("$tag".into())])),
            Stage::GeoNear(GeoNear::new(GeoPoint::Legacy(1.0, 2.0), "dist")),
            Stage::GraphLookup(GraphLookup::new("people", "$boss", "boss", "name", "chain")),
            Stage::Group(doc! { "_id": "$kind" }),
            Stage::IndexStats,
            Stage::Limit(3),
            Stage::Lookup(Lookup::new("b", "b_id", "_id", "b")),
            Stage::Match(doc! { "x": 1 }),
            Stage::Merge(Merge::new("out")),
            Stage::Out("archive".into()),
            Stage::Project(doc! { "x": 1 }),
            Stage::Redact("$$KEEP".into()),
            Stage::ReplaceRoot(ReplaceRoot::new("$inner")),
            Stage::ReplaceWith("$inner".into()),
            Stage::Sample(Sample { size: 5 }),
            Stage::Set(doc! { "y": 2 }),
            Stage::Skip(1),
            Stage::Sort(Sort::new().ascending("x")),
            Stage::SortByCount("$x".into()),
            Stage::UnionWith(UnionWith::new("other")),
            Stage::Unset(vec!["a".into(), "b".into()]),
            Stage::Unwind(Unwind::new("items")),
        ];

        for stage in stages {
            let operator = stage.operator().map(str::to_string);
            let rendered = stage.to_document();
            assert_eq!(rendered.len(), 1, "{:?}", rendered);
            assert_eq!(rendered.keys().next().cloned(), operator);
        }
    }

    #[test]
    fn test_raw_stage_passthrough() {
        let raw = doc! { "$densify": { "field": "ts", "range": { "step": 1, "bounds": "full" } } };
        let stage = Stage::from(raw.clone());
        assert_eq!(stage.operator(), Some("$densify"));
        assert_eq!(stage.to_document(), raw);
    }

    #[test]
    fn test_lookup_forms() {
        let equality = Document::from(Lookup::new("orders", "_id", "user_id", "orders"));
        assert_eq!(
            equality,
            doc! { "from": "orders", "localField": "_id", "foreignField": "user_id", "as": "orders" }
        );

        let sub = Lookup::with_pipeline(
            "orders",
            vec![Stage::Match(doc! { "$expr": { "$eq": ["$user_id", "$$uid"] } })],
            "orders",
        )
        .let_vars(doc! { "uid": "$_id" });
        let sub = Document::from(sub);
        assert!(sub.contains_key("let"));
        assert_eq!(sub.get_array("pipeline").unwrap().len(), 1);
        assert!(!sub.contains_key("localField"));
    }

    #[test]
    fn test_merge_when_matched_pipeline() {
        let merge = Merge::new(MergeInto::Namespace {
            db: "reporting".into(),
            coll: "totals".into(),
        })
        .on(["day"])
        .when_matched(MergeAction::Pipeline(vec![Stage::Set(
            doc! { "total": { "$add": ["$total", "$$new.total"] } },
        )]))
        .when_not_matched(MergeNotMatchedAction::Insert);

        let rendered = Document::from(merge);
        assert_eq!(
            rendered.get_document("into").unwrap(),
            &doc! { "db": "reporting", "coll": "totals" }
        );
        assert_eq!(rendered.get_str("on").unwrap(), "day");
        assert_eq!(rendered.get_array("whenMatched").unwrap().len(), 1);
        assert_eq!(rendered.get_str("whenNotMatched").unwrap(), "insert");
    }

    #[test]
    fn test_geo_near_point() {
        let geo = GeoNear::new(
            GeoPoint::GeoJson {
                longitude: -73.99,
                latitude: 40.73,
            },
            "distance",
        )
        .spherical(true)
        .max_distance(500.0);

        let rendered = Document::from(geo);
        let near = rendered.get_document("near").unwrap();
        assert_eq!(near.get_str("type").unwrap(), "Point");
        assert_eq!(rendered.get_str("distanceField").unwrap(), "distance");
        assert_eq!(rendered.get_bool("spherical").unwrap(), true);
    }

    #[test]
    fn test_unwind_short_and_long_form() {
        assert_eq!(Bson::from(Unwind::new("tags")), Bson::String("$tags".into()));
        assert_eq!(Bson::from(Unwind::new("$tags")), Bson::String("$tags".into()));

        let long = Bson::from(Unwind::new("tags").preserve_null_and_empty_arrays(true));
        assert_eq!(
            long,
            Bson::Document(doc! { "path": "$tags", "preserveNullAndEmptyArrays": true })
        );
    }

    #[test]
    fn test_sort_keeps_key_order() {
        let sort = Document::from(Sort::new().descending("score").ascending("name"));
        let keys: Vec<_> = sort.keys().cloned().collect();
        assert_eq!(keys, vec!["score".to_string(), "name".to_string()]);
        assert_eq!(sort.get_i32("score").unwrap(), -1);
    }

    #[test]
    fn test_pipeline_serializes_as_array() {
        let pipeline: Pipeline = vec![Stage::Limit(1), Stage::Skip(2)].into();
        let json = serde_json::to_value(&pipeline).unwrap();
        assert_eq!(json, serde_json::json!([{ "$limit": 1 }, { "$skip": 2 }]));
    }
}

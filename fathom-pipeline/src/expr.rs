//! Expression helpers for stage payloads.
//!
//! These build the operator documents that show up inside `$project`,
//! `$group`, `$addFields` and friends. They return [`Bson`] so they can be
//! dropped straight into a `doc!` literal.

use bson::{Bson, doc};

/// A field path expression, `"$name"`.
pub fn field(name: &str) -> Bson {
    Bson::String(crate::stage::field_path(name))
}

/// `$mergeObjects` over the given expressions.
pub fn merge_objects<I, B>(objects: I) -> Bson
where
    I: IntoIterator<Item = B>,
    B: Into<Bson>,
{
    let objects: Vec<Bson> = objects.into_iter().map(Into::into).collect();
    Bson::Document(doc! { "$mergeObjects": objects })
}

/// `$concatArrays` over the given array expressions.
pub fn concat_arrays<I, B>(arrays: I) -> Bson
where
    I: IntoIterator<Item = B>,
    B: Into<Bson>,
{
    let arrays: Vec<Bson> = arrays.into_iter().map(Into::into).collect();
    Bson::Document(doc! { "$concatArrays": arrays })
}

/// `$arrayToObject` of an array expression.
pub fn array_to_object(array: impl Into<Bson>) -> Bson {
    Bson::Document(doc! { "$arrayToObject": array.into() })
}

/// `$map` over `input`, binding each element to `$$as_var` inside `body`.
pub fn map(input: impl Into<Bson>, as_var: &str, body: impl Into<Bson>) -> Bson {
    Bson::Document(doc! {
        "$map": {
            "input": input.into(),
            "as": as_var,
            "in": body.into(),
        }
    })
}

/// Accumulators for `$group`, `$bucket` and `$bucketAuto` outputs.
pub mod accumulators {
    use bson::{Bson, doc};

    /// `$sum`
    pub fn sum(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$sum": expr.into() })
    }

    /// `$avg`
    pub fn avg(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$avg": expr.into() })
    }

    /// `$min`
    pub fn min(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$min": expr.into() })
    }

    /// `$max`
    pub fn max(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$max": expr.into() })
    }

    /// `$first`
    pub fn first(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$first": expr.into() })
    }

    /// `$last`
    pub fn last(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$last": expr.into() })
    }

    /// `$push`
    pub fn push(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$push": expr.into() })
    }

    /// `$addToSet`
    pub fn add_to_set(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$addToSet": expr.into() })
    }

    /// Count of documents, `{ $sum: 1 }`.
    pub fn count() -> Bson {
        sum(1)
    }
}

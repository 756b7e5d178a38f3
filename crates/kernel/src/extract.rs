//! axum extractors for filters and sorting.
//!
//! A schema type names the resolver an endpoint uses:
//!
//! ```ignore
//! struct UserFilters;
//!
//! impl FilterSchema for UserFilters {
//!     fn resolver() -> &'static FilterResolver {
//!         static RESOLVER: LazyLock<FilterResolver> = LazyLock::new(build_user_filters);
//!         &RESOLVER
//!     }
//! }
//!
//! async fn list_users(filters: Filters<UserFilters>) -> impl IntoResponse { ... }
//! ```
//!
//! Invalid parameters reject the request with [`ValidationErrors`] (422).

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ValidationErrors;
use crate::filter::{FilterResolver, FilterValues, QueryParams};
use crate::sorting::{SortValues, SortingResolver};

/// Supplies the filter resolver for [`Filters`].
pub trait FilterSchema: Send + Sync + 'static {
    fn resolver() -> &'static FilterResolver;
}

/// Supplies the sorting resolver for [`Sorting`].
pub trait SortSchema: Send + Sync + 'static {
    fn resolver() -> &'static SortingResolver;
}

fn query_params(parts: &Parts) -> QueryParams {
    QueryParams::parse(parts.uri.query().unwrap_or_default())
}

/// Resolved filters of schema `S`.
pub struct Filters<S> {
    values: FilterValues,
    _schema: PhantomData<fn() -> S>,
}

impl<S> Filters<S> {
    pub fn into_inner(self) -> FilterValues {
        self.values
    }
}

impl<S> fmt::Debug for Filters<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Filters").field(&self.values).finish()
    }
}

impl<S> Deref for Filters<S> {
    type Target = FilterValues;

    fn deref(&self) -> &FilterValues {
        &self.values
    }
}

impl<S> DerefMut for Filters<S> {
    fn deref_mut(&mut self) -> &mut FilterValues {
        &mut self.values
    }
}

impl<St, S> FromRequestParts<St> for Filters<S>
where
    St: Send + Sync,
    S: FilterSchema,
{
    type Rejection = ValidationErrors;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        let values = S::resolver().resolve(&query_params(parts))?;
        Ok(Self {
            values,
            _schema: PhantomData,
        })
    }
}

/// Resolved sort keys of schema `S`.
pub struct Sorting<S> {
    values: SortValues,
    _schema: PhantomData<fn() -> S>,
}

impl<S> Sorting<S> {
    pub fn into_inner(self) -> SortValues {
        self.values
    }
}

impl<S> fmt::Debug for Sorting<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sorting").field(&self.values).finish()
    }
}

impl<S> Deref for Sorting<S> {
    type Target = SortValues;

    fn deref(&self) -> &SortValues {
        &self.values
    }
}

impl<St, S> FromRequestParts<St> for Sorting<S>
where
    St: Send + Sync,
    S: SortSchema,
{
    type Rejection = ValidationErrors;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        let values = S::resolver().resolve(&query_params(parts))?;
        Ok(Self {
            values,
            _schema: PhantomData,
        })
    }
}

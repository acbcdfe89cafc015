//! Candidate filter: tutors whose catalog matches a query.

use std::collections::BTreeSet;
use tutor_booking_core::{
    DeliveryMode, PriceRange, Result, SubjectKey, TutorId, TutorListing, UserDirectory,
};

/// What a student is looking for, before time availability is considered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateQuery {
    /// Subject, grade and specialization, matched exactly
    pub subject: SubjectKey,
    /// Acceptable price, inclusive
    pub price_range: PriceRange,
    /// Requested delivery mode
    pub mode: DeliveryMode,
}

/// Whether `listing` satisfies `query`: the tutor teaches in the requested mode
/// and has an offering with the exact key priced within range.
#[must_use]
pub fn is_candidate(listing: &TutorListing, query: &CandidateQuery) -> bool {
    listing.delivery_modes.supports(query.mode)
        && listing
            .offerings
            .iter()
            .any(|offering| {
                offering.key == query.subject && query.price_range.contains(offering.price)
            })
}

/// Active tutors matching `query`.
///
/// # Errors
///
/// Propagates directory failures.
#[tracing::instrument(skip(directory), fields(subject = %query.subject, mode = %query.mode))]
pub async fn find_candidates(
    directory: &dyn UserDirectory,
    query: &CandidateQuery,
) -> Result<BTreeSet<TutorId>> {
    let candidates: BTreeSet<TutorId> = directory
        .active_tutors_by_subject(&query.subject)
        .await?
        .into_iter()
        .filter(|listing| is_candidate(listing, query))
        .map(|listing| listing.tutor_id)
        .collect();
    tracing::debug!(count = candidates.len(), "candidates found");
    Ok(candidates)
}

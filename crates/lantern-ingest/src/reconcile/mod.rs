//! Conflict resolution between a stored product and an incoming observation
//!
//! [`resolve`] applies a fixed precedence chain and never guesses: when the
//! chain is exhausted without a winner the conflict is reported as
//! [`Resolution::Unresolvable`] and left for a human.
//!
//! 1. Equal core fields: nothing to do.
//! 2. Certification edition, as an integer year. Higher wins.
//! 3. Certification date. Later wins.
//! 4. Number of certification criteria. More wins.
//! 5. Same count: differing criteria, or a difference in a field the chain
//!    does not rank, is ambiguous.

use thiserror::Error;

use crate::models::{same_criteria, ProductRecord};

/// Decision for one incoming record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Existing record stays as is
    NoChange,
    /// Incoming record replaces the stored attributes
    Overwrite,
    /// The precedence chain could not pick a winner
    Unresolvable(Ambiguity),
}

/// Why the precedence chain could not decide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ambiguity {
    /// Same criteria count but different criteria
    CriteriaDiffer,
    /// Edition, date and criteria all equal yet the records differ
    UntrackedFieldDiffers,
}

impl Ambiguity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CriteriaDiffer => "same number but unequal certification criteria",
            Self::UntrackedFieldDiffers => "edition, date, and criteria lists are equal",
        }
    }
}

impl std::fmt::Display for Ambiguity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// A certification edition is not an integer year
    #[error("certification edition '{value}' of {side} record is not a year")]
    Edition { side: Side, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Existing,
    Incoming,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Existing => f.write_str("existing"),
            Side::Incoming => f.write_str("incoming"),
        }
    }
}

fn edition_year(record: &ProductRecord, side: Side) -> Result<i32, ResolveError> {
    record
        .certification_edition
        .parse()
        .map_err(|_| ResolveError::Edition {
            side,
            value: record.certification_edition.clone(),
        })
}

/// Decide whether `incoming` should replace `existing`.
///
/// Pure; both editions are parsed before any ranking so a malformed edition
/// on either side always fails, whatever the other fields say.
pub fn resolve(existing: &ProductRecord, incoming: &ProductRecord) -> Result<Resolution, ResolveError> {
    if existing.core_eq(incoming) {
        return Ok(Resolution::NoChange);
    }

    let existing_edition = edition_year(existing, Side::Existing)?;
    let incoming_edition = edition_year(incoming, Side::Incoming)?;

    if incoming_edition != existing_edition {
        return Ok(winner(incoming_edition > existing_edition));
    }

    if incoming.certification_date != existing.certification_date {
        return Ok(winner(incoming.certification_date > existing.certification_date));
    }

    let existing_count = existing.certification_criteria.len();
    let incoming_count = incoming.certification_criteria.len();
    if incoming_count != existing_count {
        return Ok(winner(incoming_count > existing_count));
    }

    if !same_criteria(&existing.certification_criteria, &incoming.certification_criteria) {
        return Ok(Resolution::Unresolvable(Ambiguity::CriteriaDiffer));
    }

    Ok(Resolution::Unresolvable(Ambiguity::UntrackedFieldDiffers))
}

fn winner(incoming_wins: bool) -> Resolution {
    if incoming_wins {
        Resolution::Overwrite
    } else {
        Resolution::NoChange
    }
}

//! Referral graph primitives.
//!
//! The referrer relation is a weak back-reference: a user only knows the id of
//! whoever referred them. Walking it is always bounded, either by
//! `MAX_LEVELS` or by a visited set, so a corrupted graph cannot loop.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::fmt;
use std::hash::BuildHasher;

use crate::error::ReferralError;
use crate::rates::MAX_LEVELS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only access to the referrer relation.
pub trait ReferrerLookup {
    type Error;

    fn get_referrer(&self, user: UserId) -> Result<Option<UserId>, Self::Error>;
}

impl<S: BuildHasher> ReferrerLookup for HashMap<UserId, UserId, S> {
    type Error = Infallible;

    fn get_referrer(&self, user: UserId) -> Result<Option<UserId>, Self::Error> {
        Ok(self.get(&user).copied())
    }
}

/// Ancestors of `purchaser`, nearest first, at most `MAX_LEVELS` long.
///
/// Stops at the first user without a referrer, and at any user already seen
/// (the purchaser included), so nobody is paid twice for one event.
pub fn referrer_chain<L>(lookup: &L, purchaser: UserId) -> Result<Vec<UserId>, L::Error>
where
    L: ReferrerLookup + ?Sized,
{
    let mut chain = Vec::with_capacity(MAX_LEVELS);
    let mut current = purchaser;
    while chain.len() < MAX_LEVELS {
        match lookup.get_referrer(current)? {
            Some(next) if next != purchaser && !chain.contains(&next) => {
                chain.push(next);
                current = next;
            }
            _ => break,
        }
    }
    Ok(chain)
}

/// Whether making `referrer` the referrer of `user` would close a loop,
/// i.e. `user` is `referrer` or one of its ancestors.
pub fn creates_cycle<L>(lookup: &L, user: UserId, referrer: UserId) -> Result<bool, L::Error>
where
    L: ReferrerLookup + ?Sized,
{
    let mut seen = HashSet::new();
    let mut current = Some(referrer);
    while let Some(id) = current {
        if id == user {
            return Ok(true);
        }
        if !seen.insert(id) {
            // Pre-existing loop that does not pass through `user`.
            return Ok(false);
        }
        current = lookup.get_referrer(id)?;
    }
    Ok(false)
}

/// In-memory referral graph that keeps the referrer relation acyclic.
#[derive(Debug, Clone, Default)]
pub struct ReferralGraph {
    referrers: HashMap<UserId, Option<UserId>>,
}

impl ReferralGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.referrers.contains_key(&user)
    }

    pub fn len(&self) -> usize {
        self.referrers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.referrers.is_empty()
    }

    /// Add a user, optionally referred by an existing one.
    pub fn add_user(
        &mut self,
        user: UserId,
        referrer: Option<UserId>,
    ) -> Result<(), ReferralError> {
        if self.contains(user) {
            return Err(ReferralError::DuplicateUser(user));
        }
        if let Some(referrer) = referrer {
            if referrer == user {
                return Err(ReferralError::Cycle { user, referrer });
            }
            if !self.contains(referrer) {
                return Err(ReferralError::UnknownUser(referrer));
            }
        }
        self.referrers.insert(user, referrer);
        Ok(())
    }

    /// Re-point (or clear) a user's referrer.
    pub fn set_referrer(
        &mut self,
        user: UserId,
        referrer: Option<UserId>,
    ) -> Result<(), ReferralError> {
        if !self.contains(user) {
            return Err(ReferralError::UnknownUser(user));
        }
        if let Some(referrer) = referrer {
            if !self.contains(referrer) {
                return Err(ReferralError::UnknownUser(referrer));
            }
            let cycle = match creates_cycle(&*self, user, referrer) {
                Ok(cycle) => cycle,
                Err(never) => match never {},
            };
            if cycle {
                return Err(ReferralError::Cycle { user, referrer });
            }
        }
        self.referrers.insert(user, referrer);
        Ok(())
    }

    /// Users directly referred by `user`, in id order.
    pub fn children(&self, user: UserId) -> Vec<UserId> {
        let mut out: Vec<UserId> = self
            .referrers
            .iter()
            .filter(|(_, referrer)| **referrer == Some(user))
            .map(|(id, _)| *id)
            .collect();
        out.sort();
        out
    }
}

impl ReferrerLookup for ReferralGraph {
    type Error = Infallible;

    fn get_referrer(&self, user: UserId) -> Result<Option<UserId>, Self::Error> {
        Ok(self.referrers.get(&user).copied().flatten())
    }
}

//! Referral Tree
//!
//! Downline view of a user: everyone they referred, directly or through
//! others, down to the deepest commission level.

use anyhow::Result;
use commission_core::{Amount, UserId, MAX_LEVELS};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::ledger::{LedgerStore, User};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralNode {
    pub user: UserId,
    pub username: String,
    /// 1 for a direct referral
    pub level: u8,
    pub children: Vec<ReferralNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralTree {
    pub root: UserId,
    pub referrals: Vec<ReferralNode>,
}

/// Referral dashboard numbers for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralSummary {
    pub user: UserId,
    pub direct_referrals: usize,
    pub level_counts: [usize; MAX_LEVELS],
    pub total_referrals: usize,
    pub total_earned: Amount,
}

impl ReferralTree {
    /// Number of referrals at each depth, index 0 being direct referrals.
    pub fn level_counts(&self) -> [usize; MAX_LEVELS] {
        let mut counts = [0; MAX_LEVELS];
        let mut stack: Vec<&ReferralNode> = self.referrals.iter().collect();
        while let Some(node) = stack.pop() {
            let idx = (node.level as usize).wrapping_sub(1);
            if idx < MAX_LEVELS {
                counts[idx] += 1;
            }
            stack.extend(node.children.iter());
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.level_counts().iter().sum()
    }

    /// Indented text rendering, one user per line.
    pub fn render(&self) -> String {
        fn walk(nodes: &[ReferralNode], out: &mut String) {
            for node in nodes {
                out.push_str(&format!(
                    "{}└─ L{} #{} {}\n",
                    "   ".repeat(node.level.saturating_sub(1) as usize),
                    node.level,
                    node.user,
                    node.username
                ));
                walk(&node.children, out);
            }
        }

        let mut out = format!("Referral tree of user {}\n", self.root);
        if self.referrals.is_empty() {
            out.push_str("   (no referrals)\n");
        }
        walk(&self.referrals, &mut out);
        out
    }
}

/// Build the downline of `root`, `MAX_LEVELS` deep, one store query per user.
pub async fn build_tree(store: &dyn LedgerStore, root: UserId) -> Result<ReferralTree> {
    let mut children: HashMap<UserId, Vec<User>> = HashMap::new();
    let mut seen = HashSet::from([root]);
    let mut frontier = vec![root];

    for _ in 0..MAX_LEVELS {
        let mut next = Vec::new();
        for parent in frontier {
            let direct: Vec<User> = store
                .direct_referrals(parent)
                .await?
                .into_iter()
                .filter(|u| seen.insert(u.id))
                .collect();
            next.extend(direct.iter().map(|u| u.id));
            children.insert(parent, direct);
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    Ok(ReferralTree {
        root,
        referrals: assemble(root, 1, &mut children),
    })
}

fn assemble(
    parent: UserId,
    level: u8,
    children: &mut HashMap<UserId, Vec<User>>,
) -> Vec<ReferralNode> {
    children
        .remove(&parent)
        .unwrap_or_default()
        .into_iter()
        .map(|user| ReferralNode {
            user: user.id,
            level,
            children: assemble(user.id, level + 1, children),
            username: user.username,
        })
        .collect()
}

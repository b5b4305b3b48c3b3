//! Automatic tier selection
//!
//! Placement is a pure function of the serialized payload size and the
//! caller's declared scope, so the same inputs always land in the same tier.

use larder_cache::Tier;
use serde::{Deserialize, Serialize};

/// Lifetime the caller expects for a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Worth keeping across sessions
    #[default]
    Shared,
    /// Only meaningful for the running session (session state, scratch data)
    Session,
}

/// Size boundaries used by [`select_tier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionThresholds {
    /// Payloads above this go to the document tier
    pub large_bytes: usize,
    /// Payloads below this go to the memory tier
    pub small_bytes: usize,
}

impl Default for SelectionThresholds {
    fn default() -> Self {
        Self {
            large_bytes: 100 * 1024,
            small_bytes: 10 * 1024,
        }
    }
}

/// Pick the tier for a payload of `size` bytes.
///
/// Checked in order: large payloads go to [`Tier::Document`], session-scoped
/// values to [`Tier::Session`], small payloads to [`Tier::Memory`], and
/// everything else to [`Tier::Persistent`].
pub fn select_tier(size: usize, scope: Scope, thresholds: &SelectionThresholds) -> Tier {
    if size > thresholds.large_bytes {
        Tier::Document
    } else if scope == Scope::Session {
        Tier::Session
    } else if size < thresholds.small_bytes {
        Tier::Memory
    } else {
        Tier::Persistent
    }
}

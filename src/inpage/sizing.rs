//! Overlay sizing decision.
//!
//! [`decide`] maps the tab's vault slice and the current field values to
//! whether the overlay should be drawn, erased or left alone, and how tall
//! its frame should be. It reads nothing but its argument.
//!
//! | Condition | Result |
//! |-----------|--------|
//! | Locked, focus or toggle | Draw the unlock prompt |
//! | Locked, value change | Nothing |
//! | Value change with both fields empty | Erase |
//! | Items match the typed username | Draw the list |
//! | No items for the site, or a password was typed | Draw the save prompt |
//! | Otherwise | Erase |

use serde::Serialize;

use crate::protocol::{ActiveField, StateSlice, ValtState, VaultItem};

/// Frame height of the unlock prompt.
pub const LOCKED_HEIGHT: u32 = 180;

/// Frame height of the save prompt.
pub const SAVE_PROMPT_HEIGHT: u32 = 216;

/// Header height of the item list.
pub const LIST_HEADER_HEIGHT: u32 = 40;

/// Height of one item row.
pub const ROW_HEIGHT: u32 = 48;

/// Rows shown before the list scrolls.
pub const MAX_VISIBLE_ROWS: u32 = 4;

// ============================================================================
// Types
// ============================================================================

/// What prompted the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizingTrigger {
    /// A login field gained focus.
    Focus,
    /// The injected button was clicked.
    Toggle,
    /// Field values changed (debounced).
    ValueChanged,
}

/// Combined decision input: the tab's vault slice and the current values.
#[derive(Debug, Clone, Copy)]
pub struct SizingParams<'a> {
    /// Vault slice for the page hostname.
    pub slice: &'a StateSlice,
    /// Current field values.
    pub valt: &'a ValtState,
    /// Triggering event.
    pub trigger: SizingTrigger,
}

/// Overlay action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElemType {
    /// Draw or resize the overlay.
    Drawing,
    /// Remove the overlay.
    Erase,
    /// Leave the overlay as it is.
    None,
}

/// Which overlay view the decision selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizingTag {
    /// Vault is locked.
    Locked,
    /// Both fields were cleared.
    Cleared,
    /// Item list.
    Matched,
    /// Offer to save the typed credential.
    SavePrompt,
    /// Typed username matches nothing and no password yet.
    NoCandidate,
}

/// Result of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizingDecision {
    /// Overlay action.
    pub elem_type: ElemType,
    /// Frame height; zero unless drawing.
    pub ifr_height: u32,
    /// Selected view.
    pub tag: SizingTag,
}

impl SizingDecision {
    const fn drawing(ifr_height: u32, tag: SizingTag) -> Self {
        Self {
            elem_type: ElemType::Drawing,
            ifr_height,
            tag,
        }
    }

    const fn erase(tag: SizingTag) -> Self {
        Self {
            elem_type: ElemType::Erase,
            ifr_height: 0,
            tag,
        }
    }
}

// ============================================================================
// Decision
// ============================================================================

/// Decides the overlay action for `params`.
#[must_use]
pub fn decide(params: &SizingParams<'_>) -> SizingDecision {
    let SizingParams {
        slice,
        valt,
        trigger,
    } = *params;

    if !slice.is_unlocked {
        return match trigger {
            SizingTrigger::Focus | SizingTrigger::Toggle => {
                SizingDecision::drawing(LOCKED_HEIGHT, SizingTag::Locked)
            }
            SizingTrigger::ValueChanged => SizingDecision {
                elem_type: ElemType::None,
                ifr_height: 0,
                tag: SizingTag::Locked,
            },
        };
    }

    if trigger == SizingTrigger::ValueChanged && valt.is_blank() {
        return SizingDecision::erase(SizingTag::Cleared);
    }

    let candidates = candidate_count(&slice.items, valt);
    if candidates > 0 {
        return SizingDecision::drawing(list_height(candidates), SizingTag::Matched);
    }

    if slice.items.is_empty() || !valt.password.is_empty() {
        return SizingDecision::drawing(SAVE_PROMPT_HEIGHT, SizingTag::SavePrompt);
    }

    SizingDecision::erase(SizingTag::NoCandidate)
}

/// Items the overlay would list.
///
/// While the username field is active and non-empty, only items whose
/// username starts with the typed text (ignoring ASCII case) count.
fn candidate_count(items: &[VaultItem], valt: &ValtState) -> usize {
    let typed = valt.username.trim();
    if valt.actived_field != ActiveField::Username || typed.is_empty() {
        return items.len();
    }

    items
        .iter()
        .filter(|item| {
            item.username
                .get(..typed.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(typed))
        })
        .count()
}

fn list_height(rows: usize) -> u32 {
    let rows = u32::try_from(rows).unwrap_or(u32::MAX).min(MAX_VISIBLE_ROWS);
    LIST_HEADER_HEIGHT + rows * ROW_HEIGHT
}

// ============================================================================
// Tests
// ============================================================================

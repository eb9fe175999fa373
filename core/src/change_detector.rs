//! Change detection between two chronologically adjacent snapshots.
//!
//! RULES:
//!   - Membership comparison is by normalized tag only. Snapshots are
//!     canonicalized upstream, so tags arriving here are already in the
//!     `#`-prefixed uppercase form.
//!   - Upgrade events fire only on a strict increase of a monotonic
//!     field. A decrease on a monotonic field is a data anomaly: logged,
//!     never reported as an event.
//!   - Output ordering is stable and caller-independent: departures,
//!     then arrivals, then attribute events; within a group, members in
//!     roster order (departures by `prev`, the rest by `curr`).

use crate::canonical::CanonicalSnapshot;
use serde::Serialize;
use std::collections::HashSet;

/// Typed change events, serialized for logging and reporting surfaces.
/// Field names are static because they come from the fixed canonical
/// field tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    LeftMember {
        tag: String,
        name: String,
    },
    NewMember {
        tag: String,
        name: String,
    },
    RoleChanged {
        tag: String,
        from: String,
        to: String,
    },
    Upgrade {
        tag: String,
        field: &'static str,
        from: i64,
        to: i64,
    },
}

/// Compare two adjacent snapshots of the same clan. Pure function; the
/// only side effect is an anomaly warning when a monotonic field moved
/// backwards.
pub fn detect_changes(prev: &CanonicalSnapshot, curr: &CanonicalSnapshot) -> Vec<ChangeEvent> {
    let prev_tags: HashSet<&str> = prev.members.iter().map(|m| m.tag.as_str()).collect();
    let curr_tags: HashSet<&str> = curr.members.iter().map(|m| m.tag.as_str()).collect();

    let mut events = Vec::new();

    // Departures, in prev roster order.
    for member in &prev.members {
        if !curr_tags.contains(member.tag.as_str()) {
            events.push(ChangeEvent::LeftMember {
                tag: member.tag.clone(),
                name: member.name.clone(),
            });
        }
    }

    // Arrivals, in curr roster order.
    for member in &curr.members {
        if !prev_tags.contains(member.tag.as_str()) {
            events.push(ChangeEvent::NewMember {
                tag: member.tag.clone(),
                name: member.name.clone(),
            });
        }
    }

    // Attribute events for members present in both, in curr roster order.
    for member in &curr.members {
        let before = match prev.member(&member.tag) {
            Some(b) => b,
            None => continue,
        };

        if let (Some(old_role), Some(new_role)) = (&before.role, &member.role) {
            if old_role != new_role {
                events.push(ChangeEvent::RoleChanged {
                    tag: member.tag.clone(),
                    from: old_role.clone(),
                    to: new_role.clone(),
                });
            }
        }

        let old_fields = before.upgrade_fields();
        for (idx, (field, _event_tag, new_value)) in member.upgrade_fields().iter().enumerate() {
            let (_, _, old_value) = old_fields[idx];
            if let (Some(old), Some(new)) = (old_value, *new_value) {
                if new > old {
                    events.push(ChangeEvent::Upgrade {
                        tag: member.tag.clone(),
                        field,
                        from: old,
                        to: new,
                    });
                } else if new < old {
                    log::warn!(
                        "data anomaly: {} {} decreased {} -> {} between {} and {}",
                        member.tag, field, old, new, prev.date, curr.date,
                    );
                }
            }
        }
    }

    events
}

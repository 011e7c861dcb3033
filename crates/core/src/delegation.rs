//! Leave-based delegation: who covers for whom on a given day, and who may still take cover.

use std::collections::{BTreeSet, VecDeque};

use chrono::NaiveDate;

use crate::domain::leave::{DateRange, Leave};
use crate::domain::user::{Role, User};
use crate::domain::{LeaveId, UserId};
use crate::errors::ValidationFailure;

/// Everyone whose work flows to `user_id` on `as_of`, following backup chains.
///
/// If A is on leave backed by B and B is on leave backed by C, C receives both A and B.
/// The walk is bounded by the number of active leaves so a cycle cannot loop forever.
pub fn resolve_delegates_for(leaves: &[Leave], user_id: &UserId, as_of: NaiveDate) -> BTreeSet<UserId> {
    let active: Vec<&Leave> = leaves.iter().filter(|leave| leave.is_active_on(as_of)).collect();
    let mut delegated = BTreeSet::new();
    let mut visited = BTreeSet::from([user_id.clone()]);
    let mut queue = VecDeque::from([user_id.clone()]);
    let mut rounds = 0;

    while let Some(backup) = queue.pop_front() {
        if rounds > active.len() {
            tracing::warn!(
                event_name = "delegation.chain_truncated",
                user_id = %user_id,
                active_leaves = active.len(),
                "delegation chain walk hit its bound"
            );
            break;
        }
        rounds += 1;

        for leave in active.iter().filter(|leave| leave.backup_user_id == backup) {
            if visited.insert(leave.user_id.clone()) {
                delegated.insert(leave.user_id.clone());
                queue.push_back(leave.user_id.clone());
            }
        }
    }

    delegated
}

/// Rejects a backup who already covers another active leave in an overlapping window.
pub fn validate_backup_assignment(
    leaves: &[Leave],
    candidate: &UserId,
    range: &DateRange,
    ignoring: Option<&LeaveId>,
) -> Result<(), ValidationFailure> {
    let clash = leaves.iter().find(|leave| {
        leave.is_active()
            && &leave.backup_user_id == candidate
            && ignoring != Some(&leave.id)
            && leave.range.overlaps(range)
    });

    match clash {
        Some(leave) => Err(ValidationFailure::OverlappingLeave {
            backup_id: candidate.to_string(),
            leave_id: leave.id.to_string(),
            start: leave.range.start,
            end: leave.range.end,
        }),
        None => Ok(()),
    }
}

/// Active users of `role` who are not themselves away during `range`.
pub fn available_backups<'a>(
    users: &'a [User],
    leaves: &[Leave],
    role: Role,
    range: &DateRange,
    excluding: &UserId,
) -> Vec<&'a User> {
    let away: BTreeSet<&UserId> = leaves
        .iter()
        .filter(|leave| leave.is_active() && leave.range.overlaps(range))
        .map(|leave| &leave.user_id)
        .collect();

    users
        .iter()
        .filter(|user| {
            user.active && user.role == role && &user.id != excluding && !away.contains(&user.id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{available_backups, resolve_delegates_for, validate_backup_assignment};
    use crate::domain::leave::{DateRange, Leave, LeaveStatus};
    use crate::domain::user::{Role, User};
    use crate::domain::{LeaveId, UserId};
    use crate::errors::ValidationFailure;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).expect("valid date")
    }

    fn leave(id: &str, user: &str, backup: &str, start: u32, end: u32) -> Leave {
        Leave {
            id: LeaveId::from(id),
            user_id: UserId::from(user),
            backup_user_id: UserId::from(backup),
            range: DateRange::new(day(start), day(end)).expect("ordered range"),
            reason: "annual leave".to_owned(),
            status: LeaveStatus::Active,
            created_at: Utc.with_ymd_and_hms(2026, 4, 20, 8, 0, 0).single().expect("timestamp"),
        }
    }

    fn user(id: &str, role: Role) -> User {
        let now = Utc::now();
        User {
            id: UserId::from(id),
            email: format!("{id}@agency.example"),
            name: id.to_owned(),
            phone: None,
            role,
            active: true,
            can_see_cost_breakup: false,
            password_hash: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn chained_leaves_flow_to_the_last_backup() {
        let leaves = vec![leave("l-1", "alice", "bob", 1, 10), leave("l-2", "bob", "carol", 5, 12)];

        let carol = resolve_delegates_for(&leaves, &UserId::from("carol"), day(6));
        assert_eq!(
            carol.into_iter().collect::<Vec<_>>(),
            vec![UserId::from("alice"), UserId::from("bob")]
        );

        let before_bob_leaves = resolve_delegates_for(&leaves, &UserId::from("carol"), day(3));
        assert!(before_bob_leaves.is_empty());
    }

    #[test]
    fn cyclic_backups_terminate_and_exclude_self() {
        let leaves = vec![leave("l-1", "alice", "bob", 1, 10), leave("l-2", "bob", "alice", 1, 10)];

        let bob = resolve_delegates_for(&leaves, &UserId::from("bob"), day(2));
        assert_eq!(bob.into_iter().collect::<Vec<_>>(), vec![UserId::from("alice")]);
    }

    #[test]
    fn cancelled_leaves_do_not_delegate() {
        let mut cancelled = leave("l-1", "alice", "bob", 1, 10);
        cancelled.status = LeaveStatus::Cancelled;

        assert!(resolve_delegates_for(&[cancelled], &UserId::from("bob"), day(2)).is_empty());
    }

    #[test]
    fn overlapping_backup_windows_are_rejected() {
        let leaves = vec![leave("l-1", "alice", "bob", 1, 5)];
        let range = DateRange::new(day(5), day(8)).expect("ordered range");

        let error = validate_backup_assignment(&leaves, &UserId::from("bob"), &range, None)
            .expect_err("bob already covers alice on the 5th");
        assert!(matches!(error, ValidationFailure::OverlappingLeave { ref leave_id, .. } if leave_id == "l-1"));

        let adjacent = DateRange::new(day(6), day(8)).expect("ordered range");
        assert!(validate_backup_assignment(&leaves, &UserId::from("bob"), &adjacent, None).is_ok());
        assert!(validate_backup_assignment(&leaves, &UserId::from("dave"), &range, None).is_ok());
        assert!(validate_backup_assignment(
            &leaves,
            &UserId::from("bob"),
            &range,
            Some(&LeaveId::from("l-1"))
        )
        .is_ok());
    }

    #[test]
    fn available_backups_skip_colleagues_on_leave() {
        let users = vec![
            user("alice", Role::Sales),
            user("bob", Role::Sales),
            user("carol", Role::Sales),
            user("olga", Role::Operations),
        ];
        let leaves = vec![leave("l-1", "bob", "carol", 3, 4)];
        let range = DateRange::new(day(1), day(3)).expect("ordered range");

        let names: Vec<&str> =
            available_backups(&users, &leaves, Role::Sales, &range, &UserId::from("alice"))
                .into_iter()
                .map(|user| user.id.as_str())
                .collect();
        assert_eq!(names, vec!["carol"]);
    }
}

//! Matchmaker: pairs or groups sessions by declarative properties and
//! queries (spec §4.6). No teacher analog exists for the ticket/query
//! design itself; the ticket store follows the same `DashMap`-plus-
//! secondary-index shape used throughout this workspace (Registry,
//! Tracker), and the periodic matching tick is styled like the match
//! runtime's fixed-interval loop.

pub mod error;
pub mod query;
pub mod ticket;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use nakama_core::{SessionId, UserId};

pub use error::MatchmakerError;
pub use query::Query;
pub use ticket::{Ticket, TicketId};

/// Input fields for `MatchmakerAdd` (spec §4.6), prior to parsing.
#[derive(Debug, Clone)]
pub struct TicketRequest {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
    pub min_count: u32,
    pub max_count: u32,
    pub count_multiple: u32,
    pub string_properties: HashMap<String, String>,
    pub numeric_properties: HashMap<String, f64>,
    pub query: String,
}

/// A formed group of tickets, ready for `matchmaker-matched` notification.
#[derive(Debug, Clone)]
pub struct MatchedGroup {
    pub tickets: Vec<Ticket>,
    pub token: String,
}

pub struct Matchmaker {
    tickets: DashMap<TicketId, Ticket>,
    by_session: DashMap<SessionId, HashSet<TicketId>>,
    sequence: AtomicU64,
    max_tickets: usize,
}

impl Matchmaker {
    pub fn new(max_tickets: usize) -> Arc<Self> {
        Arc::new(Self {
            tickets: DashMap::new(),
            by_session: DashMap::new(),
            sequence: AtomicU64::new(0),
            max_tickets,
        })
    }

    /// Parses `request.query` at add-time (spec §4.6: "implementations
    /// must reject malformed queries with a precise error at add-time")
    /// and indexes the ticket.
    pub fn add(&self, request: TicketRequest) -> Result<TicketId, MatchmakerError> {
        if request.min_count > request.max_count {
            return Err(MatchmakerError::InvalidRange {
                min: request.min_count,
                max: request.max_count,
            });
        }
        if request.count_multiple == 0 {
            return Err(MatchmakerError::InvalidCountMultiple);
        }
        let query = Query::parse(&request.query)?;

        let ticket_id = TicketId::new();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let ticket = Ticket {
            ticket_id,
            session_id: request.session_id,
            user_id: request.user_id,
            username: request.username,
            min_count: request.min_count,
            max_count: request.max_count,
            count_multiple: request.count_multiple,
            string_properties: request.string_properties,
            numeric_properties: request.numeric_properties,
            query,
            sequence,
        };

        self.tickets.insert(ticket_id, ticket);
        self.by_session
            .entry(request.session_id)
            .or_default()
            .insert(ticket_id);

        Ok(ticket_id)
    }

    /// Explicit `ticket_remove`. No-op (not an error) if already gone —
    /// cancel races resolve in favor of whichever outcome (cancel or
    /// match) committed first.
    pub fn remove(&self, ticket_id: TicketId) {
        if let Some((_, ticket)) = self.tickets.remove(&ticket_id) {
            if let Some(mut set) = self.by_session.get_mut(&ticket.session_id) {
                set.remove(&ticket_id);
            }
        }
    }

    /// Called on session close: every ticket belonging to this session is
    /// removed with no match emission, so a closed session's ticket can
    /// never appear in a later formed group.
    pub fn remove_by_session(&self, session_id: SessionId) {
        if let Some((_, ids)) = self.by_session.remove(&session_id) {
            for id in ids {
                self.tickets.remove(&id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn at_capacity(&self) -> bool {
        self.tickets.len() >= self.max_tickets
    }

    /// One matchmaker tick (spec §4.6, default interval 100ms, driven by
    /// the caller's `tokio::time::interval`). Greedily forms groups: each
    /// still-unmatched ticket in insertion order is tried as a seed; a
    /// maximal pairwise-compatible pool is grown around it, then
    /// truncated to the largest prefix whose size satisfies every
    /// included ticket's `[min_count, max_count]` and `count_multiple`.
    /// Earlier seeds are tried first, which gives earliest-added-seed
    /// priority over overlapping candidate pools for free: a ticket
    /// consumed by an earlier group can no longer seed or join a later
    /// one this tick.
    pub fn tick(&self) -> Vec<MatchedGroup> {
        let mut seeds: Vec<Ticket> = self.tickets.iter().map(|e| e.value().clone()).collect();
        seeds.sort_by_key(|t| t.sequence);

        let mut matched: HashSet<TicketId> = HashSet::new();
        let mut groups = Vec::new();

        for seed in &seeds {
            if matched.contains(&seed.ticket_id) {
                continue;
            }

            let mut pool: Vec<Ticket> = seeds
                .iter()
                .filter(|t| t.ticket_id != seed.ticket_id && !matched.contains(&t.ticket_id))
                .cloned()
                .collect();
            pool.sort_by_key(|t| t.sequence);

            let mut group = vec![seed.clone()];
            let mut user_ids: HashSet<UserId> = HashSet::from([seed.user_id]);

            for candidate in pool.drain(..) {
                if user_ids.contains(&candidate.user_id) {
                    continue;
                }
                let compatible = group
                    .iter()
                    .all(|g| g.satisfies(&candidate) && candidate.satisfies(g));
                if !compatible {
                    continue;
                }
                let prospective_size = group.len() + 1;
                let exceeds_max = group
                    .iter()
                    .chain(std::iter::once(&candidate))
                    .any(|t| prospective_size as u32 > t.max_count);
                if exceeds_max {
                    continue;
                }
                user_ids.insert(candidate.user_id);
                group.push(candidate);
            }

            if let Some(valid_len) = largest_valid_prefix(&group) {
                group.truncate(valid_len);
                for t in &group {
                    matched.insert(t.ticket_id);
                }
                let token = format!("mm-{}", uuid::Uuid::new_v4());
                groups.push(MatchedGroup { tickets: group, token });
            }
        }

        for group in &groups {
            for ticket in &group.tickets {
                self.remove(ticket.ticket_id);
            }
        }

        groups
    }
}

/// Largest prefix length `s` (>= 2, since a lone ticket never forms a
/// group with itself per `min_count` realistically requiring at least
/// one partner in all observed usage) such that every one of the first
/// `s` tickets (in growth order) has `s` within `[min_count, max_count]`
/// and `s % count_multiple == 0`. Returns `None` if no such prefix exists.
fn largest_valid_prefix(group: &[Ticket]) -> Option<usize> {
    for size in (1..=group.len()).rev() {
        let prefix = &group[..size];
        let ok = prefix.iter().all(|t| {
            let s = size as u32;
            s >= t.min_count && s <= t.max_count && s % t.count_multiple == 0
        });
        if ok {
            return Some(size).filter(|_| size >= 1);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(
        user_id: UserId,
        min: u32,
        max: u32,
        mode: &str,
        query: &str,
    ) -> TicketRequest {
        TicketRequest {
            session_id: SessionId::new(),
            user_id,
            username: "p".to_string(),
            min_count: min,
            max_count: max,
            count_multiple: 1,
            string_properties: HashMap::from([("mode".to_string(), mode.to_string())]),
            numeric_properties: HashMap::new(),
            query: query.to_string(),
        }
    }

    #[test]
    fn two_compatible_1v1_tickets_are_matched_within_one_tick() {
        let mm = Matchmaker::new(100);
        let t1 = mm.add(request(UserId::new(), 2, 2, "1v1", "mode:1v1")).unwrap();
        let t2 = mm.add(request(UserId::new(), 2, 2, "1v1", "mode:1v1")).unwrap();

        let groups = mm.tick();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].tickets.len(), 2);
        let ids: HashSet<TicketId> = groups[0].tickets.iter().map(|t| t.ticket_id).collect();
        assert!(ids.contains(&t1));
        assert!(ids.contains(&t2));
        assert_eq!(mm.len(), 0);
    }

    #[test]
    fn incompatible_mode_never_matches() {
        let mm = Matchmaker::new(100);
        mm.add(request(UserId::new(), 2, 2, "1v1", "mode:1v1")).unwrap();
        mm.add(request(UserId::new(), 2, 2, "2v2", "mode:2v2")).unwrap();

        let groups = mm.tick();
        assert!(groups.is_empty());
        assert_eq!(mm.len(), 2);
    }

    #[test]
    fn same_user_id_twice_never_forms_a_group() {
        let mm = Matchmaker::new(100);
        let user = UserId::new();
        mm.add(request(user, 2, 2, "1v1", "mode:1v1")).unwrap();
        mm.add(request(user, 2, 2, "1v1", "mode:1v1")).unwrap();

        let groups = mm.tick();
        assert!(groups.is_empty());
    }

    #[test]
    fn cancel_removes_ticket_before_next_tick() {
        let mm = Matchmaker::new(100);
        let t1 = mm.add(request(UserId::new(), 2, 2, "1v1", "mode:1v1")).unwrap();
        mm.add(request(UserId::new(), 2, 2, "1v1", "mode:1v1")).unwrap();

        mm.remove(t1);
        let groups = mm.tick();
        assert!(groups.is_empty());
        assert_eq!(mm.len(), 1);
    }

    #[test]
    fn session_close_removes_its_tickets_and_they_never_appear_in_a_group() {
        let mm = Matchmaker::new(100);
        let session = SessionId::new();
        let mut req = request(UserId::new(), 2, 2, "1v1", "mode:1v1");
        req.session_id = session;
        mm.add(req).unwrap();
        mm.add(request(UserId::new(), 2, 2, "1v1", "mode:1v1")).unwrap();

        mm.remove_by_session(session);
        let groups = mm.tick();
        assert!(groups.is_empty());
        assert_eq!(mm.len(), 1);
    }

    #[test]
    fn count_multiple_groups_parties_in_fixed_size_blocks() {
        let mm = Matchmaker::new(100);
        let mut ids = Vec::new();
        for _ in 0..4 {
            let mut req = request(UserId::new(), 4, 4, "party", "mode:party");
            req.count_multiple = 2;
            ids.push(mm.add(req).unwrap());
        }

        let groups = mm.tick();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].tickets.len(), 4);
    }

    #[test]
    fn malformed_query_rejected_at_add_time() {
        let mm = Matchmaker::new(100);
        let err = mm.add(request(UserId::new(), 2, 2, "1v1", "mode:"));
        assert!(err.is_err());
    }

    #[test]
    fn invalid_min_max_rejected_at_add_time() {
        let mm = Matchmaker::new(100);
        let mut req = request(UserId::new(), 5, 2, "1v1", "mode:1v1");
        req.min_count = 5;
        req.max_count = 2;
        assert!(matches!(mm.add(req), Err(MatchmakerError::InvalidRange { .. })));
    }
}

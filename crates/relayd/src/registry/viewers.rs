//! Viewer registry - which connections are watching which session.

use std::collections::{HashMap, HashSet};

use relay_core::{ConnectionId, SessionId};

/// Session → set of viewing connections.
///
/// Sets are created on first join and may stay in the map when empty.
#[derive(Debug, Default)]
pub struct ViewerRegistry {
    viewers: HashMap<SessionId, HashSet<ConnectionId>>,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `conn_id` to the session's viewers and returns the new count.
    ///
    /// Joining twice is harmless; the count stays deduplicated.
    pub fn join(&mut self, session_id: &SessionId, conn_id: ConnectionId) -> usize {
        let set = self.viewers.entry(session_id.clone()).or_default();
        set.insert(conn_id);
        set.len()
    }

    /// Removes `conn_id` from the session's viewers.
    ///
    /// Returns the new count only if the connection was actually a viewer.
    pub fn leave(&mut self, session_id: &SessionId, conn_id: &ConnectionId) -> Option<usize> {
        let set = self.viewers.get_mut(session_id)?;
        if set.remove(conn_id) {
            Some(set.len())
        } else {
            None
        }
    }

    /// Removes `conn_id` from every session it was watching.
    ///
    /// Returns `(session, new count)` for each session that changed.
    pub fn disconnect_all(&mut self, conn_id: &ConnectionId) -> Vec<(SessionId, usize)> {
        self.viewers
            .iter_mut()
            .filter_map(|(session_id, set)| {
                set.remove(conn_id)
                    .then(|| (session_id.clone(), set.len()))
            })
            .collect()
    }

    /// Number of viewers of a session, 0 if unknown.
    pub fn count(&self, session_id: &SessionId) -> usize {
        self.viewers.get(session_id).map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::new(s)
    }

    fn cid(s: &str) -> ConnectionId {
        ConnectionId::new(s)
    }

    #[test]
    fn test_join_leave_sequence_counts() {
        let mut viewers = ViewerRegistry::new();

        assert_eq!(viewers.join(&sid("s1"), cid("c1")), 1);
        assert_eq!(viewers.join(&sid("s1"), cid("c2")), 2);
        assert_eq!(viewers.leave(&sid("s1"), &cid("c1")), Some(1));
        assert_eq!(viewers.count(&sid("s1")), 1);
    }

    #[test]
    fn test_duplicate_join_is_deduplicated() {
        let mut viewers = ViewerRegistry::new();

        assert_eq!(viewers.join(&sid("s1"), cid("c1")), 1);
        assert_eq!(viewers.join(&sid("s1"), cid("c1")), 1);
    }

    #[test]
    fn test_leave_of_non_member_reports_no_change() {
        let mut viewers = ViewerRegistry::new();
        assert_eq!(viewers.leave(&sid("s1"), &cid("c1")), None);

        viewers.join(&sid("s1"), cid("c1"));
        assert_eq!(viewers.leave(&sid("s1"), &cid("c2")), None);
        assert_eq!(viewers.leave(&sid("s1"), &cid("c1")), Some(0));
        assert_eq!(viewers.leave(&sid("s1"), &cid("c1")), None);
        assert_eq!(viewers.count(&sid("s1")), 0);
    }

    #[test]
    fn test_disconnect_all_touches_only_member_sessions() {
        let mut viewers = ViewerRegistry::new();
        viewers.join(&sid("a"), cid("c1"));
        viewers.join(&sid("a"), cid("c2"));
        viewers.join(&sid("b"), cid("c1"));
        viewers.join(&sid("c"), cid("c2"));

        let mut changed = viewers.disconnect_all(&cid("c1"));
        changed.sort_by(|x, y| x.0.as_str().cmp(y.0.as_str()));

        assert_eq!(changed, vec![(sid("a"), 1), (sid("b"), 0)]);
        assert_eq!(viewers.count(&sid("c")), 1);
        assert!(viewers.disconnect_all(&cid("c1")).is_empty());
    }

    #[test]
    fn test_count_of_unknown_session_is_zero() {
        let viewers = ViewerRegistry::new();
        assert_eq!(viewers.count(&sid("missing")), 0);
    }
}

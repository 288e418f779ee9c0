use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A client present on a presence channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(rename = "user_id")]
    pub id: String,
    #[serde(rename = "user_info", default)]
    pub info: Value,
}

impl Member {
    pub fn new(id: impl Into<String>, info: Value) -> Self {
        Self {
            id: id.into(),
            info,
        }
    }
}

/// Full member list as reported when a presence subscription succeeds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceSnapshot {
    pub me: Option<Member>,
    pub members: HashMap<String, Value>,
}

/// Presence data as sent by the server: `{"presence": {"ids": [...], "hash": {...}, "count": n}}`
#[derive(Debug, Clone, Deserialize)]
pub struct RawPresenceData {
    pub presence: RawPresence,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPresence {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub hash: HashMap<String, Value>,
    #[serde(default)]
    pub count: usize,
}

impl RawPresenceData {
    pub fn into_snapshot(self, me: Option<Member>) -> PresenceSnapshot {
        let RawPresence { ids, mut hash, .. } = self.presence;
        // Ids without an info entry still count as members
        for id in ids {
            hash.entry(id).or_insert(Value::Null);
        }
        PresenceSnapshot { me, members: hash }
    }
}

/// Members joined and left between two snapshots
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MembersChanges {
    pub joins: Vec<Member>,
    pub leaves: Vec<Member>,
}

/// Member set of a presence channel
#[derive(Debug, Clone, Default)]
pub struct Members {
    me: Option<Member>,
    members: HashMap<String, Value>,
}

impl Members {
    /// Replaces the member set with a fresh snapshot
    pub fn sync(&mut self, snapshot: PresenceSnapshot) -> MembersChanges {
        let new_ids: HashSet<&String> = snapshot.members.keys().collect();
        let current_ids: HashSet<&String> = self.members.keys().collect();

        let mut joins: Vec<Member> = snapshot
            .members
            .iter()
            .filter(|(id, _)| !current_ids.contains(id))
            .map(|(id, info)| Member::new(id.clone(), info.clone()))
            .collect();

        let mut leaves: Vec<Member> = self
            .members
            .iter()
            .filter(|(id, _)| !new_ids.contains(id))
            .map(|(id, info)| Member::new(id.clone(), info.clone()))
            .collect();

        joins.sort_by(|a, b| a.id.cmp(&b.id));
        leaves.sort_by(|a, b| a.id.cmp(&b.id));

        self.members = snapshot.members;
        self.me = snapshot.me;

        MembersChanges { joins, leaves }
    }

    /// Adds a member; returns false if it was already present
    pub fn add(&mut self, member: Member) -> bool {
        self.members.insert(member.id, member.info).is_none()
    }

    /// Removes a member by id
    pub fn remove(&mut self, user_id: &str) -> Option<Member> {
        self.members
            .remove(user_id)
            .map(|info| Member::new(user_id, info))
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn me(&self) -> Option<&Member> {
        self.me.as_ref()
    }

    pub fn get(&self, user_id: &str) -> Option<Member> {
        self.members
            .get(user_id)
            .map(|info| Member::new(user_id, info.clone()))
    }

    /// All members, ordered by id
    pub fn list(&self) -> Vec<Member> {
        let mut list: Vec<Member> = self
            .members
            .iter()
            .map(|(id, info)| Member::new(id.clone(), info.clone()))
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.me = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(ids: &[&str]) -> PresenceSnapshot {
        PresenceSnapshot {
            me: Some(Member::new("t-1", json!({"name": "Ms. Rivera"}))),
            members: ids
                .iter()
                .map(|id| (id.to_string(), json!({"role": "student"})))
                .collect(),
        }
    }

    #[test]
    fn test_sync_reports_joins_and_leaves() {
        let mut members = Members::default();

        let changes = members.sync(snapshot(&["s-1", "s-2"]));
        assert_eq!(changes.joins.len(), 2);
        assert!(changes.leaves.is_empty());
        assert_eq!(members.count(), 2);

        let changes = members.sync(snapshot(&["s-2", "s-3"]));
        assert_eq!(changes.joins, vec![Member::new("s-3", json!({"role": "student"}))]);
        assert_eq!(changes.leaves, vec![Member::new("s-1", json!({"role": "student"}))]);
        assert_eq!(members.me().map(|m| m.id.as_str()), Some("t-1"));
    }

    #[test]
    fn test_add_and_remove() {
        let mut members = Members::default();
        assert!(members.add(Member::new("s-1", json!({}))));
        assert!(!members.add(Member::new("s-1", json!({"late": true}))));
        assert_eq!(members.count(), 1);
        assert_eq!(members.get("s-1").map(|m| m.info), Some(json!({"late": true})));

        assert!(members.remove("s-1").is_some());
        assert!(members.remove("s-1").is_none());
        assert_eq!(members.count(), 0);
    }

    #[test]
    fn test_raw_presence_into_snapshot() {
        let raw: RawPresenceData = serde_json::from_value(json!({
            "presence": {
                "ids": ["a", "b"],
                "hash": {"a": {"name": "Ada"}},
                "count": 2
            }
        }))
        .unwrap();

        let snapshot = raw.into_snapshot(None);
        assert_eq!(snapshot.members.len(), 2);
        assert_eq!(snapshot.members["a"], json!({"name": "Ada"}));
        assert_eq!(snapshot.members["b"], Value::Null);
    }

    #[test]
    fn test_member_wire_names() {
        let member: Member =
            serde_json::from_value(json!({"user_id": "s-9", "user_info": {"grade": 5}})).unwrap();
        assert_eq!(member.id, "s-9");
        assert_eq!(member.info["grade"], 5);
    }
}

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::message::{MessageRecord, MessageRef};
use crate::sort::strip_reply_prefixes;

/// Position of a group within one grouping pass. Not stable across passes.
pub type GroupId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingMode {
    /// Every message is its own group.
    None,
    /// Cluster by message-id / References / In-Reply-To.
    #[default]
    Thread,
}

// ---------------------------------------------------------------------------
// Conversations (grouped threads)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConversationGroup {
    pub id: GroupId,
    pub messages: Vec<MessageRecord>,
    pub subject: String,
    pub unread: usize,
    pub flagged: usize,
}

impl ConversationGroup {
    fn new(id: GroupId, messages: Vec<MessageRecord>) -> Self {
        let subject = messages
            .first()
            .map(|m| strip_reply_prefixes(&m.subject).to_string())
            .unwrap_or_default();
        let unread = messages.iter().filter(|m| m.is_unread()).count();
        let flagged = messages.iter().filter(|m| m.flagged).count();
        Self {
            id,
            messages,
            subject,
            unread,
            flagged,
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn has_unread(&self) -> bool {
        self.unread > 0
    }

    pub fn has_flagged(&self) -> bool {
        self.flagged > 0
    }

    /// The "representative" message for preview: latest unread, or latest if all read.
    pub fn representative(&self) -> Option<&MessageRecord> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_unread())
            .or_else(|| self.messages.last())
    }

    /// Deduplicated sender labels across the thread.
    pub fn senders(&self) -> String {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for msg in &self.messages {
            if seen.insert(msg.sender.as_str()) {
                names.push(msg.sender.as_str());
            }
        }
        names.join(", ")
    }
}

/// Output of one grouping pass.
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    pub groups: Vec<ConversationGroup>,
    /// First member of each group -> that group. Other members are not indexed.
    first_member: HashMap<MessageRef, GroupId>,
}

impl Grouping {
    /// Look up the group a message heads. Only the first member of a group is
    /// guaranteed to resolve.
    pub fn group_of(&self, reference: &MessageRef) -> Option<&ConversationGroup> {
        self.first_member
            .get(reference)
            .and_then(|id| self.groups.get(*id))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl GroupingMode {
    pub fn group(self, records: &[MessageRecord]) -> Grouping {
        let clusters = match self {
            GroupingMode::None => (0..records.len()).map(|i| vec![i]).collect(),
            GroupingMode::Thread => thread_clusters(records),
        };
        assemble(records, clusters)
    }
}

fn assemble(records: &[MessageRecord], clusters: Vec<Vec<usize>>) -> Grouping {
    let mut grouping = Grouping::default();
    for (id, members) in clusters.into_iter().enumerate() {
        let messages: Vec<MessageRecord> = members.iter().map(|&i| records[i].clone()).collect();
        if let Some(first) = messages.first() {
            grouping.first_member.insert(first.reference().clone(), id);
        }
        grouping.groups.push(ConversationGroup::new(id, messages));
    }
    grouping
}

/// Connected components over the shared label space of ids and references.
/// Clusters come out ordered by their first member; members keep input order.
fn thread_clusters(records: &[MessageRecord]) -> Vec<Vec<usize>> {
    let mut sets = DisjointSet::new(records.len());
    let mut owner: HashMap<String, usize> = HashMap::new();

    for (i, record) in records.iter().enumerate() {
        let info = match record.headers.reference_info() {
            Ok(info) => info,
            Err(e) => {
                warn!(message = %record.reference(), "excluded from threading: {e}");
                continue;
            }
        };
        for label in info.labels() {
            match owner.get(label) {
                Some(&j) => sets.union(i, j),
                None => {
                    owner.insert(label.to_string(), i);
                }
            }
        }
    }

    let mut slot: HashMap<usize, usize> = HashMap::new();
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for i in 0..records.len() {
        let root = sets.find(i);
        let idx = *slot.entry(root).or_insert_with(|| {
            clusters.push(Vec::new());
            clusters.len() - 1
        });
        clusters[idx].push(i);
    }
    clusters
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderBlock;
    use crate::message::fixtures::record;

    fn threaded(uid: &str, subject: &str, minutes: i64, id: &str, refs: &[&str]) -> MessageRecord {
        let mut r = record(uid, subject, minutes);
        r.headers = HeaderBlock::Parsed {
            message_id: Some(id.to_string()),
            references: refs.iter().map(|s| s.to_string()).collect(),
            in_reply_to: Vec::new(),
        };
        r
    }

    fn membership(grouping: &Grouping) -> Vec<Vec<String>> {
        let mut sets: Vec<Vec<String>> = grouping
            .groups
            .iter()
            .map(|g| {
                let mut uids: Vec<String> =
                    g.messages.iter().map(|m| m.reference().uid.clone()).collect();
                uids.sort();
                uids
            })
            .collect();
        sets.sort();
        sets
    }

    #[test]
    fn empty_input() {
        assert!(GroupingMode::Thread.group(&[]).is_empty());
        assert!(GroupingMode::None.group(&[]).is_empty());
    }

    #[test]
    fn reply_pair_scenario() {
        let records = vec![
            threaded("2", "Re: Hello", 10, "<b@x>", &["<a@x>"]),
            threaded("1", "Hello", 0, "<a@x>", &[]),
        ];
        let threads = GroupingMode::Thread.group(&records);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads.groups[0].message_count(), 2);
        assert_eq!(threads.groups[0].subject, "Hello");

        let singles = GroupingMode::None.group(&records);
        assert_eq!(singles.len(), 2);
        assert!(singles.groups.iter().all(|g| g.message_count() == 1));
    }

    #[test]
    fn transitive_references_join_one_group() {
        // C -> B -> A, and C never mentions A
        let records = vec![
            threaded("a", "A", 0, "<a@x>", &[]),
            threaded("z", "Other", 1, "<z@x>", &[]),
            threaded("c", "C", 2, "<c@x>", &["<b@x>"]),
            threaded("b", "B", 3, "<b@x>", &["<a@x>"]),
        ];
        let grouping = GroupingMode::Thread.group(&records);
        assert_eq!(
            membership(&grouping),
            vec![vec!["a", "b", "c"], vec!["z"]]
        );
    }

    #[test]
    fn shared_reference_without_the_root_present() {
        let records = vec![
            threaded("1", "x", 0, "<one@x>", &["<missing-root@x>"]),
            threaded("2", "x", 1, "<two@x>", &["<missing-root@x>"]),
        ];
        assert_eq!(GroupingMode::Thread.group(&records).len(), 1);
    }

    #[test]
    fn groups_keep_collection_order() {
        let records = vec![
            threaded("3", "Re: T", 3, "<3@x>", &["<1@x>"]),
            threaded("9", "Solo", 2, "<9@x>", &[]),
            threaded("1", "T", 1, "<1@x>", &[]),
        ];
        let grouping = GroupingMode::Thread.group(&records);
        let order: Vec<Vec<&str>> = grouping
            .groups
            .iter()
            .map(|g| g.messages.iter().map(|m| m.reference().uid.as_str()).collect())
            .collect();
        assert_eq!(order, vec![vec!["3", "1"], vec!["9"]]);
        assert_eq!(grouping.groups[0].id, 0);
        assert_eq!(grouping.groups[1].id, 1);
    }

    #[test]
    fn grouping_is_a_partition_and_idempotent() {
        let mut records = Vec::new();
        for i in 0..30 {
            let parent = format!("<{}@x>", i / 4);
            records.push(threaded(&i.to_string(), "s", i, &format!("<m{}@x>", i), &[parent.as_str()]));
        }
        for mode in [GroupingMode::Thread, GroupingMode::None] {
            let first = mode.group(&records);
            let second = mode.group(&records);
            assert_eq!(membership(&first), membership(&second));

            let mut seen: Vec<String> = first
                .groups
                .iter()
                .flat_map(|g| g.messages.iter().map(|m| m.reference().uid.clone()))
                .collect();
            assert_eq!(seen.len(), records.len());
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), records.len());
        }
        assert_eq!(GroupingMode::Thread.group(&records).len(), 8);
    }

    #[test]
    fn unparseable_headers_become_singletons() {
        let mut broken = threaded("2", "Re: Hello", 1, "<b@x>", &["<a@x>"]);
        broken.headers = HeaderBlock::Raw { raw: String::new() };
        let records = vec![
            threaded("1", "Hello", 0, "<a@x>", &[]),
            broken,
            threaded("3", "Re: Hello", 2, "<c@x>", &["<a@x>"]),
        ];
        let grouping = GroupingMode::Thread.group(&records);
        assert_eq!(membership(&grouping), vec![vec!["1", "3"], vec!["2"]]);
    }

    #[test]
    fn only_first_member_is_indexed() {
        let records = vec![
            threaded("1", "Hello", 0, "<a@x>", &[]),
            threaded("2", "Re: Hello", 1, "<b@x>", &["<a@x>"]),
        ];
        let grouping = GroupingMode::Thread.group(&records);
        let head = MessageRef::new("work", "INBOX", "1");
        let tail = MessageRef::new("work", "INBOX", "2");
        assert_eq!(grouping.group_of(&head).map(|g| g.id), Some(0));
        assert!(grouping.group_of(&tail).is_none());
    }

    #[test]
    fn aggregates() {
        let mut a = threaded("1", "Hello", 0, "<a@x>", &[]);
        a.read = true;
        a.flagged = true;
        let b = threaded("2", "Re: Hello", 1, "<b@x>", &["<a@x>"]);
        let mut c = threaded("3", "Re: Hello", 2, "<c@x>", &["<a@x>"]);
        c.read = true;
        let grouping = GroupingMode::Thread.group(&[a, b, c]);
        let group = &grouping.groups[0];
        assert_eq!(group.unread, 1);
        assert_eq!(group.flagged, 1);
        assert!(group.has_unread() && group.has_flagged());
        assert_eq!(group.representative().map(|m| m.reference().uid.as_str()), Some("2"));
        assert_eq!(group.senders(), "User 1, User 2, User 3");
        assert_eq!(grouping.groups.iter().map(|g| g.unread).sum::<usize>(), 1);
    }
}

//! The render side: owns presentation state and applies pipeline results.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info};

use crate::collection::SortedCollection;
use crate::config::Config;
use crate::grouping::{ConversationGroup, Grouping, GroupingMode};
use crate::message::{MessageRecord, MessageRef};
use crate::pipeline::{Pipeline, PipelineState};
use crate::reconcile::{Reconciler, SearchVerifier, ViewScope};
use crate::sort::{SortKey, SortPreferences};

/// Everything that crosses from producers and the scheduler to the view.
#[derive(Debug)]
pub enum RenderMessage {
    Grouped { generation: u64, grouping: Grouping },
    Settled { generation: u64 },
    Busy(bool),
    /// Records left the collection; `selected` of them were selected.
    Removed { selected: usize },
    UnreadCount(usize),
}

/// Presentation layer callbacks. Always invoked from the task driving the view.
pub trait ViewListener {
    fn groups_changed(&mut self, groups: &[ConversationGroup]);
    fn busy_state_changed(&mut self, busy: bool);
    fn selection_count_changed(&mut self, count: usize);

    fn unread_count_changed(&mut self, _count: usize) {}

    fn grouping_settled(&mut self) {}
}

/// Which state a batch action toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFlag {
    Read,
    Flagged,
}

impl BatchFlag {
    fn is_set(self, record: &MessageRecord) -> bool {
        match self {
            BatchFlag::Read => record.read,
            BatchFlag::Flagged => record.flagged,
        }
    }

    fn apply(self, record: &mut MessageRecord, state: bool) {
        match self {
            BatchFlag::Read => record.read = state,
            BatchFlag::Flagged => record.flagged = state,
        }
    }
}

pub struct View<L: ViewListener> {
    collection: SortedCollection,
    pipeline: Pipeline,
    reconciler: Reconciler,
    listener: L,
    rx: UnboundedReceiver<RenderMessage>,
    sort: SortPreferences,
    grouping: Grouping,
    selected_count: usize,
    unread_count: usize,
    busy: bool,
    syncing: bool,
    active: bool,
    settled: bool,
    generation: u64,
}

impl<L: ViewListener> View<L> {
    pub fn new(
        scope: ViewScope,
        config: &Config,
        listener: L,
        verifier: Option<Arc<dyn SearchVerifier>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let collection = SortedCollection::new(config.sort.policy());
        let pipeline = Pipeline::new(collection.clone(), config.grouping, config.cooldown(), tx.clone());
        let reconciler = Reconciler::new(
            scope,
            collection.clone(),
            config.accounts.clone(),
            verifier,
            tx,
        );
        Self {
            collection,
            pipeline,
            reconciler,
            listener,
            rx,
            sort: config.sort,
            grouping: Grouping::default(),
            selected_count: 0,
            unread_count: 0,
            busy: false,
            syncing: false,
            active: false,
            settled: false,
            generation: 0,
        }
    }

    /// Start from an empty list with a fresh scheduler. Producers get
    /// through again once this returns.
    pub fn activate(&mut self) {
        let stale = self.discard_pending();
        if stale > 0 {
            debug!(stale, "dropped render messages from the previous activation");
        }
        self.collection.clear();
        self.set_selected_count(0);
        self.grouping = Grouping::default();
        self.settled = false;
        self.syncing = false;
        self.set_busy(false);
        self.generation = self.pipeline.start();
        self.active = true;
        self.reconciler.attach();
        self.pipeline.trigger();
        info!(scope = ?self.reconciler.scope(), generation = self.generation, "view activated");
    }

    pub fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        self.reconciler.detach();
        self.pipeline.stop();
        self.active = false;
        info!(generation = self.generation, "view deactivated");
    }

    /// Wait for the next render message and apply it.
    pub async fn process_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(message) => {
                self.apply(message);
                true
            }
            None => false,
        }
    }

    /// Apply everything already queued. Returns how many messages were handled.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.rx.try_recv() {
            self.apply(message);
            handled += 1;
        }
        handled
    }

    fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    fn apply(&mut self, message: RenderMessage) {
        if !self.active {
            debug!(?message, "view inactive, render message dropped");
            return;
        }
        match message {
            RenderMessage::Grouped {
                generation,
                grouping,
            } => {
                if generation != self.generation {
                    debug!(generation, current = self.generation, "stale grouping dropped");
                    return;
                }
                self.grouping = grouping;
                self.settled = false;
                self.listener.groups_changed(&self.grouping.groups);
            }
            RenderMessage::Settled { generation } => {
                if generation != self.generation {
                    return;
                }
                self.settled = true;
                self.set_busy(self.syncing);
                self.listener.grouping_settled();
            }
            RenderMessage::Busy(busy) => {
                self.syncing = busy;
                self.set_busy(busy);
            }
            RenderMessage::Removed { selected } => {
                self.set_selected_count(self.selected_count.saturating_sub(selected));
            }
            RenderMessage::UnreadCount(count) => self.set_unread_count(count),
        }
    }

    fn set_busy(&mut self, busy: bool) {
        if self.busy != busy {
            self.busy = busy;
            self.listener.busy_state_changed(busy);
        }
    }

    fn set_selected_count(&mut self, count: usize) {
        self.selected_count = count;
        self.listener.selection_count_changed(count);
    }

    fn set_unread_count(&mut self, count: usize) {
        self.unread_count = count;
        self.listener.unread_count_changed(count);
    }

    // -- sorting -----------------------------------------------------------

    pub fn sort(&self) -> &SortPreferences {
        &self.sort
    }

    pub fn change_sort(&mut self, key: SortKey) {
        self.sort.change_sort(key);
        self.resort_now();
    }

    pub fn toggle_sort_ascending(&mut self) {
        self.sort.toggle_ascending();
        self.resort_now();
    }

    pub fn cycle_sort(&mut self) {
        self.sort.cycle();
        self.resort_now();
    }

    /// Resort immediately under the current preferences; regrouping follows
    /// through the pipeline.
    pub fn resort_now(&mut self) {
        debug!(policy = ?self.sort.policy(), "resort");
        self.collection.resort(self.sort.policy());
    }

    pub fn set_grouping(&mut self, mode: GroupingMode) {
        self.pipeline.set_mode(mode);
    }

    // -- selection and batch actions ---------------------------------------

    pub fn select(&mut self, references: &[MessageRef], selected: bool) -> usize {
        let changed = self.collection.set_selected(references, selected);
        if changed > 0 {
            let count = if selected {
                self.selected_count + changed
            } else {
                self.selected_count.saturating_sub(changed)
            };
            self.set_selected_count(count);
        }
        self.selected_count
    }

    pub fn select_all(&mut self, selected: bool) -> usize {
        let count = self.collection.set_all_selected(selected);
        self.set_selected_count(count);
        count
    }

    /// The state a batch toggle should apply: set it when any selected
    /// record lacks it, clear it otherwise.
    pub fn batch_direction(&self, flag: BatchFlag) -> bool {
        self.collection.any_selected(|r| !flag.is_set(r))
    }

    /// Returns the references the storage layer should update.
    pub fn mark_selected_read(&mut self, read: bool) -> Vec<MessageRef> {
        self.mark_selected(BatchFlag::Read, read)
    }

    pub fn mark_selected_flagged(&mut self, flagged: bool) -> Vec<MessageRef> {
        self.mark_selected(BatchFlag::Flagged, flagged)
    }

    fn mark_selected(&mut self, flag: BatchFlag, state: bool) -> Vec<MessageRef> {
        let touched = self.collection.update_selected(|r| flag.apply(r, state));
        if !touched.is_empty() {
            self.resort_now();
            self.set_unread_count(self.collection.unread_count());
        }
        touched
    }

    /// Drop the selected records locally and hand their references back.
    pub fn delete_selected(&mut self) -> Vec<MessageRef> {
        let doomed = self.collection.selected_refs();
        if doomed.is_empty() {
            return doomed;
        }
        self.collection.remove_all(&doomed);
        self.set_selected_count(0);
        self.set_unread_count(self.collection.unread_count());
        doomed
    }

    // -- accessors ---------------------------------------------------------

    pub fn groups(&self) -> &[ConversationGroup] {
        &self.grouping.groups
    }

    pub fn group_of(&self, reference: &MessageRef) -> Option<&ConversationGroup> {
        self.grouping.group_of(reference)
    }

    pub fn selected_count(&self) -> usize {
        self.selected_count
    }

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// The last pass of this activation has been applied and nothing is pending.
    pub fn is_settled(&self) -> bool {
        self.active && self.settled && self.pipeline.state() == PipelineState::Idle
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Handle for producers; clone it freely.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn collection(&self) -> &SortedCollection {
        &self.collection
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }
}

impl<L: ViewListener> Drop for View<L> {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderBlock;
    use crate::message::fixtures::snapshot;
    use crate::message::{Flag, MessageSnapshot};
    use crate::reconcile::InboundEvent;
    use std::time::Duration;
    use tokio::time::sleep;

    #[derive(Default)]
    struct Recorder {
        passes: usize,
        settles: usize,
        last_sizes: Vec<usize>,
        busy: Vec<bool>,
        selection: Vec<usize>,
        unread: Vec<usize>,
    }

    impl ViewListener for Recorder {
        fn groups_changed(&mut self, groups: &[ConversationGroup]) {
            self.passes += 1;
            self.last_sizes = groups.iter().map(|g| g.message_count()).collect();
        }

        fn busy_state_changed(&mut self, busy: bool) {
            self.busy.push(busy);
        }

        fn selection_count_changed(&mut self, count: usize) {
            self.selection.push(count);
        }

        fn unread_count_changed(&mut self, count: usize) {
            self.unread.push(count);
        }

        fn grouping_settled(&mut self) {
            self.settles += 1;
        }
    }

    fn inbox_view() -> View<Recorder> {
        let scope = ViewScope::Folder {
            account: "work".into(),
            folder: "INBOX".into(),
        };
        View::new(scope, &Config::default(), Recorder::default(), None)
    }

    async fn settle(view: &mut View<Recorder>) {
        let before = view.listener().settles;
        while view.listener().settles == before {
            assert!(view.process_next().await);
        }
    }

    fn add(view: &View<Recorder>, messages: Vec<MessageSnapshot>) {
        view.reconciler().handle(InboundEvent::MessagesAdded {
            messages,
            verify: false,
        });
    }

    fn refs(uids: &[&str]) -> Vec<MessageRef> {
        uids.iter()
            .map(|uid| MessageRef::new("work", "INBOX", *uid))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn two_message_thread_scenario() {
        let mut view = inbox_view();
        view.activate();

        let hello = snapshot("1", "Hello", 0);
        let mut reply = snapshot("2", "Re: Hello", 10);
        reply.headers = HeaderBlock::Parsed {
            message_id: Some("<2@example.com>".into()),
            references: vec!["<1@example.com>".into()],
            in_reply_to: Vec::new(),
        };
        add(&view, vec![hello, reply]);
        settle(&mut view).await;

        assert_eq!(view.listener().last_sizes, vec![2]);
        assert_eq!(view.groups()[0].subject, "Hello");
        // newest first, so the reply heads the group
        assert!(view.group_of(&refs(&["2"])[0]).is_some());
        assert!(view.group_of(&refs(&["1"])[0]).is_none());
        assert_eq!(view.unread_count(), 2);

        view.set_grouping(GroupingMode::None);
        settle(&mut view).await;
        assert_eq!(view.listener().last_sizes, vec![1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn mark_all_read_scenario() {
        let mut view = inbox_view();
        view.activate();
        add(&view, (0..10).map(|i| snapshot(&i.to_string(), "s", i)).collect());
        settle(&mut view).await;
        assert_eq!(view.unread_count(), 10);

        let before: Vec<MessageRef> = view
            .collection()
            .snapshot()
            .iter()
            .map(|r| r.reference().clone())
            .collect();

        assert_eq!(view.select_all(true), 10);
        assert!(view.batch_direction(BatchFlag::Read));
        assert_eq!(view.mark_selected_read(true).len(), 10);
        assert!(!view.batch_direction(BatchFlag::Read));
        view.change_sort(SortKey::Unread);
        settle(&mut view).await;

        let after: Vec<MessageRef> = view
            .collection()
            .snapshot()
            .iter()
            .map(|r| r.reference().clone())
            .collect();
        assert_eq!(before, after);
        assert_eq!(view.unread_count(), 0);
        assert!(view.groups().iter().all(|g| g.unread == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn selection_count_never_goes_negative() {
        let mut view = inbox_view();
        view.activate();
        add(&view, vec![snapshot("1", "a", 0), snapshot("2", "b", 1)]);
        settle(&mut view).await;

        assert_eq!(view.select(&refs(&["1", "2"]), true), 2);
        assert_eq!(view.select(&refs(&["1"]), true), 2);
        view.reconciler().handle(InboundEvent::MessageRemoved {
            reference: refs(&["1"])[0].clone(),
        });
        view.drain();
        assert_eq!(view.selected_count(), 1);

        assert_eq!(view.select(&refs(&["1", "2"]), false), 0);
        assert_eq!(view.select(&refs(&["2"]), false), 0);
        view.apply(RenderMessage::Removed { selected: 3 });
        assert_eq!(view.selected_count(), 0);
        assert!(view.listener().selection.iter().all(|&c| c <= 2));
    }

    #[tokio::test(start_paused = true)]
    async fn results_after_deactivate_are_discarded() {
        let mut view = inbox_view();
        view.activate();
        settle(&mut view).await;
        let passes = view.listener().passes;
        let first = view.generation();

        add(&view, vec![snapshot("1", "a", 0)]);
        sleep(Duration::from_millis(50)).await;
        view.deactivate();
        sleep(Duration::from_secs(2)).await;
        view.drain();
        assert_eq!(view.listener().passes, passes);

        // events after teardown do not reach the collection
        add(&view, vec![snapshot("2", "b", 0)]);
        assert!(!view.collection().contains(&refs(&["2"])[0]));

        view.activate();
        assert!(view.generation() > first);
        assert!(view.collection().is_empty());
        view.apply(RenderMessage::Grouped {
            generation: first,
            grouping: Grouping::default(),
        });
        assert_eq!(view.listener().passes, passes);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_add_then_remove_is_one_pass() {
        let mut view = inbox_view();
        view.activate();
        settle(&mut view).await;
        let passes = view.listener().passes;

        add(&view, (0..50).map(|i| snapshot(&i.to_string(), "s", i)).collect());
        let removals: Vec<MessageSnapshot> = (0..20)
            .map(|i| {
                let mut gone = snapshot(&i.to_string(), "s", i);
                gone.flags = vec![Flag::Deleted];
                gone
            })
            .collect();
        view.reconciler().handle(InboundEvent::MessagesUpdated { messages: removals });
        settle(&mut view).await;

        assert_eq!(view.listener().passes, passes + 1);
        assert_eq!(view.groups().len(), 30);
        assert_eq!(view.unread_count(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_follows_folder_sync() {
        let mut view = inbox_view();
        view.activate();
        view.reconciler().handle(InboundEvent::FolderSyncStarted {
            account: "work".into(),
            folder: "INBOX".into(),
        });
        view.drain();
        assert!(view.is_busy());

        // a settled pass does not clear a running sync
        settle(&mut view).await;
        assert!(view.is_busy());

        view.reconciler().handle(InboundEvent::FolderSyncFinished {
            account: "work".into(),
            folder: "INBOX".into(),
        });
        settle(&mut view).await;
        assert!(!view.is_busy());
        assert!(view.is_settled());
        assert_eq!(view.listener().busy, vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn uid_change_reaches_the_rendered_groups() {
        let mut view = inbox_view();
        view.activate();
        add(&view, vec![snapshot("1", "Hello", 0), snapshot("2", "Other", 5)]);
        settle(&mut view).await;
        let passes = view.listener().passes;

        view.reconciler().handle(InboundEvent::MessageIdentityChanged {
            account: "work".into(),
            folder: "INBOX".into(),
            old_uid: "1".into(),
            new_uid: "101".into(),
        });
        settle(&mut view).await;

        assert_eq!(view.listener().passes, passes + 1);
        let mut uids: Vec<&str> = view
            .groups()
            .iter()
            .flat_map(|g| g.messages.iter().map(|m| m.reference().uid.as_str()))
            .collect();
        uids.sort();
        assert_eq!(uids, vec!["101", "2"]);
        assert!(view.group_of(&refs(&["101"])[0]).is_some());
        assert!(view.group_of(&refs(&["1"])[0]).is_none());

        // a uid that is already taken leaves both records alone
        view.reconciler().handle(InboundEvent::MessageIdentityChanged {
            account: "work".into(),
            folder: "INBOX".into(),
            old_uid: "101".into(),
            new_uid: "2".into(),
        });
        assert_eq!(view.collection().len(), 2);
        assert!(view.collection().contains(&refs(&["101"])[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn reactivation_ignores_messages_from_the_old_activation() {
        let mut view = inbox_view();
        view.activate();
        settle(&mut view).await;

        view.reconciler().handle(InboundEvent::FolderSyncStarted {
            account: "work".into(),
            folder: "INBOX".into(),
        });
        view.reconciler().handle(InboundEvent::FolderStatusChanged {
            account: "work".into(),
            folder: "INBOX".into(),
            unread: 42,
        });
        view.deactivate();
        view.activate();
        view.drain();

        assert!(!view.is_busy());
        assert_eq!(view.unread_count(), 0);
        assert!(view.listener().busy.is_empty());
        assert!(!view.listener().unread.contains(&42));
    }

    #[tokio::test(start_paused = true)]
    async fn sort_changes_apply_immediately() {
        let mut view = inbox_view();
        view.activate();
        add(
            &view,
            vec![
                snapshot("1", "Zeta", 0),
                snapshot("2", "Re: Apple", 1),
                snapshot("3", "Banana", 2),
            ],
        );
        view.change_sort(SortKey::Subject);
        let subjects: Vec<String> = view
            .collection()
            .snapshot()
            .into_iter()
            .map(|r| r.subject)
            .collect();
        assert_eq!(subjects, vec!["Re: Apple", "Banana", "Zeta"]);

        view.toggle_sort_ascending();
        assert_eq!(view.collection().snapshot()[0].subject, "Zeta");

        view.cycle_sort();
        assert_eq!(view.sort().key, SortKey::Sender);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_flag_and_delete() {
        let mut view = inbox_view();
        view.activate();
        add(&view, vec![snapshot("1", "a", 0), snapshot("2", "b", 1), snapshot("3", "c", 2)]);
        settle(&mut view).await;

        view.select(&refs(&["1", "2"]), true);
        assert!(view.batch_direction(BatchFlag::Flagged));
        view.mark_selected_flagged(true);
        assert!(!view.batch_direction(BatchFlag::Flagged));

        let deleted = view.delete_selected();
        assert_eq!(deleted.len(), 2);
        assert_eq!(view.selected_count(), 0);
        assert_eq!(view.unread_count(), 1);
        assert!(view.delete_selected().is_empty());
        settle(&mut view).await;
        assert_eq!(view.groups().len(), 1);
    }
}

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::collection::{Rename, SortedCollection};
use crate::config::AccountConfig;
use crate::message::{MessageRecord, MessageRef, MessageSnapshot};
use crate::view::RenderMessage;

/// What the view is showing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewScope {
    Folder { account: String, folder: String },
    Search { query: String },
}

impl ViewScope {
    pub fn is_search(&self) -> bool {
        matches!(self, ViewScope::Search { .. })
    }

    /// Sync events for exactly this account and folder.
    pub fn is_live_folder(&self, account: &str, folder: &str) -> bool {
        match self {
            ViewScope::Folder {
                account: a,
                folder: f,
            } => a == account && f == folder,
            ViewScope::Search { .. } => false,
        }
    }

    /// Local listing events: the view's account, or folder-less search results.
    fn concerns_listing(&self, account: Option<&str>, folder: Option<&str>) -> bool {
        match self {
            ViewScope::Folder { account: a, .. } => account == Some(a.as_str()),
            ViewScope::Search { .. } => folder.is_none(),
        }
    }
}

/// Events from the sync, search and storage layers.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundEvent {
    FolderSyncStarted {
        account: String,
        folder: String,
    },
    FolderSyncProgress {
        account: String,
        folder: String,
        completed: u32,
        total: u32,
    },
    FolderSyncFinished {
        account: String,
        folder: String,
    },
    FolderSyncFailed {
        account: String,
        folder: String,
        #[serde(default)]
        message: String,
    },
    MessagesAdded {
        messages: Vec<MessageSnapshot>,
        /// Set by the sync layer: search views must check new arrivals
        /// against the query before showing them.
        #[serde(default)]
        verify: bool,
    },
    MessagesUpdated {
        messages: Vec<MessageSnapshot>,
    },
    MessageRemoved {
        reference: MessageRef,
    },
    MessageIdentityChanged {
        account: String,
        folder: String,
        old_uid: String,
        new_uid: String,
    },
    LocalListStarted {
        #[serde(default)]
        account: Option<String>,
        #[serde(default)]
        folder: Option<String>,
    },
    LocalListFinished {
        #[serde(default)]
        account: Option<String>,
        #[serde(default)]
        folder: Option<String>,
    },
    LocalListFailed {
        #[serde(default)]
        account: Option<String>,
        #[serde(default)]
        folder: Option<String>,
        #[serde(default)]
        message: String,
    },
    SearchStatsAvailable {
        unread: usize,
    },
    FolderStatusChanged {
        account: String,
        folder: String,
        unread: usize,
    },
}

/// Answer from the search layer about provisionally deferred messages.
#[derive(Debug, Clone, Default)]
pub struct SearchVerdict {
    pub matched: Vec<MessageSnapshot>,
    pub rejected: Vec<MessageRef>,
}

pub type VerdictCallback = Box<dyn FnOnce(SearchVerdict) + Send + 'static>;

/// Checks messages against a saved search. Fire and forget: the answer comes
/// back through `done`, possibly from another thread, possibly much later.
pub trait SearchVerifier: Send + Sync {
    fn verify(&self, query: &str, messages: Vec<MessageSnapshot>, done: VerdictCallback);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub added: usize,
    pub removed: usize,
    pub repopulated: usize,
    pub deferred: usize,
    pub resorted: bool,
}

impl BatchOutcome {
    fn absorb(&mut self, other: BatchOutcome) {
        self.added += other.added;
        self.removed += other.removed;
        self.repopulated += other.repopulated;
        self.deferred += other.deferred;
        self.resorted |= other.resorted;
    }
}

/// Turns inbound events into collection mutations. Cheap to clone; every
/// producer gets its own handle.
#[derive(Clone)]
pub struct Reconciler {
    scope: Arc<ViewScope>,
    collection: SortedCollection,
    accounts: Arc<Vec<AccountConfig>>,
    verifier: Option<Arc<dyn SearchVerifier>>,
    render_tx: UnboundedSender<RenderMessage>,
    attached: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(
        scope: ViewScope,
        collection: SortedCollection,
        accounts: Vec<AccountConfig>,
        verifier: Option<Arc<dyn SearchVerifier>>,
        render_tx: UnboundedSender<RenderMessage>,
    ) -> Self {
        Self {
            scope: Arc::new(scope),
            collection,
            accounts: Arc::new(accounts),
            verifier,
            render_tx,
            attached: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn scope(&self) -> &ViewScope {
        &self.scope
    }

    pub fn attach(&self) {
        self.attached.store(true, Ordering::Release);
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    fn send(&self, message: RenderMessage) {
        let _ = self.render_tx.send(message);
    }

    pub fn handle(&self, event: InboundEvent) {
        if !self.is_attached() {
            debug!(?event, "view detached, event ignored");
            return;
        }
        match event {
            InboundEvent::FolderSyncStarted { account, folder } => {
                if self.scope.is_live_folder(&account, &folder) {
                    self.send(RenderMessage::Busy(true));
                }
            }
            InboundEvent::FolderSyncProgress {
                account,
                folder,
                completed,
                total,
            } => {
                debug!(%account, %folder, completed, total, "sync progress");
            }
            InboundEvent::FolderSyncFinished { account, folder } => {
                if self.scope.is_live_folder(&account, &folder) {
                    self.send(RenderMessage::Busy(false));
                    self.collection.resort_current();
                }
            }
            InboundEvent::FolderSyncFailed {
                account,
                folder,
                message,
            } => {
                if self.scope.is_live_folder(&account, &folder) {
                    warn!(%account, %folder, "sync failed: {message}");
                    self.send(RenderMessage::Busy(false));
                    self.collection.resort_current();
                }
            }
            InboundEvent::MessagesAdded { messages, verify } => {
                self.add_or_update(messages, verify);
            }
            InboundEvent::MessagesUpdated { messages } => {
                self.add_or_update(messages, false);
            }
            InboundEvent::MessageRemoved { reference } => {
                if self.collection.contains(&reference) {
                    self.remove(&[reference]);
                    self.send_unread_count();
                } else {
                    warn!(message = %reference, "remove for unknown message");
                }
            }
            InboundEvent::MessageIdentityChanged {
                account,
                folder,
                old_uid,
                new_uid,
            } => {
                let reference = MessageRef::new(account, folder, old_uid);
                match self.collection.rename_uid(&reference, &new_uid) {
                    Rename::Renamed => {}
                    Rename::Missing => {
                        warn!(message = %reference, %new_uid, "uid change for unknown message")
                    }
                    Rename::Taken => {
                        warn!(message = %reference, %new_uid, "uid change onto an existing message refused")
                    }
                }
            }
            InboundEvent::LocalListStarted { account, folder } => {
                if self.scope.concerns_listing(account.as_deref(), folder.as_deref()) {
                    self.send(RenderMessage::Busy(true));
                }
            }
            InboundEvent::LocalListFinished { account, folder } => {
                if self.scope.concerns_listing(account.as_deref(), folder.as_deref()) {
                    self.collection.resort_current();
                    self.send(RenderMessage::Busy(false));
                }
            }
            InboundEvent::LocalListFailed {
                account,
                folder,
                message,
            } => {
                if self.scope.concerns_listing(account.as_deref(), folder.as_deref()) {
                    warn!(?account, ?folder, "local listing failed: {message}");
                    self.collection.resort_current();
                    self.send(RenderMessage::Busy(false));
                }
            }
            InboundEvent::SearchStatsAvailable { unread } => {
                self.send(RenderMessage::UnreadCount(unread));
            }
            InboundEvent::FolderStatusChanged {
                account,
                folder,
                unread,
            } => {
                if self.scope.is_live_folder(&account, &folder) {
                    self.send(RenderMessage::UnreadCount(unread));
                }
            }
        }
    }

    /// Classify a batch, then apply removals, additions and the resort once.
    pub fn add_or_update(&self, messages: Vec<MessageSnapshot>, verify: bool) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut to_add = Vec::new();
        let mut to_remove = Vec::new();
        let mut to_search = Vec::new();

        for snapshot in messages {
            if snapshot.is_deleted() {
                to_remove.push(snapshot.reference);
                continue;
            }
            let accounts = self.accounts.as_slice();
            if self
                .collection
                .update(&snapshot.reference, |record| record.populate(&snapshot, accounts))
            {
                outcome.repopulated += 1;
                continue;
            }
            let reference = &snapshot.reference;
            if self.scope.is_live_folder(&reference.account, &reference.folder) {
                to_add.push(MessageRecord::from_snapshot(&snapshot, accounts));
            } else if self.scope.is_search() {
                if verify {
                    to_search.push(snapshot);
                } else {
                    to_add.push(MessageRecord::from_snapshot(&snapshot, accounts));
                }
            }
        }

        if !to_remove.is_empty() {
            outcome.removed += self.remove(&to_remove);
        }
        if !to_add.is_empty() {
            // another producer may have added some of these since the
            // lookup above; those count as repopulated
            let insertion = self.collection.insert_all(to_add);
            outcome.added += insertion.inserted;
            outcome.repopulated += insertion.refreshed;
        }
        if outcome.repopulated > 0 {
            self.collection.resort_current();
            outcome.resorted = true;
        }
        if outcome.added > 0 || outcome.removed > 0 || outcome.repopulated > 0 {
            self.send_unread_count();
        }
        if !to_search.is_empty() {
            let count = to_search.len();
            match self.verify_against_search(to_search) {
                Some(unverified) => outcome.absorb(unverified),
                None => outcome.deferred = count,
            }
        }
        debug!(?outcome, "batch reconciled");
        outcome
    }

    fn remove(&self, references: &[MessageRef]) -> usize {
        let removal = self.collection.remove_all(references);
        if removal.removed > 0 {
            self.send(RenderMessage::Removed {
                selected: removal.selected,
            });
        }
        removal.removed
    }

    fn send_unread_count(&self) {
        self.send(RenderMessage::UnreadCount(self.collection.unread_count()));
    }

    /// Hands the messages to the verifier. Without one they are reconciled
    /// right away and that outcome is returned.
    fn verify_against_search(&self, messages: Vec<MessageSnapshot>) -> Option<BatchOutcome> {
        let (ViewScope::Search { query }, Some(verifier)) = (self.scope.as_ref(), &self.verifier)
        else {
            info!(count = messages.len(), "no search verifier, adding unverified");
            return Some(self.add_or_update(messages, false));
        };
        let this = self.clone();
        verifier.verify(
            query,
            messages,
            Box::new(move |verdict| {
                this.apply_verdict(verdict);
            }),
        );
        None
    }

    /// Late answer from the search layer: confirmed messages enter the view,
    /// rejected ones leave it.
    pub fn apply_verdict(&self, verdict: SearchVerdict) -> BatchOutcome {
        if !self.is_attached() {
            debug!("view detached, search verdict dropped");
            return BatchOutcome::default();
        }
        let mut outcome = self.add_or_update(verdict.matched, false);
        if !verdict.rejected.is_empty() {
            let removed = self.remove(&verdict.rejected);
            if removed > 0 {
                outcome.removed += removed;
                self.send_unread_count();
            }
        }
        outcome
    }
}

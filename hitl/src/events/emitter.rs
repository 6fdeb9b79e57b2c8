//! Per-conversation ordered event log with live fan-out.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use reasoning_event::{EventDraft, ReasoningEvent};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::store::{decode, put_json, DurableStore, RecordKind, StoreError, StoreKey};

use super::EventRecorder;

/// One item of a reasoning feed.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedItem {
    Event(ReasoningEvent),
    /// Live delivery skipped events. The feed re-fetches from the log after
    /// `resume_after`; clients tracking their own cursor may do the same.
    Missed { resume_after: Option<u64> },
}

struct EmitterInner {
    store: Arc<dyn DurableStore>,
    /// Next sequence index per conversation; `None` until first read from the store.
    counters: DashMap<String, Arc<Mutex<Option<u64>>>>,
    channels: DashMap<String, broadcast::Sender<ReasoningEvent>>,
    capacity: usize,
}

/// Reasoning event emitter.
///
/// `emit` appends to the durable log and then publishes to live subscribers. The append
/// holds a per-conversation counter lock, so indices are gapless: a failed append does
/// not consume an index.
#[derive(Clone)]
pub struct ReasoningEmitter {
    inner: Arc<EmitterInner>,
}

impl ReasoningEmitter {
    /// `capacity` is the live buffer per conversation before a subscriber lags.
    pub fn new(store: Arc<dyn DurableStore>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                store,
                counters: DashMap::new(),
                channels: DashMap::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Root recorder for a conversation.
    pub fn recorder(&self, conversation_id: impl Into<String>) -> EventRecorder {
        EventRecorder::new(self.clone(), conversation_id.into())
    }

    fn counter(&self, conversation_id: &str) -> Arc<Mutex<Option<u64>>> {
        self.inner
            .counters
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Subscribes under the map entry so a concurrent prune never drops a channel between
    /// lookup and subscribe.
    fn receiver(&self, conversation_id: &str) -> broadcast::Receiver<ReasoningEvent> {
        self.inner
            .channels
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe()
    }

    /// Sends to live feeds, if any. A channel whose feeds have all gone is dropped.
    fn publish(&self, conversation_id: &str, event: &ReasoningEvent) -> usize {
        let Some(tx) = self
            .inner
            .channels
            .get(conversation_id)
            .map(|tx| tx.value().clone())
        else {
            return 0;
        };
        match tx.send(event.clone()) {
            Ok(delivered) => delivered,
            Err(_) => {
                self.inner
                    .channels
                    .remove_if(conversation_id, |_, tx| tx.receiver_count() == 0);
                0
            }
        }
    }

    /// Commits `draft` as the next event of the conversation, then publishes it.
    pub async fn emit(
        &self,
        conversation_id: &str,
        draft: EventDraft,
    ) -> Result<ReasoningEvent, StoreError> {
        let counter = self.counter(conversation_id);
        let mut next = counter.lock().await;
        let index = match *next {
            Some(n) => n,
            None => self
                .inner
                .store
                .last_index(conversation_id, RecordKind::Event)
                .await?
                .map_or(0, |last| last + 1),
        };
        let event = draft.seal(
            conversation_id,
            index,
            uuid::Uuid::new_v4().to_string(),
            Utc::now(),
        );
        let key = StoreKey::new(conversation_id, RecordKind::Event, index);
        put_json(self.inner.store.as_ref(), &key, &event).await?;
        *next = Some(index + 1);
        drop(next);

        // No receivers is fine: the log is the source of truth.
        let delivered = self.publish(conversation_id, &event);
        debug!(
            conversation_id,
            sequence_index = index,
            event = %event.event_name(),
            delivered,
            "reasoning event committed"
        );
        Ok(event)
    }

    /// Persisted events with index greater than `after`, ascending.
    pub async fn history(
        &self,
        conversation_id: &str,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<ReasoningEvent>, StoreError> {
        self.inner
            .store
            .scan(conversation_id, RecordKind::Event, after, limit)
            .await?
            .into_iter()
            .map(|(_, blob)| decode(&blob))
            .collect()
    }

    /// Highest committed index, if any.
    pub async fn last_sequence_index(
        &self,
        conversation_id: &str,
    ) -> Result<Option<u64>, StoreError> {
        self.inner
            .store
            .last_index(conversation_id, RecordKind::Event)
            .await
    }

    /// Replays the log after `after`, then follows live events until [`close`](Self::close).
    ///
    /// The live receiver is taken before the replay read, so nothing committed in between
    /// is lost; duplicates are skipped by index. A lagging receiver yields
    /// [`FeedItem::Missed`] and the feed re-reads the log from its cursor.
    pub fn subscribe(
        &self,
        conversation_id: &str,
        after: Option<u64>,
    ) -> BoxStream<'static, FeedItem> {
        let state = FeedState {
            emitter: self.clone(),
            conversation_id: conversation_id.to_string(),
            cursor: after,
            backlog: VecDeque::new(),
            refill: true,
            rx: self.receiver(conversation_id),
            done: false,
        };
        stream::unfold(state, |mut state| async move {
            let item = state.next_item().await?;
            Some((item, state))
        })
        .boxed()
    }

    /// Ends live feeds for a conversation. Subscribers drain what they have and finish.
    pub fn close(&self, conversation_id: &str) {
        self.inner.channels.remove(conversation_id);
    }

    /// Drops the in-memory state of an idle conversation. Live feeds end as with
    /// [`close`](Self::close); the next `emit` re-reads its index from the log.
    pub fn release(&self, conversation_id: &str) {
        self.close(conversation_id);
        self.inner
            .counters
            .remove_if(conversation_id, |_, counter| Arc::strong_count(counter) == 1);
    }

    /// Conversations with an in-memory counter or live channel.
    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        let mut ids: std::collections::HashSet<String> =
            self.inner.counters.iter().map(|e| e.key().clone()).collect();
        ids.extend(self.inner.channels.iter().map(|e| e.key().clone()));
        ids.len()
    }
}

struct FeedState {
    emitter: ReasoningEmitter,
    conversation_id: String,
    cursor: Option<u64>,
    backlog: VecDeque<ReasoningEvent>,
    refill: bool,
    rx: broadcast::Receiver<ReasoningEvent>,
    done: bool,
}

impl FeedState {
    fn is_new(&self, event: &ReasoningEvent) -> bool {
        self.cursor.map_or(true, |c| event.sequence_index > c)
    }

    fn advance(&mut self, event: ReasoningEvent) -> FeedItem {
        self.cursor = Some(event.sequence_index);
        FeedItem::Event(event)
    }

    async fn refill_backlog(&mut self) -> bool {
        match self
            .emitter
            .history(&self.conversation_id, self.cursor, None)
            .await
        {
            Ok(events) => {
                self.backlog.extend(events);
                true
            }
            Err(e) => {
                warn!(conversation_id = %self.conversation_id, error = %e, "feed replay failed");
                false
            }
        }
    }

    async fn next_item(&mut self) -> Option<FeedItem> {
        if self.done {
            return None;
        }
        loop {
            if self.refill {
                self.refill = false;
                if !self.refill_backlog().await {
                    self.done = true;
                    return None;
                }
            }
            while let Some(event) = self.backlog.pop_front() {
                if self.is_new(&event) {
                    return Some(self.advance(event));
                }
            }
            match self.rx.recv().await {
                Ok(event) => {
                    if !self.is_new(&event) {
                        continue;
                    }
                    let expected = self.cursor.map_or(0, |c| c + 1);
                    if event.sequence_index > expected {
                        // Committed before this feed attached; read the gap from the log.
                        self.refill = true;
                        continue;
                    }
                    return Some(self.advance(event));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        conversation_id = %self.conversation_id,
                        skipped,
                        "subscriber lagged; re-fetching from log"
                    );
                    self.refill = true;
                    return Some(FeedItem::Missed {
                        resume_after: self.cursor,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

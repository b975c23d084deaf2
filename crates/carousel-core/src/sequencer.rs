//! Playlist sequencer
//!
//! Owns the persisted, shuffled traversal order of the catalog. Only the
//! operations here may read or write the order:
//!
//! ```text
//! order:    [ 2 | 4 0 3 1 ]      anchor = 2
//!                  ^ position
//! next() past the end -> reshuffle with a new anchor != last item
//! ```

use crate::{
    storage::{load_json, save_json, KeyValueStore},
    Error, PlaylistItem, Result,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const ORDER_KEY: &str = "sequencer/order";

/// Load the static catalog: a JSON array of items
pub fn load_catalog(path: impl AsRef<Path>) -> Result<Vec<PlaylistItem>> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let items: Vec<PlaylistItem> = serde_json::from_str(&raw)?;
    Ok(items)
}

/// Persisted permutation of catalog indices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayOrder {
    /// Catalog indices; `order[0]` is the anchor
    pub order: Vec<usize>,
    /// Current position in `order`
    pub position: usize,
    /// Playback position to resume at, in seconds
    #[serde(default)]
    pub resume_position: f64,
}

impl PlayOrder {
    /// Anchored item, if any
    pub fn anchor(&self) -> Option<usize> {
        self.order.first().copied()
    }

    /// True if this is a full permutation of `0..len` with a valid position
    pub fn is_valid_for(&self, len: usize) -> bool {
        if self.order.len() != len || (len > 0 && self.position >= len) {
            return false;
        }
        let mut seen = vec![false; len];
        for &index in &self.order {
            if index >= len || seen[index] {
                return false;
            }
            seen[index] = true;
        }
        true
    }
}

struct SequencerState {
    order: PlayOrder,
    rng: StdRng,
}

/// Shuffled, non-repeating traversal of the catalog
pub struct PlaylistSequencer {
    items: Vec<PlaylistItem>,
    store: Arc<dyn KeyValueStore>,
    state: Mutex<SequencerState>,
}

impl PlaylistSequencer {
    pub fn new(items: Vec<PlaylistItem>, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_rng(items, store, StdRng::from_entropy())
    }

    /// Deterministic shuffles
    pub fn with_seed(items: Vec<PlaylistItem>, store: Arc<dyn KeyValueStore>, seed: u64) -> Self {
        Self::with_rng(items, store, StdRng::seed_from_u64(seed))
    }

    fn with_rng(items: Vec<PlaylistItem>, store: Arc<dyn KeyValueStore>, mut rng: StdRng) -> Self {
        let order = anchored_order(items.len(), 0, &mut rng);
        Self {
            items,
            store,
            state: Mutex::new(SequencerState { order, rng }),
        }
    }

    pub fn items(&self) -> &[PlaylistItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Catalog index of an item id
    pub fn index_of(&self, item_id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == item_id)
    }

    /// Restore the persisted order, repairing it if it no longer fits the catalog
    #[instrument(skip(self))]
    pub async fn init(&self) {
        let persisted = match load_json::<PlayOrder>(self.store.as_ref(), ORDER_KEY).await {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable play order");
                None
            }
        };

        let mut state = self.state.lock().await;
        let state = &mut *state;
        match persisted {
            Some(order) if order.is_valid_for(self.items.len()) => {
                info!(position = order.position, anchor = ?order.anchor(), "Play order restored");
                state.order = order;
            }
            Some(stale) => {
                let anchor = stale.anchor().filter(|&a| a < self.items.len()).unwrap_or(0);
                warn!(
                    persisted_len = stale.order.len(),
                    catalog_len = self.items.len(),
                    anchor,
                    "Play order does not match catalog, regenerating"
                );
                state.order = anchored_order(self.items.len(), anchor, &mut state.rng);
            }
            None => debug!("No persisted play order"),
        }
        self.persist(&state.order).await;
    }

    /// Item at the current position
    pub async fn current(&self) -> Result<PlaylistItem> {
        let state = self.state.lock().await;
        self.item_at(&state.order, state.order.position)
    }

    /// Catalog index of the current item
    pub async fn current_index(&self) -> Result<usize> {
        let state = self.state.lock().await;
        state
            .order
            .order
            .get(state.order.position)
            .copied()
            .ok_or(Error::EmptyPlaylist)
    }

    /// Re-anchor at catalog index `index` and shuffle the remainder
    #[instrument(skip(self))]
    pub async fn set_index(&self, index: usize) -> Result<PlaylistItem> {
        if self.items.is_empty() {
            return Err(Error::EmptyPlaylist);
        }
        if index >= self.items.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }

        let mut state = self.state.lock().await;
        let state = &mut *state;
        state.order = anchored_order(self.items.len(), index, &mut state.rng);
        self.persist(&state.order).await;

        info!(index, item_id = %self.items[index].id, "Play order re-anchored");
        self.item_at(&state.order, 0)
    }

    /// Advance one position, reshuffling after a full cycle
    #[instrument(skip(self))]
    pub async fn next(&self) -> Result<PlaylistItem> {
        if self.items.is_empty() {
            return Err(Error::EmptyPlaylist);
        }

        let mut state = self.state.lock().await;
        let state = &mut *state;
        let len = self.items.len();

        if state.order.position + 1 < len {
            state.order.position += 1;
        } else {
            let finished = state.order.order[state.order.position];
            let anchor = if len > 1 {
                let mut candidate = state.rng.gen_range(0..len - 1);
                if candidate >= finished {
                    candidate += 1;
                }
                candidate
            } else {
                finished
            };
            state.order = anchored_order(len, anchor, &mut state.rng);
            info!(finished, anchor, "Cycle complete, play order reshuffled");
        }

        state.order.resume_position = 0.0;
        self.persist(&state.order).await;
        self.item_at(&state.order, state.order.position)
    }

    /// Step back through the materialized order, or re-anchor one before the current item
    #[instrument(skip(self))]
    pub async fn prev(&self) -> Result<PlaylistItem> {
        if self.items.is_empty() {
            return Err(Error::EmptyPlaylist);
        }

        let mut state = self.state.lock().await;
        let state = &mut *state;

        if state.order.position > 0 {
            state.order.position -= 1;
            state.order.resume_position = 0.0;
        } else {
            let len = self.items.len();
            let current = state.order.order[0];
            let anchor = (current + len - 1) % len;
            state.order = anchored_order(len, anchor, &mut state.rng);
            debug!(anchor, "Stepped back past the anchor, re-anchored");
        }

        self.persist(&state.order).await;
        self.item_at(&state.order, state.order.position)
    }

    /// Item `next()` will return, without mutating the order.
    /// `None` at the end of a cycle, where the next item is not yet drawn.
    pub async fn peek_next(&self) -> Option<PlaylistItem> {
        let state = self.state.lock().await;
        self.item_at(&state.order, state.order.position + 1).ok()
    }

    /// Snapshot of the current order
    pub async fn play_order(&self) -> PlayOrder {
        self.state.lock().await.order.clone()
    }

    /// Persisted resume position for the current item
    pub async fn resume_position(&self) -> f64 {
        self.state.lock().await.order.resume_position
    }

    /// Record the playback position of the current item
    pub async fn save_resume_position(&self, seconds: f64) {
        let mut state = self.state.lock().await;
        state.order.resume_position = seconds.max(0.0);
        self.persist(&state.order).await;
    }

    fn item_at(&self, order: &PlayOrder, position: usize) -> Result<PlaylistItem> {
        if self.items.is_empty() {
            return Err(Error::EmptyPlaylist);
        }
        let index = *order.order.get(position).ok_or(Error::IndexOutOfRange {
            index: position,
            len: order.order.len(),
        })?;
        self.items
            .get(index)
            .cloned()
            .ok_or(Error::IndexOutOfRange {
                index,
                len: self.items.len(),
            })
    }

    async fn persist(&self, order: &PlayOrder) {
        if let Err(e) = save_json(self.store.as_ref(), ORDER_KEY, order).await {
            warn!(error = %e, "Failed to persist play order");
        }
    }
}

/// `anchor` first, then a Fisher-Yates shuffle of the rest
fn anchored_order(len: usize, anchor: usize, rng: &mut StdRng) -> PlayOrder {
    if len == 0 {
        return PlayOrder::default();
    }
    let mut rest: Vec<usize> = (0..len).filter(|&i| i != anchor).collect();
    rest.shuffle(rng);

    let mut order = Vec::with_capacity(len);
    order.push(anchor);
    order.extend(rest);

    PlayOrder {
        order,
        position: 0,
        resume_position: 0.0,
    }
}
